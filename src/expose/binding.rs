// SPDX-License-Identifier: MPL-2.0
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Per-channel translation bindings.

use std::collections::HashMap;

use crate::types::{ChannelDataType, ChannelFlags, ChannelKind};

/// Wire representation used by a color channel.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum ColorMode {
    /// CIE xy chromaticity (`{"x": .., "y": ..}`).
    #[default]
    Xy,
    /// Hue/saturation (`{"hue": .., "saturation": ..}`).
    Hs,
}

/// Internal recipe describing how to decode state values and encode set
/// payloads for one channel.
///
/// Built by the expose compiler alongside the public [`Channel`]
/// (crate::types::Channel); never leaves the adapter.
#[derive(Debug, Clone)]
pub struct ChannelBinding {
    /// The channel this binding belongs to.
    pub channel_id: String,
    /// Z2M property name in state and set payloads.
    pub property: String,
    /// Semantic kind, mirrored from the channel.
    pub kind: ChannelKind,
    /// Data type, mirrored from the channel.
    pub data_type: ChannelDataType,
    /// Access flags, mirrored from the channel.
    pub flags: ChannelFlags,
    /// Canonical unit, if any.
    pub unit: Option<String>,
    /// Raw wire minimum.
    pub raw_min: f64,
    /// Raw wire maximum.
    pub raw_max: f64,
    /// Raw wire step.
    pub raw_step: f64,
    /// Multiplicative scale from raw to canonical (e.g. 0.001 for mV to V).
    pub value_scale: f64,
    /// Endpoint suffix for multi-endpoint devices.
    pub endpoint: Option<String>,
    /// Wire string for the ON state of binary switches.
    pub value_on: Option<String>,
    /// Wire string for the OFF state of binary switches.
    pub value_off: Option<String>,
    /// Wire representation for color channels.
    pub color_mode: ColorMode,
    /// Raw range is rescaled to 0-100 for the host.
    pub scale_percent: bool,
    /// This binding feeds the implicit connectivity channel.
    pub is_availability: bool,
    /// Raw enum string to stable integer.
    pub enum_raw_to_value: HashMap<String, i64>,
    /// Stable integer back to the raw enum string.
    pub enum_value_to_raw: HashMap<i64, String>,
}

impl ChannelBinding {
    /// Creates a binding with neutral scaling for the given channel.
    #[must_use]
    pub fn new(
        channel_id: impl Into<String>,
        property: impl Into<String>,
        kind: ChannelKind,
        data_type: ChannelDataType,
        flags: ChannelFlags,
    ) -> Self {
        Self {
            channel_id: channel_id.into(),
            property: property.into(),
            kind,
            data_type,
            flags,
            unit: None,
            raw_min: 0.0,
            raw_max: 0.0,
            raw_step: 0.0,
            value_scale: 1.0,
            endpoint: None,
            value_on: None,
            value_off: None,
            color_mode: ColorMode::default(),
            scale_percent: false,
            is_availability: false,
            enum_raw_to_value: HashMap::new(),
            enum_value_to_raw: HashMap::new(),
        }
    }
}
