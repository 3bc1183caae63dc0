// SPDX-License-Identifier: MPL-2.0
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Canonical channel model.
//!
//! A [`Channel`] is one addressable capability of a device: a dimmer level,
//! a temperature reading, a power switch. Channels are compiled from the
//! Zigbee2MQTT `exposes` tree and handed to the host; the adapter keeps a
//! matching internal binding describing how to translate values.

use serde::{Deserialize, Serialize};

/// Semantic meaning of a channel.
///
/// This is a closed set: properties the adapter does not recognise are
/// carried as [`ChannelKind::Unknown`] with a data type derived from the
/// expose node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ChannelKind {
    /// On/off switch state.
    PowerOnOff,
    /// Brightness as a percentage (0-100).
    Brightness,
    /// Color temperature in mired.
    ColorTemperature,
    /// Full color, carried as sRGB.
    ColorRgb,
    /// Air temperature in degrees Celsius.
    Temperature,
    /// Relative humidity in percent.
    Humidity,
    /// Illuminance in lux.
    Illuminance,
    /// Motion or occupancy detection.
    Motion,
    /// Battery level in percent.
    Battery,
    /// Zigbee link quality, normalised to percent.
    LinkQuality,
    /// Raw radio signal strength.
    SignalStrength,
    /// Voltage in volts.
    Voltage,
    /// Current in amperes.
    Current,
    /// Active power in watts.
    Power,
    /// Accumulated energy in kilowatt hours.
    Energy,
    /// CO2 concentration in ppm.
    Co2,
    /// A duration in seconds.
    Duration,
    /// Tamper detection.
    Tamper,
    /// Contact sensor (door/window).
    Contact,
    /// Coarse ambient light level reported as an enum.
    AmbientLightLevel,
    /// Button press events.
    ButtonEvent,
    /// Implicit per-device connectivity channel.
    ConnectivityStatus,
    /// Implicit per-device firmware update channel.
    DeviceSoftwareUpdate,
    /// Property not covered by the mapping table.
    Unknown,
}

/// Data type carried by a channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ChannelDataType {
    /// Boolean values.
    Bool,
    /// Integer values.
    Int,
    /// Floating-point values.
    Float,
    /// Free-form text.
    String,
    /// sRGB color.
    Color,
    /// One of a fixed set of choices, carried as a stable integer.
    Enum,
}

/// Access and behavior flags of a channel.
// Each boolean is an independent flag reported to the host; they do not form
// a state machine.
#[allow(clippy::struct_excessive_bools)]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChannelFlags {
    /// Value can be read.
    pub readable: bool,
    /// Value can be written via a command.
    pub writable: bool,
    /// Device reports value changes on its own.
    pub reportable: bool,
    /// Last value is retained by the broker.
    pub retained: bool,
    /// Channel is present but currently inactive.
    pub inactive: bool,
    /// Updates must not fire host triggers.
    pub no_trigger: bool,
    /// Channel is hidden from default UIs.
    pub suppress: bool,
}

impl ChannelFlags {
    /// Default flags for a read-only reported channel.
    #[must_use]
    pub const fn read_only() -> Self {
        Self {
            readable: true,
            writable: false,
            reportable: true,
            retained: true,
            inactive: false,
            no_trigger: false,
            suppress: false,
        }
    }

    /// Removes writability and ensures the read flags are present.
    #[must_use]
    pub const fn forced_read_only(mut self) -> Self {
        self.writable = false;
        self.readable = true;
        self.reportable = true;
        self.retained = true;
        self
    }

    /// Returns `true` if no flag is set.
    #[must_use]
    pub const fn is_empty(&self) -> bool {
        !(self.readable
            || self.writable
            || self.reportable
            || self.retained
            || self.inactive
            || self.no_trigger
            || self.suppress)
    }
}

/// One selectable option of an enum channel.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChoiceOption {
    /// Stable value, the decimal form of the assigned integer.
    pub value: String,
    /// Human-readable label.
    pub label: String,
}

/// A canonical channel as exposed to the host.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Channel {
    /// Channel id, unique per device (the Z2M property name, with an
    /// endpoint suffix where applicable).
    pub id: String,
    /// Display name.
    pub name: String,
    /// Semantic kind.
    pub kind: ChannelKind,
    /// Carried data type.
    pub data_type: ChannelDataType,
    /// Access flags.
    pub flags: ChannelFlags,
    /// Canonical unit, if any.
    pub unit: Option<String>,
    /// Minimum value for numeric channels.
    pub min: Option<f64>,
    /// Maximum value for numeric channels.
    pub max: Option<f64>,
    /// Step size for numeric channels.
    pub step: Option<f64>,
    /// Choices for enum channels.
    pub choices: Vec<ChoiceOption>,
    /// Opaque metadata; carries `enumName` and `enumMap` for enum channels.
    pub meta: serde_json::Map<String, serde_json::Value>,
}

impl Channel {
    /// Creates a channel with the given id, name, kind and data type and
    /// read-only defaults for everything else.
    #[must_use]
    pub fn new(
        id: impl Into<String>,
        name: impl Into<String>,
        kind: ChannelKind,
        data_type: ChannelDataType,
    ) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            kind,
            data_type,
            flags: ChannelFlags::read_only(),
            unit: None,
            min: None,
            max: None,
            step: None,
            choices: Vec::new(),
            meta: serde_json::Map::new(),
        }
    }
}
