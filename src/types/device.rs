// SPDX-License-Identifier: MPL-2.0
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Canonical device model and command result types.

use serde::{Deserialize, Serialize};

/// Broad device category, inferred from the exposed properties.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum DeviceClass {
    /// Category could not be inferred.
    #[default]
    Unknown,
    /// Dimmable or color light.
    Light,
    /// Plain on/off actor.
    Switch,
    /// Remote or wall button.
    Button,
    /// Measurement device.
    Sensor,
    /// The Zigbee coordinator itself.
    Gateway,
}

/// Device-level flags.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceFlags {
    /// Device communicates over radio.
    pub wireless: bool,
    /// Device is battery powered.
    pub battery: bool,
}

/// Connectivity of a device, carried on the implicit `connectivity` channel.
///
/// The discriminants are the stable integer codes emitted to the host.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ConnectivityStatus {
    /// Connectivity has not been determined.
    #[default]
    Unknown = 0,
    /// Device is reachable.
    Connected = 1,
    /// Device is reachable with degraded quality.
    Limited = 2,
    /// Device is unreachable.
    Disconnected = 3,
}

impl ConnectivityStatus {
    /// Returns the integer code emitted on the connectivity channel.
    #[must_use]
    pub const fn code(self) -> i64 {
        self as i64
    }
}

/// A canonical device as exposed to the host.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Device {
    /// Stable external id: the IEEE address when known, else the MQTT
    /// friendly name.
    pub id: String,
    /// Display name (the current friendly name).
    pub name: String,
    /// Inferred category.
    pub class: DeviceClass,
    /// Device-level flags.
    pub flags: DeviceFlags,
    /// Model string from the Z2M definition.
    pub model: String,
    /// Vendor string from the Z2M definition.
    pub manufacturer: String,
    /// Firmware revision, when known.
    pub firmware: String,
    /// Opaque metadata (friendly name, IEEE address, power source, ...).
    pub meta: serde_json::Map<String, serde_json::Value>,
}

/// Host-assigned id correlating a command with its result.
pub type CmdId = u64;

/// Result status of a command or adapter action.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum CmdStatus {
    /// The command was accepted.
    Success,
    /// The command failed.
    Failure,
    /// No response arrived in time.
    Timeout,
    /// The target device or channel does not support the command.
    NotSupported,
    /// The supplied value could not be encoded.
    InvalidArgument,
    /// The adapter is currently not connected.
    TemporarilyOffline,
    /// The requested action is not implemented.
    NotImplemented,
    /// Unexpected internal failure.
    InternalError,
}

/// Result of an [`update_channel_state`](crate::Z2mAdapter::update_channel_state)
/// or rename command.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CmdResponse {
    /// The command id supplied by the host.
    pub id: CmdId,
    /// Result status.
    pub status: CmdStatus,
    /// Textual reason on failure.
    pub error: Option<String>,
    /// Timestamp in milliseconds since the epoch.
    pub ts_ms: i64,
}

impl CmdResponse {
    /// Creates a successful response.
    #[must_use]
    pub fn success(id: CmdId, ts_ms: i64) -> Self {
        Self {
            id,
            status: CmdStatus::Success,
            error: None,
            ts_ms,
        }
    }

    /// Creates a failed response with the given status and reason.
    #[must_use]
    pub fn failed(id: CmdId, status: CmdStatus, error: impl Into<String>, ts_ms: i64) -> Self {
        Self {
            id,
            status,
            error: Some(error.into()),
            ts_ms,
        }
    }
}

/// Result of an adapter-level action.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ActionResponse {
    /// The command id supplied by the host.
    pub id: CmdId,
    /// Result status.
    pub status: CmdStatus,
    /// Textual reason on failure.
    pub error: Option<String>,
    /// Timestamp in milliseconds since the epoch.
    pub ts_ms: i64,
}
