// SPDX-License-Identifier: MPL-2.0
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Error types for the `z2m_bridge` library.
//!
//! This module provides an error hierarchy for handling failures across the
//! library: value conversion, MQTT transport, JSON parsing of Zigbee2MQTT
//! payloads, and adapter configuration.

use thiserror::Error;

/// The main error type for this library.
#[derive(Debug, Error)]
pub enum Error {
    /// Error occurred while converting a channel value.
    #[error("value error: {0}")]
    Value(#[from] ValueError),

    /// Error occurred during MQTT transport.
    #[error("protocol error: {0}")]
    Protocol(#[from] ProtocolError),

    /// Error occurred while parsing a Zigbee2MQTT payload.
    #[error("parse error: {0}")]
    Parse(#[from] ParseError),

    /// Adapter configuration is invalid.
    #[error("config error: {0}")]
    Config(#[from] ConfigError),

    /// The adapter task has shut down and can no longer accept calls.
    #[error("adapter is stopped")]
    AdapterStopped,
}

/// Errors related to converting values between the Zigbee2MQTT wire
/// representation and the canonical channel model.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum ValueError {
    /// The supplied value has a type the channel cannot carry.
    #[error("type mismatch for channel {channel}: expected {expected}")]
    TypeMismatch {
        /// The channel the value was destined for.
        channel: String,
        /// Human-readable description of the expected shape.
        expected: &'static str,
    },

    /// A color payload was missing required components.
    #[error("invalid color value: {0}")]
    InvalidColor(String),

    /// The channel kind cannot be written to.
    #[error("unsupported channel")]
    UnsupportedChannel,
}

/// Errors related to the MQTT transport.
#[derive(Debug, Error)]
pub enum ProtocolError {
    /// MQTT connection or communication failed.
    #[error("MQTT error: {0}")]
    Mqtt(#[from] rumqttc::ClientError),

    /// Connection to the broker failed.
    #[error("connection failed: {0}")]
    ConnectionFailed(String),

    /// Invalid broker address.
    #[error("invalid address: {0}")]
    InvalidAddress(String),

    /// Internal channel was closed.
    #[error("channel closed: {0}")]
    ChannelClosed(String),
}

/// Errors related to parsing Zigbee2MQTT payloads.
#[derive(Debug, Error)]
pub enum ParseError {
    /// JSON parsing failed.
    #[error("JSON parse error: {0}")]
    Json(#[from] serde_json::Error),

    /// Expected field is missing from the payload.
    #[error("missing field in payload: {0}")]
    MissingField(String),

    /// Unexpected payload shape.
    #[error("unexpected payload format: {0}")]
    UnexpectedFormat(String),
}

/// Errors related to adapter configuration.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ConfigError {
    /// The broker host is missing.
    #[error("MQTT broker host is required")]
    MissingHost,

    /// The broker port is invalid.
    #[error("invalid MQTT broker port: {0}")]
    InvalidPort(i64),
}

/// A specialized Result type for this library.
pub type Result<T> = std::result::Result<T, Error>;
