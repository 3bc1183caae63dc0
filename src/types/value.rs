// SPDX-License-Identifier: MPL-2.0
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! The canonical value carried on a channel.

use serde::{Deserialize, Serialize};

use super::Color;

/// A typed channel value in canonical units.
///
/// Every emitted `channel_state_updated` carries one of these; the variant
/// matches the channel's declared data type (enums are carried as `Int`,
/// structured payloads such as firmware update descriptions as `Json`).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum ChannelValue {
    /// Boolean value.
    Bool(bool),
    /// Integer value (also used for enum codes).
    Int(i64),
    /// Floating-point value.
    Float(f64),
    /// Free-form text.
    Text(String),
    /// sRGB color.
    Color(Color),
    /// Structured payload.
    Json(serde_json::Value),
}

impl ChannelValue {
    /// Returns the boolean value, if this is a `Bool`.
    #[must_use]
    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Self::Bool(value) => Some(*value),
            _ => None,
        }
    }

    /// Returns the numeric value for `Int` and `Float` variants.
    #[must_use]
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Self::Int(value) => {
                // Channel values stay far below 2^53; the conversion is exact.
                #[allow(clippy::cast_precision_loss)]
                let float = *value as f64;
                Some(float)
            }
            Self::Float(value) => Some(*value),
            _ => None,
        }
    }

    /// Returns the integer value, if this is an `Int`.
    #[must_use]
    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Self::Int(value) => Some(*value),
            _ => None,
        }
    }

    /// Returns the text, if this is a `Text`.
    #[must_use]
    pub fn as_text(&self) -> Option<&str> {
        match self {
            Self::Text(value) => Some(value),
            _ => None,
        }
    }

    /// Returns the color, if this is a `Color`.
    #[must_use]
    pub fn as_color(&self) -> Option<Color> {
        match self {
            Self::Color(value) => Some(*value),
            _ => None,
        }
    }
}

impl From<bool> for ChannelValue {
    fn from(value: bool) -> Self {
        Self::Bool(value)
    }
}

impl From<i64> for ChannelValue {
    fn from(value: i64) -> Self {
        Self::Int(value)
    }
}

impl From<f64> for ChannelValue {
    fn from(value: f64) -> Self {
        Self::Float(value)
    }
}

impl From<&str> for ChannelValue {
    fn from(value: &str) -> Self {
        Self::Text(value.to_string())
    }
}

impl From<Color> for ChannelValue {
    fn from(value: Color) -> Self {
        Self::Color(value)
    }
}
