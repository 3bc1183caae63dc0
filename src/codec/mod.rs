// SPDX-License-Identifier: MPL-2.0
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Bidirectional value codec between Zigbee2MQTT wire values and the
//! canonical channel model.
//!
//! Decoding maps a raw JSON state value into a typed [`ChannelValue`] in
//! canonical units (brightness as percent, voltage in volts, link quality as
//! percent, colors as sRGB). Encoding is the inverse, producing the JSON
//! value for a `set` payload. All conversions are total on bounded inputs;
//! values the binding cannot represent decode to `None` and encode to a
//! [`ValueError`].

pub mod enums;

use serde_json::Value;

use crate::error::ValueError;
use crate::expose::{ChannelBinding, ColorMode};
use crate::types::{ButtonEventCode, ChannelDataType, ChannelKind, ChannelValue, Color};

/// Scales a raw value into percent over the binding's raw range.
///
/// Degenerate ranges (`raw_max <= raw_min`) pass the value through.
#[must_use]
pub fn scale_to_percent(raw: f64, raw_min: f64, raw_max: f64) -> f64 {
    if raw_max <= raw_min {
        return raw;
    }
    let clamped = raw.clamp(raw_min, raw_max);
    ((clamped - raw_min) / (raw_max - raw_min)) * 100.0
}

/// Scales a percent value back into the binding's raw range.
///
/// The inverse of [`scale_to_percent`]; input is clamped to `[0, 100]`.
#[must_use]
pub fn scale_from_percent(percent: f64, raw_min: f64, raw_max: f64) -> f64 {
    if raw_max <= raw_min {
        return percent;
    }
    let clamped = percent.clamp(0.0, 100.0);
    raw_min + ((raw_max - raw_min) * (clamped / 100.0))
}

/// Decodes a raw state value into a canonical [`ChannelValue`].
///
/// Returns `None` when the value cannot be interpreted for this binding;
/// the caller skips such properties.
#[must_use]
pub fn decode_property(binding: &ChannelBinding, value: &Value) -> Option<ChannelValue> {
    if value.is_null() {
        return None;
    }
    match binding.kind {
        ChannelKind::PowerOnOff => decode_on_off(binding, value).map(ChannelValue::Bool),
        ChannelKind::Brightness => {
            let raw = value.as_f64()?;
            Some(ChannelValue::Float(scale_to_percent(
                raw,
                binding.raw_min,
                binding.raw_max,
            )))
        }
        ChannelKind::ColorTemperature => Some(ChannelValue::Float(value.as_f64()?)),
        ChannelKind::ColorRgb => decode_color(binding, value).map(ChannelValue::Color),
        ChannelKind::Temperature
        | ChannelKind::Humidity
        | ChannelKind::Illuminance
        | ChannelKind::Co2
        | ChannelKind::Power
        | ChannelKind::Voltage
        | ChannelKind::Current
        | ChannelKind::Energy => {
            let scaled = value.as_f64()? * binding.value_scale;
            Some(numeric_value(binding.data_type, scaled))
        }
        ChannelKind::AmbientLightLevel => decode_enum_or_text(binding, value),
        ChannelKind::Duration | ChannelKind::SignalStrength | ChannelKind::Battery => {
            Some(ChannelValue::Int(as_i64(value)?))
        }
        ChannelKind::LinkQuality => {
            let raw = value.as_f64()?;
            Some(ChannelValue::Float(
                (raw * binding.value_scale).clamp(0.0, 100.0),
            ))
        }
        ChannelKind::Motion | ChannelKind::Contact | ChannelKind::Tamper => {
            decode_presence(value).map(ChannelValue::Bool)
        }
        ChannelKind::ButtonEvent => {
            let action = value.as_str()?;
            Some(ChannelValue::Int(ButtonEventCode::from_action(action).code()))
        }
        ChannelKind::Unknown => decode_unknown(binding, value),
        // Connectivity and firmware-update channels are fed by the ingest
        // path, never from a plain property value.
        ChannelKind::ConnectivityStatus | ChannelKind::DeviceSoftwareUpdate => None,
    }
}

/// Encodes a canonical value into the JSON wire value for a `set` payload.
///
/// # Errors
///
/// Returns [`ValueError`] when the value's type does not fit the binding or
/// the channel kind cannot be written at all.
pub fn encode_command(binding: &ChannelBinding, value: &ChannelValue) -> Result<Value, ValueError> {
    if binding.data_type == ChannelDataType::Enum {
        return Ok(encode_enum(binding, value));
    }

    match binding.kind {
        ChannelKind::PowerOnOff => {
            let on = coerce_bool(value).ok_or_else(|| type_mismatch(binding, "boolean"))?;
            let text = if on {
                binding.value_on.clone().unwrap_or_else(|| "ON".to_string())
            } else {
                binding.value_off.clone().unwrap_or_else(|| "OFF".to_string())
            };
            Ok(Value::String(text))
        }
        ChannelKind::Brightness => {
            let percent = value.as_f64().ok_or_else(|| type_mismatch(binding, "number"))?;
            Ok(json_number(scale_from_percent(
                percent,
                binding.raw_min,
                binding.raw_max,
            )))
        }
        ChannelKind::ColorTemperature => {
            let mired = value.as_f64().ok_or_else(|| type_mismatch(binding, "number"))?;
            Ok(json_number(mired))
        }
        ChannelKind::ColorRgb => {
            let color = value
                .as_color()
                .ok_or_else(|| ValueError::InvalidColor("expected an sRGB color".to_string()))?;
            Ok(encode_color(binding, color))
        }
        ChannelKind::Temperature
        | ChannelKind::Humidity
        | ChannelKind::Illuminance
        | ChannelKind::Co2
        | ChannelKind::Power
        | ChannelKind::Voltage
        | ChannelKind::Current
        | ChannelKind::Energy
        | ChannelKind::SignalStrength
        | ChannelKind::LinkQuality
        | ChannelKind::Battery
        | ChannelKind::Duration => {
            let canonical = value.as_f64().ok_or_else(|| type_mismatch(binding, "number"))?;
            let scale = if binding.value_scale > 0.0 {
                binding.value_scale
            } else {
                1.0
            };
            Ok(json_number(canonical / scale))
        }
        ChannelKind::Unknown => encode_unknown(binding, value),
        ChannelKind::Motion
        | ChannelKind::Contact
        | ChannelKind::Tamper
        | ChannelKind::AmbientLightLevel
        | ChannelKind::ButtonEvent
        | ChannelKind::ConnectivityStatus
        | ChannelKind::DeviceSoftwareUpdate => Err(ValueError::UnsupportedChannel),
    }
}

/// Decodes an on/off value: booleans pass through, numbers compare against
/// zero, strings match the binding's ON name (default `"ON"`).
fn decode_on_off(binding: &ChannelBinding, value: &Value) -> Option<bool> {
    if let Some(flag) = value.as_bool() {
        return Some(flag);
    }
    if let Some(number) = value.as_f64() {
        return Some(number != 0.0);
    }
    let state = value.as_str()?;
    let on_name = binding.value_on.as_deref().unwrap_or("ON");
    Some(state.eq_ignore_ascii_case(on_name))
}

/// Decodes a presence-style boolean (motion/contact/tamper).
fn decode_presence(value: &Value) -> Option<bool> {
    if let Some(flag) = value.as_bool() {
        return Some(flag);
    }
    if let Some(number) = value.as_f64() {
        return Some(number != 0.0);
    }
    let state = value.as_str()?.to_lowercase();
    Some(state == "true" || state == "on" || state == "occupied")
}

/// Decodes a color object per the binding's wire mode.
fn decode_color(binding: &ChannelBinding, value: &Value) -> Option<Color> {
    let obj = value.as_object()?;
    match binding.color_mode {
        ColorMode::Xy => {
            let x = obj.get("x")?.as_f64()?;
            let y = obj.get("y")?.as_f64()?;
            Some(Color::from_xy(x, y, 1.0))
        }
        ColorMode::Hs => {
            let hue = obj
                .get("hue")
                .or_else(|| obj.get("h"))
                .and_then(Value::as_f64)?;
            let saturation = obj
                .get("saturation")
                .or_else(|| obj.get("s"))
                .and_then(Value::as_f64)?;
            Some(Color::from_hsv(hue, saturation / 100.0, 1.0))
        }
    }
}

/// Encodes a color per the binding's wire mode.
fn encode_color(binding: &ChannelBinding, color: Color) -> Value {
    let mut obj = serde_json::Map::new();
    match binding.color_mode {
        ColorMode::Xy => {
            let (x, y) = color.to_xy();
            obj.insert("x".to_string(), json_number(x));
            obj.insert("y".to_string(), json_number(y));
        }
        ColorMode::Hs => {
            let hsv = color.to_hsv();
            obj.insert("hue".to_string(), json_number(hsv.hue_deg));
            obj.insert("saturation".to_string(), json_number(hsv.saturation * 100.0));
        }
    }
    Value::Object(obj)
}

/// Decodes an enum-ish value: strings go through the stable map, numbers are
/// taken as-is, unmapped strings pass through as text.
fn decode_enum_or_text(binding: &ChannelBinding, value: &Value) -> Option<ChannelValue> {
    if let Some(raw) = value.as_str() {
        if let Some(mapped) = binding.enum_raw_to_value.get(raw) {
            return Some(ChannelValue::Int(*mapped));
        }
        return Some(ChannelValue::Text(raw.to_string()));
    }
    as_i64(value).map(ChannelValue::Int)
}

/// Decodes a property of unrecognised kind by its declared data type.
fn decode_unknown(binding: &ChannelBinding, value: &Value) -> Option<ChannelValue> {
    match binding.data_type {
        ChannelDataType::Bool => {
            if let Some(flag) = value.as_bool() {
                Some(ChannelValue::Bool(flag))
            } else if let Some(number) = value.as_f64() {
                Some(ChannelValue::Bool(number != 0.0))
            } else {
                value
                    .as_str()
                    .map(|s| ChannelValue::Bool(s.eq_ignore_ascii_case("true")))
            }
        }
        ChannelDataType::Int => as_i64(value).map(ChannelValue::Int),
        ChannelDataType::Float => value
            .as_f64()
            .map(|raw| ChannelValue::Float(raw * binding.value_scale)),
        ChannelDataType::Enum => decode_enum_or_text(binding, value),
        ChannelDataType::String => value.as_str().map(|s| ChannelValue::Text(s.to_string())),
        ChannelDataType::Color => None,
    }
}

/// Encodes an enum value: integers map back through the stable map to the
/// raw string when known; strings already in raw form pass through.
fn encode_enum(binding: &ChannelBinding, value: &ChannelValue) -> Value {
    match value {
        ChannelValue::Int(_) | ChannelValue::Float(_) => {
            // Float enums arrive from hosts that only speak doubles.
            #[allow(clippy::cast_possible_truncation)]
            let code = value.as_f64().unwrap_or(0.0) as i64;
            if let Some(raw) = binding.enum_value_to_raw.get(&code) {
                return Value::String(raw.clone());
            }
            Value::from(code)
        }
        ChannelValue::Text(text) => {
            if binding.enum_raw_to_value.contains_key(text.as_str()) {
                return Value::String(text.clone());
            }
            if let Ok(code) = text.parse::<i64>() {
                if let Some(raw) = binding.enum_value_to_raw.get(&code) {
                    return Value::String(raw.clone());
                }
                return Value::from(code);
            }
            Value::String(text.clone())
        }
        ChannelValue::Bool(flag) => Value::from(*flag),
        ChannelValue::Color(_) | ChannelValue::Json(_) => Value::Null,
    }
}

/// Encodes a value of unrecognised kind by its declared data type.
fn encode_unknown(binding: &ChannelBinding, value: &ChannelValue) -> Result<Value, ValueError> {
    match binding.data_type {
        ChannelDataType::Bool => {
            let flag = coerce_bool(value).ok_or_else(|| type_mismatch(binding, "boolean"))?;
            Ok(Value::from(flag))
        }
        ChannelDataType::String => {
            let text = value
                .as_text()
                .ok_or_else(|| type_mismatch(binding, "string"))?;
            Ok(Value::String(text.to_string()))
        }
        _ => {
            let canonical = value.as_f64().ok_or_else(|| type_mismatch(binding, "number"))?;
            let scale = if binding.value_scale > 0.0 {
                binding.value_scale
            } else {
                1.0
            };
            Ok(json_number(canonical / scale))
        }
    }
}

fn type_mismatch(binding: &ChannelBinding, expected: &'static str) -> ValueError {
    ValueError::TypeMismatch {
        channel: binding.channel_id.clone(),
        expected,
    }
}

/// Leniently coerces host values into a boolean.
fn coerce_bool(value: &ChannelValue) -> Option<bool> {
    match value {
        ChannelValue::Bool(flag) => Some(*flag),
        ChannelValue::Int(number) => Some(*number != 0),
        ChannelValue::Float(number) => Some(*number != 0.0),
        ChannelValue::Text(text) => Some(
            text.eq_ignore_ascii_case("true") || text.eq_ignore_ascii_case("on") || text == "1",
        ),
        ChannelValue::Color(_) | ChannelValue::Json(_) => None,
    }
}

/// Builds a typed numeric [`ChannelValue`] matching the channel data type.
fn numeric_value(data_type: ChannelDataType, value: f64) -> ChannelValue {
    if data_type == ChannelDataType::Int {
        // Wire values for integer channels are small; rounding is exact.
        #[allow(clippy::cast_possible_truncation)]
        let int = value.round() as i64;
        ChannelValue::Int(int)
    } else {
        ChannelValue::Float(value)
    }
}

/// Extracts an integer from a JSON number, rounding floats.
fn as_i64(value: &Value) -> Option<i64> {
    if let Some(int) = value.as_i64() {
        return Some(int);
    }
    // Z2M occasionally reports integral values as floats.
    #[allow(clippy::cast_possible_truncation)]
    let rounded = value.as_f64().map(|f| f.round() as i64);
    rounded
}

/// Emits a JSON number, preferring the integer form for integral values so
/// wire payloads stay compact.
fn json_number(value: f64) -> Value {
    // i64::MAX as f64 rounds up; stay a little inside the exact range.
    if value.fract() == 0.0 && value.abs() < 9.0e15 {
        #[allow(clippy::cast_possible_truncation)]
        return Value::from(value as i64);
    }
    serde_json::Number::from_f64(value).map_or(Value::Null, Value::Number)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::ChannelFlags;
    use serde_json::json;

    fn binding(kind: ChannelKind, data_type: ChannelDataType) -> ChannelBinding {
        ChannelBinding::new("test", "test", kind, data_type, ChannelFlags::read_only())
    }

    #[test]
    fn percent_scaling_roundtrip() {
        for raw in [0.0, 1.0, 63.0, 127.0, 200.0, 254.0] {
            let percent = scale_to_percent(raw, 0.0, 254.0);
            let back = scale_from_percent(percent, 0.0, 254.0);
            assert!((back - raw).abs() < 0.5, "raw {raw} -> {percent} -> {back}");
        }
    }

    #[test]
    fn percent_scaling_degenerate_range_passes_through() {
        assert_eq!(scale_to_percent(42.0, 0.0, 0.0), 42.0);
        assert_eq!(scale_from_percent(42.0, 5.0, 5.0), 42.0);
    }

    #[test]
    fn decode_brightness_midpoint() {
        let mut b = binding(ChannelKind::Brightness, ChannelDataType::Float);
        b.raw_min = 0.0;
        b.raw_max = 254.0;
        let value = decode_property(&b, &json!(127)).unwrap();
        let percent = value.as_f64().unwrap();
        assert!((percent - 50.0).abs() < 0.5, "got {percent}");
    }

    #[test]
    fn encode_brightness_75_percent() {
        let mut b = binding(ChannelKind::Brightness, ChannelDataType::Float);
        b.raw_min = 0.0;
        b.raw_max = 254.0;
        let raw = encode_command(&b, &ChannelValue::Float(75.0)).unwrap();
        assert_eq!(raw, json!(190.5));
    }

    #[test]
    fn decode_power_state_variants() {
        let mut b = binding(ChannelKind::PowerOnOff, ChannelDataType::Bool);
        b.value_on = Some("ON".to_string());
        b.value_off = Some("OFF".to_string());
        assert_eq!(decode_property(&b, &json!("ON")), Some(ChannelValue::Bool(true)));
        assert_eq!(decode_property(&b, &json!("on")), Some(ChannelValue::Bool(true)));
        assert_eq!(decode_property(&b, &json!("OFF")), Some(ChannelValue::Bool(false)));
        assert_eq!(decode_property(&b, &json!(true)), Some(ChannelValue::Bool(true)));
        assert_eq!(decode_property(&b, &json!(0)), Some(ChannelValue::Bool(false)));
    }

    #[test]
    fn encode_power_uses_value_on_off() {
        let mut b = binding(ChannelKind::PowerOnOff, ChannelDataType::Bool);
        b.value_on = Some("ON".to_string());
        b.value_off = Some("OFF".to_string());
        assert_eq!(
            encode_command(&b, &ChannelValue::Bool(true)).unwrap(),
            json!("ON")
        );
        assert_eq!(
            encode_command(&b, &ChannelValue::Bool(false)).unwrap(),
            json!("OFF")
        );
    }

    #[test]
    fn encode_power_defaults_without_names() {
        let b = binding(ChannelKind::PowerOnOff, ChannelDataType::Bool);
        assert_eq!(
            encode_command(&b, &ChannelValue::Bool(true)).unwrap(),
            json!("ON")
        );
    }

    #[test]
    fn voltage_scale_millivolts() {
        let mut b = binding(ChannelKind::Voltage, ChannelDataType::Float);
        b.value_scale = 0.001;
        let decoded = decode_property(&b, &json!(3300)).unwrap();
        assert!((decoded.as_f64().unwrap() - 3.3).abs() < 1e-9);
        let encoded = encode_command(&b, &ChannelValue::Float(3.3)).unwrap();
        assert!((encoded.as_f64().unwrap() - 3300.0).abs() < 1e-6);
    }

    #[test]
    fn link_quality_clamps_to_percent() {
        let mut b = binding(ChannelKind::LinkQuality, ChannelDataType::Float);
        b.value_scale = 100.0 / 255.0;
        let full = decode_property(&b, &json!(255)).unwrap();
        assert!((full.as_f64().unwrap() - 100.0).abs() < 1e-9);
        let over = decode_property(&b, &json!(400)).unwrap();
        assert_eq!(over.as_f64().unwrap(), 100.0);
    }

    #[test]
    fn decode_motion_strings() {
        let b = binding(ChannelKind::Motion, ChannelDataType::Bool);
        assert_eq!(decode_property(&b, &json!("occupied")), Some(ChannelValue::Bool(true)));
        assert_eq!(decode_property(&b, &json!("true")), Some(ChannelValue::Bool(true)));
        assert_eq!(decode_property(&b, &json!("clear")), Some(ChannelValue::Bool(false)));
        assert_eq!(decode_property(&b, &json!(false)), Some(ChannelValue::Bool(false)));
    }

    #[test]
    fn decode_button_action() {
        let b = binding(ChannelKind::ButtonEvent, ChannelDataType::Int);
        assert_eq!(
            decode_property(&b, &json!("single")),
            Some(ChannelValue::Int(ButtonEventCode::InitialPress.code()))
        );
        assert_eq!(decode_property(&b, &json!(3)), None);
    }

    #[test]
    fn decode_color_xy() {
        let b = binding(ChannelKind::ColorRgb, ChannelDataType::Color);
        let value = decode_property(&b, &json!({"x": 0.3127, "y": 0.3290})).unwrap();
        let color = value.as_color().unwrap();
        // D65 white decodes to a near-neutral color.
        assert!((color.red - color.green).abs() < 0.05);
        assert!((color.green - color.blue).abs() < 0.05);
    }

    #[test]
    fn decode_color_hs() {
        let mut b = binding(ChannelKind::ColorRgb, ChannelDataType::Color);
        b.color_mode = ColorMode::Hs;
        let value = decode_property(&b, &json!({"hue": 0.0, "saturation": 100.0})).unwrap();
        let color = value.as_color().unwrap();
        assert!((color.red - 1.0).abs() < 1e-9);
        assert!(color.green.abs() < 1e-9);
    }

    #[test]
    fn encode_color_hs_sends_degrees_and_percent() {
        let mut b = binding(ChannelKind::ColorRgb, ChannelDataType::Color);
        b.color_mode = ColorMode::Hs;
        let encoded = encode_command(&b, &ChannelValue::Color(Color::new(0.0, 1.0, 0.0))).unwrap();
        let obj = encoded.as_object().unwrap();
        assert!((obj["hue"].as_f64().unwrap() - 120.0).abs() < 0.5);
        assert!((obj["saturation"].as_f64().unwrap() - 100.0).abs() < 0.5);
    }

    #[test]
    fn encode_enum_maps_code_to_raw() {
        let mut b = binding(ChannelKind::Unknown, ChannelDataType::Enum);
        b.enum_raw_to_value.insert("single_rocker".to_string(), 1);
        b.enum_value_to_raw.insert(1, "single_rocker".to_string());
        assert_eq!(
            encode_command(&b, &ChannelValue::Int(1)).unwrap(),
            json!("single_rocker")
        );
        // Unmapped codes fall through as numbers.
        assert_eq!(encode_command(&b, &ChannelValue::Int(9)).unwrap(), json!(9));
        // Text already in raw form passes through.
        assert_eq!(
            encode_command(&b, &ChannelValue::Text("single_rocker".into())).unwrap(),
            json!("single_rocker")
        );
        // Numeric text maps like an integer.
        assert_eq!(
            encode_command(&b, &ChannelValue::Text("1".into())).unwrap(),
            json!("single_rocker")
        );
    }

    #[test]
    fn decode_enum_through_stable_map() {
        let mut b = binding(ChannelKind::Unknown, ChannelDataType::Enum);
        b.enum_raw_to_value.insert("dual_rocker".to_string(), 2);
        assert_eq!(
            decode_property(&b, &json!("dual_rocker")),
            Some(ChannelValue::Int(2))
        );
        assert_eq!(
            decode_property(&b, &json!("unmapped")),
            Some(ChannelValue::Text("unmapped".to_string()))
        );
        assert_eq!(decode_property(&b, &json!(4)), Some(ChannelValue::Int(4)));
    }

    #[test]
    fn decode_null_is_skipped() {
        let b = binding(ChannelKind::Temperature, ChannelDataType::Float);
        assert_eq!(decode_property(&b, &Value::Null), None);
    }

    #[test]
    fn decode_integer_channel_emits_int() {
        let b = binding(ChannelKind::Illuminance, ChannelDataType::Int);
        assert_eq!(decode_property(&b, &json!(120)), Some(ChannelValue::Int(120)));
    }

    #[test]
    fn encode_read_only_kinds_rejected() {
        let b = binding(ChannelKind::ButtonEvent, ChannelDataType::Int);
        assert!(matches!(
            encode_command(&b, &ChannelValue::Int(1)),
            Err(ValueError::UnsupportedChannel)
        ));
    }

    #[test]
    fn encode_type_mismatch() {
        let b = binding(ChannelKind::Brightness, ChannelDataType::Float);
        assert!(matches!(
            encode_command(&b, &ChannelValue::Text("dim".into())),
            Err(ValueError::TypeMismatch { .. })
        ));
    }

    #[test]
    fn json_number_prefers_integers() {
        assert_eq!(json_number(30.0), json!(30));
        assert_eq!(json_number(190.5), json!(190.5));
    }
}
