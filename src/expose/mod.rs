// SPDX-License-Identifier: MPL-2.0
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Compiler from Zigbee2MQTT `exposes` trees to canonical channels.
//!
//! Z2M devices describe themselves with a tree of expose nodes (numeric,
//! binary, enum, composite). This module flattens that tree, maps each
//! property onto a [`ChannelKind`] via a fixed table, normalises numeric
//! ranges into canonical units, and produces the [`Channel`] list for the
//! host together with the internal [`ChannelBinding`] recipes used by the
//! codec.

mod binding;

pub use binding::{ChannelBinding, ColorMode};

use std::collections::{BTreeMap, HashMap};

use serde_json::{Map, Value};

use crate::codec::enums;
use crate::types::{
    Channel, ChannelDataType, ChannelFlags, ChannelKind, ChoiceOption, DeviceClass,
};

/// Z2M access bit: value is published in state payloads.
const ACCESS_STATE: u64 = 0b001;

/// Z2M access bit: value can be written with a `set` command.
const ACCESS_SET: u64 = 0b010;

/// Default raw brightness range when the expose does not carry one.
const DEFAULT_BRIGHTNESS_MAX: f64 = 254.0;

/// Property names whose presence marks a device as a sensor.
const SENSOR_PROPERTIES: &[&str] = &[
    "temperature",
    "humidity",
    "illuminance",
    "illumination",
    "occupancy",
    "motion",
    "co2",
];

/// Property-name tokens that keep a sensor channel writable (configuration
/// rather than measurement).
const SENSOR_CONFIG_TOKENS: &[&str] = &[
    "calibration",
    "sensitivity",
    "threshold",
    "alarm",
    "keep_time",
    "interval",
    "unit",
    "mode",
];

/// Result of compiling an exposes tree.
#[derive(Debug, Default)]
pub struct CompiledExposes {
    /// Channels in compilation order, implicit channels last.
    pub channels: Vec<Channel>,
    /// Bindings keyed by channel id.
    pub bindings_by_channel: HashMap<String, ChannelBinding>,
    /// Channel ids keyed by Z2M property name.
    pub channel_by_property: HashMap<String, Vec<String>>,
}

/// Flattens an exposes tree into the list of nodes carrying a property.
///
/// Composite `color` nodes are recorded whole and their features are not
/// recursed (the color object is decoded as one value); all other composites
/// contribute their features individually.
#[must_use]
pub fn flatten_exposes(value: &Value) -> Vec<Map<String, Value>> {
    let mut out = Vec::new();
    collect_expose_entries(value, &mut out);
    out
}

fn collect_expose_entries(value: &Value, out: &mut Vec<Map<String, Value>>) {
    if let Value::Array(entries) = value {
        for entry in entries {
            collect_expose_entries(entry, out);
        }
        return;
    }
    let Value::Object(obj) = value else {
        return;
    };
    let property = str_field(obj, "property");
    let node_type = str_field(obj, "type");
    if !property.is_empty() {
        out.push(obj.clone());
        if property == "color" && node_type == "composite" {
            return;
        }
    }
    if let Some(features) = obj.get("features") {
        collect_expose_entries(features, out);
    }
}

/// Infers the device class from the flattened exposes.
#[must_use]
pub fn infer_device_class(exposes: &[Map<String, Value>]) -> DeviceClass {
    let mut has_light = false;
    let mut has_switch = false;
    let mut has_button = false;
    let mut has_sensor = false;
    for expose in exposes {
        let property = str_field(expose, "property");
        match property.as_str() {
            "brightness" | "color_temp" | "color" => has_light = true,
            "state" => has_switch = true,
            "action" => has_button = true,
            p if SENSOR_PROPERTIES.contains(&p) => has_sensor = true,
            _ => {}
        }
    }
    if has_light {
        DeviceClass::Light
    } else if has_switch {
        DeviceClass::Switch
    } else if has_button {
        DeviceClass::Button
    } else if has_sensor {
        DeviceClass::Sensor
    } else {
        DeviceClass::Unknown
    }
}

/// Compiles flattened exposes into channels and bindings, appending the
/// implicit `connectivity` and `device_software_update` channels every
/// device carries.
#[must_use]
pub fn compile_exposes(
    exposes: &[Map<String, Value>],
    device_class: DeviceClass,
) -> CompiledExposes {
    let mut compiled = CompiledExposes::default();
    for expose in exposes {
        add_channel_from_expose(expose, device_class, &mut compiled);
    }
    append_implicit_channels(&mut compiled);
    compiled
}

/// Builds a display name from a property, preferring the expose label.
#[must_use]
pub fn label_from_property(property: &str, fallback: Option<&str>) -> String {
    if let Some(label) = fallback {
        let trimmed = label.trim();
        if !trimmed.is_empty() {
            return trimmed.to_string();
        }
    }
    match property {
        "color_temp" => return "Color Temperature".to_string(),
        "co2" => return "CO2".to_string(),
        _ => {}
    }
    property
        .split('_')
        .filter(|part| !part.is_empty())
        .map(|part| {
            let mut chars = part.chars();
            match chars.next() {
                Some(first) => first.to_uppercase().collect::<String>() + chars.as_str(),
                None => String::new(),
            }
        })
        .collect::<Vec<_>>()
        .join(" ")
}

/// Property-name table: `(kind, data type, unit, scale to percent)`.
fn property_mapping(
    property: &str,
) -> Option<(ChannelKind, ChannelDataType, Option<&'static str>, bool)> {
    let mapping = match property {
        "state" => (ChannelKind::PowerOnOff, ChannelDataType::Bool, None, false),
        "brightness" => (ChannelKind::Brightness, ChannelDataType::Float, Some("%"), true),
        "color_temp" => (
            ChannelKind::ColorTemperature,
            ChannelDataType::Float,
            Some("mired"),
            false,
        ),
        "color" => (ChannelKind::ColorRgb, ChannelDataType::Color, None, false),
        "temperature" => (ChannelKind::Temperature, ChannelDataType::Float, Some("C"), false),
        "humidity" => (ChannelKind::Humidity, ChannelDataType::Float, Some("%"), false),
        "illuminance" => (ChannelKind::Illuminance, ChannelDataType::Int, Some("lx"), false),
        "illumination" => (ChannelKind::AmbientLightLevel, ChannelDataType::Enum, None, false),
        "occupancy" | "motion" => (ChannelKind::Motion, ChannelDataType::Bool, None, false),
        "battery" => (ChannelKind::Battery, ChannelDataType::Int, Some("%"), false),
        "battery_low" => (ChannelKind::Unknown, ChannelDataType::Bool, None, false),
        "linkquality" => (ChannelKind::LinkQuality, ChannelDataType::Float, Some("%"), false),
        "keep_time" => (ChannelKind::Duration, ChannelDataType::Int, Some("s"), false),
        "tamper" => (ChannelKind::Tamper, ChannelDataType::Bool, None, false),
        "power" => (ChannelKind::Power, ChannelDataType::Float, Some("W"), false),
        "voltage" => (ChannelKind::Voltage, ChannelDataType::Float, Some("V"), false),
        "current" => (ChannelKind::Current, ChannelDataType::Float, Some("A"), false),
        "energy" => (ChannelKind::Energy, ChannelDataType::Float, Some("kWh"), false),
        "co2" => (ChannelKind::Co2, ChannelDataType::Float, Some("ppm"), false),
        "action" => (ChannelKind::ButtonEvent, ChannelDataType::Int, None, false),
        _ => return None,
    };
    Some(mapping)
}

#[allow(clippy::too_many_lines)]
fn add_channel_from_expose(
    expose: &Map<String, Value>,
    device_class: DeviceClass,
    compiled: &mut CompiledExposes,
) {
    let property = str_field(expose, "property");
    if property.is_empty() {
        return;
    }
    let prop_lower = property.to_lowercase();
    let is_min_max_helper = prop_lower == "min"
        || prop_lower == "max"
        || prop_lower.starts_with("min_")
        || prop_lower.starts_with("max_")
        || prop_lower.ends_with("_min")
        || prop_lower.ends_with("_max");
    if is_min_max_helper {
        return;
    }

    let endpoint = match expose.get("endpoint") {
        Some(Value::String(endpoint)) => {
            let trimmed = endpoint.trim();
            (!trimmed.is_empty()).then(|| trimmed.to_string())
        }
        Some(Value::Number(endpoint)) => Some(endpoint.to_string()),
        _ => None,
    };

    let channel_id = match &endpoint {
        Some(endpoint) => format!("{property}_{endpoint}"),
        None => property.clone(),
    };
    if compiled.bindings_by_channel.contains_key(&channel_id) {
        return;
    }

    let mapping = property_mapping(&property);
    let expose_type = str_field(expose, "type");
    let is_enum = expose_type == "enum";
    let is_binary = expose_type == "binary";
    let is_numeric = expose_type == "numeric";
    if mapping.is_none() && !(is_enum || is_binary || is_numeric) {
        return;
    }

    let label = expose.get("label").and_then(Value::as_str);
    let mut channel = Channel::new(
        channel_id.clone(),
        label_from_property(&property, label),
        ChannelKind::Unknown,
        ChannelDataType::Float,
    );
    if let Some((kind, data_type, unit, _)) = mapping {
        channel.kind = kind;
        channel.data_type = data_type;
        channel.unit = unit.map(ToString::to_string);
    } else if is_binary {
        channel.data_type = ChannelDataType::Bool;
    }
    if is_enum {
        channel.data_type = ChannelDataType::Enum;
    }

    let access = expose
        .get("access")
        .and_then(Value::as_u64)
        .unwrap_or(ACCESS_STATE);
    channel.flags = flags_from_access(access);

    if device_class == DeviceClass::Sensor {
        let config_writable = SENSOR_CONFIG_TOKENS
            .iter()
            .any(|token| prop_lower.contains(token));
        if is_sensor_measurement_kind(channel.kind) {
            channel.flags = channel.flags.forced_read_only();
        }
        if channel.kind == ChannelKind::Unknown && !config_writable {
            channel.flags = channel.flags.forced_read_only();
        }
    }

    let mut raw_min = num_field(expose, "value_min", 0.0);
    let mut raw_max = num_field(expose, "value_max", 0.0);
    let raw_step = num_field(expose, "value_step", 1.0);

    if channel.kind == ChannelKind::Brightness {
        if raw_max <= raw_min {
            raw_min = 0.0;
            raw_max = DEFAULT_BRIGHTNESS_MAX;
        }
        channel.min = Some(0.0);
        channel.max = Some(100.0);
        channel.step = Some(if raw_max > raw_min && raw_step > 0.0 {
            (raw_step / (raw_max - raw_min)) * 100.0
        } else {
            1.0
        });
    } else if channel.kind == ChannelKind::LinkQuality {
        channel.min = Some(0.0);
        channel.max = Some(100.0);
        channel.step = Some(1.0);
    } else if channel.kind == ChannelKind::Battery && channel.data_type == ChannelDataType::Int {
        channel.min = Some(0.0);
        channel.max = Some(if raw_max > 0.0 { raw_max } else { 100.0 });
        channel.step = Some(if raw_step > 0.0 { raw_step } else { 1.0 });
    } else if matches!(
        channel.data_type,
        ChannelDataType::Float | ChannelDataType::Int
    ) {
        channel.min = Some(raw_min);
        channel.max = Some(raw_max);
        channel.step = Some(raw_step);
    }

    let mut enum_raw_to_value: HashMap<String, i64> = HashMap::new();
    let mut enum_value_to_raw: HashMap<i64, String> = HashMap::new();
    if is_enum {
        let values = expose
            .get("values")
            .and_then(Value::as_array)
            .cloned()
            .unwrap_or_default();
        let enum_name = enums::known_enum_name(&property);

        let mut raw_keys: Vec<String> = Vec::with_capacity(values.len());
        let mut normalized: BTreeMap<String, i64> = BTreeMap::new();
        let mut all_numeric = !values.is_empty();
        for value in &values {
            let key = match value {
                Value::String(text) => text.clone(),
                Value::Number(number) => number.to_string(),
                _ => continue,
            };
            if key.is_empty() {
                continue;
            }
            if key.parse::<i64>().is_err() {
                all_numeric = false;
            }
            if let Some(name) = enum_name {
                if let Some(mapped) = enums::map_known(name, &key) {
                    normalized.insert(key.clone(), mapped);
                }
            }
            raw_keys.push(key);
        }

        let stable_map = if all_numeric {
            raw_keys
                .iter()
                .filter_map(|key| key.parse::<i64>().ok().map(|value| (key.clone(), value)))
                .collect()
        } else {
            enums::build_stable_map(&raw_keys, &normalized)
        };

        if let Some(name) = enum_name {
            channel
                .meta
                .insert("enumName".to_string(), Value::String(name.to_string()));
        }
        if !stable_map.is_empty() {
            let map_obj: Map<String, Value> = stable_map
                .iter()
                .map(|(key, value)| (key.clone(), Value::from(*value)))
                .collect();
            channel.meta.insert("enumMap".to_string(), Value::Object(map_obj));
        }

        for key in &raw_keys {
            let Some(mapped) = stable_map.get(key).copied() else {
                continue;
            };
            if mapped == 0 {
                continue;
            }
            let label = enum_name
                .and_then(|name| enums::enum_label(name, mapped))
                .map_or_else(|| key.clone(), ToString::to_string);
            channel.choices.push(ChoiceOption {
                value: mapped.to_string(),
                label,
            });
            enum_raw_to_value.insert(key.clone(), mapped);
            enum_value_to_raw.entry(mapped).or_insert_with(|| key.clone());
        }
    }

    let expose_unit = str_field(expose, "unit");
    if channel.unit.is_none() && !expose_unit.is_empty() {
        channel.unit = Some(expose_unit.clone());
    }
    let millivolt_wire = channel.kind == ChannelKind::Voltage && expose_unit == "mV";
    if millivolt_wire {
        channel.unit = Some("V".to_string());
        channel.min = channel.min.map(|min| min / 1000.0);
        channel.max = channel.max.map(|max| max / 1000.0);
        channel.step = channel.step.map(|step| if step > 0.0 { step / 1000.0 } else { step });
    }

    let mut binding = ChannelBinding::new(
        channel_id.clone(),
        property.clone(),
        channel.kind,
        channel.data_type,
        channel.flags,
    );
    binding.unit = channel.unit.clone();
    binding.raw_min = raw_min;
    binding.raw_max = raw_max;
    binding.raw_step = raw_step;
    binding.scale_percent = mapping.is_some_and(|(_, _, _, scale)| scale);
    binding.endpoint = endpoint;
    binding.enum_raw_to_value = enum_raw_to_value;
    binding.enum_value_to_raw = enum_value_to_raw;
    if binding.kind == ChannelKind::PowerOnOff {
        binding.value_on = expose.get("value_on").and_then(Value::as_str).map(ToString::to_string);
        binding.value_off = expose
            .get("value_off")
            .and_then(Value::as_str)
            .map(ToString::to_string);
    }
    if millivolt_wire {
        binding.value_scale = 0.001;
    }
    if binding.kind == ChannelKind::LinkQuality {
        binding.value_scale = 100.0 / 255.0;
        binding.unit = Some("%".to_string());
    }
    if binding.kind == ChannelKind::ColorRgb {
        binding.color_mode = color_mode_from_features(expose);
    }

    compiled.channels.push(channel);
    compiled
        .channel_by_property
        .entry(property)
        .or_default()
        .push(channel_id.clone());
    compiled.bindings_by_channel.insert(channel_id, binding);
}

/// Appends the implicit `connectivity` and `device_software_update`
/// channels every device carries.
fn append_implicit_channels(compiled: &mut CompiledExposes) {
    let mut connectivity = Channel::new(
        "connectivity",
        "Connectivity",
        ChannelKind::ConnectivityStatus,
        ChannelDataType::Enum,
    );
    connectivity.flags = ChannelFlags::read_only();
    let mut availability_binding = ChannelBinding::new(
        "connectivity",
        "availability",
        ChannelKind::ConnectivityStatus,
        ChannelDataType::Enum,
        connectivity.flags,
    );
    availability_binding.is_availability = true;
    compiled.channels.push(connectivity);
    compiled
        .channel_by_property
        .entry("availability".to_string())
        .or_default()
        .push("connectivity".to_string());
    compiled
        .bindings_by_channel
        .insert("connectivity".to_string(), availability_binding);

    let mut update = Channel::new(
        "device_software_update",
        "Firmware Update",
        ChannelKind::DeviceSoftwareUpdate,
        ChannelDataType::Enum,
    );
    update.flags = ChannelFlags::read_only();
    let update_binding = ChannelBinding::new(
        "device_software_update",
        "update",
        ChannelKind::DeviceSoftwareUpdate,
        ChannelDataType::Enum,
        update.flags,
    );
    compiled.channels.push(update);
    compiled
        .bindings_by_channel
        .insert("device_software_update".to_string(), update_binding);
}

/// Maps Z2M access bits to channel flags; no bits set falls back to the
/// read-only default.
fn flags_from_access(access: u64) -> ChannelFlags {
    let mut flags = ChannelFlags::default();
    if access & ACCESS_STATE != 0 {
        flags.readable = true;
        flags.reportable = true;
        flags.retained = true;
    }
    if access & ACCESS_SET != 0 {
        flags.writable = true;
    }
    if flags.is_empty() {
        flags = ChannelFlags::read_only();
    }
    flags
}

fn is_sensor_measurement_kind(kind: ChannelKind) -> bool {
    matches!(
        kind,
        ChannelKind::Temperature
            | ChannelKind::Humidity
            | ChannelKind::Illuminance
            | ChannelKind::Co2
            | ChannelKind::Power
            | ChannelKind::Voltage
            | ChannelKind::Current
            | ChannelKind::Energy
            | ChannelKind::Battery
            | ChannelKind::Motion
            | ChannelKind::Tamper
            | ChannelKind::Contact
            | ChannelKind::AmbientLightLevel
            | ChannelKind::LinkQuality
            | ChannelKind::SignalStrength
            | ChannelKind::ButtonEvent
    )
}

/// Chooses the color wire mode from the composite's features: xy when `x`
/// and `y` are present, hs when hue and saturation are, xy otherwise.
fn color_mode_from_features(expose: &Map<String, Value>) -> ColorMode {
    let mut has_x = false;
    let mut has_y = false;
    let mut has_hue = false;
    let mut has_sat = false;
    if let Some(features) = expose.get("features").and_then(Value::as_array) {
        for feature in features {
            let Some(obj) = feature.as_object() else {
                continue;
            };
            match str_field(obj, "property").as_str() {
                "x" => has_x = true,
                "y" => has_y = true,
                "hue" | "h" => has_hue = true,
                "saturation" | "s" => has_sat = true,
                _ => {}
            }
        }
    }
    if has_x && has_y {
        ColorMode::Xy
    } else if has_hue && has_sat {
        ColorMode::Hs
    } else {
        ColorMode::Xy
    }
}

fn str_field(obj: &Map<String, Value>, key: &str) -> String {
    obj.get(key)
        .and_then(Value::as_str)
        .map(str::trim)
        .unwrap_or_default()
        .to_string()
}

fn num_field(obj: &Map<String, Value>, key: &str, default: f64) -> f64 {
    obj.get(key).and_then(Value::as_f64).unwrap_or(default)
}
