// SPDX-License-Identifier: MPL-2.0
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Device registry: friendly-name to external-id bookkeeping.
//!
//! Zigbee2MQTT addresses devices by their mutable friendly name, the host
//! by a stable external id (the IEEE address). The registry owns the
//! [`DeviceEntry`] map and the index between the two, buffers state payloads
//! that arrive before their device definition, and handles the remapping a
//! rename causes.

use std::collections::{HashMap, HashSet};

use chrono::{DateTime, NaiveDateTime};
use serde_json::{Map, Value};

use crate::expose::{self, ChannelBinding};
use crate::types::{Channel, Device, DeviceClass, DeviceFlags};

/// Milliseconds after which a `last_seen` timestamp marks a device stale.
pub const STALE_THRESHOLD_MS: i64 = 5 * 60 * 1000;

/// Everything the adapter knows about one device.
#[derive(Debug, Clone)]
pub struct DeviceEntry {
    /// Canonical device handed to the host.
    pub device: Device,
    /// Current MQTT friendly name.
    pub mqtt_id: String,
    /// Channels in compilation order.
    pub channels: Vec<Channel>,
    /// Bindings keyed by channel id.
    pub bindings_by_channel: HashMap<String, ChannelBinding>,
    /// Channel ids keyed by Z2M property name.
    pub channel_by_property: HashMap<String, Vec<String>>,
}

impl DeviceEntry {
    /// Returns the binding feeding the implicit connectivity channel.
    #[must_use]
    pub fn availability_binding(&self) -> Option<&ChannelBinding> {
        self.bindings_by_channel
            .values()
            .find(|binding| binding.is_availability)
    }
}

/// Outcome of ingesting one `bridge/devices` entry.
#[derive(Debug)]
pub struct UpsertOutcome {
    /// The entry's current MQTT friendly name.
    pub mqtt_id: String,
    /// The entry's stable external id.
    pub external_id: String,
    /// Previous friendly name when this entry was renamed.
    pub renamed_from: Option<String>,
    /// The entry describes the Zigbee coordinator.
    pub is_coordinator: bool,
}

/// Registry of known devices and their indexes.
#[derive(Debug, Default)]
pub struct DeviceRegistry {
    devices: HashMap<String, DeviceEntry>,
    mqtt_by_external: HashMap<String, String>,
    pending_state_payloads: HashMap<String, Map<String, Value>>,
    coordinator_id: Option<String>,
}

impl DeviceRegistry {
    /// Creates an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Resolves an external id to the current MQTT friendly name.
    ///
    /// Unmapped ids pass through unchanged, matching the lookup the host
    /// performs with ids that already are friendly names.
    #[must_use]
    pub fn resolve_mqtt_id(&self, external_id: &str) -> String {
        self.mqtt_by_external
            .get(external_id)
            .cloned()
            .unwrap_or_else(|| external_id.to_string())
    }

    /// Returns the MQTT friendly name mapped to an external id, if any.
    #[must_use]
    pub fn mqtt_for_external(&self, external_id: &str) -> Option<&str> {
        self.mqtt_by_external.get(external_id).map(String::as_str)
    }

    /// Returns the entry under the given MQTT friendly name.
    #[must_use]
    pub fn entry(&self, mqtt_id: &str) -> Option<&DeviceEntry> {
        self.devices.get(mqtt_id)
    }

    /// Returns the mutable entry under the given MQTT friendly name.
    pub fn entry_mut(&mut self, mqtt_id: &str) -> Option<&mut DeviceEntry> {
        self.devices.get_mut(mqtt_id)
    }

    /// Returns the entry for an external id, if known.
    #[must_use]
    pub fn entry_by_external(&self, external_id: &str) -> Option<&DeviceEntry> {
        self.devices.get(&self.resolve_mqtt_id(external_id))
    }

    /// Iterates over all known entries.
    pub fn entries(&self) -> impl Iterator<Item = &DeviceEntry> {
        self.devices.values()
    }

    /// Number of known devices.
    #[must_use]
    pub fn len(&self) -> usize {
        self.devices.len()
    }

    /// Returns `true` when no devices are known.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.devices.is_empty()
    }

    /// External id of the coordinator, once seen.
    #[must_use]
    pub fn coordinator_id(&self) -> Option<&str> {
        self.coordinator_id.as_deref()
    }

    /// Buffers a state payload that arrived before its device definition.
    pub fn buffer_state_payload(&mut self, mqtt_id: &str, payload: Map<String, Value>) {
        self.pending_state_payloads
            .insert(mqtt_id.to_string(), payload);
    }

    /// Takes the buffered state payload for a device, if any.
    pub fn take_pending_payload(&mut self, mqtt_id: &str) -> Option<Map<String, Value>> {
        self.pending_state_payloads.remove(mqtt_id)
    }

    /// Removes a device that failed its interview or lost support.
    ///
    /// Returns the removed entry's external id. Pending payloads for the
    /// device are dropped either way.
    pub fn remove_unsupported(&mut self, friendly_name: &str, ieee_address: &str) -> Option<String> {
        let mqtt_id = if ieee_address.is_empty() {
            friendly_name.to_string()
        } else {
            self.mqtt_by_external
                .get(ieee_address)
                .cloned()
                .unwrap_or_else(|| friendly_name.to_string())
        };
        self.pending_state_payloads.remove(&mqtt_id);
        let entry = self.devices.remove(&mqtt_id)?;
        if !entry.device.id.is_empty() {
            self.mqtt_by_external.remove(&entry.device.id);
        }
        Some(entry.device.id)
    }

    /// Ingests one `bridge/devices` entry: detects renames, migrates pending
    /// payloads, builds or refreshes the [`DeviceEntry`] and updates the
    /// indexes.
    ///
    /// Returns `None` for entries without a friendly name.
    pub fn upsert_from_object(&mut self, obj: &Map<String, Value>) -> Option<UpsertOutcome> {
        let friendly_name = trimmed_str(obj, "friendly_name");
        if friendly_name.is_empty() {
            return None;
        }
        let ieee_address = trimmed_str(obj, "ieee_address");

        let previous_mqtt_id = if ieee_address.is_empty() {
            None
        } else {
            self.mqtt_by_external.get(&ieee_address).cloned()
        };
        let renamed_from = previous_mqtt_id
            .as_ref()
            .filter(|previous| **previous != friendly_name)
            .cloned();

        let existing = previous_mqtt_id
            .as_ref()
            .and_then(|previous| self.devices.remove(previous));
        let mut entry = match existing {
            Some(mut entry) => {
                // Existing device: keep its compiled channels, refresh the name.
                entry.device.name = friendly_name.clone();
                entry.device.meta.insert(
                    "friendly_name".to_string(),
                    Value::String(friendly_name.clone()),
                );
                entry
            }
            None => build_device_entry(obj),
        };
        entry.mqtt_id = friendly_name.clone();

        if let Some(old_mqtt_id) = &renamed_from {
            if let Some(payload) = self.pending_state_payloads.remove(old_mqtt_id) {
                self.pending_state_payloads
                    .insert(friendly_name.clone(), payload);
            }
        }

        let external_id = entry.device.id.clone();
        let is_coordinator = trimmed_str(obj, "type").eq_ignore_ascii_case("Coordinator");
        if is_coordinator {
            self.coordinator_id = Some(external_id.clone());
        }

        self.devices.insert(friendly_name.clone(), entry);
        if !external_id.is_empty() {
            self.mqtt_by_external
                .insert(external_id.clone(), friendly_name.clone());
        }

        Some(UpsertOutcome {
            mqtt_id: friendly_name,
            external_id,
            renamed_from,
            is_coordinator,
        })
    }

    /// Removes every device whose friendly name is not in `seen`.
    ///
    /// Used after a full `bridge/devices` snapshot; returns the external ids
    /// of the removed entries.
    pub fn prune_not_seen(&mut self, seen: &HashSet<String>) -> Vec<String> {
        let stale: Vec<String> = self
            .devices
            .keys()
            .filter(|mqtt_id| !seen.contains(*mqtt_id))
            .cloned()
            .collect();
        let mut removed = Vec::with_capacity(stale.len());
        for mqtt_id in stale {
            if let Some(entry) = self.devices.remove(&mqtt_id) {
                if !entry.device.id.is_empty() {
                    self.mqtt_by_external.remove(&entry.device.id);
                }
                removed.push(entry.device.id);
            }
        }
        removed
    }

    /// Drops buffered payloads; used on `stop`.
    pub fn clear_pending_payloads(&mut self) {
        self.pending_state_payloads.clear();
    }
}

/// Builds a [`DeviceEntry`] from one `bridge/devices` element.
#[must_use]
pub fn build_device_entry(obj: &Map<String, Value>) -> DeviceEntry {
    let mqtt_id = trimmed_str(obj, "friendly_name");
    let ieee_address = trimmed_str(obj, "ieee_address");

    let mut device = Device {
        name: mqtt_id.clone(),
        flags: DeviceFlags {
            wireless: true,
            battery: false,
        },
        ..Device::default()
    };

    let power_source = trimmed_str(obj, "power_source");
    if power_source.eq_ignore_ascii_case("Battery") {
        device.flags.battery = true;
    }

    let definition = obj.get("definition").and_then(Value::as_object);
    if let Some(def) = definition {
        device.model = trimmed_str(def, "model");
        device.manufacturer = trimmed_str(def, "vendor");
        device.meta.insert(
            "description".to_string(),
            Value::String(trimmed_str(def, "description")),
        );
        if !device.model.is_empty() {
            device.meta.insert(
                "iconUrl".to_string(),
                Value::String(format!(
                    "https://www.zigbee2mqtt.io/images/devices/{}.png",
                    device.model
                )),
            );
        }
    }

    device
        .meta
        .insert("friendly_name".to_string(), Value::String(mqtt_id.clone()));
    if !ieee_address.is_empty() {
        device.meta.insert(
            "ieee_address".to_string(),
            Value::String(ieee_address.clone()),
        );
    }
    let device_type = trimmed_str(obj, "type");
    device
        .meta
        .insert("type".to_string(), Value::String(device_type.clone()));
    for key in ["model_id", "manufacturer", "software_build_id", "date_code"] {
        let value = trimmed_str(obj, key);
        if !value.is_empty() {
            device.meta.insert(key.to_string(), Value::String(value));
        }
    }
    if !power_source.is_empty() {
        device
            .meta
            .insert("power_source".to_string(), Value::String(power_source));
    }
    for key in ["interview_completed", "interviewing", "supported", "disabled"] {
        if let Some(value) = obj.get(key) {
            device.meta.insert(key.to_string(), value.clone());
        }
    }
    if let Some(availability) = obj
        .get("availability")
        .and_then(availability_from_value)
    {
        device
            .meta
            .insert("availability".to_string(), Value::String(availability));
    }

    device.id = if ieee_address.is_empty() {
        mqtt_id.clone()
    } else {
        ieee_address
    };

    let exposes_value = definition
        .and_then(|def| def.get("exposes"))
        .cloned()
        .unwrap_or(Value::Array(Vec::new()));
    let exposes = expose::flatten_exposes(&exposes_value);

    device.class = expose::infer_device_class(&exposes);
    if device_type.eq_ignore_ascii_case("Coordinator") {
        device.class = DeviceClass::Gateway;
        device
            .meta
            .insert("coordinator".to_string(), Value::Bool(true));
    }

    let compiled = expose::compile_exposes(&exposes, device.class);

    DeviceEntry {
        device,
        mqtt_id,
        channels: compiled.channels,
        bindings_by_channel: compiled.bindings_by_channel,
        channel_by_property: compiled.channel_by_property,
    }
}

/// Extracts the availability state from a string or `{"state": ...}` value.
#[must_use]
pub fn availability_from_value(value: &Value) -> Option<String> {
    match value {
        Value::String(state) => {
            let trimmed = state.trim();
            (!trimmed.is_empty()).then(|| trimmed.to_string())
        }
        Value::Object(obj) => {
            let state = trimmed_str(obj, "state");
            (!state.is_empty()).then_some(state)
        }
        _ => None,
    }
}

/// Parses a `last_seen` value into epoch milliseconds.
///
/// Numbers above `1e12` are taken as milliseconds, positive numbers below as
/// seconds; strings are parsed as ISO-8601.
#[must_use]
pub fn last_seen_ms(value: &Value) -> Option<i64> {
    match value {
        Value::Number(_) => {
            let raw = value.as_f64()?;
            // The raw value stays far below 2^53, so the cast is exact.
            #[allow(clippy::cast_possible_truncation)]
            let millis = if raw > 1.0e12 {
                Some(raw as i64)
            } else if raw > 0.0 {
                Some((raw * 1000.0) as i64)
            } else {
                None
            };
            millis
        }
        Value::String(text) => parse_iso_ms(text),
        _ => None,
    }
}

fn parse_iso_ms(text: &str) -> Option<i64> {
    if let Ok(parsed) = DateTime::parse_from_rfc3339(text) {
        return Some(parsed.timestamp_millis());
    }
    // Z2M also emits local timestamps without an offset.
    NaiveDateTime::parse_from_str(text, "%Y-%m-%dT%H:%M:%S%.f")
        .ok()
        .map(|naive| naive.and_utc().timestamp_millis())
}

fn trimmed_str(obj: &Map<String, Value>, key: &str) -> String {
    obj.get(key)
        .and_then(Value::as_str)
        .map(str::trim)
        .unwrap_or_default()
        .to_string()
}
