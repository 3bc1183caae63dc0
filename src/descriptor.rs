// SPDX-License-Identifier: MPL-2.0
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Static adapter descriptors for the host's configuration surface.
//!
//! Plain data only: the host renders forms and confirmation dialogs from
//! these descriptors at construction time; the adapter never interprets
//! them itself.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value, json};

/// Confirmation dialog shown before a destructive action.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConfirmDescriptor {
    /// Dialog title.
    pub title: String,
    /// Dialog body.
    pub message: String,
    /// Confirm button label.
    pub ok_text: String,
    /// Cancel button label.
    pub cancel_text: String,
    /// Render the confirm button as dangerous.
    pub danger: bool,
}

/// One adapter-level action the host can invoke.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ActionDescriptor {
    /// Action id passed to `invoke_adapter_action`.
    pub id: String,
    /// Display label.
    pub label: String,
    /// Display description.
    pub description: String,
    /// The action opens a settings form.
    pub has_form: bool,
    /// Minimum time between invocations, in milliseconds.
    pub cooldown_ms: Option<u64>,
    /// Confirmation dialog, when required.
    pub confirm: Option<ConfirmDescriptor>,
}

/// Type of a configuration field.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ConfigFieldType {
    /// Host name or IP address.
    Hostname,
    /// TCP port.
    Port,
    /// Free-form string.
    String,
    /// Masked string.
    Password,
    /// Integer value.
    Integer,
}

/// One configuration field of the adapter form.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConfigFieldDescriptor {
    /// Field key in the configuration record.
    pub key: String,
    /// Display label.
    pub label: String,
    /// Display description.
    pub description: String,
    /// Field type.
    pub field_type: ConfigFieldType,
    /// The field must be filled.
    pub required: bool,
    /// Default value shown to the user.
    pub default: Option<Value>,
    /// Placeholder text.
    pub placeholder: Option<String>,
}

/// Everything the host needs to present this adapter.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AdapterDescriptor {
    /// Form title.
    pub title: String,
    /// Form description.
    pub description: String,
    /// Adapter-level actions.
    pub actions: Vec<ActionDescriptor>,
    /// Configuration fields.
    pub config_fields: Vec<ConfigFieldDescriptor>,
    /// Default values for the configuration record.
    pub defaults: Map<String, Value>,
}

/// Returns the descriptor of the Zigbee2MQTT adapter.
#[must_use]
pub fn descriptor() -> AdapterDescriptor {
    let mut defaults = Map::new();
    defaults.insert("host".to_string(), json!("localhost"));
    defaults.insert("port".to_string(), json!(1883));
    defaults.insert("retryIntervalMs".to_string(), json!(10_000));
    defaults.insert("baseTopic".to_string(), json!("zigbee2mqtt"));

    AdapterDescriptor {
        title: "Zigbee2MQTT".to_string(),
        description: "Configure the MQTT broker used by Zigbee2MQTT.".to_string(),
        actions: vec![
            ActionDescriptor {
                id: "settings".to_string(),
                label: "Settings".to_string(),
                description: "Edit Zigbee2MQTT connection settings.".to_string(),
                has_form: true,
                cooldown_ms: None,
                confirm: None,
            },
            ActionDescriptor {
                id: "permitJoin".to_string(),
                label: "Open pairing (2 min)".to_string(),
                description: "Allow new Zigbee devices to join for 2 minutes.".to_string(),
                has_form: false,
                cooldown_ms: Some(120_000),
                confirm: None,
            },
            ActionDescriptor {
                id: "restartZ2M".to_string(),
                label: "Restart Zigbee2MQTT".to_string(),
                description: "Restarts Zigbee2MQTT. Devices may be unavailable briefly."
                    .to_string(),
                has_form: false,
                cooldown_ms: None,
                confirm: Some(ConfirmDescriptor {
                    title: "Restart Zigbee2MQTT?".to_string(),
                    message: "This will briefly disconnect Zigbee devices. Continue?".to_string(),
                    ok_text: "Restart".to_string(),
                    cancel_text: "Cancel".to_string(),
                    danger: true,
                }),
            },
        ],
        config_fields: vec![
            ConfigFieldDescriptor {
                key: "host".to_string(),
                label: "MQTT Host".to_string(),
                description: "IP address or hostname of the MQTT broker.".to_string(),
                field_type: ConfigFieldType::Hostname,
                required: true,
                default: None,
                placeholder: Some("localhost".to_string()),
            },
            ConfigFieldDescriptor {
                key: "port".to_string(),
                label: "MQTT Port".to_string(),
                description: "TCP port of the MQTT broker.".to_string(),
                field_type: ConfigFieldType::Port,
                required: false,
                default: Some(json!(1883)),
                placeholder: None,
            },
            ConfigFieldDescriptor {
                key: "user".to_string(),
                label: "MQTT Username".to_string(),
                description: "Username for MQTT authentication (optional).".to_string(),
                field_type: ConfigFieldType::String,
                required: false,
                default: None,
                placeholder: None,
            },
            ConfigFieldDescriptor {
                key: "password".to_string(),
                label: "MQTT Password".to_string(),
                description: "Password for MQTT authentication (optional).".to_string(),
                field_type: ConfigFieldType::Password,
                required: false,
                default: None,
                placeholder: None,
            },
            ConfigFieldDescriptor {
                key: "baseTopic".to_string(),
                label: "Base Topic".to_string(),
                description: "MQTT base topic Zigbee2MQTT publishes under.".to_string(),
                field_type: ConfigFieldType::String,
                required: false,
                default: Some(json!("zigbee2mqtt")),
                placeholder: None,
            },
            ConfigFieldDescriptor {
                key: "retryIntervalMs".to_string(),
                label: "Retry Interval".to_string(),
                description: "Reconnect interval in milliseconds (minimum 1000).".to_string(),
                field_type: ConfigFieldType::Integer,
                required: false,
                default: Some(json!(10_000)),
                placeholder: None,
            },
        ],
        defaults,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn descriptor_lists_known_actions() {
        let descriptor = descriptor();
        let ids: Vec<&str> = descriptor
            .actions
            .iter()
            .map(|action| action.id.as_str())
            .collect();
        assert_eq!(ids, vec!["settings", "permitJoin", "restartZ2M"]);
    }

    #[test]
    fn permit_join_has_cooldown() {
        let descriptor = descriptor();
        let permit = descriptor
            .actions
            .iter()
            .find(|action| action.id == "permitJoin")
            .unwrap();
        assert_eq!(permit.cooldown_ms, Some(120_000));
    }

    #[test]
    fn restart_requires_confirmation() {
        let descriptor = descriptor();
        let restart = descriptor
            .actions
            .iter()
            .find(|action| action.id == "restartZ2M")
            .unwrap();
        let confirm = restart.confirm.as_ref().unwrap();
        assert!(confirm.danger);
    }

    #[test]
    fn defaults_cover_connection_basics() {
        let descriptor = descriptor();
        assert_eq!(descriptor.defaults.get("port"), Some(&json!(1883)));
        assert_eq!(
            descriptor.defaults.get("baseTopic"),
            Some(&json!("zigbee2mqtt"))
        );
        let host = descriptor
            .config_fields
            .iter()
            .find(|field| field.key == "host")
            .unwrap();
        assert!(host.required);
    }
}
