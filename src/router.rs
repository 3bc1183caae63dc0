// SPDX-License-Identifier: MPL-2.0
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Topic classification for the Zigbee2MQTT namespace.
//!
//! Everything below `<baseTopic>/` is subscribed with a single wildcard;
//! this module strips the prefix and classifies the suffix so the adapter
//! can dispatch to the right handler.

/// Classified route of an incoming topic below the base topic.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TopicRoute<'a> {
    /// `bridge/state` - bridge online/offline.
    BridgeState,
    /// `bridge/health` - health report, patched into adapter meta.
    BridgeHealth,
    /// `bridge/info` - coordinator and bridge details.
    BridgeInfo,
    /// `bridge/devices` or `bridge/response/devices`; `full_snapshot` is
    /// `true` only for the retained `bridge/devices` form.
    BridgeDevices {
        /// Entries absent from the payload are removed only on a full snapshot.
        full_snapshot: bool,
    },
    /// `bridge/response/device/rename`.
    BridgeRenameResponse,
    /// `bridge/response/device/get`.
    BridgeDeviceGetResponse,
    /// `bridge/response/options`.
    BridgeOptionsResponse,
    /// Any other `bridge/...` topic; ignored.
    BridgeOther,
    /// `<device>/availability`.
    Availability {
        /// The device's MQTT friendly name.
        mqtt_id: &'a str,
    },
    /// `<device>/get` or `<device>/set` echoes; ignored.
    GetSetEcho,
    /// Any deeper device subtopic; ignored.
    Nested,
    /// A device state topic (single path segment).
    DeviceState {
        /// The device's MQTT friendly name.
        mqtt_id: &'a str,
    },
}

/// Strips `<base_topic>/` from a full topic, returning the suffix.
#[must_use]
pub fn strip_base<'a>(topic: &'a str, base_topic: &str) -> Option<&'a str> {
    topic
        .strip_prefix(base_topic)
        .and_then(|rest| rest.strip_prefix('/'))
        .filter(|suffix| !suffix.is_empty())
}

/// Classifies a topic suffix below the base topic.
#[must_use]
pub fn classify(suffix: &str) -> TopicRoute<'_> {
    if let Some(bridge_suffix) = suffix.strip_prefix("bridge/") {
        return match bridge_suffix {
            "state" => TopicRoute::BridgeState,
            "health" => TopicRoute::BridgeHealth,
            "info" => TopicRoute::BridgeInfo,
            "devices" => TopicRoute::BridgeDevices {
                full_snapshot: true,
            },
            "response/devices" => TopicRoute::BridgeDevices {
                full_snapshot: false,
            },
            "response/device/rename" => TopicRoute::BridgeRenameResponse,
            "response/device/get" => TopicRoute::BridgeDeviceGetResponse,
            "response/options" => TopicRoute::BridgeOptionsResponse,
            _ => TopicRoute::BridgeOther,
        };
    }

    if let Some(mqtt_id) = suffix.strip_suffix("/availability") {
        // Only a direct child: deeper paths are not availability topics.
        if !mqtt_id.is_empty() && !mqtt_id.contains('/') {
            return TopicRoute::Availability { mqtt_id };
        }
        return TopicRoute::Nested;
    }

    if suffix.ends_with("/get") || suffix.ends_with("/set") {
        return TopicRoute::GetSetEcho;
    }
    if suffix.contains('/') {
        return TopicRoute::Nested;
    }
    TopicRoute::DeviceState { mqtt_id: suffix }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn strip_base_matches_prefix() {
        assert_eq!(
            strip_base("zigbee2mqtt/bulb1", "zigbee2mqtt"),
            Some("bulb1")
        );
        assert_eq!(
            strip_base("zigbee2mqtt/bridge/state", "zigbee2mqtt"),
            Some("bridge/state")
        );
        assert_eq!(strip_base("other/bulb1", "zigbee2mqtt"), None);
        assert_eq!(strip_base("zigbee2mqtt", "zigbee2mqtt"), None);
        assert_eq!(strip_base("zigbee2mqtt/", "zigbee2mqtt"), None);
    }

    #[test]
    fn strip_base_requires_full_segment() {
        // "zigbee2mqtt2/..." must not match base "zigbee2mqtt".
        assert_eq!(strip_base("zigbee2mqtt2/bulb1", "zigbee2mqtt"), None);
    }

    #[test]
    fn bridge_routes() {
        assert_eq!(classify("bridge/state"), TopicRoute::BridgeState);
        assert_eq!(classify("bridge/health"), TopicRoute::BridgeHealth);
        assert_eq!(classify("bridge/info"), TopicRoute::BridgeInfo);
        assert_eq!(
            classify("bridge/devices"),
            TopicRoute::BridgeDevices {
                full_snapshot: true
            }
        );
        assert_eq!(
            classify("bridge/response/devices"),
            TopicRoute::BridgeDevices {
                full_snapshot: false
            }
        );
        assert_eq!(
            classify("bridge/response/device/rename"),
            TopicRoute::BridgeRenameResponse
        );
        assert_eq!(
            classify("bridge/response/device/get"),
            TopicRoute::BridgeDeviceGetResponse
        );
        assert_eq!(
            classify("bridge/response/options"),
            TopicRoute::BridgeOptionsResponse
        );
        assert_eq!(classify("bridge/logging"), TopicRoute::BridgeOther);
        assert_eq!(classify("bridge/request/restart"), TopicRoute::BridgeOther);
    }

    #[test]
    fn availability_route() {
        assert_eq!(
            classify("bulb1/availability"),
            TopicRoute::Availability { mqtt_id: "bulb1" }
        );
        // Deeper paths are not availability topics.
        assert_eq!(classify("a/b/availability"), TopicRoute::Nested);
    }

    #[test]
    fn get_set_echoes_ignored() {
        assert_eq!(classify("bulb1/get"), TopicRoute::GetSetEcho);
        assert_eq!(classify("bulb1/set"), TopicRoute::GetSetEcho);
        assert_eq!(classify("bulb1/left/set"), TopicRoute::GetSetEcho);
    }

    #[test]
    fn nested_paths_ignored() {
        assert_eq!(classify("bulb1/some/deep/topic"), TopicRoute::Nested);
    }

    #[test]
    fn leaf_is_device_state() {
        assert_eq!(
            classify("bulb1"),
            TopicRoute::DeviceState { mqtt_id: "bulb1" }
        );
        assert_eq!(
            classify("0x00158d0001"),
            TopicRoute::DeviceState {
                mqtt_id: "0x00158d0001"
            }
        );
    }
}
