// SPDX-License-Identifier: MPL-2.0
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Bridge-protocol behavior: device list snapshots, availability,
//! coordinator info, adapter actions and the reconnect loop.

use std::time::Duration;

use serde_json::{Map, Value, json};
use tokio::sync::broadcast;
use tokio::time::timeout;

use z2m_bridge::protocol::mock::{MockHandle, MockTransport, PublishedMessage};
use z2m_bridge::{
    AdapterConfig, AdapterEvent, ChannelValue, CmdStatus, ConnectivityStatus, DeviceClass,
    Z2mAdapter,
};

async fn connected_adapter() -> (
    Z2mAdapter,
    MockHandle,
    broadcast::Receiver<AdapterEvent>,
) {
    let (transport, mut handle) = MockTransport::channel(true);
    let config = AdapterConfig::new("test").with_host("broker.local");
    let adapter = Z2mAdapter::with_transport(config, transport);
    let mut events = adapter.subscribe();
    adapter.start().unwrap();

    timeout(Duration::from_secs(5), handle.next_subscription())
        .await
        .expect("subscription expected")
        .unwrap();
    let info = timeout(Duration::from_secs(5), handle.next_publish())
        .await
        .expect("bootstrap publish expected")
        .unwrap();
    assert_eq!(info.topic, "zigbee2mqtt/bridge/request/info");
    let connected = expect_event(&mut events, |event| match event {
        AdapterEvent::ConnectionStateChanged { connected } => Some(*connected),
        _ => None,
    })
    .await;
    assert!(connected);

    (adapter, handle, events)
}

async fn expect_event<T>(
    events: &mut broadcast::Receiver<AdapterEvent>,
    mut filter: impl FnMut(&AdapterEvent) -> Option<T>,
) -> T {
    timeout(Duration::from_secs(5), async {
        loop {
            let event = events.recv().await.expect("event stream open");
            if let Some(found) = filter(&event) {
                return found;
            }
        }
    })
    .await
    .expect("expected event did not arrive")
}

async fn expect_publish(handle: &mut MockHandle, topic: &str) -> PublishedMessage {
    timeout(Duration::from_secs(5), async {
        loop {
            let message = handle.next_publish().await.expect("publish stream open");
            if message.topic == topic {
                return message;
            }
        }
    })
    .await
    .unwrap_or_else(|_| panic!("no publish on {topic}"))
}

fn sensor_definition(friendly: &str, ieee: &str) -> Value {
    json!({
        "friendly_name": friendly,
        "ieee_address": ieee,
        "type": "EndDevice",
        "power_source": "Battery",
        "supported": true,
        "interview_completed": true,
        "definition": {
            "model": "WSDCGQ11LM",
            "vendor": "Aqara",
            "exposes": [
                {"type": "numeric", "property": "temperature", "access": 1, "unit": "C"},
                {"type": "numeric", "property": "humidity", "access": 1, "unit": "%"},
                {"type": "numeric", "property": "battery", "access": 1, "unit": "%"}
            ]
        }
    })
}

async fn ingest(
    handle: &MockHandle,
    events: &mut broadcast::Receiver<AdapterEvent>,
    devices: Value,
) {
    handle.send_json("zigbee2mqtt/bridge/devices", &devices);
    expect_event(events, |event| match event {
        AdapterEvent::DeviceUpdated { .. } => Some(()),
        _ => None,
    })
    .await;
}

// ============================================================================
// Device list snapshots
// ============================================================================

#[tokio::test(start_paused = true)]
async fn full_snapshot_prunes_missing_devices() {
    let (adapter, handle, mut events) = connected_adapter().await;
    ingest(
        &handle,
        &mut events,
        json!([
            sensor_definition("s1", "0x01"),
            sensor_definition("s2", "0x02")
        ]),
    )
    .await;
    assert_eq!(adapter.device_count(), 2);

    // Full snapshot without s2 removes it.
    handle.send_json(
        "zigbee2mqtt/bridge/devices",
        &json!([sensor_definition("s1", "0x01")]),
    );
    let removed = expect_event(&mut events, |event| match event {
        AdapterEvent::DeviceRemoved { external_id } => Some(external_id.clone()),
        _ => None,
    })
    .await;
    assert_eq!(removed, "0x02");
    assert_eq!(adapter.device_count(), 1);
}

#[tokio::test(start_paused = true)]
async fn response_form_is_additive() {
    let (adapter, handle, mut events) = connected_adapter().await;
    ingest(
        &handle,
        &mut events,
        json!([
            sensor_definition("s1", "0x01"),
            sensor_definition("s2", "0x02")
        ]),
    )
    .await;

    // The response form lists only one device but must not prune.
    handle.send_json(
        "zigbee2mqtt/bridge/response/devices",
        &json!({"status": "ok", "data": [sensor_definition("s1", "0x01")]}),
    );
    expect_event(&mut events, |event| match event {
        AdapterEvent::DeviceUpdated { device, .. } if device.id == "0x01" => Some(()),
        _ => None,
    })
    .await;
    assert_eq!(adapter.device_count(), 2);
}

#[tokio::test(start_paused = true)]
async fn repeated_snapshot_is_idempotent() {
    let (adapter, handle, mut events) = connected_adapter().await;
    let payload = json!([sensor_definition("s1", "0x01")]);
    ingest(&handle, &mut events, payload.clone()).await;
    ingest(&handle, &mut events, payload).await;

    assert_eq!(adapter.device_count(), 1);
    let device = adapter.device("0x01").unwrap();
    assert_eq!(device.name, "s1");
    assert_eq!(device.class, DeviceClass::Sensor);
    assert!(device.flags.battery);
}

#[tokio::test(start_paused = true)]
async fn failed_interview_removes_device() {
    let (adapter, handle, mut events) = connected_adapter().await;
    ingest(&handle, &mut events, json!([sensor_definition("s1", "0x01")])).await;

    let mut broken = sensor_definition("s1", "0x01");
    broken["supported"] = json!(false);
    handle.send_json("zigbee2mqtt/bridge/devices", &json!([broken]));
    let removed = expect_event(&mut events, |event| match event {
        AdapterEvent::DeviceRemoved { external_id } => Some(external_id.clone()),
        _ => None,
    })
    .await;
    assert_eq!(removed, "0x01");
    assert_eq!(adapter.device_count(), 0);
}

// ============================================================================
// Availability and staleness
// ============================================================================

#[tokio::test(start_paused = true)]
async fn availability_topic_drives_connectivity() {
    let (_adapter, handle, mut events) = connected_adapter().await;
    ingest(&handle, &mut events, json!([sensor_definition("s1", "0x01")])).await;

    handle.send_text("zigbee2mqtt/s1/availability", "offline");
    let value = expect_event(&mut events, |event| match event {
        AdapterEvent::ChannelStateUpdated {
            channel_id, value, ..
        } if channel_id == "connectivity" => Some(value.clone()),
        _ => None,
    })
    .await;
    assert_eq!(value.as_i64(), Some(ConnectivityStatus::Disconnected.code()));

    // The JSON object form works the same.
    handle.send_text("zigbee2mqtt/s1/availability", "{\"state\":\"online\"}");
    let value = expect_event(&mut events, |event| match event {
        AdapterEvent::ChannelStateUpdated {
            channel_id, value, ..
        } if channel_id == "connectivity" => Some(value.clone()),
        _ => None,
    })
    .await;
    assert_eq!(value.as_i64(), Some(ConnectivityStatus::Connected.code()));
}

#[tokio::test(start_paused = true)]
async fn stale_last_seen_marks_disconnected() {
    let (_adapter, handle, mut events) = connected_adapter().await;
    ingest(&handle, &mut events, json!([sensor_definition("s1", "0x01")])).await;

    let stale = chrono::Utc::now().timestamp_millis() - 10 * 60 * 1000;
    handle.send_json("zigbee2mqtt/s1", &json!({"last_seen": stale}));
    let value = expect_event(&mut events, |event| match event {
        AdapterEvent::ChannelStateUpdated {
            channel_id, value, ..
        } if channel_id == "connectivity" => Some(value.clone()),
        _ => None,
    })
    .await;
    assert_eq!(value.as_i64(), Some(ConnectivityStatus::Disconnected.code()));

    let fresh = chrono::Utc::now().timestamp_millis() - 30 * 1000;
    handle.send_json("zigbee2mqtt/s1", &json!({"last_seen": fresh}));
    let value = expect_event(&mut events, |event| match event {
        AdapterEvent::ChannelStateUpdated {
            channel_id, value, ..
        } if channel_id == "connectivity" => Some(value.clone()),
        _ => None,
    })
    .await;
    assert_eq!(value.as_i64(), Some(ConnectivityStatus::Connected.code()));
}

#[tokio::test(start_paused = true)]
async fn plain_state_payload_implies_connected() {
    let (_adapter, handle, mut events) = connected_adapter().await;
    ingest(&handle, &mut events, json!([sensor_definition("s1", "0x01")])).await;

    handle.send_json("zigbee2mqtt/s1", &json!({"temperature": 21.5}));
    let mut connectivity = None;
    let mut temperature = None;
    while connectivity.is_none() || temperature.is_none() {
        let (channel_id, value) = expect_event(&mut events, |event| match event {
            AdapterEvent::ChannelStateUpdated {
                channel_id, value, ..
            } => Some((channel_id.clone(), value.clone())),
            _ => None,
        })
        .await;
        match channel_id.as_str() {
            "connectivity" => connectivity = value.as_i64(),
            "temperature" => temperature = value.as_f64(),
            _ => {}
        }
    }
    assert_eq!(connectivity, Some(ConnectivityStatus::Connected.code()));
    assert!((temperature.unwrap() - 21.5).abs() < 1e-9);
}

// ============================================================================
// Firmware update channel
// ============================================================================

#[tokio::test(start_paused = true)]
async fn update_object_feeds_firmware_channel() {
    let (_adapter, handle, mut events) = connected_adapter().await;
    ingest(&handle, &mut events, json!([sensor_definition("s1", "0x01")])).await;

    handle.send_json(
        "zigbee2mqtt/s1",
        &json!({
            "update": {
                "state": "available",
                "installed_version": 100,
                "latest_version": 200
            }
        }),
    );
    let value = expect_event(&mut events, |event| match event {
        AdapterEvent::ChannelStateUpdated {
            channel_id, value, ..
        } if channel_id == "device_software_update" => Some(value.clone()),
        _ => None,
    })
    .await;
    let ChannelValue::Json(payload) = value else {
        panic!("expected a JSON payload");
    };
    assert_eq!(
        payload,
        json!({
            "status": "available",
            "currentVersion": "100",
            "targetVersion": "200"
        })
    );
}

// ============================================================================
// Bridge meta topics
// ============================================================================

#[tokio::test(start_paused = true)]
async fn bridge_health_patches_adapter_meta() {
    let (_adapter, handle, mut events) = connected_adapter().await;
    handle.send_json(
        "zigbee2mqtt/bridge/health",
        &json!({"response_time": 5, "os": {"load_average": [0.1]}}),
    );
    let patch = expect_event(&mut events, |event| match event {
        AdapterEvent::AdapterMetaUpdated { patch } => Some(patch.clone()),
        _ => None,
    })
    .await;
    let health = patch.get("health").and_then(Value::as_object).unwrap();
    assert_eq!(health.get("response_time"), Some(&json!(5)));
}

#[tokio::test(start_paused = true)]
async fn numeric_last_seen_requested_once() {
    let (_adapter, mut handle, _events) = connected_adapter().await;

    handle.send_text("zigbee2mqtt/bridge/state", "online");
    let options = expect_publish(&mut handle, "zigbee2mqtt/bridge/request/options").await;
    assert_eq!(
        options.json(),
        json!({"options": {"advanced": {"last_seen": "epoch"}}})
    );

    // A second online transition does not re-request.
    handle.send_text("zigbee2mqtt/bridge/state", "online");
    let again = timeout(
        Duration::from_secs(1),
        expect_publish(&mut handle, "zigbee2mqtt/bridge/request/options"),
    )
    .await;
    assert!(again.is_err());
}

#[tokio::test(start_paused = true)]
async fn coordinator_receives_bridge_info() {
    let (adapter, handle, mut events) = connected_adapter().await;

    // bridge/info before the coordinator is known gets buffered.
    handle.send_json(
        "zigbee2mqtt/bridge/info",
        &json!({
            "version": "1.35.1",
            "commit": "abc123",
            "coordinator": {
                "type": "zStack3x0",
                "meta": {
                    "manufacturer": "Texas Instruments",
                    "model": "CC1352P_2",
                    "revision": "20221226"
                }
            },
            "config": {"serial": {"port": "/dev/ttyUSB0", "adapter": "zstack"}},
            "permit_join": false,
            "log_level": "info"
        }),
    );

    handle.send_json(
        "zigbee2mqtt/bridge/devices",
        &json!([{
            "friendly_name": "Coordinator",
            "ieee_address": "0xcoord",
            "type": "Coordinator"
        }]),
    );

    // The buffered info is applied right after the coordinator appears.
    let device = expect_event(&mut events, |event| match event {
        AdapterEvent::DeviceUpdated { device, .. }
            if device.id == "0xcoord" && !device.manufacturer.is_empty() =>
        {
            Some(device.clone())
        }
        _ => None,
    })
    .await;
    assert_eq!(device.class, DeviceClass::Gateway);
    assert_eq!(device.manufacturer, "Texas Instruments");
    assert_eq!(device.model, "CC1352P_2");
    assert_eq!(device.firmware, "20221226");
    assert_eq!(
        device.meta.get("serial_port").and_then(Value::as_str),
        Some("/dev/ttyUSB0")
    );

    let patch = expect_event(&mut events, |event| match event {
        AdapterEvent::AdapterMetaUpdated { patch } if patch.contains_key("bridge_info") => {
            Some(patch.clone())
        }
        _ => None,
    })
    .await;
    assert_eq!(
        patch.get("z2m_version").and_then(Value::as_str),
        Some("1.35.1")
    );
    assert_eq!(patch.get("log_level"), Some(&json!("info")));

    assert_eq!(adapter.device("0xcoord").unwrap().class, DeviceClass::Gateway);
}

// ============================================================================
// Full sync
// ============================================================================

#[tokio::test(start_paused = true)]
async fn full_sync_completes_after_snapshot() {
    let (adapter, mut handle, mut events) = connected_adapter().await;
    ingest(&handle, &mut events, json!([sensor_definition("s1", "0x01")])).await;

    adapter.request_full_sync().unwrap();
    let request = expect_publish(&mut handle, "zigbee2mqtt/bridge/request/devices").await;
    assert_eq!(request.json(), json!({}));

    // Known devices are re-emitted immediately.
    expect_event(&mut events, |event| match event {
        AdapterEvent::DeviceUpdated { device, .. } if device.id == "0x01" => Some(()),
        _ => None,
    })
    .await;

    // Completion follows the next devices payload.
    handle.send_json(
        "zigbee2mqtt/bridge/devices",
        &json!([sensor_definition("s1", "0x01")]),
    );
    expect_event(&mut events, |event| match event {
        AdapterEvent::FullSyncCompleted => Some(()),
        _ => None,
    })
    .await;
}

// ============================================================================
// Adapter actions
// ============================================================================

#[tokio::test(start_paused = true)]
async fn permit_join_publishes_request() {
    let (adapter, mut handle, mut events) = connected_adapter().await;

    adapter
        .invoke_adapter_action("permitJoin", Map::new(), 5)
        .unwrap();
    let request = expect_publish(&mut handle, "zigbee2mqtt/bridge/request/permit_join").await;
    assert_eq!(request.json(), json!({"value": true, "time": 120}));

    let response = expect_event(&mut events, |event| match event {
        AdapterEvent::ActionResult(response) => Some(response.clone()),
        _ => None,
    })
    .await;
    assert_eq!(response.id, 5);
    assert_eq!(response.status, CmdStatus::Success);
}

#[tokio::test(start_paused = true)]
async fn restart_publishes_request() {
    let (adapter, mut handle, mut events) = connected_adapter().await;

    adapter
        .invoke_adapter_action("restartZ2M", Map::new(), 6)
        .unwrap();
    let request = expect_publish(&mut handle, "zigbee2mqtt/bridge/request/restart").await;
    assert_eq!(request.json(), json!({}));

    let response = expect_event(&mut events, |event| match event {
        AdapterEvent::ActionResult(response) => Some(response.clone()),
        _ => None,
    })
    .await;
    assert_eq!(response.status, CmdStatus::Success);
}

#[tokio::test(start_paused = true)]
async fn permit_join_requires_bridge_online() {
    let (adapter, handle, mut events) = connected_adapter().await;

    handle.send_text("zigbee2mqtt/bridge/state", "offline");
    expect_event(&mut events, |event| match event {
        AdapterEvent::ConnectionStateChanged { connected: false } => Some(()),
        _ => None,
    })
    .await;

    adapter
        .invoke_adapter_action("permitJoin", Map::new(), 7)
        .unwrap();
    let response = expect_event(&mut events, |event| match event {
        AdapterEvent::ActionResult(response) => Some(response.clone()),
        _ => None,
    })
    .await;
    assert_eq!(response.status, CmdStatus::Failure);
}

#[tokio::test(start_paused = true)]
async fn unknown_action_is_not_implemented() {
    let (adapter, _handle, mut events) = connected_adapter().await;

    adapter
        .invoke_adapter_action("flashTheLights", Map::new(), 8)
        .unwrap();
    let response = expect_event(&mut events, |event| match event {
        AdapterEvent::ActionResult(response) => Some(response.clone()),
        _ => None,
    })
    .await;
    assert_eq!(response.status, CmdStatus::NotImplemented);
}

#[tokio::test(start_paused = true)]
async fn settings_action_merges_adapter_meta() {
    let (adapter, _handle, mut events) = connected_adapter().await;

    let mut params = Map::new();
    params.insert("retryIntervalMs".to_string(), json!(5000));
    adapter
        .invoke_adapter_action("settings", params, 9)
        .unwrap();

    let patch = expect_event(&mut events, |event| match event {
        AdapterEvent::AdapterMetaUpdated { patch } => Some(patch.clone()),
        _ => None,
    })
    .await;
    assert_eq!(patch.get("retryIntervalMs"), Some(&json!(5000)));

    let response = expect_event(&mut events, |event| match event {
        AdapterEvent::ActionResult(response) => Some(response.clone()),
        _ => None,
    })
    .await;
    assert_eq!(response.status, CmdStatus::Success);
}

// ============================================================================
// Reconnect loop
// ============================================================================

#[tokio::test(start_paused = true)]
async fn reconnects_after_connection_loss() {
    let (adapter, handle, mut events) = connected_adapter().await;
    assert_eq!(handle.connect_attempts(), 1);

    handle.send_event(z2m_bridge::protocol::TransportEvent::Disconnected);
    expect_event(&mut events, |event| match event {
        AdapterEvent::ConnectionStateChanged { connected: false } => Some(()),
        _ => None,
    })
    .await;

    // The retry timer fires after retryIntervalMs and the mock transport
    // accepts the new attempt immediately.
    expect_event(&mut events, |event| match event {
        AdapterEvent::ConnectionStateChanged { connected: true } => Some(()),
        _ => None,
    })
    .await;
    assert!(handle.connect_attempts() >= 2);
    assert!(adapter.is_connected());
}

#[tokio::test(start_paused = true)]
async fn stop_disconnects_and_allows_restart() {
    let (adapter, mut handle, mut events) = connected_adapter().await;

    adapter.stop().await;
    expect_event(&mut events, |event| match event {
        AdapterEvent::ConnectionStateChanged { connected: false } => Some(()),
        _ => None,
    })
    .await;
    assert!(!adapter.is_connected());

    adapter.start().unwrap();
    let filter = timeout(Duration::from_secs(5), handle.next_subscription())
        .await
        .expect("resubscription expected")
        .unwrap();
    assert_eq!(filter, "zigbee2mqtt/#");
    expect_event(&mut events, |event| match event {
        AdapterEvent::ConnectionStateChanged { connected: true } => Some(()),
        _ => None,
    })
    .await;
}
