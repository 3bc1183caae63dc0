// SPDX-License-Identifier: MPL-2.0
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! The adapter task: a single-writer event loop over host commands,
//! transport events and timer ticks.
//!
//! All adapter state lives here. The handle and the timers communicate
//! exclusively through the command channel, so the registry and the pending
//! maps are only ever touched from this task.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::RwLock;
use serde_json::{Map, Value, json};
use tokio::sync::{mpsc, oneshot, watch};

use crate::codec;
use crate::config::AdapterConfig;
use crate::event::{AdapterEvent, EventBus};
use crate::protocol::{Transport, TransportEvent, TransportSettings};
use crate::registry::{self, DeviceRegistry, STALE_THRESHOLD_MS};
use crate::router::{self, TopicRoute};
use crate::types::{
    ActionResponse, ChannelKind, ChannelValue, CmdId, CmdResponse, CmdStatus, ConnectivityStatus,
    Device, DeviceClass,
};

/// Debounce interval for the post-set refresh.
const POST_SET_REFRESH: Duration = Duration::from_millis(1000);

/// Timeout for a pending rename request.
const RENAME_TIMEOUT: Duration = Duration::from_secs(10);

/// Pairing window requested by `permitJoin`, in seconds.
const PERMIT_JOIN_SECONDS: u32 = 120;

/// A host call or timer tick delivered to the adapter task.
#[derive(Debug)]
pub(crate) enum AdapterCommand {
    /// Apply the configuration and start connecting.
    Start,
    /// Tear everything down; acknowledged once released.
    Stop { done: oneshot::Sender<()> },
    /// The host changed the configuration record.
    ConfigUpdated(AdapterConfig),
    /// The host requests a full device sync.
    RequestFullSync,
    /// Write a channel value.
    UpdateChannelState {
        external_id: String,
        channel_id: String,
        value: ChannelValue,
        cmd_id: CmdId,
    },
    /// Rename a device.
    UpdateDeviceName {
        external_id: String,
        name: String,
        cmd_id: CmdId,
    },
    /// Invoke an adapter-level action.
    InvokeAction {
        action_id: String,
        params: Map<String, Value>,
        cmd_id: CmdId,
    },
    /// A timer fired.
    Timer(TimerEvent),
}

/// Timer ticks posted back into the command channel.
///
/// Every armed timer carries a generation; re-arming bumps the stored
/// generation so stale ticks are ignored, which implements both debounce
/// and cancellation without tracking timer handles.
#[derive(Debug)]
pub(crate) enum TimerEvent {
    Reconnect { generation: u64 },
    PostSetRefresh { mqtt_id: String, generation: u64 },
    RenameTimeout { external_id: String, generation: u64 },
}

/// A rename awaiting its response, keyed by external id.
#[derive(Debug)]
struct PendingRename {
    cmd_id: CmdId,
    target_name: String,
    #[allow(dead_code)] // Kept for diagnostics; timeouts are generation-driven.
    requested_at_ms: i64,
    generation: u64,
}

enum Input {
    Command(Option<AdapterCommand>),
    Transport(TransportEvent),
}

pub(crate) struct AdapterTask<T: Transport> {
    config: AdapterConfig,
    base_topic: String,
    retry_interval: Duration,
    transport: T,
    running: bool,
    mqtt_connected: bool,
    bridge_online: bool,
    connected: bool,
    last_seen_requested: bool,
    pending_full_sync: bool,
    registry: DeviceRegistry,
    pending_rename: HashMap<String, PendingRename>,
    pending_bridge_info: Option<Map<String, Value>>,
    post_set_generation: HashMap<String, u64>,
    reconnect_generation: u64,
    reconnect_armed: bool,
    next_generation: u64,
    events: EventBus,
    connected_tx: watch::Sender<bool>,
    snapshots: Arc<RwLock<HashMap<String, Device>>>,
    cmd_tx: mpsc::UnboundedSender<AdapterCommand>,
}

impl<T: Transport> AdapterTask<T> {
    pub(crate) fn new(
        config: AdapterConfig,
        transport: T,
        events: EventBus,
        connected_tx: watch::Sender<bool>,
        snapshots: Arc<RwLock<HashMap<String, Device>>>,
        cmd_tx: mpsc::UnboundedSender<AdapterCommand>,
    ) -> Self {
        let base_topic = config.base_topic();
        let retry_interval = config.retry_interval();
        Self {
            config,
            base_topic,
            retry_interval,
            transport,
            running: false,
            mqtt_connected: false,
            // The bridge is assumed online until bridge/state says otherwise,
            // so a fresh MQTT connection reports Connected right away.
            bridge_online: true,
            connected: false,
            last_seen_requested: false,
            pending_full_sync: false,
            registry: DeviceRegistry::new(),
            pending_rename: HashMap::new(),
            pending_bridge_info: None,
            post_set_generation: HashMap::new(),
            reconnect_generation: 0,
            reconnect_armed: false,
            next_generation: 0,
            events,
            connected_tx,
            snapshots,
            cmd_tx,
        }
    }

    /// Runs until the command channel closes (the handle was dropped).
    pub(crate) async fn run(mut self, mut cmd_rx: mpsc::UnboundedReceiver<AdapterCommand>) {
        loop {
            let input = tokio::select! {
                command = cmd_rx.recv() => Input::Command(command),
                event = self.transport.poll_event() => Input::Transport(event),
            };
            match input {
                Input::Command(None) => {
                    let _ = self.transport.disconnect().await;
                    break;
                }
                Input::Command(Some(command)) => self.handle_command(command).await,
                Input::Transport(event) => self.handle_transport_event(event).await,
            }
        }
    }

    async fn handle_command(&mut self, command: AdapterCommand) {
        match command {
            AdapterCommand::Start => self.start().await,
            AdapterCommand::Stop { done } => {
                self.stop().await;
                let _ = done.send(());
            }
            AdapterCommand::ConfigUpdated(config) => self.config_updated(config).await,
            AdapterCommand::RequestFullSync => self.request_full_sync().await,
            AdapterCommand::UpdateChannelState {
                external_id,
                channel_id,
                value,
                cmd_id,
            } => {
                self.update_channel_state(&external_id, &channel_id, value, cmd_id)
                    .await;
            }
            AdapterCommand::UpdateDeviceName {
                external_id,
                name,
                cmd_id,
            } => self.update_device_name(&external_id, &name, cmd_id).await,
            AdapterCommand::InvokeAction {
                action_id,
                params,
                cmd_id,
            } => self.invoke_action(&action_id, params, cmd_id).await,
            AdapterCommand::Timer(event) => self.handle_timer(event).await,
        }
    }

    // =========================================================================
    // Lifecycle
    // =========================================================================

    async fn start(&mut self) {
        self.running = true;
        self.pending_full_sync = false;
        self.apply_config();

        tracing::info!(
            id = %self.config.id,
            host = %self.config.host.trim(),
            port = self.config.effective_port(),
            base_topic = %self.base_topic,
            retry_interval_ms = self.retry_interval.as_millis() as u64,
            "Starting Z2M adapter"
        );

        if let Err(error) = self.config.validate() {
            tracing::warn!(error = %error, "Z2M adapter not configured; staying disconnected");
            self.events.publish(AdapterEvent::ErrorOccurred {
                message: error.to_string(),
            });
            return;
        }
        self.connect_to_broker().await;
    }

    async fn stop(&mut self) {
        self.stop_reconnect_timer();
        let _ = self.transport.disconnect().await;
        self.post_set_generation.clear();
        self.registry.clear_pending_payloads();
        self.running = false;
        self.mqtt_connected = false;
        self.update_connection_state();
        tracing::info!(id = %self.config.id, "Z2M adapter stopped");
    }

    async fn config_updated(&mut self, config: AdapterConfig) {
        let _ = self.transport.disconnect().await;
        self.mqtt_connected = false;
        self.update_connection_state();
        self.config = config;
        self.apply_config();
        self.connect_to_broker().await;
    }

    fn apply_config(&mut self) {
        self.base_topic = self.config.base_topic();
        self.retry_interval = self.config.retry_interval();

        let credentials = if self.config.user.trim().is_empty() {
            None
        } else {
            Some((
                self.config.user.trim().to_string(),
                self.config.password.clone(),
            ))
        };
        self.transport.apply_settings(TransportSettings {
            host: self.config.host.trim().to_string(),
            port: self.config.effective_port(),
            credentials,
            client_id: format!("z2m-bridge-{}", self.config.id),
            ..TransportSettings::default()
        });
    }

    async fn connect_to_broker(&mut self) {
        if !self.running || self.config.host.trim().is_empty() {
            return;
        }
        if let Err(error) = self.transport.connect().await {
            tracing::warn!(error = %error, "MQTT connect attempt failed");
            self.schedule_reconnect();
        }
    }

    // =========================================================================
    // Connection state machine
    // =========================================================================

    fn update_connection_state(&mut self) {
        let connected = self.mqtt_connected && self.bridge_online;
        if connected == self.connected {
            return;
        }
        self.connected = connected;
        if connected {
            self.stop_reconnect_timer();
        }
        self.connected_tx.send_replace(connected);
        self.events
            .publish(AdapterEvent::ConnectionStateChanged { connected });
    }

    fn schedule_reconnect(&mut self) {
        if !self.running || self.reconnect_armed {
            return;
        }
        self.reconnect_armed = true;
        let generation = self.next_gen();
        self.reconnect_generation = generation;
        self.spawn_timer(self.retry_interval, TimerEvent::Reconnect { generation });
        tracing::debug!(
            interval_ms = self.retry_interval.as_millis() as u64,
            "Reconnect scheduled"
        );
    }

    fn stop_reconnect_timer(&mut self) {
        self.reconnect_armed = false;
        // Invalidate any tick already in flight.
        self.reconnect_generation = self.next_gen();
    }

    async fn handle_transport_event(&mut self, event: TransportEvent) {
        if !self.running {
            return;
        }
        match event {
            TransportEvent::Connected => {
                tracing::info!("Z2M MQTT connected, subscribing");
                self.mqtt_connected = true;
                self.stop_reconnect_timer();
                self.update_connection_state();
                let filter = format!("{}/#", self.base_topic);
                if let Err(error) = self.transport.subscribe(&filter).await {
                    tracing::warn!(error = %error, filter = %filter, "MQTT subscribe failed");
                }
                self.publish_json(&format!("{}/bridge/request/info", self.base_topic), &json!({}))
                    .await;
            }
            TransportEvent::Disconnected => {
                self.mqtt_connected = false;
                self.update_connection_state();
                self.schedule_reconnect();
            }
            TransportEvent::Message { topic, payload } => {
                self.handle_message(&topic, &payload).await;
            }
        }
    }

    async fn handle_timer(&mut self, event: TimerEvent) {
        match event {
            TimerEvent::Reconnect { generation } => {
                if generation != self.reconnect_generation || !self.running {
                    return;
                }
                self.reconnect_armed = false;
                if self.mqtt_connected {
                    return;
                }
                self.connect_to_broker().await;
                // If the attempt dies later, the disconnect event re-arms us.
                if !self.mqtt_connected {
                    self.schedule_reconnect();
                }
            }
            TimerEvent::PostSetRefresh {
                mqtt_id,
                generation,
            } => {
                if self.post_set_generation.get(&mqtt_id) != Some(&generation) {
                    return;
                }
                self.post_set_generation.remove(&mqtt_id);
                if !self.mqtt_connected {
                    return;
                }
                let topic = format!("{}/{}/get", self.base_topic, mqtt_id);
                match self.transport.publish(&topic, b"{}".to_vec()).await {
                    Ok(()) => tracing::info!(device = %mqtt_id, "Post-set refresh requested"),
                    Err(error) => {
                        tracing::warn!(device = %mqtt_id, error = %error, "Post-set refresh publish failed");
                    }
                }
            }
            TimerEvent::RenameTimeout {
                external_id,
                generation,
            } => {
                let matches = self
                    .pending_rename
                    .get(&external_id)
                    .is_some_and(|pending| pending.generation == generation);
                if !matches {
                    return;
                }
                if let Some(pending) = self.pending_rename.remove(&external_id) {
                    self.emit_cmd(CmdResponse::failed(
                        pending.cmd_id,
                        CmdStatus::Failure,
                        "Rename timeout",
                        now_ms(),
                    ));
                }
            }
        }
    }

    // =========================================================================
    // Host methods
    // =========================================================================

    async fn request_full_sync(&mut self) {
        self.pending_full_sync = true;
        tracing::info!("Full sync requested");
        if self.mqtt_connected {
            self.publish_json(
                &format!("{}/bridge/request/devices", self.base_topic),
                &json!({}),
            )
            .await;
        }
        let entries: Vec<(Device, Vec<crate::types::Channel>)> = self
            .registry
            .entries()
            .map(|entry| (entry.device.clone(), entry.channels.clone()))
            .collect();
        for (device, channels) in entries {
            self.events
                .publish(AdapterEvent::DeviceUpdated { device, channels });
        }
    }

    async fn update_channel_state(
        &mut self,
        external_id: &str,
        channel_id: &str,
        value: ChannelValue,
        cmd_id: CmdId,
    ) {
        let ts_ms = now_ms();
        let mqtt_id = self.registry.resolve_mqtt_id(external_id);

        let Some(entry) = self.registry.entry(&mqtt_id) else {
            self.emit_cmd(CmdResponse::failed(
                cmd_id,
                CmdStatus::NotSupported,
                "Unknown device",
                ts_ms,
            ));
            return;
        };
        let Some(binding) = entry.bindings_by_channel.get(channel_id).cloned() else {
            self.emit_cmd(CmdResponse::failed(
                cmd_id,
                CmdStatus::NotSupported,
                "Unknown channel",
                ts_ms,
            ));
            return;
        };
        if !binding.flags.writable {
            self.emit_cmd(CmdResponse::failed(
                cmd_id,
                CmdStatus::NotSupported,
                "Channel is read-only",
                ts_ms,
            ));
            return;
        }
        if !self.connected {
            self.emit_cmd(CmdResponse::failed(
                cmd_id,
                CmdStatus::TemporarilyOffline,
                "MQTT broker not connected",
                ts_ms,
            ));
            return;
        }

        let wire_value = match codec::encode_command(&binding, &value) {
            Ok(wire_value) => wire_value,
            Err(error) => {
                self.emit_cmd(CmdResponse::failed(
                    cmd_id,
                    CmdStatus::InvalidArgument,
                    error.to_string(),
                    ts_ms,
                ));
                return;
            }
        };

        let topic = match &binding.endpoint {
            Some(endpoint) => format!("{}/{}/{}/set", self.base_topic, mqtt_id, endpoint),
            None => format!("{}/{}/set", self.base_topic, mqtt_id),
        };
        let mut payload = Map::new();
        payload.insert(binding.property.clone(), wire_value);
        let body = serde_json::to_vec(&Value::Object(payload)).unwrap_or_default();

        if let Err(error) = self.transport.publish(&topic, body).await {
            tracing::warn!(topic = %topic, error = %error, "Command publish failed");
            self.emit_cmd(CmdResponse::failed(
                cmd_id,
                CmdStatus::Failure,
                "MQTT publish failed",
                ts_ms,
            ));
            return;
        }

        // Debounced read-back so the authoritative state arrives over MQTT.
        let generation = self.next_gen();
        self.post_set_generation.insert(mqtt_id.clone(), generation);
        self.spawn_timer(
            POST_SET_REFRESH,
            TimerEvent::PostSetRefresh {
                mqtt_id,
                generation,
            },
        );

        self.emit_cmd(CmdResponse::success(cmd_id, ts_ms));
    }

    async fn update_device_name(&mut self, external_id: &str, name: &str, cmd_id: CmdId) {
        let ts_ms = now_ms();
        let trimmed = name.trim().to_string();
        if trimmed.is_empty() {
            self.emit_cmd(CmdResponse::failed(
                cmd_id,
                CmdStatus::InvalidArgument,
                "Name must not be empty",
                ts_ms,
            ));
            return;
        }
        if external_id.is_empty() {
            self.emit_cmd(CmdResponse::failed(
                cmd_id,
                CmdStatus::NotSupported,
                "Unknown device",
                ts_ms,
            ));
            return;
        }
        if self.pending_rename.contains_key(external_id) {
            self.emit_cmd(CmdResponse::failed(
                cmd_id,
                CmdStatus::TemporarilyOffline,
                "Rename already pending",
                ts_ms,
            ));
            return;
        }
        if !self.connected {
            self.emit_cmd(CmdResponse::failed(
                cmd_id,
                CmdStatus::TemporarilyOffline,
                "MQTT broker not connected",
                ts_ms,
            ));
            return;
        }

        let mqtt_id = self.registry.resolve_mqtt_id(external_id);
        let topic = format!("{}/bridge/request/device/rename", self.base_topic);
        let payload = json!({ "from": mqtt_id, "to": trimmed });
        let body = serde_json::to_vec(&payload).unwrap_or_default();
        if let Err(error) = self.transport.publish(&topic, body).await {
            tracing::warn!(error = %error, "Rename publish failed");
            self.emit_cmd(CmdResponse::failed(
                cmd_id,
                CmdStatus::Failure,
                "MQTT publish failed",
                ts_ms,
            ));
            return;
        }

        let generation = self.next_gen();
        self.pending_rename.insert(
            external_id.to_string(),
            PendingRename {
                cmd_id,
                target_name: trimmed,
                requested_at_ms: ts_ms,
                generation,
            },
        );
        self.spawn_timer(
            RENAME_TIMEOUT,
            TimerEvent::RenameTimeout {
                external_id: external_id.to_string(),
                generation,
            },
        );
    }

    async fn invoke_action(&mut self, action_id: &str, params: Map<String, Value>, cmd_id: CmdId) {
        let ts_ms = now_ms();

        if action_id == "settings" {
            for (key, value) in &params {
                self.config.meta.insert(key.clone(), value.clone());
            }
            self.events
                .publish(AdapterEvent::AdapterMetaUpdated { patch: params });
            self.emit_action(ActionResponse {
                id: cmd_id,
                status: CmdStatus::Success,
                error: None,
                ts_ms,
            });
            return;
        }

        if action_id != "permitJoin" && action_id != "restartZ2M" {
            self.emit_action(ActionResponse {
                id: cmd_id,
                status: CmdStatus::NotImplemented,
                error: Some(format!("Unknown action: {action_id}")),
                ts_ms,
            });
            return;
        }

        if !self.mqtt_connected {
            self.emit_action(ActionResponse {
                id: cmd_id,
                status: CmdStatus::Failure,
                error: Some("MQTT client not connected".to_string()),
                ts_ms,
            });
            return;
        }
        if !self.bridge_online {
            self.emit_action(ActionResponse {
                id: cmd_id,
                status: CmdStatus::Failure,
                error: Some("Z2M bridge is offline".to_string()),
                ts_ms,
            });
            return;
        }

        let (topic, payload) = if action_id == "restartZ2M" {
            (format!("{}/bridge/request/restart", self.base_topic), json!({}))
        } else {
            (
                format!("{}/bridge/request/permit_join", self.base_topic),
                json!({ "value": true, "time": PERMIT_JOIN_SECONDS }),
            )
        };
        let body = serde_json::to_vec(&payload).unwrap_or_default();
        if let Err(error) = self.transport.publish(&topic, body).await {
            tracing::warn!(topic = %topic, error = %error, "Action publish failed");
            self.emit_action(ActionResponse {
                id: cmd_id,
                status: CmdStatus::Failure,
                error: Some("MQTT publish failed".to_string()),
                ts_ms,
            });
            return;
        }
        self.emit_action(ActionResponse {
            id: cmd_id,
            status: CmdStatus::Success,
            error: None,
            ts_ms,
        });
    }

    // =========================================================================
    // Message ingest
    // =========================================================================

    async fn handle_message(&mut self, topic: &str, payload: &[u8]) {
        let base_topic = self.base_topic.clone();
        let Some(suffix) = router::strip_base(topic, &base_topic) else {
            return;
        };
        let suffix = suffix.to_string();
        let ts_ms = now_ms();

        match router::classify(&suffix) {
            TopicRoute::BridgeState => self.handle_bridge_state(payload).await,
            TopicRoute::BridgeHealth => {
                let Some(obj) = parse_object(payload, &suffix) else {
                    return;
                };
                let mut patch = Map::new();
                patch.insert("health".to_string(), Value::Object(obj));
                self.events.publish(AdapterEvent::AdapterMetaUpdated { patch });
            }
            TopicRoute::BridgeInfo => {
                let Some(obj) = parse_object(payload, &suffix) else {
                    return;
                };
                self.handle_bridge_info(obj, ts_ms);
            }
            TopicRoute::BridgeDevices { full_snapshot } => {
                let Ok(value) = serde_json::from_slice::<Value>(payload) else {
                    tracing::warn!(topic = %suffix, "Failed to parse bridge/devices payload");
                    return;
                };
                let Some(devices) = devices_array_from_payload(&value) else {
                    tracing::warn!(topic = %suffix, "bridge/devices payload has no device array");
                    return;
                };
                self.handle_bridge_devices(&devices, full_snapshot, ts_ms);
            }
            TopicRoute::BridgeRenameResponse => {
                let Some(obj) = parse_object(payload, &suffix) else {
                    return;
                };
                self.handle_rename_response(&obj, ts_ms);
            }
            TopicRoute::BridgeDeviceGetResponse => {
                let Some(obj) = parse_object(payload, &suffix) else {
                    return;
                };
                self.handle_device_get_response(&obj, ts_ms);
            }
            TopicRoute::BridgeOptionsResponse => {
                let Some(obj) = parse_object(payload, &suffix) else {
                    return;
                };
                let status = obj
                    .get("status")
                    .and_then(Value::as_str)
                    .map(|status| status.trim().to_lowercase())
                    .filter(|status| !status.is_empty())
                    .unwrap_or_else(|| "unknown".to_string());
                let restart_required = obj
                    .get("restart_required")
                    .and_then(Value::as_bool)
                    .unwrap_or(false);
                tracing::info!(status = %status, restart_required, "Z2M options response");
            }
            TopicRoute::BridgeOther | TopicRoute::GetSetEcho | TopicRoute::Nested => {
                tracing::trace!(topic = %suffix, "Ignoring topic");
            }
            TopicRoute::Availability { mqtt_id } => {
                let mqtt_id = mqtt_id.to_string();
                let text = String::from_utf8_lossy(payload).trim().to_string();
                let state = if text.starts_with('{') {
                    serde_json::from_str::<Value>(&text)
                        .ok()
                        .as_ref()
                        .and_then(|value| value.get("state"))
                        .and_then(Value::as_str)
                        .map_or_else(|| text.clone(), ToString::to_string)
                } else {
                    text
                };
                self.handle_availability(&mqtt_id, &state, ts_ms);
            }
            TopicRoute::DeviceState { mqtt_id } => {
                let mqtt_id = mqtt_id.to_string();
                match serde_json::from_slice::<Value>(payload) {
                    Ok(Value::Object(obj)) => self.handle_device_state(&mqtt_id, obj, ts_ms),
                    _ => {
                        tracing::debug!(device = %mqtt_id, "Ignoring non-object state payload");
                    }
                }
            }
        }
    }

    async fn handle_bridge_state(&mut self, payload: &[u8]) {
        let Some(online) = bridge_state_from_payload(payload) else {
            tracing::warn!("Unrecognised bridge/state payload");
            return;
        };
        tracing::info!(online, "Z2M bridge state changed");
        self.bridge_online = online;
        self.update_connection_state();
        if online && !self.last_seen_requested {
            // Ask Z2M for numeric last_seen so staleness checks work.
            self.publish_json(
                &format!("{}/bridge/request/options", self.base_topic),
                &json!({ "options": { "advanced": { "last_seen": "epoch" } } }),
            )
            .await;
            self.last_seen_requested = true;
        }
    }

    fn handle_bridge_devices(&mut self, devices: &[Value], full_snapshot: bool, ts_ms: i64) {
        tracing::info!(count = devices.len(), full_snapshot, "bridge/devices payload");
        let mut seen: HashSet<String> = HashSet::new();

        for value in devices {
            let Some(obj) = value.as_object() else {
                continue;
            };
            let friendly_name = obj
                .get("friendly_name")
                .and_then(Value::as_str)
                .map(str::trim)
                .unwrap_or_default()
                .to_string();
            if friendly_name.is_empty() {
                continue;
            }
            let ieee_address = obj
                .get("ieee_address")
                .and_then(Value::as_str)
                .map(str::trim)
                .unwrap_or_default()
                .to_string();
            let interview_completed = obj
                .get("interview_completed")
                .and_then(Value::as_bool)
                .unwrap_or(true);
            let supported = obj.get("supported").and_then(Value::as_bool).unwrap_or(true);
            if !interview_completed || !supported {
                if let Some(external_id) =
                    self.registry.remove_unsupported(&friendly_name, &ieee_address)
                {
                    self.snapshots.write().remove(&external_id);
                    self.events
                        .publish(AdapterEvent::DeviceRemoved { external_id });
                }
                continue;
            }

            seen.insert(friendly_name.clone());
            let Some(outcome) = self.registry.upsert_from_object(obj) else {
                continue;
            };

            // A rename may complete through the next devices payload rather
            // than its response topic.
            if !ieee_address.is_empty() {
                let completed = self
                    .pending_rename
                    .get(&ieee_address)
                    .is_some_and(|pending| pending.target_name == outcome.mqtt_id);
                if completed {
                    if let Some(pending) = self.pending_rename.remove(&ieee_address) {
                        self.emit_cmd(CmdResponse::success(pending.cmd_id, now_ms()));
                    }
                }
            }

            self.emit_device_updated(&outcome.mqtt_id);

            if let Some(payload) = self.registry.take_pending_payload(&outcome.mqtt_id) {
                self.handle_device_state(&outcome.mqtt_id, payload, now_ms());
            }

            self.emit_initial_availability(obj, &outcome.mqtt_id, ts_ms);

            if outcome.is_coordinator {
                if let Some(info) = self.pending_bridge_info.take() {
                    self.handle_bridge_info(info, now_ms());
                }
            }
        }

        if full_snapshot {
            for external_id in self.registry.prune_not_seen(&seen) {
                self.snapshots.write().remove(&external_id);
                self.events
                    .publish(AdapterEvent::DeviceRemoved { external_id });
            }
        }

        if self.pending_full_sync {
            tracing::info!("Full sync completed");
            self.events.publish(AdapterEvent::FullSyncCompleted);
            self.pending_full_sync = false;
        }
    }

    /// Emits the connectivity derived from a `bridge/devices` entry:
    /// explicit availability wins, else `last_seen` age, else nothing.
    fn emit_initial_availability(&mut self, obj: &Map<String, Value>, mqtt_id: &str, ts_ms: i64) {
        let mut availability = obj
            .get("availability")
            .and_then(registry::availability_from_value)
            .unwrap_or_default();
        if availability.is_empty() {
            availability = obj
                .get("availability_state")
                .and_then(Value::as_str)
                .map(str::trim)
                .unwrap_or_default()
                .to_string();
        }
        let last_seen = obj.get("last_seen").and_then(registry::last_seen_ms);

        let status = if availability.is_empty() {
            match last_seen {
                Some(seen_ms) if seen_ms > 0 => {
                    if now_ms() - seen_ms > STALE_THRESHOLD_MS {
                        ConnectivityStatus::Disconnected
                    } else {
                        ConnectivityStatus::Connected
                    }
                }
                _ => return,
            }
        } else {
            match availability.to_lowercase().as_str() {
                "online" => ConnectivityStatus::Connected,
                "offline" => ConnectivityStatus::Disconnected,
                _ => ConnectivityStatus::Unknown,
            }
        };

        let Some(entry) = self.registry.entry(mqtt_id) else {
            return;
        };
        let external_id = entry.device.id.clone();
        let Some(binding) = entry.availability_binding() else {
            return;
        };
        let channel_id = binding.channel_id.clone();
        self.emit_channel(&external_id, &channel_id, ChannelValue::Int(status.code()), ts_ms);
    }

    #[allow(clippy::too_many_lines)]
    fn handle_device_state(&mut self, mqtt_id: &str, payload: Map<String, Value>, ts_ms: i64) {
        if self.registry.entry(mqtt_id).is_none() {
            // Definition not seen yet; replayed once bridge/devices arrives.
            self.registry.buffer_state_payload(mqtt_id, payload);
            return;
        }

        let mut meta_changed = false;
        let mut connectivity: Option<ConnectivityStatus> = None;

        if let Some(entry) = self.registry.entry_mut(mqtt_id) {
            if let Some(update) = payload.get("update").filter(|value| value.is_object()) {
                entry.device.meta.insert("update".to_string(), update.clone());
                meta_changed = true;
            }
            if let Some(last_seen_value) = payload.get("last_seen") {
                entry
                    .device
                    .meta
                    .insert("last_seen".to_string(), last_seen_value.clone());
                meta_changed = true;
                if let Some(seen_ms) = registry::last_seen_ms(last_seen_value) {
                    connectivity = Some(if ts_ms - seen_ms > STALE_THRESHOLD_MS {
                        ConnectivityStatus::Disconnected
                    } else {
                        ConnectivityStatus::Connected
                    });
                }
            }
        }
        if let Some(availability_value) = payload.get("availability") {
            if let Some(state) = registry::availability_from_value(availability_value) {
                match state.to_lowercase().as_str() {
                    "online" => connectivity = Some(ConnectivityStatus::Connected),
                    "offline" => connectivity = Some(ConnectivityStatus::Disconnected),
                    _ => {}
                }
            }
        }
        // Any other non-empty state payload proves the device talks to us.
        if connectivity.is_none() && !payload.is_empty() {
            connectivity = Some(ConnectivityStatus::Connected);
        }

        let Some(entry) = self.registry.entry(mqtt_id).cloned() else {
            return;
        };
        let external_id = entry.device.id.clone();

        if meta_changed {
            self.snapshots
                .write()
                .insert(external_id.clone(), entry.device.clone());
            self.events.publish(AdapterEvent::DeviceUpdated {
                device: entry.device.clone(),
                channels: entry.channels.clone(),
            });
        }

        if let Some(status) = connectivity {
            if let Some(binding) = entry.availability_binding() {
                self.emit_channel(
                    &external_id,
                    &binding.channel_id,
                    ChannelValue::Int(status.code()),
                    ts_ms,
                );
            }
        }

        // Channels in compilation order keeps the event order deterministic.
        for channel in &entry.channels {
            let Some(binding) = entry.bindings_by_channel.get(&channel.id) else {
                continue;
            };
            if binding.is_availability {
                continue;
            }
            if binding.kind == ChannelKind::DeviceSoftwareUpdate {
                if let Some(update_obj) = payload.get("update").and_then(Value::as_object) {
                    let update_payload = firmware_update_payload(update_obj);
                    if !update_payload.is_empty() {
                        self.emit_channel(
                            &external_id,
                            &binding.channel_id,
                            ChannelValue::Json(Value::Object(update_payload)),
                            ts_ms,
                        );
                    }
                }
                continue;
            }
            let Some(raw) = payload.get(&binding.property) else {
                continue;
            };
            let Some(value) = codec::decode_property(binding, raw) else {
                continue;
            };
            self.emit_channel(&external_id, &binding.channel_id, value, ts_ms);
        }
    }

    fn handle_availability(&mut self, mqtt_id: &str, state: &str, ts_ms: i64) {
        let Some(entry) = self.registry.entry(mqtt_id) else {
            return;
        };
        let external_id = entry.device.id.clone();
        let Some(binding) = entry.availability_binding() else {
            return;
        };
        let channel_id = binding.channel_id.clone();
        let status = match state.trim().to_lowercase().as_str() {
            "online" => ConnectivityStatus::Connected,
            "offline" => ConnectivityStatus::Disconnected,
            _ => ConnectivityStatus::Unknown,
        };
        self.emit_channel(&external_id, &channel_id, ChannelValue::Int(status.code()), ts_ms);
    }

    fn handle_rename_response(&mut self, obj: &Map<String, Value>, ts_ms: i64) {
        let status = obj
            .get("status")
            .and_then(Value::as_str)
            .map(|status| status.trim().to_lowercase())
            .unwrap_or_default();
        if status != "ok" {
            return;
        }
        let data = obj.get("data").and_then(Value::as_object);
        let from = data
            .and_then(|data| data.get("from"))
            .and_then(Value::as_str)
            .map(str::trim)
            .unwrap_or_default()
            .to_string();
        let to = data
            .and_then(|data| data.get("to"))
            .and_then(Value::as_str)
            .map(str::trim)
            .unwrap_or_default()
            .to_string();

        let matched: Vec<String> = self
            .pending_rename
            .iter()
            .filter(|(external_id, pending)| {
                let current_mqtt = self.registry.mqtt_for_external(external_id);
                (!to.is_empty() && pending.target_name == to)
                    || (!from.is_empty() && current_mqtt == Some(from.as_str()))
            })
            .map(|(external_id, _)| external_id.clone())
            .collect();

        for external_id in matched {
            let Some(pending) = self.pending_rename.remove(&external_id) else {
                continue;
            };
            self.emit_cmd(CmdResponse::success(pending.cmd_id, now_ms()));

            // The device answered its rename, so it is demonstrably alive.
            let mqtt_id = if to.is_empty() {
                self.registry.resolve_mqtt_id(&external_id)
            } else {
                to.clone()
            };
            if let Some(entry) = self.registry.entry(&mqtt_id) {
                let device_external = entry.device.id.clone();
                if let Some(binding) = entry.availability_binding() {
                    let channel_id = binding.channel_id.clone();
                    self.emit_channel(
                        &device_external,
                        &channel_id,
                        ChannelValue::Int(ConnectivityStatus::Connected.code()),
                        ts_ms,
                    );
                }
            }
        }
    }

    fn handle_device_get_response(&mut self, obj: &Map<String, Value>, _ts_ms: i64) {
        let data = obj.get("data").and_then(Value::as_object).unwrap_or(obj);
        let ieee = data
            .get("ieee_address")
            .and_then(Value::as_str)
            .map(str::trim)
            .unwrap_or_default();
        let friendly = data
            .get("friendly_name")
            .and_then(Value::as_str)
            .map(str::trim)
            .unwrap_or_default();
        if ieee.is_empty() {
            return;
        }
        let Some(pending) = self.pending_rename.remove(ieee) else {
            return;
        };
        if !friendly.is_empty() && friendly == pending.target_name {
            self.emit_cmd(CmdResponse::success(pending.cmd_id, now_ms()));
        } else {
            self.emit_cmd(CmdResponse::failed(
                pending.cmd_id,
                CmdStatus::Failure,
                "Rename not applied",
                now_ms(),
            ));
        }
    }

    #[allow(clippy::too_many_lines)]
    fn handle_bridge_info(&mut self, payload: Map<String, Value>, ts_ms: i64) {
        let Some(coordinator_id) = self.registry.coordinator_id().map(ToString::to_string) else {
            self.pending_bridge_info = Some(payload);
            return;
        };
        let coordinator_mqtt = self.registry.resolve_mqtt_id(&coordinator_id);
        if self.registry.entry(&coordinator_mqtt).is_none() {
            self.pending_bridge_info = Some(payload);
            return;
        }

        let coordinator = payload
            .get("coordinator")
            .and_then(Value::as_object)
            .cloned()
            .unwrap_or_default();
        let coordinator_meta = coordinator
            .get("meta")
            .and_then(Value::as_object)
            .cloned()
            .unwrap_or_default();

        if let Some(entry) = self.registry.entry_mut(&coordinator_mqtt) {
            if let Some(manufacturer) = non_empty_string(coordinator_meta.get("manufacturer")) {
                entry.device.manufacturer = manufacturer;
            }
            if let Some(model) = non_empty_string(coordinator_meta.get("model")) {
                entry.device.model = model;
            }
            let firmware = non_empty_string(coordinator_meta.get("revision"))
                .or_else(|| non_empty_string(coordinator_meta.get("firmware")))
                .or_else(|| non_empty_string(coordinator_meta.get("version")));
            if let Some(firmware) = firmware {
                entry.device.firmware = firmware;
            }
            entry.device.class = DeviceClass::Gateway;
            entry
                .device
                .meta
                .insert("coordinator".to_string(), Value::Object(coordinator.clone()));
            if let Some(serial) = payload
                .get("config")
                .and_then(Value::as_object)
                .and_then(|config| config.get("serial"))
                .and_then(Value::as_object)
            {
                if let Some(port) = non_empty_string(serial.get("port")) {
                    entry
                        .device
                        .meta
                        .insert("serial_port".to_string(), Value::String(port));
                }
                if let Some(adapter) = non_empty_string(serial.get("adapter")) {
                    entry
                        .device
                        .meta
                        .insert("serial_adapter".to_string(), Value::String(adapter));
                }
            }
        }

        self.emit_device_updated(&coordinator_mqtt);

        let mut patch = Map::new();
        patch.insert("bridge_info".to_string(), Value::Object(payload.clone()));
        if let Some(version) = non_empty_string(payload.get("version")) {
            patch.insert("z2m_version".to_string(), Value::String(version));
        }
        if let Some(commit) = non_empty_string(payload.get("commit")) {
            patch.insert("z2m_commit".to_string(), Value::String(commit));
        }
        for key in ["permit_join", "log_level"] {
            if let Some(value) = payload.get(key) {
                patch.insert(key.to_string(), value.clone());
            }
        }
        self.events.publish(AdapterEvent::AdapterMetaUpdated { patch });

        if self.mqtt_connected && self.bridge_online {
            if let Some(entry) = self.registry.entry(&coordinator_mqtt) {
                let external_id = entry.device.id.clone();
                if let Some(binding) = entry.availability_binding() {
                    let channel_id = binding.channel_id.clone();
                    self.emit_channel(
                        &external_id,
                        &channel_id,
                        ChannelValue::Int(ConnectivityStatus::Connected.code()),
                        ts_ms,
                    );
                }
            }
        }

        if let Some(update_obj) = payload.get("update").and_then(Value::as_object) {
            let mut update_payload = Map::new();
            if let Some(status) = non_empty_string(update_obj.get("state")) {
                update_payload.insert("status".to_string(), Value::String(status));
            }
            if let Some(version) = non_empty_string(update_obj.get("version")) {
                update_payload.insert("targetVersion".to_string(), Value::String(version));
            }
            if !update_payload.is_empty() {
                let channel = self
                    .registry
                    .entry(&coordinator_mqtt)
                    .and_then(|entry| {
                        entry
                            .bindings_by_channel
                            .get("device_software_update")
                            .map(|binding| (entry.device.id.clone(), binding.channel_id.clone()))
                    });
                if let Some((external_id, channel_id)) = channel {
                    self.emit_channel(
                        &external_id,
                        &channel_id,
                        ChannelValue::Json(Value::Object(update_payload)),
                        ts_ms,
                    );
                }
            }
        }
    }

    // =========================================================================
    // Helpers
    // =========================================================================

    fn emit_device_updated(&mut self, mqtt_id: &str) {
        let Some(entry) = self.registry.entry(mqtt_id) else {
            return;
        };
        let device = entry.device.clone();
        let channels = entry.channels.clone();
        self.snapshots
            .write()
            .insert(device.id.clone(), device.clone());
        self.events
            .publish(AdapterEvent::DeviceUpdated { device, channels });
    }

    fn emit_channel(&self, external_id: &str, channel_id: &str, value: ChannelValue, ts_ms: i64) {
        tracing::debug!(
            device = %external_id,
            channel = %channel_id,
            value = ?value,
            "Channel update"
        );
        self.events.publish(AdapterEvent::ChannelStateUpdated {
            external_id: external_id.to_string(),
            channel_id: channel_id.to_string(),
            value,
            ts_ms,
        });
    }

    fn emit_cmd(&self, response: CmdResponse) {
        self.events.publish(AdapterEvent::CmdResult(response));
    }

    fn emit_action(&self, response: ActionResponse) {
        self.events.publish(AdapterEvent::ActionResult(response));
    }

    async fn publish_json(&mut self, topic: &str, payload: &Value) {
        let body = serde_json::to_vec(payload).unwrap_or_default();
        if let Err(error) = self.transport.publish(topic, body).await {
            tracing::warn!(topic = %topic, error = %error, "MQTT publish failed");
        }
    }

    fn spawn_timer(&self, delay: Duration, event: TimerEvent) {
        let tx = self.cmd_tx.clone();
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            let _ = tx.send(AdapterCommand::Timer(event));
        });
    }

    fn next_gen(&mut self) -> u64 {
        self.next_generation += 1;
        self.next_generation
    }
}

/// Current wall-clock time in milliseconds since the epoch.
fn now_ms() -> i64 {
    chrono::Utc::now().timestamp_millis()
}

/// Parses a `bridge/state` payload: plain `online`/`offline` text or the
/// JSON `{"state": ...}` form.
fn bridge_state_from_payload(payload: &[u8]) -> Option<bool> {
    let text = String::from_utf8_lossy(payload).trim().to_lowercase();
    let state = if text.starts_with('{') {
        serde_json::from_str::<Value>(&text)
            .ok()?
            .get("state")?
            .as_str()?
            .trim()
            .to_lowercase()
    } else {
        text
    };
    match state.as_str() {
        "online" => Some(true),
        "offline" => Some(false),
        _ => None,
    }
}

/// Extracts the device array from a `bridge/devices` payload.
///
/// Accepts a bare array, the documented `{"data": [...]}` response wrapper,
/// and the defensive `{"status": "ok", "result": [...]}` shape.
fn devices_array_from_payload(value: &Value) -> Option<Vec<Value>> {
    if let Some(devices) = value.as_array() {
        if devices.is_empty() {
            return None;
        }
        return Some(devices.clone());
    }
    let obj = value.as_object()?;
    if let Some(data) = obj.get("data").and_then(Value::as_array) {
        if !data.is_empty() {
            return Some(data.clone());
        }
    }
    let status_ok = obj
        .get("status")
        .and_then(Value::as_str)
        .is_some_and(|status| status.trim().eq_ignore_ascii_case("ok"));
    if status_ok {
        if let Some(result) = obj.get("result").and_then(Value::as_array) {
            if !result.is_empty() {
                return Some(result.clone());
            }
        }
    }
    None
}

/// Builds the payload emitted on the `device_software_update` channel from a
/// Z2M `update` object.
fn firmware_update_payload(update_obj: &Map<String, Value>) -> Map<String, Value> {
    let mut out = Map::new();
    if let Some(status) = non_empty_string(update_obj.get("state")) {
        out.insert("status".to_string(), Value::String(status));
    }
    if let Some(current) = version_string(update_obj.get("installed_version")) {
        out.insert("currentVersion".to_string(), Value::String(current));
    }
    if let Some(target) = version_string(update_obj.get("latest_version")) {
        out.insert("targetVersion".to_string(), Value::String(target));
    }
    out
}

/// Formats a version value: numbers become their integer form, strings pass
/// through.
fn version_string(value: Option<&Value>) -> Option<String> {
    match value? {
        Value::Number(number) => {
            let raw = number.as_f64()?;
            // Z2M firmware versions are integral build numbers.
            #[allow(clippy::cast_possible_truncation)]
            let build = raw.round() as i64;
            Some(build.to_string())
        }
        Value::String(text) => {
            let trimmed = text.trim();
            (!trimmed.is_empty()).then(|| trimmed.to_string())
        }
        _ => None,
    }
}

fn non_empty_string(value: Option<&Value>) -> Option<String> {
    let trimmed = value?.as_str()?.trim();
    (!trimmed.is_empty()).then(|| trimmed.to_string())
}

fn parse_object(payload: &[u8], topic: &str) -> Option<Map<String, Value>> {
    match serde_json::from_slice::<Value>(payload) {
        Ok(Value::Object(obj)) => Some(obj),
        _ => {
            tracing::warn!(topic = %topic, "Failed to parse payload as JSON object");
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bridge_state_plain_text() {
        assert_eq!(bridge_state_from_payload(b"online"), Some(true));
        assert_eq!(bridge_state_from_payload(b"offline"), Some(false));
        assert_eq!(bridge_state_from_payload(b"  Online  "), Some(true));
        assert_eq!(bridge_state_from_payload(b"weird"), None);
    }

    #[test]
    fn bridge_state_json_form() {
        assert_eq!(
            bridge_state_from_payload(br#"{"state":"online"}"#),
            Some(true)
        );
        assert_eq!(
            bridge_state_from_payload(br#"{"state":"offline"}"#),
            Some(false)
        );
        assert_eq!(bridge_state_from_payload(br"{}"), None);
    }

    #[test]
    fn devices_array_shapes() {
        let bare = json!([{"friendly_name": "a"}]);
        assert_eq!(devices_array_from_payload(&bare).unwrap().len(), 1);

        let data = json!({"data": [{"friendly_name": "a"}, {"friendly_name": "b"}]});
        assert_eq!(devices_array_from_payload(&data).unwrap().len(), 2);

        let result = json!({"status": "ok", "result": [{"friendly_name": "a"}]});
        assert_eq!(devices_array_from_payload(&result).unwrap().len(), 1);

        // Result array without the ok status is not accepted.
        let bad = json!({"status": "error", "result": [{"friendly_name": "a"}]});
        assert!(devices_array_from_payload(&bad).is_none());

        assert!(devices_array_from_payload(&json!([])).is_none());
        assert!(devices_array_from_payload(&json!({"data": {}})).is_none());
    }

    #[test]
    fn firmware_update_payload_shapes() {
        let update = json!({
            "state": "available",
            "installed_version": 16_777_224.0,
            "latest_version": 16_777_225
        });
        let payload = firmware_update_payload(update.as_object().unwrap());
        assert_eq!(
            payload.get("status").and_then(Value::as_str),
            Some("available")
        );
        assert_eq!(
            payload.get("currentVersion").and_then(Value::as_str),
            Some("16777224")
        );
        assert_eq!(
            payload.get("targetVersion").and_then(Value::as_str),
            Some("16777225")
        );
    }

    #[test]
    fn firmware_update_payload_skips_missing_fields() {
        let update = json!({"state": "idle"});
        let payload = firmware_update_payload(update.as_object().unwrap());
        assert_eq!(payload.len(), 1);
        assert!(payload.contains_key("status"));
    }

    #[test]
    fn version_string_forms() {
        assert_eq!(version_string(Some(&json!(123))), Some("123".to_string()));
        assert_eq!(
            version_string(Some(&json!("1.2.3"))),
            Some("1.2.3".to_string())
        );
        assert_eq!(version_string(Some(&json!(""))), None);
        assert_eq!(version_string(Some(&json!(null))), None);
        assert_eq!(version_string(None), None);
    }
}
