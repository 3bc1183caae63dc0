// SPDX-License-Identifier: MPL-2.0
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! The host-facing adapter handle.
//!
//! [`Z2mAdapter`] owns the adapter task and forwards host calls into it
//! over a command channel; results and state changes come back as
//! [`AdapterEvent`]s on the broadcast bus. The handle itself never touches
//! adapter state, which keeps the single-writer discipline intact.

mod task;

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::RwLock;
use serde_json::{Map, Value};
use tokio::sync::{broadcast, mpsc, oneshot, watch};

use crate::config::AdapterConfig;
use crate::error::{Error, Result};
use crate::event::{AdapterEvent, EventBus};
use crate::protocol::{RumqttTransport, Transport};
use crate::types::{ChannelValue, CmdId, Device};

use task::{AdapterCommand, AdapterTask};

/// Adapter bridging a Zigbee2MQTT deployment to the host core.
///
/// # Examples
///
/// ```no_run
/// use z2m_bridge::{AdapterConfig, AdapterEvent, Z2mAdapter};
///
/// #[tokio::main]
/// async fn main() -> z2m_bridge::Result<()> {
///     let config = AdapterConfig::new("z2m-main")
///         .with_host("192.168.1.50")
///         .with_credentials("mqtt", "secret");
///     let adapter = Z2mAdapter::new(config);
///
///     let mut events = adapter.subscribe();
///     adapter.start()?;
///
///     while let Ok(event) = events.recv().await {
///         match event {
///             AdapterEvent::DeviceUpdated { device, channels } => {
///                 println!("{} exposes {} channels", device.name, channels.len());
///             }
///             AdapterEvent::ConnectionStateChanged { connected } => {
///                 println!("connected: {connected}");
///             }
///             _ => {}
///         }
///     }
///     Ok(())
/// }
/// ```
#[derive(Debug)]
pub struct Z2mAdapter {
    cmd_tx: mpsc::UnboundedSender<AdapterCommand>,
    events: EventBus,
    connected_rx: watch::Receiver<bool>,
    snapshots: Arc<RwLock<HashMap<String, Device>>>,
}

impl Z2mAdapter {
    /// Creates an adapter using the `rumqttc` transport.
    #[must_use]
    pub fn new(config: AdapterConfig) -> Self {
        Self::with_transport(config, RumqttTransport::default())
    }

    /// Creates an adapter over a custom transport.
    ///
    /// Used by tests to drive the adapter without a broker; the transport
    /// receives its settings from the configuration on `start`.
    #[must_use]
    pub fn with_transport<T: Transport>(config: AdapterConfig, transport: T) -> Self {
        let (cmd_tx, cmd_rx) = mpsc::unbounded_channel();
        let events = EventBus::new();
        let (connected_tx, connected_rx) = watch::channel(false);
        let snapshots: Arc<RwLock<HashMap<String, Device>>> = Arc::new(RwLock::new(HashMap::new()));

        let adapter_task = AdapterTask::new(
            config,
            transport,
            events.clone(),
            connected_tx,
            Arc::clone(&snapshots),
            cmd_tx.clone(),
        );
        tokio::spawn(adapter_task.run(cmd_rx));

        Self {
            cmd_tx,
            events,
            connected_rx,
            snapshots,
        }
    }

    /// Subscribes to adapter events.
    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<AdapterEvent> {
        self.events.subscribe()
    }

    /// Returns whether the adapter is fully connected (MQTT connected and
    /// the bridge online).
    #[must_use]
    pub fn is_connected(&self) -> bool {
        *self.connected_rx.borrow()
    }

    /// Returns a watch on the connection state.
    #[must_use]
    pub fn connection_watch(&self) -> watch::Receiver<bool> {
        self.connected_rx.clone()
    }

    /// Returns the latest snapshot of a device by external id.
    #[must_use]
    pub fn device(&self, external_id: &str) -> Option<Device> {
        self.snapshots.read().get(external_id).cloned()
    }

    /// Returns the latest snapshot of all known devices.
    #[must_use]
    pub fn devices(&self) -> Vec<Device> {
        self.snapshots.read().values().cloned().collect()
    }

    /// Number of known devices.
    #[must_use]
    pub fn device_count(&self) -> usize {
        self.snapshots.read().len()
    }

    /// Applies the configuration and starts connecting.
    ///
    /// Configuration problems are surfaced as
    /// [`AdapterEvent::ErrorOccurred`]; `start` itself only fails when the
    /// adapter task is gone.
    ///
    /// # Errors
    ///
    /// Returns [`Error::AdapterStopped`] when the adapter task has exited.
    pub fn start(&self) -> Result<()> {
        self.send(AdapterCommand::Start)
    }

    /// Stops the adapter: cancels timers, disconnects, releases buffers.
    ///
    /// Idempotent; resolves once everything is released. The adapter can be
    /// started again afterwards.
    pub async fn stop(&self) {
        let (done_tx, done_rx) = oneshot::channel();
        if self.send(AdapterCommand::Stop { done: done_tx }).is_ok() {
            let _ = done_rx.await;
        }
    }

    /// Replaces the configuration record and reconnects.
    ///
    /// # Errors
    ///
    /// Returns [`Error::AdapterStopped`] when the adapter task has exited.
    pub fn adapter_config_updated(&self, config: AdapterConfig) -> Result<()> {
        self.send(AdapterCommand::ConfigUpdated(config))
    }

    /// Requests a full device sync.
    ///
    /// Re-emits every known device immediately and publishes a
    /// `bridge/request/devices`; [`AdapterEvent::FullSyncCompleted`] follows
    /// once the next devices payload is ingested.
    ///
    /// # Errors
    ///
    /// Returns [`Error::AdapterStopped`] when the adapter task has exited.
    pub fn request_full_sync(&self) -> Result<()> {
        self.send(AdapterCommand::RequestFullSync)
    }

    /// Writes a channel value; the result arrives as
    /// [`AdapterEvent::CmdResult`] carrying `cmd_id`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::AdapterStopped`] when the adapter task has exited.
    pub fn update_channel_state(
        &self,
        external_id: impl Into<String>,
        channel_id: impl Into<String>,
        value: ChannelValue,
        cmd_id: CmdId,
    ) -> Result<()> {
        self.send(AdapterCommand::UpdateChannelState {
            external_id: external_id.into(),
            channel_id: channel_id.into(),
            value,
            cmd_id,
        })
    }

    /// Renames a device; the result arrives as [`AdapterEvent::CmdResult`]
    /// once Zigbee2MQTT confirms (or after the 10 second timeout).
    ///
    /// # Errors
    ///
    /// Returns [`Error::AdapterStopped`] when the adapter task has exited.
    pub fn update_device_name(
        &self,
        external_id: impl Into<String>,
        name: impl Into<String>,
        cmd_id: CmdId,
    ) -> Result<()> {
        self.send(AdapterCommand::UpdateDeviceName {
            external_id: external_id.into(),
            name: name.into(),
            cmd_id,
        })
    }

    /// Invokes an adapter-level action (`settings`, `permitJoin`,
    /// `restartZ2M`); the result arrives as [`AdapterEvent::ActionResult`].
    ///
    /// # Errors
    ///
    /// Returns [`Error::AdapterStopped`] when the adapter task has exited.
    pub fn invoke_adapter_action(
        &self,
        action_id: impl Into<String>,
        params: Map<String, Value>,
        cmd_id: CmdId,
    ) -> Result<()> {
        self.send(AdapterCommand::InvokeAction {
            action_id: action_id.into(),
            params,
            cmd_id,
        })
    }

    fn send(&self, command: AdapterCommand) -> Result<()> {
        self.cmd_tx
            .send(command)
            .map_err(|_| Error::AdapterStopped)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::mock::MockTransport;

    #[tokio::test]
    async fn fresh_adapter_is_disconnected() {
        let (transport, _handle) = MockTransport::channel(true);
        let adapter = Z2mAdapter::with_transport(AdapterConfig::new("test"), transport);
        assert!(!adapter.is_connected());
        assert_eq!(adapter.device_count(), 0);
        assert!(adapter.device("0x00").is_none());
    }

    #[tokio::test]
    async fn start_without_host_emits_error() {
        let (transport, _handle) = MockTransport::channel(true);
        let adapter = Z2mAdapter::with_transport(AdapterConfig::new("test"), transport);
        let mut events = adapter.subscribe();

        adapter.start().unwrap();

        match events.recv().await.unwrap() {
            AdapterEvent::ErrorOccurred { message } => {
                assert!(message.contains("host"), "message: {message}");
            }
            other => panic!("unexpected event: {other:?}"),
        }
        assert!(!adapter.is_connected());
    }

    #[tokio::test]
    async fn stop_is_idempotent() {
        let (transport, _handle) = MockTransport::channel(true);
        let adapter = Z2mAdapter::with_transport(
            AdapterConfig::new("test").with_host("broker.local"),
            transport,
        );
        adapter.start().unwrap();
        adapter.stop().await;
        adapter.stop().await;
    }
}
