// SPDX-License-Identifier: MPL-2.0
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! `rumqttc`-backed MQTT transport.

use std::sync::atomic::{AtomicU64, Ordering};

use rumqttc::{AsyncClient, Event, EventLoop, MqttOptions, Packet, QoS};

use crate::error::ProtocolError;

use super::{Transport, TransportEvent, TransportSettings};

/// Global counter for generating unique client IDs.
static CLIENT_ID_COUNTER: AtomicU64 = AtomicU64::new(0);

/// Event loop request queue capacity.
const REQUEST_CAPACITY: usize = 64;

/// MQTT transport backed by [`rumqttc::AsyncClient`].
///
/// `connect` creates the client and event loop; the actual CONNECT happens
/// once the adapter polls [`poll_event`](Transport::poll_event). Connection
/// failures surface as a single [`TransportEvent::Disconnected`], after
/// which the transport goes idle until the next `connect` - reconnect pacing
/// stays with the adapter's retry timer.
#[derive(Default)]
pub struct RumqttTransport {
    settings: TransportSettings,
    client: Option<AsyncClient>,
    event_loop: Option<EventLoop>,
}

impl std::fmt::Debug for RumqttTransport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RumqttTransport")
            .field("settings", &self.settings)
            .field("client", &self.client.is_some())
            .field("event_loop", &self.event_loop.is_some())
            .finish()
    }
}

impl RumqttTransport {
    /// Creates a transport with the given settings.
    #[must_use]
    pub fn new(settings: TransportSettings) -> Self {
        Self {
            settings,
            client: None,
            event_loop: None,
        }
    }

    /// Returns whether a client currently exists.
    #[must_use]
    pub fn is_active(&self) -> bool {
        self.client.is_some()
    }

    fn teardown(&mut self) {
        self.client = None;
        self.event_loop = None;
    }

    fn effective_client_id(&self) -> String {
        if self.settings.client_id.is_empty() {
            let counter = CLIENT_ID_COUNTER.fetch_add(1, Ordering::Relaxed);
            format!("z2m-bridge-{}-{}", std::process::id(), counter)
        } else {
            self.settings.client_id.clone()
        }
    }
}

impl Transport for RumqttTransport {
    fn apply_settings(&mut self, settings: TransportSettings) {
        self.settings = settings;
    }

    async fn connect(&mut self) -> Result<(), ProtocolError> {
        if self.client.is_some() {
            return Ok(());
        }
        if self.settings.host.trim().is_empty() {
            return Err(ProtocolError::InvalidAddress(
                "MQTT broker host is required".to_string(),
            ));
        }

        let client_id = self.effective_client_id();
        let mut options = MqttOptions::new(client_id, self.settings.host.clone(), self.settings.port);
        options.set_keep_alive(self.settings.keep_alive);
        options.set_clean_session(true);
        if let Some((username, password)) = &self.settings.credentials {
            options.set_credentials(username.clone(), password.clone());
        }

        let (client, event_loop) = AsyncClient::new(options, REQUEST_CAPACITY);
        self.client = Some(client);
        self.event_loop = Some(event_loop);

        tracing::debug!(
            host = %self.settings.host,
            port = self.settings.port,
            "MQTT connect attempt started"
        );
        Ok(())
    }

    async fn disconnect(&mut self) -> Result<(), ProtocolError> {
        if let Some(client) = self.client.take() {
            // The event loop is gone right after; a failed DISCONNECT only
            // means the connection was already down.
            let _ = client.disconnect().await;
        }
        self.event_loop = None;
        Ok(())
    }

    async fn subscribe(&mut self, topic: &str) -> Result<(), ProtocolError> {
        let client = self.client.as_ref().ok_or_else(|| {
            ProtocolError::ConnectionFailed("MQTT client not connected".to_string())
        })?;
        client
            .subscribe(topic, QoS::AtLeastOnce)
            .await
            .map_err(ProtocolError::Mqtt)
    }

    async fn publish(&mut self, topic: &str, payload: Vec<u8>) -> Result<(), ProtocolError> {
        let client = self.client.as_ref().ok_or_else(|| {
            ProtocolError::ConnectionFailed("MQTT client not connected".to_string())
        })?;
        tracing::debug!(topic = %topic, bytes = payload.len(), "Publishing MQTT message");
        client
            .publish(topic, QoS::AtLeastOnce, false, payload)
            .await
            .map_err(ProtocolError::Mqtt)
    }

    async fn poll_event(&mut self) -> TransportEvent {
        loop {
            let Some(event_loop) = self.event_loop.as_mut() else {
                // Idle: nothing to poll until the next connect.
                return std::future::pending().await;
            };
            match event_loop.poll().await {
                Ok(Event::Incoming(Packet::ConnAck(ack))) => {
                    tracing::debug!(?ack, "MQTT connected");
                    return TransportEvent::Connected;
                }
                Ok(Event::Incoming(Packet::Publish(publish))) => {
                    return TransportEvent::Message {
                        topic: publish.topic.clone(),
                        payload: publish.payload.to_vec(),
                    };
                }
                Ok(Event::Incoming(Packet::Disconnect)) => {
                    tracing::info!("MQTT broker disconnected");
                    self.teardown();
                    return TransportEvent::Disconnected;
                }
                Ok(_) => {}
                Err(error) => {
                    tracing::error!(error = %error, "MQTT event loop error");
                    self.teardown();
                    return TransportEvent::Disconnected;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn connect_without_host_fails() {
        let mut transport = RumqttTransport::default();
        let result = transport.connect().await;
        assert!(matches!(result, Err(ProtocolError::InvalidAddress(_))));
        assert!(!transport.is_active());
    }

    #[tokio::test]
    async fn connect_creates_client() {
        let mut transport = RumqttTransport::new(TransportSettings {
            host: "127.0.0.1".to_string(),
            ..TransportSettings::default()
        });
        transport.connect().await.unwrap();
        assert!(transport.is_active());
        // Connecting again is a no-op.
        transport.connect().await.unwrap();
    }

    #[tokio::test]
    async fn publish_without_client_fails() {
        let mut transport = RumqttTransport::default();
        let result = transport.publish("topic", b"{}".to_vec()).await;
        assert!(matches!(result, Err(ProtocolError::ConnectionFailed(_))));
    }

    #[test]
    fn generated_client_ids_are_unique() {
        let transport = RumqttTransport::default();
        let first = transport.effective_client_id();
        let second = transport.effective_client_id();
        assert_ne!(first, second);
    }

    #[test]
    fn configured_client_id_wins() {
        let transport = RumqttTransport::new(TransportSettings {
            client_id: "z2m-bridge-main".to_string(),
            ..TransportSettings::default()
        });
        assert_eq!(transport.effective_client_id(), "z2m-bridge-main");
    }
}
