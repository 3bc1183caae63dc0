// SPDX-License-Identifier: MPL-2.0
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Channel-backed transport for tests.
//!
//! [`MockTransport`] implements [`Transport`] over in-memory channels; the
//! paired [`MockHandle`] plays the broker side: it observes subscriptions
//! and published messages and injects incoming messages and connection
//! events.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

use tokio::sync::mpsc;

use crate::error::ProtocolError;

use super::{Transport, TransportEvent, TransportSettings};

/// A message published through the mock transport.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PublishedMessage {
    /// Full topic.
    pub topic: String,
    /// Raw payload bytes.
    pub payload: Vec<u8>,
}

impl PublishedMessage {
    /// Parses the payload as JSON.
    ///
    /// # Panics
    ///
    /// Panics when the payload is not valid JSON; intended for assertions.
    #[must_use]
    pub fn json(&self) -> serde_json::Value {
        serde_json::from_slice(&self.payload).expect("payload should be JSON")
    }

    /// Returns the payload as UTF-8 text.
    #[must_use]
    pub fn text(&self) -> String {
        String::from_utf8_lossy(&self.payload).into_owned()
    }
}

/// Test transport; create with [`MockTransport::channel`].
#[derive(Debug)]
pub struct MockTransport {
    auto_connect: bool,
    settings: Option<TransportSettings>,
    event_rx: mpsc::UnboundedReceiver<TransportEvent>,
    loopback_tx: mpsc::UnboundedSender<TransportEvent>,
    publish_tx: mpsc::UnboundedSender<PublishedMessage>,
    subscribe_tx: mpsc::UnboundedSender<String>,
    fail_publish: Arc<AtomicBool>,
    connect_attempts: Arc<AtomicUsize>,
}

/// Broker-side handle driving a [`MockTransport`].
#[derive(Debug)]
pub struct MockHandle {
    event_tx: mpsc::UnboundedSender<TransportEvent>,
    publish_rx: mpsc::UnboundedReceiver<PublishedMessage>,
    subscribe_rx: mpsc::UnboundedReceiver<String>,
    fail_publish: Arc<AtomicBool>,
    connect_attempts: Arc<AtomicUsize>,
}

impl MockTransport {
    /// Creates a transport/handle pair.
    ///
    /// With `auto_connect`, every `connect` call immediately queues a
    /// [`TransportEvent::Connected`]; otherwise the test emits connection
    /// events itself.
    #[must_use]
    pub fn channel(auto_connect: bool) -> (Self, MockHandle) {
        let (event_tx, event_rx) = mpsc::unbounded_channel();
        let (publish_tx, publish_rx) = mpsc::unbounded_channel();
        let (subscribe_tx, subscribe_rx) = mpsc::unbounded_channel();
        let fail_publish = Arc::new(AtomicBool::new(false));
        let connect_attempts = Arc::new(AtomicUsize::new(0));

        let transport = Self {
            auto_connect,
            settings: None,
            event_rx,
            loopback_tx: event_tx.clone(),
            publish_tx,
            subscribe_tx,
            fail_publish: Arc::clone(&fail_publish),
            connect_attempts: Arc::clone(&connect_attempts),
        };
        let handle = MockHandle {
            event_tx,
            publish_rx,
            subscribe_rx,
            fail_publish,
            connect_attempts,
        };
        (transport, handle)
    }

    /// Returns the settings last applied by the adapter.
    #[must_use]
    pub fn settings(&self) -> Option<&TransportSettings> {
        self.settings.as_ref()
    }
}

impl Transport for MockTransport {
    fn apply_settings(&mut self, settings: TransportSettings) {
        self.settings = Some(settings);
    }

    async fn connect(&mut self) -> Result<(), ProtocolError> {
        self.connect_attempts.fetch_add(1, Ordering::SeqCst);
        if self.auto_connect {
            let _ = self.loopback_tx.send(TransportEvent::Connected);
        }
        Ok(())
    }

    async fn disconnect(&mut self) -> Result<(), ProtocolError> {
        Ok(())
    }

    async fn subscribe(&mut self, topic: &str) -> Result<(), ProtocolError> {
        let _ = self.subscribe_tx.send(topic.to_string());
        Ok(())
    }

    async fn publish(&mut self, topic: &str, payload: Vec<u8>) -> Result<(), ProtocolError> {
        if self.fail_publish.load(Ordering::SeqCst) {
            return Err(ProtocolError::ConnectionFailed(
                "mock publish failure".to_string(),
            ));
        }
        let _ = self.publish_tx.send(PublishedMessage {
            topic: topic.to_string(),
            payload,
        });
        Ok(())
    }

    async fn poll_event(&mut self) -> TransportEvent {
        match self.event_rx.recv().await {
            Some(event) => event,
            // Handle dropped: stay pending, the adapter is shutting down.
            None => std::future::pending().await,
        }
    }
}

impl MockHandle {
    /// Injects a transport event.
    pub fn send_event(&self, event: TransportEvent) {
        let _ = self.event_tx.send(event);
    }

    /// Injects an incoming message with a JSON payload.
    pub fn send_json(&self, topic: &str, payload: &serde_json::Value) {
        self.send_event(TransportEvent::Message {
            topic: topic.to_string(),
            payload: serde_json::to_vec(payload).expect("serializable payload"),
        });
    }

    /// Injects an incoming message with a raw text payload.
    pub fn send_text(&self, topic: &str, payload: &str) {
        self.send_event(TransportEvent::Message {
            topic: topic.to_string(),
            payload: payload.as_bytes().to_vec(),
        });
    }

    /// Waits for the next published message.
    pub async fn next_publish(&mut self) -> Option<PublishedMessage> {
        self.publish_rx.recv().await
    }

    /// Returns an already-recorded publish without waiting.
    pub fn try_next_publish(&mut self) -> Option<PublishedMessage> {
        self.publish_rx.try_recv().ok()
    }

    /// Waits for the next subscription filter.
    pub async fn next_subscription(&mut self) -> Option<String> {
        self.subscribe_rx.recv().await
    }

    /// Makes subsequent publishes fail.
    pub fn set_fail_publish(&self, fail: bool) {
        self.fail_publish.store(fail, Ordering::SeqCst);
    }

    /// Number of connect attempts observed.
    #[must_use]
    pub fn connect_attempts(&self) -> usize {
        self.connect_attempts.load(Ordering::SeqCst)
    }
}
