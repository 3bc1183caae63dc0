// SPDX-License-Identifier: MPL-2.0
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! MQTT transport abstraction.
//!
//! The adapter drives a [`Transport`]: connect, subscribe, publish, and a
//! stream of [`TransportEvent`]s marshalled into the adapter task. The
//! production implementation wraps `rumqttc`
//! ([`RumqttTransport`](rumqtt::RumqttTransport)); tests drive the adapter
//! through the channel-backed [`MockTransport`](mock::MockTransport).

pub mod mock;
mod rumqtt;

pub use rumqtt::RumqttTransport;

use std::future::Future;
use std::time::Duration;

use crate::error::ProtocolError;

/// Events delivered by a transport to the adapter task.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportEvent {
    /// The broker acknowledged the connection.
    Connected,
    /// The connection dropped or a connect attempt failed.
    Disconnected,
    /// An application message arrived.
    Message {
        /// Full topic the message was published on.
        topic: String,
        /// Raw payload bytes.
        payload: Vec<u8>,
    },
}

/// Connection settings handed to a transport before connecting.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransportSettings {
    /// Broker host name or IP address.
    pub host: String,
    /// Broker port.
    pub port: u16,
    /// Username/password pair; `None` disables authentication.
    pub credentials: Option<(String, String)>,
    /// MQTT client id.
    pub client_id: String,
    /// Keep-alive interval.
    pub keep_alive: Duration,
}

impl Default for TransportSettings {
    fn default() -> Self {
        Self {
            host: String::new(),
            port: 1883,
            credentials: None,
            client_id: String::new(),
            keep_alive: Duration::from_secs(30),
        }
    }
}

/// An MQTT client as seen by the adapter.
///
/// Connection establishment is asynchronous: `connect` starts an attempt and
/// the outcome arrives as a [`TransportEvent`] from [`Transport::poll_event`].
/// While no connection attempt is active, `poll_event` stays pending.
///
/// The methods return explicitly `Send` futures so the adapter task can be
/// spawned for any transport implementation.
pub trait Transport: Send + 'static {
    /// Applies connection settings; takes effect on the next `connect`.
    fn apply_settings(&mut self, settings: TransportSettings);

    /// Starts a connection attempt.
    fn connect(&mut self) -> impl Future<Output = Result<(), ProtocolError>> + Send;

    /// Tears the connection down.
    fn disconnect(&mut self) -> impl Future<Output = Result<(), ProtocolError>> + Send;

    /// Subscribes to a topic filter.
    fn subscribe(&mut self, topic: &str) -> impl Future<Output = Result<(), ProtocolError>> + Send;

    /// Publishes a message.
    fn publish(
        &mut self,
        topic: &str,
        payload: Vec<u8>,
    ) -> impl Future<Output = Result<(), ProtocolError>> + Send;

    /// Waits for the next transport event.
    fn poll_event(&mut self) -> impl Future<Output = TransportEvent> + Send;
}
