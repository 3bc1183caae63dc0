// SPDX-License-Identifier: MPL-2.0
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Adapter events and the broadcast bus carrying them to the host.

use tokio::sync::broadcast;

use crate::types::{ActionResponse, Channel, ChannelValue, CmdResponse, Device};

/// Default channel capacity for the event bus.
const DEFAULT_CHANNEL_CAPACITY: usize = 256;

/// An event emitted by the adapter towards the host.
#[derive(Debug, Clone)]
pub enum AdapterEvent {
    /// The computed connection state (MQTT connected and bridge online)
    /// changed.
    ConnectionStateChanged {
        /// `true` when the adapter is fully connected.
        connected: bool,
    },
    /// A device was created or its definition/meta changed.
    DeviceUpdated {
        /// The canonical device.
        device: Device,
        /// Its full channel list.
        channels: Vec<Channel>,
    },
    /// A device disappeared.
    DeviceRemoved {
        /// The removed device's external id.
        external_id: String,
    },
    /// A channel carried a new value.
    ChannelStateUpdated {
        /// The device's external id.
        external_id: String,
        /// The channel id.
        channel_id: String,
        /// The decoded canonical value.
        value: ChannelValue,
        /// Timestamp in milliseconds since the epoch.
        ts_ms: i64,
    },
    /// Result of a channel or rename command.
    CmdResult(CmdResponse),
    /// Result of an adapter action.
    ActionResult(ActionResponse),
    /// A patch for the adapter's own meta (bridge info, health, ...).
    AdapterMetaUpdated {
        /// Keys to merge into the adapter meta.
        patch: serde_json::Map<String, serde_json::Value>,
    },
    /// A requested full sync finished ingesting.
    FullSyncCompleted,
    /// A non-fatal error the host should surface.
    ErrorOccurred {
        /// Human-readable description.
        message: String,
    },
}

/// Event bus broadcasting adapter events to multiple subscribers.
///
/// Uses tokio's broadcast channel so every subscriber receives its own copy
/// of each event. Slow subscribers may lose events once the channel
/// capacity is exceeded (they observe `RecvError::Lagged`).
#[derive(Debug)]
pub struct EventBus {
    sender: broadcast::Sender<AdapterEvent>,
}

impl EventBus {
    /// Creates a new event bus with default capacity.
    #[must_use]
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_CHANNEL_CAPACITY)
    }

    /// Creates a new event bus with the specified capacity.
    #[must_use]
    pub fn with_capacity(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { sender }
    }

    /// Subscribes to adapter events.
    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<AdapterEvent> {
        self.sender.subscribe()
    }

    /// Returns the number of active subscribers.
    #[must_use]
    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }

    /// Publishes an event to all subscribers.
    ///
    /// Events published without subscribers are silently discarded.
    pub fn publish(&self, event: AdapterEvent) {
        // Ignore errors (no subscribers).
        let _ = self.sender.send(event);
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

impl Clone for EventBus {
    fn clone(&self) -> Self {
        Self {
            sender: self.sender.clone(),
        }
    }
}
