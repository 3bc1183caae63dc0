// SPDX-License-Identifier: MPL-2.0
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! `z2m_bridge` - A Rust library bridging Zigbee2MQTT to a home-automation
//! core.
//!
//! This library connects to the MQTT broker a Zigbee2MQTT daemon publishes
//! on and translates between its topic/JSON protocol and a canonical,
//! typed device model:
//!
//! - **Schema translation**: Z2M's self-describing `exposes` trees become
//!   typed [`Channel`](types::Channel) lists with units, ranges and access
//!   flags.
//! - **Value translation**: state payloads are decoded into canonical units
//!   (brightness as percent, voltage in volts, colors as sRGB, button
//!   actions as event codes); commands are encoded back into `set`
//!   payloads.
//! - **Device registry**: devices are tracked by their stable IEEE address
//!   across renames, arrivals and departures.
//! - **Connection management**: automatic reconnect, bridge online/offline
//!   tracking, and per-device availability.
//!
//! # Architecture
//!
//! ```text
//! MQTT broker ── rumqttc ── Transport ──┐
//!                                       v
//!                    adapter task (single writer)
//!            router -> registry -> expose compiler -> codec
//!                                       │
//!                                       v
//!                       AdapterEvent broadcast bus ── host
//! ```
//!
//! All adapter state is owned by one task; host calls and timer ticks
//! arrive over the same command channel as MQTT traffic, so no locks guard
//! the registry.
//!
//! # Quick Start
//!
//! ```no_run
//! use z2m_bridge::{AdapterConfig, AdapterEvent, Z2mAdapter};
//!
//! #[tokio::main]
//! async fn main() -> z2m_bridge::Result<()> {
//!     let config = AdapterConfig::new("z2m-main").with_host("192.168.1.50");
//!     let adapter = Z2mAdapter::new(config);
//!
//!     let mut events = adapter.subscribe();
//!     adapter.start()?;
//!
//!     while let Ok(event) = events.recv().await {
//!         if let AdapterEvent::ChannelStateUpdated {
//!             external_id,
//!             channel_id,
//!             value,
//!             ..
//!         } = event
//!         {
//!             println!("{external_id}/{channel_id} = {value:?}");
//!         }
//!     }
//!     Ok(())
//! }
//! ```
//!
//! # Sending commands
//!
//! ```no_run
//! use z2m_bridge::types::ChannelValue;
//! # async fn example(adapter: z2m_bridge::Z2mAdapter) -> z2m_bridge::Result<()> {
//! // Turn a bulb on; the result arrives as AdapterEvent::CmdResult.
//! adapter.update_channel_state("0x00158d0001abcdef", "state", ChannelValue::Bool(true), 1)?;
//! // Dim to 75 percent.
//! adapter.update_channel_state("0x00158d0001abcdef", "brightness", ChannelValue::Float(75.0), 2)?;
//! # Ok(())
//! # }
//! ```

mod adapter;
pub mod codec;
mod config;
pub mod descriptor;
pub mod error;
pub mod event;
pub mod expose;
pub mod protocol;
pub mod registry;
pub mod router;
pub mod types;

pub use adapter::Z2mAdapter;
pub use config::{AdapterConfig, DEFAULT_BASE_TOPIC, DEFAULT_PORT, DEFAULT_RETRY_INTERVAL_MS};
pub use error::{ConfigError, Error, ParseError, ProtocolError, Result, ValueError};
pub use event::{AdapterEvent, EventBus};
pub use types::{
    ActionResponse, Channel, ChannelDataType, ChannelFlags, ChannelKind, ChannelValue, CmdId,
    CmdResponse, CmdStatus, ConnectivityStatus, Device, DeviceClass,
};
