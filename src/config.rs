// SPDX-License-Identifier: MPL-2.0
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Adapter configuration as supplied by the host runtime.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::ConfigError;

/// Default MQTT broker port.
pub const DEFAULT_PORT: u16 = 1883;

/// Default Zigbee2MQTT base topic.
pub const DEFAULT_BASE_TOPIC: &str = "zigbee2mqtt";

/// Default reconnect interval in milliseconds.
pub const DEFAULT_RETRY_INTERVAL_MS: u64 = 10_000;

/// Smallest accepted reconnect interval in milliseconds.
const MIN_RETRY_INTERVAL_MS: u64 = 1_000;

/// Configuration record for one adapter instance.
///
/// The typed fields come straight from the host; adapter-specific options
/// (`baseTopic`, `retryIntervalMs`) live in the opaque `meta` map, with
/// accessors applying defaults and bounds.
///
/// # Examples
///
/// ```
/// use z2m_bridge::AdapterConfig;
///
/// let config = AdapterConfig::new("z2m-main")
///     .with_host("192.168.1.50")
///     .with_credentials("mqtt", "secret");
/// assert_eq!(config.port, 1883);
/// assert_eq!(config.base_topic(), "zigbee2mqtt");
/// ```
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AdapterConfig {
    /// Stable instance id, used for the MQTT client id.
    pub id: String,
    /// Broker host name or IP address.
    pub host: String,
    /// Broker port; `0` falls back to [`DEFAULT_PORT`].
    pub port: u16,
    /// Broker username; empty disables authentication.
    pub user: String,
    /// Broker password.
    pub password: String,
    /// Opaque adapter options.
    pub meta: Map<String, Value>,
}

impl AdapterConfig {
    /// Creates a configuration with the given instance id and defaults.
    #[must_use]
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            port: DEFAULT_PORT,
            ..Self::default()
        }
    }

    /// Sets the broker host.
    #[must_use]
    pub fn with_host(mut self, host: impl Into<String>) -> Self {
        self.host = host.into();
        self
    }

    /// Sets the broker port.
    #[must_use]
    pub fn with_port(mut self, port: u16) -> Self {
        self.port = port;
        self
    }

    /// Sets authentication credentials.
    #[must_use]
    pub fn with_credentials(
        mut self,
        user: impl Into<String>,
        password: impl Into<String>,
    ) -> Self {
        self.user = user.into();
        self.password = password.into();
        self
    }

    /// Sets a meta option.
    #[must_use]
    pub fn with_meta(mut self, key: impl Into<String>, value: Value) -> Self {
        self.meta.insert(key.into(), value);
        self
    }

    /// Returns the effective broker port.
    #[must_use]
    pub fn effective_port(&self) -> u16 {
        if self.port == 0 { DEFAULT_PORT } else { self.port }
    }

    /// Returns the base topic with any trailing slash stripped.
    #[must_use]
    pub fn base_topic(&self) -> String {
        let configured = self
            .meta
            .get("baseTopic")
            .and_then(Value::as_str)
            .map(str::trim)
            .unwrap_or_default();
        let topic = if configured.is_empty() {
            DEFAULT_BASE_TOPIC
        } else {
            configured
        };
        topic.trim_end_matches('/').to_string()
    }

    /// Returns the reconnect interval, clamped to the accepted minimum.
    #[must_use]
    pub fn retry_interval(&self) -> Duration {
        let configured = self
            .meta
            .get("retryIntervalMs")
            .and_then(Value::as_u64)
            .unwrap_or(DEFAULT_RETRY_INTERVAL_MS);
        let millis = if configured >= MIN_RETRY_INTERVAL_MS {
            configured
        } else {
            DEFAULT_RETRY_INTERVAL_MS
        };
        Duration::from_millis(millis)
    }

    /// Validates the parts required to reach a broker.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::MissingHost`] when no host is configured.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.host.trim().is_empty() {
            return Err(ConfigError::MissingHost);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn defaults() {
        let config = AdapterConfig::new("test");
        assert_eq!(config.effective_port(), DEFAULT_PORT);
        assert_eq!(config.base_topic(), "zigbee2mqtt");
        assert_eq!(config.retry_interval(), Duration::from_millis(10_000));
    }

    #[test]
    fn zero_port_falls_back() {
        let config = AdapterConfig::new("test").with_port(0);
        assert_eq!(config.effective_port(), DEFAULT_PORT);
    }

    #[test]
    fn base_topic_trailing_slash_stripped() {
        let config = AdapterConfig::new("test").with_meta("baseTopic", json!("custom/z2m/"));
        assert_eq!(config.base_topic(), "custom/z2m");
    }

    #[test]
    fn base_topic_blank_falls_back() {
        let config = AdapterConfig::new("test").with_meta("baseTopic", json!("   "));
        assert_eq!(config.base_topic(), "zigbee2mqtt");
    }

    #[test]
    fn retry_interval_lower_bound() {
        let config = AdapterConfig::new("test").with_meta("retryIntervalMs", json!(500));
        assert_eq!(config.retry_interval(), Duration::from_millis(10_000));

        let config = AdapterConfig::new("test").with_meta("retryIntervalMs", json!(2_000));
        assert_eq!(config.retry_interval(), Duration::from_millis(2_000));
    }

    #[test]
    fn validate_requires_host() {
        let config = AdapterConfig::new("test");
        assert_eq!(config.validate(), Err(ConfigError::MissingHost));
        let config = config.with_host("broker.local");
        assert!(config.validate().is_ok());
    }

    #[test]
    fn builder_chain() {
        let config = AdapterConfig::new("z2m-1")
            .with_host("192.168.1.50")
            .with_port(8883)
            .with_credentials("user", "pass")
            .with_meta("baseTopic", json!("z2m"));
        assert_eq!(config.id, "z2m-1");
        assert_eq!(config.host, "192.168.1.50");
        assert_eq!(config.port, 8883);
        assert_eq!(config.user, "user");
        assert_eq!(config.password, "pass");
        assert_eq!(config.base_topic(), "z2m");
    }
}
