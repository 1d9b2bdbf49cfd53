// SPDX-License-Identifier: MPL-2.0
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Connection configuration.
//!
//! The session layer consumes this surface; it does not parse files itself.
//! The types carry serde derives so callers can load them from whatever
//! format they use.

use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use rand::Rng;
use rand::distributions::Alphanumeric;
use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

/// Pre-5.0 brokers may reject client ids longer than this.
const CLIENT_ID_SOFT_LIMIT: usize = 23;

/// Length of auto-generated client ids.
const GENERATED_ID_LEN: usize = 16;

/// How the transport carries MQTT packets.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TransportKind {
    /// Plain TCP (optionally TLS).
    #[default]
    Tcp,
    /// MQTT over websockets.
    Websockets,
}

/// MQTT protocol revision.
///
/// Parsed from a string with several accepted aliases per revision, e.g.
/// `"4"`, `"MQTTv311"` and `"3.1.1"` all select [`ProtocolVersion::V3_1_1`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum ProtocolVersion {
    /// MQTT 3.1.0.
    V3_1_0,
    /// MQTT 3.1.1.
    #[default]
    V3_1_1,
    /// MQTT 5.0.0.
    V5_0_0,
}

impl ProtocolVersion {
    /// Returns true for the 5.0.0 revision.
    #[must_use]
    pub fn is_v5(self) -> bool {
        self == Self::V5_0_0
    }
}

impl FromStr for ProtocolVersion {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, ConfigError> {
        match s {
            "3.1.0" | "3" | "MQTTv3" => Ok(Self::V3_1_0),
            "3.1.1" | "4" | "MQTTv4" | "MQTTv311" => Ok(Self::V3_1_1),
            "5.0.0" | "5" | "MQTTv5" => Ok(Self::V5_0_0),
            other => Err(ConfigError::UnknownProtocolVersion(other.to_string())),
        }
    }
}

impl fmt::Display for ProtocolVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::V3_1_0 => f.write_str("3.1.0"),
            Self::V3_1_1 => f.write_str("3.1.1"),
            Self::V5_0_0 => f.write_str("5.0.0"),
        }
    }
}

impl TryFrom<String> for ProtocolVersion {
    type Error = ConfigError;

    fn try_from(value: String) -> Result<Self, ConfigError> {
        value.parse()
    }
}

impl From<ProtocolVersion> for String {
    fn from(version: ProtocolVersion) -> Self {
        version.to_string()
    }
}

/// Immutable connection parameters for one client.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MqttConfig {
    host: String,
    port: u16,
    username: Option<String>,
    password: Option<String>,
    transport: TransportKind,
    protocol: ProtocolVersion,
    client_id: String,
    tls_enable: bool,
    tls_insecure: bool,
    clean_session: bool,
    keepalive_secs: u64,
    bind_address: Option<String>,
}

impl Default for MqttConfig {
    fn default() -> Self {
        Self {
            host: String::new(),
            port: 1883,
            username: None,
            password: None,
            transport: TransportKind::Tcp,
            protocol: ProtocolVersion::V3_1_1,
            client_id: random_client_id(),
            tls_enable: false,
            tls_insecure: false,
            clean_session: true,
            keepalive_secs: 60,
            bind_address: None,
        }
    }
}

impl MqttConfig {
    /// Creates a builder.
    #[must_use]
    pub fn builder() -> MqttConfigBuilder {
        MqttConfigBuilder::default()
    }

    /// Validates the configuration and normalizes version-dependent fields.
    ///
    /// MQTT 5.0.0 has no clean-session flag (session state moved to the
    /// session-expiry mechanism), so the flag is forced off there. A client
    /// id longer than 23 characters draws a warning on pre-5.0 revisions.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::MissingHost`] when no host is set.
    pub fn validate(&mut self) -> Result<(), ConfigError> {
        if self.host.is_empty() {
            return Err(ConfigError::MissingHost);
        }

        if self.protocol.is_v5() && self.clean_session {
            tracing::debug!("clean_session forced off for protocol 5.0.0");
            self.clean_session = false;
        }

        if !self.protocol.is_v5() && self.client_id.len() > CLIENT_ID_SOFT_LIMIT {
            tracing::warn!(
                client_id = %self.client_id,
                len = self.client_id.len(),
                "client id exceeds 23 characters; pre-5.0 brokers may reject it"
            );
        }

        Ok(())
    }

    /// Broker host name or address.
    #[must_use]
    pub fn host(&self) -> &str {
        &self.host
    }

    /// Broker port.
    #[must_use]
    pub fn port(&self) -> u16 {
        self.port
    }

    /// Username/password pair, when both are configured.
    #[must_use]
    pub fn credentials(&self) -> Option<(&str, &str)> {
        match (&self.username, &self.password) {
            (Some(user), Some(pass)) => Some((user.as_str(), pass.as_str())),
            _ => None,
        }
    }

    /// Transport kind.
    #[must_use]
    pub fn transport(&self) -> TransportKind {
        self.transport
    }

    /// Protocol revision.
    #[must_use]
    pub fn protocol(&self) -> ProtocolVersion {
        self.protocol
    }

    /// Client identifier.
    #[must_use]
    pub fn client_id(&self) -> &str {
        &self.client_id
    }

    /// Whether to wrap the connection in TLS.
    #[must_use]
    pub fn tls_enable(&self) -> bool {
        self.tls_enable
    }

    /// Whether certificate verification may be relaxed.
    #[must_use]
    pub fn tls_insecure(&self) -> bool {
        self.tls_insecure
    }

    /// Clean-session flag (always false after validation on 5.0.0).
    #[must_use]
    pub fn clean_session(&self) -> bool {
        self.clean_session
    }

    /// Keep-alive interval.
    #[must_use]
    pub fn keepalive(&self) -> Duration {
        Duration::from_secs(self.keepalive_secs)
    }

    /// Local address to bind the socket to, if any.
    #[must_use]
    pub fn bind_address(&self) -> Option<&str> {
        self.bind_address.as_deref()
    }
}

/// Builder for [`MqttConfig`].
///
/// # Examples
///
/// ```
/// use mqtt_session::MqttConfig;
///
/// # fn main() -> Result<(), mqtt_session::ConfigError> {
/// let config = MqttConfig::builder()
///     .host("127.0.0.1")
///     .port(1883)
///     .protocol_alias("MQTTv311")?
///     .build()?;
/// assert_eq!(config.host(), "127.0.0.1");
/// # Ok(())
/// # }
/// ```
#[derive(Debug, Default)]
pub struct MqttConfigBuilder {
    config: MqttConfig,
    client_id: Option<String>,
}

impl MqttConfigBuilder {
    /// Sets the broker host.
    #[must_use]
    pub fn host(mut self, host: impl Into<String>) -> Self {
        self.config.host = host.into();
        self
    }

    /// Sets the broker port (default: 1883).
    #[must_use]
    pub fn port(mut self, port: u16) -> Self {
        self.config.port = port;
        self
    }

    /// Sets authentication credentials.
    #[must_use]
    pub fn credentials(mut self, username: impl Into<String>, password: impl Into<String>) -> Self {
        self.config.username = Some(username.into());
        self.config.password = Some(password.into());
        self
    }

    /// Sets the transport kind (default: plain TCP).
    #[must_use]
    pub fn transport(mut self, transport: TransportKind) -> Self {
        self.config.transport = transport;
        self
    }

    /// Sets the protocol revision (default: 3.1.1).
    #[must_use]
    pub fn protocol(mut self, protocol: ProtocolVersion) -> Self {
        self.config.protocol = protocol;
        self
    }

    /// Sets the protocol revision from a string alias.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::UnknownProtocolVersion`] for an unrecognized
    /// alias.
    pub fn protocol_alias(mut self, alias: &str) -> Result<Self, ConfigError> {
        self.config.protocol = alias.parse()?;
        Ok(self)
    }

    /// Sets a fixed client id. Without one, a random 16-character
    /// alphanumeric id is generated at build time.
    #[must_use]
    pub fn client_id(mut self, id: impl Into<String>) -> Self {
        self.client_id = Some(id.into());
        self
    }

    /// Enables TLS.
    #[must_use]
    pub fn tls(mut self, enable: bool, insecure: bool) -> Self {
        self.config.tls_enable = enable;
        self.config.tls_insecure = insecure;
        self
    }

    /// Sets the clean-session flag (default: true; ignored on 5.0.0).
    #[must_use]
    pub fn clean_session(mut self, clean: bool) -> Self {
        self.config.clean_session = clean;
        self
    }

    /// Sets the keep-alive interval in seconds (default: 60).
    #[must_use]
    pub fn keepalive_secs(mut self, secs: u64) -> Self {
        self.config.keepalive_secs = secs;
        self
    }

    /// Sets a local bind address.
    #[must_use]
    pub fn bind_address(mut self, address: impl Into<String>) -> Self {
        self.config.bind_address = Some(address.into());
        self
    }

    /// Validates and returns the configuration.
    ///
    /// # Errors
    ///
    /// Returns a [`ConfigError`] when the host is missing.
    pub fn build(mut self) -> Result<MqttConfig, ConfigError> {
        match self.client_id {
            Some(id) => self.config.client_id = id,
            None => {
                // Default already generated one; log it so the broker-side
                // client can be identified when debugging.
                tracing::warn!(
                    client_id = %self.config.client_id,
                    "client_id not set, random id generated"
                );
            }
        }
        self.config.validate()?;
        Ok(self.config)
    }
}

fn random_client_id() -> String {
    rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(GENERATED_ID_LEN)
        .map(char::from)
        .collect()
}
