// SPDX-License-Identifier: MPL-2.0
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! `mqtt-session` - Session and subscription tracking on top of MQTT.
//!
//! This library wraps an MQTT transport with explicit session state:
//! every subscription is an entity with an observable lifecycle, every
//! published message carries its acknowledgement status, and waiting on
//! broker-driven conditions is a first-class, timeout-bounded operation.
//!
//! # Supported Features
//!
//! - **Blocking waits**: A generic timeout/poll primitive underpins
//!   connection, activation, delivery and publish waits
//! - **Subscription lifecycle**: `Unrequested` → `Pending` → `Active` →
//!   `Lost`, re-driven automatically across reconnects
//! - **Per-subscription inboxes**: Received messages are stored on the
//!   subscription they matched, with a monotonic delivery counter
//! - **Publish tracking**: Sent messages are logged on the session and
//!   expose `wait_for_communication` for the broker's acknowledgement
//! - **Protocol versions**: MQTT 3.1, 3.1.1 and 5.0, selected by any of
//!   the common version aliases
//! - **Transports**: Plain TCP and websockets, with optional TLS
//!
//! # Limitations
//!
//! The bundled `rumqttc` transport does not honor two configuration
//! fields: `tls_insecure` (the rustls default config always verifies
//! certificates) and `bind_address` (no local-address binding). Both are
//! accepted, warned about at connect time and otherwise ignored.
//!
//! # Quick Start
//!
//! ```no_run
//! use std::time::Duration;
//!
//! use mqtt_session::{MqttClient, MqttConfig, QoS};
//!
//! #[tokio::main]
//! async fn main() -> mqtt_session::Result<()> {
//!     let config = MqttConfig::builder()
//!         .host("broker.example.org")
//!         .credentials("user", "secret")
//!         .protocol_alias("3.1.1")?
//!         .build()?;
//!
//!     let client = MqttClient::new(config)?;
//!     client.start(true, Some(Duration::from_secs(5))).await?;
//!
//!     let subscription = client.subscribe("sensors/#", QoS::AtLeastOnce).await;
//!     subscription.wait_for_active(Some(Duration::from_secs(1))).await;
//!
//!     let sent = client
//!         .publish("sensors/attic", 21.5, QoS::AtLeastOnce, false)
//!         .await?;
//!     sent.wait_for_communication(Duration::from_secs(1)).await;
//!
//!     if subscription.wait_for_message(Some(Duration::from_secs(1))).await {
//!         for message in subscription.messages() {
//!             println!("{}: {:?}", message.topic(), message.payload());
//!         }
//!     }
//!
//!     client.stop().await
//! }
//! ```
//!
//! # Retained Messages
//!
//! Because subscriptions are re-activated on every reconnect, a retained
//! message is delivered again after `stop`/`start`; retained state is
//! cleared by publishing an empty payload to the topic:
//!
//! ```no_run
//! # use mqtt_session::{MqttClient, MqttConfig, QoS};
//! # async fn example(client: MqttClient) -> mqtt_session::Result<()> {
//! client.publish("config/node-1", "v2", QoS::AtLeastOnce, true).await?;
//! // ... later, delete the retained value:
//! client.publish("config/node-1", "", QoS::AtLeastOnce, true).await?;
//! # Ok(())
//! # }
//! ```

mod client;
pub mod config;
pub mod error;
mod message;
mod session;
mod subscription;
pub mod transport;
pub mod wait;

pub use client::{ConnectionState, MqttClient};
pub use config::{MqttConfig, MqttConfigBuilder, ProtocolVersion, TransportKind};
pub use error::{ConfigError, Error, Result, TransportError};
pub use message::{IntoPayload, Message};
pub use session::SessionRegistry;
pub use subscription::{Subscription, SubscriptionState};
pub use transport::{
    ConnectCode, Delivery, DisconnectReason, EventSink, MessageId, PublishToken, QoS,
    RumqttTransport, Transport,
};
