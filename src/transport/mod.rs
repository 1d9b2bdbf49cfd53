// SPDX-License-Identifier: MPL-2.0
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Transport capability consumed by the session layer.
//!
//! The MQTT wire protocol is an external collaborator. This module defines
//! the seam: a [`Transport`] the session layer issues requests through, and
//! an [`EventSink`] the client façade implements to receive broker events
//! (connect, disconnect, acknowledgements, deliveries). Tests inject a
//! scripted transport through the same seam; production wiring lives in
//! [`RumqttTransport`].

mod rumqtt;
mod topic;

pub use rumqtt::RumqttTransport;
pub use topic::filter_matches;

use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use serde::{Deserialize, Serialize};
use tokio::sync::Notify;

use crate::config::MqttConfig;
use crate::error::{Error, TransportError};

/// Correlation id tying a request to its eventual broker acknowledgement.
pub type MessageId = u16;

/// MQTT delivery guarantee level.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub enum QoS {
    /// Fire and forget.
    AtMostOnce,
    /// Acknowledged delivery (PUBACK).
    AtLeastOnce,
    /// Assured single delivery (PUBREC/PUBREL/PUBCOMP).
    ExactlyOnce,
}

impl QoS {
    /// Returns the protocol-level numeric value (0-2).
    #[must_use]
    pub fn as_u8(self) -> u8 {
        match self {
            Self::AtMostOnce => 0,
            Self::AtLeastOnce => 1,
            Self::ExactlyOnce => 2,
        }
    }
}

impl TryFrom<u8> for QoS {
    type Error = Error;

    fn try_from(value: u8) -> Result<Self, Error> {
        match value {
            0 => Ok(Self::AtMostOnce),
            1 => Ok(Self::AtLeastOnce),
            2 => Ok(Self::ExactlyOnce),
            other => Err(Error::InvalidQos(other)),
        }
    }
}

/// Broker response to a connect request, mirroring the protocol-level
/// CONNACK return codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectCode {
    /// Connection accepted.
    Accepted,
    /// The broker does not speak the requested protocol revision.
    RefusedProtocolVersion,
    /// The client identifier was rejected.
    BadClientId,
    /// The broker is unavailable.
    ServiceUnavailable,
    /// Malformed username or password.
    BadCredentials,
    /// The client is not authorized to connect.
    NotAuthorized,
}

impl ConnectCode {
    /// Returns true for an accepted connection.
    #[must_use]
    pub fn is_success(self) -> bool {
        self == Self::Accepted
    }
}

impl fmt::Display for ConnectCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let text = match self {
            Self::Accepted => "accepted",
            Self::RefusedProtocolVersion => "refused protocol version",
            Self::BadClientId => "bad client id",
            Self::ServiceUnavailable => "service unavailable",
            Self::BadCredentials => "bad credentials",
            Self::NotAuthorized => "not authorized",
        };
        f.write_str(text)
    }
}

/// Why the transport connection ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DisconnectReason {
    /// The client requested the disconnect.
    Requested,
    /// The broker closed the connection or the link dropped.
    ConnectionLost,
}

impl fmt::Display for DisconnectReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Requested => f.write_str("requested"),
            Self::ConnectionLost => f.write_str("connection lost"),
        }
    }
}

/// One inbound message as handed over by the transport.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Delivery {
    /// Topic the message was published to.
    pub topic: String,
    /// Raw payload bytes.
    pub payload: Bytes,
    /// Delivery quality-of-service level.
    pub qos: QoS,
    /// Whether the broker flagged this as a retained message.
    pub retain: bool,
    /// Packet id, zero for QoS 0 deliveries.
    pub mid: MessageId,
}

/// Handle to an outbound publish, tracking broker acknowledgement.
///
/// Cheap to clone; all clones observe the same acknowledgement state.
/// A QoS 0 publish is considered acknowledged as soon as it is handed to
/// the transport.
#[derive(Debug, Clone)]
pub struct PublishToken {
    mid: MessageId,
    state: Arc<TokenState>,
}

#[derive(Debug)]
struct TokenState {
    published: AtomicBool,
    notify: Notify,
}

impl PublishToken {
    /// Creates a token awaiting broker acknowledgement.
    #[must_use]
    pub fn new(mid: MessageId) -> Self {
        Self {
            mid,
            state: Arc::new(TokenState {
                published: AtomicBool::new(false),
                notify: Notify::new(),
            }),
        }
    }

    /// Creates a token that is already acknowledged (QoS 0).
    #[must_use]
    pub fn acknowledged(mid: MessageId) -> Self {
        let token = Self::new(mid);
        token.state.published.store(true, Ordering::Release);
        token
    }

    /// Returns the correlation id assigned to the publish request.
    #[must_use]
    pub fn mid(&self) -> MessageId {
        self.mid
    }

    /// Whether the broker has acknowledged receipt at the negotiated QoS.
    #[must_use]
    pub fn is_published(&self) -> bool {
        self.state.published.load(Ordering::Acquire)
    }

    /// Marks the publish as acknowledged and wakes all waiters.
    pub fn mark_published(&self) {
        self.state.published.store(true, Ordering::Release);
        self.state.notify.notify_waiters();
    }

    /// Blocks until the publish is acknowledged or `timeout` elapses,
    /// returning the final acknowledgement state.
    pub async fn wait_for_publish(&self, timeout: Duration) -> bool {
        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            if self.is_published() {
                return true;
            }
            let notified = self.state.notify.notified();
            // An acknowledgement between the check above and registering
            // the waiter would otherwise be missed.
            if self.is_published() {
                return true;
            }
            if tokio::time::timeout_at(deadline, notified).await.is_err() {
                return self.is_published();
            }
        }
    }
}

/// Handler armed per topic filter; receives every matching delivery.
pub type RouteHandler = Arc<dyn Fn(Delivery) + Send + Sync>;

/// Receiver of broker events, implemented by the client façade.
///
/// One background task owned by the transport drives all of these
/// callbacks; implementations must not block it indefinitely.
#[async_trait]
pub trait EventSink: Send + Sync {
    /// Connect acknowledgement arrived.
    async fn on_connect(&self, code: ConnectCode);

    /// The connection ended.
    async fn on_disconnect(&self, reason: DisconnectReason);

    /// Subscribe acknowledgement arrived; `granted_qos` is `None` when the
    /// broker rejected the subscription.
    async fn on_subscribe_ack(&self, mid: MessageId, granted_qos: Option<QoS>);

    /// Unsubscribe acknowledgement arrived.
    async fn on_unsubscribe_ack(&self, mid: MessageId);

    /// A delivery no armed route claimed.
    async fn on_message(&self, delivery: Delivery);
}

/// Opaque protocol-client capability the session layer drives.
///
/// Request methods report only local acceptance; broker acknowledgements
/// arrive later through the [`EventSink`] with the returned correlation id.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Establishes the connection and starts background event processing.
    /// Broker events are delivered to `sink` until the connection ends.
    async fn connect(
        &self,
        config: &MqttConfig,
        sink: Arc<dyn EventSink>,
    ) -> Result<(), TransportError>;

    /// Requests disconnect and halts background event processing.
    async fn disconnect(&self) -> Result<(), TransportError>;

    /// Issues a subscribe request; the SUBACK arrives via the sink.
    async fn subscribe(&self, topic: &str, qos: QoS) -> Result<MessageId, TransportError>;

    /// Issues an unsubscribe request; the UNSUBACK arrives via the sink.
    async fn unsubscribe(&self, topic: &str) -> Result<MessageId, TransportError>;

    /// Hands a message to the transport for publishing. The returned token
    /// tracks the broker's acknowledgement.
    async fn publish(
        &self,
        topic: &str,
        payload: Bytes,
        qos: QoS,
        retain: bool,
    ) -> Result<PublishToken, TransportError>;

    /// Whether the transport currently holds an acknowledged connection.
    fn is_connected(&self) -> bool;

    /// Arms a per-topic delivery handler. Deliveries matching `filter` go
    /// to `handler` instead of [`EventSink::on_message`]. An existing route
    /// for the same filter is replaced.
    fn add_route(&self, filter: &str, handler: RouteHandler);

    /// Detaches the delivery handler for `filter`.
    fn remove_route(&self, filter: &str);
}
