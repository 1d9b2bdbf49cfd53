// SPDX-License-Identifier: MPL-2.0
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Message entity: one unit of data in flight.
//!
//! A [`Message`] is either outbound (created at publish time, carrying a
//! [`PublishToken`] that tracks the broker acknowledgement) or inbound
//! (created when a delivery arrives on a subscription). Equality compares
//! topic, payload, qos and retain only, so a sent message can be compared
//! against its received echo.

use std::time::{Duration, Instant};

use bytes::Bytes;

use crate::transport::{Delivery, MessageId, PublishToken, QoS};

/// Conversion of publishable values into payload bytes.
///
/// Strings are encoded as UTF-8; numbers and booleans are stringified then
/// encoded; `None` becomes the empty payload (publishing an empty retained
/// payload clears the broker's retained message for the topic).
pub trait IntoPayload {
    /// Converts the value into payload bytes.
    fn into_payload(self) -> Bytes;
}

impl IntoPayload for Bytes {
    fn into_payload(self) -> Bytes {
        self
    }
}

impl IntoPayload for Vec<u8> {
    fn into_payload(self) -> Bytes {
        Bytes::from(self)
    }
}

impl IntoPayload for &[u8] {
    fn into_payload(self) -> Bytes {
        Bytes::copy_from_slice(self)
    }
}

impl IntoPayload for String {
    fn into_payload(self) -> Bytes {
        Bytes::from(self)
    }
}

impl IntoPayload for &str {
    fn into_payload(self) -> Bytes {
        Bytes::copy_from_slice(self.as_bytes())
    }
}

impl<T: IntoPayload> IntoPayload for Option<T> {
    fn into_payload(self) -> Bytes {
        self.map_or_else(Bytes::new, IntoPayload::into_payload)
    }
}

macro_rules! stringified_payload {
    ($($ty:ty),* $(,)?) => {
        $(impl IntoPayload for $ty {
            fn into_payload(self) -> Bytes {
                Bytes::from(self.to_string())
            }
        })*
    };
}

stringified_payload!(
    u8, u16, u32, u64, u128, usize, i8, i16, i32, i64, i128, isize, f32, f64, bool
);

/// One message, outbound or inbound.
///
/// Clones share the underlying acknowledgement state, so a clone stored in
/// the sent-message log observes the same `is_communicated` result as the
/// handle returned to the caller.
#[derive(Debug, Clone)]
pub struct Message {
    topic: String,
    payload: Bytes,
    qos: QoS,
    retain: bool,
    mid: Option<MessageId>,
    token: Option<PublishToken>,
    created_at: Instant,
}

impl Message {
    /// Creates an outbound message wrapping the transport's publish token.
    pub(crate) fn outbound(
        topic: impl Into<String>,
        payload: Bytes,
        qos: QoS,
        retain: bool,
        token: PublishToken,
    ) -> Self {
        Self {
            topic: topic.into(),
            payload,
            qos,
            retain,
            mid: Some(token.mid()),
            token: Some(token),
            created_at: Instant::now(),
        }
    }

    /// Creates an inbound message from a transport delivery.
    pub(crate) fn inbound(delivery: Delivery) -> Self {
        Self {
            topic: delivery.topic,
            payload: delivery.payload,
            qos: delivery.qos,
            retain: delivery.retain,
            mid: (delivery.mid != 0).then_some(delivery.mid),
            token: None,
            created_at: Instant::now(),
        }
    }

    /// Topic the message was published to.
    #[must_use]
    pub fn topic(&self) -> &str {
        &self.topic
    }

    /// Payload bytes.
    #[must_use]
    pub fn payload(&self) -> &Bytes {
        &self.payload
    }

    /// Quality-of-service level.
    #[must_use]
    pub fn qos(&self) -> QoS {
        self.qos
    }

    /// Retain flag.
    #[must_use]
    pub fn retain(&self) -> bool {
        self.retain
    }

    /// Correlation id, when one was assigned.
    #[must_use]
    pub fn mid(&self) -> Option<MessageId> {
        self.mid
    }

    /// Time elapsed since the message object was created.
    #[must_use]
    pub fn age(&self) -> Duration {
        self.created_at.elapsed()
    }

    /// Whether the message has completed transmission.
    ///
    /// Outbound messages report the broker's acknowledgement state at the
    /// negotiated QoS. Inbound messages are always communicated; arrival
    /// implies transmission.
    #[must_use]
    pub fn is_communicated(&self) -> bool {
        self.token.as_ref().is_none_or(PublishToken::is_published)
    }

    /// Blocks until transmission completes or `timeout` elapses, then
    /// returns [`is_communicated`](Self::is_communicated).
    ///
    /// A single best-effort check backed by the transport layer's own QoS
    /// handshake; nothing is retried here.
    pub async fn wait_for_communication(&self, timeout: Duration) -> bool {
        if let Some(token) = &self.token {
            token.wait_for_publish(timeout).await;
        }
        self.is_communicated()
    }
}

/// Topic, payload, qos and retain; correlation id, acknowledgement state
/// and timestamp are deliberately excluded so a sent message compares equal
/// to its broker echo.
impl PartialEq for Message {
    fn eq(&self, other: &Self) -> bool {
        self.topic == other.topic
            && self.payload == other.payload
            && self.qos == other.qos
            && self.retain == other.retain
    }
}

impl Eq for Message {}
