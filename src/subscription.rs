// SPDX-License-Identifier: MPL-2.0
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Subscription entity: one topic subscription and its delivery log.
//!
//! A subscription moves through `Unrequested -> Pending -> Active` and
//! falls back to `Lost` when the connection drops; reconnecting reactivates
//! the same object, preserving its message log. The atomic delivery counter
//! always equals the log length, and counter snapshots are what
//! [`Subscription::wait_for_message`] polls, so a delivery racing the
//! snapshot is still observed.

use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use parking_lot::{Mutex, RwLock};

use crate::message::Message;
use crate::transport::{Delivery, DisconnectReason, MessageId, QoS, Transport};
use crate::wait;

/// Poll-resolution divisor for subscription waits.
const WAIT_RESOLUTION: u32 = 10;

/// Acknowledgement state of a subscription.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubscriptionState {
    /// Created but never activated.
    Unrequested,
    /// Subscribe request sent, SUBACK outstanding.
    Pending,
    /// The broker granted the subscription.
    Active,
    /// The connection dropped; the broker no longer knows this
    /// subscription. Reactivated on reconnect.
    Lost,
}

/// One topic subscription.
///
/// Cheap to clone; all clones share state, the message log and the
/// delivery counter.
#[derive(Clone)]
pub struct Subscription {
    inner: Arc<SubscriptionInner>,
}

struct SubscriptionInner {
    topic: String,
    transport: Arc<dyn Transport>,
    link: RwLock<LinkState>,
    messages: Mutex<Vec<Message>>,
    total: AtomicU64,
}

/// Broker-facing link state, mutated from the transport's event task and
/// from calling threads.
struct LinkState {
    state: SubscriptionState,
    qos: QoS,
    mid: Option<MessageId>,
    granted_qos: Option<QoS>,
}

impl Subscription {
    pub(crate) fn new(topic: impl Into<String>, qos: QoS, transport: Arc<dyn Transport>) -> Self {
        Self {
            inner: Arc::new(SubscriptionInner {
                topic: topic.into(),
                transport,
                link: RwLock::new(LinkState {
                    state: SubscriptionState::Unrequested,
                    qos,
                    mid: None,
                    granted_qos: None,
                }),
                messages: Mutex::new(Vec::new()),
                total: AtomicU64::new(0),
            }),
        }
    }

    /// The subscribed topic filter.
    #[must_use]
    pub fn topic(&self) -> &str {
        &self.inner.topic
    }

    /// Requested quality-of-service level.
    #[must_use]
    pub fn qos(&self) -> QoS {
        self.inner.link.read().qos
    }

    pub(crate) fn set_qos(&self, qos: QoS) {
        self.inner.link.write().qos = qos;
    }

    /// Current acknowledgement state.
    #[must_use]
    pub fn state(&self) -> SubscriptionState {
        self.inner.link.read().state
    }

    /// Whether the broker currently holds this subscription.
    #[must_use]
    pub fn is_active(&self) -> bool {
        self.state() == SubscriptionState::Active
    }

    /// Correlation id of the pending (un)subscribe request.
    #[must_use]
    pub fn mid(&self) -> Option<MessageId> {
        self.inner.link.read().mid
    }

    /// QoS level the broker granted, once active.
    #[must_use]
    pub fn granted_qos(&self) -> Option<QoS> {
        self.inner.link.read().granted_qos
    }

    /// Total messages delivered over the lifetime of this object,
    /// surviving reconnects.
    #[must_use]
    pub fn total_message_count(&self) -> u64 {
        self.inner.total.load(Ordering::Acquire)
    }

    /// Snapshot of the delivered messages, oldest first.
    #[must_use]
    pub fn messages(&self) -> Vec<Message> {
        self.inner.messages.lock().clone()
    }

    /// The most recently delivered message, if any.
    #[must_use]
    pub fn last_message(&self) -> Option<Message> {
        self.inner.messages.lock().last().cloned()
    }

    /// Object identity; clones of one subscription compare equal.
    #[must_use]
    pub fn same_object(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }

    /// Issues the subscribe request and moves to `Pending`.
    ///
    /// Returns whether the transport accepted the request locally, not
    /// whether the broker acknowledged it yet; use
    /// [`wait_for_active`](Self::wait_for_active) for that.
    pub async fn activate(&self) -> bool {
        let qos = self.qos();
        match self.inner.transport.subscribe(&self.inner.topic, qos).await {
            Ok(mid) => {
                let mut link = self.inner.link.write();
                link.mid = Some(mid);
                // The SUBACK can beat this write; never demote Active.
                if link.state != SubscriptionState::Active {
                    link.state = SubscriptionState::Pending;
                }
                true
            }
            Err(err) => {
                tracing::error!(topic = %self.inner.topic, error = %err, "subscribe request rejected");
                false
            }
        }
    }

    /// Marks the subscription lost after a disconnect.
    ///
    /// Safe to call in any state and any number of times; a subscription
    /// that was never activated stays `Unrequested`.
    pub(crate) fn deactivate(&self, reason: DisconnectReason) {
        let mut link = self.inner.link.write();
        if link.state == SubscriptionState::Unrequested {
            return;
        }
        link.state = SubscriptionState::Lost;
        link.mid = None;
        tracing::debug!(topic = %self.inner.topic, %reason, "subscription lost");
    }

    /// Blocks until the subscription is active or `timeout` elapses.
    ///
    /// Activates first if necessary; also used on reconnect to re-drive a
    /// `Lost` subscription. Returns the final activity state.
    pub async fn wait_for_active(&self, timeout: Option<Duration>) -> bool {
        if self.is_active() {
            return true;
        }
        // A Pending subscription already has its request in flight.
        if matches!(
            self.state(),
            SubscriptionState::Unrequested | SubscriptionState::Lost
        ) && !self.activate().await
        {
            // Keep polling anyway; a reconnect-triggered reactivation may
            // still get there.
            tracing::debug!(topic = %self.inner.topic, "activation rejected locally, polling");
        }

        let reason = format!("subscription '{}' to become active", self.inner.topic);
        wait::wait_until(|| self.is_active(), timeout, WAIT_RESOLUTION, &reason).await
    }

    /// Blocks until a new message arrives or `timeout` elapses, returning
    /// whether one arrived.
    ///
    /// Compares against a counter snapshot taken at entry, so a delivery
    /// racing the call is still observed.
    pub async fn wait_for_message(&self, timeout: Option<Duration>) -> bool {
        let snapshot = self.total_message_count();
        let reason = format!("message on '{}'", self.inner.topic);
        wait::wait_until(
            || self.total_message_count() != snapshot,
            timeout,
            WAIT_RESOLUTION,
            &reason,
        )
        .await
    }

    /// Applies the SUBACK. A granted QoS marks the subscription active; a
    /// broker rejection is logged and leaves it non-active.
    pub(crate) fn subscribe_callback(&self, granted_qos: Option<QoS>) {
        let mut link = self.inner.link.write();
        match granted_qos {
            Some(qos) => {
                link.granted_qos = Some(qos);
                link.state = SubscriptionState::Active;
                drop(link);
                tracing::info!(topic = %self.inner.topic, granted = qos.as_u8(), "subscription active");
            }
            None => {
                drop(link);
                tracing::error!(topic = %self.inner.topic, "broker rejected subscription");
            }
        }
    }

    /// Appends an inbound delivery to the message log.
    pub(crate) fn record_delivery(&self, delivery: Delivery) {
        let message = Message::inbound(delivery);
        let mut messages = self.inner.messages.lock();
        messages.push(message);
        self.inner.total.store(messages.len() as u64, Ordering::Release);
        drop(messages);
        tracing::debug!(
            topic = %self.inner.topic,
            total = self.total_message_count(),
            "message recorded"
        );
    }

    /// Records the correlation id of an in-flight unsubscribe request.
    pub(crate) fn record_unsubscribe(&self, mid: MessageId) {
        self.inner.link.write().mid = Some(mid);
    }

    /// Resets link state once the broker acknowledged removal.
    pub(crate) fn mark_unsubscribed(&self) {
        let mut link = self.inner.link.write();
        link.state = SubscriptionState::Unrequested;
        link.mid = None;
        link.granted_qos = None;
    }
}

impl fmt::Debug for Subscription {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Subscription")
            .field("topic", &self.inner.topic)
            .field("state", &self.state())
            .field("total_message_count", &self.total_message_count())
            .finish_non_exhaustive()
    }
}
