// SPDX-License-Identifier: MPL-2.0
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Session registry: the shared table of subscriptions and sent messages
//! for one client session.
//!
//! Resolves broker acknowledgement ids back to the subscription waiting on
//! them. The registry is mutated from both the transport's event task
//! (broker-driven changes) and calling tasks (`subscribe`/`publish`), so
//! both collections sit behind locks.

use std::sync::Arc;
use std::time::Duration;

use parking_lot::{Mutex, RwLock};

use crate::message::Message;
use crate::subscription::Subscription;
use crate::transport::{MessageId, QoS, Transport};
use crate::wait;

/// Poll-resolution divisor for the correlation-id retry lookup.
const RESOLVE_RESOLUTION: u32 = 20;

/// Subscription set and sent-message log for one client session.
///
/// Lives exactly as long as the client. Subscriptions survive reconnects;
/// the sent-message log is append-only and unbounded.
#[derive(Default)]
pub struct SessionRegistry {
    subscriptions: RwLock<Vec<Subscription>>,
    sent_messages: Mutex<Vec<Message>>,
}

impl SessionRegistry {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// Registers a subscription for `topic`, or refreshes the requested
    /// QoS of an existing one.
    ///
    /// Duplicate subscribes update in place: at most one subscription per
    /// topic is ever registered, and repeated calls return the same
    /// object.
    pub fn subscribe(
        &self,
        topic: &str,
        qos: QoS,
        transport: &Arc<dyn Transport>,
    ) -> Subscription {
        let mut subscriptions = self.subscriptions.write();
        if let Some(existing) = subscriptions.iter().find(|s| s.topic() == topic) {
            existing.set_qos(qos);
            tracing::debug!(topic = %topic, "subscribe on registered topic, updating in place");
            return existing.clone();
        }

        let subscription = Subscription::new(topic, qos, Arc::clone(transport));
        subscriptions.push(subscription.clone());
        subscription
    }

    /// Looks up the subscription registered for `topic`.
    #[must_use]
    pub fn find_by_topic(&self, topic: &str) -> Option<Subscription> {
        self.subscriptions
            .read()
            .iter()
            .find(|s| s.topic() == topic)
            .cloned()
    }

    /// Looks up the subscription whose pending request carries `mid`.
    #[must_use]
    pub fn find_by_mid(&self, mid: MessageId) -> Option<Subscription> {
        self.subscriptions
            .read()
            .iter()
            .find(|s| s.mid() == Some(mid))
            .cloned()
    }

    /// Looks up by correlation id, retrying briefly when the id is not
    /// recorded yet.
    ///
    /// An acknowledgement can arrive on the transport's event task before
    /// the requesting task has stored the id it was handed; the two
    /// streams cannot be mutex-ordered without risking deadlock against
    /// the transport's own locking, so the lookup itself waits the race
    /// out, bounded by `patience`.
    pub async fn resolve_mid(&self, mid: MessageId, patience: Duration) -> Option<Subscription> {
        if let Some(subscription) = self.find_by_mid(mid) {
            return Some(subscription);
        }

        let reason = format!("correlation id {mid} to be recorded");
        wait::wait_until(
            || self.find_by_mid(mid).is_some(),
            Some(patience),
            RESOLVE_RESOLUTION,
            &reason,
        )
        .await;
        self.find_by_mid(mid)
    }

    /// Removes a subscription; subsequent lookups for its topic or id
    /// return nothing.
    pub fn remove_subscription(&self, subscription: &Subscription) {
        self.subscriptions
            .write()
            .retain(|s| !s.same_object(subscription));
    }

    /// Snapshot of all registered subscriptions, in registration order.
    #[must_use]
    pub fn subscriptions(&self) -> Vec<Subscription> {
        self.subscriptions.read().clone()
    }

    /// Number of registered subscriptions.
    #[must_use]
    pub fn subscription_count(&self) -> usize {
        self.subscriptions.read().len()
    }

    /// Appends to the sent-message log. No deduplication; unbounded
    /// growth is a known limitation.
    pub fn add_sent_message(&self, message: Message) {
        self.sent_messages.lock().push(message);
    }

    /// Snapshot of the sent-message log, oldest first.
    #[must_use]
    pub fn sent_messages(&self) -> Vec<Message> {
        self.sent_messages.lock().clone()
    }
}

#[cfg(test)]
mod tests {
    use bytes::Bytes;

    use super::*;
    use crate::transport::PublishToken;
    use crate::transport::testing::StubTransport;

    fn transport() -> Arc<dyn Transport> {
        Arc::new(StubTransport::default())
    }

    #[test]
    fn duplicate_subscribe_updates_in_place() {
        let registry = SessionRegistry::new();
        let transport = transport();

        let first = registry.subscribe("t", QoS::AtLeastOnce, &transport);
        let second = registry.subscribe("t", QoS::ExactlyOnce, &transport);

        assert!(first.same_object(&second));
        assert_eq!(first.qos(), QoS::ExactlyOnce);
        assert_eq!(registry.subscription_count(), 1);
    }

    #[tokio::test]
    async fn lookup_by_topic_and_mid() {
        let registry = SessionRegistry::new();
        let transport = transport();

        let sub = registry.subscribe("a/b", QoS::AtLeastOnce, &transport);
        sub.activate().await;
        let mid = sub.mid().unwrap();

        assert!(registry.find_by_topic("a/b").unwrap().same_object(&sub));
        assert!(registry.find_by_mid(mid).unwrap().same_object(&sub));
        assert!(registry.find_by_topic("other").is_none());
        assert!(registry.find_by_mid(999).is_none());
    }

    #[test]
    fn removed_subscription_is_unresolvable() {
        let registry = SessionRegistry::new();
        let transport = transport();

        let sub = registry.subscribe("t", QoS::AtLeastOnce, &transport);
        registry.remove_subscription(&sub);

        assert!(registry.find_by_topic("t").is_none());
        assert_eq!(registry.subscription_count(), 0);
    }

    #[tokio::test]
    async fn resolve_mid_waits_out_the_recording_race() {
        let registry = Arc::new(SessionRegistry::new());
        let transport = transport();

        let sub = registry.subscribe("t", QoS::AtLeastOnce, &transport);
        let activator = sub.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            activator.activate().await;
        });

        // mid 1 is not recorded yet when the "ack" asks for it.
        let resolved = registry.resolve_mid(1, Duration::from_secs(2)).await;
        assert!(resolved.unwrap().same_object(&sub));
    }

    #[tokio::test(start_paused = true)]
    async fn resolve_mid_gives_up_after_patience() {
        let registry = SessionRegistry::new();
        assert!(registry.resolve_mid(42, Duration::from_millis(200)).await.is_none());
    }

    #[test]
    fn sent_message_log_is_append_only() {
        let registry = SessionRegistry::new();
        let message = Message::outbound(
            "t",
            Bytes::from_static(b"p"),
            QoS::AtLeastOnce,
            false,
            PublishToken::acknowledged(1),
        );

        registry.add_sent_message(message.clone());
        registry.add_sent_message(message.clone());
        assert_eq!(registry.sent_messages().len(), 2);
    }
}
