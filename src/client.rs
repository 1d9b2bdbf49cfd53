// SPDX-License-Identifier: MPL-2.0
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Client façade.
//!
//! Owns one session registry and one transport handle, implements the
//! transport's [`EventSink`] to wire broker events into registry,
//! subscription and message state, and exposes the linear API:
//! `start`/`stop`, `subscribe`/`unsubscribe`, `publish`.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::RwLock;

use crate::config::MqttConfig;
use crate::error::Result;
use crate::message::{IntoPayload, Message};
use crate::session::SessionRegistry;
use crate::subscription::Subscription;
use crate::transport::{
    ConnectCode, Delivery, DisconnectReason, EventSink, MessageId, QoS, RumqttTransport,
    Transport,
};
use crate::wait;

/// How long an acknowledgement lookup retries before the correlation id is
/// declared unknown. The id race window is tiny; a few seconds is ample.
const ACK_PATIENCE: Duration = Duration::from_secs(3);

/// Connection status of the client.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum ConnectionState {
    /// No connection; the initial state.
    #[default]
    Disconnected,
    /// `start` was called, CONNACK outstanding.
    Connecting,
    /// The broker accepted the connection.
    Connected,
}

/// MQTT client with session tracking and blocking wait primitives.
///
/// # Examples
///
/// ```no_run
/// use std::time::Duration;
///
/// use mqtt_session::{MqttClient, MqttConfig, QoS};
///
/// #[tokio::main]
/// async fn main() -> mqtt_session::Result<()> {
///     let config = MqttConfig::builder().host("127.0.0.1").build()?;
///     let client = MqttClient::new(config)?;
///     client.start(true, Some(Duration::from_secs(5))).await?;
///
///     let subscription = client.subscribe("sensors/#", QoS::AtLeastOnce).await;
///     subscription.wait_for_active(Some(Duration::from_secs(1))).await;
///
///     let sent = client.publish("sensors/attic", "21.5", QoS::AtLeastOnce, false).await?;
///     sent.wait_for_communication(Duration::from_secs(1)).await;
///
///     if subscription.wait_for_message(Some(Duration::from_secs(1))).await {
///         println!("echo: {:?}", subscription.last_message());
///     }
///
///     client.stop().await
/// }
/// ```
pub struct MqttClient {
    shared: Arc<ClientShared>,
}

/// State shared between the façade and the transport's event task.
struct ClientShared {
    config: MqttConfig,
    transport: Arc<dyn Transport>,
    session: SessionRegistry,
    connection: RwLock<ConnectionInfo>,
}

#[derive(Default)]
struct ConnectionInfo {
    state: ConnectionState,
    connect_code: Option<ConnectCode>,
    disconnect_reason: Option<DisconnectReason>,
}

impl MqttClient {
    /// Creates a client over the production `rumqttc` transport.
    ///
    /// # Errors
    ///
    /// Returns a config error when the configuration is invalid.
    pub fn new(config: MqttConfig) -> Result<Self> {
        Self::with_transport(config, Arc::new(RumqttTransport::new()))
    }

    /// Creates a client over a caller-supplied transport. This is the
    /// injection point for scripted transports in tests.
    ///
    /// # Errors
    ///
    /// Returns a config error when the configuration is invalid.
    pub fn with_transport(mut config: MqttConfig, transport: Arc<dyn Transport>) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            shared: Arc::new(ClientShared {
                config,
                transport,
                session: SessionRegistry::new(),
                connection: RwLock::new(ConnectionInfo::default()),
            }),
        })
    }

    /// Establishes the connection and starts background event processing.
    ///
    /// With `blocking` the call also waits, via the generic wait
    /// primitive, until the connection is acknowledged or `timeout`
    /// elapses; check [`is_connected`](Self::is_connected) afterwards.
    ///
    /// # Errors
    ///
    /// Returns a transport error when the connection cannot be
    /// established or the broker refuses it. Connect failures are not
    /// retried here; call `start` again to reconnect.
    pub async fn start(&self, blocking: bool, timeout: Option<Duration>) -> Result<()> {
        self.shared.set_state(ConnectionState::Connecting);

        let sink: Arc<dyn EventSink> = Arc::clone(&self.shared) as Arc<dyn EventSink>;
        if let Err(err) = self.shared.transport.connect(&self.shared.config, sink).await {
            self.shared.set_state(ConnectionState::Disconnected);
            return Err(err.into());
        }

        if blocking {
            let reason = format!(
                "connection to {}:{}",
                self.shared.config.host(),
                self.shared.config.port()
            );
            wait::wait_until(
                || self.is_connected(),
                timeout,
                wait::DEFAULT_RESOLUTION,
                &reason,
            )
            .await;
        }
        Ok(())
    }

    /// Disconnects and halts background event processing.
    ///
    /// Subscriptions and the sent-message history are kept; on the next
    /// `start` every registered subscription is re-activated, which is
    /// what makes retained messages reappear after a reconnect.
    ///
    /// # Errors
    ///
    /// Returns a transport error when the disconnect request fails.
    pub async fn stop(&self) -> Result<()> {
        self.shared.transport.disconnect().await?;
        self.shared.on_disconnect(DisconnectReason::Requested).await;
        Ok(())
    }

    /// Whether the transport holds an acknowledged connection.
    #[must_use]
    pub fn is_connected(&self) -> bool {
        self.shared.transport.is_connected()
    }

    /// Current connection state.
    #[must_use]
    pub fn connection_state(&self) -> ConnectionState {
        self.shared.connection.read().state
    }

    /// Result code of the most recent connect acknowledgement.
    #[must_use]
    pub fn connect_code(&self) -> Option<ConnectCode> {
        self.shared.connection.read().connect_code
    }

    /// Reason for the most recent disconnect.
    #[must_use]
    pub fn disconnect_reason(&self) -> Option<DisconnectReason> {
        self.shared.connection.read().disconnect_reason
    }

    /// The session registry owned by this client.
    #[must_use]
    pub fn session(&self) -> &SessionRegistry {
        &self.shared.session
    }

    /// The connection configuration.
    #[must_use]
    pub fn config(&self) -> &MqttConfig {
        &self.shared.config
    }

    /// Registers a subscription for `topic` and, when connected, drives it
    /// to `Pending` immediately.
    ///
    /// Always succeeds locally. Subscribing to an already-registered topic
    /// updates the existing subscription in place and returns it. Use
    /// [`Subscription::wait_for_active`] to block on the broker's
    /// acknowledgement.
    pub async fn subscribe(&self, topic: &str, qos: QoS) -> Subscription {
        let subscription = self
            .shared
            .session
            .subscribe(topic, qos, &self.shared.transport);
        if self.shared.transport.is_connected() && !subscription.is_active() {
            subscription.activate().await;
        }
        subscription
    }

    /// Requests removal of the subscription for `topic`, returning it, or
    /// `None` when no subscription is registered for the topic.
    ///
    /// The subscription leaves the registry once the broker acknowledges.
    ///
    /// # Errors
    ///
    /// Returns a transport error when the unsubscribe request is rejected
    /// locally.
    pub async fn unsubscribe(&self, topic: &str) -> Result<Option<Subscription>> {
        let Some(subscription) = self.shared.session.find_by_topic(topic) else {
            tracing::debug!(topic = %topic, "unsubscribe for unregistered topic");
            return Ok(None);
        };

        let mid = self.shared.transport.unsubscribe(topic).await?;
        subscription.record_unsubscribe(mid);
        Ok(Some(subscription))
    }

    /// Hands a message to the transport and records it in the session's
    /// sent-message log.
    ///
    /// Returns immediately; use [`Message::wait_for_communication`] to
    /// block on the broker's acknowledgement.
    ///
    /// # Errors
    ///
    /// Returns a transport error when the publish is rejected locally.
    pub async fn publish(
        &self,
        topic: &str,
        payload: impl IntoPayload,
        qos: QoS,
        retain: bool,
    ) -> Result<Message> {
        let payload = payload.into_payload();
        let token = self
            .shared
            .transport
            .publish(topic, payload.clone(), qos, retain)
            .await?;

        let message = Message::outbound(topic, payload, qos, retain, token);
        self.shared.session.add_sent_message(message.clone());
        Ok(message)
    }
}

impl fmt::Debug for MqttClient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MqttClient")
            .field("host", &self.shared.config.host())
            .field("state", &self.connection_state())
            .field("subscriptions", &self.shared.session.subscription_count())
            .finish_non_exhaustive()
    }
}

impl ClientShared {
    fn set_state(&self, state: ConnectionState) {
        self.connection.write().state = state;
    }
}

#[async_trait]
impl EventSink for ClientShared {
    async fn on_connect(&self, code: ConnectCode) {
        {
            let mut connection = self.connection.write();
            connection.connect_code = Some(code);
            connection.state = if code.is_success() {
                ConnectionState::Connected
            } else {
                ConnectionState::Disconnected
            };
        }

        if !code.is_success() {
            tracing::error!(%code, "broker refused connection");
            return;
        }
        tracing::info!(%code, "connected");

        // A fresh broker connection holds no subscription state; re-drive
        // everything the session still knows about. On a separate task:
        // this callback runs on the transport's event task, and activation
        // sends requests the event task itself must keep draining.
        let subscriptions = self.session.subscriptions();
        if !subscriptions.is_empty() {
            tokio::spawn(async move {
                for subscription in subscriptions {
                    subscription.activate().await;
                }
            });
        }
    }

    async fn on_disconnect(&self, reason: DisconnectReason) {
        {
            let mut connection = self.connection.write();
            connection.state = ConnectionState::Disconnected;
            connection.disconnect_reason = Some(reason);
        }
        tracing::info!(%reason, "disconnected");

        for subscription in self.session.subscriptions() {
            subscription.deactivate(reason);
        }
    }

    async fn on_subscribe_ack(&self, mid: MessageId, granted_qos: Option<QoS>) {
        let Some(subscription) = self.session.resolve_mid(mid, ACK_PATIENCE).await else {
            tracing::warn!(mid, "SUBACK for unknown correlation id, dropping");
            return;
        };

        subscription.subscribe_callback(granted_qos);
        if granted_qos.is_some() {
            let receiver = subscription.clone();
            self.transport.add_route(
                subscription.topic(),
                Arc::new(move |delivery| receiver.record_delivery(delivery)),
            );
        }
    }

    async fn on_unsubscribe_ack(&self, mid: MessageId) {
        let Some(subscription) = self.session.resolve_mid(mid, ACK_PATIENCE).await else {
            tracing::warn!(mid, "UNSUBACK for unknown correlation id, dropping");
            return;
        };

        self.transport.remove_route(subscription.topic());
        subscription.mark_unsubscribed();
        self.session.remove_subscription(&subscription);
        tracing::info!(topic = %subscription.topic(), "unsubscribed");
    }

    async fn on_message(&self, delivery: Delivery) {
        // No armed route claimed this delivery: a wiring defect, not a
        // transport fault.
        tracing::error!(
            topic = %delivery.topic,
            qos = delivery.qos.as_u8(),
            retain = delivery.retain,
            bytes = delivery.payload.len(),
            "delivery without a matching subscription"
        );
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::time::Duration;

    use parking_lot::Mutex;
    use tokio::sync::mpsc;

    use std::result::Result;

    use super::*;
    use crate::error::{ConfigError, Error, TransportError};
    use crate::subscription::SubscriptionState;
    use crate::transport::testing::StubTransport;
    use crate::transport::{PublishToken, RouteHandler};

    /// Pushes every subscribe request into a bounded channel the test
    /// drains, mimicking a request queue that only the transport's event
    /// task empties.
    struct ChokedTransport {
        requests: mpsc::Sender<String>,
        sink: Mutex<Option<Arc<dyn EventSink>>>,
        connected: AtomicBool,
        next_mid: std::sync::atomic::AtomicU16,
    }

    impl ChokedTransport {
        fn new(capacity: usize) -> (Arc<Self>, mpsc::Receiver<String>) {
            let (requests, rx) = mpsc::channel(capacity);
            let transport = Arc::new(Self {
                requests,
                sink: Mutex::new(None),
                connected: AtomicBool::new(false),
                next_mid: std::sync::atomic::AtomicU16::new(0),
            });
            (transport, rx)
        }

        fn sink(&self) -> Arc<dyn EventSink> {
            self.sink.lock().clone().unwrap()
        }
    }

    #[async_trait]
    impl Transport for ChokedTransport {
        async fn connect(
            &self,
            _config: &MqttConfig,
            sink: Arc<dyn EventSink>,
        ) -> Result<(), TransportError> {
            *self.sink.lock() = Some(sink);
            self.connected.store(true, Ordering::Release);
            Ok(())
        }

        async fn disconnect(&self) -> Result<(), TransportError> {
            self.connected.store(false, Ordering::Release);
            Ok(())
        }

        async fn subscribe(&self, topic: &str, _qos: QoS) -> Result<MessageId, TransportError> {
            self.requests
                .send(topic.to_owned())
                .await
                .map_err(|_| TransportError::NotConnected)?;
            Ok(self.next_mid.fetch_add(1, Ordering::Relaxed) + 1)
        }

        async fn unsubscribe(&self, _topic: &str) -> Result<MessageId, TransportError> {
            Ok(self.next_mid.fetch_add(1, Ordering::Relaxed) + 1)
        }

        async fn publish(
            &self,
            _topic: &str,
            _payload: bytes::Bytes,
            _qos: QoS,
            _retain: bool,
        ) -> Result<PublishToken, TransportError> {
            Ok(PublishToken::acknowledged(1))
        }

        fn is_connected(&self) -> bool {
            self.connected.load(Ordering::Acquire)
        }

        fn add_route(&self, _filter: &str, _handler: RouteHandler) {}

        fn remove_route(&self, _filter: &str) {}
    }

    fn client() -> MqttClient {
        let config = MqttConfig::builder().host("broker").build().unwrap();
        MqttClient::with_transport(config, Arc::new(StubTransport::default())).unwrap()
    }

    #[test]
    fn invalid_config_fails_construction() {
        let result = MqttClient::with_transport(
            MqttConfig::default(),
            Arc::new(StubTransport::default()),
        );
        assert!(matches!(
            result,
            Err(Error::Config(ConfigError::MissingHost))
        ));
    }

    #[test]
    fn initial_state_is_disconnected() {
        let client = client();
        assert_eq!(client.connection_state(), ConnectionState::Disconnected);
        assert!(!client.is_connected());
        assert_eq!(client.connect_code(), None);
    }

    #[tokio::test]
    async fn subscribe_while_disconnected_stays_unrequested() {
        let client = client();
        let subscription = client.subscribe("t", QoS::AtLeastOnce).await;
        assert_eq!(subscription.state(), SubscriptionState::Unrequested);
    }

    #[tokio::test]
    async fn subscribe_while_connected_is_driven_to_pending() {
        let client = client();
        client.start(false, None).await.unwrap();
        let subscription = client.subscribe("t", QoS::AtLeastOnce).await;
        assert_eq!(subscription.state(), SubscriptionState::Pending);
    }

    #[tokio::test]
    async fn unsubscribe_unknown_topic_is_none() {
        let client = client();
        assert!(client.unsubscribe("nope").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn reconnect_reactivation_outlasts_the_request_queue() {
        let (transport, mut requests) = ChokedTransport::new(2);
        let config = MqttConfig::builder().host("broker").build().unwrap();
        let client = MqttClient::with_transport(config, Arc::clone(&transport) as _).unwrap();

        // More registered subscriptions than the request queue holds.
        for i in 0..6 {
            client.subscribe(&format!("t/{i}"), QoS::AtMostOnce).await;
        }
        client.start(false, None).await.unwrap();

        // The connect callback must hand the reactivation work off and
        // return while the queue is still full.
        tokio::time::timeout(
            Duration::from_secs(1),
            transport.sink().on_connect(ConnectCode::Accepted),
        )
        .await
        .expect("on_connect blocked on a full request queue");

        // Draining the queue lets every registered topic through.
        let mut reactivated = Vec::new();
        for _ in 0..6 {
            let topic = tokio::time::timeout(Duration::from_secs(1), requests.recv())
                .await
                .expect("reactivation stalled")
                .unwrap();
            reactivated.push(topic);
        }
        reactivated.sort();
        let expected: Vec<String> = (0..6).map(|i| format!("t/{i}")).collect();
        assert_eq!(reactivated, expected);
    }

    #[tokio::test]
    async fn publish_records_sent_message() {
        let client = client();
        client.start(false, None).await.unwrap();

        let message = client
            .publish("t", "payload", QoS::AtLeastOnce, false)
            .await
            .unwrap();
        assert_eq!(client.session().sent_messages(), vec![message]);
    }
}
