// SPDX-License-Identifier: MPL-2.0
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Production transport backed by `rumqttc`.
//!
//! Each `connect` builds a fresh `AsyncClient`/`EventLoop` pair and spawns
//! a background task that drives broker events into the [`EventSink`], so a
//! stopped client can be restarted with changed connection parameters.
//!
//! `rumqttc`'s request methods do not expose packet ids, so this transport
//! assigns its own correlation ids and matches broker acknowledgements to
//! in-flight requests in FIFO order; a broker acknowledges the requests of
//! one connection in the order they were sent.

use std::collections::VecDeque;
use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU16, AtomicU64, Ordering};

use async_trait::async_trait;
use bytes::Bytes;
use parking_lot::{Mutex, RwLock};
use rumqttc::{
    AsyncClient, ConnectReturnCode, Event, EventLoop, MqttOptions, Packet, QoS as WireQos,
    SubscribeReasonCode,
};
use tokio::sync::oneshot;

use super::{
    ConnectCode, Delivery, DisconnectReason, EventSink, MessageId, PublishToken, QoS,
    RouteHandler, Transport, topic,
};
use crate::config::{MqttConfig, TransportKind};
use crate::error::TransportError;

/// Request channel capacity handed to `AsyncClient::new`.
const REQUEST_CAPACITY: usize = 10;

/// Transport implementation over `rumqttc::AsyncClient`.
#[derive(Clone, Default)]
pub struct RumqttTransport {
    inner: Arc<Shared>,
}

#[derive(Default)]
struct Shared {
    /// Present once `connect` has built a client; replaced on reconnect.
    client: Mutex<Option<AsyncClient>>,
    connected: AtomicBool,
    next_mid: AtomicU16,
    pending: Mutex<Pending>,
    routes: RwLock<Vec<(String, RouteHandler)>>,
    /// Bumped on every connect/disconnect; an event-loop task exits when
    /// its generation is superseded.
    generation: AtomicU64,
}

/// In-flight requests awaiting a broker acknowledgement, per kind, in
/// send order. QoS 1 and QoS 2 publishes complete with different packets
/// (PUBACK vs PUBCOMP) and so keep separate queues; a QoS 2 handshake
/// still in flight must not swallow a QoS 1 acknowledgement.
#[derive(Default)]
struct Pending {
    subscribes: VecDeque<MessageId>,
    unsubscribes: VecDeque<MessageId>,
    qos1_publishes: VecDeque<PublishToken>,
    qos2_publishes: VecDeque<PublishToken>,
}

impl Pending {
    fn clear(&mut self) {
        self.subscribes.clear();
        self.unsubscribes.clear();
        self.qos1_publishes.clear();
        self.qos2_publishes.clear();
    }
}

impl Shared {
    /// Assigns the next correlation id, skipping zero.
    fn next_mid(&self) -> MessageId {
        loop {
            let mid = self.next_mid.fetch_add(1, Ordering::Relaxed);
            if mid != 0 {
                return mid;
            }
        }
    }

    /// Routes a delivery through the filter table. Returns false when no
    /// armed route claimed it.
    fn dispatch(&self, delivery: &Delivery) -> bool {
        let routes = self.routes.read();
        let mut routed = false;
        for (filter, handler) in routes.iter() {
            if topic::filter_matches(filter, &delivery.topic) {
                handler(delivery.clone());
                routed = true;
            }
        }
        routed
    }

    /// Completes the oldest in-flight QoS 1 publish (PUBACK).
    fn ack_qos1_publish(&self) {
        let token = self.pending.lock().qos1_publishes.pop_front();
        if let Some(token) = token {
            token.mark_published();
        } else {
            tracing::warn!("PUBACK with no in-flight QoS 1 publish");
        }
    }

    /// Completes the oldest in-flight QoS 2 publish (PUBCOMP).
    fn ack_qos2_publish(&self) {
        let token = self.pending.lock().qos2_publishes.pop_front();
        if let Some(token) = token {
            token.mark_published();
        } else {
            tracing::warn!("PUBCOMP with no in-flight QoS 2 publish");
        }
    }
}

impl RumqttTransport {
    /// Creates a transport with no connection; `connect` builds the client.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn client_handle(&self) -> Result<AsyncClient, TransportError> {
        self.inner
            .client
            .lock()
            .clone()
            .ok_or(TransportError::NotConnected)
    }
}

impl fmt::Debug for RumqttTransport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RumqttTransport")
            .field("connected", &self.is_connected())
            .finish_non_exhaustive()
    }
}

#[async_trait]
impl Transport for RumqttTransport {
    async fn connect(
        &self,
        config: &MqttConfig,
        sink: Arc<dyn EventSink>,
    ) -> Result<(), TransportError> {
        let options = build_options(config);
        let (client, event_loop) = AsyncClient::new(options, REQUEST_CAPACITY);

        let generation = self.inner.generation.fetch_add(1, Ordering::SeqCst) + 1;
        *self.inner.client.lock() = Some(client);
        self.inner.pending.lock().clear();

        tracing::info!(
            host = %config.host(),
            port = config.port(),
            client_id = %config.client_id(),
            "connecting to broker"
        );

        let (ready_tx, ready_rx) = oneshot::channel();
        let shared = Arc::clone(&self.inner);
        tokio::spawn(run_event_loop(shared, event_loop, sink, generation, ready_tx));

        match ready_rx.await {
            Ok(Ok(())) => Ok(()),
            Ok(Err(err)) => Err(err),
            Err(_) => Err(TransportError::ConnectionFailed(
                "event loop terminated before the connect completed".to_string(),
            )),
        }
    }

    async fn disconnect(&self) -> Result<(), TransportError> {
        let client = self.inner.client.lock().clone();
        self.inner.connected.store(false, Ordering::Release);
        self.inner.generation.fetch_add(1, Ordering::SeqCst);

        if let Some(client) = client
            && let Err(err) = client.disconnect().await
        {
            tracing::debug!(error = %err, "disconnect request not delivered; connection already closed");
        }
        Ok(())
    }

    async fn subscribe(&self, topic: &str, qos: QoS) -> Result<MessageId, TransportError> {
        let client = self.client_handle()?;
        let mid = self.inner.next_mid();
        self.inner.pending.lock().subscribes.push_back(mid);

        if let Err(err) = client.subscribe(topic, wire_qos(qos)).await {
            let mut pending = self.inner.pending.lock();
            if let Some(pos) = pending.subscribes.iter().rposition(|m| *m == mid) {
                pending.subscribes.remove(pos);
            }
            return Err(err.into());
        }

        tracing::debug!(topic = %topic, qos = qos.as_u8(), mid, "subscribe requested");
        Ok(mid)
    }

    async fn unsubscribe(&self, topic: &str) -> Result<MessageId, TransportError> {
        let client = self.client_handle()?;
        let mid = self.inner.next_mid();
        self.inner.pending.lock().unsubscribes.push_back(mid);

        if let Err(err) = client.unsubscribe(topic).await {
            let mut pending = self.inner.pending.lock();
            if let Some(pos) = pending.unsubscribes.iter().rposition(|m| *m == mid) {
                pending.unsubscribes.remove(pos);
            }
            return Err(err.into());
        }

        tracing::debug!(topic = %topic, mid, "unsubscribe requested");
        Ok(mid)
    }

    async fn publish(
        &self,
        topic: &str,
        payload: Bytes,
        qos: QoS,
        retain: bool,
    ) -> Result<PublishToken, TransportError> {
        let client = self.client_handle()?;
        let mid = self.inner.next_mid();

        // QoS 0 has no acknowledgement; the token is born published.
        let token = match qos {
            QoS::AtMostOnce => PublishToken::acknowledged(mid),
            QoS::AtLeastOnce => {
                let token = PublishToken::new(mid);
                self.inner.pending.lock().qos1_publishes.push_back(token.clone());
                token
            }
            QoS::ExactlyOnce => {
                let token = PublishToken::new(mid);
                self.inner.pending.lock().qos2_publishes.push_back(token.clone());
                token
            }
        };

        if let Err(err) = client
            .publish(topic, wire_qos(qos), retain, payload.to_vec())
            .await
        {
            let mut pending = self.inner.pending.lock();
            let queue = match qos {
                QoS::AtLeastOnce => Some(&mut pending.qos1_publishes),
                QoS::ExactlyOnce => Some(&mut pending.qos2_publishes),
                QoS::AtMostOnce => None,
            };
            if let Some(queue) = queue
                && let Some(pos) = queue.iter().rposition(|t| t.mid() == mid)
            {
                queue.remove(pos);
            }
            return Err(err.into());
        }

        tracing::debug!(
            topic = %topic,
            qos = qos.as_u8(),
            retain,
            mid,
            bytes = payload.len(),
            "publish requested"
        );
        Ok(token)
    }

    fn is_connected(&self) -> bool {
        self.inner.connected.load(Ordering::Acquire)
    }

    fn add_route(&self, filter: &str, handler: RouteHandler) {
        let mut routes = self.inner.routes.write();
        routes.retain(|(existing, _)| existing != filter);
        routes.push((filter.to_string(), handler));
    }

    fn remove_route(&self, filter: &str) {
        self.inner
            .routes
            .write()
            .retain(|(existing, _)| existing != filter);
    }
}

/// Drives one connection's event loop until it ends or is superseded.
async fn run_event_loop(
    shared: Arc<Shared>,
    mut event_loop: EventLoop,
    sink: Arc<dyn EventSink>,
    generation: u64,
    ready: oneshot::Sender<Result<(), TransportError>>,
) {
    let mut ready = Some(ready);

    loop {
        if shared.generation.load(Ordering::SeqCst) != generation {
            tracing::debug!("event loop superseded by a newer connection");
            break;
        }

        match event_loop.poll().await {
            Ok(Event::Incoming(Packet::ConnAck(ack))) => {
                let code = connect_code(ack.code);
                if code.is_success() {
                    shared.connected.store(true, Ordering::Release);
                }
                if let Some(tx) = ready.take() {
                    let outcome = if code.is_success() {
                        Ok(())
                    } else {
                        Err(TransportError::ConnectionRefused(code))
                    };
                    let _ = tx.send(outcome);
                }
                sink.on_connect(code).await;
            }
            Ok(Event::Incoming(Packet::SubAck(ack))) => {
                let mid = shared.pending.lock().subscribes.pop_front();
                if let Some(mid) = mid {
                    let granted = match ack.return_codes.first() {
                        Some(SubscribeReasonCode::Success(qos)) => Some(session_qos(*qos)),
                        _ => None,
                    };
                    sink.on_subscribe_ack(mid, granted).await;
                } else {
                    tracing::warn!(pkid = ack.pkid, "SUBACK with no in-flight subscribe");
                }
            }
            Ok(Event::Incoming(Packet::UnsubAck(ack))) => {
                let mid = shared.pending.lock().unsubscribes.pop_front();
                if let Some(mid) = mid {
                    sink.on_unsubscribe_ack(mid).await;
                } else {
                    tracing::warn!(pkid = ack.pkid, "UNSUBACK with no in-flight unsubscribe");
                }
            }
            Ok(Event::Incoming(Packet::PubAck(_))) => shared.ack_qos1_publish(),
            Ok(Event::Incoming(Packet::PubComp(_))) => shared.ack_qos2_publish(),
            Ok(Event::Incoming(Packet::Publish(publish))) => {
                let delivery = Delivery {
                    topic: publish.topic.clone(),
                    payload: publish.payload.clone(),
                    qos: session_qos(publish.qos),
                    retain: publish.retain,
                    mid: publish.pkid,
                };
                if !shared.dispatch(&delivery) {
                    sink.on_message(delivery).await;
                }
            }
            Ok(Event::Incoming(Packet::Disconnect)) => {
                shared.connected.store(false, Ordering::Release);
                sink.on_disconnect(DisconnectReason::ConnectionLost).await;
                break;
            }
            Ok(_) => {}
            Err(err) => {
                let was_connected = shared.connected.swap(false, Ordering::AcqRel);
                if let Some(tx) = ready.take() {
                    let _ = tx.send(Err(TransportError::ConnectionFailed(err.to_string())));
                } else if was_connected {
                    tracing::error!(error = %err, "connection lost");
                    sink.on_disconnect(DisconnectReason::ConnectionLost).await;
                } else {
                    tracing::debug!(error = %err, "event loop ended");
                }
                break;
            }
        }
    }
}

fn build_options(config: &MqttConfig) -> MqttOptions {
    let mut options = match config.transport() {
        TransportKind::Tcp => {
            let mut options =
                MqttOptions::new(config.client_id(), config.host(), config.port());
            if config.tls_enable() {
                options.set_transport(rumqttc::Transport::tls_with_default_config());
            }
            options
        }
        TransportKind::Websockets => {
            // For websockets rumqttc takes the full URL in the host slot.
            let scheme = if config.tls_enable() { "wss" } else { "ws" };
            let url = format!("{scheme}://{}:{}/mqtt", config.host(), config.port());
            let mut options = MqttOptions::new(config.client_id(), url, config.port());
            options.set_transport(if config.tls_enable() {
                rumqttc::Transport::wss_with_default_config()
            } else {
                rumqttc::Transport::ws()
            });
            options
        }
    };

    options.set_keep_alive(config.keepalive());
    options.set_clean_session(config.clean_session());
    if let Some((username, password)) = config.credentials() {
        options.set_credentials(username, password);
    }
    if config.tls_insecure() {
        tracing::warn!("tls_insecure requested; the rustls default config still verifies certificates");
    }
    if let Some(bind) = config.bind_address() {
        tracing::warn!(bind_address = %bind, "bind address is not supported by this transport; ignoring");
    }

    options
}

fn connect_code(code: ConnectReturnCode) -> ConnectCode {
    match code {
        ConnectReturnCode::Success => ConnectCode::Accepted,
        ConnectReturnCode::RefusedProtocolVersion => ConnectCode::RefusedProtocolVersion,
        ConnectReturnCode::BadClientId => ConnectCode::BadClientId,
        ConnectReturnCode::ServiceUnavailable => ConnectCode::ServiceUnavailable,
        ConnectReturnCode::BadUserNamePassword => ConnectCode::BadCredentials,
        ConnectReturnCode::NotAuthorized => ConnectCode::NotAuthorized,
    }
}

fn wire_qos(qos: QoS) -> WireQos {
    match qos {
        QoS::AtMostOnce => WireQos::AtMostOnce,
        QoS::AtLeastOnce => WireQos::AtLeastOnce,
        QoS::ExactlyOnce => WireQos::ExactlyOnce,
    }
}

fn session_qos(qos: WireQos) -> QoS {
    match qos {
        WireQos::AtMostOnce => QoS::AtMostOnce,
        WireQos::AtLeastOnce => QoS::AtLeastOnce,
        WireQos::ExactlyOnce => QoS::ExactlyOnce,
    }
}
