// -------------------------------------------------------------------------------------------------
//  Copyright (C) 2015-2025 Nautech Systems Pty Ltd. All rights reserved.
//  https://nautechsystems.io
//
//  Licensed under the GNU Lesser General Public License Version 3.0 (the "License");
//  You may not use this file except in compliance with the License.
//  You may obtain a copy of the License at https://www.gnu.org/licenses/lgpl-3.0.en.html
//
//  Unless required by applicable law or agreed to in writing, software
//  distributed under the License is distributed on an "AS IS" BASIS,
//  WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
//  See the License for the specific language governing permissions and
//  limitations under the License.
// -------------------------------------------------------------------------------------------------

//! Connection handler for a multiplexed feed endpoint.
//!
//! The handler runs in a dedicated Tokio task and exclusively owns the socket, the
//! subscription registry, the request correlator, the topic router and the outgoing queue.
//! Commands from [`super::FeedMuxClient`] arrive over an unbounded channel and are serialized
//! with socket events through a single `tokio::select!` loop, so none of this state is locked.
//!
//! Lifecycle: `Connecting → Open → {Closing → Closed, Reconnecting}`, and
//! `Reconnecting → Connecting` after a backoff delay. Commands are served in every state; while
//! the socket is not open, requests are queued and flushed FIFO when it opens.

use std::{
    collections::VecDeque,
    future::Future,
    sync::{
        Arc,
        atomic::{AtomicU8, Ordering},
    },
    time::Duration,
};

use futures_util::{SinkExt, StreamExt};
use serde_json::Value;
use tokio::{net::TcpStream, sync::oneshot, time::Interval};
use tokio_tungstenite::{
    MaybeTlsStream, WebSocketStream, connect_async,
    tungstenite::{
        self, Message,
        client::IntoClientRequest,
        handshake::client::Request,
        http::{HeaderName, HeaderValue},
    },
};
use ustr::Ustr;

use super::{
    correlator::{
        Dispatch, Expired, PendingRequest, Registered, RequestContext, RequestCorrelator,
        RequestResponder, Settled,
    },
    error::{FeedMuxError, FeedMuxResult},
    messages::{AckPayload, FeedWsMessage, parse_raw_message},
    registry::{SubscriptionCallback, SubscriptionId, SubscriptionInfo, SubscriptionRegistry},
    router::{FeedRouter, RouterStats},
};
use crate::{
    common::{
        backoff::ExponentialBackoff,
        consts::CLOSE_TIMEOUT_MS,
        domain::FeedDomain,
        enums::{ConnectionState, RequestKind},
    },
    config::FeedMuxConfig,
};

type FeedWsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Commands sent from the client to the handler.
#[allow(missing_debug_implementations)]
pub enum HandlerCommand {
    /// Register a subscription and request it from the server.
    Subscribe {
        domain: FeedDomain,
        params: Value,
        callback: SubscriptionCallback,
        responder: RequestResponder,
    },
    /// Request removal of a subscription.
    Unsubscribe {
        id: SubscriptionId,
        responder: RequestResponder,
    },
    /// Snapshot the registry.
    Subscriptions {
        responder: oneshot::Sender<Vec<SubscriptionInfo>>,
    },
    /// Snapshot the router counters.
    RouterStats {
        responder: oneshot::Sender<RouterStats>,
    },
    /// Shut the connection down.
    Close { responder: oneshot::Sender<()> },
}

impl HandlerCommand {
    /// Completes the command with [`FeedMuxError::ConnectionClosed`] (or an empty reply).
    pub fn reject_closed(self) {
        match self {
            Self::Subscribe { responder, .. } | Self::Unsubscribe { responder, .. } => {
                let _ = responder.send(Err(FeedMuxError::ConnectionClosed));
            }
            Self::Subscriptions { responder } => {
                let _ = responder.send(Vec::new());
            }
            Self::RouterStats { responder } => {
                let _ = responder.send(RouterStats::default());
            }
            Self::Close { responder } => {
                let _ = responder.send(());
            }
        }
    }
}

enum OpenExit {
    Lost(String),
    Close(Option<oneshot::Sender<()>>),
}

/// Multiplexed feed connection handler.
#[allow(missing_debug_implementations)]
pub struct FeedMuxHandler {
    config: FeedMuxConfig,
    cmd_rx: tokio::sync::mpsc::UnboundedReceiver<HandlerCommand>,
    state: Arc<AtomicU8>,
    ready_tx: Option<oneshot::Sender<FeedMuxResult<()>>>,
    ws: Option<FeedWsStream>,
    registry: SubscriptionRegistry,
    correlator: RequestCorrelator,
    router: FeedRouter,
    outgoing: VecDeque<Dispatch>,
    backoff: ExponentialBackoff,
    failed_attempts: u32,
    lost: Option<String>,
    close_responder: Option<oneshot::Sender<()>>,
}

impl FeedMuxHandler {
    /// Creates a new [`FeedMuxHandler`] instance.
    ///
    /// `ready_tx` receives the outcome of the first connection attempt.
    ///
    /// # Errors
    ///
    /// Returns an error if the reconnection backoff parameters are invalid.
    pub fn new(
        config: FeedMuxConfig,
        cmd_rx: tokio::sync::mpsc::UnboundedReceiver<HandlerCommand>,
        state: Arc<AtomicU8>,
        ready_tx: oneshot::Sender<FeedMuxResult<()>>,
    ) -> anyhow::Result<Self> {
        let backoff = config.backoff()?;
        let correlator = RequestCorrelator::new(config.correlation_mode);

        Ok(Self {
            config,
            cmd_rx,
            state,
            ready_tx: Some(ready_tx),
            ws: None,
            registry: SubscriptionRegistry::new(),
            correlator,
            router: FeedRouter::new(),
            outgoing: VecDeque::new(),
            backoff,
            failed_attempts: 0,
            lost: None,
            close_responder: None,
        })
    }

    fn set_state(&self, state: ConnectionState) {
        let previous = ConnectionState::from_u8(self.state.swap(state.as_u8(), Ordering::AcqRel));
        if previous != state {
            tracing::debug!("Connection state {previous} -> {state}");
        }
    }

    fn connection_state(&self) -> ConnectionState {
        ConnectionState::from_u8(self.state.load(Ordering::Acquire))
    }

    fn notify_ready(&mut self, result: FeedMuxResult<()>) {
        if let Some(tx) = self.ready_tx.take() {
            let _ = tx.send(result);
        }
    }

    /// Runs the connection lifecycle until closed.
    pub async fn run(mut self) {
        let mut reconnect = false;

        loop {
            self.set_state(ConnectionState::Connecting);
            tracing::info!(url = %self.config.url, reconnect, "Connecting");

            let config = self.config.clone();
            let connect = async move { connect_feed(&config).await };
            match self.serve_offline(connect).await {
                None => break,
                Some(Ok(ws)) => {
                    self.ws = Some(ws);
                    self.on_open(reconnect).await;

                    let exit = match self.lost.take() {
                        Some(reason) => OpenExit::Lost(reason),
                        None => self.serve_open().await,
                    };

                    match exit {
                        OpenExit::Close(responder) => {
                            self.close_responder = responder;
                            break;
                        }
                        OpenExit::Lost(reason) => self.on_connection_lost(&reason),
                    }
                }
                Some(Err(e)) => {
                    tracing::warn!(url = %self.config.url, "Connection attempt failed: {e}");
                    self.failed_attempts += 1;
                    self.notify_ready(Err(e));
                    self.set_state(ConnectionState::Reconnecting);

                    if let Some(max) = self.config.reconnect_max_attempts
                        && self.failed_attempts >= max
                    {
                        tracing::error!(
                            url = %self.config.url,
                            "Giving up after {} failed connection attempts",
                            self.failed_attempts,
                        );
                        break;
                    }
                }
            }

            reconnect = true;

            let delay = self.backoff.next_duration();
            tracing::info!(url = %self.config.url, "Reconnecting in {delay:?}");
            if self.serve_offline(tokio::time::sleep(delay)).await.is_none() {
                break;
            }
        }

        self.shutdown().await;
    }

    // Serves commands and request timers until `fut` completes.
    //
    // Returns `None` if the handler should shut down instead.
    async fn serve_offline<F: Future>(&mut self, fut: F) -> Option<F::Output> {
        tokio::pin!(fut);

        loop {
            tokio::select! {
                output = &mut fut => return Some(output),
                cmd = self.cmd_rx.recv() => match cmd {
                    Some(HandlerCommand::Close { responder }) => {
                        self.close_responder = Some(responder);
                        return None;
                    }
                    Some(cmd) => self.handle_command(cmd).await,
                    None => return None,
                },
                Some(expired) = self.correlator.next_expired(), if !self.correlator.is_empty() => {
                    self.on_expired(expired).await;
                }
            }
        }
    }

    async fn serve_open(&mut self) -> OpenExit {
        let mut heartbeat = self.config.heartbeat_interval().map(|period| {
            let mut interval = tokio::time::interval_at(tokio::time::Instant::now() + period, period);
            interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            interval
        });

        loop {
            tokio::select! {
                cmd = self.cmd_rx.recv() => match cmd {
                    Some(HandlerCommand::Close { responder }) => return OpenExit::Close(Some(responder)),
                    Some(cmd) => self.handle_command(cmd).await,
                    None => return OpenExit::Close(None),
                },
                frame = next_frame(&mut self.ws) => match frame {
                    Some(Ok(msg)) => self.handle_frame(msg).await,
                    Some(Err(e)) => self.lost = Some(e.to_string()),
                    None => self.lost = Some("stream ended".to_string()),
                },
                Some(expired) = self.correlator.next_expired(), if !self.correlator.is_empty() => {
                    self.on_expired(expired).await;
                }
                () = next_tick(&mut heartbeat) => {
                    tracing::trace!("Sending heartbeat ping");
                    self.transmit(Message::Ping(Vec::new().into())).await;
                }
            }

            if let Some(reason) = self.lost.take() {
                return OpenExit::Lost(reason);
            }
        }
    }

    async fn on_open(&mut self, reconnect: bool) {
        self.set_state(ConnectionState::Open);
        self.backoff.reset();
        self.failed_attempts = 0;
        self.notify_ready(Ok(()));
        tracing::info!(url = %self.config.url, "Connected");

        while let Some(dispatch) = self.outgoing.pop_front() {
            if !self.transmit_dispatch(&dispatch).await {
                return;
            }
        }

        if reconnect {
            self.replay_subscriptions().await;
        }
    }

    async fn replay_subscriptions(&mut self) {
        let entries: Vec<(SubscriptionId, FeedDomain, Value)> = self
            .registry
            .active_entries()
            .into_iter()
            .filter(|e| {
                let unsubscribing = self.correlator.has_pending_unsubscribe(&e.id);
                if unsubscribing {
                    tracing::debug!(id = %e.id, "Skipping resubscription, unsubscribe pending");
                }
                !unsubscribing
            })
            .map(|e| (e.id, e.domain.clone(), e.params.clone()))
            .collect();

        if entries.is_empty() {
            return;
        }

        tracing::info!("Resubscribing {} active subscriptions", entries.len());

        for (id, domain, params) in entries {
            let registered = self.correlator.register(
                &domain.subscribe_type(),
                params,
                &domain.subscribe_reply_type(),
                self.config.request_timeout(),
                RequestContext::replay(id),
                None,
            );
            if let Registered::Dispatch(dispatch) = registered {
                self.send_or_queue(dispatch).await;
            }
        }
    }

    fn on_connection_lost(&mut self, reason: &str) {
        tracing::warn!(url = %self.config.url, "Connection lost: {reason}");
        self.ws = None;
        self.set_state(ConnectionState::Reconnecting);
        self.outgoing.clear();

        for request in self.correlator.reject_all() {
            self.reject_request(request, FeedMuxError::ConnectionLost);
        }
    }

    async fn shutdown(&mut self) {
        self.set_state(ConnectionState::Closing);
        tracing::info!(url = %self.config.url, "Closing connection");

        self.outgoing.clear();
        for mut request in self.correlator.reject_all() {
            request.reject(FeedMuxError::ConnectionClosed);
        }
        self.registry.clear();
        self.notify_ready(Err(FeedMuxError::ConnectionClosed));

        if let Some(mut ws) = self.ws.take() {
            let close_timeout = Duration::from_millis(CLOSE_TIMEOUT_MS);
            let confirmed = tokio::time::timeout(close_timeout, async {
                if let Err(e) = ws.close(None).await {
                    tracing::debug!("Error sending close frame: {e}");
                    return;
                }
                // Drain until the server confirms
                while let Some(Ok(_)) = ws.next().await {}
            })
            .await;

            if confirmed.is_err() {
                tracing::warn!("Close not confirmed within {close_timeout:?}");
            }
        }

        self.set_state(ConnectionState::Closed);

        self.cmd_rx.close();
        while let Ok(cmd) = self.cmd_rx.try_recv() {
            cmd.reject_closed();
        }

        if let Some(responder) = self.close_responder.take() {
            let _ = responder.send(());
        }

        tracing::info!(url = %self.config.url, "Connection closed");
    }

    async fn handle_command(&mut self, cmd: HandlerCommand) {
        match cmd {
            HandlerCommand::Subscribe {
                domain,
                params,
                callback,
                responder,
            } => self.subscribe(domain, params, callback, responder).await,
            HandlerCommand::Unsubscribe { id, responder } => {
                self.unsubscribe(id, responder).await;
            }
            HandlerCommand::Subscriptions { responder } => {
                let _ = responder.send(self.registry.snapshot());
            }
            HandlerCommand::RouterStats { responder } => {
                let _ = responder.send(self.router.stats());
            }
            HandlerCommand::Close { responder } => {
                // Close is intercepted by the serving loops
                let _ = responder.send(());
            }
        }
    }

    async fn subscribe(
        &mut self,
        domain: FeedDomain,
        params: Value,
        callback: SubscriptionCallback,
        responder: RequestResponder,
    ) {
        let topic = domain.derive_topic(&params);
        let id = self
            .registry
            .add(domain.clone(), topic, params.clone(), callback);
        tracing::debug!(%id, %domain, ?topic, "Subscribing");

        let registered = self.correlator.register(
            &domain.subscribe_type(),
            params,
            &domain.subscribe_reply_type(),
            self.config.request_timeout(),
            RequestContext::subscribe(id),
            Some(responder),
        );

        if let Registered::Dispatch(dispatch) = registered {
            self.send_or_queue(dispatch).await;
        }
    }

    async fn unsubscribe(&mut self, id: SubscriptionId, responder: RequestResponder) {
        let Some(entry) = self.registry.get(&id) else {
            tracing::debug!(%id, "Unsubscribe for unknown subscription, nothing to do");
            let _ = responder.send(Ok(id));
            return;
        };

        let domain = entry.domain.clone();
        let params = entry.params.clone();
        tracing::debug!(%id, %domain, "Unsubscribing");

        let registered = self.correlator.register(
            &domain.unsubscribe_type(),
            params,
            &domain.unsubscribe_reply_type(),
            self.config.request_timeout(),
            RequestContext::unsubscribe(id),
            Some(responder),
        );

        if let Registered::Dispatch(dispatch) = registered {
            self.send_or_queue(dispatch).await;
        }
    }

    async fn handle_frame(&mut self, msg: Message) {
        match msg {
            Message::Text(text) => match parse_raw_message(text.as_str()) {
                Ok(FeedWsMessage::Reply { reply_type, id, ack }) => {
                    self.handle_reply(&reply_type, id, ack).await;
                }
                Ok(FeedWsMessage::Update {
                    msg_type,
                    topic,
                    payload,
                }) => {
                    tracing::trace!(%msg_type, ?topic, "Data frame");
                    self.router.route(&self.registry, topic, &payload);
                }
                Err(e) => tracing::warn!("Failed to parse message: {e}: {}", text.as_str()),
            },
            Message::Ping(data) => {
                self.transmit(Message::Pong(data)).await;
            }
            Message::Close(frame) => {
                self.lost = Some(format!("server closed connection: {frame:?}"));
            }
            Message::Binary(data) => {
                tracing::debug!("Ignoring binary frame ({} bytes)", data.len());
            }
            Message::Pong(_) | Message::Frame(_) => {}
        }
    }

    async fn handle_reply(&mut self, reply_type: &str, id: Option<u64>, ack: AckPayload) {
        let Some(settled) = self.correlator.resolve(reply_type, id, ack) else {
            tracing::debug!(%reply_type, ?id, "Reply without pending request, ignoring");
            return;
        };

        let Settled {
            request,
            ack,
            promoted,
        } = settled;

        match request.context.kind {
            RequestKind::Subscribe => self.settle_subscribe(request, ack),
            RequestKind::Unsubscribe => self.settle_unsubscribe(request, ack),
        }

        if let Some(dispatch) = promoted {
            self.send_or_queue(dispatch).await;
        }
    }

    fn settle_subscribe(&mut self, mut request: PendingRequest, ack: AckPayload) {
        let id = request.context.subscription_id;

        if !ack.is_ok() {
            let reason = ack.reason();
            tracing::warn!(%id, "Subscribe rejected: {reason}");
            self.reject_request(request, FeedMuxError::ServerRejected(reason));
            return;
        }

        let Some(entry) = self.registry.get(&id) else {
            request.reject(FeedMuxError::Cancelled);
            return;
        };

        match (entry.topic, ack.topic) {
            (Some(expected), Some(actual)) if expected != actual => {
                tracing::warn!(%id, %expected, %actual, "Subscribe acknowledged with different topic");
                let error = FeedMuxError::TopicMismatch {
                    expected: expected.to_string(),
                    actual: actual.to_string(),
                };
                self.reject_request(request, error);
                return;
            }
            (None, Some(actual)) => {
                self.registry.set_topic(&id, actual);
            }
            (None, None) => {
                tracing::warn!(%id, "Subscribe acknowledged without topic, no data can be routed");
            }
            (Some(_), _) => {}
        }

        if !self.registry.mark_active(&id) {
            request.reject(FeedMuxError::Cancelled);
            return;
        }

        let topic: Option<Ustr> = self.registry.get(&id).and_then(|e| e.topic);
        if request.context.replay {
            tracing::debug!(%id, ?topic, "Resubscribed");
        } else {
            tracing::info!(%id, ?topic, "Subscribed");
        }
        request.respond(Ok(id));
    }

    fn settle_unsubscribe(&mut self, mut request: PendingRequest, ack: AckPayload) {
        let id = request.context.subscription_id;

        if ack.is_ok() {
            self.registry.mark_cancelled(&id);
            self.registry.remove(&id);
            tracing::info!(%id, "Unsubscribed");
            request.respond(Ok(id));
        } else {
            let reason = ack.reason();
            tracing::warn!(%id, "Unsubscribe rejected: {reason}");
            self.registry.remove(&id);
            request.reject(FeedMuxError::ServerRejected(reason));
        }
    }

    async fn on_expired(&mut self, expired: Expired) {
        let Expired { request, promoted } = expired;
        let seq = request.seq;
        self.outgoing.retain(|d| d.seq != seq);

        let error = request.timeout_error();
        tracing::warn!(subscription_id = %request.context.subscription_id, "{error}");
        self.reject_request(request, error);

        if let Some(dispatch) = promoted {
            self.send_or_queue(dispatch).await;
        }
    }

    // Rejects a request and removes the registry entry it would have created or removed.
    //
    // A failed resubscription after reconnect keeps its entry when the connection dropped so
    // the next reconnect replays it again.
    fn reject_request(&mut self, mut request: PendingRequest, error: FeedMuxError) {
        let id = request.context.subscription_id;
        let keep = request.context.replay && error == FeedMuxError::ConnectionLost;

        if !keep && self.registry.remove(&id).is_some() {
            if request.context.replay {
                tracing::warn!(%id, "Subscription dropped after failed resubscription: {error}");
            } else {
                tracing::debug!(%id, "Removed subscription after {error}");
            }
        }

        request.reject(error);
    }

    async fn send_or_queue(&mut self, dispatch: Dispatch) {
        let writable = self.connection_state() == ConnectionState::Open
            && self.ws.is_some()
            && self.lost.is_none();

        if writable {
            self.transmit_dispatch(&dispatch).await;
        } else {
            tracing::debug!(
                seq = dispatch.seq,
                "Queueing {} until connected",
                dispatch.envelope.msg_type
            );
            self.outgoing.push_back(dispatch);
        }
    }

    async fn transmit_dispatch(&mut self, dispatch: &Dispatch) -> bool {
        match dispatch.envelope.to_text() {
            Ok(text) => {
                tracing::debug!("Sending {text}");
                self.transmit(Message::Text(text.into())).await
            }
            Err(e) => {
                tracing::error!("Failed to serialize request: {e}");
                true
            }
        }
    }

    // Sends a frame, recording a connection loss on failure.
    async fn transmit(&mut self, msg: Message) -> bool {
        let Some(ws) = self.ws.as_mut() else {
            self.lost = Some("socket not available".to_string());
            return false;
        };

        match ws.send(msg).await {
            Ok(()) => true,
            Err(e) => {
                self.lost = Some(format!("send failed: {e}"));
                false
            }
        }
    }
}

async fn connect_feed(config: &FeedMuxConfig) -> FeedMuxResult<FeedWsStream> {
    let request = build_request(config)?;
    let timeout = config.connect_timeout();

    match tokio::time::timeout(timeout, connect_async(request)).await {
        Ok(Ok((ws, _response))) => Ok(ws),
        Ok(Err(e)) => Err(e.into()),
        Err(_) => Err(FeedMuxError::Timeout(format!(
            "Connection to {} timed out after {timeout:?}",
            config.url
        ))),
    }
}

fn build_request(config: &FeedMuxConfig) -> FeedMuxResult<Request> {
    let mut request = config.url.as_str().into_client_request()?;

    for (name, value) in &config.headers {
        let name = HeaderName::from_bytes(name.as_bytes())
            .map_err(|e| FeedMuxError::ClientError(format!("Invalid header name {name}: {e}")))?;
        let value = HeaderValue::from_str(value)
            .map_err(|e| FeedMuxError::ClientError(format!("Invalid header value: {e}")))?;
        request.headers_mut().insert(name, value);
    }

    Ok(request)
}

async fn next_frame(ws: &mut Option<FeedWsStream>) -> Option<Result<Message, tungstenite::Error>> {
    match ws {
        Some(ws) => ws.next().await,
        None => None,
    }
}

async fn next_tick(interval: &mut Option<Interval>) {
    match interval {
        Some(interval) => {
            interval.tick().await;
        }
        None => std::future::pending().await,
    }
}

#[cfg(test)]
mod tests {
    use rstest::rstest;

    use super::*;

    #[rstest]
    fn test_build_request_applies_headers() {
        let config = FeedMuxConfig {
            headers: vec![("X-Api-Key".to_string(), "secret".to_string())],
            ..FeedMuxConfig::new("ws://localhost:9000/feed")
        };

        let request = build_request(&config).unwrap();
        assert_eq!(request.uri(), "ws://localhost:9000/feed");
        assert_eq!(request.headers()["x-api-key"], "secret");
    }

    #[rstest]
    fn test_build_request_rejects_invalid_header() {
        let config = FeedMuxConfig {
            headers: vec![("bad header".to_string(), "v".to_string())],
            ..FeedMuxConfig::new("ws://localhost:9000/feed")
        };

        assert!(matches!(
            build_request(&config),
            Err(FeedMuxError::ClientError(_))
        ));
    }

    #[rstest]
    fn test_build_request_rejects_invalid_url() {
        let config = FeedMuxConfig::new("not a url");
        assert!(build_request(&config).is_err());
    }

    #[rstest]
    fn test_reject_closed_completes_responders() {
        let (tx, mut rx) = oneshot::channel();
        HandlerCommand::Unsubscribe {
            id: SubscriptionId::new(),
            responder: tx,
        }
        .reject_closed();

        assert_eq!(rx.try_recv().unwrap(), Err(FeedMuxError::ConnectionClosed));
    }
}
