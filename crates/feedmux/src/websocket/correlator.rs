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

//! Correlation of outbound requests with their acknowledgements.
//!
//! Every subscribe/unsubscribe request is tracked as a [`PendingRequest`] until exactly one of
//! the following happens: a matching reply resolves it, its timer expires, or the connection
//! rejects it wholesale. The request key depends on the [`CorrelationMode`]:
//!
//! - `ReplyType`: the key is the expected reply type, so concurrent requests of the same type
//!   are serialized. A second request is held (its timer already running) until the in-flight
//!   one settles, at which point it is promoted and dispatched.
//! - `RequestId`: the envelope carries an `id` and the key is `"{reply_type}#{id}"`, so requests
//!   of the same type proceed in parallel.

use std::{
    collections::VecDeque,
    future::poll_fn,
    task::{Context, Poll, ready},
    time::Duration,
};

use ahash::AHashMap;
use serde_json::Value;
use tokio::{sync::oneshot, time::Instant};
use tokio_util::time::{DelayQueue, delay_queue};

use super::{
    error::{FeedMuxError, FeedMuxResult},
    messages::{AckPayload, FeedEnvelope},
    registry::SubscriptionId,
};
use crate::common::enums::{CorrelationMode, RequestKind};

/// Channel used to complete the caller's future.
pub type RequestResponder = oneshot::Sender<FeedMuxResult<SubscriptionId>>;

/// What a pending request was issued for.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RequestContext {
    pub kind: RequestKind,
    pub subscription_id: SubscriptionId,
    /// Whether this is a resubscription issued after a reconnect.
    pub replay: bool,
}

impl RequestContext {
    #[must_use]
    pub fn subscribe(subscription_id: SubscriptionId) -> Self {
        Self {
            kind: RequestKind::Subscribe,
            subscription_id,
            replay: false,
        }
    }

    #[must_use]
    pub fn unsubscribe(subscription_id: SubscriptionId) -> Self {
        Self {
            kind: RequestKind::Unsubscribe,
            subscription_id,
            replay: false,
        }
    }

    #[must_use]
    pub fn replay(subscription_id: SubscriptionId) -> Self {
        Self {
            kind: RequestKind::Subscribe,
            subscription_id,
            replay: true,
        }
    }
}

/// An outstanding request awaiting its acknowledgement.
#[derive(Debug)]
pub struct PendingRequest {
    pub seq: u64,
    pub request_key: String,
    pub request_id: Option<u64>,
    pub reply_type: String,
    pub created: Instant,
    pub timeout: Duration,
    pub context: RequestContext,
    responder: Option<RequestResponder>,
    envelope: Option<FeedEnvelope>,
    timer: delay_queue::Key,
}

impl PendingRequest {
    /// Completes the caller's future, if any. Subsequent calls are no-ops.
    pub fn respond(&mut self, result: FeedMuxResult<SubscriptionId>) {
        if let Some(responder) = self.responder.take() {
            // Caller may have dropped its future
            let _ = responder.send(result);
        }
    }

    /// Completes the caller's future with `error`.
    pub fn reject(&mut self, error: FeedMuxError) {
        self.respond(Err(error));
    }

    #[must_use]
    pub fn timeout_error(&self) -> FeedMuxError {
        FeedMuxError::AckTimeout {
            request_key: self.request_key.clone(),
            timeout_ms: u64::try_from(self.timeout.as_millis()).unwrap_or(u64::MAX),
        }
    }
}

/// A request ready for transmission.
#[derive(Clone, Debug, PartialEq)]
pub struct Dispatch {
    pub seq: u64,
    pub envelope: FeedEnvelope,
}

/// Outcome of [`RequestCorrelator::register`].
#[derive(Clone, Debug, PartialEq)]
pub enum Registered {
    /// Send (or queue) the envelope now.
    Dispatch(Dispatch),
    /// Serialized behind an in-flight request with the same key.
    Held { seq: u64 },
}

/// A request settled by a matching reply.
#[derive(Debug)]
pub struct Settled {
    pub request: PendingRequest,
    pub ack: AckPayload,
    /// The next held request for the same key, now in flight.
    pub promoted: Option<Dispatch>,
}

/// A request whose acknowledgement timer elapsed.
#[derive(Debug)]
pub struct Expired {
    pub request: PendingRequest,
    pub promoted: Option<Dispatch>,
}

/// Tracks pending requests and matches replies to them.
#[derive(Debug)]
pub struct RequestCorrelator {
    mode: CorrelationMode,
    next_seq: u64,
    requests: AHashMap<u64, PendingRequest>,
    in_flight: AHashMap<String, u64>,
    held: AHashMap<String, VecDeque<u64>>,
    timers: DelayQueue<u64>,
}

impl RequestCorrelator {
    /// Creates a new [`RequestCorrelator`] instance.
    #[must_use]
    pub fn new(mode: CorrelationMode) -> Self {
        Self {
            mode,
            next_seq: 1,
            requests: AHashMap::new(),
            in_flight: AHashMap::new(),
            held: AHashMap::new(),
            timers: DelayQueue::new(),
        }
    }

    #[must_use]
    pub fn mode(&self) -> CorrelationMode {
        self.mode
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.requests.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.requests.is_empty()
    }

    #[must_use]
    pub fn held_count(&self) -> usize {
        self.held.values().map(VecDeque::len).sum()
    }

    /// Returns whether an unsubscribe for `subscription_id` is outstanding (sent, queued or held).
    #[must_use]
    pub fn has_pending_unsubscribe(&self, subscription_id: &SubscriptionId) -> bool {
        self.requests.values().any(|r| {
            r.context.kind == RequestKind::Unsubscribe
                && r.context.subscription_id == *subscription_id
        })
    }

    /// Registers a request and starts its acknowledgement timer.
    ///
    /// # Panics
    ///
    /// Must be called within a Tokio runtime (the timer is a [`DelayQueue`] entry).
    pub fn register(
        &mut self,
        request_type: &str,
        payload: Value,
        expected_reply_type: &str,
        timeout: Duration,
        context: RequestContext,
        responder: Option<RequestResponder>,
    ) -> Registered {
        let seq = self.next_seq;
        self.next_seq += 1;

        let (request_key, request_id) = match self.mode {
            CorrelationMode::ReplyType => (expected_reply_type.to_string(), None),
            CorrelationMode::RequestId => (format!("{expected_reply_type}#{seq}"), Some(seq)),
        };

        let envelope = FeedEnvelope::request(request_type, request_id, payload);
        let timer = self.timers.insert(seq, timeout);
        let is_held = self.in_flight.contains_key(&request_key);

        let mut request = PendingRequest {
            seq,
            request_key: request_key.clone(),
            request_id,
            reply_type: expected_reply_type.to_string(),
            created: Instant::now(),
            timeout,
            context,
            responder,
            envelope: None,
            timer,
        };

        if is_held {
            tracing::debug!(%request_key, seq, "Holding request behind in-flight request");
            request.envelope = Some(envelope);
            self.requests.insert(seq, request);
            self.held.entry(request_key).or_default().push_back(seq);
            Registered::Held { seq }
        } else {
            self.requests.insert(seq, request);
            self.in_flight.insert(request_key, seq);
            Registered::Dispatch(Dispatch { seq, envelope })
        }
    }

    /// Resolves the in-flight request matching a reply.
    ///
    /// Returns `None` when no outstanding request matches (late or duplicate reply).
    pub fn resolve(
        &mut self,
        reply_type: &str,
        request_id: Option<u64>,
        ack: AckPayload,
    ) -> Option<Settled> {
        let key = match (self.mode, request_id) {
            (CorrelationMode::RequestId, Some(id)) => format!("{reply_type}#{id}"),
            (CorrelationMode::RequestId, None) => self.oldest_in_flight_key(reply_type)?,
            (CorrelationMode::ReplyType, _) => reply_type.to_string(),
        };

        let seq = self.in_flight.remove(&key)?;
        let request = self.requests.remove(&seq)?;
        self.timers.remove(&request.timer);

        let promoted = self.promote(&key);

        Some(Settled {
            request,
            ack,
            promoted,
        })
    }

    /// Polls for the next request whose timer elapsed.
    ///
    /// Returns `Poll::Ready(None)` when no timers are pending.
    pub fn poll_expired(&mut self, cx: &mut Context<'_>) -> Poll<Option<Expired>> {
        loop {
            match ready!(self.timers.poll_expired(cx)) {
                Some(entry) => {
                    if let Some(expired) = self.expire(entry.into_inner()) {
                        return Poll::Ready(Some(expired));
                    }
                }
                None => return Poll::Ready(None),
            }
        }
    }

    /// Waits for the next request whose timer elapsed.
    pub async fn next_expired(&mut self) -> Option<Expired> {
        poll_fn(|cx| self.poll_expired(cx)).await
    }

    /// Removes every outstanding request, returned in registration order.
    pub fn reject_all(&mut self) -> Vec<PendingRequest> {
        self.timers.clear();
        self.in_flight.clear();
        self.held.clear();

        let mut requests: Vec<PendingRequest> =
            self.requests.drain().map(|(_, request)| request).collect();
        requests.sort_unstable_by_key(|r| r.seq);
        requests
    }

    fn expire(&mut self, seq: u64) -> Option<Expired> {
        let request = self.requests.remove(&seq)?;
        let key = request.request_key.clone();

        let promoted = if self.in_flight.get(&key) == Some(&seq) {
            self.in_flight.remove(&key);
            self.promote(&key)
        } else {
            if let Some(queue) = self.held.get_mut(&key) {
                queue.retain(|s| *s != seq);
                if queue.is_empty() {
                    self.held.remove(&key);
                }
            }
            None
        };

        tracing::debug!(request_key = %key, seq, "Request timed out");

        Some(Expired { request, promoted })
    }

    fn promote(&mut self, key: &str) -> Option<Dispatch> {
        let queue = self.held.get_mut(key)?;

        let mut dispatch = None;
        while let Some(seq) = queue.pop_front() {
            let Some(request) = self.requests.get_mut(&seq) else {
                continue;
            };
            if let Some(envelope) = request.envelope.take() {
                dispatch = Some(Dispatch { seq, envelope });
                break;
            }
        }

        if queue.is_empty() {
            self.held.remove(key);
        }

        if let Some(dispatch) = &dispatch {
            tracing::debug!(request_key = %key, seq = dispatch.seq, "Promoting held request");
            self.in_flight.insert(key.to_string(), dispatch.seq);
        }

        dispatch
    }

    fn oldest_in_flight_key(&self, reply_type: &str) -> Option<String> {
        self.in_flight
            .iter()
            .filter(|(_, seq)| {
                self.requests
                    .get(seq)
                    .is_some_and(|r| r.reply_type == reply_type)
            })
            .min_by_key(|(_, seq)| **seq)
            .map(|(key, _)| key.clone())
    }
}
