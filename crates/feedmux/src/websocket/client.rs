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

//! Multiplexed feed WebSocket client.
//!
//! [`FeedMuxClient`] is a cheap-to-clone handle; all connection state lives in the
//! [`FeedMuxHandler`] task it spawns on [`FeedMuxClient::connect`]. [`FeedClient`] binds a
//! handle to one [`FeedDomain`] and is what domain-specific callers hold.

use std::{
    fmt::Debug,
    sync::{
        Arc,
        atomic::{AtomicU8, Ordering},
    },
};

use serde_json::Value;
use tokio::{sync::oneshot, task::JoinHandle};

use super::{
    error::{FeedMuxError, FeedMuxResult},
    handler::{FeedMuxHandler, HandlerCommand},
    registry::{SubscriptionId, SubscriptionInfo},
    router::RouterStats,
};
use crate::{
    common::{domain::FeedDomain, enums::ConnectionState},
    config::FeedMuxConfig,
};

/// Client handle for a single multiplexed feed endpoint.
#[derive(Clone)]
pub struct FeedMuxClient {
    config: FeedMuxConfig,
    state: Arc<AtomicU8>,
    cmd_tx: Arc<tokio::sync::RwLock<Option<tokio::sync::mpsc::UnboundedSender<HandlerCommand>>>>,
    task_handle: Arc<tokio::sync::Mutex<Option<JoinHandle<()>>>>,
}

impl Debug for FeedMuxClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct(stringify!(FeedMuxClient))
            .field("url", &self.config.url)
            .field("state", &self.state())
            .field("correlation_mode", &self.config.correlation_mode)
            .finish_non_exhaustive()
    }
}

impl FeedMuxClient {
    /// Creates a new [`FeedMuxClient`] instance. No connection is made until
    /// [`FeedMuxClient::connect`].
    #[must_use]
    pub fn new(config: FeedMuxConfig) -> Self {
        Self {
            config,
            state: Arc::new(AtomicU8::new(ConnectionState::Closed.as_u8())),
            cmd_tx: Arc::new(tokio::sync::RwLock::new(None)),
            task_handle: Arc::new(tokio::sync::Mutex::new(None)),
        }
    }

    /// Returns the endpoint URL.
    #[must_use]
    pub fn url(&self) -> &str {
        &self.config.url
    }

    #[must_use]
    pub fn config(&self) -> &FeedMuxConfig {
        &self.config
    }

    /// Returns the current connection state.
    #[must_use]
    pub fn state(&self) -> ConnectionState {
        ConnectionState::from_u8(self.state.load(Ordering::Acquire))
    }

    /// Returns whether the connection is open.
    #[must_use]
    pub fn is_connected(&self) -> bool {
        self.state() == ConnectionState::Open
    }

    /// Starts the connection handler and waits for the first connection attempt.
    ///
    /// If the handler is already running this waits (up to the connect timeout) for the
    /// connection to open.
    ///
    /// # Errors
    ///
    /// Returns an error if the first attempt fails. The handler keeps retrying in the
    /// background until closed or out of attempts.
    pub async fn connect(&self) -> FeedMuxResult<()> {
        let ready_rx = {
            let mut task_handle = self.task_handle.lock().await;

            if task_handle.as_ref().is_some_and(|h| !h.is_finished()) {
                None
            } else {
                let (cmd_tx, cmd_rx) = tokio::sync::mpsc::unbounded_channel();
                let (ready_tx, ready_rx) = oneshot::channel();

                let handler =
                    FeedMuxHandler::new(self.config.clone(), cmd_rx, self.state.clone(), ready_tx)
                        .map_err(|e| FeedMuxError::ClientError(e.to_string()))?;

                *self.cmd_tx.write().await = Some(cmd_tx);
                self.state
                    .store(ConnectionState::Connecting.as_u8(), Ordering::Release);
                *task_handle = Some(tokio::spawn(handler.run()));

                Some(ready_rx)
            }
        };

        match ready_rx {
            Some(rx) => rx.await.unwrap_or(Err(FeedMuxError::ConnectionClosed)),
            None => {
                let timeout_secs = self.config.connect_timeout().as_secs_f64();
                self.wait_until_active(timeout_secs).await
            }
        }
    }

    /// Waits until the connection is open or the timeout elapses.
    ///
    /// # Errors
    ///
    /// Returns an error if the connection does not open in time.
    pub async fn wait_until_active(&self, timeout_secs: f64) -> FeedMuxResult<()> {
        let timeout = tokio::time::Duration::from_secs_f64(timeout_secs);

        tokio::time::timeout(timeout, async {
            while !self.is_connected() {
                tokio::time::sleep(tokio::time::Duration::from_millis(10)).await;
            }
        })
        .await
        .map_err(|_| {
            FeedMuxError::Timeout(format!(
                "WebSocket connection timeout after {timeout_secs} seconds"
            ))
        })?;

        Ok(())
    }

    async fn send_cmd(&self, cmd: HandlerCommand) -> FeedMuxResult<()> {
        let guard = self.cmd_tx.read().await;
        let Some(tx) = guard.as_ref() else {
            return Err(FeedMuxError::ConnectionClosed);
        };

        tx.send(cmd).map_err(|_| FeedMuxError::ConnectionClosed)
    }

    /// Subscribes to a topic of `domain` and resolves once the server acknowledges it.
    ///
    /// While the connection is not open the request is queued and sent on connect.
    ///
    /// # Errors
    ///
    /// Returns an error if the server rejects the request, acknowledges a different topic,
    /// does not acknowledge in time, or the connection is lost or closed first. In every case
    /// no subscription is left behind.
    pub async fn subscribe<F>(
        &self,
        domain: &FeedDomain,
        params: Value,
        callback: F,
    ) -> FeedMuxResult<SubscriptionId>
    where
        F: Fn(&Value) -> anyhow::Result<()> + Send + Sync + 'static,
    {
        let (responder, rx) = oneshot::channel();
        self.send_cmd(HandlerCommand::Subscribe {
            domain: domain.clone(),
            params,
            callback: Arc::new(callback),
            responder,
        })
        .await?;

        rx.await.map_err(|_| FeedMuxError::ConnectionClosed)?
    }

    /// Unsubscribes a subscription. Unknown ids resolve immediately without a wire message.
    ///
    /// # Errors
    ///
    /// Returns an error if the server rejects the request or does not acknowledge in time;
    /// the subscription is removed regardless.
    pub async fn unsubscribe(&self, id: &SubscriptionId) -> FeedMuxResult<()> {
        let (responder, rx) = oneshot::channel();
        self.send_cmd(HandlerCommand::Unsubscribe {
            id: *id,
            responder,
        })
        .await?;

        rx.await.map_err(|_| FeedMuxError::ConnectionClosed)?.map(|_| ())
    }

    /// Returns a snapshot of every registered subscription in registration order.
    ///
    /// # Errors
    ///
    /// Returns an error if the handler is not running.
    pub async fn subscriptions(&self) -> FeedMuxResult<Vec<SubscriptionInfo>> {
        let (responder, rx) = oneshot::channel();
        self.send_cmd(HandlerCommand::Subscriptions { responder })
            .await?;
        rx.await.map_err(|_| FeedMuxError::ConnectionClosed)
    }

    /// Returns the router counters.
    ///
    /// # Errors
    ///
    /// Returns an error if the handler is not running.
    pub async fn router_stats(&self) -> FeedMuxResult<RouterStats> {
        let (responder, rx) = oneshot::channel();
        self.send_cmd(HandlerCommand::RouterStats { responder })
            .await?;
        rx.await.map_err(|_| FeedMuxError::ConnectionClosed)
    }

    /// Closes the connection, rejecting every pending request and clearing all subscriptions.
    ///
    /// Closing an already closed client is a no-op.
    pub async fn close(&self) {
        tracing::info!(url = %self.config.url, "Closing feed client");

        let (responder, rx) = oneshot::channel();
        if self
            .send_cmd(HandlerCommand::Close { responder })
            .await
            .is_ok()
        {
            let _ = rx.await;
        }

        self.cmd_tx.write().await.take();

        if let Some(handle) = self.task_handle.lock().await.take()
            && let Err(e) = handle.await
        {
            tracing::error!("Feed handler task failed: {e}");
        }
    }
}

/// A [`FeedMuxClient`] bound to a single [`FeedDomain`].
#[derive(Clone, Debug)]
pub struct FeedClient {
    client: FeedMuxClient,
    domain: FeedDomain,
}

impl FeedClient {
    /// Creates a new [`FeedClient`] instance sharing `client`'s connection.
    #[must_use]
    pub fn new(client: FeedMuxClient, domain: FeedDomain) -> Self {
        Self { client, domain }
    }

    #[must_use]
    pub fn domain(&self) -> &FeedDomain {
        &self.domain
    }

    #[must_use]
    pub fn client(&self) -> &FeedMuxClient {
        &self.client
    }

    /// Subscribes to a topic of this client's domain.
    ///
    /// # Errors
    ///
    /// See [`FeedMuxClient::subscribe`].
    pub async fn subscribe<F>(&self, params: Value, callback: F) -> FeedMuxResult<SubscriptionId>
    where
        F: Fn(&Value) -> anyhow::Result<()> + Send + Sync + 'static,
    {
        self.client.subscribe(&self.domain, params, callback).await
    }

    /// Unsubscribes a subscription.
    ///
    /// # Errors
    ///
    /// See [`FeedMuxClient::unsubscribe`].
    pub async fn unsubscribe(&self, id: &SubscriptionId) -> FeedMuxResult<()> {
        self.client.unsubscribe(id).await
    }

    #[must_use]
    pub fn is_connected(&self) -> bool {
        self.client.is_connected()
    }
}
