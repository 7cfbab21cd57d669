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

//! Per-endpoint client sharing.
//!
//! A [`ConnectionRegistry`] hands out one [`FeedMuxClient`] per URL: the first request creates
//! it lazily and later requests receive the same instance, so every feed domain on an endpoint
//! shares one socket.

use std::sync::Arc;

use dashmap::DashMap;

use crate::{
    common::domain::FeedDomain,
    config::FeedMuxConfig,
    websocket::{FeedClient, FeedMuxClient, FeedMuxResult},
};

/// Registry of shared feed clients keyed by endpoint URL.
#[derive(Clone, Debug, Default)]
pub struct ConnectionRegistry {
    clients: Arc<DashMap<String, FeedMuxClient>>,
    template: FeedMuxConfig,
}

impl ConnectionRegistry {
    /// Creates a new [`ConnectionRegistry`] using default connection settings.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a new [`ConnectionRegistry`] whose clients are configured from `template`.
    ///
    /// The template's `url` is replaced by the URL of each client.
    #[must_use]
    pub fn with_config(template: FeedMuxConfig) -> Self {
        Self {
            clients: Arc::new(DashMap::new()),
            template,
        }
    }

    /// Returns the client for `url`, creating it (unconnected) on first request.
    #[must_use]
    pub fn get_or_create(&self, url: &str) -> FeedMuxClient {
        self.clients
            .entry(url.to_string())
            .or_insert_with(|| {
                tracing::debug!(%url, "Creating feed client");
                FeedMuxClient::new(FeedMuxConfig {
                    url: url.to_string(),
                    ..self.template.clone()
                })
            })
            .clone()
    }

    /// Returns the client for `url`, connecting it if it is not already running.
    ///
    /// # Errors
    ///
    /// Returns an error if the first connection attempt fails.
    pub async fn connect(&self, url: &str) -> FeedMuxResult<FeedMuxClient> {
        let client = self.get_or_create(url);
        client.connect().await?;
        Ok(client)
    }

    /// Returns a [`FeedClient`] for `domain` over the shared client of `url`.
    #[must_use]
    pub fn feed(&self, url: &str, domain: FeedDomain) -> FeedClient {
        FeedClient::new(self.get_or_create(url), domain)
    }

    #[must_use]
    pub fn get(&self, url: &str) -> Option<FeedMuxClient> {
        self.clients.get(url).map(|entry| entry.value().clone())
    }

    /// Removes the client for `url` without closing it.
    pub fn remove(&self, url: &str) -> Option<FeedMuxClient> {
        self.clients.remove(url).map(|(_, client)| client)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.clients.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.clients.is_empty()
    }

    #[must_use]
    pub fn urls(&self) -> Vec<String> {
        let mut urls: Vec<String> = self.clients.iter().map(|e| e.key().clone()).collect();
        urls.sort();
        urls
    }

    /// Closes every client and empties the registry.
    pub async fn shutdown(&self) {
        let clients: Vec<FeedMuxClient> =
            self.clients.iter().map(|e| e.value().clone()).collect();
        self.clients.clear();

        tracing::info!("Shutting down {} feed clients", clients.len());
        for client in clients {
            client.close().await;
        }
    }
}

#[cfg(test)]
mod tests {
    use rstest::rstest;

    use super::*;
    use crate::common::enums::CorrelationMode;

    #[rstest]
    fn test_get_or_create_returns_same_client_per_url() {
        let registry = ConnectionRegistry::new();
        let a = registry.get_or_create("ws://localhost:9000/feed");
        let b = registry.get_or_create("ws://localhost:9000/feed");
        let c = registry.get_or_create("ws://localhost:9001/feed");

        assert_eq!(registry.len(), 2);
        assert_eq!(a.url(), b.url());
        assert_ne!(a.url(), c.url());
        assert_eq!(
            registry.urls(),
            vec!["ws://localhost:9000/feed", "ws://localhost:9001/feed"]
        );
    }

    #[rstest]
    fn test_template_applies_to_created_clients() {
        let registry = ConnectionRegistry::with_config(FeedMuxConfig {
            correlation_mode: CorrelationMode::RequestId,
            request_timeout_ms: Some(250),
            ..FeedMuxConfig::default()
        });

        let client = registry.get_or_create("ws://localhost:9000/feed");
        assert_eq!(client.config().correlation_mode, CorrelationMode::RequestId);
        assert_eq!(client.config().request_timeout_ms, Some(250));
        assert_eq!(client.url(), "ws://localhost:9000/feed");
    }

    #[rstest]
    fn test_feed_binds_domain_to_shared_client() {
        let registry = ConnectionRegistry::new();
        let bars = registry.feed("ws://localhost:9000/feed", FeedDomain::new("bars", &["symbol"]));
        let quotes = registry.feed(
            "ws://localhost:9000/feed",
            FeedDomain::server_assigned("quotes"),
        );

        assert_eq!(registry.len(), 1);
        assert_eq!(bars.client().url(), quotes.client().url());
        assert_eq!(quotes.domain().prefix().as_str(), "quotes");
    }

    #[rstest]
    #[tokio::test]
    async fn test_remove_and_shutdown() {
        let registry = ConnectionRegistry::new();
        registry.get_or_create("ws://localhost:9000/feed");
        registry.get_or_create("ws://localhost:9001/feed");

        assert!(registry.remove("ws://localhost:9000/feed").is_some());
        assert!(registry.get("ws://localhost:9000/feed").is_none());

        registry.shutdown().await;
        assert!(registry.is_empty());
    }
}
