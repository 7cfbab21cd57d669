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

//! Configuration for multiplexed feed connections.
//!
//! # Reconnection Strategy
//!
//! The default configuration uses unlimited reconnection attempts (`reconnect_max_attempts: None`).
//! Feeds may be down for extended periods but eventually recover, and exponential backoff already
//! bounds the retry rate. Use `Some(n)` primarily for testing or non-critical connections.

use std::{str::FromStr, time::Duration};

use crate::common::{
    backoff::ExponentialBackoff,
    consts::{
        DEFAULT_CONNECT_TIMEOUT_MS, DEFAULT_RECONNECT_BACKOFF_FACTOR,
        DEFAULT_RECONNECT_DELAY_INITIAL_MS, DEFAULT_RECONNECT_DELAY_MAX_MS,
        DEFAULT_RECONNECT_JITTER_MS, DEFAULT_REQUEST_TIMEOUT_MS, FEEDMUX_ENV_PREFIX,
    },
    enums::CorrelationMode,
};

/// Configuration for a [`crate::websocket::FeedMuxClient`] connection.
#[derive(Clone, Debug)]
pub struct FeedMuxConfig {
    /// The WebSocket endpoint URL.
    pub url: String,
    /// The optional default headers sent with the upgrade request.
    pub headers: Vec<(String, String)>,
    /// The timeout (milliseconds) waiting for a subscribe/unsubscribe acknowledgement.
    pub request_timeout_ms: Option<u64>,
    /// The timeout (milliseconds) for a single connection attempt.
    pub connect_timeout_ms: Option<u64>,
    /// The optional heartbeat (ping) interval (seconds).
    pub heartbeat_secs: Option<u64>,
    /// The initial reconnection delay (milliseconds).
    pub reconnect_delay_initial_ms: Option<u64>,
    /// The maximum reconnection delay (milliseconds) for exponential backoff.
    pub reconnect_delay_max_ms: Option<u64>,
    /// The exponential backoff factor for reconnection delays.
    pub reconnect_backoff_factor: Option<f64>,
    /// The maximum jitter (milliseconds) added to reconnection delays.
    pub reconnect_jitter_ms: Option<u64>,
    /// The maximum number of consecutive reconnection attempts before giving up.
    /// - `None`: Unlimited reconnection attempts (default).
    /// - `Some(n)`: After n failed attempts, transition to CLOSED state.
    pub reconnect_max_attempts: Option<u32>,
    /// How acknowledgements are correlated with their requests.
    pub correlation_mode: CorrelationMode,
}

impl Default for FeedMuxConfig {
    fn default() -> Self {
        Self {
            url: String::new(),
            headers: Vec::new(),
            request_timeout_ms: Some(DEFAULT_REQUEST_TIMEOUT_MS),
            connect_timeout_ms: Some(DEFAULT_CONNECT_TIMEOUT_MS),
            heartbeat_secs: None,
            reconnect_delay_initial_ms: Some(DEFAULT_RECONNECT_DELAY_INITIAL_MS),
            reconnect_delay_max_ms: Some(DEFAULT_RECONNECT_DELAY_MAX_MS),
            reconnect_backoff_factor: Some(DEFAULT_RECONNECT_BACKOFF_FACTOR),
            reconnect_jitter_ms: Some(DEFAULT_RECONNECT_JITTER_MS),
            reconnect_max_attempts: None,
            correlation_mode: CorrelationMode::default(),
        }
    }
}

fn env_var<T: FromStr>(name: &str) -> Option<T> {
    std::env::var(format!("{FEEDMUX_ENV_PREFIX}{name}"))
        .ok()
        .and_then(|value| value.trim().parse().ok())
}

impl FeedMuxConfig {
    /// Creates a configuration for `url` with default values.
    #[must_use]
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            ..Self::default()
        }
    }

    /// Creates a configuration for `url`, overlaying any `FEEDMUX_*` environment variables.
    ///
    /// Recognized variables: `FEEDMUX_REQUEST_TIMEOUT_MS`, `FEEDMUX_CONNECT_TIMEOUT_MS`,
    /// `FEEDMUX_HEARTBEAT_SECS`, `FEEDMUX_RECONNECT_DELAY_INITIAL_MS`,
    /// `FEEDMUX_RECONNECT_DELAY_MAX_MS`, `FEEDMUX_RECONNECT_BACKOFF_FACTOR`,
    /// `FEEDMUX_RECONNECT_JITTER_MS`, `FEEDMUX_RECONNECT_MAX_ATTEMPTS` and
    /// `FEEDMUX_CORRELATION_MODE` (`reply_type` or `request_id`). Unparsable values are ignored.
    #[must_use]
    pub fn from_env(url: impl Into<String>) -> Self {
        let mut config = Self::new(url);
        if let Some(v) = env_var("REQUEST_TIMEOUT_MS") {
            config.request_timeout_ms = Some(v);
        }
        if let Some(v) = env_var("CONNECT_TIMEOUT_MS") {
            config.connect_timeout_ms = Some(v);
        }
        if let Some(v) = env_var("HEARTBEAT_SECS") {
            config.heartbeat_secs = Some(v);
        }
        if let Some(v) = env_var("RECONNECT_DELAY_INITIAL_MS") {
            config.reconnect_delay_initial_ms = Some(v);
        }
        if let Some(v) = env_var("RECONNECT_DELAY_MAX_MS") {
            config.reconnect_delay_max_ms = Some(v);
        }
        if let Some(v) = env_var("RECONNECT_BACKOFF_FACTOR") {
            config.reconnect_backoff_factor = Some(v);
        }
        if let Some(v) = env_var("RECONNECT_JITTER_MS") {
            config.reconnect_jitter_ms = Some(v);
        }
        if let Some(v) = env_var("RECONNECT_MAX_ATTEMPTS") {
            config.reconnect_max_attempts = Some(v);
        }
        if let Some(mode) = env_var::<CorrelationMode>("CORRELATION_MODE") {
            config.correlation_mode = mode;
        }
        config
    }

    /// Returns the acknowledgement timeout.
    #[must_use]
    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(
            self.request_timeout_ms
                .unwrap_or(DEFAULT_REQUEST_TIMEOUT_MS),
        )
    }

    /// Returns the connection attempt timeout.
    #[must_use]
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(
            self.connect_timeout_ms
                .unwrap_or(DEFAULT_CONNECT_TIMEOUT_MS),
        )
    }

    /// Returns the heartbeat interval, if enabled.
    #[must_use]
    pub fn heartbeat_interval(&self) -> Option<Duration> {
        self.heartbeat_secs
            .filter(|secs| *secs > 0)
            .map(Duration::from_secs)
    }

    /// Builds the reconnection backoff from the configured parameters.
    ///
    /// # Errors
    ///
    /// Returns an error if the configured parameters are invalid.
    pub fn backoff(&self) -> anyhow::Result<ExponentialBackoff> {
        ExponentialBackoff::new(
            Duration::from_millis(
                self.reconnect_delay_initial_ms
                    .unwrap_or(DEFAULT_RECONNECT_DELAY_INITIAL_MS),
            ),
            Duration::from_millis(
                self.reconnect_delay_max_ms
                    .unwrap_or(DEFAULT_RECONNECT_DELAY_MAX_MS),
            ),
            self.reconnect_backoff_factor
                .unwrap_or(DEFAULT_RECONNECT_BACKOFF_FACTOR),
            self.reconnect_jitter_ms
                .unwrap_or(DEFAULT_RECONNECT_JITTER_MS),
        )
    }
}

#[cfg(test)]
mod tests {
    use rstest::rstest;

    use super::*;

    #[rstest]
    fn test_default_config() {
        let config = FeedMuxConfig::new("ws://localhost:9000/feed");

        assert_eq!(config.url, "ws://localhost:9000/feed");
        assert_eq!(config.request_timeout(), Duration::from_secs(10));
        assert_eq!(config.heartbeat_interval(), None);
        assert_eq!(config.reconnect_max_attempts, None);
        assert_eq!(config.correlation_mode, CorrelationMode::ReplyType);
    }

    #[rstest]
    fn test_zero_heartbeat_disables_pings() {
        let config = FeedMuxConfig {
            heartbeat_secs: Some(0),
            ..FeedMuxConfig::new("ws://localhost")
        };
        assert_eq!(config.heartbeat_interval(), None);
    }

    #[rstest]
    fn test_backoff_from_config() {
        let config = FeedMuxConfig {
            reconnect_delay_initial_ms: Some(10),
            reconnect_delay_max_ms: Some(40),
            reconnect_backoff_factor: Some(2.0),
            reconnect_jitter_ms: Some(0),
            ..FeedMuxConfig::new("ws://localhost")
        };
        let mut backoff = config.backoff().unwrap();

        assert_eq!(backoff.next_duration(), Duration::from_millis(10));
        assert_eq!(backoff.next_duration(), Duration::from_millis(20));
        assert_eq!(backoff.next_duration(), Duration::from_millis(40));
        assert_eq!(backoff.next_duration(), Duration::from_millis(40));
    }

    #[rstest]
    fn test_invalid_backoff_config_errors() {
        let config = FeedMuxConfig {
            reconnect_delay_initial_ms: Some(1_000),
            reconnect_delay_max_ms: Some(10),
            ..FeedMuxConfig::new("ws://localhost")
        };
        assert!(config.backoff().is_err());
    }
}
