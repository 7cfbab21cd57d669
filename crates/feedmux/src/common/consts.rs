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

//! Core constants for the feed multiplexer.

/// Delimiter between the domain prefix and the keys of a topic (`bars:AAPL:1`).
pub const TOPIC_DELIMITER: char = ':';

/// Delimiter between the domain prefix and the operation of a message type (`bars.subscribe`).
pub const TYPE_DELIMITER: char = '.';

// Message type suffixes
pub const SUBSCRIBE_SUFFIX: &str = "subscribe";
pub const UNSUBSCRIBE_SUFFIX: &str = "unsubscribe";
pub const RESPONSE_SUFFIX: &str = "response";
pub const UPDATE_SUFFIX: &str = "update";

/// Default bound on waiting for a subscribe/unsubscribe acknowledgement.
pub const DEFAULT_REQUEST_TIMEOUT_MS: u64 = 10_000;

/// Default bound on a single connection attempt.
pub const DEFAULT_CONNECT_TIMEOUT_MS: u64 = 10_000;

// Reconnection backoff defaults
pub const DEFAULT_RECONNECT_DELAY_INITIAL_MS: u64 = 500;
pub const DEFAULT_RECONNECT_DELAY_MAX_MS: u64 = 30_000;
pub const DEFAULT_RECONNECT_BACKOFF_FACTOR: f64 = 2.0;
pub const DEFAULT_RECONNECT_JITTER_MS: u64 = 100;

/// Bound on waiting for the server to confirm a close handshake.
pub const CLOSE_TIMEOUT_MS: u64 = 2_000;

/// Environment variable prefix read by [`crate::config::FeedMuxConfig::from_env`].
pub const FEEDMUX_ENV_PREFIX: &str = "FEEDMUX_";
