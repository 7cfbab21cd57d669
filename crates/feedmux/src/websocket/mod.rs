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

//! WebSocket client for multiplexed real-time feeds.
//!
//! This module provides a two-layer WebSocket client architecture:
//! - Outer client: cloneable handle sending commands and awaiting their outcomes
//! - Inner handler: I/O boundary running in a dedicated Tokio task
//!
//! Features:
//! - Request/acknowledgement correlation with timeouts
//! - Topic-based fan-out of data frames
//! - Automatic reconnection with exponential backoff
//! - Resubscription of active subscriptions after reconnect
//! - Heartbeat/ping-pong

pub mod client;
pub mod correlator;
pub mod error;
pub mod handler;
pub mod messages;
pub mod registry;
pub mod router;

pub use client::{FeedClient, FeedMuxClient};
pub use error::{FeedMuxError, FeedMuxResult, should_retry_feedmux_error};
pub use handler::HandlerCommand;
pub use messages::{AckPayload, FeedEnvelope, FeedWsMessage};
pub use registry::{SubscriptionCallback, SubscriptionId, SubscriptionInfo};
pub use router::RouterStats;
