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

//! Multiplexed real-time feed client for [NautilusTrader](http://nautilustrader.io).
//!
//! The `nautilus-feedmux` crate shares one WebSocket connection per endpoint between many
//! logical subscriptions across feed domains (bars, quotes, trades, ...). It correlates
//! subscribe/unsubscribe requests with their acknowledgements, routes inbound data frames to
//! subscriber callbacks by topic, and transparently reconnects and resubscribes.
//!
//! # Protocol
//!
//! Every frame is a JSON envelope `{"type": ..., "payload": ...}`:
//!
//! - Requests: `{domain}.subscribe` / `{domain}.unsubscribe` with the subscription params.
//! - Replies: `{domain}.subscribe.response` / `{domain}.unsubscribe.response` with
//!   `{"status": "ok" | "error", "topic"?, "message"?}`.
//! - Data: `{domain}.update` carrying an opaque payload for a topic
//!   `{domain}:{key1}:{key2}:...`.
//!
//! # Usage
//!
//! Obtain clients through a [`factory::ConnectionRegistry`] so every caller of one URL shares
//! the same connection, then bind a [`common::domain::FeedDomain`] with
//! [`factory::ConnectionRegistry::feed`].
//!
//! # Platform
//!
//! [NautilusTrader](http://nautilustrader.io) is an open-source, high-performance, production-grade
//! algorithmic trading platform, providing quantitative traders with the ability to backtest
//! portfolios of automated trading strategies on historical data with an event-driven engine,
//! and also deploy those same strategies live, with no code changes.

#![warn(rustc::all)]
#![deny(unsafe_code)]
#![deny(nonstandard_style)]
#![deny(missing_debug_implementations)]
#![deny(clippy::missing_errors_doc)]
#![deny(clippy::missing_panics_doc)]
#![deny(rustdoc::broken_intra_doc_links)]

pub mod common;
pub mod config;
pub mod factory;
pub mod websocket;
