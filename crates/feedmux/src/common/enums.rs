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

//! Enumerations for connection, subscription and acknowledgement state.

use serde::{Deserialize, Serialize};
use strum::{AsRefStr, Display, EnumIter, EnumString};

/// Lifecycle state of a multiplexed connection.
///
/// `Connecting → Open → {Closing → Closed, Reconnecting}` and `Reconnecting → Connecting`.
/// `Closed` is terminal until a new `connect()` call restarts the cycle.
#[derive(
    Clone,
    Copy,
    Debug,
    Default,
    Display,
    PartialEq,
    Eq,
    Hash,
    AsRefStr,
    EnumIter,
    EnumString,
    Serialize,
    Deserialize,
)]
#[strum(serialize_all = "SCREAMING_SNAKE_CASE")]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
#[repr(u8)]
pub enum ConnectionState {
    /// Socket opening initiated, outgoing requests are queued.
    Connecting = 0,
    /// Socket open, requests are transmitted immediately.
    Open = 1,
    /// Explicit shutdown in progress.
    Closing = 2,
    /// No socket and no handler task.
    #[default]
    Closed = 3,
    /// Unexpected disconnect, waiting out the backoff delay.
    Reconnecting = 4,
}

impl ConnectionState {
    /// Returns the state as its `u8` representation.
    #[must_use]
    pub const fn as_u8(self) -> u8 {
        self as u8
    }

    /// Converts a `u8` back into a state, defaulting unknown values to `Closed`.
    #[must_use]
    pub const fn from_u8(value: u8) -> Self {
        match value {
            0 => Self::Connecting,
            1 => Self::Open,
            2 => Self::Closing,
            4 => Self::Reconnecting,
            _ => Self::Closed,
        }
    }
}

/// Lifecycle status of a single subscription in the registry.
#[derive(
    Clone,
    Copy,
    Debug,
    Display,
    PartialEq,
    Eq,
    Hash,
    AsRefStr,
    EnumIter,
    EnumString,
    Serialize,
    Deserialize,
)]
#[strum(serialize_all = "SCREAMING_SNAKE_CASE")]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SubscriptionStatus {
    /// Subscribe request sent or queued, acknowledgement outstanding.
    Pending,
    /// Acknowledged by the server; receives data frames.
    Active,
    /// Unsubscribed or removed; awaiting eviction.
    Cancelled,
}

/// Status field carried by subscribe/unsubscribe acknowledgements.
#[derive(
    Clone,
    Copy,
    Debug,
    Display,
    PartialEq,
    Eq,
    Hash,
    AsRefStr,
    EnumIter,
    EnumString,
    Serialize,
    Deserialize,
)]
#[strum(serialize_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum AckStatus {
    Ok,
    Error,
}

/// How the correlator matches an inbound acknowledgement to its outbound request.
#[derive(
    Clone,
    Copy,
    Debug,
    Default,
    Display,
    PartialEq,
    Eq,
    Hash,
    AsRefStr,
    EnumIter,
    EnumString,
    Serialize,
    Deserialize,
)]
#[strum(serialize_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum CorrelationMode {
    /// Keyed on the expected reply type; concurrent requests of one type are serialized.
    #[default]
    ReplyType,
    /// Keyed on a request `id` the server echoes in its reply; requests run in parallel.
    RequestId,
}

/// Kind of request a pending acknowledgement belongs to.
#[derive(Clone, Copy, Debug, Display, PartialEq, Eq, Hash, AsRefStr)]
#[strum(serialize_all = "snake_case")]
pub enum RequestKind {
    Subscribe,
    Unsubscribe,
}
