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

//! Error types produced by the multiplexed feed client.

use thiserror::Error;
use tokio_tungstenite::tungstenite;

/// Error types for the multiplexed feed client.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum FeedMuxError {
    /// The socket dropped while the request was outstanding.
    #[error("Connection lost")]
    ConnectionLost,
    /// The connection was explicitly closed (or was never started).
    #[error("Connection closed")]
    ConnectionClosed,
    /// No acknowledgement arrived within the configured bound.
    #[error("Acknowledgement timeout after {timeout_ms}ms for {request_key}")]
    AckTimeout {
        /// The correlation key of the timed out request.
        request_key: String,
        /// The timeout that elapsed.
        timeout_ms: u64,
    },
    /// The acknowledged topic differs from the one requested.
    #[error("Topic mismatch: expected {expected}, was {actual}")]
    TopicMismatch {
        /// The topic derived from the request parameters.
        expected: String,
        /// The topic reported by the server.
        actual: String,
    },
    /// The server reported a failure status.
    #[error("Server rejected request: {0}")]
    ServerRejected(String),
    /// A subscriber callback failed during dispatch.
    #[error("Callback failure: {0}")]
    CallbackFailure(String),
    /// The subscription was removed before its acknowledgement arrived.
    #[error("Subscription cancelled before acknowledgement")]
    Cancelled,
    /// Transport-level error during WebSocket communication.
    #[error("Transport error: {0}")]
    Transport(String),
    /// JSON serialization/deserialization error.
    #[error("JSON error: {0}")]
    Json(String),
    /// Generic timeout (e.g. waiting for the connection to become active).
    #[error("Timeout: {0}")]
    Timeout(String),
    /// Generic client error.
    #[error("Client error: {0}")]
    ClientError(String),
}

impl From<tungstenite::Error> for FeedMuxError {
    fn from(error: tungstenite::Error) -> Self {
        Self::Transport(error.to_string())
    }
}

impl From<serde_json::Error> for FeedMuxError {
    fn from(error: serde_json::Error) -> Self {
        Self::Json(error.to_string())
    }
}

impl From<String> for FeedMuxError {
    fn from(msg: String) -> Self {
        Self::ClientError(msg)
    }
}

/// Result type alias for feed multiplexer operations.
pub type FeedMuxResult<T> = Result<T, FeedMuxError>;

/// Determines if an error is transient, so the caller may retry the same operation.
#[must_use]
pub fn should_retry_feedmux_error(error: &FeedMuxError) -> bool {
    match error {
        FeedMuxError::ConnectionLost
        | FeedMuxError::AckTimeout { .. }
        | FeedMuxError::Transport(_)
        | FeedMuxError::Timeout(_) => true,
        FeedMuxError::ConnectionClosed
        | FeedMuxError::TopicMismatch { .. }
        | FeedMuxError::ServerRejected(_)
        | FeedMuxError::CallbackFailure(_)
        | FeedMuxError::Cancelled
        | FeedMuxError::Json(_)
        | FeedMuxError::ClientError(_) => false,
    }
}

#[cfg(test)]
mod tests {
    use rstest::rstest;

    use super::*;

    #[rstest]
    fn test_feedmux_error_display() {
        let error = FeedMuxError::AckTimeout {
            request_key: "bars.subscribe.response".to_string(),
            timeout_ms: 5_000,
        };
        assert_eq!(
            error.to_string(),
            "Acknowledgement timeout after 5000ms for bars.subscribe.response"
        );

        let error = FeedMuxError::TopicMismatch {
            expected: "bars:AAPL:1".to_string(),
            actual: "bars:AAPL:5".to_string(),
        };
        assert_eq!(
            error.to_string(),
            "Topic mismatch: expected bars:AAPL:1, was bars:AAPL:5"
        );
    }

    #[rstest]
    fn test_feedmux_error_from_json_error() {
        let json_err = serde_json::from_str::<serde_json::Value>("invalid json")
            .expect_err("Should fail to parse");
        let error = FeedMuxError::from(json_err);

        assert!(matches!(error, FeedMuxError::Json(_)));
    }

    #[rstest]
    fn test_feedmux_error_from_string() {
        let error = FeedMuxError::from("Test client error".to_string());
        assert_eq!(error.to_string(), "Client error: Test client error");
    }

    #[rstest]
    #[case(FeedMuxError::ConnectionLost, true)]
    #[case(FeedMuxError::Transport("reset".to_string()), true)]
    #[case(FeedMuxError::ServerRejected("unknown symbol".to_string()), false)]
    #[case(FeedMuxError::ConnectionClosed, false)]
    fn test_should_retry(#[case] error: FeedMuxError, #[case] expected: bool) {
        assert_eq!(should_retry_feedmux_error(&error), expected);
    }
}
