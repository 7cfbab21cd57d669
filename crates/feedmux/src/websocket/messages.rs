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

//! Wire message types for the feed protocol.
//!
//! Every frame in both directions is a JSON envelope `{"type": ..., "payload": ...}`. Requests
//! may carry an `id` (only when correlating by request id) and data frames may carry their
//! `topic` on the envelope; otherwise the topic is read from `payload.topic`.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use ustr::Ustr;

use super::error::FeedMuxResult;
use crate::common::{
    consts::{RESPONSE_SUFFIX, TYPE_DELIMITER},
    enums::AckStatus,
};

/// The message envelope shared by requests, replies and data frames.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct FeedEnvelope {
    /// Message type, e.g. `bars.subscribe` or `bars.update`.
    #[serde(rename = "type")]
    pub msg_type: String,
    /// Request correlation id, echoed by the server in its reply.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<u64>,
    /// Routing topic of a data frame.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub topic: Option<Ustr>,
    /// Message body.
    #[serde(default)]
    pub payload: Value,
}

impl FeedEnvelope {
    /// Creates a new request envelope.
    #[must_use]
    pub fn request(msg_type: impl Into<String>, id: Option<u64>, payload: Value) -> Self {
        Self {
            msg_type: msg_type.into(),
            id,
            topic: None,
            payload,
        }
    }

    /// Serializes the envelope to a JSON text frame.
    ///
    /// # Errors
    ///
    /// Returns an error if serialization fails.
    pub fn to_text(&self) -> FeedMuxResult<String> {
        Ok(serde_json::to_string(self)?)
    }
}

/// Payload of a `{domain}.subscribe.response` or `{domain}.unsubscribe.response` reply.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct AckPayload {
    pub status: AckStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub topic: Option<Ustr>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

impl AckPayload {
    #[must_use]
    pub fn is_ok(&self) -> bool {
        self.status == AckStatus::Ok
    }

    /// Returns the rejection reason, falling back to a generic description.
    #[must_use]
    pub fn reason(&self) -> String {
        self.message
            .clone()
            .unwrap_or_else(|| "no reason given".to_string())
    }
}

/// A decoded inbound frame.
#[derive(Clone, Debug, PartialEq)]
pub enum FeedWsMessage {
    /// Acknowledgement of a subscribe/unsubscribe request.
    Reply {
        reply_type: String,
        id: Option<u64>,
        ack: AckPayload,
    },
    /// Data frame for a topic.
    Update {
        msg_type: String,
        topic: Option<Ustr>,
        payload: Value,
    },
}

/// Returns whether `msg_type` names a reply (`{domain}.{op}.response`).
#[must_use]
pub fn is_reply_type(msg_type: &str) -> bool {
    msg_type
        .rsplit_once(TYPE_DELIMITER)
        .is_some_and(|(head, suffix)| suffix == RESPONSE_SUFFIX && head.contains(TYPE_DELIMITER))
}

/// Parses a raw text frame into a [`FeedWsMessage`].
///
/// A reply whose payload does not decode as an [`AckPayload`] is surfaced as an error ack so
/// that its pending request still settles.
///
/// # Errors
///
/// Returns an error if the frame is not a valid envelope.
pub fn parse_raw_message(text: &str) -> FeedMuxResult<FeedWsMessage> {
    let envelope: FeedEnvelope = serde_json::from_str(text)?;

    if is_reply_type(&envelope.msg_type) {
        let ack = match serde_json::from_value::<AckPayload>(envelope.payload) {
            Ok(ack) => ack,
            Err(e) => AckPayload {
                status: AckStatus::Error,
                topic: None,
                message: Some(format!("Malformed acknowledgement: {e}")),
            },
        };
        return Ok(FeedWsMessage::Reply {
            reply_type: envelope.msg_type,
            id: envelope.id,
            ack,
        });
    }

    let topic = envelope.topic.or_else(|| {
        envelope
            .payload
            .get("topic")
            .and_then(Value::as_str)
            .map(Ustr::from)
    });

    Ok(FeedWsMessage::Update {
        msg_type: envelope.msg_type,
        topic,
        payload: envelope.payload,
    })
}

#[cfg(test)]
mod tests {
    use rstest::rstest;
    use serde_json::json;

    use super::*;

    #[rstest]
    fn test_request_envelope_omits_empty_fields() {
        let envelope =
            FeedEnvelope::request("bars.subscribe", None, json!({"symbol": "AAPL"}));
        assert_eq!(
            envelope.to_text().unwrap(),
            r#"{"type":"bars.subscribe","payload":{"symbol":"AAPL"}}"#
        );
    }

    #[rstest]
    fn test_request_envelope_with_id() {
        let envelope = FeedEnvelope::request("bars.subscribe", Some(7), json!({}));
        let value: Value = serde_json::from_str(&envelope.to_text().unwrap()).unwrap();
        assert_eq!(value["id"], 7);
    }

    #[rstest]
    fn test_parse_subscribe_reply() {
        let text = r#"{"type":"bars.subscribe.response","payload":{"status":"ok","topic":"bars:AAPL:1"}}"#;
        let FeedWsMessage::Reply { reply_type, id, ack } = parse_raw_message(text).unwrap() else {
            panic!("expected reply");
        };
        assert_eq!(reply_type, "bars.subscribe.response");
        assert_eq!(id, None);
        assert!(ack.is_ok());
        assert_eq!(ack.topic.unwrap().as_str(), "bars:AAPL:1");
    }

    #[rstest]
    fn test_parse_error_reply() {
        let text = r#"{"type":"quotes.unsubscribe.response","id":3,"payload":{"status":"error","message":"unknown topic"}}"#;
        let FeedWsMessage::Reply { id, ack, .. } = parse_raw_message(text).unwrap() else {
            panic!("expected reply");
        };
        assert_eq!(id, Some(3));
        assert!(!ack.is_ok());
        assert_eq!(ack.reason(), "unknown topic");
    }

    #[rstest]
    fn test_parse_malformed_reply_becomes_error_ack() {
        let text = r#"{"type":"bars.subscribe.response","payload":{"state":"fine"}}"#;
        let FeedWsMessage::Reply { ack, .. } = parse_raw_message(text).unwrap() else {
            panic!("expected reply");
        };
        assert_eq!(ack.status, AckStatus::Error);
        assert!(ack.reason().starts_with("Malformed acknowledgement"));
    }

    #[rstest]
    fn test_parse_update_with_envelope_topic() {
        let text = r#"{"type":"bars.update","topic":"bars:AAPL:1","payload":{"time":1697000000,"open":150}}"#;
        let FeedWsMessage::Update { topic, payload, .. } = parse_raw_message(text).unwrap() else {
            panic!("expected update");
        };
        assert_eq!(topic.unwrap().as_str(), "bars:AAPL:1");
        assert_eq!(payload, json!({"time": 1697000000, "open": 150}));
    }

    #[rstest]
    fn test_parse_update_with_payload_topic() {
        let text = r#"{"type":"trades.update","payload":{"topic":"trades:BTCUSD","price":"50000"}}"#;
        let FeedWsMessage::Update { topic, .. } = parse_raw_message(text).unwrap() else {
            panic!("expected update");
        };
        assert_eq!(topic.unwrap().as_str(), "trades:BTCUSD");
    }

    #[rstest]
    fn test_parse_invalid_json_errors() {
        assert!(parse_raw_message("not json").is_err());
        assert!(parse_raw_message(r#"{"payload":{}}"#).is_err());
    }

    #[rstest]
    #[case("bars.subscribe.response", true)]
    #[case("bars.unsubscribe.response", true)]
    #[case("response", false)]
    #[case("bars.response", false)]
    #[case("bars.update", false)]
    fn test_is_reply_type(#[case] msg_type: &str, #[case] expected: bool) {
        assert_eq!(is_reply_type(msg_type), expected);
    }
}
