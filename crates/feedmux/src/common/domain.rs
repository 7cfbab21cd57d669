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

//! Feed domains: the message type prefix and topic rule of one family of streams.
//!
//! A domain such as `bars` defines the request types `bars.subscribe` / `bars.unsubscribe`,
//! their replies `bars.subscribe.response` / `bars.unsubscribe.response`, the data frame type
//! `bars.update`, and the topic format `bars:{key1}:{key2}:...`. The keys are read from the
//! subscribe parameters in the order given by `topic_fields`.

use std::fmt::Display;

use serde_json::Value;
use ustr::Ustr;

use super::consts::{
    RESPONSE_SUFFIX, SUBSCRIBE_SUFFIX, TOPIC_DELIMITER, TYPE_DELIMITER, UNSUBSCRIBE_SUFFIX,
    UPDATE_SUFFIX,
};

/// Formats a topic from a domain prefix and its ordered keys.
#[must_use]
pub fn format_topic<I, K>(prefix: &str, keys: I) -> Ustr
where
    I: IntoIterator<Item = K>,
    K: AsRef<str>,
{
    let mut topic = String::from(prefix);
    for key in keys {
        topic.push(TOPIC_DELIMITER);
        topic.push_str(key.as_ref());
    }
    Ustr::from(&topic)
}

/// Returns the domain prefix of a topic (`bars` for `bars:AAPL:1`).
#[must_use]
pub fn topic_domain(topic: &str) -> &str {
    topic
        .split_once(TOPIC_DELIMITER)
        .map_or(topic, |(domain, _)| domain)
}

/// Renders a scalar parameter value as a topic key.
fn topic_key(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        Value::Bool(b) => Some(b.to_string()),
        _ => None,
    }
}

/// A feed domain with its message type prefix and topic derivation rule.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct FeedDomain {
    prefix: Ustr,
    topic_fields: Vec<Ustr>,
}

impl FeedDomain {
    /// Creates a new [`FeedDomain`] instance.
    #[must_use]
    pub fn new<S: AsRef<str>>(prefix: &str, topic_fields: &[S]) -> Self {
        Self {
            prefix: Ustr::from(prefix),
            topic_fields: topic_fields
                .iter()
                .map(|field| Ustr::from(field.as_ref()))
                .collect(),
        }
    }

    /// Creates a domain without a local topic rule; topics are taken from server acks.
    #[must_use]
    pub fn server_assigned(prefix: &str) -> Self {
        Self {
            prefix: Ustr::from(prefix),
            topic_fields: Vec::new(),
        }
    }

    #[must_use]
    pub fn prefix(&self) -> Ustr {
        self.prefix
    }

    #[must_use]
    pub fn topic_fields(&self) -> &[Ustr] {
        &self.topic_fields
    }

    fn message_type(&self, parts: &[&str]) -> String {
        let mut msg_type = self.prefix.to_string();
        for part in parts {
            msg_type.push(TYPE_DELIMITER);
            msg_type.push_str(part);
        }
        msg_type
    }

    #[must_use]
    pub fn subscribe_type(&self) -> String {
        self.message_type(&[SUBSCRIBE_SUFFIX])
    }

    #[must_use]
    pub fn unsubscribe_type(&self) -> String {
        self.message_type(&[UNSUBSCRIBE_SUFFIX])
    }

    #[must_use]
    pub fn subscribe_reply_type(&self) -> String {
        self.message_type(&[SUBSCRIBE_SUFFIX, RESPONSE_SUFFIX])
    }

    #[must_use]
    pub fn unsubscribe_reply_type(&self) -> String {
        self.message_type(&[UNSUBSCRIBE_SUFFIX, RESPONSE_SUFFIX])
    }

    #[must_use]
    pub fn update_type(&self) -> String {
        self.message_type(&[UPDATE_SUFFIX])
    }

    /// Derives the topic for `params` before any acknowledgement arrives.
    ///
    /// Returns `None` when the domain has no topic rule, `params` is not an object, or any
    /// topic field is missing or non-scalar.
    #[must_use]
    pub fn derive_topic(&self, params: &Value) -> Option<Ustr> {
        if self.topic_fields.is_empty() {
            return None;
        }

        let object = params.as_object()?;
        let keys = self
            .topic_fields
            .iter()
            .map(|field| object.get(field.as_str()).and_then(topic_key))
            .collect::<Option<Vec<_>>>()?;

        Some(format_topic(&self.prefix, keys))
    }
}

impl Display for FeedDomain {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.prefix)
    }
}
