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

//! Subscription registry: the record of what should currently be subscribed.
//!
//! The registry is the source of truth for reconnection replay. Entries are kept in
//! registration order, and a `topic → ids` index is maintained on every mutation so the
//! router can resolve a data frame's subscribers without scanning.

use std::{
    fmt::{Debug, Display},
    sync::Arc,
};

use ahash::{AHashMap, RandomState};
use indexmap::{IndexMap, IndexSet};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use ustr::Ustr;

use crate::common::{domain::FeedDomain, enums::SubscriptionStatus};

/// Callback invoked with the opaque payload of every data frame routed to a subscription.
pub type SubscriptionCallback = Arc<dyn Fn(&Value) -> anyhow::Result<()> + Send + Sync>;

/// Opaque unique identifier of a subscription.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SubscriptionId(Ustr);

impl SubscriptionId {
    /// Creates a new random [`SubscriptionId`] (UUID v4).
    #[must_use]
    pub fn new() -> Self {
        Self(Ustr::from(&uuid::Uuid::new_v4().to_string()))
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        self.0.as_str()
    }

    #[must_use]
    pub fn inner(&self) -> Ustr {
        self.0
    }
}

impl Default for SubscriptionId {
    fn default() -> Self {
        Self::new()
    }
}

impl Display for SubscriptionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for SubscriptionId {
    fn from(value: &str) -> Self {
        Self(Ustr::from(value))
    }
}

/// A caller's registered interest in a topic.
pub struct Subscription {
    pub id: SubscriptionId,
    pub domain: FeedDomain,
    /// Derived from the params, or assigned by the server acknowledgement.
    pub topic: Option<Ustr>,
    pub params: Value,
    pub status: SubscriptionStatus,
    callback: SubscriptionCallback,
}

impl Debug for Subscription {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct(stringify!(Subscription))
            .field("id", &self.id)
            .field("domain", &self.domain.prefix())
            .field("topic", &self.topic)
            .field("params", &self.params)
            .field("status", &self.status)
            .finish_non_exhaustive()
    }
}

impl Subscription {
    #[must_use]
    pub fn callback(&self) -> &SubscriptionCallback {
        &self.callback
    }

    #[must_use]
    pub fn is_active(&self) -> bool {
        self.status == SubscriptionStatus::Active
    }

    #[must_use]
    pub fn info(&self) -> SubscriptionInfo {
        SubscriptionInfo {
            id: self.id,
            domain: self.domain.prefix(),
            topic: self.topic,
            params: self.params.clone(),
            status: self.status,
        }
    }
}

/// Point-in-time snapshot of a subscription, without its callback.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct SubscriptionInfo {
    pub id: SubscriptionId,
    pub domain: Ustr,
    pub topic: Option<Ustr>,
    pub params: Value,
    pub status: SubscriptionStatus,
}

/// Registration-ordered store of subscriptions with a topic index.
#[derive(Debug, Default)]
pub struct SubscriptionRegistry {
    entries: IndexMap<SubscriptionId, Subscription, RandomState>,
    topic_index: AHashMap<Ustr, IndexSet<SubscriptionId, RandomState>>,
}

impl SubscriptionRegistry {
    /// Creates a new empty [`SubscriptionRegistry`].
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Inserts a new `Pending` subscription and returns its fresh id.
    pub fn add(
        &mut self,
        domain: FeedDomain,
        topic: Option<Ustr>,
        params: Value,
        callback: SubscriptionCallback,
    ) -> SubscriptionId {
        let mut id = SubscriptionId::new();
        while self.entries.contains_key(&id) {
            id = SubscriptionId::new();
        }

        if let Some(topic) = topic {
            self.index(topic, id);
        }

        self.entries.insert(
            id,
            Subscription {
                id,
                domain,
                topic,
                params,
                status: SubscriptionStatus::Pending,
                callback,
            },
        );

        id
    }

    /// Marks a subscription `Active`. Returns `false` if the id is unknown or cancelled.
    pub fn mark_active(&mut self, id: &SubscriptionId) -> bool {
        match self.entries.get_mut(id) {
            Some(entry) if entry.status != SubscriptionStatus::Cancelled => {
                entry.status = SubscriptionStatus::Active;
                true
            }
            _ => false,
        }
    }

    /// Marks a subscription `Cancelled` so it no longer receives frames or replays.
    pub fn mark_cancelled(&mut self, id: &SubscriptionId) -> bool {
        match self.entries.get_mut(id) {
            Some(entry) => {
                entry.status = SubscriptionStatus::Cancelled;
                true
            }
            None => false,
        }
    }

    /// Records the topic of a subscription, re-indexing it if the topic changed.
    pub fn set_topic(&mut self, id: &SubscriptionId, topic: Ustr) -> bool {
        let Some(entry) = self.entries.get_mut(id) else {
            return false;
        };

        let previous = entry.topic.replace(topic);
        if previous == Some(topic) {
            return true;
        }

        if let Some(previous) = previous {
            self.unindex(previous, id);
        }
        self.index(topic, *id);
        true
    }

    /// Cancels and evicts a subscription, returning it if it was present.
    pub fn remove(&mut self, id: &SubscriptionId) -> Option<Subscription> {
        let mut entry = self.entries.shift_remove(id)?;
        entry.status = SubscriptionStatus::Cancelled;

        if let Some(topic) = entry.topic {
            self.unindex(topic, id);
        }

        Some(entry)
    }

    #[must_use]
    pub fn get(&self, id: &SubscriptionId) -> Option<&Subscription> {
        self.entries.get(id)
    }

    #[must_use]
    pub fn contains(&self, id: &SubscriptionId) -> bool {
        self.entries.contains_key(id)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Returns all `Active` subscriptions in registration order.
    #[must_use]
    pub fn active_entries(&self) -> Vec<&Subscription> {
        self.entries.values().filter(|e| e.is_active()).collect()
    }

    /// Returns every subscription indexed under `topic`, in registration order.
    #[must_use]
    pub fn find_by_topic(&self, topic: &Ustr) -> Vec<&Subscription> {
        let Some(ids) = self.topic_index.get(topic) else {
            return Vec::new();
        };

        let mut found: Vec<(usize, &Subscription)> = ids
            .iter()
            .filter_map(|id| self.entries.get_full(id).map(|(idx, _, sub)| (idx, sub)))
            .collect();
        found.sort_unstable_by_key(|(idx, _)| *idx);
        found.into_iter().map(|(_, sub)| sub).collect()
    }

    /// Returns the number of distinct indexed topics.
    #[must_use]
    pub fn topic_count(&self) -> usize {
        self.topic_index.len()
    }

    /// Returns snapshots of every subscription in registration order.
    #[must_use]
    pub fn snapshot(&self) -> Vec<SubscriptionInfo> {
        self.entries.values().map(Subscription::info).collect()
    }

    /// Removes every subscription, returning their ids in registration order.
    pub fn clear(&mut self) -> Vec<SubscriptionId> {
        self.topic_index.clear();
        self.entries.drain(..).map(|(id, _)| id).collect()
    }

    fn index(&mut self, topic: Ustr, id: SubscriptionId) {
        self.topic_index.entry(topic).or_default().insert(id);
    }

    fn unindex(&mut self, topic: Ustr, id: &SubscriptionId) {
        let mut remove_topic = false;
        if let Some(ids) = self.topic_index.get_mut(&topic) {
            ids.shift_remove(id);
            remove_topic = ids.is_empty();
        }

        if remove_topic {
            self.topic_index.remove(&topic);
        }
    }
}
