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

//! Topic-based fan-out of data frames to subscriber callbacks.

use std::panic::{AssertUnwindSafe, catch_unwind};

use serde::Serialize;
use serde_json::Value;
use ustr::Ustr;

use super::{error::FeedMuxError, registry::SubscriptionRegistry};
use crate::common::domain::topic_domain;

/// Cumulative counters for routed data frames.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize)]
pub struct RouterStats {
    /// Frames delivered to at least one subscriber.
    pub routed: u64,
    /// Frames with no active subscriber for their topic.
    pub dropped: u64,
    /// Callback invocations that returned an error or panicked.
    pub callback_failures: u64,
}

/// Result of routing a single frame.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct RouteOutcome {
    pub delivered: usize,
    pub failed: usize,
}

#[derive(Debug, Default)]
pub struct FeedRouter {
    stats: RouterStats,
}

impl FeedRouter {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn stats(&self) -> RouterStats {
        self.stats
    }

    /// Delivers `payload` to every active subscription of `topic`, in registration order.
    ///
    /// A failing callback is logged and does not prevent delivery to the remaining
    /// subscribers.
    pub fn route(
        &mut self,
        registry: &SubscriptionRegistry,
        topic: Option<Ustr>,
        payload: &Value,
    ) -> RouteOutcome {
        let Some(topic) = topic else {
            tracing::debug!("Dropping data frame without topic");
            self.stats.dropped += 1;
            return RouteOutcome::default();
        };

        let mut outcome = RouteOutcome::default();

        for sub in registry.find_by_topic(&topic) {
            if !sub.is_active() {
                continue;
            }

            let callback = sub.callback();
            let result = match catch_unwind(AssertUnwindSafe(|| callback(payload))) {
                Ok(Ok(())) => Ok(()),
                Ok(Err(e)) => Err(FeedMuxError::CallbackFailure(e.to_string())),
                Err(panic) => Err(FeedMuxError::CallbackFailure(panic_message(&*panic))),
            };

            match result {
                Ok(()) => outcome.delivered += 1,
                Err(e) => {
                    tracing::error!(subscription_id = %sub.id, %topic, "{e}");
                    outcome.failed += 1;
                }
            }
        }

        self.stats.callback_failures += outcome.failed as u64;

        if outcome.delivered + outcome.failed == 0 {
            tracing::debug!(
                %topic,
                domain = topic_domain(&topic),
                "No active subscription for topic, dropping frame"
            );
            self.stats.dropped += 1;
        } else {
            self.stats.routed += 1;
        }

        outcome
    }
}

fn panic_message(panic: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        format!("callback panicked: {s}")
    } else if let Some(s) = panic.downcast_ref::<String>() {
        format!("callback panicked: {s}")
    } else {
        "callback panicked".to_string()
    }
}
