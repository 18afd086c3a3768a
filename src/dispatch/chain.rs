//! Message chains.
//!
//! A dependent message carries a relative delay and the id of its
//! parent. It sits in `waiting_for_parent` with a far-future send time
//! until the parent is confirmed sent; only then is its real send time
//! computed — relative to when the parent actually went out, not when
//! it was queued.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use tracing::{debug, info, warn};

use crate::bootstrap::{EngineEvent, EventBus};
use crate::campaign::CampaignAggregator;
use crate::clock::SharedClock;
use crate::config::Config;
use crate::schedule::compute_send_at;
use crate::store::{MessageId, MessageStatus, SharedStorage};
use crate::telemetry::counters;

/// Materializes and cancels chained dependents.
pub struct MessageChain {
    store: SharedStorage,
    clock: SharedClock,
    config: Arc<Config>,
    events: Arc<EventBus>,
    aggregator: Arc<CampaignAggregator>,
}

impl MessageChain {
    pub fn new(
        store: SharedStorage,
        clock: SharedClock,
        config: Arc<Config>,
        events: Arc<EventBus>,
        aggregator: Arc<CampaignAggregator>,
    ) -> Self {
        Self {
            store,
            clock,
            config,
            events,
            aggregator,
        }
    }

    /// Materialize every dependent of a freshly sent parent.
    ///
    /// Idempotent: only dependents still in `waiting_for_parent` are
    /// touched, so processing the same parent-sent event twice yields
    /// exactly one `scheduled` transition per dependent.
    pub fn on_parent_sent(&self, parent: MessageId, sent_at: DateTime<Utc>) -> usize {
        let now = self.clock.now();
        let max_wait = self.config.max_wait();
        let mut materialized = 0;

        for dep in self.store.dependents_of(parent) {
            if dep.status != MessageStatus::WaitingForParent {
                continue;
            }

            let delay = dep.chain_delay.unwrap_or_default();
            let window = self.config.window_for(&dep.queue);
            let send_at = compute_send_at(sent_at, delay, window, now, max_wait);

            self.store
                .update(dep.id, Box::new(move |m| m.materialize(send_at, now)));
            materialized += 1;
            counters::dependent_materialized();

            debug!(
                message_id = %dep.id,
                parent_id = %parent,
                send_at = %send_at,
                "dependent materialized"
            );

            if let Some(updated) = self.store.get(dep.id) {
                self.events.publish(EngineEvent::status_of(&updated));
            }
        }

        materialized
    }

    /// Cancel every dependent still waiting on a failed parent.
    pub fn on_parent_failed(&self, parent: MessageId, error: &str) -> usize {
        self.cancel_waiting(parent, format!("parent {parent} failed: {error}"), "parent_failed")
    }

    /// Cancel dependents whose parent has been unresolved for longer
    /// than the staleness threshold, or has disappeared entirely.
    /// Keeps dependents from waiting forever on a parent that was
    /// never acknowledged.
    pub fn sweep_stale(&self, now: DateTime<Utc>) -> usize {
        let staleness = self.config.parent_staleness();
        let mut swept = 0;

        for dep in self.store.waiting_dependents() {
            let Some(parent_id) = dep.parent_id else {
                // A waiting message without a parent cannot ever be
                // materialized; treat it like a missing parent.
                warn!(message_id = %dep.id, "waiting dependent has no parent");
                swept += self.cancel_one(dep.id, "orphaned dependent".to_string(), "stale");
                continue;
            };

            match self.store.get(parent_id) {
                None => {
                    swept += self.cancel_one(
                        dep.id,
                        format!("parent {parent_id} no longer exists"),
                        "stale",
                    );
                }
                Some(parent) => match parent.status {
                    MessageStatus::Failed | MessageStatus::Cancelled => {
                        swept += self.cancel_one(
                            dep.id,
                            format!("parent {parent_id} is {}", parent.status.name()),
                            "parent_failed",
                        );
                    }
                    status if status.is_pending() => {
                        if now - parent.created_at > staleness {
                            swept += self.cancel_one(
                                dep.id,
                                format!(
                                    "parent {parent_id} unresolved for more than {}h",
                                    staleness.num_hours()
                                ),
                                "stale",
                            );
                        }
                    }
                    _ => {}
                },
            }
        }

        if swept > 0 {
            info!(swept, "stale chain sweep cancelled dependents");
        }
        swept
    }

    fn cancel_waiting(&self, parent: MessageId, reason: String, kind: &'static str) -> usize {
        let mut cancelled = 0;
        for dep in self.store.dependents_of(parent) {
            if dep.status != MessageStatus::WaitingForParent {
                continue;
            }
            cancelled += self.cancel_one(dep.id, reason.clone(), kind);
        }
        cancelled
    }

    fn cancel_one(&self, id: MessageId, reason: String, kind: &'static str) -> usize {
        let now = self.clock.now();
        let why = reason.clone();
        if !self
            .store
            .update(id, Box::new(move |m| m.mark_cancelled(why, now)))
        {
            return 0;
        }
        counters::dependent_cancelled(kind);

        let Some(updated) = self.store.get(id) else {
            return 1;
        };
        debug!(message_id = %id, reason = %reason, "dependent cancelled");
        self.events.publish(EngineEvent::status_of(&updated));
        self.aggregator
            .record_transition(updated.batch_id, MessageStatus::WaitingForParent, updated.status);

        // Anything chained below the cancelled dependent can never run.
        self.cancel_waiting(id, format!("parent {id} cancelled"), kind);

        1
    }
}
