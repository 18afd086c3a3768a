//! Batch counters and completion detection.

use std::collections::HashSet;
use std::sync::Arc;

use tracing::{debug, info};

use crate::bootstrap::{EngineEvent, EventBus};
use crate::clock::SharedClock;
use crate::store::{BatchId, BatchStatus, MessageId, MessageStatus, SharedStorage};
use crate::telemetry::counters;

/// Tracks batch counters and derives the terminal `completed` state.
///
/// Observes every message transition; completion is monotone — once a
/// batch is completed or cancelled its status never changes again,
/// though counters keep refreshing as late acks arrive.
pub struct CampaignAggregator {
    store: SharedStorage,
    clock: SharedClock,
    events: Arc<EventBus>,
}

/// Errors from cancellation requests.
#[derive(Debug, thiserror::Error)]
pub enum CancelError {
    #[error("message not found")]
    MessageNotFound,

    #[error("batch not found")]
    BatchNotFound,

    #[error("cannot cancel a message already {0}")]
    NotCancellable(&'static str),

    #[error("batch already {0}")]
    BatchFinished(&'static str),
}

impl CampaignAggregator {
    pub fn new(store: SharedStorage, clock: SharedClock, events: Arc<EventBus>) -> Self {
        Self {
            store,
            clock,
            events,
        }
    }

    /// Record a member transition and re-evaluate the batch.
    pub fn record_transition(
        &self,
        batch_id: BatchId,
        from: MessageStatus,
        to: MessageStatus,
    ) {
        debug!(
            batch_id = %batch_id,
            from = from.name(),
            to = to.name(),
            "message transition"
        );
        self.observe(batch_id);
    }

    /// Refresh a batch's counters and flip it to `completed` once no
    /// member remains pending.
    pub fn observe(&self, batch_id: BatchId) {
        let Some(batch) = self.store.get_batch(batch_id) else {
            return;
        };

        let counts = self.store.batch_counts(batch_id);
        let now = self.clock.now();

        let starts_sending =
            batch.status == BatchStatus::Scheduled && counts.processed() > 0;
        let completes = !batch.status.is_terminal() && counts.total > 0 && counts.pending() == 0;

        self.store.update_batch(
            batch_id,
            Box::new(move |b| {
                b.counts = counts;
                b.updated_at = now;
                if b.status.is_terminal() {
                    return;
                }
                if starts_sending {
                    b.status = BatchStatus::Sending;
                }
                if completes {
                    b.status = BatchStatus::Completed;
                    b.finished_at = Some(now);
                }
            }),
        );

        if completes {
            info!(
                batch_id = %batch_id,
                total = counts.total,
                sent = counts.sent,
                failed = counts.failed,
                cancelled = counts.cancelled,
                "batch completed"
            );
            counters::batch_completed();
            self.events.publish(EngineEvent::BatchCompleted { batch_id });
        }
    }

    /// Cancel a single pending message, and any dependents chained
    /// below it. Messages already handed to the channel cannot be
    /// cancelled.
    pub fn cancel_message(
        &self,
        id: MessageId,
        reason: impl Into<String>,
    ) -> Result<(), CancelError> {
        let msg = self.store.get(id).ok_or(CancelError::MessageNotFound)?;
        if !msg.status.is_pending() {
            return Err(CancelError::NotCancellable(msg.status.name()));
        }

        let reason = reason.into();
        let mut batches = HashSet::new();
        // Walk the chain below the cancelled message.
        let mut stack = vec![(id, reason)];

        while let Some((msg_id, why)) = stack.pop() {
            let Some(current) = self.store.get(msg_id) else {
                continue;
            };
            if !current.status.is_pending() {
                continue;
            }

            let now = self.clock.now();
            let why_clone = why.clone();
            self.store
                .update(msg_id, Box::new(move |m| m.mark_cancelled(why_clone, now)));
            counters::message_cancelled();

            if let Some(updated) = self.store.get(msg_id) {
                self.events.publish(EngineEvent::status_of(&updated));
            }
            batches.insert(current.batch_id);

            for dep in self.store.dependents_of(msg_id) {
                stack.push((dep.id, format!("parent {} cancelled", msg_id)));
            }
        }

        for batch_id in batches {
            self.observe(batch_id);
        }

        Ok(())
    }

    /// Cancel a whole batch: every pending member is cancelled and the
    /// batch goes terminal as `cancelled`.
    pub fn cancel_batch(
        &self,
        batch_id: BatchId,
        reason: impl Into<String>,
    ) -> Result<(), CancelError> {
        let batch = self
            .store
            .get_batch(batch_id)
            .ok_or(CancelError::BatchNotFound)?;
        if batch.status.is_terminal() {
            return Err(CancelError::BatchFinished(batch.status.name()));
        }

        let reason = reason.into();
        for member in self.store.batch_members(batch_id) {
            if !member.status.is_pending() {
                continue;
            }
            let now = self.clock.now();
            let why = reason.clone();
            self.store
                .update(member.id, Box::new(move |m| m.mark_cancelled(why, now)));
            counters::message_cancelled();
            if let Some(updated) = self.store.get(member.id) {
                self.events.publish(EngineEvent::status_of(&updated));
            }
        }

        let counts = self.store.batch_counts(batch_id);
        let now = self.clock.now();
        self.store.update_batch(
            batch_id,
            Box::new(move |b| {
                b.counts = counts;
                b.status = BatchStatus::Cancelled;
                b.updated_at = now;
                b.finished_at = Some(now);
            }),
        );

        info!(batch_id = %batch_id, "batch cancelled");
        counters::batch_cancelled();
        self.events.publish(EngineEvent::BatchCancelled { batch_id });

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{DateTime, TimeZone, Utc};

    use crate::clock::ManualClock;
    use crate::schedule::ChainDelay;
    use crate::store::{Batch, MemoryStorage, OutboundMessage};

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 3, 1, 10, 0, 0).unwrap()
    }

    struct Fixture {
        store: SharedStorage,
        aggregator: CampaignAggregator,
        batch_id: BatchId,
    }

    fn fixture() -> Fixture {
        let store: SharedStorage = Arc::new(MemoryStorage::new());
        let clock = ManualClock::new(now());
        let events = Arc::new(EventBus::default());
        let aggregator = CampaignAggregator::new(store.clone(), clock, events);
        let batch_id = store.insert_batch(Batch::new("test", "default", now()));
        Fixture {
            store,
            aggregator,
            batch_id,
        }
    }

    fn add_message(f: &Fixture) -> MessageId {
        f.store.insert(OutboundMessage::new(
            "default",
            f.batch_id,
            "+1555",
            "hi",
            now(),
            now(),
        ))
    }

    #[test]
    fn test_completion_with_mixed_outcomes() {
        let f = fixture();
        let ids: Vec<_> = (0..3).map(|_| add_message(&f)).collect();

        let t = now();
        f.store.update(ids[0], Box::new(move |m| m.mark_sent("e1", t)));
        f.aggregator
            .record_transition(f.batch_id, MessageStatus::Scheduled, MessageStatus::Sent);
        f.store.update(ids[1], Box::new(move |m| m.mark_sent("e2", t)));
        f.aggregator
            .record_transition(f.batch_id, MessageStatus::Scheduled, MessageStatus::Sent);

        // Two of three processed: still sending.
        let batch = f.store.get_batch(f.batch_id).unwrap();
        assert_eq!(batch.status, BatchStatus::Sending);

        f.store
            .update(ids[2], Box::new(move |m| m.mark_failed("boom", t)));
        f.aggregator
            .record_transition(f.batch_id, MessageStatus::Scheduled, MessageStatus::Failed);

        let batch = f.store.get_batch(f.batch_id).unwrap();
        assert_eq!(batch.status, BatchStatus::Completed);
        assert_eq!(batch.counts.processed(), 3);
        assert_eq!(batch.counts.total, 3);
        assert!(batch.finished_at.is_some());
    }

    #[test]
    fn test_completion_is_terminal() {
        let f = fixture();
        let id = add_message(&f);

        let t = now();
        f.store.update(id, Box::new(move |m| m.mark_sent("e1", t)));
        f.aggregator.observe(f.batch_id);
        assert_eq!(
            f.store.get_batch(f.batch_id).unwrap().status,
            BatchStatus::Completed
        );

        // A late ack updates counters but not the terminal status.
        f.store.update(id, Box::new(move |m| m.mark_delivered(t)));
        f.aggregator
            .record_transition(f.batch_id, MessageStatus::Sent, MessageStatus::Delivered);

        let batch = f.store.get_batch(f.batch_id).unwrap();
        assert_eq!(batch.status, BatchStatus::Completed);
        assert_eq!(batch.counts.delivered, 1);
    }

    #[test]
    fn test_empty_batch_never_completes() {
        let f = fixture();
        f.aggregator.observe(f.batch_id);
        assert_eq!(
            f.store.get_batch(f.batch_id).unwrap().status,
            BatchStatus::Scheduled
        );
    }

    #[test]
    fn test_cancelled_excluded_from_completion_total() {
        let f = fixture();
        let a = add_message(&f);
        let b = add_message(&f);

        f.aggregator.cancel_message(b, "operator request").unwrap();

        let t = now();
        f.store.update(a, Box::new(move |m| m.mark_sent("e1", t)));
        f.aggregator.observe(f.batch_id);

        let batch = f.store.get_batch(f.batch_id).unwrap();
        assert_eq!(batch.status, BatchStatus::Completed);
        assert_eq!(batch.counts.cancelled, 1);
        assert_eq!(batch.counts.effective_total(), 1);
    }

    #[test]
    fn test_cancel_message_cascades_to_dependents() {
        let f = fixture();
        let parent = add_message(&f);

        let dep = OutboundMessage::new("default", f.batch_id, "+1555", "follow-up", now(), now())
            .with_parent(parent, ChainDelay::days(1));
        let dep_id = dep.id;
        f.store.insert(dep);

        f.aggregator.cancel_message(parent, "operator request").unwrap();

        assert_eq!(
            f.store.get(parent).unwrap().status,
            MessageStatus::Cancelled
        );
        let dep = f.store.get(dep_id).unwrap();
        assert_eq!(dep.status, MessageStatus::Cancelled);
        assert!(dep.cancel_reason.unwrap().contains("parent"));
    }

    #[test]
    fn test_cannot_cancel_sent_message() {
        let f = fixture();
        let id = add_message(&f);
        let t = now();
        f.store.update(id, Box::new(move |m| m.mark_sent("e1", t)));

        let err = f.aggregator.cancel_message(id, "too late").unwrap_err();
        assert!(matches!(err, CancelError::NotCancellable("sent")));
    }

    #[test]
    fn test_cancel_batch() {
        let f = fixture();
        let a = add_message(&f);
        let b = add_message(&f);
        let t = now();
        f.store.update(a, Box::new(move |m| m.mark_sent("e1", t)));

        f.aggregator.cancel_batch(f.batch_id, "campaign withdrawn").unwrap();

        let batch = f.store.get_batch(f.batch_id).unwrap();
        assert_eq!(batch.status, BatchStatus::Cancelled);
        // The sent member keeps its status; only pending ones cancel.
        assert_eq!(f.store.get(a).unwrap().status, MessageStatus::Sent);
        assert_eq!(f.store.get(b).unwrap().status, MessageStatus::Cancelled);

        // Cancelling again reports the terminal state.
        assert!(matches!(
            f.aggregator.cancel_batch(f.batch_id, "again"),
            Err(CancelError::BatchFinished("cancelled"))
        ));
    }
}
