//! Delivery acknowledgment handler.
//!
//! Consumes the channel's asynchronous ack stream:
//! 1. Correlates each ack with a stored message via its external id
//! 2. Advances message status, rejecting regressions — acks arrive
//!    at-least-once and possibly out of order
//! 3. Materializes chained dependents on a parent's first `sent`
//! 4. Notifies the aggregator so batch completion is re-evaluated

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::{mpsc, Notify};
use tracing::{debug, info, warn};

use crate::bootstrap::{EngineEvent, EventBus, Shutdown, ShutdownState};
use crate::campaign::CampaignAggregator;
use crate::channel::{AckEvent, AckLevel};
use crate::clock::SharedClock;
use crate::dispatch::MessageChain;
use crate::store::SharedStorage;
use crate::telemetry::counters;

/// An acknowledgment that matches no stored message.
///
/// Correlation is exact-match only; fuzzier fallback policies belong
/// to the storage collaborator, not the core. The ack is logged and
/// dropped — never fatal.
#[derive(Debug, thiserror::Error)]
#[error("ack level {level} matches no message (external id {external_id})")]
pub struct CorrelationError {
    pub external_id: String,
    pub level: &'static str,
}

/// Acknowledgment processor.
pub struct AckProcessor {
    rx: mpsc::Receiver<AckEvent>,
    store: SharedStorage,
    clock: SharedClock,
    events: Arc<EventBus>,
    aggregator: Arc<CampaignAggregator>,
    chain: Arc<MessageChain>,
    shutdown: Arc<Shutdown>,
    /// Per-queue worker wake handles, rung after materialization
    wakes: HashMap<String, Arc<Notify>>,
}

impl AckProcessor {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        rx: mpsc::Receiver<AckEvent>,
        store: SharedStorage,
        clock: SharedClock,
        events: Arc<EventBus>,
        aggregator: Arc<CampaignAggregator>,
        chain: Arc<MessageChain>,
        shutdown: Arc<Shutdown>,
        wakes: HashMap<String, Arc<Notify>>,
    ) -> Self {
        Self {
            rx,
            store,
            clock,
            events,
            aggregator,
            chain,
            shutdown,
            wakes,
        }
    }

    /// Run the ack processor until shutdown.
    pub async fn run(mut self) {
        info!("ack processor started");

        let mut shutdown_rx = self.shutdown.subscribe();

        loop {
            tokio::select! {
                biased;

                _ = shutdown_rx.changed() => {
                    if *shutdown_rx.borrow_and_update() != ShutdownState::Running {
                        info!("ack processor shutting down");
                        break;
                    }
                }

                event = self.rx.recv() => {
                    let Some(event) = event else {
                        info!("ack channel closed");
                        break;
                    };

                    self.process_ack(event);
                }
            }
        }
    }

    /// Process a single acknowledgment.
    fn process_ack(&self, event: AckEvent) {
        let Some(msg) = self.store.by_external_id(&event.external_id) else {
            let err = CorrelationError {
                external_id: event.external_id,
                level: event.level.as_str(),
            };
            warn!(error = %err, "dropping unmatched ack");
            counters::ack_orphaned();
            return;
        };

        let Some(current_rank) = msg.status.ack_rank() else {
            debug!(
                message_id = %msg.id,
                status = msg.status.name(),
                level = event.level.as_str(),
                "ignoring ack for message past acking"
            );
            counters::ack_stale();
            return;
        };

        // Monotonic status: apply only strictly-upward transitions, so
        // duplicated or reordered acks are harmless.
        if event.level.rank() <= current_rank {
            debug!(
                message_id = %msg.id,
                status = msg.status.name(),
                level = event.level.as_str(),
                "ignoring stale ack"
            );
            counters::ack_stale();
            return;
        }

        let now = self.clock.now();
        let from = msg.status;
        let external_id = event.external_id.clone();

        self.store.update(
            msg.id,
            Box::new(move |m| match event.level {
                AckLevel::Sent => m.mark_sent(external_id, now),
                AckLevel::Delivered => m.mark_delivered(now),
                AckLevel::Read => m.mark_read(now),
            }),
        );
        counters::ack_applied(event.level.as_str());

        let Some(updated) = self.store.get(msg.id) else {
            return;
        };

        debug!(
            message_id = %msg.id,
            from = from.name(),
            to = updated.status.name(),
            "ack applied"
        );

        self.events.publish(EngineEvent::status_of(&updated));
        self.aggregator
            .record_transition(updated.batch_id, from, updated.status);

        // First confirmation that the message went out: dependents can
        // now be scheduled relative to the actual send time.
        if current_rank == 0 {
            let sent_at = updated.sent_at.unwrap_or(now);
            let materialized = self.chain.on_parent_sent(msg.id, sent_at);
            if materialized > 0 {
                if let Some(wake) = self.wakes.get(&updated.queue) {
                    wake.notify_one();
                }
            }
        }
    }
}
