//! Boundary events emitted by the engine.

use chrono::{DateTime, Utc};
use tokio::sync::broadcast;
use tracing::debug;

use crate::store::{BatchId, MessageId, MessageStatus, OutboundMessage};

/// Events consumed by presentation/storage collaborators.
#[derive(Debug, Clone)]
pub enum EngineEvent {
    /// Engine is starting
    Starting,

    /// All workers are running
    Ready,

    /// Shutdown initiated
    ShutdownStarted,

    /// A message changed status
    MessageStatusChanged {
        message_id: MessageId,
        batch_id: BatchId,
        status: MessageStatus,
        sent_at: Option<DateTime<Utc>>,
        delivered_at: Option<DateTime<Utc>>,
        read_at: Option<DateTime<Utc>>,
    },

    /// Every member of the batch reached a processed status
    BatchCompleted { batch_id: BatchId },

    /// The batch was cancelled as a whole
    BatchCancelled { batch_id: BatchId },
}

impl EngineEvent {
    /// Status-changed event snapshotting the message's current state.
    pub fn status_of(msg: &OutboundMessage) -> Self {
        Self::MessageStatusChanged {
            message_id: msg.id,
            batch_id: msg.batch_id,
            status: msg.status,
            sent_at: msg.sent_at,
            delivered_at: msg.delivered_at,
            read_at: msg.read_at,
        }
    }
}

/// Broadcast bus for engine events.
///
/// Multiple subscribers, fire-and-forget publishing: a slow or absent
/// subscriber never blocks the dispatch path.
pub struct EventBus {
    tx: broadcast::Sender<EngineEvent>,
}

impl EventBus {
    /// Create a new event bus.
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity);
        Self { tx }
    }

    /// Publish an event.
    pub fn publish(&self, event: EngineEvent) {
        debug!(event = ?event, "publishing event");
        // Ignore send errors (no subscribers)
        let _ = self.tx.send(event);
    }

    /// Subscribe to events.
    pub fn subscribe(&self) -> broadcast::Receiver<EngineEvent> {
        self.tx.subscribe()
    }

    /// Get number of active subscribers.
    pub fn subscriber_count(&self) -> usize {
        self.tx.receiver_count()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(256)
    }
}
