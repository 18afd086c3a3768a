//! Types for the message store.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::schedule::ChainDelay;

/// Unique message identifier.
///
/// Ids are assigned from a monotonic counter, so they double as the
/// stable insertion-order tie-break for due-message queries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
pub struct MessageId(u64);

/// Global message ID counter (for recovery).
pub static MESSAGE_COUNTER: AtomicU64 = AtomicU64::new(0);

impl MessageId {
    /// Create a new unique message ID.
    pub fn new() -> Self {
        Self(MESSAGE_COUNTER.fetch_add(1, Ordering::Relaxed))
    }

    /// Create a message ID from a raw value (for recovery).
    pub fn from_u64(id: u64) -> Self {
        Self(id)
    }

    /// Get the raw ID value.
    pub fn as_u64(&self) -> u64 {
        self.0
    }
}

impl Default for MessageId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for MessageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "msg_{}", self.0)
    }
}

/// Unique batch identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub struct BatchId(u64);

/// Global batch ID counter.
pub static BATCH_COUNTER: AtomicU64 = AtomicU64::new(0);

impl BatchId {
    /// Create a new unique batch ID.
    pub fn new() -> Self {
        Self(BATCH_COUNTER.fetch_add(1, Ordering::Relaxed))
    }

    /// Get the raw ID value.
    pub fn as_u64(&self) -> u64 {
        self.0
    }
}

impl Default for BatchId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for BatchId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "batch_{}", self.0)
    }
}

/// Message status in the store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageStatus {
    /// Has a concrete send time, waiting for the dispatcher
    Scheduled,
    /// Chained dependent, waiting for its parent to be sent
    WaitingForParent,
    /// Handed to the channel, confirmed sent
    Sent,
    /// Channel acknowledged delivery to the recipient
    Delivered,
    /// Channel acknowledged the recipient read it
    Read,
    /// Send failed (permanent; no in-loop retry)
    Failed,
    /// Cancelled before it was sent
    Cancelled,
}

impl MessageStatus {
    /// Still waiting to be dispatched.
    pub fn is_pending(&self) -> bool {
        matches!(self, Self::Scheduled | Self::WaitingForParent)
    }

    /// Dispatch finished, one way or another.
    pub fn is_resolved(&self) -> bool {
        !self.is_pending()
    }

    /// Counts toward a batch's processed total.
    ///
    /// Cancelled messages are excluded here and from the effective
    /// batch total, so cancelling neither stalls nor fakes completion.
    pub fn is_processed(&self) -> bool {
        matches!(
            self,
            Self::Sent | Self::Delivered | Self::Read | Self::Failed
        )
    }

    /// Position in the acknowledgment order, or `None` when the status
    /// can no longer be advanced by acks.
    pub fn ack_rank(&self) -> Option<u8> {
        match self {
            Self::Scheduled | Self::WaitingForParent => Some(0),
            Self::Sent => Some(1),
            Self::Delivered => Some(2),
            Self::Read => Some(3),
            Self::Failed | Self::Cancelled => None,
        }
    }

    /// Get the string name of this status.
    pub fn name(&self) -> &'static str {
        match self {
            Self::Scheduled => "scheduled",
            Self::WaitingForParent => "waiting_for_parent",
            Self::Sent => "sent",
            Self::Delivered => "delivered",
            Self::Read => "read",
            Self::Failed => "failed",
            Self::Cancelled => "cancelled",
        }
    }
}

/// Reference to a media attachment, passed through to the channel.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MediaRef {
    /// Location the channel can fetch the media from
    pub url: String,
    /// MIME type hint
    pub mime: Option<String>,
}

/// Sentinel send time for dependents awaiting their parent.
///
/// Far enough in the future that a due-query can never return it.
pub fn never_send_at() -> DateTime<Utc> {
    DateTime::<Utc>::MAX_UTC
}

/// A stored outbound message.
#[derive(Debug, Clone)]
pub struct OutboundMessage {
    /// Unique message ID (also the FIFO tie-break)
    pub id: MessageId,
    /// Batch this message belongs to
    pub batch_id: BatchId,
    /// Logical dispatch queue
    pub queue: String,
    /// Recipient address
    pub recipient: String,
    /// Message body
    pub body: String,
    /// Optional media attachment
    pub media: Option<MediaRef>,
    /// Current status
    pub status: MessageStatus,
    /// When to send; the far-future sentinel while waiting for a parent
    pub send_at: DateTime<Utc>,
    /// Parent message, present only for chained dependents
    pub parent_id: Option<MessageId>,
    /// Relative delay from the parent's actual send time
    pub chain_delay: Option<ChainDelay>,
    /// Channel-assigned id, set after send; correlates acks
    pub external_id: Option<String>,
    /// When the message was created
    pub created_at: DateTime<Utc>,
    /// When the message was last updated
    pub updated_at: DateTime<Utc>,
    /// When the channel confirmed the send
    pub sent_at: Option<DateTime<Utc>>,
    /// When the channel confirmed delivery
    pub delivered_at: Option<DateTime<Utc>>,
    /// When the channel confirmed the read
    pub read_at: Option<DateTime<Utc>>,
    /// Error message, set only on failure
    pub error: Option<String>,
    /// Cancellation reason, set only on cancellation
    pub cancel_reason: Option<String>,
}

impl OutboundMessage {
    /// Create a new scheduled message.
    pub fn new(
        queue: impl Into<String>,
        batch_id: BatchId,
        recipient: impl Into<String>,
        body: impl Into<String>,
        send_at: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            id: MessageId::new(),
            batch_id,
            queue: queue.into(),
            recipient: recipient.into(),
            body: body.into(),
            media: None,
            status: MessageStatus::Scheduled,
            send_at,
            parent_id: None,
            chain_delay: None,
            external_id: None,
            created_at: now,
            updated_at: now,
            sent_at: None,
            delivered_at: None,
            read_at: None,
            error: None,
            cancel_reason: None,
        }
    }

    /// Attach media.
    pub fn with_media(mut self, media: MediaRef) -> Self {
        self.media = Some(media);
        self
    }

    /// Turn this message into a chained dependent of `parent`.
    ///
    /// The send time becomes the far-future sentinel until the parent
    /// is confirmed sent and the dependent is materialized.
    pub fn with_parent(mut self, parent: MessageId, delay: ChainDelay) -> Self {
        self.parent_id = Some(parent);
        self.chain_delay = Some(delay);
        self.status = MessageStatus::WaitingForParent;
        self.send_at = never_send_at();
        self
    }

    /// Whether this message heads a chain rather than depending on one.
    pub fn is_chain_root(&self) -> bool {
        self.parent_id.is_none()
    }

    /// Mark as sent and record the channel-assigned id.
    pub fn mark_sent(&mut self, external_id: impl Into<String>, now: DateTime<Utc>) {
        self.status = MessageStatus::Sent;
        self.external_id = Some(external_id.into());
        if self.sent_at.is_none() {
            self.sent_at = Some(now);
        }
        self.updated_at = now;
    }

    /// Mark as delivered. Backfills `sent_at` when the sent ack was
    /// never observed, so timestamps stay ordered with status.
    pub fn mark_delivered(&mut self, now: DateTime<Utc>) {
        self.status = MessageStatus::Delivered;
        if self.sent_at.is_none() {
            self.sent_at = Some(now);
        }
        if self.delivered_at.is_none() {
            self.delivered_at = Some(now);
        }
        self.updated_at = now;
    }

    /// Mark as read, backfilling earlier timestamps the same way.
    pub fn mark_read(&mut self, now: DateTime<Utc>) {
        self.status = MessageStatus::Read;
        if self.sent_at.is_none() {
            self.sent_at = Some(now);
        }
        if self.delivered_at.is_none() {
            self.delivered_at = Some(now);
        }
        if self.read_at.is_none() {
            self.read_at = Some(now);
        }
        self.updated_at = now;
    }

    /// Mark as failed (permanent).
    pub fn mark_failed(&mut self, error: impl Into<String>, now: DateTime<Utc>) {
        self.status = MessageStatus::Failed;
        self.error = Some(error.into());
        self.updated_at = now;
    }

    /// Mark as cancelled.
    pub fn mark_cancelled(&mut self, reason: impl Into<String>, now: DateTime<Utc>) {
        self.status = MessageStatus::Cancelled;
        self.cancel_reason = Some(reason.into());
        self.updated_at = now;
    }

    /// Give a waiting dependent its concrete send time.
    pub fn materialize(&mut self, send_at: DateTime<Utc>, now: DateTime<Utc>) {
        self.status = MessageStatus::Scheduled;
        self.send_at = send_at;
        self.updated_at = now;
    }
}

/// Query filter for messages.
#[derive(Debug, Clone, Default)]
pub struct MessageQuery {
    /// Filter by status
    pub status: Option<MessageStatus>,
    /// Filter by queue
    pub queue: Option<String>,
    /// Filter by batch
    pub batch_id: Option<BatchId>,
    /// Maximum number of results
    pub limit: Option<usize>,
}

impl MessageQuery {
    /// Create a new query.
    pub fn new() -> Self {
        Self::default()
    }

    /// Filter by status.
    pub fn with_status(mut self, status: MessageStatus) -> Self {
        self.status = Some(status);
        self
    }

    /// Filter by queue.
    pub fn with_queue(mut self, queue: impl Into<String>) -> Self {
        self.queue = Some(queue.into());
        self
    }

    /// Filter by batch.
    pub fn with_batch(mut self, batch_id: BatchId) -> Self {
        self.batch_id = Some(batch_id);
        self
    }

    /// Set limit.
    pub fn with_limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }
}

/// Batch status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum BatchStatus {
    /// Created, nothing sent yet
    Scheduled,
    /// At least one member has been dispatched
    Sending,
    /// Every member reached a processed status
    Completed,
    /// Cancelled as a whole
    Cancelled,
}

impl BatchStatus {
    /// Check if the batch can no longer change status.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Cancelled)
    }

    /// Get the string name of this status.
    pub fn name(&self) -> &'static str {
        match self {
            Self::Scheduled => "scheduled",
            Self::Sending => "sending",
            Self::Completed => "completed",
            Self::Cancelled => "cancelled",
        }
    }
}

/// Aggregate counters for a batch.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct BatchCounts {
    pub total: u64,
    pub sent: u64,
    pub delivered: u64,
    pub read: u64,
    pub failed: u64,
    pub cancelled: u64,
}

impl BatchCounts {
    /// Messages that reached a processed status.
    pub fn processed(&self) -> u64 {
        self.sent + self.delivered + self.read + self.failed
    }

    /// Total minus cancelled; the denominator for completion.
    pub fn effective_total(&self) -> u64 {
        self.total.saturating_sub(self.cancelled)
    }

    /// Members still waiting to be dispatched.
    pub fn pending(&self) -> u64 {
        self.effective_total().saturating_sub(self.processed())
    }
}

/// A named group of messages created together.
#[derive(Debug, Clone)]
pub struct Batch {
    /// Unique batch ID
    pub id: BatchId,
    /// Display name
    pub name: String,
    /// Dispatch queue the members belong to
    pub queue: String,
    /// Current status
    pub status: BatchStatus,
    /// Aggregate counters, refreshed on every member transition
    pub counts: BatchCounts,
    /// When the batch was created
    pub created_at: DateTime<Utc>,
    /// When the batch was last updated
    pub updated_at: DateTime<Utc>,
    /// When the batch completed or was cancelled
    pub finished_at: Option<DateTime<Utc>>,
}

impl Batch {
    /// Create a new batch.
    pub fn new(name: impl Into<String>, queue: impl Into<String>, now: DateTime<Utc>) -> Self {
        Self {
            id: BatchId::new(),
            name: name.into(),
            queue: queue.into(),
            status: BatchStatus::Scheduled,
            counts: BatchCounts::default(),
            created_at: now,
            updated_at: now,
            finished_at: None,
        }
    }
}

/// Store statistics.
#[derive(Debug, Clone, Default)]
pub struct StoreStats {
    /// Total messages in store
    pub total: u64,
    /// Scheduled messages
    pub scheduled: u64,
    /// Dependents waiting for their parent
    pub waiting_for_parent: u64,
    /// Sent messages
    pub sent: u64,
    /// Delivered messages
    pub delivered: u64,
    /// Read messages
    pub read: u64,
    /// Failed messages
    pub failed: u64,
    /// Cancelled messages
    pub cancelled: u64,
    /// Total batches in store
    pub batches: u64,
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 3, 1, 10, 0, 0).unwrap()
    }

    fn message() -> OutboundMessage {
        OutboundMessage::new("default", BatchId::new(), "+15551234567", "hello", now(), now())
    }

    #[test]
    fn test_status_pending() {
        assert!(MessageStatus::Scheduled.is_pending());
        assert!(MessageStatus::WaitingForParent.is_pending());
        assert!(!MessageStatus::Sent.is_pending());
        assert!(!MessageStatus::Cancelled.is_pending());
    }

    #[test]
    fn test_status_processed_excludes_cancelled() {
        assert!(MessageStatus::Sent.is_processed());
        assert!(MessageStatus::Delivered.is_processed());
        assert!(MessageStatus::Read.is_processed());
        assert!(MessageStatus::Failed.is_processed());
        assert!(!MessageStatus::Cancelled.is_processed());
        assert!(!MessageStatus::Scheduled.is_processed());
    }

    #[test]
    fn test_ack_rank_total_order() {
        assert!(MessageStatus::Scheduled.ack_rank() < MessageStatus::Sent.ack_rank());
        assert!(MessageStatus::Sent.ack_rank() < MessageStatus::Delivered.ack_rank());
        assert!(MessageStatus::Delivered.ack_rank() < MessageStatus::Read.ack_rank());
        assert_eq!(MessageStatus::Failed.ack_rank(), None);
        assert_eq!(MessageStatus::Cancelled.ack_rank(), None);
    }

    #[test]
    fn test_status_name() {
        assert_eq!(MessageStatus::WaitingForParent.name(), "waiting_for_parent");
        assert_eq!(MessageStatus::Read.name(), "read");
    }

    #[test]
    fn test_dependent_gets_sentinel_send_at() {
        let parent = message();
        let dep = message().with_parent(parent.id, ChainDelay::days(30));

        assert_eq!(dep.status, MessageStatus::WaitingForParent);
        assert_eq!(dep.send_at, never_send_at());
        assert_eq!(dep.parent_id, Some(parent.id));
        assert!(!dep.is_chain_root());
    }

    #[test]
    fn test_mark_sent_sets_timestamp_once() {
        let mut msg = message();
        let t1 = now();
        let t2 = t1 + chrono::Duration::minutes(5);

        msg.mark_sent("ext-1", t1);
        msg.mark_sent("ext-1b", t2);

        assert_eq!(msg.sent_at, Some(t1));
        assert_eq!(msg.external_id.as_deref(), Some("ext-1b"));
        assert_eq!(msg.updated_at, t2);
    }

    #[test]
    fn test_mark_read_backfills_earlier_timestamps() {
        let mut msg = message();
        msg.mark_read(now());

        assert_eq!(msg.status, MessageStatus::Read);
        assert_eq!(msg.sent_at, Some(now()));
        assert_eq!(msg.delivered_at, Some(now()));
        assert_eq!(msg.read_at, Some(now()));
    }

    #[test]
    fn test_timestamps_ordered_with_status() {
        let mut msg = message();
        let t1 = now();
        let t2 = t1 + chrono::Duration::minutes(1);
        let t3 = t2 + chrono::Duration::minutes(1);

        msg.mark_sent("ext-1", t1);
        msg.mark_delivered(t2);
        msg.mark_read(t3);

        assert!(msg.sent_at <= msg.delivered_at);
        assert!(msg.delivered_at <= msg.read_at);
    }

    #[test]
    fn test_materialize_dependent() {
        let parent = message();
        let mut dep = message().with_parent(parent.id, ChainDelay::seconds(30));

        let send_at = now() + chrono::Duration::seconds(30);
        dep.materialize(send_at, now());

        assert_eq!(dep.status, MessageStatus::Scheduled);
        assert_eq!(dep.send_at, send_at);
    }

    #[test]
    fn test_failed_keeps_error() {
        let mut msg = message();
        msg.mark_failed("channel not ready", now());

        assert_eq!(msg.status, MessageStatus::Failed);
        assert_eq!(msg.error.as_deref(), Some("channel not ready"));
        assert_eq!(msg.cancel_reason, None);
    }

    #[test]
    fn test_batch_counts_completion_math() {
        let counts = BatchCounts {
            total: 5,
            sent: 2,
            failed: 1,
            cancelled: 1,
            ..Default::default()
        };

        assert_eq!(counts.processed(), 3);
        assert_eq!(counts.effective_total(), 4);
        assert_eq!(counts.pending(), 1);
    }

    #[test]
    fn test_batch_status_terminal() {
        assert!(!BatchStatus::Scheduled.is_terminal());
        assert!(!BatchStatus::Sending.is_terminal());
        assert!(BatchStatus::Completed.is_terminal());
        assert!(BatchStatus::Cancelled.is_terminal());
    }

    #[test]
    fn test_message_id_display() {
        let id = MessageId::from_u64(42);
        assert_eq!(id.to_string(), "msg_42");
    }
}
