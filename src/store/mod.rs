//! Message and batch storage.
//!
//! All engine state is reached through the [`Storage`] trait:
//! - **Messages**: insert, closure-based update, due-message queries
//!   sorted for dispatch, external-id correlation, chain lookups
//! - **Batches**: insert, update, member counting for completion
//! - **Maintenance**: pruning of resolved messages, statistics
//!
//! The bundled [`MemoryStorage`] is volatile and suitable for
//! development and tests; a persistent backend implements the same
//! trait behind the same engine.

mod memory;
pub mod types;

pub use memory::MemoryStorage;
pub use types::*;

use std::sync::Arc;

use chrono::{DateTime, Utc};

/// Unified storage trait for engine state.
///
/// All implementations must be thread-safe (Send + Sync); the engine
/// mutates messages only through [`Storage::update`] so backends can
/// serialize writes however they like.
pub trait Storage: Send + Sync {
    // -------------------------------------------------------------------------
    // Message Operations
    // -------------------------------------------------------------------------

    /// Store a new message. Returns the message ID.
    fn insert(&self, message: OutboundMessage) -> MessageId;

    /// Get a message by ID.
    fn get(&self, id: MessageId) -> Option<OutboundMessage>;

    /// Update a message in place using a closure.
    fn update(&self, id: MessageId, f: Box<dyn FnOnce(&mut OutboundMessage) + Send>) -> bool;

    /// Query messages matching criteria.
    fn query(&self, query: &MessageQuery) -> Vec<OutboundMessage>;

    /// Scheduled messages for a queue with `send_at <= now`, sorted by
    /// `send_at` then insertion order (stable FIFO).
    fn due(&self, queue: &str, now: DateTime<Utc>, limit: usize) -> Vec<OutboundMessage>;

    /// Find a message by its channel-assigned external id (exact match).
    fn by_external_id(&self, external_id: &str) -> Option<OutboundMessage>;

    /// All direct dependents of a parent message.
    fn dependents_of(&self, parent: MessageId) -> Vec<OutboundMessage>;

    /// All dependents still waiting for their parent.
    fn waiting_dependents(&self) -> Vec<OutboundMessage>;

    // -------------------------------------------------------------------------
    // Batch Operations
    // -------------------------------------------------------------------------

    /// Store a new batch. Returns the batch ID.
    fn insert_batch(&self, batch: Batch) -> BatchId;

    /// Get a batch by ID.
    fn get_batch(&self, id: BatchId) -> Option<Batch>;

    /// Update a batch in place using a closure.
    fn update_batch(&self, id: BatchId, f: Box<dyn FnOnce(&mut Batch) + Send>) -> bool;

    /// All member messages of a batch.
    fn batch_members(&self, id: BatchId) -> Vec<OutboundMessage>;

    /// Count batch members by status.
    fn batch_counts(&self, id: BatchId) -> BatchCounts;

    // -------------------------------------------------------------------------
    // Maintenance
    // -------------------------------------------------------------------------

    /// Get store statistics.
    fn stats(&self) -> StoreStats;

    /// Remove resolved messages last updated before `cutoff`.
    /// Batch records are kept; only message bodies are pruned.
    fn prune_resolved(&self, cutoff: DateTime<Utc>) -> u64;

    /// Run periodic maintenance.
    fn maintenance(&self, cutoff: DateTime<Utc>) {
        let pruned = self.prune_resolved(cutoff);
        if pruned > 0 {
            tracing::debug!(pruned, "pruned resolved messages");
        }
    }
}

/// Shared storage handle.
pub type SharedStorage = Arc<dyn Storage>;
