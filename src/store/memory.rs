//! In-memory storage implementation.
//!
//! Volatile storage for development and testing. All data is lost on
//! restart.

use std::collections::HashMap;
use std::sync::RwLock;

use chrono::{DateTime, Utc};
use tracing::debug;

use super::types::*;
use super::Storage;

/// In-memory storage implementation.
///
/// Thread-safe using RwLock. Suitable for development and testing.
#[derive(Default)]
pub struct MemoryStorage {
    messages: RwLock<HashMap<MessageId, OutboundMessage>>,
    batches: RwLock<HashMap<BatchId, Batch>>,
}

impl MemoryStorage {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }
}

impl Storage for MemoryStorage {
    // -------------------------------------------------------------------------
    // Message Operations
    // -------------------------------------------------------------------------

    fn insert(&self, message: OutboundMessage) -> MessageId {
        let id = message.id;
        self.messages.write().unwrap().insert(id, message);
        id
    }

    fn get(&self, id: MessageId) -> Option<OutboundMessage> {
        self.messages.read().unwrap().get(&id).cloned()
    }

    fn update(&self, id: MessageId, f: Box<dyn FnOnce(&mut OutboundMessage) + Send>) -> bool {
        let mut messages = self.messages.write().unwrap();
        if let Some(msg) = messages.get_mut(&id) {
            f(msg);
            true
        } else {
            false
        }
    }

    fn query(&self, query: &MessageQuery) -> Vec<OutboundMessage> {
        let messages = self.messages.read().unwrap();
        let limit = query.limit.unwrap_or(1000);

        messages
            .values()
            .filter(|m| {
                if let Some(status) = query.status {
                    if m.status != status {
                        return false;
                    }
                }
                if let Some(ref queue) = query.queue {
                    if &m.queue != queue {
                        return false;
                    }
                }
                if let Some(batch_id) = query.batch_id {
                    if m.batch_id != batch_id {
                        return false;
                    }
                }
                true
            })
            .take(limit)
            .cloned()
            .collect()
    }

    fn due(&self, queue: &str, now: DateTime<Utc>, limit: usize) -> Vec<OutboundMessage> {
        let messages = self.messages.read().unwrap();

        let mut due: Vec<_> = messages
            .values()
            .filter(|m| m.queue == queue && m.status == MessageStatus::Scheduled && m.send_at <= now)
            .cloned()
            .collect();

        due.sort_by(|a, b| a.send_at.cmp(&b.send_at).then_with(|| a.id.cmp(&b.id)));
        due.truncate(limit);
        due
    }

    fn by_external_id(&self, external_id: &str) -> Option<OutboundMessage> {
        let messages = self.messages.read().unwrap();
        messages
            .values()
            .find(|m| m.external_id.as_deref() == Some(external_id))
            .cloned()
    }

    fn dependents_of(&self, parent: MessageId) -> Vec<OutboundMessage> {
        let messages = self.messages.read().unwrap();
        messages
            .values()
            .filter(|m| m.parent_id == Some(parent))
            .cloned()
            .collect()
    }

    fn waiting_dependents(&self) -> Vec<OutboundMessage> {
        let messages = self.messages.read().unwrap();
        messages
            .values()
            .filter(|m| m.status == MessageStatus::WaitingForParent)
            .cloned()
            .collect()
    }

    // -------------------------------------------------------------------------
    // Batch Operations
    // -------------------------------------------------------------------------

    fn insert_batch(&self, batch: Batch) -> BatchId {
        let id = batch.id;
        debug!(batch_id = %id, name = %batch.name, "batch created");
        self.batches.write().unwrap().insert(id, batch);
        id
    }

    fn get_batch(&self, id: BatchId) -> Option<Batch> {
        self.batches.read().unwrap().get(&id).cloned()
    }

    fn update_batch(&self, id: BatchId, f: Box<dyn FnOnce(&mut Batch) + Send>) -> bool {
        let mut batches = self.batches.write().unwrap();
        if let Some(batch) = batches.get_mut(&id) {
            f(batch);
            true
        } else {
            false
        }
    }

    fn batch_members(&self, id: BatchId) -> Vec<OutboundMessage> {
        let messages = self.messages.read().unwrap();
        messages
            .values()
            .filter(|m| m.batch_id == id)
            .cloned()
            .collect()
    }

    fn batch_counts(&self, id: BatchId) -> BatchCounts {
        let messages = self.messages.read().unwrap();
        let mut counts = BatchCounts::default();

        for msg in messages.values().filter(|m| m.batch_id == id) {
            counts.total += 1;
            match msg.status {
                MessageStatus::Sent => counts.sent += 1,
                MessageStatus::Delivered => counts.delivered += 1,
                MessageStatus::Read => counts.read += 1,
                MessageStatus::Failed => counts.failed += 1,
                MessageStatus::Cancelled => counts.cancelled += 1,
                MessageStatus::Scheduled | MessageStatus::WaitingForParent => {}
            }
        }

        counts
    }

    // -------------------------------------------------------------------------
    // Maintenance
    // -------------------------------------------------------------------------

    fn stats(&self) -> StoreStats {
        let messages = self.messages.read().unwrap();

        let mut stats = StoreStats {
            total: messages.len() as u64,
            batches: self.batches.read().unwrap().len() as u64,
            ..Default::default()
        };

        for msg in messages.values() {
            match msg.status {
                MessageStatus::Scheduled => stats.scheduled += 1,
                MessageStatus::WaitingForParent => stats.waiting_for_parent += 1,
                MessageStatus::Sent => stats.sent += 1,
                MessageStatus::Delivered => stats.delivered += 1,
                MessageStatus::Read => stats.read += 1,
                MessageStatus::Failed => stats.failed += 1,
                MessageStatus::Cancelled => stats.cancelled += 1,
            }
        }

        stats
    }

    fn prune_resolved(&self, cutoff: DateTime<Utc>) -> u64 {
        let mut messages = self.messages.write().unwrap();

        let to_remove: Vec<_> = messages
            .iter()
            .filter(|(_, m)| m.status.is_resolved() && m.updated_at < cutoff)
            .map(|(k, _)| *k)
            .collect();

        for k in &to_remove {
            messages.remove(k);
        }

        to_remove.len() as u64
    }
}

// =============================================================================
// Tests
// =============================================================================
