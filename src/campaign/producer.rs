//! Campaign producer.
//!
//! Expands a campaign request (recipients × chain steps) into stored
//! messages: the first step of each recipient is scheduled into the
//! queue's window, every later step becomes a chained dependent of the
//! one before it.

use std::sync::Arc;

use tracing::info;

use crate::clock::SharedClock;
use crate::config::Config;
use crate::schedule::{compute_send_at, ChainDelay};
use crate::store::{Batch, BatchId, MediaRef, OutboundMessage, SharedStorage};

/// One step of a campaign chain.
#[derive(Debug, Clone)]
pub struct CampaignStep {
    /// Message body template for this step
    pub body: String,
    /// Optional media attachment
    pub media: Option<MediaRef>,
    /// Delay relative to the previous step's actual send time; for the
    /// first step, relative to submission
    pub delay: ChainDelay,
}

impl CampaignStep {
    /// Step with a body and no delay.
    pub fn immediate(body: impl Into<String>) -> Self {
        Self {
            body: body.into(),
            media: None,
            delay: ChainDelay::default(),
        }
    }

    /// Set the step delay.
    pub fn with_delay(mut self, delay: ChainDelay) -> Self {
        self.delay = delay;
        self
    }
}

/// A campaign submission.
#[derive(Debug, Clone)]
pub struct CampaignSpec {
    /// Display name for the batch
    pub name: String,
    /// Dispatch queue
    pub queue: String,
    /// Recipient addresses
    pub recipients: Vec<String>,
    /// Message chain, applied per recipient
    pub steps: Vec<CampaignStep>,
}

/// Errors from campaign submission.
#[derive(Debug, thiserror::Error)]
pub enum ProducerError {
    #[error("campaign has no recipients")]
    NoRecipients,

    #[error("campaign has no steps")]
    NoSteps,

    #[error("unknown queue: {0}")]
    UnknownQueue(String),

    #[error("ingestion rejected: {0}")]
    Unauthorized(String),
}

/// Turns campaign specs into batches of stored messages.
///
/// The producer only writes to storage; the dispatch workers pick the
/// messages up on their own ticks. A producer failure therefore looks
/// to the dispatch loop exactly like "no eligible messages".
pub struct CampaignProducer {
    store: SharedStorage,
    clock: SharedClock,
    config: Arc<Config>,
}

impl CampaignProducer {
    pub fn new(store: SharedStorage, clock: SharedClock, config: Arc<Config>) -> Self {
        Self {
            store,
            clock,
            config,
        }
    }

    /// Submit a campaign. Every message is recorded before this
    /// returns; the batch id is the handle for tracking and
    /// cancellation.
    pub fn submit(&self, spec: CampaignSpec) -> Result<BatchId, ProducerError> {
        if spec.recipients.is_empty() {
            return Err(ProducerError::NoRecipients);
        }
        if spec.steps.is_empty() {
            return Err(ProducerError::NoSteps);
        }
        if self.config.queue(&spec.queue).is_none() {
            return Err(ProducerError::UnknownQueue(spec.queue));
        }

        let now = self.clock.now();
        let window = self.config.window_for(&spec.queue);
        let max_wait = self.config.max_wait();

        let batch_id = self
            .store
            .insert_batch(Batch::new(spec.name.clone(), spec.queue.clone(), now));

        let mut inserted = 0u64;
        for recipient in &spec.recipients {
            let mut parent = None;

            for (i, step) in spec.steps.iter().enumerate() {
                let mut msg = OutboundMessage::new(
                    spec.queue.clone(),
                    batch_id,
                    recipient.clone(),
                    step.body.clone(),
                    // The first step is scheduled now; later steps get
                    // a real send time only once their parent is sent.
                    compute_send_at(now, step.delay, window, now, max_wait),
                    now,
                );
                if let Some(media) = &step.media {
                    msg = msg.with_media(media.clone());
                }
                if i > 0 {
                    // parent is always Some past the first step
                    if let Some(parent_id) = parent {
                        msg = msg.with_parent(parent_id, step.delay);
                    }
                }

                parent = Some(msg.id);
                self.store.insert(msg);
                inserted += 1;
            }
        }

        self.store.update_batch(
            batch_id,
            Box::new(move |b| {
                b.counts.total = inserted;
            }),
        );

        info!(
            batch_id = %batch_id,
            name = %spec.name,
            queue = %spec.queue,
            recipients = spec.recipients.len(),
            steps = spec.steps.len(),
            messages = inserted,
            "campaign submitted"
        );

        Ok(batch_id)
    }
}
