//! Campaign tracking.
//!
//! - [`CampaignAggregator`]: per-batch counters, completion detection,
//!   and message/batch cancellation
//! - [`CampaignProducer`]: expands a campaign spec (recipients ×
//!   chain steps) into stored messages

mod aggregator;
mod producer;

pub use aggregator::{CampaignAggregator, CancelError};
pub use producer::{CampaignProducer, CampaignSpec, CampaignStep, ProducerError};
