//! Acknowledgment processing.

mod processor;

pub use processor::{AckProcessor, CorrelationError};
