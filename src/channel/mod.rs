//! Messaging channel boundary.
//!
//! The engine talks to the outside world through [`MessageChannel`]:
//! one send call per dispatch attempt, and a stream of asynchronous
//! delivery acknowledgments keyed by the channel-assigned external id.
//! Transport concerns (sessions, reconnects, media encoding) live
//! entirely behind this trait.

mod mock;

pub use mock::MockChannel;

use async_trait::async_trait;
use tokio::sync::mpsc;

use crate::store::MediaRef;

/// Acknowledgment level reported by the channel.
///
/// Levels form a total order; a message's status only ever moves up it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum AckLevel {
    /// The channel accepted and sent the message
    Sent,
    /// The recipient's device received it
    Delivered,
    /// The recipient read it
    Read,
}

impl AckLevel {
    /// Position in the acknowledgment order.
    ///
    /// Aligned with [`crate::store::MessageStatus::ack_rank`].
    pub fn rank(&self) -> u8 {
        match self {
            Self::Sent => 1,
            Self::Delivered => 2,
            Self::Read => 3,
        }
    }

    /// Get the string name of this level.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Sent => "sent",
            Self::Delivered => "delivered",
            Self::Read => "read",
        }
    }
}

/// An asynchronous delivery acknowledgment.
///
/// At-least-once, possibly out of order, possibly unmatched.
#[derive(Debug, Clone)]
pub struct AckEvent {
    /// Channel-assigned message id
    pub external_id: String,
    /// Acknowledgment level
    pub level: AckLevel,
}

/// Errors from the channel boundary.
#[derive(Debug, thiserror::Error)]
pub enum ChannelError {
    #[error("channel not ready")]
    NotReady,

    #[error("send rejected: {0}")]
    Rejected(String),

    #[error("timeout waiting for channel")]
    Timeout,

    #[error("I/O error: {0}")]
    Io(String),
}

/// Outbound messaging channel.
///
/// A singleton shared capability; the engine never manages its
/// lifecycle. `send` is awaited with at most one call in flight per
/// dispatch queue.
#[async_trait]
pub trait MessageChannel: Send + Sync {
    /// Send one message. Returns the channel-assigned external id used
    /// to correlate later acknowledgments.
    async fn send(
        &self,
        recipient: &str,
        body: &str,
        media: Option<&MediaRef>,
    ) -> Result<String, ChannelError>;

    /// Take the acknowledgment stream. Yields `Some` exactly once; the
    /// engine consumes it in the ack processor.
    fn take_acks(&self) -> Option<mpsc::Receiver<AckEvent>>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ack_level_order() {
        assert!(AckLevel::Sent < AckLevel::Delivered);
        assert!(AckLevel::Delivered < AckLevel::Read);
        assert!(AckLevel::Sent.rank() < AckLevel::Read.rank());
    }

    #[test]
    fn test_ack_level_names() {
        assert_eq!(AckLevel::Sent.as_str(), "sent");
        assert_eq!(AckLevel::Delivered.as_str(), "delivered");
        assert_eq!(AckLevel::Read.as_str(), "read");
    }
}
