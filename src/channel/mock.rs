//! Mock channel for development and tests.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::mpsc;
use tracing::debug;

use crate::store::MediaRef;

use super::{AckEvent, AckLevel, ChannelError, MessageChannel};

/// Channel capacity for buffered acknowledgments.
const ACK_BUFFER: usize = 1024;

/// Mock channel: accepts sends with a configurable latency, fails
/// every Nth send when asked to, and can auto-acknowledge sends so the
/// full lifecycle runs without a real transport.
pub struct MockChannel {
    latency: Duration,
    /// Every Nth attempt fails; `None` disables failure injection.
    fail_every: Option<u64>,
    auto_ack: bool,
    attempts: AtomicU64,
    accepted: AtomicU64,
    ack_tx: mpsc::Sender<AckEvent>,
    ack_rx: Mutex<Option<mpsc::Receiver<AckEvent>>>,
}

impl MockChannel {
    /// Create a mock channel.
    pub fn new(latency: Duration, fail_every: Option<u64>, auto_ack: bool) -> Self {
        let (ack_tx, ack_rx) = mpsc::channel(ACK_BUFFER);
        Self {
            latency,
            fail_every,
            auto_ack,
            attempts: AtomicU64::new(0),
            accepted: AtomicU64::new(0),
            ack_tx,
            ack_rx: Mutex::new(Some(ack_rx)),
        }
    }

    /// Instant mock channel with no failures and no auto-acks.
    pub fn instant() -> Self {
        Self::new(Duration::ZERO, None, false)
    }

    /// Number of accepted sends so far.
    pub fn sent_count(&self) -> u64 {
        self.accepted.load(Ordering::Relaxed)
    }

    /// Inject an acknowledgment, as the transport would.
    pub fn emit_ack(&self, external_id: impl Into<String>, level: AckLevel) {
        let event = AckEvent {
            external_id: external_id.into(),
            level,
        };
        if self.ack_tx.try_send(event).is_err() {
            debug!("ack buffer full, dropping mock ack");
        }
    }
}

#[async_trait]
impl MessageChannel for MockChannel {
    async fn send(
        &self,
        recipient: &str,
        _body: &str,
        _media: Option<&MediaRef>,
    ) -> Result<String, ChannelError> {
        if !self.latency.is_zero() {
            tokio::time::sleep(self.latency).await;
        }

        let attempt = self.attempts.fetch_add(1, Ordering::Relaxed) + 1;

        if let Some(every) = self.fail_every {
            if every > 0 && attempt % every == 0 {
                return Err(ChannelError::Rejected(format!(
                    "simulated failure for {recipient}"
                )));
            }
        }

        let n = self.accepted.fetch_add(1, Ordering::Relaxed) + 1;
        let external_id = format!("mock-{n:06}");
        debug!(recipient, external_id = %external_id, "mock send accepted");

        if self.auto_ack {
            self.emit_ack(external_id.clone(), AckLevel::Sent);
        }

        Ok(external_id)
    }

    fn take_acks(&self) -> Option<mpsc::Receiver<AckEvent>> {
        self.ack_rx.lock().unwrap().take()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_send_assigns_sequential_ids() {
        let channel = MockChannel::instant();

        let a = channel.send("+1555", "hi", None).await.unwrap();
        let b = channel.send("+1555", "hi", None).await.unwrap();

        assert_eq!(a, "mock-000001");
        assert_eq!(b, "mock-000002");
        assert_eq!(channel.sent_count(), 2);
    }

    #[tokio::test]
    async fn test_fail_every_nth() {
        let channel = MockChannel::new(Duration::ZERO, Some(2), false);

        assert!(channel.send("+1555", "a", None).await.is_ok());
        assert!(matches!(
            channel.send("+1555", "b", None).await,
            Err(ChannelError::Rejected(_))
        ));
        assert!(channel.send("+1555", "c", None).await.is_ok());
    }

    #[tokio::test]
    async fn test_auto_ack_emits_sent() {
        let channel = MockChannel::new(Duration::ZERO, None, true);
        let mut acks = channel.take_acks().unwrap();

        let ext = channel.send("+1555", "hi", None).await.unwrap();

        let ack = acks.recv().await.unwrap();
        assert_eq!(ack.external_id, ext);
        assert_eq!(ack.level, AckLevel::Sent);
    }

    #[tokio::test]
    async fn test_take_acks_is_single_use() {
        let channel = MockChannel::instant();
        assert!(channel.take_acks().is_some());
        assert!(channel.take_acks().is_none());
    }
}
