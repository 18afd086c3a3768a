use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{broadcast, watch};
use tracing::info;

/// Shutdown state machine
///
/// States:
/// 1. Running - normal operation
/// 2. Draining - no new sends start, in-flight work completes
/// 3. Terminated - all tasks stopped
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShutdownState {
    Running,
    Draining,
    Terminated,
}

/// Manages graceful shutdown with a drain period
pub struct Shutdown {
    /// Current state
    state: watch::Sender<ShutdownState>,

    /// Drain period duration
    drain_timeout: Duration,

    /// Shutdown complete signal
    complete_tx: broadcast::Sender<()>,
}

impl Shutdown {
    pub fn new(drain_timeout: Duration) -> Arc<Self> {
        let (state, _) = watch::channel(ShutdownState::Running);
        let (complete_tx, _) = broadcast::channel(1);

        Arc::new(Self {
            state,
            drain_timeout,
            complete_tx,
        })
    }

    /// Get current state
    pub fn state(&self) -> ShutdownState {
        *self.state.borrow()
    }

    /// Get the drain period
    pub fn drain_timeout(&self) -> Duration {
        self.drain_timeout
    }

    /// Subscribe to state changes
    pub fn subscribe(&self) -> watch::Receiver<ShutdownState> {
        self.state.subscribe()
    }

    /// Subscribe to shutdown complete
    pub fn complete_signal(&self) -> broadcast::Receiver<()> {
        self.complete_tx.subscribe()
    }

    /// Start draining (called on SIGTERM/SIGINT)
    pub fn start_drain(&self) {
        if self.state() != ShutdownState::Running {
            return;
        }

        info!(
            drain_timeout_secs = self.drain_timeout.as_secs(),
            "starting graceful shutdown drain"
        );

        let _ = self.state.send(ShutdownState::Draining);
    }

    /// Complete shutdown
    pub fn terminate(&self) {
        if self.state() == ShutdownState::Terminated {
            return;
        }

        info!("shutdown complete");
        let _ = self.state.send(ShutdownState::Terminated);
        let _ = self.complete_tx.send(());
    }

    /// Check if still in normal operation
    pub fn is_running(&self) -> bool {
        self.state() == ShutdownState::Running
    }
}
