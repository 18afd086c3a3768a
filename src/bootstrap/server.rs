use std::sync::Arc;

use anyhow::Result;
use tokio::signal;
use tracing::{info, span, Level};

use crate::channel::{MessageChannel, MockChannel};
use crate::clock::SystemClock;
use crate::config::Config;
use crate::store::{MemoryStorage, SharedStorage};

use super::{Engine, ShutdownState};

/// Main campd server.
///
/// Components:
/// - Engine: dispatch workers, ack processor, maintenance sweep
/// - Shutdown: graceful drain with configurable timeout, driven by
///   SIGINT/SIGTERM
pub struct Server {
    engine: Engine,
}

impl Server {
    /// Create a new server instance from configuration.
    ///
    /// Storage and channel are the bundled development implementations
    /// (in-memory store, mock channel per config); embedders wire real
    /// collaborators through [`Engine`] directly.
    pub fn new(config: Config) -> Result<Self> {
        let config = Arc::new(config);
        let store: SharedStorage = Arc::new(MemoryStorage::new());

        let mock = &config.channel.mock;
        let channel: Arc<dyn MessageChannel> = Arc::new(MockChannel::new(
            mock.latency,
            mock.fail_every,
            mock.auto_ack,
        ));

        let engine = Engine::new(config, store, channel, Arc::new(SystemClock))?;

        Ok(Self { engine })
    }

    /// Run the server until shutdown.
    pub async fn run(mut self) -> Result<()> {
        let span = span!(Level::INFO, "campd", version = env!("CARGO_PKG_VERSION"));
        let _enter = span.enter();

        let config = self.engine.state().config.clone();

        info!(
            queues = config.queues.len(),
            drain_timeout_secs = config.settings.drain_timeout.as_secs(),
            "starting campd server"
        );

        for queue in &config.queues {
            let window = queue.window.to_window()?;
            info!(
                name = %queue.name,
                window_start_minute = window.start_minute(),
                window_end_minute = window.end_minute(),
                cross_midnight = window.crosses_midnight(),
                interval_secs = queue.interval.as_secs(),
                max_per_day = ?queue.max_per_day,
                "queue configured"
            );
        }

        self.engine.start()?;

        metrics::counter!("campd.server.starts").increment(1);

        // Wait for shutdown signal
        wait_for_shutdown().await;

        info!("shutdown signal received, starting graceful shutdown");

        let shutdown = self.engine.shutdown_handle();
        self.engine.stop().await;

        debug_assert_eq!(shutdown.state(), ShutdownState::Terminated);
        info!("campd server stopped");

        Ok(())
    }
}

/// Wait for shutdown signal (SIGINT or SIGTERM)
async fn wait_for_shutdown() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("received SIGINT (Ctrl+C)");
        }
        _ = terminate => {
            info!("received SIGTERM");
        }
    }
}
