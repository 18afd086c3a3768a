//! Engine state and task assembly.

use std::collections::HashMap;
use std::sync::Arc;

use anyhow::{Context, Result};
use tokio::sync::{broadcast, Notify};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{info, warn};

use crate::ack::AckProcessor;
use crate::campaign::{
    CampaignAggregator, CampaignProducer, CampaignSpec, ProducerError,
};
use crate::channel::MessageChannel;
use crate::clock::SharedClock;
use crate::config::Config;
use crate::dispatch::{DispatchWorker, MessageChain};
use crate::store::{BatchId, SharedStorage, StoreStats};

use super::{EngineEvent, EventBus, Shutdown, ShutdownState};

/// Shared engine state.
///
/// Passed to all components that need access to engine-wide resources.
/// All fields are thread-safe and can be cloned cheaply.
#[derive(Clone)]
pub struct EngineState {
    /// Configuration
    pub config: Arc<Config>,
    /// Message and batch storage
    pub store: SharedStorage,
    /// Outbound channel
    pub channel: Arc<dyn MessageChannel>,
    /// Injected time source
    pub clock: SharedClock,
    /// Boundary event bus
    pub events: Arc<EventBus>,
    /// Batch counters and completion
    pub aggregator: Arc<CampaignAggregator>,
    /// Chain materialization and cancellation
    pub chain: Arc<MessageChain>,
}

impl EngineState {
    /// Build the shared state from injected collaborators.
    pub fn new(
        config: Arc<Config>,
        store: SharedStorage,
        channel: Arc<dyn MessageChannel>,
        clock: SharedClock,
    ) -> Self {
        let events = Arc::new(EventBus::default());
        let aggregator = Arc::new(CampaignAggregator::new(
            store.clone(),
            clock.clone(),
            events.clone(),
        ));
        let chain = Arc::new(MessageChain::new(
            store.clone(),
            clock.clone(),
            config.clone(),
            events.clone(),
            aggregator.clone(),
        ));

        Self {
            config,
            store,
            channel,
            clock,
            events,
            aggregator,
            chain,
        }
    }

    /// Get store statistics.
    pub fn store_stats(&self) -> StoreStats {
        self.store.stats()
    }
}

/// The running engine: one dispatch worker per queue, the ack
/// processor, and the maintenance sweep.
pub struct Engine {
    state: EngineState,
    shutdown: Arc<Shutdown>,
    wakes: HashMap<String, Arc<Notify>>,
    tasks: Vec<JoinHandle<()>>,
}

impl Engine {
    /// Validate config and prepare an engine. No tasks run until
    /// [`Engine::start`].
    pub fn new(
        config: Arc<Config>,
        store: SharedStorage,
        channel: Arc<dyn MessageChannel>,
        clock: SharedClock,
    ) -> Result<Self> {
        config.validate().context("invalid configuration")?;

        let shutdown = Shutdown::new(config.settings.drain_timeout);
        let wakes = config
            .queues
            .iter()
            .map(|q| (q.name.clone(), Arc::new(Notify::new())))
            .collect();

        Ok(Self {
            state: EngineState::new(config, store, channel, clock),
            shutdown,
            wakes,
            tasks: Vec::new(),
        })
    }

    /// Spawn all engine tasks.
    pub fn start(&mut self) -> Result<()> {
        self.state.events.publish(EngineEvent::Starting);

        // Ack processor consumes the channel's single ack stream.
        let acks = self
            .state
            .channel
            .take_acks()
            .context("channel ack stream already taken")?;
        let processor = AckProcessor::new(
            acks,
            self.state.store.clone(),
            self.state.clock.clone(),
            self.state.events.clone(),
            self.state.aggregator.clone(),
            self.state.chain.clone(),
            self.shutdown.clone(),
            self.wakes.clone(),
        );
        self.tasks.push(tokio::spawn(processor.run()));

        // One dispatch worker per queue.
        for queue in &self.state.config.queues {
            let window = queue
                .window
                .to_window()
                .context("invalid window after validation")?;
            let wake = self
                .wakes
                .get(&queue.name)
                .cloned()
                .unwrap_or_else(|| Arc::new(Notify::new()));

            let worker = DispatchWorker::new(
                queue.clone(),
                window,
                self.state.config.settings.due_batch,
                self.state.store.clone(),
                self.state.channel.clone(),
                self.state.clock.clone(),
                self.state.events.clone(),
                self.state.aggregator.clone(),
                self.state.chain.clone(),
                self.shutdown.clone(),
                wake,
            );
            self.tasks.push(tokio::spawn(worker.run()));
        }

        // Maintenance: prune resolved messages, sweep stale chains.
        self.tasks.push(tokio::spawn(maintenance_loop(
            self.state.clone(),
            self.shutdown.clone(),
        )));

        info!(
            queues = self.state.config.queues.len(),
            tasks = self.tasks.len(),
            "engine started"
        );
        self.state.events.publish(EngineEvent::Ready);

        Ok(())
    }

    /// Shared state handle.
    pub fn state(&self) -> &EngineState {
        &self.state
    }

    /// Shutdown handle, e.g. for signal handlers.
    pub fn shutdown_handle(&self) -> Arc<Shutdown> {
        self.shutdown.clone()
    }

    /// Subscribe to boundary events.
    pub fn subscribe(&self) -> broadcast::Receiver<EngineEvent> {
        self.state.events.subscribe()
    }

    /// Submit a campaign and wake the owning queue's worker.
    pub fn submit(&self, spec: CampaignSpec) -> Result<BatchId, ProducerError> {
        let queue = spec.queue.clone();
        let producer = CampaignProducer::new(
            self.state.store.clone(),
            self.state.clock.clone(),
            self.state.config.clone(),
        );
        let batch_id = producer.submit(spec)?;
        self.wake(&queue);
        Ok(batch_id)
    }

    /// Wake a queue's dispatch worker for an immediate re-check.
    pub fn wake(&self, queue: &str) {
        if let Some(wake) = self.wakes.get(queue) {
            wake.notify_one();
        }
    }

    /// Drain and stop all tasks.
    pub async fn stop(self) {
        self.state.events.publish(EngineEvent::ShutdownStarted);
        self.shutdown.start_drain();

        // Workers observe the drain via their shutdown watchers;
        // in-flight sends complete, then the tasks return.
        let deadline = Instant::now() + self.shutdown.drain_timeout();
        for mut task in self.tasks {
            let remaining = deadline.saturating_duration_since(Instant::now());
            if tokio::time::timeout(remaining, &mut task).await.is_err() {
                warn!("task did not drain in time, aborting");
                task.abort();
            }
        }

        self.shutdown.terminate();
        info!("engine stopped");
    }
}

/// Periodic store maintenance and stale-chain sweeping.
async fn maintenance_loop(state: EngineState, shutdown: Arc<Shutdown>) {
    let interval = state.config.settings.maintenance_interval;
    let prune_age = chrono::Duration::from_std(state.config.settings.prune_age)
        .unwrap_or_else(|_| chrono::Duration::days(7));

    let mut ticker = tokio::time::interval(interval);
    let mut shutdown_rx = shutdown.subscribe();

    loop {
        tokio::select! {
            biased;

            _ = shutdown_rx.changed() => {
                if *shutdown_rx.borrow_and_update() != ShutdownState::Running {
                    break;
                }
            }

            _ = ticker.tick() => {
                let now = state.clock.now();
                state.store.maintenance(now - prune_age);
                state.chain.sweep_stale(now);
            }
        }
    }
}
