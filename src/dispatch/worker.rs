//! Per-queue dispatch loop.
//!
//! One worker owns one queue: it repeatedly selects the earliest-due
//! scheduled message, paces sends at the configured interval, pauses
//! entirely while the clock is outside the send window, and stops for
//! the day once the daily cap is reached. Each tick is a pure decision
//! over `(now, state, due messages)`, so the scheduling policy is
//! testable without timers.

use std::sync::Arc;
use std::time::Duration as StdDuration;

use chrono::{DateTime, Duration, NaiveDate, Utc};
use tokio::sync::{watch, Notify};
use tracing::{debug, info, warn};

use crate::bootstrap::{EngineEvent, EventBus, Shutdown, ShutdownState};
use crate::campaign::CampaignAggregator;
use crate::channel::MessageChannel;
use crate::clock::SharedClock;
use crate::config::QueueConfig;
use crate::schedule::SendWindow;
use crate::store::{MessageStatus, OutboundMessage, SharedStorage};
use crate::telemetry::counters;

use super::MessageChain;

/// Idle re-check cadence when nothing is due.
const IDLE_RECHECK: StdDuration = StdDuration::from_secs(30);

/// Window re-check ceiling in seconds; long waits are re-evaluated at
/// least this often.
const WINDOW_RECHECK_SECS: i64 = 60;

fn window_recheck() -> Duration {
    Duration::seconds(WINDOW_RECHECK_SECS)
}

/// Mutable dispatch state, owned by exactly one worker.
#[derive(Debug, Clone)]
pub struct DispatchState {
    /// Whether the last observed instant was inside the window
    pub in_window: bool,
    /// Completion time of the most recent send attempt
    pub last_sent_at: Option<DateTime<Utc>>,
    /// Successful sends since the day started
    pub sent_today: u32,
    /// UTC day the counter belongs to
    pub day: NaiveDate,
}

impl DispatchState {
    fn new(now: DateTime<Utc>, in_window: bool) -> Self {
        Self {
            in_window,
            last_sent_at: None,
            sent_today: 0,
            day: now.date_naive(),
        }
    }
}

/// One tick's decision.
#[derive(Debug)]
pub enum TickAction {
    /// Send this message now
    Dispatch(OutboundMessage),
    /// Nothing to do before this instant
    Wait(DateTime<Utc>),
    /// Nothing due; sleep the idle cadence
    Idle,
}

/// Pure per-tick decision for one queue.
///
/// Ordering of the checks mirrors the loop's priorities: the window
/// gates everything, then the daily cap, then pacing, and only then is
/// the earliest due message dispatched.
pub fn next_action(
    now: DateTime<Utc>,
    window: &SendWindow,
    interval: Duration,
    max_per_day: Option<u32>,
    state: &DispatchState,
    due: &[OutboundMessage],
) -> TickAction {
    if !window.contains(now) {
        let open = window.next_open(now);
        return TickAction::Wait(open.min(now + window_recheck()));
    }

    if let Some(cap) = max_per_day {
        if state.sent_today >= cap {
            let next_day = (now.date_naive() + Duration::days(1))
                .and_hms_opt(0, 0, 0)
                .map(|d| d.and_utc())
                .unwrap_or(now + window_recheck());
            return TickAction::Wait(next_day.min(now + window_recheck()));
        }
    }

    let Some(first) = due.first() else {
        return TickAction::Idle;
    };

    if let Some(last) = state.last_sent_at {
        let ready = last + interval;
        if ready > now {
            return TickAction::Wait(ready);
        }
    }

    TickAction::Dispatch(first.clone())
}

/// Dispatch loop for one queue.
pub struct DispatchWorker {
    queue: QueueConfig,
    window: SendWindow,
    interval: Duration,
    due_batch: usize,
    store: SharedStorage,
    channel: Arc<dyn MessageChannel>,
    clock: SharedClock,
    events: Arc<EventBus>,
    aggregator: Arc<CampaignAggregator>,
    chain: Arc<MessageChain>,
    shutdown: Arc<Shutdown>,
    wake: Arc<Notify>,
    state: DispatchState,
}

impl DispatchWorker {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        queue: QueueConfig,
        window: SendWindow,
        due_batch: usize,
        store: SharedStorage,
        channel: Arc<dyn MessageChannel>,
        clock: SharedClock,
        events: Arc<EventBus>,
        aggregator: Arc<CampaignAggregator>,
        chain: Arc<MessageChain>,
        shutdown: Arc<Shutdown>,
        wake: Arc<Notify>,
    ) -> Self {
        let interval =
            Duration::from_std(queue.interval).unwrap_or_else(|_| Duration::seconds(30));
        let now = clock.now();
        let state = DispatchState::new(now, window.contains(now));

        Self {
            queue,
            window,
            interval,
            due_batch,
            store,
            channel,
            clock,
            events,
            aggregator,
            chain,
            shutdown,
            wake,
            state,
        }
    }

    /// Run the dispatch loop until shutdown.
    pub async fn run(mut self) {
        info!(
            queue = %self.queue.name,
            interval_secs = self.interval.num_seconds(),
            max_per_day = ?self.queue.max_per_day,
            "dispatch worker started"
        );

        let mut shutdown_rx = self.shutdown.subscribe();

        loop {
            if *shutdown_rx.borrow_and_update() != ShutdownState::Running {
                break;
            }

            let now = self.clock.now();
            self.roll_day(now);
            self.observe_window(now);

            let due = self.store.due(&self.queue.name, now, self.due_batch);

            match next_action(
                now,
                &self.window,
                self.interval,
                self.queue.max_per_day,
                &self.state,
                &due,
            ) {
                TickAction::Dispatch(msg) => {
                    self.dispatch_one(msg).await;
                    // Event-driven re-check right after the send.
                }
                TickAction::Wait(until) => {
                    let sleep = (until - self.clock.now())
                        .to_std()
                        .unwrap_or(StdDuration::ZERO);
                    if !self.pause(sleep, &mut shutdown_rx).await {
                        break;
                    }
                }
                TickAction::Idle => {
                    if !self.pause(IDLE_RECHECK, &mut shutdown_rx).await {
                        break;
                    }
                }
            }
        }

        info!(queue = %self.queue.name, "dispatch worker stopped");
    }

    /// Sleep until the duration elapses, the worker is woken, or
    /// shutdown begins. Returns false when the loop should exit.
    async fn pause(
        &self,
        duration: StdDuration,
        shutdown_rx: &mut watch::Receiver<ShutdownState>,
    ) -> bool {
        tokio::select! {
            biased;

            _ = shutdown_rx.changed() => {
                *shutdown_rx.borrow_and_update() == ShutdownState::Running
            }

            _ = self.wake.notified() => true,

            _ = tokio::time::sleep(duration) => true,
        }
    }

    fn roll_day(&mut self, now: DateTime<Utc>) {
        let today = now.date_naive();
        if self.state.day != today {
            self.state.day = today;
            self.state.sent_today = 0;
        }
    }

    fn observe_window(&mut self, now: DateTime<Utc>) {
        let in_window = self.window.contains(now);
        if in_window != self.state.in_window {
            info!(
                queue = %self.queue.name,
                open = in_window,
                "send window transition"
            );
            counters::window_transition(&self.queue.name, in_window);
            self.state.in_window = in_window;
        }
    }

    /// Send one message: exactly one channel call, then status update,
    /// counters, boundary event, and chain propagation. A failure only
    /// fails this message; the loop moves on to the next one.
    async fn dispatch_one(&mut self, msg: OutboundMessage) {
        // The message may have been cancelled since the due query.
        let current = match self.store.get(msg.id) {
            Some(m) => m,
            None => {
                warn!(message_id = %msg.id, "due message disappeared");
                return;
            }
        };
        if current.status != MessageStatus::Scheduled {
            debug!(
                message_id = %msg.id,
                status = current.status.name(),
                "skipping message no longer scheduled"
            );
            return;
        }

        debug!(
            message_id = %msg.id,
            queue = %self.queue.name,
            recipient = %current.recipient,
            "dispatching message"
        );

        let result = self
            .channel
            .send(&current.recipient, &current.body, current.media.as_ref())
            .await;
        let now = self.clock.now();
        self.state.last_sent_at = Some(now);

        match result {
            Ok(external_id) => {
                self.state.sent_today += 1;

                let ext = external_id.clone();
                self.store
                    .update(msg.id, Box::new(move |m| m.mark_sent(ext, now)));
                counters::message_sent(&self.queue.name);

                debug!(
                    message_id = %msg.id,
                    external_id = %external_id,
                    sent_today = self.state.sent_today,
                    "message sent"
                );

                if let Some(updated) = self.store.get(msg.id) {
                    self.events.publish(EngineEvent::status_of(&updated));
                }
                self.aggregator.record_transition(
                    msg.batch_id,
                    MessageStatus::Scheduled,
                    MessageStatus::Sent,
                );
                self.chain.on_parent_sent(msg.id, now);
            }
            Err(err) => {
                let error = err.to_string();
                warn!(
                    message_id = %msg.id,
                    queue = %self.queue.name,
                    error = %error,
                    "send failed"
                );

                let reason = error.clone();
                self.store
                    .update(msg.id, Box::new(move |m| m.mark_failed(reason, now)));
                counters::message_failed(&self.queue.name);

                if let Some(updated) = self.store.get(msg.id) {
                    self.events.publish(EngineEvent::status_of(&updated));
                }
                self.aggregator.record_transition(
                    msg.batch_id,
                    MessageStatus::Scheduled,
                    MessageStatus::Failed,
                );
                self.chain.on_parent_failed(msg.id, &error);
            }
        }

        if let Some(cap) = self.queue.max_per_day {
            if self.state.sent_today >= cap {
                info!(queue = %self.queue.name, cap, "daily send cap reached");
                counters::daily_cap_reached(&self.queue.name);
            }
        }
    }
}
