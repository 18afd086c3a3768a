//! Counter facade over the `metrics` recorder.
//!
//! Thin named helpers so call sites stay greppable and counter names
//! stay in one place.

/// A message was handed to the channel and confirmed sent.
pub fn message_sent(queue: &str) {
    metrics::counter!("campd.messages.sent", "queue" => queue.to_string()).increment(1);
}

/// A send attempt failed.
pub fn message_failed(queue: &str) {
    metrics::counter!("campd.messages.failed", "queue" => queue.to_string()).increment(1);
}

/// A message was cancelled before sending.
pub fn message_cancelled() {
    metrics::counter!("campd.messages.cancelled").increment(1);
}

/// An acknowledgment was applied to a message.
pub fn ack_applied(level: &'static str) {
    metrics::counter!("campd.acks.applied", "level" => level).increment(1);
}

/// An acknowledgment arrived for an unknown external id.
pub fn ack_orphaned() {
    metrics::counter!("campd.acks.orphaned").increment(1);
}

/// An acknowledgment was ignored as stale or regressive.
pub fn ack_stale() {
    metrics::counter!("campd.acks.stale").increment(1);
}

/// A waiting dependent received its concrete send time.
pub fn dependent_materialized() {
    metrics::counter!("campd.chain.materialized").increment(1);
}

/// A waiting dependent was cancelled because its parent failed or
/// went stale.
pub fn dependent_cancelled(reason: &'static str) {
    metrics::counter!("campd.chain.cancelled", "reason" => reason).increment(1);
}

/// A batch reached completion.
pub fn batch_completed() {
    metrics::counter!("campd.batches.completed").increment(1);
}

/// A batch was cancelled.
pub fn batch_cancelled() {
    metrics::counter!("campd.batches.cancelled").increment(1);
}

/// A dispatch worker observed a window transition.
pub fn window_transition(queue: &str, open: bool) {
    let state = if open { "open" } else { "closed" };
    metrics::counter!("campd.window.transitions", "queue" => queue.to_string(), "state" => state)
        .increment(1);
}

/// A queue hit its daily send cap.
pub fn daily_cap_reached(queue: &str) {
    metrics::counter!("campd.dispatch.daily_cap", "queue" => queue.to_string()).increment(1);
}
