//! Relative delays and absolute send-time computation.

use chrono::{DateTime, Duration, Utc};
use serde::Deserialize;

use super::SendWindow;

/// Relative delay for a chain step, split into calendar components.
///
/// All components are non-negative and additive.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
pub struct ChainDelay {
    #[serde(default)]
    pub days: u32,
    #[serde(default)]
    pub hours: u32,
    #[serde(default)]
    pub minutes: u32,
    #[serde(default)]
    pub seconds: u32,
}

impl ChainDelay {
    /// Delay of the given number of seconds.
    pub fn seconds(seconds: u32) -> Self {
        Self {
            seconds,
            ..Default::default()
        }
    }

    /// Delay of the given number of days.
    pub fn days(days: u32) -> Self {
        Self {
            days,
            ..Default::default()
        }
    }

    /// Total delay as a duration.
    pub fn to_duration(self) -> Duration {
        Duration::days(i64::from(self.days))
            + Duration::hours(i64::from(self.hours))
            + Duration::minutes(i64::from(self.minutes))
            + Duration::seconds(i64::from(self.seconds))
    }

    /// Whether the delay is zero.
    pub fn is_zero(self) -> bool {
        self == Self::default()
    }
}

/// Compute the absolute send instant for a delayed message.
///
/// The result is `base + delay`, slid forward to the next window
/// opening when it lands outside the send window, but never later than
/// `now + max_wait`. The ceiling wins over the window: a send instant
/// clamped to the ceiling is returned as-is even if the ceiling falls
/// outside the window. A message is therefore never dropped for being
/// outside business hours; it slides to the next opening, but never
/// waits beyond the ceiling.
pub fn compute_send_at(
    base: DateTime<Utc>,
    delay: ChainDelay,
    window: SendWindow,
    now: DateTime<Utc>,
    max_wait: Duration,
) -> DateTime<Utc> {
    let raw = base + delay.to_duration();
    let ceiling = now + max_wait;

    if raw > ceiling {
        return ceiling;
    }

    if window.contains(raw) {
        return raw;
    }

    window.next_open(raw).min(ceiling)
}
