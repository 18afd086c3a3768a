//! Daily send window.

use chrono::{DateTime, Duration, NaiveDate, NaiveTime, Timelike, Utc};

/// Minutes in a day.
const DAY_MINUTES: u32 = 24 * 60;

/// A daily clock-time interval during which sends are permitted.
///
/// `start < end` denotes a same-day window (e.g. 09:00–17:00);
/// `start > end` denotes a window crossing midnight (e.g. 22:00–06:00).
/// A zero-width window (`start == end`) is rejected at construction:
/// the behavior would be ambiguous between "always open" and "never
/// open", so it never reaches the dispatch path.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SendWindow {
    /// Opening minute of day (0..=1439).
    start_minute: u32,
    /// Closing minute of day (0..=1439), exclusive.
    end_minute: u32,
}

/// Next window boundaries after a given instant.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WindowBoundary {
    /// Next instant the window opens.
    pub enter: DateTime<Utc>,
    /// Next instant the window closes.
    pub exit: DateTime<Utc>,
}

/// Invalid window definition.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum WindowError {
    #[error("clock time out of range: {hour:02}:{minute:02}")]
    OutOfRange { hour: u32, minute: u32 },

    #[error("window start and end are equal ({hour:02}:{minute:02}); a zero-width window is neither open nor closed")]
    Empty { hour: u32, minute: u32 },
}

impl SendWindow {
    /// Build a window from start/end hour and minute.
    pub fn from_hm(
        start_hour: u32,
        start_min: u32,
        end_hour: u32,
        end_min: u32,
    ) -> Result<Self, WindowError> {
        for (hour, minute) in [(start_hour, start_min), (end_hour, end_min)] {
            if hour > 23 || minute > 59 {
                return Err(WindowError::OutOfRange { hour, minute });
            }
        }

        let start_minute = start_hour * 60 + start_min;
        let end_minute = end_hour * 60 + end_min;

        if start_minute == end_minute {
            return Err(WindowError::Empty {
                hour: start_hour,
                minute: start_min,
            });
        }

        Ok(Self {
            start_minute,
            end_minute,
        })
    }

    /// Window spanning the entire day.
    pub fn all_day() -> Self {
        Self {
            start_minute: 0,
            end_minute: DAY_MINUTES - 1,
        }
    }

    /// Whether the window crosses midnight.
    pub fn crosses_midnight(&self) -> bool {
        self.start_minute > self.end_minute
    }

    /// Whether the given instant falls inside the window.
    pub fn contains(&self, t: DateTime<Utc>) -> bool {
        let m = minute_of_day(t);
        if self.crosses_midnight() {
            m >= self.start_minute || m < self.end_minute
        } else {
            m >= self.start_minute && m < self.end_minute
        }
    }

    /// Earliest instant `>= after` inside the window.
    ///
    /// Returns `after` unchanged when it is already inside.
    pub fn next_open(&self, after: DateTime<Utc>) -> DateTime<Utc> {
        if self.contains(after) {
            return after;
        }

        let m = minute_of_day(after);
        let date = after.date_naive();

        if m < self.start_minute {
            at_minute(date, self.start_minute)
        } else {
            at_minute(date + Duration::days(1), self.start_minute)
        }
    }

    /// Next open/close boundaries strictly relevant after `after`.
    pub fn next_boundary(&self, after: DateTime<Utc>) -> WindowBoundary {
        let m = minute_of_day(after);
        let date = after.date_naive();

        let enter = if m < self.start_minute {
            at_minute(date, self.start_minute)
        } else {
            at_minute(date + Duration::days(1), self.start_minute)
        };

        let exit = if m < self.end_minute {
            at_minute(date, self.end_minute)
        } else {
            at_minute(date + Duration::days(1), self.end_minute)
        };

        WindowBoundary { enter, exit }
    }

    /// Opening minute of day.
    pub fn start_minute(&self) -> u32 {
        self.start_minute
    }

    /// Closing minute of day.
    pub fn end_minute(&self) -> u32 {
        self.end_minute
    }
}

impl Default for SendWindow {
    fn default() -> Self {
        Self::all_day()
    }
}

fn minute_of_day(t: DateTime<Utc>) -> u32 {
    t.hour() * 60 + t.minute()
}

fn at_minute(date: NaiveDate, minute: u32) -> DateTime<Utc> {
    // minute is always < 1440 here; constructed via from_hm or all_day
    let time = NaiveTime::from_hms_opt(minute / 60, minute % 60, 0).unwrap();
    date.and_time(time).and_utc()
}
