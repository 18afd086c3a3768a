use serde::Deserialize;
use std::time::Duration;

use crate::schedule::{SendWindow, WindowError};

/// Root configuration for campd
#[derive(Debug, Clone, Deserialize, Default)]
pub struct Config {
    /// Dispatch queues, each with its own window and pacing
    #[serde(default)]
    pub queues: Vec<QueueConfig>,

    /// Message-chain policy
    #[serde(default)]
    pub chain: ChainSettings,

    /// Channel configuration
    #[serde(default)]
    pub channel: ChannelSettings,

    /// Global settings
    #[serde(default)]
    pub settings: Settings,

    /// Telemetry settings
    #[serde(default)]
    pub telemetry: TelemetrySettings,
}

impl Config {
    /// Config with a single all-day queue, for tests and examples.
    pub fn single_queue(name: impl Into<String>, interval: Duration) -> Self {
        Self {
            queues: vec![QueueConfig {
                name: name.into(),
                window: WindowSettings::default(),
                interval,
                max_per_day: None,
            }],
            ..Default::default()
        }
    }

    /// Look up a queue by name.
    pub fn queue(&self, name: &str) -> Option<&QueueConfig> {
        self.queues.iter().find(|q| q.name == name)
    }

    /// Send window for a queue; all-day when the queue is unknown.
    ///
    /// Windows are validated at load time, so the fallback only covers
    /// messages addressed to queues missing from the config.
    pub fn window_for(&self, queue: &str) -> SendWindow {
        self.queue(queue)
            .and_then(|q| q.window.to_window().ok())
            .unwrap_or_default()
    }

    /// Chain maximum-wait ceiling.
    pub fn max_wait(&self) -> chrono::Duration {
        chrono::Duration::from_std(self.chain.max_wait)
            .unwrap_or_else(|_| chrono::Duration::hours(24))
    }

    /// Chain parent-staleness threshold.
    pub fn parent_staleness(&self) -> chrono::Duration {
        chrono::Duration::from_std(self.chain.parent_staleness)
            .unwrap_or_else(|_| chrono::Duration::hours(24))
    }
}

/// Dispatch queue configuration
#[derive(Debug, Clone, Deserialize)]
pub struct QueueConfig {
    /// Queue name (for logging/metrics and message routing)
    pub name: String,

    /// Daily send window
    #[serde(default)]
    pub window: WindowSettings,

    /// Minimum interval between consecutive sends
    #[serde(default = "default_interval", with = "humantime_serde")]
    pub interval: Duration,

    /// Maximum sends per UTC day (unlimited when absent)
    #[serde(default)]
    pub max_per_day: Option<u32>,
}

/// Daily send window in wall-clock hours and minutes.
///
/// `start > end` denotes a window crossing midnight. Defaults to the
/// whole day.
#[derive(Debug, Clone, Copy, Deserialize)]
pub struct WindowSettings {
    #[serde(default)]
    pub start_hour: u32,
    #[serde(default)]
    pub start_minute: u32,
    #[serde(default = "default_end_hour")]
    pub end_hour: u32,
    #[serde(default = "default_end_minute")]
    pub end_minute: u32,
}

impl WindowSettings {
    /// Build the validated window value object.
    pub fn to_window(self) -> Result<SendWindow, WindowError> {
        SendWindow::from_hm(
            self.start_hour,
            self.start_minute,
            self.end_hour,
            self.end_minute,
        )
    }
}

impl Default for WindowSettings {
    fn default() -> Self {
        Self {
            start_hour: 0,
            start_minute: 0,
            end_hour: default_end_hour(),
            end_minute: default_end_minute(),
        }
    }
}

fn default_end_hour() -> u32 {
    23
}

fn default_end_minute() -> u32 {
    59
}

fn default_interval() -> Duration {
    Duration::from_secs(30)
}

/// Message-chain policy
#[derive(Debug, Clone, Deserialize)]
pub struct ChainSettings {
    /// Ceiling on how long a computed send time may lie in the future
    #[serde(default = "default_max_wait", with = "humantime_serde")]
    pub max_wait: Duration,

    /// How long a dependent waits on an unresolved parent before it is
    /// cancelled
    #[serde(default = "default_parent_staleness", with = "humantime_serde")]
    pub parent_staleness: Duration,
}

impl Default for ChainSettings {
    fn default() -> Self {
        Self {
            max_wait: default_max_wait(),
            parent_staleness: default_parent_staleness(),
        }
    }
}

fn default_max_wait() -> Duration {
    Duration::from_secs(24 * 3600)
}

fn default_parent_staleness() -> Duration {
    Duration::from_secs(24 * 3600)
}

/// Channel configuration
#[derive(Debug, Clone, Deserialize, Default)]
pub struct ChannelSettings {
    /// Mock channel - simulate sends instead of using a transport
    #[serde(default)]
    pub mock: MockSettings,
}

/// Mock channel configuration
#[derive(Debug, Clone, Deserialize)]
pub struct MockSettings {
    /// Simulated send latency
    #[serde(default, with = "humantime_serde")]
    pub latency: Duration,

    /// Every Nth send fails (disabled when absent)
    #[serde(default)]
    pub fail_every: Option<u64>,

    /// Emit a sent ack for every accepted send
    #[serde(default = "default_auto_ack")]
    pub auto_ack: bool,
}

impl Default for MockSettings {
    fn default() -> Self {
        Self {
            latency: Duration::ZERO,
            fail_every: None,
            auto_ack: default_auto_ack(),
        }
    }
}

fn default_auto_ack() -> bool {
    true
}

/// Global settings
#[derive(Debug, Clone, Deserialize)]
pub struct Settings {
    /// Graceful shutdown drain timeout
    #[serde(default = "default_drain_timeout", with = "humantime_serde")]
    pub drain_timeout: Duration,

    /// Interval between store maintenance runs
    #[serde(default = "default_maintenance_interval", with = "humantime_serde")]
    pub maintenance_interval: Duration,

    /// Age after which resolved messages are pruned
    #[serde(default = "default_prune_age", with = "humantime_serde")]
    pub prune_age: Duration,

    /// Maximum due messages fetched per dispatch tick
    #[serde(default = "default_due_batch")]
    pub due_batch: usize,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            drain_timeout: default_drain_timeout(),
            maintenance_interval: default_maintenance_interval(),
            prune_age: default_prune_age(),
            due_batch: default_due_batch(),
        }
    }
}

fn default_drain_timeout() -> Duration {
    Duration::from_secs(30)
}

fn default_maintenance_interval() -> Duration {
    Duration::from_secs(300)
}

fn default_prune_age() -> Duration {
    Duration::from_secs(7 * 24 * 3600)
}

fn default_due_batch() -> usize {
    100
}

/// Telemetry settings
#[derive(Debug, Clone, Deserialize)]
pub struct TelemetrySettings {
    /// Log level
    #[serde(default = "default_log_level")]
    pub log_level: String,

    /// JSON log format
    #[serde(default)]
    pub json_logs: bool,
}

impl Default for TelemetrySettings {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
            json_logs: false,
        }
    }
}

fn default_log_level() -> String {
    "info".to_string()
}
