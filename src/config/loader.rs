use std::collections::HashSet;
use std::fs;
use std::path::Path;

use tracing::{debug, info};

use crate::schedule::WindowError;

use super::types::Config;

/// Errors raised while loading or validating configuration.
///
/// Configuration errors are the only fatal errors in campd: a config
/// that fails validation never reaches a dispatch worker.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read config file {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse YAML configuration: {0}")]
    Parse(#[from] serde_yaml::Error),

    #[error("at least one queue must be defined")]
    NoQueues,

    #[error("duplicate queue name: {0}")]
    DuplicateQueue(String),

    #[error("queue '{queue}': {source}")]
    Window {
        queue: String,
        #[source]
        source: WindowError,
    },

    #[error("queue '{0}': max_per_day must be at least 1")]
    ZeroDailyCap(String),

    #[error("channel mock: fail_every must be at least 1")]
    ZeroFailEvery,
}

impl Config {
    /// Load configuration from a YAML file
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let path = path.as_ref();

        debug!(path = %path.display(), "loading configuration");

        let contents = fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.display().to_string(),
            source,
        })?;

        Self::from_yaml(&contents)
    }

    /// Parse configuration from YAML string
    pub fn from_yaml(yaml: &str) -> Result<Self, ConfigError> {
        let config: Config = serde_yaml::from_str(yaml)?;

        config.validate()?;

        Ok(config)
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.queues.is_empty() {
            return Err(ConfigError::NoQueues);
        }

        let mut names = HashSet::new();
        for queue in &self.queues {
            if !names.insert(&queue.name) {
                return Err(ConfigError::DuplicateQueue(queue.name.clone()));
            }

            queue.window.to_window().map_err(|source| ConfigError::Window {
                queue: queue.name.clone(),
                source,
            })?;

            if queue.max_per_day == Some(0) {
                return Err(ConfigError::ZeroDailyCap(queue.name.clone()));
            }
        }

        if self.channel.mock.fail_every == Some(0) {
            return Err(ConfigError::ZeroFailEvery);
        }

        info!(queues = self.queues.len(), "configuration validated");
        Ok(())
    }
}
