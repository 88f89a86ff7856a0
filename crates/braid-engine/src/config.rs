//! Engine configuration.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::sync::Semaphore;

/// Default number of steps that may run at once within one execution.
pub const DEFAULT_MAX_PARALLEL_STEPS: usize = 8;

/// Default step timeout: five minutes.
pub const DEFAULT_STEP_TIMEOUT_MS: u64 = 300_000;

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
  #[error("failed to read config file '{path}'")]
  Io {
    path: PathBuf,
    #[source]
    source: std::io::Error,
  },

  #[error("failed to parse config file '{path}'")]
  Parse {
    path: PathBuf,
    #[source]
    source: serde_json::Error,
  },

  #[error("max_parallel_steps must be between 1 and {}", Semaphore::MAX_PERMITS)]
  InvalidMaxParallel,
}

/// Configuration for the execution engine.
///
/// ```json
/// { "max_parallel_steps": 4, "default_step_timeout_ms": 60000, "max_retry_attempts": 1 }
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
  /// Upper bound on concurrently running steps per execution.
  pub max_parallel_steps: usize,
  /// Timeout for steps that do not declare one. `None` means no limit.
  pub default_step_timeout_ms: Option<u64>,
  /// Retries after an executor failure or timeout, for steps that do not
  /// declare their own.
  pub max_retry_attempts: u32,
}

impl Default for EngineConfig {
  fn default() -> Self {
    Self {
      max_parallel_steps: DEFAULT_MAX_PARALLEL_STEPS,
      default_step_timeout_ms: Some(DEFAULT_STEP_TIMEOUT_MS),
      max_retry_attempts: 0,
    }
  }
}

impl EngineConfig {
  /// Load and validate a config from a JSON file.
  pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
    let path = path.as_ref();
    let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
      path: path.to_path_buf(),
      source,
    })?;
    let config: Self = serde_json::from_str(&content).map_err(|source| ConfigError::Parse {
      path: path.to_path_buf(),
      source,
    })?;
    config.validate()?;
    Ok(config)
  }

  pub fn with_max_parallel_steps(mut self, max_parallel_steps: usize) -> Self {
    self.max_parallel_steps = max_parallel_steps;
    self
  }

  pub fn with_default_step_timeout_ms(mut self, timeout_ms: Option<u64>) -> Self {
    self.default_step_timeout_ms = timeout_ms;
    self
  }

  pub fn with_max_retry_attempts(mut self, attempts: u32) -> Self {
    self.max_retry_attempts = attempts;
    self
  }

  pub fn validate(&self) -> Result<(), ConfigError> {
    if self.max_parallel_steps == 0 || self.max_parallel_steps > Semaphore::MAX_PERMITS {
      return Err(ConfigError::InvalidMaxParallel);
    }
    Ok(())
  }

  /// Timeout for a step, falling back to the configured default.
  pub fn step_timeout(&self, step_timeout_ms: Option<u64>) -> Option<Duration> {
    step_timeout_ms
      .or(self.default_step_timeout_ms)
      .map(Duration::from_millis)
  }
}
