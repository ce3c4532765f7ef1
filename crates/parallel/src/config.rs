//! Pool and controller configuration
//!
//! Both configurations validate before anything is spawned, so a bad value
//! surfaces as [`ParallelError::InvalidConfig`] instead of a runtime panic
//! inside Tokio's channel constructors.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::{ParallelError, Result};

/// Default number of concurrent workers
pub const DEFAULT_CONCURRENCY: usize = 10;

/// Default capacity of each channel (the smallest handoff Tokio supports)
pub const DEFAULT_BUFFER: usize = 1;

/// Worker pool configuration
///
/// # Example
///
/// ```
/// use parallel::PoolConfig;
///
/// let config = PoolConfig::new(4).with_output_buffer(16);
/// assert!(config.validate().is_ok());
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PoolConfig {
    /// Number of worker tasks
    pub concurrency: usize,

    /// Capacity of the result and error channels
    pub output_buffer: usize,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            concurrency: DEFAULT_CONCURRENCY,
            output_buffer: DEFAULT_BUFFER,
        }
    }
}

impl PoolConfig {
    /// Create a pool configuration with the given concurrency
    pub fn new(concurrency: usize) -> Self {
        Self {
            concurrency,
            ..Default::default()
        }
    }

    /// Set the result/error channel capacity
    pub fn with_output_buffer(mut self, capacity: usize) -> Self {
        self.output_buffer = capacity;
        self
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<()> {
        if self.concurrency == 0 {
            return Err(ParallelError::config("concurrency must be at least 1"));
        }
        if self.output_buffer == 0 {
            return Err(ParallelError::config("output_buffer must be at least 1"));
        }
        Ok(())
    }
}

/// Controller configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ControllerConfig {
    /// Name used in log spans (generated if not provided)
    pub name: String,

    /// Number of worker tasks per generation
    pub concurrency: usize,

    /// Capacity of the input channel
    pub input_buffer: usize,

    /// Capacity of the result and error channels
    pub output_buffer: usize,
}

impl Default for ControllerConfig {
    fn default() -> Self {
        Self {
            name: format!("controller-{}", Uuid::now_v7()),
            concurrency: DEFAULT_CONCURRENCY,
            input_buffer: DEFAULT_BUFFER,
            output_buffer: DEFAULT_BUFFER,
        }
    }
}

impl ControllerConfig {
    /// Create a controller configuration with the given concurrency
    pub fn new(concurrency: usize) -> Self {
        Self {
            concurrency,
            ..Default::default()
        }
    }

    /// Load configuration from environment variables.
    ///
    /// - `PARALLEL_NAME`
    /// - `PARALLEL_CONCURRENCY` (default: 10)
    /// - `PARALLEL_INPUT_BUFFER` (default: 1)
    /// - `PARALLEL_OUTPUT_BUFFER` (default: 1)
    ///
    /// Unparseable numbers fall back to the defaults.
    pub fn from_env() -> Self {
        let defaults = Self::default();

        let name = std::env::var("PARALLEL_NAME").unwrap_or(defaults.name);

        Self {
            name,
            concurrency: env_usize("PARALLEL_CONCURRENCY").unwrap_or(defaults.concurrency),
            input_buffer: env_usize("PARALLEL_INPUT_BUFFER").unwrap_or(defaults.input_buffer),
            output_buffer: env_usize("PARALLEL_OUTPUT_BUFFER").unwrap_or(defaults.output_buffer),
        }
    }

    /// Set the controller name
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    /// Set the number of workers
    pub fn with_concurrency(mut self, concurrency: usize) -> Self {
        self.concurrency = concurrency;
        self
    }

    /// Set the input channel capacity
    pub fn with_input_buffer(mut self, capacity: usize) -> Self {
        self.input_buffer = capacity;
        self
    }

    /// Set the result/error channel capacity
    pub fn with_output_buffer(mut self, capacity: usize) -> Self {
        self.output_buffer = capacity;
        self
    }

    /// The pool configuration used for every generation
    pub fn pool(&self) -> PoolConfig {
        PoolConfig {
            concurrency: self.concurrency,
            output_buffer: self.output_buffer,
        }
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<()> {
        if self.input_buffer == 0 {
            return Err(ParallelError::config("input_buffer must be at least 1"));
        }
        self.pool().validate()
    }
}

fn env_usize(key: &str) -> Option<usize> {
    std::env::var(key).ok().and_then(|s| s.trim().parse().ok())
}
