//! Pipeline configuration
//!
//! This module provides `PipelineConfig` for sizing the worker pool and queue
//! and for bounding processing, storage and drain time.

use crate::error::PipelineError;
use crate::retry::RetryPolicy;
use core_config::{ConfigError, FromEnv, env_parse};
use std::time::Duration;

/// Configuration for the event pipeline
#[derive(Debug, Clone, PartialEq)]
pub struct PipelineConfig {
    /// Number of workers pulling from the queue
    pub worker_count: usize,

    /// Maximum number of queued jobs before submissions are rejected
    pub queue_capacity: usize,

    /// How long shutdown waits for queued and in-flight jobs
    pub drain_timeout: Duration,

    /// Upper bound for a single processor call
    pub process_timeout: Duration,

    /// Upper bound for a single store call
    pub storage_timeout: Duration,

    /// Retry policy for transient storage failures
    pub storage_retry: RetryPolicy,
}

impl PipelineConfig {
    pub fn new(worker_count: usize, queue_capacity: usize) -> Self {
        Self {
            worker_count,
            queue_capacity,
            ..Self::default()
        }
    }

    pub fn with_workers(mut self, worker_count: usize) -> Self {
        self.worker_count = worker_count;
        self
    }

    pub fn with_queue_capacity(mut self, capacity: usize) -> Self {
        self.queue_capacity = capacity;
        self
    }

    pub fn with_drain_timeout(mut self, timeout: Duration) -> Self {
        self.drain_timeout = timeout;
        self
    }

    pub fn with_process_timeout(mut self, timeout: Duration) -> Self {
        self.process_timeout = timeout;
        self
    }

    pub fn with_storage_timeout(mut self, timeout: Duration) -> Self {
        self.storage_timeout = timeout;
        self
    }

    pub fn with_storage_retry(mut self, policy: RetryPolicy) -> Self {
        self.storage_retry = policy;
        self
    }

    /// Reject settings the pipeline cannot start with
    pub fn validate(&self) -> Result<(), PipelineError> {
        if self.worker_count == 0 {
            return Err(PipelineError::Config("worker_count must be at least 1".into()));
        }
        if self.queue_capacity == 0 {
            return Err(PipelineError::Config("queue_capacity must be at least 1".into()));
        }
        if self.storage_retry.max_attempts == 0 {
            return Err(PipelineError::Config(
                "storage_retry.max_attempts must be at least 1".into(),
            ));
        }
        if self.process_timeout.is_zero() || self.storage_timeout.is_zero() {
            return Err(PipelineError::Config("call timeouts must be non-zero".into()));
        }
        Ok(())
    }
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            worker_count: 8,
            queue_capacity: 1000,
            drain_timeout: Duration::from_secs(30),
            process_timeout: Duration::from_millis(1000),
            storage_timeout: Duration::from_millis(5000),
            storage_retry: RetryPolicy::default(),
        }
    }
}

impl FromEnv for PipelineConfig {
    /// Reads from environment variables, falling back to [`Default`]:
    /// - PIPELINE_WORKERS (8)
    /// - PIPELINE_QUEUE_CAPACITY (1000)
    /// - PIPELINE_DRAIN_TIMEOUT_SECS (30)
    /// - PIPELINE_PROCESS_TIMEOUT_MS (1000)
    /// - PIPELINE_STORAGE_TIMEOUT_MS (5000)
    /// - PIPELINE_STORAGE_MAX_ATTEMPTS (3)
    /// - PIPELINE_RETRY_BACKOFF_MS (50)
    fn from_env() -> Result<Self, ConfigError> {
        let defaults = Self::default();

        let storage_retry = RetryPolicy::default()
            .with_max_attempts(env_parse(
                "PIPELINE_STORAGE_MAX_ATTEMPTS",
                defaults.storage_retry.max_attempts,
            )?)
            .with_initial_backoff(Duration::from_millis(env_parse(
                "PIPELINE_RETRY_BACKOFF_MS",
                defaults.storage_retry.initial_backoff.as_millis() as u64,
            )?));

        let config = Self {
            worker_count: env_parse("PIPELINE_WORKERS", defaults.worker_count)?,
            queue_capacity: env_parse("PIPELINE_QUEUE_CAPACITY", defaults.queue_capacity)?,
            drain_timeout: Duration::from_secs(env_parse(
                "PIPELINE_DRAIN_TIMEOUT_SECS",
                defaults.drain_timeout.as_secs(),
            )?),
            process_timeout: Duration::from_millis(env_parse(
                "PIPELINE_PROCESS_TIMEOUT_MS",
                defaults.process_timeout.as_millis() as u64,
            )?),
            storage_timeout: Duration::from_millis(env_parse(
                "PIPELINE_STORAGE_TIMEOUT_MS",
                defaults.storage_timeout.as_millis() as u64,
            )?),
            storage_retry,
        };

        config.validate().map_err(|e| ConfigError::InvalidValue {
            key: "PIPELINE_*".to_string(),
            details: e.to_string(),
        })?;
        Ok(config)
    }
}
