//! Pipeline error types and failure classification
//!
//! Per-job errors are categorized to decide whether a worker retries:
//! - **Transient**: storage hiccups, retried with exponential backoff
//! - **Permanent**: bad input or unconvertible data, recorded once and dropped
//!
//! Every failed job is counted under exactly one [`FailureReason`].

use serde::{Deserialize, Serialize};
use std::time::Duration;
use strum::{Display, EnumIter, IntoStaticStr};
use thiserror::Error;
use utoipa::ToSchema;

/// Category of error for determining retry behavior
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCategory {
    /// Temporary failure - retry up to the configured bound
    Transient,
    /// Unrecoverable - record a failure immediately
    Permanent,
}

/// Why a job ended without being stored.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    PartialOrd,
    Ord,
    Serialize,
    Deserialize,
    ToSchema,
    Display,
    EnumIter,
    IntoStaticStr,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum FailureReason {
    Validation,
    Processing,
    Storage,
    Shutdown,
}

/// A structurally or semantically malformed event.
#[derive(Error, Debug, Clone, PartialEq, Eq, Serialize)]
#[error("invalid field '{field}': {reason}")]
pub struct ValidationError {
    pub field: &'static str,
    pub reason: String,
}

impl ValidationError {
    pub fn new(field: &'static str, reason: impl Into<String>) -> Self {
        Self {
            field,
            reason: reason.into(),
        }
    }
}

/// Errors raised while turning a raw event into a processed record
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ProcessingError {
    /// The raw `type` string does not name a known event type
    #[error("Unsupported event type '{0}'")]
    UnsupportedType(String),

    /// A field holds a value that cannot be represented downstream
    #[error("Field '{field}' cannot be converted: {reason}")]
    Unconvertible { field: &'static str, reason: String },

    /// The processor did not finish within the per-call bound
    #[error("Processing exceeded {0:?}")]
    Timeout(Duration),
}

/// Storage port errors
#[derive(Error, Debug, Clone, PartialEq)]
pub enum StorageError {
    /// Backend unavailable or returned an error
    #[error("Storage backend error: {0}")]
    Backend(String),

    /// The store call did not finish within the per-call bound
    #[error("Storage call exceeded {0:?}")]
    Timeout(Duration),

    /// The backend refused the records; retrying will not help
    #[error("Storage rejected the records: {0}")]
    Rejected(String),

    /// The call was abandoned because the pipeline was cancelled
    #[error("Storage call cancelled by shutdown")]
    Cancelled,
}

impl StorageError {
    pub fn backend(message: impl Into<String>) -> Self {
        StorageError::Backend(message.into())
    }

    pub fn rejected(message: impl Into<String>) -> Self {
        StorageError::Rejected(message.into())
    }

    /// Get the error category
    pub fn category(&self) -> ErrorCategory {
        match self {
            StorageError::Backend(_) | StorageError::Timeout(_) => ErrorCategory::Transient,
            StorageError::Rejected(_) | StorageError::Cancelled => ErrorCategory::Permanent,
        }
    }

    /// Check if this error should be retried
    pub fn is_retryable(&self) -> bool {
        self.category() == ErrorCategory::Transient
    }

    /// The reason recorded when this error ends a job
    pub fn failure_reason(&self) -> FailureReason {
        match self {
            StorageError::Cancelled => FailureReason::Shutdown,
            _ => FailureReason::Storage,
        }
    }
}

/// Returned by submission when an event is not accepted
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubmitError {
    /// The queue is full; the caller should back off
    #[error("Event queue is full (capacity {capacity})")]
    Capacity { capacity: usize },

    /// The pipeline no longer accepts events
    #[error("Pipeline is shutting down")]
    ShuttingDown,
}

/// Fatal errors raised while starting a pipeline
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum PipelineError {
    #[error("Invalid pipeline configuration: {0}")]
    Config(String),

    #[error("Pipeline must be started from within a Tokio runtime")]
    NoRuntime,
}
