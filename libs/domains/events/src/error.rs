//! Ingestion domain error types

use axum_helpers::AppError;
use event_pipeline::{FailureReason, SubmitError, ValidationError};
use thiserror::Error;

/// Result type for ingestion operations
pub type Result<T> = std::result::Result<T, EventError>;

/// Ingestion domain errors
#[derive(Debug, Error)]
pub enum EventError {
    /// The event was rejected before submission
    #[error(transparent)]
    Validation(#[from] ValidationError),

    /// No free queue slot
    #[error("Event queue is full (capacity {capacity})")]
    QueueFull { capacity: usize },

    /// The pipeline stopped accepting events
    #[error("Pipeline is shutting down")]
    ShuttingDown,

    /// A tracked event reached a failed outcome
    #[error("Event {id} failed during {reason}: {message}")]
    Failed {
        id: String,
        reason: FailureReason,
        message: String,
    },

    /// Prometheus exporter was not installed
    #[error("Metrics exporter is not initialised")]
    MetricsUnavailable,
}

impl From<SubmitError> for EventError {
    fn from(err: SubmitError) -> Self {
        match err {
            SubmitError::Capacity { capacity } => Self::QueueFull { capacity },
            SubmitError::ShuttingDown => Self::ShuttingDown,
        }
    }
}

// Convert to axum_helpers::AppError for HTTP responses
impl From<EventError> for AppError {
    fn from(err: EventError) -> Self {
        let message = err.to_string();
        match err {
            EventError::Validation(e) => AppError::invalid_field(e.field, e.reason, message),
            EventError::QueueFull { .. } => AppError::QueueFull(message),
            EventError::ShuttingDown => AppError::ShuttingDown(message),
            EventError::Failed { .. } => AppError::UnprocessableEntity(message),
            EventError::MetricsUnavailable => AppError::ServiceUnavailable(message),
        }
    }
}

impl axum::response::IntoResponse for EventError {
    fn into_response(self) -> axum::response::Response {
        let app_error: AppError = self.into();
        app_error.into_response()
    }
}
