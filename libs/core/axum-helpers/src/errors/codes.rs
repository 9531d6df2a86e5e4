//! Type-safe error codes for API responses.
//!
//! This module provides a single source of truth for error codes used across
//! the ingestion API. Each error code includes:
//! - String representation for client consumption (e.g., "QUEUE_FULL")
//! - Integer code for logging and monitoring (e.g., 1012)
//! - Default human-readable message
//!
//! # Example
//!
//! ```rust
//! use axum_helpers::errors::ErrorCode;
//!
//! let code = ErrorCode::QueueFull;
//! assert_eq!(code.as_str(), "QUEUE_FULL");
//! assert_eq!(code.code(), 1012);
//! assert_eq!(code.default_message(), "Ingestion queue is full");
//! ```

use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

/// Standardized error codes for API responses.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorCode {
    // Client errors (1000-1999)
    /// Request validation failed
    ValidationError,

    /// JSON extraction from request body failed
    JsonExtraction,

    /// Requested resource was not found
    NotFound,

    /// Request payload is semantically incorrect
    UnprocessableEntity,

    // Server errors (1000s)
    /// Service is temporarily unavailable
    ServiceUnavailable,

    /// The ingestion queue has no free slot
    QueueFull,

    /// The service has started shutting down and accepts no new work
    ShuttingDown,

    // I/O errors (4000s)
    /// File system or socket I/O error
    IoError,

    // JSON parsing errors (5000s)
    /// JSON serialization/deserialization error
    SerdeJsonError,
}

impl ErrorCode {
    /// Get the string representation for client consumption.
    ///
    /// ```rust
    /// use axum_helpers::errors::ErrorCode;
    ///
    /// assert_eq!(ErrorCode::ValidationError.as_str(), "VALIDATION_ERROR");
    /// assert_eq!(ErrorCode::ShuttingDown.as_str(), "SHUTTING_DOWN");
    /// ```
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::ValidationError => "VALIDATION_ERROR",
            Self::JsonExtraction => "JSON_EXTRACTION",
            Self::NotFound => "NOT_FOUND",
            Self::UnprocessableEntity => "UNPROCESSABLE_ENTITY",
            Self::ServiceUnavailable => "SERVICE_UNAVAILABLE",
            Self::QueueFull => "QUEUE_FULL",
            Self::ShuttingDown => "SHUTTING_DOWN",
            Self::IoError => "IO_ERROR",
            Self::SerdeJsonError => "SERDE_JSON_ERROR",
        }
    }

    /// Get the integer code for logging and monitoring.
    ///
    /// Ranges:
    /// - 1000-1999: Client and service errors
    /// - 4000-4999: I/O errors
    /// - 5000-5999: Serialization errors
    pub fn code(&self) -> i32 {
        match self {
            Self::ValidationError => 1001,
            Self::JsonExtraction => 1003,
            Self::NotFound => 1004,
            Self::UnprocessableEntity => 1009,
            Self::ServiceUnavailable => 1011,
            Self::QueueFull => 1012,
            Self::ShuttingDown => 1013,

            Self::IoError => 4001,

            Self::SerdeJsonError => 5001,
        }
    }

    /// Get the default user-facing error message.
    pub fn default_message(&self) -> &'static str {
        match self {
            Self::ValidationError => "Request validation failed",
            Self::JsonExtraction => "Failed to parse request body",
            Self::NotFound => "Resource not found",
            Self::UnprocessableEntity => "Request cannot be processed",
            Self::ServiceUnavailable => "Service is temporarily unavailable",
            Self::QueueFull => "Ingestion queue is full",
            Self::ShuttingDown => "Service is shutting down",
            Self::IoError => "I/O error occurred",
            Self::SerdeJsonError => "JSON serialization error",
        }
    }
}

impl std::fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}
