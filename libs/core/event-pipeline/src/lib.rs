//! Event Pipeline
//!
//! A bounded, concurrent ingestion pipeline: events are submitted into a
//! bounded FIFO queue and a fixed pool of workers runs
//! validate → process → store on each one.
//!
//! ## Features
//!
//! - **Backpressure**: a full queue rejects submissions immediately
//! - **Exact accounting**: every accepted event ends as processed or failed, once
//! - **Retry**: transient storage errors are retried with exponential backoff
//! - **Graceful drain**: shutdown finishes queued work within a deadline, then cancels
//! - **Prometheus metrics**: aggregator updates are mirrored to the `metrics` facade
//!
//! ## Example
//!
//! ```ignore
//! use event_pipeline::{DefaultProcessor, Event, InMemoryEventStore, MetricsAggregator, Pipeline, PipelineConfig};
//!
//! let metrics = Arc::new(MetricsAggregator::new());
//! let pipeline = Pipeline::start(
//!     PipelineConfig::new(8, 1000),
//!     Arc::new(DefaultProcessor::new()),
//!     Arc::new(InMemoryEventStore::new()),
//!     metrics.clone(),
//! )?;
//!
//! pipeline.submit(Event::new("user_action", "web").with_data("purchase", 99.99))?;
//!
//! let report = pipeline.shutdown(Duration::from_secs(30)).await;
//! ```

mod config;
mod error;
mod event;
mod job;
pub mod metrics;
mod pipeline;
mod processor;
mod retry;
mod storage;
mod validator;
mod worker;

pub use config::PipelineConfig;
pub use error::{
    ErrorCategory, FailureReason, PipelineError, ProcessingError, StorageError, SubmitError,
    ValidationError,
};
pub use event::{Event, EventData, EventType, ProcessedEvent, is_valid_timestamp};
pub use job::{JobHandle, JobOutcome};
pub use metrics::{MetricsAggregator, MetricsSnapshot, init_metrics, render_metrics};
pub use pipeline::{BatchItem, BatchReceipt, Pipeline, PipelineState, ShutdownReport, Submission};
pub use processor::{DefaultProcessor, EventProcessor, normalize};
pub use retry::{RetryPolicy, retry_with_backoff};
pub use storage::{EventStore, InMemoryEventStore};
pub use validator::validate;
pub use worker::WorkerState;
