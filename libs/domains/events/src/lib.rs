//! Events Domain
//!
//! HTTP front door of the ingestion pipeline plus its PostgreSQL storage
//! adapter.
//!
//! # Architecture
//!
//! ```text
//! POST /events ──────┐
//!                    ├─► IngestService ─► Pipeline queue ─► workers ─► EventStore
//! POST /events/batch ┘                                                 ├─ PgEventStore
//!                                                                      └─ InMemoryEventStore
//! GET /metrics, /metrics/prometheus, /health, /ready
//! ```

use utoipa::OpenApi;

mod error;
mod handlers;
mod models;
mod postgres;
mod service;

pub use error::{EventError, Result};
pub use handlers::{IngestState, events_router};
pub use models::{
    AcceptedResponse, BatchRequest, BatchResponse, HealthResponse, MAX_BATCH_SIZE, SubmitQuery,
};
pub use postgres::PgEventStore;
pub use service::IngestService;

/// OpenAPI documentation for the ingestion API
#[derive(OpenApi)]
#[openapi(
    paths(
        handlers::submit_event,
        handlers::submit_batch,
        handlers::get_metrics,
        handlers::get_prometheus_metrics,
        handlers::health_check,
        handlers::readiness_check,
    ),
    components(schemas(
        event_pipeline::Event,
        event_pipeline::EventData,
        event_pipeline::EventType,
        event_pipeline::JobOutcome,
        event_pipeline::FailureReason,
        event_pipeline::BatchItem,
        event_pipeline::MetricsSnapshot,
        event_pipeline::PipelineState,
        AcceptedResponse,
        BatchRequest,
        BatchResponse,
        HealthResponse,
        axum_helpers::ErrorResponse,
    )),
    tags(
        (name = "events", description = "Event submission"),
        (name = "metrics", description = "Pipeline metrics"),
        (name = "health", description = "Liveness and readiness")
    )
)]
pub struct ApiDoc;
