//! HTTP handlers for the ingestion API

use crate::error::EventError;
use crate::models::{AcceptedResponse, BatchRequest, BatchResponse, HealthResponse, SubmitQuery};
use crate::service::IngestService;
use axum::extract::{Query, State};
use axum::http::{StatusCode, header};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use axum_helpers::{ErrorResponse, HealthCheckFuture, JsonBody, ValidatedJson, run_health_checks};
use event_pipeline::{Event, JobOutcome, MetricsSnapshot, PipelineState};
use tracing::instrument;

/// Ingestion router state
pub type IngestState = IngestService;

/// Create the ingestion router
pub fn events_router() -> Router<IngestState> {
    Router::new()
        .route("/events", post(submit_event))
        .route("/events/batch", post(submit_batch))
        .route("/metrics", get(get_metrics))
        .route("/metrics/prometheus", get(get_prometheus_metrics))
        .route("/health", get(health_check))
        .route("/ready", get(readiness_check))
}

/// Submit a single event
///
/// With `?wait=true` the request stays open until the event is stored or fails.
#[utoipa::path(
    post,
    path = "/events",
    params(SubmitQuery),
    request_body = Event,
    responses(
        (status = 202, description = "Event accepted", body = AcceptedResponse),
        (status = 201, description = "Event stored (wait=true)", body = JobOutcome),
        (status = 400, description = "Malformed or invalid event", body = ErrorResponse),
        (status = 422, description = "Event failed in the pipeline (wait=true)", body = ErrorResponse),
        (status = 503, description = "Queue full or shutting down", body = ErrorResponse)
    ),
    tag = "events"
)]
#[instrument(skip(state, event), fields(wait = query.wait))]
pub async fn submit_event(
    State(state): State<IngestState>,
    Query(query): Query<SubmitQuery>,
    JsonBody(event): JsonBody<Event>,
) -> Result<Response, EventError> {
    if query.wait {
        let outcome = state.submit_and_wait(event).await?;
        return Ok((StatusCode::CREATED, Json(outcome)).into_response());
    }

    let accepted = state.submit(event)?;
    Ok((StatusCode::ACCEPTED, Json(accepted)).into_response())
}

/// Submit up to 100 events at once
#[utoipa::path(
    post,
    path = "/events/batch",
    request_body = BatchRequest,
    responses(
        (status = 202, description = "Per-item acceptance", body = BatchResponse),
        (status = 400, description = "Empty, oversized or malformed batch", body = ErrorResponse)
    ),
    tag = "events"
)]
#[instrument(skip(state, batch), fields(count = batch.events.len()))]
pub async fn submit_batch(
    State(state): State<IngestState>,
    ValidatedJson(batch): ValidatedJson<BatchRequest>,
) -> (StatusCode, Json<BatchResponse>) {
    (StatusCode::ACCEPTED, Json(state.submit_batch(batch.events)))
}

/// Current pipeline counters and gauges
#[utoipa::path(
    get,
    path = "/metrics",
    responses(
        (status = 200, description = "Metrics snapshot", body = MetricsSnapshot)
    ),
    tag = "metrics"
)]
pub async fn get_metrics(State(state): State<IngestState>) -> Json<MetricsSnapshot> {
    Json(state.metrics())
}

/// Prometheus text exposition
#[utoipa::path(
    get,
    path = "/metrics/prometheus",
    responses(
        (status = 200, description = "Prometheus metrics", body = String, content_type = "text/plain"),
        (status = 503, description = "Exporter not initialised", body = ErrorResponse)
    ),
    tag = "metrics"
)]
pub async fn get_prometheus_metrics(
    State(state): State<IngestState>,
) -> Result<impl IntoResponse, EventError> {
    let body = state.prometheus()?;
    Ok((
        [(header::CONTENT_TYPE, "text/plain; version=0.0.4")],
        body,
    ))
}

/// Liveness: `ok` while the pipeline accepts events
#[utoipa::path(
    get,
    path = "/health",
    responses(
        (status = 200, description = "Pipeline running", body = HealthResponse),
        (status = 503, description = "Shutting down or stopped", body = HealthResponse)
    ),
    tag = "health"
)]
pub async fn health_check(State(state): State<IngestState>) -> (StatusCode, Json<HealthResponse>) {
    let health = state.health();
    let status = match health.pipeline {
        PipelineState::Running => StatusCode::OK,
        _ => StatusCode::SERVICE_UNAVAILABLE,
    };
    (status, Json(health))
}

/// Readiness: pipeline running and storage reachable
#[utoipa::path(
    get,
    path = "/ready",
    responses(
        (status = 200, description = "Ready to ingest"),
        (status = 503, description = "Not ready")
    ),
    tag = "health"
)]
pub async fn readiness_check(State(state): State<IngestState>) -> Response {
    let pipeline_state = state.state();
    let checks: Vec<(&str, HealthCheckFuture)> = vec![
        (
            "pipeline",
            Box::pin(async move {
                match pipeline_state {
                    PipelineState::Running => Ok(()),
                    other => Err(format!("pipeline is {:?}", other)),
                }
            }),
        ),
        (
            state.storage_name(),
            Box::pin(async {
                match state.storage_ready().await {
                    Ok(true) => Ok(()),
                    Ok(false) => Err("storage reported unhealthy".to_string()),
                    Err(e) => Err(e.to_string()),
                }
            }),
        ),
    ];

    match run_health_checks(checks).await {
        Ok(ok) => ok.into_response(),
        Err(not_ready) => not_ready.into_response(),
    }
}
