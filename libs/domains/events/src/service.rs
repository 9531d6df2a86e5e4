//! Ingestion service layer

use crate::error::{EventError, Result};
use crate::models::{AcceptedResponse, BatchResponse, HealthResponse};
use core_config::AppInfo;
use event_pipeline::{
    Event, EventStore, JobOutcome, MetricsSnapshot, Pipeline, PipelineState, StorageError,
    render_metrics, validate,
};
use std::sync::Arc;
use tracing::{debug, instrument};

/// Front door to the pipeline used by the HTTP handlers
#[derive(Clone)]
pub struct IngestService {
    pipeline: Arc<Pipeline>,
    store: Arc<dyn EventStore>,
    app: AppInfo,
}

impl IngestService {
    pub fn new(pipeline: Arc<Pipeline>, store: Arc<dyn EventStore>, app: AppInfo) -> Self {
        Self {
            pipeline,
            store,
            app,
        }
    }

    pub fn pipeline(&self) -> &Arc<Pipeline> {
        &self.pipeline
    }

    /// Validate and queue a single event.
    ///
    /// Invalid events are answered here and never reach the queue, so they
    /// do not show up in the failure counters.
    #[instrument(skip(self, event), fields(event_type = %event.event_type))]
    pub fn submit(&self, event: Event) -> Result<AcceptedResponse> {
        validate(&event)?;
        let submission = self.pipeline.submit(event)?;
        debug!(event_id = %submission.id, "Event queued");
        Ok(AcceptedResponse::new(submission.id))
    }

    /// Validate, queue and wait for the stored or failed outcome
    #[instrument(skip(self, event), fields(event_type = %event.event_type))]
    pub async fn submit_and_wait(&self, event: Event) -> Result<JobOutcome> {
        validate(&event)?;
        let handle = self.pipeline.submit_tracked(event)?;
        match handle.outcome().await {
            JobOutcome::Failed {
                id,
                reason,
                message,
            } => Err(EventError::Failed {
                id,
                reason,
                message,
            }),
            stored => Ok(stored),
        }
    }

    /// Queue every event of a batch; items are validated by the workers
    #[instrument(skip(self, events), fields(count = events.len()))]
    pub fn submit_batch(&self, events: Vec<Event>) -> BatchResponse {
        let receipt = self.pipeline.submit_batch(events);
        debug!(
            accepted = receipt.accepted(),
            rejected = receipt.rejected(),
            "Batch queued"
        );
        receipt.into()
    }

    pub fn metrics(&self) -> MetricsSnapshot {
        self.pipeline.snapshot()
    }

    /// Prometheus text exposition of the pipeline metrics
    pub fn prometheus(&self) -> Result<String> {
        render_metrics().ok_or(EventError::MetricsUnavailable)
    }

    pub fn health(&self) -> HealthResponse {
        let state = self.pipeline.state();
        HealthResponse {
            status: HealthResponse::status_for(state).to_string(),
            name: self.app.name.to_string(),
            version: self.app.version.to_string(),
            pipeline: state,
            workers: self.pipeline.config().worker_count,
            queue_depth: self.pipeline.metrics().queue_depth(),
        }
    }

    pub fn state(&self) -> PipelineState {
        self.pipeline.state()
    }

    /// Ask the storage backend whether it can take writes
    pub async fn storage_ready(&self) -> std::result::Result<bool, StorageError> {
        self.store.health_check().await
    }

    pub fn storage_name(&self) -> &'static str {
        self.store.name()
    }
}
