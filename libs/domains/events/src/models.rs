//! Request and response bodies for the ingestion API

use event_pipeline::{BatchItem, BatchReceipt, Event, PipelineState};
use serde::{Deserialize, Serialize};
use utoipa::{IntoParams, ToSchema};
use validator::Validate;

/// Largest batch accepted by `POST /events/batch`
pub const MAX_BATCH_SIZE: usize = 100;

/// Body of `POST /events/batch`
#[derive(Debug, Clone, Deserialize, Serialize, Validate, ToSchema)]
pub struct BatchRequest {
    /// Between 1 and 100 events
    #[validate(length(min = 1, max = 100, message = "batch must contain 1 to 100 events"))]
    pub events: Vec<Event>,
}

/// Query string of `POST /events`
#[derive(Debug, Clone, Copy, Default, Deserialize, IntoParams)]
#[into_params(parameter_in = Query)]
pub struct SubmitQuery {
    /// Wait for the event to be stored before answering
    #[serde(default)]
    pub wait: bool,
}

/// Answer to an accepted single event
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct AcceptedResponse {
    pub id: String,
    #[schema(example = "accepted")]
    pub status: String,
}

impl AcceptedResponse {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            status: "accepted".to_string(),
        }
    }
}

/// Answer to a batch submission; items keep the request order
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct BatchResponse {
    pub accepted: usize,
    pub rejected: usize,
    pub items: Vec<BatchItem>,
}

impl From<BatchReceipt> for BatchResponse {
    fn from(receipt: BatchReceipt) -> Self {
        Self {
            accepted: receipt.accepted(),
            rejected: receipt.rejected(),
            items: receipt.items,
        }
    }
}

/// Liveness report
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct HealthResponse {
    /// `ok`, `shutting_down` or `stopped`
    pub status: String,
    pub name: String,
    pub version: String,
    pub pipeline: PipelineState,
    pub workers: usize,
    pub queue_depth: i64,
}

impl HealthResponse {
    pub fn status_for(state: PipelineState) -> &'static str {
        match state {
            PipelineState::Running => "ok",
            PipelineState::Draining => "shutting_down",
            PipelineState::Stopped => "stopped",
        }
    }
}
