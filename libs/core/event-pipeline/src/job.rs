//! Jobs and their terminal outcomes

use crate::error::FailureReason;
use crate::event::Event;
use serde::{Deserialize, Serialize};
use std::time::Instant;
use tokio::sync::oneshot;
use utoipa::ToSchema;

/// Terminal outcome of one accepted event
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum JobOutcome {
    Stored {
        id: String,
        latency_ms: f64,
    },
    Failed {
        id: String,
        reason: FailureReason,
        message: String,
    },
}

impl JobOutcome {
    pub fn failed(id: impl Into<String>, reason: FailureReason, message: impl Into<String>) -> Self {
        JobOutcome::Failed {
            id: id.into(),
            reason,
            message: message.into(),
        }
    }

    pub fn id(&self) -> &str {
        match self {
            JobOutcome::Stored { id, .. } | JobOutcome::Failed { id, .. } => id,
        }
    }

    pub fn is_stored(&self) -> bool {
        matches!(self, JobOutcome::Stored { .. })
    }
}

/// One event travelling through the queue
pub(crate) struct Job {
    pub(crate) event: Event,
    pub(crate) enqueued_at: Instant,
    completion: Option<oneshot::Sender<JobOutcome>>,
}

impl Job {
    pub(crate) fn new(event: Event, completion: Option<oneshot::Sender<JobOutcome>>) -> Self {
        Self {
            event,
            enqueued_at: Instant::now(),
            completion,
        }
    }

    pub(crate) fn id(&self) -> &str {
        self.event.id_or_placeholder()
    }

    /// Split into the event and a completion that reports the outcome
    pub(crate) fn into_parts(self) -> (Event, Completion) {
        (self.event, Completion(self.completion))
    }
}

/// Reports a job's outcome to a tracked submitter, if there is one
pub(crate) struct Completion(Option<oneshot::Sender<JobOutcome>>);

impl Completion {
    pub(crate) fn complete(self, outcome: JobOutcome) {
        if let Some(tx) = self.0 {
            // The submitter may have stopped waiting
            let _ = tx.send(outcome);
        }
    }
}

/// Resolves to the terminal outcome of a tracked submission
#[derive(Debug)]
pub struct JobHandle {
    id: String,
    rx: oneshot::Receiver<JobOutcome>,
}

impl JobHandle {
    pub(crate) fn new(id: String, rx: oneshot::Receiver<JobOutcome>) -> Self {
        Self { id, rx }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    /// Wait for the job to finish
    pub async fn outcome(self) -> JobOutcome {
        match self.rx.await {
            Ok(outcome) => outcome,
            Err(_) => JobOutcome::failed(
                self.id,
                FailureReason::Shutdown,
                "job was dropped before completing",
            ),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_handle_receives_outcome() {
        let (tx, rx) = oneshot::channel();
        let job = Job::new(Event::new("user_action", "web").with_id("e1"), Some(tx));
        let handle = JobHandle::new("e1".to_string(), rx);

        let (event, completion) = job.into_parts();
        completion.complete(JobOutcome::Stored {
            id: event.id.clone().unwrap(),
            latency_ms: 1.5,
        });

        let outcome = handle.outcome().await;
        assert!(outcome.is_stored());
        assert_eq!(outcome.id(), "e1");
    }

    #[tokio::test]
    async fn test_dropped_job_resolves_as_shutdown() {
        let (tx, rx) = oneshot::channel();
        let job = Job::new(Event::new("user_action", "web"), Some(tx));
        drop(job);

        let outcome = JobHandle::new("e2".to_string(), rx).outcome().await;
        assert!(matches!(
            outcome,
            JobOutcome::Failed { reason: FailureReason::Shutdown, .. }
        ));
    }

    #[test]
    fn test_outcome_serialization() {
        let json = serde_json::to_value(JobOutcome::failed(
            "e3",
            FailureReason::Storage,
            "backend down",
        ))
        .unwrap();
        assert_eq!(json["status"], "failed");
        assert_eq!(json["reason"], "storage");
    }
}
