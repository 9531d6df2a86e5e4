//! The dispatcher: owns the queue, the worker pool and the lifecycle.
//!
//! Submission never waits for a worker. It reserves a queue slot, counts the
//! event as received, then enqueues it. A full queue is reported to the caller
//! straight away.
//!
//! Shutdown runs in two phases: the queue is closed and workers drain it for up
//! to the drain timeout, then the cancel signal aborts whatever is left. Jobs
//! abandoned that way are recorded as failed with reason `shutdown`.

use crate::config::PipelineConfig;
use crate::error::{FailureReason, PipelineError, SubmitError};
use crate::event::Event;
use crate::job::{Job, JobHandle, JobOutcome};
use crate::metrics::{MetricsAggregator, MetricsSnapshot};
use crate::processor::EventProcessor;
use crate::storage::EventStore;
use crate::worker::{SharedQueue, StateCell, Worker, WorkerSettings, WorkerState};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::{Arc, PoisonError, RwLock};
use std::time::{Duration, Instant};
use tokio::sync::mpsc::error::TrySendError;
use tokio::sync::{Mutex, mpsc, oneshot, watch};
use tokio::task::JoinSet;
use tracing::{error, info, instrument, warn};
use utoipa::ToSchema;

/// Pipeline lifecycle
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum PipelineState {
    Running,
    Draining,
    Stopped,
}

impl PipelineState {
    fn from_u8(raw: u8) -> Self {
        match raw {
            0 => PipelineState::Running,
            1 => PipelineState::Draining,
            _ => PipelineState::Stopped,
        }
    }

    fn as_u8(self) -> u8 {
        match self {
            PipelineState::Running => 0,
            PipelineState::Draining => 1,
            PipelineState::Stopped => 2,
        }
    }
}

/// Receipt for an accepted event
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Submission {
    pub id: String,
}

/// Per-item result of a batch submission
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct BatchItem {
    /// Position in the submitted batch
    pub index: usize,
    pub id: String,
    pub accepted: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Result of a batch submission, in input order
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct BatchReceipt {
    pub items: Vec<BatchItem>,
}

impl BatchReceipt {
    pub fn accepted(&self) -> usize {
        self.items.iter().filter(|item| item.accepted).count()
    }

    pub fn rejected(&self) -> usize {
        self.items.len() - self.accepted()
    }
}

/// Summary of a completed shutdown
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct ShutdownReport {
    /// Whether every job finished without being abandoned
    pub drained: bool,
    /// Jobs recorded as failed with reason `shutdown`
    pub abandoned: u64,
    pub elapsed_ms: u64,
    pub metrics: MetricsSnapshot,
}

/// Bounded worker pool fed by a bounded FIFO queue
pub struct Pipeline {
    config: PipelineConfig,
    sender: RwLock<Option<mpsc::Sender<Job>>>,
    queue: SharedQueue,
    workers: Mutex<JoinSet<()>>,
    worker_states: Vec<Arc<StateCell>>,
    metrics: Arc<MetricsAggregator>,
    cancel: watch::Sender<bool>,
    state: AtomicU8,
    report: Mutex<Option<ShutdownReport>>,
}

impl Pipeline {
    /// Spawn `worker_count` workers on the current Tokio runtime.
    ///
    /// `metrics` is shared with readers such as HTTP handlers; the pipeline
    /// records its pool size into it.
    pub fn start(
        config: PipelineConfig,
        processor: Arc<dyn EventProcessor>,
        store: Arc<dyn EventStore>,
        metrics: Arc<MetricsAggregator>,
    ) -> Result<Self, PipelineError> {
        config.validate()?;
        let runtime = tokio::runtime::Handle::try_current().map_err(|_| PipelineError::NoRuntime)?;

        let (sender, receiver) = mpsc::channel(config.queue_capacity);
        let queue: SharedQueue = Arc::new(Mutex::new(receiver));
        metrics.configure(config.worker_count, config.queue_capacity);
        let (cancel, cancel_rx) = watch::channel(false);
        let settings = WorkerSettings {
            process_timeout: config.process_timeout,
            storage_timeout: config.storage_timeout,
            storage_retry: config.storage_retry.clone(),
        };

        let mut workers = JoinSet::new();
        let mut worker_states = Vec::with_capacity(config.worker_count);
        for id in 0..config.worker_count {
            let state = Arc::new(StateCell::default());
            let worker = Worker::new(
                id,
                queue.clone(),
                processor.clone(),
                store.clone(),
                metrics.clone(),
                settings.clone(),
                state.clone(),
                cancel_rx.clone(),
            );
            workers.spawn_on(worker.run(), &runtime);
            worker_states.push(state);
        }

        info!(
            workers = config.worker_count,
            queue_capacity = config.queue_capacity,
            processor = processor.name(),
            store = store.name(),
            "Pipeline started"
        );

        Ok(Self {
            config,
            sender: RwLock::new(Some(sender)),
            queue,
            workers: Mutex::new(workers),
            worker_states,
            metrics,
            cancel,
            state: AtomicU8::new(PipelineState::Running.as_u8()),
            report: Mutex::new(None),
        })
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    pub fn state(&self) -> PipelineState {
        PipelineState::from_u8(self.state.load(Ordering::Acquire))
    }

    fn set_state(&self, state: PipelineState) {
        self.state.store(state.as_u8(), Ordering::Release);
    }

    pub fn metrics(&self) -> &Arc<MetricsAggregator> {
        &self.metrics
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        self.metrics.snapshot()
    }

    pub fn worker_states(&self) -> Vec<WorkerState> {
        self.worker_states.iter().map(|state| state.get()).collect()
    }

    /// Queue an event without waiting for its outcome.
    pub fn submit(&self, event: Event) -> Result<Submission, SubmitError> {
        self.enqueue(event, None).map(|id| Submission { id })
    }

    /// Queue an event and get a handle that resolves to its outcome.
    pub fn submit_tracked(&self, event: Event) -> Result<JobHandle, SubmitError> {
        let (tx, rx) = oneshot::channel();
        let id = self.enqueue(event, Some(tx))?;
        Ok(JobHandle::new(id, rx))
    }

    /// Queue each event independently; rejections do not stop the batch.
    pub fn submit_batch(&self, events: Vec<Event>) -> BatchReceipt {
        let now = Utc::now();
        let items = events
            .into_iter()
            .enumerate()
            .map(|(index, mut event)| {
                let id = event.stamp(now).to_string();
                match self.enqueue(event, None) {
                    Ok(_) => BatchItem {
                        index,
                        id,
                        accepted: true,
                        error: None,
                    },
                    Err(e) => BatchItem {
                        index,
                        id,
                        accepted: false,
                        error: Some(e.to_string()),
                    },
                }
            })
            .collect();
        BatchReceipt { items }
    }

    fn enqueue(
        &self,
        mut event: Event,
        completion: Option<oneshot::Sender<JobOutcome>>,
    ) -> Result<String, SubmitError> {
        let guard = self.sender.read().unwrap_or_else(PoisonError::into_inner);
        let Some(sender) = guard.as_ref() else {
            self.metrics.record_rejected(1);
            return Err(SubmitError::ShuttingDown);
        };

        let permit = match sender.try_reserve() {
            Ok(permit) => permit,
            Err(TrySendError::Full(())) => {
                self.metrics.record_rejected(1);
                return Err(SubmitError::Capacity {
                    capacity: self.config.queue_capacity,
                });
            }
            Err(TrySendError::Closed(())) => {
                self.metrics.record_rejected(1);
                return Err(SubmitError::ShuttingDown);
            }
        };

        let id = event.stamp(Utc::now()).to_string();
        self.metrics.record_received(1);
        self.metrics.queue_entered();
        permit.send(Job::new(event, completion));
        Ok(id)
    }

    /// Stop accepting events, drain for up to `drain_timeout`, then cancel.
    ///
    /// Calling it again returns the first report.
    #[instrument(skip(self))]
    pub async fn shutdown(&self, drain_timeout: Duration) -> ShutdownReport {
        let mut report = self.report.lock().await;
        if let Some(existing) = report.as_ref() {
            return existing.clone();
        }

        let started = Instant::now();
        let abandoned_before = self.metrics.failures(FailureReason::Shutdown);
        self.set_state(PipelineState::Draining);
        drop(
            self.sender
                .write()
                .unwrap_or_else(PoisonError::into_inner)
                .take(),
        );
        info!(
            queued = self.metrics.queue_depth(),
            in_flight = self.metrics.active_workers(),
            "Pipeline draining"
        );

        let mut workers = self.workers.lock().await;
        let finished_in_time = tokio::time::timeout(drain_timeout, join_all(&mut workers))
            .await
            .is_ok();

        if !finished_in_time {
            warn!("Drain timeout elapsed, cancelling remaining jobs");
            let _ = self.cancel.send(true);
            join_all(&mut workers).await;
        }
        // Workers that died early leave their jobs behind
        self.abandon_queued().await;

        self.set_state(PipelineState::Stopped);
        let abandoned = self.metrics.failures(FailureReason::Shutdown) - abandoned_before;
        let drained = abandoned == 0;
        let result = ShutdownReport {
            drained,
            abandoned,
            elapsed_ms: started.elapsed().as_millis() as u64,
            metrics: self.metrics.snapshot(),
        };
        info!(
            drained,
            abandoned,
            processed = result.metrics.events_processed,
            failed = result.metrics.events_failed,
            "Pipeline stopped"
        );

        *report = Some(result.clone());
        result
    }

    /// Fail every job still sitting in the queue after the workers are gone
    async fn abandon_queued(&self) {
        let mut queue = self.queue.lock().await;
        queue.close();
        while let Ok(job) = queue.try_recv() {
            self.metrics.queue_left();
            self.metrics.record_failed(1, FailureReason::Shutdown);
            let id = job.id().to_string();
            let (_, completion) = job.into_parts();
            completion.complete(JobOutcome::failed(
                id,
                FailureReason::Shutdown,
                "pipeline stopped before the job started",
            ));
        }
    }
}

async fn join_all(workers: &mut JoinSet<()>) {
    while let Some(result) = workers.join_next().await {
        if let Err(e) = result {
            error!(error = %e, "Worker task ended abnormally");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::processor::DefaultProcessor;
    use crate::storage::InMemoryEventStore;

    fn start(workers: usize, capacity: usize) -> (Pipeline, InMemoryEventStore) {
        let store = InMemoryEventStore::new();
        let pipeline = Pipeline::start(
            PipelineConfig::new(workers, capacity),
            Arc::new(DefaultProcessor::new()),
            Arc::new(store.clone()),
            Arc::new(MetricsAggregator::new()),
        )
        .unwrap();
        (pipeline, store)
    }

    #[tokio::test]
    async fn test_start_rejects_zero_workers() {
        let result = Pipeline::start(
            PipelineConfig::new(0, 10),
            Arc::new(DefaultProcessor::new()),
            Arc::new(InMemoryEventStore::new()),
            Arc::new(MetricsAggregator::new()),
        );
        assert!(matches!(result, Err(PipelineError::Config(_))));
    }

    #[test]
    fn test_start_outside_runtime() {
        let result = Pipeline::start(
            PipelineConfig::new(1, 1),
            Arc::new(DefaultProcessor::new()),
            Arc::new(InMemoryEventStore::new()),
            Arc::new(MetricsAggregator::new()),
        );
        assert!(matches!(result, Err(PipelineError::NoRuntime)));
    }

    #[tokio::test]
    async fn test_submit_assigns_id() {
        let (pipeline, _store) = start(2, 10);

        let submission = pipeline.submit(Event::new("user_action", "web")).unwrap();

        assert!(uuid::Uuid::parse_str(&submission.id).is_ok());
        assert_eq!(pipeline.snapshot().events_received, 1);
    }

    #[tokio::test]
    async fn test_tracked_submission_reports_outcome() {
        let (pipeline, store) = start(2, 10);

        let handle = pipeline
            .submit_tracked(Event::new("user_action", "web").with_data("purchase", 99.99))
            .unwrap();
        let id = handle.id().to_string();
        let outcome = handle.outcome().await;

        assert!(outcome.is_stored());
        assert_eq!(store.get(&id).unwrap().data.action, "purchase");
    }

    #[tokio::test]
    async fn test_batch_keeps_input_order() {
        let (pipeline, _store) = start(1, 10);

        let receipt = pipeline.submit_batch(vec![
            Event::new("user_action", "web").with_id("first"),
            Event::new("", "web").with_id("second"),
        ]);

        assert_eq!(receipt.accepted(), 2);
        assert_eq!(receipt.items[0].id, "first");
        assert_eq!(receipt.items[1].index, 1);
    }

    #[tokio::test]
    async fn test_shutdown_is_idempotent() {
        let (pipeline, _store) = start(2, 10);
        pipeline.submit(Event::new("user_action", "web")).unwrap();

        let first = pipeline.shutdown(Duration::from_secs(5)).await;
        let second = pipeline.shutdown(Duration::from_secs(5)).await;

        assert!(first.drained);
        assert_eq!(first, second);
        assert_eq!(pipeline.state(), PipelineState::Stopped);
        assert!(
            pipeline
                .worker_states()
                .iter()
                .all(|state| *state == WorkerState::Terminated)
        );
    }

    #[tokio::test]
    async fn test_submit_after_shutdown_is_rejected() {
        let (pipeline, _store) = start(1, 10);
        pipeline.shutdown(Duration::from_secs(1)).await;

        let err = pipeline.submit(Event::new("user_action", "web")).unwrap_err();

        assert_eq!(err, SubmitError::ShuttingDown);
        let snapshot = pipeline.snapshot();
        assert_eq!(snapshot.events_received, 0);
        assert_eq!(snapshot.events_rejected, 1);
    }
}
