//! Pipeline workers
//!
//! Each worker pulls jobs from the shared queue and runs
//! validate → process → store, recording exactly one outcome per job.
//! Workers exit when the queue is closed and empty, or when the cancel signal
//! is raised.

use crate::error::{FailureReason, ProcessingError, StorageError};
use crate::event::{Event, ProcessedEvent, duration_ms};
use crate::job::{Job, JobOutcome};
use crate::metrics::MetricsAggregator;
use crate::processor::EventProcessor;
use crate::retry::RetryPolicy;
use crate::storage::EventStore;
use crate::validator::validate;
use futures::FutureExt;
use serde::Serialize;
use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::sync::atomic::{AtomicU8, Ordering};
use std::time::{Duration, Instant};
use tokio::sync::{Mutex, mpsc, watch};
use tokio::time::{sleep, timeout};
use tracing::{debug, info, warn};

/// Receiver shared by every worker; whoever holds the lock takes the next job
pub(crate) type SharedQueue = Arc<Mutex<mpsc::Receiver<Job>>>;

/// Worker lifecycle
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkerState {
    Idle,
    Processing,
    Terminated,
}

#[derive(Debug, Default)]
pub(crate) struct StateCell(AtomicU8);

impl StateCell {
    pub(crate) fn get(&self) -> WorkerState {
        match self.0.load(Ordering::Acquire) {
            0 => WorkerState::Idle,
            1 => WorkerState::Processing,
            _ => WorkerState::Terminated,
        }
    }

    fn set(&self, state: WorkerState) {
        let raw = match state {
            WorkerState::Idle => 0,
            WorkerState::Processing => 1,
            WorkerState::Terminated => 2,
        };
        self.0.store(raw, Ordering::Release);
    }
}

/// Marks a worker as processing for as long as it is held
struct ActiveGuard {
    state: Arc<StateCell>,
    metrics: Arc<MetricsAggregator>,
}

impl ActiveGuard {
    fn enter(state: &Arc<StateCell>, metrics: &Arc<MetricsAggregator>) -> Self {
        state.set(WorkerState::Processing);
        metrics.worker_busy();
        Self {
            state: state.clone(),
            metrics: metrics.clone(),
        }
    }
}

impl Drop for ActiveGuard {
    fn drop(&mut self) {
        self.metrics.worker_idle();
        self.state.set(WorkerState::Idle);
    }
}

#[derive(Debug, Clone)]
pub(crate) struct WorkerSettings {
    pub(crate) process_timeout: Duration,
    pub(crate) storage_timeout: Duration,
    pub(crate) storage_retry: RetryPolicy,
}

/// Why a job did not make it to storage
struct Failure {
    reason: FailureReason,
    message: String,
}

impl Failure {
    fn new(reason: FailureReason, message: impl ToString) -> Self {
        Self {
            reason,
            message: message.to_string(),
        }
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> &str {
    panic
        .downcast_ref::<&str>()
        .copied()
        .or_else(|| panic.downcast_ref::<String>().map(String::as_str))
        .unwrap_or("unknown panic")
}

/// Resolves once the cancel signal is raised or its sender is gone
pub(crate) async fn cancelled(cancel: &mut watch::Receiver<bool>) {
    let _ = cancel.wait_for(|raised| *raised).await;
}

pub(crate) struct Worker {
    id: usize,
    queue: SharedQueue,
    processor: Arc<dyn EventProcessor>,
    store: Arc<dyn EventStore>,
    metrics: Arc<MetricsAggregator>,
    settings: WorkerSettings,
    state: Arc<StateCell>,
    cancel: watch::Receiver<bool>,
}

impl Worker {
    #[allow(clippy::too_many_arguments)]
    pub(crate) fn new(
        id: usize,
        queue: SharedQueue,
        processor: Arc<dyn EventProcessor>,
        store: Arc<dyn EventStore>,
        metrics: Arc<MetricsAggregator>,
        settings: WorkerSettings,
        state: Arc<StateCell>,
        cancel: watch::Receiver<bool>,
    ) -> Self {
        Self {
            id,
            queue,
            processor,
            store,
            metrics,
            settings,
            state,
            cancel,
        }
    }

    pub(crate) async fn run(mut self) {
        info!(
            worker_id = self.id,
            processor = self.processor.name(),
            store = self.store.name(),
            "Worker started"
        );

        while let Some(job) = self.next_job().await {
            self.handle(job).await;
        }

        self.state.set(WorkerState::Terminated);
        info!(worker_id = self.id, "Worker stopped");
    }

    /// Wait for the next job; `None` once the queue is drained or cancelled
    async fn next_job(&mut self) -> Option<Job> {
        if *self.cancel.borrow() {
            return None;
        }

        let queue = self.queue.clone();
        let next = tokio::select! {
            biased;
            _ = cancelled(&mut self.cancel) => None,
            job = async move { queue.lock().await.recv().await } => job,
        };

        let job = next?;
        self.metrics.queue_left();
        Some(job)
    }

    async fn handle(&mut self, job: Job) {
        let dequeued_at = Instant::now();
        let queued_for = dequeued_at.duration_since(job.enqueued_at);
        let id = job.id().to_string();
        let (event, completion) = job.into_parts();

        if *self.cancel.borrow() {
            self.metrics.record_failed(1, FailureReason::Shutdown);
            completion.complete(JobOutcome::failed(
                id,
                FailureReason::Shutdown,
                "pipeline cancelled before the job started",
            ));
            return;
        }

        let active = ActiveGuard::enter(&self.state, &self.metrics);
        // A panicking processor or store fails the job, not the worker
        let result = AssertUnwindSafe(self.run_stages(event, dequeued_at))
            .catch_unwind()
            .await
            .unwrap_or_else(|panic| {
                Err(Failure::new(
                    FailureReason::Processing,
                    format!("job panicked: {}", panic_message(panic.as_ref())),
                ))
            });
        drop(active);

        let outcome = match result {
            Ok(()) => {
                let latency = dequeued_at.elapsed();
                self.metrics.record_processed(1, latency);
                debug!(
                    worker_id = self.id,
                    event_id = %id,
                    queued_ms = queued_for.as_millis() as u64,
                    latency_ms = latency.as_millis() as u64,
                    "Event stored"
                );
                JobOutcome::Stored {
                    id,
                    latency_ms: duration_ms(latency),
                }
            }
            Err(failure) => {
                self.metrics.record_failed(1, failure.reason);
                match failure.reason {
                    FailureReason::Validation => debug!(
                        worker_id = self.id,
                        event_id = %id,
                        error = %failure.message,
                        "Event failed validation"
                    ),
                    reason => warn!(
                        worker_id = self.id,
                        event_id = %id,
                        reason = %reason,
                        error = %failure.message,
                        "Event failed"
                    ),
                }
                JobOutcome::failed(id, failure.reason, failure.message)
            }
        };

        completion.complete(outcome);
    }

    async fn run_stages(&mut self, event: Event, dequeued_at: Instant) -> Result<(), Failure> {
        validate(&event).map_err(|e| Failure::new(FailureReason::Validation, e))?;
        let processed = self
            .process(event, dequeued_at)
            .await
            .map_err(|e| Failure::new(FailureReason::Processing, e))?;
        self.store_with_retry(&processed)
            .await
            .map_err(|e| Failure::new(e.failure_reason(), e))
    }

    async fn process(
        &self,
        event: Event,
        dequeued_at: Instant,
    ) -> Result<ProcessedEvent, ProcessingError> {
        let limit = self.settings.process_timeout;
        match timeout(limit, self.processor.process(event, dequeued_at)).await {
            Ok(result) => result,
            Err(_) => Err(ProcessingError::Timeout(limit)),
        }
    }

    /// Store one event, retrying transient failures with backoff.
    ///
    /// Every attempt and every backoff sleep is bounded by the cancel signal.
    async fn store_with_retry(&mut self, event: &ProcessedEvent) -> Result<(), StorageError> {
        let batch = std::slice::from_ref(event);
        let limit = self.settings.storage_timeout;
        let mut attempt = 1;

        loop {
            let result = tokio::select! {
                biased;
                _ = cancelled(&mut self.cancel) => Err(StorageError::Cancelled),
                res = timeout(limit, self.store.store(batch)) => {
                    res.unwrap_or(Err(StorageError::Timeout(limit)))
                }
            };

            let err = match result {
                Ok(()) => return Ok(()),
                Err(e) if e.is_retryable() && attempt < self.settings.storage_retry.max_attempts => e,
                Err(e) => return Err(e),
            };

            let delay = self.settings.storage_retry.backoff_for(attempt);
            self.metrics.record_storage_retry();
            warn!(
                worker_id = self.id,
                event_id = %event.id,
                attempt,
                delay_ms = delay.as_millis() as u64,
                error = %err,
                "Store failed, retrying"
            );

            tokio::select! {
                biased;
                _ = cancelled(&mut self.cancel) => return Err(StorageError::Cancelled),
                _ = sleep(delay) => {}
            }
            attempt += 1;
        }
    }
}
