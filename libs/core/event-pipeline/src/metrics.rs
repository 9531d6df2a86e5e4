//! Pipeline metrics
//!
//! [`MetricsAggregator`] is the source of truth behind `GET /metrics`. Compound
//! counters live under a single mutex so a snapshot never observes a processed
//! count without its latency, and `processed + failed <= received` holds at
//! every read. Gauges are plain atomics.
//!
//! Every update is mirrored to the `metrics` facade so a Prometheus exporter
//! installed with [`init_metrics`] sees the same numbers.

use crate::error::FailureReason;
use crate::event::duration_ms;
use metrics::{counter, gauge, histogram};
use metrics_exporter_prometheus::{BuildError, PrometheusBuilder, PrometheusHandle};
use once_cell::sync::OnceCell;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicI64, AtomicUsize, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};
use strum::IntoEnumIterator;
use tracing::info;
use utoipa::ToSchema;

static PROMETHEUS_HANDLE: OnceCell<PrometheusHandle> = OnceCell::new();

/// Install the Prometheus recorder.
///
/// Call this once at startup. Subsequent calls are no-ops.
pub fn init_metrics() -> Result<(), BuildError> {
    PROMETHEUS_HANDLE.get_or_try_init(|| {
        let handle = PrometheusBuilder::new().install_recorder()?;
        info!("Prometheus metrics initialized");
        Ok::<_, BuildError>(handle)
    })?;
    Ok(())
}

/// Render metrics in Prometheus text format, or `None` before [`init_metrics`]
pub fn render_metrics() -> Option<String> {
    PROMETHEUS_HANDLE.get().map(PrometheusHandle::render)
}

#[derive(Debug, Default)]
struct Counters {
    received: u64,
    processed: u64,
    failed: u64,
    rejected: u64,
    storage_retries: u64,
    latency_sum_ms: f64,
    failures_by_reason: BTreeMap<FailureReason, u64>,
}

/// Point-in-time view of pipeline metrics
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct MetricsSnapshot {
    /// Events accepted into the queue
    pub events_received: u64,
    /// Events stored successfully
    pub events_processed: u64,
    /// Accepted events that ended in a failure
    pub events_failed: u64,
    /// Submissions refused because the queue was full or closing
    pub events_rejected: u64,
    pub failures_by_reason: BTreeMap<String, u64>,
    pub storage_retries: u64,
    /// Running mean of dequeue-to-stored latency
    pub average_processing_latency_ms: f64,
    pub current_queue_depth: i64,
    pub queue_capacity: usize,
    /// Workers currently holding a job
    pub active_workers: i64,
    pub worker_count: usize,
    pub events_per_second: f64,
    pub uptime_seconds: f64,
}

/// Thread-safe aggregator shared by workers (write) and readers
#[derive(Debug)]
pub struct MetricsAggregator {
    started_at: Instant,
    counters: Mutex<Counters>,
    queue_depth: AtomicI64,
    active_workers: AtomicI64,
    queue_capacity: AtomicUsize,
    worker_count: AtomicUsize,
}

impl Default for MetricsAggregator {
    fn default() -> Self {
        Self::new()
    }
}

impl MetricsAggregator {
    pub fn new() -> Self {
        Self {
            started_at: Instant::now(),
            counters: Mutex::new(Counters::default()),
            queue_depth: AtomicI64::new(0),
            active_workers: AtomicI64::new(0),
            queue_capacity: AtomicUsize::new(0),
            worker_count: AtomicUsize::new(0),
        }
    }

    /// Record the pool size reported in snapshots
    pub fn configure(&self, worker_count: usize, queue_capacity: usize) {
        self.worker_count.store(worker_count, Ordering::Release);
        self.queue_capacity.store(queue_capacity, Ordering::Release);
        gauge!("pipeline_workers").set(worker_count as f64);
        gauge!("pipeline_queue_capacity").set(queue_capacity as f64);
    }

    fn counters(&self) -> MutexGuard<'_, Counters> {
        self.counters.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Record events accepted into the queue
    pub fn record_received(&self, n: u64) {
        self.counters().received += n;
        counter!("pipeline_events_received_total").increment(n);
    }

    /// Record events stored successfully, each with the given latency
    pub fn record_processed(&self, n: u64, latency: Duration) {
        let latency_ms = duration_ms(latency);
        {
            let mut counters = self.counters();
            counters.processed += n;
            counters.latency_sum_ms += latency_ms * n as f64;
        }
        counter!("pipeline_events_processed_total").increment(n);
        let latency_histogram = histogram!("pipeline_event_latency_seconds");
        for _ in 0..n {
            latency_histogram.record(latency.as_secs_f64());
        }
    }

    /// Record events that ended without being stored
    pub fn record_failed(&self, n: u64, reason: FailureReason) {
        {
            let mut counters = self.counters();
            counters.failed += n;
            *counters.failures_by_reason.entry(reason).or_default() += n;
        }
        counter!("pipeline_events_failed_total", "reason" => <&'static str>::from(reason)).increment(n);
    }

    /// Record submissions refused at the door
    pub fn record_rejected(&self, n: u64) {
        self.counters().rejected += n;
        counter!("pipeline_events_rejected_total").increment(n);
    }

    pub fn record_storage_retry(&self) {
        self.counters().storage_retries += 1;
        counter!("pipeline_storage_retries_total").increment(1);
    }

    pub fn queue_entered(&self) {
        let depth = self.queue_depth.fetch_add(1, Ordering::AcqRel) + 1;
        gauge!("pipeline_queue_depth").set(depth as f64);
    }

    pub fn queue_left(&self) {
        let depth = self.queue_depth.fetch_sub(1, Ordering::AcqRel) - 1;
        gauge!("pipeline_queue_depth").set(depth as f64);
    }

    pub fn worker_busy(&self) {
        let active = self.active_workers.fetch_add(1, Ordering::AcqRel) + 1;
        gauge!("pipeline_active_workers").set(active as f64);
    }

    pub fn worker_idle(&self) {
        let active = self.active_workers.fetch_sub(1, Ordering::AcqRel) - 1;
        gauge!("pipeline_active_workers").set(active as f64);
    }

    pub fn queue_depth(&self) -> i64 {
        self.queue_depth.load(Ordering::Acquire)
    }

    pub fn active_workers(&self) -> i64 {
        self.active_workers.load(Ordering::Acquire)
    }

    /// Failures recorded so far under `reason`
    pub fn failures(&self, reason: FailureReason) -> u64 {
        self.counters()
            .failures_by_reason
            .get(&reason)
            .copied()
            .unwrap_or_default()
    }

    pub fn uptime(&self) -> Duration {
        self.started_at.elapsed()
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        let uptime_seconds = self.uptime().as_secs_f64();
        let counters = self.counters();

        let average_processing_latency_ms = if counters.processed > 0 {
            counters.latency_sum_ms / counters.processed as f64
        } else {
            0.0
        };
        let events_per_second = if uptime_seconds > 0.0 {
            counters.processed as f64 / uptime_seconds
        } else {
            0.0
        };
        let failures_by_reason = FailureReason::iter()
            .map(|reason| {
                let count = counters.failures_by_reason.get(&reason).copied().unwrap_or(0);
                (reason.to_string(), count)
            })
            .collect();

        MetricsSnapshot {
            events_received: counters.received,
            events_processed: counters.processed,
            events_failed: counters.failed,
            events_rejected: counters.rejected,
            failures_by_reason,
            storage_retries: counters.storage_retries,
            average_processing_latency_ms,
            current_queue_depth: self.queue_depth(),
            queue_capacity: self.queue_capacity.load(Ordering::Acquire),
            active_workers: self.active_workers(),
            worker_count: self.worker_count.load(Ordering::Acquire),
            events_per_second,
            uptime_seconds,
        }
    }
}
