//! Event processors
//!
//! A processor turns a validated raw [`Event`] into a [`ProcessedEvent`].
//! Workers bound every call with the configured processing timeout.

use crate::error::ProcessingError;
use crate::event::{duration_ms, is_valid_timestamp, Event, EventData, EventType, ProcessedEvent};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::str::FromStr;
use std::time::Instant;
use uuid::Uuid;

/// Trait for event processors.
///
/// # Example
///
/// ```rust,ignore
/// use event_pipeline::{EventProcessor, DefaultProcessor};
///
/// struct EnrichingProcessor { inner: DefaultProcessor }
///
/// #[async_trait]
/// impl EventProcessor for EnrichingProcessor {
///     async fn process(&self, event: Event, dequeued_at: Instant) -> Result<ProcessedEvent, ProcessingError> {
///         let mut processed = self.inner.process(event, dequeued_at).await?;
///         processed.data.metadata.insert("region".into(), "eu-west-1".into());
///         Ok(processed)
///     }
///
///     fn name(&self) -> &'static str {
///         "EnrichingProcessor"
///     }
/// }
/// ```
#[async_trait]
pub trait EventProcessor: Send + Sync {
    /// Transform one validated event.
    ///
    /// `dequeued_at` marks when the worker took the job off the queue and is
    /// the start of the latency measurement.
    async fn process(
        &self,
        event: Event,
        dequeued_at: Instant,
    ) -> Result<ProcessedEvent, ProcessingError>;

    /// Get the processor name for logging.
    fn name(&self) -> &'static str;
}

/// Built-in processor: types the event, trims the action, and keeps every
/// other field as submitted.
#[derive(Debug, Clone, Copy, Default)]
pub struct DefaultProcessor;

impl DefaultProcessor {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl EventProcessor for DefaultProcessor {
    async fn process(
        &self,
        event: Event,
        dequeued_at: Instant,
    ) -> Result<ProcessedEvent, ProcessingError> {
        let mut processed = normalize(event, Utc::now())?;
        processed.processing_latency_ms = duration_ms(dequeued_at.elapsed());
        Ok(processed)
    }

    fn name(&self) -> &'static str {
        "DefaultProcessor"
    }
}

/// Deterministic part of [`DefaultProcessor`]: everything except the latency.
pub fn normalize(event: Event, now: DateTime<Utc>) -> Result<ProcessedEvent, ProcessingError> {
    let event_type = EventType::from_str(&event.event_type)
        .map_err(|_| ProcessingError::UnsupportedType(event.event_type.clone()))?;

    if !event.data.value.is_finite() {
        return Err(ProcessingError::Unconvertible {
            field: "data.value",
            reason: format!("{} is not a finite number", event.data.value),
        });
    }

    let id = event
        .id
        .filter(|id| !id.trim().is_empty())
        .unwrap_or_else(|| Uuid::new_v4().to_string());
    let timestamp = event
        .timestamp
        .filter(|ts| is_valid_timestamp(*ts))
        .unwrap_or(now);

    Ok(ProcessedEvent {
        id,
        event_type,
        source: event.source,
        timestamp,
        user_id: event.user_id,
        data: EventData {
            action: event.data.action.trim().to_string(),
            value: event.data.value,
            metadata: event.data.metadata,
        },
        processed_at: now,
        processing_latency_ms: 0.0,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use serde_json::json;

    #[test]
    fn test_normalize_copies_fields() {
        let ts = Utc.with_ymd_and_hms(2024, 1, 2, 3, 4, 5).unwrap();
        let now = Utc::now();
        let event = Event::new("user_action", "web")
            .with_id("evt-42")
            .with_timestamp(ts)
            .with_user_id("user-1")
            .with_data("  purchase ", 99.99)
            .with_metadata("sku", "A-1")
            .with_metadata("tags", json!(["a", "b"]));

        let processed = normalize(event, now).unwrap();

        assert_eq!(processed.id, "evt-42");
        assert_eq!(processed.event_type, EventType::UserAction);
        assert_eq!(processed.source, "web");
        assert_eq!(processed.timestamp, ts);
        assert_eq!(processed.user_id.as_deref(), Some("user-1"));
        assert_eq!(processed.data.action, "purchase");
        assert_eq!(processed.data.value, 99.99);
        assert_eq!(processed.data.metadata["sku"], json!("A-1"));
        assert_eq!(processed.data.metadata["tags"], json!(["a", "b"]));
        assert_eq!(processed.processed_at, now);
    }

    #[test]
    fn test_normalize_assigns_missing_id_and_timestamp() {
        let now = Utc::now();
        let processed = normalize(Event::new("system_log", "kernel"), now).unwrap();

        assert!(Uuid::parse_str(&processed.id).is_ok());
        assert_eq!(processed.timestamp, now);
    }

    #[test]
    fn test_normalize_rejects_unknown_type() {
        let err = normalize(Event::new("bogus", "web"), Utc::now()).unwrap_err();
        assert_eq!(err, ProcessingError::UnsupportedType("bogus".to_string()));
    }

    #[test]
    fn test_normalize_rejects_non_finite_value() {
        let event = Event::new("sensor_data", "probe").with_data("reading", f64::NAN);
        let err = normalize(event, Utc::now()).unwrap_err();
        assert!(matches!(err, ProcessingError::Unconvertible { field: "data.value", .. }));
    }

    #[tokio::test]
    async fn test_default_processor_measures_latency() {
        let dequeued_at = Instant::now();
        let processed = DefaultProcessor::new()
            .process(Event::new("user_action", "web"), dequeued_at)
            .await
            .unwrap();

        assert!(processed.processing_latency_ms >= 0.0);
        assert!(processed.processing_latency_ms.is_finite());
    }
}
