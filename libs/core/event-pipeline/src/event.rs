//! Event data model
//!
//! [`Event`] is the raw record as submitted. Its `type` stays a plain string so
//! that empty or unknown values reach the validator and are reported against
//! the `type` field instead of failing deserialization.
//! [`ProcessedEvent`] is the normalized record handed to storage.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::time::Duration;
use strum::{AsRefStr, Display, EnumString, VariantNames};
use utoipa::ToSchema;
use uuid::Uuid;

/// Recognized event types
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    Serialize,
    Deserialize,
    ToSchema,
    Display,
    EnumString,
    AsRefStr,
    VariantNames,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum EventType {
    UserAction,
    SensorData,
    SystemLog,
}

/// Event payload
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct EventData {
    #[serde(default)]
    pub action: String,
    #[serde(default)]
    pub value: f64,
    #[serde(default)]
    #[schema(value_type = Object)]
    pub metadata: HashMap<String, serde_json::Value>,
}

/// Raw event as submitted by a client
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct Event {
    /// Generated when absent or blank
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    /// One of `user_action`, `sensor_data`, `system_log`
    #[serde(rename = "type", default)]
    #[schema(example = "user_action")]
    pub event_type: String,
    #[serde(default)]
    #[schema(example = "web")]
    pub source: String,
    /// Set to ingestion time when absent or before the Unix epoch
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_id: Option<String>,
    #[serde(default)]
    pub data: EventData,
}

impl Event {
    pub fn new(event_type: impl Into<String>, source: impl Into<String>) -> Self {
        Self {
            id: None,
            event_type: event_type.into(),
            source: source.into(),
            timestamp: None,
            user_id: None,
            data: EventData::default(),
        }
    }

    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = Some(id.into());
        self
    }

    pub fn with_timestamp(mut self, timestamp: DateTime<Utc>) -> Self {
        self.timestamp = Some(timestamp);
        self
    }

    pub fn with_user_id(mut self, user_id: impl Into<String>) -> Self {
        self.user_id = Some(user_id.into());
        self
    }

    pub fn with_data(mut self, action: impl Into<String>, value: f64) -> Self {
        self.data.action = action.into();
        self.data.value = value;
        self
    }

    pub fn with_metadata(mut self, key: impl Into<String>, value: impl Into<serde_json::Value>) -> Self {
        self.data.metadata.insert(key.into(), value.into());
        self
    }

    /// Assign a UUIDv4 id when missing or blank and replace an absent or
    /// pre-epoch timestamp with `now`. Returns the event id.
    pub fn stamp(&mut self, now: DateTime<Utc>) -> &str {
        if !self.timestamp.is_some_and(is_valid_timestamp) {
            self.timestamp = Some(now);
        }
        let id = self
            .id
            .take()
            .filter(|id| !id.trim().is_empty())
            .unwrap_or_else(|| Uuid::new_v4().to_string());
        self.id.insert(id).as_str()
    }

    /// Id for log fields; `-` until the event has been stamped
    pub fn id_or_placeholder(&self) -> &str {
        self.id.as_deref().unwrap_or("-")
    }
}

/// Timestamps before the Unix epoch (including the zero time) are treated as absent
pub fn is_valid_timestamp(timestamp: DateTime<Utc>) -> bool {
    timestamp.timestamp() >= 0
}

/// Normalized event produced by a processor and handed to storage
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct ProcessedEvent {
    pub id: String,
    #[serde(rename = "type")]
    pub event_type: EventType,
    pub source: String,
    pub timestamp: DateTime<Utc>,
    pub user_id: Option<String>,
    pub data: EventData,
    pub processed_at: DateTime<Utc>,
    /// Time from dequeue until the record was ready to store
    pub processing_latency_ms: f64,
}

pub(crate) fn duration_ms(duration: Duration) -> f64 {
    duration.as_secs_f64() * 1000.0
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use std::str::FromStr;

    #[test]
    fn test_event_type_parses_snake_case() {
        assert_eq!(EventType::from_str("user_action").unwrap(), EventType::UserAction);
        assert_eq!(EventType::from_str("system_log").unwrap(), EventType::SystemLog);
        assert!(EventType::from_str("UserAction").is_err());
        assert_eq!(EventType::SensorData.as_ref(), "sensor_data");
    }

    #[test]
    fn test_event_deserializes_with_defaults() {
        let event: Event =
            serde_json::from_str(r#"{"type":"user_action","source":"web"}"#).unwrap();

        assert_eq!(event.event_type, "user_action");
        assert!(event.id.is_none());
        assert!(event.timestamp.is_none());
        assert_eq!(event.data, EventData::default());
    }

    #[test]
    fn test_event_missing_type_deserializes_empty() {
        let event: Event = serde_json::from_str(r#"{"source":"web"}"#).unwrap();
        assert_eq!(event.event_type, "");
    }

    #[test]
    fn test_stamp_generates_id_and_timestamp() {
        let now = Utc::now();
        let mut event = Event::new("user_action", "web");

        let id = event.stamp(now).to_string();

        assert!(Uuid::parse_str(&id).is_ok());
        assert_eq!(event.id.as_deref(), Some(id.as_str()));
        assert_eq!(event.timestamp, Some(now));
    }

    #[test]
    fn test_stamp_replaces_blank_id() {
        let mut event = Event::new("user_action", "web").with_id("   ");
        let id = event.stamp(Utc::now()).to_string();
        assert!(Uuid::parse_str(&id).is_ok());
    }

    #[test]
    fn test_stamp_keeps_existing_values() {
        let ts = Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).unwrap();
        let mut event = Event::new("user_action", "web")
            .with_id("evt-1")
            .with_timestamp(ts);

        assert_eq!(event.stamp(Utc::now()), "evt-1");
        assert_eq!(event.timestamp, Some(ts));
    }

    #[test]
    fn test_stamp_replaces_zero_time() {
        let zero: DateTime<Utc> = "0001-01-01T00:00:00Z".parse().unwrap();
        let now = Utc::now();
        let mut event = Event::new("user_action", "web").with_timestamp(zero);

        event.stamp(now);

        assert_eq!(event.timestamp, Some(now));
    }

    #[test]
    fn test_is_valid_timestamp() {
        assert!(is_valid_timestamp(Utc.timestamp_opt(0, 0).unwrap()));
        assert!(!is_valid_timestamp(Utc.timestamp_opt(-1, 0).unwrap()));
    }
}
