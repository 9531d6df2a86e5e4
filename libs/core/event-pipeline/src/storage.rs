//! Storage port
//!
//! Workers hand processed events to an [`EventStore`]. Adapters must upsert by
//! `id`: a store call can be retried after a partial write, so writing the same
//! event twice has to leave exactly one record.

use crate::error::StorageError;
use crate::event::ProcessedEvent;
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, PoisonError, RwLock};

#[async_trait]
pub trait EventStore: Send + Sync {
    /// Persist the events. The call either succeeds as a whole or counts as
    /// failed for every event in it.
    async fn store(&self, events: &[ProcessedEvent]) -> Result<(), StorageError>;

    /// Get the store name for logging.
    fn name(&self) -> &'static str;

    /// Health check for the backend.
    ///
    /// Default: always returns Ok(true).
    async fn health_check(&self) -> Result<bool, StorageError> {
        Ok(true)
    }
}

/// Process-local store keyed by event id
#[derive(Debug, Clone, Default)]
pub struct InMemoryEventStore {
    events: Arc<RwLock<HashMap<String, ProcessedEvent>>>,
    calls: Arc<AtomicU64>,
}

impl InMemoryEventStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.events.read().unwrap_or_else(PoisonError::into_inner).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn get(&self, id: &str) -> Option<ProcessedEvent> {
        self.events
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(id)
            .cloned()
    }

    pub fn ids(&self) -> Vec<String> {
        self.events
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .keys()
            .cloned()
            .collect()
    }

    /// Number of successful `store` calls
    pub fn store_calls(&self) -> u64 {
        self.calls.load(Ordering::Relaxed)
    }
}

#[async_trait]
impl EventStore for InMemoryEventStore {
    async fn store(&self, events: &[ProcessedEvent]) -> Result<(), StorageError> {
        let mut guard = self
            .events
            .write()
            .map_err(|_| StorageError::backend("in-memory store lock poisoned"))?;
        for event in events {
            guard.insert(event.id.clone(), event.clone());
        }
        self.calls.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }

    fn name(&self) -> &'static str {
        "in_memory"
    }
}


#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::{Event, ProcessedEvent};
    use crate::processor::normalize;
    use chrono::Utc;

    fn processed(id: &str, action: &str) -> ProcessedEvent {
        let event = Event::new("user_action", "web")
            .with_id(id)
            .with_data(action, 1.0);
        normalize(event, Utc::now()).unwrap()
    }

    #[tokio::test]
    async fn test_store_upserts_by_id() {
        let store = InMemoryEventStore::new();

        store.store(&[processed("a", "first")]).await.unwrap();
        store
            .store(&[processed("a", "second"), processed("b", "other")])
            .await
            .unwrap();

        assert_eq!(store.len(), 2);
        assert_eq!(store.get("a").unwrap().data.action, "second");
        assert_eq!(store.store_calls(), 2);
    }

    #[tokio::test]
    async fn test_clones_share_state() {
        let store = InMemoryEventStore::new();
        let handle = store.clone();

        store.store(&[processed("x", "click")]).await.unwrap();

        assert!(!handle.is_empty());
        assert_eq!(handle.ids(), vec!["x".to_string()]);
        assert!(handle.health_check().await.unwrap());
    }
}
