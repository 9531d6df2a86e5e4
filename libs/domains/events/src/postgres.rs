//! PostgreSQL storage adapter

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use core_config::database::DatabaseConfig;
use event_pipeline::{
    EventData, EventStore, EventType, ProcessedEvent, RetryPolicy, StorageError,
    retry_with_backoff,
};
use sea_orm::{
    ConnectOptions, ConnectionTrait, Database, DatabaseConnection, DbBackend, DbErr,
    FromQueryResult, Statement, TransactionTrait,
};
use std::str::FromStr;
use std::time::Duration;
use tracing::{info, instrument};

const CREATE_TABLE_SQL: &str = r#"
CREATE TABLE IF NOT EXISTS events (
    id TEXT PRIMARY KEY,
    event_type TEXT NOT NULL,
    source TEXT NOT NULL,
    "timestamp" TIMESTAMPTZ NOT NULL,
    user_id TEXT NULL,
    action TEXT NOT NULL,
    value DOUBLE PRECISION NOT NULL,
    metadata JSONB NOT NULL DEFAULT '{}'::jsonb,
    processed_at TIMESTAMPTZ NOT NULL,
    processing_latency_ms DOUBLE PRECISION NOT NULL
)
"#;

const UPSERT_SQL: &str = r#"
INSERT INTO events (
    id, event_type, source, "timestamp", user_id, action, value, metadata,
    processed_at, processing_latency_ms
)
VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)
ON CONFLICT (id) DO UPDATE SET
    event_type = EXCLUDED.event_type,
    source = EXCLUDED.source,
    "timestamp" = EXCLUDED."timestamp",
    user_id = EXCLUDED.user_id,
    action = EXCLUDED.action,
    value = EXCLUDED.value,
    metadata = EXCLUDED.metadata,
    processed_at = EXCLUDED.processed_at,
    processing_latency_ms = EXCLUDED.processing_latency_ms
"#;

/// Row shape of the `events` table
#[derive(Debug, FromQueryResult)]
struct EventRow {
    id: String,
    event_type: String,
    source: String,
    timestamp: DateTime<Utc>,
    user_id: Option<String>,
    action: String,
    value: f64,
    metadata: serde_json::Value,
    processed_at: DateTime<Utc>,
    processing_latency_ms: f64,
}

impl TryFrom<EventRow> for ProcessedEvent {
    type Error = StorageError;

    fn try_from(row: EventRow) -> Result<Self, Self::Error> {
        let event_type = EventType::from_str(&row.event_type).map_err(|_| {
            StorageError::rejected(format!("unknown event type '{}' in row", row.event_type))
        })?;
        let metadata = serde_json::from_value(row.metadata)
            .map_err(|e| StorageError::rejected(format!("metadata is not an object: {}", e)))?;

        Ok(ProcessedEvent {
            id: row.id,
            event_type,
            source: row.source,
            timestamp: row.timestamp,
            user_id: row.user_id,
            data: EventData {
                action: row.action,
                value: row.value,
                metadata,
            },
            processed_at: row.processed_at,
            processing_latency_ms: row.processing_latency_ms,
        })
    }
}

#[derive(Debug, FromQueryResult)]
struct CountRow {
    count: i64,
}

/// [`EventStore`] backed by an `events` table, upserting by id
#[derive(Clone)]
pub struct PgEventStore {
    db: DatabaseConnection,
}

impl PgEventStore {
    pub fn new(db: DatabaseConnection) -> Self {
        Self { db }
    }

    /// Open a pool, retrying with backoff while the server is unreachable
    pub async fn connect(config: &DatabaseConfig, retry: RetryPolicy) -> Result<Self, DbErr> {
        let mut options = ConnectOptions::new(config.url.clone());
        options
            .max_connections(config.max_connections)
            .min_connections(1)
            .connect_timeout(Duration::from_secs(8))
            .acquire_timeout(Duration::from_secs(8))
            .sqlx_logging(false);

        let db = retry_with_backoff(|| Database::connect(options.clone()), retry).await?;
        info!(
            max_connections = config.max_connections,
            "Connected to PostgreSQL event store"
        );
        Ok(Self::new(db))
    }

    /// Create the `events` table when it does not exist yet
    pub async fn ensure_table(&self) -> Result<(), DbErr> {
        self.db.execute_unprepared(CREATE_TABLE_SQL).await?;
        Ok(())
    }

    /// Fetch a stored event by id
    pub async fn get(&self, id: &str) -> Result<Option<ProcessedEvent>, StorageError> {
        let stmt = Statement::from_sql_and_values(
            DbBackend::Postgres,
            r#"SELECT id, event_type, source, "timestamp", user_id, action, value, metadata,
                      processed_at, processing_latency_ms
               FROM events WHERE id = $1"#,
            [id.into()],
        );

        let row = EventRow::find_by_statement(stmt)
            .one(&self.db)
            .await
            .map_err(storage_error)?;

        row.map(ProcessedEvent::try_from).transpose()
    }

    /// Number of stored events
    pub async fn count(&self) -> Result<u64, StorageError> {
        let stmt = Statement::from_string(
            DbBackend::Postgres,
            "SELECT COUNT(*)::BIGINT AS count FROM events",
        );

        let row = CountRow::find_by_statement(stmt)
            .one(&self.db)
            .await
            .map_err(storage_error)?;

        Ok(row.map(|r| r.count.max(0) as u64).unwrap_or(0))
    }
}

fn upsert_statement(event: &ProcessedEvent) -> Result<Statement, StorageError> {
    let metadata = serde_json::to_value(&event.data.metadata)
        .map_err(|e| StorageError::rejected(format!("metadata not serializable: {}", e)))?;

    Ok(Statement::from_sql_and_values(
        DbBackend::Postgres,
        UPSERT_SQL,
        [
            event.id.clone().into(),
            event.event_type.as_ref().into(),
            event.source.clone().into(),
            event.timestamp.into(),
            event.user_id.clone().into(),
            event.data.action.clone().into(),
            event.data.value.into(),
            metadata.into(),
            event.processed_at.into(),
            event.processing_latency_ms.into(),
        ],
    ))
}

/// Type and JSON errors are the record's fault; everything else may pass
fn storage_error(err: DbErr) -> StorageError {
    match err {
        DbErr::Type(msg) | DbErr::Json(msg) => StorageError::rejected(msg),
        other => StorageError::backend(other.to_string()),
    }
}

#[async_trait]
impl EventStore for PgEventStore {
    #[instrument(skip(self, events), fields(count = events.len()))]
    async fn store(&self, events: &[ProcessedEvent]) -> Result<(), StorageError> {
        let statements = events
            .iter()
            .map(upsert_statement)
            .collect::<Result<Vec<_>, _>>()?;

        let txn = self.db.begin().await.map_err(storage_error)?;
        for stmt in statements {
            txn.execute_raw(stmt).await.map_err(storage_error)?;
        }
        txn.commit().await.map_err(storage_error)?;
        Ok(())
    }

    fn name(&self) -> &'static str {
        "postgres"
    }

    async fn health_check(&self) -> Result<bool, StorageError> {
        self.db.ping().await.map_err(storage_error)?;
        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use sea_orm::{DatabaseBackend, MockDatabase, MockExecResult};
    use std::collections::HashMap;

    fn processed(id: &str) -> ProcessedEvent {
        let at = Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).unwrap();
        ProcessedEvent {
            id: id.to_string(),
            event_type: EventType::UserAction,
            source: "web".to_string(),
            timestamp: at,
            user_id: Some("u-1".to_string()),
            data: EventData {
                action: "purchase".to_string(),
                value: 99.99,
                metadata: HashMap::from([("sku".to_string(), serde_json::json!("A-1"))]),
            },
            processed_at: at,
            processing_latency_ms: 0.4,
        }
    }

    #[test]
    fn test_upsert_statement_binds_all_columns() {
        let stmt = upsert_statement(&processed("e-1")).unwrap();

        assert!(stmt.sql.contains("ON CONFLICT (id) DO UPDATE"));
        assert_eq!(stmt.values.map(|v| v.0.len()), Some(10));
    }

    #[test]
    fn test_storage_error_classification() {
        assert!(!storage_error(DbErr::Type("bad".into())).is_retryable());
        assert!(storage_error(DbErr::Custom("connection reset".into())).is_retryable());
    }

    #[test]
    fn test_row_conversion_rejects_unknown_type() {
        let row = EventRow {
            id: "e-1".into(),
            event_type: "bogus".into(),
            source: "web".into(),
            timestamp: Utc::now(),
            user_id: None,
            action: String::new(),
            value: 0.0,
            metadata: serde_json::json!({}),
            processed_at: Utc::now(),
            processing_latency_ms: 0.0,
        };

        assert!(ProcessedEvent::try_from(row).is_err());
    }

    #[tokio::test]
    async fn test_store_executes_one_upsert_per_event() {
        let db = MockDatabase::new(DatabaseBackend::Postgres)
            .append_exec_results([
                MockExecResult {
                    last_insert_id: 0,
                    rows_affected: 1,
                },
                MockExecResult {
                    last_insert_id: 0,
                    rows_affected: 1,
                },
            ])
            .into_connection();
        let store = PgEventStore::new(db);

        let result = store.store(&[processed("e-1"), processed("e-2")]).await;

        assert!(result.is_ok());
        assert_eq!(store.name(), "postgres");
    }
}
