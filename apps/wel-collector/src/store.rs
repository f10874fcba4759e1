use crate::telemetry::TelemetryRecord;
use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::Value as JsonValue;
use sqlx::{postgres::PgPoolOptions, PgPool, Row};
use std::collections::BTreeMap;
use std::sync::{
    atomic::{AtomicU64, Ordering},
    Arc, Mutex,
};
use std::time::Instant;
use thiserror::Error;

const UNIQUE_VIOLATION: &str = "23505";

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("a record for {0} is already stored")]
    Duplicate(DateTime<Utc>),
    #[error(transparent)]
    Database(#[from] sqlx::Error),
    #[error("stored document for {timestamp} is not an object")]
    Document { timestamp: DateTime<Utc> },
}

#[async_trait]
pub trait RecordStore: Send + Sync {
    /// Creates the table and its unique timestamp index when missing.
    async fn ensure_schema(&self) -> Result<(), StoreError>;

    /// Inserts without a pre-check; a taken timestamp is `Duplicate`.
    async fn insert(&self, record: &TelemetryRecord) -> Result<(), StoreError>;

    /// Records with `start <= timestamp < end`, oldest first.
    async fn fetch_range(
        &self,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<Vec<TelemetryRecord>, StoreError>;
}

pub async fn build_pool(database_url: &str, max_connections: u32) -> Result<PgPool> {
    let pool = PgPoolOptions::new()
        .max_connections(max_connections)
        .connect(database_url)
        .await?;
    Ok(pool)
}

#[derive(Clone)]
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl RecordStore for PgStore {
    async fn ensure_schema(&self) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS wel_data (
                dateandtime timestamptz NOT NULL,
                doc jsonb NOT NULL
            )
            "#,
        )
        .execute(&self.pool)
        .await?;
        sqlx::query(
            r#"
            CREATE UNIQUE INDEX IF NOT EXISTS wel_data_dateandtime_idx
                ON wel_data (dateandtime DESC)
            "#,
        )
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn insert(&self, record: &TelemetryRecord) -> Result<(), StoreError> {
        let result = sqlx::query("INSERT INTO wel_data (dateandtime, doc) VALUES ($1, $2)")
            .bind(record.timestamp)
            .bind(JsonValue::Object(record.to_document()))
            .execute(&self.pool)
            .await;
        match result {
            Ok(_) => Ok(()),
            Err(sqlx::Error::Database(db)) if db.code().as_deref() == Some(UNIQUE_VIOLATION) => {
                Err(StoreError::Duplicate(record.timestamp))
            }
            Err(err) => Err(err.into()),
        }
    }

    async fn fetch_range(
        &self,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<Vec<TelemetryRecord>, StoreError> {
        let rows = sqlx::query(
            r#"
            SELECT dateandtime, doc
            FROM wel_data
            WHERE dateandtime >= $1 AND dateandtime < $2
            ORDER BY dateandtime ASC
            "#,
        )
        .bind(start)
        .bind(end)
        .fetch_all(&self.pool)
        .await?;

        let mut records = Vec::with_capacity(rows.len());
        for row in rows {
            let timestamp = row.try_get::<DateTime<Utc>, _>("dateandtime")?;
            let doc = row.try_get::<JsonValue, _>("doc")?;
            let Some(doc) = doc.as_object() else {
                return Err(StoreError::Document { timestamp });
            };
            records.push(TelemetryRecord::from_document(timestamp, doc));
        }
        Ok(records)
    }
}

/// In-process store keyed by timestamp. Records go through the same
/// document encoding as the database.
#[derive(Default)]
pub struct MemoryStore {
    docs: Mutex<BTreeMap<DateTime<Utc>, serde_json::Map<String, JsonValue>>>,
    retention: Option<usize>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Keeps at most `max_records`, evicting the oldest timestamps first.
    pub fn with_retention(max_records: usize) -> Self {
        Self {
            docs: Mutex::default(),
            retention: Some(max_records.max(1)),
        }
    }

    pub fn len(&self) -> usize {
        self.docs
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn records(&self) -> Vec<TelemetryRecord> {
        self.docs
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .iter()
            .map(|(ts, doc)| TelemetryRecord::from_document(*ts, doc))
            .collect()
    }
}

#[async_trait]
impl RecordStore for MemoryStore {
    async fn ensure_schema(&self) -> Result<(), StoreError> {
        Ok(())
    }

    async fn insert(&self, record: &TelemetryRecord) -> Result<(), StoreError> {
        let mut docs = self.docs.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        if docs.contains_key(&record.timestamp) {
            return Err(StoreError::Duplicate(record.timestamp));
        }
        docs.insert(record.timestamp, record.to_document());
        if let Some(max) = self.retention {
            while docs.len() > max {
                docs.pop_first();
            }
        }
        Ok(())
    }

    async fn fetch_range(
        &self,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<Vec<TelemetryRecord>, StoreError> {
        if start >= end {
            return Ok(Vec::new());
        }
        let docs = self.docs.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        Ok(docs
            .range(start..end)
            .map(|(ts, doc)| TelemetryRecord::from_document(*ts, doc))
            .collect())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteOutcome {
    Stored,
    Duplicate,
    Error,
}

/// Point-in-time copy of [`WriteStats`].
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct WriteTotals {
    pub stored: u64,
    pub duplicates: u64,
    pub errors: u64,
    pub last_write_micros: u64,
    pub last_error: Option<String>,
}

#[derive(Debug, Default)]
pub struct WriteStats {
    pub stored: AtomicU64,
    pub duplicates: AtomicU64,
    pub errors: AtomicU64,
    pub last_write_micros: AtomicU64,
    pub last_error: Mutex<Option<String>>,
}

impl WriteStats {
    pub fn record_error(&self, err: impl Into<String>) {
        self.errors.fetch_add(1, Ordering::Relaxed);
        if let Ok(mut guard) = self.last_error.lock() {
            *guard = Some(err.into());
        }
    }

    pub fn clear_error(&self) {
        if let Ok(mut guard) = self.last_error.lock() {
            *guard = None;
        }
    }

    pub fn last_error(&self) -> Option<String> {
        self.last_error.lock().ok().and_then(|guard| guard.clone())
    }

    pub fn totals(&self) -> WriteTotals {
        WriteTotals {
            stored: self.stored.load(Ordering::Relaxed),
            duplicates: self.duplicates.load(Ordering::Relaxed),
            errors: self.errors.load(Ordering::Relaxed),
            last_write_micros: self.last_write_micros.load(Ordering::Relaxed),
            last_error: self.last_error(),
        }
    }
}

/// Writes one record per cycle and classifies the result. Never fails.
#[derive(Clone)]
pub struct PersistenceWriter {
    store: Arc<dyn RecordStore>,
    stats: Arc<WriteStats>,
}

impl PersistenceWriter {
    pub fn new(store: Arc<dyn RecordStore>) -> Self {
        Self {
            store,
            stats: Arc::new(WriteStats::default()),
        }
    }

    pub fn store(&self) -> &Arc<dyn RecordStore> {
        &self.store
    }

    pub fn stats(&self) -> Arc<WriteStats> {
        self.stats.clone()
    }

    pub async fn write(&self, record: &TelemetryRecord) -> WriteOutcome {
        let started = Instant::now();
        let result = self.store.insert(record).await;
        let micros = started.elapsed().as_micros() as u64;
        self.stats.last_write_micros.store(micros, Ordering::Relaxed);

        match result {
            Ok(()) => {
                self.stats.stored.fetch_add(1, Ordering::Relaxed);
                self.stats.clear_error();
                tracing::info!(
                    timestamp = %record.timestamp,
                    fields = record.len(),
                    "stored record"
                );
                tracing::debug!(micros, "write timing");
                WriteOutcome::Stored
            }
            Err(StoreError::Duplicate(timestamp)) => {
                self.stats.duplicates.fetch_add(1, Ordering::Relaxed);
                tracing::info!(%timestamp, "record already stored; skipping");
                WriteOutcome::Duplicate
            }
            Err(err) => {
                self.stats.record_error(err.to_string());
                tracing::error!(timestamp = %record.timestamp, error = %err, "failed to store record");
                WriteOutcome::Error
            }
        }
    }
}
