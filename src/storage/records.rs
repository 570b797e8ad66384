//! Append-only record stores: analyst feedback and prediction history.
//!
//! Both logs are append-only and range-queried by timestamp. `SQLite` is the
//! durable backend; the in-memory backend serves tests.

use super::connection::{acquire_lock, configure_connection, open};
use crate::models::{Features, FeedbackRecord, PredictionRecord};
use crate::{Error, Result};
use chrono::{DateTime, SecondsFormat, Utc};
use rusqlite::{Connection, params};
use std::path::Path;
use std::sync::Mutex;

/// Durable append log of analyst-labeled records.
pub trait FeedbackStore: Send + Sync {
    /// Appends records atomically and returns how many were stored.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidInput`] if a label is not `0`/`1`, or
    /// [`Error::StorageFailure`] if the write fails. Nothing is stored on error.
    fn append_feedback(&self, records: &[FeedbackRecord]) -> Result<usize>;

    /// Returns records submitted at or after `since` (all when `None`), oldest
    /// first.
    ///
    /// # Errors
    ///
    /// Returns [`Error::StorageFailure`] if the read fails.
    fn feedback_since(&self, since: Option<DateTime<Utc>>) -> Result<Vec<FeedbackRecord>>;
}

/// Durable append log of served predictions.
pub trait PredictionLog: Send + Sync {
    /// Appends one record.
    ///
    /// # Errors
    ///
    /// Returns [`Error::StorageFailure`] if the write fails.
    fn append_prediction(&self, record: &PredictionRecord) -> Result<()>;

    /// Returns records served at or after `since` (all when `None`), oldest
    /// first.
    ///
    /// # Errors
    ///
    /// Returns [`Error::StorageFailure`] if the read fails.
    fn predictions_since(&self, since: Option<DateTime<Utc>>) -> Result<Vec<PredictionRecord>>;
}

fn check_labels(records: &[FeedbackRecord]) -> Result<()> {
    match records.iter().find(|r| r.true_label > 1) {
        Some(bad) => Err(Error::InvalidInput(format!(
            "analyst label must be 0 or 1, got {}",
            bad.true_label
        ))),
        None => Ok(()),
    }
}

/// Fixed-width RFC 3339 so text comparison in SQL matches time order.
fn encode_time(ts: DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Micros, true)
}

fn decode_time(raw: &str) -> Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(raw)
        .map(|ts| ts.with_timezone(&Utc))
        .map_err(|e| Error::storage("decode_timestamp", format!("{raw}: {e}")))
}

fn decode_features(raw: &str) -> Result<Features> {
    serde_json::from_str(raw).map_err(|e| Error::storage("decode_features", e))
}

fn encode_features(features: &Features) -> Result<String> {
    serde_json::to_string(features).map_err(|e| Error::storage("encode_features", e))
}

const SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS feedback (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    features TEXT NOT NULL,
    true_label INTEGER NOT NULL,
    submitted_at TEXT NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_feedback_submitted_at ON feedback (submitted_at);

CREATE TABLE IF NOT EXISTS prediction_log (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    features TEXT NOT NULL,
    predicted_label INTEGER NOT NULL,
    predicted_prob REAL NOT NULL,
    version_used INTEGER NOT NULL,
    prediction_time TEXT NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_prediction_log_time ON prediction_log (prediction_time);
";

/// `SQLite` backend for both logs.
pub struct SqliteRecordStore {
    conn: Mutex<Connection>,
}

impl SqliteRecordStore {
    /// Opens (creating if needed) a database file.
    ///
    /// # Errors
    ///
    /// Returns [`Error::StorageFailure`] if the database cannot be opened or
    /// the schema cannot be created.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        Self::with_connection(open(path.as_ref())?)
    }

    /// Creates an in-memory database.
    ///
    /// # Errors
    ///
    /// Returns [`Error::StorageFailure`] if the schema cannot be created.
    pub fn in_memory() -> Result<Self> {
        let conn =
            Connection::open_in_memory().map_err(|e| Error::storage("open_database", e))?;
        configure_connection(&conn);
        Self::with_connection(conn)
    }

    fn with_connection(conn: Connection) -> Result<Self> {
        conn.execute_batch(SCHEMA)
            .map_err(|e| Error::storage("create_schema", e))?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }
}

impl FeedbackStore for SqliteRecordStore {
    fn append_feedback(&self, records: &[FeedbackRecord]) -> Result<usize> {
        check_labels(records)?;
        let mut conn = acquire_lock(&self.conn);
        let tx = conn
            .transaction()
            .map_err(|e| Error::storage("append_feedback", e))?;
        {
            let mut stmt = tx
                .prepare_cached(
                    "INSERT INTO feedback (features, true_label, submitted_at) VALUES (?1, ?2, ?3)",
                )
                .map_err(|e| Error::storage("append_feedback", e))?;
            for record in records {
                stmt.execute(params![
                    encode_features(&record.features)?,
                    i64::from(record.true_label),
                    encode_time(record.submitted_at),
                ])
                .map_err(|e| Error::storage("append_feedback", e))?;
            }
        }
        tx.commit().map_err(|e| Error::storage("append_feedback", e))?;
        Ok(records.len())
    }

    fn feedback_since(&self, since: Option<DateTime<Utc>>) -> Result<Vec<FeedbackRecord>> {
        let conn = acquire_lock(&self.conn);
        let mut stmt = conn
            .prepare_cached(
                "SELECT features, true_label, submitted_at FROM feedback
                 WHERE submitted_at >= ?1 ORDER BY id",
            )
            .map_err(|e| Error::storage("query_feedback", e))?;
        let lower = since.map_or_else(String::new, encode_time);
        let rows = stmt
            .query_map(params![lower], |row| {
                Ok((
                    row.get::<_, String>(0)?,
                    row.get::<_, i64>(1)?,
                    row.get::<_, String>(2)?,
                ))
            })
            .map_err(|e| Error::storage("query_feedback", e))?;

        let mut records = Vec::new();
        for row in rows {
            let (features, label, submitted_at) =
                row.map_err(|e| Error::storage("query_feedback", e))?;
            records.push(FeedbackRecord {
                features: decode_features(&features)?,
                true_label: u8::try_from(label)
                    .map_err(|e| Error::storage("decode_label", e))?,
                submitted_at: decode_time(&submitted_at)?,
            });
        }
        Ok(records)
    }
}

impl PredictionLog for SqliteRecordStore {
    fn append_prediction(&self, record: &PredictionRecord) -> Result<()> {
        let version = i64::try_from(record.version_used)
            .map_err(|e| Error::storage("append_prediction", e))?;
        let features = encode_features(&record.features)?;
        let conn = acquire_lock(&self.conn);
        conn.prepare_cached(
            "INSERT INTO prediction_log
             (features, predicted_label, predicted_prob, version_used, prediction_time)
             VALUES (?1, ?2, ?3, ?4, ?5)",
        )
        .and_then(|mut stmt| {
            stmt.execute(params![
                features,
                i64::from(record.predicted_label),
                record.predicted_probability,
                version,
                encode_time(record.timestamp),
            ])
        })
        .map_err(|e| Error::storage("append_prediction", e))?;
        Ok(())
    }

    fn predictions_since(&self, since: Option<DateTime<Utc>>) -> Result<Vec<PredictionRecord>> {
        let conn = acquire_lock(&self.conn);
        let mut stmt = conn
            .prepare_cached(
                "SELECT features, predicted_label, predicted_prob, version_used, prediction_time
                 FROM prediction_log WHERE prediction_time >= ?1 ORDER BY id",
            )
            .map_err(|e| Error::storage("query_predictions", e))?;
        let lower = since.map_or_else(String::new, encode_time);
        let rows = stmt
            .query_map(params![lower], |row| {
                Ok((
                    row.get::<_, String>(0)?,
                    row.get::<_, i64>(1)?,
                    row.get::<_, f64>(2)?,
                    row.get::<_, i64>(3)?,
                    row.get::<_, String>(4)?,
                ))
            })
            .map_err(|e| Error::storage("query_predictions", e))?;

        let mut records = Vec::new();
        for row in rows {
            let (features, label, probability, version, timestamp) =
                row.map_err(|e| Error::storage("query_predictions", e))?;
            records.push(PredictionRecord {
                features: decode_features(&features)?,
                predicted_label: u8::try_from(label)
                    .map_err(|e| Error::storage("decode_label", e))?,
                predicted_probability: probability,
                version_used: u64::try_from(version)
                    .map_err(|e| Error::storage("decode_version", e))?,
                timestamp: decode_time(&timestamp)?,
            });
        }
        Ok(records)
    }
}

impl std::fmt::Debug for SqliteRecordStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let conn = acquire_lock(&self.conn);
        f.debug_struct("SqliteRecordStore")
            .field("path", &conn.path())
            .finish()
    }
}

/// In-memory backend for both logs.
#[derive(Debug, Default)]
pub struct MemoryRecordStore {
    feedback: Mutex<Vec<FeedbackRecord>>,
    predictions: Mutex<Vec<PredictionRecord>>,
}

impl MemoryRecordStore {
    /// Creates empty logs.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

impl FeedbackStore for MemoryRecordStore {
    fn append_feedback(&self, records: &[FeedbackRecord]) -> Result<usize> {
        check_labels(records)?;
        acquire_lock(&self.feedback).extend_from_slice(records);
        Ok(records.len())
    }

    fn feedback_since(&self, since: Option<DateTime<Utc>>) -> Result<Vec<FeedbackRecord>> {
        Ok(acquire_lock(&self.feedback)
            .iter()
            .filter(|r| since.is_none_or(|s| r.submitted_at >= s))
            .cloned()
            .collect())
    }
}

impl PredictionLog for MemoryRecordStore {
    fn append_prediction(&self, record: &PredictionRecord) -> Result<()> {
        acquire_lock(&self.predictions).push(record.clone());
        Ok(())
    }

    fn predictions_since(&self, since: Option<DateTime<Utc>>) -> Result<Vec<PredictionRecord>> {
        Ok(acquire_lock(&self.predictions)
            .iter()
            .filter(|r| since.is_none_or(|s| r.timestamp >= s))
            .cloned()
            .collect())
    }
}
