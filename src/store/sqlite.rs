use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{
    QueryBuilder, Row, Sqlite, SqlitePool, Transaction,
    sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions, SqliteRow},
};

use super::{
    LogRecord, LogSnapshot, LogStore, NewLogRecord, StoreError, StoreResult,
    traits::{from_epoch_seconds, to_epoch_seconds},
};
use crate::config::SqliteConfig;

const RECORD_COLUMNS: &str = "id, timestamp, name, level, msg, pathname, lineno, func, args, exc_info, extra_metadata";

/// Log store backed by the `log_entries` table of a SQLite database.
pub struct SqliteLogStore {
    pool: SqlitePool,
}

impl SqliteLogStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Open a connection pool as described by `config`.
    pub async fn connect(config: &SqliteConfig) -> StoreResult<Self> {
        let pool = SqlitePoolOptions::new()
            .max_connections(config.max_connections)
            .connect_with(
                SqliteConnectOptions::new()
                    .filename(&config.path)
                    .create_if_missing(config.create_if_missing)
                    .journal_mode(if config.wal_mode {
                        SqliteJournalMode::Wal
                    } else {
                        SqliteJournalMode::Delete
                    })
                    .busy_timeout(Duration::from_millis(config.busy_timeout_ms)),
            )
            .await?;

        Ok(Self::new(pool))
    }

    pub async fn run_migrations(&self) -> StoreResult<()> {
        sqlx::migrate!("./migrations_sqlx/sqlite")
            .run(&self.pool)
            .await?;
        Ok(())
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    /// Append a record. Timestamps are stored with microsecond precision.
    pub async fn insert(&self, record: NewLogRecord) -> StoreResult<LogRecord> {
        let epoch = to_epoch_seconds(record.timestamp);
        let args = record.args.as_ref().map(serde_json::to_string).transpose()?;
        let extra_metadata = record
            .extra_metadata
            .as_ref()
            .map(serde_json::to_string)
            .transpose()?;

        let result = sqlx::query(
            r#"
            INSERT INTO log_entries (
                timestamp, name, level, msg, pathname, lineno, func,
                args, exc_info, extra_metadata
            )
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(epoch)
        .bind(&record.name)
        .bind(record.level.as_str())
        .bind(&record.msg)
        .bind(&record.pathname)
        .bind(record.lineno)
        .bind(&record.func)
        .bind(&args)
        .bind(&record.exc_info)
        .bind(&extra_metadata)
        .execute(&self.pool)
        .await?;

        let mut stored = record.into_record(result.last_insert_rowid());
        stored.timestamp = from_epoch_seconds(epoch).ok_or_else(|| {
            StoreError::InvalidRecord(format!("timestamp {epoch} is out of range"))
        })?;
        Ok(stored)
    }
}

fn record_from_row(row: &SqliteRow) -> StoreResult<LogRecord> {
    let id: i64 = row.try_get("id")?;
    let epoch: f64 = row.try_get("timestamp")?;
    let level: String = row.try_get("level")?;
    let args: Option<String> = row.try_get("args")?;
    let extra_metadata: Option<String> = row.try_get("extra_metadata")?;

    Ok(LogRecord {
        id,
        timestamp: from_epoch_seconds(epoch).ok_or_else(|| {
            StoreError::InvalidRecord(format!("record {id} has timestamp {epoch} out of range"))
        })?,
        name: row.try_get("name")?,
        level: level.parse().map_err(StoreError::InvalidRecord)?,
        msg: row.try_get("msg")?,
        pathname: row.try_get("pathname")?,
        lineno: row.try_get("lineno")?,
        func: row.try_get("func")?,
        args: args.as_deref().map(serde_json::from_str).transpose()?,
        exc_info: row.try_get("exc_info")?,
        extra_metadata: extra_metadata
            .as_deref()
            .map(serde_json::from_str)
            .transpose()?,
    })
}

#[async_trait]
impl LogStore for SqliteLogStore {
    async fn snapshot(&self) -> StoreResult<Box<dyn LogSnapshot>> {
        let mut tx = self.pool.begin().await?;
        // A deferred transaction only pins its snapshot on the first read.
        sqlx::query("SELECT 1 FROM log_entries LIMIT 1")
            .fetch_optional(&mut *tx)
            .await?;
        Ok(Box::new(SqliteSnapshot { tx }))
    }

    async fn delete_by_ids(&self, ids: &[i64]) -> StoreResult<u64> {
        if ids.is_empty() {
            return Ok(0);
        }

        let mut query: QueryBuilder<Sqlite> =
            QueryBuilder::new("DELETE FROM log_entries WHERE id IN (");
        let mut separated = query.separated(", ");
        for id in ids {
            separated.push_bind(*id);
        }
        separated.push_unseparated(")");

        let result = query.build().execute(&self.pool).await?;
        Ok(result.rows_affected())
    }
}

/// A read transaction over `log_entries`. Rolled back on drop.
struct SqliteSnapshot {
    tx: Transaction<'static, Sqlite>,
}

#[async_trait]
impl LogSnapshot for SqliteSnapshot {
    async fn count_older_than(&mut self, cutoff: DateTime<Utc>) -> StoreResult<u64> {
        let row = sqlx::query("SELECT COUNT(*) AS count FROM log_entries WHERE timestamp < ?")
            .bind(to_epoch_seconds(cutoff))
            .fetch_one(&mut *self.tx)
            .await?;
        let count: i64 = row.try_get("count")?;
        Ok(count as u64)
    }

    async fn fetch_older_than(&mut self, cutoff: DateTime<Utc>) -> StoreResult<Vec<LogRecord>> {
        let rows = sqlx::query(&format!(
            "SELECT {RECORD_COLUMNS} FROM log_entries WHERE timestamp < ? ORDER BY timestamp ASC, id ASC"
        ))
        .bind(to_epoch_seconds(cutoff))
        .fetch_all(&mut *self.tx)
        .await?;

        rows.iter().map(record_from_row).collect()
    }

    async fn total_count(&mut self) -> StoreResult<u64> {
        let row = sqlx::query("SELECT COUNT(*) AS count FROM log_entries")
            .fetch_one(&mut *self.tx)
            .await?;
        let count: i64 = row.try_get("count")?;
        Ok(count as u64)
    }

    async fn fetch_oldest(&mut self, n: u64) -> StoreResult<Vec<LogRecord>> {
        let limit = i64::try_from(n).unwrap_or(i64::MAX);
        let rows = sqlx::query(&format!(
            "SELECT {RECORD_COLUMNS} FROM log_entries ORDER BY timestamp ASC, id ASC LIMIT ?"
        ))
        .bind(limit)
        .fetch_all(&mut *self.tx)
        .await?;

        rows.iter().map(record_from_row).collect()
    }

    async fn timestamp_range(&mut self) -> StoreResult<Option<(DateTime<Utc>, DateTime<Utc>)>> {
        let row = sqlx::query(
            "SELECT MIN(timestamp) AS oldest, MAX(timestamp) AS newest FROM log_entries",
        )
        .fetch_one(&mut *self.tx)
        .await?;

        let oldest: Option<f64> = row.try_get("oldest")?;
        let newest: Option<f64> = row.try_get("newest")?;
        Ok(oldest
            .and_then(from_epoch_seconds)
            .zip(newest.and_then(from_epoch_seconds)))
    }
}
