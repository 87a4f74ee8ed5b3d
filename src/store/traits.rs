use std::{fmt, str::FromStr};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::StoreResult;

/// Severity of a log record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum LogLevel {
    Debug,
    Info,
    Warning,
    Error,
    Critical,
}

impl LogLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            LogLevel::Debug => "DEBUG",
            LogLevel::Info => "INFO",
            LogLevel::Warning => "WARNING",
            LogLevel::Error => "ERROR",
            LogLevel::Critical => "CRITICAL",
        }
    }
}

impl fmt::Display for LogLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for LogLevel {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "DEBUG" => Ok(LogLevel::Debug),
            "INFO" => Ok(LogLevel::Info),
            "WARNING" => Ok(LogLevel::Warning),
            "ERROR" => Ok(LogLevel::Error),
            "CRITICAL" => Ok(LogLevel::Critical),
            other => Err(format!("unknown log level '{other}'")),
        }
    }
}

/// A stored log record.
///
/// Records are immutable once written. The retention engine only reads and
/// deletes them.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LogRecord {
    /// Unique, increasing by insertion order.
    pub id: i64,
    pub timestamp: DateTime<Utc>,
    /// Logger name.
    pub name: String,
    pub level: LogLevel,
    pub msg: String,
    pub pathname: Option<String>,
    pub lineno: Option<i64>,
    pub func: Option<String>,
    pub args: Option<serde_json::Value>,
    pub exc_info: Option<String>,
    pub extra_metadata: Option<serde_json::Value>,
}

impl LogRecord {
    /// Unix timestamp in fractional seconds, microsecond precision.
    pub fn epoch_seconds(&self) -> f64 {
        to_epoch_seconds(self.timestamp)
    }
}

pub(crate) fn to_epoch_seconds(ts: DateTime<Utc>) -> f64 {
    ts.timestamp_micros() as f64 / 1_000_000.0
}

pub(crate) fn from_epoch_seconds(secs: f64) -> Option<DateTime<Utc>> {
    DateTime::from_timestamp_micros((secs * 1_000_000.0).round() as i64)
}

/// A record to be written. The store assigns the id.
#[derive(Debug, Clone, PartialEq)]
pub struct NewLogRecord {
    pub timestamp: DateTime<Utc>,
    pub name: String,
    pub level: LogLevel,
    pub msg: String,
    pub pathname: Option<String>,
    pub lineno: Option<i64>,
    pub func: Option<String>,
    pub args: Option<serde_json::Value>,
    pub exc_info: Option<String>,
    pub extra_metadata: Option<serde_json::Value>,
}

impl NewLogRecord {
    pub fn new(
        timestamp: DateTime<Utc>,
        name: impl Into<String>,
        level: LogLevel,
        msg: impl Into<String>,
    ) -> Self {
        Self {
            timestamp,
            name: name.into(),
            level,
            msg: msg.into(),
            pathname: None,
            lineno: None,
            func: None,
            args: None,
            exc_info: None,
            extra_metadata: None,
        }
    }

    pub fn with_location(
        mut self,
        pathname: impl Into<String>,
        lineno: i64,
        func: impl Into<String>,
    ) -> Self {
        self.pathname = Some(pathname.into());
        self.lineno = Some(lineno);
        self.func = Some(func.into());
        self
    }

    pub fn with_args(mut self, args: serde_json::Value) -> Self {
        self.args = Some(args);
        self
    }

    pub fn with_exc_info(mut self, exc_info: impl Into<String>) -> Self {
        self.exc_info = Some(exc_info.into());
        self
    }

    pub fn with_extra_metadata(mut self, metadata: serde_json::Value) -> Self {
        self.extra_metadata = Some(metadata);
        self
    }

    pub(crate) fn into_record(self, id: i64) -> LogRecord {
        LogRecord {
            id,
            timestamp: self.timestamp,
            name: self.name,
            level: self.level,
            msg: self.msg,
            pathname: self.pathname,
            lineno: self.lineno,
            func: self.func,
            args: self.args,
            exc_info: self.exc_info,
            extra_metadata: self.extra_metadata,
        }
    }
}

/// Storage backend for log records, as seen by the retention engine.
///
/// Ingestion keeps writing while the engine runs. Reads that must agree with
/// each other go through a [`LogSnapshot`].
#[async_trait]
pub trait LogStore: Send + Sync {
    /// Open a consistent read view of the store.
    async fn snapshot(&self) -> StoreResult<Box<dyn LogSnapshot>>;

    /// Delete the records with the given ids and return how many were removed.
    ///
    /// Ids that no longer exist are ignored. Callers keep batches short so a
    /// single call never holds the store's write path for long.
    async fn delete_by_ids(&self, ids: &[i64]) -> StoreResult<u64>;
}

/// A point-in-time view of a [`LogStore`].
///
/// Records written after the view was opened are not visible through it.
#[async_trait]
pub trait LogSnapshot: Send {
    /// Number of records with `timestamp < cutoff`.
    async fn count_older_than(&mut self, cutoff: DateTime<Utc>) -> StoreResult<u64>;

    /// Records with `timestamp < cutoff`, oldest first.
    async fn fetch_older_than(&mut self, cutoff: DateTime<Utc>) -> StoreResult<Vec<LogRecord>>;

    async fn total_count(&mut self) -> StoreResult<u64>;

    /// The `n` oldest records ordered by timestamp, then id.
    async fn fetch_oldest(&mut self, n: u64) -> StoreResult<Vec<LogRecord>>;

    /// Timestamps of the oldest and newest records, if any.
    async fn timestamp_range(&mut self) -> StoreResult<Option<(DateTime<Utc>, DateTime<Utc>)>>;
}
