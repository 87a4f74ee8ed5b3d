//! Export of records selected for deletion.
//!
//! Records are written as CSV inside a single-member ZIP archive. The archive
//! is assembled in a temporary file next to its destination, synced, and then
//! moved into place without replacing anything already there. A failed export
//! leaves no partial archive behind.

use std::{
    io::{self, Write},
    path::{Path, PathBuf},
};

use chrono::{DateTime, SecondsFormat, Utc};
use csv::Writer;
use thiserror::Error;
use tracing::{debug, info, instrument};
use zip::{CompressionMethod, ZipWriter, write::SimpleFileOptions};

use crate::store::LogRecord;

/// Base name shared by every export archive.
pub const EXPORT_FILE_PREFIX: &str = "deleted_logs";

#[derive(Debug, Error)]
pub enum ExportError {
    #[error("Failed to create export directory {path}: {source}")]
    CreateDirectory {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("Export file {0} already exists")]
    AlreadyExists(PathBuf),

    #[error("Failed to write export file {path}: {reason}")]
    Write { path: PathBuf, reason: String },

    #[error("Failed to encode records as CSV: {0}")]
    Csv(String),

    #[error("Export task failed: {0}")]
    Task(String),
}

pub type ExportResult<T> = Result<T, ExportError>;

/// Writes CSV-in-ZIP archives of log records.
#[derive(Debug, Clone, Default)]
pub struct RetentionExporter;

impl RetentionExporter {
    pub fn new() -> Self {
        Self
    }

    /// Export `records` to an archive in `output_directory`.
    ///
    /// Returns `Ok(None)` without touching the filesystem when there is
    /// nothing to export. Rows keep the order of `records`.
    #[instrument(skip(self, records), fields(records = records.len()))]
    pub async fn export(
        &self,
        records: Vec<LogRecord>,
        output_directory: &Path,
        include_timestamp: bool,
    ) -> ExportResult<Option<PathBuf>> {
        if records.is_empty() {
            debug!("No records to export");
            return Ok(None);
        }

        let directory = output_directory.to_path_buf();
        let generated_at = Utc::now();
        let count = records.len();

        let path = tokio::task::spawn_blocking(move || {
            write_archive(&records, &directory, include_timestamp, generated_at)
        })
        .await
        .map_err(|e| ExportError::Task(e.to_string()))??;

        info!(path = %path.display(), records = count, "Exported records before deletion");
        Ok(Some(path))
    }
}

/// Archive base name, without extension.
pub fn archive_base_name(include_timestamp: bool, generated_at: DateTime<Utc>) -> String {
    if include_timestamp {
        format!(
            "{EXPORT_FILE_PREFIX}_{}",
            generated_at.format("%Y%m%d_%H%M%S")
        )
    } else {
        EXPORT_FILE_PREFIX.to_string()
    }
}

/// One CSV row. Field names become the header.
#[derive(serde::Serialize)]
struct ExportRow<'a> {
    id: i64,
    timestamp: f64,
    datetime: String,
    name: &'a str,
    level: &'static str,
    message: &'a str,
    pathname: Option<&'a str>,
    lineno: Option<i64>,
    function: Option<&'a str>,
    args: Option<String>,
    exc_info: Option<&'a str>,
    extra_metadata: Option<String>,
}

impl<'a> ExportRow<'a> {
    fn from_record(record: &'a LogRecord) -> Self {
        Self {
            id: record.id,
            timestamp: record.epoch_seconds(),
            datetime: record
                .timestamp
                .to_rfc3339_opts(SecondsFormat::Micros, true),
            name: &record.name,
            level: record.level.as_str(),
            message: &record.msg,
            pathname: record.pathname.as_deref(),
            lineno: record.lineno,
            function: record.func.as_deref(),
            args: record.args.as_ref().map(|v| v.to_string()),
            exc_info: record.exc_info.as_deref(),
            extra_metadata: record.extra_metadata.as_ref().map(|v| v.to_string()),
        }
    }
}

/// Render records as CSV with a header row.
pub fn render_csv(records: &[LogRecord]) -> ExportResult<Vec<u8>> {
    let mut writer = Writer::from_writer(vec![]);
    for record in records {
        writer
            .serialize(ExportRow::from_record(record))
            .map_err(|e| ExportError::Csv(e.to_string()))?;
    }
    writer
        .into_inner()
        .map_err(|e| ExportError::Csv(e.to_string()))
}

fn write_archive(
    records: &[LogRecord],
    directory: &Path,
    include_timestamp: bool,
    generated_at: DateTime<Utc>,
) -> ExportResult<PathBuf> {
    std::fs::create_dir_all(directory).map_err(|source| ExportError::CreateDirectory {
        path: directory.to_path_buf(),
        source,
    })?;

    let base = archive_base_name(include_timestamp, generated_at);
    let path = directory.join(format!("{base}.zip"));
    if path.exists() {
        return Err(ExportError::AlreadyExists(path));
    }

    let csv = render_csv(records)?;
    let write_err = |reason: String| ExportError::Write {
        path: path.clone(),
        reason,
    };

    let mut temp = tempfile::Builder::new()
        .prefix(".deleted_logs")
        .suffix(".zip.tmp")
        .tempfile_in(directory)
        .map_err(|e| write_err(e.to_string()))?;

    {
        let mut zip = ZipWriter::new(temp.as_file_mut());
        let options = SimpleFileOptions::default().compression_method(CompressionMethod::Deflated);
        zip.start_file(format!("{base}.csv"), options)
            .map_err(|e| write_err(e.to_string()))?;
        zip.write_all(&csv).map_err(|e| write_err(e.to_string()))?;
        zip.finish().map_err(|e| write_err(e.to_string()))?;
    }
    temp.as_file()
        .sync_all()
        .map_err(|e| write_err(e.to_string()))?;

    // The temp file is removed if persisting fails.
    temp.persist_noclobber(&path).map_err(|e| {
        if e.error.kind() == io::ErrorKind::AlreadyExists {
            ExportError::AlreadyExists(path.clone())
        } else {
            write_err(e.error.to_string())
        }
    })?;

    Ok(path)
}
