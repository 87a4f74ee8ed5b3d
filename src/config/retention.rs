//! Data retention configuration.
//!
//! Two things live here: where the retention policy file is kept (part of the
//! application config), and the policy itself, which is loaded from and saved
//! to that file at runtime.
//!
//! # Example policy file
//!
//! ```toml
//! [retention.time_based]
//! enabled = true
//! duration = "7d"
//!
//! [retention.count_based]
//! enabled = false
//! max_entries = 10000
//!
//! [retention.export]
//! enabled = true
//! format = "csv_zip"
//! output_directory = "exports"
//! include_timestamp = true
//!
//! [retention.schedule]
//! on_startup = true
//! interval_hours = 24
//! ```

use std::path::PathBuf;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::retention::duration::RetentionDuration;

/// Largest accepted scheduling interval (ten years).
pub const MAX_INTERVAL_HOURS: u64 = 24 * 365 * 10;

/// Application-level retention settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RetentionFileConfig {
    /// Path of the TOML file the retention policy is loaded from and saved to.
    /// Default: `retention_config.toml`
    #[serde(default = "default_policy_path")]
    pub policy_path: PathBuf,
}

impl Default for RetentionFileConfig {
    fn default() -> Self {
        Self {
            policy_path: default_policy_path(),
        }
    }
}

fn default_policy_path() -> PathBuf {
    PathBuf::from("retention_config.toml")
}

/// A policy field that failed validation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PolicyViolation {
    /// Dotted path of the field, e.g. `time_based.duration`.
    pub field: String,
    pub reason: String,
}

impl PolicyViolation {
    fn new(field: &str, reason: impl Into<String>) -> Self {
        Self {
            field: field.to_string(),
            reason: reason.into(),
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Policy
// ─────────────────────────────────────────────────────────────────────────────

/// The process-wide retention policy.
///
/// The deletion set of a cleanup is the union of what each enabled policy
/// selects. Having no policy enabled is valid and makes cleanup a no-op.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RetentionPolicy {
    #[serde(default)]
    pub time_based: TimeBasedPolicy,

    #[serde(default)]
    pub count_based: CountBasedPolicy,

    #[serde(default)]
    pub export: ExportPolicy,

    #[serde(default)]
    pub schedule: SchedulePolicy,
}

/// Delete records older than a fixed window.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct TimeBasedPolicy {
    /// Default: true
    pub enabled: bool,

    /// Records with a timestamp older than `now - duration` are candidates.
    /// Default: 7d
    pub duration: RetentionDuration,
}

impl Default for TimeBasedPolicy {
    fn default() -> Self {
        Self {
            enabled: true,
            duration: RetentionDuration::days(7),
        }
    }
}

impl TimeBasedPolicy {
    /// The instant before which records are expired, relative to `now`.
    pub fn cutoff(&self, now: DateTime<Utc>) -> DateTime<Utc> {
        now.checked_sub_signed(self.duration.to_chrono())
            .unwrap_or(DateTime::<Utc>::MIN_UTC)
    }
}

/// Keep at most `max_entries` records, deleting the oldest beyond that.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct CountBasedPolicy {
    /// Default: false
    pub enabled: bool,

    /// Zero means every record is a candidate.
    /// Default: 10000
    pub max_entries: u64,
}

impl Default for CountBasedPolicy {
    fn default() -> Self {
        Self {
            enabled: false,
            max_entries: 10_000,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExportFormat {
    /// CSV inside a deflated ZIP archive.
    #[default]
    CsvZip,
}

impl ExportFormat {
    pub fn as_str(&self) -> &'static str {
        match self {
            ExportFormat::CsvZip => "csv_zip",
        }
    }
}

impl std::str::FromStr for ExportFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "csv_zip" => Ok(ExportFormat::CsvZip),
            other => Err(format!("unsupported export format '{other}' (expected 'csv_zip')")),
        }
    }
}

/// Export deleted records before they are removed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ExportPolicy {
    /// Default: true
    pub enabled: bool,

    /// Default: csv_zip
    pub format: ExportFormat,

    /// Created on first export if missing.
    /// Default: exports
    pub output_directory: PathBuf,

    /// Stamp archive names with the run time instead of using a fixed name.
    /// Default: true
    pub include_timestamp: bool,
}

impl Default for ExportPolicy {
    fn default() -> Self {
        Self {
            enabled: true,
            format: ExportFormat::CsvZip,
            output_directory: PathBuf::from("exports"),
            include_timestamp: true,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SchedulePolicy {
    /// Run one cleanup when the process starts.
    /// Default: true
    pub on_startup: bool,

    /// Hours between periodic cleanups. 0 disables periodic runs.
    /// Default: 24
    pub interval_hours: u64,

    /// When the last non-dry-run cleanup finished successfully.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_execution: Option<DateTime<Utc>>,
}

impl Default for SchedulePolicy {
    fn default() -> Self {
        Self {
            on_startup: true,
            interval_hours: 24,
            last_execution: None,
        }
    }
}

impl RetentionPolicy {
    pub fn any_enabled(&self) -> bool {
        self.time_based.enabled || self.count_based.enabled
    }

    /// Check every field, returning the first violation.
    pub fn validate(&self) -> Result<(), PolicyViolation> {
        if self.time_based.enabled && self.time_based.duration.is_zero() {
            return Err(PolicyViolation::new(
                "time_based.duration",
                "duration must be greater than zero",
            ));
        }
        if self.export.output_directory.as_os_str().is_empty() {
            return Err(PolicyViolation::new(
                "export.output_directory",
                "output directory must not be empty",
            ));
        }
        if self.schedule.interval_hours > MAX_INTERVAL_HOURS {
            return Err(PolicyViolation::new(
                "schedule.interval_hours",
                format!("interval must be at most {MAX_INTERVAL_HOURS} hours"),
            ));
        }
        Ok(())
    }

    /// Merge a partial update into a copy of this policy.
    ///
    /// Fields absent from the update keep their current values. Values arrive
    /// untyped (strings, signed integers) so that every bad field is reported
    /// with its name rather than as a deserialization failure.
    pub fn merged(&self, update: &RetentionPolicyUpdate) -> Result<Self, PolicyViolation> {
        let mut policy = self.clone();

        if let Some(time_based) = &update.time_based {
            if let Some(enabled) = time_based.enabled {
                policy.time_based.enabled = enabled;
            }
            if let Some(duration) = &time_based.duration {
                policy.time_based.duration = RetentionDuration::parse(duration)
                    .map_err(|e| PolicyViolation::new("time_based.duration", e.to_string()))?;
            }
        }

        if let Some(count_based) = &update.count_based {
            if let Some(enabled) = count_based.enabled {
                policy.count_based.enabled = enabled;
            }
            if let Some(max_entries) = count_based.max_entries {
                policy.count_based.max_entries = u64::try_from(max_entries).map_err(|_| {
                    PolicyViolation::new("count_based.max_entries", "must not be negative")
                })?;
            }
        }

        if let Some(export) = &update.export {
            if let Some(enabled) = export.enabled {
                policy.export.enabled = enabled;
            }
            if let Some(format) = &export.format {
                policy.export.format = format
                    .parse()
                    .map_err(|reason: String| PolicyViolation::new("export.format", reason))?;
            }
            if let Some(output_directory) = &export.output_directory {
                policy.export.output_directory = output_directory.clone();
            }
            if let Some(include_timestamp) = export.include_timestamp {
                policy.export.include_timestamp = include_timestamp;
            }
        }

        if let Some(schedule) = &update.schedule {
            if let Some(on_startup) = schedule.on_startup {
                policy.schedule.on_startup = on_startup;
            }
            if let Some(interval_hours) = schedule.interval_hours {
                policy.schedule.interval_hours = u64::try_from(interval_hours).map_err(|_| {
                    PolicyViolation::new("schedule.interval_hours", "must not be negative")
                })?;
            }
            if let Some(last_execution) = schedule.last_execution {
                policy.schedule.last_execution = Some(last_execution);
            }
        }

        policy.validate()?;
        Ok(policy)
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Partial updates
// ─────────────────────────────────────────────────────────────────────────────

/// A partial policy, as sent by `PUT /api/retention/settings` or read from the
/// policy file. Every field is optional.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RetentionPolicyUpdate {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub time_based: Option<TimeBasedUpdate>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub count_based: Option<CountBasedUpdate>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub export: Option<ExportUpdate>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub schedule: Option<ScheduleUpdate>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct TimeBasedUpdate {
    #[serde(default)]
    pub enabled: Option<bool>,
    #[serde(default)]
    pub duration: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct CountBasedUpdate {
    #[serde(default)]
    pub enabled: Option<bool>,
    #[serde(default)]
    pub max_entries: Option<i64>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ExportUpdate {
    #[serde(default)]
    pub enabled: Option<bool>,
    #[serde(default)]
    pub format: Option<String>,
    #[serde(default)]
    pub output_directory: Option<PathBuf>,
    #[serde(default)]
    pub include_timestamp: Option<bool>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ScheduleUpdate {
    #[serde(default)]
    pub on_startup: Option<bool>,
    #[serde(default)]
    pub interval_hours: Option<i64>,
    /// Normally written by the engine after a successful cleanup.
    #[serde(default)]
    pub last_execution: Option<DateTime<Utc>>,
}

/// On-disk layout of the policy file: a single `[retention]` table.
#[derive(Debug, Default, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub(crate) struct PolicyDocument<T> {
    #[serde(default)]
    pub retention: Option<T>,
}
