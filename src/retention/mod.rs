//! Log retention engine.
//!
//! Decides, on a schedule and on demand, which stored log records are past
//! their retention policy, exports them if configured, and deletes them while
//! ingestion keeps writing to the store:
//!
//! 1. Time-based retention deletes records older than a configured duration
//! 2. Count-based retention keeps only the newest `max_entries` records
//! 3. Both policies may be enabled; a record selected by both is deleted once
//!
//! Deleted records can be exported to a CSV-in-ZIP archive first. If the
//! export fails, nothing is deleted. Dry runs report what would be deleted
//! without exporting or deleting anything.

pub mod duration;
mod error;
pub mod exporter;
pub mod manager;
pub mod scheduler;
pub mod settings;

pub use duration::{DurationError, DurationErrorKind, RetentionDuration};
pub use error::{RetentionError, RetentionResult};
pub use exporter::{ExportError, RetentionExporter};
pub use manager::{
    CleanupFailure, CleanupResult, CleanupStage, CleanupStatus, RetentionInfo, RetentionManager,
    RetentionStatistics,
};
pub use scheduler::RetentionScheduler;
pub use settings::RetentionConfigStore;
