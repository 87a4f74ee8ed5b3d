//! Cleanup orchestration.
//!
//! A cleanup takes one policy snapshot and one store snapshot, builds the
//! deletion set as the union of what each enabled policy selects, exports that
//! set if configured, and only then deletes it.
//!
//! Runs are mutually exclusive. Manual callers wait for the run in progress to
//! finish; the scheduler uses [`RetentionManager::try_cleanup_logs`] and skips
//! instead. A real run executes on its own task, so dropping the caller's
//! future neither cancels a half-finished deletion nor releases the lock early.

use std::{collections::BTreeMap, path::PathBuf, sync::Arc, time::Instant};

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::{Mutex, OwnedMutexGuard};
use tracing::{debug, error, info, instrument, warn};

use super::{
    RetentionError, RetentionResult, exporter::RetentionExporter, settings::RetentionConfigStore,
};
use crate::{
    config::RetentionPolicy,
    observability::metrics,
    store::{LogRecord, LogSnapshot, LogStore},
};

/// Ids per `delete_by_ids` call.
const DELETE_BATCH_SIZE: usize = 1000;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CleanupStatus {
    Completed,
    Failed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CleanupStage {
    Export,
    Deletion,
}

/// Why a cleanup ended as [`CleanupStatus::Failed`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CleanupFailure {
    pub stage: CleanupStage,
    pub message: String,
}

/// Outcome of one cleanup invocation.
#[derive(Debug, Clone, Serialize)]
pub struct CleanupResult {
    pub started_at: DateTime<Utc>,
    pub dry_run: bool,
    pub status: CleanupStatus,
    /// Records older than the time-based cutoff.
    pub time_based_matches: u64,
    /// Oldest records beyond the count-based limit.
    pub count_based_matches: u64,
    /// Size of the deduplicated deletion set.
    pub records_matched: u64,
    /// Records the store confirmed deleted. Always 0 for a dry run.
    pub records_deleted: u64,
    pub export_file: Option<PathBuf>,
    pub duration_ms: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<CleanupFailure>,
}

impl CleanupResult {
    fn new(started_at: DateTime<Utc>, dry_run: bool) -> Self {
        Self {
            started_at,
            dry_run,
            status: CleanupStatus::Completed,
            time_based_matches: 0,
            count_based_matches: 0,
            records_matched: 0,
            records_deleted: 0,
            export_file: None,
            duration_ms: 0,
            error: None,
        }
    }

    pub fn is_success(&self) -> bool {
        self.status == CleanupStatus::Completed
    }

    fn finish(mut self, started: Instant) -> Self {
        self.duration_ms = started.elapsed().as_millis() as u64;
        self
    }

    fn fail(mut self, stage: CleanupStage, message: String, started: Instant) -> Self {
        self.status = CleanupStatus::Failed;
        self.error = Some(CleanupFailure { stage, message });
        self.finish(started)
    }
}

/// Policy, store totals, and what a cleanup would delete right now.
#[derive(Debug, Clone, Serialize)]
pub struct RetentionInfo {
    pub policy: RetentionPolicy,
    pub statistics: RetentionStatistics,
}

#[derive(Debug, Clone, Serialize)]
pub struct RetentionStatistics {
    pub total_records: u64,
    pub oldest_record: Option<DateTime<Utc>>,
    pub newest_record: Option<DateTime<Utc>>,
    pub records_to_delete_time_based: u64,
    pub records_to_delete_count_based: u64,
    pub total_records_to_delete: u64,
}

/// The deletion set of one run, keyed and ordered by id.
struct Selection {
    time_based: u64,
    count_based: u64,
    records: BTreeMap<i64, LogRecord>,
}

impl Selection {
    /// Evaluate the enabled policies against one snapshot.
    async fn evaluate(
        snapshot: &mut dyn LogSnapshot,
        policy: &RetentionPolicy,
        now: DateTime<Utc>,
    ) -> RetentionResult<Self> {
        let mut selection = Selection {
            time_based: 0,
            count_based: 0,
            records: BTreeMap::new(),
        };

        if policy.time_based.enabled {
            let cutoff = policy.time_based.cutoff(now);
            let expired = snapshot.fetch_older_than(cutoff).await?;
            selection.time_based = expired.len() as u64;
            debug!(%cutoff, matches = selection.time_based, "Evaluated time-based retention");
            for record in expired {
                selection.records.insert(record.id, record);
            }
        }

        if policy.count_based.enabled {
            let total = snapshot.total_count().await?;
            let excess = total.saturating_sub(policy.count_based.max_entries);
            if excess > 0 {
                let oldest = snapshot.fetch_oldest(excess).await?;
                selection.count_based = oldest.len() as u64;
                for record in oldest {
                    selection.records.entry(record.id).or_insert(record);
                }
            }
            debug!(
                total,
                max_entries = policy.count_based.max_entries,
                matches = selection.count_based,
                "Evaluated count-based retention"
            );
        }

        Ok(selection)
    }

    fn len(&self) -> u64 {
        self.records.len() as u64
    }
}

/// Runs retention cleanups against a log store.
#[derive(Clone)]
pub struct RetentionManager {
    config: Arc<RetentionConfigStore>,
    store: Arc<dyn LogStore>,
    exporter: RetentionExporter,
    run_lock: Arc<Mutex<()>>,
}

impl RetentionManager {
    pub fn new(config: Arc<RetentionConfigStore>, store: Arc<dyn LogStore>) -> Self {
        Self {
            config,
            store,
            exporter: RetentionExporter::new(),
            run_lock: Arc::new(Mutex::new(())),
        }
    }

    pub fn config(&self) -> &Arc<RetentionConfigStore> {
        &self.config
    }

    /// Run a cleanup, waiting for any run in progress to finish first.
    pub async fn cleanup_logs(&self, dry_run: bool) -> RetentionResult<CleanupResult> {
        let guard = Arc::clone(&self.run_lock).lock_owned().await;
        self.run_exclusive(dry_run, guard).await
    }

    /// Run a cleanup unless one is already in progress, in which case
    /// [`RetentionError::Busy`] is returned immediately.
    pub async fn try_cleanup_logs(&self, dry_run: bool) -> RetentionResult<CleanupResult> {
        let guard = Arc::clone(&self.run_lock)
            .try_lock_owned()
            .map_err(|_| RetentionError::Busy)?;
        self.run_exclusive(dry_run, guard).await
    }

    /// Whether a cleanup is running right now.
    pub fn is_running(&self) -> bool {
        self.run_lock.try_lock().is_err()
    }

    #[cfg(test)]
    pub(crate) fn run_lock_for_tests(&self) -> &Arc<Mutex<()>> {
        &self.run_lock
    }

    async fn run_exclusive(
        &self,
        dry_run: bool,
        guard: OwnedMutexGuard<()>,
    ) -> RetentionResult<CleanupResult> {
        if dry_run {
            let result = self.execute(true).await;
            drop(guard);
            return result;
        }

        let manager = self.clone();
        tokio::spawn(async move {
            let _guard = guard;
            manager.execute(false).await
        })
        .await
        .map_err(|e| RetentionError::Internal(format!("cleanup task failed: {e}")))?
    }

    #[instrument(skip(self))]
    async fn execute(&self, dry_run: bool) -> RetentionResult<CleanupResult> {
        let started = Instant::now();
        let started_at = Utc::now();
        let policy = self.config.get_config();
        let mut result = CleanupResult::new(started_at, dry_run);

        if !policy.any_enabled() {
            info!("No retention policies enabled, nothing to clean up");
            return Ok(result.finish(started));
        }

        let selection = {
            let mut snapshot = self.store.snapshot().await?;
            Selection::evaluate(snapshot.as_mut(), &policy, started_at).await?
        };
        result.time_based_matches = selection.time_based;
        result.count_based_matches = selection.count_based;
        result.records_matched = selection.len();

        if selection.records.is_empty() {
            info!(dry_run, "No log records need to be cleaned up");
            metrics::record_retention_run("completed", dry_run);
            return Ok(result.finish(started));
        }

        if dry_run {
            info!(
                time_based = result.time_based_matches,
                count_based = result.count_based_matches,
                total = result.records_matched,
                "Retention cleanup (DRY RUN): records would be deleted"
            );
            metrics::record_retention_run("completed", true);
            return Ok(result.finish(started));
        }

        let ids: Vec<i64> = selection.records.keys().copied().collect();

        if policy.export.enabled {
            let records: Vec<LogRecord> = selection.records.into_values().collect();
            match self
                .exporter
                .export(
                    records,
                    &policy.export.output_directory,
                    policy.export.include_timestamp,
                )
                .await
            {
                Ok(path) => {
                    metrics::record_retention_export(ids.len() as u64);
                    result.export_file = path;
                }
                Err(e) => {
                    error!(error = %e, "Export failed, no records were deleted");
                    metrics::record_retention_run("failed", false);
                    return Ok(result.fail(CleanupStage::Export, e.to_string(), started));
                }
            }
        }

        let (deleted, fault) = self.delete_in_batches(&ids).await;
        result.records_deleted = deleted;
        metrics::record_retention_deletion(deleted);

        if let Some(reason) = fault {
            let err = RetentionError::Deletion {
                intended: ids.len() as u64,
                deleted,
                reason,
            };
            error!(error = %err, "Retention cleanup failed during deletion");
            metrics::record_retention_run("failed", false);
            return Ok(result.fail(CleanupStage::Deletion, err.to_string(), started));
        }

        self.config.record_last_execution(Utc::now()).await;
        metrics::record_retention_run("completed", false);

        let result = result.finish(started);
        info!(
            time_based = result.time_based_matches,
            count_based = result.count_based_matches,
            deleted = result.records_deleted,
            export_file = ?result.export_file,
            duration_ms = result.duration_ms,
            "Retention cleanup complete"
        );
        Ok(result)
    }

    /// Delete `ids` in short batches, stopping at the first store fault.
    ///
    /// Returns how many records the store confirmed deleted, and the fault if
    /// one occurred.
    async fn delete_in_batches(&self, ids: &[i64]) -> (u64, Option<String>) {
        let mut deleted = 0u64;
        for batch in ids.chunks(DELETE_BATCH_SIZE) {
            match self.store.delete_by_ids(batch).await {
                Ok(count) => {
                    if count < batch.len() as u64 {
                        warn!(
                            requested = batch.len(),
                            deleted = count,
                            "Some selected records were already gone"
                        );
                    }
                    deleted += count;
                }
                Err(e) => return (deleted, Some(e.to_string())),
            }
        }
        (deleted, None)
    }

    /// Report the policy and what a cleanup would delete right now.
    ///
    /// Read-only: takes no run lock and never triggers a cleanup. Only counts
    /// are read from the store.
    pub async fn get_retention_info(&self) -> RetentionResult<RetentionInfo> {
        let policy = self.config.get_config();
        let mut snapshot = self.store.snapshot().await?;

        let total_records = snapshot.total_count().await?;
        let range = snapshot.timestamp_range().await?;

        let time_based = if policy.time_based.enabled {
            let cutoff = policy.time_based.cutoff(Utc::now());
            snapshot.count_older_than(cutoff).await?
        } else {
            0
        };
        let count_based = if policy.count_based.enabled {
            total_records.saturating_sub(policy.count_based.max_entries)
        } else {
            0
        };

        Ok(RetentionInfo {
            policy: RetentionPolicy::clone(&policy),
            statistics: RetentionStatistics {
                total_records,
                oldest_record: range.map(|(oldest, _)| oldest),
                newest_record: range.map(|(_, newest)| newest),
                records_to_delete_time_based: time_based,
                records_to_delete_count_based: count_based,
                // Both selections are prefixes of the (timestamp, id) order
                total_records_to_delete: time_based.max(count_based),
            },
        })
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use async_trait::async_trait;
    use chrono::Duration;
    use tempfile::TempDir;
    use tokio::sync::Notify;

    use super::*;
    use crate::{
        retention::duration::RetentionDuration,
        store::{InMemoryLogStore, LogLevel, NewLogRecord, StoreError, StoreResult},
    };

    struct Harness {
        manager: RetentionManager,
        store: Arc<InMemoryLogStore>,
        dir: TempDir,
    }

    impl Harness {
        fn export_dir(&self) -> PathBuf {
            self.dir.path().join("exports")
        }

        fn exported_files(&self) -> Vec<PathBuf> {
            match std::fs::read_dir(self.export_dir()) {
                Ok(entries) => entries.map(|e| e.unwrap().path()).collect(),
                Err(_) => vec![],
            }
        }
    }

    fn time_only(duration: RetentionDuration) -> RetentionPolicy {
        let mut policy = RetentionPolicy::default();
        policy.time_based.enabled = true;
        policy.time_based.duration = duration;
        policy.count_based.enabled = false;
        policy.export.enabled = false;
        policy
    }

    fn count_only(max_entries: u64) -> RetentionPolicy {
        let mut policy = RetentionPolicy::default();
        policy.time_based.enabled = false;
        policy.count_based.enabled = true;
        policy.count_based.max_entries = max_entries;
        policy.export.enabled = false;
        policy
    }

    fn harness_with_store(mut policy: RetentionPolicy, store: Arc<dyn LogStore>) -> (RetentionManager, TempDir) {
        let dir = TempDir::new().unwrap();
        policy.export.output_directory = dir.path().join("exports");
        let config = Arc::new(RetentionConfigStore::with_policy(
            dir.path().join("retention_config.toml"),
            policy,
        ));
        (RetentionManager::new(config, store), dir)
    }

    fn harness(policy: RetentionPolicy) -> Harness {
        let store = Arc::new(InMemoryLogStore::new());
        let (manager, dir) = harness_with_store(policy, store.clone());
        Harness {
            manager,
            store,
            dir,
        }
    }

    async fn insert_aged(store: &InMemoryLogStore, age: Duration) -> LogRecord {
        store
            .insert(NewLogRecord::new(
                Utc::now() - age,
                "app",
                LogLevel::Info,
                format!("aged {}s", age.num_seconds()),
            ))
            .await
    }

    #[tokio::test]
    async fn test_time_based_deletes_only_expired_records() {
        let h = harness(time_only(RetentionDuration::days(7)));
        let old = insert_aged(&h.store, Duration::days(10)).await;
        let recent = insert_aged(&h.store, Duration::days(5)).await;
        let fresh = insert_aged(&h.store, Duration::days(1)).await;

        let result = h.manager.cleanup_logs(false).await.unwrap();

        assert_eq!(result.status, CleanupStatus::Completed);
        assert_eq!(result.time_based_matches, 1);
        assert_eq!(result.records_deleted, 1);
        assert_eq!(h.store.ids().await, vec![recent.id, fresh.id]);
        assert!(!h.store.ids().await.contains(&old.id));
    }

    #[tokio::test]
    async fn test_count_based_keeps_newest() {
        let h = harness(count_only(10));
        let mut inserted = vec![];
        for minutes in (1..=12).rev() {
            inserted.push(insert_aged(&h.store, Duration::minutes(minutes)).await);
        }

        let result = h.manager.cleanup_logs(false).await.unwrap();

        assert_eq!(result.count_based_matches, 2);
        assert_eq!(result.records_deleted, 2);
        let remaining = h.store.ids().await;
        assert_eq!(remaining.len(), 10);
        assert!(!remaining.contains(&inserted[0].id));
        assert!(!remaining.contains(&inserted[1].id));
    }

    #[tokio::test]
    async fn test_max_entries_zero_deletes_everything() {
        let h = harness(count_only(0));
        for minutes in 1..=3 {
            insert_aged(&h.store, Duration::minutes(minutes)).await;
        }

        let result = h.manager.cleanup_logs(false).await.unwrap();

        assert_eq!(result.records_deleted, 3);
        assert!(h.store.is_empty().await);
    }

    #[tokio::test]
    async fn test_overlapping_policies_count_each_record_once() {
        let mut policy = time_only(RetentionDuration::days(7));
        policy.count_based.enabled = true;
        policy.count_based.max_entries = 2;
        let h = harness(policy);

        // Two expired records, which are also the two oldest beyond the limit.
        insert_aged(&h.store, Duration::days(20)).await;
        insert_aged(&h.store, Duration::days(10)).await;
        insert_aged(&h.store, Duration::days(2)).await;
        insert_aged(&h.store, Duration::days(1)).await;

        let result = h.manager.cleanup_logs(false).await.unwrap();

        assert_eq!(result.time_based_matches, 2);
        assert_eq!(result.count_based_matches, 2);
        assert_eq!(result.records_matched, 2);
        assert_eq!(result.records_deleted, 2);
        assert_eq!(h.store.len().await, 2);
    }

    #[tokio::test]
    async fn test_no_enabled_policies_is_a_no_op() {
        let mut policy = time_only(RetentionDuration::days(1));
        policy.time_based.enabled = false;
        let h = harness(policy);
        insert_aged(&h.store, Duration::days(30)).await;

        let result = h.manager.cleanup_logs(false).await.unwrap();

        assert!(result.is_success());
        assert_eq!(result.records_matched, 0);
        assert_eq!(h.store.len().await, 1);
    }

    #[tokio::test]
    async fn test_dry_run_changes_nothing() {
        let mut policy = time_only(RetentionDuration::days(1));
        policy.export.enabled = true;
        let h = harness(policy);
        insert_aged(&h.store, Duration::days(3)).await;
        insert_aged(&h.store, Duration::days(2)).await;

        let result = h.manager.cleanup_logs(true).await.unwrap();

        assert!(result.dry_run);
        assert_eq!(result.records_matched, 2);
        assert_eq!(result.records_deleted, 0);
        assert!(result.export_file.is_none());
        assert_eq!(h.store.len().await, 2);
        assert!(h.exported_files().is_empty());
        assert!(h.manager.config().get_config().schedule.last_execution.is_none());
    }

    #[tokio::test]
    async fn test_export_is_written_before_deletion() {
        let mut policy = time_only(RetentionDuration::hours(1));
        policy.export.enabled = true;
        policy.export.include_timestamp = false;
        let h = harness(policy);
        let b = insert_aged(&h.store, Duration::hours(3)).await;
        let a = insert_aged(&h.store, Duration::hours(5)).await;
        insert_aged(&h.store, Duration::minutes(5)).await;

        let result = h.manager.cleanup_logs(false).await.unwrap();

        let path = result.export_file.clone().unwrap();
        assert_eq!(path, h.export_dir().join("deleted_logs.zip"));
        let mut archive = zip::ZipArchive::new(std::fs::File::open(&path).unwrap()).unwrap();
        let mut contents = String::new();
        std::io::Read::read_to_string(&mut archive.by_index(0).unwrap(), &mut contents).unwrap();
        let ids: Vec<i64> = csv::Reader::from_reader(contents.as_bytes())
            .records()
            .map(|r| r.unwrap()[0].parse().unwrap())
            .collect();
        // Sorted by id, regardless of age.
        assert_eq!(ids, vec![b.id, a.id]);
        assert_eq!(result.records_deleted, 2);
        assert_eq!(h.store.len().await, 1);
    }

    #[tokio::test]
    async fn test_export_failure_deletes_nothing() {
        let mut policy = time_only(RetentionDuration::hours(1));
        policy.export.enabled = true;
        let h = harness(policy);
        std::fs::write(h.export_dir(), b"a file where the directory should be").unwrap();
        insert_aged(&h.store, Duration::hours(2)).await;

        let result = h.manager.cleanup_logs(false).await.unwrap();

        assert_eq!(result.status, CleanupStatus::Failed);
        assert_eq!(result.error.as_ref().unwrap().stage, CleanupStage::Export);
        assert_eq!(result.records_matched, 1);
        assert_eq!(result.records_deleted, 0);
        assert_eq!(h.store.len().await, 1);
        assert!(h.manager.config().get_config().schedule.last_execution.is_none());
    }

    #[tokio::test]
    async fn test_nothing_to_delete_writes_no_export() {
        let mut policy = time_only(RetentionDuration::days(7));
        policy.export.enabled = true;
        let h = harness(policy);
        insert_aged(&h.store, Duration::hours(1)).await;

        let result = h.manager.cleanup_logs(false).await.unwrap();

        assert!(result.is_success());
        assert!(result.export_file.is_none());
        assert!(h.exported_files().is_empty());
    }

    #[tokio::test]
    async fn test_successful_run_records_last_execution() {
        let h = harness(time_only(RetentionDuration::hours(1)));
        insert_aged(&h.store, Duration::hours(2)).await;
        let before = Utc::now();

        h.manager.cleanup_logs(false).await.unwrap();

        let last = h.manager.config().get_config().schedule.last_execution.unwrap();
        assert!(last >= before);
    }

    /// Fails every delete after the first `ok_batches`.
    struct FlakyStore {
        inner: InMemoryLogStore,
        ok_batches: usize,
        calls: AtomicUsize,
    }

    #[async_trait]
    impl LogStore for FlakyStore {
        async fn snapshot(&self) -> StoreResult<Box<dyn LogSnapshot>> {
            self.inner.snapshot().await
        }

        async fn delete_by_ids(&self, ids: &[i64]) -> StoreResult<u64> {
            if self.calls.fetch_add(1, Ordering::SeqCst) >= self.ok_batches {
                return Err(StoreError::Unavailable("disk I/O error".into()));
            }
            self.inner.delete_by_ids(ids).await
        }
    }

    #[tokio::test]
    async fn test_deletion_fault_reports_confirmed_count() {
        let store = Arc::new(FlakyStore {
            inner: InMemoryLogStore::new(),
            ok_batches: 1,
            calls: AtomicUsize::new(0),
        });
        for minutes in 0..1500 {
            insert_aged(&store.inner, Duration::minutes(120 + minutes)).await;
        }
        let (manager, _dir) = harness_with_store(time_only(RetentionDuration::hours(1)), store.clone());

        let result = manager.cleanup_logs(false).await.unwrap();

        assert_eq!(result.status, CleanupStatus::Failed);
        assert_eq!(result.records_matched, 1500);
        assert_eq!(result.records_deleted, 1000);
        let failure = result.error.unwrap();
        assert_eq!(failure.stage, CleanupStage::Deletion);
        assert!(failure.message.contains("1000 of 1500"));
        assert_eq!(store.inner.len().await, 500);
        assert!(manager.config().get_config().schedule.last_execution.is_none());
    }

    /// Tracks how many deletes overlap, and can hold deletes until released.
    struct GatedStore {
        inner: InMemoryLogStore,
        in_flight: AtomicUsize,
        max_in_flight: AtomicUsize,
        entered: Notify,
        release: Notify,
        gated: bool,
    }

    impl GatedStore {
        fn new(gated: bool) -> Self {
            Self {
                inner: InMemoryLogStore::new(),
                in_flight: AtomicUsize::new(0),
                max_in_flight: AtomicUsize::new(0),
                entered: Notify::new(),
                release: Notify::new(),
                gated,
            }
        }
    }

    #[async_trait]
    impl LogStore for GatedStore {
        async fn snapshot(&self) -> StoreResult<Box<dyn LogSnapshot>> {
            self.inner.snapshot().await
        }

        async fn delete_by_ids(&self, ids: &[i64]) -> StoreResult<u64> {
            let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
            self.max_in_flight.fetch_max(now, Ordering::SeqCst);
            self.entered.notify_one();
            if self.gated {
                self.release.notified().await;
            } else {
                tokio::task::yield_now().await;
            }
            let result = self.inner.delete_by_ids(ids).await;
            self.in_flight.fetch_sub(1, Ordering::SeqCst);
            result
        }
    }

    #[tokio::test]
    async fn test_concurrent_manual_runs_are_serialized() {
        let store = Arc::new(GatedStore::new(false));
        for hours in 2..6 {
            insert_aged(&store.inner, Duration::hours(hours)).await;
        }
        let (manager, _dir) = harness_with_store(time_only(RetentionDuration::hours(1)), store.clone());

        let (first, second) = tokio::join!(manager.cleanup_logs(false), manager.cleanup_logs(false));
        let first = first.unwrap();
        let second = second.unwrap();

        assert_eq!(store.max_in_flight.load(Ordering::SeqCst), 1);
        assert_eq!(first.records_deleted + second.records_deleted, 4);
        assert!(store.inner.is_empty().await);
    }

    #[tokio::test]
    async fn test_try_cleanup_is_busy_while_a_run_is_in_progress() {
        let store = Arc::new(GatedStore::new(true));
        insert_aged(&store.inner, Duration::hours(2)).await;
        let (manager, _dir) = harness_with_store(time_only(RetentionDuration::hours(1)), store.clone());

        let running = tokio::spawn({
            let manager = manager.clone();
            async move { manager.cleanup_logs(false).await }
        });
        store.entered.notified().await;

        assert!(manager.is_running());
        assert!(matches!(
            manager.try_cleanup_logs(false).await,
            Err(RetentionError::Busy)
        ));

        store.release.notify_one();
        let result = running.await.unwrap().unwrap();
        assert_eq!(result.records_deleted, 1);
        assert!(!manager.is_running());
    }

    #[tokio::test]
    async fn test_dropped_caller_does_not_abort_a_real_run() {
        let store = Arc::new(GatedStore::new(true));
        insert_aged(&store.inner, Duration::hours(2)).await;
        let (manager, _dir) = harness_with_store(time_only(RetentionDuration::hours(1)), store.clone());

        let caller = tokio::spawn({
            let manager = manager.clone();
            async move { manager.cleanup_logs(false).await }
        });
        store.entered.notified().await;
        caller.abort();

        // The detached run still holds the lock until its delete finishes.
        assert!(manager.is_running());
        store.release.notify_one();

        let result = manager.cleanup_logs(false).await.unwrap();
        assert_eq!(result.records_matched, 0);
        assert!(store.inner.is_empty().await);
    }

    /// Serves counts but refuses to hand out records.
    struct CountOnlyStore {
        inner: InMemoryLogStore,
    }

    struct CountOnlySnapshot(Box<dyn LogSnapshot>);

    #[async_trait]
    impl LogStore for CountOnlyStore {
        async fn snapshot(&self) -> StoreResult<Box<dyn LogSnapshot>> {
            Ok(Box::new(CountOnlySnapshot(self.inner.snapshot().await?)))
        }

        async fn delete_by_ids(&self, ids: &[i64]) -> StoreResult<u64> {
            self.inner.delete_by_ids(ids).await
        }
    }

    #[async_trait]
    impl LogSnapshot for CountOnlySnapshot {
        async fn count_older_than(&mut self, cutoff: DateTime<Utc>) -> StoreResult<u64> {
            self.0.count_older_than(cutoff).await
        }

        async fn fetch_older_than(&mut self, _cutoff: DateTime<Utc>) -> StoreResult<Vec<LogRecord>> {
            Err(StoreError::Unavailable("records fetched for statistics".into()))
        }

        async fn total_count(&mut self) -> StoreResult<u64> {
            self.0.total_count().await
        }

        async fn fetch_oldest(&mut self, _n: u64) -> StoreResult<Vec<LogRecord>> {
            Err(StoreError::Unavailable("records fetched for statistics".into()))
        }

        async fn timestamp_range(
            &mut self,
        ) -> StoreResult<Option<(DateTime<Utc>, DateTime<Utc>)>> {
            self.0.timestamp_range().await
        }
    }

    #[tokio::test]
    async fn test_retention_info_reads_counts_only() {
        let store = Arc::new(CountOnlyStore {
            inner: InMemoryLogStore::new(),
        });
        for days in [30, 10, 3, 2, 1] {
            insert_aged(&store.inner, Duration::days(days)).await;
        }
        let mut policy = time_only(RetentionDuration::days(7));
        policy.count_based.enabled = true;
        policy.count_based.max_entries = 1;
        let (manager, _dir) = harness_with_store(policy, store.clone());

        let info = manager.get_retention_info().await.unwrap();

        assert_eq!(info.statistics.total_records, 5);
        assert_eq!(info.statistics.records_to_delete_time_based, 2);
        assert_eq!(info.statistics.records_to_delete_count_based, 4);
        assert_eq!(info.statistics.total_records_to_delete, 4);
        assert_eq!(store.inner.len().await, 5);
    }

    #[tokio::test]
    async fn test_retention_info_projects_without_deleting() {
        let mut policy = time_only(RetentionDuration::days(7));
        policy.count_based.enabled = true;
        policy.count_based.max_entries = 3;
        let h = harness(policy);
        let oldest = insert_aged(&h.store, Duration::days(30)).await;
        insert_aged(&h.store, Duration::days(10)).await;
        insert_aged(&h.store, Duration::days(3)).await;
        insert_aged(&h.store, Duration::days(2)).await;
        let newest = insert_aged(&h.store, Duration::days(1)).await;

        let info = h.manager.get_retention_info().await.unwrap();

        assert_eq!(info.statistics.total_records, 5);
        assert_eq!(info.statistics.oldest_record, Some(oldest.timestamp));
        assert_eq!(info.statistics.newest_record, Some(newest.timestamp));
        assert_eq!(info.statistics.records_to_delete_time_based, 2);
        assert_eq!(info.statistics.records_to_delete_count_based, 2);
        assert_eq!(info.statistics.total_records_to_delete, 2);
        assert_eq!(info.policy.count_based.max_entries, 3);
        assert_eq!(h.store.len().await, 5);
    }
}
