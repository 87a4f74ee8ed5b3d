//! Background scheduling of retention cleanups.
//!
//! One scheduler runs per process. It optionally cleans up once at startup,
//! then every `schedule.interval_hours`. The interval is re-read whenever the
//! policy changes, so a new interval takes effect without a restart. A tick
//! that finds a cleanup already in progress is skipped, not queued.

use std::time::Duration;

use tokio::{
    task::JoinHandle,
    time::{Instant, MissedTickBehavior},
};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

use super::{
    RetentionError,
    manager::{CleanupResult, RetentionManager},
};
use crate::observability::metrics;

const SECONDS_PER_HOUR: u64 = 3600;

pub struct RetentionScheduler {
    manager: RetentionManager,
    shutdown: CancellationToken,
}

impl RetentionScheduler {
    pub fn new(manager: RetentionManager) -> Self {
        Self {
            manager,
            shutdown: CancellationToken::new(),
        }
    }

    /// Stop the scheduler when `token` is cancelled.
    pub fn with_shutdown(mut self, token: CancellationToken) -> Self {
        self.shutdown = token;
        self
    }

    /// Run the scheduler as a background task.
    pub fn spawn(self) -> JoinHandle<()> {
        tokio::spawn(self.run())
    }

    /// Run until shutdown is requested.
    pub async fn run(self) {
        let mut policy_rx = self.manager.config().subscribe();
        let policy = policy_rx.borrow_and_update().clone();

        info!(
            on_startup = policy.schedule.on_startup,
            interval_hours = policy.schedule.interval_hours,
            "Starting retention scheduler"
        );

        if policy.schedule.on_startup {
            self.trigger("startup").await;
        }

        loop {
            let interval_hours = policy_rx.borrow_and_update().schedule.interval_hours;

            if interval_hours == 0 {
                debug!("Periodic retention disabled, waiting for a policy change");
                tokio::select! {
                    _ = self.shutdown.cancelled() => break,
                    changed = policy_rx.changed() => {
                        if changed.is_err() {
                            break;
                        }
                        continue;
                    }
                }
            }

            let period = Duration::from_secs(interval_hours.saturating_mul(SECONDS_PER_HOUR));
            let Some(first_tick) = Instant::now().checked_add(period) else {
                error!(interval_hours, "Retention interval is too large to schedule");
                break;
            };
            let mut ticker = tokio::time::interval_at(first_tick, period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
            info!(interval_hours, "Scheduled periodic retention cleanup");

            loop {
                tokio::select! {
                    _ = self.shutdown.cancelled() => {
                        info!("Retention scheduler stopped");
                        return;
                    }
                    _ = ticker.tick() => {
                        self.trigger("interval").await;
                    }
                    changed = policy_rx.changed() => {
                        if changed.is_err() {
                            return;
                        }
                        let current = policy_rx.borrow_and_update().schedule.interval_hours;
                        if current != interval_hours {
                            info!(
                                from = interval_hours,
                                to = current,
                                "Retention interval changed"
                            );
                            break;
                        }
                    }
                }
            }
        }

        info!("Retention scheduler stopped");
    }

    /// Run one scheduled cleanup. Failures are logged and counted, never
    /// propagated.
    async fn trigger(&self, reason: &'static str) -> Option<CleanupResult> {
        match self.manager.try_cleanup_logs(false).await {
            Ok(result) => {
                if result.is_success() {
                    debug!(
                        trigger = reason,
                        deleted = result.records_deleted,
                        "Scheduled retention cleanup finished"
                    );
                } else {
                    error!(
                        trigger = reason,
                        error = ?result.error,
                        "Scheduled retention cleanup failed"
                    );
                }
                Some(result)
            }
            Err(RetentionError::Busy) => {
                info!(
                    trigger = reason,
                    "Skipping scheduled retention cleanup, another cleanup is running"
                );
                metrics::record_retention_run("skipped", false);
                None
            }
            Err(e) => {
                error!(trigger = reason, error = %e, "Scheduled retention cleanup failed");
                metrics::record_retention_run("error", false);
                None
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use chrono::{Duration as ChronoDuration, Utc};
    use tempfile::TempDir;

    use super::*;
    use crate::{
        config::{ExportUpdate, RetentionPolicy, RetentionPolicyUpdate, ScheduleUpdate},
        retention::{duration::RetentionDuration, settings::RetentionConfigStore},
        store::{InMemoryLogStore, LogLevel, NewLogRecord},
    };

    fn policy(on_startup: bool, interval_hours: u64) -> RetentionPolicy {
        let mut policy = RetentionPolicy::default();
        policy.time_based.duration = RetentionDuration::minutes(1);
        policy.export.enabled = false;
        policy.schedule.on_startup = on_startup;
        policy.schedule.interval_hours = interval_hours;
        policy
    }

    fn setup(policy: RetentionPolicy) -> (RetentionManager, Arc<InMemoryLogStore>, TempDir) {
        let dir = TempDir::new().unwrap();
        let config = Arc::new(RetentionConfigStore::with_policy(
            dir.path().join("retention_config.toml"),
            policy,
        ));
        let store = Arc::new(InMemoryLogStore::new());
        (RetentionManager::new(config, store.clone()), store, dir)
    }

    async fn insert_expired(store: &InMemoryLogStore) {
        store
            .insert(NewLogRecord::new(
                Utc::now() - ChronoDuration::days(1),
                "app",
                LogLevel::Info,
                "expired",
            ))
            .await;
    }

    /// Let spawned work run without moving the paused clock far.
    async fn wait_until_empty(store: &InMemoryLogStore) -> bool {
        for _ in 0..200 {
            if store.is_empty().await {
                return true;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        false
    }

    #[tokio::test(start_paused = true)]
    async fn test_startup_run() {
        let (manager, store, _dir) = setup(policy(true, 0));
        insert_expired(&store).await;

        let token = CancellationToken::new();
        let handle = RetentionScheduler::new(manager)
            .with_shutdown(token.clone())
            .spawn();

        assert!(wait_until_empty(&store).await);
        token.cancel();
        handle.await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_no_startup_run_when_disabled() {
        let (manager, store, _dir) = setup(policy(false, 0));
        insert_expired(&store).await;

        let token = CancellationToken::new();
        let handle = RetentionScheduler::new(manager)
            .with_shutdown(token.clone())
            .spawn();

        tokio::time::sleep(Duration::from_secs(60)).await;
        assert_eq!(store.len().await, 1);
        token.cancel();
        handle.await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_interval_runs() {
        let (manager, store, _dir) = setup(policy(false, 1));

        let token = CancellationToken::new();
        let handle = RetentionScheduler::new(manager)
            .with_shutdown(token.clone())
            .spawn();
        tokio::task::yield_now().await;
        insert_expired(&store).await;

        tokio::time::sleep(Duration::from_secs(30 * 60)).await;
        assert_eq!(store.len().await, 1, "no run before the first interval");

        tokio::time::sleep(Duration::from_secs(31 * 60)).await;
        assert!(wait_until_empty(&store).await);

        insert_expired(&store).await;
        tokio::time::sleep(Duration::from_secs(SECONDS_PER_HOUR)).await;
        assert!(wait_until_empty(&store).await);

        token.cancel();
        handle.await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_interval_change_takes_effect_without_restart() {
        let (manager, store, _dir) = setup(policy(false, 0));
        let config = Arc::clone(manager.config());

        let token = CancellationToken::new();
        let handle = RetentionScheduler::new(manager)
            .with_shutdown(token.clone())
            .spawn();
        tokio::task::yield_now().await;
        insert_expired(&store).await;

        tokio::time::sleep(Duration::from_secs(10 * SECONDS_PER_HOUR)).await;
        assert_eq!(store.len().await, 1, "periodic runs are disabled");

        let _ = config
            .update(&RetentionPolicyUpdate {
                schedule: Some(ScheduleUpdate {
                    interval_hours: Some(2),
                    ..Default::default()
                }),
                ..Default::default()
            })
            .await;

        tokio::time::sleep(Duration::from_secs(2 * SECONDS_PER_HOUR + 60)).await;
        assert!(wait_until_empty(&store).await);

        token.cancel();
        handle.await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_busy_tick_is_skipped() {
        let (manager, store, _dir) = setup(policy(false, 0));
        insert_expired(&store).await;

        // Hold the run lock the way a manual cleanup would.
        let guard = Arc::clone(manager.run_lock_for_tests()).lock_owned().await;
        let scheduler = RetentionScheduler::new(manager.clone());
        assert!(scheduler.trigger("interval").await.is_none());
        assert_eq!(store.len().await, 1);

        drop(guard);
        let result = scheduler.trigger("interval").await.unwrap();
        assert_eq!(result.records_deleted, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_failed_run_does_not_stop_the_schedule() {
        let dir = TempDir::new().unwrap();
        let blocker = dir.path().join("blocker");
        std::fs::write(&blocker, b"not a directory").unwrap();
        let mut scheduled = policy(true, 1);
        scheduled.export.enabled = true;
        scheduled.export.output_directory = blocker.join("exports");
        let (manager, store, _policy_dir) = setup(scheduled);
        let config = Arc::clone(manager.config());
        insert_expired(&store).await;

        let token = CancellationToken::new();
        let handle = RetentionScheduler::new(manager)
            .with_shutdown(token.clone())
            .spawn();

        // The startup run fails on export and keeps the record
        tokio::time::sleep(Duration::from_secs(60)).await;
        assert_eq!(store.len().await, 1);
        assert!(!handle.is_finished());

        let exports = dir.path().join("exports");
        config
            .update(&RetentionPolicyUpdate {
                export: Some(ExportUpdate {
                    output_directory: Some(exports.clone()),
                    ..Default::default()
                }),
                ..Default::default()
            })
            .await
            .unwrap();

        tokio::time::sleep(Duration::from_secs(SECONDS_PER_HOUR)).await;
        assert!(wait_until_empty(&store).await);
        assert_eq!(std::fs::read_dir(&exports).unwrap().count(), 1);

        token.cancel();
        handle.await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_shutdown_stops_scheduler() {
        let (manager, _store, _dir) = setup(policy(false, 24));

        let token = CancellationToken::new();
        let handle = RetentionScheduler::new(manager)
            .with_shutdown(token.clone())
            .spawn();
        tokio::task::yield_now().await;

        token.cancel();
        tokio::time::timeout(Duration::from_secs(1), handle)
            .await
            .expect("scheduler did not stop")
            .unwrap();
    }
}
