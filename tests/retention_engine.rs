//! End-to-end retention runs through the public API: policy file on disk,
//! a real store, export archive, deletion.

use std::{io::Read, path::Path, sync::Arc};

use chrono::{Duration, Utc};
use logtrail::{
    config::{CountBasedUpdate, RetentionPolicyUpdate, TimeBasedUpdate},
    retention::{CleanupStatus, RetentionConfigStore, RetentionManager},
    store::{InMemoryLogStore, LogLevel, LogStore, NewLogRecord},
};
use tempfile::TempDir;

fn write_policy(dir: &Path, body: &str) -> std::path::PathBuf {
    let path = dir.join("retention_config.toml");
    std::fs::write(&path, body).unwrap();
    path
}

fn read_archive(path: &Path) -> String {
    let file = std::fs::File::open(path).unwrap();
    let mut archive = zip::ZipArchive::new(file).unwrap();
    assert_eq!(archive.len(), 1);
    let mut entry = archive.by_index(0).unwrap();
    let mut csv = String::new();
    entry.read_to_string(&mut csv).unwrap();
    csv
}

async fn seed(store: &InMemoryLogStore) {
    let now = Utc::now();
    for (age_days, msg) in [(30, "ancient"), (10, "old"), (3, "recent"), (0, "fresh")] {
        store
            .insert(
                NewLogRecord::new(now - Duration::days(age_days), "worker", LogLevel::Info, msg)
                    .with_location("/srv/app/worker.py", 42, "run"),
            )
            .await;
    }
}

#[tokio::test]
async fn test_policy_file_drives_export_and_delete() {
    let dir = TempDir::new().unwrap();
    let exports = dir.path().join("exports");
    let policy_path = write_policy(
        dir.path(),
        &format!(
            r#"
[retention.time_based]
enabled = true
duration = "7d"

[retention.export]
enabled = true
output_directory = "{}"
include_timestamp = false
"#,
            exports.display()
        ),
    );

    let config = Arc::new(RetentionConfigStore::load(&policy_path).unwrap());
    let store = Arc::new(InMemoryLogStore::new());
    seed(&store).await;
    let manager = RetentionManager::new(config.clone(), store.clone());

    let result = manager.cleanup_logs(false).await.unwrap();

    assert_eq!(result.status, CleanupStatus::Completed);
    assert_eq!(result.records_deleted, 2);
    assert_eq!(store.len().await, 2);

    let archive = result.export_file.expect("export file");
    assert_eq!(
        archive.file_name().unwrap().to_string_lossy(),
        "deleted_logs.zip"
    );
    let csv = read_archive(&archive);
    let lines: Vec<&str> = csv.lines().collect();
    assert_eq!(lines.len(), 3);
    assert!(lines[0].starts_with("id,timestamp,datetime,name,level,message"));
    assert!(lines[1].contains("ancient"));
    assert!(lines[2].contains("old"));

    // The run is recorded in the policy file
    assert!(config.get_config().schedule.last_execution.is_some());
    let reloaded = RetentionConfigStore::load(&policy_path).unwrap();
    assert_eq!(
        reloaded.get_config().schedule.last_execution,
        config.get_config().schedule.last_execution
    );
}

#[tokio::test]
async fn test_update_then_cleanup_uses_new_policy() {
    let dir = TempDir::new().unwrap();
    let policy_path = dir.path().join("retention_config.toml");
    let config = Arc::new(RetentionConfigStore::load(&policy_path).unwrap());
    let store = Arc::new(InMemoryLogStore::new());
    seed(&store).await;
    let manager = RetentionManager::new(config.clone(), store.clone());

    config
        .update(&RetentionPolicyUpdate {
            time_based: Some(TimeBasedUpdate {
                enabled: Some(false),
                duration: None,
            }),
            count_based: Some(CountBasedUpdate {
                enabled: Some(true),
                max_entries: Some(1),
            }),
            export: Some(logtrail::config::ExportUpdate {
                enabled: Some(false),
                ..Default::default()
            }),
            schedule: None,
        })
        .await
        .unwrap();
    assert!(policy_path.exists());

    let preview = manager.cleanup_logs(true).await.unwrap();
    assert_eq!(preview.count_based_matches, 3);
    assert_eq!(preview.records_deleted, 0);
    assert_eq!(store.len().await, 4);

    let result = manager.cleanup_logs(false).await.unwrap();
    assert_eq!(result.records_deleted, 3);
    assert!(result.export_file.is_none());

    let mut snapshot = store.snapshot().await.unwrap();
    let remaining = snapshot.fetch_oldest(10).await.unwrap();
    assert_eq!(remaining.len(), 1);
    assert_eq!(remaining[0].msg, "fresh");
}

#[tokio::test]
async fn test_invalid_policy_file_is_rejected() {
    let dir = TempDir::new().unwrap();
    let policy_path = write_policy(
        dir.path(),
        "[retention.time_based]\nduration = \"1w\"\n",
    );

    let err = RetentionConfigStore::load(&policy_path).unwrap_err();
    assert!(err.to_string().contains("time_based.duration"));
}

#[cfg(feature = "database-sqlite")]
mod sqlite {
    use logtrail::store::SqliteLogStore;
    use sqlx::sqlite::SqlitePoolOptions;

    use super::*;

    #[tokio::test]
    async fn test_cleanup_against_sqlite() {
        let dir = TempDir::new().unwrap();
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await
            .unwrap();
        let store = Arc::new(SqliteLogStore::new(pool));
        store.run_migrations().await.unwrap();

        let now = Utc::now();
        for age in [9, 8, 1] {
            store
                .insert(NewLogRecord::new(
                    now - Duration::days(age),
                    "api",
                    LogLevel::Error,
                    format!("{age} days old"),
                ))
                .await
                .unwrap();
        }

        let policy_path = write_policy(
            dir.path(),
            "[retention.export]\nenabled = false\n",
        );
        let config = Arc::new(RetentionConfigStore::load(&policy_path).unwrap());
        let manager = RetentionManager::new(config, store.clone());

        let info = manager.get_retention_info().await.unwrap();
        assert_eq!(info.statistics.total_records, 3);
        assert_eq!(info.statistics.records_to_delete_time_based, 2);

        let result = manager.cleanup_logs(false).await.unwrap();
        assert_eq!(result.records_deleted, 2);

        let mut snapshot = store.snapshot().await.unwrap();
        assert_eq!(snapshot.total_count().await.unwrap(), 1);
    }
}
