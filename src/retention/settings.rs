//! The live retention policy and its backing file.
//!
//! Readers get an `Arc` snapshot of the current policy without touching the
//! filesystem. Writers validate first, swap the cached policy, then persist it.
//! Swaps are broadcast over a watch channel so the scheduler can pick up a new
//! interval without a restart.

use std::{
    io::{self, Write},
    path::{Path, PathBuf},
    sync::Arc,
};

use chrono::{DateTime, Utc};
use tokio::sync::{Mutex, watch};
use tracing::{debug, info, warn};

use super::{RetentionError, RetentionResult};
use crate::config::{PolicyDocument, RetentionPolicy, RetentionPolicyUpdate};

#[derive(Debug)]
pub struct RetentionConfigStore {
    path: PathBuf,
    current: watch::Sender<Arc<RetentionPolicy>>,
    /// Serializes read-modify-write cycles and file writes.
    write_lock: Mutex<()>,
}

impl RetentionConfigStore {
    /// Load the policy from `path`, falling back to defaults if the file
    /// does not exist.
    pub fn load(path: impl Into<PathBuf>) -> RetentionResult<Self> {
        let path = path.into();
        let policy = match std::fs::read_to_string(&path) {
            Ok(text) => parse_policy(&text, &path)?,
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                info!(path = %path.display(), "No retention policy file found, using defaults");
                RetentionPolicy::default()
            }
            Err(e) => {
                return Err(RetentionError::ConfigLoad {
                    path,
                    reason: e.to_string(),
                });
            }
        };
        Ok(Self::with_policy(path, policy))
    }

    /// Start from `policy` without reading `path`. Saves still go to `path`.
    pub fn with_policy(path: impl Into<PathBuf>, policy: RetentionPolicy) -> Self {
        let (current, _) = watch::channel(Arc::new(policy));
        Self {
            path: path.into(),
            current,
            write_lock: Mutex::new(()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// The policy currently in effect.
    pub fn get_config(&self) -> Arc<RetentionPolicy> {
        Arc::clone(&self.current.borrow())
    }

    /// Observe policy swaps.
    pub fn subscribe(&self) -> watch::Receiver<Arc<RetentionPolicy>> {
        self.current.subscribe()
    }

    /// Re-read the backing file and make it the policy in effect.
    ///
    /// On a read or validation failure the current policy is kept.
    pub async fn reload(&self) -> RetentionResult<Arc<RetentionPolicy>> {
        let _guard = self.write_lock.lock().await;
        let policy = match tokio::fs::read_to_string(&self.path).await {
            Ok(text) => parse_policy(&text, &self.path)?,
            Err(e) if e.kind() == io::ErrorKind::NotFound => RetentionPolicy::default(),
            Err(e) => {
                return Err(RetentionError::ConfigLoad {
                    path: self.path.clone(),
                    reason: e.to_string(),
                });
            }
        };

        let policy = Arc::new(policy);
        self.current.send_replace(Arc::clone(&policy));
        info!(path = %self.path.display(), "Reloaded retention policy");
        Ok(policy)
    }

    /// Replace the whole policy.
    ///
    /// An invalid policy is rejected and the current one stays in effect. A
    /// valid policy takes effect immediately; if writing the file then fails
    /// the error is [`RetentionError::ConfigPersist`] and the new policy stays
    /// in effect anyway.
    pub async fn save_config(
        &self,
        policy: RetentionPolicy,
    ) -> RetentionResult<Arc<RetentionPolicy>> {
        policy.validate()?;
        let _guard = self.write_lock.lock().await;
        self.install(policy).await
    }

    /// Merge a partial update into the current policy and save the result.
    pub async fn update(
        &self,
        update: &RetentionPolicyUpdate,
    ) -> RetentionResult<Arc<RetentionPolicy>> {
        let _guard = self.write_lock.lock().await;
        let merged = self.get_config().merged(update)?;
        self.install(merged).await
    }

    /// Record when the last real cleanup finished.
    pub async fn record_last_execution(&self, at: DateTime<Utc>) {
        let _guard = self.write_lock.lock().await;
        let mut policy = RetentionPolicy::clone(&self.get_config());
        policy.schedule.last_execution = Some(at);
        if let Err(e) = self.install(policy).await {
            warn!(error = %e, "Failed to persist retention last execution time");
        }
    }

    /// Swap then persist. Callers hold `write_lock`.
    async fn install(&self, policy: RetentionPolicy) -> RetentionResult<Arc<RetentionPolicy>> {
        let policy = Arc::new(policy);
        self.current.send_replace(Arc::clone(&policy));
        self.persist(&policy).await?;
        debug!(path = %self.path.display(), "Saved retention policy");
        Ok(policy)
    }

    async fn persist(&self, policy: &RetentionPolicy) -> RetentionResult<()> {
        let persist_err = |reason: String| RetentionError::ConfigPersist {
            path: self.path.clone(),
            reason,
        };

        let text = toml::to_string_pretty(&PolicyDocument {
            retention: Some(policy),
        })
        .map_err(|e| persist_err(e.to_string()))?;

        let path = self.path.clone();
        tokio::task::spawn_blocking(move || write_policy_file(&path, text.as_bytes()))
            .await
            .map_err(|e| persist_err(format!("write task failed: {e}")))?
            .map_err(|e| persist_err(e.to_string()))
    }
}

/// Write `contents` to a temp file beside `path`, fsync it, then rename it
/// over `path`. The temp file is removed on any failure.
fn write_policy_file(path: &Path, contents: &[u8]) -> io::Result<()> {
    let directory = match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent,
        _ => Path::new("."),
    };
    let mut temp = tempfile::Builder::new()
        .prefix(".retention_config")
        .suffix(".toml.tmp")
        .tempfile_in(directory)?;
    temp.write_all(contents)?;
    temp.as_file().sync_all()?;
    temp.persist(path).map_err(|e| e.error)?;
    Ok(())
}

fn parse_policy(text: &str, path: &Path) -> RetentionResult<RetentionPolicy> {
    let document: PolicyDocument<RetentionPolicyUpdate> =
        toml::from_str(text).map_err(|e| RetentionError::ConfigLoad {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })?;
    let update = document.retention.unwrap_or_default();
    Ok(RetentionPolicy::default().merged(&update)?)
}
