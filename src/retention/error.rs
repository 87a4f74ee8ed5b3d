use std::path::PathBuf;

use thiserror::Error;

use super::duration::DurationError;
use crate::{config::PolicyViolation, store::StoreError};

#[derive(Debug, Error)]
pub enum RetentionError {
    #[error(transparent)]
    InvalidDuration(#[from] DurationError),

    #[error("Invalid retention setting {field}: {reason}")]
    InvalidConfig { field: String, reason: String },

    #[error("Failed to load retention policy from {path}: {reason}")]
    ConfigLoad { path: PathBuf, reason: String },

    #[error("Retention policy is in effect but could not be saved to {path}: {reason}")]
    ConfigPersist { path: PathBuf, reason: String },

    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    #[error("A retention cleanup is already running")]
    Busy,

    #[error("Deleted {deleted} of {intended} records before the store failed: {reason}")]
    Deletion {
        intended: u64,
        deleted: u64,
        reason: String,
    },

    #[error("Internal error: {0}")]
    Internal(String),
}

impl From<PolicyViolation> for RetentionError {
    fn from(violation: PolicyViolation) -> Self {
        RetentionError::InvalidConfig {
            field: violation.field,
            reason: violation.reason,
        }
    }
}

pub type RetentionResult<T> = Result<T, RetentionError>;
