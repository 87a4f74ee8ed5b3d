//! Configuration module for logtrail.
//!
//! The service is configured via a TOML file, with support for environment
//! variable interpolation using `${VAR_NAME}` syntax. The retention policy
//! itself lives in a separate file (see [`RetentionFileConfig`]) because it
//! is rewritten at runtime.
//!
//! # Example
//!
//! ```toml
//! [server]
//! host = "0.0.0.0"
//! port = 5000
//!
//! [database]
//! type = "sqlite"
//! path = "${LOGTRAIL_DATA_DIR}/logs.db"
//!
//! [retention]
//! policy_path = "retention_config.toml"
//! ```

mod database;
mod observability;
mod retention;
mod server;

use std::path::Path;

pub use database::*;
use once_cell::sync::Lazy;
pub use observability::*;
pub(crate) use retention::PolicyDocument;
pub use retention::{
    CountBasedPolicy, CountBasedUpdate, ExportFormat, ExportPolicy, ExportUpdate,
    MAX_INTERVAL_HOURS, PolicyViolation, RetentionFileConfig, RetentionPolicy,
    RetentionPolicyUpdate, SchedulePolicy, ScheduleUpdate, TimeBasedPolicy, TimeBasedUpdate,
};
use serde::{Deserialize, Serialize};
pub use server::*;

/// Root configuration.
///
/// All sections are optional with sensible defaults, so an empty file (or
/// no file at all) gives a working in-memory setup.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct AppConfig {
    /// HTTP server configuration.
    #[serde(default)]
    pub server: ServerConfig,

    /// Log store configuration.
    #[serde(default)]
    pub database: DatabaseConfig,

    /// Observability configuration (logging, metrics).
    #[serde(default)]
    pub observability: ObservabilityConfig,

    /// Where the retention policy is kept.
    #[serde(default)]
    pub retention: RetentionFileConfig,
}

impl AppConfig {
    /// Load configuration from a TOML file.
    ///
    /// Environment variables in the format `${VAR_NAME}` are expanded.
    /// Missing required variables will cause an error.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path.as_ref())
            .map_err(|e| ConfigError::Io(e, path.as_ref().to_path_buf()))?;

        Self::from_str(&contents)
    }

    /// Like [`from_file`](Self::from_file), but a missing file yields the defaults.
    pub fn from_file_or_default(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        if !path.exists() {
            tracing::info!(path = %path.display(), "Config file not found, using defaults");
            return Ok(Self::default());
        }
        Self::from_file(path)
    }

    /// Parse configuration from a TOML string.
    #[allow(clippy::should_implement_trait)]
    pub fn from_str(contents: &str) -> Result<Self, ConfigError> {
        let expanded = expand_env_vars(contents)?;
        let config: AppConfig = toml::from_str(&expanded)?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        self.database.validate()?;

        if self.server.body_limit_bytes == 0 {
            return Err(ConfigError::Validation(
                "server.body_limit_bytes must be greater than zero".into(),
            ));
        }
        if self.retention.policy_path.as_os_str().is_empty() {
            return Err(ConfigError::Validation(
                "retention.policy_path must not be empty".into(),
            ));
        }

        Ok(())
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read config file {1}: {0}")]
    Io(std::io::Error, std::path::PathBuf),

    #[error("Failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("Environment variable not found: {0}")]
    EnvVarNotFound(String),

    #[error("Configuration validation error: {0}")]
    Validation(String),
}

static ENV_VAR_PATTERN: Lazy<regex::Regex> = Lazy::new(|| {
    regex::Regex::new(r"\$\{([^}]+)\}").unwrap_or_else(|e| panic!("invalid pattern: {e}"))
});

/// Expand `${VAR}` references, leaving anything after a `#` untouched.
fn expand_env_vars(input: &str) -> Result<String, ConfigError> {
    let mut result = String::with_capacity(input.len());

    for line in input.lines() {
        let comment_pos = line.find('#');
        let mut last_end = 0;

        for cap in ENV_VAR_PATTERN.captures_iter(line) {
            let Some(whole) = cap.get(0) else { continue };

            if let Some(pos) = comment_pos
                && whole.start() >= pos
            {
                continue;
            }

            result.push_str(&line[last_end..whole.start()]);

            let var_name = &cap[1];
            let value = std::env::var(var_name)
                .map_err(|_| ConfigError::EnvVarNotFound(var_name.to_string()))?;
            result.push_str(&value);

            last_end = whole.end();
        }

        result.push_str(&line[last_end..]);
        result.push('\n');
    }

    if !input.ends_with('\n') && result.ends_with('\n') {
        result.pop();
    }

    Ok(result)
}
