//! Retention control endpoints, mounted under `/api/retention`.

use axum::{
    Json, Router,
    extract::{State, rejection::JsonRejection},
    http::StatusCode,
    response::IntoResponse,
    routing::{get, post},
};
use serde::{Deserialize, Serialize};

use super::{AppState, error::ApiError};
use crate::{
    config::{RetentionPolicy, RetentionPolicyUpdate},
    retention::{CleanupResult, RetentionDuration, RetentionError, RetentionInfo},
};

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/settings", get(get_settings).put(update_settings))
        .route("/cleanup", post(cleanup))
        .route("/preview", get(preview))
        .route("/validate-duration", post(validate_duration))
}

/// Current policy plus store statistics.
#[tracing::instrument(name = "retention.settings.get", skip(state))]
pub async fn get_settings(
    State(state): State<AppState>,
) -> Result<Json<RetentionInfo>, ApiError> {
    Ok(Json(state.retention.get_retention_info().await?))
}

#[derive(Debug, Serialize)]
pub struct SettingsUpdateResponse {
    pub policy: RetentionPolicy,
    /// Set when the policy is in effect but could not be written to disk.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub warning: Option<String>,
}

/// Apply a partial or full policy update.
///
/// Omitted fields keep their current values. The whole update is rejected if
/// any field is invalid.
#[tracing::instrument(name = "retention.settings.update", skip(state, payload))]
pub async fn update_settings(
    State(state): State<AppState>,
    payload: Result<Json<RetentionPolicyUpdate>, JsonRejection>,
) -> Result<Json<SettingsUpdateResponse>, ApiError> {
    let Json(update) = payload?;
    let config = state.retention.config();

    match config.update(&update).await {
        Ok(policy) => Ok(Json(SettingsUpdateResponse {
            policy: RetentionPolicy::clone(&policy),
            warning: None,
        })),
        Err(err @ RetentionError::ConfigPersist { .. }) => {
            tracing::warn!(error = %err, "Retention policy updated but not persisted");
            Ok(Json(SettingsUpdateResponse {
                policy: RetentionPolicy::clone(&config.get_config()),
                warning: Some(err.to_string()),
            }))
        }
        Err(err) => Err(err.into()),
    }
}

#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct CleanupRequest {
    #[serde(default)]
    pub dry_run: bool,
}

/// Run a cleanup now. Waits for any run already in progress.
#[tracing::instrument(name = "retention.cleanup", skip(state, payload))]
pub async fn cleanup(
    State(state): State<AppState>,
    payload: Result<Json<CleanupRequest>, JsonRejection>,
) -> Result<impl IntoResponse, ApiError> {
    let Json(request) = payload?;
    let result = state.retention.cleanup_logs(request.dry_run).await?;
    Ok(cleanup_response(result))
}

/// What a cleanup would delete right now. Nothing is exported or deleted.
#[tracing::instrument(name = "retention.preview", skip(state))]
pub async fn preview(State(state): State<AppState>) -> Result<impl IntoResponse, ApiError> {
    let result = state.retention.cleanup_logs(true).await?;
    Ok(cleanup_response(result))
}

fn cleanup_response(result: CleanupResult) -> (StatusCode, Json<CleanupResult>) {
    let status = if result.is_success() {
        StatusCode::OK
    } else {
        StatusCode::INTERNAL_SERVER_ERROR
    };
    (status, Json(result))
}

#[derive(Debug, Deserialize)]
pub struct ValidateDurationRequest {
    pub duration: String,
}

/// Per-unit breakdown of a parsed duration.
#[derive(Debug, Serialize)]
pub struct DurationComponents {
    pub days: u32,
    pub hours: u32,
    pub minutes: u32,
}

impl From<&RetentionDuration> for DurationComponents {
    fn from(duration: &RetentionDuration) -> Self {
        Self {
            days: duration.day_component(),
            hours: duration.hour_component(),
            minutes: duration.minute_component(),
        }
    }
}

#[derive(Debug, Serialize)]
pub struct ValidateDurationResponse {
    pub valid: bool,
    /// Canonical form of the input, e.g. `"2d12h"`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub parsed: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub components: Option<DurationComponents>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub seconds: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub human_readable: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Check a duration string without changing any settings.
#[tracing::instrument(name = "retention.validate_duration", skip(payload))]
pub async fn validate_duration(
    payload: Result<Json<ValidateDurationRequest>, JsonRejection>,
) -> Result<impl IntoResponse, ApiError> {
    let Json(request) = payload?;

    let response = match RetentionDuration::parse(&request.duration) {
        Ok(duration) => (
            StatusCode::OK,
            Json(ValidateDurationResponse {
                valid: true,
                parsed: Some(duration.to_string()),
                components: Some(DurationComponents::from(&duration)),
                seconds: Some(duration.total_seconds()),
                human_readable: Some(duration.human_readable()),
                error: None,
            }),
        ),
        Err(e) => (
            StatusCode::BAD_REQUEST,
            Json(ValidateDurationResponse {
                valid: false,
                parsed: None,
                components: None,
                seconds: None,
                human_readable: None,
                error: Some(e.to_string()),
            }),
        ),
    };

    Ok(response)
}
