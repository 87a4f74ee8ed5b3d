//! HTTP control surface.

pub mod error;
pub mod health;
pub mod retention;

use std::sync::Arc;

use axum::{Router, routing::get};

pub use error::{ApiError, ErrorResponse};

use crate::{retention::RetentionManager, store::LogStore};

/// Shared state handed to every handler.
#[derive(Clone)]
pub struct AppState {
    pub retention: RetentionManager,
    pub store: Arc<dyn LogStore>,
}

impl AppState {
    pub fn new(retention: RetentionManager, store: Arc<dyn LogStore>) -> Self {
        Self { retention, store }
    }
}

/// Build the application router (without transport layers).
pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health::health_check))
        .route("/health/live", get(health::liveness))
        .route("/metrics", get(health::metrics))
        .nest("/api/retention", retention::router())
        .with_state(state)
}
