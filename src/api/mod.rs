pub mod backup_api;

use axum::{
    http::StatusCode,
    response::{IntoResponse, Json, Response},
    routing::{delete, get, post},
    Router,
};
use serde_json::{json, Value};
use std::sync::Arc;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::error;

use crate::backup::{BackupError, BackupManager};
use crate::settings::SettingsStore;

/// Application state for the web API
#[derive(Clone)]
pub struct AppState {
    pub backup_manager: Arc<BackupManager>,
    pub settings_store: Arc<dyn SettingsStore>,
}

/// Create the main API router
pub fn create_api_router(state: AppState) -> Router {
    Router::new()
        // Health check endpoint
        .route("/api/health", get(health_check))
        // Backup API routes
        .route(
            "/api/backups",
            get(backup_api::list_backups).post(backup_api::create_backup),
        )
        .route("/api/backups/prune", post(backup_api::prune_backups))
        .route(
            "/api/backups/schedule",
            get(backup_api::get_schedule).put(backup_api::update_schedule),
        )
        .route("/api/backups/:filename", delete(backup_api::delete_backup))
        .route(
            "/api/backups/:filename/download",
            get(backup_api::download_backup),
        )
        .route(
            "/api/backups/:filename/restore",
            post(backup_api::restore_backup),
        )
        .with_state(state)
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
}

/// Health check endpoint
async fn health_check() -> Json<Value> {
    Json(json!({
        "status": "ok",
        "service": "yarnl-backup",
        "version": env!("CARGO_PKG_VERSION")
    }))
}

/// Maps backup errors onto HTTP responses with an `{"error": ...}` body
#[derive(Debug)]
pub struct ApiError(BackupError);

impl From<BackupError> for ApiError {
    fn from(err: BackupError) -> Self {
        Self(err)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = match &self.0 {
            BackupError::NotFound { .. } => StatusCode::NOT_FOUND,
            BackupError::InvalidArchive { .. } | BackupError::Configuration { .. } => {
                StatusCode::BAD_REQUEST
            }
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        };

        if status.is_server_error() {
            error!("Request failed: {}", self.0);
        }

        (status, Json(json!({ "error": self.0.to_string() }))).into_response()
    }
}
