use axum::{
    body::{Body, Bytes},
    extract::{Path, State},
    http::{header, StatusCode},
    response::{IntoResponse, Json},
};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tokio_util::io::ReaderStream;

use super::{ApiError, AppState};
use crate::backup::{BackupArchive, BackupError, BackupOptions, PruneMode, PrunePolicy};
use crate::settings::{self, merge_with_defaults, BackupScheduleSettings};

#[derive(Debug, Deserialize)]
pub struct PruneRequest {
    pub mode: PruneMode,
    pub value: u32,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PruneResponse {
    pub deleted_count: usize,
    pub deleted: Vec<String>,
    pub failed: Vec<String>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RestoreResponse {
    pub message: String,
    pub client_settings: Option<Value>,
    pub warning: Option<String>,
}

/// List backup archives, newest first
pub async fn list_backups(
    State(state): State<AppState>,
) -> Result<Json<Vec<BackupArchive>>, ApiError> {
    Ok(Json(state.backup_manager.list_backups().await?))
}

/// Create a backup now. An empty body means default options.
pub async fn create_backup(
    State(state): State<AppState>,
    body: Bytes,
) -> Result<(StatusCode, Json<BackupArchive>), ApiError> {
    let options = parse_backup_options(&body)?;
    let archive = state.backup_manager.create_backup(options).await?;
    Ok((StatusCode::CREATED, Json(archive)))
}

fn parse_backup_options(body: &[u8]) -> Result<BackupOptions, BackupError> {
    if body.iter().all(u8::is_ascii_whitespace) {
        return Ok(BackupOptions::default());
    }
    serde_json::from_slice(body).map_err(|e| BackupError::Configuration {
        message: format!("invalid backup options: {e}"),
    })
}

pub async fn delete_backup(
    State(state): State<AppState>,
    Path(filename): Path<String>,
) -> Result<Json<Value>, ApiError> {
    state.backup_manager.delete_backup(&filename).await?;
    Ok(Json(json!({ "deleted": filename })))
}

/// Stream an archive back as a zip attachment
pub async fn download_backup(
    State(state): State<AppState>,
    Path(filename): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    let path = state.backup_manager.backup_path(&filename).await?;
    let file = tokio::fs::File::open(&path)
        .await
        .map_err(|e| BackupError::io_failure(&path, e))?;
    let size = file
        .metadata()
        .await
        .map_err(|e| BackupError::io_failure(&path, e))?
        .len();

    Ok((
        [
            (header::CONTENT_TYPE, "application/zip".to_string()),
            (header::CONTENT_LENGTH, size.to_string()),
            (
                header::CONTENT_DISPOSITION,
                format!("attachment; filename=\"{filename}\""),
            ),
        ],
        Body::from_stream(ReaderStream::new(file)),
    ))
}

pub async fn restore_backup(
    State(state): State<AppState>,
    Path(filename): Path<String>,
) -> Result<Json<RestoreResponse>, ApiError> {
    let outcome = state.backup_manager.restore_backup(&filename).await?;
    let message = match outcome.file_sync_warning {
        Some(_) => "Database restored; some files could not be restored".to_string(),
        None => "Backup restored".to_string(),
    };
    Ok(Json(RestoreResponse {
        message,
        client_settings: outcome.client_settings,
        warning: outcome.file_sync_warning,
    }))
}

pub async fn prune_backups(
    State(state): State<AppState>,
    Json(request): Json<PruneRequest>,
) -> Result<Json<PruneResponse>, ApiError> {
    let report = state
        .backup_manager
        .prune_backups(PrunePolicy::new(request.mode, request.value))
        .await?;
    Ok(Json(PruneResponse {
        deleted_count: report.deleted_count(),
        deleted: report.deleted,
        failed: report.failed,
    }))
}

pub async fn get_schedule(
    State(state): State<AppState>,
) -> Result<Json<BackupScheduleSettings>, ApiError> {
    let schedule: BackupScheduleSettings = settings::load(state.settings_store.as_ref()).await?;
    Ok(Json(schedule))
}

/// Replace the schedule. `lastBackup` is kept unless the body sets it.
pub async fn update_schedule(
    State(state): State<AppState>,
    Json(body): Json<Value>,
) -> Result<Json<BackupScheduleSettings>, ApiError> {
    let current: BackupScheduleSettings = settings::load(state.settings_store.as_ref()).await?;
    let mut schedule: BackupScheduleSettings = merge_with_defaults(&body);
    if body.get("lastBackup").is_none() {
        schedule.last_backup = current.last_backup;
    }

    settings::save(state.settings_store.as_ref(), &schedule).await?;
    Ok(Json(schedule))
}

#[cfg(test)]
mod tests {
    use super::super::create_api_router;
    use super::*;
    use crate::backup::{BackupManager, MockLibraryRepository, StorageRoots};
    use crate::settings::InMemorySettingsStore;
    use axum::body::{to_bytes, Body};
    use axum::http::{Method, Request};
    use axum::Router;
    use chrono::{TimeZone, Utc};
    use std::sync::Arc;
    use tempfile::TempDir;
    use tower::ServiceExt;

    async fn app() -> (TempDir, Arc<InMemorySettingsStore>, Router) {
        let dir = TempDir::new().unwrap();
        let roots = StorageRoots {
            patterns_dir: dir.path().join("patterns"),
            images_dir: dir.path().join("images"),
            archive_dir: dir.path().join("archive"),
            backups_dir: dir.path().join("backups"),
        };
        let manager = Arc::new(BackupManager::new(
            Arc::new(MockLibraryRepository::with_tables(
                crate::backup::repository::sample_tables(),
            )),
            roots,
        ));
        manager.initialize().await.unwrap();
        let store = Arc::new(InMemorySettingsStore::new());
        let router = create_api_router(AppState {
            backup_manager: manager,
            settings_store: store.clone(),
        });
        (dir, store, router)
    }

    async fn send(router: &Router, method: Method, uri: &str, body: Option<Value>) -> (StatusCode, Value) {
        let mut builder = Request::builder().method(method).uri(uri);
        let body = match body {
            Some(value) => {
                builder = builder.header(header::CONTENT_TYPE, "application/json");
                Body::from(value.to_string())
            }
            None => Body::empty(),
        };
        let response = router
            .clone()
            .oneshot(builder.body(body).unwrap())
            .await
            .unwrap();
        let status = response.status();
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let value = serde_json::from_slice(&bytes).unwrap_or(Value::Null);
        (status, value)
    }

    #[tokio::test]
    async fn test_create_then_list() {
        let (_dir, _store, router) = app().await;

        let (status, created) = send(&router, Method::POST, "/api/backups", Some(json!({}))).await;
        assert_eq!(status, StatusCode::CREATED);
        let filename = created["filename"].as_str().unwrap().to_string();

        let (status, listed) = send(&router, Method::GET, "/api/backups", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(listed[0]["filename"], filename.as_str());
    }

    #[tokio::test]
    async fn test_create_rejects_malformed_options() {
        let (dir, _store, router) = app().await;

        let (status, body) = send(
            &router,
            Method::POST,
            "/api/backups",
            Some(json!({"includePatterns": "yes"})),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert!(body["error"].as_str().unwrap().contains("invalid backup options"));

        let written = std::fs::read_dir(dir.path().join("backups")).unwrap().count();
        assert_eq!(written, 0);

        let (status, _) = send(&router, Method::POST, "/api/backups", None).await;
        assert_eq!(status, StatusCode::CREATED);
    }

    #[tokio::test]
    async fn test_download_streams_archive() {
        let (dir, _store, router) = app().await;
        let (_, created) = send(&router, Method::POST, "/api/backups", None).await;
        let filename = created["filename"].as_str().unwrap().to_string();

        let response = router
            .clone()
            .oneshot(
                Request::builder()
                    .uri(format!("/api/backups/{filename}/download"))
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(response.headers()[header::CONTENT_TYPE], "application/zip");

        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let on_disk = std::fs::read(dir.path().join("backups").join(&filename)).unwrap();
        assert_eq!(bytes.as_ref(), on_disk.as_slice());
    }

    #[tokio::test]
    async fn test_error_status_mapping() {
        let (_dir, _store, router) = app().await;

        let (status, body) = send(
            &router,
            Method::DELETE,
            "/api/backups/yarnl-backup-missing.zip",
            None,
        )
        .await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert!(body["error"].as_str().unwrap().contains("not found"));

        let (status, _) = send(&router, Method::GET, "/api/backups/backup.tar/download", None).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);

        let (status, _) = send(
            &router,
            Method::POST,
            "/api/backups/%2E%2E%2Fescape.zip/restore",
            None,
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_prune_endpoint() {
        let (_dir, _store, router) = app().await;
        send(&router, Method::POST, "/api/backups", None).await;

        let (status, body) = send(
            &router,
            Method::POST,
            "/api/backups/prune",
            Some(json!({"mode": "days", "value": 30})),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["deletedCount"], 0);

        let (status, _) = send(
            &router,
            Method::POST,
            "/api/backups/prune",
            Some(json!({"mode": "keep", "value": 0})),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_schedule_update_keeps_last_backup() {
        let (_dir, store, router) = app().await;
        let last = Utc.with_ymd_and_hms(2025, 5, 1, 3, 0, 0).unwrap();
        settings::record_last_backup(store.as_ref(), last).await.unwrap();

        let (status, body) = send(
            &router,
            Method::PUT,
            "/api/backups/schedule",
            Some(json!({"enabled": true, "schedule": "weekly", "time": "04:15"})),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["schedule"], "weekly");

        let saved: BackupScheduleSettings = settings::load(store.as_ref()).await.unwrap();
        assert!(saved.enabled);
        assert_eq!(saved.time, "04:15");
        assert_eq!(saved.last_backup, Some(last));

        let (_, fetched) = send(&router, Method::GET, "/api/backups/schedule", None).await;
        assert_eq!(fetched["enabled"], true);
    }

    #[tokio::test]
    async fn test_health() {
        let (_dir, _store, router) = app().await;
        let (status, body) = send(&router, Method::GET, "/api/health", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["status"], "ok");
    }
}
