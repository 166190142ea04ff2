//! `GET /api/download`, `DELETE /api/download/{id}/cancel` (§6.1): converts a
//! cached `Release` into a `Task` and enqueues it, or cancels an active one.

use std::sync::Arc;

use axum::extract::{Path, Query, State};
use axum::Json;
use serde::Deserialize;
use serde_json::json;

use bookd_core::queue::{Task, TaskStatus};
use bookd_core::registry::Protocol;

use crate::error::ApiError;
use crate::state::AppState;

/// Registered download-handler name for each protocol (§3.1: "source" is the
/// registered handler name). Only HTTP releases have a handler in this
/// workspace (`Cascade`, registered as `"direct"`, §4.6); DCC/TORRENT/NZB
/// protocols are recognized by the `Release` model but have no handler here.
fn handler_name(protocol: Protocol) -> &'static str {
    match protocol {
        Protocol::Http => "direct",
        Protocol::Dcc => "dcc",
        Protocol::Torrent => "torrent",
        Protocol::Nzb => "nzb",
    }
}

#[derive(Debug, Deserialize)]
pub struct DownloadQuery {
    id: String,
    #[serde(default)]
    priority: Option<i64>,
}

pub async fn download(
    State(state): State<Arc<AppState>>,
    Query(q): Query<DownloadQuery>,
) -> Result<Json<serde_json::Value>, ApiError> {
    if q.id.trim().is_empty() {
        return Err(ApiError::BadRequest("missing id".to_string()));
    }
    let release = state
        .releases
        .get(&q.id)
        .ok_or_else(|| ApiError::NotFound(format!("unknown release: {}", q.id)))?;

    let priority = q.priority.unwrap_or(0);
    let source = handler_name(release.protocol);
    if state.registry.download_handler(source).is_err() {
        return Err(ApiError::Internal(format!("no handler registered for protocol of {}", q.id)));
    }

    let mut task = Task::new(release.source_id.clone(), source, priority);
    task.title = Some(release.title.clone());
    task.format = Some(release.format.clone());
    task.size = release.size.clone();
    task.preview = release.info_url.clone();

    state.queue.add(task)?;
    state.broadcaster.notify(
        bookd_core::broadcaster::NotificationLevel::Info,
        format!("queued {}", release.title),
    );

    Ok(Json(json!({ "status": "queued", "priority": priority })))
}

pub async fn cancel(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<Json<serde_json::Value>, ApiError> {
    state.queue.cancel_download(&id)?;
    Ok(Json(json!({ "status": "cancelled", "book_id": id })))
}

pub async fn localdownload(
    State(state): State<Arc<AppState>>,
    Query(q): Query<DownloadQuery>,
) -> Result<axum::response::Response, ApiError> {
    use axum::body::Body;
    use axum::http::header;
    use axum::response::IntoResponse;

    let task = state
        .queue
        .get(&q.id)
        .filter(|t| t.status == TaskStatus::Complete || t.status == TaskStatus::Available)
        .ok_or_else(|| ApiError::NotFound(format!("no completed download for {}", q.id)))?;

    let path = task.download_path.ok_or_else(|| ApiError::NotFound("no file on disk".to_string()))?;
    let bytes = tokio::fs::read(&path)
        .await
        .map_err(|_| ApiError::NotFound("no file on disk".to_string()))?;

    let filename = path
        .file_name()
        .and_then(|n| n.to_str())
        .map(|s| s.to_string())
        .unwrap_or_else(|| format!("{}.bin", q.id));

    Ok((
        [
            (header::CONTENT_TYPE, "application/octet-stream".to_string()),
            (header::CONTENT_DISPOSITION, format!("attachment; filename=\"{filename}\"")),
        ],
        Body::from(bytes),
    )
        .into_response())
}
