//! `/api/queue/*`, `/api/status`, `/api/downloads/active` (§6.1): priority
//! mutation and read-only snapshots over the Queue.

use std::collections::HashMap;
use std::sync::Arc;

use axum::extract::{Path, State};
use axum::Json;
use serde::Deserialize;
use serde_json::json;

use crate::error::ApiError;
use crate::state::AppState;

#[derive(Debug, Deserialize)]
pub struct PriorityBody {
    priority: i64,
}

pub async fn set_priority(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
    Json(body): Json<PriorityBody>,
) -> Result<Json<serde_json::Value>, ApiError> {
    state.queue.set_priority(&id, body.priority)?;
    Ok(Json(json!({ "status": "updated", "task_id": id, "priority": body.priority })))
}

#[derive(Debug, Deserialize)]
pub struct ReorderBody {
    book_priorities: HashMap<String, i64>,
}

pub async fn reorder(
    State(state): State<Arc<AppState>>,
    Json(body): Json<ReorderBody>,
) -> Result<Json<serde_json::Value>, ApiError> {
    if body.book_priorities.is_empty() {
        return Err(ApiError::BadRequest("book_priorities must not be empty".to_string()));
    }
    let updated_count = state.queue.reorder_queue(&body.book_priorities);
    Ok(Json(json!({ "status": "reordered", "updated_count": updated_count })))
}

pub async fn order(State(state): State<Arc<AppState>>) -> Json<serde_json::Value> {
    Json(json!({ "queue": state.queue.get_queue_order() }))
}

pub async fn active(State(state): State<Arc<AppState>>) -> Json<serde_json::Value> {
    Json(json!({ "active_downloads": state.queue.active_ids() }))
}

pub async fn clear(State(state): State<Arc<AppState>>) -> Json<serde_json::Value> {
    let removed_count = state.queue.clear_completed(true);
    Json(json!({ "status": "cleared", "removed_count": removed_count }))
}

pub async fn status(State(state): State<Arc<AppState>>) -> Json<serde_json::Value> {
    let grouped = state.queue.snapshot_by_status();
    let mut out = serde_json::Map::new();
    for (status, tasks) in grouped {
        let by_id: serde_json::Map<String, serde_json::Value> = tasks
            .into_iter()
            .map(|t| (t.task_id.clone(), serde_json::to_value(t).unwrap_or(serde_json::Value::Null)))
            .collect();
        let key = serde_json::to_value(status)
            .ok()
            .and_then(|v| v.as_str().map(|s| s.to_string()))
            .unwrap_or_default();
        out.insert(key, serde_json::Value::Object(by_id));
    }
    Json(serde_json::Value::Object(out))
}
