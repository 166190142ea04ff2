//! `GET /api/info?id=` (§6.1): looks the id up in the short-lived release
//! cache populated by the most recent `/api/search`.

use std::sync::Arc;

use axum::extract::{Query, State};
use axum::Json;
use serde::Deserialize;

use bookd_core::registry::Release;

use crate::error::ApiError;
use crate::state::AppState;

#[derive(Debug, Deserialize)]
pub struct InfoQuery {
    id: String,
}

pub async fn info(
    State(state): State<Arc<AppState>>,
    Query(q): Query<InfoQuery>,
) -> Result<Json<Release>, ApiError> {
    state
        .releases
        .get(&q.id)
        .map(Json)
        .ok_or_else(|| ApiError::NotFound(format!("unknown release: {}", q.id)))
}
