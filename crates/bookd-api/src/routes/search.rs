//! `GET /api/search` (§6.1): fans the query out to every registered release
//! source concurrently and merges the results. A source that errors is
//! logged and simply contributes nothing, rather than failing the whole
//! request — there is always at least the empty list to return.

use std::sync::Arc;

use axum::extract::{Query, State};
use axum::Json;
use serde::Deserialize;
use tracing::warn;

use bookd_core::registry::{BookMetadata, Release};

use crate::error::ApiError;
use crate::state::AppState;

#[derive(Debug, Deserialize)]
pub struct SearchQuery {
    query: Option<String>,
    #[serde(default)]
    isbn: Vec<String>,
    #[serde(default)]
    author: Vec<String>,
    #[serde(default)]
    title: Vec<String>,
    #[serde(default)]
    lang: Vec<String>,
    #[serde(default)]
    format: Vec<String>,
    #[serde(default)]
    expand_search: bool,
}

pub async fn search(
    State(state): State<Arc<AppState>>,
    Query(q): Query<SearchQuery>,
) -> Result<Json<Vec<Release>>, ApiError> {
    let metadata = BookMetadata {
        query: q.query,
        isbn: q.isbn,
        author: q.author,
        title: q.title,
        language: q.lang.clone(),
        // `format` narrows what the caller is asking for; sources that don't
        // recognize it are free to ignore it, same as an unknown `extra` key.
    };
    let _ = &q.format;

    let names = state.registry.release_source_names();
    let mut handles = Vec::with_capacity(names.len());
    for name in names {
        let registry = Arc::clone(&state.registry);
        let metadata = metadata.clone();
        let languages = q.lang.clone();
        let expand = q.expand_search;
        handles.push(tokio::spawn(async move {
            let source = match registry.release_source(&name) {
                Ok(s) => s,
                Err(_) => return Vec::new(),
            };
            match source.search(&metadata, expand, &languages).await {
                Ok(releases) => releases,
                Err(e) => {
                    warn!(source = %name, error = %e, "search: source failed");
                    Vec::new()
                }
            }
        }));
    }

    let mut merged = Vec::new();
    for h in handles {
        if let Ok(releases) = h.await {
            merged.extend(releases);
        }
    }
    state.releases.insert_all(&merged);
    Ok(Json(merged))
}
