//! Cookie-based session plumbing backing `/api/auth/*` (§6.1, §6.5). No
//! cookie crate is added to the stack: the `Cookie`/`Set-Cookie` headers are
//! small enough to parse and build by hand.

use std::sync::Arc;

use axum::extract::{Request, State};
use axum::http::{header, HeaderMap};
use axum::middleware::Next;
use axum::response::Response;

use crate::error::ApiError;
use crate::state::AppState;

const COOKIE_NAME: &str = "bookd_session";

pub fn session_token(headers: &HeaderMap) -> Option<String> {
    let raw = headers.get(header::COOKIE)?.to_str().ok()?;
    raw.split(';').find_map(|pair| {
        let (k, v) = pair.trim().split_once('=')?;
        (k == COOKIE_NAME).then(|| v.to_string())
    })
}

pub fn set_cookie_header(token: &str, remember_me: bool) -> String {
    let max_age = if remember_me { 30 * 24 * 60 * 60 } else { 24 * 60 * 60 };
    format!("{COOKIE_NAME}={token}; Path=/; HttpOnly; SameSite=Lax; Max-Age={max_age}")
}

pub fn clear_cookie_header() -> String {
    format!("{COOKIE_NAME}=; Path=/; HttpOnly; SameSite=Lax; Max-Age=0")
}

pub fn is_authenticated(state: &AppState, headers: &HeaderMap) -> bool {
    if !state.auth_required() {
        return true;
    }
    match session_token(headers) {
        Some(token) => state.sessions.is_valid(&token),
        None => false,
    }
}

/// Rejects any request lacking a valid session when auth is configured.
/// Applied to every `/api/*` route except `auth/login` and `auth/check`.
pub async fn require_auth(
    State(state): State<Arc<AppState>>,
    req: Request,
    next: Next,
) -> Result<Response, ApiError> {
    if is_authenticated(&state, req.headers()) {
        Ok(next.run(req).await)
    } else {
        Err(ApiError::Unauthorized)
    }
}
