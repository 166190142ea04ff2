//! `/api/auth/*` (§6.1, §6.5): credential verification against the auth
//! collaborator plus the session cookie issued/cleared on top of it. When no
//! auth database is configured, every request is treated as authenticated
//! (`auth_required: false`).

use std::sync::Arc;

use axum::extract::State;
use axum::http::{header, HeaderMap, HeaderValue};
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Deserialize;
use serde_json::json;

use bookd_core::auth::AuthError;

use crate::error::ApiError;
use crate::session::{self, clear_cookie_header, set_cookie_header};
use crate::state::AppState;

#[derive(Debug, Deserialize)]
pub struct LoginBody {
    username: String,
    password: String,
    #[serde(default)]
    remember_me: bool,
}

pub async fn login(
    State(state): State<Arc<AppState>>,
    Json(body): Json<LoginBody>,
) -> Result<Response, ApiError> {
    if body.username.trim().is_empty() || body.password.is_empty() {
        return Err(ApiError::BadRequest("username and password are required".to_string()));
    }

    let Some(auth) = &state.auth else {
        return Ok(Json(json!({ "success": true })).into_response());
    };

    match auth.verify(&body.username, &body.password).await {
        Ok(()) => {
            let token = state.sessions.issue(body.remember_me);
            let mut resp = Json(json!({ "success": true })).into_response();
            resp.headers_mut().insert(
                header::SET_COOKIE,
                HeaderValue::from_str(&set_cookie_header(&token, body.remember_me))
                    .map_err(|e| ApiError::Internal(e.to_string()))?,
            );
            Ok(resp)
        }
        Err(AuthError::InvalidCredentials) => Err(ApiError::Unauthorized),
        Err(AuthError::Locked { retry_after_secs }) => Err(ApiError::Locked(retry_after_secs)),
        Err(AuthError::Db(e)) => Err(ApiError::Internal(e.to_string())),
    }
}

pub async fn logout(State(state): State<Arc<AppState>>, headers: HeaderMap) -> Response {
    if let Some(token) = session::session_token(&headers) {
        state.sessions.revoke(&token);
    }
    let mut resp = Json(json!({ "success": true })).into_response();
    if let Ok(v) = HeaderValue::from_str(&clear_cookie_header()) {
        resp.headers_mut().insert(header::SET_COOKIE, v);
    }
    resp
}

pub async fn check(State(state): State<Arc<AppState>>, headers: HeaderMap) -> Json<serde_json::Value> {
    let authenticated = session::is_authenticated(&state, &headers);
    Json(json!({ "authenticated": authenticated, "auth_required": state.auth_required() }))
}
