//! HTTP + WebSocket surface for `bookd` (§6.1, §6.2). No teacher counterpart
//! exists (the teacher is CLI-only); grounded on the pack's other
//! axum-based download-service examples (see DESIGN.md).

mod error;
mod routes;
mod session;
mod state;
mod ws;

use std::sync::Arc;

use axum::http::Method;
use axum::middleware;
use axum::routing::{delete, get, post, put};
use axum::Router;
use tower_http::cors::{Any, CorsLayer};

pub use state::{AppState, ReleaseCache, SessionStore};

/// Builds the full router: `/api/*` plus a `/request`-prefixed alias of the
/// same tree (§6.1, "reverse-proxy friendliness"), and the `/ws` event
/// channel (§6.2).
pub fn router(state: Arc<AppState>) -> Router {
    let cors = CorsLayer::new()
        .allow_methods([Method::GET, Method::POST, Method::PUT, Method::DELETE])
        .allow_headers(Any)
        .allow_origin(Any);

    let api = api_router(Arc::clone(&state));

    Router::new()
        .nest("/api", api.clone())
        .nest("/request/api", api)
        .route("/ws", get(ws::ws_handler))
        .layer(cors)
        .with_state(state)
}

fn api_router(state: Arc<AppState>) -> Router<Arc<AppState>> {
    let public_auth = Router::new()
        .route("/auth/login", post(routes::auth::login))
        .route("/auth/check", get(routes::auth::check))
        .route("/auth/logout", post(routes::auth::logout));

    let protected = Router::new()
        .route("/search", get(routes::search::search))
        .route("/info", get(routes::info::info))
        .route("/download", get(routes::download::download))
        .route("/status", get(routes::queue::status))
        .route("/localdownload", get(routes::download::localdownload))
        .route("/download/:id/cancel", delete(routes::download::cancel))
        .route("/queue/:id/priority", put(routes::queue::set_priority))
        .route("/queue/reorder", post(routes::queue::reorder))
        .route("/queue/order", get(routes::queue::order))
        .route("/downloads/active", get(routes::queue::active))
        .route("/queue/clear", delete(routes::queue::clear))
        .layer(middleware::from_fn_with_state(Arc::clone(&state), session::require_auth));

    public_auth.merge(protected).with_state(state)
}
