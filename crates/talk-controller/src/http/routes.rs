//! HTTP routes for the talk controller.
//!
//! Defines the Axum router and application state.

use super::handlers;
use super::identity::require_identity;

use crate::actors::MatchCoordinatorHandle;

use axum::{
    middleware,
    routing::{get, post},
    Router,
};
use std::sync::Arc;
use std::time::Duration;
use tower_http::{timeout::TimeoutLayer, trace::TraceLayer};

/// Request timeout for every API route.
const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// Application state shared across all handlers.
#[derive(Clone)]
pub struct AppState {
    pub coordinator: MatchCoordinatorHandle,
}

/// Build the API routes.
///
/// Creates an Axum router with:
/// - `/api/v1/users` and `/api/v1/users/:id` - public
/// - `/api/v1/teachers?language=xx` - public, served from the snapshot
/// - `/api/v1/me*`, `/api/v1/match`, `/api/v1/sessions/:id*` - require `x-user-id`
/// - `TraceLayer` for request logging
/// - 30 second request timeout
///
/// Health and metrics routes are merged in by `main`.
pub fn build_routes(state: Arc<AppState>) -> Router {
    let public_routes = Router::new()
        .route("/api/v1/users", post(handlers::register_user))
        .route("/api/v1/users/:id", get(handlers::get_user))
        .route("/api/v1/teachers", get(handlers::list_teachers))
        .with_state(Arc::clone(&state));

    let protected_routes = Router::new()
        .route("/api/v1/me", get(handlers::get_me))
        .route("/api/v1/me/available", post(handlers::set_available))
        .route("/api/v1/me/offline", post(handlers::set_offline))
        .route("/api/v1/me/ledger", get(handlers::my_ledger))
        .route("/api/v1/me/session", get(handlers::my_session))
        .route("/api/v1/match", post(handlers::find_match))
        .route("/api/v1/sessions/:id", get(handlers::get_session))
        .route("/api/v1/sessions/:id/join", post(handlers::join_session))
        .route("/api/v1/sessions/:id/leave", post(handlers::leave_session))
        .route("/api/v1/sessions/:id/report", post(handlers::report_session))
        .route_layer(middleware::from_fn(require_identity))
        .with_state(state);

    public_routes
        .merge(protected_routes)
        .layer(TraceLayer::new_for_http())
        .layer(TimeoutLayer::new(REQUEST_TIMEOUT))
}
