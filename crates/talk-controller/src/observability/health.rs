//! Health endpoints for the talk controller.
//!
//! - `GET /health` - Liveness probe (is the process running?)
//! - `GET /ready` - Readiness probe (is the coordinator accepting matches?)
//!
//! Readiness asks the coordinator for its status, so a wedged or draining
//! actor takes the instance out of rotation.

use crate::actors::MatchCoordinatorHandle;

use axum::{extract::State, http::StatusCode, routing::get, Json, Router};
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::warn;

/// Upper bound on the coordinator status round trip during a probe.
const READINESS_TIMEOUT: Duration = Duration::from_secs(2);

/// Health state shared by the probes and `main`.
pub struct HealthState {
    ready: AtomicBool,
    coordinator: MatchCoordinatorHandle,
}

impl HealthState {
    /// Create a new health state (not ready until `set_ready`).
    #[must_use]
    pub fn new(coordinator: MatchCoordinatorHandle) -> Self {
        Self {
            ready: AtomicBool::new(false),
            coordinator,
        }
    }

    pub fn set_ready(&self) {
        self.ready.store(true, Ordering::SeqCst);
    }

    /// Mark the service as not ready (e.g., during shutdown).
    pub fn set_not_ready(&self) {
        self.ready.store(false, Ordering::SeqCst);
    }

    #[must_use]
    pub fn is_ready(&self) -> bool {
        self.ready.load(Ordering::SeqCst)
    }
}

/// Readiness probe body.
#[derive(Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct ReadinessResponse {
    pub status: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub open_sessions: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub available_users: Option<usize>,
}

impl ReadinessResponse {
    fn not_ready() -> Self {
        Self {
            status: "not_ready".to_string(),
            open_sessions: None,
            available_users: None,
        }
    }
}

/// Create the health router with liveness and readiness endpoints.
pub fn health_router(health_state: Arc<HealthState>) -> Router {
    Router::new()
        .route("/health", get(liveness_handler))
        .route("/ready", get(readiness_handler))
        .with_state(health_state)
}

async fn liveness_handler() -> &'static str {
    "OK"
}

#[tracing::instrument(skip_all, name = "talk.health.readiness")]
async fn readiness_handler(
    State(state): State<Arc<HealthState>>,
) -> (StatusCode, Json<ReadinessResponse>) {
    if !state.is_ready() {
        return (
            StatusCode::SERVICE_UNAVAILABLE,
            Json(ReadinessResponse::not_ready()),
        );
    }

    match tokio::time::timeout(READINESS_TIMEOUT, state.coordinator.status()).await {
        Ok(Ok(status)) if !status.draining => (
            StatusCode::OK,
            Json(ReadinessResponse {
                status: "ready".to_string(),
                open_sessions: Some(status.open_sessions),
                available_users: Some(status.available_users),
            }),
        ),
        Ok(Ok(_)) => (
            StatusCode::SERVICE_UNAVAILABLE,
            Json(ReadinessResponse::not_ready()),
        ),
        Ok(Err(e)) => {
            warn!(target: "talk.health", error = %e, "Readiness check failed: coordinator unavailable");
            (
                StatusCode::SERVICE_UNAVAILABLE,
                Json(ReadinessResponse::not_ready()),
            )
        }
        Err(_) => {
            warn!(target: "talk.health", "Readiness check failed: coordinator timed out");
            (
                StatusCode::SERVICE_UNAVAILABLE,
                Json(ReadinessResponse::not_ready()),
            )
        }
    }
}
