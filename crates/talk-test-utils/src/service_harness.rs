//! Service harness for integration tests.
//!
//! `TestTalkService` owns a live `MatchCoordinator` and the real API router.
//! Tests drive it either through the handle or through HTTP requests sent
//! with `tower::ServiceExt::oneshot`, so no socket is bound.

use crate::fixtures::{test_policy, Registration};

use axum::body::Body;
use axum::http::{Method, Request, StatusCode};
use axum::Router;
use common::types::UserId;
use http_body_util::BodyExt;
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;
use talk_controller::actors::MatchCoordinatorHandle;
use talk_controller::config::SessionPolicy;
use talk_controller::http::{build_routes, AppState, USER_ID_HEADER};
use tower::util::ServiceExt;

/// Real time (or paused time, auto-advanced) given to the actor to process
/// timer messages.
const SETTLE: Duration = Duration::from_millis(10);

/// Test harness around a running coordinator.
///
/// # Example
/// ```rust,ignore
/// #[tokio::test(start_paused = true)]
/// async fn test_join_window() -> anyhow::Result<()> {
///     let service = TestTalkService::spawn();
///     // ... match, then
///     service.advance(Duration::from_secs(30)).await;
///     Ok(())
/// }
/// ```
pub struct TestTalkService {
    handle: MatchCoordinatorHandle,
    router: Router,
}

impl TestTalkService {
    /// Spawn a coordinator with the default test policy.
    #[must_use]
    pub fn spawn() -> Self {
        Self::with_policy(test_policy())
    }

    #[must_use]
    pub fn with_policy(policy: SessionPolicy) -> Self {
        let handle = MatchCoordinatorHandle::new("talk-test".to_string(), policy);
        let router = build_routes(Arc::new(AppState {
            coordinator: handle.clone(),
        }));
        Self { handle, router }
    }

    #[must_use]
    pub fn handle(&self) -> &MatchCoordinatorHandle {
        &self.handle
    }

    /// Register a user and leave them offline.
    pub async fn register(&self, user: impl Registration) -> anyhow::Result<UserId> {
        Ok(self.handle.register_user(user.registration()).await?.id)
    }

    /// Register a user and mark them available.
    pub async fn online(&self, user: impl Registration) -> anyhow::Result<UserId> {
        let id = self.register(user).await?;
        self.handle.set_available(id).await?;
        Ok(id)
    }

    /// Current balance of `user_id`.
    pub async fn points(&self, user_id: UserId) -> anyhow::Result<u64> {
        Ok(self.handle.get_user(user_id).await?.points)
    }

    /// Let spawned timer tasks and the actor run.
    pub async fn settle(&self) {
        tokio::time::sleep(SETTLE).await;
    }

    /// Advance a paused clock, then let fired timers be processed.
    pub async fn advance(&self, by: Duration) {
        tokio::time::advance(by).await;
        self.settle().await;
    }

    /// Send a request through the router.
    ///
    /// Returns the status and the JSON body (`Value::Null` when empty).
    pub async fn request(
        &self,
        method: Method,
        uri: &str,
        user: Option<UserId>,
        body: Option<Value>,
    ) -> anyhow::Result<(StatusCode, Value)> {
        let mut builder = Request::builder().method(method).uri(uri);
        if let Some(user) = user {
            builder = builder.header(USER_ID_HEADER, user.to_string());
        }
        let request = match body {
            Some(json) => builder
                .header("content-type", "application/json")
                .body(Body::from(serde_json::to_vec(&json)?))?,
            None => builder.body(Body::empty())?,
        };

        let response = self.router.clone().oneshot(request).await?;
        let status = response.status();
        let bytes = response.into_body().collect().await?.to_bytes();
        let value = if bytes.is_empty() {
            Value::Null
        } else {
            serde_json::from_slice(&bytes)?
        };
        Ok((status, value))
    }

    pub async fn get(&self, uri: &str, user: Option<UserId>) -> anyhow::Result<(StatusCode, Value)> {
        self.request(Method::GET, uri, user, None).await
    }

    pub async fn post(
        &self,
        uri: &str,
        user: Option<UserId>,
        body: Option<Value>,
    ) -> anyhow::Result<(StatusCode, Value)> {
        self.request(Method::POST, uri, user, body).await
    }
}

impl Drop for TestTalkService {
    fn drop(&mut self) {
        self.handle.cancel();
    }
}
