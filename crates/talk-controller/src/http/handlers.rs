//! HTTP handlers.
//!
//! Handlers translate requests into coordinator calls and map `TalkError`
//! into responses. They hold no state of their own.
//!
//! - `POST /api/v1/users` - Register (public)
//! - `GET /api/v1/users/:id` - Public profile
//! - `GET /api/v1/teachers?language=xx` - Available teachers (snapshot read)
//! - `/api/v1/me/*`, `/api/v1/match`, `/api/v1/sessions/*` - Identity required

use super::identity::Identity;
use super::routes::AppState;

use crate::directory::{Availability, NewUser, UserView};
use crate::errors::TalkError;
use crate::ledger::LedgerEntry;
use crate::session::SessionView;

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    Extension, Json,
};
use common::types::{LanguageCode, Role, SessionId, UserId};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::sync::Arc;
use tracing::{debug, instrument};

/// Public profile of another user (no balance).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct PublicProfile {
    pub id: UserId,
    pub display_name: String,
    pub role: Role,
    pub languages: Vec<LanguageCode>,
    pub availability: Availability,
}

impl From<UserView> for PublicProfile {
    fn from(view: UserView) -> Self {
        Self {
            id: view.id,
            display_name: view.display_name,
            role: view.role,
            languages: view.languages,
            availability: view.availability,
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct TeachersQuery {
    pub language: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct AvailableTeacher {
    pub id: UserId,
    pub languages: BTreeSet<LanguageCode>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct TeacherListing {
    pub language: LanguageCode,
    pub teachers: Vec<AvailableTeacher>,
}

fn parse_session_id(raw: &str) -> Result<SessionId, TalkError> {
    raw.parse()
        .map_err(|_| TalkError::InvalidRequest("invalid session id".to_string()))
}

/// Handler for POST /api/v1/users
#[instrument(skip_all, name = "talk.http.register")]
pub async fn register_user(
    State(state): State<Arc<AppState>>,
    body: axum::body::Bytes,
) -> Result<(StatusCode, Json<UserView>), TalkError> {
    // Deserialize manually to return 400 (not Axum's default 422)
    let new_user: NewUser = serde_json::from_slice(&body).map_err(|e| {
        debug!(target: "talk.http", error = %e, "Invalid registration body");
        TalkError::InvalidRequest("Invalid request body".to_string())
    })?;

    let user = state.coordinator.register_user(new_user).await?;
    Ok((StatusCode::CREATED, Json(user)))
}

/// Handler for GET /api/v1/users/:id
#[instrument(skip_all, name = "talk.http.get_user")]
pub async fn get_user(
    State(state): State<Arc<AppState>>,
    Path(user_id): Path<String>,
) -> Result<Json<PublicProfile>, TalkError> {
    let user_id: UserId = user_id
        .parse()
        .map_err(|_| TalkError::InvalidRequest("invalid user id".to_string()))?;
    let user = state.coordinator.get_user(user_id).await?;
    Ok(Json(user.into()))
}

/// Handler for GET /api/v1/teachers?language=xx
///
/// Served from the latest directory snapshot; never enters the mailbox.
#[instrument(skip_all, name = "talk.http.teachers")]
pub async fn list_teachers(
    State(state): State<Arc<AppState>>,
    Query(query): Query<TeachersQuery>,
) -> Result<Json<TeacherListing>, TalkError> {
    let language = LanguageCode::parse(&query.language)
        .map_err(|e| TalkError::InvalidRequest(e.to_string()))?;

    let teachers = state
        .coordinator
        .available_teachers(&language)
        .into_iter()
        .map(|t| AvailableTeacher {
            id: t.id,
            languages: t.taught_languages,
        })
        .collect();

    Ok(Json(TeacherListing { language, teachers }))
}

/// Handler for GET /api/v1/me
#[instrument(skip_all, name = "talk.http.me")]
pub async fn get_me(
    State(state): State<Arc<AppState>>,
    Extension(Identity(user_id)): Extension<Identity>,
) -> Result<Json<UserView>, TalkError> {
    Ok(Json(state.coordinator.get_user(user_id).await?))
}

/// Handler for POST /api/v1/me/available
#[instrument(skip_all, name = "talk.http.available")]
pub async fn set_available(
    State(state): State<Arc<AppState>>,
    Extension(Identity(user_id)): Extension<Identity>,
) -> Result<Json<UserView>, TalkError> {
    Ok(Json(state.coordinator.set_available(user_id).await?))
}

/// Handler for POST /api/v1/me/offline
#[instrument(skip_all, name = "talk.http.offline")]
pub async fn set_offline(
    State(state): State<Arc<AppState>>,
    Extension(Identity(user_id)): Extension<Identity>,
) -> Result<Json<UserView>, TalkError> {
    Ok(Json(state.coordinator.set_offline(user_id).await?))
}

/// Handler for GET /api/v1/me/ledger
#[instrument(skip_all, name = "talk.http.ledger")]
pub async fn my_ledger(
    State(state): State<Arc<AppState>>,
    Extension(Identity(user_id)): Extension<Identity>,
) -> Result<Json<Vec<LedgerEntry>>, TalkError> {
    Ok(Json(state.coordinator.ledger_entries(user_id).await?))
}

/// Handler for GET /api/v1/me/session
///
/// 204 when the caller has no open session.
#[instrument(skip_all, name = "talk.http.current_session")]
pub async fn my_session(
    State(state): State<Arc<AppState>>,
    Extension(Identity(user_id)): Extension<Identity>,
) -> Result<Response, TalkError> {
    Ok(match state.coordinator.current_session(user_id).await? {
        Some(session) => Json(session).into_response(),
        None => StatusCode::NO_CONTENT.into_response(),
    })
}

/// Handler for POST /api/v1/match
#[instrument(skip_all, name = "talk.http.match")]
pub async fn find_match(
    State(state): State<Arc<AppState>>,
    Extension(Identity(student_id)): Extension<Identity>,
) -> Result<(StatusCode, Json<SessionView>), TalkError> {
    let session = state.coordinator.find_match(student_id).await?;
    Ok((StatusCode::CREATED, Json(session)))
}

/// Handler for GET /api/v1/sessions/:id
#[instrument(skip_all, name = "talk.http.get_session")]
pub async fn get_session(
    State(state): State<Arc<AppState>>,
    Extension(Identity(user_id)): Extension<Identity>,
    Path(session_id): Path<String>,
) -> Result<Json<SessionView>, TalkError> {
    let session_id = parse_session_id(&session_id)?;
    Ok(Json(
        state
            .coordinator
            .get_session(session_id, Some(user_id))
            .await?,
    ))
}

/// Handler for POST /api/v1/sessions/:id/join
#[instrument(skip_all, name = "talk.http.join")]
pub async fn join_session(
    State(state): State<Arc<AppState>>,
    Extension(Identity(user_id)): Extension<Identity>,
    Path(session_id): Path<String>,
) -> Result<Json<SessionView>, TalkError> {
    let session_id = parse_session_id(&session_id)?;
    Ok(Json(state.coordinator.join(session_id, user_id).await?))
}

/// Handler for POST /api/v1/sessions/:id/leave
#[instrument(skip_all, name = "talk.http.leave")]
pub async fn leave_session(
    State(state): State<Arc<AppState>>,
    Extension(Identity(user_id)): Extension<Identity>,
    Path(session_id): Path<String>,
) -> Result<Json<SessionView>, TalkError> {
    let session_id = parse_session_id(&session_id)?;
    Ok(Json(state.coordinator.leave(session_id, user_id).await?))
}

/// Handler for POST /api/v1/sessions/:id/report
#[instrument(skip_all, name = "talk.http.report")]
pub async fn report_session(
    State(state): State<Arc<AppState>>,
    Extension(Identity(user_id)): Extension<Identity>,
    Path(session_id): Path<String>,
) -> Result<Json<SessionView>, TalkError> {
    let session_id = parse_session_id(&session_id)?;
    Ok(Json(state.coordinator.report(session_id, user_id).await?))
}
