//! `SessionManager` - lifecycle of timed talk sessions (rooms).
//!
//! # State machine
//!
//! ```text
//!            join (both)              duration elapsed / leave >= min
//! pending ───────────────▶ active ───────────────────────────────────▶ completed
//!    │                        │
//!    │ join window lapses     │ leave < min / report / shutdown
//!    │ leave / offline        ▼
//!    └─────────────────────▶ aborted
//! ```
//!
//! Every status transition bumps the session `version`. Timers carry the
//! version they were scheduled for and are ignored once it no longer matches,
//! so a timeout racing a `join` or `leave` is a no-op.
//!
//! The manager also keeps the per-user index of open (pending or active)
//! sessions that enforces at most one open session per user.

use crate::errors::TalkError;

use chrono::{DateTime, Utc};
use common::types::{LanguageCode, Role, SessionId, UserId};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, error};

/// Session status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionStatus {
    Pending,
    Active,
    Completed,
    Aborted,
}

impl SessionStatus {
    /// Returns the status as a string for labels and logs.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            SessionStatus::Pending => "pending",
            SessionStatus::Active => "active",
            SessionStatus::Completed => "completed",
            SessionStatus::Aborted => "aborted",
        }
    }

    /// Pending and active sessions count towards the one-session-per-user limit.
    #[must_use]
    pub const fn is_open(&self) -> bool {
        matches!(self, SessionStatus::Pending | SessionStatus::Active)
    }
}

/// Why a session ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum EndReason {
    /// The fixed talk duration elapsed.
    DurationElapsed,
    /// A participant left (after the minimum duration, or before activation).
    Left { by: UserId },
    /// A participant left before the minimum duration.
    LeftEarly { by: UserId },
    /// The join window lapsed before both participants joined.
    JoinTimeout {
        student_joined: bool,
        teacher_joined: bool,
    },
    /// A participant went offline.
    Disconnected { user: UserId },
    /// A participant filed a report.
    Reported { by: UserId },
    /// The controller shut down.
    Shutdown,
}

impl EndReason {
    /// Returns the reason as a string for labels and logs.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            EndReason::DurationElapsed => "duration_elapsed",
            EndReason::Left { .. } => "left",
            EndReason::LeftEarly { .. } => "left_early",
            EndReason::JoinTimeout { .. } => "join_timeout",
            EndReason::Disconnected { .. } => "disconnected",
            EndReason::Reported { .. } => "reported",
            EndReason::Shutdown => "shutdown",
        }
    }
}

/// Scheduled timeout kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TimerKind {
    /// Fires when the join window lapses (pending sessions).
    JoinWindow,
    /// Fires when the talk duration elapses (active sessions).
    SessionDuration,
}

impl TimerKind {
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            TimerKind::JoinWindow => "join_window",
            TimerKind::SessionDuration => "session_duration",
        }
    }
}

/// Result of applying an operation to a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transition {
    /// Nothing changed status (e.g. first of two joins, stale timer).
    Unchanged,
    /// Session became active.
    Activated,
    /// Session reached a terminal status.
    Ended,
}

/// One paired, timed interaction.
#[derive(Debug, Clone)]
pub struct Session {
    pub id: SessionId,
    pub student_id: UserId,
    pub teacher_id: UserId,
    pub language: LanguageCode,
    pub status: SessionStatus,
    pub student_joined: bool,
    pub teacher_joined: bool,
    /// Bumped on every status transition.
    pub version: u64,
    /// Points debited from the student at match time.
    pub points_charged: u64,
    pub refunded: bool,
    pub end_reason: Option<EndReason>,
    pub created_at: DateTime<Utc>,
    pub activated_at: Option<DateTime<Utc>>,
    pub ended_at: Option<DateTime<Utc>>,
    created: Instant,
    activated: Option<Instant>,
    ended: Option<Instant>,
}

impl Session {
    /// Create a pending session.
    #[must_use]
    pub fn new(
        id: SessionId,
        student_id: UserId,
        teacher_id: UserId,
        language: LanguageCode,
        points_charged: u64,
        now: Instant,
        wall: DateTime<Utc>,
    ) -> Self {
        Self {
            id,
            student_id,
            teacher_id,
            language,
            status: SessionStatus::Pending,
            student_joined: false,
            teacher_joined: false,
            version: 0,
            points_charged,
            refunded: false,
            end_reason: None,
            created_at: wall,
            activated_at: None,
            ended_at: None,
            created: now,
            activated: None,
            ended: None,
        }
    }

    /// Role of `user_id` in this session, if a participant.
    #[must_use]
    pub fn role_of(&self, user_id: &UserId) -> Option<Role> {
        if *user_id == self.student_id {
            Some(Role::Student)
        } else if *user_id == self.teacher_id {
            Some(Role::Teacher)
        } else {
            None
        }
    }

    #[must_use]
    pub fn is_participant(&self, user_id: &UserId) -> bool {
        self.role_of(user_id).is_some()
    }

    /// Whether the session ever became active.
    #[must_use]
    pub fn was_activated(&self) -> bool {
        self.activated.is_some()
    }

    /// Time spent active, up to `now` for active sessions.
    #[must_use]
    pub fn active_duration(&self, now: Instant) -> Option<Duration> {
        let start = self.activated?;
        let end = self.ended.unwrap_or(now);
        Some(end.saturating_duration_since(start))
    }

    /// Record a participant joining.
    ///
    /// # Errors
    ///
    /// `Unauthorized` if `user_id` is not a participant, `InvalidState` unless pending.
    pub fn join(
        &mut self,
        user_id: &UserId,
        now: Instant,
        wall: DateTime<Utc>,
    ) -> Result<Transition, TalkError> {
        let role = self.role_of(user_id).ok_or(TalkError::Unauthorized)?;
        if self.status != SessionStatus::Pending {
            return Err(TalkError::InvalidState(format!(
                "session is {}",
                self.status.as_str()
            )));
        }

        match role {
            Role::Student => self.student_joined = true,
            Role::Teacher => self.teacher_joined = true,
        }

        if self.student_joined && self.teacher_joined {
            self.status = SessionStatus::Active;
            self.activated = Some(now);
            self.activated_at = Some(wall);
            self.version += 1;
            return Ok(Transition::Activated);
        }

        Ok(Transition::Unchanged)
    }

    /// End the session on behalf of a participant leaving or disconnecting.
    ///
    /// Pending sessions abort. Active sessions complete when at least
    /// `min_completed` has elapsed since activation, otherwise abort.
    ///
    /// # Errors
    ///
    /// `Unauthorized` if `user_id` is not a participant, `InvalidState` if
    /// the session already ended.
    pub fn depart(
        &mut self,
        user_id: &UserId,
        disconnected: bool,
        min_completed: Duration,
        now: Instant,
        wall: DateTime<Utc>,
    ) -> Result<Transition, TalkError> {
        if !self.is_participant(user_id) {
            return Err(TalkError::Unauthorized);
        }

        let by = *user_id;
        match self.status {
            SessionStatus::Pending => {
                let reason = if disconnected {
                    EndReason::Disconnected { user: by }
                } else {
                    EndReason::Left { by }
                };
                self.finish(SessionStatus::Aborted, reason, now, wall);
            }
            SessionStatus::Active => {
                let elapsed = self.active_duration(now).unwrap_or_default();
                let (status, reason) = match (elapsed >= min_completed, disconnected) {
                    (true, true) => (SessionStatus::Completed, EndReason::Disconnected { user: by }),
                    (true, false) => (SessionStatus::Completed, EndReason::Left { by }),
                    (false, true) => (SessionStatus::Aborted, EndReason::Disconnected { user: by }),
                    (false, false) => (SessionStatus::Aborted, EndReason::LeftEarly { by }),
                };
                self.finish(status, reason, now, wall);
            }
            SessionStatus::Completed | SessionStatus::Aborted => {
                return Err(TalkError::InvalidState(format!(
                    "session is {}",
                    self.status.as_str()
                )));
            }
        }

        Ok(Transition::Ended)
    }

    /// Apply a fired timer. Stale timers (version or status mismatch) are no-ops.
    pub fn expire(
        &mut self,
        kind: TimerKind,
        version: u64,
        now: Instant,
        wall: DateTime<Utc>,
    ) -> Transition {
        if version != self.version {
            return Transition::Unchanged;
        }

        match (kind, self.status) {
            (TimerKind::JoinWindow, SessionStatus::Pending) => {
                let reason = EndReason::JoinTimeout {
                    student_joined: self.student_joined,
                    teacher_joined: self.teacher_joined,
                };
                self.finish(SessionStatus::Aborted, reason, now, wall);
                Transition::Ended
            }
            (TimerKind::SessionDuration, SessionStatus::Active) => {
                self.finish(
                    SessionStatus::Completed,
                    EndReason::DurationElapsed,
                    now,
                    wall,
                );
                Transition::Ended
            }
            _ => Transition::Unchanged,
        }
    }

    /// Abort an open session for a non-participant-driven reason
    /// (report, shutdown). Ended sessions are left as they are.
    pub fn abort(&mut self, reason: EndReason, now: Instant, wall: DateTime<Utc>) -> Transition {
        if !self.status.is_open() {
            return Transition::Unchanged;
        }
        self.finish(SessionStatus::Aborted, reason, now, wall);
        Transition::Ended
    }

    fn finish(
        &mut self,
        status: SessionStatus,
        reason: EndReason,
        now: Instant,
        wall: DateTime<Utc>,
    ) {
        self.status = status;
        self.end_reason = Some(reason);
        self.ended = Some(now);
        self.ended_at = Some(wall);
        self.version += 1;
    }

    /// External view with server-computed remaining time.
    #[must_use]
    pub fn to_view(&self, now: Instant, join_grace: Duration, duration: Duration) -> SessionView {
        let remaining = match self.status {
            SessionStatus::Pending => {
                Some(join_grace.saturating_sub(now.saturating_duration_since(self.created)))
            }
            SessionStatus::Active => self
                .active_duration(now)
                .map(|elapsed| duration.saturating_sub(elapsed)),
            SessionStatus::Completed | SessionStatus::Aborted => None,
        };

        SessionView {
            id: self.id,
            student_id: self.student_id,
            teacher_id: self.teacher_id,
            language: self.language.clone(),
            status: self.status,
            student_joined: self.student_joined,
            teacher_joined: self.teacher_joined,
            version: self.version,
            points_charged: self.points_charged,
            refunded: self.refunded,
            end_reason: self.end_reason,
            created_at: self.created_at,
            activated_at: self.activated_at,
            ended_at: self.ended_at,
            remaining_seconds: remaining.map(|d| d.as_secs()),
            active_seconds: self.active_duration(now).map(|d| d.as_secs()),
        }
    }
}

/// External (and durable) shape of a session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionView {
    pub id: SessionId,
    pub student_id: UserId,
    pub teacher_id: UserId,
    pub language: LanguageCode,
    pub status: SessionStatus,
    pub student_joined: bool,
    pub teacher_joined: bool,
    pub version: u64,
    pub points_charged: u64,
    pub refunded: bool,
    pub end_reason: Option<EndReason>,
    pub created_at: DateTime<Utc>,
    pub activated_at: Option<DateTime<Utc>>,
    pub ended_at: Option<DateTime<Utc>>,
    /// Seconds left in the join window (pending) or the talk (active).
    pub remaining_seconds: Option<u64>,
    pub active_seconds: Option<u64>,
}

/// Owns all sessions and the open-session index.
#[derive(Debug, Default)]
pub struct SessionManager {
    sessions: HashMap<SessionId, Session>,
    order: Vec<SessionId>,
    open_by_user: HashMap<UserId, SessionId>,
}

impl SessionManager {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a new pending session.
    ///
    /// # Errors
    ///
    /// `InvariantViolation` if either participant already has an open
    /// session. Nothing is inserted in that case.
    pub fn create(&mut self, session: Session) -> Result<&Session, TalkError> {
        for user_id in [session.student_id, session.teacher_id] {
            if let Some(existing) = self.open_by_user.get(&user_id) {
                error!(
                    target: "talk.session",
                    user_id = %user_id,
                    existing_session = %existing,
                    "Rejected double match"
                );
                return Err(TalkError::InvariantViolation(
                    "participant already has an open session".to_string(),
                ));
            }
        }

        let id = session.id;
        self.open_by_user.insert(session.student_id, id);
        self.open_by_user.insert(session.teacher_id, id);
        self.order.push(id);

        debug!(
            target: "talk.session",
            session_id = %id,
            student_id = %session.student_id,
            teacher_id = %session.teacher_id,
            language = %session.language,
            "Session created"
        );

        Ok(self.sessions.entry(id).or_insert(session))
    }

    #[must_use]
    pub fn get(&self, id: &SessionId) -> Option<&Session> {
        self.sessions.get(id)
    }

    /// Look up a session, failing with `NotFound`.
    pub fn require(&self, id: &SessionId) -> Result<&Session, TalkError> {
        self.sessions
            .get(id)
            .ok_or_else(|| TalkError::NotFound("Session not found".to_string()))
    }

    /// The open session `user_id` participates in, if any.
    #[must_use]
    pub fn open_session_for(&self, user_id: &UserId) -> Option<&Session> {
        self.open_by_user
            .get(user_id)
            .and_then(|id| self.sessions.get(id))
    }

    /// Apply `op` to a session and keep the open index in step with the result.
    ///
    /// # Errors
    ///
    /// `NotFound` for unknown sessions, or whatever `op` returns.
    pub fn apply<F>(&mut self, id: &SessionId, op: F) -> Result<Transition, TalkError>
    where
        F: FnOnce(&mut Session) -> Result<Transition, TalkError>,
    {
        let session = self
            .sessions
            .get_mut(id)
            .ok_or_else(|| TalkError::NotFound("Session not found".to_string()))?;

        let transition = op(session)?;
        if transition == Transition::Ended {
            let (student_id, teacher_id) = (session.student_id, session.teacher_id);
            for user_id in [student_id, teacher_id] {
                if self.open_by_user.get(&user_id) == Some(id) {
                    self.open_by_user.remove(&user_id);
                }
            }
        }
        Ok(transition)
    }

    /// Mark the student's charge as returned.
    pub fn mark_refunded(&mut self, id: &SessionId) {
        if let Some(session) = self.sessions.get_mut(id) {
            session.refunded = true;
        }
    }

    /// IDs of all open sessions, oldest first.
    #[must_use]
    pub fn open_ids(&self) -> Vec<SessionId> {
        self.order
            .iter()
            .filter(|id| self.sessions.get(id).is_some_and(|s| s.status.is_open()))
            .copied()
            .collect()
    }

    /// Number of open sessions.
    #[must_use]
    pub fn open_count(&self) -> usize {
        // Each open session indexes exactly two users
        self.open_by_user.len() / 2
    }

    /// All sessions, oldest first.
    pub fn sessions(&self) -> impl Iterator<Item = &Session> + '_ {
        self.order.iter().filter_map(|id| self.sessions.get(id))
    }
}
