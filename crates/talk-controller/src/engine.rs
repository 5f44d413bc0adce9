//! `TalkEngine` - the state owned by the coordinator.
//!
//! The engine bundles the directory, block list, ledger and sessions and runs
//! every operation that touches more than one of them as a single unit. It is
//! synchronous and clock-agnostic: callers pass `now` in. Side effects the
//! engine cannot perform itself (scheduling timers, publishing events) are
//! queued as [`Effect`]s and drained by the coordinator after each message.
//!
//! # Points policy
//!
//! One `points_per_session` is debited when a match is made. When a session
//! ends:
//!
//! - `completed`: the charge stays, the teacher earns `teacher_reward_points`.
//! - `aborted` after activation: refunded.
//! - `aborted` before activation: refunded, unless the teacher is the one who
//!   failed to join (join window lapsed without them, or they left or went
//!   offline). `refund_on_teacher_no_show` refunds those too.
//! - `reported`: refunded when the student filed the report.
//! - `shutdown`: refunded.

use crate::blocklist::{BlockEdge, BlockList};
use crate::config::SessionPolicy;
use crate::directory::{Availability, DirectorySnapshot, NewUser, UserDirectory, UserView};
use crate::errors::TalkError;
use crate::ledger::{LedgerEntry, LedgerReason, PointsLedger};
use crate::matchmaker;
use crate::observability::metrics;
use crate::session::{
    EndReason, Session, SessionManager, SessionStatus, SessionView, TimerKind, Transition,
};

use chrono::{DateTime, Utc};
use common::types::{Role, SessionId, UserId};
use serde::{Deserialize, Serialize};
use std::mem;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, info, warn};

/// Notification for the media transport and other subscribers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum SessionEvent {
    /// A match was made; both participants should join.
    Created { session: SessionView },
    /// Both joined; media should be established.
    Activated { session: SessionView },
    /// The session ended; media should be torn down.
    Ended { session: SessionView },
}

impl SessionEvent {
    /// The session this event is about.
    #[must_use]
    pub fn session(&self) -> &SessionView {
        match self {
            SessionEvent::Created { session }
            | SessionEvent::Activated { session }
            | SessionEvent::Ended { session } => session,
        }
    }
}

/// Work the engine asks the coordinator to perform.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Effect {
    /// Schedule a timeout, replacing any timer already set for the session.
    ScheduleTimer {
        session_id: SessionId,
        version: u64,
        kind: TimerKind,
        after: Duration,
    },
    /// Cancel the session's timer.
    CancelTimer { session_id: SessionId },
    /// Broadcast an event.
    Publish(SessionEvent),
}

/// Durable shapes of everything the engine holds.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TalkRecords {
    pub users: Vec<UserView>,
    pub block_edges: Vec<BlockEdge>,
    pub sessions: Vec<SessionView>,
    pub ledger: Vec<LedgerEntry>,
}

/// Counts for diagnostics.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct EngineCounts {
    pub total_users: usize,
    pub available_users: usize,
    pub available_teachers: usize,
    pub open_sessions: usize,
    pub block_edges: usize,
}

/// Owner of all matching and session state.
#[derive(Debug)]
pub struct TalkEngine {
    policy: SessionPolicy,
    directory: UserDirectory,
    blocks: BlockList,
    ledger: PointsLedger,
    sessions: SessionManager,
    effects: Vec<Effect>,
}

impl TalkEngine {
    #[must_use]
    pub fn new(policy: SessionPolicy) -> Self {
        Self {
            policy,
            directory: UserDirectory::new(),
            blocks: BlockList::new(),
            ledger: PointsLedger::new(),
            sessions: SessionManager::new(),
            effects: Vec::new(),
        }
    }

    #[must_use]
    pub fn policy(&self) -> &SessionPolicy {
        &self.policy
    }

    /// Drain the effects queued since the last call.
    pub fn take_effects(&mut self) -> Vec<Effect> {
        mem::take(&mut self.effects)
    }

    /// Current directory snapshot (rebuilt only after a change).
    pub fn snapshot(&mut self) -> Arc<DirectorySnapshot> {
        self.directory.snapshot()
    }

    // ------------------------------------------------------------------
    // Users
    // ------------------------------------------------------------------

    /// Register a user and write the initial points grant.
    ///
    /// # Errors
    ///
    /// `InvalidRequest` if the registration is malformed.
    pub fn register_user(
        &mut self,
        new_user: &NewUser,
        wall: DateTime<Utc>,
    ) -> Result<UserView, TalkError> {
        let id = self
            .directory
            .register(new_user, &self.policy.supported_languages, wall)?
            .id;

        let initial = u64::from(self.policy.initial_points);
        if initial > 0 {
            self.ledger
                .credit(id, initial, LedgerReason::InitialGrant, wall);
        }

        self.user_view(&id)
    }

    /// User with current balance.
    ///
    /// # Errors
    ///
    /// `NotFound` for unknown users.
    pub fn user_view(&self, user_id: &UserId) -> Result<UserView, TalkError> {
        let user = self.directory.require(user_id)?;
        Ok(user.to_view(self.ledger.balance(user_id)))
    }

    /// # Errors
    ///
    /// `NotFound`, or `AlreadyInSession` while the user has an open session.
    pub fn set_available(&mut self, user_id: &UserId) -> Result<UserView, TalkError> {
        self.directory.set_available(user_id)?;
        self.user_view(user_id)
    }

    /// Take a user offline, ending their open session if they had one.
    ///
    /// # Errors
    ///
    /// `NotFound` for unknown users.
    pub fn set_offline(
        &mut self,
        user_id: &UserId,
        now: Instant,
        wall: DateTime<Utc>,
    ) -> Result<UserView, TalkError> {
        let previous = self.directory.set_offline(user_id)?;

        if previous == Availability::InSession {
            if let Some(session_id) = self.sessions.open_session_for(user_id).map(|s| s.id) {
                let min = self.policy.min_completed_duration;
                let transition = self.sessions.apply(&session_id, |s| {
                    s.depart(user_id, true, min, now, wall)
                })?;
                if transition == Transition::Ended {
                    self.settle(&session_id, now, wall);
                }
            }
        }

        self.user_view(user_id)
    }

    // ------------------------------------------------------------------
    // Matching
    // ------------------------------------------------------------------

    /// Pair an available student with a teacher and open a pending session.
    ///
    /// Either every step (availability, debit, session, timer) happens or
    /// none does: a failed step releases both users and returns the debit.
    ///
    /// # Errors
    ///
    /// `NotFound`, `InvalidRole`, `NotAvailable`, `InsufficientPoints`,
    /// `NoTeacherAvailable`, or `InvariantViolation` on an attempted double match.
    pub fn find_match(
        &mut self,
        student_id: &UserId,
        now: Instant,
        wall: DateTime<Utc>,
    ) -> Result<SessionView, TalkError> {
        let result = self.try_match(student_id, now, wall);
        metrics::record_match_attempt(matchmaker::outcome_label(&result));
        result
    }

    fn try_match(
        &mut self,
        student_id: &UserId,
        now: Instant,
        wall: DateTime<Utc>,
    ) -> Result<SessionView, TalkError> {
        let cost = u64::from(self.policy.points_per_session);
        let language =
            matchmaker::eligible_student(&self.directory, &self.ledger, student_id, cost)?;

        let snapshot = self.directory.snapshot();
        let teacher_id =
            matchmaker::select_teacher(&snapshot, &language, *student_id, &self.blocks)
                .ok_or(TalkError::NoTeacherAvailable)?;

        // The snapshot is fresh, but verify before mutating anything
        let teacher_available = self
            .directory
            .get(&teacher_id)
            .is_some_and(|t| t.availability == Availability::Available);
        let already_open = [student_id, &teacher_id]
            .into_iter()
            .any(|id| self.sessions.open_session_for(id).is_some());
        if !teacher_available || already_open {
            warn!(
                target: "talk.session",
                student_id = %student_id,
                teacher_id = %teacher_id,
                teacher_available,
                already_open,
                "Rejected match that would break the one-session-per-user rule"
            );
            return Err(TalkError::InvariantViolation(
                "participant already has an open session".to_string(),
            ));
        }

        self.directory.set_in_session(student_id)?;
        if let Err(e) = self.directory.set_in_session(&teacher_id) {
            self.directory.release(student_id);
            return Err(e);
        }

        let session_id = SessionId::new();
        if let Err(e) = self.ledger.debit(
            *student_id,
            cost,
            LedgerReason::SessionDebit { session_id },
            wall,
        ) {
            self.directory.release(student_id);
            self.directory.release(&teacher_id);
            return Err(e);
        }

        let session = Session::new(
            session_id,
            *student_id,
            teacher_id,
            language,
            cost,
            now,
            wall,
        );
        let version = match self.sessions.create(session) {
            Ok(created) => created.version,
            Err(e) => {
                self.ledger.credit(
                    *student_id,
                    cost,
                    LedgerReason::SessionRefund { session_id },
                    wall,
                );
                self.directory.release(student_id);
                self.directory.release(&teacher_id);
                return Err(e);
            }
        };

        info!(
            target: "talk.session",
            session_id = %session_id,
            student_id = %student_id,
            teacher_id = %teacher_id,
            "Match made"
        );

        self.effects.push(Effect::ScheduleTimer {
            session_id,
            version,
            kind: TimerKind::JoinWindow,
            after: self.policy.join_grace_period,
        });
        let view = self.session_view(&session_id, now)?;
        self.effects
            .push(Effect::Publish(SessionEvent::Created { session: view.clone() }));
        Ok(view)
    }

    // ------------------------------------------------------------------
    // Sessions
    // ------------------------------------------------------------------

    /// # Errors
    ///
    /// `NotFound`, `Unauthorized` or `InvalidState`.
    pub fn join(
        &mut self,
        session_id: &SessionId,
        user_id: &UserId,
        now: Instant,
        wall: DateTime<Utc>,
    ) -> Result<SessionView, TalkError> {
        let transition = self
            .sessions
            .apply(session_id, |s| s.join(user_id, now, wall))?;

        if transition == Transition::Activated {
            let view = self.session_view(session_id, now)?;
            info!(
                target: "talk.session",
                session_id = %session_id,
                "Session active"
            );
            self.effects.push(Effect::ScheduleTimer {
                session_id: *session_id,
                version: view.version,
                kind: TimerKind::SessionDuration,
                after: self.policy.session_duration,
            });
            self.effects
                .push(Effect::Publish(SessionEvent::Activated { session: view }));
        }

        self.session_view(session_id, now)
    }

    /// # Errors
    ///
    /// `NotFound`, `Unauthorized` or `InvalidState`.
    pub fn leave(
        &mut self,
        session_id: &SessionId,
        user_id: &UserId,
        now: Instant,
        wall: DateTime<Utc>,
    ) -> Result<SessionView, TalkError> {
        let min = self.policy.min_completed_duration;
        let transition = self
            .sessions
            .apply(session_id, |s| s.depart(user_id, false, min, now, wall))?;

        if transition == Transition::Ended {
            self.settle(session_id, now, wall);
        }
        self.session_view(session_id, now)
    }

    /// Apply a fired timer. Unknown sessions and stale versions are ignored.
    pub fn expire(
        &mut self,
        session_id: &SessionId,
        kind: TimerKind,
        version: u64,
        now: Instant,
        wall: DateTime<Utc>,
    ) -> Transition {
        let transition = self
            .sessions
            .apply(session_id, |s| Ok(s.expire(kind, version, now, wall)))
            .unwrap_or(Transition::Unchanged);

        match transition {
            Transition::Ended => self.settle(session_id, now, wall),
            _ => debug!(
                target: "talk.timer",
                session_id = %session_id,
                kind = kind.as_str(),
                version,
                "Ignored stale timer"
            ),
        }
        transition
    }

    /// Register a block for the session's pair and end it if still open.
    ///
    /// # Errors
    ///
    /// `NotFound` or `Unauthorized` if `reporter` is not a participant.
    pub fn report(
        &mut self,
        session_id: &SessionId,
        reporter: &UserId,
        now: Instant,
        wall: DateTime<Utc>,
    ) -> Result<SessionView, TalkError> {
        let session = self.sessions.require(session_id)?;
        if !session.is_participant(reporter) {
            return Err(TalkError::Unauthorized);
        }
        let (student_id, teacher_id) = (session.student_id, session.teacher_id);

        if self.blocks.block(student_id, teacher_id, wall) {
            info!(
                target: "talk.session",
                session_id = %session_id,
                reporter = %reporter,
                "Pair blocked after report"
            );
        }

        let by = *reporter;
        let transition = self.sessions.apply(session_id, |s| {
            Ok(s.abort(EndReason::Reported { by }, now, wall))
        })?;
        if transition == Transition::Ended {
            self.settle(session_id, now, wall);
        }

        self.session_view(session_id, now)
    }

    /// Abort every open session (shutdown). Returns how many were aborted.
    pub fn abort_all(&mut self, now: Instant, wall: DateTime<Utc>) -> usize {
        let mut aborted = 0;
        for session_id in self.sessions.open_ids() {
            let transition = self
                .sessions
                .apply(&session_id, |s| Ok(s.abort(EndReason::Shutdown, now, wall)))
                .unwrap_or(Transition::Unchanged);
            if transition == Transition::Ended {
                self.settle(&session_id, now, wall);
                aborted += 1;
            }
        }
        aborted
    }

    /// Post-transition bookkeeping for an ended session: availability,
    /// points, fairness, metrics, timer cancellation and the `ended` event.
    fn settle(&mut self, session_id: &SessionId, now: Instant, wall: DateTime<Utc>) {
        let Some(session) = self.sessions.get(session_id) else {
            return;
        };
        let (student_id, teacher_id) = (session.student_id, session.teacher_id);
        let status = session.status;
        let reason = session.end_reason.unwrap_or(EndReason::Shutdown);
        let charged = session.points_charged;
        let refund = self.refund_due(session);
        let active = session.active_duration(now);

        self.directory.release(&student_id);
        self.directory.release(&teacher_id);

        if status == SessionStatus::Completed {
            self.directory.record_completion(&student_id, now, wall);
            self.directory.record_completion(&teacher_id, now, wall);

            let reward = u64::from(self.policy.teacher_reward_points);
            if reward > 0 {
                self.ledger.credit(
                    teacher_id,
                    reward,
                    LedgerReason::SessionReward {
                        session_id: *session_id,
                    },
                    wall,
                );
            }
        } else if refund && charged > 0 {
            self.ledger.credit(
                student_id,
                charged,
                LedgerReason::SessionRefund {
                    session_id: *session_id,
                },
                wall,
            );
            self.sessions.mark_refunded(session_id);
        }

        info!(
            target: "talk.session",
            session_id = %session_id,
            status = status.as_str(),
            reason = reason.as_str(),
            refunded = refund && status == SessionStatus::Aborted,
            active_seconds = active.map(|d| d.as_secs()),
            "Session ended"
        );
        metrics::record_session_ended(status.as_str(), reason.as_str());
        if let Some(active) = active {
            metrics::record_session_active_duration(active);
        }

        self.effects.push(Effect::CancelTimer {
            session_id: *session_id,
        });
        if let Ok(view) = self.session_view(session_id, now) {
            self.effects
                .push(Effect::Publish(SessionEvent::Ended { session: view }));
        }
    }

    fn refund_due(&self, session: &Session) -> bool {
        if session.status != SessionStatus::Aborted {
            return false;
        }
        let teacher_override = self.policy.refund_on_teacher_no_show;

        match session.end_reason {
            Some(EndReason::JoinTimeout { teacher_joined, .. }) => {
                teacher_joined || teacher_override
            }
            Some(EndReason::Left { by } | EndReason::Disconnected { user: by })
                if !session.was_activated() =>
            {
                by == session.student_id || teacher_override
            }
            Some(EndReason::Reported { by }) => by == session.student_id,
            _ => true,
        }
    }

    /// # Errors
    ///
    /// `NotFound` for unknown sessions.
    pub fn session_view(&self, session_id: &SessionId, now: Instant) -> Result<SessionView, TalkError> {
        let session = self.sessions.require(session_id)?;
        Ok(session.to_view(
            now,
            self.policy.join_grace_period,
            self.policy.session_duration,
        ))
    }

    /// Session as seen by `requester`; `None` skips the participant check.
    ///
    /// # Errors
    ///
    /// `NotFound`, or `Unauthorized` for non-participants.
    pub fn get_session(
        &self,
        session_id: &SessionId,
        requester: Option<&UserId>,
        now: Instant,
    ) -> Result<SessionView, TalkError> {
        let session = self.sessions.require(session_id)?;
        if let Some(requester) = requester {
            if !session.is_participant(requester) {
                return Err(TalkError::Unauthorized);
            }
        }
        self.session_view(session_id, now)
    }

    /// The user's open session, if any.
    ///
    /// # Errors
    ///
    /// `NotFound` for unknown users.
    pub fn current_session(
        &self,
        user_id: &UserId,
        now: Instant,
    ) -> Result<Option<SessionView>, TalkError> {
        self.directory.require(user_id)?;
        Ok(self.sessions.open_session_for(user_id).map(|s| {
            s.to_view(
                now,
                self.policy.join_grace_period,
                self.policy.session_duration,
            )
        }))
    }

    // ------------------------------------------------------------------
    // Blocks and points
    // ------------------------------------------------------------------

    /// Register a block edge. Returns `false` if it already existed.
    ///
    /// # Errors
    ///
    /// `NotFound` for unknown users, `InvalidRole` if the roles do not match.
    pub fn block(
        &mut self,
        student_id: &UserId,
        teacher_id: &UserId,
        wall: DateTime<Utc>,
    ) -> Result<bool, TalkError> {
        if self.directory.require(student_id)?.role() != Role::Student {
            return Err(TalkError::InvalidRole("expected a student".to_string()));
        }
        if self.directory.require(teacher_id)?.role() != Role::Teacher {
            return Err(TalkError::InvalidRole("expected a teacher".to_string()));
        }
        Ok(self.blocks.block(*student_id, *teacher_id, wall))
    }

    #[must_use]
    pub fn is_blocked(&self, student_id: &UserId, teacher_id: &UserId) -> bool {
        self.blocks.is_blocked(*student_id, *teacher_id)
    }

    /// Administrative top-up.
    ///
    /// # Errors
    ///
    /// `NotFound` for unknown users, `InvalidRequest` for a zero amount.
    pub fn credit(
        &mut self,
        user_id: &UserId,
        amount: u64,
        wall: DateTime<Utc>,
    ) -> Result<LedgerEntry, TalkError> {
        self.directory.require(user_id)?;
        if amount == 0 {
            return Err(TalkError::InvalidRequest(
                "amount must be positive".to_string(),
            ));
        }
        Ok(self
            .ledger
            .credit(*user_id, amount, LedgerReason::Adjustment, wall))
    }

    /// # Errors
    ///
    /// `NotFound` for unknown users.
    pub fn ledger_entries(&self, user_id: &UserId) -> Result<Vec<LedgerEntry>, TalkError> {
        self.directory.require(user_id)?;
        Ok(self.ledger.entries_for(user_id))
    }

    /// Ledger balance recomputed from entries.
    #[must_use]
    pub fn replay_balance(&self, user_id: &UserId) -> i64 {
        self.ledger.replay_balance(user_id)
    }

    // ------------------------------------------------------------------
    // Diagnostics
    // ------------------------------------------------------------------

    /// Export every record.
    #[must_use]
    pub fn export_records(&self, now: Instant) -> TalkRecords {
        TalkRecords {
            users: self
                .directory
                .users()
                .map(|u| u.to_view(self.ledger.balance(&u.id)))
                .collect(),
            block_edges: self.blocks.edges().cloned().collect(),
            sessions: self
                .sessions
                .sessions()
                .map(|s| {
                    s.to_view(
                        now,
                        self.policy.join_grace_period,
                        self.policy.session_duration,
                    )
                })
                .collect(),
            ledger: self.ledger.entries().to_vec(),
        }
    }

    pub fn counts(&mut self) -> EngineCounts {
        let snapshot = self.directory.snapshot();
        EngineCounts {
            total_users: snapshot.total_users,
            available_users: snapshot.available_users,
            available_teachers: snapshot.available_teacher_count(),
            open_sessions: self.sessions.open_count(),
            block_edges: self.blocks.len(),
        }
    }
}
