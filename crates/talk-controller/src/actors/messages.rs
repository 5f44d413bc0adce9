//! Message types for the coordinator mailbox.
//!
//! All mutations go through `tokio::sync::mpsc`; replies come back on a
//! `tokio::sync::oneshot`.

use crate::directory::{NewUser, UserView};
use crate::engine::TalkRecords;
use crate::errors::TalkError;
use crate::ledger::LedgerEntry;
use crate::session::{SessionView, TimerKind};

use common::types::{SessionId, UserId};
use serde::{Deserialize, Serialize};
use tokio::sync::oneshot;

/// Messages sent to `MatchCoordinator`.
#[derive(Debug)]
pub enum CoordinatorMessage {
    /// Register a new user.
    RegisterUser {
        new_user: NewUser,
        respond_to: oneshot::Sender<Result<UserView, TalkError>>,
    },

    /// Look up a user with their current balance.
    GetUser {
        user_id: UserId,
        respond_to: oneshot::Sender<Result<UserView, TalkError>>,
    },

    /// Mark a user available for matching.
    SetAvailable {
        user_id: UserId,
        respond_to: oneshot::Sender<Result<UserView, TalkError>>,
    },

    /// Take a user offline (ends their open session).
    SetOffline {
        user_id: UserId,
        respond_to: oneshot::Sender<Result<UserView, TalkError>>,
    },

    /// Single-shot match attempt for a student.
    FindMatch {
        student_id: UserId,
        respond_to: oneshot::Sender<Result<SessionView, TalkError>>,
    },

    /// A participant signals readiness.
    Join {
        session_id: SessionId,
        user_id: UserId,
        respond_to: oneshot::Sender<Result<SessionView, TalkError>>,
    },

    /// A participant ends the session.
    Leave {
        session_id: SessionId,
        user_id: UserId,
        respond_to: oneshot::Sender<Result<SessionView, TalkError>>,
    },

    /// Read a session. `requester` restricts access to participants.
    GetSession {
        session_id: SessionId,
        requester: Option<UserId>,
        respond_to: oneshot::Sender<Result<SessionView, TalkError>>,
    },

    /// The user's open session, if any.
    CurrentSession {
        user_id: UserId,
        respond_to: oneshot::Sender<Result<Option<SessionView>, TalkError>>,
    },

    /// Register a block edge.
    Block {
        student_id: UserId,
        teacher_id: UserId,
        respond_to: oneshot::Sender<Result<bool, TalkError>>,
    },

    /// Report the counterpart of a session.
    Report {
        session_id: SessionId,
        reporter: UserId,
        respond_to: oneshot::Sender<Result<SessionView, TalkError>>,
    },

    /// Membership test on the block list.
    IsBlocked {
        student_id: UserId,
        teacher_id: UserId,
        respond_to: oneshot::Sender<bool>,
    },

    /// Administrative points top-up.
    Credit {
        user_id: UserId,
        amount: u64,
        respond_to: oneshot::Sender<Result<LedgerEntry, TalkError>>,
    },

    /// Ledger entries for one user.
    LedgerEntries {
        user_id: UserId,
        respond_to: oneshot::Sender<Result<Vec<LedgerEntry>, TalkError>>,
    },

    /// Durable shapes of all records.
    ExportRecords {
        respond_to: oneshot::Sender<TalkRecords>,
    },

    /// Counts for health checks.
    GetStatus {
        respond_to: oneshot::Sender<CoordinatorStatus>,
    },

    /// Stop accepting mutations and abort open sessions.
    Shutdown {
        respond_to: oneshot::Sender<Result<usize, TalkError>>,
    },

    /// A scheduled timeout fired. Sent by timer tasks, never by clients.
    TimerFired {
        session_id: SessionId,
        version: u64,
        kind: TimerKind,
    },
}

impl CoordinatorMessage {
    /// Whether the message changes state (rejected while draining).
    #[must_use]
    pub fn is_mutation(&self) -> bool {
        matches!(
            self,
            CoordinatorMessage::RegisterUser { .. }
                | CoordinatorMessage::SetAvailable { .. }
                | CoordinatorMessage::FindMatch { .. }
                | CoordinatorMessage::Join { .. }
                | CoordinatorMessage::Block { .. }
                | CoordinatorMessage::Credit { .. }
        )
    }
}

/// Coordinator status (for health checks and diagnostics).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CoordinatorStatus {
    pub service_id: String,
    pub total_users: usize,
    pub available_users: usize,
    pub available_teachers: usize,
    pub open_sessions: usize,
    pub block_edges: usize,
    pub pending_timers: usize,
    pub mailbox_depth: usize,
    pub draining: bool,
}
