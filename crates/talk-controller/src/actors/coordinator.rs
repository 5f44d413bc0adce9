//! `MatchCoordinator` - single-writer owner of all matching and session state.
//!
//! Every mutation of the directory, block list, ledger or sessions is a
//! message handled one at a time by this actor, which makes matching and
//! session transitions linearizable per user without locks.
//!
//! Reads that only need availability go through the [`DirectorySnapshot`]
//! published on a `watch` channel after each message and never enter the
//! mailbox.
//!
//! # Graceful Shutdown
//!
//! On `shutdown()` the coordinator stops accepting new matches and aborts
//! every open session (students refunded). Cancelling the root token does the
//! same and then stops the actor.

use super::messages::{CoordinatorMessage, CoordinatorStatus};
use super::metrics::{ActorMetrics, MailboxMonitor};
use super::timers::SessionTimers;

use crate::config::SessionPolicy;
use crate::directory::{DirectorySnapshot, NewUser, TeacherEntry, UserView};
use crate::engine::{Effect, SessionEvent, TalkEngine, TalkRecords};
use crate::errors::TalkError;
use crate::ledger::LedgerEntry;
use crate::observability::metrics;
use crate::session::{SessionView, Transition};

use chrono::Utc;
use common::types::{LanguageCode, SessionId, UserId};
use std::sync::Arc;
use tokio::sync::{broadcast, mpsc, oneshot, watch};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

/// Default channel buffer size for the coordinator mailbox.
const COORDINATOR_CHANNEL_BUFFER: usize = 1000;

/// Buffered session events per subscriber before it starts lagging.
const EVENT_CHANNEL_CAPACITY: usize = 256;

/// Handle to the `MatchCoordinator`.
///
/// This is the public interface for interacting with the coordinator.
/// All methods are bounded-latency request/reply calls.
#[derive(Clone)]
pub struct MatchCoordinatorHandle {
    sender: mpsc::Sender<CoordinatorMessage>,
    snapshot: watch::Receiver<Arc<DirectorySnapshot>>,
    events: broadcast::Sender<SessionEvent>,
    mailbox: Arc<MailboxMonitor>,
    metrics: Arc<ActorMetrics>,
    cancel_token: CancellationToken,
}

impl MatchCoordinatorHandle {
    /// Create a new `MatchCoordinator` and return a handle to it.
    ///
    /// This spawns the actor task and returns immediately.
    #[must_use]
    pub fn new(service_id: String, policy: SessionPolicy) -> Self {
        let (sender, receiver) = mpsc::channel(COORDINATOR_CHANNEL_BUFFER);
        let (snapshot_tx, snapshot_rx) = watch::channel(Arc::new(DirectorySnapshot::default()));
        let (events, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        let cancel_token = CancellationToken::new();
        let mailbox = Arc::new(MailboxMonitor::new(service_id.clone()));
        let metrics = ActorMetrics::new();

        let timers = SessionTimers::new(sender.downgrade(), cancel_token.child_token());

        let actor = MatchCoordinator {
            service_id,
            receiver,
            cancel_token: cancel_token.clone(),
            engine: TalkEngine::new(policy),
            timers,
            snapshot: snapshot_tx,
            events: events.clone(),
            mailbox: Arc::clone(&mailbox),
            metrics: Arc::clone(&metrics),
            draining: false,
        };

        tokio::spawn(actor.run());

        Self {
            sender,
            snapshot: snapshot_rx,
            events,
            mailbox,
            metrics,
            cancel_token,
        }
    }

    async fn request<T>(
        &self,
        build: impl FnOnce(oneshot::Sender<T>) -> CoordinatorMessage,
    ) -> Result<T, TalkError> {
        let (tx, rx) = oneshot::channel();
        // Count the message only once it holds a slot; a caller dropped while
        // waiting on a full mailbox leaves the depth unchanged.
        let permit = match self.sender.reserve().await {
            Ok(permit) => permit,
            Err(e) => {
                self.mailbox.record_drop();
                return Err(TalkError::Internal(format!("channel send failed: {e}")));
            }
        };
        self.mailbox.record_enqueue();
        permit.send(build(tx));

        rx.await
            .map_err(|e| TalkError::Internal(format!("response receive failed: {e}")))
    }

    /// Register a new user. New users start offline with the initial grant.
    pub async fn register_user(&self, new_user: NewUser) -> Result<UserView, TalkError> {
        self.request(|respond_to| CoordinatorMessage::RegisterUser {
            new_user,
            respond_to,
        })
        .await?
    }

    /// Look up a user with their current balance.
    pub async fn get_user(&self, user_id: UserId) -> Result<UserView, TalkError> {
        self.request(|respond_to| CoordinatorMessage::GetUser {
            user_id,
            respond_to,
        })
        .await?
    }

    pub async fn set_available(&self, user_id: UserId) -> Result<UserView, TalkError> {
        self.request(|respond_to| CoordinatorMessage::SetAvailable {
            user_id,
            respond_to,
        })
        .await?
    }

    /// Take a user offline, ending any open session on their behalf.
    pub async fn set_offline(&self, user_id: UserId) -> Result<UserView, TalkError> {
        self.request(|respond_to| CoordinatorMessage::SetOffline {
            user_id,
            respond_to,
        })
        .await?
    }

    /// Single-shot match attempt. Returns the new pending session.
    pub async fn find_match(&self, student_id: UserId) -> Result<SessionView, TalkError> {
        self.request(|respond_to| CoordinatorMessage::FindMatch {
            student_id,
            respond_to,
        })
        .await?
    }

    pub async fn join(
        &self,
        session_id: SessionId,
        user_id: UserId,
    ) -> Result<SessionView, TalkError> {
        self.request(|respond_to| CoordinatorMessage::Join {
            session_id,
            user_id,
            respond_to,
        })
        .await?
    }

    pub async fn leave(
        &self,
        session_id: SessionId,
        user_id: UserId,
    ) -> Result<SessionView, TalkError> {
        self.request(|respond_to| CoordinatorMessage::Leave {
            session_id,
            user_id,
            respond_to,
        })
        .await?
    }

    /// Read a session. With `requester` set, only participants may read it.
    pub async fn get_session(
        &self,
        session_id: SessionId,
        requester: Option<UserId>,
    ) -> Result<SessionView, TalkError> {
        self.request(|respond_to| CoordinatorMessage::GetSession {
            session_id,
            requester,
            respond_to,
        })
        .await?
    }

    pub async fn current_session(&self, user_id: UserId) -> Result<Option<SessionView>, TalkError> {
        self.request(|respond_to| CoordinatorMessage::CurrentSession {
            user_id,
            respond_to,
        })
        .await?
    }

    /// Register a block edge. Returns `false` if it already existed.
    pub async fn block(&self, student_id: UserId, teacher_id: UserId) -> Result<bool, TalkError> {
        self.request(|respond_to| CoordinatorMessage::Block {
            student_id,
            teacher_id,
            respond_to,
        })
        .await?
    }

    /// Report the counterpart of a session: blocks the pair and ends the
    /// session if it is still open.
    pub async fn report(
        &self,
        session_id: SessionId,
        reporter: UserId,
    ) -> Result<SessionView, TalkError> {
        self.request(|respond_to| CoordinatorMessage::Report {
            session_id,
            reporter,
            respond_to,
        })
        .await?
    }

    pub async fn is_blocked(&self, student_id: UserId, teacher_id: UserId) -> Result<bool, TalkError> {
        self.request(|respond_to| CoordinatorMessage::IsBlocked {
            student_id,
            teacher_id,
            respond_to,
        })
        .await
    }

    pub async fn credit(&self, user_id: UserId, amount: u64) -> Result<LedgerEntry, TalkError> {
        self.request(|respond_to| CoordinatorMessage::Credit {
            user_id,
            amount,
            respond_to,
        })
        .await?
    }

    pub async fn ledger_entries(&self, user_id: UserId) -> Result<Vec<LedgerEntry>, TalkError> {
        self.request(|respond_to| CoordinatorMessage::LedgerEntries {
            user_id,
            respond_to,
        })
        .await?
    }

    /// Durable shapes of every user, block edge, session and ledger entry.
    pub async fn export_records(&self) -> Result<TalkRecords, TalkError> {
        self.request(|respond_to| CoordinatorMessage::ExportRecords { respond_to })
            .await
    }

    pub async fn status(&self) -> Result<CoordinatorStatus, TalkError> {
        self.request(|respond_to| CoordinatorMessage::GetStatus { respond_to })
            .await
    }

    /// Stop accepting new work and abort open sessions.
    ///
    /// Returns the number of sessions aborted.
    pub async fn shutdown(&self) -> Result<usize, TalkError> {
        self.request(|respond_to| CoordinatorMessage::Shutdown { respond_to })
            .await?
    }

    /// Available teachers for `language`, read from the latest snapshot
    /// without entering the mailbox.
    #[must_use]
    pub fn available_teachers(&self, language: &LanguageCode) -> Vec<TeacherEntry> {
        self.snapshot
            .borrow()
            .available_teachers(language)
            .cloned()
            .collect()
    }

    /// Latest published directory snapshot.
    #[must_use]
    pub fn snapshot(&self) -> Arc<DirectorySnapshot> {
        Arc::clone(&self.snapshot.borrow())
    }

    /// Subscribe to session lifecycle events.
    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<SessionEvent> {
        self.events.subscribe()
    }

    /// Timer counters.
    #[must_use]
    pub fn actor_metrics(&self) -> Arc<ActorMetrics> {
        Arc::clone(&self.metrics)
    }

    /// Cancel the actor (for immediate shutdown).
    pub fn cancel(&self) {
        self.cancel_token.cancel();
    }

    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.cancel_token.is_cancelled()
    }

    #[must_use]
    pub fn child_token(&self) -> CancellationToken {
        self.cancel_token.child_token()
    }
}

/// The `MatchCoordinator` implementation.
///
/// This struct owns the actor state and runs the message loop.
pub struct MatchCoordinator {
    service_id: String,
    receiver: mpsc::Receiver<CoordinatorMessage>,
    cancel_token: CancellationToken,
    engine: TalkEngine,
    timers: SessionTimers,
    snapshot: watch::Sender<Arc<DirectorySnapshot>>,
    events: broadcast::Sender<SessionEvent>,
    mailbox: Arc<MailboxMonitor>,
    metrics: Arc<ActorMetrics>,
    /// Set by `shutdown()`; new matches and registrations are refused.
    draining: bool,
}

impl MatchCoordinator {
    /// Run the actor message loop.
    #[instrument(skip_all, name = "talk.actor.coordinator", fields(service_id = %self.service_id))]
    async fn run(mut self) {
        info!(
            target: "talk.actor.coordinator",
            service_id = %self.service_id,
            "MatchCoordinator started"
        );

        loop {
            tokio::select! {
                () = self.cancel_token.cancelled() => {
                    info!(
                        target: "talk.actor.coordinator",
                        service_id = %self.service_id,
                        "MatchCoordinator received cancellation signal"
                    );
                    self.drain();
                    break;
                }

                msg = self.receiver.recv() => {
                    match msg {
                        Some(message) => {
                            // Timer messages bypass the handle, so they were never counted
                            let from_handle = !matches!(message, CoordinatorMessage::TimerFired { .. });
                            self.handle_message(message);
                            self.apply_effects();
                            self.publish_snapshot();
                            if from_handle {
                                self.mailbox.record_dequeue();
                            }
                        }
                        None => {
                            info!(
                                target: "talk.actor.coordinator",
                                service_id = %self.service_id,
                                "MatchCoordinator channel closed, exiting"
                            );
                            break;
                        }
                    }
                }
            }
        }

        self.timers.cancel_all();
        info!(
            target: "talk.actor.coordinator",
            service_id = %self.service_id,
            messages_processed = self.mailbox.messages_processed(),
            "MatchCoordinator stopped"
        );
    }

    /// Handle a single message.
    fn handle_message(&mut self, message: CoordinatorMessage) {
        if self.draining && message.is_mutation() {
            reject_draining(message);
            return;
        }

        let now = Instant::now();
        let wall = Utc::now();

        match message {
            CoordinatorMessage::RegisterUser {
                new_user,
                respond_to,
            } => {
                let result = self.engine.register_user(&new_user, wall);
                let _ = respond_to.send(result);
            }

            CoordinatorMessage::GetUser {
                user_id,
                respond_to,
            } => {
                let _ = respond_to.send(self.engine.user_view(&user_id));
            }

            CoordinatorMessage::SetAvailable {
                user_id,
                respond_to,
            } => {
                let _ = respond_to.send(self.engine.set_available(&user_id));
            }

            CoordinatorMessage::SetOffline {
                user_id,
                respond_to,
            } => {
                let _ = respond_to.send(self.engine.set_offline(&user_id, now, wall));
            }

            CoordinatorMessage::FindMatch {
                student_id,
                respond_to,
            } => {
                let result = self.engine.find_match(&student_id, now, wall);
                if let Err(e) = &result {
                    debug!(
                        target: "talk.actor.coordinator",
                        student_id = %student_id,
                        error = %e,
                        "Match attempt failed"
                    );
                }
                let _ = respond_to.send(result);
            }

            CoordinatorMessage::Join {
                session_id,
                user_id,
                respond_to,
            } => {
                let _ = respond_to.send(self.engine.join(&session_id, &user_id, now, wall));
            }

            CoordinatorMessage::Leave {
                session_id,
                user_id,
                respond_to,
            } => {
                let _ = respond_to.send(self.engine.leave(&session_id, &user_id, now, wall));
            }

            CoordinatorMessage::GetSession {
                session_id,
                requester,
                respond_to,
            } => {
                let result = self.engine.get_session(&session_id, requester.as_ref(), now);
                let _ = respond_to.send(result);
            }

            CoordinatorMessage::CurrentSession {
                user_id,
                respond_to,
            } => {
                let _ = respond_to.send(self.engine.current_session(&user_id, now));
            }

            CoordinatorMessage::Block {
                student_id,
                teacher_id,
                respond_to,
            } => {
                let _ = respond_to.send(self.engine.block(&student_id, &teacher_id, wall));
            }

            CoordinatorMessage::Report {
                session_id,
                reporter,
                respond_to,
            } => {
                let _ = respond_to.send(self.engine.report(&session_id, &reporter, now, wall));
            }

            CoordinatorMessage::IsBlocked {
                student_id,
                teacher_id,
                respond_to,
            } => {
                let _ = respond_to.send(self.engine.is_blocked(&student_id, &teacher_id));
            }

            CoordinatorMessage::Credit {
                user_id,
                amount,
                respond_to,
            } => {
                let _ = respond_to.send(self.engine.credit(&user_id, amount, wall));
            }

            CoordinatorMessage::LedgerEntries {
                user_id,
                respond_to,
            } => {
                let _ = respond_to.send(self.engine.ledger_entries(&user_id));
            }

            CoordinatorMessage::ExportRecords { respond_to } => {
                let _ = respond_to.send(self.engine.export_records(now));
            }

            CoordinatorMessage::GetStatus { respond_to } => {
                let _ = respond_to.send(self.status());
            }

            CoordinatorMessage::Shutdown { respond_to } => {
                let aborted = self.drain();
                let _ = respond_to.send(Ok(aborted));
            }

            CoordinatorMessage::TimerFired {
                session_id,
                version,
                kind,
            } => {
                self.timers.fired(&session_id, version);
                match self.engine.expire(&session_id, kind, version, now, wall) {
                    Transition::Unchanged => self.metrics.record_timer_stale(),
                    Transition::Activated | Transition::Ended => {
                        self.metrics.record_timer_applied();
                    }
                }
            }
        }
    }

    /// Perform the side effects queued by the engine.
    fn apply_effects(&mut self) {
        for effect in self.engine.take_effects() {
            match effect {
                Effect::ScheduleTimer {
                    session_id,
                    version,
                    kind,
                    after,
                } => self.timers.schedule(session_id, version, kind, after),
                Effect::CancelTimer { session_id } => self.timers.cancel(&session_id),
                Effect::Publish(event) => {
                    // No subscribers is fine
                    let _ = self.events.send(event);
                }
            }
        }
        self.metrics.set_timers_pending(self.timers.len());
    }

    /// Publish a new snapshot if the directory changed.
    fn publish_snapshot(&mut self) {
        let snapshot = self.engine.snapshot();
        self.snapshot.send_if_modified(|current| {
            if Arc::ptr_eq(current, &snapshot) {
                false
            } else {
                *current = Arc::clone(&snapshot);
                true
            }
        });

        metrics::set_users_available(snapshot.available_users);
        metrics::set_sessions_open(self.engine.counts().open_sessions);
    }

    /// Abort all open sessions and stop accepting new work.
    fn drain(&mut self) -> usize {
        let first = !self.draining;
        self.draining = true;

        let aborted = self.engine.abort_all(Instant::now(), Utc::now());
        self.apply_effects();
        self.publish_snapshot();

        if first || aborted > 0 {
            info!(
                target: "talk.actor.coordinator",
                service_id = %self.service_id,
                aborted_sessions = aborted,
                "MatchCoordinator draining"
            );
        }
        aborted
    }

    fn status(&mut self) -> CoordinatorStatus {
        let counts = self.engine.counts();
        CoordinatorStatus {
            service_id: self.service_id.clone(),
            total_users: counts.total_users,
            available_users: counts.available_users,
            available_teachers: counts.available_teachers,
            open_sessions: counts.open_sessions,
            block_edges: counts.block_edges,
            pending_timers: self.timers.len(),
            mailbox_depth: self.mailbox.current_depth(),
            draining: self.draining,
        }
    }
}

/// Reply `Draining` to a mutation received during shutdown.
fn reject_draining(message: CoordinatorMessage) {
    warn!(
        target: "talk.actor.coordinator",
        "Rejected request while draining"
    );
    match message {
        CoordinatorMessage::RegisterUser { respond_to, .. }
        | CoordinatorMessage::SetAvailable { respond_to, .. } => {
            let _ = respond_to.send(Err(TalkError::Draining));
        }
        CoordinatorMessage::FindMatch { respond_to, .. }
        | CoordinatorMessage::Join { respond_to, .. } => {
            let _ = respond_to.send(Err(TalkError::Draining));
        }
        CoordinatorMessage::Block { respond_to, .. } => {
            let _ = respond_to.send(Err(TalkError::Draining));
        }
        CoordinatorMessage::Credit { respond_to, .. } => {
            let _ = respond_to.send(Err(TalkError::Draining));
        }
        _ => {}
    }
}
