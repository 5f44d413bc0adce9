//! Session timeouts.
//!
//! Each session has at most one live timer (join window while pending,
//! talk duration while active). A timer is a spawned task that sleeps and
//! races the session's `CancellationToken`; on expiry it posts
//! `TimerFired` back to the coordinator through a weak sender, so pending
//! timers never keep the mailbox open.
//!
//! A timer that already fired may still be in the mailbox when its session
//! moves on. The version carried by the message makes it a no-op in the
//! engine, and `fired` only forgets the entry scheduled for that version, so
//! a newer timer stays cancellable.

use super::messages::CoordinatorMessage;

use crate::session::TimerKind;

use common::types::SessionId;
use std::collections::HashMap;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::debug;

/// Live timers keyed by session.
pub struct SessionTimers {
    sender: mpsc::WeakSender<CoordinatorMessage>,
    parent: CancellationToken,
    tokens: HashMap<SessionId, (u64, CancellationToken)>,
}

impl SessionTimers {
    /// Timers are cancelled when `parent` is.
    #[must_use]
    pub fn new(sender: mpsc::WeakSender<CoordinatorMessage>, parent: CancellationToken) -> Self {
        Self {
            sender,
            parent,
            tokens: HashMap::new(),
        }
    }

    /// Schedule a timeout, replacing the session's current timer.
    pub fn schedule(&mut self, session_id: SessionId, version: u64, kind: TimerKind, after: Duration) {
        self.cancel(&session_id);

        let token = self.parent.child_token();
        self.tokens.insert(session_id, (version, token.clone()));

        let sender = self.sender.clone();
        // Deadline is fixed here, not when the task is first polled
        let sleep = tokio::time::sleep(after);
        tokio::spawn(async move {
            tokio::select! {
                biased;

                () = token.cancelled() => {
                    debug!(
                        target: "talk.timer",
                        session_id = %session_id,
                        kind = kind.as_str(),
                        "Timer cancelled"
                    );
                }
                () = sleep => {
                    let Some(sender) = sender.upgrade() else {
                        return;
                    };
                    let message = CoordinatorMessage::TimerFired {
                        session_id,
                        version,
                        kind,
                    };
                    if sender.send(message).await.is_err() {
                        debug!(
                            target: "talk.timer",
                            session_id = %session_id,
                            "Coordinator gone, timer dropped"
                        );
                    }
                }
            }
        });

        debug!(
            target: "talk.timer",
            session_id = %session_id,
            kind = kind.as_str(),
            version,
            after_secs = after.as_secs(),
            "Timer scheduled"
        );
    }

    /// Cancel the session's timer, if any.
    pub fn cancel(&mut self, session_id: &SessionId) {
        if let Some((_, token)) = self.tokens.remove(session_id) {
            token.cancel();
        }
    }

    /// Forget a timer that has fired. A stale `version` leaves the
    /// session's current timer in place.
    pub fn fired(&mut self, session_id: &SessionId, version: u64) {
        if self
            .tokens
            .get(session_id)
            .is_some_and(|(scheduled, _)| *scheduled == version)
        {
            self.tokens.remove(session_id);
        }
    }

    /// Cancel every timer.
    pub fn cancel_all(&mut self) {
        for (_, (_, token)) in self.tokens.drain() {
            token.cancel();
        }
    }

    /// Number of live timers.
    #[must_use]
    pub fn len(&self) -> usize {
        self.tokens.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.tokens.is_empty()
    }
}
