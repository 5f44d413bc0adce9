//! `PointsLedger` - append-only points accounting.
//!
//! A balance is never stored on its own: every change is an entry, and the
//! balance is the fold of a user's entries. A per-user cache is updated only
//! when an entry is appended, so [`PointsLedger::balance`] and
//! [`PointsLedger::replay_balance`] always agree.

use crate::errors::TalkError;
use crate::observability::metrics;

use chrono::{DateTime, Utc};
use common::types::{SessionId, UserId};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use tracing::debug;

/// Why a ledger entry was written.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum LedgerReason {
    /// Points granted on registration.
    InitialGrant,
    /// Student charged for a match.
    SessionDebit { session_id: SessionId },
    /// Charge returned after an aborted session.
    SessionRefund { session_id: SessionId },
    /// Teacher credited for a completed session.
    SessionReward { session_id: SessionId },
    /// Administrative top-up.
    Adjustment,
}

impl LedgerReason {
    /// Returns the reason kind for labels and logs.
    #[must_use]
    pub const fn kind(&self) -> &'static str {
        match self {
            LedgerReason::InitialGrant => "initial_grant",
            LedgerReason::SessionDebit { .. } => "session_debit",
            LedgerReason::SessionRefund { .. } => "session_refund",
            LedgerReason::SessionReward { .. } => "session_reward",
            LedgerReason::Adjustment => "adjustment",
        }
    }
}

/// One immutable ledger record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LedgerEntry {
    /// Global, strictly increasing sequence number.
    pub sequence: u64,
    pub user_id: UserId,
    pub delta: i64,
    pub reason: LedgerReason,
    pub recorded_at: DateTime<Utc>,
}

/// Append-only ledger of point movements for all users.
#[derive(Debug, Default)]
pub struct PointsLedger {
    entries: Vec<LedgerEntry>,
    balances: HashMap<UserId, u64>,
}

impl PointsLedger {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Current balance for `user_id` (0 for users without entries).
    #[must_use]
    pub fn balance(&self, user_id: &UserId) -> u64 {
        self.balances.get(user_id).copied().unwrap_or(0)
    }

    /// Remove `amount` points.
    ///
    /// # Errors
    ///
    /// `InsufficientBalance` if the balance would drop below zero. Nothing is
    /// appended in that case.
    pub fn debit(
        &mut self,
        user_id: UserId,
        amount: u64,
        reason: LedgerReason,
        now: DateTime<Utc>,
    ) -> Result<LedgerEntry, TalkError> {
        let balance = self.balance(&user_id);
        let remaining = balance
            .checked_sub(amount)
            .ok_or(TalkError::InsufficientBalance {
                balance,
                required: amount,
            })?;
        let delta = i64::try_from(amount)
            .map_err(|_| TalkError::InvalidRequest("amount out of range".to_string()))?;

        Ok(self.append(user_id, -delta, remaining, reason, now))
    }

    /// Add `amount` points. Always succeeds; the balance saturates.
    pub fn credit(
        &mut self,
        user_id: UserId,
        amount: u64,
        reason: LedgerReason,
        now: DateTime<Utc>,
    ) -> LedgerEntry {
        let delta = i64::try_from(amount).unwrap_or(i64::MAX);
        // delta is non-negative, so unsigned_abs is the same value as u64
        let balance = self.balance(&user_id).saturating_add(delta.unsigned_abs());
        self.append(user_id, delta, balance, reason, now)
    }

    fn append(
        &mut self,
        user_id: UserId,
        delta: i64,
        balance: u64,
        reason: LedgerReason,
        now: DateTime<Utc>,
    ) -> LedgerEntry {
        let sequence = self.entries.len() as u64 + 1;

        debug!(
            target: "talk.ledger",
            user_id = %user_id,
            delta,
            balance,
            kind = reason.kind(),
            sequence,
            "Ledger entry appended"
        );
        metrics::record_ledger_entry(reason.kind());

        let entry = LedgerEntry {
            sequence,
            user_id,
            delta,
            reason,
            recorded_at: now,
        };
        self.balances.insert(user_id, balance);
        self.entries.push(entry.clone());
        entry
    }

    /// Recompute a balance by folding every entry for the user.
    #[must_use]
    pub fn replay_balance(&self, user_id: &UserId) -> i64 {
        self.entries
            .iter()
            .filter(|e| e.user_id == *user_id)
            .fold(0_i64, |acc, e| acc.saturating_add(e.delta))
    }

    /// Entries for one user, oldest first.
    #[must_use]
    pub fn entries_for(&self, user_id: &UserId) -> Vec<LedgerEntry> {
        self.entries
            .iter()
            .filter(|e| e.user_id == *user_id)
            .cloned()
            .collect()
    }

    /// All entries, oldest first.
    #[must_use]
    pub fn entries(&self) -> &[LedgerEntry] {
        &self.entries
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    #[test]
    fn test_credit_then_debit() {
        let mut ledger = PointsLedger::new();
        let user = UserId::new();

        ledger.credit(user, 5, LedgerReason::InitialGrant, Utc::now());
        let session_id = SessionId::new();
        let entry = ledger
            .debit(user, 1, LedgerReason::SessionDebit { session_id }, Utc::now())
            .unwrap();

        assert_eq!(entry.delta, -1);
        assert_eq!(entry.sequence, 2);
        assert_eq!(ledger.balance(&user), 4);
    }

    #[test]
    fn test_debit_below_zero_is_rejected_without_entry() {
        let mut ledger = PointsLedger::new();
        let user = UserId::new();
        ledger.credit(user, 1, LedgerReason::InitialGrant, Utc::now());

        let result = ledger.debit(user, 2, LedgerReason::Adjustment, Utc::now());
        assert_eq!(
            result.unwrap_err(),
            TalkError::InsufficientBalance {
                balance: 1,
                required: 2
            }
        );
        assert_eq!(ledger.entries().len(), 1);
        assert_eq!(ledger.balance(&user), 1);
    }

    #[test]
    fn test_unknown_user_has_zero_balance() {
        let ledger = PointsLedger::new();
        assert_eq!(ledger.balance(&UserId::new()), 0);
    }

    #[test]
    fn test_balance_equals_fold_of_entries() {
        let mut ledger = PointsLedger::new();
        let alice = UserId::new();
        let bob = UserId::new();
        let session_id = SessionId::new();

        ledger.credit(alice, 5, LedgerReason::InitialGrant, Utc::now());
        ledger.credit(bob, 5, LedgerReason::InitialGrant, Utc::now());
        ledger
            .debit(alice, 1, LedgerReason::SessionDebit { session_id }, Utc::now())
            .unwrap();
        ledger.credit(alice, 1, LedgerReason::SessionRefund { session_id }, Utc::now());
        ledger
            .debit(alice, 1, LedgerReason::SessionDebit { session_id }, Utc::now())
            .unwrap();
        ledger.credit(bob, 1, LedgerReason::SessionReward { session_id }, Utc::now());

        for user in [alice, bob] {
            let replayed = ledger.replay_balance(&user);
            assert_eq!(replayed, i64::try_from(ledger.balance(&user)).unwrap());
        }
        assert_eq!(ledger.balance(&alice), 4);
        assert_eq!(ledger.balance(&bob), 6);
        assert_eq!(ledger.entries_for(&alice).len(), 4);
    }

    #[test]
    fn test_sequences_are_strictly_increasing() {
        let mut ledger = PointsLedger::new();
        let user = UserId::new();
        for _ in 0..3 {
            ledger.credit(user, 1, LedgerReason::Adjustment, Utc::now());
        }
        let sequences: Vec<u64> = ledger.entries().iter().map(|e| e.sequence).collect();
        assert_eq!(sequences, vec![1, 2, 3]);
    }

    #[test]
    fn test_reason_serializes_with_kind_tag() {
        let session_id = SessionId::new();
        let json = serde_json::to_value(LedgerReason::SessionRefund { session_id }).unwrap();
        assert_eq!(json["kind"], "session_refund");
        assert_eq!(json["session_id"], session_id.to_string());
    }
}
