//! Append-only credit ledger.
//!
//! Every money-equivalent movement is one immutable entry; the materialized
//! per-user balance is the sum of all `completed` entries' signed amounts.
//! External (payment-provider) events are applied idempotently, keyed on
//! their `external_ref`.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::info;

use crate::Credits;
use crate::model::{BookingId, UserId};

/// Ledger entry identifier.
pub type EntryId = u64;

/// Kind of economic event an entry records.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntryType {
    Purchase,
    Gift,
    Spend,
    Refund,
}

/// Entry settlement status. Only `completed` entries count toward balance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntryStatus {
    Pending,
    Completed,
    Failed,
}

/// Machine-readable reason an entry exists.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Reason {
    BookingCharge(BookingId),
    BookingRefund(BookingId),
    CreditPurchase,
    SubscriptionRenewal,
    Gift,
}

impl std::fmt::Display for Reason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Reason::BookingCharge(id) => write!(f, "booking_charge:{id}"),
            Reason::BookingRefund(id) => write!(f, "booking_refund:{id}"),
            Reason::CreditPurchase => write!(f, "credit_purchase"),
            Reason::SubscriptionRenewal => write!(f, "subscription_renewal"),
            Reason::Gift => write!(f, "gift"),
        }
    }
}

/// One money-equivalent movement for a user. Never mutated in amount after
/// creation; corrections are new entries.
#[derive(Debug, Clone)]
pub struct LedgerEntry {
    pub id: EntryId,
    pub user: UserId,
    /// Signed: spends are negative, credits positive.
    pub amount: Credits,
    pub entry_type: EntryType,
    pub reason: Reason,
    pub description: String,
    pub external_ref: Option<String>,
    pub status: EntryStatus,
    pub created_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
}

/// Result of applying an external event: the entry it resolved to, and
/// whether this call was a duplicate delivery replaying a prior result.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Applied {
    pub entry: EntryId,
    pub replayed: bool,
}

/// Error during ledger mutation.
#[derive(Debug, Error)]
pub enum LedgerError {
    #[error("insufficient balance for user {user}: balance {balance}, requested {requested}")]
    InsufficientBalance {
        user: UserId,
        balance: Credits,
        requested: Credits,
    },
}

/// The credit ledger: append-only entry log plus materialized balances.
#[derive(Debug, Default)]
pub struct CreditLedger {
    entries: Vec<LedgerEntry>,
    balances: HashMap<UserId, Credits>,
    /// Completed external events by ref, for duplicate-delivery replay.
    external: HashMap<String, EntryId>,
}

impl CreditLedger {
    pub fn new() -> Self {
        Self::default()
    }

    /// The user's materialized balance; zero for users never seen.
    pub fn balance(&self, user: UserId) -> Credits {
        self.balances.get(&user).copied().unwrap_or_default()
    }

    /// All balances, in no particular order.
    pub fn balances(&self) -> impl Iterator<Item = (UserId, Credits)> + '_ {
        self.balances.iter().map(|(user, bal)| (*user, *bal))
    }

    pub fn entry(&self, id: EntryId) -> Option<&LedgerEntry> {
        self.entries.get(id as usize)
    }

    /// All entries for one user, in append order.
    pub fn entries_for(&self, user: UserId) -> impl Iterator<Item = &LedgerEntry> + '_ {
        self.entries.iter().filter(move |e| e.user == user)
    }

    /// Atomically append a completed `spend` entry, failing if it would
    /// drive the user's balance negative.
    pub fn debit(
        &mut self,
        user: UserId,
        amount: Credits,
        reason: Reason,
        now: DateTime<Utc>,
    ) -> Result<EntryId, LedgerError> {
        let balance = self.balance(user);
        if balance < amount {
            return Err(LedgerError::InsufficientBalance {
                user,
                balance,
                requested: amount,
            });
        }
        Ok(self.append_completed(user, -amount, EntryType::Spend, reason, None, now))
    }

    /// Append a completed credit entry of the given type.
    pub fn credit(
        &mut self,
        user: UserId,
        amount: Credits,
        entry_type: EntryType,
        reason: Reason,
        now: DateTime<Utc>,
    ) -> EntryId {
        self.append_completed(user, amount, entry_type, reason, None, now)
    }

    /// Apply an externally-sourced credit grant (payment webhook),
    /// idempotently keyed on `external_ref`.
    ///
    /// A prior completed entry with the same ref short-circuits to the
    /// original result without touching the balance, which makes
    /// at-least-once delivery safe. A prior failed attempt does not block a
    /// retry.
    pub fn apply_external_event(
        &mut self,
        external_ref: &str,
        user: UserId,
        amount: Credits,
        entry_type: EntryType,
        reason: Reason,
        now: DateTime<Utc>,
    ) -> Applied {
        if let Some(&entry) = self.external.get(external_ref) {
            info!(external_ref, entry, "external event replayed");
            return Applied {
                entry,
                replayed: true,
            };
        }
        let entry = self.append_completed(
            user,
            amount,
            entry_type,
            reason,
            Some(external_ref.to_string()),
            now,
        );
        self.external.insert(external_ref.to_string(), entry);
        Applied {
            entry,
            replayed: false,
        }
    }

    /// Record a failed external event (e.g. a payment that did not settle).
    /// Failed entries never affect the balance and are not indexed for
    /// replay, so a later successful delivery of the same ref still applies.
    pub fn fail_external(
        &mut self,
        external_ref: &str,
        user: UserId,
        reason: Reason,
        now: DateTime<Utc>,
    ) -> EntryId {
        let id = self.entries.len() as EntryId;
        self.entries.push(LedgerEntry {
            id,
            user,
            amount: Credits::ZERO,
            entry_type: EntryType::Purchase,
            reason,
            description: reason.to_string(),
            external_ref: Some(external_ref.to_string()),
            status: EntryStatus::Failed,
            created_at: now,
            completed_at: None,
        });
        id
    }

    fn append_completed(
        &mut self,
        user: UserId,
        amount: Credits,
        entry_type: EntryType,
        reason: Reason,
        external_ref: Option<String>,
        now: DateTime<Utc>,
    ) -> EntryId {
        let id = self.entries.len() as EntryId;
        self.entries.push(LedgerEntry {
            id,
            user,
            amount,
            entry_type,
            reason,
            description: reason.to_string(),
            external_ref,
            status: EntryStatus::Completed,
            created_at: now,
            completed_at: Some(now),
        });
        *self.balances.entry(user).or_default() += amount;
        id
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn now() -> DateTime<Utc> {
        "2026-03-01T12:00:00Z".parse().unwrap()
    }

    fn credits(minor: i64) -> Credits {
        Credits::from_minor(minor)
    }

    #[test]
    fn balance_starts_at_zero() {
        let ledger = CreditLedger::new();
        assert_eq!(ledger.balance(1), Credits::ZERO);
    }

    #[test]
    fn credit_increases_balance() {
        let mut ledger = CreditLedger::new();
        ledger.credit(1, credits(1500), EntryType::Purchase, Reason::CreditPurchase, now());
        assert_eq!(ledger.balance(1), credits(1500));

        let entry = ledger.entries_for(1).next().unwrap();
        assert_eq!(entry.entry_type, EntryType::Purchase);
        assert_eq!(entry.status, EntryStatus::Completed);
        assert_eq!(entry.completed_at, Some(now()));
    }

    #[test]
    fn debit_decreases_balance_and_records_negative_spend() {
        let mut ledger = CreditLedger::new();
        ledger.credit(1, credits(2000), EntryType::Purchase, Reason::CreditPurchase, now());
        let entry = ledger.debit(1, credits(1500), Reason::BookingCharge(7), now()).unwrap();

        assert_eq!(ledger.balance(1), credits(500));
        let entry = ledger.entry(entry).unwrap();
        assert_eq!(entry.amount, credits(-1500));
        assert_eq!(entry.entry_type, EntryType::Spend);
        assert_eq!(entry.description, "booking_charge:7");
    }

    #[test]
    fn debit_never_drives_balance_negative() {
        let mut ledger = CreditLedger::new();
        ledger.credit(1, credits(1000), EntryType::Purchase, Reason::CreditPurchase, now());

        let result = ledger.debit(1, credits(1001), Reason::BookingCharge(1), now());
        assert!(matches!(
            result,
            Err(LedgerError::InsufficientBalance { user: 1, .. })
        ));
        // Balance unchanged, no entry appended.
        assert_eq!(ledger.balance(1), credits(1000));
        assert_eq!(ledger.entries_for(1).count(), 1);
    }

    #[test]
    fn debit_exact_balance_succeeds() {
        let mut ledger = CreditLedger::new();
        ledger.credit(1, credits(1000), EntryType::Purchase, Reason::CreditPurchase, now());
        ledger.debit(1, credits(1000), Reason::BookingCharge(1), now()).unwrap();
        assert_eq!(ledger.balance(1), Credits::ZERO);
    }

    #[test]
    fn refund_after_charge_nets_to_zero() {
        let mut ledger = CreditLedger::new();
        ledger.credit(1, credits(1500), EntryType::Purchase, Reason::CreditPurchase, now());
        ledger.debit(1, credits(1500), Reason::BookingCharge(1), now()).unwrap();
        ledger.credit(1, credits(1500), EntryType::Refund, Reason::BookingRefund(1), now());

        assert_eq!(ledger.balance(1), credits(1500));
        let booking_net: Credits = ledger
            .entries_for(1)
            .filter(|e| {
                matches!(e.reason, Reason::BookingCharge(1) | Reason::BookingRefund(1))
            })
            .fold(Credits::ZERO, |acc, e| acc + e.amount);
        assert_eq!(booking_net, Credits::ZERO);
    }

    #[test]
    fn external_event_applies_once() {
        let mut ledger = CreditLedger::new();
        let first = ledger.apply_external_event(
            "evt_123",
            1,
            credits(800),
            EntryType::Purchase,
            Reason::SubscriptionRenewal,
            now(),
        );
        assert!(!first.replayed);
        assert_eq!(ledger.balance(1), credits(800));

        // Duplicate delivery: one entry, one balance delta.
        let second = ledger.apply_external_event(
            "evt_123",
            1,
            credits(800),
            EntryType::Purchase,
            Reason::SubscriptionRenewal,
            now(),
        );
        assert!(second.replayed);
        assert_eq!(second.entry, first.entry);
        assert_eq!(ledger.balance(1), credits(800));
        assert_eq!(ledger.entries_for(1).count(), 1);
    }

    #[test]
    fn distinct_external_refs_apply_independently() {
        let mut ledger = CreditLedger::new();
        ledger.apply_external_event(
            "evt_1", 1, credits(500), EntryType::Purchase, Reason::SubscriptionRenewal, now(),
        );
        ledger.apply_external_event(
            "evt_2", 1, credits(500), EntryType::Purchase, Reason::SubscriptionRenewal, now(),
        );
        assert_eq!(ledger.balance(1), credits(1000));
    }

    #[test]
    fn failed_external_event_does_not_block_retry() {
        let mut ledger = CreditLedger::new();
        ledger.fail_external("evt_9", 1, Reason::SubscriptionRenewal, now());
        assert_eq!(ledger.balance(1), Credits::ZERO);

        let applied = ledger.apply_external_event(
            "evt_9", 1, credits(500), EntryType::Purchase, Reason::SubscriptionRenewal, now(),
        );
        assert!(!applied.replayed);
        assert_eq!(ledger.balance(1), credits(500));

        let failed = ledger
            .entries_for(1)
            .find(|e| e.status == EntryStatus::Failed)
            .unwrap();
        assert_eq!(failed.amount, Credits::ZERO);
        assert!(failed.completed_at.is_none());
    }

    #[test]
    fn balance_equals_sum_of_completed_entries() {
        let mut ledger = CreditLedger::new();
        ledger.credit(1, credits(2000), EntryType::Purchase, Reason::CreditPurchase, now());
        ledger.credit(1, credits(300), EntryType::Gift, Reason::Gift, now());
        ledger.debit(1, credits(1500), Reason::BookingCharge(1), now()).unwrap();
        ledger.fail_external("evt_x", 1, Reason::SubscriptionRenewal, now());

        let completed_sum: Credits = ledger
            .entries_for(1)
            .filter(|e| e.status == EntryStatus::Completed)
            .fold(Credits::ZERO, |acc, e| acc + e.amount);
        assert_eq!(ledger.balance(1), completed_sum);
        assert_eq!(ledger.balance(1), credits(800));
    }

    #[test]
    fn users_are_independent() {
        let mut ledger = CreditLedger::new();
        ledger.credit(1, credits(100), EntryType::Purchase, Reason::CreditPurchase, now());
        ledger.credit(2, credits(200), EntryType::Purchase, Reason::CreditPurchase, now());
        ledger.debit(1, credits(30), Reason::BookingCharge(1), now()).unwrap();

        assert_eq!(ledger.balance(1), credits(70));
        assert_eq!(ledger.balance(2), credits(200));
        assert_eq!(ledger.balances().count(), 2);
    }
}
