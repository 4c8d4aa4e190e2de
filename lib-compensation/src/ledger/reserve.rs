//! Reserve ledger — append-only audit trail of earmarked upgrade funds.
//!
//! A reserve account is logically (member, program, target slot); physically
//! it is the ordered list of signed entries for that key. The balance is
//! never stored as a bare mutable field: it is the running sum, carried on
//! each entry as `balance_after` so any point-in-time balance can be audited.
//!
//! # Invariants
//! - Balance is non-negative: debits exceeding the balance are rejected.
//! - `balance_after` on the latest entry equals the sum of all entries in
//!   creation order.
//! - One entry per (account, idempotency key): replays are rejected.

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

use crate::error::LedgerError;
use crate::types::{Amount, IdempotencyKey, MemberId, Program, ReserveKey, SlotNo};

/// Direction of a reserve entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum EntryKind {
    Credit,
    Debit,
}

/// Where a reserve movement came from.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ReserveSource {
    /// A middle-position occupant's payment, diverted whole.
    MiddlePosition { source_member: MemberId },
    /// The reserve share of a bucket-program split.
    BucketSplit { source_member: MemberId },
    /// Debit funding an automatic slot activation.
    AutoUpgrade,
}

impl fmt::Display for ReserveSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ReserveSource::MiddlePosition { source_member } => {
                write!(f, "middle-position({})", source_member)
            }
            ReserveSource::BucketSplit { source_member } => {
                write!(f, "bucket-split({})", source_member)
            }
            ReserveSource::AutoUpgrade => write!(f, "auto-upgrade"),
        }
    }
}

/// One signed reserve movement.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReserveEntry {
    pub seq: u64,
    pub kind: EntryKind,
    pub amount: Amount,
    pub source: ReserveSource,
    /// Running balance after this entry.
    pub balance_after: Amount,
    pub idempotency_key: IdempotencyKey,
}

/// Append-only reserve ledger across all accounts.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ReserveLedger {
    #[serde(with = "crate::types::map_as_pairs")]
    accounts: BTreeMap<ReserveKey, Vec<ReserveEntry>>,
    used_keys: BTreeSet<(ReserveKey, IdempotencyKey)>,
    next_seq: u64,
}

impl ReserveLedger {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a credit entry. Returns the new balance.
    pub fn credit(
        &mut self,
        member: MemberId,
        program: Program,
        target_slot: SlotNo,
        amount: Amount,
        source: ReserveSource,
        key: &str,
    ) -> Result<Amount, LedgerError> {
        self.append(
            (member, program, target_slot),
            EntryKind::Credit,
            amount,
            source,
            key,
        )
    }

    /// Append a debit entry. Rejects any debit that would take the balance
    /// negative.
    pub fn debit(
        &mut self,
        member: MemberId,
        program: Program,
        target_slot: SlotNo,
        amount: Amount,
        source: ReserveSource,
        key: &str,
    ) -> Result<Amount, LedgerError> {
        let balance = self.balance(member, program, target_slot);
        if balance < amount {
            return Err(LedgerError::InsufficientReserve {
                member,
                program,
                target_slot,
                balance,
                requested: amount,
            });
        }
        self.append(
            (member, program, target_slot),
            EntryKind::Debit,
            amount,
            source,
            key,
        )
    }

    fn append(
        &mut self,
        account: ReserveKey,
        kind: EntryKind,
        amount: Amount,
        source: ReserveSource,
        key: &str,
    ) -> Result<Amount, LedgerError> {
        let dedup = (account, key.to_string());
        if self.used_keys.contains(&dedup) {
            return Err(LedgerError::DuplicateEntry(key.to_string()));
        }

        let balance = self.balance(account.0, account.1, account.2);
        let balance_after = match kind {
            EntryKind::Credit => balance.saturating_add(amount),
            // Checked by the debit path above.
            EntryKind::Debit => balance - amount,
        };

        let seq = self.next_seq;
        self.next_seq += 1;
        self.accounts.entry(account).or_default().push(ReserveEntry {
            seq,
            kind,
            amount,
            source,
            balance_after,
            idempotency_key: key.to_string(),
        });
        self.used_keys.insert(dedup);
        Ok(balance_after)
    }

    /// Current balance: `balance_after` of the latest entry, zero for an
    /// account with no entries.
    pub fn balance(&self, member: MemberId, program: Program, target_slot: SlotNo) -> Amount {
        self.accounts
            .get(&(member, program, target_slot))
            .and_then(|entries| entries.last())
            .map(|e| e.balance_after)
            .unwrap_or(0)
    }

    /// All entries for one account, in creation order.
    pub fn entries(
        &self,
        member: MemberId,
        program: Program,
        target_slot: SlotNo,
    ) -> &[ReserveEntry] {
        self.accounts
            .get(&(member, program, target_slot))
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    /// Audit check: recompute the running sum of one account and compare to
    /// the carried `balance_after` values.
    pub fn audit(&self, member: MemberId, program: Program, target_slot: SlotNo) -> bool {
        let mut running: Amount = 0;
        for entry in self.entries(member, program, target_slot) {
            running = match entry.kind {
                EntryKind::Credit => running.saturating_add(entry.amount),
                EntryKind::Debit => match running.checked_sub(entry.amount) {
                    Some(v) => v,
                    None => return false,
                },
            };
            if running != entry.balance_after {
                return false;
            }
        }
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn credit(ledger: &mut ReserveLedger, amount: Amount, key: &str) -> Amount {
        ledger
            .credit(
                1,
                Program::Matrix,
                2,
                amount,
                ReserveSource::MiddlePosition { source_member: 9 },
                key,
            )
            .unwrap()
    }

    #[test]
    fn test_balance_is_running_sum() {
        let mut ledger = ReserveLedger::new();
        assert_eq!(credit(&mut ledger, 11, "tx-1"), 11);
        assert_eq!(credit(&mut ledger, 11, "tx-2"), 22);
        assert_eq!(credit(&mut ledger, 11, "tx-3"), 33);
        assert_eq!(ledger.balance(1, Program::Matrix, 2), 33);
        assert!(ledger.audit(1, Program::Matrix, 2));
    }

    #[test]
    fn test_duplicate_key_rejected() {
        let mut ledger = ReserveLedger::new();
        credit(&mut ledger, 11, "tx-1");
        let result = ledger.credit(
            1,
            Program::Matrix,
            2,
            11,
            ReserveSource::MiddlePosition { source_member: 9 },
            "tx-1",
        );
        assert!(matches!(result, Err(LedgerError::DuplicateEntry(_))));
        assert_eq!(ledger.balance(1, Program::Matrix, 2), 11);
    }

    #[test]
    fn test_same_key_different_accounts_allowed() {
        // One payment may credit several accounts; the dedup scope is the
        // account, not the whole ledger.
        let mut ledger = ReserveLedger::new();
        credit(&mut ledger, 11, "tx-1");
        let other = ledger.credit(
            2,
            Program::Matrix,
            2,
            11,
            ReserveSource::MiddlePosition { source_member: 9 },
            "tx-1",
        );
        assert!(other.is_ok());
    }

    #[test]
    fn test_debit_cannot_go_negative() {
        let mut ledger = ReserveLedger::new();
        credit(&mut ledger, 20, "tx-1");
        let result = ledger.debit(1, Program::Matrix, 2, 33, ReserveSource::AutoUpgrade, "tx-2");
        assert!(matches!(
            result,
            Err(LedgerError::InsufficientReserve { balance: 20, requested: 33, .. })
        ));
        // Failed debit leaves no entry behind
        assert_eq!(ledger.entries(1, Program::Matrix, 2).len(), 1);
    }

    #[test]
    fn test_debit_reduces_balance() {
        let mut ledger = ReserveLedger::new();
        credit(&mut ledger, 33, "tx-1");
        let after = ledger
            .debit(1, Program::Matrix, 2, 33, ReserveSource::AutoUpgrade, "tx-2")
            .unwrap();
        assert_eq!(after, 0);
        assert!(ledger.audit(1, Program::Matrix, 2));
    }

    #[test]
    fn test_entries_ordered_by_seq() {
        let mut ledger = ReserveLedger::new();
        credit(&mut ledger, 1, "a");
        credit(&mut ledger, 2, "b");
        let entries = ledger.entries(1, Program::Matrix, 2);
        assert!(entries[0].seq < entries[1].seq);
    }
}
