//! External collaborator interfaces.
//!
//! The engine consumes a member directory, a slot price catalog, and a
//! general-purpose wallet ledger. Each is a trait so the transport and
//! persistence behind it stay out of this crate; the in-memory
//! implementations here back the test suites and small deployments.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::error::DistributionFailure;
use crate::types::{Amount, MemberId, Program, SlotNo};

/// Resolves member identity and the referral chain.
pub trait MemberDirectory {
    fn exists(&self, member: MemberId) -> bool;

    /// Direct referrer, `None` for root accounts.
    fn referrer_of(&self, member: MemberId) -> Option<MemberId>;

    fn is_active(&self, member: MemberId) -> bool;
}

/// Cost per (program, slot). `None` past the last priced slot; the
/// auto-upgrade trigger stops there.
pub trait PriceCatalog {
    fn price(&self, program: Program, slot_no: SlotNo) -> Option<Amount>;
}

/// General member balance, separate from the earmarked reserve.
pub trait WalletLedger {
    /// Credit a member's wallet. Returns the new balance.
    fn credit(
        &mut self,
        member: MemberId,
        amount: Amount,
        key: &str,
    ) -> Result<Amount, DistributionFailure>;

    fn balance(&self, member: MemberId) -> Amount;
}

/// In-memory member directory.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct InMemoryDirectory {
    members: BTreeMap<MemberId, MemberRecord>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct MemberRecord {
    referrer: Option<MemberId>,
    active: bool,
}

impl InMemoryDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a member with an optional referrer. Idempotent; re-adding
    /// overwrites the referrer link.
    pub fn add_member(&mut self, member: MemberId, referrer: Option<MemberId>) {
        self.members.insert(
            member,
            MemberRecord {
                referrer,
                active: true,
            },
        );
    }

    pub fn deactivate(&mut self, member: MemberId) {
        if let Some(record) = self.members.get_mut(&member) {
            record.active = false;
        }
    }

    pub fn len(&self) -> usize {
        self.members.len()
    }

    pub fn is_empty(&self) -> bool {
        self.members.is_empty()
    }
}

impl MemberDirectory for InMemoryDirectory {
    fn exists(&self, member: MemberId) -> bool {
        self.members.contains_key(&member)
    }

    fn referrer_of(&self, member: MemberId) -> Option<MemberId> {
        self.members.get(&member).and_then(|r| r.referrer)
    }

    fn is_active(&self, member: MemberId) -> bool {
        self.members.get(&member).map(|r| r.active).unwrap_or(false)
    }
}

/// Static price catalog backed by a map.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StaticPriceCatalog {
    #[serde(with = "crate::types::map_as_pairs")]
    prices: BTreeMap<(Program, SlotNo), Amount>,
}

impl StaticPriceCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Geometric price ladder: slot n costs `base * 2^(n-1)`, slots
    /// 1..=max_slot.
    pub fn geometric(program: Program, base: Amount, max_slot: SlotNo) -> Self {
        let mut catalog = Self::new();
        let mut price = base;
        for slot in 1..=max_slot {
            catalog.set(program, slot, price);
            price = price.saturating_mul(2);
        }
        catalog
    }

    pub fn set(&mut self, program: Program, slot_no: SlotNo, price: Amount) -> &mut Self {
        self.prices.insert((program, slot_no), price);
        self
    }

    pub fn with(mut self, program: Program, slot_no: SlotNo, price: Amount) -> Self {
        self.set(program, slot_no, price);
        self
    }

    /// Merge another catalog's entries over this one.
    pub fn merge(mut self, other: StaticPriceCatalog) -> Self {
        self.prices.extend(other.prices);
        self
    }
}

impl PriceCatalog for StaticPriceCatalog {
    fn price(&self, program: Program, slot_no: SlotNo) -> Option<Amount> {
        self.prices.get(&(program, slot_no)).copied()
    }
}

/// In-memory wallet ledger with per-entry audit rows.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct InMemoryWallet {
    balances: BTreeMap<MemberId, Amount>,
    entries: Vec<WalletEntry>,
}

/// One wallet credit, kept for audit.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WalletEntry {
    pub member: MemberId,
    pub amount: Amount,
    pub balance_after: Amount,
    pub key: String,
}

impl InMemoryWallet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn entries(&self) -> &[WalletEntry] {
        &self.entries
    }
}

impl WalletLedger for InMemoryWallet {
    fn credit(
        &mut self,
        member: MemberId,
        amount: Amount,
        key: &str,
    ) -> Result<Amount, DistributionFailure> {
        let balance = self.balances.entry(member).or_insert(0);
        *balance = balance.saturating_add(amount);
        let after = *balance;
        self.entries.push(WalletEntry {
            member,
            amount,
            balance_after: after,
            key: key.to_string(),
        });
        Ok(after)
    }

    fn balance(&self, member: MemberId) -> Amount {
        self.balances.get(&member).copied().unwrap_or(0)
    }
}
