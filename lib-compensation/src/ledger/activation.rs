//! Activation ledger — double-activation prevention.
//!
//! Records that (member, program, slot) became active. The write is a
//! conditional create: at most one completed activation per key, ever. A
//! concurrent trigger observing the same funded reserve must no-op here;
//! this check plus the unique idempotency key are the final backstop against
//! the double-upgrade race.

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

use crate::error::LedgerError;
use crate::types::{
    ActivationKey, ActivationType, Amount, IdempotencyKey, MemberId, Program, SlotNo,
};

/// One completed slot activation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SlotActivation {
    pub member: MemberId,
    pub program: Program,
    pub slot_no: SlotNo,
    pub activation_type: ActivationType,
    pub amount_paid: Amount,
    pub idempotency_key: IdempotencyKey,
    pub seq: u64,
}

/// Activation book across all members.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ActivationLedger {
    #[serde(with = "crate::types::map_as_pairs")]
    activations: BTreeMap<ActivationKey, SlotActivation>,
    used_keys: BTreeSet<IdempotencyKey>,
    next_seq: u64,
}

impl ActivationLedger {
    pub fn new() -> Self {
        Self::default()
    }

    /// Conditional create. Fails if the key already has a completed
    /// activation or the idempotency key was already consumed.
    pub fn activate(
        &mut self,
        member: MemberId,
        program: Program,
        slot_no: SlotNo,
        activation_type: ActivationType,
        amount_paid: Amount,
        key: &str,
    ) -> Result<&SlotActivation, LedgerError> {
        let lookup = (member, program, slot_no);
        if self.activations.contains_key(&lookup) {
            return Err(LedgerError::AlreadyActivated {
                member,
                program,
                slot_no,
            });
        }
        if self.used_keys.contains(key) {
            return Err(LedgerError::DuplicateEntry(key.to_string()));
        }

        let seq = self.next_seq;
        self.next_seq += 1;
        self.used_keys.insert(key.to_string());
        let activation = SlotActivation {
            member,
            program,
            slot_no,
            activation_type,
            amount_paid,
            idempotency_key: key.to_string(),
            seq,
        };
        Ok(self.activations.entry(lookup).or_insert(activation))
    }

    /// Whether an idempotency key was already consumed by some activation.
    pub fn key_used(&self, key: &str) -> bool {
        self.used_keys.contains(key)
    }

    pub fn is_active(&self, member: MemberId, program: Program, slot_no: SlotNo) -> bool {
        self.activations.contains_key(&(member, program, slot_no))
    }

    pub fn get(&self, member: MemberId, program: Program, slot_no: SlotNo) -> Option<&SlotActivation> {
        self.activations.get(&(member, program, slot_no))
    }

    /// Highest contiguous-or-not active slot for a member, zero when none.
    pub fn highest_active_slot(&self, member: MemberId, program: Program) -> SlotNo {
        self.activations
            .range((member, program, 0)..=(member, program, SlotNo::MAX))
            .map(|((_, _, slot), _)| *slot)
            .max()
            .unwrap_or(0)
    }

    pub fn len(&self) -> usize {
        self.activations.len()
    }

    pub fn is_empty(&self) -> bool {
        self.activations.is_empty()
    }
}
