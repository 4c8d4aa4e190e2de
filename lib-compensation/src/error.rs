//! Engine error types.
//!
//! Domain errors are explicit enums; callers match on them to decide whether
//! to retry, compensate, or accept partial completion. `TreeFull` is an
//! internal control signal resolved via recycle/sweepover and must not be
//! surfaced as a user error.

use thiserror::Error;

use crate::types::{Amount, MemberId, Program, SlotNo};

/// Top-level engine error.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum EngineError {
    #[error("Member not found: {0}")]
    MemberNotFound(MemberId),

    #[error("No catalog price for {program} slot {slot_no}")]
    PriceNotFound { program: Program, slot_no: SlotNo },

    #[error("Invalid progression for member {member}: requested {program} slot {requested}, highest active is {highest_active}")]
    InvalidProgression {
        member: MemberId,
        program: Program,
        requested: SlotNo,
        highest_active: SlotNo,
    },

    #[error("Tree full: owner {owner}, {program} slot {slot_no}")]
    TreeFull {
        owner: MemberId,
        program: Program,
        slot_no: SlotNo,
    },

    #[error("Duplicate idempotency key: {0}")]
    DuplicateIdempotencyKey(String),

    #[error("Amount mismatch for {program} slot {slot_no}: paid {paid}, catalog price {expected}")]
    AmountMismatch {
        program: Program,
        slot_no: SlotNo,
        paid: Amount,
        expected: Amount,
    },

    #[error("Slot already active: member {member}, {program} slot {slot_no}")]
    SlotAlreadyActive {
        member: MemberId,
        program: Program,
        slot_no: SlotNo,
    },

    #[error("No breadth-first placement for the {program} program")]
    PlacementUnsupported { program: Program },

    #[error("Bucket program already complete for member {0}")]
    ProgramComplete(MemberId),

    #[error(transparent)]
    Ledger(#[from] LedgerError),
}

/// Ledger-layer error (reserve, income, activation books).
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum LedgerError {
    #[error("Duplicate ledger entry for key {0}")]
    DuplicateEntry(String),

    #[error("Insufficient reserve for member {member}, {program} target slot {target_slot}: balance {balance}, requested {requested}")]
    InsufficientReserve {
        member: MemberId,
        program: Program,
        target_slot: SlotNo,
        balance: Amount,
        requested: Amount,
    },

    #[error("Activation already recorded: member {member}, {program} slot {slot_no}")]
    AlreadyActivated {
        member: MemberId,
        program: Program,
        slot_no: SlotNo,
    },
}

/// Failure of a single best-effort distribution sub-step. One destination
/// failing does not roll back the placement or activation; the caller
/// receives the full list and decides per the configured policy.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DistributionFailure {
    #[error("Wallet credit failed for member {member}: {reason}")]
    WalletCredit { member: MemberId, reason: String },

    #[error("Reserve credit failed for member {member}, {program} target slot {target_slot}: {reason}")]
    ReserveCredit {
        member: MemberId,
        program: Program,
        target_slot: SlotNo,
        reason: String,
    },
}
