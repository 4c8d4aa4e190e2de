//! Income book — system of record for distributed shares.
//!
//! One row per distributed share, strictly additive. Downstream bonus
//! programs (leadership stipend, jackpot, royal captain, spark fund) read
//! this stream; nothing in this engine ever rewrites a row. Missed-income
//! records from sweepover land here too, for later redistribution by the
//! leadership-stipend pool.

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::types::{Amount, IdempotencyKey, MemberId, Program, SlotNo};

/// What a share was paid for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum IncomeCategory {
    /// Tree-pool payout to the ancestor at this level (1-based).
    Level(u8),
    /// Upfront referrer incentive (binary program).
    ReferrerIncentive,
    /// Middle-position collection diverted whole to the owner's reserve.
    MiddleReserve,
    /// Bucket split: reserve share for the upline's next slot.
    UplineReserve,
    /// Bucket split: wallet share for the upline.
    UplineWallet,
    /// Bucket split: partner incentive to the referrer.
    PartnerIncentive,
    /// Bucket split: program-level pools.
    LeadershipPool,
    JackpotPool,
    RoyalCaptainPool,
    SparkPool,
}

impl fmt::Display for IncomeCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            IncomeCategory::Level(level) => write!(f, "level-{}", level),
            IncomeCategory::ReferrerIncentive => write!(f, "referrer-incentive"),
            IncomeCategory::MiddleReserve => write!(f, "middle-reserve"),
            IncomeCategory::UplineReserve => write!(f, "upline-reserve"),
            IncomeCategory::UplineWallet => write!(f, "upline-wallet"),
            IncomeCategory::PartnerIncentive => write!(f, "partner-incentive"),
            IncomeCategory::LeadershipPool => write!(f, "leadership-pool"),
            IncomeCategory::JackpotPool => write!(f, "jackpot-pool"),
            IncomeCategory::RoyalCaptainPool => write!(f, "royal-captain-pool"),
            IncomeCategory::SparkPool => write!(f, "spark-pool"),
        }
    }
}

/// One distributed share.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IncomeEvent {
    pub seq: u64,
    pub recipient: MemberId,
    pub source_member: MemberId,
    pub program: Program,
    pub slot_no: SlotNo,
    pub category: IncomeCategory,
    pub amount: Amount,
    /// Share of the pool this row represents, in whole percent.
    pub percent: u64,
    pub idempotency_key: IdempotencyKey,
}

/// Income lost to a bypassed upline during sweepover.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MissedIncome {
    pub seq: u64,
    /// The upline who could not host the placement.
    pub bypassed: MemberId,
    /// The member whose placement escalated past them.
    pub source_member: MemberId,
    pub program: Program,
    pub slot_no: SlotNo,
    /// The level-1 share the bypassed upline would have earned.
    pub amount: Amount,
    pub hops_skipped: u32,
    pub idempotency_key: IdempotencyKey,
}

/// Append-only income book.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct IncomeBook {
    events: Vec<IncomeEvent>,
    missed: Vec<MissedIncome>,
    next_seq: u64,
}

impl IncomeBook {
    pub fn new() -> Self {
        Self::default()
    }

    #[allow(clippy::too_many_arguments)]
    pub fn record(
        &mut self,
        recipient: MemberId,
        source_member: MemberId,
        program: Program,
        slot_no: SlotNo,
        category: IncomeCategory,
        amount: Amount,
        percent: u64,
        key: &str,
    ) -> &IncomeEvent {
        let seq = self.next_seq;
        self.next_seq += 1;
        self.events.push(IncomeEvent {
            seq,
            recipient,
            source_member,
            program,
            slot_no,
            category,
            amount,
            percent,
            idempotency_key: key.to_string(),
        });
        self.events.last().expect("just pushed")
    }

    #[allow(clippy::too_many_arguments)]
    pub fn record_missed(
        &mut self,
        bypassed: MemberId,
        source_member: MemberId,
        program: Program,
        slot_no: SlotNo,
        amount: Amount,
        hops_skipped: u32,
        key: &str,
    ) -> &MissedIncome {
        let seq = self.next_seq;
        self.next_seq += 1;
        self.missed.push(MissedIncome {
            seq,
            bypassed,
            source_member,
            program,
            slot_no,
            amount,
            hops_skipped,
            idempotency_key: key.to_string(),
        });
        self.missed.last().expect("just pushed")
    }

    pub fn events(&self) -> &[IncomeEvent] {
        &self.events
    }

    pub fn missed(&self) -> &[MissedIncome] {
        &self.missed
    }

    /// All rows for one recipient, in emission order.
    pub fn events_for(&self, recipient: MemberId) -> impl Iterator<Item = &IncomeEvent> {
        self.events.iter().filter(move |e| e.recipient == recipient)
    }

    /// Rows emitted under one idempotency key (one distribution call).
    pub fn events_for_key<'a>(&'a self, key: &'a str) -> impl Iterator<Item = &'a IncomeEvent> {
        self.events.iter().filter(move |e| e.idempotency_key == key)
    }

    pub fn total_for(&self, recipient: MemberId) -> Amount {
        self.events_for(recipient).map(|e| e.amount).sum()
    }
}
