//! Core identifiers and shared types for the compensation engine.
//!
//! All amounts are integer atomic units (e.g. cents). Integer math only:
//! deterministic results across platforms, no floating-point drift.
//! State containers are keyed on these types and use `BTreeMap` for
//! deterministic iteration.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Member identifier, issued by the external member directory.
pub type MemberId = u64;

/// Slot number, 1-based. Higher slots cost more and pay more.
pub type SlotNo = u8;

/// Phase index within the bucket program (1 or 2).
pub type PhaseNo = u8;

/// Monetary amount in atomic units.
pub type Amount = u64;

/// Idempotency key, reused verbatim from the external payment transaction.
pub type IdempotencyKey = String;

/// Key for a reserve account: (member, program, target slot being funded).
pub type ReserveKey = (MemberId, Program, SlotNo);

/// Key for a placement tree: (tree owner, program, slot).
pub type TreeKey = (MemberId, Program, SlotNo);

/// Key for a slot activation: (member, program, slot).
pub type ActivationKey = (MemberId, Program, SlotNo);

/// The three placement programs.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
pub enum Program {
    /// 2-ary tree, unbounded depth.
    Binary,
    /// 3-ary tree, capped at depth 3 (39 nodes), recycled when full.
    Matrix,
    /// Phase-based bucket program, no fan-out tree.
    Bucket,
}

impl Program {
    /// Tree fan-out for the fixed-shape programs. The bucket program has no
    /// fan-out tree and placing through BFS is a caller bug.
    pub fn fan_out(&self) -> Option<u32> {
        match self {
            Program::Binary => Some(2),
            Program::Matrix => Some(3),
            Program::Bucket => None,
        }
    }

    /// Maximum tree depth, if capped.
    pub fn max_depth(&self) -> Option<u8> {
        match self {
            Program::Matrix => Some(MATRIX_MAX_DEPTH),
            Program::Binary | Program::Bucket => None,
        }
    }
}

impl fmt::Display for Program {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Program::Binary => write!(f, "binary"),
            Program::Matrix => write!(f, "matrix"),
            Program::Bucket => write!(f, "bucket"),
        }
    }
}

/// Matrix tree depth cap.
pub const MATRIX_MAX_DEPTH: u8 = 3;

/// Occupied-node count of a complete matrix tree: 3 + 9 + 27.
pub const MATRIX_TREE_CAPACITY: u32 = 39;

/// Highest slot in the bucket program; Phase-2 completion at this slot
/// marks the program complete for that member.
pub const BUCKET_MAX_SLOT: SlotNo = 16;

/// Seat capacity of a Phase-1 bucket.
pub const PHASE_1_CAPACITY: u8 = 4;

/// Seat capacity of a Phase-2 bucket.
pub const PHASE_2_CAPACITY: u8 = 8;

/// Maximum referral-chain hops the sweepover resolver walks before falling
/// back to the system account.
pub const MAX_SWEEPOVER_HOPS: u32 = 60;

/// How a slot became active.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ActivationType {
    /// First slot, paid at join.
    Initial,
    /// Member-paid upgrade to the next slot.
    Upgrade,
    /// Reserve-funded automatic upgrade.
    Auto,
    /// Administrative activation.
    Manual,
}

impl fmt::Display for ActivationType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ActivationType::Initial => write!(f, "initial"),
            ActivationType::Upgrade => write!(f, "upgrade"),
            ActivationType::Auto => write!(f, "auto"),
            ActivationType::Manual => write!(f, "manual"),
        }
    }
}

/// How a placement host was chosen.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PlacementType {
    /// Hosted by the direct referrer.
    Direct,
    /// Escalated up the referral chain; carries the hop count skipped.
    Sweepover { hops: u32 },
    /// No eligible ancestor within the hop budget; system fallback account.
    Fallback,
}

impl fmt::Display for PlacementType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PlacementType::Direct => write!(f, "direct"),
            PlacementType::Sweepover { hops } => write!(f, "sweepover({})", hops),
            PlacementType::Fallback => write!(f, "fallback"),
        }
    }
}

/// Serde adapter for composite-keyed maps. JSON object keys must be
/// strings, so maps keyed by tuples serialize as a sequence of pairs.
pub mod map_as_pairs {
    use serde::{Deserialize, Deserializer, Serialize, Serializer};
    use std::collections::BTreeMap;

    pub fn serialize<K, V, S>(map: &BTreeMap<K, V>, serializer: S) -> Result<S::Ok, S::Error>
    where
        K: Serialize,
        V: Serialize,
        S: Serializer,
    {
        serializer.collect_seq(map.iter())
    }

    pub fn deserialize<'de, K, V, D>(deserializer: D) -> Result<BTreeMap<K, V>, D::Error>
    where
        K: Deserialize<'de> + Ord,
        V: Deserialize<'de>,
        D: Deserializer<'de>,
    {
        Ok(Vec::<(K, V)>::deserialize(deserializer)?
            .into_iter()
            .collect())
    }
}

/// Monotonic counters for monitoring. Never decremented.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EngineStats {
    pub joins: u64,
    pub upgrades: u64,
    pub auto_upgrades: u64,
    pub recycles: u64,
    pub sweepovers: u64,
    pub fallback_placements: u64,
    pub income_events: u64,
    pub missed_income_records: u64,
    pub distribution_shortfalls: u64,
}
