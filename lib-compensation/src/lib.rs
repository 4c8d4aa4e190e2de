//! Multi-program placement and compensation engine.
//!
//! Three placement programs over one member base: a binary tree (fan-out 2,
//! unbounded), a matrix (fan-out 3, depth 3, recycled at 39 nodes), and a
//! phase-based bucket program across 16 slots. Payments settle into fixed
//! percentage splits, middle-position matrix collections earmark the tree
//! owner's reserve, and a funded reserve auto-activates the next slot, which
//! can ripple upward.
//!
//! All arithmetic is integer, all state containers iterate
//! deterministically, and every money movement lands as an append-only
//! ledger row keyed by the payment's idempotency key.
//!
//! The engine owns its state; member identity, slot pricing and wallet
//! balances are consumed through traits in [`interface`].

pub mod cache;
pub mod config;
pub mod distribution;
pub mod engine;
pub mod error;
pub mod interface;
pub mod ledger;
pub mod phase;
pub mod recycle;
pub mod sweepover;
pub mod sync;
pub mod tree;
pub mod types;

pub use config::{DistributionFailurePolicy, EngineConfig, PoolAccounts};
pub use engine::{AutoUpgrade, CompensationEngine, EngineState, PurchaseOutcome};
pub use error::{DistributionFailure, EngineError, LedgerError};
pub use interface::{
    InMemoryDirectory, InMemoryWallet, MemberDirectory, PriceCatalog, StaticPriceCatalog,
    WalletLedger,
};
pub use sync::SharedEngine;
pub use types::{
    ActivationType, Amount, EngineStats, MemberId, PhaseNo, PlacementType, Program, SlotNo,
};
