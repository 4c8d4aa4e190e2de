//! Append-only ledgers.
//!
//! Three books back the engine's money movement:
//! - the reserve ledger, an audit trail of earmarked upgrade funds;
//! - the activation ledger, the conditional-create record of slot tiers;
//! - the income book, the system of record consumed by downstream bonus
//!   programs.
//!
//! Entries are strictly additive. Nothing here is ever mutated in place.

pub mod activation;
pub mod income;
pub mod reserve;

pub use activation::{ActivationLedger, SlotActivation};
pub use income::{IncomeBook, IncomeCategory, IncomeEvent, MissedIncome};
pub use reserve::{EntryKind, ReserveEntry, ReserveLedger, ReserveSource};
