//! Thread-safe engine wrapper.
//!
//! Purchases for one member must not interleave: two payments observing the
//! same highest-active slot would both activate the same next slot. The
//! wrapper serializes writes per member through a keyed lock, then takes the
//! engine lock for the mutation itself. The ledgers' conditional creates
//! remain the final backstop underneath.

use anyhow::{anyhow, Result};
use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};

use crate::engine::{CompensationEngine, PurchaseOutcome};
use crate::interface::{MemberDirectory, PriceCatalog, WalletLedger};
use crate::types::{Amount, MemberId, Program, SlotNo};

/// Lazily allocated per-key mutexes.
pub struct KeyedLocks<K> {
    locks: Mutex<BTreeMap<K, Arc<Mutex<()>>>>,
}

impl<K: Ord + Clone> KeyedLocks<K> {
    pub fn new() -> Self {
        Self {
            locks: Mutex::new(BTreeMap::new()),
        }
    }

    /// The mutex for one key, created on first use.
    pub fn lock_for(&self, key: &K) -> Result<Arc<Mutex<()>>> {
        let mut locks = self
            .locks
            .lock()
            .map_err(|e| anyhow!("keyed lock table poisoned: {}", e))?;
        Ok(locks.entry(key.clone()).or_default().clone())
    }
}

impl<K: Ord + Clone> Default for KeyedLocks<K> {
    fn default() -> Self {
        Self::new()
    }
}

/// Shared handle around one engine. Clones share state.
pub struct SharedEngine<D, P, W> {
    inner: Arc<Mutex<CompensationEngine<D, P, W>>>,
    member_locks: Arc<KeyedLocks<MemberId>>,
}

impl<D, P, W> Clone for SharedEngine<D, P, W> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
            member_locks: Arc::clone(&self.member_locks),
        }
    }
}

impl<D, P, W> SharedEngine<D, P, W>
where
    D: MemberDirectory,
    P: PriceCatalog,
    W: WalletLedger,
{
    pub fn new(engine: CompensationEngine<D, P, W>) -> Self {
        Self {
            inner: Arc::new(Mutex::new(engine)),
            member_locks: Arc::new(KeyedLocks::new()),
        }
    }

    pub fn join(
        &self,
        member: MemberId,
        program: Program,
        paid: Amount,
        key: &str,
    ) -> Result<PurchaseOutcome> {
        let member_lock = self.member_locks.lock_for(&member)?;
        let _member_guard = member_lock
            .lock()
            .map_err(|e| anyhow!("member lock poisoned: {}", e))?;
        let mut engine = self
            .inner
            .lock()
            .map_err(|e| anyhow!("engine lock poisoned: {}", e))?;
        Ok(engine.join(member, program, paid, key)?)
    }

    pub fn upgrade(
        &self,
        member: MemberId,
        program: Program,
        slot_no: SlotNo,
        paid: Amount,
        key: &str,
    ) -> Result<PurchaseOutcome> {
        let member_lock = self.member_locks.lock_for(&member)?;
        let _member_guard = member_lock
            .lock()
            .map_err(|e| anyhow!("member lock poisoned: {}", e))?;
        let mut engine = self
            .inner
            .lock()
            .map_err(|e| anyhow!("engine lock poisoned: {}", e))?;
        Ok(engine.upgrade(member, program, slot_no, paid, key)?)
    }

    /// Run a read against the engine under the lock.
    pub fn read<R>(&self, f: impl FnOnce(&CompensationEngine<D, P, W>) -> R) -> Result<R> {
        let engine = self
            .inner
            .lock()
            .map_err(|e| anyhow!("engine lock poisoned: {}", e))?;
        Ok(f(&engine))
    }
}
