//! Team-count cache for the read API.
//!
//! Bounded tree traversals can come back partial under load; the read API
//! then serves the last complete count from here instead of blocking. LRU
//! bounded, entries expire after a max age. Counts are keyed by the queried
//! member, and each entry remembers the tree it was counted in so one
//! placement can drop every count that tree served.

use anyhow::{anyhow, Result};
use lru::LruCache;
use std::num::NonZeroUsize;
use std::sync::Mutex;
use std::time::{Duration, Instant};

use crate::types::{ActivationKey, TreeKey};

const DEFAULT_CAPACITY: usize = 4096;
const DEFAULT_MAX_AGE: Duration = Duration::from_secs(300);

struct CachedCount {
    nodes: u32,
    tree: TreeKey,
    stored_at: Instant,
}

/// LRU cache of complete subtree counts.
pub struct OccupancyCache {
    inner: Mutex<LruCache<ActivationKey, CachedCount>>,
    max_age: Duration,
}

impl OccupancyCache {
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_CAPACITY, DEFAULT_MAX_AGE)
    }

    pub fn with_capacity(capacity: usize, max_age: Duration) -> Self {
        let capacity = NonZeroUsize::new(capacity.max(1)).unwrap_or(NonZeroUsize::MIN);
        Self {
            inner: Mutex::new(LruCache::new(capacity)),
            max_age,
        }
    }

    /// Store a complete count for a member, tagged with its source tree.
    pub fn put(&self, key: ActivationKey, tree: TreeKey, nodes: u32) -> Result<()> {
        let mut cache = self
            .inner
            .lock()
            .map_err(|e| anyhow!("occupancy cache lock poisoned: {}", e))?;
        cache.put(
            key,
            CachedCount {
                nodes,
                tree,
                stored_at: Instant::now(),
            },
        );
        Ok(())
    }

    /// Last complete count for a member, `None` when absent or expired.
    pub fn get(&self, key: &ActivationKey) -> Result<Option<u32>> {
        let mut cache = self
            .inner
            .lock()
            .map_err(|e| anyhow!("occupancy cache lock poisoned: {}", e))?;
        match cache.get(key) {
            Some(cached) if cached.stored_at.elapsed() <= self.max_age => Ok(Some(cached.nodes)),
            Some(_) => {
                cache.pop(key);
                Ok(None)
            }
            None => Ok(None),
        }
    }

    /// Drop every count taken from one tree after a mutation invalidates it.
    pub fn invalidate_tree(&self, tree: &TreeKey) -> Result<()> {
        let mut cache = self
            .inner
            .lock()
            .map_err(|e| anyhow!("occupancy cache lock poisoned: {}", e))?;
        let stale: Vec<ActivationKey> = cache
            .iter()
            .filter(|(_, cached)| cached.tree == *tree)
            .map(|(key, _)| *key)
            .collect();
        for key in stale {
            cache.pop(&key);
        }
        Ok(())
    }

    pub fn clear(&self) -> Result<()> {
        let mut cache = self
            .inner
            .lock()
            .map_err(|e| anyhow!("occupancy cache lock poisoned: {}", e))?;
        cache.clear();
        Ok(())
    }
}

impl Default for OccupancyCache {
    fn default() -> Self {
        Self::new()
    }
}
