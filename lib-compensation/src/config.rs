//! Engine configuration.
//!
//! Every value that the source system carried as a scattered constant is an
//! injected field here: the system fallback account, the program-level pool
//! accounts, the sweepover hop budget, and the traversal budget. The
//! distribution-failure policy is an explicit choice, not a hardcoded
//! behavior.

use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::types::{MemberId, MAX_SWEEPOVER_HOPS};

/// What to do with an upgrade chain when a fund-distribution sub-step fails.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DistributionFailurePolicy {
    /// Log the shortfall and continue the upgrade chain (observed source
    /// behavior).
    Continue,
    /// Stop the upgrade chain at the first distribution shortfall.
    Block,
}

/// Recipients of the four program-level pools in the bucket split.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PoolAccounts {
    pub leadership: MemberId,
    pub jackpot: MemberId,
    pub royal_captain: MemberId,
    pub spark: MemberId,
}

impl PoolAccounts {
    /// Route every pool to a single holding account.
    pub fn all_to(account: MemberId) -> Self {
        Self {
            leadership: account,
            jackpot: account,
            royal_captain: account,
            spark: account,
        }
    }
}

/// Engine configuration, immutable after construction.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EngineConfig {
    /// System fallback account hosting placements no eligible upline can
    /// take, and receiving shares whose destination is vacant.
    pub fallback_account: MemberId,

    /// Recipients of the bucket program-level pools.
    pub pool_accounts: PoolAccounts,

    /// Referral-chain hop budget for the sweepover resolver.
    pub max_sweepover_hops: u32,

    /// Upfront referrer incentive for the binary program, in percent of the
    /// total payment, taken before the tree pool.
    pub binary_referrer_incentive_percent: u64,

    /// Node budget for a single bounded tree traversal.
    pub traversal_node_budget: u32,

    /// Wall-clock budget for a single bounded tree traversal.
    #[serde(with = "duration_millis")]
    pub traversal_deadline: Duration,

    /// Safety cap on cascade recycles processed from one triggering
    /// placement.
    pub max_cascade_recycles: u32,

    /// Policy for upgrade chains when distribution sub-steps fail.
    pub distribution_failure_policy: DistributionFailurePolicy,
}

impl EngineConfig {
    /// Configuration with the given fallback account and defaults everywhere
    /// else. Pools route to the fallback account until assigned.
    pub fn new(fallback_account: MemberId) -> Self {
        Self {
            fallback_account,
            pool_accounts: PoolAccounts::all_to(fallback_account),
            max_sweepover_hops: MAX_SWEEPOVER_HOPS,
            binary_referrer_incentive_percent: 10,
            traversal_node_budget: 4096,
            traversal_deadline: Duration::from_millis(250),
            max_cascade_recycles: 64,
            distribution_failure_policy: DistributionFailurePolicy::Continue,
        }
    }

    pub fn with_pool_accounts(mut self, pools: PoolAccounts) -> Self {
        self.pool_accounts = pools;
        self
    }

    pub fn with_distribution_failure_policy(mut self, policy: DistributionFailurePolicy) -> Self {
        self.distribution_failure_policy = policy;
        self
    }
}

mod duration_millis {
    use serde::{Deserialize, Deserializer, Serialize, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
        (d.as_millis() as u64).serialize(s)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
        Ok(Duration::from_millis(u64::deserialize(d)?))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = EngineConfig::new(1);
        assert_eq!(config.fallback_account, 1);
        assert_eq!(config.max_sweepover_hops, 60);
        assert_eq!(config.pool_accounts.jackpot, 1);
        assert_eq!(
            config.distribution_failure_policy,
            DistributionFailurePolicy::Continue
        );
    }

    #[test]
    fn test_serde_round_trip() {
        let config = EngineConfig::new(7).with_pool_accounts(PoolAccounts::all_to(9));
        let json = serde_json::to_string(&config).unwrap();
        let back: EngineConfig = serde_json::from_str(&json).unwrap();
        assert_eq!(config, back);
    }
}
