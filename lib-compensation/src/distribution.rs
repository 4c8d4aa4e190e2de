//! Fund distribution — fixed percentage splits per program.
//!
//! Pure compute module: no state, no wallets, no transfers. Input is a
//! payment amount; output is the share breakdown the engine then applies to
//! the ledgers. All arithmetic is integer; any remainder from integer
//! division is folded into the first (largest) share so the emitted amounts
//! always sum exactly to the input pool. Conservation of value is a hard
//! invariant, checked at construction.
//!
//! Tables:
//! - binary tree pool: 30% level 1, 10% levels 2-3, 5% levels 4-10,
//!   3% levels 11-13, 2% levels 14-16 (sums to 100). A separate upfront
//!   referrer incentive is taken from the total before the tree pool.
//! - matrix: 20 / 20 / 60 across ancestor levels 1-3.
//! - bucket: 50 upline reserve, 20 upline wallet, 10 partner incentive,
//!   5 each to the leadership, jackpot, royal-captain and spark pools.

use serde::{Deserialize, Serialize};

use crate::ledger::IncomeCategory;
use crate::types::Amount;

/// Binary tree-pool share per level, levels 1..=16.
pub const BINARY_LEVEL_PERCENTS: [u64; 16] =
    [30, 10, 10, 5, 5, 5, 5, 5, 5, 5, 3, 3, 3, 2, 2, 2];

/// Matrix share per ancestor level, levels 1..=3.
pub const MATRIX_LEVEL_PERCENTS: [u64; 3] = [20, 20, 60];

/// Bucket split percentages.
pub const BUCKET_UPLINE_RESERVE_PERCENT: u64 = 50;
pub const BUCKET_UPLINE_WALLET_PERCENT: u64 = 20;
pub const BUCKET_PARTNER_INCENTIVE_PERCENT: u64 = 10;
pub const BUCKET_POOL_PERCENT: u64 = 5;
pub const BUCKET_POOL_COUNT: u64 = 4;

const fn sum(table: &[u64]) -> u64 {
    let mut total = 0;
    let mut i = 0;
    while i < table.len() {
        total += table[i];
        i += 1;
    }
    total
}

// Every table must sum to exactly 100; changing a share without rebalancing
// the table fails compilation.
const _: () = assert!(sum(&BINARY_LEVEL_PERCENTS) == 100);
const _: () = assert!(sum(&MATRIX_LEVEL_PERCENTS) == 100);
const _: () = assert!(
    BUCKET_UPLINE_RESERVE_PERCENT
        + BUCKET_UPLINE_WALLET_PERCENT
        + BUCKET_PARTNER_INCENTIVE_PERCENT
        + BUCKET_POOL_PERCENT * BUCKET_POOL_COUNT
        == 100
);

/// One computed share of a pool.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Share {
    pub category: IncomeCategory,
    pub percent: u64,
    pub amount: Amount,
}

/// Split a pool across a percent table, remainder folded into the first
/// share. Returns one share per table row, in table order.
fn split_by_table(pool: Amount, table: &[u64], category_for: impl Fn(usize) -> IncomeCategory) -> Vec<Share> {
    let mut shares: Vec<Share> = table
        .iter()
        .enumerate()
        .map(|(i, percent)| Share {
            category: category_for(i),
            percent: *percent,
            amount: pool * percent / 100,
        })
        .collect();
    let allocated: Amount = shares.iter().map(|s| s.amount).sum();
    if let Some(first) = shares.first_mut() {
        first.amount += pool.saturating_sub(allocated);
    }
    shares
}

/// Upfront referrer incentive for the binary program, taken from the total
/// before the tree pool. Returns (incentive, remaining tree pool).
pub fn referrer_incentive(total: Amount, percent: u64) -> (Amount, Amount) {
    let incentive = total * percent / 100;
    (incentive, total - incentive)
}

/// Binary tree-pool shares, levels 1..=16.
pub fn binary_tree_shares(pool: Amount) -> Vec<Share> {
    split_by_table(pool, &BINARY_LEVEL_PERCENTS, |i| {
        IncomeCategory::Level(i as u8 + 1)
    })
}

/// Matrix shares, ancestor levels 1..=3.
pub fn matrix_shares(pool: Amount) -> Vec<Share> {
    split_by_table(pool, &MATRIX_LEVEL_PERCENTS, |i| {
        IncomeCategory::Level(i as u8 + 1)
    })
}

/// Bucket split: seven fixed buckets.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct BucketSplit {
    pub upline_reserve: Amount,
    pub upline_wallet: Amount,
    pub partner_incentive: Amount,
    pub leadership_pool: Amount,
    pub jackpot_pool: Amount,
    pub royal_captain_pool: Amount,
    pub spark_pool: Amount,
}

impl BucketSplit {
    pub fn total(&self) -> Amount {
        self.upline_reserve
            + self.upline_wallet
            + self.partner_incentive
            + self.leadership_pool
            + self.jackpot_pool
            + self.royal_captain_pool
            + self.spark_pool
    }

    /// The seven buckets as (category, percent, amount) rows, largest first.
    pub fn shares(&self) -> Vec<Share> {
        vec![
            Share {
                category: IncomeCategory::UplineReserve,
                percent: BUCKET_UPLINE_RESERVE_PERCENT,
                amount: self.upline_reserve,
            },
            Share {
                category: IncomeCategory::UplineWallet,
                percent: BUCKET_UPLINE_WALLET_PERCENT,
                amount: self.upline_wallet,
            },
            Share {
                category: IncomeCategory::PartnerIncentive,
                percent: BUCKET_PARTNER_INCENTIVE_PERCENT,
                amount: self.partner_incentive,
            },
            Share {
                category: IncomeCategory::LeadershipPool,
                percent: BUCKET_POOL_PERCENT,
                amount: self.leadership_pool,
            },
            Share {
                category: IncomeCategory::JackpotPool,
                percent: BUCKET_POOL_PERCENT,
                amount: self.jackpot_pool,
            },
            Share {
                category: IncomeCategory::RoyalCaptainPool,
                percent: BUCKET_POOL_PERCENT,
                amount: self.royal_captain_pool,
            },
            Share {
                category: IncomeCategory::SparkPool,
                percent: BUCKET_POOL_PERCENT,
                amount: self.spark_pool,
            },
        ]
    }
}

/// Split a bucket payment across the seven buckets. Remainder from integer
/// division folds into the upline reserve, the largest bucket.
pub fn bucket_shares(amount: Amount) -> BucketSplit {
    let upline_wallet = amount * BUCKET_UPLINE_WALLET_PERCENT / 100;
    let partner_incentive = amount * BUCKET_PARTNER_INCENTIVE_PERCENT / 100;
    let leadership_pool = amount * BUCKET_POOL_PERCENT / 100;
    let jackpot_pool = amount * BUCKET_POOL_PERCENT / 100;
    let royal_captain_pool = amount * BUCKET_POOL_PERCENT / 100;
    let spark_pool = amount * BUCKET_POOL_PERCENT / 100;
    let others = upline_wallet
        + partner_incentive
        + leadership_pool
        + jackpot_pool
        + royal_captain_pool
        + spark_pool;
    BucketSplit {
        upline_reserve: amount - others,
        upline_wallet,
        partner_incentive,
        leadership_pool,
        jackpot_pool,
        royal_captain_pool,
        spark_pool,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tables_sum_to_100() {
        assert_eq!(sum(&BINARY_LEVEL_PERCENTS), 100);
        assert_eq!(sum(&MATRIX_LEVEL_PERCENTS), 100);
        assert_eq!(
            BUCKET_UPLINE_RESERVE_PERCENT
                + BUCKET_UPLINE_WALLET_PERCENT
                + BUCKET_PARTNER_INCENTIVE_PERCENT
                + BUCKET_POOL_PERCENT * BUCKET_POOL_COUNT,
            100
        );
    }

    #[test]
    fn test_binary_table_structure() {
        assert_eq!(BINARY_LEVEL_PERCENTS[0], 30);
        assert_eq!(&BINARY_LEVEL_PERCENTS[1..3], &[10, 10]);
        assert_eq!(&BINARY_LEVEL_PERCENTS[3..10], &[5; 7]);
        assert_eq!(&BINARY_LEVEL_PERCENTS[10..13], &[3; 3]);
        assert_eq!(&BINARY_LEVEL_PERCENTS[13..16], &[2; 3]);
    }

    #[test]
    fn test_binary_shares_conserve_pool() {
        for pool in [0u64, 1, 7, 100, 999, 1_000_000, 12_345_678] {
            let shares = binary_tree_shares(pool);
            assert_eq!(shares.len(), 16);
            let total: Amount = shares.iter().map(|s| s.amount).sum();
            assert_eq!(total, pool, "conservation violated for pool {}", pool);
        }
    }

    #[test]
    fn test_matrix_shares_golden_vector() {
        let shares = matrix_shares(100);
        assert_eq!(shares[0].amount, 20);
        assert_eq!(shares[1].amount, 20);
        assert_eq!(shares[2].amount, 60);
        assert_eq!(shares[0].category, IncomeCategory::Level(1));
    }

    #[test]
    fn test_matrix_remainder_to_first_share() {
        // 7: 20% = 1, 20% = 1, 60% = 4, allocated 6, remainder 1 → level 1
        let shares = matrix_shares(7);
        assert_eq!(shares[0].amount, 2);
        assert_eq!(shares[1].amount, 1);
        assert_eq!(shares[2].amount, 4);
        assert_eq!(shares.iter().map(|s| s.amount).sum::<Amount>(), 7);
    }

    #[test]
    fn test_referrer_incentive_before_pool() {
        let (incentive, pool) = referrer_incentive(1000, 10);
        assert_eq!(incentive, 100);
        assert_eq!(pool, 900);
        assert_eq!(incentive + pool, 1000);
    }

    #[test]
    fn test_bucket_split_golden_vector() {
        let split = bucket_shares(1000);
        assert_eq!(split.upline_reserve, 500);
        assert_eq!(split.upline_wallet, 200);
        assert_eq!(split.partner_incentive, 100);
        assert_eq!(split.leadership_pool, 50);
        assert_eq!(split.jackpot_pool, 50);
        assert_eq!(split.royal_captain_pool, 50);
        assert_eq!(split.spark_pool, 50);
        assert_eq!(split.total(), 1000);
    }

    #[test]
    fn test_bucket_split_conserves_odd_amounts() {
        for amount in [0u64, 1, 3, 7, 13, 99, 101, 1_000_003] {
            let split = bucket_shares(amount);
            assert_eq!(split.total(), amount, "conservation violated for {}", amount);
        }
    }

    #[test]
    fn test_bucket_shares_rows_match_split() {
        let split = bucket_shares(777);
        let rows = split.shares();
        assert_eq!(rows.len(), 7);
        let total: Amount = rows.iter().map(|s| s.amount).sum();
        assert_eq!(total, 777);
    }
}
