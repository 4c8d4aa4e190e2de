//! Compensation engine — join/upgrade orchestration.
//!
//! The engine owns all placement and ledger state and consumes the external
//! collaborators (member directory, price catalog, wallet ledger) through
//! traits. A purchase runs as: validate, place, conditional-create the
//! activation, then settle the payment into wallets, reserves and income
//! rows. Reserve credits feed the auto-upgrade trigger, which runs on a
//! work queue so a funded upgrade can ripple to higher slots without
//! recursion.
//!
//! # Invariants
//! - Placement is the one fallible step of the unit and runs before any
//!   ledger write: a failed purchase leaves no activation or income rows.
//! - An activation is conditional-created before any funds move; a replayed
//!   idempotency key cannot activate or distribute twice.
//! - Settlement is best-effort per destination: one failed credit is
//!   recorded as a shortfall, it never rolls back the activation.
//! - The auto-upgrade chain is bounded; every step debits the reserve
//!   before the new tier distributes.

use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use tracing::{debug, info, warn};

use crate::cache::OccupancyCache;
use crate::config::{DistributionFailurePolicy, EngineConfig};
use crate::distribution::{
    binary_tree_shares, bucket_shares, matrix_shares, referrer_incentive,
    BINARY_LEVEL_PERCENTS, BUCKET_PARTNER_INCENTIVE_PERCENT, BUCKET_POOL_PERCENT,
    BUCKET_UPLINE_RESERVE_PERCENT, BUCKET_UPLINE_WALLET_PERCENT, MATRIX_LEVEL_PERCENTS,
};
use crate::error::{DistributionFailure, EngineError, LedgerError};
use crate::interface::{MemberDirectory, PriceCatalog, WalletLedger};
use crate::ledger::{
    ActivationLedger, IncomeBook, IncomeCategory, ReserveLedger, ReserveSource,
};
use crate::phase::PhaseBook;
use crate::recycle::{on_placement_added, RecycleArchive, RecycleOutcome};
use crate::sweepover::resolve_placement;
use crate::tree::middle::is_middle;
use crate::tree::traversal::{count_subtree, TraversalBudget, TraversalOutcome};
use crate::tree::{Placement, TreeBook};
use crate::types::{
    ActivationType, Amount, EngineStats, MemberId, PlacementType, Program, ReserveKey, SlotNo,
    BUCKET_MAX_SLOT,
};

/// Hard cap on auto-upgrade steps processed from one triggering payment.
const MAX_AUTO_UPGRADE_CHAIN: u32 = 128;

/// One reserve-funded automatic activation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AutoUpgrade {
    pub member: MemberId,
    pub program: Program,
    pub slot_no: SlotNo,
    pub amount: Amount,
}

/// Result of a completed join or upgrade.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PurchaseOutcome {
    pub member: MemberId,
    pub program: Program,
    pub slot_no: SlotNo,
    /// The tree (or bucket priority) that received the placement.
    pub host: MemberId,
    pub placement_type: PlacementType,
    pub auto_upgrades: Vec<AutoUpgrade>,
    pub recycles: Vec<RecycleOutcome>,
    pub shortfalls: Vec<DistributionFailure>,
}

/// All engine-owned state, snapshot-able as one unit.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct EngineState {
    pub(crate) trees: TreeBook,
    pub(crate) reserves: ReserveLedger,
    pub(crate) activations: ActivationLedger,
    pub(crate) income: IncomeBook,
    pub(crate) archive: RecycleArchive,
    pub(crate) phases: PhaseBook,
    pub(crate) stats: EngineStats,
}

/// The engine. Generic over the external collaborators.
pub struct CompensationEngine<D, P, W> {
    directory: D,
    catalog: P,
    wallet: W,
    config: EngineConfig,
    state: EngineState,
    cache: OccupancyCache,
}

impl<D, P, W> CompensationEngine<D, P, W>
where
    D: MemberDirectory,
    P: PriceCatalog,
    W: WalletLedger,
{
    pub fn new(directory: D, catalog: P, wallet: W, config: EngineConfig) -> Self {
        Self::from_state(directory, catalog, wallet, config, EngineState::default())
    }

    /// Rebuild an engine around a restored state snapshot.
    pub fn from_state(
        directory: D,
        catalog: P,
        wallet: W,
        config: EngineConfig,
        state: EngineState,
    ) -> Self {
        Self {
            directory,
            catalog,
            wallet,
            config,
            state,
            cache: OccupancyCache::new(),
        }
    }

    /// First slot purchase for a program.
    pub fn join(
        &mut self,
        member: MemberId,
        program: Program,
        paid: Amount,
        key: &str,
    ) -> Result<PurchaseOutcome, EngineError> {
        self.purchase(member, program, 1, paid, key, ActivationType::Initial)
    }

    /// Member-paid upgrade to the next slot.
    pub fn upgrade(
        &mut self,
        member: MemberId,
        program: Program,
        slot_no: SlotNo,
        paid: Amount,
        key: &str,
    ) -> Result<PurchaseOutcome, EngineError> {
        self.purchase(member, program, slot_no, paid, key, ActivationType::Upgrade)
    }

    fn purchase(
        &mut self,
        member: MemberId,
        program: Program,
        slot_no: SlotNo,
        paid: Amount,
        key: &str,
        activation_type: ActivationType,
    ) -> Result<PurchaseOutcome, EngineError> {
        if !self.directory.exists(member) {
            return Err(EngineError::MemberNotFound(member));
        }
        let price = self
            .catalog
            .price(program, slot_no)
            .ok_or(EngineError::PriceNotFound { program, slot_no })?;
        if paid != price {
            return Err(EngineError::AmountMismatch {
                program,
                slot_no,
                paid,
                expected: price,
            });
        }
        if program == Program::Bucket && self.state.phases.is_complete(member) {
            return Err(EngineError::ProgramComplete(member));
        }
        if self.state.activations.is_active(member, program, slot_no) {
            return Err(EngineError::SlotAlreadyActive {
                member,
                program,
                slot_no,
            });
        }
        let highest = self.state.activations.highest_active_slot(member, program);
        if slot_no != highest + 1 {
            return Err(EngineError::InvalidProgression {
                member,
                program,
                requested: slot_no,
                highest_active: highest,
            });
        }

        if self.state.activations.key_used(key) {
            return Err(EngineError::DuplicateIdempotencyKey(key.to_string()));
        }

        // Placement first; nothing is recorded until a seat exists.
        let referrer = self.directory.referrer_of(member);
        let (host, placement_type, recycles) = match program {
            Program::Binary => {
                let host = referrer.unwrap_or(self.config.fallback_account);
                self.state
                    .trees
                    .place(host, member, program, slot_no, referrer)?;
                (host, PlacementType::Direct, Vec::new())
            }
            Program::Matrix => {
                let direct = referrer.unwrap_or(self.config.fallback_account);
                let resolution = resolve_placement(
                    &self.directory,
                    &self.state.activations,
                    &self.state.trees,
                    &self.config,
                    member,
                    slot_no,
                    direct,
                );
                let recycles = self.place_matrix(resolution.host, member, slot_no, referrer)?;
                match resolution.placement_type {
                    PlacementType::Sweepover { .. } => self.state.stats.sweepovers += 1,
                    PlacementType::Fallback => self.state.stats.fallback_placements += 1,
                    PlacementType::Direct => {}
                }
                if let Some(bypassed) = resolution.bypassed {
                    self.record_missed(bypassed, member, slot_no, paid, &resolution.placement_type, key);
                }
                (resolution.host, resolution.placement_type, recycles)
            }
            Program::Bucket => {
                let admit = self
                    .state
                    .phases
                    .admit(&mut self.state.trees, member, slot_no, 1);
                (admit.host, PlacementType::Direct, Vec::new())
            }
        };

        self.state
            .activations
            .activate(member, program, slot_no, activation_type, paid, key)
            .map_err(|e| match e {
                LedgerError::DuplicateEntry(k) => EngineError::DuplicateIdempotencyKey(k),
                other => EngineError::Ledger(other),
            })?;

        self.invalidate_team_counts(program, slot_no, host, &recycles);

        let mut pending: VecDeque<ReserveKey> = VecDeque::new();
        let shortfalls = self.settle(member, program, slot_no, paid, key, host, &mut pending);
        self.state.stats.distribution_shortfalls += shortfalls.len() as u64;

        match activation_type {
            ActivationType::Initial => self.state.stats.joins += 1,
            _ => self.state.stats.upgrades += 1,
        }
        info!(
            member,
            %program,
            slot_no,
            paid,
            host,
            placement = %placement_type,
            "slot activated"
        );

        let auto_upgrades = if self.config.distribution_failure_policy
            == DistributionFailurePolicy::Block
            && !shortfalls.is_empty()
        {
            warn!(member, %program, slot_no, "distribution shortfall, upgrade chain blocked");
            Vec::new()
        } else {
            self.run_auto_upgrades(&mut pending, key)
        };

        self.state.stats.income_events = self.state.income.events().len() as u64;
        self.state.stats.missed_income_records = self.state.income.missed().len() as u64;

        Ok(PurchaseOutcome {
            member,
            program,
            slot_no,
            host,
            placement_type,
            auto_upgrades,
            recycles,
            shortfalls,
        })
    }

    /// Matrix placement plus the recycle check. A full host tree (possible
    /// only for the fallback account) is recycled first to free a seat.
    fn place_matrix(
        &mut self,
        host: MemberId,
        member: MemberId,
        slot_no: SlotNo,
        referrer: Option<MemberId>,
    ) -> Result<Vec<RecycleOutcome>, EngineError> {
        let mut recycles = Vec::new();
        if self.state.trees.is_matrix_full(host, slot_no) {
            recycles.extend(on_placement_added(
                &mut self.state.trees,
                &mut self.state.archive,
                &self.directory,
                &self.config,
                host,
                slot_no,
            ));
        }
        self.state
            .trees
            .place(host, member, Program::Matrix, slot_no, referrer)?;
        recycles.extend(on_placement_added(
            &mut self.state.trees,
            &mut self.state.archive,
            &self.directory,
            &self.config,
            host,
            slot_no,
        ));
        self.state.stats.recycles += recycles.len() as u64;
        Ok(recycles)
    }

    /// Drop cached team counts for every tree a placement touched, including
    /// trees drained or re-entered by a recycle cascade.
    fn invalidate_team_counts(
        &self,
        program: Program,
        slot_no: SlotNo,
        host: MemberId,
        recycles: &[RecycleOutcome],
    ) {
        let mut keys = vec![(host, program, slot_no)];
        for outcome in recycles {
            keys.push((outcome.owner, program, outcome.slot_no));
            if let Some(re_host) = outcome.re_placed_under {
                keys.push((re_host, program, outcome.slot_no));
            }
        }
        for key in keys {
            if let Err(e) = self.cache.invalidate_tree(&key) {
                warn!(error = %e, "cache invalidation failed");
            }
        }
    }

    fn record_missed(
        &mut self,
        bypassed: MemberId,
        member: MemberId,
        slot_no: SlotNo,
        paid: Amount,
        placement_type: &PlacementType,
        key: &str,
    ) {
        let hops = match placement_type {
            PlacementType::Sweepover { hops } => *hops,
            _ => self.config.max_sweepover_hops,
        };
        // What the bypassed upline would have earned as the level-1 ancestor.
        let amount = paid * MATRIX_LEVEL_PERCENTS[0] / 100;
        self.state
            .income
            .record_missed(bypassed, member, Program::Matrix, slot_no, amount, hops, key);
    }

    /// Settle one payment into wallets, reserves and income rows. Reserve
    /// accounts credited here are queued for the auto-upgrade trigger.
    fn settle(
        &mut self,
        member: MemberId,
        program: Program,
        slot_no: SlotNo,
        paid: Amount,
        key: &str,
        host: MemberId,
        pending: &mut VecDeque<ReserveKey>,
    ) -> Vec<DistributionFailure> {
        let mut shortfalls = Vec::new();
        match program {
            Program::Binary => {
                let referrer = self
                    .directory
                    .referrer_of(member)
                    .unwrap_or(self.config.fallback_account);
                let percent = self.config.binary_referrer_incentive_percent;
                let (incentive, pool) = referrer_incentive(paid, percent);
                if incentive > 0 {
                    if let Err(f) = self.wallet.credit(referrer, incentive, key) {
                        shortfalls.push(f);
                    }
                    self.state.income.record(
                        referrer,
                        member,
                        program,
                        slot_no,
                        IncomeCategory::ReferrerIncentive,
                        incentive,
                        percent,
                        key,
                    );
                }
                let ancestors = self.state.trees.ancestors(
                    member,
                    program,
                    slot_no,
                    BINARY_LEVEL_PERCENTS.len(),
                );
                for (i, share) in binary_tree_shares(pool).into_iter().enumerate() {
                    if share.amount == 0 {
                        continue;
                    }
                    let recipient = ancestors
                        .get(i)
                        .copied()
                        .unwrap_or(self.config.fallback_account);
                    if let Err(f) = self.wallet.credit(recipient, share.amount, key) {
                        shortfalls.push(f);
                    }
                    self.state.income.record(
                        recipient,
                        member,
                        program,
                        slot_no,
                        share.category,
                        share.amount,
                        share.percent,
                        key,
                    );
                }
            }
            Program::Matrix => {
                let placement = self.state.trees.placement_of(member, program, slot_no).cloned();
                let middle = placement
                    .as_ref()
                    .map(|p| is_middle(p.level, p.position))
                    .unwrap_or(false);
                if middle {
                    // Middle-position collection: the whole payment funds the
                    // tree owner's reserve for the next slot. At the top slot
                    // there is no next tier to fund; the collection pays the
                    // owner directly, like the bucket reserve share.
                    let owner = placement.map(|p| p.upline_id).unwrap_or(host);
                    let target = slot_no.saturating_add(1);
                    if self.catalog.price(program, target).is_none() {
                        if paid > 0 {
                            if let Err(f) = self.wallet.credit(owner, paid, key) {
                                shortfalls.push(f);
                            }
                        }
                    } else {
                        match self.state.reserves.credit(
                            owner,
                            program,
                            target,
                            paid,
                            ReserveSource::MiddlePosition {
                                source_member: member,
                            },
                            key,
                        ) {
                            Ok(balance) => {
                                info!(owner, target, balance, "middle-position payment earmarked");
                                pending.push_back((owner, program, target));
                            }
                            Err(e) => shortfalls.push(DistributionFailure::ReserveCredit {
                                member: owner,
                                program,
                                target_slot: target,
                                reason: e.to_string(),
                            }),
                        }
                    }
                    self.state.income.record(
                        owner,
                        member,
                        program,
                        slot_no,
                        IncomeCategory::MiddleReserve,
                        paid,
                        100,
                        key,
                    );
                } else {
                    let ancestors = self.state.trees.ancestors(
                        member,
                        program,
                        slot_no,
                        MATRIX_LEVEL_PERCENTS.len(),
                    );
                    for (i, share) in matrix_shares(paid).into_iter().enumerate() {
                        if share.amount == 0 {
                            continue;
                        }
                        let recipient = ancestors
                            .get(i)
                            .copied()
                            .unwrap_or(self.config.fallback_account);
                        if let Err(f) = self.wallet.credit(recipient, share.amount, key) {
                            shortfalls.push(f);
                        }
                        self.state.income.record(
                            recipient,
                            member,
                            program,
                            slot_no,
                            share.category,
                            share.amount,
                            share.percent,
                            key,
                        );
                    }
                }
            }
            Program::Bucket => {
                let upline = if host != member {
                    host
                } else {
                    self.config.fallback_account
                };
                let split = bucket_shares(paid);

                if slot_no < BUCKET_MAX_SLOT {
                    match self.state.reserves.credit(
                        upline,
                        program,
                        slot_no + 1,
                        split.upline_reserve,
                        ReserveSource::BucketSplit {
                            source_member: member,
                        },
                        key,
                    ) {
                        Ok(_) => pending.push_back((upline, program, slot_no + 1)),
                        Err(e) => shortfalls.push(DistributionFailure::ReserveCredit {
                            member: upline,
                            program,
                            target_slot: slot_no + 1,
                            reason: e.to_string(),
                        }),
                    }
                } else if split.upline_reserve > 0 {
                    // Top slot has no next reserve target; the share pays out.
                    if let Err(f) = self.wallet.credit(upline, split.upline_reserve, key) {
                        shortfalls.push(f);
                    }
                }
                self.state.income.record(
                    upline,
                    member,
                    program,
                    slot_no,
                    IncomeCategory::UplineReserve,
                    split.upline_reserve,
                    BUCKET_UPLINE_RESERVE_PERCENT,
                    key,
                );

                if split.upline_wallet > 0 {
                    if let Err(f) = self.wallet.credit(upline, split.upline_wallet, key) {
                        shortfalls.push(f);
                    }
                }
                self.state.income.record(
                    upline,
                    member,
                    program,
                    slot_no,
                    IncomeCategory::UplineWallet,
                    split.upline_wallet,
                    BUCKET_UPLINE_WALLET_PERCENT,
                    key,
                );

                let partner = self
                    .directory
                    .referrer_of(member)
                    .unwrap_or(self.config.fallback_account);
                if split.partner_incentive > 0 {
                    if let Err(f) = self.wallet.credit(partner, split.partner_incentive, key) {
                        shortfalls.push(f);
                    }
                }
                self.state.income.record(
                    partner,
                    member,
                    program,
                    slot_no,
                    IncomeCategory::PartnerIncentive,
                    split.partner_incentive,
                    BUCKET_PARTNER_INCENTIVE_PERCENT,
                    key,
                );

                let pools = self.config.pool_accounts;
                let pool_rows = [
                    (pools.leadership, IncomeCategory::LeadershipPool, split.leadership_pool),
                    (pools.jackpot, IncomeCategory::JackpotPool, split.jackpot_pool),
                    (
                        pools.royal_captain,
                        IncomeCategory::RoyalCaptainPool,
                        split.royal_captain_pool,
                    ),
                    (pools.spark, IncomeCategory::SparkPool, split.spark_pool),
                ];
                for (account, category, amount) in pool_rows {
                    if amount > 0 {
                        if let Err(f) = self.wallet.credit(account, amount, key) {
                            shortfalls.push(f);
                        }
                    }
                    self.state.income.record(
                        account,
                        member,
                        program,
                        slot_no,
                        category,
                        amount,
                        BUCKET_POOL_PERCENT,
                        key,
                    );
                }
            }
        }
        shortfalls
    }

    /// Drain the auto-upgrade queue. Each funded reserve account places,
    /// activates the next slot, debits the reserve, and distributes at the
    /// new tier price, which may queue further accounts.
    fn run_auto_upgrades(
        &mut self,
        pending: &mut VecDeque<ReserveKey>,
        base_key: &str,
    ) -> Vec<AutoUpgrade> {
        let mut performed = Vec::new();
        let mut steps: u32 = 0;

        while let Some((owner, program, target)) = pending.pop_front() {
            steps += 1;
            if steps > MAX_AUTO_UPGRADE_CHAIN {
                warn!(owner, %program, target, "auto-upgrade chain cap reached, deferring");
                break;
            }
            let Some(price) = self.catalog.price(program, target) else {
                continue;
            };
            if self.state.reserves.balance(owner, program, target) < price {
                continue;
            }
            if self.state.activations.is_active(owner, program, target) {
                continue;
            }
            let highest = self.state.activations.highest_active_slot(owner, program);
            if target != highest + 1 {
                debug!(owner, %program, target, highest, "reserve funded out of order, skipping");
                continue;
            }
            if program == Program::Bucket && self.state.phases.is_complete(owner) {
                continue;
            }

            let key = format!("{}:auto:{}:{}:{}", base_key, owner, program, target);
            let referrer = self.directory.referrer_of(owner);

            // Placement first, as in `purchase`: a step with no free seat is
            // deferred whole, leaving the reserve funded for a later retry.
            let (host, recycles) = match program {
                Program::Matrix => {
                    let direct = referrer.unwrap_or(self.config.fallback_account);
                    let resolution = resolve_placement(
                        &self.directory,
                        &self.state.activations,
                        &self.state.trees,
                        &self.config,
                        owner,
                        target,
                        direct,
                    );
                    let recycles =
                        match self.place_matrix(resolution.host, owner, target, referrer) {
                            Ok(recycles) => recycles,
                            Err(e) => {
                                warn!(owner, target, error = %e, "auto-upgrade placement deferred");
                                continue;
                            }
                        };
                    match resolution.placement_type {
                        PlacementType::Sweepover { .. } => self.state.stats.sweepovers += 1,
                        PlacementType::Fallback => self.state.stats.fallback_placements += 1,
                        PlacementType::Direct => {}
                    }
                    if let Some(bypassed) = resolution.bypassed {
                        self.record_missed(
                            bypassed,
                            owner,
                            target,
                            price,
                            &resolution.placement_type,
                            &key,
                        );
                    }
                    (resolution.host, recycles)
                }
                Program::Bucket => {
                    let admit = self
                        .state
                        .phases
                        .admit(&mut self.state.trees, owner, target, 1);
                    (admit.host, Vec::new())
                }
                Program::Binary => {
                    let h = referrer.unwrap_or(self.config.fallback_account);
                    if let Err(e) = self.state.trees.place(h, owner, program, target, referrer) {
                        warn!(owner, target, error = %e, "auto-upgrade placement deferred");
                        continue;
                    }
                    (h, Vec::new())
                }
            };

            if self
                .state
                .activations
                .activate(owner, program, target, ActivationType::Auto, price, &key)
                .is_err()
            {
                continue;
            }
            if let Err(e) =
                self.state
                    .reserves
                    .debit(owner, program, target, price, ReserveSource::AutoUpgrade, &key)
            {
                warn!(owner, %program, target, error = %e, "reserve debit failed after activation");
                continue;
            }
            self.invalidate_team_counts(program, target, host, &recycles);

            let shortfalls = self.settle(owner, program, target, price, &key, host, pending);
            self.state.stats.distribution_shortfalls += shortfalls.len() as u64;
            self.state.stats.auto_upgrades += 1;
            info!(owner, %program, target, price, "reserve-funded auto upgrade");
            performed.push(AutoUpgrade {
                member: owner,
                program,
                slot_no: target,
                amount: price,
            });

            if self.config.distribution_failure_policy == DistributionFailurePolicy::Block
                && !shortfalls.is_empty()
            {
                warn!(owner, %program, target, "distribution shortfall, upgrade chain blocked");
                break;
            }
        }
        performed
    }

    // --- read API ---

    pub fn reserve_balance(&self, member: MemberId, program: Program, target_slot: SlotNo) -> Amount {
        self.state.reserves.balance(member, program, target_slot)
    }

    pub fn highest_active_slot(&self, member: MemberId, program: Program) -> SlotNo {
        self.state.activations.highest_active_slot(member, program)
    }

    pub fn is_slot_active(&self, member: MemberId, program: Program, slot_no: SlotNo) -> bool {
        self.state.activations.is_active(member, program, slot_no)
    }

    pub fn placement_of(
        &self,
        member: MemberId,
        program: Program,
        slot_no: SlotNo,
    ) -> Option<&Placement> {
        self.state.trees.placement_of(member, program, slot_no)
    }

    /// Downline size under one member's placement, bounded walk. A partial
    /// walk falls back to the last complete cached count; the walk's lower
    /// bound is served when no cached value exists.
    pub fn team_size(&self, member: MemberId, program: Program, slot_no: SlotNo) -> u32 {
        let Some(placement) = self.state.trees.placement_of(member, program, slot_no) else {
            return 0;
        };
        let tree_key = (placement.upline_id, program, slot_no);
        let Some(tree) = self.state.trees.tree(&tree_key) else {
            return 0;
        };
        let fan_out = placement.program.fan_out().unwrap_or(1);
        let budget = TraversalBudget {
            max_nodes: self.config.traversal_node_budget,
            deadline: self.config.traversal_deadline,
        };
        let cache_key = (member, program, slot_no);
        match count_subtree(tree, (placement.level, placement.position), fan_out, budget) {
            TraversalOutcome::Complete { nodes } => {
                let team = nodes.saturating_sub(1);
                if let Err(e) = self.cache.put(cache_key, tree_key, team) {
                    warn!(error = %e, "team-size cache write failed");
                }
                team
            }
            TraversalOutcome::Partial { nodes } => {
                debug!(member, %program, slot_no, nodes, "team-size walk partial");
                match self.cache.get(&cache_key) {
                    Ok(Some(cached)) => cached,
                    _ => nodes.saturating_sub(1),
                }
            }
        }
    }

    pub fn income(&self) -> &IncomeBook {
        &self.state.income
    }

    pub fn reserves(&self) -> &ReserveLedger {
        &self.state.reserves
    }

    pub fn activations(&self) -> &ActivationLedger {
        &self.state.activations
    }

    pub fn archive(&self) -> &RecycleArchive {
        &self.state.archive
    }

    pub fn phases(&self) -> &PhaseBook {
        &self.state.phases
    }

    pub fn wallet(&self) -> &W {
        &self.wallet
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn stats(&self) -> &EngineStats {
        &self.state.stats
    }

    /// Snapshot of all engine-owned state, for persistence.
    pub fn state(&self) -> &EngineState {
        &self.state
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::interface::{InMemoryDirectory, InMemoryWallet, StaticPriceCatalog};

    type TestEngine = CompensationEngine<InMemoryDirectory, StaticPriceCatalog, InMemoryWallet>;

    fn engine_with_chain(members: u64) -> TestEngine {
        let mut dir = InMemoryDirectory::new();
        dir.add_member(1, None);
        for id in 2..=members {
            dir.add_member(id, Some(id - 1));
        }
        let catalog = StaticPriceCatalog::geometric(Program::Binary, 100, 16)
            .merge(StaticPriceCatalog::geometric(Program::Matrix, 100, 16))
            .merge(StaticPriceCatalog::geometric(Program::Bucket, 100, 16));
        CompensationEngine::new(dir, catalog, InMemoryWallet::new(), EngineConfig::new(1))
    }

    #[test]
    fn test_join_validates_member_and_amount() {
        let mut engine = engine_with_chain(3);
        assert!(matches!(
            engine.join(99, Program::Matrix, 100, "tx-1"),
            Err(EngineError::MemberNotFound(99))
        ));
        assert!(matches!(
            engine.join(2, Program::Matrix, 42, "tx-1"),
            Err(EngineError::AmountMismatch { expected: 100, .. })
        ));
    }

    #[test]
    fn test_join_activates_and_places() {
        let mut engine = engine_with_chain(3);
        engine.join(2, Program::Matrix, 100, "tx-1").unwrap();
        let outcome = engine.join(3, Program::Matrix, 100, "tx-2").unwrap();

        assert_eq!(outcome.host, 2);
        assert_eq!(outcome.placement_type, PlacementType::Direct);
        assert!(engine.is_slot_active(3, Program::Matrix, 1));
        assert_eq!(engine.placement_of(3, Program::Matrix, 1).unwrap().upline_id, 2);
    }

    #[test]
    fn test_upgrade_must_be_next_slot() {
        let mut engine = engine_with_chain(3);
        engine.join(2, Program::Matrix, 100, "tx-1").unwrap();
        let skip = engine.upgrade(2, Program::Matrix, 3, 400, "tx-2");
        assert!(matches!(
            skip,
            Err(EngineError::InvalidProgression { requested: 3, highest_active: 1, .. })
        ));
        engine.upgrade(2, Program::Matrix, 2, 200, "tx-3").unwrap();
        assert_eq!(engine.highest_active_slot(2, Program::Matrix), 2);
    }

    #[test]
    fn test_duplicate_key_rejected() {
        let mut engine = engine_with_chain(3);
        engine.join(2, Program::Matrix, 100, "tx-1").unwrap();
        let replay = engine.join(3, Program::Matrix, 100, "tx-1");
        assert!(matches!(replay, Err(EngineError::DuplicateIdempotencyKey(_))));
        assert!(!engine.is_slot_active(3, Program::Matrix, 1));
    }

    #[test]
    fn test_binary_settlement_splits_pool() {
        let mut engine = engine_with_chain(2);
        let outcome = engine.join(2, Program::Binary, 100, "tx-1").unwrap();
        assert!(outcome.shortfalls.is_empty());

        // 10% referrer incentive to member 1, then level-1 share of the 90
        // pool (30% = 27) also to member 1 as the only ancestor, rest to the
        // fallback account (also member 1 here)
        let total: Amount = engine.income().events_for_key("tx-1").map(|e| e.amount).sum();
        assert_eq!(total, 100);
        assert_eq!(engine.wallet().balance(1), 100);
    }

    #[test]
    fn test_matrix_non_middle_splits_20_20_60() {
        let mut engine = engine_with_chain(3);
        engine.join(2, Program::Matrix, 100, "tx-1").unwrap();
        engine.join(3, Program::Matrix, 100, "tx-2").unwrap();

        // Member 3 lands at level 1 of tree 2: not a middle position
        let rows: Vec<_> = engine.income().events_for_key("tx-2").collect();
        assert_eq!(rows.len(), 3);
        let total: Amount = rows.iter().map(|e| e.amount).sum();
        assert_eq!(total, 100);
        // Level-1 ancestor is member 2
        assert_eq!(rows[0].recipient, 2);
        assert_eq!(rows[0].amount, 20);
    }

    #[test]
    fn test_bucket_join_splits_seven_ways() {
        let mut engine = engine_with_chain(3);
        engine.join(2, Program::Bucket, 100, "tx-1").unwrap();
        let outcome = engine.join(3, Program::Bucket, 100, "tx-2").unwrap();

        // Member 3 seated under priority member 2
        assert_eq!(outcome.host, 2);
        // 50% earmarked for member 2's slot-2 reserve
        assert_eq!(engine.reserve_balance(2, Program::Bucket, 2), 50);
        // 20% to member 2's wallet
        let upline_wallet: Amount = engine
            .income()
            .events_for_key("tx-2")
            .filter(|e| e.category == IncomeCategory::UplineWallet)
            .map(|e| e.amount)
            .sum();
        assert_eq!(upline_wallet, 20);
        let total: Amount = engine.income().events_for_key("tx-2").map(|e| e.amount).sum();
        assert_eq!(total, 100);
    }

    #[test]
    fn test_stats_track_joins_and_upgrades() {
        let mut engine = engine_with_chain(4);
        engine.join(2, Program::Binary, 100, "a").unwrap();
        engine.join(3, Program::Binary, 100, "b").unwrap();
        engine.upgrade(3, Program::Binary, 2, 200, "c").unwrap();
        assert_eq!(engine.stats().joins, 2);
        assert_eq!(engine.stats().upgrades, 1);
    }

    #[test]
    fn test_team_size_counts_downline() {
        // Everyone referred by member 1: all placements land in tree 1 by BFS
        let mut dir = InMemoryDirectory::new();
        dir.add_member(1, None);
        for id in 2..=8u64 {
            dir.add_member(id, Some(1));
        }
        let catalog = StaticPriceCatalog::geometric(Program::Binary, 100, 16);
        let mut engine =
            CompensationEngine::new(dir, catalog, InMemoryWallet::new(), EngineConfig::new(1));
        for (i, m) in (2..=8u64).enumerate() {
            engine.join(m, Program::Binary, 100, &format!("tx-{}", i)).unwrap();
        }

        // Tree 1: level 1 holds 2, 3; level 2 holds 4..=7; level 3 holds 8.
        // Member 2's subtree: 4, 5 and 8 under 4.
        assert_eq!(engine.team_size(2, Program::Binary, 1), 3);
        assert_eq!(engine.team_size(3, Program::Binary, 1), 2);
        assert_eq!(engine.team_size(8, Program::Binary, 1), 0);
    }

    #[test]
    fn test_failed_placement_leaves_no_activation() {
        let mut dir = InMemoryDirectory::new();
        dir.add_member(1, None);
        for id in 2..=41u64 {
            dir.add_member(id, Some(1));
        }
        let catalog = StaticPriceCatalog::geometric(Program::Matrix, 100, 16);
        let mut config = EngineConfig::new(1);
        config.max_cascade_recycles = 0;
        let mut engine = CompensationEngine::new(dir, catalog, InMemoryWallet::new(), config);
        for id in 2..=40u64 {
            engine.join(id, Program::Matrix, 100, &format!("tx-{}", id)).unwrap();
        }

        // Tree 1 sits at capacity and the recycle cap forbids draining it
        let overflow = engine.join(41, Program::Matrix, 100, "tx-41");
        assert!(matches!(overflow, Err(EngineError::TreeFull { .. })));

        // The rejected purchase recorded nothing: no activation, no seat,
        // and the payment key is still unconsumed
        assert!(!engine.is_slot_active(41, Program::Matrix, 1));
        assert!(engine.placement_of(41, Program::Matrix, 1).is_none());
        assert!(!engine.activations().key_used("tx-41"));
        assert_eq!(engine.activations().len(), 39);
    }

    #[test]
    fn test_top_slot_middle_pays_the_owner() {
        // Catalog stops at slot 1: a middle collection has no next tier to
        // fund, so it pays the tree owner's wallet instead of parking
        let mut dir = InMemoryDirectory::new();
        dir.add_member(1, None);
        dir.add_member(2, Some(1));
        for id in 10..=14u64 {
            dir.add_member(id, Some(2));
        }
        let catalog = StaticPriceCatalog::geometric(Program::Matrix, 100, 1);
        let mut engine =
            CompensationEngine::new(dir, catalog, InMemoryWallet::new(), EngineConfig::new(1));
        engine.join(2, Program::Matrix, 100, "join-2").unwrap();
        for id in 10..=13u64 {
            engine.join(id, Program::Matrix, 100, &format!("tx-{}", id)).unwrap();
        }

        // Fifth joiner lands on the middle seat (2, 1) of tree 2
        let before = engine.wallet().balance(2);
        engine.join(14, Program::Matrix, 100, "tx-14").unwrap();
        assert_eq!(engine.wallet().balance(2), before + 100);
        assert_eq!(engine.reserve_balance(2, Program::Matrix, 2), 0);
        let row: Vec<_> = engine.income().events_for_key("tx-14").collect();
        assert_eq!(row.len(), 1);
        assert_eq!(row[0].category, IncomeCategory::MiddleReserve);
        assert_eq!(row[0].recipient, 2);
    }
}
