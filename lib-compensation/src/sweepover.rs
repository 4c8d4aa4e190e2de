//! Sweepover resolver — referral-chain escalation for matrix placements.
//!
//! A referrer is eligible to host a slot-N placement when they have
//! activated slot N (or higher) and their slot-N matrix tree has room. When
//! the direct referrer is not eligible, the resolver walks the referral
//! chain (not the placement tree) upward, one ancestor per hop, up to the
//! configured hop budget, and the first eligible ancestor hosts. Past the
//! budget, the injected system fallback account hosts.
//!
//! Every non-direct outcome names the bypassed direct referrer so the
//! engine can record the income they missed.

use std::collections::BTreeSet;
use tracing::{debug, warn};

use crate::config::EngineConfig;
use crate::interface::MemberDirectory;
use crate::ledger::ActivationLedger;
use crate::tree::TreeBook;
use crate::types::{MemberId, PlacementType, Program, SlotNo};

/// Outcome of host resolution.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Resolution {
    /// The member whose tree receives the placement.
    pub host: MemberId,
    pub placement_type: PlacementType,
    /// The direct referrer, when they were skipped.
    pub bypassed: Option<MemberId>,
}

/// Whether `candidate` can host a slot-N matrix placement right now.
pub fn is_eligible(
    directory: &impl MemberDirectory,
    activations: &ActivationLedger,
    trees: &TreeBook,
    candidate: MemberId,
    slot_no: SlotNo,
) -> bool {
    directory.is_active(candidate)
        && activations.highest_active_slot(candidate, Program::Matrix) >= slot_no
        && !trees.is_matrix_full(candidate, slot_no)
}

/// Resolve the host tree for a new matrix placement.
pub fn resolve_placement(
    directory: &impl MemberDirectory,
    activations: &ActivationLedger,
    trees: &TreeBook,
    config: &EngineConfig,
    new_member: MemberId,
    slot_no: SlotNo,
    direct_referrer: MemberId,
) -> Resolution {
    if is_eligible(directory, activations, trees, direct_referrer, slot_no) {
        return Resolution {
            host: direct_referrer,
            placement_type: PlacementType::Direct,
            bypassed: None,
        };
    }

    // Visited set guards against malformed referral links forming a cycle.
    let mut visited: BTreeSet<MemberId> = BTreeSet::new();
    visited.insert(direct_referrer);

    let mut hops: u32 = 0;
    let mut current = direct_referrer;
    while hops < config.max_sweepover_hops {
        let Some(ancestor) = directory.referrer_of(current) else {
            break;
        };
        if !visited.insert(ancestor) {
            warn!(member = new_member, ancestor, "referral chain cycle during sweepover");
            break;
        }
        hops += 1;
        if is_eligible(directory, activations, trees, ancestor, slot_no) {
            debug!(
                member = new_member,
                host = ancestor,
                hops,
                slot_no,
                "sweepover host found"
            );
            return Resolution {
                host: ancestor,
                placement_type: PlacementType::Sweepover { hops },
                bypassed: Some(direct_referrer),
            };
        }
        current = ancestor;
    }

    debug!(
        member = new_member,
        slot_no,
        fallback = config.fallback_account,
        "no eligible ancestor within hop budget, using fallback account"
    );
    Resolution {
        host: config.fallback_account,
        placement_type: PlacementType::Fallback,
        bypassed: Some(direct_referrer),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::interface::InMemoryDirectory;
    use crate::types::ActivationType;

    fn chain(len: u64) -> InMemoryDirectory {
        // Member 1 is root; member n is referred by n-1
        let mut dir = InMemoryDirectory::new();
        dir.add_member(1, None);
        for id in 2..=len {
            dir.add_member(id, Some(id - 1));
        }
        dir
    }

    fn activate(ledger: &mut ActivationLedger, member: MemberId, slot: SlotNo) {
        for s in 1..=slot {
            ledger
                .activate(
                    member,
                    Program::Matrix,
                    s,
                    ActivationType::Initial,
                    10,
                    &format!("act-{}-{}", member, s),
                )
                .unwrap();
        }
    }

    #[test]
    fn test_direct_when_referrer_eligible() {
        let dir = chain(5);
        let mut acts = ActivationLedger::new();
        activate(&mut acts, 4, 2);
        let trees = TreeBook::new();
        let config = EngineConfig::new(1);

        let res = resolve_placement(&dir, &acts, &trees, &config, 5, 2, 4);
        assert_eq!(res.placement_type, PlacementType::Direct);
        assert_eq!(res.host, 4);
        assert_eq!(res.bypassed, None);
    }

    #[test]
    fn test_sweepover_counts_hops() {
        // Referrer 9 lacks slot 2; so do 8, 7, 6; member 5 has it: 4 hops up
        let dir = chain(10);
        let mut acts = ActivationLedger::new();
        for m in 6..=9 {
            activate(&mut acts, m, 1);
        }
        activate(&mut acts, 5, 2);
        let trees = TreeBook::new();
        let config = EngineConfig::new(1);

        let res = resolve_placement(&dir, &acts, &trees, &config, 10, 2, 9);
        assert_eq!(res.placement_type, PlacementType::Sweepover { hops: 4 });
        assert_eq!(res.host, 5);
        assert_eq!(res.bypassed, Some(9));
    }

    #[test]
    fn test_fallback_past_hop_budget() {
        // 70-member chain, nobody has slot 2: budget (60) exhausted
        let dir = chain(70);
        let acts = ActivationLedger::new();
        let trees = TreeBook::new();
        let config = EngineConfig::new(999);

        let res = resolve_placement(&dir, &acts, &trees, &config, 70, 2, 69);
        assert_eq!(res.placement_type, PlacementType::Fallback);
        assert_eq!(res.host, 999);
        assert_eq!(res.bypassed, Some(69));
    }

    #[test]
    fn test_full_tree_disqualifies_host() {
        let dir = chain(3);
        let mut acts = ActivationLedger::new();
        activate(&mut acts, 2, 1);
        activate(&mut acts, 1, 1);

        let mut trees = TreeBook::new();
        for i in 0..39u64 {
            trees.place(2, 1000 + i, Program::Matrix, 1, Some(2)).unwrap();
        }

        let config = EngineConfig::new(500);
        let res = resolve_placement(&dir, &acts, &trees, &config, 3, 1, 2);
        // Referrer 2 is active for slot 1 but the tree is full: escalate to 1
        assert_eq!(res.placement_type, PlacementType::Sweepover { hops: 1 });
        assert_eq!(res.host, 1);
    }

    #[test]
    fn test_inactive_member_disqualified() {
        let mut dir = chain(3);
        let mut acts = ActivationLedger::new();
        activate(&mut acts, 2, 1);
        activate(&mut acts, 1, 1);
        dir.deactivate(2);

        let trees = TreeBook::new();
        let config = EngineConfig::new(500);
        let res = resolve_placement(&dir, &acts, &trees, &config, 3, 1, 2);
        assert_eq!(res.host, 1);
    }
}
