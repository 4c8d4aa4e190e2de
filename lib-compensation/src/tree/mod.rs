//! Tree placement — fixed fan-out placement trees and the BFS allocator.
//!
//! Each tree owner has one tree per (program, slot). Nodes are addressed by
//! (level, position): level is depth from the owner (children of the root
//! are level 1), position is the 0-indexed left-to-right ordinal within the
//! whole level. The parent of (level, pos) is (level - 1, pos / fan_out).
//!
//! # Invariants
//! - Exactly one active placement per (member, program, slot); `place` is
//!   idempotent on that key.
//! - A matrix tree never holds a node deeper than level 3 and never exceeds
//!   39 nodes before it is archived.
//! - BFS assignment: a level is only examined once every shallower level is
//!   full, so an assigned node's parent is always occupied.

pub mod middle;
pub mod traversal;

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::error::EngineError;
use crate::types::{
    ActivationKey, MemberId, PhaseNo, Program, SlotNo, TreeKey, MATRIX_TREE_CAPACITY,
};

/// Node address inside one tree: (level, position within level).
pub type NodeAddr = (u8, u32);

/// One occupied tree position.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Placement {
    pub member_id: MemberId,
    pub program: Program,
    /// Immediate tree parent; the tree owner for level-1 nodes, `None` only
    /// for bucket priority roots.
    pub parent_id: Option<MemberId>,
    /// The tree owner. May differ from the direct referrer after sweepover
    /// or spillover.
    pub upline_id: MemberId,
    pub position: u32,
    pub level: u8,
    pub slot_no: SlotNo,
    /// Bucket program only.
    pub phase: Option<PhaseNo>,
    /// Placed somewhere other than directly under the referrer.
    pub is_spillover: bool,
    pub active: bool,
}

/// All active placement trees, plus the member index enforcing the
/// one-active-placement invariant.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TreeBook {
    #[serde(with = "nested_pairs")]
    trees: BTreeMap<TreeKey, BTreeMap<NodeAddr, Placement>>,
    #[serde(with = "crate::types::map_as_pairs")]
    by_member: BTreeMap<ActivationKey, TreeKey>,
}

/// Serde adapter for the doubly composite-keyed tree map; both layers
/// serialize as pair sequences.
mod nested_pairs {
    use super::{NodeAddr, Placement};
    use crate::types::TreeKey;
    use serde::{Deserialize, Deserializer, Serialize, Serializer};
    use std::collections::BTreeMap;

    pub fn serialize<S: Serializer>(
        map: &BTreeMap<TreeKey, BTreeMap<NodeAddr, Placement>>,
        serializer: S,
    ) -> Result<S::Ok, S::Error> {
        #[derive(Serialize)]
        struct Row<'a>(&'a TreeKey, Vec<(&'a NodeAddr, &'a Placement)>);
        serializer.collect_seq(map.iter().map(|(k, v)| Row(k, v.iter().collect())))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(
        deserializer: D,
    ) -> Result<BTreeMap<TreeKey, BTreeMap<NodeAddr, Placement>>, D::Error> {
        let rows = Vec::<(TreeKey, Vec<(NodeAddr, Placement)>)>::deserialize(deserializer)?;
        Ok(rows
            .into_iter()
            .map(|(k, v)| (k, v.into_iter().collect()))
            .collect())
    }
}

impl TreeBook {
    pub fn new() -> Self {
        Self::default()
    }

    /// BFS-place `new_member` in `tree_owner`'s tree. Idempotent on
    /// (new_member, program, slot_no): a repeated call returns the existing
    /// placement unchanged.
    pub fn place(
        &mut self,
        tree_owner: MemberId,
        new_member: MemberId,
        program: Program,
        slot_no: SlotNo,
        referrer: Option<MemberId>,
    ) -> Result<Placement, EngineError> {
        if let Some(existing) = self.placement_of(new_member, program, slot_no) {
            return Ok(existing.clone());
        }

        // Bucket seats are serial, not BFS; they go through `place_bucket`.
        let Some(fan_out) = program.fan_out() else {
            return Err(EngineError::PlacementUnsupported { program });
        };
        let tree_key = (tree_owner, program, slot_no);
        let tree = self.trees.entry(tree_key).or_default();

        let (level, position) = match bfs_vacancy(tree, fan_out, program.max_depth()) {
            Some(addr) => addr,
            None => {
                return Err(EngineError::TreeFull {
                    owner: tree_owner,
                    program,
                    slot_no,
                })
            }
        };

        let parent_id = if level == 1 {
            Some(tree_owner)
        } else {
            let parent_addr = (level - 1, position / fan_out);
            Some(
                tree.get(&parent_addr)
                    .map(|p| p.member_id)
                    .unwrap_or(tree_owner),
            )
        };

        let is_spillover = level > 1 || referrer.map(|r| r != tree_owner).unwrap_or(false);
        let placement = Placement {
            member_id: new_member,
            program,
            parent_id,
            upline_id: tree_owner,
            position,
            level,
            slot_no,
            phase: None,
            is_spillover,
            active: true,
        };
        tree.insert((level, position), placement.clone());
        self.by_member
            .insert((new_member, program, slot_no), tree_key);
        Ok(placement)
    }

    /// Serial placement for the bucket program. No BFS: the phase manager
    /// dictates the seat address.
    #[allow(clippy::too_many_arguments)]
    pub fn place_bucket(
        &mut self,
        bucket_root: MemberId,
        member: MemberId,
        slot_no: SlotNo,
        phase: PhaseNo,
        position: u32,
        parent: Option<MemberId>,
    ) -> Placement {
        let tree_key = (bucket_root, Program::Bucket, slot_no);
        let placement = Placement {
            member_id: member,
            program: Program::Bucket,
            parent_id: parent,
            upline_id: bucket_root,
            position,
            level: 1,
            slot_no,
            phase: Some(phase),
            is_spillover: false,
            active: true,
        };
        self.trees
            .entry(tree_key)
            .or_default()
            .insert((1, position), placement.clone());
        self.by_member
            .insert((member, Program::Bucket, slot_no), tree_key);
        placement
    }

    /// The member's active placement for (program, slot), if any.
    pub fn placement_of(
        &self,
        member: MemberId,
        program: Program,
        slot_no: SlotNo,
    ) -> Option<&Placement> {
        let tree_key = self.by_member.get(&(member, program, slot_no))?;
        self.trees
            .get(tree_key)?
            .values()
            .find(|p| p.member_id == member && p.active)
    }

    /// Occupied node count of one tree.
    pub fn occupancy(&self, owner: MemberId, program: Program, slot_no: SlotNo) -> u32 {
        self.trees
            .get(&(owner, program, slot_no))
            .map(|t| t.len() as u32)
            .unwrap_or(0)
    }

    /// Whether a matrix tree is at its 39-node capacity.
    pub fn is_matrix_full(&self, owner: MemberId, slot_no: SlotNo) -> bool {
        self.occupancy(owner, Program::Matrix, slot_no) >= MATRIX_TREE_CAPACITY
    }

    /// All nodes of one tree in (level, position) order.
    pub fn nodes(&self, owner: MemberId, program: Program, slot_no: SlotNo) -> Vec<&Placement> {
        self.trees
            .get(&(owner, program, slot_no))
            .map(|t| t.values().collect())
            .unwrap_or_default()
    }

    /// Drain a tree for archival. Every drained placement is marked inactive
    /// and dropped from the member index; the owner gets a fresh empty tree.
    pub fn drain_tree(
        &mut self,
        owner: MemberId,
        program: Program,
        slot_no: SlotNo,
    ) -> Vec<Placement> {
        let tree_key = (owner, program, slot_no);
        let drained = self.trees.remove(&tree_key).unwrap_or_default();
        let mut nodes: Vec<Placement> = Vec::with_capacity(drained.len());
        for (_, mut placement) in drained {
            self.by_member
                .remove(&(placement.member_id, program, slot_no));
            placement.active = false;
            nodes.push(placement);
        }
        self.trees.insert(tree_key, BTreeMap::new());
        nodes
    }

    /// Deactivate one member's placement without vacating the seat: the node
    /// stays in the tree (shape and occupancy are preserved) but no longer
    /// counts as the member's active placement. Recycle and phase
    /// advancement deactivate-then-replace through this.
    pub fn deactivate_in_place(&mut self, member: MemberId, program: Program, slot_no: SlotNo) {
        if let Some(tree_key) = self.by_member.remove(&(member, program, slot_no)) {
            if let Some(tree) = self.trees.get_mut(&tree_key) {
                if let Some(node) = tree.values_mut().find(|p| p.member_id == member) {
                    node.active = false;
                }
            }
        }
    }

    /// Ancestor chain through the placement structure: parent, parent's
    /// parent, … crossing tree boundaries through each owner's own
    /// placement. Stops at a member with no active placement or after
    /// `max_levels`.
    pub fn ancestors(
        &self,
        member: MemberId,
        program: Program,
        slot_no: SlotNo,
        max_levels: usize,
    ) -> Vec<MemberId> {
        let mut chain = Vec::new();
        let mut current = member;
        while chain.len() < max_levels {
            let Some(placement) = self.placement_of(current, program, slot_no) else {
                break;
            };
            let Some(parent) = placement.parent_id else {
                break;
            };
            chain.push(parent);
            current = parent;
        }
        chain
    }

    pub(crate) fn tree(&self, key: &TreeKey) -> Option<&BTreeMap<NodeAddr, Placement>> {
        self.trees.get(key)
    }
}

/// First vacant (level, position) in BFS order, `None` when the tree is at
/// its depth cap and full. Levels are examined in order; inside a level the
/// first gap in the occupied-position sequence wins.
fn bfs_vacancy(
    tree: &BTreeMap<NodeAddr, Placement>,
    fan_out: u32,
    max_depth: Option<u8>,
) -> Option<NodeAddr> {
    let mut level: u8 = 1;
    let mut width: u32 = fan_out;
    loop {
        if let Some(max) = max_depth {
            if level > max {
                return None;
            }
        }
        let mut expected: u32 = 0;
        for ((_, pos), _) in tree.range((level, 0)..=(level, u32::MAX)) {
            if *pos != expected {
                break;
            }
            expected += 1;
        }
        if expected < width {
            return Some((level, expected));
        }
        level += 1;
        width = width.saturating_mul(fan_out);
    }
}
