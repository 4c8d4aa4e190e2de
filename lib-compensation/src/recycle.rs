//! Recycle manager — archival of completed matrix trees.
//!
//! A matrix tree completes at its 39th occupied node. Completion freezes the
//! tree as an immutable `RecycleInstance` with per-node snapshot rows and a
//! strictly increasing sequence number per (owner, slot), allocates a fresh
//! empty tree for the same key, and re-places the owner as a new member into
//! their direct upline's tree (system fallback when no upline). That
//! re-placement can complete the upline's tree in turn; the cascade runs on
//! an explicit work queue, never recursion, and carries a hard iteration
//! cap.
//!
//! Instances are never mutated after creation.

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, VecDeque};
use tracing::{info, warn};

use crate::config::EngineConfig;
use crate::interface::MemberDirectory;
use crate::tree::{Placement, TreeBook};
use crate::types::{MemberId, Program, SlotNo, MATRIX_TREE_CAPACITY};

/// Immutable per-node snapshot row inside an archived tree.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeSnapshot {
    pub member_id: MemberId,
    pub level: u8,
    pub position: u32,
    pub parent_id: Option<MemberId>,
    pub is_spillover: bool,
}

impl From<&Placement> for NodeSnapshot {
    fn from(p: &Placement) -> Self {
        Self {
            member_id: p.member_id,
            level: p.level,
            position: p.position,
            parent_id: p.parent_id,
            is_spillover: p.is_spillover,
        }
    }
}

/// One archived 39-node tree.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecycleInstance {
    pub owner: MemberId,
    pub slot_no: SlotNo,
    /// 1-based, strictly increasing per (owner, slot).
    pub sequence_no: u32,
    /// Global archival order across all owners.
    pub archive_seq: u64,
    pub nodes: Vec<NodeSnapshot>,
}

/// Archive of all recycled trees.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RecycleArchive {
    #[serde(with = "crate::types::map_as_pairs")]
    instances: BTreeMap<(MemberId, SlotNo), Vec<RecycleInstance>>,
    next_archive_seq: u64,
}

impl RecycleArchive {
    pub fn new() -> Self {
        Self::default()
    }

    fn archive(&mut self, owner: MemberId, slot_no: SlotNo, nodes: &[Placement]) -> &RecycleInstance {
        let entry = self.instances.entry((owner, slot_no)).or_default();
        let sequence_no = entry.len() as u32 + 1;
        let archive_seq = self.next_archive_seq;
        self.next_archive_seq += 1;
        entry.push(RecycleInstance {
            owner,
            slot_no,
            sequence_no,
            archive_seq,
            nodes: nodes.iter().map(NodeSnapshot::from).collect(),
        });
        entry.last().expect("just pushed")
    }

    /// Archived instances for one (owner, slot), oldest first.
    pub fn instances(&self, owner: MemberId, slot_no: SlotNo) -> &[RecycleInstance] {
        self.instances
            .get(&(owner, slot_no))
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    pub fn total(&self) -> u64 {
        self.next_archive_seq
    }
}

/// One completed recycle.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecycleOutcome {
    pub owner: MemberId,
    pub slot_no: SlotNo,
    pub sequence_no: u32,
    /// Tree the owner was re-placed into, `None` for the system root.
    pub re_placed_under: Option<MemberId>,
}

enum Task {
    CheckFull { owner: MemberId },
    PlaceOwner { owner: MemberId, host: MemberId },
}

/// Run after every successful matrix placement. Archives any tree that
/// reached capacity and processes the resulting cascade.
pub fn on_placement_added(
    trees: &mut TreeBook,
    archive: &mut RecycleArchive,
    directory: &impl MemberDirectory,
    config: &EngineConfig,
    owner: MemberId,
    slot_no: SlotNo,
) -> Vec<RecycleOutcome> {
    let mut outcomes = Vec::new();
    let mut queue: VecDeque<Task> = VecDeque::new();
    queue.push_back(Task::CheckFull { owner });
    let mut archived: u32 = 0;

    while let Some(task) = queue.pop_front() {
        match task {
            Task::CheckFull { owner } => {
                if trees.occupancy(owner, Program::Matrix, slot_no) < MATRIX_TREE_CAPACITY {
                    continue;
                }
                if archived >= config.max_cascade_recycles {
                    warn!(
                        owner,
                        slot_no,
                        cap = config.max_cascade_recycles,
                        "cascade recycle cap reached, deferring"
                    );
                    break;
                }
                archived += 1;

                let nodes = trees.drain_tree(owner, Program::Matrix, slot_no);
                let instance = archive.archive(owner, slot_no, &nodes);
                let sequence_no = instance.sequence_no;
                info!(owner, slot_no, sequence_no, "matrix tree recycled");

                let host = directory
                    .referrer_of(owner)
                    .filter(|h| *h != owner)
                    .unwrap_or(config.fallback_account);
                if host == owner {
                    // The system root does not re-enter its own tree.
                    outcomes.push(RecycleOutcome {
                        owner,
                        slot_no,
                        sequence_no,
                        re_placed_under: None,
                    });
                    continue;
                }
                outcomes.push(RecycleOutcome {
                    owner,
                    slot_no,
                    sequence_no,
                    re_placed_under: Some(host),
                });
                queue.push_front(Task::PlaceOwner { owner, host });
            }
            Task::PlaceOwner { owner, host } => {
                if trees.occupancy(host, Program::Matrix, slot_no) >= MATRIX_TREE_CAPACITY {
                    // Free a seat by recycling the host first, then retry.
                    queue.push_front(Task::PlaceOwner { owner, host });
                    queue.push_front(Task::CheckFull { owner: host });
                    continue;
                }
                trees.deactivate_in_place(owner, Program::Matrix, slot_no);
                if trees
                    .place(host, owner, Program::Matrix, slot_no, directory.referrer_of(owner))
                    .is_ok()
                {
                    queue.push_back(Task::CheckFull { owner: host });
                }
            }
        }
    }

    outcomes
}
