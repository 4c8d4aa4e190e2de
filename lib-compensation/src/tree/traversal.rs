//! Bounded breadth-first tree traversal.
//!
//! Tree-wide walks (team counting for the read API) carry an explicit node
//! budget and a wall-clock deadline. On exhaustion the walk stops and the
//! result is typed as partial; callers fall back to the last cached value
//! instead of blocking or raising.

use std::collections::{BTreeSet, VecDeque};
use std::time::{Duration, Instant};

use super::{NodeAddr, Placement};
use std::collections::BTreeMap;

/// Budget for one traversal.
#[derive(Debug, Clone, Copy)]
pub struct TraversalBudget {
    pub max_nodes: u32,
    pub deadline: Duration,
}

impl Default for TraversalBudget {
    fn default() -> Self {
        Self {
            max_nodes: 4096,
            deadline: Duration::from_millis(250),
        }
    }
}

/// Result of a bounded walk.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TraversalOutcome {
    /// The whole subtree was visited.
    Complete { nodes: u32 },
    /// Budget or deadline ran out first; `nodes` is a lower bound.
    Partial { nodes: u32 },
}

impl TraversalOutcome {
    pub fn nodes(&self) -> u32 {
        match self {
            TraversalOutcome::Complete { nodes } | TraversalOutcome::Partial { nodes } => *nodes,
        }
    }

    pub fn is_complete(&self) -> bool {
        matches!(self, TraversalOutcome::Complete { .. })
    }
}

/// Count the subtree rooted at `root` (inclusive) inside one tree, breadth
/// first, within the budget. The visited set guards against malformed
/// parent/child links ever producing a cycle.
pub fn count_subtree(
    tree: &BTreeMap<NodeAddr, Placement>,
    root: NodeAddr,
    fan_out: u32,
    budget: TraversalBudget,
) -> TraversalOutcome {
    let started = Instant::now();
    let mut visited: BTreeSet<NodeAddr> = BTreeSet::new();
    let mut queue: VecDeque<NodeAddr> = VecDeque::new();
    let mut count: u32 = 0;

    if tree.contains_key(&root) {
        queue.push_back(root);
    }

    while let Some(addr) = queue.pop_front() {
        if !visited.insert(addr) {
            continue;
        }
        count += 1;

        let (level, pos) = addr;
        let child_base = pos.saturating_mul(fan_out);
        for i in 0..fan_out {
            let child = (level + 1, child_base + i);
            if tree.contains_key(&child) {
                queue.push_back(child);
            }
        }

        // Only downgrade when work actually remains: a walk that visits the
        // whole subtree on its last budgeted node is complete.
        if (count >= budget.max_nodes || started.elapsed() >= budget.deadline)
            && !queue.is_empty()
        {
            return TraversalOutcome::Partial { nodes: count };
        }
    }

    TraversalOutcome::Complete { nodes: count }
}
