//! Phase progression — the bucket ("global") program.
//!
//! No fan-out tree here. Each (slot, phase) has one open bucket with a
//! single priority member at its root; arrivals take seats serially,
//! position = occupancy + 1, the priority member holding position 1.
//! Phase-1 buckets hold 4 seats, Phase-2 buckets hold 8, across slots
//! 1..=16.
//!
//! When a bucket fills, the priority member advances: Phase-1 to Phase-2 of
//! the same slot, Phase-2 to Phase-1 of the next slot, and past slot 16 the
//! program is complete for them. Advancing deactivates their current
//! placement and roots a fresh one at level 1, position 1, with no parent.
//! The earliest-seated member then becomes priority of a fresh bucket.
//! Advancement chains run on a work queue, never recursion.

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet, VecDeque};
use tracing::info;

use crate::tree::TreeBook;
use crate::types::{
    MemberId, PhaseNo, SlotNo, BUCKET_MAX_SLOT, PHASE_1_CAPACITY, PHASE_2_CAPACITY,
};

/// Seat capacity of a phase bucket.
pub fn capacity(phase: PhaseNo) -> u8 {
    match phase {
        1 => PHASE_1_CAPACITY,
        _ => PHASE_2_CAPACITY,
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
struct BucketState {
    priority: Option<MemberId>,
    seat_count: u8,
    /// Seated members in arrival order; the front becomes the next priority.
    queue: VecDeque<MemberId>,
}

/// One advancement step of a priority member.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PhaseAdvance {
    pub member: MemberId,
    pub from_slot: SlotNo,
    pub from_phase: PhaseNo,
    /// `None` when the program completed at slot 16.
    pub to: Option<(SlotNo, PhaseNo)>,
}

/// Result of admitting one member.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AdmitOutcome {
    /// The priority member whose bucket received the arrival; the arrival
    /// itself when they rooted a fresh bucket.
    pub host: MemberId,
    pub slot_no: SlotNo,
    pub phase: PhaseNo,
    pub position: u32,
    /// Advancements triggered by this admission, in order.
    pub advances: Vec<PhaseAdvance>,
}

/// All bucket-program state.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PhaseBook {
    #[serde(with = "crate::types::map_as_pairs")]
    buckets: BTreeMap<(SlotNo, PhaseNo), BucketState>,
    completed: BTreeSet<MemberId>,
}

impl PhaseBook {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_complete(&self, member: MemberId) -> bool {
        self.completed.contains(&member)
    }

    /// Current priority member of a (slot, phase) bucket.
    pub fn priority_of(&self, slot_no: SlotNo, phase: PhaseNo) -> Option<MemberId> {
        self.buckets.get(&(slot_no, phase)).and_then(|b| b.priority)
    }

    /// Occupancy of the open bucket: priority plus seats.
    pub fn occupancy(&self, slot_no: SlotNo, phase: PhaseNo) -> u32 {
        self.buckets
            .get(&(slot_no, phase))
            .map(|b| b.priority.iter().count() as u32 + b.seat_count as u32)
            .unwrap_or(0)
    }

    /// Admit a member to (slot, phase), processing any advancement chain.
    pub fn admit(
        &mut self,
        trees: &mut TreeBook,
        member: MemberId,
        slot_no: SlotNo,
        phase: PhaseNo,
    ) -> AdmitOutcome {
        let mut advances = Vec::new();
        let first = self.admit_one(trees, member, slot_no, phase);

        // Advancement chain: an advancing priority member is an arrival in
        // the next bucket, which can fill it and advance its priority too.
        let mut pending: VecDeque<(MemberId, SlotNo, PhaseNo)> = VecDeque::new();
        self.collect_advances(trees, slot_no, phase, &mut advances, &mut pending);
        while let Some((advancing, to_slot, to_phase)) = pending.pop_front() {
            self.admit_one(trees, advancing, to_slot, to_phase);
            self.collect_advances(trees, to_slot, to_phase, &mut advances, &mut pending);
        }

        AdmitOutcome {
            host: first.0,
            slot_no,
            phase,
            position: first.1,
            advances,
        }
    }

    /// Seat (or root) one arrival. Returns (host, position).
    ///
    /// A member can reach a bucket twice: a reserve-funded activation may
    /// root it before the advancement chain delivers them to the same
    /// (slot, phase). Re-admission is a no-op on the existing seat; it never
    /// seats a member under themselves or double-counts occupancy.
    fn admit_one(
        &mut self,
        trees: &mut TreeBook,
        member: MemberId,
        slot_no: SlotNo,
        phase: PhaseNo,
    ) -> (MemberId, u32) {
        let bucket = self.buckets.entry((slot_no, phase)).or_default();
        if bucket.priority == Some(member) {
            return (member, 1);
        }
        if let Some(idx) = bucket.queue.iter().position(|m| *m == member) {
            let host = bucket.priority.unwrap_or(member);
            return (host, idx as u32 + 2);
        }
        match bucket.priority {
            None => {
                bucket.priority = Some(member);
                trees.deactivate_in_place(member, crate::types::Program::Bucket, slot_no);
                trees.place_bucket(member, member, slot_no, phase, 1, None);
                (member, 1)
            }
            Some(priority) => {
                bucket.seat_count += 1;
                bucket.queue.push_back(member);
                let position = 1 + bucket.seat_count as u32;
                trees.deactivate_in_place(member, crate::types::Program::Bucket, slot_no);
                trees.place_bucket(priority, member, slot_no, phase, position, Some(priority));
                (priority, position)
            }
        }
    }

    /// If the (slot, phase) bucket is full, advance its priority member and
    /// promote the next one. Queues the advancing member's re-admission.
    fn collect_advances(
        &mut self,
        trees: &mut TreeBook,
        slot_no: SlotNo,
        phase: PhaseNo,
        advances: &mut Vec<PhaseAdvance>,
        pending: &mut VecDeque<(MemberId, SlotNo, PhaseNo)>,
    ) {
        let bucket = self.buckets.entry((slot_no, phase)).or_default();
        if bucket.seat_count < capacity(phase) {
            return;
        }
        let Some(advancing) = bucket.priority.take() else {
            return;
        };

        // Promote the earliest seat to priority of a fresh bucket.
        let next_priority = bucket.queue.pop_front();
        bucket.seat_count = 0;
        if let Some(promoted) = next_priority {
            trees.deactivate_in_place(promoted, crate::types::Program::Bucket, slot_no);
            trees.place_bucket(promoted, promoted, slot_no, phase, 1, None);
            bucket.priority = Some(promoted);
        }

        let to = if phase == 1 {
            Some((slot_no, 2))
        } else if slot_no < BUCKET_MAX_SLOT {
            Some((slot_no + 1, 1))
        } else {
            None
        };

        advances.push(PhaseAdvance {
            member: advancing,
            from_slot: slot_no,
            from_phase: phase,
            to,
        });

        match to {
            Some((to_slot, to_phase)) => {
                info!(member = advancing, from_slot = slot_no, from_phase = phase, to_slot, to_phase, "bucket phase advance");
                pending.push_back((advancing, to_slot, to_phase));
            }
            None => {
                info!(member = advancing, "bucket program complete");
                self.completed.insert(advancing);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Program;

    #[test]
    fn test_first_member_roots_bucket() {
        let mut book = PhaseBook::new();
        let mut trees = TreeBook::new();
        let outcome = book.admit(&mut trees, 10, 1, 1);

        assert_eq!(outcome.host, 10);
        assert_eq!(outcome.position, 1);
        assert!(outcome.advances.is_empty());

        let placement = trees.placement_of(10, Program::Bucket, 1).unwrap();
        assert_eq!(placement.parent_id, None);
        assert_eq!((placement.level, placement.position), (1, 1));
        assert_eq!(placement.phase, Some(1));
    }

    #[test]
    fn test_seats_fill_serially_under_priority() {
        let mut book = PhaseBook::new();
        let mut trees = TreeBook::new();
        book.admit(&mut trees, 10, 1, 1);
        let m1 = book.admit(&mut trees, 11, 1, 1);
        let m2 = book.admit(&mut trees, 12, 1, 1);

        assert_eq!(m1.host, 10);
        assert_eq!(m1.position, 2);
        assert_eq!(m2.position, 3);
        assert_eq!(book.occupancy(1, 1), 3);

        let seat = trees.placement_of(12, Program::Bucket, 1).unwrap();
        assert_eq!(seat.parent_id, Some(10));
    }

    #[test]
    fn test_phase_one_fills_and_priority_advances() {
        let mut book = PhaseBook::new();
        let mut trees = TreeBook::new();
        book.admit(&mut trees, 10, 1, 1);
        for m in [11, 12, 13] {
            let outcome = book.admit(&mut trees, m, 1, 1);
            assert!(outcome.advances.is_empty());
        }
        // Fourth seat fills Phase-1 (capacity 4): priority 10 advances
        let outcome = book.admit(&mut trees, 14, 1, 1);
        assert_eq!(
            outcome.advances,
            vec![PhaseAdvance {
                member: 10,
                from_slot: 1,
                from_phase: 1,
                to: Some((1, 2)),
            }]
        );

        // 10 now roots Phase-2 of slot 1: level 1, position 1, no parent
        assert_eq!(book.priority_of(1, 2), Some(10));
        let placement = trees.placement_of(10, Program::Bucket, 1).unwrap();
        assert_eq!(placement.phase, Some(2));
        assert_eq!(placement.parent_id, None);
        assert_eq!((placement.level, placement.position), (1, 1));

        // Earliest seat (11) promoted to priority of a fresh Phase-1 bucket
        assert_eq!(book.priority_of(1, 1), Some(11));
        assert_eq!(book.occupancy(1, 1), 1);
    }

    #[test]
    fn test_phase_two_advances_to_next_slot() {
        let mut book = PhaseBook::new();
        let mut trees = TreeBook::new();
        book.admit(&mut trees, 10, 1, 2);
        let mut last = None;
        for m in 11..=18 {
            last = Some(book.admit(&mut trees, m, 1, 2));
        }
        let advances = last.unwrap().advances;
        assert_eq!(advances.len(), 1);
        assert_eq!(advances[0].to, Some((2, 1)));
        assert_eq!(book.priority_of(2, 1), Some(10));
    }

    #[test]
    fn test_program_completes_at_slot_sixteen() {
        let mut book = PhaseBook::new();
        let mut trees = TreeBook::new();
        book.admit(&mut trees, 10, 16, 2);
        for m in 11..=18 {
            book.admit(&mut trees, m, 16, 2);
        }
        assert!(book.is_complete(10));
        assert_eq!(book.priority_of(16, 2), Some(11));
    }

    #[test]
    fn test_member_already_rooting_next_bucket_is_not_reseated() {
        let mut book = PhaseBook::new();
        let mut trees = TreeBook::new();
        book.admit(&mut trees, 2, 1, 2);
        // A reserve-funded activation already rooted slot 2 for member 2
        book.admit(&mut trees, 2, 2, 1);
        for m in 11..=18 {
            book.admit(&mut trees, m, 1, 2);
        }

        // Advancement out of (1, 2) lands on member 2's existing bucket:
        // they stay its priority, alone, rather than taking a seat under
        // themselves
        assert_eq!(book.priority_of(2, 1), Some(2));
        assert_eq!(book.occupancy(2, 1), 1);
        let placement = trees.placement_of(2, Program::Bucket, 2).unwrap();
        assert_eq!(placement.parent_id, None);
        assert_eq!((placement.level, placement.position), (1, 1));
    }

    #[test]
    fn test_member_already_seated_in_next_bucket_keeps_their_seat() {
        let mut book = PhaseBook::new();
        let mut trees = TreeBook::new();
        book.admit(&mut trees, 2, 1, 2);
        book.admit(&mut trees, 9, 2, 1);
        book.admit(&mut trees, 2, 2, 1);
        assert_eq!(book.occupancy(2, 1), 2);

        for m in 11..=18 {
            book.admit(&mut trees, m, 1, 2);
        }

        assert_eq!(book.occupancy(2, 1), 2);
        let placement = trees.placement_of(2, Program::Bucket, 2).unwrap();
        assert_eq!(placement.parent_id, Some(9));
    }

    #[test]
    fn test_advancement_can_cascade() {
        let mut book = PhaseBook::new();
        let mut trees = TreeBook::new();
        // Phase-2 of slot 1 one seat short of capacity
        book.admit(&mut trees, 50, 1, 2);
        for m in 51..=57 {
            book.admit(&mut trees, m, 1, 2);
        }
        assert_eq!(book.occupancy(1, 2), 8);

        // Fill Phase-1: its priority advances into Phase-2, which fills and
        // advances 50 into slot 2
        book.admit(&mut trees, 10, 1, 1);
        for m in [11, 12, 13] {
            book.admit(&mut trees, m, 1, 1);
        }
        let outcome = book.admit(&mut trees, 14, 1, 1);

        assert_eq!(outcome.advances.len(), 2);
        assert_eq!(outcome.advances[0].member, 10);
        assert_eq!(outcome.advances[0].to, Some((1, 2)));
        assert_eq!(outcome.advances[1].member, 50);
        assert_eq!(outcome.advances[1].to, Some((2, 1)));
        assert_eq!(book.priority_of(2, 1), Some(50));
    }
}
