//! Middle-position detection for matrix trees.
//!
//! In the level's 0-indexed left-to-right numbering, a position at level
//! L >= 2 is a middle position iff `position % 3 == 1`: the second child of
//! its parent, generalized to every depth. Payments from middle occupants
//! bypass the percentage split entirely and fund the tree owner's reserve
//! for the next slot.

use crate::tree::TreeBook;
use crate::types::{MemberId, Program, SlotNo};

/// Whether (level, position) is a middle position.
pub fn is_middle(level: u8, position: u32) -> bool {
    level >= 2 && position % 3 == 1
}

/// Occupants of middle positions in one owner's matrix tree, in
/// (level, position) order.
pub fn identify_middle(
    book: &TreeBook,
    owner: MemberId,
    slot_no: SlotNo,
) -> Vec<(MemberId, u8, u32)> {
    book.nodes(owner, Program::Matrix, slot_no)
        .into_iter()
        .filter(|p| is_middle(p.level, p.position))
        .map(|p| (p.member_id, p.level, p.position))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_level_one_never_middle() {
        assert!(!is_middle(1, 0));
        assert!(!is_middle(1, 1));
        assert!(!is_middle(1, 2));
    }

    #[test]
    fn test_level_two_middles() {
        // Level 2 holds positions 0..9; middles are the second child of each
        // level-1 parent: 1, 4, 7
        let middles: Vec<u32> = (0..9).filter(|p| is_middle(2, *p)).collect();
        assert_eq!(middles, vec![1, 4, 7]);
    }

    #[test]
    fn test_level_three_middles() {
        let middles: Vec<u32> = (0..27).filter(|p| is_middle(3, *p)).collect();
        assert_eq!(middles.len(), 9);
        assert!(middles.contains(&1));
        assert!(middles.contains(&25));
    }

    #[test]
    fn test_identify_middle_in_populated_tree() {
        let mut book = TreeBook::new();
        // 3 level-1 + 4 level-2 members: positions 0..=3 at level 2
        for i in 0..7u64 {
            book.place(1, 100 + i, Program::Matrix, 1, Some(1)).unwrap();
        }
        let middles = identify_middle(&book, 1, 1);
        // Only level-2 position 1 is occupied and middle
        assert_eq!(middles, vec![(104, 2, 1)]);
    }
}
