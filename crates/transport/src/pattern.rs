use crate::{GRID_SLOTS, Slot, SlotCount};

/// A block that does not fit on the grid.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("block at slot {start} with length {length} does not fit the {GRID_SLOTS}-slot grid")]
pub struct PlacementError {
    pub start: Slot,
    pub length: SlotCount,
}

/// A contiguous run of grid slots during which a layer's audio plays.
///
/// Blocks are stored in slot units rather than time so tempo changes never
/// have to touch them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PatternBlock {
    start: Slot,
    length: SlotCount,
}

impl PatternBlock {
    /// Construct a block occupying `[start, start + length)`.
    ///
    /// Fails unless `length >= 1` and the whole range lies inside the grid.
    pub fn new(start: Slot, length: SlotCount) -> Result<Self, PlacementError> {
        let fits = start
            .checked_add(length)
            .is_some_and(|end| end <= GRID_SLOTS);
        if length == 0 || !fits {
            return Err(PlacementError { start, length });
        }
        Ok(Self { start, length })
    }

    /// Construct a block at the grid edge rule: a start past the grid yields
    /// nothing, a block that would run past the last slot is clipped to fit.
    pub fn clipped(start: Slot, length: SlotCount) -> Option<Self> {
        if start >= GRID_SLOTS || length == 0 {
            return None;
        }
        let length = length.min(GRID_SLOTS - start);
        Some(Self { start, length })
    }

    #[inline]
    pub fn start(&self) -> Slot {
        self.start
    }

    #[inline]
    pub fn length(&self) -> SlotCount {
        self.length
    }

    /// Exclusive end slot.
    #[inline]
    pub fn end(&self) -> Slot {
        self.start + self.length
    }

    #[inline]
    pub fn contains(&self, slot: Slot) -> bool {
        slot >= self.start && slot < self.end()
    }

    #[inline]
    pub fn overlaps(&self, other: &PatternBlock) -> bool {
        self.start < other.end() && other.start < self.end()
    }
}

/// The blocks of one layer, kept sorted by start and never overlapping.
///
/// Use [`BlockSet::insert`] to add blocks; it enforces the invariant.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BlockSet {
    blocks: Vec<PatternBlock>,
}

impl BlockSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn blocks(&self) -> &[PatternBlock] {
        &self.blocks
    }

    pub fn len(&self) -> usize {
        self.blocks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.blocks.is_empty()
    }

    pub fn clear(&mut self) {
        self.blocks.clear();
    }

    /// The block covering `slot`, if any.
    pub fn block_at(&self, slot: Slot) -> Option<PatternBlock> {
        self.blocks.iter().copied().find(|b| b.contains(slot))
    }

    /// Insert a block; the new block wins on every slot it shares with an
    /// existing one. Covered blocks are dropped, partially covered ones are
    /// trimmed, and a block that surrounds the new one is split in two.
    pub fn insert(&mut self, new_block: PatternBlock) {
        let new_start = new_block.start;
        let new_end = new_block.end();

        let mut result: Vec<PatternBlock> = Vec::with_capacity(self.blocks.len() + 2);

        for existing in self.blocks.drain(..) {
            if !existing.overlaps(&new_block) {
                result.push(existing);
                continue;
            }

            let ex_start = existing.start;
            let ex_end = existing.end();

            if new_start <= ex_start && new_end >= ex_end {
                // fully covered
                continue;
            }

            if new_start > ex_start {
                result.push(PatternBlock {
                    start: ex_start,
                    length: new_start - ex_start,
                });
            }
            if new_end < ex_end {
                result.push(PatternBlock {
                    start: new_end,
                    length: ex_end - new_end,
                });
            }
        }

        result.push(new_block);
        result.sort_by_key(|b| b.start);
        self.blocks = result;
    }

    /// Remove the block covering `slot`.
    pub fn remove_at(&mut self, slot: Slot) -> Option<PatternBlock> {
        let idx = self.blocks.iter().position(|b| b.contains(slot))?;
        Some(self.blocks.remove(idx))
    }

    /// All occupied slots, ascending.
    pub fn occupied_slots(&self) -> impl Iterator<Item = Slot> + '_ {
        self.blocks.iter().flat_map(|b| b.start..b.end())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn block(start: Slot, length: SlotCount) -> PatternBlock {
        PatternBlock::new(start, length).unwrap()
    }

    #[test]
    fn test_new_rejects_out_of_range() {
        assert!(PatternBlock::new(0, 64).is_ok());
        assert!(PatternBlock::new(63, 1).is_ok());
        assert_eq!(
            PatternBlock::new(62, 4),
            Err(PlacementError {
                start: 62,
                length: 4
            })
        );
        assert!(PatternBlock::new(64, 1).is_err());
        assert!(PatternBlock::new(10, 0).is_err());
    }

    #[test]
    fn test_clipped_edge_rule() {
        assert_eq!(PatternBlock::clipped(62, 4), Some(block(62, 2)));
        assert_eq!(PatternBlock::clipped(60, 4), Some(block(60, 4)));
        assert_eq!(PatternBlock::clipped(64, 4), None);
        assert_eq!(PatternBlock::clipped(66, 4), None);
    }

    #[test]
    fn test_insert_non_overlapping_keeps_order() {
        let mut set = BlockSet::new();
        set.insert(block(8, 4));
        set.insert(block(0, 4));

        assert_eq!(set.blocks(), &[block(0, 4), block(8, 4)]);
    }

    #[test]
    fn test_insert_inside_splits_existing() {
        let mut set = BlockSet::new();
        set.insert(block(10, 8));
        set.insert(block(12, 4));

        assert_eq!(set.blocks(), &[block(10, 2), block(12, 4), block(16, 2)]);
        let slots: Vec<Slot> = set.occupied_slots().collect();
        assert_eq!(slots, (10..18).collect::<Vec<_>>());
    }

    #[test]
    fn test_insert_covering_drops_existing() {
        let mut set = BlockSet::new();
        set.insert(block(4, 2));
        set.insert(block(0, 8));

        assert_eq!(set.blocks(), &[block(0, 8)]);
    }

    #[test]
    fn test_insert_trims_start_and_end() {
        let mut set = BlockSet::new();
        set.insert(block(0, 4));
        set.insert(block(6, 4));
        set.insert(block(2, 6));

        assert_eq!(set.blocks(), &[block(0, 2), block(2, 6), block(8, 2)]);
    }

    #[test]
    fn test_adjacent_blocks_do_not_overlap() {
        let mut set = BlockSet::new();
        set.insert(block(0, 4));
        set.insert(block(4, 4));

        assert_eq!(set.len(), 2);
    }

    #[test]
    fn test_remove_at_covering_slot() {
        let mut set = BlockSet::new();
        set.insert(block(4, 4));

        assert_eq!(set.remove_at(3), None);
        assert_eq!(set.remove_at(6), Some(block(4, 4)));
        assert!(set.is_empty());
    }
}
