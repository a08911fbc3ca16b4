//! Grid gestures: single taps and auto-repeat fills.

use loopdeck_transport::{GRID_SLOTS, Layer, PatternBlock, PlacementError, Slot, SlotCount};

use crate::error::{WorkstationError, WorkstationResult};

/// What a tap did to the layer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TapOutcome {
    Placed(PatternBlock),
    Cleared(PatternBlock),
}

/// Turns grid gestures into block edits on a single layer.
///
/// Within a layer the last write wins: a new block trims, splits or replaces
/// whatever it overlaps. Layers never affect each other.
pub struct GridEditor;

impl GridEditor {
    /// Clear the block under `slot`, or place one of the layer's natural
    /// length there, clipped at the grid edge.
    pub fn tap(layer: &mut Layer, slot: Slot) -> WorkstationResult<TapOutcome> {
        if let Some(block) = layer.remove_block(slot) {
            return Ok(TapOutcome::Cleared(block));
        }

        let length = layer.block_length();
        let block = PatternBlock::clipped(slot, length)
            .ok_or(PlacementError { start: slot, length })?;
        layer.add_block(block);
        Ok(TapOutcome::Placed(block))
    }

    /// Place a block of the layer's natural length at `start`,
    /// `start + interval`, ... until the grid ends. The last block is clipped
    /// if it runs past the end.
    pub fn auto_repeat(
        layer: &mut Layer,
        start: Slot,
        interval: SlotCount,
    ) -> WorkstationResult<Vec<PatternBlock>> {
        if start >= GRID_SLOTS || interval == 0 {
            return Err(WorkstationError::InvalidRepeat { start, interval });
        }

        let length = layer.block_length();
        let placed: Vec<PatternBlock> = (start..GRID_SLOTS)
            .step_by(interval as usize)
            .filter_map(|slot| PatternBlock::clipped(slot, length))
            .collect();

        for block in &placed {
            layer.add_block(*block);
        }
        Ok(placed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use loopdeck_transport::{AudioSource, BufferId, LayerId};
    use std::path::PathBuf;

    fn layer(block_length: SlotCount) -> Layer {
        Layer::new(
            LayerId(1),
            "kick",
            "drums",
            AudioSource {
                path: PathBuf::from("kick.wav"),
                buffer: BufferId(1),
            },
            block_length,
        )
    }

    fn spans(layer: &Layer) -> Vec<(Slot, SlotCount)> {
        layer.blocks().iter().map(|b| (b.start(), b.length())).collect()
    }

    #[test]
    fn test_tap_places_then_clears() {
        let mut layer = layer(4);

        let placed = GridEditor::tap(&mut layer, 8).unwrap();
        assert_eq!(placed, TapOutcome::Placed(PatternBlock::new(8, 4).unwrap()));

        // any slot inside the block clears it
        let cleared = GridEditor::tap(&mut layer, 10).unwrap();
        assert_eq!(cleared, TapOutcome::Cleared(PatternBlock::new(8, 4).unwrap()));
        assert!(layer.blocks().is_empty());
    }

    #[test]
    fn test_tap_clips_at_grid_edge() {
        let mut layer = layer(8);
        GridEditor::tap(&mut layer, 60).unwrap();
        assert_eq!(spans(&layer), vec![(60, 4)]);
    }

    #[test]
    fn test_tap_outside_grid_is_rejected() {
        let mut layer = layer(4);
        let err = GridEditor::tap(&mut layer, 64).unwrap_err();
        assert!(matches!(err, WorkstationError::InvalidPlacement(_)));
        assert!(layer.blocks().is_empty());
    }

    #[test]
    fn test_auto_repeat_every_bar() {
        let mut layer = layer(4);
        let placed = GridEditor::auto_repeat(&mut layer, 0, 4).unwrap();

        assert_eq!(placed.len(), 16);
        let starts: Vec<Slot> = layer.blocks().iter().map(|b| b.start()).collect();
        assert_eq!(starts, (0..64).step_by(4).collect::<Vec<_>>());
    }

    #[test]
    fn test_auto_repeat_clips_last_block() {
        let mut layer = layer(4);
        let placed = GridEditor::auto_repeat(&mut layer, 62, 4).unwrap();

        assert_eq!(placed, vec![PatternBlock::new(62, 2).unwrap()]);
        assert_eq!(spans(&layer), vec![(62, 2)]);
    }

    #[test]
    fn test_auto_repeat_validates_before_mutating() {
        let mut layer = layer(4);
        GridEditor::tap(&mut layer, 0).unwrap();

        assert!(matches!(
            GridEditor::auto_repeat(&mut layer, 64, 4),
            Err(WorkstationError::InvalidRepeat { .. })
        ));
        assert!(matches!(
            GridEditor::auto_repeat(&mut layer, 0, 0),
            Err(WorkstationError::InvalidRepeat { .. })
        ));
        assert_eq!(spans(&layer), vec![(0, 4)]);
    }

    #[test]
    fn test_dense_repeat_last_write_wins() {
        let mut layer = layer(8);
        GridEditor::auto_repeat(&mut layer, 0, 4).unwrap();

        // each block is cut short by the next one, the last is clipped
        let spans = spans(&layer);
        assert_eq!(spans.len(), 16);
        assert!(spans[..15].iter().all(|&(_, len)| len == 4));
        assert_eq!(spans[15], (60, 4));
    }

    #[test]
    fn test_overlap_splits_existing_block() {
        let mut layer = layer(8);
        layer.add_block(PatternBlock::new(10, 8).unwrap());
        layer.add_block(PatternBlock::new(12, 4).unwrap());

        assert_eq!(spans(&layer), vec![(10, 2), (12, 4), (16, 2)]);
    }
}
