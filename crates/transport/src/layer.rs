use std::path::PathBuf;

use crate::pattern::{BlockSet, PatternBlock};
use crate::{BufferId, LayerId, SLOTS_PER_BAR, Slot, SlotCount, TrackId};

/// Where a layer's audio comes from. The engine owns the decoded samples; the
/// model only keeps the file path and the engine's buffer handle.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AudioSource {
    pub path: PathBuf,
    pub buffer: BufferId,
}

/// One audio source plus its placements on the grid.
#[derive(Debug, Clone)]
pub struct Layer {
    pub id: LayerId,
    pub name: String,
    pub category: String,
    pub source: AudioSource,
    blocks: BlockSet,
    /// Natural block length in slots, derived once from the audio duration.
    block_length: SlotCount,
    pub gain: f32,
    pub muted: bool,
    pub solo: bool,
}

impl Layer {
    pub fn new(
        id: LayerId,
        name: impl Into<String>,
        category: impl Into<String>,
        source: AudioSource,
        block_length: SlotCount,
    ) -> Self {
        Self {
            id,
            name: name.into(),
            category: category.into(),
            source,
            blocks: BlockSet::new(),
            block_length: block_length.max(1),
            gain: 1.0,
            muted: false,
            solo: false,
        }
    }

    pub fn blocks(&self) -> &[PatternBlock] {
        self.blocks.blocks()
    }

    pub fn block_length(&self) -> SlotCount {
        self.block_length
    }

    /// Natural length in whole bars.
    pub fn bars(&self) -> u32 {
        self.block_length / SLOTS_PER_BAR
    }

    /// Add a block; it replaces whatever this layer had on the same slots.
    pub fn add_block(&mut self, block: PatternBlock) {
        self.blocks.insert(block);
    }

    /// Remove the block covering `slot`.
    pub fn remove_block(&mut self, slot: Slot) -> Option<PatternBlock> {
        self.blocks.remove_at(slot)
    }

    pub fn clear(&mut self) {
        self.blocks.clear();
    }

    pub fn block_at(&self, slot: Slot) -> Option<PatternBlock> {
        self.blocks.block_at(slot)
    }

    pub fn occupied_slots(&self) -> impl Iterator<Item = Slot> + '_ {
        self.blocks.occupied_slots()
    }

    pub fn buffer(&self) -> BufferId {
        self.source.buffer
    }
}

/// An ordered group of layers with its own gain and mute. Purely
/// organizational: the engine mixes per layer.
#[derive(Debug, Clone)]
pub struct Track {
    pub id: TrackId,
    pub name: String,
    layers: Vec<Layer>,
    pub gain: f32,
    pub muted: bool,
}

impl Track {
    pub fn new(id: TrackId, name: impl Into<String>) -> Self {
        Self {
            id,
            name: name.into(),
            layers: Vec::new(),
            gain: 1.0,
            muted: false,
        }
    }

    pub fn layers(&self) -> &[Layer] {
        &self.layers
    }

    pub fn layers_mut(&mut self) -> &mut [Layer] {
        &mut self.layers
    }

    pub fn layer(&self, id: LayerId) -> Option<&Layer> {
        self.layers.iter().find(|l| l.id == id)
    }

    pub fn layer_mut(&mut self, id: LayerId) -> Option<&mut Layer> {
        self.layers.iter_mut().find(|l| l.id == id)
    }

    pub fn push_layer(&mut self, layer: Layer) {
        self.layers.push(layer);
    }

    pub fn remove_layer(&mut self, id: LayerId) -> Option<Layer> {
        let idx = self.layers.iter().position(|l| l.id == id)?;
        Some(self.layers.remove(idx))
    }
}
