//! Data shared between the editing side and the real-time engine: the grid,
//! the layer/track model, and the commands that cross the thread boundary.

mod audio;
mod layer;
mod pattern;

pub use audio::AudioArc;
pub use layer::{AudioSource, Layer, Track};
pub use pattern::{BlockSet, PatternBlock, PlacementError};

/// Number of slots on the beat grid. One slot is one beat.
pub const GRID_SLOTS: u32 = 64;

/// 1 bar = 4 beats = 4 slots.
pub const SLOTS_PER_BAR: u32 = 4;

/// A position on the grid, `0..GRID_SLOTS`.
pub type Slot = u32;

/// A length in slots.
pub type SlotCount = u32;

/// An absolute position on the engine timeline, in frames at the engine
/// sample rate.
pub type SampleTime = u64;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TrackId(pub u64);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct LayerId(pub u64);

/// Opaque handle to audio loaded into the engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct BufferId(pub u32);

impl std::fmt::Display for BufferId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "buffer#{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Action {
    /// Ordered before `Trigger` so a block ending where the next begins is
    /// stopped before the restart.
    Stop,
    Trigger,
}

/// Rescale `time` by `from / to`, rounding up. A tempo change from `from` to
/// `to` bpm keeps every position on the same beat this way.
///
/// ```
/// use loopdeck_transport::stretch_sample_time;
///
/// assert_eq!(stretch_sample_time(10_500, 60, 120), 5_250);
/// assert_eq!(stretch_sample_time(7, 3, 2), 11);
/// ```
pub fn stretch_sample_time(time: SampleTime, from: u32, to: u32) -> SampleTime {
    if to == 0 {
        return time;
    }
    let scaled = (time as u128 * from as u128).div_ceil(to as u128);
    scaled.min(SampleTime::MAX as u128) as SampleTime
}

/// A single timed instruction produced by the scheduler.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ScheduledCommand {
    pub sample_time: SampleTime,
    pub layer: LayerId,
    pub buffer: BufferId,
    pub action: Action,
    /// Scheduler generation this command was computed for. The renderer
    /// skips commands older than its current generation.
    pub generation: u64,
}

/// Messages from the edit thread to the real-time renderer. They are drained
/// at buffer boundaries in the order they were pushed.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Command {
    Play,
    Pause,
    /// Stop playback, rewind to zero, silence all voices and drop every
    /// pending command.
    Halt { generation: u64 },
    SetGeneration(u64),
    Schedule(ScheduledCommand),
    SetGain { buffer: BufferId, gain: f32 },
    SetMuted { buffer: BufferId, muted: bool },
    /// Start copying input into the capture ring from `at` onwards.
    BeginCapture { at: SampleTime },
    EndCapture,
    /// Move the playhead and capture start with [`stretch_sample_time`].
    /// Voices keep playing; the edit side follows up with fresh commands.
    Stretch { from: u32, to: u32 },
}
