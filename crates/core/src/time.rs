use loopdeck_transport::{GRID_SLOTS, SLOTS_PER_BAR, SampleTime, Slot, SlotCount};

use crate::error::{WorkstationError, WorkstationResult};

/// Maps between grid slots, wall-clock durations and engine sample time.
///
/// One slot is one beat. Conversions to sample time round up and conversions
/// back round down, so `to_slot(to_sample_time(s)) == s`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TempoClock {
    bpm: u32,
    sample_rate: u32,
}

impl TempoClock {
    pub fn new(bpm: u32, sample_rate: u32) -> WorkstationResult<Self> {
        if bpm == 0 {
            return Err(WorkstationError::InvalidTempo(bpm));
        }
        if sample_rate == 0 {
            return Err(WorkstationError::InvalidSampleRate(sample_rate));
        }
        Ok(Self { bpm, sample_rate })
    }

    pub fn bpm(&self) -> u32 {
        self.bpm
    }

    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    pub fn set_bpm(&mut self, bpm: u32) -> WorkstationResult<()> {
        if bpm == 0 {
            return Err(WorkstationError::InvalidTempo(bpm));
        }
        self.bpm = bpm;
        Ok(())
    }

    pub fn set_sample_rate(&mut self, sample_rate: u32) -> WorkstationResult<()> {
        if sample_rate == 0 {
            return Err(WorkstationError::InvalidSampleRate(sample_rate));
        }
        self.sample_rate = sample_rate;
        Ok(())
    }

    pub fn slot_duration_ms(&self) -> f64 {
        60_000.0 / self.bpm as f64
    }

    pub fn bar_duration_ms(&self) -> f64 {
        self.slot_duration_ms() * SLOTS_PER_BAR as f64
    }

    /// Whole bars closest to `duration_ms`.
    pub fn bars_from_duration(&self, duration_ms: f64) -> u32 {
        (duration_ms.max(0.0) / self.bar_duration_ms()).round() as u32
    }

    /// Block length for audio of `duration_ms`: whole bars, at least one slot,
    /// at most the whole grid.
    pub fn natural_length(&self, duration_ms: f64) -> SlotCount {
        let slots = self
            .bars_from_duration(duration_ms)
            .saturating_mul(SLOTS_PER_BAR);
        slots.clamp(1, GRID_SLOTS)
    }

    /// Start of grid slot `slot` in the first loop iteration.
    pub fn to_sample_time(&self, slot: Slot) -> SampleTime {
        self.absolute_to_sample_time(slot as u64)
    }

    /// Grid slot sounding at `sample_time`, wrapped into the loop.
    pub fn to_slot(&self, sample_time: SampleTime) -> Slot {
        (self.absolute_slot(sample_time) % GRID_SLOTS as u64) as Slot
    }

    /// Start of slot `slot` on the unwrapped timeline (`64k + s` is grid slot
    /// `s` of loop iteration `k`).
    pub fn absolute_to_sample_time(&self, slot: u64) -> SampleTime {
        let numerator = slot as u128 * 60 * self.sample_rate as u128;
        numerator.div_ceil(self.bpm as u128) as SampleTime
    }

    /// Unwrapped slot sounding at `sample_time`.
    pub fn absolute_slot(&self, sample_time: SampleTime) -> u64 {
        let numerator = sample_time as u128 * self.bpm as u128;
        (numerator / (60 * self.sample_rate as u128)) as u64
    }

    /// First slot boundary at or after `sample_time`, as an unwrapped slot.
    pub fn next_boundary(&self, sample_time: SampleTime) -> u64 {
        let slot = self.absolute_slot(sample_time);
        if self.absolute_to_sample_time(slot) == sample_time {
            slot
        } else {
            slot + 1
        }
    }

    /// Frames in one full loop of the grid.
    pub fn loop_frames(&self) -> SampleTime {
        self.absolute_to_sample_time(GRID_SLOTS as u64)
    }

    /// Bar and beat of `sample_time` within the loop, both 1-based.
    pub fn format_position(&self, sample_time: SampleTime) -> GridPosition {
        let slot = self.to_slot(sample_time);
        GridPosition {
            bar: slot / SLOTS_PER_BAR + 1,
            beat: slot % SLOTS_PER_BAR + 1,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GridPosition {
    pub bar: u32,
    pub beat: u32,
}

impl std::fmt::Display for GridPosition {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}.{}", self.bar, self.beat)
    }
}
