//! The audio engine: loads layer audio, executes scheduled commands with
//! sample accuracy, mixes, and captures input for recording.
//!
//! The edit side talks to the engine through [`EngineBridge`]. The only
//! implementation is [`AudioEngine`], generic over the [`AudioDevice`] that
//! drives its real-time [`Renderer`]: [`CpalDevice`] for the sound card,
//! [`OfflineDevice`] for headless use.

mod device;
mod engine;
mod error;
mod offline;
mod renderer;

use std::path::Path;

pub use device::{AudioDevice, CpalDevice, DeviceConfig, DeviceIo};
pub use engine::{AudioEngine, EngineConfig};
pub use error::{EngineError, EngineResult};
pub use offline::{OFFLINE_BLOCK_FRAMES, OfflineDevice};
pub use renderer::{BufferTable, EngineAtomics, Renderer, RendererConfig};

pub use loopdeck_render::{Segment, encode_wav};
use loopdeck_transport::{AudioArc, BufferId, SampleTime, ScheduledCommand};

/// Identifies one running session of the engine. A new handle is issued on
/// each start after a stop.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct EngineHandle(pub u64);

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BufferInfo {
    pub frames: usize,
    pub sample_rate: u32,
    pub channels: u16,
    pub duration_ms: f64,
}

/// Format of the samples returned by [`EngineBridge::drain_capture`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CaptureFormat {
    pub sample_rate: u32,
    pub channels: u16,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EngineFault {
    /// The device went away. The engine has closed it and must be started
    /// again.
    DeviceLost,
}

/// Real-time events since the previous poll.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct EngineStatus {
    pub fault: Option<EngineFault>,
    pub underruns: u64,
    pub dropped_commands: u64,
}

/// One layer's part in an offline mixdown.
#[derive(Debug, Clone)]
pub struct MixLayer {
    pub buffer: BufferId,
    pub gain: f32,
    pub segments: Vec<Segment>,
}

/// Contract between the edit side and the audio engine.
///
/// Every method returns promptly; nothing here waits on the audio thread.
pub trait EngineBridge: Send {
    /// Open the device and start rendering. Idempotent while running.
    fn start(&mut self) -> EngineResult<EngineHandle>;

    /// Close the device. Idempotent; a stale handle is ignored.
    fn stop(&mut self, handle: EngineHandle) -> EngineResult<()>;

    fn is_running(&self) -> bool;

    /// Engine rate. Before the first start this is the configured fallback.
    fn sample_rate(&self) -> u32;

    /// Decode a PCM WAV file into a new buffer at the engine rate.
    fn load_layer(&mut self, path: &Path) -> EngineResult<BufferId>;

    fn unload_layer(&mut self, id: BufferId) -> EngineResult<()>;

    fn buffer_info(&self, id: BufferId) -> EngineResult<BufferInfo>;

    /// Queue commands for the renderer. All or nothing: fails with
    /// [`EngineError::CommandQueueFull`] without queueing any.
    fn submit_commands(&mut self, commands: &[ScheduledCommand]) -> EngineResult<()>;

    fn report_position(&self) -> SampleTime;

    fn set_gain(&mut self, id: BufferId, gain: f32) -> EngineResult<()>;

    fn set_muted(&mut self, id: BufferId, muted: bool) -> EngineResult<()>;

    fn play(&mut self) -> EngineResult<()>;

    fn pause(&mut self) -> EngineResult<()>;

    /// Stop, rewind to zero, silence voices and drop pending commands.
    fn halt(&mut self, generation: u64) -> EngineResult<()>;

    /// Move the playhead and any capture start from `from` to `to` bpm with
    /// [`loopdeck_transport::stretch_sample_time`]. A no-op while stopped.
    fn stretch_timeline(&mut self, from: u32, to: u32) -> EngineResult<()>;

    /// Commands from earlier generations are skipped from now on.
    fn set_generation(&mut self, generation: u64) -> EngineResult<()>;

    fn begin_capture(&mut self, at: SampleTime) -> EngineResult<()>;

    fn end_capture(&mut self) -> EngineResult<()>;

    /// Append captured mono samples to `out`, returning how many were added.
    /// Samples captured before a device loss are still returned once.
    fn drain_capture(&mut self, out: &mut Vec<f32>) -> usize;

    fn capture_format(&self) -> CaptureFormat;

    /// Collect garbage and report real-time events.
    fn poll_status(&mut self) -> EngineStatus;

    /// Mix `layers` offline into `frames` frames and write a WAV to `path`.
    fn render_mix(&self, layers: &[MixLayer], frames: u64, path: &Path)
    -> EngineResult<AudioArc>;
}
