pub mod config;
pub mod editor;
pub mod error;
pub mod recording;
pub mod scheduler;
pub mod session;
pub mod time;

pub use config::WorkstationConfig;
pub use editor::{GridEditor, TapOutcome};
pub use error::{WorkstationError, WorkstationResult};
pub use recording::{RecordingController, RecordingPhase, Take};
pub use scheduler::{Scheduler, Window};
pub use session::{Session, TransportRequest, TransportState};
pub use time::{GridPosition, TempoClock};

pub use loopdeck_engine::{
    AudioEngine, CpalDevice, EngineBridge, EngineConfig, EngineError, EngineHandle,
    OfflineDevice,
};
pub use loopdeck_transport::{
    GRID_SLOTS, Layer, LayerId, PatternBlock, SLOTS_PER_BAR, SampleTime, Slot, SlotCount, Track,
    TrackId,
};

/// Destination for finished mixdowns, such as a remote library.
pub trait MixUploader {
    fn upload(&self, title: &str, wav: &[u8]) -> anyhow::Result<()>;
}
