//! Engine error types

use std::path::PathBuf;

use loopdeck_decode::DecodeError;
use loopdeck_transport::BufferId;
use thiserror::Error;

/// Errors surfaced by the engine front end. Nothing here is ever raised on the
/// audio thread; real-time faults are reported through [`crate::EngineStatus`].
#[derive(Error, Debug)]
pub enum EngineError {
    /// Device busy or missing; retry later
    #[error("audio device unavailable: {0}")]
    DeviceUnavailable(String),

    /// Device went away mid-session (unplugged, focus revoked)
    #[error("audio device lost: {0}")]
    DeviceLost(String),

    /// The hardware cannot run the engine at all
    #[error("unsupported audio hardware: {0}")]
    UnsupportedHardware(String),

    #[error("'{}' is not a supported audio file: {reason}", path.display())]
    UnsupportedFormat { path: PathBuf, reason: String },

    #[error("failed to read '{}': {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("unknown {0}")]
    UnknownBuffer(BufferId),

    #[error("engine command queue is full")]
    CommandQueueFull,

    #[error("audio engine is not running")]
    NotRunning,

    #[error("mixdown failed: {0}")]
    Mixdown(#[source] anyhow::Error),
}

impl EngineError {
    /// Fatal errors disable the engine for the rest of the session; everything
    /// else can be retried.
    pub fn is_fatal(&self) -> bool {
        matches!(self, EngineError::UnsupportedHardware(_))
    }

    pub fn is_recoverable(&self) -> bool {
        !self.is_fatal()
    }
}

impl From<DecodeError> for EngineError {
    fn from(err: DecodeError) -> Self {
        match err {
            DecodeError::Io { path, source } => EngineError::Io { path, source },
            DecodeError::UnsupportedFormat { path, reason } => {
                EngineError::UnsupportedFormat { path, reason }
            }
            DecodeError::Decode { path, source } => EngineError::UnsupportedFormat {
                path,
                reason: source.to_string(),
            },
        }
    }
}

/// Result type for engine operations
pub type EngineResult<T> = Result<T, EngineError>;
