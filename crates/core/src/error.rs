use std::path::{Path, PathBuf};

use loopdeck_engine::EngineError;
use loopdeck_transport::{LayerId, PlacementError, Slot, SlotCount, TrackId};
use thiserror::Error;

use crate::recording::RecordingPhase;
use crate::session::{TransportRequest, TransportState};

#[derive(Error, Debug)]
pub enum WorkstationError {
    #[error(transparent)]
    InvalidPlacement(#[from] PlacementError),

    #[error("auto-repeat from slot {start} every {interval} slots is out of range")]
    InvalidRepeat { start: Slot, interval: SlotCount },

    #[error("invalid tempo: {0} bpm")]
    InvalidTempo(u32),

    #[error("invalid sample rate: {0} Hz")]
    InvalidSampleRate(u32),

    #[error("cannot {request} while {from}")]
    InvalidTransportTransition {
        from: TransportState,
        request: TransportRequest,
    },

    #[error("cannot {request} recording while {from}")]
    InvalidRecordingTransition {
        from: RecordingPhase,
        request: &'static str,
    },

    #[error("unknown track {0:?}")]
    UnknownTrack(TrackId),

    #[error("unknown layer {0:?}")]
    UnknownLayer(LayerId),

    #[error("'{}' is not a supported audio file: {reason}", path.display())]
    UnsupportedFormat { path: PathBuf, reason: String },

    #[error("failed to access '{}': {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error(transparent)]
    Engine(EngineError),

    #[error("mix upload failed: {0}")]
    Upload(#[source] anyhow::Error),
}

impl WorkstationError {
    /// Whether the session can carry on. Only fatal engine faults say no.
    pub fn is_recoverable(&self) -> bool {
        match self {
            WorkstationError::Engine(err) => err.is_recoverable(),
            _ => true,
        }
    }

    pub(crate) fn io(path: &Path, source: std::io::Error) -> Self {
        WorkstationError::Io {
            path: path.to_path_buf(),
            source,
        }
    }
}

impl From<EngineError> for WorkstationError {
    fn from(err: EngineError) -> Self {
        match err {
            EngineError::Io { path, source } => WorkstationError::Io { path, source },
            EngineError::UnsupportedFormat { path, reason } => {
                WorkstationError::UnsupportedFormat { path, reason }
            }
            other => WorkstationError::Engine(other),
        }
    }
}

impl From<(&Path, hound::Error)> for WorkstationError {
    fn from((path, err): (&Path, hound::Error)) -> Self {
        match err {
            hound::Error::IoError(source) => WorkstationError::io(path, source),
            other => WorkstationError::io(path, std::io::Error::other(other)),
        }
    }
}

pub type WorkstationResult<T> = Result<T, WorkstationError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_engine_load_errors_are_lifted() {
        let err: WorkstationError = EngineError::Io {
            path: PathBuf::from("missing.wav"),
            source: std::io::Error::new(std::io::ErrorKind::NotFound, "gone"),
        }
        .into();
        assert!(matches!(err, WorkstationError::Io { ref path, .. } if path == Path::new("missing.wav")));

        let err: WorkstationError = EngineError::CommandQueueFull.into();
        assert!(matches!(err, WorkstationError::Engine(EngineError::CommandQueueFull)));
        assert!(err.is_recoverable());
    }

    #[test]
    fn test_fatal_engine_error_is_not_recoverable() {
        let err: WorkstationError = EngineError::UnsupportedHardware("no f32".into()).into();
        assert!(!err.is_recoverable());
    }

    #[test]
    fn test_transition_message() {
        let err = WorkstationError::InvalidTransportTransition {
            from: TransportState::Paused,
            request: TransportRequest::Stop,
        };
        assert_eq!(err.to_string(), "cannot stop while paused");
    }
}
