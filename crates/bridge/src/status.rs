use loopdeck_core::{EngineError, WorkstationError};
use thiserror::Error;

/// Outcome of a bridge call as seen by the host.
#[repr(i32)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StatusCode {
    Ok = 0,
    NotStarted = 1,
    InvalidArgument = 2,
    InvalidPlacement = 3,
    InvalidRepeat = 4,
    InvalidTempo = 5,
    InvalidTransportTransition = 6,
    InvalidRecordingTransition = 7,
    UnknownTrack = 8,
    UnknownLayer = 9,
    UnsupportedFormat = 10,
    Io = 11,
    DeviceUnavailable = 12,
    DeviceLost = 13,
    UnsupportedHardware = 14,
    CommandQueueFull = 15,
    EngineNotRunning = 16,
    Upload = 17,
    Internal = 18,
    InvalidSampleRate = 19,
}

impl StatusCode {
    pub fn code(self) -> i32 {
        self as i32
    }
}

#[derive(Error, Debug)]
pub enum BridgeError {
    #[error("audio engine has not been started")]
    NotStarted,

    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    #[error("workstation state lock poisoned")]
    Poisoned,

    #[error("failed to spawn poll thread: {0}")]
    Thread(#[source] std::io::Error),

    #[error(transparent)]
    Workstation(#[from] WorkstationError),
}

pub type BridgeResult<T> = Result<T, BridgeError>;

impl From<&BridgeError> for StatusCode {
    fn from(err: &BridgeError) -> Self {
        match err {
            BridgeError::NotStarted => StatusCode::NotStarted,
            BridgeError::InvalidArgument(_) => StatusCode::InvalidArgument,
            BridgeError::Poisoned | BridgeError::Thread(_) => StatusCode::Internal,
            BridgeError::Workstation(err) => workstation_status(err),
        }
    }
}

fn workstation_status(err: &WorkstationError) -> StatusCode {
    match err {
        WorkstationError::InvalidPlacement(_) => StatusCode::InvalidPlacement,
        WorkstationError::InvalidRepeat { .. } => StatusCode::InvalidRepeat,
        WorkstationError::InvalidTempo(_) => StatusCode::InvalidTempo,
        WorkstationError::InvalidSampleRate(_) => StatusCode::InvalidSampleRate,
        WorkstationError::InvalidTransportTransition { .. } => {
            StatusCode::InvalidTransportTransition
        }
        WorkstationError::InvalidRecordingTransition { .. } => {
            StatusCode::InvalidRecordingTransition
        }
        WorkstationError::UnknownTrack(_) => StatusCode::UnknownTrack,
        WorkstationError::UnknownLayer(_) => StatusCode::UnknownLayer,
        WorkstationError::UnsupportedFormat { .. } => StatusCode::UnsupportedFormat,
        WorkstationError::Io { .. } => StatusCode::Io,
        WorkstationError::Upload(_) => StatusCode::Upload,
        WorkstationError::Engine(err) => engine_status(err),
    }
}

fn engine_status(err: &EngineError) -> StatusCode {
    match err {
        EngineError::DeviceUnavailable(_) => StatusCode::DeviceUnavailable,
        EngineError::DeviceLost(_) => StatusCode::DeviceLost,
        EngineError::UnsupportedHardware(_) => StatusCode::UnsupportedHardware,
        EngineError::UnsupportedFormat { .. } => StatusCode::UnsupportedFormat,
        EngineError::Io { .. } => StatusCode::Io,
        EngineError::CommandQueueFull => StatusCode::CommandQueueFull,
        EngineError::NotRunning => StatusCode::EngineNotRunning,
        EngineError::UnknownBuffer(_) | EngineError::Mixdown(_) => StatusCode::Internal,
    }
}

/// Copy `message` into `out` as a NUL-terminated string, cut at a char
/// boundary if it does not fit. Returns the bytes written, excluding NUL.
pub(crate) fn copy_message(message: &str, out: &mut [u8]) -> usize {
    let Some(room) = out.len().checked_sub(1) else {
        return 0;
    };
    let mut end = message.len().min(room);
    while !message.is_char_boundary(end) {
        end -= 1;
    }
    out[..end].copy_from_slice(&message.as_bytes()[..end]);
    out[end] = 0;
    end
}

#[cfg(test)]
mod tests {
    use super::*;
    use loopdeck_core::{TrackId, TransportRequest, TransportState};

    #[test]
    fn test_status_codes_are_stable() {
        assert_eq!(StatusCode::Ok.code(), 0);
        assert_eq!(StatusCode::NotStarted.code(), 1);
        assert_eq!(StatusCode::Internal.code(), 18);
        assert_eq!(StatusCode::InvalidSampleRate.code(), 19);
    }

    #[test]
    fn test_workstation_errors_map_to_codes() {
        let err = BridgeError::from(WorkstationError::UnknownTrack(TrackId(3)));
        assert_eq!(StatusCode::from(&err), StatusCode::UnknownTrack);

        let err = BridgeError::from(WorkstationError::InvalidTransportTransition {
            from: TransportState::Paused,
            request: TransportRequest::Stop,
        });
        assert_eq!(StatusCode::from(&err), StatusCode::InvalidTransportTransition);

        let err = BridgeError::from(WorkstationError::from(EngineError::DeviceLost(
            "unplugged".into(),
        )));
        assert_eq!(StatusCode::from(&err), StatusCode::DeviceLost);
    }

    #[test]
    fn test_copy_message_fits() {
        let mut out = [0xffu8; 16];
        assert_eq!(copy_message("busy", &mut out), 4);
        assert_eq!(&out[..5], b"busy\0");
    }

    #[test]
    fn test_copy_message_truncates_on_char_boundary() {
        let mut out = [0xffu8; 4];
        // 'é' is two bytes and does not fit after "ab"
        assert_eq!(copy_message("abé", &mut out), 2);
        assert_eq!(&out[..3], b"ab\0");

        assert_eq!(copy_message("anything", &mut []), 0);
    }
}
