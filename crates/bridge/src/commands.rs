//! The exported C functions.
//!
//! Ids cross the boundary as plain integers. Strings are NUL-terminated
//! UTF-8 owned by the caller and only borrowed for the duration of a call.

use std::ffi::{CStr, CString, c_char};
use std::path::Path;

use loopdeck_core::{LayerId, MixUploader, TapOutcome, TrackId};

use crate::state::{STATE, create_workstation};
use crate::status::{BridgeError, BridgeResult, StatusCode, copy_message};

/// Host callback receiving a rendered mix. Returns 0 when the upload was
/// accepted.
pub type UploadCallback = extern "C" fn(title: *const c_char, wav: *const u8, len: usize) -> i32;

struct CallbackUploader(UploadCallback);

impl MixUploader for CallbackUploader {
    fn upload(&self, title: &str, wav: &[u8]) -> anyhow::Result<()> {
        let title = CString::new(title)?;
        match (self.0)(title.as_ptr(), wav.as_ptr(), wav.len()) {
            0 => Ok(()),
            code => anyhow::bail!("upload callback returned {code}"),
        }
    }
}

fn status(result: BridgeResult<()>) -> i32 {
    match result {
        Ok(()) => StatusCode::Ok.code(),
        Err(err) => STATE.fail(err).code(),
    }
}

fn value(result: BridgeResult<i64>) -> i64 {
    match result {
        Ok(value) => value,
        Err(err) => -i64::from(STATE.fail(err).code()),
    }
}

/// # Safety
/// `ptr` must be null or point to a NUL-terminated string that outlives `'a`.
unsafe fn str_arg<'a>(ptr: *const c_char, name: &str) -> BridgeResult<&'a str> {
    if ptr.is_null() {
        return Err(BridgeError::InvalidArgument(format!("{name} is null")));
    }
    unsafe { CStr::from_ptr(ptr) }
        .to_str()
        .map_err(|_| BridgeError::InvalidArgument(format!("{name} is not UTF-8")))
}

fn id_value(id: u64) -> i64 {
    i64::try_from(id).unwrap_or(i64::MAX)
}

// --- engine lifecycle ---

/// Start the audio engine, creating the workstation on first use.
#[unsafe(no_mangle)]
pub extern "C" fn loopdeck_start_audio_engine() -> i32 {
    let _ = env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info"))
        .try_init();
    status(STATE.start(create_workstation))
}

#[unsafe(no_mangle)]
pub extern "C" fn loopdeck_stop_audio_engine() -> i32 {
    status(STATE.stop())
}

// --- model ---

/// Returns the new track id.
///
/// # Safety
/// `name` must be a valid NUL-terminated string.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn loopdeck_add_track(name: *const c_char) -> i64 {
    value((|| -> BridgeResult<i64> {
        let name = unsafe { str_arg(name, "name") }?;
        STATE.with_session(|s| Ok(id_value(s.add_track(name).0)))
    })())
}

/// Load a WAV file as a new layer on `track`. Returns the layer id.
///
/// # Safety
/// `path`, `name` and `category` must be valid NUL-terminated strings.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn loopdeck_load_layer(
    track: u64,
    path: *const c_char,
    name: *const c_char,
    category: *const c_char,
) -> i64 {
    value((|| -> BridgeResult<i64> {
        let path = unsafe { str_arg(path, "path") }?;
        let name = unsafe { str_arg(name, "name") }?;
        let category = unsafe { str_arg(category, "category") }?;
        STATE.with_session(|s| {
            let id = s.load_layer(TrackId(track), Path::new(path), name, category)?;
            Ok(id_value(id.0))
        })
    })())
}

#[unsafe(no_mangle)]
pub extern "C" fn loopdeck_remove_layer(layer: u64) -> i32 {
    status(STATE.with_session(|s| s.remove_layer(LayerId(layer))))
}

/// Toggle a block at `slot`. Returns 1 if a block was placed, 0 if one was
/// cleared.
#[unsafe(no_mangle)]
pub extern "C" fn loopdeck_tap(layer: u64, slot: u32) -> i64 {
    value(STATE.with_session(|s| {
        Ok(match s.tap(LayerId(layer), slot)? {
            TapOutcome::Placed(_) => 1,
            TapOutcome::Cleared(_) => 0,
        })
    }))
}

/// Returns the number of blocks placed.
#[unsafe(no_mangle)]
pub extern "C" fn loopdeck_auto_repeat(layer: u64, start: u32, interval: u32) -> i64 {
    value(STATE.with_session(|s| {
        let placed = s.auto_repeat(LayerId(layer), start, interval)?;
        Ok(placed.len() as i64)
    }))
}

#[unsafe(no_mangle)]
pub extern "C" fn loopdeck_clear_layer(layer: u64) -> i32 {
    status(STATE.with_session(|s| s.clear_layer(LayerId(layer))))
}

#[unsafe(no_mangle)]
pub extern "C" fn loopdeck_set_layer_gain(layer: u64, gain: f32) -> i32 {
    status(STATE.with_session(|s| s.set_layer_gain(LayerId(layer), gain)))
}

#[unsafe(no_mangle)]
pub extern "C" fn loopdeck_set_layer_muted(layer: u64, muted: bool) -> i32 {
    status(STATE.with_session(|s| s.set_layer_muted(LayerId(layer), muted)))
}

#[unsafe(no_mangle)]
pub extern "C" fn loopdeck_set_layer_solo(layer: u64, solo: bool) -> i32 {
    status(STATE.with_session(|s| s.set_layer_solo(LayerId(layer), solo)))
}

#[unsafe(no_mangle)]
pub extern "C" fn loopdeck_set_track_gain(track: u64, gain: f32) -> i32 {
    status(STATE.with_session(|s| s.set_track_gain(TrackId(track), gain)))
}

#[unsafe(no_mangle)]
pub extern "C" fn loopdeck_set_track_muted(track: u64, muted: bool) -> i32 {
    status(STATE.with_session(|s| s.set_track_muted(TrackId(track), muted)))
}

#[unsafe(no_mangle)]
pub extern "C" fn loopdeck_set_tempo(bpm: u32) -> i32 {
    status(STATE.with_session(|s| s.set_tempo(bpm)))
}

// --- transport ---

#[unsafe(no_mangle)]
pub extern "C" fn loopdeck_play() -> i32 {
    status(STATE.with_session(|s| s.play()))
}

#[unsafe(no_mangle)]
pub extern "C" fn loopdeck_pause() -> i32 {
    status(STATE.with_session(|s| s.pause()))
}

#[unsafe(no_mangle)]
pub extern "C" fn loopdeck_stop() -> i32 {
    status(STATE.with_session(|s| s.stop()))
}

/// Current playhead slot on the grid.
#[unsafe(no_mangle)]
pub extern "C" fn loopdeck_position_slot() -> i64 {
    value(STATE.with_session(|s| Ok(i64::from(s.playhead_slot()))))
}

// --- recording ---

/// Arm a take. Returns the sample position capture will start at.
#[unsafe(no_mangle)]
pub extern "C" fn loopdeck_record_start() -> i64 {
    value(STATE.with_session(|s| Ok(id_value(s.record_start()?))))
}

/// Returns the number of frames captured.
#[unsafe(no_mangle)]
pub extern "C" fn loopdeck_record_stop() -> i64 {
    value(STATE.with_session(|s| Ok(id_value(s.record_stop()?.frames))))
}

/// Add the finished take to `track`. Returns the new layer id.
#[unsafe(no_mangle)]
pub extern "C" fn loopdeck_record_commit(track: u64) -> i64 {
    value(STATE.with_session(|s| Ok(id_value(s.record_commit(TrackId(track))?.0))))
}

#[unsafe(no_mangle)]
pub extern "C" fn loopdeck_record_discard() -> i32 {
    status(STATE.with_session(|s| s.record_discard()))
}

// --- undo ---

#[unsafe(no_mangle)]
pub extern "C" fn loopdeck_commit_state() -> i32 {
    status(STATE.with_session(|s| {
        s.commit_state();
        Ok(())
    }))
}

#[unsafe(no_mangle)]
pub extern "C" fn loopdeck_revert() -> i32 {
    status(STATE.with_session(|s| s.revert()))
}

// --- mixdown ---

/// Render one loop of the grid to a WAV file at `path`.
///
/// # Safety
/// `path` must be a valid NUL-terminated string.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn loopdeck_render_mix(path: *const c_char) -> i32 {
    status((|| -> BridgeResult<()> {
        let path = unsafe { str_arg(path, "path") }?;
        STATE.with_session(|s| s.render_mix(Path::new(path)).map(|_| ()))
    })())
}

/// Render the mix to `path` and pass it to `upload` under `title`.
///
/// # Safety
/// `path` and `title` must be valid NUL-terminated strings.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn loopdeck_commit_mix(
    path: *const c_char,
    title: *const c_char,
    upload: Option<UploadCallback>,
) -> i32 {
    status((|| -> BridgeResult<()> {
        let path = unsafe { str_arg(path, "path") }?;
        let title = unsafe { str_arg(title, "title") }?;
        let upload = upload
            .ok_or_else(|| BridgeError::InvalidArgument("upload callback is null".into()))?;
        STATE.with_session(|s| {
            s.commit_mix(Path::new(path), title, &CallbackUploader(upload))
                .map(|_| ())
        })
    })())
}

// --- errors ---

/// Copy the message of the most recent failure into `buf` (at most `len`
/// bytes including the NUL). Returns that failure's status code.
///
/// # Safety
/// `buf` must be null or valid for writes of `len` bytes.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn loopdeck_last_error(buf: *mut c_char, len: usize) -> i32 {
    let (status, message) = STATE.last_error();
    if !buf.is_null() && len > 0 {
        let out = unsafe { std::slice::from_raw_parts_mut(buf.cast::<u8>(), len) };
        copy_message(&message, out);
    }
    status.code()
}

#[cfg(test)]
mod tests {
    use super::*;

    extern "C" fn accept(_title: *const c_char, _wav: *const u8, len: usize) -> i32 {
        if len > 0 { 0 } else { 1 }
    }

    extern "C" fn reject(_title: *const c_char, _wav: *const u8, _len: usize) -> i32 {
        7
    }

    #[test]
    fn test_callback_uploader_passes_status_through() {
        assert!(CallbackUploader(accept).upload("mix", b"RIFF").is_ok());

        let err = CallbackUploader(reject).upload("mix", b"RIFF").unwrap_err();
        assert_eq!(err.to_string(), "upload callback returned 7");

        assert!(CallbackUploader(accept).upload("bad\0title", b"RIFF").is_err());
    }

    #[test]
    fn test_string_arguments_are_checked() {
        let err = unsafe { str_arg(std::ptr::null(), "path") }.unwrap_err();
        assert!(matches!(err, BridgeError::InvalidArgument(ref m) if m == "path is null"));

        let owned = CString::new("kick.wav").unwrap();
        assert_eq!(unsafe { str_arg(owned.as_ptr(), "path") }.unwrap(), "kick.wav");

        let invalid = CString::new(vec![0xff, 0xfe]).unwrap();
        assert!(unsafe { str_arg(invalid.as_ptr(), "name") }.is_err());
    }

    #[test]
    fn test_calls_without_engine_report_not_started() {
        // the global workstation is only created by an engine start
        assert_eq!(loopdeck_play(), StatusCode::NotStarted.code());
        assert_eq!(loopdeck_position_slot(), -i64::from(StatusCode::NotStarted.code()));

        let mut buf = [0 as c_char; 64];
        let code = unsafe { loopdeck_last_error(buf.as_mut_ptr(), buf.len()) };
        assert_eq!(code, StatusCode::NotStarted.code());
        let message = unsafe { CStr::from_ptr(buf.as_ptr()) };
        assert_eq!(message.to_str().unwrap(), "audio engine has not been started");
    }
}
