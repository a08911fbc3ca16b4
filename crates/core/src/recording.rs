//! Overdub recording, phase locked to the grid.

use std::fs::{self, File};
use std::io::BufWriter;
use std::path::{Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};

use loopdeck_engine::{EngineBridge, EngineError};
use loopdeck_transport::{SampleTime, stretch_sample_time};

use crate::error::{WorkstationError, WorkstationResult};
use crate::time::TempoClock;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecordingPhase {
    Idle,
    /// Armed, waiting for the count-in to finish
    CountdownPending,
    Recording,
    /// Finished take waiting to be committed or discarded
    Stopped,
}

impl std::fmt::Display for RecordingPhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            RecordingPhase::Idle => "idle",
            RecordingPhase::CountdownPending => "counting down",
            RecordingPhase::Recording => "recording",
            RecordingPhase::Stopped => "stopped",
        };
        f.write_str(name)
    }
}

/// A finished recording on disk.
#[derive(Debug, Clone, PartialEq)]
pub struct Take {
    pub path: PathBuf,
    /// Timeline position of the first captured sample
    pub start: SampleTime,
    pub frames: u64,
    pub sample_rate: u32,
}

impl Take {
    pub fn duration_ms(&self) -> f64 {
        self.frames as f64 * 1000.0 / self.sample_rate.max(1) as f64
    }
}

struct TakeWriter {
    path: PathBuf,
    start: SampleTime,
    /// Absolute slot `start` was derived from
    start_slot: u64,
    sample_rate: u32,
    frames: u64,
    writer: hound::WavWriter<BufWriter<File>>,
}

impl TakeWriter {
    fn create(
        path: PathBuf,
        start: SampleTime,
        start_slot: u64,
        sample_rate: u32,
    ) -> WorkstationResult<Self> {
        let spec = hound::WavSpec {
            channels: 1,
            sample_rate,
            bits_per_sample: 32,
            sample_format: hound::SampleFormat::Float,
        };
        let writer =
            hound::WavWriter::create(&path, spec).map_err(|e| (path.as_path(), e))?;
        Ok(Self {
            path,
            start,
            start_slot,
            sample_rate,
            frames: 0,
            writer,
        })
    }

    fn write(&mut self, samples: &[f32]) -> WorkstationResult<()> {
        for &sample in samples {
            self.writer
                .write_sample(sample)
                .map_err(|e| (self.path.as_path(), e))?;
        }
        self.frames += samples.len() as u64;
        Ok(())
    }

    fn finish(self) -> WorkstationResult<Take> {
        let path = self.path;
        self.writer.finalize().map_err(|e| (path.as_path(), e))?;
        Ok(Take {
            path,
            start: self.start,
            frames: self.frames,
            sample_rate: self.sample_rate,
        })
    }
}

enum State {
    Idle,
    CountdownPending(TakeWriter),
    Recording(TakeWriter),
    Stopped(Take),
}

/// Captures input into a mono float WAV, starting exactly on a slot
/// boundary so the take lines up with the grid.
pub struct RecordingController {
    dir: PathBuf,
    countdown_slots: u32,
    state: State,
    scratch: Vec<f32>,
    takes: u64,
}

impl RecordingController {
    pub fn new(dir: impl Into<PathBuf>, countdown_slots: u32) -> Self {
        Self {
            dir: dir.into(),
            countdown_slots,
            state: State::Idle,
            scratch: Vec::new(),
            takes: 0,
        }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn phase(&self) -> RecordingPhase {
        match self.state {
            State::Idle => RecordingPhase::Idle,
            State::CountdownPending(_) => RecordingPhase::CountdownPending,
            State::Recording(_) => RecordingPhase::Recording,
            State::Stopped(_) => RecordingPhase::Stopped,
        }
    }

    /// Capturing or about to.
    pub fn is_active(&self) -> bool {
        matches!(self.state, State::CountdownPending(_) | State::Recording(_))
    }

    /// Where capture begins (or began) on the timeline.
    pub fn capture_start(&self) -> Option<SampleTime> {
        match &self.state {
            State::CountdownPending(w) | State::Recording(w) => Some(w.start),
            State::Stopped(take) => Some(take.start),
            State::Idle => None,
        }
    }

    pub fn take(&self) -> Option<&Take> {
        match &self.state {
            State::Stopped(take) => Some(take),
            _ => None,
        }
    }

    fn invalid(&self, request: &'static str) -> WorkstationError {
        WorkstationError::InvalidRecordingTransition {
            from: self.phase(),
            request,
        }
    }

    /// Arm a take. Capture starts `countdown_slots` after the next slot
    /// boundary at or after the engine position.
    pub fn arm<E: EngineBridge>(
        &mut self,
        engine: &mut E,
        clock: &TempoClock,
    ) -> WorkstationResult<SampleTime> {
        if !matches!(self.state, State::Idle) {
            return Err(self.invalid("start"));
        }

        let position = engine.report_position();
        let start_slot = clock.next_boundary(position) + self.countdown_slots as u64;
        let start = clock.absolute_to_sample_time(start_slot);

        fs::create_dir_all(&self.dir).map_err(|e| WorkstationError::io(&self.dir, e))?;
        self.takes += 1;
        let path = self.dir.join(take_file_name(self.takes));
        let format = engine.capture_format();
        let writer = TakeWriter::create(path, start, start_slot, format.sample_rate)?;

        if let Err(err) = engine.begin_capture(start) {
            let _ = fs::remove_file(&writer.path);
            return Err(err.into());
        }

        log::info!(
            "recording armed: capture from sample {start} (slot {start_slot}) into {}",
            writer.path.display()
        );
        self.state = State::CountdownPending(writer);
        Ok(start)
    }

    /// Follow a tempo change from `from` to `to` bpm, after the engine has
    /// been told to stretch its timeline. A take still counting in is moved
    /// to its slot at the new tempo.
    pub fn retime<E: EngineBridge>(
        &mut self,
        engine: &mut E,
        clock: &TempoClock,
        from: u32,
        to: u32,
    ) -> WorkstationResult<()> {
        match &mut self.state {
            State::CountdownPending(writer) => {
                writer.start = clock.absolute_to_sample_time(writer.start_slot);
                engine.begin_capture(writer.start)?;
                log::debug!(
                    "recording re-armed: capture from sample {} (slot {})",
                    writer.start,
                    writer.start_slot
                );
            }
            State::Recording(writer) => {
                writer.start = stretch_sample_time(writer.start, from, to);
            }
            State::Idle | State::Stopped(_) => {}
        }
        Ok(())
    }

    /// Advance the count-in and move captured samples to disk.
    pub fn poll<E: EngineBridge>(&mut self, engine: &mut E) -> WorkstationResult<()> {
        let reached = match &self.state {
            State::CountdownPending(writer) => engine.report_position() >= writer.start,
            _ => false,
        };
        if reached {
            if let State::CountdownPending(writer) = std::mem::replace(&mut self.state, State::Idle)
            {
                log::info!("recording started");
                self.state = State::Recording(writer);
            }
        }
        self.drain(engine)
    }

    fn drain<E: EngineBridge>(&mut self, engine: &mut E) -> WorkstationResult<()> {
        let writer = match &mut self.state {
            State::CountdownPending(writer) | State::Recording(writer) => writer,
            _ => return Ok(()),
        };
        self.scratch.clear();
        if engine.drain_capture(&mut self.scratch) > 0 {
            writer.write(&self.scratch)?;
        }
        Ok(())
    }

    /// Finish the take with whatever was captured so far.
    pub fn stop<E: EngineBridge>(&mut self, engine: &mut E) -> WorkstationResult<Take> {
        if !self.is_active() {
            return Err(self.invalid("stop"));
        }

        match engine.end_capture() {
            Ok(()) | Err(EngineError::NotRunning) => {}
            Err(err) => log::warn!("failed to end capture: {err}"),
        }
        self.drain(engine)?;

        let writer = match std::mem::replace(&mut self.state, State::Idle) {
            State::CountdownPending(writer) | State::Recording(writer) => writer,
            other => {
                self.state = other;
                return Err(self.invalid("stop"));
            }
        };
        let take = writer.finish()?;
        log::info!(
            "recording stopped: {} frames ({:.0} ms)",
            take.frames,
            take.duration_ms()
        );
        self.state = State::Stopped(take.clone());
        Ok(take)
    }

    /// Drop the finished take and delete its file.
    pub fn discard(&mut self) -> WorkstationResult<()> {
        let State::Stopped(take) = &self.state else {
            return Err(self.invalid("discard"));
        };
        match fs::remove_file(&take.path) {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => return Err(WorkstationError::io(&take.path, e)),
        }
        log::info!("recording discarded");
        self.state = State::Idle;
        Ok(())
    }

    /// Hand over the finished take. The file stays on disk.
    pub fn commit(&mut self) -> WorkstationResult<Take> {
        if !matches!(self.state, State::Stopped(_)) {
            return Err(self.invalid("commit"));
        }
        match std::mem::replace(&mut self.state, State::Idle) {
            State::Stopped(take) => Ok(take),
            other => {
                self.state = other;
                Err(self.invalid("commit"))
            }
        }
    }
}

fn take_file_name(take: u64) -> String {
    let millis = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis())
        .unwrap_or_default();
    format!("take-{millis}-{take}.wav")
}
