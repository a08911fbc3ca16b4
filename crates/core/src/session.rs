use std::collections::BTreeSet;
use std::path::{Path, PathBuf};

use loopdeck_engine::{
    EngineBridge, EngineError, EngineFault, EngineHandle, MixLayer, Segment, encode_wav,
};
use loopdeck_transport::{
    AudioArc, AudioSource, BufferId, Layer, LayerId, PatternBlock, SampleTime, Slot, SlotCount,
    Track, TrackId, stretch_sample_time,
};

use crate::MixUploader;
use crate::config::WorkstationConfig;
use crate::editor::{GridEditor, TapOutcome};
use crate::error::{WorkstationError, WorkstationResult};
use crate::recording::{RecordingController, RecordingPhase, Take};
use crate::scheduler::{Scheduler, Window, any_solo, is_audible};
use crate::time::{GridPosition, TempoClock};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransportState {
    Stopped,
    Playing,
    Paused,
}

impl TransportState {
    pub fn is_playing(&self) -> bool {
        matches!(self, TransportState::Playing)
    }
}

impl std::fmt::Display for TransportState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            TransportState::Stopped => "stopped",
            TransportState::Playing => "playing",
            TransportState::Paused => "paused",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransportRequest {
    Play,
    Pause,
    Stop,
    Record,
}

impl std::fmt::Display for TransportRequest {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            TransportRequest::Play => "play",
            TransportRequest::Pause => "pause",
            TransportRequest::Stop => "stop",
            TransportRequest::Record => "record",
        };
        f.write_str(name)
    }
}

/// What undo returns to.
#[derive(Debug, Clone)]
struct Snapshot {
    tracks: Vec<Track>,
    bpm: u32,
}

/// One workstation session: the track/layer/block model, transport, and the
/// engine it drives.
///
/// Every edit goes through here so the scheduler and the engine's mix state
/// stay in step with the model.
pub struct Session<E: EngineBridge> {
    engine: E,
    engine_handle: Option<EngineHandle>,
    clock: TempoClock,
    tracks: Vec<Track>,
    scheduler: Scheduler,
    recording: RecordingController,
    transport: TransportState,
    next_track_id: u64,
    next_layer_id: u64,
    committed: Snapshot,
}

impl<E: EngineBridge> Session<E> {
    pub fn new(engine: E, config: &WorkstationConfig) -> WorkstationResult<Self> {
        let clock = TempoClock::new(config.bpm, engine.sample_rate())?;
        Ok(Self {
            engine,
            engine_handle: None,
            clock,
            tracks: Vec::new(),
            scheduler: Scheduler::new(config.lookahead_slots),
            recording: RecordingController::new(
                config.recordings_dir.clone(),
                config.countdown_slots,
            ),
            transport: TransportState::Stopped,
            next_track_id: 0,
            next_layer_id: 0,
            committed: Snapshot {
                tracks: Vec::new(),
                bpm: clock.bpm(),
            },
        })
    }

    pub fn engine(&self) -> &E {
        &self.engine
    }

    pub fn engine_mut(&mut self) -> &mut E {
        &mut self.engine
    }

    pub fn clock(&self) -> &TempoClock {
        &self.clock
    }

    pub fn tracks(&self) -> &[Track] {
        &self.tracks
    }

    pub fn track(&self, id: TrackId) -> Option<&Track> {
        self.tracks.iter().find(|t| t.id == id)
    }

    pub fn layer(&self, id: LayerId) -> Option<&Layer> {
        self.tracks.iter().find_map(|t| t.layer(id))
    }

    pub fn transport_state(&self) -> TransportState {
        self.transport
    }

    pub fn recording_phase(&self) -> RecordingPhase {
        self.recording.phase()
    }

    pub fn is_recording(&self) -> bool {
        self.recording.is_active()
    }

    /// The finished take waiting to be committed or discarded.
    pub fn pending_take(&self) -> Option<&Take> {
        self.recording.take()
    }

    pub fn scheduler(&self) -> &Scheduler {
        &self.scheduler
    }

    // --- engine lifecycle ---

    pub fn start_engine(&mut self) -> WorkstationResult<EngineHandle> {
        let handle = self.engine.start()?;
        let sample_rate = self.engine.sample_rate();
        if self.clock.sample_rate() != sample_rate {
            if let Err(err) = self.clock.set_sample_rate(sample_rate) {
                self.engine.stop(handle)?;
                return Err(err);
            }
            log::debug!("tempo clock now at {}Hz", sample_rate);
        }
        self.engine_handle = Some(handle);
        Ok(handle)
    }

    pub fn stop_engine(&mut self) -> WorkstationResult<()> {
        if self.transport != TransportState::Stopped {
            self.halt_transport();
        }
        if let Some(handle) = self.engine_handle.take() {
            self.engine.stop(handle)?;
        }
        Ok(())
    }

    // --- model ---

    pub fn add_track(&mut self, name: impl Into<String>) -> TrackId {
        self.next_track_id += 1;
        let id = TrackId(self.next_track_id);
        self.tracks.push(Track::new(id, name));
        id
    }

    /// Load `path` into the engine and add it as a layer on `track`. On
    /// failure the buffer is released and the model is unchanged.
    pub fn load_layer(
        &mut self,
        track: TrackId,
        path: &Path,
        name: &str,
        category: &str,
    ) -> WorkstationResult<LayerId> {
        if self.track(track).is_none() {
            return Err(WorkstationError::UnknownTrack(track));
        }

        let buffer = self.engine.load_layer(path)?;
        let info = match self.engine.buffer_info(buffer) {
            Ok(info) => info,
            Err(err) => {
                let _ = self.engine.unload_layer(buffer);
                return Err(err.into());
            }
        };
        let block_length = self.clock.natural_length(info.duration_ms);

        self.next_layer_id += 1;
        let id = LayerId(self.next_layer_id);
        let layer = Layer::new(
            id,
            name,
            category,
            AudioSource {
                path: path.to_path_buf(),
                buffer,
            },
            block_length,
        );
        log::info!(
            "added layer {id:?} '{name}' ({} bars) to {track:?}",
            layer.bars()
        );
        self.track_mut(track)?.push_layer(layer);

        let synced = self.sync_mix().and_then(|()| self.reschedule());
        if let Err(err) = synced {
            log::warn!("dropping layer {id:?} '{name}': {err}");
            self.discard_layer(id, buffer);
            return Err(err);
        }
        Ok(id)
    }

    /// Remove a layer and release its engine buffer.
    pub fn remove_layer(&mut self, id: LayerId) -> WorkstationResult<()> {
        let layer = self
            .tracks
            .iter_mut()
            .find_map(|t| t.remove_layer(id))
            .ok_or(WorkstationError::UnknownLayer(id))?;

        self.reschedule()?;
        if !self.buffer_in_use(layer.buffer()) && !self.snapshot_uses(layer.buffer()) {
            self.engine.unload_layer(layer.buffer())?;
        }
        log::info!("removed layer {id:?} '{}'", layer.name);
        Ok(())
    }

    pub fn tap(&mut self, layer: LayerId, slot: Slot) -> WorkstationResult<TapOutcome> {
        let outcome = GridEditor::tap(self.layer_mut(layer)?, slot)?;
        self.reschedule()?;
        Ok(outcome)
    }

    pub fn auto_repeat(
        &mut self,
        layer: LayerId,
        start: Slot,
        interval: SlotCount,
    ) -> WorkstationResult<Vec<PatternBlock>> {
        let placed = GridEditor::auto_repeat(self.layer_mut(layer)?, start, interval)?;
        self.reschedule()?;
        Ok(placed)
    }

    pub fn clear_layer(&mut self, layer: LayerId) -> WorkstationResult<()> {
        self.layer_mut(layer)?.clear();
        self.reschedule()
    }

    pub fn set_layer_gain(&mut self, layer: LayerId, gain: f32) -> WorkstationResult<()> {
        self.layer_mut(layer)?.gain = gain.max(0.0);
        self.sync_mix()
    }

    pub fn set_track_gain(&mut self, track: TrackId, gain: f32) -> WorkstationResult<()> {
        self.track_mut(track)?.gain = gain.max(0.0);
        self.sync_mix()
    }

    pub fn set_layer_muted(&mut self, layer: LayerId, muted: bool) -> WorkstationResult<()> {
        self.layer_mut(layer)?.muted = muted;
        self.sync_mix()?;
        self.reschedule()
    }

    pub fn set_layer_solo(&mut self, layer: LayerId, solo: bool) -> WorkstationResult<()> {
        self.layer_mut(layer)?.solo = solo;
        self.sync_mix()?;
        self.reschedule()
    }

    pub fn set_track_muted(&mut self, track: TrackId, muted: bool) -> WorkstationResult<()> {
        self.track_mut(track)?.muted = muted;
        self.sync_mix()?;
        self.reschedule()
    }

    /// Change the tempo. Blocks keep their slots; only their timing moves.
    /// A running transport keeps the playhead on its beat, and a take still
    /// counting in moves with the grid.
    pub fn set_tempo(&mut self, bpm: u32) -> WorkstationResult<()> {
        let previous = self.clock.bpm();
        self.clock.set_bpm(bpm)?;
        log::debug!("tempo set to {bpm} bpm");
        if previous == bpm
            || self.transport == TransportState::Stopped
            || !self.engine.is_running()
        {
            return self.reschedule();
        }

        let position = stretch_sample_time(self.engine.report_position(), previous, bpm);
        let window = self
            .scheduler
            .invalidate(&self.tracks, position, &self.clock);
        // stale commands go before the playhead moves
        self.engine.set_generation(self.scheduler.generation())?;
        self.engine.stretch_timeline(previous, bpm)?;
        self.recording
            .retime(&mut self.engine, &self.clock, previous, bpm)?;
        self.deliver(window)
    }

    // --- transport ---

    fn transition(
        &self,
        request: TransportRequest,
        allowed: &[TransportState],
    ) -> WorkstationResult<()> {
        if allowed.contains(&self.transport) {
            Ok(())
        } else {
            Err(WorkstationError::InvalidTransportTransition {
                from: self.transport,
                request,
            })
        }
    }

    pub fn play(&mut self) -> WorkstationResult<()> {
        self.transition(
            TransportRequest::Play,
            &[TransportState::Stopped, TransportState::Paused],
        )?;
        if !self.engine.is_running() {
            return Err(EngineError::NotRunning.into());
        }

        if self.transport == TransportState::Stopped {
            self.scheduler.replan(&self.tracks);
            let window = self.scheduler.window(0, &self.clock);
            self.deliver(window)?;
        }
        self.engine.play()?;
        self.transport = TransportState::Playing;
        log::info!("transport playing");
        Ok(())
    }

    pub fn pause(&mut self) -> WorkstationResult<()> {
        self.transition(TransportRequest::Pause, &[TransportState::Playing])?;
        self.engine.pause()?;
        self.transport = TransportState::Paused;
        log::info!("transport paused");
        Ok(())
    }

    /// Stop and rewind. A running recording is finished first.
    pub fn stop(&mut self) -> WorkstationResult<()> {
        self.transition(TransportRequest::Stop, &[TransportState::Playing])?;
        self.halt_transport();
        log::info!("transport stopped");
        Ok(())
    }

    fn halt_transport(&mut self) {
        if self.recording.is_active() {
            if let Err(err) = self.recording.stop(&mut self.engine) {
                log::warn!("failed to finish recording: {err}");
            }
        }
        let generation = self.scheduler.reset();
        if let Err(err) = self.engine.halt(generation) {
            log::warn!("failed to halt engine: {err}");
        }
        self.transport = TransportState::Stopped;
    }

    /// Engine playhead on the absolute timeline. Zero while stopped, even
    /// before the renderer has picked up the rewind.
    pub fn position(&self) -> SampleTime {
        if self.transport == TransportState::Stopped {
            return 0;
        }
        self.engine.report_position()
    }

    pub fn playhead_slot(&self) -> Slot {
        self.clock.to_slot(self.position())
    }

    pub fn format_position(&self) -> GridPosition {
        self.clock.format_position(self.position())
    }

    /// Periodic housekeeping: report faults, keep the command window full,
    /// and move recorded audio to disk. Returns the playhead.
    pub fn poll(&mut self) -> WorkstationResult<SampleTime> {
        let status = self.engine.poll_status();
        if status.fault == Some(EngineFault::DeviceLost) {
            self.engine_handle = None;
            if self.transport != TransportState::Stopped {
                self.halt_transport();
            }
            return Err(EngineError::DeviceLost("output device disconnected".into()).into());
        }

        let position = self.position();
        if self.transport.is_playing() {
            let window = self.scheduler.window(position, &self.clock);
            self.deliver(window)?;
        }
        self.recording.poll(&mut self.engine)?;
        Ok(position)
    }

    // --- recording ---

    /// Arm a take. Only a playing transport can record.
    pub fn record_start(&mut self) -> WorkstationResult<SampleTime> {
        self.transition(TransportRequest::Record, &[TransportState::Playing])?;
        self.recording.arm(&mut self.engine, &self.clock)
    }

    pub fn record_stop(&mut self) -> WorkstationResult<Take> {
        self.recording.stop(&mut self.engine)
    }

    pub fn record_discard(&mut self) -> WorkstationResult<()> {
        self.recording.discard()
    }

    /// Turn the finished take into a new layer on `track`. If the take
    /// cannot be loaded it stays pending, to be retried or discarded.
    pub fn record_commit(&mut self, track: TrackId) -> WorkstationResult<LayerId> {
        if self.track(track).is_none() {
            return Err(WorkstationError::UnknownTrack(track));
        }
        let Some(take) = self.recording.take() else {
            return Err(WorkstationError::InvalidRecordingTransition {
                from: self.recording.phase(),
                request: "commit",
            });
        };
        let path = take.path.clone();
        let name = format!("Recording {}", self.next_layer_id + 1);
        let layer = self.load_layer(track, &path, &name, "recording")?;
        self.recording.commit()?;
        Ok(layer)
    }

    // --- undo ---

    /// Remember the current tracks and tempo as the state to revert to.
    pub fn commit_state(&mut self) {
        let retired: Vec<BufferId> = self
            .committed
            .tracks
            .iter()
            .flat_map(|t| t.layers())
            .map(Layer::buffer)
            .filter(|&buffer| !self.buffer_in_use(buffer))
            .collect();

        self.committed = Snapshot {
            tracks: self.tracks.clone(),
            bpm: self.clock.bpm(),
        };
        for buffer in retired {
            if let Err(err) = self.engine.unload_layer(buffer) {
                log::debug!("retired {buffer} already gone: {err}");
            }
        }
        log::info!("committed session state");
    }

    /// Go back to the last committed state. If a released buffer cannot be
    /// loaded again nothing changes.
    pub fn revert(&mut self) -> WorkstationResult<()> {
        let mut restored = self.committed.tracks.clone();

        let mut reloaded = Vec::new();
        for layer in restored.iter_mut().flat_map(|t| t.layers_mut()) {
            if self.engine.buffer_info(layer.buffer()).is_ok() {
                continue;
            }
            match self.engine.load_layer(&layer.source.path) {
                Ok(buffer) => {
                    reloaded.push(buffer);
                    layer.source.buffer = buffer;
                }
                Err(err) => {
                    for buffer in reloaded {
                        if let Err(err) = self.engine.unload_layer(buffer) {
                            log::debug!("reloaded {buffer} already gone: {err}");
                        }
                    }
                    return Err(err.into());
                }
            }
        }

        let keep: BTreeSet<BufferId> = restored
            .iter()
            .flat_map(|t| t.layers())
            .map(Layer::buffer)
            .collect();
        let dropped: Vec<BufferId> = self
            .tracks
            .iter()
            .flat_map(|t| t.layers())
            .map(Layer::buffer)
            .filter(|buffer| !keep.contains(buffer))
            .collect();

        self.tracks = restored;
        self.committed.tracks = self.tracks.clone();
        for buffer in dropped {
            if let Err(err) = self.engine.unload_layer(buffer) {
                log::debug!("dropped {buffer} already gone: {err}");
            }
        }

        self.sync_mix()?;
        self.set_tempo(self.committed.bpm)?;
        log::info!("reverted to committed state");
        Ok(())
    }

    // --- mixdown ---

    /// Render one pass of the grid with every audible layer to a WAV file.
    pub fn render_mix(&self, path: &Path) -> WorkstationResult<AudioArc> {
        let any_solo = any_solo(&self.tracks);
        let layers: Vec<MixLayer> = self
            .tracks
            .iter()
            .flat_map(|track| track.layers().iter().map(move |layer| (track, layer)))
            .filter(|(track, layer)| is_audible(track, layer, any_solo))
            .map(|(track, layer)| MixLayer {
                buffer: layer.buffer(),
                gain: track.gain * layer.gain,
                segments: layer
                    .blocks()
                    .iter()
                    .map(|block| Segment {
                        start_frame: self.clock.to_sample_time(block.start()),
                        end_frame: self.clock.absolute_to_sample_time(block.end() as u64),
                    })
                    .collect(),
            })
            .collect();

        Ok(self
            .engine
            .render_mix(&layers, self.clock.loop_frames(), path)?)
    }

    /// Render the mix and hand it to `uploader` under `title`.
    pub fn commit_mix(
        &self,
        path: &Path,
        title: &str,
        uploader: &dyn MixUploader,
    ) -> WorkstationResult<PathBuf> {
        let mix = self.render_mix(path)?;
        let wav = encode_wav(&mix).map_err(EngineError::Mixdown)?;
        uploader
            .upload(title, &wav)
            .map_err(WorkstationError::Upload)?;
        log::info!("uploaded mix '{title}' ({} bytes)", wav.len());
        Ok(path.to_path_buf())
    }

    // --- internals ---

    fn track_mut(&mut self, id: TrackId) -> WorkstationResult<&mut Track> {
        self.tracks
            .iter_mut()
            .find(|t| t.id == id)
            .ok_or(WorkstationError::UnknownTrack(id))
    }

    fn layer_mut(&mut self, id: LayerId) -> WorkstationResult<&mut Layer> {
        self.tracks
            .iter_mut()
            .find_map(|t| t.layer_mut(id))
            .ok_or(WorkstationError::UnknownLayer(id))
    }

    /// Take back a layer whose load did not go through.
    fn discard_layer(&mut self, id: LayerId, buffer: BufferId) {
        for track in &mut self.tracks {
            if track.remove_layer(id).is_some() {
                break;
            }
        }
        self.scheduler.replan(&self.tracks);
        if let Err(err) = self.engine.unload_layer(buffer) {
            log::debug!("{buffer} already gone: {err}");
        }
    }

    fn buffer_in_use(&self, buffer: BufferId) -> bool {
        self.tracks
            .iter()
            .flat_map(|t| t.layers())
            .any(|l| l.buffer() == buffer)
    }

    fn snapshot_uses(&self, buffer: BufferId) -> bool {
        self.committed
            .tracks
            .iter()
            .flat_map(|t| t.layers())
            .any(|l| l.buffer() == buffer)
    }

    /// Push effective gain and audibility of every layer to the engine.
    fn sync_mix(&mut self) -> WorkstationResult<()> {
        let any_solo = any_solo(&self.tracks);
        for track in &self.tracks {
            for layer in track.layers() {
                self.engine
                    .set_gain(layer.buffer(), track.gain * layer.gain)?;
                self.engine
                    .set_muted(layer.buffer(), !is_audible(track, layer, any_solo))?;
            }
        }
        Ok(())
    }

    /// Bring queued commands in line with the model after an edit.
    fn reschedule(&mut self) -> WorkstationResult<()> {
        if self.transport == TransportState::Stopped || !self.engine.is_running() {
            self.scheduler.replan(&self.tracks);
            return Ok(());
        }

        let position = self.engine.report_position();
        let window = self
            .scheduler
            .invalidate(&self.tracks, position, &self.clock);
        self.engine.set_generation(self.scheduler.generation())?;
        self.deliver(window)
    }

    fn deliver(&mut self, window: Window) -> WorkstationResult<()> {
        if !window.commands.is_empty() {
            self.engine.submit_commands(&window.commands)?;
        }
        self.scheduler.advance(window.until);
        Ok(())
    }
}
