use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::Ordering;

use basedrop::{Collector, Shared};
use loopdeck_render::{MixSource, render_mix, write_wav};
use loopdeck_transport::{AudioArc, BufferId, Command, SampleTime, ScheduledCommand};

use crate::device::{AudioDevice, DeviceConfig, DeviceIo};
use crate::error::{EngineError, EngineResult};
use crate::renderer::{BufferTable, EngineAtomics, FAULT_DEVICE_LOST, Renderer, RendererConfig};
use crate::{
    BufferInfo, CaptureFormat, EngineBridge, EngineFault, EngineHandle, EngineStatus, MixLayer,
};

const TABLE_RING_CAPACITY: usize = 8;

#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Slots in the edit-to-audio command ring
    pub command_capacity: usize,
    /// Scheduled commands the renderer can hold at once
    pub pending_capacity: usize,
    /// Size of the input and capture rings
    pub capture_seconds: f32,
    pub max_strips: usize,
    /// Relative sample paths are looked up here
    pub samples_root: PathBuf,
    /// Rate used before a device has been queried
    pub fallback_sample_rate: u32,
    pub fallback_channels: u16,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            command_capacity: 1024,
            pending_capacity: 1024,
            capture_seconds: 4.0,
            max_strips: 256,
            samples_root: PathBuf::new(),
            fallback_sample_rate: 44100,
            fallback_channels: 2,
        }
    }
}

struct LoadedBuffer {
    path: PathBuf,
    /// As decoded, kept so the buffer can be prepared again for another rate
    source: AudioArc,
    prepared: Shared<AudioArc>,
    gain: f32,
    muted: bool,
}

struct Running {
    handle: EngineHandle,
    commands: rtrb::Producer<Command>,
    tables: rtrb::Producer<Shared<BufferTable>>,
    capture: rtrb::Consumer<f32>,
    atomics: Arc<EngineAtomics>,
    table_dirty: bool,
    seen_underruns: u64,
    seen_dropped: u64,
}

/// Front end of the engine, owned by the edit thread.
pub struct AudioEngine<D: AudioDevice> {
    device: D,
    config: EngineConfig,
    collector: Collector,
    buffers: BTreeMap<BufferId, LoadedBuffer>,
    next_buffer: u32,
    next_handle: u64,
    device_config: DeviceConfig,
    running: Option<Running>,
    /// Captured samples still queued when the device went away
    capture_tail: Vec<f32>,
    fatal: Option<String>,
}

impl<D: AudioDevice> AudioEngine<D> {
    /// Buffers loaded before the first start are prepared at the rate the
    /// device reports now, or the fallback rate if it cannot be queried.
    pub fn new(mut device: D, config: EngineConfig) -> Self {
        let device_config = device.query().unwrap_or_else(|err| {
            log::debug!("device query failed, using fallback format: {err}");
            DeviceConfig {
                sample_rate: config.fallback_sample_rate,
                channels: config.fallback_channels,
            }
        });
        Self {
            device,
            config,
            collector: Collector::new(),
            buffers: BTreeMap::new(),
            next_buffer: 0,
            next_handle: 0,
            device_config,
            running: None,
            capture_tail: Vec::new(),
            fatal: None,
        }
    }

    pub fn device(&self) -> &D {
        &self.device
    }

    pub fn device_mut(&mut self) -> &mut D {
        &mut self.device
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn channels(&self) -> u16 {
        self.device_config.channels
    }

    pub fn buffer_path(&self, id: BufferId) -> Option<&Path> {
        self.buffers.get(&id).map(|b| b.path.as_path())
    }

    pub fn buffer_ids(&self) -> impl Iterator<Item = BufferId> + '_ {
        self.buffers.keys().copied()
    }

    fn note_fatal(&mut self, err: EngineError) -> EngineError {
        if err.is_fatal() {
            log::error!("audio engine disabled: {err}");
            self.fatal = Some(err.to_string());
        }
        err
    }

    /// Resample every buffer for `sample_rate`.
    fn prepare_buffers(&mut self, sample_rate: u32) -> EngineResult<()> {
        let handle = self.collector.handle();
        for buffer in self.buffers.values_mut() {
            let audio = buffer
                .source
                .resample(sample_rate)
                .map_err(|e| EngineError::UnsupportedFormat {
                    path: buffer.path.clone(),
                    reason: e.to_string(),
                })?;
            buffer.prepared = Shared::new(&handle, audio);
        }
        Ok(())
    }

    fn build_table(&self) -> BufferTable {
        BufferTable::new(
            self.buffers
                .iter()
                .map(|(id, buffer)| (*id, buffer.prepared.clone()))
                .collect(),
        )
    }

    fn publish_table(&mut self) {
        let Some(running) = self.running.as_ref() else {
            return;
        };
        if running.tables.is_full() {
            log::warn!("buffer table ring full, retrying on next poll");
            if let Some(running) = self.running.as_mut() {
                running.table_dirty = true;
            }
            return;
        }

        let table = Shared::new(&self.collector.handle(), self.build_table());
        if let Some(running) = self.running.as_mut() {
            running.table_dirty = running.tables.push(table).is_err();
        }
    }

    fn running_mut(&mut self) -> EngineResult<&mut Running> {
        self.running.as_mut().ok_or(EngineError::NotRunning)
    }

    fn send(&mut self, command: Command) -> EngineResult<()> {
        self.running_mut()?
            .commands
            .push(command)
            .map_err(|_| EngineError::CommandQueueFull)
    }

    /// Close the device and drop the rings. Capture still queued is kept for
    /// the next `drain_capture`.
    fn shut_down(&mut self) {
        self.device.close();
        if let Some(mut running) = self.running.take() {
            while let Ok(sample) = running.capture.pop() {
                self.capture_tail.push(sample);
            }
        }
        self.collector.collect();
    }

    fn buffer_mut(&mut self, id: BufferId) -> EngineResult<&mut LoadedBuffer> {
        self.buffers
            .get_mut(&id)
            .ok_or(EngineError::UnknownBuffer(id))
    }
}

impl<D: AudioDevice> EngineBridge for AudioEngine<D> {
    fn start(&mut self) -> EngineResult<EngineHandle> {
        if let Some(running) = &self.running {
            return Ok(running.handle);
        }
        if let Some(reason) = &self.fatal {
            return Err(EngineError::UnsupportedHardware(reason.clone()));
        }

        let device_config = match self.device.query() {
            Ok(config) => config,
            Err(err) => return Err(self.note_fatal(err)),
        };
        if device_config.sample_rate != self.device_config.sample_rate {
            log::debug!(
                "preparing {} buffers for {}Hz",
                self.buffers.len(),
                device_config.sample_rate
            );
            self.prepare_buffers(device_config.sample_rate)?;
        }
        self.device_config = device_config;

        let handle = self.collector.handle();
        let capture_len = ((self.config.capture_seconds * device_config.sample_rate as f32)
            as usize)
            .max(1);

        let (mut command_tx, command_rx) =
            rtrb::RingBuffer::<Command>::new(self.config.command_capacity.max(1));
        let (table_tx, table_rx) = rtrb::RingBuffer::new(TABLE_RING_CAPACITY);
        let (input_tx, input_rx) = rtrb::RingBuffer::<f32>::new(capture_len);
        let (capture_tx, capture_rx) = rtrb::RingBuffer::<f32>::new(capture_len);
        let atomics = Arc::new(EngineAtomics::new());

        // Mix state survives restarts
        for (id, buffer) in &self.buffers {
            let restore = [
                Command::SetGain {
                    buffer: *id,
                    gain: buffer.gain,
                },
                Command::SetMuted {
                    buffer: *id,
                    muted: buffer.muted,
                },
            ];
            for command in restore {
                if command_tx.push(command).is_err() {
                    log::warn!("command ring too small to restore mix state for {id}");
                }
            }
        }

        let renderer = Renderer::new(
            RendererConfig {
                channels: device_config.channels as usize,
                pending_capacity: self.config.pending_capacity,
                max_strips: self.config.max_strips,
            },
            command_rx,
            table_rx,
            Shared::new(&handle, self.build_table()),
            input_rx,
            capture_tx,
            atomics.clone(),
        );

        let io = DeviceIo {
            renderer,
            input: input_tx,
            atomics: atomics.clone(),
        };
        if let Err(err) = self.device.open(io) {
            let err = self.note_fatal(err);
            log::warn!("audio engine failed to start: {err}");
            return Err(err);
        }

        self.next_handle += 1;
        let engine_handle = EngineHandle(self.next_handle);
        self.running = Some(Running {
            handle: engine_handle,
            commands: command_tx,
            tables: table_tx,
            capture: capture_rx,
            atomics,
            table_dirty: false,
            seen_underruns: 0,
            seen_dropped: 0,
        });

        log::info!(
            "audio engine started: {}Hz, {} channels, {} buffers",
            device_config.sample_rate,
            device_config.channels,
            self.buffers.len()
        );
        Ok(engine_handle)
    }

    fn stop(&mut self, handle: EngineHandle) -> EngineResult<()> {
        match &self.running {
            Some(running) if running.handle == handle => {}
            Some(_) => {
                log::debug!("ignoring stop for stale {handle:?}");
                return Ok(());
            }
            None => return Ok(()),
        }

        self.shut_down();
        log::info!("audio engine stopped");
        Ok(())
    }

    fn is_running(&self) -> bool {
        self.running.is_some()
    }

    fn sample_rate(&self) -> u32 {
        self.device_config.sample_rate
    }

    fn load_layer(&mut self, path: &Path) -> EngineResult<BufferId> {
        let source = loopdeck_decode::decode_file(path, &self.config.samples_root)?;
        let prepared = source
            .resample(self.device_config.sample_rate)
            .map_err(|e| EngineError::UnsupportedFormat {
                path: path.to_path_buf(),
                reason: e.to_string(),
            })?;

        self.next_buffer += 1;
        let id = BufferId(self.next_buffer);
        log::info!(
            "loaded {} as {id}: {} frames at {}Hz",
            path.display(),
            prepared.frames(),
            prepared.sample_rate()
        );

        let prepared = Shared::new(&self.collector.handle(), prepared);
        self.buffers.insert(
            id,
            LoadedBuffer {
                path: path.to_path_buf(),
                source,
                prepared,
                gain: 1.0,
                muted: false,
            },
        );
        self.publish_table();
        Ok(id)
    }

    fn unload_layer(&mut self, id: BufferId) -> EngineResult<()> {
        if self.buffers.remove(&id).is_none() {
            return Err(EngineError::UnknownBuffer(id));
        }
        self.publish_table();
        log::info!("unloaded {id}");
        Ok(())
    }

    fn buffer_info(&self, id: BufferId) -> EngineResult<BufferInfo> {
        let buffer = self.buffers.get(&id).ok_or(EngineError::UnknownBuffer(id))?;
        let audio = &*buffer.prepared;
        Ok(BufferInfo {
            frames: audio.frames(),
            sample_rate: audio.sample_rate(),
            channels: audio.channels(),
            duration_ms: audio.duration_ms(),
        })
    }

    fn submit_commands(&mut self, commands: &[ScheduledCommand]) -> EngineResult<()> {
        let running = self.running_mut()?;
        if running.commands.slots() < commands.len() {
            return Err(EngineError::CommandQueueFull);
        }
        for command in commands {
            running
                .commands
                .push(Command::Schedule(*command))
                .map_err(|_| EngineError::CommandQueueFull)?;
        }
        Ok(())
    }

    fn report_position(&self) -> SampleTime {
        self.running
            .as_ref()
            .map_or(0, |running| running.atomics.position())
    }

    fn set_gain(&mut self, id: BufferId, gain: f32) -> EngineResult<()> {
        self.buffer_mut(id)?.gain = gain;
        if self.running.is_some() {
            self.send(Command::SetGain { buffer: id, gain })?;
        }
        Ok(())
    }

    fn set_muted(&mut self, id: BufferId, muted: bool) -> EngineResult<()> {
        self.buffer_mut(id)?.muted = muted;
        if self.running.is_some() {
            self.send(Command::SetMuted { buffer: id, muted })?;
        }
        Ok(())
    }

    fn play(&mut self) -> EngineResult<()> {
        self.send(Command::Play)
    }

    fn pause(&mut self) -> EngineResult<()> {
        self.send(Command::Pause)
    }

    fn halt(&mut self, generation: u64) -> EngineResult<()> {
        if self.running.is_none() {
            return Ok(());
        }
        self.send(Command::Halt { generation })
    }

    fn stretch_timeline(&mut self, from: u32, to: u32) -> EngineResult<()> {
        if self.running.is_none() {
            return Ok(());
        }
        self.send(Command::Stretch { from, to })
    }

    fn set_generation(&mut self, generation: u64) -> EngineResult<()> {
        if self.running.is_none() {
            return Ok(());
        }
        self.send(Command::SetGeneration(generation))
    }

    fn begin_capture(&mut self, at: SampleTime) -> EngineResult<()> {
        let running = self.running_mut()?;
        // leftovers from an earlier take
        while running.capture.pop().is_ok() {}
        self.capture_tail.clear();
        self.send(Command::BeginCapture { at })
    }

    fn end_capture(&mut self) -> EngineResult<()> {
        self.send(Command::EndCapture)
    }

    fn drain_capture(&mut self, out: &mut Vec<f32>) -> usize {
        let before = out.len();
        out.append(&mut self.capture_tail);
        let Some(running) = self.running.as_mut() else {
            return out.len() - before;
        };
        out.reserve(running.capture.slots());
        while let Ok(sample) = running.capture.pop() {
            out.push(sample);
        }
        out.len() - before
    }

    fn capture_format(&self) -> CaptureFormat {
        CaptureFormat {
            sample_rate: self.device_config.sample_rate,
            channels: 1,
        }
    }

    fn poll_status(&mut self) -> EngineStatus {
        self.collector.collect();

        if self.running.as_ref().is_some_and(|r| r.table_dirty) {
            self.publish_table();
        }

        let Some(running) = self.running.as_mut() else {
            return EngineStatus::default();
        };

        let underruns = running.atomics.underruns.load(Ordering::Relaxed);
        let dropped = running.atomics.dropped_commands.load(Ordering::Relaxed);
        let status = EngineStatus {
            fault: match running.atomics.fault.load(Ordering::Relaxed) {
                FAULT_DEVICE_LOST => Some(EngineFault::DeviceLost),
                _ => None,
            },
            underruns: underruns - running.seen_underruns,
            dropped_commands: dropped - running.seen_dropped,
        };
        running.seen_underruns = underruns;
        running.seen_dropped = dropped;

        if status.underruns > 0 {
            log::warn!("{} buffer underruns", status.underruns);
        }
        if status.dropped_commands > 0 {
            log::warn!("renderer dropped {} commands", status.dropped_commands);
        }
        if status.fault == Some(EngineFault::DeviceLost) {
            log::warn!("audio device lost, engine stopped");
            self.shut_down();
        }

        status
    }

    fn render_mix(&self, layers: &[MixLayer], frames: u64, path: &Path) -> EngineResult<AudioArc> {
        let sources = layers
            .iter()
            .map(|layer| {
                let buffer = self
                    .buffers
                    .get(&layer.buffer)
                    .ok_or(EngineError::UnknownBuffer(layer.buffer))?;
                Ok(MixSource {
                    audio: buffer.source.clone(),
                    gain: layer.gain,
                    segments: layer.segments.clone(),
                })
            })
            .collect::<EngineResult<Vec<_>>>()?;

        let mix = render_mix(
            &sources,
            frames,
            self.device_config.sample_rate,
            self.device_config.channels,
        )
        .map_err(EngineError::Mixdown)?;
        write_wav(&mix, path).map_err(EngineError::Mixdown)?;
        log::info!("wrote mixdown to {}", path.display());
        Ok(mix)
    }
}

impl<D: AudioDevice> Drop for AudioEngine<D> {
    fn drop(&mut self) {
        self.device.close();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::OfflineDevice;
    use loopdeck_transport::{Action, LayerId};
    use tempfile::{TempDir, tempdir};

    const RATE: u32 = 1000;

    fn engine() -> AudioEngine<OfflineDevice> {
        AudioEngine::new(
            OfflineDevice::new(RATE, 1).with_block_frames(16),
            EngineConfig::default(),
        )
    }

    fn write_fixture(dir: &TempDir, name: &str, samples: &[f32], rate: u32) -> PathBuf {
        let path = dir.path().join(name);
        let spec = hound::WavSpec {
            channels: 1,
            sample_rate: rate,
            bits_per_sample: 32,
            sample_format: hound::SampleFormat::Float,
        };
        let mut writer = hound::WavWriter::create(&path, spec).unwrap();
        for &sample in samples {
            writer.write_sample(sample).unwrap();
        }
        writer.finalize().unwrap();
        path
    }

    fn trigger(time: u64, buffer: BufferId) -> ScheduledCommand {
        ScheduledCommand {
            sample_time: time,
            layer: LayerId(1),
            buffer,
            action: Action::Trigger,
            generation: 0,
        }
    }

    #[test]
    fn test_missing_file_allocates_nothing() {
        let mut engine = engine();
        let err = engine.load_layer(Path::new("missing.wav")).unwrap_err();
        assert!(matches!(err, EngineError::Io { .. }));
        assert_eq!(engine.buffer_ids().count(), 0);

        let dir = tempdir().unwrap();
        let path = write_fixture(&dir, "kick.wav", &[0.5; 10], RATE);
        assert_eq!(engine.load_layer(&path).unwrap(), BufferId(1));
    }

    #[test]
    fn test_non_wav_is_unsupported() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("song.mp3");
        std::fs::write(&path, b"ID3\x03\x00 definitely not a wave file").unwrap();

        let err = engine().load_layer(&path).unwrap_err();
        assert!(matches!(err, EngineError::UnsupportedFormat { .. }));
    }

    #[test]
    fn test_start_is_idempotent() {
        let mut engine = engine();
        let first = engine.start().unwrap();
        let second = engine.start().unwrap();

        assert_eq!(first, second);
        assert_eq!(engine.device().opens(), 1);

        engine.stop(first).unwrap();
        engine.stop(first).unwrap();
        assert!(!engine.is_running());
        assert_ne!(engine.start().unwrap(), first);
    }

    #[test]
    fn test_busy_device_is_recoverable() {
        let mut engine = engine();
        engine.device_mut().fail_next_open();

        let err = engine.start().unwrap_err();
        assert!(err.is_recoverable());
        assert!(!engine.is_running());
        assert!(engine.start().is_ok());
    }

    #[test]
    fn test_commands_require_running_engine() {
        let mut engine = engine();
        assert!(matches!(engine.play(), Err(EngineError::NotRunning)));
        assert!(matches!(
            engine.submit_commands(&[trigger(0, BufferId(1))]),
            Err(EngineError::NotRunning)
        ));
        assert!(engine.halt(1).is_ok());
        assert_eq!(engine.report_position(), 0);
    }

    #[test]
    fn test_scheduled_trigger_plays() {
        let dir = tempdir().unwrap();
        let path = write_fixture(&dir, "tone.wav", &[0.25; 32], RATE);
        let mut engine = engine();
        let id = engine.load_layer(&path).unwrap();
        engine.start().unwrap();

        engine.submit_commands(&[trigger(16, id)]).unwrap();
        engine.play().unwrap();
        let out = engine.device_mut().render(32);

        assert!(out[..16].iter().all(|&s| s == 0.0));
        assert!(out[16..].iter().all(|&s| s == 0.25));
        assert_eq!(engine.report_position(), 32);
    }

    #[test]
    fn test_gain_set_before_start_is_restored() {
        let dir = tempdir().unwrap();
        let path = write_fixture(&dir, "tone.wav", &[1.0; 32], RATE);
        let mut engine = engine();
        let id = engine.load_layer(&path).unwrap();
        engine.set_gain(id, 0.5).unwrap();
        engine.start().unwrap();

        engine.submit_commands(&[trigger(0, id)]).unwrap();
        engine.play().unwrap();
        let out = engine.device_mut().render(4);
        assert_eq!(out, vec![0.5; 4]);
    }

    #[test]
    fn test_unload_invalidates_id_and_silences() {
        let dir = tempdir().unwrap();
        let path = write_fixture(&dir, "tone.wav", &[1.0; 64], RATE);
        let mut engine = engine();
        let id = engine.load_layer(&path).unwrap();
        engine.start().unwrap();
        engine.submit_commands(&[trigger(0, id)]).unwrap();
        engine.play().unwrap();
        engine.device_mut().render(16);

        engine.unload_layer(id).unwrap();
        let out = engine.device_mut().render(16);
        assert!(out.iter().all(|&s| s == 0.0));

        assert!(matches!(engine.buffer_info(id), Err(EngineError::UnknownBuffer(_))));
        assert!(matches!(engine.unload_layer(id), Err(EngineError::UnknownBuffer(_))));
        engine.poll_status();
    }

    #[test]
    fn test_full_command_ring_rejects_whole_batch() {
        let mut engine = AudioEngine::new(
            OfflineDevice::new(RATE, 1),
            EngineConfig {
                command_capacity: 2,
                ..EngineConfig::default()
            },
        );
        engine.start().unwrap();

        let batch = [trigger(0, BufferId(1)), trigger(1, BufferId(1)), trigger(2, BufferId(1))];
        assert!(matches!(
            engine.submit_commands(&batch),
            Err(EngineError::CommandQueueFull)
        ));
        assert!(engine.submit_commands(&batch[..2]).is_ok());
    }

    #[test]
    fn test_halt_rewinds() {
        let mut engine = engine();
        engine.start().unwrap();
        engine.play().unwrap();
        engine.device_mut().render(48);
        assert_eq!(engine.report_position(), 48);

        // the renderer publishes the rewind
        engine.halt(1).unwrap();
        engine.device_mut().render(16);
        assert_eq!(engine.report_position(), 0);
        assert_eq!(engine.device().pending_commands(), 0);
    }

    #[test]
    fn test_device_loss_stops_engine() {
        let mut engine = engine();
        engine.start().unwrap();
        engine.device_mut().simulate_device_loss();

        let status = engine.poll_status();
        assert_eq!(status.fault, Some(EngineFault::DeviceLost));
        assert!(!engine.is_running());
        assert!(!engine.device().is_open());
        assert_eq!(engine.poll_status(), EngineStatus::default());
    }

    #[test]
    fn test_capture_survives_device_loss() {
        let mut engine = engine();
        engine.start().unwrap();
        engine.begin_capture(0).unwrap();
        engine.play().unwrap();
        engine.device_mut().push_input(&[0.5; 32]);
        engine.device_mut().render(32);

        engine.device_mut().simulate_device_loss();
        assert_eq!(engine.poll_status().fault, Some(EngineFault::DeviceLost));
        assert!(!engine.is_running());

        let mut captured = Vec::new();
        assert_eq!(engine.drain_capture(&mut captured), 32);
        assert!(captured.iter().all(|&s| s == 0.5));
        assert_eq!(engine.drain_capture(&mut captured), 0);
    }

    #[test]
    fn test_stretch_timeline_rescales_position() {
        let mut engine = engine();
        assert!(engine.stretch_timeline(60, 120).is_ok());

        engine.start().unwrap();
        engine.play().unwrap();
        engine.device_mut().render(48);
        engine.stretch_timeline(60, 120).unwrap();
        engine.device_mut().render(16);
        assert_eq!(engine.report_position(), 40);
    }

    #[test]
    fn test_capture_drains_input_from_start_sample() {
        let mut engine = engine();
        engine.start().unwrap();
        engine.begin_capture(8).unwrap();
        engine.play().unwrap();

        let input: Vec<f32> = (0..32).map(|i| i as f32).collect();
        assert_eq!(engine.device_mut().push_input(&input), 32);
        engine.device_mut().render(32);

        let mut captured = Vec::new();
        assert_eq!(engine.drain_capture(&mut captured), 24);
        assert_eq!(captured[0], 8.0);
        assert_eq!(captured[23], 31.0);
        assert_eq!(engine.capture_format().channels, 1);
    }

    #[test]
    fn test_buffers_are_prepared_at_device_rate() {
        let dir = tempdir().unwrap();
        let path = write_fixture(&dir, "slow.wav", &[0.1; 1000], 500);
        let mut engine = engine();
        let id = engine.load_layer(&path).unwrap();

        let info = engine.buffer_info(id).unwrap();
        assert_eq!(info.sample_rate, RATE);
        assert!((1990..=2010).contains(&info.frames), "frames: {}", info.frames);
        assert!((info.duration_ms - 2000.0).abs() < 20.0);
    }

    #[test]
    fn test_render_mix_writes_wav() {
        let dir = tempdir().unwrap();
        let path = write_fixture(&dir, "tone.wav", &[1.0; 10], RATE);
        let mut engine = engine();
        let id = engine.load_layer(&path).unwrap();

        let out = dir.path().join("mix.wav");
        let layers = [MixLayer {
            buffer: id,
            gain: 0.5,
            segments: vec![crate::Segment {
                start_frame: 5,
                end_frame: 20,
            }],
        }];
        let mix = engine.render_mix(&layers, 20, &out).unwrap();

        assert_eq!(mix.frames(), 20);
        assert_eq!(mix.sample_at(4, 0), 0.0);
        assert_eq!(mix.sample_at(5, 0), 0.5);
        assert_eq!(mix.sample_at(15, 0), 0.0);
        assert!(out.exists());

        let missing = [MixLayer {
            buffer: BufferId(99),
            gain: 1.0,
            segments: Vec::new(),
        }];
        assert!(matches!(
            engine.render_mix(&missing, 20, &out),
            Err(EngineError::UnknownBuffer(_))
        ));
    }
}
