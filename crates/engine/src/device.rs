//! Audio devices the engine can run on.

use std::sync::Arc;
use std::sync::mpsc;
use std::thread::{self, JoinHandle};

use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};

use crate::error::{EngineError, EngineResult};
use crate::renderer::{EngineAtomics, Renderer};

/// Negotiated output format.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DeviceConfig {
    pub sample_rate: u32,
    pub channels: u16,
}

/// Everything a device needs to run the renderer.
pub struct DeviceIo {
    pub renderer: Renderer,
    /// Mono input samples, consumed by the renderer while capturing
    pub input: rtrb::Producer<f32>,
    pub atomics: Arc<EngineAtomics>,
}

/// Something that can drive a [`Renderer`].
///
/// `query` is called before the renderer is built so buffers can be prepared
/// at the device rate; `open` then hands over the renderer.
pub trait AudioDevice: Send {
    fn query(&mut self) -> EngineResult<DeviceConfig>;
    fn open(&mut self, io: DeviceIo) -> EngineResult<()>;
    fn close(&mut self);
    fn is_open(&self) -> bool;
}

struct StreamThread {
    close_tx: mpsc::Sender<()>,
    join: JoinHandle<()>,
}

/// The system's default output (and, when present, input) device via cpal.
///
/// cpal streams are not `Send` on every platform, so they are built and owned
/// by a dedicated thread that lives until [`AudioDevice::close`].
#[derive(Default)]
pub struct CpalDevice {
    config: Option<DeviceConfig>,
    thread: Option<StreamThread>,
}

impl CpalDevice {
    pub fn new() -> Self {
        Self::default()
    }
}

impl AudioDevice for CpalDevice {
    fn query(&mut self) -> EngineResult<DeviceConfig> {
        let host = cpal::default_host();
        let device = host
            .default_output_device()
            .ok_or_else(|| EngineError::DeviceUnavailable("no output device found".into()))?;
        let supported = device
            .default_output_config()
            .map_err(|e| EngineError::DeviceUnavailable(e.to_string()))?;

        if supported.sample_format() != cpal::SampleFormat::F32 {
            return Err(EngineError::UnsupportedHardware(format!(
                "unsupported sample format '{}'",
                supported.sample_format()
            )));
        }

        let config = DeviceConfig {
            sample_rate: supported.sample_rate().0,
            channels: supported.channels(),
        };
        self.config = Some(config);
        Ok(config)
    }

    fn open(&mut self, io: DeviceIo) -> EngineResult<()> {
        if self.thread.is_some() {
            return Ok(());
        }
        let config = match self.config {
            Some(config) => config,
            None => self.query()?,
        };

        let (ready_tx, ready_rx) = mpsc::channel::<EngineResult<()>>();
        let (close_tx, close_rx) = mpsc::channel::<()>();

        let join = thread::Builder::new()
            .name("loopdeck-audio".to_string())
            .spawn(move || {
                let streams = match build_streams(config, io) {
                    Ok(streams) => {
                        let _ = ready_tx.send(Ok(()));
                        streams
                    }
                    Err(err) => {
                        let _ = ready_tx.send(Err(err));
                        return;
                    }
                };
                // Returns on an explicit close or when the device is dropped
                let _ = close_rx.recv();
                drop(streams);
            })
            .map_err(|e| EngineError::DeviceUnavailable(e.to_string()))?;

        match ready_rx.recv() {
            Ok(Ok(())) => {
                self.thread = Some(StreamThread { close_tx, join });
                Ok(())
            }
            Ok(Err(err)) => {
                let _ = join.join();
                Err(err)
            }
            Err(_) => {
                let _ = join.join();
                Err(EngineError::DeviceUnavailable(
                    "audio thread exited during start".into(),
                ))
            }
        }
    }

    fn close(&mut self) {
        if let Some(thread) = self.thread.take() {
            let _ = thread.close_tx.send(());
            if thread.join.join().is_err() {
                log::error!("audio thread panicked");
            }
        }
    }

    fn is_open(&self) -> bool {
        self.thread.is_some()
    }
}

impl Drop for CpalDevice {
    fn drop(&mut self) {
        self.close();
    }
}

struct Streams {
    _output: cpal::Stream,
    _input: Option<cpal::Stream>,
}

fn build_streams(config: DeviceConfig, io: DeviceIo) -> EngineResult<Streams> {
    let DeviceIo {
        mut renderer,
        input,
        atomics,
    } = io;

    let host = cpal::default_host();
    let device = host
        .default_output_device()
        .ok_or_else(|| EngineError::DeviceUnavailable("no output device found".into()))?;

    let stream_config = cpal::StreamConfig {
        channels: config.channels,
        sample_rate: cpal::SampleRate(config.sample_rate),
        buffer_size: cpal::BufferSize::Default,
    };

    let error_atomics = atomics.clone();
    let output = device
        .build_output_stream(
            &stream_config,
            move |data: &mut [f32], _: &cpal::OutputCallbackInfo| renderer.process(data),
            move |err| report_stream_error(&error_atomics, err),
            None,
        )
        .map_err(build_error)?;
    output
        .play()
        .map_err(|e| EngineError::DeviceUnavailable(e.to_string()))?;

    let input = match build_input_stream(&host, config.sample_rate, input, atomics) {
        Ok(stream) => Some(stream),
        Err(err) => {
            log::warn!("recording input unavailable: {err}");
            None
        }
    };

    log::info!(
        "audio streams running: {} channels, {}Hz, input: {}",
        config.channels,
        config.sample_rate,
        input.is_some()
    );

    Ok(Streams {
        _output: output,
        _input: input,
    })
}

fn build_input_stream(
    host: &cpal::Host,
    sample_rate: u32,
    mut samples: rtrb::Producer<f32>,
    atomics: Arc<EngineAtomics>,
) -> EngineResult<cpal::Stream> {
    let device = host
        .default_input_device()
        .ok_or_else(|| EngineError::DeviceUnavailable("no input device found".into()))?;
    let supported = device
        .default_input_config()
        .map_err(|e| EngineError::DeviceUnavailable(e.to_string()))?;
    if supported.sample_format() != cpal::SampleFormat::F32 {
        return Err(EngineError::UnsupportedHardware(format!(
            "unsupported input sample format '{}'",
            supported.sample_format()
        )));
    }

    let channels = supported.channels().max(1) as usize;
    let stream_config = cpal::StreamConfig {
        channels: supported.channels(),
        sample_rate: cpal::SampleRate(sample_rate),
        buffer_size: cpal::BufferSize::Default,
    };

    let stream = device
        .build_input_stream(
            &stream_config,
            move |data: &[f32], _: &cpal::InputCallbackInfo| {
                for frame in data.chunks(channels) {
                    let mono = frame.iter().sum::<f32>() / channels as f32;
                    // The renderer only drains while playing; drop overflow
                    let _ = samples.push(mono);
                }
            },
            move |err| report_stream_error(&atomics, err),
            None,
        )
        .map_err(build_error)?;
    stream
        .play()
        .map_err(|e| EngineError::DeviceUnavailable(e.to_string()))?;
    Ok(stream)
}

/// Losing either stream loses the device; anything else is a glitch.
fn report_stream_error(atomics: &EngineAtomics, err: cpal::StreamError) {
    match err {
        cpal::StreamError::DeviceNotAvailable => atomics.signal_device_lost(),
        _ => atomics.record_underrun(),
    }
}

fn build_error(err: cpal::BuildStreamError) -> EngineError {
    match err {
        cpal::BuildStreamError::StreamConfigNotSupported => {
            EngineError::UnsupportedHardware(err.to_string())
        }
        other => EngineError::DeviceUnavailable(other.to_string()),
    }
}
