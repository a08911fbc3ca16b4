//! A device without hardware, driven by hand.
//!
//! `OfflineDevice` runs the real renderer in fixed-size blocks whenever
//! [`OfflineDevice::render`] is called. Used for headless operation and tests.

use std::sync::Arc;

use crate::device::{AudioDevice, DeviceConfig, DeviceIo};
use crate::error::{EngineError, EngineResult};
use crate::renderer::{EngineAtomics, Renderer};

pub const OFFLINE_BLOCK_FRAMES: usize = 256;

pub struct OfflineDevice {
    config: DeviceConfig,
    block_frames: usize,
    renderer: Option<Renderer>,
    input: Option<rtrb::Producer<f32>>,
    atomics: Option<Arc<EngineAtomics>>,
    fail_next_open: bool,
    opens: usize,
}

impl OfflineDevice {
    pub fn new(sample_rate: u32, channels: u16) -> Self {
        Self {
            config: DeviceConfig {
                sample_rate,
                channels: channels.max(1),
            },
            block_frames: OFFLINE_BLOCK_FRAMES,
            renderer: None,
            input: None,
            atomics: None,
            fail_next_open: false,
            opens: 0,
        }
    }

    pub fn with_block_frames(mut self, block_frames: usize) -> Self {
        self.block_frames = block_frames.max(1);
        self
    }

    pub fn config(&self) -> DeviceConfig {
        self.config
    }

    /// Times the device has been successfully opened.
    pub fn opens(&self) -> usize {
        self.opens
    }

    /// Render `frames` frames of interleaved output. Returns an empty buffer
    /// when the device is closed.
    pub fn render(&mut self, frames: usize) -> Vec<f32> {
        let channels = self.config.channels as usize;
        let Some(renderer) = self.renderer.as_mut() else {
            return Vec::new();
        };

        let mut out = vec![0.0; frames * channels];
        for block in out.chunks_mut(self.block_frames * channels) {
            renderer.process(block);
        }
        out
    }

    /// Feed mono samples to the capture input. Returns how many were accepted.
    pub fn push_input(&mut self, samples: &[f32]) -> usize {
        let Some(input) = self.input.as_mut() else {
            return 0;
        };
        samples
            .iter()
            .take_while(|&&sample| input.push(sample).is_ok())
            .count()
    }

    /// Raise the device-lost fault as a real backend would.
    pub fn simulate_device_loss(&mut self) {
        if let Some(atomics) = &self.atomics {
            atomics.signal_device_lost();
        }
    }

    /// Make the next `open` fail as if the device were busy.
    pub fn fail_next_open(&mut self) {
        self.fail_next_open = true;
    }

    /// Scheduled commands parked in the renderer.
    pub fn pending_commands(&self) -> usize {
        self.renderer.as_ref().map_or(0, Renderer::pending_len)
    }
}

impl AudioDevice for OfflineDevice {
    fn query(&mut self) -> EngineResult<DeviceConfig> {
        Ok(self.config)
    }

    fn open(&mut self, io: DeviceIo) -> EngineResult<()> {
        if std::mem::take(&mut self.fail_next_open) {
            return Err(EngineError::DeviceUnavailable("device busy".into()));
        }
        self.renderer = Some(io.renderer);
        self.input = Some(io.input);
        self.atomics = Some(io.atomics);
        self.opens += 1;
        Ok(())
    }

    fn close(&mut self) {
        self.renderer = None;
        self.input = None;
        self.atomics = None;
    }

    fn is_open(&self) -> bool {
        self.renderer.is_some()
    }
}
