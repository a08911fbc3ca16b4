use std::sync::Arc;

use rubato::{
    Resampler, SincFixedIn, SincInterpolationParameters, SincInterpolationType, WindowFunction,
};

/// Decoded layer audio: interleaved `f32` frames behind an `Arc`.
///
/// The engine's buffer table, the mixdown renderer and the edit side all hold
/// the same samples; cloning never copies them.
///
/// ```
/// use loopdeck_transport::AudioArc;
///
/// let kick = AudioArc::new(vec![0.0, 0.5, 1.0, 0.5], 44100, 2);
/// assert_eq!(kick.clone().frames(), 2);
/// ```
#[derive(Clone)]
pub struct AudioArc {
    samples: Arc<[f32]>,
    sample_rate: u32,
    channels: u16,
}

impl AudioArc {
    /// Wrap interleaved samples. A trailing partial frame is dropped and a
    /// channel count of zero is treated as mono.
    pub fn new(mut samples: Vec<f32>, sample_rate: u32, channels: u16) -> Self {
        let channels = channels.max(1);
        let whole = samples.len() - samples.len() % channels as usize;
        samples.truncate(whole);
        Self {
            samples: samples.into(),
            sample_rate,
            channels,
        }
    }

    pub fn samples(&self) -> &[f32] {
        &self.samples
    }

    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    pub fn channels(&self) -> u16 {
        self.channels
    }

    pub fn frames(&self) -> usize {
        self.samples.len() / self.channels as usize
    }

    pub fn duration_ms(&self) -> f64 {
        if self.sample_rate == 0 {
            return 0.0;
        }
        self.frames() as f64 * 1000.0 / self.sample_rate as f64
    }

    /// Sample for output `channel` at `frame`. Output channels beyond the
    /// source's wrap around, so mono layers play on both sides. Past the end
    /// is silence.
    #[inline]
    pub fn sample_at(&self, frame: usize, channel: usize) -> f32 {
        let channels = self.channels as usize;
        self.samples
            .get(frame * channels + channel % channels)
            .copied()
            .unwrap_or(0.0)
    }

    /// The same audio at `sample_rate`. Shares the samples when the rate
    /// already matches.
    pub fn resample(&self, sample_rate: u32) -> anyhow::Result<Self> {
        if sample_rate == self.sample_rate || self.samples.is_empty() {
            return Ok(Self {
                samples: self.samples.clone(),
                sample_rate,
                channels: self.channels,
            });
        }

        let channels = self.channels as usize;
        let planar: Vec<Vec<f32>> = (0..channels)
            .map(|ch| {
                self.samples
                    .chunks_exact(channels)
                    .map(|frame| frame[ch])
                    .collect()
            })
            .collect();

        let ratio = sample_rate as f64 / self.sample_rate as f64;
        let params = SincInterpolationParameters {
            sinc_len: 128,
            f_cutoff: 0.95,
            interpolation: SincInterpolationType::Cubic,
            oversampling_factor: 128,
            window: WindowFunction::BlackmanHarris2,
        };
        let mut resampler = SincFixedIn::<f32>::new(ratio, 1.0, params, self.frames(), channels)?;
        let planar = resampler.process(&planar, None)?;

        let frames = planar.first().map_or(0, Vec::len);
        let samples = (0..frames)
            .flat_map(|i| planar.iter().map(move |ch| ch[i]))
            .collect();
        Ok(Self::new(samples, sample_rate, self.channels))
    }
}

impl std::fmt::Debug for AudioArc {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "AudioArc({} frames, {}ch @ {}Hz)",
            self.frames(),
            self.channels,
            self.sample_rate
        )
    }
}
