use std::io::{Cursor, Seek, Write};
use std::path::Path;

use loopdeck_transport::AudioArc;

/// A span on the output timeline, in frames, during which a source plays
/// from its first frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Segment {
    pub start_frame: u64,
    pub end_frame: u64,
}

/// One layer's contribution to a mixdown.
#[derive(Debug, Clone)]
pub struct MixSource {
    pub audio: AudioArc,
    pub gain: f32,
    pub segments: Vec<Segment>,
}

/// Mix `sources` into a buffer of `total_frames` frames.
///
/// Each segment restarts its source at the segment start and is cut at the
/// segment end or when the source runs out, whichever comes first. Sources
/// at another rate are resampled first.
pub fn render_mix(
    sources: &[MixSource],
    total_frames: u64,
    sample_rate: u32,
    channels: u16,
) -> anyhow::Result<AudioArc> {
    let output_channels = channels as usize;
    let total_frames = total_frames as usize;
    let mut samples = vec![0.0f32; total_frames * output_channels];

    for source in sources {
        let audio = source.audio.resample(sample_rate)?;
        let source_frames = audio.frames();

        for segment in &source.segments {
            let start = (segment.start_frame as usize).min(total_frames);
            let end = (segment.end_frame as usize).min(total_frames);

            for frame_idx in start..end {
                let source_frame = frame_idx - start;
                if source_frame >= source_frames {
                    break;
                }
                for ch in 0..output_channels {
                    samples[frame_idx * output_channels + ch] +=
                        audio.sample_at(source_frame, ch) * source.gain;
                }
            }
        }
    }

    Ok(AudioArc::new(samples, sample_rate, channels))
}

/// Write 32-bit float WAV to `path`.
pub fn write_wav(audio: &AudioArc, path: &Path) -> anyhow::Result<()> {
    let writer = hound::WavWriter::create(path, float_spec(audio))?;
    write_samples(writer, audio)
}

/// Encode 32-bit float WAV into memory.
pub fn encode_wav(audio: &AudioArc) -> anyhow::Result<Vec<u8>> {
    let mut cursor = Cursor::new(Vec::new());
    let writer = hound::WavWriter::new(&mut cursor, float_spec(audio))?;
    write_samples(writer, audio)?;
    Ok(cursor.into_inner())
}

fn float_spec(audio: &AudioArc) -> hound::WavSpec {
    hound::WavSpec {
        channels: audio.channels(),
        sample_rate: audio.sample_rate(),
        bits_per_sample: 32,
        sample_format: hound::SampleFormat::Float,
    }
}

fn write_samples<W: Write + Seek>(
    mut writer: hound::WavWriter<W>,
    audio: &AudioArc,
) -> anyhow::Result<()> {
    for &sample in audio.samples() {
        writer.write_sample(sample)?;
    }
    writer.finalize()?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn ones(frames: usize) -> AudioArc {
        AudioArc::new(vec![1.0; frames], 1000, 1)
    }

    #[test]
    fn test_segments_place_source_and_cut_at_end() {
        let source = MixSource {
            audio: ones(10),
            gain: 0.5,
            segments: vec![
                Segment {
                    start_frame: 0,
                    end_frame: 4,
                },
                Segment {
                    start_frame: 8,
                    end_frame: 12,
                },
            ],
        };

        let mix = render_mix(&[source], 12, 1000, 2).unwrap();

        assert_eq!(mix.frames(), 12);
        assert_eq!(mix.channels(), 2);
        assert_eq!(mix.sample_at(3, 0), 0.5);
        assert_eq!(mix.sample_at(3, 1), 0.5);
        assert_eq!(mix.sample_at(4, 0), 0.0);
        assert_eq!(mix.sample_at(8, 1), 0.5);
        assert_eq!(mix.sample_at(11, 0), 0.5);
    }

    #[test]
    fn test_source_shorter_than_segment() {
        let source = MixSource {
            audio: ones(2),
            gain: 1.0,
            segments: vec![Segment {
                start_frame: 0,
                end_frame: 6,
            }],
        };

        let mix = render_mix(&[source], 6, 1000, 1).unwrap();
        assert_eq!(mix.samples(), &[1.0, 1.0, 0.0, 0.0, 0.0, 0.0]);
    }

    #[test]
    fn test_overlapping_sources_sum() {
        let a = MixSource {
            audio: ones(4),
            gain: 0.25,
            segments: vec![Segment {
                start_frame: 0,
                end_frame: 4,
            }],
        };
        let b = MixSource {
            audio: ones(4),
            gain: 0.5,
            segments: vec![Segment {
                start_frame: 2,
                end_frame: 4,
            }],
        };

        let mix = render_mix(&[a, b], 4, 1000, 1).unwrap();
        assert_eq!(mix.samples(), &[0.25, 0.25, 0.75, 0.75]);
    }

    #[test]
    fn test_write_and_encode_wav() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("mix.wav");
        let audio = AudioArc::new(vec![0.0, 0.5, -0.5, 1.0], 44100, 2);

        write_wav(&audio, &path).unwrap();
        let reader = hound::WavReader::open(&path).unwrap();
        assert_eq!(reader.spec().channels, 2);
        assert_eq!(reader.spec().sample_format, hound::SampleFormat::Float);
        assert_eq!(reader.len(), 4);

        let bytes = encode_wav(&audio).unwrap();
        assert_eq!(&bytes[0..4], b"RIFF");
        assert_eq!(bytes, std::fs::read(&path).unwrap());
    }
}
