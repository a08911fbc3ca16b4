use std::fs::File;
use std::io::Read;
use std::path::{Path, PathBuf};

use loopdeck_transport::AudioArc;
use symphonia::core::audio::SampleBuffer;
use symphonia::core::codecs::{
    CODEC_TYPE_PCM_F32LE, CODEC_TYPE_PCM_F64LE, CODEC_TYPE_PCM_S8, CODEC_TYPE_PCM_S16LE,
    CODEC_TYPE_PCM_S24LE, CODEC_TYPE_PCM_S32LE, CODEC_TYPE_PCM_U8, CodecType, DecoderOptions,
};
use symphonia::core::formats::FormatOptions;
use symphonia::core::io::MediaSourceStream;
use symphonia::core::meta::MetadataOptions;
use symphonia::core::probe::Hint;

#[derive(Debug, thiserror::Error)]
pub enum DecodeError {
    #[error("failed to read '{}': {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("'{}' is not a PCM WAV file: {reason}", path.display())]
    UnsupportedFormat { path: PathBuf, reason: String },

    #[error("failed to decode '{}': {source}", path.display())]
    Decode {
        path: PathBuf,
        #[source]
        source: symphonia::core::errors::Error,
    },
}

impl DecodeError {
    pub fn path(&self) -> &Path {
        match self {
            DecodeError::Io { path, .. }
            | DecodeError::UnsupportedFormat { path, .. }
            | DecodeError::Decode { path, .. } => path,
        }
    }
}

/// Resolve a sample path. Accepts paths that exist as given or paths relative
/// to `samples_root` (e.g. `cr78/hihat.wav`).
pub fn resolve_sample_path(path: &Path, samples_root: &Path) -> Option<PathBuf> {
    if path.exists() {
        return Some(path.to_path_buf());
    }

    let with_root = samples_root.join(path);
    if with_root.exists() {
        return Some(with_root);
    }

    None
}

/// Decode a PCM WAV file, resolving it against `samples_root` first.
pub fn decode_file(path: &Path, samples_root: &Path) -> Result<AudioArc, DecodeError> {
    let resolved = resolve_sample_path(path, samples_root).ok_or_else(|| DecodeError::Io {
        path: path.to_path_buf(),
        source: std::io::Error::new(std::io::ErrorKind::NotFound, "sample not found"),
    })?;
    decode_wav(&resolved)
}

/// Decode a PCM WAV file at exactly `path`.
pub fn decode_wav(path: &Path) -> Result<AudioArc, DecodeError> {
    let io_err = |source| DecodeError::Io {
        path: path.to_path_buf(),
        source,
    };
    let decode_err = |source| DecodeError::Decode {
        path: path.to_path_buf(),
        source,
    };

    let mut file = File::open(path).map_err(io_err)?;
    check_riff_wave(&mut file, path)?;
    let file = File::open(path).map_err(io_err)?;

    let mss = MediaSourceStream::new(Box::new(file), Default::default());
    let mut hint = Hint::new();
    hint.with_extension("wav");

    let detected = symphonia::default::get_probe()
        .format(
            &hint,
            mss,
            &FormatOptions::default(),
            &MetadataOptions::default(),
        )
        .map_err(decode_err)?;

    let mut format = detected.format;

    let track = format
        .default_track()
        .ok_or_else(|| DecodeError::UnsupportedFormat {
            path: path.to_path_buf(),
            reason: "no audio track".into(),
        })?;

    if !is_linear_pcm(track.codec_params.codec) {
        return Err(DecodeError::UnsupportedFormat {
            path: path.to_path_buf(),
            reason: "compressed WAV payloads are not supported".into(),
        });
    }

    let sample_rate = track.codec_params.sample_rate.unwrap_or(44100);
    let channels = track
        .codec_params
        .channels
        .map(|c| c.count())
        .unwrap_or(1)
        .max(1) as u16;
    let track_id = track.id;

    let mut decoder = symphonia::default::get_codecs()
        .make(&track.codec_params, &DecoderOptions::default())
        .map_err(decode_err)?;

    let mut samples = Vec::new();

    loop {
        let packet = match format.next_packet() {
            Ok(packet) => packet,
            Err(symphonia::core::errors::Error::IoError(e))
                if e.kind() == std::io::ErrorKind::UnexpectedEof =>
            {
                break;
            }
            Err(e) => return Err(decode_err(e)),
        };

        if packet.track_id() != track_id {
            continue;
        }

        let decoded = decoder.decode(&packet).map_err(decode_err)?;
        let spec = *decoded.spec();
        let duration = decoded.capacity() as u64;

        let mut sample_buf = SampleBuffer::<f32>::new(duration, spec);
        sample_buf.copy_interleaved_ref(decoded);
        samples.extend_from_slice(sample_buf.samples());
    }

    Ok(AudioArc::new(samples, sample_rate, channels))
}

fn check_riff_wave(file: &mut File, path: &Path) -> Result<(), DecodeError> {
    let mut header = [0u8; 12];
    match file.read_exact(&mut header) {
        Ok(()) => {}
        Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => {
            return Err(DecodeError::UnsupportedFormat {
                path: path.to_path_buf(),
                reason: "file too short for a RIFF header".into(),
            });
        }
        Err(source) => {
            return Err(DecodeError::Io {
                path: path.to_path_buf(),
                source,
            });
        }
    }

    if &header[0..4] != b"RIFF" || &header[8..12] != b"WAVE" {
        return Err(DecodeError::UnsupportedFormat {
            path: path.to_path_buf(),
            reason: "missing RIFF/WAVE header".into(),
        });
    }
    Ok(())
}

fn is_linear_pcm(codec: CodecType) -> bool {
    [
        CODEC_TYPE_PCM_U8,
        CODEC_TYPE_PCM_S8,
        CODEC_TYPE_PCM_S16LE,
        CODEC_TYPE_PCM_S24LE,
        CODEC_TYPE_PCM_S32LE,
        CODEC_TYPE_PCM_F32LE,
        CODEC_TYPE_PCM_F64LE,
    ]
    .contains(&codec)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn write_sine(path: &Path, sample_rate: u32, channels: u16, frames: usize) {
        let spec = hound::WavSpec {
            channels,
            sample_rate,
            bits_per_sample: 16,
            sample_format: hound::SampleFormat::Int,
        };
        let mut writer = hound::WavWriter::create(path, spec).unwrap();
        for i in 0..frames {
            let value = ((i as f32 * 0.05).sin() * i16::MAX as f32 * 0.5) as i16;
            for _ in 0..channels {
                writer.write_sample(value).unwrap();
            }
        }
        writer.finalize().unwrap();
    }

    #[test]
    fn test_decode_pcm_wav() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("tone.wav");
        write_sine(&path, 22050, 2, 2205);

        let audio = decode_wav(&path).unwrap();

        assert_eq!(audio.sample_rate(), 22050);
        assert_eq!(audio.channels(), 2);
        assert_eq!(audio.frames(), 2205);
        assert!((audio.duration_ms() - 100.0).abs() < 1e-6);
    }

    #[test]
    fn test_missing_file_is_io_error() {
        let dir = tempdir().unwrap();
        let err = decode_file(Path::new("missing.wav"), dir.path()).unwrap_err();

        match err {
            DecodeError::Io { ref path, ref source } => {
                assert_eq!(path, Path::new("missing.wav"));
                assert_eq!(source.kind(), std::io::ErrorKind::NotFound);
            }
            other => panic!("expected Io, got {other:?}"),
        }
    }

    #[test]
    fn test_non_wav_is_unsupported() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("song.mp3");
        std::fs::write(&path, b"ID3\x03\x00\x00\x00\x00\x00\x00not really audio").unwrap();

        let err = decode_wav(&path).unwrap_err();
        assert!(matches!(err, DecodeError::UnsupportedFormat { .. }));
        assert_eq!(err.path(), path.as_path());
    }

    #[test]
    fn test_short_file_is_unsupported() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("tiny.wav");
        std::fs::write(&path, b"RIFF").unwrap();

        assert!(matches!(
            decode_wav(&path),
            Err(DecodeError::UnsupportedFormat { .. })
        ));
    }

    #[test]
    fn test_resolve_against_samples_root() {
        let dir = tempdir().unwrap();
        std::fs::create_dir_all(dir.path().join("cr78")).unwrap();
        let path = dir.path().join("cr78").join("kick.wav");
        write_sine(&path, 44100, 1, 10);

        let resolved = resolve_sample_path(Path::new("cr78/kick.wav"), dir.path()).unwrap();
        assert_eq!(resolved, path);
        assert!(resolve_sample_path(Path::new("cr78/snare.wav"), dir.path()).is_none());
    }
}
