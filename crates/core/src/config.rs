use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

use loopdeck_engine::EngineConfig;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct WorkstationConfig {
    pub bpm: u32,
    /// Slots of commands kept queued ahead of the playhead
    pub lookahead_slots: u32,
    /// Slots of count-in before a recording starts capturing
    pub countdown_slots: u32,
    pub command_capacity: usize,
    pub pending_capacity: usize,
    pub capture_seconds: f32,
    pub recordings_dir: PathBuf,
    pub samples_root: PathBuf,
    pub output_channels: u16,
    pub offline_sample_rate: u32,
}

impl Default for WorkstationConfig {
    fn default() -> Self {
        Self {
            bpm: 90,
            lookahead_slots: 8,
            countdown_slots: 4,
            command_capacity: 1024,
            pending_capacity: 1024,
            capture_seconds: 4.0,
            recordings_dir: default_recordings_dir(),
            samples_root: PathBuf::new(),
            output_channels: 2,
            offline_sample_rate: 44100,
        }
    }
}

fn default_recordings_dir() -> PathBuf {
    dirs::data_local_dir()
        .unwrap_or_else(std::env::temp_dir)
        .join("loopdeck")
        .join("recordings")
}

impl WorkstationConfig {
    pub fn config_path() -> Option<PathBuf> {
        dirs::config_dir().map(|p| p.join("loopdeck").join("config.toml"))
    }

    /// Load from the user config dir, falling back to defaults.
    pub fn load() -> Self {
        match Self::config_path() {
            Some(path) => Self::load_from(&path),
            None => Self::default(),
        }
    }

    pub fn load_from(path: &Path) -> Self {
        match fs::read_to_string(path) {
            Ok(contents) => toml::from_str(&contents).unwrap_or_else(|err| {
                log::warn!("ignoring invalid config {}: {err}", path.display());
                Self::default()
            }),
            Err(_) => Self::default(),
        }
    }

    pub fn save(&self) -> std::io::Result<()> {
        let Some(path) = Self::config_path() else {
            return Ok(());
        };
        self.save_to(&path)
    }

    pub fn save_to(&self, path: &Path) -> std::io::Result<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        let contents = toml::to_string_pretty(self).map_err(std::io::Error::other)?;
        fs::write(path, contents)
    }

    pub fn engine_config(&self) -> EngineConfig {
        EngineConfig {
            command_capacity: self.command_capacity,
            pending_capacity: self.pending_capacity,
            capture_seconds: self.capture_seconds,
            samples_root: self.samples_root.clone(),
            fallback_sample_rate: self.offline_sample_rate,
            fallback_channels: self.output_channels,
            ..EngineConfig::default()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_defaults() {
        let config = WorkstationConfig::default();
        assert_eq!(config.bpm, 90);
        assert_eq!(config.lookahead_slots, 8);
        assert!(config.recordings_dir.ends_with("loopdeck/recordings"));
    }

    #[test]
    fn test_save_and_load() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("nested").join("config.toml");
        let config = WorkstationConfig {
            bpm: 120,
            countdown_slots: 8,
            ..WorkstationConfig::default()
        };

        config.save_to(&path).unwrap();
        assert_eq!(WorkstationConfig::load_from(&path), config);
    }

    #[test]
    fn test_partial_and_invalid_files_fall_back() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("config.toml");

        fs::write(&path, "bpm = 140\n").unwrap();
        let config = WorkstationConfig::load_from(&path);
        assert_eq!(config.bpm, 140);
        assert_eq!(config.lookahead_slots, 8);

        fs::write(&path, "bpm = \"fast\"").unwrap();
        assert_eq!(WorkstationConfig::load_from(&path).bpm, 90);

        assert_eq!(
            WorkstationConfig::load_from(&dir.path().join("absent.toml")),
            WorkstationConfig::default()
        );
    }
}
