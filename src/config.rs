use std::path::{Path, PathBuf};

use bevy::prelude::*;
use serde::{Deserialize, Serialize};

use crate::error::ScoreError;
use crate::selector::DEFAULT_THRESHOLD;

#[derive(Resource, Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ScoreSettings {
    /// Tempo of the beat clock; one beat per second at 60.
    pub bpm: f64,
    /// Draws above this go to the MIDI corpus, the rest to the listener.
    pub selector_threshold: f64,
    /// Positive offset means the clock runs late, so beats are shifted forward.
    pub audio_offset_ms: i32,
    pub listen: bool,
    /// RMS level below which microphone input counts as silence.
    pub input_gate: f32,
    /// Pixels per horizontal score unit.
    pub units_to_px: f32,
}

impl Default for ScoreSettings {
    fn default() -> Self {
        Self {
            bpm: 60.0,
            selector_threshold: DEFAULT_THRESHOLD,
            audio_offset_ms: 0,
            listen: true,
            input_gate: 0.01,
            units_to_px: 6.0,
        }
    }
}

impl ScoreSettings {
    fn config_path() -> Option<PathBuf> {
        let dirs = directories::ProjectDirs::from("", "", "LiveScore")?;
        Some(dirs.config_dir().join("settings.json"))
    }

    /// Load the settings file. A missing file is written back with defaults
    /// so it can be edited by hand.
    pub fn load() -> Self {
        let Some(path) = Self::config_path() else {
            info!("No config directory available, using defaults");
            return Self::default();
        };

        match std::fs::read_to_string(&path) {
            Ok(contents) => Self::parse(&contents).unwrap_or_else(|e| {
                warn!("Failed to parse settings {:?}: {}, using defaults", path, e);
                Self::default()
            }),
            Err(_) => {
                let settings = Self::default();
                match settings.write_to(&path) {
                    Ok(()) => info!("Wrote default settings to {:?}", path),
                    Err(e) => warn!("{e}"),
                }
                settings
            }
        }
    }

    pub fn parse(contents: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(contents)
    }

    /// Write pretty JSON to `path`, creating missing parent directories.
    pub fn write_to(&self, path: &Path) -> Result<(), ScoreError> {
        let io_error = |source| ScoreError::Io {
            path: path.to_path_buf(),
            source,
        };
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(io_error)?;
        }
        let json = serde_json::to_string_pretty(self)?;
        std::fs::write(path, json).map_err(io_error)
    }

    /// Audio offset converted to beats at the configured tempo.
    pub fn offset_beats(&self) -> f64 {
        self.audio_offset_ms as f64 * self.bpm / 60_000.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_fields_take_defaults() {
        let settings = ScoreSettings::parse(r#"{ "bpm": 90.0, "listen": false }"#).unwrap();
        assert_eq!(settings.bpm, 90.0);
        assert!(!settings.listen);
        assert_eq!(settings.selector_threshold, 0.36);
        assert_eq!(settings.units_to_px, 6.0);
    }

    #[test]
    fn offset_in_beats() {
        let settings = ScoreSettings {
            bpm: 120.0,
            audio_offset_ms: 250,
            ..Default::default()
        };
        assert!((settings.offset_beats() - 0.5).abs() < 1e-12);
    }

    #[test]
    fn defaults_are_written_into_fresh_directories() {
        let dir = std::env::temp_dir().join(format!("livescore-settings-{}", std::process::id()));
        let path = dir.join("nested").join("settings.json");
        let settings = ScoreSettings {
            bpm: 72.0,
            listen: false,
            ..Default::default()
        };

        settings.write_to(&path).unwrap();
        let contents = std::fs::read_to_string(&path).unwrap();
        let reloaded = ScoreSettings::parse(&contents).unwrap();
        assert_eq!(reloaded.bpm, 72.0);
        assert!(!reloaded.listen);

        std::fs::remove_dir_all(&dir).unwrap();
    }

    #[test]
    fn malformed_file_is_an_error() {
        assert!(ScoreSettings::parse("{ bpm: ").is_err());
    }
}
