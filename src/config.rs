//! Audio configuration: bus levels, timing, reverb shape, mute flag.
//!
//! Stored as JSON. Every field has a default, so a config file only needs
//! the settings it changes.

use crate::impulse::ReverbParams;
use crate::noise::DEFAULT_SEED;
use crate::types::{HORIZON_SECS, SONG_START_DELAY_SECS, TEMPO_SCALE, TIMER_PERIOD_MS};
use log::info;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("read config: {0}")]
    Io(#[from] std::io::Error),
    #[error("parse config: {0}")]
    Parse(#[from] serde_json::Error),
}

/// Gains of the fixed bus topology.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MixLevels {
    /// Background music bus (0 while muted)
    pub music: f32,
    pub effects: f32,
    pub dry: f32,
    pub wet: f32,
}

impl Default for MixLevels {
    fn default() -> Self {
        Self {
            music: 0.3333,
            effects: 0.3333,
            dry: 0.5,
            wet: 0.3333,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AudioConfig {
    /// Reverb kernel channel count
    pub channels: usize,
    /// Overrides the graph's sample rate for the reverb kernel
    pub sample_rate: Option<u32>,
    pub reverb: ReverbParams,
    pub muted: bool,
    pub seed: u64,
    /// Seconds per measure
    pub tempo_scale: f64,
    pub horizon_secs: f64,
    pub timer_period_ms: u64,
    pub song_start_delay_secs: f64,
    pub mix: MixLevels,
}

impl Default for AudioConfig {
    fn default() -> Self {
        Self {
            channels: 2,
            sample_rate: None,
            reverb: ReverbParams::default(),
            muted: false,
            seed: DEFAULT_SEED,
            tempo_scale: TEMPO_SCALE,
            horizon_secs: HORIZON_SECS,
            timer_period_ms: TIMER_PERIOD_MS,
            song_start_delay_secs: SONG_START_DELAY_SECS,
            mix: MixLevels::default(),
        }
    }
}

impl AudioConfig {
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let data = std::fs::read_to_string(path)?;
        let config = serde_json::from_str(&data)?;
        info!("Loaded audio config from {:?}", path);
        Ok(config)
    }

    pub fn save(&self, path: &Path) -> Result<(), ConfigError> {
        let json = serde_json::to_string_pretty(self)?;
        std::fs::write(path, json)?;
        info!("Audio config saved to {:?}", path);
        Ok(())
    }

    pub fn timer_period(&self) -> Duration {
        Duration::from_millis(self.timer_period_ms.max(1))
    }

    /// Music bus gain for a given mute state.
    pub fn music_gain(&self, muted: bool) -> f32 {
        if muted {
            0.0
        } else {
            self.mix.music
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_match_constants() {
        let cfg = AudioConfig::default();
        assert_eq!(cfg.channels, 2);
        assert_eq!(cfg.seed, 9);
        assert!(!cfg.muted);
        assert!((cfg.tempo_scale - 120.0 / 70.0).abs() < 1e-12);
        assert_eq!(cfg.timer_period(), Duration::from_millis(999));
        assert_eq!(cfg.music_gain(true), 0.0);
        assert_eq!(cfg.music_gain(false), 0.3333);
    }

    #[test]
    fn test_partial_file_fills_defaults() {
        let cfg: AudioConfig =
            serde_json::from_str(r#"{"muted":true,"reverb":{"floor_db":-60.0},"mix":{"wet":0.5}}"#).unwrap();
        assert!(cfg.muted);
        assert_eq!(cfg.reverb.floor_db, -60.0);
        assert_eq!(cfg.reverb.floor_gain, ReverbParams::default().floor_gain);
        assert_eq!(cfg.mix.wet, 0.5);
        assert_eq!(cfg.mix.dry, 0.5);
        assert_eq!(cfg.horizon_secs, 4.0);
    }

    #[test]
    fn test_save_load_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("audio.json");
        let cfg = AudioConfig {
            channels: 1,
            seed: 1234,
            sample_rate: Some(22050),
            ..Default::default()
        };
        cfg.save(&path).unwrap();
        let loaded = AudioConfig::load(&path).unwrap();
        assert_eq!(loaded, cfg);
    }

    #[test]
    fn test_missing_file_is_io_error() {
        let err = AudioConfig::load(Path::new("/definitely/not/here.json")).unwrap_err();
        assert!(matches!(err, ConfigError::Io(_)));
    }
}
