use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::info;

use crate::error::AppError;
use crate::measure::{Channel, DEFAULT_SMOOTHING_SIGMA};
use crate::peq::PeqConfig;

const CONFIG_DIR: &str = "tspeq";
const CONFIG_FILE: &str = "settings.json";

fn default_sweep_length() -> usize { 65536 }
fn default_sample_rate() -> f64 { 48000.0 }
fn default_repetitions() -> usize { 4 }
fn default_smoothing_sigma() -> f64 { DEFAULT_SMOOTHING_SIGMA }
fn default_true() -> bool { true }

/// Sweep measurement settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MeasurementConfig {
    /// TSP length in samples (power of two)
    #[serde(default = "default_sweep_length")]
    pub sweep_length: usize,
    #[serde(default = "default_sample_rate")]
    pub sample_rate: f64,
    #[serde(default)]
    pub channel: Channel,
    /// Averaged periods; one extra period is played as warm-up
    #[serde(default = "default_repetitions")]
    pub repetitions: usize,
    #[serde(default = "default_smoothing_sigma")]
    pub smoothing_sigma: f64,
    #[serde(default = "default_true")]
    pub normalize_with_reference: bool,
}

impl Default for MeasurementConfig {
    fn default() -> Self {
        Self {
            sweep_length: default_sweep_length(),
            sample_rate: default_sample_rate(),
            channel: Channel::default(),
            repetitions: default_repetitions(),
            smoothing_sigma: default_smoothing_sigma(),
            normalize_with_reference: default_true(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Settings {
    #[serde(default)]
    pub measurement: MeasurementConfig,
    #[serde(default)]
    pub peq: PeqConfig,
}

impl Settings {
    /// Load from an explicit path. A missing file yields defaults.
    pub fn from_path(path: &Path) -> Result<Self, AppError> {
        if !path.exists() {
            info!("No settings at {}, using defaults", path.display());
            return Ok(Self::default());
        }
        let json = std::fs::read_to_string(path)?;
        let settings = serde_json::from_str(&json).map_err(|e| AppError::Config {
            message: format!("{}: {e}", path.display()),
        })?;
        info!("Loaded settings from {}", path.display());
        Ok(settings)
    }

    /// Save as pretty JSON, creating parent directories as needed.
    pub fn save_to(&self, path: &Path) -> Result<(), AppError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let json = serde_json::to_string_pretty(self)?;
        std::fs::write(path, json)?;
        info!("Saved settings to {}", path.display());
        Ok(())
    }
}

/// `<config_dir>/tspeq/settings.json`
pub fn settings_path() -> Result<PathBuf, AppError> {
    let dir = dirs::config_dir().ok_or_else(|| AppError::Config {
        message: "Cannot determine config directory".to_string(),
    })?;
    Ok(dir.join(CONFIG_DIR).join(CONFIG_FILE))
}

pub fn load_settings() -> Result<Settings, AppError> {
    Settings::from_path(&settings_path()?)
}

pub fn save_settings(settings: &Settings) -> Result<(), AppError> {
    settings.save_to(&settings_path()?)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_measurement_defaults() {
        let m = MeasurementConfig::default();
        assert_eq!(m.sweep_length, 65536);
        assert_eq!(m.sample_rate, 48000.0);
        assert_eq!(m.channel, Channel::Both);
        assert_eq!(m.repetitions, 4);
        assert!((m.smoothing_sigma - 0.005).abs() < 1e-12);
        assert!(m.normalize_with_reference);
    }

    #[test]
    fn test_partial_json_fills_defaults() {
        let s: Settings =
            serde_json::from_str(r#"{"measurement": {"channel": "left"}, "peq": {"bandCount": 8}}"#)
                .unwrap();
        assert_eq!(s.measurement.channel, Channel::Left);
        assert_eq!(s.measurement.sweep_length, 65536);
        assert_eq!(s.peq.band_count, 8);
        assert_eq!(s.peq.low_freq, 20.0);
    }

    #[test]
    fn test_missing_file_is_default() {
        let dir = tempfile::tempdir().unwrap();
        let s = Settings::from_path(&dir.path().join("none.json")).unwrap();
        assert_eq!(s, Settings::default());
    }

    #[test]
    fn test_malformed_file_is_config_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("settings.json");
        std::fs::write(&path, "{ not json").unwrap();
        let err = Settings::from_path(&path).unwrap_err();
        assert!(matches!(err, AppError::Config { .. }), "got {err}");
    }

    #[test]
    fn test_save_and_reload() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("settings.json");
        let mut s = Settings::default();
        s.measurement.repetitions = 8;
        s.peq.high_freq = 16000.0;
        s.save_to(&path).unwrap();
        assert_eq!(Settings::from_path(&path).unwrap(), s);
    }
}
