use std::fs;
use std::path::Path;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use crate::tempo::Algorithm;

/// Startup configuration, read once from a YAML file. Every field has a
/// default so a partial or missing file still yields a working setup.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct AppConfig {
    /// Run estimation jobs in a separate OS process instead of a worker
    /// thread. A deployment choice; the control engine cannot tell.
    pub use_separate_process: bool,
    pub algorithm: Algorithm,
    /// Preferred capture source name; empty means pick automatically.
    pub default_audio_source: String,
    pub preview_enabled: bool,
    /// Natural tempo of the visual loop; playback rate is relative to this.
    pub reference_loop_bpm: f32,
    /// Position nudge applied whenever the playback rate changes.
    pub position_skip_ms: f32,
    pub fold_enabled: bool,
    pub fold_low: f32,
    pub fold_high: f32,
    pub screen_index: i32,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            use_separate_process: false,
            algorithm: Algorithm::Accurate,
            default_audio_source: String::new(),
            preview_enabled: false,
            // The stock loop runs 19 frames at 23.98 fps.
            reference_loop_bpm: 71.94,
            position_skip_ms: 0.0,
            fold_enabled: false,
            fold_low: 60.0,
            fold_high: 120.0,
            screen_index: 0,
        }
    }
}

impl AppConfig {
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path_ref = path.as_ref();
        let raw = fs::read_to_string(path_ref)
            .with_context(|| format!("read config file {:?}", path_ref))?;
        let config: Self = serde_yaml::from_str(&raw)
            .with_context(|| format!("parse config file {:?}", path_ref))?;
        Ok(config)
    }

    /// The fold band, when folding is enabled and the band is sane.
    pub fn fold_range(&self) -> Option<(f32, f32)> {
        if self.fold_enabled && self.fold_low > 0.0 && self.fold_high >= self.fold_low {
            Some((self.fold_low, self.fold_high))
        } else {
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn partial_yaml_keeps_defaults() {
        let config: AppConfig =
            serde_yaml::from_str("algorithm: fast\nfold_enabled: true\n").unwrap();
        assert_eq!(config.algorithm, Algorithm::Fast);
        assert!(config.fold_enabled);
        assert_eq!(config.reference_loop_bpm, 71.94);
        assert!(!config.use_separate_process);
    }

    #[test]
    fn fold_range_requires_sane_band() {
        let mut config = AppConfig {
            fold_enabled: true,
            ..AppConfig::default()
        };
        assert_eq!(config.fold_range(), Some((60.0, 120.0)));
        config.fold_high = 30.0;
        assert_eq!(config.fold_range(), None);
        config.fold_enabled = false;
        assert_eq!(config.fold_range(), None);
    }

    #[test]
    fn missing_file_is_an_error() {
        assert!(AppConfig::load("does-not-exist.yaml").is_err());
    }
}
