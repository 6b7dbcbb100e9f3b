//! Preferences for the lyre binary
//!
//! Configuration is stored as YAML in the user's config directory.
//! Default location: ~/.config/lyre/config.yaml
//!
//! Engine settings live under `player:`; the rest is what the binary
//! remembers between sessions (output, FX).

use anyhow::{Context, Result};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use lyre_core::config::PlayerConfig;
use lyre_core::engine::{FX_PARAMS, FX_PARAM_COUNT};
use lyre_core::instrument::{OutputSelection, SynthPreset};

/// Root configuration structure
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    /// Engine settings (audio stream, initial transport, timing)
    pub player: PlayerConfig,
    /// Output opened at startup
    pub output: OutputSelection,
    /// FX parameter values, by index
    pub fx: [i32; FX_PARAM_COUNT],
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            player: PlayerConfig::default(),
            output: OutputSelection::Synth(SynthPreset::default().id().to_string()),
            fx: FX_PARAMS.map(|p| p.default),
        }
    }
}

/// Get the default config file path
///
/// Returns: ~/.config/lyre/config.yaml
pub fn default_config_path() -> PathBuf {
    dirs::config_dir()
        .unwrap_or_else(|| dirs::home_dir().unwrap_or_else(|| PathBuf::from(".")))
        .join("lyre")
        .join("config.yaml")
}

/// Load configuration from a YAML file
///
/// If the file doesn't exist, returns default config.
/// If the file exists but is invalid, logs a warning and returns default config.
pub fn load_config<T>(path: &Path) -> T
where
    T: DeserializeOwned + Default,
{
    log::info!("load_config: Loading from {:?}", path);

    if !path.exists() {
        log::info!("load_config: Config file doesn't exist, using defaults");
        return T::default();
    }

    match std::fs::read_to_string(path) {
        Ok(contents) => match serde_yaml::from_str::<T>(&contents) {
            Ok(config) => config,
            Err(e) => {
                log::warn!("load_config: Failed to parse config: {}, using defaults", e);
                T::default()
            }
        },
        Err(e) => {
            log::warn!(
                "load_config: Failed to read config file: {}, using defaults",
                e
            );
            T::default()
        }
    }
}

/// Save configuration to a YAML file
///
/// Creates parent directories if they don't exist.
pub fn save_config<T>(config: &T, path: &Path) -> Result<()>
where
    T: Serialize,
{
    log::info!("save_config: Saving to {:?}", path);

    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("Failed to create config directory: {:?}", parent))?;
    }

    let yaml = serde_yaml::to_string(config).context("Failed to serialize config to YAML")?;

    std::fs::write(path, yaml)
        .with_context(|| format!("Failed to write config file: {:?}", path))?;

    log::info!("save_config: Config saved successfully");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use lyre_core::audio::AudioBackend;
    use lyre_core::engine::RepeatMode;

    #[test]
    fn test_load_nonexistent_returns_default() {
        let config: AppConfig = load_config(Path::new("/nonexistent/path/config.yaml"));
        assert_eq!(config, AppConfig::default());
    }

    #[test]
    fn test_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("config.yaml");

        let mut config = AppConfig::default();
        config.player.repeat = RepeatMode::All;
        config.player.volume = 0.5;
        config.player.audio.backend = AudioBackend::Offline;
        config.output = OutputSelection::Midi("FLUID Synth".to_string());
        config.fx[0] = -40;

        save_config(&config, &path).unwrap();
        let loaded: AppConfig = load_config(&path);
        assert_eq!(loaded, config);
    }

    #[test]
    fn test_partial_file_fills_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.yaml");
        std::fs::write(&path, "player:\n  repeat: one\noutput: !synth saw\n").unwrap();

        let loaded: AppConfig = load_config(&path);
        assert_eq!(loaded.player.repeat, RepeatMode::One);
        assert_eq!(loaded.player.speed, 1.0);
        assert_eq!(loaded.output, OutputSelection::Synth("saw".to_string()));
        assert_eq!(loaded.fx, AppConfig::default().fx);
    }

    #[test]
    fn test_invalid_file_returns_default() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.yaml");
        std::fs::write(&path, "player: [not, a, map").unwrap();

        let loaded: AppConfig = load_config(&path);
        assert_eq!(loaded, AppConfig::default());
    }
}
