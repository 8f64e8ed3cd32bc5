//! Configuration loading and root folder resolution
//!
//! Root folder priority order:
//! 1. Command-line argument (highest priority)
//! 2. Environment variable
//! 3. TOML config file
//! 4. OS-dependent compiled default (fallback)
//!
//! A missing or unreadable config file is never fatal: defaults apply.

use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

/// Environment variable naming the root folder
pub const ROOT_FOLDER_ENV: &str = "MWL_ROOT_FOLDER";

/// Session engine settings (`[engine]` table)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineSettings {
    /// Target guidance-track volume (0.0-1.0)
    pub volume: f32,
    pub fade_in_secs: f64,
    pub fade_out_secs: f64,
    pub audio_enabled: bool,
    pub chime_enabled: bool,
    /// How long an un-narrated cue stays on screen
    pub cue_display_secs: u32,
    pub tick_interval_ms: u64,
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self {
            volume: 0.8,
            fade_in_secs: 2.0,
            fade_out_secs: 2.0,
            audio_enabled: true,
            chime_enabled: true,
            cue_display_secs: 5,
            tick_interval_ms: 1000,
        }
    }
}

/// History store settings (`[history]` table)
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct HistorySettings {
    /// Local JSON record (default: `<root>/history.json`)
    pub local_path: Option<PathBuf>,
    /// Cloud store database (default: `<root>/cloud.db`)
    pub cloud_database: Option<PathBuf>,
    /// Rows per insert batch during sync (default: 50)
    pub sync_chunk_size: Option<usize>,
}

/// Contents of `config.toml`
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TomlConfig {
    pub root_folder: Option<PathBuf>,
    pub scripts_dir: Option<PathBuf>,
    pub engine: EngineSettings,
    pub history: HistorySettings,
}

impl TomlConfig {
    /// Parse a config file
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        toml::from_str(&content)
            .map_err(|e| Error::Config(format!("{}: {}", path.display(), e)))
    }

    /// Load the platform config file, falling back to defaults
    pub fn load_or_default() -> Self {
        match config_file_path() {
            Some(path) => match Self::load(&path) {
                Ok(config) => {
                    debug!("Loaded config from {}", path.display());
                    config
                }
                Err(e) => {
                    warn!("Ignoring unreadable config {}: {}", path.display(), e);
                    Self::default()
                }
            },
            None => Self::default(),
        }
    }
}

/// Resolve the root folder holding history and cloud databases
pub fn resolve_root_folder(cli_arg: Option<&Path>, config: &TomlConfig) -> PathBuf {
    if let Some(path) = cli_arg {
        return path.to_path_buf();
    }

    if let Ok(path) = std::env::var(ROOT_FOLDER_ENV) {
        if !path.trim().is_empty() {
            return PathBuf::from(path);
        }
    }

    if let Some(path) = &config.root_folder {
        return path.clone();
    }

    default_root_folder()
}

/// Platform config file, if one exists
///
/// Linux checks `~/.config/mindwell/config.toml` then `/etc/mindwell/config.toml`.
pub fn config_file_path() -> Option<PathBuf> {
    let user_config = dirs::config_dir().map(|d| d.join("mindwell").join("config.toml"));
    if let Some(path) = user_config {
        if path.exists() {
            return Some(path);
        }
    }

    if cfg!(target_os = "linux") {
        let system_config = PathBuf::from("/etc/mindwell/config.toml");
        if system_config.exists() {
            return Some(system_config);
        }
    }

    None
}

/// OS-dependent default root folder
pub fn default_root_folder() -> PathBuf {
    if cfg!(target_os = "macos") {
        dirs::data_dir()
            .map(|d| d.join("mindwell"))
            .unwrap_or_else(|| PathBuf::from("/Library/Application Support/mindwell"))
    } else {
        dirs::data_local_dir()
            .map(|d| d.join("mindwell"))
            .unwrap_or_else(|| PathBuf::from("./mindwell_data"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;

    #[test]
    fn test_engine_defaults() {
        let engine = EngineSettings::default();
        assert_eq!(engine.volume, 0.8);
        assert_eq!(engine.cue_display_secs, 5);
        assert_eq!(engine.tick_interval_ms, 1000);
        assert!(engine.audio_enabled && engine.chime_enabled);
    }

    #[test]
    fn test_partial_toml_keeps_defaults() {
        let config: TomlConfig = toml::from_str(
            r#"
            root_folder = "/srv/mindwell"

            [engine]
            volume = 0.5
            chime_enabled = false

            [history]
            sync_chunk_size = 10
            "#,
        )
        .unwrap();
        assert_eq!(config.root_folder, Some(PathBuf::from("/srv/mindwell")));
        assert_eq!(config.engine.volume, 0.5);
        assert!(!config.engine.chime_enabled);
        assert_eq!(config.engine.fade_in_secs, 2.0);
        assert_eq!(config.history.sync_chunk_size, Some(10));
        assert_eq!(config.history.local_path, None);
    }

    #[test]
    #[serial]
    fn test_cli_argument_wins() {
        std::env::set_var(ROOT_FOLDER_ENV, "/from/env");
        let config = TomlConfig {
            root_folder: Some(PathBuf::from("/from/toml")),
            ..Default::default()
        };
        let resolved = resolve_root_folder(Some(Path::new("/from/cli")), &config);
        std::env::remove_var(ROOT_FOLDER_ENV);
        assert_eq!(resolved, PathBuf::from("/from/cli"));
    }

    #[test]
    #[serial]
    fn test_env_beats_toml() {
        std::env::set_var(ROOT_FOLDER_ENV, "/from/env");
        let config = TomlConfig {
            root_folder: Some(PathBuf::from("/from/toml")),
            ..Default::default()
        };
        let resolved = resolve_root_folder(None, &config);
        std::env::remove_var(ROOT_FOLDER_ENV);
        assert_eq!(resolved, PathBuf::from("/from/env"));
    }

    #[test]
    #[serial]
    fn test_falls_back_to_default() {
        std::env::remove_var(ROOT_FOLDER_ENV);
        let resolved = resolve_root_folder(None, &TomlConfig::default());
        assert_eq!(resolved, default_root_folder());
        assert!(!resolved.as_os_str().is_empty());
    }
}
