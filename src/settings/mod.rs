//! Settings for the identity store itself: where identity files live and
//! how the watcher behaves.
//!
//! Settings are layered, lowest to highest: built-in defaults, then
//! `<config dir>/settings.yaml`, then environment variables. The config
//! directory is `IDENTITY_CASCADE_DIR` if set, otherwise
//! `<platform config dir>/identity-cascade`.

pub mod merge;

use crate::registry::IdentityPaths;
use crate::watcher::WatcherConfig;
use anyhow::{Context, Result};
use merge::merge_layers;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{debug, warn};

pub const SETTINGS_FILE: &str = "settings.yaml";

pub const ENV_DIR: &str = "IDENTITY_CASCADE_DIR";
pub const ENV_IDENTITIES_DIR: &str = "IDENTITY_CASCADE_IDENTITIES_DIR";
pub const ENV_DEBOUNCE_MS: &str = "IDENTITY_CASCADE_DEBOUNCE_MS";

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Settings {
    #[serde(default)]
    pub paths: PathSettings,

    #[serde(default)]
    pub watcher: WatcherSettings,
}

/// Locations of persisted identities. Relative paths are resolved against
/// the config directory.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PathSettings {
    #[serde(default = "default_identities_dir")]
    pub identities_dir: PathBuf,

    #[serde(default = "default_global_config")]
    pub global_config: PathBuf,
}

impl Default for PathSettings {
    fn default() -> Self {
        Self {
            identities_dir: default_identities_dir(),
            global_config: default_global_config(),
        }
    }
}

fn default_identities_dir() -> PathBuf {
    PathBuf::from("identities")
}

fn default_global_config() -> PathBuf {
    PathBuf::from("global.yaml")
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WatcherSettings {
    /// Reload identities when their files change on disk.
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// Quiet period before a burst of file events is processed.
    #[serde(default = "default_debounce_ms")]
    pub debounce_ms: u64,
}

impl Default for WatcherSettings {
    fn default() -> Self {
        Self {
            enabled: true,
            debounce_ms: default_debounce_ms(),
        }
    }
}

fn default_true() -> bool {
    true
}

fn default_debounce_ms() -> u64 {
    500
}

/// Loads [`Settings`] for one config directory.
#[derive(Debug, Clone)]
pub struct SettingsLoader {
    config_dir: PathBuf,
    settings: Settings,
    settings_path: Option<PathBuf>,
}

impl SettingsLoader {
    /// Load from the discovered config directory, applying environment
    /// overrides.
    pub fn load() -> Result<Self> {
        let mut loader = Self::load_from(discover_config_dir())?;
        loader.apply_overrides(|name| std::env::var(name).ok());
        Ok(loader)
    }

    /// Load defaults merged with `<config_dir>/settings.yaml`, if present.
    pub fn load_from(config_dir: PathBuf) -> Result<Self> {
        let mut layers: Vec<Value> = vec![serde_json::to_value(Settings::default())?];

        let file = config_dir.join(SETTINGS_FILE);
        let mut settings_path = None;
        if file.exists() {
            let content = std::fs::read_to_string(&file)
                .with_context(|| format!("reading {}", file.display()))?;
            match serde_yaml::from_str::<Value>(&content) {
                Ok(layer) => {
                    layers.push(layer);
                    settings_path = Some(file);
                }
                Err(e) => warn!(path = %file.display(), error = %e, "Ignoring unreadable settings file"),
            }
        }

        let settings: Settings = serde_json::from_value(merge_layers(layers))
            .context("settings file has the wrong shape")?;
        debug!(config_dir = %config_dir.display(), ?settings, "Loaded settings");

        Ok(Self {
            config_dir,
            settings,
            settings_path,
        })
    }

    /// Apply environment-style overrides from `lookup`.
    pub fn apply_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        if let Some(dir) = lookup(ENV_IDENTITIES_DIR) {
            self.settings.paths.identities_dir = PathBuf::from(dir);
        }

        if let Some(ms) = lookup(ENV_DEBOUNCE_MS) {
            match ms.trim().parse() {
                Ok(ms) => self.settings.watcher.debounce_ms = ms,
                Err(_) => warn!(value = %ms, "Ignoring invalid {}", ENV_DEBOUNCE_MS),
            }
        }
    }

    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    pub fn settings_mut(&mut self) -> &mut Settings {
        &mut self.settings
    }

    pub fn config_dir(&self) -> &Path {
        &self.config_dir
    }

    /// The settings file that was read, if any.
    pub fn settings_path(&self) -> Option<&Path> {
        self.settings_path.as_deref()
    }

    pub fn identity_paths(&self) -> IdentityPaths {
        IdentityPaths {
            identities_dir: Some(self.resolve(&self.settings.paths.identities_dir)),
            global_config: Some(self.resolve(&self.settings.paths.global_config)),
        }
    }

    pub fn watcher_config(&self) -> WatcherConfig {
        WatcherConfig {
            debounce_duration: Duration::from_millis(self.settings.watcher.debounce_ms),
            watch_identities: self.settings.watcher.enabled,
            watch_global: self.settings.watcher.enabled,
        }
    }

    fn resolve(&self, path: &Path) -> PathBuf {
        if path.is_absolute() {
            path.to_path_buf()
        } else {
            self.config_dir.join(path)
        }
    }
}

/// `IDENTITY_CASCADE_DIR`, else the platform config directory.
pub fn discover_config_dir() -> PathBuf {
    std::env::var(ENV_DIR)
        .ok()
        .map(PathBuf::from)
        .or_else(|| dirs::config_dir().map(|dir| dir.join("identity-cascade")))
        .unwrap_or_else(|| PathBuf::from(".identity-cascade"))
}
