use anyhow::{Context, Result};
use dirs::config_dir;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::orchestrator::StartPolicy;
use crate::process::{OdoSettings, DEFAULT_READY_MARKER};

const APP_NAME: &str = "component-lifecycle";
const CONFIG_FILE: &str = "config.json";

pub const DEFAULT_PORT: u16 = 17020;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// The `odo` executable, looked up on `PATH` when not absolute.
    pub odo_binary: PathBuf,
    pub stop_timeout_secs: u64,
    pub probe_timeout_secs: u64,
    /// Start base features in debug mode.
    pub debug_by_default: bool,
    pub ready_marker: String,
    pub port: u16,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            odo_binary: PathBuf::from("odo"),
            stop_timeout_secs: 60,
            probe_timeout_secs: 30,
            debug_by_default: true,
            ready_marker: DEFAULT_READY_MARKER.to_string(),
            port: DEFAULT_PORT,
        }
    }
}

impl Config {
    /// Load configuration from the user's config directory, then apply
    /// environment overrides. Falls back to defaults when the file is missing
    /// or unreadable.
    pub fn load() -> Self {
        let mut config = match get_config_path().and_then(|path| Self::try_load(&path)) {
            Ok(config) => config,
            Err(e) => {
                tracing::warn!("Failed to load config, using defaults: {:#}", e);
                Self::default()
            }
        };
        config.apply_env(|key| std::env::var(key).ok());
        config
    }

    /// Read a config file. A missing file yields the defaults.
    pub fn try_load(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }

        let content = fs::read_to_string(path).context("Failed to read config file")?;

        let config = serde_json::from_str(&content).context("Failed to parse config file")?;

        Ok(config)
    }

    /// Save the configuration to the user's config directory.
    pub fn save(&self) -> Result<()> {
        self.save_to(&get_config_path()?)
    }

    pub fn save_to(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).context("Failed to create config directory")?;
        }

        let content = serde_json::to_string_pretty(self).context("Failed to serialize config")?;

        fs::write(path, content).context("Failed to write config file")?;

        Ok(())
    }

    /// Override fields from `CLC_*` variables. Unparsable values are ignored.
    pub fn apply_env(&mut self, var: impl Fn(&str) -> Option<String>) {
        if let Some(binary) = var("CLC_ODO_BINARY") {
            self.odo_binary = PathBuf::from(binary);
        }
        if let Some(secs) = parse_var(&var, "CLC_STOP_TIMEOUT_SECS") {
            self.stop_timeout_secs = secs;
        }
        if let Some(secs) = parse_var(&var, "CLC_PROBE_TIMEOUT_SECS") {
            self.probe_timeout_secs = secs;
        }
        if let Some(debug) = parse_var(&var, "CLC_DEBUG_BY_DEFAULT") {
            self.debug_by_default = debug;
        }
        if let Some(marker) = var("CLC_READY_MARKER") {
            self.ready_marker = marker;
        }
        if let Some(port) = parse_var(&var, "CLC_PORT") {
            self.port = port;
        }
    }

    pub fn odo_settings(&self) -> OdoSettings {
        OdoSettings {
            binary: self.odo_binary.clone(),
            probe_timeout: Duration::from_secs(self.probe_timeout_secs),
            stop_timeout: Duration::from_secs(self.stop_timeout_secs),
            ready_marker: self.ready_marker.clone(),
        }
    }

    pub fn start_policy(&self) -> StartPolicy {
        StartPolicy {
            debug_by_default: self.debug_by_default,
        }
    }
}

fn parse_var<T: std::str::FromStr>(
    var: &impl Fn(&str) -> Option<String>,
    key: &str,
) -> Option<T> {
    let raw = var(key)?;
    match raw.trim().parse() {
        Ok(value) => Some(value),
        Err(_) => {
            tracing::warn!("Ignoring {}={:?}: not a valid value", key, raw);
            None
        }
    }
}

pub fn get_config_path() -> Result<PathBuf> {
    let mut path =
        config_dir().ok_or_else(|| anyhow::anyhow!("Could not determine config directory"))?;
    path.push(APP_NAME);
    path.push(CONFIG_FILE);
    Ok(path)
}
