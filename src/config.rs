use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::ai::{DEFAULT_ENDPOINT, DEFAULT_TEMPERATURE};

/// Top-level configuration.
///
/// Every field has a default, so a config file only needs the values it
/// changes. CLI flags override what is loaded here.
///
/// ```rust
/// use exif_describe::config::Config;
///
/// let config: Config = serde_json::from_str(r#"{ "inference": { "model": "llava:13b" } }"#).unwrap();
/// assert_eq!(config.inference.model, "llava:13b");
/// assert_eq!(config.inference.timeout_secs, 180);
/// ```
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub inference: InferenceConfig,
    pub output: OutputConfig,
}

/// Settings for the local model endpoint.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct InferenceConfig {
    /// Base URL of the Ollama-compatible server.
    pub endpoint: String,
    /// Model identifier passed with every request.
    pub model: String,
    /// Per-image timeout; the file is skipped when it elapses.
    pub timeout_secs: u64,
    pub temperature: f32,
}

/// Naming of derived files when no output directory is given.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct OutputConfig {
    /// Inserted before the extension by `update`.
    pub edited_suffix: String,
    /// Inserted before the extension by `tag`.
    pub tag_suffix: String,
}

impl Default for InferenceConfig {
    fn default() -> Self {
        Self {
            endpoint: DEFAULT_ENDPOINT.to_string(),
            model: "gemma3:latest".to_string(),
            timeout_secs: 180,
            temperature: DEFAULT_TEMPERATURE,
        }
    }
}

impl Default for OutputConfig {
    fn default() -> Self {
        Self {
            edited_suffix: "_edited".to_string(),
            tag_suffix: "_exif".to_string(),
        }
    }
}

impl InferenceConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

impl Config {
    /// Resolve the config file path: `config.json` next to the executable.
    pub fn config_path() -> Result<PathBuf> {
        let exe_path = std::env::current_exe().context("Failed to get executable path")?;
        let exe_dir = exe_path
            .parent()
            .context("Failed to get executable directory")?;
        Ok(exe_dir.join("config.json"))
    }

    /// Load config from the given path, or from the default location.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let config_path = match path {
            Some(p) => p.to_path_buf(),
            None => Self::config_path()?,
        };

        if !config_path.exists() {
            log::debug!(
                "Config file not found at {}. Using defaults.",
                config_path.display()
            );
            return Ok(Self::default());
        }

        let contents =
            std::fs::read_to_string(&config_path).context("Failed to read config file")?;
        let config: Config =
            serde_json::from_str(&contents).context("Failed to parse config file")?;
        Ok(config)
    }

    /// Save config to the given path, or to the default location.
    pub fn save(&self, path: Option<&Path>) -> Result<PathBuf> {
        let config_path = match path {
            Some(p) => p.to_path_buf(),
            None => Self::config_path()?,
        };

        let contents = serde_json::to_string_pretty(self).context("Failed to serialize config")?;
        std::fs::write(&config_path, contents).context("Failed to write config file")?;
        log::info!("Config saved to {}", config_path.display());
        Ok(config_path)
    }
}
