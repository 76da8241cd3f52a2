use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::exif::ByteOrder;
use crate::exif::reader::DEFAULT_SOFTWARE;

/// Top-level configuration for metamorph.
///
/// Controls the AI suggestion service, how the codec writes EXIF, and
/// output behavior (dry run, backups, output directory). Missing keys in
/// the JSON take their default values.
///
/// # Loading
///
/// ```rust,no_run
/// use metamorph::config::Config;
///
/// // From a JSON file
/// let config = Config::load(Some("config.json".as_ref())).unwrap();
///
/// // Or use defaults and customize
/// let mut config = Config::default();
/// config.ai.gemini.api_key = "AIza...".into();
/// config.ai.gemini.enabled = true;
/// ```
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// AI service configurations.
    pub ai: AiServices,
    /// EXIF encoding options.
    pub codec: CodecConfig,
    /// Output behavior (dry run, backups, output directory).
    pub output: OutputConfig,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct AiServices {
    pub gemini: GeminiConfig,
}

/// Google Gemini service configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct GeminiConfig {
    pub api_key: String,
    pub model: String,
    pub enabled: bool,
}

impl Default for GeminiConfig {
    fn default() -> Self {
        Self {
            api_key: String::new(),
            model: "gemini-2.0-flash".to_string(),
            enabled: false,
        }
    }
}

/// How the codec lays out the TIFF structure it writes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CodecConfig {
    /// Byte order of the TIFF header and numeric fields.
    pub byte_order: ByteOrder,
    /// Reported as `software` when an image carries none.
    pub default_software: String,
}

impl Default for CodecConfig {
    fn default() -> Self {
        Self {
            byte_order: ByteOrder::Big,
            default_software: DEFAULT_SOFTWARE.to_string(),
        }
    }
}

/// Output and behavior configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct OutputConfig {
    /// If `true`, preview what would be written without modifying any files.
    pub dry_run: bool,
    /// If `true`, create a `.bak` backup before modifying an image in place.
    pub backup_originals: bool,
    /// Write results here, named after their title, instead of in place.
    pub out_dir: Option<String>,
}

impl Default for OutputConfig {
    fn default() -> Self {
        Self {
            dry_run: false,
            backup_originals: true,
            out_dir: None,
        }
    }
}

impl Config {
    /// Resolve the config file path, next to the executable.
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
            log::warn!(
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
    pub fn save(&self, path: Option<&Path>) -> Result<()> {
        let config_path = match path {
            Some(p) => p.to_path_buf(),
            None => Self::config_path()?,
        };

        let contents = serde_json::to_string_pretty(self).context("Failed to serialize config")?;
        std::fs::write(&config_path, contents).context("Failed to write config file")?;
        log::info!("Config saved to {}", config_path.display());
        Ok(())
    }

    /// Whether a suggestion service is enabled and has credentials.
    pub fn ai_enabled(&self) -> bool {
        let gemini = &self.ai.gemini;
        gemini.enabled && !gemini.api_key.trim().is_empty()
    }
}
