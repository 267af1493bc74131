//! Application configuration loading from config.toml
//!
//! `config.toml` supplies defaults for settings that have never been written to the
//! settings store, and optionally overrides the free tier limits. Every section is
//! optional; a missing file yields the built-in defaults.

use crate::{
    core::feature_gate::FreeTierLimits,
    errors::{Error, Result},
};
use serde::Deserialize;
use std::path::Path;
use tracing::{debug, info};

/// Configuration structure representing the entire config.toml file
#[derive(Debug, Default, Deserialize)]
pub struct AppConfig {
    /// Defaults for settings missing from the settings store
    #[serde(default)]
    pub settings: SettingsDefaults,
    /// Free tier limits
    #[serde(default)]
    pub free_tier: FreeTierLimits,
}

/// Defaults used before the user changes a setting
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct SettingsDefaults {
    /// Renewal day (0 = last day of month, 1..=28)
    pub renewal_day: i64,
    /// ISO 4217 currency code
    pub currency_code: String,
    /// Whether cloud sync starts enabled
    pub cloud_sync_enabled: bool,
    /// UI language code
    pub language: String,
}

impl Default for SettingsDefaults {
    fn default() -> Self {
        Self {
            renewal_day: 1,
            currency_code: "KRW".to_string(),
            cloud_sync_enabled: false,
            language: "ko".to_string(),
        }
    }
}

/// Loads configuration from a TOML file
///
/// # Errors
/// Returns an error if:
/// - The file cannot be read
/// - The TOML syntax is invalid
pub fn load_config<P: AsRef<Path>>(path: P) -> Result<AppConfig> {
    debug!("Attempting to load configuration from: {:?}", path.as_ref());
    let contents = std::fs::read_to_string(path.as_ref()).map_err(|e| Error::Config {
        message: format!("Failed to read config file: {e}"),
    })?;

    toml::from_str(&contents).map_err(|e| Error::Config {
        message: format!("Failed to parse config.toml: {e}"),
    })
}

/// Loads configuration from the default location (./config.toml), falling back to the
/// built-in defaults when the file does not exist.
pub fn load_default_config() -> Result<AppConfig> {
    let path = Path::new("config.toml");
    if !path.exists() {
        info!("No config.toml found, using built-in defaults");
        return Ok(AppConfig::default());
    }
    load_config(path)
}
