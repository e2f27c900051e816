//! Configuration management.
//!
//! Handles loading, saving, and validating configuration from
//! platform-specific config directories.

use crate::error::ConfigError;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Application name used for config directory.
const APP_NAME: &str = "Michinoeki";

/// Default config filename.
const CONFIG_FILENAME: &str = "config.toml";

/// Placeholder value for unconfigured API keys.
const API_KEY_PLACEHOLDER: &str = "YOUR_API_KEY_HERE";

/// Main configuration structure.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Station directory site settings.
    pub source: SourceConfig,

    /// Geocoding service settings.
    pub geocoding: GeocodingConfig,

    /// File paths.
    pub paths: PathsConfig,
}

/// Station directory site configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SourceConfig {
    /// Top page of the station directory; also the base for relative links.
    pub base_url: String,

    /// Minimum delay between page requests in seconds.
    pub delay_between_requests_sec: f64,
}

impl Default for SourceConfig {
    fn default() -> Self {
        Self {
            base_url: "https://www.michi-no-eki.jp/".to_string(),
            delay_between_requests_sec: 1.0,
        }
    }
}

/// Supported geocoding services.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum GeocoderProvider {
    /// GSI address search (no key required).
    #[default]
    Gsi,
    /// Google Geocoding API.
    Google,
}

/// A raw → corrected address substitution applied before geocoding.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AddressCorrection {
    pub from: String,
    pub to: String,
}

/// Geocoding configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GeocodingConfig {
    /// Which service to query.
    pub provider: GeocoderProvider,

    /// API key (required for Google).
    pub api_key: String,

    /// Prefix for the name-based last-resort query.
    pub name_query_prefix: String,

    /// Take coordinates from the map link on the detail page when present.
    pub use_map_link_coordinates: bool,

    /// Delay before each geocoding request in seconds.
    pub delay_between_requests_sec: f64,

    /// Known address irregularities.
    pub address_corrections: Vec<AddressCorrection>,
}

impl Default for GeocodingConfig {
    fn default() -> Self {
        Self {
            provider: GeocoderProvider::default(),
            api_key: API_KEY_PLACEHOLDER.to_string(),
            name_query_prefix: "道の駅".to_string(),
            use_map_link_coordinates: true,
            delay_between_requests_sec: 0.2,
            address_corrections: vec![AddressCorrection {
                // 道の駅 土佐さめうら
                from: "土佐町田井字桜ヶ内".to_string(),
                to: "土佐町田井字".to_string(),
            }],
        }
    }
}

impl GeocodingConfig {
    /// Checks if the API key is configured (not placeholder).
    pub fn has_api_key(&self) -> bool {
        !self.api_key.is_empty() && self.api_key != API_KEY_PLACEHOLDER
    }
}

/// File path configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PathsConfig {
    /// Tab-separated station registry.
    pub registry_file: PathBuf,

    /// GeoJSON export destination.
    pub geojson_file: PathBuf,
}

impl Default for PathsConfig {
    fn default() -> Self {
        Self {
            registry_file: PathBuf::from("data/stations.csv"),
            geojson_file: PathBuf::from("data/stations.geojson"),
        }
    }
}

impl Config {
    /// Returns the platform-specific config directory path.
    pub fn config_dir() -> Result<PathBuf, ConfigError> {
        dirs::config_dir()
            .map(|p| p.join(APP_NAME))
            .ok_or(ConfigError::NoConfigDir)
    }

    /// Returns the full path to the config file.
    pub fn config_path() -> Result<PathBuf, ConfigError> {
        Ok(Self::config_dir()?.join(CONFIG_FILENAME))
    }

    /// Loads configuration from the default location.
    ///
    /// If the config file doesn't exist, creates a default one.
    pub fn load() -> Result<Self, ConfigError> {
        let path = Self::config_path()?;
        Self::load_from(&path)
    }

    /// Loads configuration from a specific path.
    pub fn load_from(path: &Path) -> Result<Self, ConfigError> {
        if !path.exists() {
            let config = Config::default();
            config.save_to(path)?;
            return Ok(config);
        }

        let content = std::fs::read_to_string(path)?;
        let config: Config =
            toml::from_str(&content).map_err(|e| ConfigError::ParseError(e.to_string()))?;

        Ok(config)
    }

    /// Saves configuration to a specific path.
    pub fn save_to(&self, path: &Path) -> Result<(), ConfigError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let content =
            toml::to_string_pretty(self).map_err(|e| ConfigError::ParseError(e.to_string()))?;

        std::fs::write(path, content)?;
        Ok(())
    }

    /// Validates the configuration.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if let Err(e) = url::Url::parse(&self.source.base_url) {
            return Err(ConfigError::InvalidValue {
                key: "source.base_url".to_string(),
                message: e.to_string(),
            });
        }

        check_delay(
            "source.delay_between_requests_sec",
            self.source.delay_between_requests_sec,
        )?;
        check_delay(
            "geocoding.delay_between_requests_sec",
            self.geocoding.delay_between_requests_sec,
        )?;

        if self.geocoding.provider == GeocoderProvider::Google && !self.geocoding.has_api_key() {
            return Err(ConfigError::MissingValue(
                "geocoding.api_key (required for the google provider)".to_string(),
            ));
        }

        if let Some(c) = self
            .geocoding
            .address_corrections
            .iter()
            .find(|c| c.from.is_empty())
        {
            return Err(ConfigError::InvalidValue {
                key: "geocoding.address_corrections".to_string(),
                message: format!("empty 'from' for correction to '{}'", c.to),
            });
        }

        Ok(())
    }

    /// Delay between page requests. Zero for a value `validate` would reject.
    pub fn fetch_delay(&self) -> Duration {
        Duration::try_from_secs_f64(self.source.delay_between_requests_sec).unwrap_or_default()
    }
}

fn check_delay(key: &str, value: f64) -> Result<(), ConfigError> {
    Duration::try_from_secs_f64(value)
        .map(|_| ())
        .map_err(|e| ConfigError::InvalidValue {
            key: key.to_string(),
            message: format!("must be a non-negative number of seconds ({})", e),
        })
}
