//! Configuration management for geotrace.
//!
//! Configuration loading and validation using figment, supporting TOML
//! config files, environment variables, and defaults.

use std::path::PathBuf;
use std::time::Duration;

use figment::{
    providers::{Env, Format, Serialized, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};
use url::Url;

use crate::capture::FixOptions;
use crate::error::{Error, Result};

/// Default configuration file name.
const CONFIG_FILE_NAME: &str = "config.toml";

/// Default data directory name.
const DATA_DIR_NAME: &str = "geotrace";

/// Default registry database file name.
const DATABASE_FILE_NAME: &str = "registry.db";

/// Application configuration.
///
/// Configuration is loaded from (in order of precedence, highest first):
/// 1. Environment variables (prefixed with `GEOTRACE_`)
/// 2. TOML config file at `~/.config/geotrace/config.toml`
/// 3. Default values
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Registry (local store) configuration.
    pub registry: RegistryConfig,
    /// Capture engine configuration.
    pub capture: CaptureConfig,
    /// Reverse-geocoding configuration.
    pub enrichment: EnrichmentConfig,
    /// Telemetry collector configuration.
    pub collector: CollectorConfig,
    /// Command channel configuration.
    pub command: CommandConfig,
    /// Device descriptor overrides.
    pub device: DeviceConfig,
}

/// Registry-related configuration.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RegistryConfig {
    /// Path to the registry database file.
    /// Defaults to `~/.local/share/geotrace/registry.db`
    pub database_path: Option<PathBuf>,
}

/// Capture-related configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CaptureConfig {
    /// Bounded wait per fix request, in milliseconds.
    pub fix_timeout_ms: u64,
    /// Maximum acceptable fix age in milliseconds. Zero disallows cached
    /// fixes entirely.
    pub max_staleness_ms: u64,
    /// Request the most accurate position available.
    pub high_accuracy: bool,
    /// Run silently: classified failures and duration ticks are discarded
    /// instead of surfaced.
    pub silent: bool,
    /// Interval between replayed fixes, in milliseconds.
    pub replay_interval_ms: u64,
}

/// Enrichment-related configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EnrichmentConfig {
    /// Reverse-geocoding endpoint.
    pub endpoint: String,
    /// Lookup timeout in milliseconds.
    pub timeout_ms: u64,
}

/// Collector-related configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CollectorConfig {
    /// Telemetry collector endpoint.
    pub endpoint: String,
    /// Delivery timeout in milliseconds.
    pub timeout_ms: u64,
}

/// Command-channel configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CommandConfig {
    /// Period between registry polls, in seconds. Bounds the latency of
    /// admin-issued stop commands.
    pub poll_interval_secs: u64,
}

/// Device descriptor overrides. Unset fields fall back to detection.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DeviceConfig {
    /// Short descriptor shown in the admin view.
    pub descriptor: Option<String>,
    /// Agent string sent with submissions.
    pub user_agent: Option<String>,
    /// Reported display resolution.
    pub screen_resolution: Option<String>,
    /// Preferred language tag.
    pub language: Option<String>,
    /// IANA timezone name.
    pub timezone: Option<String>,
}

impl Default for CaptureConfig {
    fn default() -> Self {
        Self {
            fix_timeout_ms: 8_000,
            max_staleness_ms: 0,
            high_accuracy: true,
            silent: false,
            replay_interval_ms: 5_000,
        }
    }
}

impl Default for EnrichmentConfig {
    fn default() -> Self {
        Self {
            endpoint: "https://nominatim.openstreetmap.org/reverse".to_string(),
            timeout_ms: 5_000,
        }
    }
}

impl Default for CollectorConfig {
    fn default() -> Self {
        Self {
            endpoint: "https://collector.example/ingest".to_string(),
            timeout_ms: 10_000,
        }
    }
}

impl Default for CommandConfig {
    fn default() -> Self {
        Self {
            poll_interval_secs: 10,
        }
    }
}

impl Config {
    /// Load configuration from all sources.
    ///
    /// # Errors
    ///
    /// Returns an error if configuration loading or parsing fails.
    pub fn load() -> Result<Self> {
        Self::load_from(None)
    }

    /// Load configuration with an optional custom config path.
    ///
    /// # Errors
    ///
    /// Returns an error if configuration loading or parsing fails.
    pub fn load_from(config_path: Option<PathBuf>) -> Result<Self> {
        let config_file = config_path.unwrap_or_else(Self::default_config_path);

        let figment = Figment::new()
            .merge(Serialized::defaults(Config::default()))
            .merge(Toml::file(&config_file).nested())
            .merge(Env::prefixed("GEOTRACE_").split("_"));

        let config: Config = figment.extract()?;
        config.validate()?;
        Ok(config)
    }

    /// Get the default configuration file path.
    #[must_use]
    pub fn default_config_path() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from(".config"))
            .join(DATA_DIR_NAME)
            .join(CONFIG_FILE_NAME)
    }

    /// Get the default data directory path.
    #[must_use]
    pub fn default_data_dir() -> PathBuf {
        dirs::data_local_dir()
            .unwrap_or_else(|| PathBuf::from(".local/share"))
            .join(DATA_DIR_NAME)
    }

    /// Validate the configuration.
    ///
    /// # Errors
    ///
    /// Returns an error if any configuration values are invalid.
    pub fn validate(&self) -> Result<()> {
        if self.capture.fix_timeout_ms == 0 {
            return Err(Error::ConfigValidation {
                message: "fix_timeout_ms must be greater than 0".to_string(),
            });
        }

        if self.capture.replay_interval_ms == 0 {
            return Err(Error::ConfigValidation {
                message: "replay_interval_ms must be greater than 0".to_string(),
            });
        }

        if self.command.poll_interval_secs == 0 {
            return Err(Error::ConfigValidation {
                message: "poll_interval_secs must be greater than 0".to_string(),
            });
        }

        if self.enrichment.timeout_ms == 0 || self.collector.timeout_ms == 0 {
            return Err(Error::ConfigValidation {
                message: "timeout_ms must be greater than 0".to_string(),
            });
        }

        for (name, endpoint) in [
            ("enrichment.endpoint", &self.enrichment.endpoint),
            ("collector.endpoint", &self.collector.endpoint),
        ] {
            let url = Url::parse(endpoint).map_err(|err| Error::ConfigValidation {
                message: format!("invalid {name} '{endpoint}': {err}"),
            })?;
            if url.scheme() != "http" && url.scheme() != "https" {
                return Err(Error::ConfigValidation {
                    message: format!("{name} must use http or https"),
                });
            }
        }

        Ok(())
    }

    /// Get the registry database path, resolving defaults if not set.
    #[must_use]
    pub fn database_path(&self) -> PathBuf {
        self.registry
            .database_path
            .clone()
            .unwrap_or_else(|| Self::default_data_dir().join(DATABASE_FILE_NAME))
    }

    /// Get the capture fix options.
    #[must_use]
    pub fn fix_options(&self) -> FixOptions {
        FixOptions {
            timeout: Duration::from_millis(self.capture.fix_timeout_ms),
            max_staleness: Duration::from_millis(self.capture.max_staleness_ms),
            high_accuracy: self.capture.high_accuracy,
        }
    }

    /// Get the replay interval as a Duration.
    #[must_use]
    pub fn replay_interval(&self) -> Duration {
        Duration::from_millis(self.capture.replay_interval_ms)
    }

    /// Get the enrichment lookup timeout as a Duration.
    #[must_use]
    pub fn enrichment_timeout(&self) -> Duration {
        Duration::from_millis(self.enrichment.timeout_ms)
    }

    /// Get the collector delivery timeout as a Duration.
    #[must_use]
    pub fn collector_timeout(&self) -> Duration {
        Duration::from_millis(self.collector.timeout_ms)
    }

    /// Get the command poll period as a Duration.
    #[must_use]
    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.command.poll_interval_secs)
    }

    /// Build the device descriptors, applying configured overrides.
    #[must_use]
    pub fn device_info(&self) -> crate::sample::DeviceInfo {
        let mut device = crate::sample::DeviceInfo::default();
        if let Some(descriptor) = &self.device.descriptor {
            device.descriptor = descriptor.clone();
        }
        if let Some(user_agent) = &self.device.user_agent {
            device.user_agent = user_agent.clone();
        }
        if let Some(resolution) = &self.device.screen_resolution {
            device.screen_resolution = resolution.clone();
        }
        if let Some(language) = &self.device.language {
            device.language = language.clone();
        }
        if let Some(timezone) = &self.device.timezone {
            device.timezone = timezone.clone();
        }
        device
    }
}
