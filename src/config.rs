//! Bridge configuration.
//!
//! Values come from defaults, then an optional TOML file, then `PADBRIDGE_*`
//! environment variables. The file is looked up at `$PADBRIDGE_CONFIG`, or
//! `<config dir>/padbridge/config.toml` when that exists.
//!
//! ```toml
//! host = "127.0.0.1"
//! port = 7070
//! connect_retry_interval_secs = 3.0
//! axis_notify_interval_secs = 0.010
//! min_delta = 0.015
//! debug = false
//! device_family = "xbox360"
//! ```

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::bridge::BridgeSettings;
use crate::controller::event_collector::CollectorSettings;
use crate::controller::profile::DeviceFamily;
use crate::controller::stick_tracker::DEFAULT_MIN_DELTA;
use crate::stream::client::ClientSettings;

pub const CONFIG_ENV: &str = "PADBRIDGE_CONFIG";

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read {path}: {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("Failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("Invalid value for {key}: {value}")]
    InvalidValue { key: &'static str, value: String },
}

#[derive(Deserialize, Serialize, Clone, Debug, PartialEq)]
#[serde(default)]
pub struct BridgeConfig {
    /// Peer host
    pub host: String,
    /// Peer port
    pub port: u16,
    /// Seconds between reconnect attempts
    pub connect_retry_interval_secs: f64,
    /// Minimum seconds between two stick transmissions
    pub axis_notify_interval_secs: f64,
    /// Smallest per-axis change treated as signal
    pub min_delta: f32,
    /// Echo every outbound message in the log
    pub debug: bool,
    /// Force a profile instead of detecting it from the device name
    pub device_family: Option<DeviceFamily>,
    /// Open this device instead of scanning /dev/input
    pub device_path: Option<PathBuf>,
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 7070,
            connect_retry_interval_secs: 3.0,
            axis_notify_interval_secs: 0.010,
            min_delta: DEFAULT_MIN_DELTA,
            debug: false,
            device_family: None,
            device_path: None,
        }
    }
}

impl BridgeConfig {
    /// Loads file and environment configuration and validates the result.
    pub fn load() -> Result<Self, ConfigError> {
        let path = std::env::var_os(CONFIG_ENV)
            .map(PathBuf::from)
            .or_else(|| Self::default_path().filter(|p| p.exists()));

        let mut config = match path {
            Some(path) => {
                info!("Loading configuration from {}", path.display());
                Self::from_file(&path)?
            }
            None => {
                debug!("No configuration file, using defaults");
                Self::default()
            }
        };

        config.apply_env_overrides(|key| std::env::var(key).ok())?;
        config.validate()?;
        Ok(config)
    }

    pub fn default_path() -> Option<PathBuf> {
        dirs::config_dir().map(|dir| dir.join("padbridge").join("config.toml"))
    }

    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml_str(&content)
    }

    pub fn from_toml_str(content: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str(content)?)
    }

    /// Applies `PADBRIDGE_*` overrides read through `lookup`.
    pub fn apply_env_overrides<F>(&mut self, lookup: F) -> Result<(), ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(host) = lookup("PADBRIDGE_HOST") {
            self.host = host;
        }
        if let Some(port) = lookup("PADBRIDGE_PORT") {
            self.port = parse_value("PADBRIDGE_PORT", &port)?;
        }
        if let Some(secs) = lookup("PADBRIDGE_RETRY_SECS") {
            self.connect_retry_interval_secs = parse_value("PADBRIDGE_RETRY_SECS", &secs)?;
        }
        if let Some(secs) = lookup("PADBRIDGE_NOTIFY_SECS") {
            self.axis_notify_interval_secs = parse_value("PADBRIDGE_NOTIFY_SECS", &secs)?;
        }
        if let Some(delta) = lookup("PADBRIDGE_MIN_DELTA") {
            self.min_delta = parse_value("PADBRIDGE_MIN_DELTA", &delta)?;
        }
        if let Some(flag) = lookup("PADBRIDGE_DEBUG") {
            self.debug = matches!(
                flag.trim().to_ascii_lowercase().as_str(),
                "1" | "true" | "yes" | "on"
            );
        }
        if let Some(family) = lookup("PADBRIDGE_DEVICE") {
            let parsed = family
                .parse::<DeviceFamily>()
                .map_err(|_| ConfigError::InvalidValue {
                    key: "PADBRIDGE_DEVICE",
                    value: family.clone(),
                })?;
            self.device_family = Some(parsed);
        }
        Ok(())
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.port == 0 {
            return Err(ConfigError::InvalidValue {
                key: "port",
                value: self.port.to_string(),
            });
        }
        if !(0.0..1.0).contains(&self.min_delta) {
            return Err(ConfigError::InvalidValue {
                key: "min_delta",
                value: self.min_delta.to_string(),
            });
        }
        self.retry_interval()?;
        self.axis_notify_interval()?;
        Ok(())
    }

    pub fn retry_interval(&self) -> Result<Duration, ConfigError> {
        positive_secs("connect_retry_interval_secs", self.connect_retry_interval_secs)
    }

    pub fn axis_notify_interval(&self) -> Result<Duration, ConfigError> {
        positive_secs("axis_notify_interval_secs", self.axis_notify_interval_secs)
    }

    pub fn client_settings(&self) -> Result<ClientSettings, ConfigError> {
        Ok(ClientSettings {
            host: self.host.clone(),
            port: self.port,
            retry_interval: self.retry_interval()?,
            debug: self.debug,
        })
    }

    pub fn bridge_settings(&self) -> Result<BridgeSettings, ConfigError> {
        Ok(BridgeSettings {
            axis_notify_interval: self.axis_notify_interval()?,
            min_delta: self.min_delta,
        })
    }

    pub fn collector_settings(&self) -> CollectorSettings {
        CollectorSettings {
            device_path: self.device_path.clone(),
            forced_family: self.device_family,
        }
    }
}

fn parse_value<T: std::str::FromStr>(key: &'static str, raw: &str) -> Result<T, ConfigError> {
    raw.trim().parse().map_err(|_| ConfigError::InvalidValue {
        key,
        value: raw.to_string(),
    })
}

fn positive_secs(key: &'static str, secs: f64) -> Result<Duration, ConfigError> {
    match Duration::try_from_secs_f64(secs) {
        Ok(duration) if !duration.is_zero() => Ok(duration),
        _ => Err(ConfigError::InvalidValue {
            key,
            value: secs.to_string(),
        }),
    }
}
