//! Configuration management for fakeloc.
//!
//! This module provides configuration loading and validation using figment,
//! supporting TOML config files, environment variables, and defaults.

use std::fmt;
use std::path::PathBuf;
use std::time::Duration;

use figment::{
    providers::{Env, Format, Serialized, Toml},
    Figment,
};
use idevice::usbmuxd::UsbmuxdAddr;
use serde::{Deserialize, Serialize};

use crate::device;
use crate::error::{Error, Result};

/// Default configuration file name.
const CONFIG_FILE_NAME: &str = "config.toml";

/// Default configuration directory name.
const CONFIG_DIR_NAME: &str = "fakeloc";

/// Label sent to usbmuxd and lockdownd.
pub const DEFAULT_LABEL: &str = "fakeloc";

/// Services that accept the location simulation message, in the order they
/// are tried.
pub const DEFAULT_SERVICES: [&str; 3] = [
    "com.apple.instruments.remoteserver",
    "com.apple.dt.simulatelocation",
    "com.apple.instruments.remoteserver.DVTSecureSocketProxy",
];

/// Application configuration.
///
/// Configuration is loaded from (in order of precedence, highest first):
/// 1. Environment variables (prefixed with `FAKELOC_`)
/// 2. TOML config file at `~/.config/fakeloc/config.toml`
/// 3. Default values
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Device selection.
    pub device: DeviceConfig,
    /// Simulation settings.
    pub simulation: SimulationConfig,
}

/// How a device is looked up.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Connection {
    /// Look the device up over USB.
    #[default]
    Usb,
    /// Look the device up over Wi-Fi.
    Network,
}

impl fmt::Display for Connection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.pad(match self {
            Self::Usb => "usb",
            Self::Network => "network",
        })
    }
}

/// Device-related configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DeviceConfig {
    /// UDID of the device to use. The first attached device when unset.
    pub udid: Option<String>,
    /// How to look the device up.
    pub connection: Connection,
    /// usbmuxd address, `UNIX:/path` or `host:port`.
    /// Defaults to `USBMUXD_SOCKET_ADDRESS` or the platform socket.
    pub usbmuxd_address: Option<String>,
    /// Label identifying this client to the device.
    pub label: String,
}

/// Simulation-related configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SimulationConfig {
    /// Candidate service names, tried in order.
    pub services: Vec<String>,
    /// Upper bound for the whole device conversation, in milliseconds.
    pub timeout_ms: u64,
}

impl Default for DeviceConfig {
    fn default() -> Self {
        Self {
            udid: None,
            connection: Connection::Usb,
            usbmuxd_address: None,
            label: DEFAULT_LABEL.to_string(),
        }
    }
}

impl Default for SimulationConfig {
    fn default() -> Self {
        Self {
            services: DEFAULT_SERVICES.iter().map(ToString::to_string).collect(),
            timeout_ms: 10_000,
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
            .merge(Toml::file(&config_file))
            .merge(Env::prefixed("FAKELOC_").split("__"));

        let config: Config = figment.extract()?;
        config.validate()?;
        Ok(config)
    }

    /// Get the default configuration file path.
    #[must_use]
    pub fn default_config_path() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from(".config"))
            .join(CONFIG_DIR_NAME)
            .join(CONFIG_FILE_NAME)
    }

    /// Validate the configuration.
    ///
    /// # Errors
    ///
    /// Returns an error if any configuration values are invalid.
    pub fn validate(&self) -> Result<()> {
        if self.simulation.services.is_empty() {
            return Err(Error::ConfigValidation {
                message: "simulation.services must name at least one service".to_string(),
            });
        }

        if self.simulation.services.iter().any(|s| s.trim().is_empty()) {
            return Err(Error::ConfigValidation {
                message: "simulation.services cannot contain blank names".to_string(),
            });
        }

        if self.simulation.timeout_ms == 0 {
            return Err(Error::ConfigValidation {
                message: "timeout_ms must be greater than 0".to_string(),
            });
        }

        if self.device.label.trim().is_empty() {
            return Err(Error::ConfigValidation {
                message: "device.label cannot be empty".to_string(),
            });
        }

        if let Some(addr) = &self.device.usbmuxd_address {
            device::parse_addr(addr).map_err(|_| Error::ConfigValidation {
                message: format!("invalid usbmuxd_address: {addr}"),
            })?;
        }

        Ok(())
    }

    /// Get the usbmuxd address, resolving defaults if not set.
    #[must_use]
    pub fn usbmuxd_addr(&self) -> UsbmuxdAddr {
        self.device
            .usbmuxd_address
            .as_deref()
            .and_then(|a| device::parse_addr(a).ok())
            .unwrap_or_else(device::addr_from_env)
    }

    /// Get the timeout as a Duration.
    #[must_use]
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.simulation.timeout_ms)
    }
}
