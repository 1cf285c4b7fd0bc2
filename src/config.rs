// src/config.rs
//! YAML configuration with defaults for every field

use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};
use std::time::Duration;
use uuid::Uuid;

use crate::error::{Result, WardenError};
use crate::util::io::gatt_transport::RpcEndpoints;

pub const CONFIG_ENV_VAR: &str = "OUTAGE_WARDEN_CONFIG";
pub const DEFAULT_CONFIG_PATH: &str = "./warden.yml";

const DEFAULT_CONTROL_UUID: Uuid = Uuid::from_u128(0x5f6d4f53_5f52_5043_5f74_785f63746c5f);
const DEFAULT_DATA_UUID: Uuid = Uuid::from_u128(0x5f6d4f53_5f52_5043_5f64_6174615f5f5f);

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub monitor: MonitorConfig,
    pub bluetooth: BluetoothConfig,
    pub connectivity: ConnectivityConfig,
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MonitorConfig {
    pub check_interval_secs: u64,
    pub offline_threshold_minutes: u32,
    pub power_cycle_delay_minutes: u32,
    pub target_device_id: String,
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            check_interval_secs: 300,
            offline_threshold_minutes: 5,
            power_cycle_delay_minutes: 2,
            target_device_id: String::new(),
        }
    }
}

impl MonitorConfig {
    pub fn check_interval(&self) -> Duration {
        Duration::from_secs(self.check_interval_secs)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BluetoothConfig {
    /// Characteristic receiving the length prefix
    pub control_uuid: Uuid,
    /// Characteristic receiving payload chunks and holding the response
    pub data_uuid: Uuid,
    /// Scanned peripherals are listed only if their name contains this (case-insensitive)
    pub name_filter: String,
}

impl Default for BluetoothConfig {
    fn default() -> Self {
        Self {
            control_uuid: DEFAULT_CONTROL_UUID,
            data_uuid: DEFAULT_DATA_UUID,
            name_filter: "shelly".to_string(),
        }
    }
}

impl BluetoothConfig {
    pub fn endpoints(&self) -> RpcEndpoints {
        RpcEndpoints {
            control: self.control_uuid,
            data: self.data_uuid,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ConnectivityConfig {
    pub probe_host: String,
    pub probe_port: u16,
    pub timeout_secs: u64,
}

impl Default for ConnectivityConfig {
    fn default() -> Self {
        Self {
            probe_host: "google.com".to_string(),
            probe_port: 443,
            timeout_secs: 5,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    pub dir: PathBuf,
    pub debug: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            dir: PathBuf::from("./logs"),
            debug: false,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidationError {
    pub field: String,
    pub error: String,
}

impl fmt::Display for ValidationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.field, self.error)
    }
}

impl AppConfig {
    pub fn from_yaml(yaml: &str) -> Result<Self> {
        Ok(serde_yaml::from_str(yaml)?)
    }

    /// Load `path`; a missing file yields the defaults
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }

        let content = std::fs::read_to_string(path)?;
        let config = Self::from_yaml(&content)?;

        let errors = config.validate();
        if !errors.is_empty() {
            let joined = errors.iter().map(|e| e.to_string()).collect::<Vec<_>>().join("; ");
            return Err(WardenError::Config(format!("{}: {}", path.display(), joined)));
        }

        Ok(config)
    }

    /// First CLI argument, then the environment, then the default path
    pub fn resolve_path(cli_arg: Option<String>) -> PathBuf {
        cli_arg
            .or_else(|| std::env::var(CONFIG_ENV_VAR).ok())
            .map(PathBuf::from)
            .unwrap_or_else(|| PathBuf::from(DEFAULT_CONFIG_PATH))
    }

    pub fn validate(&self) -> Vec<ValidationError> {
        let mut errors = Vec::new();
        let mut reject = |field: &str, error: &str| {
            errors.push(ValidationError {
                field: field.to_string(),
                error: error.to_string(),
            })
        };

        if self.monitor.check_interval_secs == 0 {
            reject("monitor.check_interval_secs", "must be greater than zero");
        }
        if self.bluetooth.control_uuid == self.bluetooth.data_uuid {
            reject("bluetooth.data_uuid", "must differ from control_uuid");
        }
        if self.connectivity.probe_host.trim().is_empty() {
            reject("connectivity.probe_host", "must not be empty");
        }
        if self.connectivity.timeout_secs == 0 {
            reject("connectivity.timeout_secs", "must be greater than zero");
        }

        errors
    }
}
