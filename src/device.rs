// src/device.rs
//! Device model shared by the registry, the transport and status reporting

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::error::WardenError;

/// Last known relay state of a smart plug
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum PowerState {
    On,
    Off,
    #[default]
    Unknown,
}

impl PowerState {
    pub fn as_str(&self) -> &'static str {
        match self {
            PowerState::On => "ON",
            PowerState::Off => "OFF",
            PowerState::Unknown => "UNKNOWN",
        }
    }
}

impl fmt::Display for PowerState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Requested relay state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PowerCommand {
    On,
    Off,
}

impl PowerCommand {
    pub fn is_on(&self) -> bool {
        matches!(self, PowerCommand::On)
    }

    /// The state the device should report once the command is applied
    pub fn target_state(&self) -> PowerState {
        match self {
            PowerCommand::On => PowerState::On,
            PowerCommand::Off => PowerState::Off,
        }
    }
}

impl FromStr for PowerCommand {
    type Err = WardenError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "on" => Ok(PowerCommand::On),
            "off" => Ok(PowerCommand::Off),
            other => Err(WardenError::InvalidCommand(format!(
                "expected \"on\" or \"off\", got \"{}\"",
                other
            ))),
        }
    }
}

impl fmt::Display for PowerCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            PowerCommand::On => "ON",
            PowerCommand::Off => "OFF",
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ConnectionStatus {
    Connected,
    Disconnected,
}

impl From<bool> for ConnectionStatus {
    fn from(connected: bool) -> Self {
        if connected {
            ConnectionStatus::Connected
        } else {
            ConnectionStatus::Disconnected
        }
    }
}

/// Where a registry entry came from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DeviceOrigin {
    Scanned,
    Manual,
}

impl DeviceOrigin {
    pub fn label(&self) -> &'static str {
        match self {
            DeviceOrigin::Scanned => "BLE Device",
            DeviceOrigin::Manual => "Manual Device",
        }
    }
}

/// One logical device as presented to callers
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Device {
    pub id: String,
    pub name: String,
    pub origin: DeviceOrigin,
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(rename = "status")]
    pub connection_status: ConnectionStatus,
    #[serde(rename = "state")]
    pub power_state: PowerState,
    #[serde(with = "chrono::serde::ts_seconds")]
    pub last_seen: DateTime<Utc>,
}

impl Device {
    pub fn new(id: impl Into<String>, name: impl Into<String>, origin: DeviceOrigin) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            origin,
            kind: origin.label().to_string(),
            connection_status: ConnectionStatus::Disconnected,
            power_state: PowerState::Unknown,
            last_seen: Utc::now(),
        }
    }
}

/// Registry key for an address: ids compare case-insensitively
pub fn normalize_id(id: &str) -> String {
    id.trim().to_uppercase()
}
