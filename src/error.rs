use thiserror::Error;
use uuid::Uuid;

#[derive(Error, Debug)]
pub enum WardenError {
    #[error("Device {0} not found. Ensure it is scanned.")]
    DeviceNotFound(String),

    #[error("Could not find characteristics ({control} / {data}). Ensure device exposes them.")]
    CharacteristicsNotFound { control: Uuid, data: Uuid },

    #[error("Characteristic write failed: {0}")]
    TransportWriteFailure(String),

    #[error("Bluetooth stack not available on this host")]
    BleUnavailable,

    #[error("Invalid device: {0}")]
    InvalidDevice(String),

    #[error("Invalid command: {0}")]
    InvalidCommand(String),

    #[error("BLE error: {0}")]
    Ble(#[from] btleplug::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Config error: {0}")]
    Config(String),
}

impl From<serde_yaml::Error> for WardenError {
    fn from(error: serde_yaml::Error) -> Self {
        WardenError::Config(error.to_string())
    }
}

pub type Result<T> = std::result::Result<T, WardenError>;
