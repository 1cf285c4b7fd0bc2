// src/util/io/ble/mod.rs
//! Platform BLE surface used by the registry and the GATT transport

mod btle;
#[cfg(test)]
pub mod mock;

use async_trait::async_trait;
use btleplug::api::{CharPropFlags, WriteType};
use uuid::Uuid;

use crate::error::Result;

pub use btle::BtleplugBackend;

/// Snapshot of a peripheral as seen by the adapter
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PeripheralInfo {
    pub address: String,
    pub name: Option<String>,
    pub connected: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CharacteristicInfo {
    pub uuid: Uuid,
    pub properties: CharPropFlags,
}

impl CharacteristicInfo {
    /// Acknowledged write unless the characteristic only advertises
    /// write-without-response.
    pub fn preferred_write_type(&self) -> WriteType {
        let with_response = self.properties.contains(CharPropFlags::WRITE);
        let without_response = self.properties.contains(CharPropFlags::WRITE_WITHOUT_RESPONSE);
        if without_response && !with_response {
            WriteType::WithoutResponse
        } else {
            WriteType::WithResponse
        }
    }
}

pub fn alternate_write_type(write_type: WriteType) -> WriteType {
    match write_type {
        WriteType::WithResponse => WriteType::WithoutResponse,
        WriteType::WithoutResponse => WriteType::WithResponse,
    }
}

/// Addresses are matched case-insensitively by every implementation.
#[async_trait]
pub trait BleBackend: Send + Sync {
    /// Start discovery if it is not already running
    async fn start_discovery(&self) -> Result<()>;

    async fn peripherals(&self) -> Result<Vec<PeripheralInfo>>;

    async fn connect(&self, address: &str) -> Result<()>;

    async fn disconnect(&self, address: &str) -> Result<()>;

    /// Whether GATT services have been discovered for a connected peripheral
    async fn services_resolved(&self, address: &str) -> Result<bool>;

    async fn characteristic(
        &self,
        address: &str,
        uuid: Uuid,
    ) -> Result<Option<CharacteristicInfo>>;

    async fn write(
        &self,
        address: &str,
        uuid: Uuid,
        value: &[u8],
        write_type: WriteType,
    ) -> Result<()>;

    async fn read(&self, address: &str, uuid: Uuid) -> Result<Vec<u8>>;
}

/// Look up a peripheral by case-insensitive address
pub async fn find_peripheral(
    backend: &dyn BleBackend,
    address: &str,
) -> Result<Option<PeripheralInfo>> {
    let address = address.trim();
    Ok(backend
        .peripherals()
        .await?
        .into_iter()
        .find(|p| p.address.eq_ignore_ascii_case(address)))
}
