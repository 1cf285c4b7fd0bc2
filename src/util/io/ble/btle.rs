// src/util/io/ble/btle.rs
//! btleplug-backed implementation of the BLE surface

use async_trait::async_trait;
use btleplug::{
    api::{Central, Characteristic, Manager as _, Peripheral as _, ScanFilter, WriteType},
    platform::{Adapter, Manager, Peripheral},
};
use std::sync::atomic::{AtomicBool, Ordering};
use uuid::Uuid;

use crate::error::{Result, WardenError};
use crate::util::io::ble::{BleBackend, CharacteristicInfo, PeripheralInfo};
use crate::{log_debug, log_info};

pub struct BtleplugBackend {
    adapter: Adapter,
    scanning: AtomicBool,
}

impl BtleplugBackend {
    /// Open the first BLE adapter on this host
    pub async fn new() -> Result<Self> {
        let manager = Manager::new().await?;
        let adapter = manager
            .adapters()
            .await?
            .into_iter()
            .next()
            .ok_or(WardenError::BleUnavailable)?;

        log_info!("Using BLE adapter: {}", adapter.adapter_info().await?);

        Ok(Self {
            adapter,
            scanning: AtomicBool::new(false),
        })
    }

    async fn peripheral(&self, address: &str) -> Result<Peripheral> {
        let address = address.trim();
        for peripheral in self.adapter.peripherals().await? {
            if peripheral.address().to_string().eq_ignore_ascii_case(address) {
                return Ok(peripheral);
            }
        }
        Err(WardenError::DeviceNotFound(address.to_string()))
    }

    async fn gatt_characteristic(
        &self,
        address: &str,
        uuid: Uuid,
    ) -> Result<Option<(Peripheral, Characteristic)>> {
        let peripheral = self.peripheral(address).await?;
        let found = peripheral
            .characteristics()
            .into_iter()
            .find(|c| c.uuid == uuid);
        Ok(found.map(|c| (peripheral, c)))
    }
}

#[async_trait]
impl BleBackend for BtleplugBackend {
    async fn start_discovery(&self) -> Result<()> {
        if !self.scanning.swap(true, Ordering::SeqCst) {
            log_info!("Starting BLE discovery");
            if let Err(e) = self.adapter.start_scan(ScanFilter::default()).await {
                self.scanning.store(false, Ordering::SeqCst);
                return Err(e.into());
            }
        }
        Ok(())
    }

    async fn peripherals(&self) -> Result<Vec<PeripheralInfo>> {
        let mut found = Vec::new();
        for peripheral in self.adapter.peripherals().await? {
            let name = peripheral
                .properties()
                .await?
                .and_then(|properties| properties.local_name);
            let connected = peripheral.is_connected().await.unwrap_or(false);

            found.push(PeripheralInfo {
                address: peripheral.address().to_string(),
                name,
                connected,
            });
        }
        Ok(found)
    }

    async fn connect(&self, address: &str) -> Result<()> {
        let peripheral = self.peripheral(address).await?;
        if !peripheral.is_connected().await? {
            peripheral.connect().await?;
            log_info!("Connected to {}", address);
        }
        Ok(())
    }

    async fn disconnect(&self, address: &str) -> Result<()> {
        let peripheral = self.peripheral(address).await?;
        peripheral.disconnect().await?;
        log_info!("Disconnected from {}", address);
        Ok(())
    }

    async fn services_resolved(&self, address: &str) -> Result<bool> {
        let peripheral = self.peripheral(address).await?;
        if peripheral.services().is_empty() {
            log_debug!("Discovering services on {}", address);
            peripheral.discover_services().await?;
        }
        Ok(!peripheral.services().is_empty())
    }

    async fn characteristic(
        &self,
        address: &str,
        uuid: Uuid,
    ) -> Result<Option<CharacteristicInfo>> {
        Ok(self
            .gatt_characteristic(address, uuid)
            .await?
            .map(|(_, c)| CharacteristicInfo { uuid: c.uuid, properties: c.properties }))
    }

    async fn write(
        &self,
        address: &str,
        uuid: Uuid,
        value: &[u8],
        write_type: WriteType,
    ) -> Result<()> {
        let (peripheral, characteristic) = self
            .gatt_characteristic(address, uuid)
            .await?
            .ok_or_else(|| {
                WardenError::TransportWriteFailure(format!("characteristic {} missing", uuid))
            })?;

        peripheral
            .write(&characteristic, value, write_type)
            .await
            .map_err(|e| WardenError::TransportWriteFailure(e.to_string()))
    }

    async fn read(&self, address: &str, uuid: Uuid) -> Result<Vec<u8>> {
        let (peripheral, characteristic) = self
            .gatt_characteristic(address, uuid)
            .await?
            .ok_or(btleplug::Error::NoSuchCharacteristic)?;

        Ok(peripheral.read(&characteristic).await?)
    }
}
