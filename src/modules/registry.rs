// src/modules/registry.rs
//! Device Registry - merges scanned plugs with manually registered ones

use async_trait::async_trait;
use chrono::Utc;
use std::sync::Arc;
use tokio::sync::RwLock;

use crate::config::BluetoothConfig;
use crate::device::{normalize_id, ConnectionStatus, Device, DeviceOrigin, PowerCommand, PowerState};
use crate::error::{Result, WardenError};
use crate::modules::monitor::PowerSwitch;
use crate::util::io::ble::{find_peripheral, BleBackend, PeripheralInfo};
use crate::util::io::gatt_transport::{GattRpcTransport, PowerStateCache};
use crate::{log_error, log_info, log_warn};

const DEFAULT_DEVICE_NAME: &str = "Unknown Device";

pub struct DeviceRegistry {
    backend: Option<Arc<dyn BleBackend>>,
    transport: Option<GattRpcTransport>,
    manual_devices: RwLock<Vec<Device>>,
    power_states: PowerStateCache,
    name_filter: String,
}

impl DeviceRegistry {
    /// `backend` is `None` when the host has no usable BLE stack; the
    /// registry then serves manual entries only.
    pub fn new(backend: Option<Arc<dyn BleBackend>>, config: &BluetoothConfig) -> Self {
        let power_states = PowerStateCache::default();
        let transport = backend.clone().map(|backend| {
            GattRpcTransport::new(backend, config.endpoints(), power_states.clone())
        });

        Self {
            backend,
            transport,
            manual_devices: RwLock::new(Vec::new()),
            power_states,
            name_filter: config.name_filter.to_lowercase(),
        }
    }

    pub fn is_ble_available(&self) -> bool {
        self.backend.is_some()
    }

    fn is_target_family(&self, peripheral: &PeripheralInfo) -> bool {
        peripheral
            .name
            .as_deref()
            .map(|name| name.to_lowercase().contains(&self.name_filter))
            .unwrap_or(false)
    }

    async fn cached_state(&self, id: &str) -> PowerState {
        self.power_states
            .read()
            .await
            .get(&normalize_id(id))
            .copied()
            .unwrap_or_default()
    }

    /// Scanned plugs plus manual entries, one entry per address. Never fails.
    pub async fn list_devices(&self) -> Vec<Device> {
        let mut devices = Vec::new();
        let mut peripherals = Vec::new();

        if let (Some(backend), Some(transport)) = (&self.backend, &self.transport) {
            if let Err(e) = backend.start_discovery().await {
                log_warn!("Could not start discovery: {}", e);
            }

            match backend.peripherals().await {
                Ok(found) => peripherals = found,
                Err(e) => log_error!("Error scanning devices: {}", e),
            }

            for peripheral in peripherals.iter().filter(|p| self.is_target_family(p)) {
                let mut state = self.cached_state(&peripheral.address).await;

                if peripheral.connected {
                    let queried = transport.query_state(&peripheral.address).await;
                    if queried != PowerState::Unknown {
                        state = queried;
                        self.power_states
                            .write()
                            .await
                            .insert(normalize_id(&peripheral.address), state);
                    }
                }

                let name = peripheral
                    .name
                    .clone()
                    .unwrap_or_else(|| DEFAULT_DEVICE_NAME.to_string());
                let mut device =
                    Device::new(peripheral.address.clone(), name, DeviceOrigin::Scanned);
                device.connection_status = peripheral.connected.into();
                device.power_state = state;
                devices.push(device);
            }
        }

        let manual_devices = self.manual_devices.read().await.clone();
        for manual in manual_devices {
            if devices.iter().any(|d| d.id.eq_ignore_ascii_case(&manual.id)) {
                continue;
            }

            let connected = peripherals
                .iter()
                .any(|p| p.connected && p.address.eq_ignore_ascii_case(&manual.id));

            let mut device = manual;
            device.connection_status = ConnectionStatus::from(connected);
            device.power_state = self.cached_state(&device.id).await;
            device.last_seen = Utc::now();
            devices.push(device);
        }

        devices
    }

    /// Upsert keyed by case-insensitive id
    pub async fn register_manual(&self, id: &str, name: &str) -> Result<()> {
        let id = id.trim();
        if id.is_empty() {
            return Err(WardenError::InvalidDevice("ID is required".to_string()));
        }
        let name = match name.trim() {
            "" => DEFAULT_DEVICE_NAME,
            name => name,
        };

        let key = normalize_id(id);
        let mut manual_devices = self.manual_devices.write().await;
        manual_devices.retain(|d| normalize_id(&d.id) != key);
        manual_devices.push(Device::new(id, name, DeviceOrigin::Manual));

        log_info!("Registered manual device {} ({})", id, name);
        Ok(())
    }

    /// Best-effort connect; failures are logged, not raised
    pub async fn connect(&self, address: &str) -> bool {
        let Some(backend) = &self.backend else {
            return false;
        };

        match find_peripheral(backend.as_ref(), address).await {
            Ok(Some(peripheral)) => match backend.connect(&peripheral.address).await {
                Ok(()) => true,
                Err(e) => {
                    log_warn!("Failed to connect to {}: {}", address, e);
                    false
                }
            },
            Ok(None) => {
                log_warn!("{}", WardenError::DeviceNotFound(address.to_string()));
                false
            }
            Err(e) => {
                log_warn!("Failed to connect to {}: {}", address, e);
                false
            }
        }
    }

    /// Best-effort disconnect; failures are logged, not raised
    pub async fn disconnect(&self, address: &str) -> bool {
        let Some(backend) = &self.backend else {
            return false;
        };

        match find_peripheral(backend.as_ref(), address).await {
            Ok(Some(peripheral)) => match backend.disconnect(&peripheral.address).await {
                Ok(()) => true,
                Err(e) => {
                    log_warn!("Failed to disconnect from {}: {}", address, e);
                    false
                }
            },
            Ok(None) => {
                log_warn!("{}", WardenError::DeviceNotFound(address.to_string()));
                false
            }
            Err(e) => {
                log_warn!("Failed to disconnect from {}: {}", address, e);
                false
            }
        }
    }

    pub async fn control(&self, address: &str, command: PowerCommand) -> Result<()> {
        let transport = self.transport.as_ref().ok_or(WardenError::BleUnavailable)?;
        transport.control(address, command).await
    }

    pub async fn query_state(&self, address: &str) -> PowerState {
        match &self.transport {
            Some(transport) => transport.query_state(address).await,
            None => PowerState::Unknown,
        }
    }
}

#[async_trait]
impl PowerSwitch for DeviceRegistry {
    async fn set_power(&self, device_id: &str, command: PowerCommand) -> Result<()> {
        self.control(device_id, command).await
    }
}
