// tests/common/mod.rs
//! Simulated plug: reassembles framed RPC writes and answers status reads

use async_trait::async_trait;
use btleplug::api::{CharPropFlags, WriteType};
use std::sync::Mutex;
use uuid::Uuid;

use outage_warden::config::BluetoothConfig;
use outage_warden::util::io::ble::{BleBackend, CharacteristicInfo, PeripheralInfo};
use outage_warden::{Result, WardenError};

pub const PLUG_ADDRESS: &str = "C0:49:EF:12:34:56";

#[derive(Default)]
struct PlugState {
    connected: bool,
    relay_on: bool,
    expected_len: usize,
    buffer: Vec<u8>,
    last_id: i64,
    received: Vec<serde_json::Value>,
    chunk_sizes: Vec<usize>,
}

pub struct SimulatedPlug {
    control: Uuid,
    data: Uuid,
    state: Mutex<PlugState>,
}

impl SimulatedPlug {
    pub fn new(config: &BluetoothConfig, relay_on: bool) -> Self {
        Self {
            control: config.control_uuid,
            data: config.data_uuid,
            state: Mutex::new(PlugState { relay_on, ..Default::default() }),
        }
    }

    pub fn relay_on(&self) -> bool {
        self.state.lock().unwrap().relay_on
    }

    pub fn connected(&self) -> bool {
        self.state.lock().unwrap().connected
    }

    /// Every decoded request, in arrival order
    pub fn received(&self) -> Vec<serde_json::Value> {
        self.state.lock().unwrap().received.clone()
    }

    pub fn chunk_sizes(&self) -> Vec<usize> {
        self.state.lock().unwrap().chunk_sizes.clone()
    }

    fn check_address(address: &str) -> Result<()> {
        if address.eq_ignore_ascii_case(PLUG_ADDRESS) {
            Ok(())
        } else {
            Err(WardenError::DeviceNotFound(address.to_string()))
        }
    }
}

#[async_trait]
impl BleBackend for SimulatedPlug {
    async fn start_discovery(&self) -> Result<()> {
        Ok(())
    }

    async fn peripherals(&self) -> Result<Vec<PeripheralInfo>> {
        Ok(vec![PeripheralInfo {
            address: PLUG_ADDRESS.to_string(),
            name: Some("ShellyPlusPlugS-1234".to_string()),
            connected: self.connected(),
        }])
    }

    async fn connect(&self, address: &str) -> Result<()> {
        Self::check_address(address)?;
        self.state.lock().unwrap().connected = true;
        Ok(())
    }

    async fn disconnect(&self, address: &str) -> Result<()> {
        Self::check_address(address)?;
        self.state.lock().unwrap().connected = false;
        Ok(())
    }

    async fn services_resolved(&self, address: &str) -> Result<bool> {
        Self::check_address(address)?;
        Ok(self.connected())
    }

    async fn characteristic(
        &self,
        address: &str,
        uuid: Uuid,
    ) -> Result<Option<CharacteristicInfo>> {
        Self::check_address(address)?;
        let properties = if uuid == self.control {
            CharPropFlags::WRITE
        } else if uuid == self.data {
            CharPropFlags::READ | CharPropFlags::WRITE
        } else {
            return Ok(None);
        };
        Ok(Some(CharacteristicInfo { uuid, properties }))
    }

    async fn write(
        &self,
        address: &str,
        uuid: Uuid,
        value: &[u8],
        _write_type: WriteType,
    ) -> Result<()> {
        Self::check_address(address)?;
        let mut state = self.state.lock().unwrap();

        if uuid == self.control {
            let prefix: [u8; 4] = value
                .try_into()
                .map_err(|_| WardenError::TransportWriteFailure("bad length prefix".to_string()))?;
            state.expected_len = u32::from_be_bytes(prefix) as usize;
            state.buffer.clear();
            return Ok(());
        }

        state.chunk_sizes.push(value.len());
        state.buffer.extend_from_slice(value);
        if state.buffer.len() == state.expected_len {
            let request: serde_json::Value = serde_json::from_slice(&state.buffer)?;
            state.last_id = request["id"].as_i64().unwrap_or_default();
            if request["method"] == "Switch.Set" {
                state.relay_on = request["params"]["on"].as_bool().unwrap_or(state.relay_on);
            }
            state.received.push(request);
        }
        Ok(())
    }

    async fn read(&self, address: &str, _uuid: Uuid) -> Result<Vec<u8>> {
        Self::check_address(address)?;
        let state = self.state.lock().unwrap();
        Ok(format!(
            r#"{{"id":{},"src":"shellyplusplugs","result":{{"id":0,"source":"BLE","output":{}}}}}"#,
            state.last_id, state.relay_on
        )
        .into_bytes())
    }
}
