// src/util/io/ble/mock.rs
//! Scriptable in-memory backend that records every GATT write

use async_trait::async_trait;
use btleplug::api::{CharPropFlags, WriteType};
use std::collections::HashMap;
use std::sync::Mutex;
use uuid::Uuid;

use crate::error::{Result, WardenError};
use crate::util::io::ble::{BleBackend, CharacteristicInfo, PeripheralInfo};

#[derive(Debug, Clone)]
pub struct RecordedWrite {
    pub address: String,
    pub uuid: Uuid,
    pub value: Vec<u8>,
    pub write_type: WriteType,
}

#[derive(Default)]
struct MockState {
    peripherals: Vec<PeripheralInfo>,
    characteristics: HashMap<Uuid, CharPropFlags>,
    services_resolved: bool,
    read_response: Option<Vec<u8>>,
    failing_write_types: Vec<WriteType>,
    discovery_fails: bool,
    writes: Vec<RecordedWrite>,
    write_attempts: usize,
    connect_calls: usize,
}

#[derive(Default)]
pub struct MockBackend {
    state: Mutex<MockState>,
}

impl MockBackend {
    pub fn new() -> Self {
        let backend = Self::default();
        backend.state.lock().unwrap().services_resolved = true;
        backend
    }

    pub fn with_peripheral(self, address: &str, name: &str, connected: bool) -> Self {
        self.state.lock().unwrap().peripherals.push(PeripheralInfo {
            address: address.to_string(),
            name: Some(name.to_string()),
            connected,
        });
        self
    }

    pub fn with_characteristic(self, uuid: Uuid, properties: CharPropFlags) -> Self {
        self.state.lock().unwrap().characteristics.insert(uuid, properties);
        self
    }

    pub fn with_read_response(self, response: &[u8]) -> Self {
        self.state.lock().unwrap().read_response = Some(response.to_vec());
        self
    }

    pub fn with_services_resolved(self, resolved: bool) -> Self {
        self.state.lock().unwrap().services_resolved = resolved;
        self
    }

    /// Every write using `write_type` fails
    pub fn failing_writes(self, write_type: WriteType) -> Self {
        self.state.lock().unwrap().failing_write_types.push(write_type);
        self
    }

    pub fn with_failing_discovery(self) -> Self {
        self.state.lock().unwrap().discovery_fails = true;
        self
    }

    pub fn writes(&self) -> Vec<RecordedWrite> {
        self.state.lock().unwrap().writes.clone()
    }

    /// Every write call, including the rejected ones
    pub fn write_attempts(&self) -> usize {
        self.state.lock().unwrap().write_attempts
    }

    pub fn connect_calls(&self) -> usize {
        self.state.lock().unwrap().connect_calls
    }

    fn index_of(state: &MockState, address: &str) -> Result<usize> {
        state
            .peripherals
            .iter()
            .position(|p| p.address.eq_ignore_ascii_case(address))
            .ok_or_else(|| WardenError::DeviceNotFound(address.to_string()))
    }
}

#[async_trait]
impl BleBackend for MockBackend {
    async fn start_discovery(&self) -> Result<()> {
        if self.state.lock().unwrap().discovery_fails {
            return Err(WardenError::BleUnavailable);
        }
        Ok(())
    }

    async fn peripherals(&self) -> Result<Vec<PeripheralInfo>> {
        let state = self.state.lock().unwrap();
        if state.discovery_fails {
            return Err(WardenError::BleUnavailable);
        }
        Ok(state.peripherals.clone())
    }

    async fn connect(&self, address: &str) -> Result<()> {
        let mut state = self.state.lock().unwrap();
        let index = Self::index_of(&state, address)?;
        state.peripherals[index].connected = true;
        state.connect_calls += 1;
        Ok(())
    }

    async fn disconnect(&self, address: &str) -> Result<()> {
        let mut state = self.state.lock().unwrap();
        let index = Self::index_of(&state, address)?;
        state.peripherals[index].connected = false;
        Ok(())
    }

    async fn services_resolved(&self, address: &str) -> Result<bool> {
        let state = self.state.lock().unwrap();
        Self::index_of(&state, address)?;
        Ok(state.services_resolved)
    }

    async fn characteristic(
        &self,
        address: &str,
        uuid: Uuid,
    ) -> Result<Option<CharacteristicInfo>> {
        let state = self.state.lock().unwrap();
        Self::index_of(&state, address)?;
        Ok(state
            .characteristics
            .get(&uuid)
            .map(|properties| CharacteristicInfo { uuid, properties: *properties }))
    }

    async fn write(
        &self,
        address: &str,
        uuid: Uuid,
        value: &[u8],
        write_type: WriteType,
    ) -> Result<()> {
        let mut state = self.state.lock().unwrap();
        Self::index_of(&state, address)?;
        state.write_attempts += 1;
        if state.failing_write_types.contains(&write_type) {
            let reason = format!("{:?} rejected", write_type);
            return Err(WardenError::TransportWriteFailure(reason));
        }
        state.writes.push(RecordedWrite {
            address: address.to_string(),
            uuid,
            value: value.to_vec(),
            write_type,
        });
        Ok(())
    }

    async fn read(&self, address: &str, _uuid: Uuid) -> Result<Vec<u8>> {
        let state = self.state.lock().unwrap();
        Self::index_of(&state, address)?;
        state
            .read_response
            .clone()
            .ok_or(WardenError::Ble(btleplug::Error::NotSupported("read".to_string())))
    }
}
