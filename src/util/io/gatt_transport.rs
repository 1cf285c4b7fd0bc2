// src/util/io/gatt_transport.rs
//! GATT RPC transport - drives the plug's relay over its two RPC characteristics
//!
//! Every call is serialized per device address so chunk writes from two
//! callers never interleave on the wire.

use btleplug::api::WriteType;
use dashmap::DashMap;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Mutex, RwLock};
use uuid::Uuid;

use crate::device::{normalize_id, PowerCommand, PowerState};
use crate::error::{Result, WardenError};
use crate::util::io::ble::{
    alternate_write_type, find_peripheral, BleBackend, CharacteristicInfo, PeripheralInfo,
};
use crate::util::io::rpc::{correlation_id, parse_switch_status, RpcFrame, WireFrame};
use crate::util::poll::{poll_until, SERVICE_RESOLUTION};
use crate::{log_debug, log_error, log_info, log_warn};

const LENGTH_SETTLE: Duration = Duration::from_millis(100);
const STATUS_LENGTH_SETTLE: Duration = Duration::from_millis(50);
const CHUNK_DELAY: Duration = Duration::from_millis(50);
const RESPONSE_SETTLE: Duration = Duration::from_millis(200);

/// Last known relay state per normalized address
pub type PowerStateCache = Arc<RwLock<HashMap<String, PowerState>>>;

/// The characteristic pair carrying the RPC stream
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RpcEndpoints {
    /// Receives the 4-byte length prefix
    pub control: Uuid,
    /// Receives the JSON payload chunks; read back for responses
    pub data: Uuid,
}

pub struct GattRpcTransport {
    backend: Arc<dyn BleBackend>,
    endpoints: RpcEndpoints,
    power_states: PowerStateCache,
    locks: DashMap<String, Arc<Mutex<()>>>,
}

impl GattRpcTransport {
    pub fn new(
        backend: Arc<dyn BleBackend>,
        endpoints: RpcEndpoints,
        power_states: PowerStateCache,
    ) -> Self {
        Self {
            backend,
            endpoints,
            power_states,
            locks: DashMap::new(),
        }
    }

    pub async fn cached_state(&self, address: &str) -> PowerState {
        self.power_states
            .read()
            .await
            .get(&normalize_id(address))
            .copied()
            .unwrap_or_default()
    }

    fn device_lock(&self, address: &str) -> Arc<Mutex<()>> {
        self.locks
            .entry(normalize_id(address))
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .value()
            .clone()
    }

    /// Switch the relay. No-op when the device already reports the desired state.
    ///
    /// On success the cached state is set to the requested one without a
    /// confirming read.
    pub async fn control(&self, address: &str, command: PowerCommand) -> Result<()> {
        let lock = self.device_lock(address);
        let _guard = lock.lock().await;

        log_info!("Sending command {} to {}", command, address);

        self.control_locked(address, command).await.map_err(|e| {
            log_error!("Failed to control device {}: {}", address, e);
            e
        })
    }

    /// Ask the device for its relay state. Never fails: any problem is `Unknown`.
    pub async fn query_state(&self, address: &str) -> PowerState {
        let lock = self.device_lock(address);
        let _guard = lock.lock().await;

        let peripheral = match self.resolve(address).await {
            Ok(peripheral) => peripheral,
            Err(e) => {
                log_warn!("Failed to query device state for {}: {}", address, e);
                return PowerState::Unknown;
            }
        };

        if let Err(e) = self.ensure_connected(&peripheral).await {
            log_warn!("Failed to query device state for {}: {}", address, e);
            return PowerState::Unknown;
        }

        self.query_state_locked(&peripheral.address).await
    }

    async fn control_locked(&self, address: &str, command: PowerCommand) -> Result<()> {
        let peripheral = self.resolve(address).await?;
        let address = peripheral.address.as_str();

        self.ensure_connected(&peripheral).await?;

        let current = self.query_state_locked(address).await;
        log_info!("Current state: {}, Desired: {}", current, command);

        if current == command.target_state() {
            log_info!("Device already in desired state, skipping command");
            return Ok(());
        }

        let frame = RpcFrame::switch_set(correlation_id(), command.is_on()).encode()?;
        let (control, _) = self.characteristics(address).await?;

        log_debug!("Control characteristic flags: {:?}", control.properties);
        let write_type = control.preferred_write_type();

        self.send_frame(address, &frame, write_type).await?;

        log_info!("Successfully sent {} command to {}", command, address);
        self.power_states
            .write()
            .await
            .insert(normalize_id(address), command.target_state());

        Ok(())
    }

    async fn send_frame(
        &self,
        address: &str,
        frame: &WireFrame,
        write_type: WriteType,
    ) -> Result<()> {
        let control = self.endpoints.control;
        log_info!("Writing length {} to {}", frame.payload().len(), control);
        let mut write_type = self
            .write_with_fallback(address, control, &frame.length_prefix(), write_type)
            .await?;

        tokio::time::sleep(LENGTH_SETTLE).await;

        log_info!("Writing data to {}", self.endpoints.data);
        let total = frame.chunk_count();
        for (index, chunk) in frame.chunks().enumerate() {
            log_debug!("Writing chunk {}/{}", index + 1, total);
            write_type = self
                .write_with_fallback(address, self.endpoints.data, chunk, write_type)
                .await?;
            tokio::time::sleep(CHUNK_DELAY).await;
        }

        Ok(())
    }

    /// One write, retried once in the opposite mode. Returns the mode that
    /// worked so the rest of the frame keeps using it.
    async fn write_with_fallback(
        &self,
        address: &str,
        uuid: Uuid,
        value: &[u8],
        write_type: WriteType,
    ) -> Result<WriteType> {
        match self.backend.write(address, uuid, value, write_type).await {
            Ok(()) => Ok(write_type),
            Err(first) => {
                let alternate = alternate_write_type(write_type);
                log_warn!("Write failed ({:?}): {}, trying {:?}", write_type, first, alternate);

                self.backend
                    .write(address, uuid, value, alternate)
                    .await
                    .map_err(|e| {
                        WardenError::TransportWriteFailure(format!(
                            "{} rejected {:?} ({}) and {:?} ({})",
                            uuid, write_type, first, alternate, e
                        ))
                    })?;
                Ok(alternate)
            }
        }
    }

    async fn query_state_locked(&self, address: &str) -> PowerState {
        match self.try_query_state(address).await {
            Ok(state) => state,
            Err(e) => {
                log_warn!("Failed to query device state for {}: {}", address, e);
                PowerState::Unknown
            }
        }
    }

    async fn try_query_state(&self, address: &str) -> Result<PowerState> {
        let backend = &self.backend;
        if !poll_until(SERVICE_RESOLUTION, move || backend.services_resolved(address)).await {
            log_debug!("Services of {} unresolved, state unknown", address);
            return Ok(PowerState::Unknown);
        }

        self.characteristics(address).await?;

        let frame = RpcFrame::switch_get_status(correlation_id()).encode()?;
        let write_type = WriteType::WithoutResponse;

        self.backend
            .write(address, self.endpoints.control, &frame.length_prefix(), write_type)
            .await?;
        tokio::time::sleep(STATUS_LENGTH_SETTLE).await;

        for chunk in frame.chunks() {
            self.backend
                .write(address, self.endpoints.data, chunk, write_type)
                .await?;
            tokio::time::sleep(CHUNK_DELAY).await;
        }

        tokio::time::sleep(RESPONSE_SETTLE).await;

        match self.backend.read(address, self.endpoints.data).await {
            Ok(response) => {
                log_info!("GetStatus response: {}", String::from_utf8_lossy(&response));
                Ok(parse_switch_status(&response))
            }
            Err(e) => {
                log_debug!("Could not read response: {}", e);
                Ok(PowerState::Unknown)
            }
        }
    }

    async fn resolve(&self, address: &str) -> Result<PeripheralInfo> {
        find_peripheral(self.backend.as_ref(), address)
            .await?
            .ok_or_else(|| WardenError::DeviceNotFound(address.to_string()))
    }

    async fn ensure_connected(&self, peripheral: &PeripheralInfo) -> Result<()> {
        if peripheral.connected {
            return Ok(());
        }

        let address = peripheral.address.as_str();
        log_info!("Connecting to {}", address);
        self.backend.connect(address).await?;

        let backend = &self.backend;
        if !poll_until(SERVICE_RESOLUTION, move || backend.services_resolved(address)).await {
            log_warn!("Services not resolved yet on {}, proceeding anyway...", address);
        }
        Ok(())
    }

    async fn characteristics(
        &self,
        address: &str,
    ) -> Result<(CharacteristicInfo, CharacteristicInfo)> {
        let control = self.backend.characteristic(address, self.endpoints.control).await?;
        let data = self.backend.characteristic(address, self.endpoints.data).await?;

        match (control, data) {
            (Some(control), Some(data)) => Ok((control, data)),
            _ => Err(WardenError::CharacteristicsNotFound {
                control: self.endpoints.control,
                data: self.endpoints.data,
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::util::io::ble::mock::{MockBackend, RecordedWrite};
    use btleplug::api::CharPropFlags;
    use tokio::time::Instant;

    const ADDR: &str = "AA:BB:CC:DD:EE:FF";
    const STATUS_ON: &[u8] = br#"{"id":1,"src":"plug","result":{"id":0,"output":true}}"#;
    const STATUS_OFF: &[u8] = br#"{"id":1,"src":"plug","result":{"id":0,"output":false}}"#;

    fn endpoints() -> RpcEndpoints {
        RpcEndpoints {
            control: Uuid::from_u128(0x5f6d4f53_5f52_5043_5f74_785f63746c5f),
            data: Uuid::from_u128(0x5f6d4f53_5f52_5043_5f64_6174615f5f5f),
        }
    }

    fn plug(connected: bool, control_flags: CharPropFlags) -> MockBackend {
        MockBackend::new()
            .with_peripheral(ADDR, "ShellyPlugS-1234", connected)
            .with_characteristic(endpoints().control, control_flags)
            .with_characteristic(endpoints().data, CharPropFlags::READ | CharPropFlags::WRITE)
    }

    fn transport(backend: Arc<MockBackend>) -> GattRpcTransport {
        GattRpcTransport::new(backend, endpoints(), PowerStateCache::default())
    }

    /// Split the recorded stream into frames: (length prefix, reassembled payload)
    fn frames(writes: &[RecordedWrite]) -> Vec<(RecordedWrite, Vec<u8>)> {
        let mut out = Vec::new();
        let mut iter = writes.iter().peekable();
        while let Some(prefix) = iter.next() {
            assert_eq!(prefix.uuid, endpoints().control, "frame must start with its length");
            let length = u32::from_be_bytes(prefix.value.as_slice().try_into().unwrap()) as usize;

            let mut payload = Vec::new();
            for _ in 0..length.div_ceil(20) {
                let chunk = iter.next().expect("missing chunk");
                assert_eq!(chunk.uuid, endpoints().data, "chunks of a frame must be contiguous");
                assert!(chunk.value.len() <= 20);
                payload.extend_from_slice(&chunk.value);
            }
            assert_eq!(payload.len(), length);
            out.push((prefix.clone(), payload));
        }
        out
    }

    fn method(payload: &[u8]) -> String {
        let json: serde_json::Value = serde_json::from_slice(payload).unwrap();
        json["method"].as_str().unwrap().to_string()
    }

    #[tokio::test(start_paused = true)]
    async fn test_control_skips_when_already_in_state() {
        let backend = Arc::new(plug(true, CharPropFlags::WRITE).with_read_response(STATUS_ON));
        let transport = transport(backend.clone());

        transport.control(ADDR, PowerCommand::On).await.unwrap();

        let frames = frames(&backend.writes());
        assert_eq!(frames.len(), 1);
        assert_eq!(method(&frames[0].1), "Switch.GetStatus");
        assert!(backend.writes().iter().all(|w| w.write_type == WriteType::WithoutResponse));
    }

    #[tokio::test(start_paused = true)]
    async fn test_control_writes_framed_switch_set() {
        let backend = Arc::new(plug(true, CharPropFlags::WRITE).with_read_response(STATUS_OFF));
        let transport = transport(backend.clone());

        transport.control(ADDR, PowerCommand::On).await.unwrap();

        let frames = frames(&backend.writes());
        assert_eq!(frames.len(), 2);
        let (prefix, payload) = &frames[1];

        let json: serde_json::Value = serde_json::from_slice(payload).unwrap();
        assert_eq!(json["method"], "Switch.Set");
        assert_eq!(json["src"], "shell");
        assert_eq!(json["params"]["id"], 0);
        assert_eq!(json["params"]["on"], true);
        assert!(json["id"].as_i64().unwrap() < 10000);

        assert_eq!(prefix.address, ADDR);
        assert_eq!(prefix.write_type, WriteType::WithResponse);
        assert_eq!(prefix.value, (payload.len() as u32).to_be_bytes().to_vec());
        assert_eq!(transport.cached_state(&ADDR.to_lowercase()).await, PowerState::On);
    }

    #[tokio::test(start_paused = true)]
    async fn test_write_type_follows_capability_flags() {
        let backend = Arc::new(
            plug(true, CharPropFlags::WRITE_WITHOUT_RESPONSE).with_read_response(STATUS_ON),
        );
        let transport = transport(backend.clone());

        transport.control(ADDR, PowerCommand::Off).await.unwrap();

        let writes = backend.writes();
        assert!(writes.iter().all(|w| w.write_type == WriteType::WithoutResponse));
        assert_eq!(method(&frames(&writes)[1].1), "Switch.Set");
    }

    #[tokio::test(start_paused = true)]
    async fn test_failed_write_retries_with_alternate_mode() {
        let backend = Arc::new(
            plug(true, CharPropFlags::WRITE | CharPropFlags::WRITE_WITHOUT_RESPONSE)
                .with_read_response(STATUS_OFF)
                .failing_writes(WriteType::WithResponse),
        );
        let transport = transport(backend.clone());

        transport.control(ADDR, PowerCommand::On).await.unwrap();

        let frames = frames(&backend.writes());
        assert_eq!(frames[1].0.write_type, WriteType::WithoutResponse);
        assert_eq!(transport.cached_state(ADDR).await, PowerState::On);

        // the set prefix is rejected once and retried, its chunks then go
        // straight out in the working mode
        let status_chunks = frames[0].1.len().div_ceil(20);
        let set_chunks = frames[1].1.len().div_ceil(20);
        assert_eq!(backend.write_attempts(), 1 + status_chunks + 2 + set_chunks);
    }

    #[tokio::test(start_paused = true)]
    async fn test_write_failure_in_both_modes_is_surfaced() {
        let backend = Arc::new(
            plug(true, CharPropFlags::WRITE)
                .failing_writes(WriteType::WithResponse)
                .failing_writes(WriteType::WithoutResponse),
        );
        let transport = transport(backend.clone());

        let result = transport.control(ADDR, PowerCommand::Off).await;

        assert!(matches!(result, Err(WardenError::TransportWriteFailure(_))));
        assert!(backend.writes().is_empty());
        // one status prefix, then the set prefix in each mode exactly once
        assert_eq!(backend.write_attempts(), 3);
        assert_eq!(transport.cached_state(ADDR).await, PowerState::Unknown);
    }

    #[tokio::test(start_paused = true)]
    async fn test_unknown_device() {
        let backend = Arc::new(plug(true, CharPropFlags::WRITE));
        let transport = transport(backend);

        let result = transport.control("11:22:33:44:55:66", PowerCommand::On).await;
        assert!(matches!(result, Err(WardenError::DeviceNotFound(_))));
        assert_eq!(transport.query_state("11:22:33:44:55:66").await, PowerState::Unknown);
    }

    #[tokio::test(start_paused = true)]
    async fn test_missing_characteristics() {
        let backend = Arc::new(
            MockBackend::new()
                .with_peripheral(ADDR, "ShellyPlugS-1234", true)
                .with_characteristic(endpoints().control, CharPropFlags::WRITE)
                .with_read_response(STATUS_ON),
        );
        let transport = transport(backend.clone());

        let result = transport.control(ADDR, PowerCommand::On).await;
        assert!(matches!(result, Err(WardenError::CharacteristicsNotFound { .. })));
        assert_eq!(transport.query_state(ADDR).await, PowerState::Unknown);
        assert!(backend.writes().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_connects_and_waits_for_services() {
        let backend = Arc::new(
            plug(false, CharPropFlags::WRITE)
                .with_services_resolved(false)
                .with_read_response(STATUS_OFF),
        );
        let transport = transport(backend.clone());
        let started = Instant::now();

        transport.control(ADDR, PowerCommand::On).await.unwrap();

        assert_eq!(backend.connect_calls(), 1);
        // bounded connection wait, then the query gives up on unresolved services
        assert!(started.elapsed() >= Duration::from_secs(10));
        let frames = frames(&backend.writes());
        assert_eq!(frames.len(), 1);
        assert_eq!(method(&frames[0].1), "Switch.Set");
    }

    #[tokio::test(start_paused = true)]
    async fn test_query_state_reads_response() {
        let backend = Arc::new(plug(true, CharPropFlags::WRITE).with_read_response(STATUS_OFF));
        let transport = transport(backend.clone());

        assert_eq!(transport.query_state(ADDR).await, PowerState::Off);

        let backend = Arc::new(plug(true, CharPropFlags::WRITE).with_read_response(b"{\"id\":1}"));
        assert_eq!(self::transport(backend).query_state(ADDR).await, PowerState::Unknown);

        let backend = Arc::new(plug(true, CharPropFlags::WRITE));
        assert_eq!(self::transport(backend).query_state(ADDR).await, PowerState::Unknown);
    }

    #[tokio::test(start_paused = true)]
    async fn test_concurrent_controls_do_not_interleave() {
        let backend = Arc::new(plug(true, CharPropFlags::WRITE).with_read_response(b"{}"));
        let transport = transport(backend.clone());

        let lower = ADDR.to_lowercase();
        let (first, second) = tokio::join!(
            transport.control(ADDR, PowerCommand::On),
            transport.control(&lower, PowerCommand::Off),
        );
        first.unwrap();
        second.unwrap();

        let methods: Vec<String> = frames(&backend.writes())
            .iter()
            .map(|(_, payload)| method(payload))
            .collect();
        assert_eq!(
            methods,
            vec!["Switch.GetStatus", "Switch.Set", "Switch.GetStatus", "Switch.Set"]
        );
    }
}
