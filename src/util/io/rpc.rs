// src/util/io/rpc.rs
//! Length-prefixed JSON-RPC frames for the plug's two-characteristic GATT surface

use serde::Serialize;

use crate::device::PowerState;
use crate::error::Result;

/// Largest value the platform accepts in a single characteristic write
pub const MAX_WRITE_SIZE: usize = 20;

const RPC_SOURCE: &str = "shell";
const SWITCH_CHANNEL: u8 = 0;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum RpcMethod {
    #[serde(rename = "Switch.Set")]
    SwitchSet,
    #[serde(rename = "Switch.GetStatus")]
    SwitchGetStatus,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SwitchParams {
    pub id: u8,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub on: Option<bool>,
}

/// One RPC call. Field order is the wire order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RpcFrame {
    pub id: i64,
    pub src: &'static str,
    pub method: RpcMethod,
    pub params: SwitchParams,
}

impl RpcFrame {
    pub fn switch_set(id: i64, on: bool) -> Self {
        Self {
            id,
            src: RPC_SOURCE,
            method: RpcMethod::SwitchSet,
            params: SwitchParams { id: SWITCH_CHANNEL, on: Some(on) },
        }
    }

    pub fn switch_get_status(id: i64) -> Self {
        Self {
            id,
            src: RPC_SOURCE,
            method: RpcMethod::SwitchGetStatus,
            params: SwitchParams { id: SWITCH_CHANNEL, on: None },
        }
    }

    pub fn encode(&self) -> Result<WireFrame> {
        let payload = serde_json::to_vec(self)?;
        Ok(WireFrame::new(payload))
    }
}

/// Serialized frame ready for the two-step write
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WireFrame {
    payload: Vec<u8>,
}

impl WireFrame {
    pub fn new(payload: Vec<u8>) -> Self {
        Self { payload }
    }

    pub fn payload(&self) -> &[u8] {
        &self.payload
    }

    /// Big-endian byte length of the JSON payload, written to the control characteristic
    pub fn length_prefix(&self) -> [u8; 4] {
        (self.payload.len() as u32).to_be_bytes()
    }

    /// Payload writes for the data characteristic, in send order
    pub fn chunks(&self) -> std::slice::Chunks<'_, u8> {
        self.payload.chunks(MAX_WRITE_SIZE)
    }

    pub fn chunk_count(&self) -> usize {
        self.payload.len().div_ceil(MAX_WRITE_SIZE)
    }
}

/// Time-derived correlation id in 0..10000
pub fn correlation_id() -> i64 {
    chrono::Utc::now().timestamp_millis() % 10000
}

/// Interpret a `Switch.GetStatus` response body.
///
/// Only the literal `"output"` field is inspected; anything else is `Unknown`.
pub fn parse_switch_status(response: &[u8]) -> PowerState {
    if response.is_empty() {
        return PowerState::Unknown;
    }

    let body = String::from_utf8_lossy(response);
    if body.contains("\"output\":true") || body.contains("\"output\": true") {
        PowerState::On
    } else if body.contains("\"output\":false") || body.contains("\"output\": false") {
        PowerState::Off
    } else {
        PowerState::Unknown
    }
}
