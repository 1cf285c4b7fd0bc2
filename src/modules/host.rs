// src/modules/host.rs
use serde::Serialize;
use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::device::Device;
use crate::modules::registry::DeviceRegistry;
use crate::util::connectivity::ConnectivityProbe;

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HostStatus {
    pub uptime_seconds: u64,
    pub internet_available: bool,
    pub devices: Vec<Device>,
}

/// Host-level view: uptime, reachability and the device list
pub struct HostService {
    started: Instant,
    probe: Arc<dyn ConnectivityProbe>,
    registry: Arc<DeviceRegistry>,
}

impl HostService {
    pub fn new(probe: Arc<dyn ConnectivityProbe>, registry: Arc<DeviceRegistry>) -> Self {
        Self {
            started: Instant::now(),
            probe,
            registry,
        }
    }

    pub fn uptime(&self) -> Duration {
        self.started.elapsed()
    }

    pub async fn is_internet_available(&self) -> bool {
        self.probe.is_online().await
    }

    pub async fn status(&self) -> HostStatus {
        HostStatus {
            uptime_seconds: self.uptime().as_secs(),
            internet_available: self.is_internet_available().await,
            devices: self.registry.list_devices().await,
        }
    }
}
