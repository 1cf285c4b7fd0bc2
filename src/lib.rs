pub mod config;
pub mod device;
pub mod error;
pub mod modules;
pub mod util;

pub use config::AppConfig;
pub use device::{ConnectionStatus, Device, DeviceOrigin, PowerCommand, PowerState};
pub use error::{Result, WardenError};
pub use modules::host::{HostService, HostStatus};
pub use modules::monitor::{
    MonitorPhase, MonitorSettings, MonitorStatus, OutageMonitor, PowerSwitch,
};
pub use modules::registry::DeviceRegistry;
