use color_eyre::Result;
use std::sync::Arc;

use outage_warden::util::connectivity::{ConnectivityProbe, DnsProbe};
use outage_warden::util::io::ble::{BleBackend, BtleplugBackend};
use outage_warden::util::log;
use outage_warden::{log_info, log_warn};
use outage_warden::{AppConfig, DeviceRegistry, HostService, MonitorSettings, OutageMonitor};

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt::init();
    color_eyre::install()?;

    let config_path = AppConfig::resolve_path(std::env::args().nth(1));
    let config = AppConfig::load(&config_path)?;
    log::init(&config.logging.dir, config.logging.debug)?;
    log_info!("Loaded configuration from {}", config_path.display());

    let backend: Option<Arc<dyn BleBackend>> = match BtleplugBackend::new().await {
        Ok(backend) => Some(Arc::new(backend)),
        Err(e) => {
            log_warn!("BLE unavailable ({}), running with manual devices only", e);
            None
        }
    };

    let registry = Arc::new(DeviceRegistry::new(backend, &config.bluetooth));
    let probe: Arc<dyn ConnectivityProbe> = Arc::new(DnsProbe::new(&config.connectivity));

    let host = HostService::new(probe.clone(), registry.clone());
    let host_status = host.status().await;
    log_info!(
        "Internet available: {}, {} device(s) visible",
        host_status.internet_available,
        host_status.devices.len()
    );

    let monitor = Arc::new(OutageMonitor::new(
        registry.clone(),
        probe,
        MonitorSettings::from(&config.monitor),
    ));
    let ticker = monitor.spawn(config.monitor.check_interval());

    tokio::signal::ctrl_c().await?;
    log_info!("Shutting down after {}s", host.uptime().as_secs());
    ticker.abort();

    let status = monitor.status().await;
    log_info!("Final monitor status: {}", serde_json::to_string(&status)?);
    Ok(())
}
