// src/util/connectivity.rs
use async_trait::async_trait;
use std::time::Duration;

use crate::config::ConnectivityConfig;
use crate::log_debug;

/// "Is the internet reachable right now"
#[async_trait]
pub trait ConnectivityProbe: Send + Sync {
    async fn is_online(&self) -> bool;
}

/// Reachability by DNS resolution of a fixed hostname
#[derive(Debug, Clone)]
pub struct DnsProbe {
    host: String,
    port: u16,
    timeout: Duration,
}

impl DnsProbe {
    pub fn new(config: &ConnectivityConfig) -> Self {
        Self {
            host: config.probe_host.clone(),
            port: config.probe_port,
            timeout: Duration::from_secs(config.timeout_secs),
        }
    }
}

#[async_trait]
impl ConnectivityProbe for DnsProbe {
    async fn is_online(&self) -> bool {
        let target = format!("{}:{}", self.host, self.port);
        let online = match tokio::time::timeout(self.timeout, tokio::net::lookup_host(&target)).await {
            Ok(Ok(mut addrs)) => addrs.next().is_some(),
            Ok(Err(e)) => {
                log_debug!("DNS lookup of {} failed: {}", target, e);
                false
            }
            Err(_) => {
                log_debug!("DNS lookup of {} timed out", target);
                false
            }
        };
        online
    }
}
