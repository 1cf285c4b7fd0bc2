// src/modules/monitor.rs
//! Outage monitor - power-cycles the target plug after a sustained internet outage
//!
//! Two phases: `OnlineMonitoring` watches the probe and switches the plug OFF
//! once the outage reaches the threshold; `PoweredOffWaiting` switches it back
//! ON after the power-cycle delay, whatever the probe says. Settings changes
//! apply from the next tick and never reset the timers.

use async_trait::async_trait;
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Mutex, RwLock};
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};

use crate::config::MonitorConfig;
use crate::device::PowerCommand;
use crate::error::Result;
use crate::modules::event_log::{EventLog, MonitorEvent, Severity};
use crate::util::connectivity::ConnectivityProbe;
use crate::{log_error, log_info, log_warn};

/// Whatever can switch the target device
#[async_trait]
pub trait PowerSwitch: Send + Sync {
    async fn set_power(&self, device_id: &str, command: PowerCommand) -> Result<()>;
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MonitorSettings {
    pub target_device_id: String,
    pub offline_threshold_minutes: u32,
    pub power_cycle_delay_minutes: u32,
}

impl MonitorSettings {
    fn target(&self) -> Option<&str> {
        let target = self.target_device_id.trim();
        (!target.is_empty()).then_some(target)
    }
}

impl From<&MonitorConfig> for MonitorSettings {
    fn from(config: &MonitorConfig) -> Self {
        Self {
            target_device_id: config.target_device_id.clone(),
            offline_threshold_minutes: config.offline_threshold_minutes,
            power_cycle_delay_minutes: config.power_cycle_delay_minutes,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MonitorPhase {
    OnlineMonitoring,
    PoweredOffWaiting { turned_off_at: DateTime<Utc> },
}

#[derive(Debug)]
struct MonitorState {
    settings: MonitorSettings,
    phase: MonitorPhase,
    last_online: DateTime<Utc>,
    probe_failing: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MonitorStatus {
    pub target_device_id: String,
    pub offline_threshold_minutes: u32,
    pub power_cycle_delay_minutes: u32,
    #[serde(rename = "lastOnlineTime", with = "chrono::serde::ts_milliseconds")]
    pub last_online: DateTime<Utc>,
    pub device_currently_off: bool,
    #[serde(
        with = "chrono::serde::ts_milliseconds_option",
        skip_serializing_if = "Option::is_none"
    )]
    pub device_turned_off_at: Option<DateTime<Utc>>,
    pub events: Vec<MonitorEvent>,
}

pub struct OutageMonitor {
    switch: Arc<dyn PowerSwitch>,
    probe: Arc<dyn ConnectivityProbe>,
    state: RwLock<MonitorState>,
    tick_guard: Mutex<()>,
    events: EventLog,
}

impl OutageMonitor {
    pub fn new(
        switch: Arc<dyn PowerSwitch>,
        probe: Arc<dyn ConnectivityProbe>,
        settings: MonitorSettings,
    ) -> Self {
        Self::starting_at(switch, probe, settings, Utc::now())
    }

    /// Monitor whose outage clock starts at `now`
    pub fn starting_at(
        switch: Arc<dyn PowerSwitch>,
        probe: Arc<dyn ConnectivityProbe>,
        settings: MonitorSettings,
        now: DateTime<Utc>,
    ) -> Self {
        let monitor = Self {
            switch,
            probe,
            state: RwLock::new(MonitorState {
                settings: settings.clone(),
                phase: MonitorPhase::OnlineMonitoring,
                last_online: now,
                probe_failing: false,
            }),
            tick_guard: Mutex::new(()),
            events: EventLog::default(),
        };

        monitor.record(
            Severity::Info,
            format!(
                "Monitor initialized. Threshold: {}m, Delay: {}m",
                settings.offline_threshold_minutes, settings.power_cycle_delay_minutes
            ),
        );
        monitor
    }

    fn record(&self, severity: Severity, message: impl Into<String>) {
        let event = MonitorEvent::new(severity, message);
        match severity {
            Severity::Error => log_error!("{}", event.message),
            Severity::Warning => log_warn!("{}", event.message),
            Severity::Info | Severity::Success => log_info!("{}", event.message),
        }
        self.events.push(event);
    }

    pub async fn phase(&self) -> MonitorPhase {
        self.state.read().await.phase
    }

    pub async fn tick(&self) {
        self.tick_at(Utc::now()).await
    }

    /// One scheduled decision. Ticks never overlap; failures end up in the
    /// event log only.
    pub async fn tick_at(&self, now: DateTime<Utc>) {
        let _tick = self.tick_guard.lock().await;

        let online = self.probe.is_online().await;

        let (settings, phase, last_online, recovered) = {
            let mut state = self.state.write().await;
            let recovered = online && state.probe_failing;
            state.probe_failing = !online;
            if online {
                state.last_online = now;
            }
            (state.settings.clone(), state.phase, state.last_online, recovered)
        };

        match phase {
            MonitorPhase::OnlineMonitoring => {
                if online {
                    let message = if recovered {
                        "Internet connectivity restored"
                    } else {
                        "Internet reachable"
                    };
                    self.record(Severity::Info, message);
                    return;
                }
                self.check_outage(now, last_online, &settings).await;
            }
            MonitorPhase::PoweredOffWaiting { turned_off_at } => {
                self.check_power_cycle_delay(now, turned_off_at, &settings).await;
            }
        }
    }

    async fn check_outage(
        &self,
        now: DateTime<Utc>,
        last_online: DateTime<Utc>,
        settings: &MonitorSettings,
    ) {
        let offline_for = now - last_online;
        let threshold = ChronoDuration::minutes(i64::from(settings.offline_threshold_minutes));

        if offline_for < threshold {
            self.record(
                Severity::Info,
                format!(
                    "Internet offline for {}m (threshold: {}m)",
                    offline_for.num_minutes(),
                    settings.offline_threshold_minutes
                ),
            );
            return;
        }

        let Some(target) = settings.target() else {
            self.record(Severity::Warning, "No target device configured for power cycle.");
            return;
        };

        self.record(
            Severity::Warning,
            format!(
                "Internet offline for {}m (threshold: {}m). Turning device OFF.",
                offline_for.num_minutes(),
                settings.offline_threshold_minutes
            ),
        );

        match self.switch.set_power(target, PowerCommand::Off).await {
            Ok(()) => {
                self.state.write().await.phase =
                    MonitorPhase::PoweredOffWaiting { turned_off_at: now };
                self.record(Severity::Success, format!("Device turned OFF: {}", target));
            }
            Err(e) => {
                self.record(Severity::Error, format!("Failed to turn device OFF: {}", e));
            }
        }
    }

    async fn check_power_cycle_delay(
        &self,
        now: DateTime<Utc>,
        turned_off_at: DateTime<Utc>,
        settings: &MonitorSettings,
    ) {
        let off_for = now - turned_off_at;
        let delay = ChronoDuration::minutes(i64::from(settings.power_cycle_delay_minutes));

        if off_for < delay {
            self.record(
                Severity::Info,
                format!(
                    "Waiting to restore power ({}m of {}m)",
                    off_for.num_minutes(),
                    settings.power_cycle_delay_minutes
                ),
            );
            return;
        }

        let Some(target) = settings.target() else {
            self.record(Severity::Warning, "No target device configured.");
            return;
        };

        self.record(
            Severity::Info,
            format!(
                "Power cycle delay elapsed ({}m). Turning device ON.",
                off_for.num_minutes()
            ),
        );

        match self.switch.set_power(target, PowerCommand::On).await {
            Ok(()) => {
                {
                    let mut state = self.state.write().await;
                    state.phase = MonitorPhase::OnlineMonitoring;
                    // grace period for the restarted equipment
                    state.last_online = now;
                }
                self.record(Severity::Success, format!("Device turned ON: {}", target));
            }
            Err(e) => {
                self.record(Severity::Error, format!("Failed to turn device ON: {}", e));
            }
        }
    }

    pub async fn status(&self) -> MonitorStatus {
        let state = self.state.read().await;
        let turned_off_at = match state.phase {
            MonitorPhase::PoweredOffWaiting { turned_off_at } => Some(turned_off_at),
            MonitorPhase::OnlineMonitoring => None,
        };

        MonitorStatus {
            target_device_id: state.settings.target_device_id.clone(),
            offline_threshold_minutes: state.settings.offline_threshold_minutes,
            power_cycle_delay_minutes: state.settings.power_cycle_delay_minutes,
            last_online: state.last_online,
            device_currently_off: turned_off_at.is_some(),
            device_turned_off_at: turned_off_at,
            events: self.events.snapshot(),
        }
    }

    /// Replace the settings; the current phase and timers are kept
    pub async fn update_settings(
        &self,
        target_device_id: &str,
        offline_threshold_minutes: u32,
        power_cycle_delay_minutes: u32,
    ) -> MonitorStatus {
        let target_device_id = target_device_id.trim();
        self.state.write().await.settings = MonitorSettings {
            target_device_id: target_device_id.to_string(),
            offline_threshold_minutes,
            power_cycle_delay_minutes,
        };

        self.record(
            Severity::Info,
            format!(
                "Settings updated. Target: {}, Threshold: {}m, Delay: {}m",
                target_device_id, offline_threshold_minutes, power_cycle_delay_minutes
            ),
        );

        self.status().await
    }

    /// Tick every `period`, first tick one period from now
    pub async fn run(self: Arc<Self>, period: Duration) {
        let mut interval = tokio::time::interval_at(Instant::now() + period, period);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);

        log_info!("Outage monitor running, checking every {}s", period.as_secs());
        loop {
            interval.tick().await;
            self.tick().await;
        }
    }

    pub fn spawn(self: &Arc<Self>, period: Duration) -> JoinHandle<()> {
        tokio::spawn(self.clone().run(period))
    }
}
