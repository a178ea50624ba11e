use std::fmt;
use std::sync::{Arc, RwLock};
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use signalforge_wire::{AlertLevel, DeviceFault, HeartbeatPayload};

use crate::status::ConnectionStatus;

/// Operating mode, fixed for the lifetime of a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum DeviceMode {
    Normal,
    Auto,
    Maintenance,
}

impl fmt::Display for DeviceMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            DeviceMode::Normal => "NORMAL",
            DeviceMode::Auto => "AUTO",
            DeviceMode::Maintenance => "MAINTENANCE",
        };
        f.write_str(name)
    }
}

/// One telemetry-emitting endpoint.
///
/// Identity and mode are set at construction and immutable during a
/// session. Telemetry readings are mutated by the external telemetry
/// collaborator and read by the heartbeat emitter under the shared
/// lock; the protocol core itself never writes them.
#[derive(Debug, Clone)]
pub struct Device {
    pub id: String,
    pub serial_number: String,
    pub mode: DeviceMode,
    pub temperature: f32,
    pub pressure: f32,
    pub o2_concentration: f32,
    pub last_maintenance: DateTime<Utc>,
    pub heartbeat_interval: Duration,
    faults: Vec<DeviceFault>,
}

/// A device shared between the telemetry collaborator and the
/// session's tasks.
pub type SharedDevice = Arc<RwLock<Device>>;

impl Device {
    pub fn new(
        id: impl Into<String>,
        serial_number: impl Into<String>,
        mode: DeviceMode,
        heartbeat_interval: Duration,
    ) -> Self {
        Self {
            id: id.into(),
            serial_number: serial_number.into(),
            mode,
            temperature: 22.5,
            pressure: 1.2,
            o2_concentration: 21.0,
            last_maintenance: Utc::now(),
            heartbeat_interval,
            faults: Vec::new(),
        }
    }

    pub fn into_shared(self) -> SharedDevice {
        Arc::new(RwLock::new(self))
    }

    /// Record a fault. Faults accumulate as an audit trail and ride
    /// along on every outgoing heartbeat.
    pub fn record_fault(&mut self, fault: DeviceFault) {
        self.faults.push(fault);
    }

    pub fn faults(&self) -> &[DeviceFault] {
        &self.faults
    }

    /// Explicitly acknowledge and clear the accumulated fault list.
    /// Nothing else ever removes faults.
    pub fn acknowledge_faults(&mut self) -> Vec<DeviceFault> {
        std::mem::take(&mut self.faults)
    }

    /// Most severe outstanding alert, if any fault is recorded.
    pub fn highest_alert(&self) -> Option<AlertLevel> {
        self.faults.iter().map(|fault| fault.alert_level).max()
    }

    /// Telemetry snapshot for one heartbeat envelope.
    pub fn heartbeat_snapshot(&self, status: ConnectionStatus) -> HeartbeatPayload {
        HeartbeatPayload {
            device_id: self.id.clone(),
            serial_number: self.serial_number.clone(),
            temperature: self.temperature,
            mode: self.mode.to_string(),
            last_maintenance: self.last_maintenance,
            connection_status: status.as_str().to_string(),
        }
    }
}
