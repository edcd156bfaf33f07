//! VM inventory entries, live status snapshots, and power actions.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::types::DbId;

/// A virtual machine as listed in the user's inventory.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Vm {
    pub id: DbId,
    pub hostname: String,
}

/// Used/max/percent triple reported for memory and CPU.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResourceUsage {
    pub used: u64,
    pub max: u64,
    pub percent: f64,
}

/// Network IO counters in bytes. The backing API names the inbound
/// counter `int` (`in` being reserved in most client languages).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NetIo {
    #[serde(rename = "int")]
    pub rx_bytes: u64,
    #[serde(rename = "out")]
    pub tx_bytes: u64,
}

/// Live status snapshot for a single VM, valid for one fetch cycle.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VmStatus {
    /// Free-form status string; see [`VmStatus::power_state`] for the
    /// recognised values.
    pub status: String,
    /// Disk usage in bytes.
    pub disk: u64,
    pub memory: ResourceUsage,
    pub cpu: ResourceUsage,
    pub net: NetIo,
}

/// Recognised values of the free-form status string.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PowerState {
    Running,
    Stopped,
    Starting,
    /// Anything the dashboard does not recognise.
    Unknown,
}

impl VmStatus {
    /// Classify the free-form status string.
    pub fn power_state(&self) -> PowerState {
        match self.status.as_str() {
            "running" => PowerState::Running,
            "stopped" => PowerState::Stopped,
            "starting" => PowerState::Starting,
            _ => PowerState::Unknown,
        }
    }
}

/// Power state-change request accepted by the backing API.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PowerAction {
    Start,
    Stop,
    Reboot,
}

impl PowerAction {
    /// The URL path segment for this action.
    pub fn as_segment(self) -> &'static str {
        match self {
            PowerAction::Start => "start",
            PowerAction::Stop => "stop",
            PowerAction::Reboot => "reboot",
        }
    }
}

impl std::fmt::Display for PowerAction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_segment())
    }
}

/// Poller-owned projection entry: a VM joined with its most recent
/// status (if any). Rebuilt every poll cycle, never persisted.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct VmWithStatus {
    #[serde(flatten)]
    pub vm: Vm,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status: Option<VmStatus>,
    pub is_loading_status: bool,
    pub last_updated: Option<DateTime<Utc>>,
}

impl VmWithStatus {
    /// Entry with no status yet, marked as loading (optimistic UI).
    pub fn loading(vm: Vm) -> Self {
        Self {
            vm,
            status: None,
            is_loading_status: true,
            last_updated: None,
        }
    }

    /// Entry with no status and no fetch in flight ("status unavailable").
    pub fn bare(vm: Vm) -> Self {
        Self {
            vm,
            status: None,
            is_loading_status: false,
            last_updated: None,
        }
    }
}
