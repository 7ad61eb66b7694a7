use serde::{Deserialize, Serialize};

/// System metrics sampled by a collector.
///
/// `cpu_usage_percent` and the per-disk I/O rates are derived from two
/// successive counter samples and are 0 on the first sample after a
/// collector is created or its cache is reset. Gauge fields (memory,
/// disk space) are meaningful on every sample.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SystemMetrics {
    pub cpu_usage_percent: f64,
    pub memory_free_gb: f64,
    pub disks: Vec<DiskMetrics>,
    pub timestamp: String,
}

/// Metrics for a single disk drive.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DiskMetrics {
    /// Drive letter (`C:`) on Windows, mount point (`/`, `/home`) on Unix.
    pub drive: String,
    pub free_percent: f64,
    pub free_gb: f64,
    pub total_gb: f64,
    pub read_bytes_per_sec: f64,
    pub write_bytes_per_sec: f64,
}

/// Canonical service state. Every OS-native state maps into this set.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ServiceState {
    Running,
    Stopped,
    Starting,
    Stopping,
    Error,
    Unknown,
    NotInstalled,
}

impl std::fmt::Display for ServiceState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            ServiceState::Running => "Running",
            ServiceState::Stopped => "Stopped",
            ServiceState::Starting => "Starting",
            ServiceState::Stopping => "Stopping",
            ServiceState::Error => "Error",
            ServiceState::Unknown => "Unknown",
            ServiceState::NotInstalled => "NotInstalled",
        };
        f.write_str(s)
    }
}

/// Status of one named service, as published by the service check task
/// and returned from service control commands.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServiceStatus {
    pub name: String,
    pub status: ServiceState,
}

/// Liveness message published on the heartbeat subject.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Heartbeat {
    pub version: String,
    pub timestamp: String,
}

/// One-shot hardware/OS snapshot. Collected fresh each time, never cached.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Inventory {
    pub agent: AgentInfo,
    pub os: OsInfo,
    pub cpu: CpuInfo,
    pub memory: MemoryInfo,
    pub disks: Vec<DiskInfo>,
    pub network: NetworkInfo,
    pub timestamp: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AgentInfo {
    pub version: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct OsInfo {
    /// "linux", "windows", "freebsd", ...
    pub platform: String,
    /// Distribution or product name, e.g. "Ubuntu 24.04".
    pub name: String,
    pub version: String,
    /// Kernel release or build number.
    pub build: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CpuInfo {
    /// Logical core count.
    pub cores: usize,
    pub model: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MemoryInfo {
    pub total_gb: f64,
    pub available_gb: f64,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DiskInfo {
    pub drive: String,
    pub total_gb: f64,
    pub free_gb: f64,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct NetworkInfo {
    /// Primary non-loopback IPv4 address.
    pub primary_ip: String,
}

/// Agent self-monitoring metrics, returned by the health command.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AgentMetrics {
    pub memory_usage_mb: f64,
    /// Tokio runtime worker threads.
    pub worker_threads: usize,
    /// Tasks currently alive on the runtime.
    pub alive_tasks: usize,
    pub uptime_seconds: i64,
    pub commands_processed: u64,
    pub commands_errored: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_error_time: Option<String>,
}

/// Execution counters and last-success timestamps for the scheduled tasks.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TaskHealth {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_heartbeat: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_metrics: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_service_check: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_inventory: Option<String>,
    pub heartbeat_count: u64,
    pub metrics_count: u64,
    pub metrics_failures: u64,
    pub service_check_count: u64,
    pub inventory_count: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn service_state_serializes_as_canonical_string() {
        let st = ServiceStatus {
            name: "nginx".into(),
            status: ServiceState::NotInstalled,
        };
        let json = serde_json::to_value(&st).unwrap();
        assert_eq!(json["status"], "NotInstalled");
        assert_eq!(json["name"], "nginx");
    }

    #[test]
    fn agent_metrics_omits_absent_error() {
        let m = AgentMetrics::default();
        let json = serde_json::to_string(&m).unwrap();
        assert!(!json.contains("last_error"));

        let m = AgentMetrics {
            last_error: Some("boom".into()),
            last_error_time: Some("2024-01-01T00:00:00Z".into()),
            ..Default::default()
        };
        let json = serde_json::to_string(&m).unwrap();
        assert!(json.contains("\"last_error\":\"boom\""));
    }

    #[test]
    fn disk_metrics_field_names_are_stable() {
        let d = DiskMetrics {
            drive: "C:".into(),
            free_percent: 41.2,
            free_gb: 103.1,
            total_gb: 250.0,
            read_bytes_per_sec: 0.0,
            write_bytes_per_sec: 0.0,
        };
        let json = serde_json::to_value(&d).unwrap();
        for key in [
            "drive",
            "free_percent",
            "free_gb",
            "total_gb",
            "read_bytes_per_sec",
            "write_bytes_per_sec",
        ] {
            assert!(json.get(key).is_some(), "missing field {key}");
        }
    }
}
