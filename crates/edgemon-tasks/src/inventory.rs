//! One-shot hardware/OS snapshot. Always collected fresh.

use std::net::IpAddr;

use edgemon_common::round2;
use edgemon_common::types::{
    AgentInfo, CpuInfo, DiskInfo, Inventory, MemoryInfo, NetworkInfo, OsInfo,
};
use sysinfo::{Disks, Networks, System};

const GIB: f64 = 1024.0 * 1024.0 * 1024.0;
const MIN_DISK_BYTES: u64 = 1024 * 1024 * 1024;

pub fn collect_inventory(version: &str) -> Inventory {
    let mut system = System::new();
    system.refresh_memory();
    system.refresh_cpu_all();

    Inventory {
        agent: AgentInfo {
            version: version.to_string(),
        },
        os: os_info(),
        cpu: cpu_info(&system),
        memory: MemoryInfo {
            total_gb: round2(system.total_memory() as f64 / GIB),
            available_gb: round2(system.available_memory() as f64 / GIB),
        },
        disks: disk_info(),
        network: primary_network(),
        timestamp: edgemon_common::now_rfc3339(),
    }
}

fn os_info() -> OsInfo {
    OsInfo {
        platform: std::env::consts::OS.to_string(),
        name: System::name().unwrap_or_else(|| "Unknown".to_string()),
        version: System::os_version().unwrap_or_else(|| "Unknown".to_string()),
        build: System::kernel_version().unwrap_or_else(|| "Unknown".to_string()),
    }
}

fn cpu_info(system: &System) -> CpuInfo {
    CpuInfo {
        cores: system.cpus().len(),
        model: system
            .cpus()
            .first()
            .map(|cpu| cpu.brand().trim().to_string())
            .filter(|brand| !brand.is_empty())
            .unwrap_or_else(|| "Unknown".to_string()),
    }
}

fn disk_info() -> Vec<DiskInfo> {
    let disks = Disks::new_with_refreshed_list();
    let mut seen: Vec<String> = Vec::new();
    let mut out = Vec::new();
    for disk in disks.iter() {
        let total = disk.total_space();
        if total < MIN_DISK_BYTES {
            continue;
        }
        let fs = disk.file_system().to_string_lossy().to_ascii_lowercase();
        if matches!(
            fs.as_str(),
            "tmpfs" | "devfs" | "devtmpfs" | "squashfs" | "overlay" | "proc" | "sysfs"
        ) || fs.starts_with("cgroup")
        {
            continue;
        }
        let drive = drive_name(&disk.mount_point().to_string_lossy());
        if seen.contains(&drive) {
            continue;
        }
        seen.push(drive.clone());
        out.push(DiskInfo {
            drive,
            total_gb: round2(total as f64 / GIB),
            free_gb: round2(disk.available_space() as f64 / GIB),
        });
    }
    out
}

fn drive_name(mount: &str) -> String {
    if cfg!(windows) && mount.len() >= 2 && mount.as_bytes()[1] == b':' {
        return mount[..2].to_string();
    }
    mount.to_string()
}

/// First non-loopback IPv4 address found on any interface.
fn primary_network() -> NetworkInfo {
    let networks = Networks::new_with_refreshed_list();
    for (_name, data) in networks.iter() {
        for ip_network in data.ip_networks() {
            if let IpAddr::V4(v4) = ip_network.addr {
                if !v4.is_loopback() {
                    return NetworkInfo {
                        primary_ip: v4.to_string(),
                    };
                }
            }
        }
    }
    NetworkInfo {
        primary_ip: "Unknown".to_string(),
    }
}
