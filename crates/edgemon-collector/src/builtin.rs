//! Native collector: samples the OS directly instead of scraping an
//! exporter.

use std::sync::Mutex;
use std::time::Instant;

use async_trait::async_trait;
use edgemon_common::types::{DiskMetrics, SystemMetrics};
use edgemon_common::{now_rfc3339, round2};
use sysinfo::{Disks, System};
use tracing::{debug, warn};

use crate::rates::RateState;
use crate::validate::validate;
use crate::{probe, CollectError, Collector};

const GIB: f64 = 1024.0 * 1024.0 * 1024.0;
const MIN_PARTITION_BYTES: u64 = 1024 * 1024 * 1024;

pub struct BuiltinCollector {
    system: Mutex<System>,
    disks: Mutex<Disks>,
    state: Mutex<RateState>,
}

impl Default for BuiltinCollector {
    fn default() -> Self {
        Self::new()
    }
}

impl BuiltinCollector {
    pub fn new() -> Self {
        Self {
            system: Mutex::new(System::new()),
            disks: Mutex::new(Disks::new_with_refreshed_list()),
            state: Mutex::new(RateState::new()),
        }
    }
}

#[async_trait]
impl Collector for BuiltinCollector {
    async fn collect(&self) -> Result<SystemMetrics, CollectError> {
        let now = Instant::now();

        let mut metrics = SystemMetrics {
            timestamp: now_rfc3339(),
            ..Default::default()
        };

        {
            let mut system = self.system.lock().expect("collector system lock poisoned");
            system.refresh_memory();
            metrics.memory_free_gb = round2(system.available_memory() as f64 / GIB);
        }

        // Partition gauges first; the I/O probe only needs the keys.
        let mut entries: Vec<(DiskMetrics, String)> = Vec::new();
        {
            let mut disks = self.disks.lock().expect("collector disks lock poisoned");
            disks.refresh(true);
            for disk in disks.iter() {
                let fs = disk.file_system().to_string_lossy().to_ascii_lowercase();
                if skip_filesystem(&fs) {
                    continue;
                }
                let total = disk.total_space();
                if total < MIN_PARTITION_BYTES {
                    continue;
                }
                let available = disk.available_space();
                let mount = disk.mount_point().to_string_lossy().to_string();
                let device = disk.name().to_string_lossy().to_string();
                let dm = DiskMetrics {
                    drive: drive_name(&mount),
                    total_gb: round2(total as f64 / GIB),
                    free_gb: round2(available as f64 / GIB),
                    free_percent: round2(available as f64 / total as f64 * 100.0),
                    ..Default::default()
                };
                entries.push((dm, io_key(&mount, &device)));
            }
        }

        let keys: Vec<String> = entries.iter().map(|(_, k)| k.clone()).collect();
        let io_counters = probe::disk_io_counters(&keys);
        let cpu = probe::cpu_totals();

        let first_sample;
        {
            let mut state = self.state.lock().expect("collector cache lock poisoned");
            if state.reset_if_stale(now) {
                warn!("metrics cache went stale, rates reset to baseline");
            }
            first_sample = state.is_first_sample();
            let elapsed = state.elapsed_secs(now);

            match cpu {
                Ok(totals) => metrics.cpu_usage_percent = state.cpu_percent(totals),
                Err(e) => warn!(error = %e, "failed to read cpu counters"),
            }

            for (mut dm, key) in entries {
                if let Some(counters) = io_counters.get(&key) {
                    let (read, write) = state.disk_rates(&key, *counters, elapsed);
                    dm.read_bytes_per_sec = read;
                    dm.write_bytes_per_sec = write;
                }
                metrics.disks.push(dm);
            }

            state.commit(now);
        }

        validate(&metrics, first_sample)?;

        debug!(
            cpu = metrics.cpu_usage_percent,
            memory_free_gb = metrics.memory_free_gb,
            disks = metrics.disks.len(),
            first_sample,
            "collected builtin metrics"
        );
        Ok(metrics)
    }

    fn name(&self) -> String {
        "builtin".to_string()
    }

    fn reset_cache(&self) {
        self.state
            .lock()
            .expect("collector cache lock poisoned")
            .reset();
    }
}

/// Pseudo filesystems carry no capacity worth reporting.
fn skip_filesystem(fs: &str) -> bool {
    matches!(
        fs,
        "tmpfs" | "devfs" | "devtmpfs" | "squashfs" | "overlay" | "proc" | "sysfs"
    ) || fs.starts_with("cgroup")
}

/// Windows reports `C:\` mount points; shorten to the drive letter. Unix
/// keeps the mount point as-is.
fn drive_name(mount: &str) -> String {
    if cfg!(windows) && mount.len() >= 2 && mount.as_bytes()[1] == b':' {
        return mount[..2].to_string();
    }
    mount.to_string()
}

/// Key used to look up I/O counters: drive letter on Windows, device
/// basename (`sda1`, `nvme0n1p2`) on Unix.
fn io_key(mount: &str, device: &str) -> String {
    if cfg!(windows) {
        return drive_name(mount);
    }
    device
        .strip_prefix("/dev/")
        .unwrap_or(device)
        .to_string()
}
