//! Sanity checks applied to every sample before it is handed to the
//! scheduler. A failed check suppresses the publish for that cycle.

use edgemon_common::types::SystemMetrics;

use crate::CollectError;

/// Rate-derived fields are skipped on the first sample (they are
/// contractually 0 there); gauge fields are always checked.
pub(crate) fn validate(metrics: &SystemMetrics, first_sample: bool) -> Result<(), CollectError> {
    if !first_sample && !(0.0..=100.0).contains(&metrics.cpu_usage_percent) {
        return Err(CollectError::Invalid(format!(
            "cpu usage {:.2}% out of range 0-100",
            metrics.cpu_usage_percent
        )));
    }

    if !metrics.memory_free_gb.is_finite() || metrics.memory_free_gb < 0.0 {
        return Err(CollectError::Invalid(format!(
            "memory free {:.2} GB cannot be negative",
            metrics.memory_free_gb
        )));
    }

    for disk in &metrics.disks {
        if !(0.0..=100.0).contains(&disk.free_percent) {
            return Err(CollectError::Invalid(format!(
                "disk {} free percent {:.2} out of range 0-100",
                disk.drive, disk.free_percent
            )));
        }
        if disk.free_gb < 0.0 {
            return Err(CollectError::Invalid(format!(
                "disk {} free space {:.2} GB cannot be negative",
                disk.drive, disk.free_gb
            )));
        }
        if disk.total_gb < 0.0 {
            return Err(CollectError::Invalid(format!(
                "disk {} total space {:.2} GB cannot be negative",
                disk.drive, disk.total_gb
            )));
        }
        if !first_sample {
            if disk.read_bytes_per_sec < 0.0 {
                return Err(CollectError::Invalid(format!(
                    "disk {} read rate {:.2} B/s cannot be negative",
                    disk.drive, disk.read_bytes_per_sec
                )));
            }
            if disk.write_bytes_per_sec < 0.0 {
                return Err(CollectError::Invalid(format!(
                    "disk {} write rate {:.2} B/s cannot be negative",
                    disk.drive, disk.write_bytes_per_sec
                )));
            }
        }
    }

    Ok(())
}
