//! Raw counter sampling for the builtin collector.
//!
//! `sysinfo` covers the gauge side (memory, partitions, space); these
//! probes read the cumulative counters the rate engine needs: per-mode
//! CPU time and per-device disk I/O bytes. One implementation per
//! target OS, selected at build time.

use std::collections::HashMap;
use std::io;

use crate::rates::{CpuTotals, DiskCounters};

#[cfg(target_os = "linux")]
mod linux {
    use super::*;
    use std::fs;

    const SECTOR_SIZE: f64 = 512.0;

    /// Aggregate line of /proc/stat:
    /// `cpu user nice system idle iowait irq softirq steal ...`.
    /// Total covers the first eight fields; idle is idle + iowait.
    pub fn cpu_totals() -> io::Result<CpuTotals> {
        let stat = fs::read_to_string("/proc/stat")?;
        parse_cpu_line(&stat).ok_or_else(|| {
            io::Error::new(io::ErrorKind::InvalidData, "no aggregate cpu line in /proc/stat")
        })
    }

    pub(super) fn parse_cpu_line(stat: &str) -> Option<CpuTotals> {
        let line = stat
            .lines()
            .find(|l| l.starts_with("cpu ") || l.starts_with("cpu\t"))?;
        let fields: Vec<f64> = line
            .split_whitespace()
            .skip(1)
            .take(8)
            .map(|f| f.parse().unwrap_or(0.0))
            .collect();
        if fields.len() < 5 {
            return None;
        }
        let total: f64 = fields.iter().sum();
        // idle + iowait
        let idle = fields[3] + fields.get(4).copied().unwrap_or(0.0);
        Some(CpuTotals { total, idle })
    }

    /// /proc/diskstats keyed by device name. Sectors are 512 bytes in
    /// this interface regardless of the physical sector size.
    pub fn disk_io_counters(_keys: &[String]) -> HashMap<String, DiskCounters> {
        match fs::read_to_string("/proc/diskstats") {
            Ok(contents) => parse_diskstats(&contents),
            Err(_) => HashMap::new(),
        }
    }

    pub(super) fn parse_diskstats(contents: &str) -> HashMap<String, DiskCounters> {
        let mut out = HashMap::new();
        for line in contents.lines() {
            let fields: Vec<&str> = line.split_whitespace().collect();
            // major minor name reads merged sectors_read ms writes merged sectors_written ...
            if fields.len() < 10 {
                continue;
            }
            let name = fields[2].to_string();
            let sectors_read: f64 = fields[5].parse().unwrap_or(0.0);
            let sectors_written: f64 = fields[9].parse().unwrap_or(0.0);
            out.insert(
                name,
                DiskCounters {
                    read_bytes: sectors_read * SECTOR_SIZE,
                    write_bytes: sectors_written * SECTOR_SIZE,
                },
            );
        }
        out
    }
}

#[cfg(target_os = "freebsd")]
mod freebsd {
    use super::*;
    use std::ffi::CString;

    // kern.cp_time: user, nice, sys, intr, idle
    const CPUSTATES: usize = 5;

    pub fn cpu_totals() -> io::Result<CpuTotals> {
        let name = CString::new("kern.cp_time").expect("static sysctl name");
        let mut times = [0 as libc::c_ulong; CPUSTATES];
        let mut len = std::mem::size_of_val(&times);
        let rc = unsafe {
            libc::sysctlbyname(
                name.as_ptr(),
                times.as_mut_ptr().cast(),
                &mut len,
                std::ptr::null(),
                0,
            )
        };
        if rc != 0 {
            return Err(io::Error::last_os_error());
        }
        let total: f64 = times.iter().map(|&t| t as f64).sum();
        let idle = times[CPUSTATES - 1] as f64;
        Ok(CpuTotals { total, idle })
    }

    /// Per-device I/O counters live behind libdevstat on FreeBSD; the
    /// builtin collector reports zero rates there and the exporter
    /// collector covers hosts that need disk throughput.
    pub fn disk_io_counters(_keys: &[String]) -> HashMap<String, DiskCounters> {
        HashMap::new()
    }
}

#[cfg(windows)]
mod windows {
    use super::*;
    use windows_sys::Win32::Foundation::{CloseHandle, FILETIME, INVALID_HANDLE_VALUE};
    use windows_sys::Win32::Storage::FileSystem::{
        CreateFileW, FILE_SHARE_READ, FILE_SHARE_WRITE, OPEN_EXISTING,
    };
    use windows_sys::Win32::System::Ioctl::{DISK_PERFORMANCE, IOCTL_DISK_PERFORMANCE};
    use windows_sys::Win32::System::SystemInformation::GetSystemTimes;
    use windows_sys::Win32::System::IO::DeviceIoControl;

    fn filetime_ticks(ft: &FILETIME) -> f64 {
        ((ft.dwHighDateTime as u64) << 32 | ft.dwLowDateTime as u64) as f64
    }

    /// GetSystemTimes returns cumulative idle/kernel/user time in 100 ns
    /// ticks; kernel time includes idle time, so total = kernel + user.
    pub fn cpu_totals() -> io::Result<CpuTotals> {
        let mut idle = FILETIME {
            dwLowDateTime: 0,
            dwHighDateTime: 0,
        };
        let mut kernel = idle;
        let mut user = idle;
        let ok = unsafe { GetSystemTimes(&mut idle, &mut kernel, &mut user) };
        if ok == 0 {
            return Err(io::Error::last_os_error());
        }
        Ok(CpuTotals {
            total: filetime_ticks(&kernel) + filetime_ticks(&user),
            idle: filetime_ticks(&idle),
        })
    }

    /// IOCTL_DISK_PERFORMANCE per logical drive. Requires the diskperf
    /// counters to be enabled, which is the default on server SKUs.
    pub fn disk_io_counters(keys: &[String]) -> HashMap<String, DiskCounters> {
        let mut out = HashMap::new();
        for drive in keys {
            if let Some(counters) = query_drive(drive) {
                out.insert(drive.clone(), counters);
            }
        }
        out
    }

    fn query_drive(drive: &str) -> Option<DiskCounters> {
        // drive is "C:"; the volume device path is \\.\C:
        let path: Vec<u16> = format!(r"\\.\{drive}")
            .encode_utf16()
            .chain(std::iter::once(0))
            .collect();
        let handle = unsafe {
            CreateFileW(
                path.as_ptr(),
                0,
                FILE_SHARE_READ | FILE_SHARE_WRITE,
                std::ptr::null(),
                OPEN_EXISTING,
                0,
                std::ptr::null_mut(),
            )
        };
        if handle == INVALID_HANDLE_VALUE {
            return None;
        }
        let mut perf: DISK_PERFORMANCE = unsafe { std::mem::zeroed() };
        let mut returned = 0u32;
        let ok = unsafe {
            DeviceIoControl(
                handle,
                IOCTL_DISK_PERFORMANCE,
                std::ptr::null(),
                0,
                (&mut perf as *mut DISK_PERFORMANCE).cast(),
                std::mem::size_of::<DISK_PERFORMANCE>() as u32,
                &mut returned,
                std::ptr::null_mut(),
            )
        };
        unsafe { CloseHandle(handle) };
        if ok == 0 {
            return None;
        }
        Some(DiskCounters {
            read_bytes: perf.BytesRead as f64,
            write_bytes: perf.BytesWritten as f64,
        })
    }
}

#[cfg(target_os = "linux")]
pub(crate) use linux::{cpu_totals, disk_io_counters};

#[cfg(target_os = "freebsd")]
pub(crate) use freebsd::{cpu_totals, disk_io_counters};

#[cfg(windows)]
pub(crate) use windows::{cpu_totals, disk_io_counters};

#[cfg(not(any(target_os = "linux", target_os = "freebsd", windows)))]
pub(crate) fn cpu_totals() -> io::Result<CpuTotals> {
    Err(io::Error::new(
        io::ErrorKind::Unsupported,
        "no native cpu counter source on this platform",
    ))
}

#[cfg(not(any(target_os = "linux", target_os = "freebsd", windows)))]
pub(crate) fn disk_io_counters(_keys: &[String]) -> HashMap<String, DiskCounters> {
    HashMap::new()
}
