//! Counter-to-rate derivation shared by both collectors.
//!
//! The state holds the previous cumulative CPU times and per-drive disk
//! byte counters. A sample taken more than [`MAX_CACHE_AGE`] after the
//! previous one drops the whole state first, so rates start from zero
//! again rather than being averaged over the gap.

use std::collections::HashMap;
use std::time::{Duration, Instant};

use edgemon_common::round2;

pub(crate) const MAX_CACHE_AGE: Duration = Duration::from_secs(10 * 60);

/// Cumulative CPU time summed across all cores: every mode, and the
/// idle mode(s) alone. Units cancel out in the ratio, so jiffies,
/// seconds and 100 ns ticks are all fine.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub(crate) struct CpuTotals {
    pub total: f64,
    pub idle: f64,
}

/// Cumulative bytes read/written for one drive.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub(crate) struct DiskCounters {
    pub read_bytes: f64,
    pub write_bytes: f64,
}

#[derive(Debug, Default)]
pub(crate) struct RateState {
    last_sample: Option<Instant>,
    cpu: Option<CpuTotals>,
    disks: HashMap<String, DiskCounters>,
}

impl RateState {
    pub fn new() -> Self {
        Self::default()
    }

    /// True until the first sample is committed.
    pub fn is_first_sample(&self) -> bool {
        self.last_sample.is_none()
    }

    /// Seconds since the previous committed sample, if any.
    pub fn elapsed_secs(&self, now: Instant) -> Option<f64> {
        self.last_sample
            .map(|prev| now.saturating_duration_since(prev).as_secs_f64())
    }

    pub fn reset(&mut self) {
        *self = Self::default();
    }

    /// Drop the state if the previous sample is older than
    /// [`MAX_CACHE_AGE`]. Returns true when a reset happened.
    pub fn reset_if_stale(&mut self, now: Instant) -> bool {
        match self.last_sample {
            Some(prev) if now.saturating_duration_since(prev) > MAX_CACHE_AGE => {
                self.reset();
                true
            }
            _ => false,
        }
    }

    /// Derive CPU usage percent from the previous totals and store the
    /// current ones. 0 on the first sample and on counter anomalies
    /// (`Δtotal ≤ 0`).
    pub fn cpu_percent(&mut self, sample: CpuTotals) -> f64 {
        let percent = match self.cpu {
            Some(prev) => {
                let total_delta = sample.total - prev.total;
                let idle_delta = sample.idle - prev.idle;
                if total_delta <= 0.0 {
                    0.0
                } else {
                    round2(100.0 * (total_delta - idle_delta) / total_delta)
                }
            }
            None => 0.0,
        };
        self.cpu = Some(sample);
        percent
    }

    /// Derive read/write bytes-per-second for one drive and store the
    /// current counters. (0, 0) on a drive's first appearance or when no
    /// elapsed window is known.
    pub fn disk_rates(
        &mut self,
        drive: &str,
        counters: DiskCounters,
        elapsed_secs: Option<f64>,
    ) -> (f64, f64) {
        let rates = match (self.disks.get(drive), elapsed_secs) {
            (Some(prev), Some(dt)) if dt > 0.0 => (
                round2((counters.read_bytes - prev.read_bytes) / dt),
                round2((counters.write_bytes - prev.write_bytes) / dt),
            ),
            _ => (0.0, 0.0),
        };
        self.disks.insert(drive.to_string(), counters);
        rates
    }

    /// Record the wall-clock position of this sample. Call once per
    /// collect, after all counters have been fed in.
    pub fn commit(&mut self, now: Instant) {
        self.last_sample = Some(now);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn totals(total: f64, idle: f64) -> CpuTotals {
        CpuTotals { total, idle }
    }

    #[test]
    fn first_cpu_sample_is_zero() {
        let mut state = RateState::new();
        assert!(state.is_first_sample());
        assert_eq!(state.cpu_percent(totals(5000.0, 4000.0)), 0.0);
    }

    #[test]
    fn second_cpu_sample_computes_usage() {
        let mut state = RateState::new();
        state.cpu_percent(totals(10_000.0, 8_000.0));
        state.commit(Instant::now());
        // Δtotal = 1000, Δidle = 250 → 75.00%
        let pct = state.cpu_percent(totals(11_000.0, 8_250.0));
        assert_eq!(pct, 75.00);
    }

    #[test]
    fn cpu_counter_anomaly_yields_zero() {
        let mut state = RateState::new();
        state.cpu_percent(totals(10_000.0, 8_000.0));
        state.commit(Instant::now());
        // counter went backwards
        assert_eq!(state.cpu_percent(totals(9_000.0, 7_000.0)), 0.0);
    }

    #[test]
    fn disk_rates_need_a_baseline() {
        let mut state = RateState::new();
        let first = DiskCounters {
            read_bytes: 1_000_000.0,
            write_bytes: 2_000_000.0,
        };
        assert_eq!(state.disk_rates("sda1", first, None), (0.0, 0.0));
        state.commit(Instant::now());

        let second = DiskCounters {
            read_bytes: 1_000_000.0 + 4096.0 * 10.0,
            write_bytes: 2_000_000.0 + 8192.0 * 10.0,
        };
        let (r, w) = state.disk_rates("sda1", second, Some(10.0));
        assert_eq!(r, 4096.0);
        assert_eq!(w, 8192.0);
    }

    #[test]
    fn unknown_drive_starts_at_zero_even_mid_stream() {
        let mut state = RateState::new();
        state.disk_rates("sda1", DiskCounters::default(), None);
        state.commit(Instant::now());
        // a drive seen for the first time on the second sample
        let (r, w) = state.disk_rates(
            "sdb1",
            DiskCounters {
                read_bytes: 500.0,
                write_bytes: 500.0,
            },
            Some(10.0),
        );
        assert_eq!((r, w), (0.0, 0.0));
    }

    #[test]
    fn stale_state_resets_to_first_sample() {
        let mut state = RateState::new();
        state.cpu_percent(totals(10_000.0, 8_000.0));
        let eleven_minutes_ago = Instant::now()
            .checked_sub(Duration::from_secs(11 * 60))
            .expect("clock too close to boot");
        state.commit(eleven_minutes_ago);

        assert!(state.reset_if_stale(Instant::now()));
        assert!(state.is_first_sample());
        // next sample behaves like a first sample again
        assert_eq!(state.cpu_percent(totals(12_000.0, 9_000.0)), 0.0);
    }

    #[test]
    fn fresh_state_does_not_reset() {
        let mut state = RateState::new();
        state.commit(Instant::now());
        assert!(!state.reset_if_stale(Instant::now()));
        assert!(!state.is_first_sample());
    }
}
