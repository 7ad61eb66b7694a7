//! Self-monitoring counters. Owned by the executor, never global.

use std::sync::Mutex;
use std::time::Instant;

use edgemon_common::now_rfc3339;
use edgemon_common::round2;
use edgemon_common::types::{AgentMetrics, TaskHealth};
use sysinfo::{ProcessesToUpdate, System};

/// Command-side counters plus process-level gauges.
pub struct AgentStats {
    started: Instant,
    inner: Mutex<CommandCounters>,
}

#[derive(Default)]
struct CommandCounters {
    processed: u64,
    errored: u64,
    last_error: Option<String>,
    last_error_time: Option<String>,
}

impl AgentStats {
    pub fn new() -> Self {
        Self {
            started: Instant::now(),
            inner: Mutex::new(CommandCounters::default()),
        }
    }

    pub fn record_success(&self) {
        let mut inner = self.inner.lock().expect("stats lock poisoned");
        inner.processed += 1;
    }

    /// Errors count as processed too.
    pub fn record_error(&self, error: &str) {
        let mut inner = self.inner.lock().expect("stats lock poisoned");
        inner.errored += 1;
        inner.processed += 1;
        inner.last_error = Some(error.to_string());
        inner.last_error_time = Some(now_rfc3339());
    }

    pub fn snapshot(&self) -> AgentMetrics {
        let (worker_threads, alive_tasks) = runtime_gauges();
        let inner = self.inner.lock().expect("stats lock poisoned");
        AgentMetrics {
            memory_usage_mb: process_memory_mb().unwrap_or(0.0),
            worker_threads,
            alive_tasks,
            uptime_seconds: self.started.elapsed().as_secs() as i64,
            commands_processed: inner.processed,
            commands_errored: inner.errored,
            last_error: inner.last_error.clone(),
            last_error_time: inner.last_error_time.clone(),
        }
    }
}

impl Default for AgentStats {
    fn default() -> Self {
        Self::new()
    }
}

fn runtime_gauges() -> (usize, usize) {
    match tokio::runtime::Handle::try_current() {
        Ok(handle) => {
            let metrics = handle.metrics();
            (metrics.num_workers(), metrics.num_alive_tasks())
        }
        Err(_) => (0, 0),
    }
}

/// Resident memory of this process in MB.
fn process_memory_mb() -> Option<f64> {
    let pid = sysinfo::get_current_pid().ok()?;
    let mut system = System::new();
    system.refresh_processes(ProcessesToUpdate::Some(&[pid]), true);
    let process = system.process(pid)?;
    Some(round2(process.memory() as f64 / (1024.0 * 1024.0)))
}

/// Scheduled-task execution counters.
pub struct TaskStats {
    inner: Mutex<TaskHealth>,
}

impl TaskStats {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(TaskHealth::default()),
        }
    }

    pub fn record_heartbeat(&self) {
        let mut inner = self.inner.lock().expect("stats lock poisoned");
        inner.last_heartbeat = Some(now_rfc3339());
        inner.heartbeat_count += 1;
    }

    pub fn record_metrics_success(&self) {
        let mut inner = self.inner.lock().expect("stats lock poisoned");
        inner.last_metrics = Some(now_rfc3339());
        inner.metrics_count += 1;
    }

    pub fn record_metrics_failure(&self) {
        let mut inner = self.inner.lock().expect("stats lock poisoned");
        inner.metrics_failures += 1;
    }

    pub fn record_service_check(&self) {
        let mut inner = self.inner.lock().expect("stats lock poisoned");
        inner.last_service_check = Some(now_rfc3339());
        inner.service_check_count += 1;
    }

    pub fn record_inventory(&self) {
        let mut inner = self.inner.lock().expect("stats lock poisoned");
        inner.last_inventory = Some(now_rfc3339());
        inner.inventory_count += 1;
    }

    pub fn snapshot(&self) -> TaskHealth {
        self.inner.lock().expect("stats lock poisoned").clone()
    }
}

impl Default for TaskStats {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn errors_count_as_processed() {
        let stats = AgentStats::new();
        stats.record_success();
        stats.record_error("service not in allowed list: postgresql");
        stats.record_success();

        let snap = stats.snapshot();
        assert_eq!(snap.commands_processed, 3);
        assert_eq!(snap.commands_errored, 1);
        assert!(snap.last_error.as_deref().unwrap().contains("postgresql"));
        assert!(snap.last_error_time.is_some());
    }

    #[test]
    fn success_leaves_last_error_untouched() {
        let stats = AgentStats::new();
        stats.record_error("boom");
        stats.record_success();
        let snap = stats.snapshot();
        assert_eq!(snap.last_error.as_deref(), Some("boom"));
    }

    #[tokio::test]
    async fn runtime_gauges_are_visible_inside_the_runtime() {
        let stats = AgentStats::new();
        let snap = stats.snapshot();
        assert!(snap.worker_threads > 0);
    }

    #[test]
    fn task_counters_accumulate() {
        let stats = TaskStats::new();
        stats.record_heartbeat();
        stats.record_heartbeat();
        stats.record_metrics_success();
        stats.record_metrics_failure();
        stats.record_service_check();
        stats.record_inventory();

        let snap = stats.snapshot();
        assert_eq!(snap.heartbeat_count, 2);
        assert_eq!(snap.metrics_count, 1);
        assert_eq!(snap.metrics_failures, 1);
        assert_eq!(snap.service_check_count, 1);
        assert_eq!(snap.inventory_count, 1);
        assert!(snap.last_heartbeat.is_some());
        assert!(snap.last_metrics.is_some());
    }
}
