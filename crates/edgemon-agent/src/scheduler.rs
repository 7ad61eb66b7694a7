//! Periodic jobs: heartbeat, system metrics, service check, inventory.
//!
//! Each job runs on its own task with a fixed-period ticker. Missed
//! ticks are coalesced so at most one execution is ever in flight per
//! job, and a slow job never delays the others. A panicking tick is
//! logged and the job carries on at its next tick.

use std::sync::Arc;
use std::time::Duration;

use edgemon_bus::BusClient;
use edgemon_common::now_rfc3339;
use edgemon_common::subjects::DeviceIdentity;
use edgemon_common::types::Heartbeat;
use edgemon_tasks::Executor;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::config::TasksConfig;

pub struct Scheduler {
    jobs: Vec<JoinHandle<()>>,
    token: CancellationToken,
}

impl Scheduler {
    /// Spawn every enabled job. Jobs observe a child of the root token,
    /// so a root cancel stops them all.
    pub fn start(
        bus: Arc<BusClient>,
        executor: Arc<Executor>,
        identity: &DeviceIdentity,
        tasks: &TasksConfig,
        version: &str,
        parent: &CancellationToken,
    ) -> Self {
        let token = parent.child_token();
        let mut jobs = Vec::new();

        if tasks.heartbeat_enabled() {
            let bus = bus.clone();
            let executor = executor.clone();
            let subject = identity.telemetry_subject("heartbeat");
            let version = version.to_string();
            jobs.push(spawn_job(
                "heartbeat",
                tasks.heartbeat_interval(),
                token.clone(),
                move || {
                    heartbeat_tick(bus.clone(), executor.clone(), subject.clone(), version.clone())
                },
            ));
        }

        if tasks.system_metrics_enabled() {
            let bus = bus.clone();
            let executor = executor.clone();
            let subject = identity.telemetry_subject("system");
            jobs.push(spawn_job(
                "system_metrics",
                tasks.system_metrics_interval(),
                token.clone(),
                move || metrics_tick(bus.clone(), executor.clone(), subject.clone()),
            ));
        }

        if tasks.service_check_enabled() && !executor.policy().allowed_services.is_empty() {
            let bus = bus.clone();
            let executor = executor.clone();
            let subject = identity.telemetry_subject("services");
            jobs.push(spawn_job(
                "service_check",
                tasks.service_check_interval(),
                token.clone(),
                move || service_check_tick(bus.clone(), executor.clone(), subject.clone()),
            ));
        }

        if tasks.inventory_enabled() {
            let bus = bus.clone();
            let executor = executor.clone();
            let subject = identity.telemetry_subject("inventory");
            let version = version.to_string();
            jobs.push(spawn_job(
                "inventory",
                tasks.inventory_interval(),
                token.clone(),
                move || {
                    inventory_tick(bus.clone(), executor.clone(), subject.clone(), version.clone())
                },
            ));
        }

        info!(jobs = jobs.len(), "scheduler started");
        Self { jobs, token }
    }

    /// Cancel and wait for in-flight ticks, bounded by `budget`.
    pub async fn shutdown(self, budget: Duration) {
        self.token.cancel();
        let deadline = tokio::time::Instant::now() + budget;
        for job in self.jobs {
            let remaining = deadline.saturating_duration_since(tokio::time::Instant::now());
            if tokio::time::timeout(remaining, job).await.is_err() {
                warn!("scheduler job did not stop within the shutdown budget");
            }
        }
        info!("scheduler stopped");
    }
}

/// Fixed-period ticker with coalescing and per-tick panic isolation.
fn spawn_job<F, Fut>(
    name: &'static str,
    period: Duration,
    token: CancellationToken,
    tick: F,
) -> JoinHandle<()>
where
    F: Fn() -> Fut + Send + 'static,
    Fut: std::future::Future<Output = ()> + Send + 'static,
{
    tokio::spawn(async move {
        info!(job = name, period = ?period, "job started");
        let mut ticker = tokio::time::interval(period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        loop {
            tokio::select! {
                _ = token.cancelled() => break,
                _ = ticker.tick() => {
                    // The tick body runs on its own task: awaiting it
                    // keeps executions serial per job, and a panic ends
                    // the tick rather than the ticker.
                    if let Err(join_error) = tokio::spawn(tick()).await {
                        if join_error.is_panic() {
                            error!(job = name, "job tick panicked");
                        }
                    }
                }
            }
        }
        debug!(job = name, "job stopped");
    })
}

async fn heartbeat_tick(
    bus: Arc<BusClient>,
    executor: Arc<Executor>,
    subject: String,
    version: String,
) {
    let heartbeat = Heartbeat {
        version,
        timestamp: now_rfc3339(),
    };
    let Ok(payload) = serde_json::to_vec(&heartbeat) else {
        warn!("failed to encode heartbeat");
        return;
    };
    match bus.publish_telemetry(subject, payload).await {
        Ok(()) => executor.record_heartbeat(),
        Err(e) => warn!(error = %e, "heartbeat publish failed"),
    }
}

async fn metrics_tick(bus: Arc<BusClient>, executor: Arc<Executor>, subject: String) {
    let metrics = match executor.collect_metrics().await {
        Ok(metrics) => metrics,
        Err(e) => {
            warn!(collector = %executor.collector_name(), error = %e, "metrics collection failed");
            executor.record_metrics_failure();
            return;
        }
    };
    let payload = match serde_json::to_vec(&metrics) {
        Ok(payload) => payload,
        Err(e) => {
            warn!(error = %e, "failed to encode system metrics");
            executor.record_metrics_failure();
            return;
        }
    };
    match bus.publish_telemetry(subject, payload).await {
        Ok(()) => executor.record_metrics_success(),
        Err(e) => {
            warn!(error = %e, "system metrics publish failed");
            executor.record_metrics_failure();
        }
    }
}

async fn service_check_tick(bus: Arc<BusClient>, executor: Arc<Executor>, subject: String) {
    let statuses = executor.service_statuses().await;
    if statuses.is_empty() {
        debug!("no services configured, skipping service check publish");
        return;
    }
    let Ok(payload) = serde_json::to_vec(&statuses) else {
        warn!("failed to encode service statuses");
        return;
    };
    match bus.publish_telemetry(subject, payload).await {
        Ok(()) => executor.record_service_check(),
        Err(e) => warn!(error = %e, "service status publish failed"),
    }
}

async fn inventory_tick(
    bus: Arc<BusClient>,
    executor: Arc<Executor>,
    subject: String,
    version: String,
) {
    let inventory = executor.inventory(&version);
    let Ok(payload) = serde_json::to_vec(&inventory) else {
        warn!("failed to encode inventory");
        return;
    };
    // Inventory is rare enough to wait for the stream acknowledgement.
    match bus
        .publish_telemetry_sync(subject, payload, Duration::from_secs(10))
        .await
    {
        Ok(()) => executor.record_inventory(),
        Err(e) => warn!(error = %e, "inventory publish failed"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn jobs_tick_and_stop_on_cancel() {
        let count = Arc::new(AtomicUsize::new(0));
        let token = CancellationToken::new();
        let job_count = count.clone();
        let handle = spawn_job("test", Duration::from_millis(40), token.clone(), move || {
            let count = job_count.clone();
            async move {
                count.fetch_add(1, Ordering::SeqCst);
            }
        });

        tokio::time::sleep(Duration::from_millis(200)).await;
        let ticked = count.load(Ordering::SeqCst);
        assert!(ticked >= 3, "expected several ticks, got {ticked}");

        token.cancel();
        tokio::time::timeout(Duration::from_secs(1), handle)
            .await
            .expect("job did not stop after cancel")
            .unwrap();
        let after_cancel = count.load(Ordering::SeqCst);
        tokio::time::sleep(Duration::from_millis(120)).await;
        assert_eq!(count.load(Ordering::SeqCst), after_cancel);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn panicking_tick_does_not_kill_the_job() {
        let count = Arc::new(AtomicUsize::new(0));
        let token = CancellationToken::new();
        let job_count = count.clone();
        let _handle = spawn_job("test", Duration::from_millis(40), token.clone(), move || {
            let count = job_count.clone();
            async move {
                if count.fetch_add(1, Ordering::SeqCst) == 0 {
                    panic!("first tick explodes");
                }
            }
        });

        tokio::time::sleep(Duration::from_millis(250)).await;
        token.cancel();
        assert!(
            count.load(Ordering::SeqCst) >= 3,
            "job should keep ticking after a panic"
        );
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn overruns_are_coalesced_never_concurrent() {
        let in_flight = Arc::new(AtomicBool::new(false));
        let overlaps = Arc::new(AtomicUsize::new(0));
        let runs = Arc::new(AtomicUsize::new(0));
        let token = CancellationToken::new();

        let job_in_flight = in_flight.clone();
        let job_overlaps = overlaps.clone();
        let job_runs = runs.clone();
        let _handle = spawn_job("slow", Duration::from_millis(30), token.clone(), move || {
            let in_flight = job_in_flight.clone();
            let overlaps = job_overlaps.clone();
            let runs = job_runs.clone();
            async move {
                if in_flight.swap(true, Ordering::SeqCst) {
                    overlaps.fetch_add(1, Ordering::SeqCst);
                }
                runs.fetch_add(1, Ordering::SeqCst);
                tokio::time::sleep(Duration::from_millis(90)).await;
                in_flight.store(false, Ordering::SeqCst);
            }
        });

        tokio::time::sleep(Duration::from_millis(500)).await;
        token.cancel();

        assert_eq!(overlaps.load(Ordering::SeqCst), 0, "ticks overlapped");
        let total = runs.load(Ordering::SeqCst);
        // ~90ms per run in a 500ms window: coalescing keeps it well
        // below the 16 ticks a 30ms period would otherwise produce
        assert!((2..=8).contains(&total), "unexpected run count {total}");
    }
}
