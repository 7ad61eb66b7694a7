//! Lifecycle controller: wire everything up, run until a shutdown
//! signal, then unwind in order — scheduler first, then the bus drain
//! with its bounded budget.

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use edgemon_bus::{AuthType, BusClient, Dispatcher};
use edgemon_common::subjects::DeviceIdentity;
use edgemon_tasks::Executor;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::bootstrap;
use crate::config::AgentConfig;
use crate::scheduler::Scheduler;

const SCHEDULER_SHUTDOWN_BUDGET: Duration = Duration::from_secs(10);

pub async fn run(cfg: AgentConfig, version: &str) -> Result<()> {
    let identity = DeviceIdentity::new(cfg.device_id.clone(), cfg.subject_prefix.clone())?;
    info!(device_id = identity.device_id(), version, "starting edgemon");

    // Credential bootstrap, then connect as a plain credentials client.
    let mut bus_cfg = cfg.bus.clone();
    if bus_cfg.auth.auth_type == AuthType::Pocketbase {
        let bootstrap_cfg = cfg
            .bootstrap
            .as_ref()
            .context("bootstrap section is required for pocketbase auth")?;
        let creds_file = bus_cfg
            .auth
            .creds_file
            .clone()
            .context("bus.auth.creds_file is required for pocketbase auth")?;
        bootstrap::fetch_credentials(bootstrap_cfg, identity.device_id(), &creds_file)
            .await
            .context("credential bootstrap failed")?;
        bus_cfg.auth.auth_type = AuthType::Credentials;
    }

    let exporter_url = cfg.tasks.exporter_url();
    let collector =
        edgemon_collector::new_collector(&cfg.tasks.metrics_source(), Some(exporter_url.as_str()))
            .context("failed to build metrics collector")?;
    info!(collector = %collector.name(), "metrics collector ready");

    let executor = Arc::new(Executor::new(collector, cfg.commands.to_policy()));

    let bus = Arc::new(
        BusClient::connect(&bus_cfg)
            .await
            .context("failed to connect to the message bus")?,
    );

    let token = CancellationToken::new();

    let mut dispatcher = Dispatcher::new(bus.clone(), executor.clone(), identity.clone());
    dispatcher
        .subscribe_all(&token)
        .await
        .context("failed to subscribe command handlers")?;

    let scheduler = Scheduler::start(
        bus.clone(),
        executor.clone(),
        &identity,
        &cfg.tasks,
        version,
        &token,
    );

    info!(device_id = identity.device_id(), "agent running");
    wait_for_shutdown(&token).await;

    info!("shutting down agent");
    token.cancel();
    scheduler.shutdown(SCHEDULER_SHUTDOWN_BUDGET).await;
    dispatcher.shutdown();
    if let Err(e) = bus.drain().await {
        warn!(error = %e, "bus drain did not complete cleanly");
    }
    info!("agent shutdown complete");
    Ok(())
}

#[cfg(unix)]
async fn wait_for_shutdown(token: &CancellationToken) {
    use tokio::signal::unix::{signal, SignalKind};

    match signal(SignalKind::terminate()) {
        Ok(mut sigterm) => {
            tokio::select! {
                _ = tokio::signal::ctrl_c() => info!("received interrupt"),
                _ = sigterm.recv() => info!("received terminate"),
                _ = token.cancelled() => info!("root context cancelled"),
            }
        }
        Err(e) => {
            warn!(error = %e, "failed to install SIGTERM handler");
            tokio::select! {
                _ = tokio::signal::ctrl_c() => info!("received interrupt"),
                _ = token.cancelled() => info!("root context cancelled"),
            }
        }
    }
}

#[cfg(not(unix))]
async fn wait_for_shutdown(token: &CancellationToken) {
    tokio::select! {
        _ = tokio::signal::ctrl_c() => info!("received interrupt"),
        _ = token.cancelled() => info!("root context cancelled"),
    }
}
