//! systemd adapter.

use std::time::Duration;

use edgemon_common::types::{ServiceState, ServiceStatus};
use tokio::process::Command;
use tracing::{info, warn};

use super::ServiceAction;
use crate::TaskError;

pub(super) async fn control(name: &str, action: ServiceAction) -> Result<String, TaskError> {
    info!(service = name, action = %action, "controlling systemd service");

    let output = Command::new("systemctl")
        .arg(action.as_str())
        .arg(name)
        .output()
        .await?;
    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        return Err(TaskError::ServiceManager(format!(
            "systemctl {action} {name} failed: {}",
            stderr.trim()
        )));
    }

    // Give the unit a moment to settle, then report what it reached.
    tokio::time::sleep(Duration::from_millis(500)).await;
    match status(name).await {
        Ok(observed) => Ok(format!(
            "service {name} {action} completed (status: {})",
            observed.status
        )),
        Err(e) => {
            warn!(service = name, error = %e, "could not verify service state after action");
            Ok(format!("service {name} {action} completed"))
        }
    }
}

pub(super) async fn status(name: &str) -> Result<ServiceStatus, TaskError> {
    let output = Command::new("systemctl")
        .args(["show", name, "--property=ActiveState,SubState,LoadState"])
        .output()
        .await?;

    let stderr = String::from_utf8_lossy(&output.stderr);
    if !output.status.success() {
        if stderr.contains("not loaded") || stderr.contains("not found") {
            return Ok(ServiceStatus {
                name: name.to_string(),
                status: ServiceState::NotInstalled,
            });
        }
        return Err(TaskError::ServiceManager(format!(
            "systemctl show {name} failed: {}",
            stderr.trim()
        )));
    }

    let stdout = String::from_utf8_lossy(&output.stdout);
    let mut active_state = "";
    let mut load_state = "";
    for line in stdout.lines() {
        if let Some((key, value)) = line.split_once('=') {
            match key.trim() {
                "ActiveState" => active_state = value.trim(),
                "LoadState" => load_state = value.trim(),
                _ => {}
            }
        }
    }

    let status = if load_state == "not-found" {
        ServiceState::NotInstalled
    } else {
        map_active_state(active_state)
    };

    Ok(ServiceStatus {
        name: name.to_string(),
        status,
    })
}

fn map_active_state(active_state: &str) -> ServiceState {
    match active_state {
        "active" => ServiceState::Running,
        "inactive" => ServiceState::Stopped,
        "activating" => ServiceState::Starting,
        "deactivating" => ServiceState::Stopping,
        "failed" => ServiceState::Error,
        _ => ServiceState::Unknown,
    }
}
