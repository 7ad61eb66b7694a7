//! rc.d adapter.

use edgemon_common::types::{ServiceState, ServiceStatus};
use tokio::process::Command;
use tracing::info;

use super::ServiceAction;
use crate::TaskError;

pub(super) async fn control(name: &str, action: ServiceAction) -> Result<String, TaskError> {
    info!(service = name, action = %action, "controlling rc.d service");

    let output = Command::new("service")
        .arg(name)
        .arg(action.as_str())
        .output()
        .await?;
    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        return Err(TaskError::ServiceManager(format!(
            "service {name} {action} failed: {}",
            stderr.trim()
        )));
    }

    Ok(format!("service {name} {action} completed"))
}

pub(super) async fn status(name: &str) -> Result<ServiceStatus, TaskError> {
    let output = Command::new("service")
        .arg(name)
        .arg("status")
        .output()
        .await?;

    let stdout = String::from_utf8_lossy(&output.stdout);
    let stderr = String::from_utf8_lossy(&output.stderr).to_ascii_lowercase();
    let status = parse_status(output.status.code().unwrap_or(-1), &stdout, &stderr);

    Ok(ServiceStatus {
        name: name.to_string(),
        status,
    })
}

/// `service <name> status` exits 0 when running; everything else is
/// inferred from the output text.
fn parse_status(exit_code: i32, stdout: &str, stderr_lower: &str) -> ServiceState {
    if exit_code == 0 {
        return ServiceState::Running;
    }
    let stdout_lower = stdout.to_ascii_lowercase();
    if stdout.contains("not running") || stdout.contains("is not enabled") {
        ServiceState::Stopped
    } else if stderr_lower.contains("not found")
        || stderr_lower.contains("not exist")
        || stdout_lower.contains("not found")
        || stdout_lower.contains("not exist")
    {
        ServiceState::NotInstalled
    } else {
        ServiceState::Unknown
    }
}
