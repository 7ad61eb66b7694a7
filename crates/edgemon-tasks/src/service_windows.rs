//! Service Control Manager adapter.

use std::time::{Duration, Instant};

use edgemon_common::types::{ServiceState, ServiceStatus};
use tracing::info;
use windows_service::service::{ServiceAccess, ServiceState as ScmState};
use windows_service::service_manager::{ServiceManager, ServiceManagerAccess};

use super::ServiceAction;
use crate::TaskError;

const STOP_TIMEOUT: Duration = Duration::from_secs(30);
const STOP_POLL: Duration = Duration::from_millis(300);

pub(super) async fn control(name: &str, action: ServiceAction) -> Result<String, TaskError> {
    info!(service = name, action = %action, "controlling windows service");
    let name = name.to_string();
    tokio::task::spawn_blocking(move || control_blocking(&name, action))
        .await
        .map_err(|e| TaskError::Internal(format!("service control task failed: {e}")))?
}

pub(super) async fn status(name: &str) -> Result<ServiceStatus, TaskError> {
    let name = name.to_string();
    tokio::task::spawn_blocking(move || status_blocking(&name))
        .await
        .map_err(|e| TaskError::Internal(format!("service query task failed: {e}")))?
}

fn control_blocking(name: &str, action: ServiceAction) -> Result<String, TaskError> {
    let manager = ServiceManager::local_computer(None::<&str>, ServiceManagerAccess::CONNECT)
        .map_err(|e| TaskError::ServiceManager(format!("failed to connect to SCM: {e}")))?;
    let service = manager
        .open_service(
            name,
            ServiceAccess::START | ServiceAccess::STOP | ServiceAccess::QUERY_STATUS,
        )
        .map_err(|e| TaskError::ServiceManager(format!("failed to open service {name}: {e}")))?;

    match action {
        ServiceAction::Start => {
            service
                .start::<&str>(&[])
                .map_err(|e| TaskError::ServiceManager(format!("failed to start {name}: {e}")))?;
        }
        ServiceAction::Stop => {
            stop_and_wait(&service, name)?;
        }
        ServiceAction::Restart => {
            stop_and_wait(&service, name)?;
            service.start::<&str>(&[]).map_err(|e| {
                TaskError::ServiceManager(format!("failed to start {name} after stop: {e}"))
            })?;
        }
    }

    Ok(format!("service {name} {action} completed"))
}

/// Send the stop control and poll until the service reports `Stopped`
/// or the deadline passes.
fn stop_and_wait(
    service: &windows_service::service::Service,
    name: &str,
) -> Result<(), TaskError> {
    let mut status = service
        .stop()
        .map_err(|e| TaskError::ServiceManager(format!("failed to stop {name}: {e}")))?;

    let deadline = Instant::now() + STOP_TIMEOUT;
    while status.current_state != ScmState::Stopped {
        if Instant::now() >= deadline {
            return Err(TaskError::ServiceManager(format!(
                "timeout waiting for {name} to stop"
            )));
        }
        std::thread::sleep(STOP_POLL);
        status = service
            .query_status()
            .map_err(|e| TaskError::ServiceManager(format!("failed to query {name}: {e}")))?;
    }
    Ok(())
}

fn status_blocking(name: &str) -> Result<ServiceStatus, TaskError> {
    let manager = ServiceManager::local_computer(None::<&str>, ServiceManagerAccess::CONNECT)
        .map_err(|e| TaskError::ServiceManager(format!("failed to connect to SCM: {e}")))?;

    // An unopenable named service is reported as not installed rather
    // than an error.
    let service = match manager.open_service(name, ServiceAccess::QUERY_STATUS) {
        Ok(service) => service,
        Err(_) => {
            return Ok(ServiceStatus {
                name: name.to_string(),
                status: ServiceState::NotInstalled,
            })
        }
    };

    let status = service
        .query_status()
        .map_err(|e| TaskError::ServiceManager(format!("failed to query {name}: {e}")))?;

    Ok(ServiceStatus {
        name: name.to_string(),
        status: map_scm_state(status.current_state),
    })
}

fn map_scm_state(state: ScmState) -> ServiceState {
    match state {
        ScmState::Running => ServiceState::Running,
        ScmState::Stopped => ServiceState::Stopped,
        ScmState::StartPending => ServiceState::Starting,
        ScmState::StopPending => ServiceState::Stopping,
        // paused variants count as stopped for our purposes
        ScmState::Paused | ScmState::PausePending | ScmState::ContinuePending => {
            ServiceState::Stopped
        }
    }
}
