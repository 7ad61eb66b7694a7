//! Fallback adapter for platforms without a supported service manager.

use edgemon_common::types::{ServiceState, ServiceStatus};

use super::ServiceAction;
use crate::TaskError;

pub(super) async fn control(name: &str, action: ServiceAction) -> Result<String, TaskError> {
    let _ = (name, action);
    Err(TaskError::ServiceManager(
        "service control is not supported on this platform".to_string(),
    ))
}

pub(super) async fn status(name: &str) -> Result<ServiceStatus, TaskError> {
    Ok(ServiceStatus {
        name: name.to_string(),
        status: ServiceState::Unknown,
    })
}
