//! OS service control behind the whitelist gate.
//!
//! One operation, one canonical status set, three platform adapters
//! selected at build time: the Windows Service Control Manager, systemd
//! on Linux and rc.d on FreeBSD.

use std::str::FromStr;

use edgemon_common::types::{ServiceState, ServiceStatus};
use tracing::warn;

use crate::{gate, TaskError};

#[cfg(target_os = "linux")]
#[path = "service_linux.rs"]
mod platform;

#[cfg(target_os = "freebsd")]
#[path = "service_freebsd.rs"]
mod platform;

#[cfg(windows)]
#[path = "service_windows.rs"]
mod platform;

#[cfg(not(any(target_os = "linux", target_os = "freebsd", windows)))]
#[path = "service_stub.rs"]
mod platform;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ServiceAction {
    Start,
    Stop,
    Restart,
}

impl ServiceAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            ServiceAction::Start => "start",
            ServiceAction::Stop => "stop",
            ServiceAction::Restart => "restart",
        }
    }
}

impl FromStr for ServiceAction {
    type Err = TaskError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "start" => Ok(ServiceAction::Start),
            "stop" => Ok(ServiceAction::Stop),
            "restart" => Ok(ServiceAction::Restart),
            other => Err(TaskError::InvalidAction(other.to_string())),
        }
    }
}

impl std::fmt::Display for ServiceAction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Apply `start`/`stop`/`restart` to a whitelisted service. The gate and
/// the action parse both happen before the OS service manager is
/// touched.
pub async fn control_service(
    name: &str,
    action: &str,
    allowed: &[String],
) -> Result<String, TaskError> {
    if !gate::service_allowed(name, allowed) {
        return Err(TaskError::ServiceNotAllowed(name.to_string()));
    }
    let action = ServiceAction::from_str(action)?;
    platform::control(name, action).await
}

/// Status of every whitelisted service. Query failures degrade to an
/// `Error` entry rather than failing the whole check.
pub async fn service_statuses(names: &[String]) -> Vec<ServiceStatus> {
    let mut statuses = Vec::with_capacity(names.len());
    for name in names {
        match platform::status(name).await {
            Ok(status) => statuses.push(status),
            Err(e) => {
                warn!(service = %name, error = %e, "failed to query service status");
                statuses.push(ServiceStatus {
                    name: name.clone(),
                    status: ServiceState::Error,
                });
            }
        }
    }
    statuses
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn unlisted_service_is_rejected_before_the_os() {
        let err = control_service("postgresql", "start", &["nginx".to_string()])
            .await
            .unwrap_err();
        assert!(matches!(err, TaskError::ServiceNotAllowed(_)));
        assert!(err.to_string().contains("not in allowed list"));
    }

    #[tokio::test]
    async fn bad_action_is_rejected_before_the_os() {
        // name passes the gate so the action check is what fires
        let err = control_service("nginx", "reload", &["nginx".to_string()])
            .await
            .unwrap_err();
        assert!(matches!(err, TaskError::InvalidAction(_)));
    }

    #[test]
    fn actions_parse_round_trip() {
        for (s, a) in [
            ("start", ServiceAction::Start),
            ("stop", ServiceAction::Stop),
            ("restart", ServiceAction::Restart),
        ] {
            assert_eq!(ServiceAction::from_str(s).unwrap(), a);
            assert_eq!(a.as_str(), s);
        }
        assert!(ServiceAction::from_str("Start").is_err());
    }
}
