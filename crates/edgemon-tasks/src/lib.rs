//! Task execution: everything the scheduler and the command dispatcher
//! ask the host to do, behind the whitelist gate.

pub mod exec;
pub mod gate;
pub mod inventory;
pub mod logs;
pub mod service;
pub mod stats;

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use edgemon_collector::{CollectError, Collector};
use edgemon_common::types::{
    AgentMetrics, Inventory, ServiceStatus, SystemMetrics, TaskHealth,
};

pub use exec::ExecOutcome;

#[derive(Debug, thiserror::Error)]
pub enum TaskError {
    #[error("service not in allowed list: {0}")]
    ServiceNotAllowed(String),
    #[error("invalid action: {0} (must be start, stop, or restart)")]
    InvalidAction(String),
    #[error("command not in allowed list or scripts directory")]
    CommandNotAllowed,
    #[error("log path not in allowed list: {0}")]
    LogPathNotAllowed(String),
    #[error("lines must be greater than 0")]
    ZeroLines,
    #[error("lines cannot exceed {0}")]
    TooManyLines(usize),
    #[error("command execution timeout ({0:?})")]
    Timeout(Duration),
    #[error("command exited with code {exit_code}")]
    NonZeroExit { exit_code: i32, output: String },
    #[error("service manager error: {0}")]
    ServiceManager(String),
    #[error(transparent)]
    Io(#[from] std::io::Error),
    #[error("internal task error: {0}")]
    Internal(String),
}

/// The command-side configuration the gate enforces.
#[derive(Debug, Clone, Default)]
pub struct CommandPolicy {
    pub allowed_services: Vec<String>,
    pub allowed_commands: Vec<String>,
    pub allowed_log_paths: Vec<String>,
    pub scripts_dir: PathBuf,
    pub command_timeout: Duration,
}

/// Shared capability object: owns the collector and the self-metrics,
/// and serves both the scheduler jobs and the command handlers.
pub struct Executor {
    collector: Arc<dyn Collector>,
    policy: CommandPolicy,
    agent_stats: stats::AgentStats,
    task_stats: stats::TaskStats,
}

impl Executor {
    pub fn new(collector: Arc<dyn Collector>, policy: CommandPolicy) -> Self {
        Self {
            collector,
            policy,
            agent_stats: stats::AgentStats::new(),
            task_stats: stats::TaskStats::new(),
        }
    }

    pub fn policy(&self) -> &CommandPolicy {
        &self.policy
    }

    pub fn collector_name(&self) -> String {
        self.collector.name()
    }

    pub async fn collect_metrics(&self) -> Result<SystemMetrics, CollectError> {
        self.collector.collect().await
    }

    pub async fn control_service(&self, name: &str, action: &str) -> Result<String, TaskError> {
        service::control_service(name, action, &self.policy.allowed_services).await
    }

    pub async fn service_statuses(&self) -> Vec<ServiceStatus> {
        service::service_statuses(&self.policy.allowed_services).await
    }

    pub async fn execute_command(&self, command: &str) -> Result<ExecOutcome, TaskError> {
        exec::execute_command(
            command,
            &self.policy.allowed_commands,
            &self.policy.scripts_dir,
            self.policy.command_timeout,
        )
        .await
    }

    /// Log reads touch the filesystem; keep them off the async workers.
    pub async fn fetch_log_lines(&self, path: &str, lines: usize) -> Result<Vec<String>, TaskError> {
        let path = path.to_string();
        let patterns = self.policy.allowed_log_paths.clone();
        tokio::task::spawn_blocking(move || logs::fetch_log_lines(&path, lines, &patterns))
            .await
            .map_err(|e| TaskError::Internal(format!("log read task failed: {e}")))?
    }

    pub fn inventory(&self, version: &str) -> Inventory {
        inventory::collect_inventory(version)
    }

    pub fn agent_metrics(&self) -> AgentMetrics {
        self.agent_stats.snapshot()
    }

    pub fn task_health(&self) -> TaskHealth {
        self.task_stats.snapshot()
    }

    pub fn record_command_success(&self) {
        self.agent_stats.record_success();
    }

    pub fn record_command_error(&self, error: &str) {
        self.agent_stats.record_error(error);
    }

    pub fn record_heartbeat(&self) {
        self.task_stats.record_heartbeat();
    }

    pub fn record_metrics_success(&self) {
        self.task_stats.record_metrics_success();
    }

    pub fn record_metrics_failure(&self) {
        self.task_stats.record_metrics_failure();
    }

    pub fn record_service_check(&self) {
        self.task_stats.record_service_check();
    }

    pub fn record_inventory(&self) {
        self.task_stats.record_inventory();
    }
}
