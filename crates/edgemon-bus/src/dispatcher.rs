//! Command dispatcher: one subscription per command subject, request
//! parse, whitelist-gated execution, reply.
//!
//! Every delivery is served on its own task behind a crash guard: a
//! panicking handler produces a single `Internal error` reply and the
//! agent keeps running.

use std::sync::Arc;

use async_nats::Message;
use futures::StreamExt;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use edgemon_common::now_rfc3339;
use edgemon_common::subjects::DeviceIdentity;
use edgemon_tasks::{Executor, TaskError};

use crate::protocol::{
    ErrorReply, ExecReply, ExecRequest, HealthReply, LogFetchReply, LogFetchRequest, PingReply,
    ServiceControlReply, ServiceControlRequest,
};
use crate::{BusClient, BusError};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum CommandKind {
    Ping,
    Service,
    Logs,
    Exec,
    Health,
}

impl CommandKind {
    const ALL: [CommandKind; 5] = [
        CommandKind::Ping,
        CommandKind::Service,
        CommandKind::Logs,
        CommandKind::Exec,
        CommandKind::Health,
    ];

    fn suffix(self) -> &'static str {
        match self {
            CommandKind::Ping => "ping",
            CommandKind::Service => "service",
            CommandKind::Logs => "logs",
            CommandKind::Exec => "exec",
            CommandKind::Health => "health",
        }
    }
}

pub struct Dispatcher {
    bus: Arc<BusClient>,
    executor: Arc<Executor>,
    identity: DeviceIdentity,
    handles: Vec<JoinHandle<()>>,
}

impl Dispatcher {
    pub fn new(bus: Arc<BusClient>, executor: Arc<Executor>, identity: DeviceIdentity) -> Self {
        Self {
            bus,
            executor,
            identity,
            handles: Vec::new(),
        }
    }

    /// Subscribe every command subject for this device. Each
    /// subscription gets a long-lived task that serves deliveries until
    /// the token cancels or the subscription ends.
    pub async fn subscribe_all(&mut self, token: &CancellationToken) -> Result<(), BusError> {
        for kind in CommandKind::ALL {
            let subject = self.identity.command_subject(kind.suffix());
            let mut subscriber = self.bus.subscribe(subject.clone()).await?;
            info!(%subject, "subscribed to command subject");

            let bus = self.bus.clone();
            let executor = self.executor.clone();
            let token = token.clone();
            self.handles.push(tokio::spawn(async move {
                loop {
                    tokio::select! {
                        _ = token.cancelled() => break,
                        delivery = subscriber.next() => match delivery {
                            Some(message) => {
                                tokio::spawn(serve(bus.clone(), executor.clone(), kind, message));
                            }
                            None => break,
                        },
                    }
                }
            }));
        }
        Ok(())
    }

    /// Stop serving. Intake has already ended once the root token is
    /// cancelled; this reaps the subscription tasks.
    pub fn shutdown(&mut self) {
        for handle in self.handles.drain(..) {
            handle.abort();
        }
    }
}

async fn serve(bus: Arc<BusClient>, executor: Arc<Executor>, kind: CommandKind, message: Message) {
    let payload = message.payload.to_vec();
    let guarded_executor = executor.clone();
    let outcome = run_guarded(async move { dispatch(guarded_executor, kind, payload).await }).await;

    let reply_payload = match outcome {
        Ok(bytes) => bytes,
        Err(panic_message) => {
            error!(
                handler = kind.suffix(),
                subject = %message.subject,
                panic = %panic_message,
                "panic recovered in command handler"
            );
            executor.record_command_error(&format!("handler panicked: {panic_message}"));
            encode(&ErrorReply {
                status: "error",
                error: format!("Internal error: handler panicked: {panic_message}"),
                timestamp: now_rfc3339(),
            })
        }
    };

    match message.reply {
        Some(reply_subject) => {
            if let Err(e) = bus.publish_reply(reply_subject, reply_payload).await {
                warn!(error = %e, "failed to send command reply");
            }
        }
        None => debug!(subject = %message.subject, "command message had no reply subject"),
    }
}

/// Run a handler on its own task so a panic unwinds that task, not the
/// subscription loop. Returns the panic message on failure.
async fn run_guarded<F>(fut: F) -> Result<Vec<u8>, String>
where
    F: std::future::Future<Output = Vec<u8>> + Send + 'static,
{
    match tokio::spawn(fut).await {
        Ok(bytes) => Ok(bytes),
        Err(join_error) if join_error.is_panic() => {
            let panic = join_error.into_panic();
            let message = panic
                .downcast_ref::<&str>()
                .map(|s| s.to_string())
                .or_else(|| panic.downcast_ref::<String>().cloned())
                .unwrap_or_else(|| "unknown panic".to_string());
            Err(message)
        }
        Err(_) => Err("handler task cancelled".to_string()),
    }
}

async fn dispatch(executor: Arc<Executor>, kind: CommandKind, payload: Vec<u8>) -> Vec<u8> {
    match kind {
        CommandKind::Ping => handle_ping(),
        CommandKind::Service => handle_service(&executor, &payload).await,
        CommandKind::Logs => handle_logs(&executor, &payload).await,
        CommandKind::Exec => handle_exec(&executor, &payload).await,
        CommandKind::Health => handle_health(&executor),
    }
}

fn handle_ping() -> Vec<u8> {
    encode(&PingReply {
        status: "pong",
        timestamp: now_rfc3339(),
    })
}

async fn handle_service(executor: &Executor, payload: &[u8]) -> Vec<u8> {
    let request: ServiceControlRequest = match serde_json::from_slice(payload) {
        Ok(request) => request,
        Err(e) => return parse_failure(executor, &e),
    };
    info!(action = %request.action, service = %request.service_name, "processing service control");

    match executor
        .control_service(&request.service_name, &request.action)
        .await
    {
        Ok(result) => {
            executor.record_command_success();
            encode(&ServiceControlReply {
                status: "success",
                service_name: Some(request.service_name),
                action: Some(request.action),
                result: Some(result),
                timestamp: now_rfc3339(),
                ..Default::default()
            })
        }
        Err(e) => {
            let message = e.to_string();
            warn!(service = %request.service_name, action = %request.action, error = %message, "service control failed");
            executor.record_command_error(&message);
            encode(&ServiceControlReply {
                status: "error",
                error: Some(message),
                timestamp: now_rfc3339(),
                ..Default::default()
            })
        }
    }
}

async fn handle_logs(executor: &Executor, payload: &[u8]) -> Vec<u8> {
    let request: LogFetchRequest = match serde_json::from_slice(payload) {
        Ok(request) => request,
        Err(e) => return parse_failure(executor, &e),
    };
    info!(path = %request.log_path, lines = request.lines, "fetching log tail");

    let lines = usize::try_from(request.lines).unwrap_or(0);
    match executor.fetch_log_lines(&request.log_path, lines).await {
        Ok(lines) => {
            executor.record_command_success();
            encode(&LogFetchReply {
                status: "success",
                log_path: Some(request.log_path),
                total_lines: Some(lines.len()),
                lines: Some(lines),
                timestamp: now_rfc3339(),
                ..Default::default()
            })
        }
        Err(e) => {
            let message = e.to_string();
            warn!(path = %request.log_path, error = %message, "log fetch failed");
            executor.record_command_error(&message);
            encode(&LogFetchReply {
                status: "error",
                error: Some(message),
                timestamp: now_rfc3339(),
                ..Default::default()
            })
        }
    }
}

async fn handle_exec(executor: &Executor, payload: &[u8]) -> Vec<u8> {
    let request: ExecRequest = match serde_json::from_slice(payload) {
        Ok(request) => request,
        Err(e) => return parse_failure(executor, &e),
    };
    info!(command = %request.command, "executing custom command");

    match executor.execute_command(&request.command).await {
        Ok(outcome) => {
            executor.record_command_success();
            encode(&ExecReply {
                status: "success",
                command: Some(request.command),
                output: Some(outcome.output),
                exit_code: Some(outcome.exit_code),
                timestamp: now_rfc3339(),
                ..Default::default()
            })
        }
        Err(e) => {
            let exit_code = match &e {
                TaskError::Timeout(_) => Some(-1),
                TaskError::NonZeroExit { exit_code, .. } => Some(*exit_code),
                _ => None,
            };
            let message = e.to_string();
            warn!(command = %request.command, error = %message, "command execution failed");
            executor.record_command_error(&message);
            encode(&ExecReply {
                status: "error",
                exit_code,
                error: Some(message),
                timestamp: now_rfc3339(),
                ..Default::default()
            })
        }
    }
}

fn handle_health(executor: &Executor) -> Vec<u8> {
    encode(&HealthReply {
        status: "healthy",
        agent_metrics: executor.agent_metrics(),
        task_health: executor.task_health(),
        timestamp: now_rfc3339(),
    })
}

fn parse_failure(executor: &Executor, error: &serde_json::Error) -> Vec<u8> {
    warn!(error = %error, "failed to parse command request");
    executor.record_command_error(&format!("invalid request format: {error}"));
    encode(&ErrorReply {
        status: "error",
        error: "Invalid request format".to_string(),
        timestamp: now_rfc3339(),
    })
}

fn encode<T: serde::Serialize>(reply: &T) -> Vec<u8> {
    serde_json::to_vec(reply).unwrap_or_else(|e| {
        error!(error = %e, "failed to encode command reply");
        format!(
            r#"{{"status":"error","error":"reply encoding failed","timestamp":"{}"}}"#,
            now_rfc3339()
        )
        .into_bytes()
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use edgemon_tasks::CommandPolicy;
    use serde_json::Value;
    use std::time::Duration;

    fn executor(policy: CommandPolicy) -> Arc<Executor> {
        let collector = edgemon_collector::new_collector("builtin", None).unwrap();
        Arc::new(Executor::new(collector, policy))
    }

    fn decode(payload: Vec<u8>) -> Value {
        serde_json::from_slice(&payload).unwrap()
    }

    #[test]
    fn subjects_cover_the_command_table() {
        let identity = DeviceIdentity::new("dev-1", "agents").unwrap();
        let subjects: Vec<String> = CommandKind::ALL
            .iter()
            .map(|k| identity.command_subject(k.suffix()))
            .collect();
        assert_eq!(
            subjects,
            vec![
                "agents.dev-1.cmd.ping",
                "agents.dev-1.cmd.service",
                "agents.dev-1.cmd.logs",
                "agents.dev-1.cmd.exec",
                "agents.dev-1.cmd.health",
            ]
        );
    }

    #[test]
    fn ping_replies_pong_with_timestamp() {
        let reply = decode(handle_ping());
        assert_eq!(reply["status"], "pong");
        let ts = reply["timestamp"].as_str().unwrap();
        assert!(ts.ends_with('Z'), "not RFC3339 UTC: {ts}");
    }

    #[tokio::test]
    async fn service_denial_counts_one_error() {
        let executor = executor(CommandPolicy {
            allowed_services: vec!["nginx".into()],
            ..Default::default()
        });
        let payload = br#"{"action":"start","service_name":"postgresql"}"#;
        let reply = decode(handle_service(&executor, payload).await);

        assert_eq!(reply["status"], "error");
        assert!(reply["error"]
            .as_str()
            .unwrap()
            .contains("not in allowed list"));
        let metrics = executor.agent_metrics();
        assert_eq!(metrics.commands_errored, 1);
        assert_eq!(metrics.commands_processed, 1);
    }

    #[tokio::test]
    async fn malformed_request_is_a_parse_error() {
        let executor = executor(CommandPolicy::default());
        let reply = decode(handle_service(&executor, b"{not json").await);
        assert_eq!(reply["status"], "error");
        assert_eq!(reply["error"], "Invalid request format");
        assert_eq!(executor.agent_metrics().commands_errored, 1);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn log_tail_round_trip() {
        use std::io::Write;
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("app.log");
        let mut file = std::fs::File::create(&path).unwrap();
        for i in 0..1234 {
            writeln!(file, "entry {i}").unwrap();
        }

        let executor = executor(CommandPolicy {
            allowed_log_paths: vec![format!("{}/*.log", dir.path().display())],
            ..Default::default()
        });
        let payload = serde_json::to_vec(&serde_json::json!({
            "log_path": path.display().to_string(),
            "lines": 100,
        }))
        .unwrap();
        let reply = decode(handle_logs(&executor, &payload).await);

        assert_eq!(reply["status"], "success");
        assert_eq!(reply["total_lines"], 100);
        let lines = reply["lines"].as_array().unwrap();
        assert_eq!(lines.len(), 100);
        assert_eq!(lines[0], "entry 1134");
        assert_eq!(lines[99], "entry 1233");
        assert_eq!(executor.agent_metrics().commands_processed, 1);
        assert_eq!(executor.agent_metrics().commands_errored, 0);
    }

    #[tokio::test]
    async fn log_request_outside_whitelist_is_denied() {
        let executor = executor(CommandPolicy::default());
        let payload = br#"{"log_path":"/etc/shadow","lines":10}"#;
        let reply = decode(handle_logs(&executor, payload).await);
        assert_eq!(reply["status"], "error");
        assert!(reply["error"].as_str().unwrap().contains("not in allowed list"));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn exec_timeout_reports_exit_code_minus_one() {
        let executor = executor(CommandPolicy {
            allowed_commands: vec!["sleep 30".into()],
            command_timeout: Duration::from_millis(300),
            ..Default::default()
        });
        let started = std::time::Instant::now();
        let reply = decode(handle_exec(&executor, br#"{"command":"sleep 30"}"#).await);

        assert_eq!(reply["status"], "error");
        assert_eq!(reply["exit_code"], -1);
        assert!(reply["error"].as_str().unwrap().contains("timeout"));
        assert!(started.elapsed() < Duration::from_secs(5));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn exec_success_carries_output() {
        let executor = executor(CommandPolicy {
            allowed_commands: vec!["echo hello".into()],
            command_timeout: Duration::from_secs(5),
            ..Default::default()
        });
        let reply = decode(handle_exec(&executor, br#"{"command":"echo hello"}"#).await);
        assert_eq!(reply["status"], "success");
        assert_eq!(reply["exit_code"], 0);
        assert!(reply["output"].as_str().unwrap().contains("hello"));
    }

    #[tokio::test]
    async fn exec_denial_never_spawns() {
        let executor = executor(CommandPolicy {
            command_timeout: Duration::from_secs(5),
            ..Default::default()
        });
        let reply = decode(handle_exec(&executor, br#"{"command":"rm -rf /"}"#).await);
        assert_eq!(reply["status"], "error");
        assert!(reply["error"].as_str().unwrap().contains("not in allowed list"));
    }

    #[tokio::test]
    async fn health_reports_self_and_task_metrics() {
        let executor = executor(CommandPolicy::default());
        executor.record_command_success();
        executor.record_heartbeat();
        let reply = decode(handle_health(&executor));

        assert_eq!(reply["status"], "healthy");
        assert_eq!(reply["agent_metrics"]["commands_processed"], 1);
        assert_eq!(reply["task_health"]["heartbeat_count"], 1);
        assert!(reply["agent_metrics"]["uptime_seconds"].as_i64().unwrap() >= 0);
    }

    #[tokio::test]
    async fn guard_converts_panics_into_error_replies() {
        let outcome = run_guarded(async { panic!("boom in handler") }).await;
        let message = outcome.unwrap_err();
        assert!(message.contains("boom in handler"));
        // and the test process is alive to assert anything at all
    }

    #[tokio::test]
    async fn guard_passes_through_normal_output() {
        let outcome = run_guarded(async { b"ok".to_vec() }).await;
        assert_eq!(outcome.unwrap(), b"ok");
    }
}
