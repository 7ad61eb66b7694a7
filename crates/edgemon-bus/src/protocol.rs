//! Request and reply shapes for the command subjects.

use edgemon_common::types::{AgentMetrics, TaskHealth};
use serde::{Deserialize, Serialize};

#[derive(Debug, Deserialize)]
pub struct ServiceControlRequest {
    #[serde(default)]
    pub action: String,
    #[serde(default)]
    pub service_name: String,
}

#[derive(Debug, Deserialize)]
pub struct LogFetchRequest {
    #[serde(default)]
    pub log_path: String,
    #[serde(default)]
    pub lines: i64,
}

#[derive(Debug, Deserialize)]
pub struct ExecRequest {
    #[serde(default)]
    pub command: String,
}

#[derive(Debug, Serialize)]
pub struct PingReply {
    pub status: &'static str,
    pub timestamp: String,
}

#[derive(Debug, Default, Serialize)]
pub struct ServiceControlReply {
    pub status: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub service_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub action: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub timestamp: String,
}

#[derive(Debug, Default, Serialize)]
pub struct LogFetchReply {
    pub status: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub log_path: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub lines: Option<Vec<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub total_lines: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub timestamp: String,
}

#[derive(Debug, Default, Serialize)]
pub struct ExecReply {
    pub status: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub command: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub output: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub exit_code: Option<i32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub timestamp: String,
}

#[derive(Debug, Serialize)]
pub struct HealthReply {
    pub status: &'static str,
    pub agent_metrics: AgentMetrics,
    pub task_health: TaskHealth,
    pub timestamp: String,
}

#[derive(Debug, Serialize)]
pub struct ErrorReply {
    pub status: &'static str,
    pub error: String,
    pub timestamp: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_reply_shape_is_minimal() {
        let reply = ErrorReply {
            status: "error",
            error: "service not in allowed list: postgresql".into(),
            timestamp: "2024-01-01T00:00:00Z".into(),
        };
        let json = serde_json::to_value(&reply).unwrap();
        assert_eq!(json["status"], "error");
        assert!(json["error"].as_str().unwrap().contains("not in allowed list"));
        assert!(json.get("result").is_none());
    }

    #[test]
    fn success_reply_omits_error_field() {
        let reply = ServiceControlReply {
            status: "success",
            service_name: Some("nginx".into()),
            action: Some("start".into()),
            result: Some("service nginx start completed".into()),
            timestamp: "2024-01-01T00:00:00Z".into(),
            ..Default::default()
        };
        let json = serde_json::to_string(&reply).unwrap();
        assert!(!json.contains("\"error\""));
    }

    #[test]
    fn requests_tolerate_missing_fields() {
        let req: ServiceControlRequest = serde_json::from_str("{}").unwrap();
        assert!(req.action.is_empty());
        let req: LogFetchRequest = serde_json::from_str(r#"{"log_path":"/var/log/app.log"}"#).unwrap();
        assert_eq!(req.lines, 0);
        let req: ExecRequest = serde_json::from_str(r#"{"command":"echo hi"}"#).unwrap();
        assert_eq!(req.command, "echo hi");
    }
}
