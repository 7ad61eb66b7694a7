//! Agent configuration: TOML file, serde defaults, one validation pass
//! whose error messages name the offending field.

use std::path::{Path, PathBuf};
use std::time::Duration;

use edgemon_bus::{AuthType, BusConfig};
use edgemon_common::subjects;
use edgemon_tasks::CommandPolicy;
use serde::Deserialize;

use crate::defaults;

const MIN_HEARTBEAT_SECS: u64 = 10;
const MIN_METRICS_SECS: u64 = 30;
const MIN_COMMAND_TIMEOUT_SECS: u64 = 5;
const MAX_COMMAND_TIMEOUT_SECS: u64 = 5 * 60;

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read config {path}: {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),
    #[error("invalid configuration: {0}")]
    Invalid(String),
}

#[derive(Debug, Clone, Deserialize)]
pub struct AgentConfig {
    pub device_id: String,
    pub subject_prefix: String,
    pub bus: BusConfig,
    #[serde(default)]
    pub tasks: TasksConfig,
    #[serde(default)]
    pub commands: CommandsConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
    /// Control-plane coordinates for the one-shot credential bootstrap.
    #[serde(default)]
    pub bootstrap: Option<BootstrapConfig>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct TasksConfig {
    pub heartbeat: JobConfig,
    pub system_metrics: MetricsJobConfig,
    pub service_check: JobConfig,
    pub inventory: JobConfig,
}

/// Per-job knobs. Unset fields fall back to the job's own default, so a
/// partially specified section keeps sane values.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct JobConfig {
    pub enabled: Option<bool>,
    pub interval_secs: Option<u64>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct MetricsJobConfig {
    pub enabled: Option<bool>,
    pub interval_secs: Option<u64>,
    /// `builtin` (sample the OS) or `exporter` (scrape).
    pub source: Option<String>,
    pub exporter_url: Option<String>,
}

impl TasksConfig {
    pub fn heartbeat_enabled(&self) -> bool {
        self.heartbeat.enabled.unwrap_or(true)
    }

    pub fn heartbeat_interval(&self) -> Duration {
        Duration::from_secs(self.heartbeat.interval_secs.unwrap_or(60))
    }

    pub fn system_metrics_enabled(&self) -> bool {
        self.system_metrics.enabled.unwrap_or(true)
    }

    pub fn system_metrics_interval(&self) -> Duration {
        Duration::from_secs(self.system_metrics.interval_secs.unwrap_or(300))
    }

    pub fn metrics_source(&self) -> String {
        self.system_metrics
            .source
            .clone()
            .unwrap_or_else(|| "builtin".to_string())
    }

    pub fn exporter_url(&self) -> String {
        self.system_metrics
            .exporter_url
            .clone()
            .unwrap_or_else(defaults::exporter_url)
    }

    pub fn service_check_enabled(&self) -> bool {
        self.service_check.enabled.unwrap_or(true)
    }

    pub fn service_check_interval(&self) -> Duration {
        Duration::from_secs(self.service_check.interval_secs.unwrap_or(300))
    }

    pub fn inventory_enabled(&self) -> bool {
        self.inventory.enabled.unwrap_or(true)
    }

    pub fn inventory_interval(&self) -> Duration {
        Duration::from_secs(self.inventory.interval_secs.unwrap_or(24 * 60 * 60))
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct CommandsConfig {
    pub timeout_secs: u64,
    pub allowed_services: Vec<String>,
    pub allowed_commands: Vec<String>,
    pub allowed_log_paths: Vec<String>,
    pub scripts_directory: Option<PathBuf>,
}

impl Default for CommandsConfig {
    fn default() -> Self {
        Self {
            timeout_secs: 30,
            allowed_services: Vec::new(),
            allowed_commands: Vec::new(),
            allowed_log_paths: Vec::new(),
            scripts_directory: None,
        }
    }
}

impl CommandsConfig {
    pub fn to_policy(&self) -> CommandPolicy {
        CommandPolicy {
            allowed_services: self.allowed_services.clone(),
            allowed_commands: self.allowed_commands.clone(),
            allowed_log_paths: self.allowed_log_paths.clone(),
            scripts_dir: self
                .scripts_directory
                .clone()
                .unwrap_or_else(defaults::scripts_dir),
            command_timeout: Duration::from_secs(self.timeout_secs),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    pub level: String,
    /// Log file path; unset uses the platform default, empty disables
    /// file logging.
    pub file: Option<PathBuf>,
    pub console: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            file: Some(defaults::log_file()),
            console: true,
        }
    }
}

fn default_password_env() -> String {
    "EDGEMON_BOOTSTRAP_PASSWORD".to_string()
}

fn default_auth_collection() -> String {
    "users".to_string()
}

fn default_collection() -> String {
    "device_credentials".to_string()
}

fn default_device_id_field() -> String {
    "device_id".to_string()
}

fn default_creds_field() -> String {
    "creds".to_string()
}

#[derive(Debug, Clone, Deserialize)]
pub struct BootstrapConfig {
    /// Control plane base URL.
    pub url: String,
    /// Identity used for auth-with-password; the password comes from
    /// the environment variable named by `password_env`.
    pub identity: String,
    #[serde(default = "default_password_env")]
    pub password_env: String,
    #[serde(default = "default_auth_collection")]
    pub auth_collection: String,
    #[serde(default = "default_collection")]
    pub collection: String,
    #[serde(default = "default_device_id_field")]
    pub device_id_field: String,
    #[serde(default = "default_creds_field")]
    pub creds_field: String,
}

impl AgentConfig {
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        let config: AgentConfig = toml::from_str(&contents)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let invalid = |message: String| Err(ConfigError::Invalid(message));

        subjects::validate_device_id(&self.device_id)
            .map_err(|e| ConfigError::Invalid(e.to_string()))?;
        subjects::validate_subject_prefix(&self.subject_prefix)
            .map_err(|e| ConfigError::Invalid(e.to_string()))?;

        if self.bus.urls.is_empty() {
            return invalid("bus.urls must contain at least one server URL".to_string());
        }
        self.bus.auth.validate().map_err(ConfigError::Invalid)?;

        if self.bus.auth.auth_type == AuthType::Pocketbase && self.bootstrap.is_none() {
            return invalid(
                "bootstrap section is required when bus.auth.type is \"pocketbase\"".to_string(),
            );
        }

        let heartbeat = self.tasks.heartbeat_interval().as_secs();
        if heartbeat < MIN_HEARTBEAT_SECS {
            return invalid(format!(
                "tasks.heartbeat.interval_secs must be at least {MIN_HEARTBEAT_SECS} seconds"
            ));
        }
        let metrics = self.tasks.system_metrics_interval().as_secs();
        if metrics < MIN_METRICS_SECS {
            return invalid(format!(
                "tasks.system_metrics.interval_secs must be at least {MIN_METRICS_SECS} seconds"
            ));
        }
        if heartbeat > metrics {
            return invalid(
                "tasks.heartbeat.interval_secs must not exceed tasks.system_metrics.interval_secs"
                    .to_string(),
            );
        }

        match self.tasks.metrics_source().as_str() {
            "builtin" => {}
            "exporter" => {
                if self.tasks.exporter_url().is_empty() {
                    return invalid(
                        "tasks.system_metrics.exporter_url is required for the exporter source"
                            .to_string(),
                    );
                }
            }
            other => {
                return invalid(format!(
                    "tasks.system_metrics.source must be \"builtin\" or \"exporter\", got {other:?}"
                ))
            }
        }

        let timeout = self.commands.timeout_secs;
        if !(MIN_COMMAND_TIMEOUT_SECS..=MAX_COMMAND_TIMEOUT_SECS).contains(&timeout) {
            return invalid(format!(
                "commands.timeout_secs must be between {MIN_COMMAND_TIMEOUT_SECS} and {MAX_COMMAND_TIMEOUT_SECS} seconds"
            ));
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn base_toml() -> String {
        r#"
device_id = "dev-1"
subject_prefix = "agents"

[bus]
urls = ["nats://localhost:4222"]

[commands]
timeout_secs = 30
"#
        .to_string()
    }

    fn parse(toml_str: &str) -> AgentConfig {
        toml::from_str(toml_str).unwrap()
    }

    #[test]
    fn minimal_config_is_valid_with_defaults() {
        let cfg = parse(&base_toml());
        cfg.validate().unwrap();
        assert!(cfg.tasks.heartbeat_enabled());
        assert_eq!(cfg.tasks.heartbeat_interval(), Duration::from_secs(60));
        assert_eq!(cfg.tasks.system_metrics_interval(), Duration::from_secs(300));
        assert_eq!(cfg.tasks.metrics_source(), "builtin");
        assert_eq!(cfg.tasks.inventory_interval(), Duration::from_secs(86400));
        assert_eq!(cfg.commands.timeout_secs, 30);
    }

    #[test]
    fn device_id_errors_name_the_field() {
        let mut toml_str = base_toml();
        toml_str = toml_str.replace("dev-1", "dev 1");
        let err = parse(&toml_str).validate().unwrap_err();
        assert!(err.to_string().contains("device_id"), "{err}");

        toml_str = base_toml().replace("\"dev-1\"", "\"\"");
        let err = parse(&toml_str).validate().unwrap_err();
        assert!(err.to_string().contains("device_id is required"), "{err}");
    }

    #[test]
    fn prefix_errors_name_the_field() {
        for bad in ["agents..prod", ".agents", "agents.", "ag nts", "agents.*"] {
            let toml_str = base_toml().replace("\"agents\"", &format!("{bad:?}"));
            let err = parse(&toml_str).validate().unwrap_err();
            assert!(err.to_string().contains("subject_prefix"), "{bad}: {err}");
        }
    }

    #[test]
    fn interval_bounds_are_enforced() {
        let toml_str = format!("{}\n[tasks.heartbeat]\ninterval_secs = 5\n", base_toml());
        let err = parse(&toml_str).validate().unwrap_err();
        assert!(err.to_string().contains("tasks.heartbeat.interval_secs"), "{err}");

        let toml_str = format!("{}\n[tasks.system_metrics]\ninterval_secs = 20\n", base_toml());
        let err = parse(&toml_str).validate().unwrap_err();
        assert!(
            err.to_string().contains("tasks.system_metrics.interval_secs"),
            "{err}"
        );

        let toml_str = format!(
            "{}\n[tasks.heartbeat]\ninterval_secs = 600\n[tasks.system_metrics]\ninterval_secs = 300\n",
            base_toml()
        );
        let err = parse(&toml_str).validate().unwrap_err();
        assert!(err.to_string().contains("must not exceed"), "{err}");
    }

    #[test]
    fn command_timeout_bounds_are_enforced() {
        for bad in [4, 301] {
            let toml_str = base_toml().replace("timeout_secs = 30", &format!("timeout_secs = {bad}"));
            let err = parse(&toml_str).validate().unwrap_err();
            assert!(err.to_string().contains("commands.timeout_secs"), "{err}");
        }
        for good in [5, 300] {
            let toml_str = base_toml().replace("timeout_secs = 30", &format!("timeout_secs = {good}"));
            parse(&toml_str).validate().unwrap();
        }
    }

    #[test]
    fn exporter_source_requires_url() {
        let toml_str = format!(
            "{}\n[tasks.system_metrics]\nsource = \"exporter\"\nexporter_url = \"\"\n",
            base_toml()
        );
        let err = parse(&toml_str).validate().unwrap_err();
        assert!(err.to_string().contains("exporter_url"), "{err}");

        // the platform default URL satisfies the requirement when unset
        let toml_str = format!(
            "{}\n[tasks.system_metrics]\nsource = \"exporter\"\n",
            base_toml()
        );
        parse(&toml_str).validate().unwrap();
    }

    #[test]
    fn unknown_metrics_source_is_rejected() {
        let toml_str = format!(
            "{}\n[tasks.system_metrics]\nsource = \"snmp\"\n",
            base_toml()
        );
        let err = parse(&toml_str).validate().unwrap_err();
        assert!(err.to_string().contains("tasks.system_metrics.source"), "{err}");
    }

    #[test]
    fn pocketbase_auth_requires_bootstrap_section() {
        let toml_str = format!(
            "{}\n[bus.auth]\ntype = \"pocketbase\"\ncreds_file = \"/var/lib/edgemon/agent.creds\"\n",
            base_toml()
        );
        let err = parse(&toml_str).validate().unwrap_err();
        assert!(err.to_string().contains("bootstrap section"), "{err}");

        let toml_str = format!(
            "{toml_str}\n[bootstrap]\nurl = \"https://cp.example.com\"\nidentity = \"agent@example.com\"\n"
        );
        let cfg = parse(&toml_str);
        cfg.validate().unwrap();
        let bootstrap = cfg.bootstrap.unwrap();
        assert_eq!(bootstrap.password_env, "EDGEMON_BOOTSTRAP_PASSWORD");
        assert_eq!(bootstrap.device_id_field, "device_id");
    }

    #[test]
    fn missing_auth_fields_are_reported() {
        let toml_str = format!("{}\n[bus.auth]\ntype = \"token\"\n", base_toml());
        let err = parse(&toml_str).validate().unwrap_err();
        assert!(err.to_string().contains("auth.token"), "{err}");
    }

    #[test]
    fn empty_bus_urls_are_rejected() {
        let toml_str = base_toml().replace("urls = [\"nats://localhost:4222\"]", "urls = []");
        let err = parse(&toml_str).validate().unwrap_err();
        assert!(err.to_string().contains("bus.urls"), "{err}");
    }

    #[test]
    fn load_surfaces_read_and_parse_errors() {
        let err = AgentConfig::load(Path::new("/nonexistent/edgemon.toml")).unwrap_err();
        assert!(matches!(err, ConfigError::Read { .. }));

        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("bad.toml");
        std::fs::write(&path, "this is { not toml").unwrap();
        let err = AgentConfig::load(&path).unwrap_err();
        assert!(matches!(err, ConfigError::Parse(_)));
    }

    #[test]
    fn policy_carries_the_command_surface() {
        let toml_str = format!(
            r#"{}
[commands.extra]
"#,
            base_toml()
        );
        // commands.extra is unknown and ignored; policy uses defaults
        let cfg = parse(&toml_str);
        let policy = cfg.commands.to_policy();
        assert_eq!(policy.command_timeout, Duration::from_secs(30));
        assert!(policy.scripts_dir.is_absolute());
    }
}
