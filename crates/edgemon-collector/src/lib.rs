//! Metrics collection engine.
//!
//! Two interchangeable collectors implement the same contract: the
//! builtin collector samples the OS directly, the exporter collector
//! scrapes a Prometheus-style text endpoint. Both share one rate state
//! machine: CPU usage and disk I/O rates are derived from successive
//! counter samples and are 0 on the first sample after creation or a
//! cache reset. Callers must tolerate that first-sample state.

mod builtin;
mod exporter;
mod probe;
mod rates;
mod validate;

pub use builtin::BuiltinCollector;
pub use exporter::ExporterCollector;

use std::sync::Arc;

use async_trait::async_trait;
use edgemon_common::types::SystemMetrics;

#[derive(Debug, thiserror::Error)]
pub enum CollectError {
    #[error("metrics scrape failed: {0}")]
    Http(#[from] reqwest::Error),
    #[error("exporter returned status {0}")]
    HttpStatus(u16),
    #[error("failed to decode metric families: {0}")]
    Parse(String),
    #[error("invalid metrics: {0}")]
    Invalid(String),
    #[error("failed to read system counters: {0}")]
    Counters(#[from] std::io::Error),
    #[error("system_metrics.exporter_url is required when source is \"exporter\"")]
    MissingExporterUrl,
    #[error("unknown system_metrics.source {0:?} (expected \"builtin\" or \"exporter\")")]
    UnknownSource(String),
}

/// A source of system metrics.
#[async_trait]
pub trait Collector: Send + Sync {
    /// Gather one sample. Rate fields are 0 on the first call after
    /// creation or [`Collector::reset_cache`].
    async fn collect(&self) -> Result<SystemMetrics, CollectError>;

    /// Collector name for logging.
    fn name(&self) -> String;

    /// Drop all rate-derivation state. The next sample behaves like a
    /// first sample.
    fn reset_cache(&self);
}

/// Build the collector selected by configuration.
pub fn new_collector(
    source: &str,
    exporter_url: Option<&str>,
) -> Result<Arc<dyn Collector>, CollectError> {
    match source.to_ascii_lowercase().as_str() {
        "" | "builtin" => Ok(Arc::new(BuiltinCollector::new())),
        "exporter" => {
            let url = exporter_url
                .filter(|u| !u.is_empty())
                .ok_or(CollectError::MissingExporterUrl)?;
            Ok(Arc::new(ExporterCollector::new(url)?))
        }
        other => Err(CollectError::UnknownSource(other.to_string())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn factory_defaults_to_builtin() {
        let c = new_collector("", None).unwrap();
        assert_eq!(c.name(), "builtin");
        let c = new_collector("Builtin", None).unwrap();
        assert_eq!(c.name(), "builtin");
    }

    #[test]
    fn factory_requires_exporter_url() {
        assert!(matches!(
            new_collector("exporter", None),
            Err(CollectError::MissingExporterUrl)
        ));
        assert!(matches!(
            new_collector("exporter", Some("")),
            Err(CollectError::MissingExporterUrl)
        ));
        let c = new_collector("exporter", Some("http://localhost:9100/metrics")).unwrap();
        assert!(c.name().starts_with("exporter"));
    }

    #[test]
    fn factory_rejects_unknown_source() {
        assert!(matches!(
            new_collector("snmp", None),
            Err(CollectError::UnknownSource(_))
        ));
    }
}
