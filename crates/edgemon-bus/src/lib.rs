//! Message-bus surface of the agent: the NATS client adapter and the
//! command dispatcher.

pub mod client;
pub mod config;
pub mod dispatcher;
pub mod protocol;
mod tls;

pub use client::BusClient;
pub use config::{AuthConfig, AuthType, BusConfig, TlsConfig};
pub use dispatcher::Dispatcher;

use std::time::Duration;

#[derive(Debug, thiserror::Error)]
pub enum BusError {
    #[error("failed to connect to message bus: {0}")]
    Connect(String),
    #[error("durable stream unavailable on the bus (is JetStream enabled?): {0}")]
    DurableStream(String),
    #[error("failed to queue publish to {subject}: {reason}")]
    Publish { subject: String, reason: String },
    #[error("publish to {subject} not acknowledged within {timeout:?}")]
    PublishAckTimeout { subject: String, timeout: Duration },
    #[error("failed to subscribe to {subject}: {reason}")]
    Subscribe { subject: String, reason: String },
    #[error("bus drain failed: {0}")]
    Drain(String),
    #[error("bus drain timed out after {0:?}")]
    DrainTimeout(Duration),
    #[error("invalid auth type for connection: {0}")]
    Auth(String),
    #[error("invalid TLS material: {0}")]
    Tls(String),
}
