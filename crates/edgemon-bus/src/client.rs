//! Bus client adapter.
//!
//! Wraps the NATS client: connection with auth and TLS, a validated
//! JetStream context for durable telemetry, core subscriptions for
//! request/reply, and the bounded two-phase drain used at shutdown.

use std::time::Duration;

use async_nats::jetstream;
use async_nats::{Client, ConnectOptions, Event, Subscriber};
use tracing::{debug, error, info, warn};

use crate::tls::insecure_client_config;
use crate::{AuthType, BusConfig, BusError};

pub struct BusClient {
    client: Client,
    jetstream: jetstream::Context,
    drain_timeout: Duration,
}

impl BusClient {
    /// Connect and fail fast if the durable-stream capability is not
    /// actually usable on the server.
    pub async fn connect(cfg: &BusConfig) -> Result<Self, BusError> {
        let mut options = ConnectOptions::new()
            .name("edgemon")
            .event_callback(|event| async move {
                match event {
                    Event::Connected => info!("bus reconnected"),
                    Event::Disconnected => warn!("bus disconnected"),
                    other => debug!(event = %other, "bus connection event"),
                }
            });

        let reconnect_wait = Duration::from_secs(cfg.reconnect_wait_secs.max(1));
        options = options.reconnect_delay_callback(move |_attempts| reconnect_wait);

        options = apply_auth(options, cfg).await?;
        options = apply_tls(options, cfg)?;

        info!(urls = ?cfg.urls, auth = %cfg.auth.auth_type, tls = cfg.tls.enabled, "connecting to bus");
        let client = options
            .connect(cfg.urls.join(","))
            .await
            .map_err(|e| BusError::Connect(e.to_string()))?;

        // A JetStream context always builds; prove the capability is
        // live before the first telemetry publish can fail cryptically.
        let jetstream = jetstream::new(client.clone());
        jetstream
            .query_account()
            .await
            .map_err(|e| BusError::DurableStream(e.to_string()))?;
        info!("durable stream validated");

        Ok(Self {
            client,
            jetstream,
            drain_timeout: Duration::from_secs(cfg.drain_timeout_secs),
        })
    }

    /// Fire-and-forget durable publish: the message is queued and the
    /// acknowledgement is awaited in the background. Ack failures are
    /// logged, not returned — the stream client retries internally.
    pub async fn publish_telemetry(
        &self,
        subject: String,
        payload: Vec<u8>,
    ) -> Result<(), BusError> {
        let bytes = payload.len();
        let ack = self
            .jetstream
            .publish(subject.clone(), payload.into())
            .await
            .map_err(|e| BusError::Publish {
                subject: subject.clone(),
                reason: e.to_string(),
            })?;

        tokio::spawn(async move {
            match ack.await {
                Ok(_) => debug!(%subject, bytes, "telemetry published"),
                Err(e) => warn!(%subject, error = %e, "telemetry publish not acknowledged"),
            }
        });
        Ok(())
    }

    /// Durable publish that waits for the acknowledgement. Used where
    /// the caller must know the message landed, e.g. during shutdown.
    pub async fn publish_telemetry_sync(
        &self,
        subject: String,
        payload: Vec<u8>,
        timeout: Duration,
    ) -> Result<(), BusError> {
        let ack = self
            .jetstream
            .publish(subject.clone(), payload.into())
            .await
            .map_err(|e| BusError::Publish {
                subject: subject.clone(),
                reason: e.to_string(),
            })?;

        match tokio::time::timeout(timeout, ack).await {
            Ok(Ok(_)) => Ok(()),
            Ok(Err(e)) => Err(BusError::Publish {
                subject,
                reason: e.to_string(),
            }),
            Err(_) => Err(BusError::PublishAckTimeout { subject, timeout }),
        }
    }

    /// Core subscription for request/reply command traffic.
    pub async fn subscribe(&self, subject: String) -> Result<Subscriber, BusError> {
        self.client
            .subscribe(subject.clone())
            .await
            .map_err(|e| BusError::Subscribe {
                subject,
                reason: e.to_string(),
            })
    }

    /// Reply on the ephemeral path.
    pub async fn publish_reply(
        &self,
        subject: async_nats::Subject,
        payload: Vec<u8>,
    ) -> Result<(), BusError> {
        let subject_str = subject.to_string();
        self.client
            .publish(subject, payload.into())
            .await
            .map_err(|e| BusError::Publish {
                subject: subject_str,
                reason: e.to_string(),
            })
    }

    pub fn is_connected(&self) -> bool {
        self.client.connection_state() == async_nats::connection::State::Connected
    }

    /// Two-phase graceful close: stop intake, flush in-flight traffic,
    /// close — all within the configured budget. Past the budget the
    /// connection is torn down by drop.
    pub async fn drain(&self) -> Result<(), BusError> {
        if !self.is_connected() {
            info!("bus connection already closed, nothing to drain");
            return Ok(());
        }
        info!(timeout = ?self.drain_timeout, "draining bus connection");
        match tokio::time::timeout(self.drain_timeout, self.client.drain()).await {
            Ok(Ok(())) => {
                info!("bus drain completed");
                Ok(())
            }
            Ok(Err(e)) => {
                error!(error = %e, "bus drain failed");
                Err(BusError::Drain(e.to_string()))
            }
            Err(_) => {
                warn!("bus drain timed out, forcing close");
                Err(BusError::DrainTimeout(self.drain_timeout))
            }
        }
    }
}

async fn apply_auth(options: ConnectOptions, cfg: &BusConfig) -> Result<ConnectOptions, BusError> {
    let auth = &cfg.auth;
    match auth.auth_type {
        AuthType::None => {
            info!("using no bus authentication");
            Ok(options)
        }
        AuthType::Token => {
            info!("using token bus authentication");
            Ok(options.token(auth.token.clone()))
        }
        AuthType::Userpass => {
            info!(username = %auth.username, "using username/password bus authentication");
            Ok(options.user_and_password(auth.username.clone(), auth.password.clone()))
        }
        AuthType::Credentials => {
            let creds_file = auth
                .creds_file
                .as_ref()
                .ok_or_else(|| BusError::Auth("credentials auth without creds_file".into()))?;
            info!(file = %creds_file.display(), "using credentials file bus authentication");
            options
                .credentials_file(creds_file)
                .await
                .map_err(|e| BusError::Auth(format!("loading credentials file: {e}")))
        }
        // The lifecycle resolves pocketbase to credentials before
        // connecting; reaching here unresolved is a wiring bug upstream.
        AuthType::Pocketbase => Err(BusError::Auth(
            "pocketbase auth must be bootstrapped before connecting".into(),
        )),
    }
}

fn apply_tls(options: ConnectOptions, cfg: &BusConfig) -> Result<ConnectOptions, BusError> {
    let tls = &cfg.tls;
    if !tls.enabled {
        return Ok(options);
    }

    let mut options = options.require_tls(true);
    info!(
        ca = tls.ca_file.is_some(),
        client_cert = tls.cert_file.is_some(),
        skip_verify = tls.insecure_skip_verify,
        "TLS enabled for bus connection"
    );

    if tls.insecure_skip_verify {
        warn!("TLS certificate verification is DISABLED - do not use outside development");
        return Ok(options.tls_client_config(insecure_client_config(tls)?));
    }

    if let Some(ca) = &tls.ca_file {
        options = options.add_root_certificates(ca.clone());
    }
    if let (Some(cert), Some(key)) = (&tls.cert_file, &tls.key_file) {
        options = options.add_client_certificate(cert.clone(), key.clone());
    }
    Ok(options)
}
