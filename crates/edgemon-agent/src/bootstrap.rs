//! One-shot credential bootstrap against the control plane.
//!
//! Idempotent: if the credentials file already exists nothing is
//! fetched. Otherwise the agent authenticates with password identity,
//! pulls the record keyed by its device id and writes the credentials
//! to disk with owner-only permissions.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;
use tracing::info;

use crate::config::BootstrapConfig;

const HTTP_TIMEOUT: Duration = Duration::from_secs(15);

#[derive(Debug, thiserror::Error)]
pub enum BootstrapError {
    #[error("bootstrap: environment variable {0} is not set or empty")]
    MissingPassword(String),
    #[error("bootstrap: http request failed: {0}")]
    Http(#[from] reqwest::Error),
    #[error("bootstrap: authentication returned {status}: {body}")]
    AuthFailed { status: u16, body: String },
    #[error("bootstrap: auth response contained no token")]
    NoToken,
    #[error("bootstrap: credentials query returned {status}: {body}")]
    QueryFailed { status: u16, body: String },
    #[error("bootstrap: no record found for {field}='{device_id}' in collection '{collection}'")]
    NoRecord {
        field: String,
        device_id: String,
        collection: String,
    },
    #[error("bootstrap: record field '{0}' is empty or not a string")]
    EmptyCredsField(String),
    #[error("bootstrap: failed to write credentials file {path}: {source}")]
    Write {
        path: PathBuf,
        source: std::io::Error,
    },
}

#[derive(Debug, Deserialize)]
struct AuthResponse {
    #[serde(default)]
    token: String,
}

#[derive(Debug, Deserialize)]
struct RecordList {
    #[serde(default)]
    items: Vec<HashMap<String, serde_json::Value>>,
    #[serde(rename = "totalItems", default)]
    total_items: i64,
}

/// Fetch and persist the credentials file if it does not exist yet.
/// Returns true when a fetch actually happened.
pub async fn fetch_credentials(
    cfg: &BootstrapConfig,
    device_id: &str,
    creds_path: &Path,
) -> Result<bool, BootstrapError> {
    if creds_path.exists() {
        info!(path = %creds_path.display(), "credentials file exists, skipping bootstrap");
        return Ok(false);
    }

    info!(
        path = %creds_path.display(),
        url = %cfg.url,
        "credentials file not found, bootstrapping from control plane"
    );

    let password = std::env::var(&cfg.password_env).unwrap_or_default();
    if password.is_empty() {
        return Err(BootstrapError::MissingPassword(cfg.password_env.clone()));
    }

    let client = reqwest::Client::builder()
        .timeout(HTTP_TIMEOUT)
        .build()?;

    let token = authenticate(&client, cfg, &password).await?;
    info!("authenticated with control plane");

    let credentials = fetch_record(&client, cfg, &token, device_id).await?;
    info!("fetched credentials record");

    write_credentials(creds_path, &credentials).map_err(|source| BootstrapError::Write {
        path: creds_path.to_path_buf(),
        source,
    })?;
    info!(path = %creds_path.display(), "credentials file written");

    Ok(true)
}

async fn authenticate(
    client: &reqwest::Client,
    cfg: &BootstrapConfig,
    password: &str,
) -> Result<String, BootstrapError> {
    let url = format!(
        "{}/api/collections/{}/auth-with-password",
        cfg.url.trim_end_matches('/'),
        cfg.auth_collection
    );

    let response = client
        .post(&url)
        .json(&serde_json::json!({
            "identity": cfg.identity,
            "password": password,
        }))
        .send()
        .await?;

    let status = response.status();
    if !status.is_success() {
        return Err(BootstrapError::AuthFailed {
            status: status.as_u16(),
            body: response.text().await.unwrap_or_default(),
        });
    }

    let auth: AuthResponse = response.json().await?;
    if auth.token.is_empty() {
        return Err(BootstrapError::NoToken);
    }
    Ok(auth.token)
}

async fn fetch_record(
    client: &reqwest::Client,
    cfg: &BootstrapConfig,
    token: &str,
    device_id: &str,
) -> Result<String, BootstrapError> {
    let url = format!(
        "{}/api/collections/{}/records",
        cfg.url.trim_end_matches('/'),
        cfg.collection
    );
    let filter = format!("{}='{}'", cfg.device_id_field, device_id);

    let response = client
        .get(&url)
        .query(&[("filter", filter.as_str()), ("perPage", "1")])
        .header("Authorization", token)
        .send()
        .await?;

    let status = response.status();
    if !status.is_success() {
        return Err(BootstrapError::QueryFailed {
            status: status.as_u16(),
            body: response.text().await.unwrap_or_default(),
        });
    }

    let list: RecordList = response.json().await?;
    if list.total_items == 0 || list.items.is_empty() {
        return Err(BootstrapError::NoRecord {
            field: cfg.device_id_field.clone(),
            device_id: device_id.to_string(),
            collection: cfg.collection.clone(),
        });
    }

    match list.items[0].get(&cfg.creds_field) {
        Some(serde_json::Value::String(creds)) if !creds.is_empty() => Ok(creds.clone()),
        _ => Err(BootstrapError::EmptyCredsField(cfg.creds_field.clone())),
    }
}

/// Owner-only file under owner-only parent directories.
fn write_credentials(path: &Path, content: &str) -> std::io::Result<()> {
    if let Some(dir) = path.parent() {
        std::fs::create_dir_all(dir)?;
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            std::fs::set_permissions(dir, std::fs::Permissions::from_mode(0o700))?;
        }
    }
    std::fs::write(path, content)?;
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        std::fs::set_permissions(path, std::fs::Permissions::from_mode(0o600))?;
    }
    Ok(())
}
