//! Connection configuration for the bus client.

use std::path::PathBuf;

use serde::Deserialize;

fn default_reconnect_wait_secs() -> u64 {
    2
}

fn default_drain_timeout_secs() -> u64 {
    30
}

#[derive(Debug, Clone, Deserialize)]
pub struct BusConfig {
    /// Server URLs, tried in order with automatic failover.
    pub urls: Vec<String>,
    #[serde(default)]
    pub auth: AuthConfig,
    #[serde(default)]
    pub tls: TlsConfig,
    /// Wait between reconnect attempts. Reconnects are unbounded.
    #[serde(default = "default_reconnect_wait_secs")]
    pub reconnect_wait_secs: u64,
    /// Budget for the graceful drain on shutdown.
    #[serde(default = "default_drain_timeout_secs")]
    pub drain_timeout_secs: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AuthType {
    #[default]
    None,
    Token,
    Userpass,
    Credentials,
    /// Resolved to `Credentials` at startup once the bootstrap has
    /// written the credentials file.
    Pocketbase,
}

impl std::fmt::Display for AuthType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            AuthType::None => "none",
            AuthType::Token => "token",
            AuthType::Userpass => "userpass",
            AuthType::Credentials => "credentials",
            AuthType::Pocketbase => "pocketbase",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct AuthConfig {
    #[serde(rename = "type", default)]
    pub auth_type: AuthType,
    #[serde(default)]
    pub token: String,
    #[serde(default)]
    pub username: String,
    #[serde(default)]
    pub password: String,
    /// Credentials file, required for `credentials` and `pocketbase`.
    #[serde(default)]
    pub creds_file: Option<PathBuf>,
}

impl AuthConfig {
    /// Check the fields the selected auth type needs. Messages name the
    /// missing field.
    pub fn validate(&self) -> Result<(), String> {
        match self.auth_type {
            AuthType::None => Ok(()),
            AuthType::Token if self.token.is_empty() => {
                Err("auth.token is required for token auth".to_string())
            }
            AuthType::Token => Ok(()),
            AuthType::Userpass if self.username.is_empty() => {
                Err("auth.username is required for userpass auth".to_string())
            }
            AuthType::Userpass => Ok(()),
            AuthType::Credentials | AuthType::Pocketbase if self.creds_file.is_none() => Err(
                format!("auth.creds_file is required for {} auth", self.auth_type),
            ),
            AuthType::Credentials | AuthType::Pocketbase => Ok(()),
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct TlsConfig {
    #[serde(default)]
    pub enabled: bool,
    /// CA bundle used to verify the server certificate.
    #[serde(default)]
    pub ca_file: Option<PathBuf>,
    /// Client certificate + key for mutual TLS.
    #[serde(default)]
    pub cert_file: Option<PathBuf>,
    #[serde(default)]
    pub key_file: Option<PathBuf>,
    /// Disables server certificate verification. Loudly warned about.
    #[serde(default)]
    pub insecure_skip_verify: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn auth_types_deserialize_lowercase() {
        #[derive(Deserialize)]
        struct Wrap {
            auth: AuthConfig,
        }
        let w: Wrap = toml_like(r#"{"auth":{"type":"pocketbase","creds_file":"/a/b.creds"}}"#);
        assert_eq!(w.auth.auth_type, AuthType::Pocketbase);
        assert!(w.auth.validate().is_ok());
    }

    #[test]
    fn auth_validation_names_the_missing_field() {
        let auth = AuthConfig {
            auth_type: AuthType::Token,
            ..Default::default()
        };
        assert!(auth.validate().unwrap_err().contains("auth.token"));

        let auth = AuthConfig {
            auth_type: AuthType::Userpass,
            ..Default::default()
        };
        assert!(auth.validate().unwrap_err().contains("auth.username"));

        let auth = AuthConfig {
            auth_type: AuthType::Credentials,
            ..Default::default()
        };
        assert!(auth.validate().unwrap_err().contains("auth.creds_file"));
    }

    fn toml_like<T: serde::de::DeserializeOwned>(json: &str) -> T {
        serde_json::from_str(json).unwrap()
    }
}
