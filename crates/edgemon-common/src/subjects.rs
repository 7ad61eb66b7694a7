//! Per-device subject namespace.
//!
//! Every subject the agent touches has the shape
//! `{prefix}.{device_id}.{cmd|telemetry}.{name}`. The prefix and device
//! id come from configuration and are validated once at startup; after
//! that the identity is immutable.

use serde::{Deserialize, Serialize};

const MAX_DEVICE_ID_LEN: usize = 64;
const MAX_PREFIX_LEN: usize = 50;

#[derive(Debug, thiserror::Error)]
pub enum SubjectError {
    #[error("device_id is required")]
    EmptyDeviceId,
    #[error("device_id must contain only alphanumeric characters, dashes and underscores: {0:?}")]
    InvalidDeviceId(String),
    #[error("device_id must be at most {MAX_DEVICE_ID_LEN} characters")]
    DeviceIdTooLong,
    #[error("subject_prefix is required")]
    EmptyPrefix,
    #[error("subject_prefix must be at most {MAX_PREFIX_LEN} characters")]
    PrefixTooLong,
    #[error("subject_prefix token must contain only alphanumeric characters, dashes and underscores: {0:?}")]
    InvalidPrefixToken(String),
    #[error("subject_prefix must not have empty tokens or leading/trailing dots")]
    EmptyPrefixToken,
}

fn valid_token_char(c: char) -> bool {
    c.is_ascii_alphanumeric() || c == '-' || c == '_'
}

/// Validate a device id: non-empty, bounded, `[A-Za-z0-9_-]+`.
pub fn validate_device_id(device_id: &str) -> Result<(), SubjectError> {
    if device_id.is_empty() {
        return Err(SubjectError::EmptyDeviceId);
    }
    if device_id.len() > MAX_DEVICE_ID_LEN {
        return Err(SubjectError::DeviceIdTooLong);
    }
    if !device_id.chars().all(valid_token_char) {
        return Err(SubjectError::InvalidDeviceId(device_id.to_string()));
    }
    Ok(())
}

/// Validate a subject prefix: non-empty, bounded, dot-separated tokens of
/// `[A-Za-z0-9_-]+` with no empty token.
pub fn validate_subject_prefix(prefix: &str) -> Result<(), SubjectError> {
    if prefix.is_empty() {
        return Err(SubjectError::EmptyPrefix);
    }
    if prefix.len() > MAX_PREFIX_LEN {
        return Err(SubjectError::PrefixTooLong);
    }
    for token in prefix.split('.') {
        if token.is_empty() {
            return Err(SubjectError::EmptyPrefixToken);
        }
        if !token.chars().all(valid_token_char) {
            return Err(SubjectError::InvalidPrefixToken(token.to_string()));
        }
    }
    Ok(())
}

/// The validated identity used to form all subjects for this device.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceIdentity {
    device_id: String,
    prefix: String,
}

impl DeviceIdentity {
    pub fn new(device_id: impl Into<String>, prefix: impl Into<String>) -> Result<Self, SubjectError> {
        let device_id = device_id.into();
        let prefix = prefix.into();
        validate_device_id(&device_id)?;
        validate_subject_prefix(&prefix)?;
        Ok(Self { device_id, prefix })
    }

    pub fn device_id(&self) -> &str {
        &self.device_id
    }

    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    /// `{prefix}.{device_id}.cmd.{name}` — request/reply command subject.
    pub fn command_subject(&self, name: &str) -> String {
        format!("{}.{}.cmd.{}", self.prefix, self.device_id, name)
    }

    /// `{prefix}.{device_id}.telemetry.{name}` — durable telemetry subject.
    pub fn telemetry_subject(&self, name: &str) -> String {
        format!("{}.{}.telemetry.{}", self.prefix, self.device_id, name)
    }
}
