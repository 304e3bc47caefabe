//! Core configuration types.
//!
//! Every field has a default, so an empty `sidecar.yaml` (or no file at all)
//! yields a working configuration.

use super::{format_duration, parse_duration_field, parse_duration_string};
use crate::error::{Error, Result};
use crate::port::platform_default_ports;
use crate::retry::RetryPolicy;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

/// Root configuration structure for sidecar.yaml
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
#[serde(default, deny_unknown_fields)]
pub struct Config {
    pub ports: PortsConfig,
    pub lifecycle: LifecycleConfig,
    pub session: SessionConfig,
    pub routes: RoutesConfig,
    pub storage: StorageConfig,
}

/// Port candidate ordering and dynamic fallback.
///
/// ```yaml
/// ports:
///   preferred: [4000, 4001, 3000]
///   dynamic_attempts: 3
///   dynamic_backoff: "1s"
/// ```
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default, deny_unknown_fields)]
pub struct PortsConfig {
    /// Candidate ports in priority order. `None` uses the platform default.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub preferred: Option<Vec<u16>>,
    pub dynamic_attempts: usize,
    pub dynamic_backoff: String,
}

impl Default for PortsConfig {
    fn default() -> Self {
        Self {
            preferred: None,
            dynamic_attempts: 3,
            dynamic_backoff: "1s".to_string(),
        }
    }
}

impl PortsConfig {
    pub fn preferred_ports(&self) -> Vec<u16> {
        match &self.preferred {
            Some(ports) => ports.clone(),
            None => platform_default_ports(),
        }
    }

    pub fn dynamic_policy(&self) -> RetryPolicy {
        RetryPolicy::fixed(
            self.dynamic_attempts,
            parse_duration_string(&self.dynamic_backoff).unwrap_or(Duration::from_secs(1)),
        )
    }
}

/// Backend start/stop timing.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default, deny_unknown_fields)]
pub struct LifecycleConfig {
    pub liveness_path: String,
    pub liveness_interval: String,
    pub liveness_timeout: String,
    pub stop_timeout: String,
    pub start_attempts: usize,
    pub start_backoff: Vec<String>,
}

impl Default for LifecycleConfig {
    fn default() -> Self {
        Self {
            liveness_path: "/status".to_string(),
            liveness_interval: "500ms".to_string(),
            liveness_timeout: "5s".to_string(),
            stop_timeout: "5s".to_string(),
            start_attempts: 3,
            start_backoff: vec!["1s".to_string(), "2s".to_string()],
        }
    }
}

impl LifecycleConfig {
    pub fn liveness_interval(&self) -> Duration {
        parse_duration_string(&self.liveness_interval).unwrap_or(Duration::from_millis(500))
    }

    pub fn liveness_timeout(&self) -> Duration {
        parse_duration_string(&self.liveness_timeout).unwrap_or(Duration::from_secs(5))
    }

    pub fn stop_timeout(&self) -> Duration {
        parse_duration_string(&self.stop_timeout).unwrap_or(Duration::from_secs(5))
    }

    pub fn start_policy(&self) -> RetryPolicy {
        let backoff = self
            .start_backoff
            .iter()
            .filter_map(|s| parse_duration_string(s))
            .collect();
        RetryPolicy::new(self.start_attempts, backoff)
    }
}

/// How a remote validation that neither confirms nor rejects a token is treated.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum ValidationPolicy {
    /// Timeouts and unreachable backends count as valid. This favors not
    /// forcing a re-login over strictness; it is not a security guarantee.
    #[default]
    Optimistic,
    /// Anything short of an explicit success counts as invalid.
    Strict,
}

/// Reconciliation bounds and timeouts.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default, deny_unknown_fields)]
pub struct SessionConfig {
    pub max_navigations: u32,
    pub max_injection_attempts: u32,
    pub validation_timeout: String,
    pub ready_timeout: String,
    pub navigation_debounce: String,
    pub validation_policy: ValidationPolicy,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            max_navigations: 3,
            max_injection_attempts: 2,
            validation_timeout: "3s".to_string(),
            ready_timeout: "10s".to_string(),
            navigation_debounce: "500ms".to_string(),
            validation_policy: ValidationPolicy::Optimistic,
        }
    }
}

impl SessionConfig {
    pub fn validation_timeout(&self) -> Duration {
        parse_duration_string(&self.validation_timeout).unwrap_or(Duration::from_secs(3))
    }

    pub fn ready_timeout(&self) -> Duration {
        parse_duration_string(&self.ready_timeout).unwrap_or(Duration::from_secs(10))
    }

    pub fn navigation_debounce(&self) -> Duration {
        parse_duration_string(&self.navigation_debounce).unwrap_or(Duration::from_millis(500))
    }
}

/// Paths on the running backend that the UI is sent to.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default, deny_unknown_fields)]
pub struct RoutesConfig {
    pub authenticated_entry: String,
    pub login_entry: String,
    pub validate: String,
}

impl Default for RoutesConfig {
    fn default() -> Self {
        Self {
            authenticated_entry: "/pro".to_string(),
            login_entry: "/pro/login".to_string(),
            validate: "/validate".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
#[serde(default, deny_unknown_fields)]
pub struct StorageConfig {
    /// Credential file. Defaults to `<data dir>/sidecar/credentials.json`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub path: Option<PathBuf>,
}

impl StorageConfig {
    pub fn credentials_path(&self) -> Result<PathBuf> {
        if let Some(ref path) = self.path {
            return Ok(path.clone());
        }
        let data_dir = dirs::data_dir()
            .ok_or_else(|| Error::Config("Could not determine data directory".to_string()))?;
        Ok(data_dir.join("sidecar").join("credentials.json"))
    }
}

impl Config {
    /// Check bounds and formats that serde cannot express.
    pub fn validate(&self) -> Result<()> {
        if let Some(ref preferred) = self.ports.preferred {
            if preferred.contains(&0) {
                return Err(Error::Config(
                    "ports.preferred must not contain 0; dynamic allocation is the automatic fallback"
                        .to_string(),
                ));
            }
        }
        parse_duration_field("ports.dynamic_backoff", &self.ports.dynamic_backoff)?;

        if self.lifecycle.start_attempts == 0 {
            return Err(Error::Config(
                "lifecycle.start_attempts must be at least 1".to_string(),
            ));
        }
        parse_duration_field("lifecycle.liveness_interval", &self.lifecycle.liveness_interval)?;
        parse_duration_field("lifecycle.liveness_timeout", &self.lifecycle.liveness_timeout)?;
        parse_duration_field("lifecycle.stop_timeout", &self.lifecycle.stop_timeout)?;
        for backoff in &self.lifecycle.start_backoff {
            parse_duration_field("lifecycle.start_backoff", backoff)?;
        }
        if !self.lifecycle.liveness_path.starts_with('/') {
            return Err(Error::Config(format!(
                "lifecycle.liveness_path '{}' must start with '/'",
                self.lifecycle.liveness_path
            )));
        }

        if self.session.max_navigations == 0 {
            return Err(Error::Config(
                "session.max_navigations must be at least 1".to_string(),
            ));
        }
        parse_duration_field("session.validation_timeout", &self.session.validation_timeout)?;
        parse_duration_field("session.ready_timeout", &self.session.ready_timeout)?;
        parse_duration_field("session.navigation_debounce", &self.session.navigation_debounce)?;

        for (field, path) in [
            ("routes.authenticated_entry", &self.routes.authenticated_entry),
            ("routes.login_entry", &self.routes.login_entry),
            ("routes.validate", &self.routes.validate),
        ] {
            if !path.starts_with('/') {
                return Err(Error::Config(format!(
                    "{} '{}' must start with '/'",
                    field, path
                )));
            }
        }

        Ok(())
    }

    /// Effective config with platform defaults filled in, for display.
    pub fn effective(&self) -> Self {
        let mut config = self.clone();
        config.ports.preferred = Some(self.ports.preferred_ports());
        config.ports.dynamic_backoff = format_duration(self.ports.dynamic_policy().delay_after(1));
        config
    }
}
