use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;

/// Lifecycle state of the embedded backend.
///
/// ```text
/// Stopped ──► Starting ──► Running ──► Stopping ──► Stopped
///    ▲           │  │                     ▲
///    │           │  └─────────────────────┘  (force stop)
///    │           ▼
///    └─────── Failed ◄── any state on unrecoverable error
///                │
///                └──► Starting (retry from failure)
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ServiceState {
    Stopped,
    Starting,
    Running,
    Stopping,
    Failed,
}

impl fmt::Display for ServiceState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ServiceState::Stopped => write!(f, "stopped"),
            ServiceState::Starting => write!(f, "starting"),
            ServiceState::Running => write!(f, "running"),
            ServiceState::Stopping => write!(f, "stopping"),
            ServiceState::Failed => write!(f, "failed"),
        }
    }
}

impl ServiceState {
    /// Check if a state transition is allowed.
    ///
    /// # Examples
    ///
    /// ```
    /// use sidecar::service::ServiceState;
    ///
    /// assert!(ServiceState::Stopped.is_valid_transition(ServiceState::Starting));
    /// assert!(ServiceState::Failed.is_valid_transition(ServiceState::Starting));
    /// assert!(!ServiceState::Running.is_valid_transition(ServiceState::Stopped)); // Must go through Stopping
    /// ```
    pub fn is_valid_transition(&self, to: ServiceState) -> bool {
        use ServiceState::*;
        match (self, to) {
            (Stopped, Starting) => true,

            (Starting, Running) => true,
            // Cancelled by a force stop
            (Starting, Stopping) => true,

            (Running, Stopping) => true,

            (Stopping, Stopped) => true,

            (Failed, Starting) => true,
            (Failed, Stopped) => true,

            (_, Failed) => true,

            // Same state is always valid (no-op transition)
            (s1, s2) if *s1 == s2 => true,

            _ => false,
        }
    }

    /// True while a backend handle may be live.
    pub fn is_active(&self) -> bool {
        matches!(self, ServiceState::Starting | ServiceState::Running)
    }
}

/// The single running backend. Owned by the lifecycle manager; callers get
/// clones.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ServiceInstance {
    pub project_key: String,
    pub working_directory: PathBuf,
    pub bound_port: u16,
    pub base_url: String,
    pub state: ServiceState,
    pub started_at: DateTime<Utc>,
}

impl ServiceInstance {
    pub fn uptime_secs(&self) -> u64 {
        (Utc::now() - self.started_at).num_seconds().max(0) as u64
    }
}

/// Payload of `GET /status`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ServiceStatus {
    pub running: bool,
    pub project_key: Option<String>,
    pub port: u16,
    pub has_project: bool,
    pub uptime_secs: u64,
}

impl ServiceStatus {
    pub fn stopped() -> Self {
        Self {
            running: false,
            project_key: None,
            port: 0,
            has_project: false,
            uptime_secs: 0,
        }
    }
}

impl From<&ServiceInstance> for ServiceStatus {
    fn from(instance: &ServiceInstance) -> Self {
        Self {
            running: instance.state == ServiceState::Running,
            project_key: Some(instance.project_key.clone()),
            port: instance.bound_port,
            has_project: true,
            uptime_secs: instance.uptime_secs(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_teardown_from_running_goes_through_stopping() {
        assert!(ServiceState::Running.is_valid_transition(ServiceState::Stopping));
        assert!(!ServiceState::Running.is_valid_transition(ServiceState::Stopped));
        assert!(ServiceState::Stopping.is_valid_transition(ServiceState::Stopped));
    }

    #[test]
    fn test_any_state_may_fail() {
        for state in [
            ServiceState::Stopped,
            ServiceState::Starting,
            ServiceState::Running,
            ServiceState::Stopping,
            ServiceState::Failed,
        ] {
            assert!(state.is_valid_transition(ServiceState::Failed));
        }
    }

    #[test]
    fn test_stopped_cannot_jump_to_running() {
        assert!(!ServiceState::Stopped.is_valid_transition(ServiceState::Running));
        assert!(!ServiceState::Stopped.is_valid_transition(ServiceState::Stopping));
    }

    #[test]
    fn test_status_serializes_camel_case() {
        let json = serde_json::to_value(ServiceStatus::stopped()).unwrap();
        assert_eq!(json["hasProject"], false);
        assert_eq!(json["projectKey"], serde_json::Value::Null);
        assert_eq!(json["uptimeSecs"], 0);
    }
}
