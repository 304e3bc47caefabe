// Allow unused_assignments at module level because thiserror's generated code
// for struct variants triggers false positive warnings - the fields ARE used
// in the Display impl but rustc's lint pass doesn't see this.
#![allow(unused_assignments)]

use miette::Diagnostic;
use std::io;
use std::time::Duration;
use thiserror::Error;

#[derive(Error, Diagnostic, Debug)]
pub enum Error {
    #[error("Permission denied binding port {port}")]
    #[diagnostic(
        code(sidecar::port::permission_denied),
        help("Run the application with elevated privileges, check your firewall settings, or choose a port in the user range (1024-65535)")
    )]
    PortPermissionDenied { port: u16 },

    #[error("Port {port} is already in use")]
    #[diagnostic(code(sidecar::port::in_use))]
    PortInUse { port: u16 },

    #[error("No usable port found (tried {})", describe_tried(.tried))]
    #[diagnostic(
        code(sidecar::port::exhausted),
        help("Stop the programs occupying these ports or add more candidates under ports.preferred in sidecar.yaml")
    )]
    PortExhausted { tried: Vec<u16> },

    #[error("Port allocation failed: {0}")]
    #[diagnostic(code(sidecar::port::allocation_failed))]
    AllocationError(String),

    #[error("Backend for '{project}' did not become reachable within {}ms", .waited.as_millis())]
    #[diagnostic(
        code(sidecar::service::start_timeout),
        help("The project may be slow to load. Increase lifecycle.liveness_timeout or check the backend logs")
    )]
    StartTimeout { project: String, waited: Duration },

    #[error("Backend for '{project}' failed to start after {attempts} attempt(s): {cause}")]
    #[diagnostic(code(sidecar::service::start_failed))]
    StartFailed {
        project: String,
        attempts: usize,
        cause: Box<Error>,
    },

    #[error("A backend for '{running}' is already active; stop it before starting '{requested}'")]
    #[diagnostic(code(sidecar::service::already_running))]
    AlreadyRunning { running: String, requested: String },

    #[error("Token is not a three-segment compact token")]
    #[diagnostic(
        code(sidecar::credential::invalid_shape),
        help("Tokens must look like <header>.<payload>.<signature> using URL-safe base64")
    )]
    InvalidTokenShape,

    #[error("Token validation timed out")]
    ValidationTimeout,

    #[error("Token was rejected by the backend")]
    ValidationUnauthorized,

    #[error("UI surface did not report ready within {}ms", .waited.as_millis())]
    NavigationTimeout { waited: Duration },

    #[error("Token injection failed: {0}")]
    InjectionFailed(String),

    #[error("Backend error: {0}")]
    Backend(String),

    #[error("Storage error: {0}")]
    #[diagnostic(code(sidecar::storage::error))]
    Storage(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Parse error: {0}")]
    Parse(String),

    #[error("Operation cancelled for '{0}'")]
    Cancelled(String),

    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),
}

pub type Result<T> = std::result::Result<T, Error>;

fn describe_tried(tried: &[u16]) -> String {
    if tried.is_empty() {
        "dynamic allocation only".to_string()
    } else {
        tried
            .iter()
            .map(|p| p.to_string())
            .collect::<Vec<_>>()
            .join(", ")
    }
}

impl Error {
    /// True for failures caused by the race between probing a port and the
    /// backend binding it. These are worth retrying with a fresh port.
    pub fn is_transient_start_failure(&self) -> bool {
        match self {
            Error::PortInUse { .. } => true,
            Error::Io(e) => e.kind() == io::ErrorKind::AddrInUse,
            _ => false,
        }
    }

    /// True if this error, or the cause it wraps, is a permission problem.
    pub fn is_permission_denied(&self) -> bool {
        match self {
            Error::PortPermissionDenied { .. } => true,
            Error::Io(e) => e.kind() == io::ErrorKind::PermissionDenied,
            Error::StartFailed { cause, .. } => cause.is_permission_denied(),
            _ => false,
        }
    }

    /// Map a bind error on `port` to the matching taxonomy variant.
    pub fn from_bind(port: u16, err: io::Error) -> Self {
        match err.kind() {
            io::ErrorKind::AddrInUse => Error::PortInUse { port },
            io::ErrorKind::PermissionDenied => Error::PortPermissionDenied { port },
            _ => Error::Backend(format!("Failed to bind 127.0.0.1:{}: {}", port, err)),
        }
    }

    /// Returns a helpful suggestion for resolving this error, if available.
    pub fn suggestion(&self) -> Option<String> {
        match self {
            Error::PortPermissionDenied { port } => Some(format!(
                "The operating system refused access to port {}. This is common on Windows for reserved port ranges.\n  1. Run the application as administrator\n  2. Check your firewall settings\n  3. Make sure no other application has reserved the port",
                port
            )),
            Error::PortExhausted { .. } => Some(
                "Every candidate port is busy. Close other local servers or add candidates under ports.preferred.".to_string()
            ),
            Error::StartFailed { cause, .. } if cause.is_permission_denied() => {
                cause.suggestion()
            }
            Error::StartFailed { cause, .. } => Some(format!(
                "The last attempt failed with: {}. Try restarting the service.",
                cause
            )),
            Error::StartTimeout { .. } => Some(
                "Large projects can take longer to load. Raise lifecycle.liveness_timeout in sidecar.yaml.".to_string()
            ),
            Error::AlreadyRunning { running, .. } => Some(format!(
                "Close project '{}' first, or use restart.",
                running
            )),
            Error::InvalidTokenShape => Some(
                "Log in again from the UI to obtain a fresh token.".to_string()
            ),
            Error::Config(_) | Error::Yaml(_) => Some(
                "Check sidecar.yaml with: sidecar config".to_string()
            ),
            Error::Storage(_) => Some(
                "Check that the credential file is writable, or reset it with: sidecar token clear-all".to_string()
            ),
            _ => None,
        }
    }

    /// Formats the error with its suggestion (if any) for user-friendly display.
    pub fn with_suggestion(&self) -> String {
        match self.suggestion() {
            Some(suggestion) => format!("{}\n\nHint: {}", self, suggestion),
            None => self.to_string(),
        }
    }
}
