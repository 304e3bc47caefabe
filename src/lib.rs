//! # Sidecar
//!
//! Keeps one embedded content backend alive on a free local port and keeps a
//! UI surface's authentication token in sync with it.
//!
//! ## Components
//!
//! - **Port allocation**: loopback bind probes over a platform-ordered candidate
//!   list, with OS-assigned fallback ([`port::PortAllocator`])
//! - **Credentials**: per-project tokens behind a shape gate
//!   ([`credential::CredentialStore`])
//! - **Lifecycle**: start/stop/restart/force-stop of the single backend
//!   instance with bounded retries ([`service::ServiceLifecycleManager`])
//! - **Session**: bounded, loop-safe token reconciliation against the UI
//!   surface ([`session::SessionOrchestrator`])
//!
//! ## Quick Start
//!
//! ```no_run
//! use sidecar::output::CliOutput;
//! use sidecar::server::NoAppRoutes;
//! use sidecar::session::HeadlessSurface;
//! use sidecar::{Parser, ProjectController};
//! use std::sync::Arc;
//!
//! # async fn example() -> Result<(), sidecar::Error> {
//! let config = Parser::new().load_or_default(None)?;
//! let controller = ProjectController::from_config(
//!     &config,
//!     Arc::new(HeadlessSurface::new()),
//!     Arc::new(NoAppRoutes),
//!     Arc::new(CliOutput),
//! )?;
//!
//! let (instance, _outcome) = controller
//!     .open_project("blog", std::path::Path::new("./blog"))
//!     .await?;
//! println!("serving at {}", instance.base_url);
//!
//! controller.close_project().await;
//! # Ok(())
//! # }
//! ```
//!
//! ## Concurrency Model
//!
//! - Lifecycle transitions are serialized by an async mutex; `stop` and
//!   `restart` wait for an in-flight `start`
//! - `force_stop` cancels an in-flight start via `CancellationToken`
//! - At most one reconciliation pass runs per orchestrator; a concurrent call
//!   returns immediately

pub mod config;
pub mod controller;
pub mod credential;
pub mod error;
pub mod output;
pub mod port;
pub mod retry;
pub mod server;
pub mod service;
pub mod session;

// Re-export commonly used types
pub use config::{Config, Parser};
pub use controller::ProjectController;
pub use credential::CredentialStore;
pub use error::{Error, Result};
pub use port::PortAllocator;
pub use retry::RetryPolicy;
pub use service::{ServiceInstance, ServiceLifecycleManager, ServiceState};
pub use session::{ReconcileOutcome, SessionOrchestrator};
