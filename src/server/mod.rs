//! Embedded HTTP backend served with axum.
//!
//! Every instance serves the orchestration endpoints (`/status`,
//! `/auth-check`, `/save-token`); all other routes, including `/validate`,
//! come from the [`AppRoutes`] supplied by the content backend.

mod routes;

pub use routes::{AuthCheckResponse, SaveTokenRequest, SaveTokenResponse};

use crate::credential::CredentialStore;
use crate::error::{Error, Result};
use crate::service::{Backend, BackendHandle};
use async_trait::async_trait;
use axum::Router;
use chrono::Utc;
use routes::{desktop_routes, DesktopState};
use std::path::Path;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;

/// Content routes for a project.
#[async_trait]
pub trait AppRoutes: Send + Sync {
    /// One-time loading of project data before the first launch.
    async fn load(&self, project: &str, working_directory: &Path) -> Result<()>;

    /// Router merged into every instance serving `project`.
    fn router(&self, project: &str) -> Router;

    /// Drop anything `load` registered globally.
    async fn unload(&self, project: &str) -> Result<()>;
}

/// No content routes. Used by the headless `serve` command.
pub struct NoAppRoutes;

#[async_trait]
impl AppRoutes for NoAppRoutes {
    async fn load(&self, _project: &str, _working_directory: &Path) -> Result<()> {
        Ok(())
    }

    fn router(&self, _project: &str) -> Router {
        Router::new()
    }

    async fn unload(&self, _project: &str) -> Result<()> {
        Ok(())
    }
}

pub struct EmbeddedServer {
    credentials: Arc<CredentialStore>,
    app: Arc<dyn AppRoutes>,
}

impl EmbeddedServer {
    pub fn new(credentials: Arc<CredentialStore>, app: Arc<dyn AppRoutes>) -> Self {
        Self { credentials, app }
    }
}

#[async_trait]
impl Backend for EmbeddedServer {
    async fn initialize(&self, project: &str, working_directory: &Path) -> Result<()> {
        tracing::debug!(
            "Loading project '{}' from {}",
            project,
            working_directory.display()
        );
        self.app.load(project, working_directory).await
    }

    async fn launch(
        &self,
        project: &str,
        _working_directory: &Path,
        port: u16,
    ) -> Result<Box<dyn BackendHandle>> {
        let listener = TcpListener::bind(("127.0.0.1", port))
            .await
            .map_err(|e| Error::from_bind(port, e))?;

        let state = DesktopState {
            project: project.to_string(),
            port,
            started_at: Utc::now(),
            credentials: self.credentials.clone(),
        };
        let app = desktop_routes(state).merge(self.app.router(project));

        let (shutdown_tx, shutdown_rx) = oneshot::channel::<()>();
        let task = tokio::spawn(async move {
            let server = axum::serve(listener, app).with_graceful_shutdown(async {
                let _ = shutdown_rx.await;
            });
            if let Err(e) = server.await {
                tracing::error!("Embedded server on port {} failed: {}", port, e);
            }
        });

        tracing::debug!("Embedded server listening on 127.0.0.1:{}", port);
        Ok(Box::new(ServerHandle {
            shutdown_tx: Some(shutdown_tx),
            task: Some(task),
        }))
    }

    async fn release(&self, project: &str) -> Result<()> {
        self.app.unload(project).await
    }
}

struct ServerHandle {
    shutdown_tx: Option<oneshot::Sender<()>>,
    task: Option<JoinHandle<()>>,
}

#[async_trait]
impl BackendHandle for ServerHandle {
    async fn shutdown(&mut self) -> Result<()> {
        if let Some(tx) = self.shutdown_tx.take() {
            let _ = tx.send(());
        }
        // Awaited by reference so an abort after a timed-out shutdown still
        // reaches the task
        if let Some(task) = self.task.as_mut() {
            let joined = task.await;
            self.task = None;
            joined.map_err(|e| Error::Backend(format!("Server task failed: {}", e)))?;
        }
        Ok(())
    }

    fn abort(&mut self) {
        self.shutdown_tx = None;
        if let Some(task) = self.task.take() {
            task.abort();
        }
    }
}

impl Drop for ServerHandle {
    fn drop(&mut self) {
        self.abort();
    }
}
