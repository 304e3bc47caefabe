//! Project open/restart/close flows tying the lifecycle manager to the
//! session orchestrator.

use crate::config::Config;
use crate::credential::{CredentialStore, JsonFileStore};
use crate::error::{Error, Result};
use crate::output::UserOutput;
use crate::port::PortAllocator;
use crate::server::{AppRoutes, EmbeddedServer};
use crate::service::{HttpLivenessProbe, LifecycleSettings, ServiceInstance, ServiceLifecycleManager};
use crate::session::{
    HttpTokenValidator, ReconcileOutcome, SessionOrchestrator, SessionSettings, UiSurface,
};
use parking_lot::Mutex;
use std::path::{Path, PathBuf};
use std::sync::Arc;

pub struct ProjectController {
    lifecycle: Arc<ServiceLifecycleManager>,
    session: Arc<SessionOrchestrator>,
    output: Arc<dyn UserOutput>,
    current: Mutex<Option<(String, PathBuf)>>,
}

impl ProjectController {
    pub fn new(
        lifecycle: Arc<ServiceLifecycleManager>,
        session: Arc<SessionOrchestrator>,
        output: Arc<dyn UserOutput>,
    ) -> Self {
        Self {
            lifecycle,
            session,
            output,
            current: Mutex::new(None),
        }
    }

    /// Assemble the standard stack: file-backed credentials, the embedded
    /// axum server, HTTP liveness and validation.
    pub fn from_config(
        config: &Config,
        surface: Arc<dyn UiSurface>,
        app: Arc<dyn AppRoutes>,
        output: Arc<dyn UserOutput>,
    ) -> Result<Self> {
        config.validate()?;

        let store = JsonFileStore::open(config.storage.credentials_path()?)?;
        let credentials = Arc::new(CredentialStore::new(Arc::new(store)));

        let lifecycle = Arc::new(ServiceLifecycleManager::new(
            Arc::new(EmbeddedServer::new(credentials.clone(), app)),
            Arc::new(PortAllocator::new(config.ports.dynamic_policy())),
            Arc::new(HttpLivenessProbe::new(
                config.lifecycle.liveness_path.clone(),
                config.lifecycle.liveness_interval(),
            )),
            LifecycleSettings::from_config(config),
        ));

        let session = Arc::new(SessionOrchestrator::new(
            credentials,
            lifecycle.clone(),
            surface,
            Arc::new(HttpTokenValidator::new(
                config.routes.validate.clone(),
                config.session.validation_timeout(),
            )),
            SessionSettings::from_config(config),
        ));

        Ok(Self::new(lifecycle, session, output))
    }

    pub fn lifecycle(&self) -> &Arc<ServiceLifecycleManager> {
        &self.lifecycle
    }

    pub fn session(&self) -> &Arc<SessionOrchestrator> {
        &self.session
    }

    pub fn current_project(&self) -> Option<String> {
        self.current.lock().as_ref().map(|(project, _)| project.clone())
    }

    /// Make `project` the active one and bring the UI in line with it.
    ///
    /// A live backend already serving `project` is reused.
    pub async fn open_project(
        &self,
        project: &str,
        working_directory: &Path,
    ) -> Result<(ServiceInstance, ReconcileOutcome)> {
        self.session.reset();
        self.output
            .status(&format!("Opening project '{}'...", project));

        let instance = self
            .report(self.lifecycle.ensure_running(project, working_directory).await)?;
        *self.current.lock() = Some((project.to_string(), working_directory.to_path_buf()));

        let outcome = self.session.reconcile(project).await;
        self.output.success(&format!(
            "Project '{}' served at {}",
            project, instance.base_url
        ));
        Ok((instance, outcome))
    }

    pub async fn restart_service(&self) -> Result<(ServiceInstance, ReconcileOutcome)> {
        let Some((project, working_directory)) = self.current.lock().clone() else {
            return self.report(Err(Error::Backend("No project is open".to_string())));
        };

        self.session.reset();
        self.output
            .status(&format!("Restarting backend for '{}'...", project));
        let instance = self.report(self.lifecycle.restart(&project, &working_directory).await)?;
        let outcome = self.session.reconcile(&project).await;
        Ok((instance, outcome))
    }

    /// Stop the backend and forget the project. Never fails.
    pub async fn close_project(&self) {
        if let Err(e) = self.lifecycle.stop().await {
            self.output.warning(&format!("Graceful stop failed: {}", e));
            self.lifecycle.force_stop().await;
        }
        self.session.reset();
        *self.current.lock() = None;
    }

    fn report<T>(&self, result: Result<T>) -> Result<T> {
        if let Err(ref e) = result {
            self.output.error(&e.with_suggestion());
        }
        result
    }
}
