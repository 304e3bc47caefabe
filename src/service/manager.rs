use super::{wait_until_live, Backend, BackendHandle, LivenessProbe, ServiceInstance, ServiceState, ServiceStatus};
use crate::config::Config;
use crate::error::{Error, Result};
use crate::port::PortAllocator;
use crate::retry::RetryPolicy;
use chrono::Utc;
use parking_lot::Mutex as SyncMutex;
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::Instrument;

/// Timing and retry knobs for the lifecycle manager.
#[derive(Debug, Clone)]
pub struct LifecycleSettings {
    pub preferred_ports: Vec<u16>,
    pub start_policy: RetryPolicy,
    pub liveness_interval: Duration,
    pub liveness_timeout: Duration,
    pub stop_timeout: Duration,
}

impl LifecycleSettings {
    pub fn from_config(config: &Config) -> Self {
        Self {
            preferred_ports: config.ports.preferred_ports(),
            start_policy: config.lifecycle.start_policy(),
            liveness_interval: config.lifecycle.liveness_interval(),
            liveness_timeout: config.lifecycle.liveness_timeout(),
            stop_timeout: config.lifecycle.stop_timeout(),
        }
    }
}

impl Default for LifecycleSettings {
    fn default() -> Self {
        Self::from_config(&Config::default())
    }
}

/// Ports touched by one `start` across its retry attempts.
#[derive(Default)]
struct StartAttempts {
    failed_ports: HashSet<u16>,
    /// Claimed by the attempt in flight, not yet handed to an instance.
    reserved: Option<u16>,
}

/// Observable state, readable without waiting for an in-flight transition.
struct Snapshot {
    state: ServiceState,
    instance: Option<ServiceInstance>,
}

/// Owns the single backend instance and serializes every transition on it.
///
/// Transitions hold an async mutex for their whole duration, so `stop` or
/// `restart` issued during a `start` waits for the start to resolve. The one
/// exception is [`force_stop`](Self::force_stop), which cancels an in-flight
/// start before taking the lock.
pub struct ServiceLifecycleManager {
    backend: Arc<dyn Backend>,
    allocator: Arc<PortAllocator>,
    probe: Arc<dyn LivenessProbe>,
    settings: LifecycleSettings,
    /// Held for the duration of a transition; guards the live handle.
    handle: Mutex<Option<Box<dyn BackendHandle>>>,
    snapshot: SyncMutex<Snapshot>,
    start_cancel: SyncMutex<CancellationToken>,
    /// One-time backend wiring done for the current instance.
    initialized: AtomicBool,
}

impl ServiceLifecycleManager {
    pub fn new(
        backend: Arc<dyn Backend>,
        allocator: Arc<PortAllocator>,
        probe: Arc<dyn LivenessProbe>,
        settings: LifecycleSettings,
    ) -> Self {
        Self {
            backend,
            allocator,
            probe,
            settings,
            handle: Mutex::new(None),
            snapshot: SyncMutex::new(Snapshot {
                state: ServiceState::Stopped,
                instance: None,
            }),
            start_cancel: SyncMutex::new(CancellationToken::new()),
            initialized: AtomicBool::new(false),
        }
    }

    pub fn state(&self) -> ServiceState {
        self.snapshot.lock().state
    }

    pub fn instance(&self) -> Option<ServiceInstance> {
        self.snapshot.lock().instance.clone()
    }

    pub fn status(&self) -> ServiceStatus {
        match self.snapshot.lock().instance {
            Some(ref instance) => ServiceStatus::from(instance),
            None => ServiceStatus::stopped(),
        }
    }

    pub fn is_initialized(&self) -> bool {
        self.initialized.load(Ordering::SeqCst)
    }

    /// Whether the running instance currently answers its liveness probe.
    pub async fn is_live(&self) -> bool {
        match self.instance() {
            Some(instance) if instance.state == ServiceState::Running => {
                self.probe.is_live(&instance.base_url).await
            }
            _ => false,
        }
    }

    fn transition(&self, to: ServiceState) {
        let mut snapshot = self.snapshot.lock();
        let from = snapshot.state;
        if from == to {
            return;
        }
        if !from.is_valid_transition(to) {
            tracing::warn!("Unexpected backend state transition {} -> {}", from, to);
        }
        tracing::debug!("Backend state {} -> {}", from, to);
        snapshot.state = to;
        if let Some(ref mut instance) = snapshot.instance {
            instance.state = to;
        }
    }

    /// Start the backend for `project`.
    ///
    /// Returns the running instance unchanged if `project` is already running.
    pub async fn start(&self, project: &str, working_directory: &Path) -> Result<ServiceInstance> {
        let mut handle = self.handle.lock().await;
        self.start_locked(&mut handle, project, working_directory).await
    }

    /// Start-or-reuse: a live instance for `project` is returned as-is; any
    /// other instance is stopped first.
    pub async fn ensure_running(
        &self,
        project: &str,
        working_directory: &Path,
    ) -> Result<ServiceInstance> {
        let mut handle = self.handle.lock().await;

        if let Some(instance) = self.instance() {
            if instance.project_key == project && instance.state == ServiceState::Running {
                if self.probe.is_live(&instance.base_url).await {
                    tracing::debug!("Reusing running backend for '{}'", project);
                    return Ok(instance);
                }
                tracing::warn!("Backend for '{}' stopped answering, restarting it", project);
            }
        }

        if self.state() != ServiceState::Stopped {
            if let Err(e) = self.stop_locked(&mut handle).await {
                tracing::warn!("Stop before start failed ({}), forcing", e);
                self.force_stop_locked(&mut handle).await;
            }
        }
        self.start_locked(&mut handle, project, working_directory).await
    }

    /// Stop then start. A failed start leaves the state `Failed`.
    pub async fn restart(&self, project: &str, working_directory: &Path) -> Result<ServiceInstance> {
        let mut handle = self.handle.lock().await;
        if let Err(e) = self.stop_locked(&mut handle).await {
            tracing::warn!("Stop during restart failed ({}), forcing", e);
            self.force_stop_locked(&mut handle).await;
        }
        self.start_locked(&mut handle, project, working_directory).await
    }

    /// Graceful stop. Idempotent.
    ///
    /// A failing or hanging shutdown hook degrades to an abort; the state always
    /// ends `Stopped`. An error is returned only when releasing the backend's
    /// process-wide side effects fails, after the state is already `Stopped`.
    pub async fn stop(&self) -> Result<()> {
        let mut handle = self.handle.lock().await;
        self.stop_locked(&mut handle).await
    }

    /// Best-effort teardown without waiting for graceful shutdown.
    ///
    /// Cancels an in-flight start first. Always ends `Stopped`.
    pub async fn force_stop(&self) {
        self.start_cancel.lock().cancel();
        let mut handle = self.handle.lock().await;
        self.force_stop_locked(&mut handle).await;
    }

    async fn start_locked(
        &self,
        handle: &mut Option<Box<dyn BackendHandle>>,
        project: &str,
        working_directory: &Path,
    ) -> Result<ServiceInstance> {
        match self.state() {
            ServiceState::Running => {
                if let Some(instance) = self.instance() {
                    if instance.project_key == project {
                        return Ok(instance);
                    }
                    return Err(Error::AlreadyRunning {
                        running: instance.project_key,
                        requested: project.to_string(),
                    });
                }
            }
            // Left behind by a start or stop future that was dropped mid-way
            ServiceState::Starting | ServiceState::Stopping => {
                tracing::warn!("Found interrupted transition, tearing down before start");
                self.force_stop_locked(handle).await;
            }
            ServiceState::Stopped | ServiceState::Failed => {}
        }

        let cancel = CancellationToken::new();
        *self.start_cancel.lock() = cancel.clone();

        self.transition(ServiceState::Starting);
        tracing::info!("Starting backend for '{}'", project);

        let tracker = SyncMutex::new(StartAttempts::default());
        let tracker = &tracker;
        let attempts = self.settings.start_policy.run(
            move |attempt| {
                self.attempt_start(project, working_directory, tracker)
                    .instrument(tracing::info_span!("start", project = %project, attempt))
            },
            Error::is_transient_start_failure,
        );

        let result = tokio::select! {
            biased;

            _ = cancel.cancelled() => Err(Error::Cancelled(project.to_string())),

            result = attempts => result.map_err(|exhausted| {
                if exhausted.attempts > 1 {
                    Error::StartFailed {
                        project: project.to_string(),
                        attempts: exhausted.attempts,
                        cause: Box::new(exhausted.last),
                    }
                } else {
                    exhausted.last
                }
            }),
        };

        match result {
            Ok((port, new_handle)) => {
                let instance = ServiceInstance {
                    project_key: project.to_string(),
                    working_directory: working_directory.to_path_buf(),
                    bound_port: port,
                    base_url: format!("http://127.0.0.1:{}", port),
                    state: ServiceState::Running,
                    started_at: Utc::now(),
                };
                *handle = Some(new_handle);
                {
                    let mut snapshot = self.snapshot.lock();
                    snapshot.instance = Some(instance.clone());
                }
                self.transition(ServiceState::Running);
                tracing::info!("Backend for '{}' running at {}", project, instance.base_url);
                Ok(instance)
            }
            Err(e) => {
                tracing::warn!("Backend for '{}' failed to start: {}", project, e);
                // A cancelled attempt never got to release its port
                if let Some(port) = tracker.lock().reserved.take() {
                    self.allocator.release(port);
                }
                // Wiring done by this start must not carry over to the next one
                if self.initialized.swap(false, Ordering::SeqCst) {
                    if let Err(release_err) = self.backend.release(project).await {
                        tracing::warn!(
                            "Failed to release wiring for '{}' after failed start: {}",
                            project,
                            release_err
                        );
                    }
                }
                self.snapshot.lock().instance = None;
                self.transition(ServiceState::Failed);
                Err(e)
            }
        }
    }

    /// One full allocate, launch, and wait-for-liveness sequence.
    async fn attempt_start(
        &self,
        project: &str,
        working_directory: &Path,
        tracker: &SyncMutex<StartAttempts>,
    ) -> Result<(u16, Box<dyn BackendHandle>)> {
        let excluded = tracker.lock().failed_ports.clone();
        let port = self
            .allocator
            .acquire_excluding(&self.settings.preferred_ports, &excluded)
            .await?;
        tracker.lock().reserved = Some(port);

        if !self.initialized.load(Ordering::SeqCst) {
            if let Err(e) = self.backend.initialize(project, working_directory).await {
                tracker.lock().reserved = None;
                self.allocator.release(port);
                return Err(e);
            }
            self.initialized.store(true, Ordering::SeqCst);
        }

        let mut launched = match self.backend.launch(project, working_directory, port).await {
            Ok(handle) => handle,
            Err(e) => {
                tracing::debug!("Launch on port {} failed: {}", port, e);
                {
                    let mut tracker = tracker.lock();
                    tracker.failed_ports.insert(port);
                    tracker.reserved = None;
                }
                self.allocator.release(port);
                return Err(e);
            }
        };

        let base_url = format!("http://127.0.0.1:{}", port);
        match wait_until_live(
            self.probe.as_ref(),
            &base_url,
            self.settings.liveness_interval,
            self.settings.liveness_timeout,
        )
        .await
        {
            Ok(waited) => {
                tracing::debug!("Backend live after {}ms", waited.as_millis());
                tracker.lock().reserved = None;
                Ok((port, launched))
            }
            Err(waited) => {
                launched.abort();
                tracker.lock().reserved = None;
                self.allocator.release(port);
                Err(Error::StartTimeout {
                    project: project.to_string(),
                    waited,
                })
            }
        }
    }

    async fn stop_locked(&self, handle: &mut Option<Box<dyn BackendHandle>>) -> Result<()> {
        let state = self.state();
        if state == ServiceState::Stopped {
            return Ok(());
        }

        if state.is_active() || state == ServiceState::Stopping {
            self.transition(ServiceState::Stopping);
        }

        if let Some(mut live) = handle.take() {
            match tokio::time::timeout(self.settings.stop_timeout, live.shutdown()).await {
                Ok(Ok(())) => {}
                Ok(Err(e)) => {
                    tracing::warn!("Backend shutdown hook failed ({}), aborting", e);
                    live.abort();
                }
                Err(_elapsed) => {
                    tracing::warn!(
                        "Backend shutdown exceeded {}ms, aborting",
                        self.settings.stop_timeout.as_millis()
                    );
                    live.abort();
                }
            }
        }

        let released = self.release_instance().await;
        self.transition(ServiceState::Stopped);
        released
    }

    async fn force_stop_locked(&self, handle: &mut Option<Box<dyn BackendHandle>>) {
        if self.state().is_active() {
            self.transition(ServiceState::Stopping);
        }
        if let Some(mut live) = handle.take() {
            live.abort();
        }
        if let Err(e) = self.release_instance().await {
            tracing::warn!("Ignoring release failure during force stop: {}", e);
        }
        self.transition(ServiceState::Stopped);
    }

    /// Drop the instance record, its port, and its global side effects.
    async fn release_instance(&self) -> Result<()> {
        let instance = self.snapshot.lock().instance.take();
        self.initialized.store(false, Ordering::SeqCst);

        match instance {
            Some(instance) => {
                self.allocator.release(instance.bound_port);
                tracing::info!("Backend for '{}' stopped", instance.project_key);
                self.backend.release(&instance.project_key).await
            }
            None => Ok(()),
        }
    }

    /// Working directory of the current instance, if any.
    pub fn working_directory(&self) -> Option<PathBuf> {
        self.snapshot
            .lock()
            .instance
            .as_ref()
            .map(|i| i.working_directory.clone())
    }
}
