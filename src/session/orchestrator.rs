use super::{TokenValidator, UiSurface};
use crate::config::{Config, RoutesConfig, ValidationPolicy};
use crate::credential::CredentialStore;
use crate::error::Result;
use crate::service::ServiceLifecycleManager;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::Instrument;

pub const REASON_TOKEN_INVALID_OR_MISSING: &str = "token_invalid_or_missing";
pub const REASON_TOKEN_INJECTION_FAILED: &str = "token_injection_failed";
pub const REASON_LOGGED_OUT: &str = "logged_out";

#[derive(Debug, Clone)]
pub struct SessionSettings {
    pub max_navigations: u32,
    pub max_injection_attempts: u32,
    pub ready_timeout: Duration,
    pub navigation_debounce: Duration,
    pub validation_policy: ValidationPolicy,
    pub routes: RoutesConfig,
}

impl SessionSettings {
    pub fn from_config(config: &Config) -> Self {
        Self {
            max_navigations: config.session.max_navigations,
            max_injection_attempts: config.session.max_injection_attempts,
            ready_timeout: config.session.ready_timeout(),
            navigation_debounce: config.session.navigation_debounce(),
            validation_policy: config.session.validation_policy,
            routes: config.routes.clone(),
        }
    }
}

impl Default for SessionSettings {
    fn default() -> Self {
        Self::from_config(&Config::default())
    }
}

/// Anti-loop counters for the current project.
///
/// Survives across reconciliation passes for the same project; replaced when
/// the project changes, on [`SessionOrchestrator::reset`], and on token
/// capture.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct InjectionSession {
    pub project_key: Option<String>,
    pub navigation_count: u32,
    pub attempt_count: u32,
    /// Last token the backend confirmed as valid.
    pub last_validated_token: Option<String>,
    /// Last token the surface accepted.
    pub last_injected_token: Option<String>,
}

impl InjectionSession {
    fn for_project(project: &str) -> Self {
        Self {
            project_key: Some(project.to_string()),
            ..Self::default()
        }
    }
}

/// How a reconciliation pass ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReconcileOutcome {
    /// Another pass was already running.
    Skipped,
    /// Navigation bound exceeded; the UI was left alone.
    LoopBreakerTripped,
    Unauthenticated { reason: String },
    Authenticated,
    /// The surface already holds this token; nothing to do.
    AlreadyInjected,
    InjectionFailed(String),
    /// Unexpected failure; the UI was left in place.
    Aborted(String),
}

/// Sets a flag for its lifetime; `try_set` fails if it is already set.
struct AtomicFlagGuard<'a> {
    flag: &'a AtomicBool,
}

impl<'a> AtomicFlagGuard<'a> {
    fn try_set(flag: &'a AtomicBool) -> Option<Self> {
        flag.compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .ok()?;
        Some(Self { flag })
    }
}

impl Drop for AtomicFlagGuard<'_> {
    fn drop(&mut self) {
        self.flag.store(false, Ordering::Release);
    }
}

/// Keeps the UI surface's authentication in line with the stored token.
pub struct SessionOrchestrator {
    credentials: Arc<CredentialStore>,
    lifecycle: Arc<ServiceLifecycleManager>,
    surface: Arc<dyn UiSurface>,
    validator: Arc<dyn TokenValidator>,
    settings: SessionSettings,
    session: Mutex<InjectionSession>,
    reconciling: AtomicBool,
    navigation_generation: AtomicU64,
}

impl SessionOrchestrator {
    pub fn new(
        credentials: Arc<CredentialStore>,
        lifecycle: Arc<ServiceLifecycleManager>,
        surface: Arc<dyn UiSurface>,
        validator: Arc<dyn TokenValidator>,
        settings: SessionSettings,
    ) -> Self {
        Self {
            credentials,
            lifecycle,
            surface,
            validator,
            settings,
            session: Mutex::new(InjectionSession::default()),
            reconciling: AtomicBool::new(false),
            navigation_generation: AtomicU64::new(0),
        }
    }

    pub fn session(&self) -> InjectionSession {
        self.session.lock().clone()
    }

    /// Forget all anti-loop state.
    pub fn reset(&self) {
        *self.session.lock() = InjectionSession::default();
    }

    fn login_url(base_url: &str, routes: &RoutesConfig, reason: &str) -> String {
        format!("{}{}?reason={}", base_url, routes.login_entry, reason)
    }

    /// Run one reconciliation pass for `project`.
    ///
    /// Never fails: unexpected errors are logged and reported as
    /// [`ReconcileOutcome::Aborted`] with the UI left where it is.
    pub async fn reconcile(&self, project: &str) -> ReconcileOutcome {
        let Some(_guard) = AtomicFlagGuard::try_set(&self.reconciling) else {
            tracing::debug!("Reconciliation already in progress, skipping");
            return ReconcileOutcome::Skipped;
        };

        let outcome = match self
            .reconcile_pass(project)
            .instrument(tracing::info_span!("reconcile", project = %project))
            .await
        {
            Ok(outcome) => outcome,
            Err(e) => {
                tracing::warn!("Reconciliation for '{}' aborted: {}", project, e);
                ReconcileOutcome::Aborted(e.to_string())
            }
        };
        tracing::debug!("Reconciliation for '{}' ended: {:?}", project, outcome);
        outcome
    }

    async fn reconcile_pass(&self, project: &str) -> Result<ReconcileOutcome> {
        let base_url = match self.lifecycle.instance() {
            Some(instance) if instance.project_key == project => instance.base_url,
            _ => {
                return Ok(ReconcileOutcome::Aborted(format!(
                    "no running backend for '{}'",
                    project
                )))
            }
        };

        {
            let mut session = self.session.lock();
            if session.project_key.as_deref() != Some(project) {
                *session = InjectionSession::for_project(project);
            }
            session.navigation_count += 1;
            if session.navigation_count > self.settings.max_navigations {
                tracing::warn!(
                    "Navigation bound ({}) exceeded for '{}', leaving UI in place",
                    self.settings.max_navigations,
                    project
                );
                return Ok(ReconcileOutcome::LoopBreakerTripped);
            }
        }

        let token = match self.credentials.get(project) {
            Ok(token) => token,
            Err(e) => {
                tracing::warn!("Could not read stored token, treating as missing: {}", e);
                None
            }
        };
        let Some(token) = token else {
            return self
                .go_unauthenticated(&base_url, REASON_TOKEN_INVALID_OR_MISSING)
                .await;
        };

        if !self.is_token_valid(project, &base_url, &token).await {
            if let Err(e) = self.credentials.clear(project) {
                tracing::warn!("Failed to clear rejected token: {}", e);
            }
            return self
                .go_unauthenticated(&base_url, REASON_TOKEN_INVALID_OR_MISSING)
                .await;
        }

        let attempts = {
            let session = self.session.lock();
            if session.last_injected_token.as_deref() == Some(token.as_str()) {
                return Ok(ReconcileOutcome::AlreadyInjected);
            }
            session.attempt_count
        };
        if attempts >= self.settings.max_injection_attempts {
            tracing::warn!(
                "Token injection failed {} time(s) for '{}', sending UI to login",
                attempts,
                project
            );
            return self
                .go_unauthenticated(&base_url, REASON_TOKEN_INJECTION_FAILED)
                .await;
        }

        self.inject(&base_url, &token).await
    }

    /// Cache hit, else ask the backend and apply the validation policy.
    async fn is_token_valid(&self, project: &str, base_url: &str, token: &str) -> bool {
        if self.session.lock().last_validated_token.as_deref() == Some(token) {
            tracing::debug!("Token already validated this session");
            return true;
        }

        let outcome = self.validator.validate(base_url, token).await;
        let valid = outcome.is_valid(self.settings.validation_policy);
        match outcome.error() {
            Some(err) if valid => {
                tracing::warn!("{}; continuing under optimistic validation", err)
            }
            Some(err) => tracing::warn!("{}", err),
            None => tracing::debug!("Token validated for '{}'", project),
        }

        if outcome == super::ValidationOutcome::Valid {
            self.session.lock().last_validated_token = Some(token.to_string());
        }
        self.credentials.record_validation(project, token, valid);
        valid
    }

    async fn go_unauthenticated(&self, base_url: &str, reason: &str) -> Result<ReconcileOutcome> {
        let url = Self::login_url(base_url, &self.settings.routes, reason);
        self.surface.navigate(&url).await?;
        self.after_load().await;
        Ok(ReconcileOutcome::Unauthenticated {
            reason: reason.to_string(),
        })
    }

    /// Navigate to the authenticated entry and hand the token to the page.
    ///
    /// Failure never triggers another navigation; the next pass decides.
    async fn inject(&self, base_url: &str, token: &str) -> Result<ReconcileOutcome> {
        let url = format!("{}{}", base_url, self.settings.routes.authenticated_entry);
        self.surface.navigate(&url).await?;
        self.session.lock().attempt_count += 1;

        if let Err(e) = self.surface.await_ready(self.settings.ready_timeout).await {
            tracing::warn!("UI not ready, skipping token injection: {}", e);
            return Ok(ReconcileOutcome::InjectionFailed(e.to_string()));
        }
        self.install_capture().await;

        let injected = self.surface.inject_token(token).await;
        if injected.success {
            self.session.lock().last_injected_token = Some(token.to_string());
            tracing::info!("Token injected into UI");
            Ok(ReconcileOutcome::Authenticated)
        } else {
            tracing::warn!("Token injection failed: {}", injected.message);
            Ok(ReconcileOutcome::InjectionFailed(injected.message))
        }
    }

    async fn after_load(&self) {
        match self.surface.await_ready(self.settings.ready_timeout).await {
            Ok(()) => self.install_capture().await,
            Err(e) => tracing::warn!("UI not ready after navigation: {}", e),
        }
    }

    async fn install_capture(&self) {
        let outcome = self.surface.install_token_capture().await;
        if !outcome.success {
            tracing::warn!("Token capture hook not installed: {}", outcome.message);
        }
    }

    /// In-page navigation: re-install the capture hook once navigation
    /// settles. Token logic is not re-run.
    ///
    /// Returns false if a later navigation superseded this one.
    pub async fn on_in_page_navigation(&self, url: &str) -> bool {
        let generation = self.navigation_generation.fetch_add(1, Ordering::SeqCst) + 1;
        tokio::time::sleep(self.settings.navigation_debounce).await;
        if self.navigation_generation.load(Ordering::SeqCst) != generation {
            return false;
        }
        tracing::debug!("In-page navigation settled at {}", url);
        self.install_capture().await;
        true
    }

    /// A token the UI stored on login.
    ///
    /// The surface already holds it, so it counts as validated and injected.
    pub fn capture_token(&self, project: &str, token: &str) -> Result<()> {
        self.credentials.set(project, token)?;
        self.credentials.record_validation(project, token, true);
        let mut session = InjectionSession::for_project(project);
        session.last_validated_token = Some(token.to_string());
        session.last_injected_token = Some(token.to_string());
        *self.session.lock() = session;
        tracing::info!("Captured token from UI for '{}'", project);
        Ok(())
    }

    /// Clear the token and send the UI to the login entry.
    pub async fn logout(&self, project: &str) -> Result<()> {
        self.credentials.clear(project)?;
        *self.session.lock() = InjectionSession::for_project(project);
        if let Some(instance) = self.lifecycle.instance() {
            let url = Self::login_url(&instance.base_url, &self.settings.routes, REASON_LOGGED_OUT);
            self.surface.navigate(&url).await?;
            self.after_load().await;
        }
        Ok(())
    }
}
