use crate::error::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Result of a request executed inside the UI surface.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InjectionOutcome {
    pub success: bool,
    pub message: String,
}

impl InjectionOutcome {
    pub fn ok() -> Self {
        Self {
            success: true,
            message: String::new(),
        }
    }

    pub fn failed(message: impl Into<String>) -> Self {
        Self {
            success: false,
            message: message.into(),
        }
    }
}

/// The window or web view that displays the backend.
///
/// The orchestrator only drives it through these calls; rendering is never
/// its concern.
#[async_trait]
pub trait UiSurface: Send + Sync {
    async fn navigate(&self, url: &str) -> Result<()>;

    /// Resolve once the current page has finished loading.
    ///
    /// Fails with [`Error::NavigationTimeout`](crate::Error::NavigationTimeout)
    /// after `timeout`.
    async fn await_ready(&self, timeout: Duration) -> Result<()>;

    /// Place `token` in the page's client-side store.
    async fn inject_token(&self, token: &str) -> InjectionOutcome;

    /// Install the hook that reports tokens the page stores on login.
    async fn install_token_capture(&self) -> InjectionOutcome;

    fn current_url(&self) -> Option<String>;
}

/// Surface for headless runs: logs navigations and accepts every injection.
#[derive(Default)]
pub struct HeadlessSurface {
    current: parking_lot::Mutex<Option<String>>,
}

impl HeadlessSurface {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl UiSurface for HeadlessSurface {
    async fn navigate(&self, url: &str) -> Result<()> {
        tracing::info!("UI navigate: {}", url);
        *self.current.lock() = Some(url.to_string());
        Ok(())
    }

    async fn await_ready(&self, _timeout: Duration) -> Result<()> {
        Ok(())
    }

    async fn inject_token(&self, token: &str) -> InjectionOutcome {
        tracing::info!("UI inject token ({} chars)", token.len());
        InjectionOutcome::ok()
    }

    async fn install_token_capture(&self) -> InjectionOutcome {
        InjectionOutcome::ok()
    }

    fn current_url(&self) -> Option<String> {
        self.current.lock().clone()
    }
}
