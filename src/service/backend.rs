use crate::error::Result;
use async_trait::async_trait;
use std::path::Path;

/// The embedded content backend, as seen by the lifecycle manager.
#[async_trait]
pub trait Backend: Send + Sync {
    /// One-time wiring for a project (route registration, data loading).
    ///
    /// Called at most once per instance lifetime, before the first launch
    /// attempt. Not repeated across retries of the same start.
    async fn initialize(&self, project: &str, working_directory: &Path) -> Result<()>;

    /// Bind `127.0.0.1:port` and begin serving.
    ///
    /// A bind race should surface as [`Error::PortInUse`](crate::Error::PortInUse)
    /// so the caller retries on a fresh port.
    async fn launch(
        &self,
        project: &str,
        working_directory: &Path,
        port: u16,
    ) -> Result<Box<dyn BackendHandle>>;

    /// Undo process-wide side effects of a launched instance, such as a
    /// global registration the backend made of itself.
    async fn release(&self, project: &str) -> Result<()>;
}

/// A launched backend instance.
#[async_trait]
pub trait BackendHandle: Send {
    /// Graceful shutdown. May fail; the caller falls back to [`abort`](Self::abort).
    async fn shutdown(&mut self) -> Result<()>;

    /// Immediate teardown. Never waits.
    fn abort(&mut self);
}
