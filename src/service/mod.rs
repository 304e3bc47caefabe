//! Lifecycle of the single embedded backend instance.

mod backend;
mod liveness;
mod manager;
mod types;

pub use backend::{Backend, BackendHandle};
pub use liveness::{wait_until_live, HttpLivenessProbe, LivenessProbe};
pub(crate) use liveness::shared_client;
pub use manager::{LifecycleSettings, ServiceLifecycleManager};
pub use types::{ServiceInstance, ServiceState, ServiceStatus};
