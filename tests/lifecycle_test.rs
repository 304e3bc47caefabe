//! ServiceLifecycleManager against a scripted fake backend.

use async_trait::async_trait;
use parking_lot::Mutex;
use sidecar::port::PortAllocator;
use sidecar::service::{
    Backend, BackendHandle, LifecycleSettings, LivenessProbe, ServiceLifecycleManager,
    ServiceState,
};
use sidecar::{Error, Result, RetryPolicy};
use std::collections::VecDeque;
use std::path::Path;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

#[derive(Debug, Clone)]
enum Launch {
    Ok,
    AddrInUse,
    Fail(&'static str),
    FailingShutdown,
    HangingShutdown,
}

#[derive(Default)]
struct Counters {
    initialized: AtomicUsize,
    shutdowns: AtomicUsize,
    aborts: AtomicUsize,
}

#[derive(Default)]
struct FakeBackend {
    plan: Mutex<VecDeque<Launch>>,
    launched_ports: Mutex<Vec<u16>>,
    initialized_projects: Mutex<Vec<String>>,
    released: Mutex<Vec<String>>,
    counters: Arc<Counters>,
}

impl FakeBackend {
    fn with_plan(plan: Vec<Launch>) -> Arc<Self> {
        Arc::new(Self {
            plan: Mutex::new(plan.into()),
            ..Self::default()
        })
    }

    fn push(&self, launch: Launch) {
        self.plan.lock().push_back(launch);
    }
}

#[async_trait]
impl Backend for FakeBackend {
    async fn initialize(&self, project: &str, _working_directory: &Path) -> Result<()> {
        self.counters.initialized.fetch_add(1, Ordering::SeqCst);
        self.initialized_projects.lock().push(project.to_string());
        Ok(())
    }

    async fn launch(
        &self,
        _project: &str,
        _working_directory: &Path,
        port: u16,
    ) -> Result<Box<dyn BackendHandle>> {
        self.launched_ports.lock().push(port);
        let launch = self.plan.lock().pop_front().unwrap_or(Launch::Ok);
        match launch {
            Launch::AddrInUse => Err(Error::PortInUse { port }),
            Launch::Fail(msg) => Err(Error::Backend(msg.to_string())),
            other => Ok(Box::new(FakeHandle {
                behavior: other,
                counters: self.counters.clone(),
            })),
        }
    }

    async fn release(&self, project: &str) -> Result<()> {
        self.released.lock().push(project.to_string());
        Ok(())
    }
}

struct FakeHandle {
    behavior: Launch,
    counters: Arc<Counters>,
}

#[async_trait]
impl BackendHandle for FakeHandle {
    async fn shutdown(&mut self) -> Result<()> {
        self.counters.shutdowns.fetch_add(1, Ordering::SeqCst);
        match self.behavior {
            Launch::FailingShutdown => Err(Error::Backend("shutdown hook threw".into())),
            Launch::HangingShutdown => std::future::pending().await,
            _ => Ok(()),
        }
    }

    fn abort(&mut self) {
        self.counters.aborts.fetch_add(1, Ordering::SeqCst);
    }
}

struct FakeProbe {
    live: AtomicBool,
}

#[async_trait]
impl LivenessProbe for FakeProbe {
    async fn is_live(&self, _base_url: &str) -> bool {
        self.live.load(Ordering::SeqCst)
    }
}

struct Harness {
    backend: Arc<FakeBackend>,
    probe: Arc<FakeProbe>,
    allocator: Arc<PortAllocator>,
    manager: Arc<ServiceLifecycleManager>,
}

fn harness(plan: Vec<Launch>) -> Harness {
    let backend = FakeBackend::with_plan(plan);
    let probe = Arc::new(FakeProbe {
        live: AtomicBool::new(true),
    });
    let allocator = Arc::new(PortAllocator::new(RetryPolicy::fixed(
        3,
        Duration::from_millis(10),
    )));
    let settings = LifecycleSettings {
        // Dynamic allocation only, so parallel tests never contend
        preferred_ports: Vec::new(),
        start_policy: RetryPolicy::new(3, vec![Duration::from_secs(1), Duration::from_secs(2)]),
        liveness_interval: Duration::from_millis(500),
        liveness_timeout: Duration::from_secs(5),
        stop_timeout: Duration::from_secs(1),
    };
    let manager = Arc::new(ServiceLifecycleManager::new(
        backend.clone(),
        allocator.clone(),
        probe.clone(),
        settings,
    ));
    Harness {
        backend,
        probe,
        allocator,
        manager,
    }
}

fn dir() -> &'static Path {
    Path::new("/tmp/project")
}

#[tokio::test(start_paused = true)]
async fn test_bind_race_retries_on_fresh_port() {
    let h = harness(vec![Launch::AddrInUse, Launch::AddrInUse, Launch::Ok]);
    let started = tokio::time::Instant::now();

    let instance = h.manager.start("p1", dir()).await.unwrap();

    assert_eq!(instance.state, ServiceState::Running);
    assert_eq!(h.manager.state(), ServiceState::Running);

    let ports = h.backend.launched_ports.lock().clone();
    assert_eq!(ports.len(), 3);
    assert_ne!(instance.bound_port, ports[0]);
    assert_ne!(instance.bound_port, ports[1]);
    assert_eq!(instance.bound_port, ports[2]);
    assert_eq!(instance.base_url, format!("http://127.0.0.1:{}", ports[2]));

    // 1s then 2s between attempts
    assert!(started.elapsed() >= Duration::from_secs(3));
    // Wiring happens once per instance, not once per attempt
    assert_eq!(h.backend.counters.initialized.load(Ordering::SeqCst), 1);
    assert!(h.manager.is_initialized());
}

#[tokio::test(start_paused = true)]
async fn test_exhausted_bind_races_fail_with_last_cause() {
    let h = harness(vec![Launch::AddrInUse, Launch::AddrInUse, Launch::AddrInUse]);

    let err = h.manager.start("p1", dir()).await.unwrap_err();

    match err {
        Error::StartFailed {
            attempts, cause, ..
        } => {
            assert_eq!(attempts, 3);
            assert!(matches!(*cause, Error::PortInUse { .. }));
        }
        other => panic!("expected StartFailed, got {:?}", other),
    }
    assert_eq!(h.manager.state(), ServiceState::Failed);
    assert!(h.manager.instance().is_none());
    assert!(h.allocator.allocated_ports().is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_stop_twice_is_same_as_once() {
    let h = harness(vec![]);
    h.manager.start("p1", dir()).await.unwrap();

    h.manager.stop().await.unwrap();
    h.manager.stop().await.unwrap();

    assert_eq!(h.manager.state(), ServiceState::Stopped);
    assert!(h.manager.instance().is_none());
    assert_eq!(h.backend.counters.shutdowns.load(Ordering::SeqCst), 1);
    assert_eq!(h.backend.released.lock().as_slice(), ["p1".to_string()]);
    assert!(!h.manager.is_initialized());
    assert!(h.allocator.allocated_ports().is_empty());
}

#[tokio::test]
async fn test_stop_without_start_is_noop() {
    let h = harness(vec![]);
    h.manager.stop().await.unwrap();
    h.manager.force_stop().await;
    assert_eq!(h.manager.state(), ServiceState::Stopped);
    assert!(h.backend.released.lock().is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_other_project_while_running_is_rejected() {
    let h = harness(vec![]);
    h.manager.start("p1", dir()).await.unwrap();

    let err = h.manager.start("p2", dir()).await.unwrap_err();
    assert!(matches!(
        err,
        Error::AlreadyRunning { ref running, ref requested } if running == "p1" && requested == "p2"
    ));
    assert_eq!(h.manager.state(), ServiceState::Running);
}

#[tokio::test(start_paused = true)]
async fn test_same_project_start_returns_existing_instance() {
    let h = harness(vec![]);
    let first = h.manager.start("p1", dir()).await.unwrap();
    let second = h.manager.start("p1", dir()).await.unwrap();

    assert_eq!(first, second);
    assert_eq!(h.backend.launched_ports.lock().len(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_unreachable_backend_times_out_to_failed() {
    let h = harness(vec![]);
    h.probe.live.store(false, Ordering::SeqCst);

    let err = h.manager.start("p1", dir()).await.unwrap_err();
    assert!(matches!(err, Error::StartTimeout { .. }), "got {:?}", err);
    assert_eq!(h.manager.state(), ServiceState::Failed);
    assert_eq!(h.backend.counters.aborts.load(Ordering::SeqCst), 1);
    assert!(h.allocator.allocated_ports().is_empty());

    // Failed -> Starting is allowed
    h.probe.live.store(true, Ordering::SeqCst);
    let instance = h.manager.start("p1", dir()).await.unwrap();
    assert_eq!(instance.state, ServiceState::Running);
}

#[tokio::test(start_paused = true)]
async fn test_failing_shutdown_hook_degrades_to_abort() {
    let h = harness(vec![Launch::FailingShutdown]);
    h.manager.start("p1", dir()).await.unwrap();

    h.manager.stop().await.unwrap();

    assert_eq!(h.manager.state(), ServiceState::Stopped);
    assert_eq!(h.backend.counters.aborts.load(Ordering::SeqCst), 1);
}

#[tokio::test(start_paused = true)]
async fn test_hanging_shutdown_is_aborted_after_timeout() {
    let h = harness(vec![Launch::HangingShutdown]);
    h.manager.start("p1", dir()).await.unwrap();

    h.manager.stop().await.unwrap();

    assert_eq!(h.manager.state(), ServiceState::Stopped);
    assert_eq!(h.backend.counters.aborts.load(Ordering::SeqCst), 1);
}

#[tokio::test(start_paused = true)]
async fn test_force_stop_cancels_in_flight_start() {
    let h = harness(vec![]);
    h.probe.live.store(false, Ordering::SeqCst);

    let manager = h.manager.clone();
    let start = tokio::spawn(async move { manager.start("p1", dir()).await });

    // Let the start get into its liveness loop
    tokio::time::sleep(Duration::from_secs(1)).await;
    assert_eq!(h.manager.state(), ServiceState::Starting);

    h.manager.force_stop().await;

    let err = start.await.unwrap().unwrap_err();
    assert!(matches!(err, Error::Cancelled(_)), "got {:?}", err);
    assert_eq!(h.manager.state(), ServiceState::Stopped);
    assert!(h.allocator.allocated_ports().is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_force_stop_from_running_skips_graceful_shutdown() {
    let h = harness(vec![]);
    h.manager.start("p1", dir()).await.unwrap();

    h.manager.force_stop().await;

    assert_eq!(h.manager.state(), ServiceState::Stopped);
    assert_eq!(h.backend.counters.shutdowns.load(Ordering::SeqCst), 0);
    assert_eq!(h.backend.counters.aborts.load(Ordering::SeqCst), 1);
    assert_eq!(h.backend.released.lock().len(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_restart_rewires_backend() {
    let h = harness(vec![]);
    h.manager.start("p1", dir()).await.unwrap();

    let instance = h.manager.restart("p1", dir()).await.unwrap();

    assert_eq!(instance.state, ServiceState::Running);
    assert_eq!(h.backend.counters.initialized.load(Ordering::SeqCst), 2);
    assert_eq!(h.backend.counters.shutdowns.load(Ordering::SeqCst), 1);
}

#[tokio::test(start_paused = true)]
async fn test_failed_restart_surfaces_error_and_leaves_failed() {
    let h = harness(vec![Launch::Ok]);
    h.manager.start("p1", dir()).await.unwrap();
    h.backend.push(Launch::Fail("project failed to load"));

    let err = h.manager.restart("p1", dir()).await.unwrap_err();

    assert!(matches!(err, Error::Backend(_)));
    assert_eq!(h.manager.state(), ServiceState::Failed);
    assert!(h.manager.instance().is_none());
}

#[tokio::test(start_paused = true)]
async fn test_ensure_running_switches_projects() {
    let h = harness(vec![]);
    h.manager.start("p1", dir()).await.unwrap();

    let instance = h.manager.ensure_running("p2", dir()).await.unwrap();

    assert_eq!(instance.project_key, "p2");
    assert_eq!(h.backend.released.lock().as_slice(), ["p1".to_string()]);
    assert_eq!(h.manager.status().project_key.as_deref(), Some("p2"));
}

#[tokio::test(start_paused = true)]
async fn test_ensure_running_reuses_live_instance() {
    let h = harness(vec![]);
    let first = h.manager.start("p1", dir()).await.unwrap();
    let again = h.manager.ensure_running("p1", dir()).await.unwrap();

    assert_eq!(first, again);
    assert_eq!(h.backend.launched_ports.lock().len(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_failed_start_undoes_wiring_before_next_project() {
    let h = harness(vec![Launch::Fail("project failed to load")]);

    let err = h.manager.start("p1", dir()).await.unwrap_err();
    assert!(matches!(err, Error::Backend(_)));
    assert_eq!(h.manager.state(), ServiceState::Failed);
    assert!(!h.manager.is_initialized());
    assert_eq!(h.backend.released.lock().as_slice(), ["p1".to_string()]);

    let instance = h.manager.start("p2", dir()).await.unwrap();

    assert_eq!(instance.project_key, "p2");
    assert_eq!(
        h.backend.initialized_projects.lock().as_slice(),
        ["p1".to_string(), "p2".to_string()]
    );
    assert_eq!(h.backend.released.lock().len(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_timed_out_start_releases_wiring() {
    let h = harness(vec![]);
    h.probe.live.store(false, Ordering::SeqCst);

    h.manager.ensure_running("p1", dir()).await.unwrap_err();

    assert!(!h.manager.is_initialized());
    assert_eq!(h.backend.released.lock().as_slice(), ["p1".to_string()]);
}
