use crate::error::{Error, Result};
use crate::retry::RetryPolicy;
use parking_lot::Mutex;
use std::collections::HashSet;
use std::io;
use std::net::TcpListener;

/// Outcome of a single bind-and-release probe on loopback.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PortProbeResult {
    Available,
    InUse,
    PermissionDenied,
}

impl PortProbeResult {
    pub fn as_str(&self) -> &'static str {
        match self {
            PortProbeResult::Available => "available",
            PortProbeResult::InUse => "in use",
            PortProbeResult::PermissionDenied => "permission denied",
        }
    }
}

impl std::fmt::Display for PortProbeResult {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Candidate ordering used when the configuration names none.
///
/// Windows reserves scattered ranges for non-administrator processes, so a
/// handful of commonly-free user-range ports are tried first there.
pub fn platform_default_ports() -> Vec<u16> {
    if cfg!(windows) {
        (4000..=4005)
            .chain(3000..=3005)
            .chain(8000..=8005)
            .chain(5000..=5005)
            .collect()
    } else {
        (4000..4100).collect()
    }
}

/// Finds bindable loopback ports.
///
/// Ports handed out are remembered until [`PortAllocator::release`] so two
/// callers sharing an allocator never receive the same port, even when the
/// backend has not bound it yet.
pub struct PortAllocator {
    dynamic_policy: RetryPolicy,
    allocated_ports: Mutex<HashSet<u16>>,
}

impl PortAllocator {
    pub fn new(dynamic_policy: RetryPolicy) -> Self {
        Self {
            dynamic_policy,
            allocated_ports: Mutex::new(HashSet::new()),
        }
    }

    /// Bind `127.0.0.1:port`, drop the listener immediately, and classify.
    pub fn probe(port: u16) -> PortProbeResult {
        let result = match TcpListener::bind(("127.0.0.1", port)) {
            Ok(listener) => {
                drop(listener);
                PortProbeResult::Available
            }
            Err(e) if e.kind() == io::ErrorKind::PermissionDenied => {
                PortProbeResult::PermissionDenied
            }
            Err(_) => PortProbeResult::InUse,
        };
        tracing::debug!("Probed port {}: {}", port, result);
        result
    }

    /// First available preferred port, else a dynamically assigned one.
    pub async fn acquire(&self, preferred: &[u16]) -> Result<u16> {
        self.acquire_excluding(preferred, &HashSet::new()).await
    }

    /// Like [`acquire`](Self::acquire), but never returns a port in `excluded`.
    pub async fn acquire_excluding(
        &self,
        preferred: &[u16],
        excluded: &HashSet<u16>,
    ) -> Result<u16> {
        let mut seen = HashSet::new();
        let mut tried = Vec::new();

        for &port in preferred {
            if port == 0 || !seen.insert(port) || excluded.contains(&port) {
                continue;
            }
            tried.push(port);

            if self.allocated_ports.lock().contains(&port) {
                continue;
            }
            match Self::probe(port) {
                PortProbeResult::Available => {
                    // Another caller may have claimed it while we probed
                    if self.allocated_ports.lock().insert(port) {
                        tracing::debug!("Acquired preferred port {}", port);
                        return Ok(port);
                    }
                }
                PortProbeResult::PermissionDenied => {
                    tracing::debug!("Skipping port {}: permission denied", port);
                }
                PortProbeResult::InUse => {}
            }
        }

        if !tried.is_empty() {
            tracing::debug!(
                "All {} preferred port(s) unavailable, falling back to dynamic allocation",
                tried.len()
            );
        }

        match self.dynamic_excluding(excluded).await {
            Ok(port) => Ok(port),
            Err(e) => {
                tracing::warn!("Dynamic port allocation failed: {}", e);
                Err(Error::PortExhausted { tried })
            }
        }
    }

    /// Ask the OS for a free port.
    pub async fn acquire_dynamic(&self) -> Result<u16> {
        self.dynamic_excluding(&HashSet::new()).await
    }

    async fn dynamic_excluding(&self, excluded: &HashSet<u16>) -> Result<u16> {
        self.dynamic_policy
            .run(
                |_| async move { self.try_dynamic(excluded) },
                |_| true,
            )
            .await
            .map_err(|exhausted| exhausted.last)
    }

    fn try_dynamic(&self, excluded: &HashSet<u16>) -> Result<u16> {
        let listener = TcpListener::bind("127.0.0.1:0")
            .map_err(|e| Error::AllocationError(format!("Failed to bind to port 0: {}", e)))?;
        let port = listener
            .local_addr()
            .map_err(|e| Error::AllocationError(format!("Failed to get local address: {}", e)))?
            .port();
        drop(listener);

        if excluded.contains(&port) || !self.allocated_ports.lock().insert(port) {
            return Err(Error::AllocationError(format!(
                "OS assigned port {} which is already claimed",
                port
            )));
        }
        tracing::debug!("Acquired dynamic port {}", port);
        Ok(port)
    }

    /// Forget a port handed out earlier so it may be returned again.
    pub fn release(&self, port: u16) {
        self.allocated_ports.lock().remove(&port);
    }

    pub fn allocated_ports(&self) -> Vec<u16> {
        self.allocated_ports.lock().iter().copied().collect()
    }
}

impl Default for PortAllocator {
    fn default() -> Self {
        Self::new(RetryPolicy::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn allocator() -> PortAllocator {
        PortAllocator::new(RetryPolicy::fixed(3, Duration::from_millis(10)))
    }

    #[test]
    fn test_probe_detects_in_use() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let port = listener.local_addr().unwrap().port();

        assert_eq!(PortAllocator::probe(port), PortProbeResult::InUse);
        drop(listener);
    }

    #[tokio::test]
    async fn test_skips_occupied_preferred_port() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let occupied = listener.local_addr().unwrap().port();

        let alloc = allocator();
        let port = alloc.acquire(&[occupied]).await.unwrap();

        assert_ne!(port, occupied);
        assert!(alloc.allocated_ports().contains(&port));
        drop(listener);
    }

    #[tokio::test]
    async fn test_returns_first_free_preferred_port() {
        let free = {
            let l = TcpListener::bind("127.0.0.1:0").unwrap();
            l.local_addr().unwrap().port()
        };
        let alloc = allocator();
        assert_eq!(alloc.acquire(&[0, free]).await.unwrap(), free);
    }

    #[tokio::test]
    async fn test_same_allocator_never_hands_out_twice() {
        let free = {
            let l = TcpListener::bind("127.0.0.1:0").unwrap();
            l.local_addr().unwrap().port()
        };
        let alloc = allocator();
        let first = alloc.acquire(&[free]).await.unwrap();
        let second = alloc.acquire(&[free]).await.unwrap();
        assert_eq!(first, free);
        assert_ne!(second, free);

        alloc.release(free);
        assert!(!alloc.allocated_ports().contains(&free));
    }

    #[tokio::test]
    async fn test_excluded_port_is_not_returned() {
        let free = {
            let l = TcpListener::bind("127.0.0.1:0").unwrap();
            l.local_addr().unwrap().port()
        };
        let excluded: HashSet<u16> = [free].into_iter().collect();
        let port = allocator()
            .acquire_excluding(&[free], &excluded)
            .await
            .unwrap();
        assert_ne!(port, free);
    }

    #[test]
    fn test_platform_defaults_are_user_range() {
        let ports = platform_default_ports();
        assert!(!ports.is_empty());
        assert!(ports.iter().all(|&p| p >= 1024));
        assert_eq!(ports[0], 4000);
    }
}
