//! Port allocation against real loopback listeners.

use sidecar::port::{PortAllocator, PortProbeResult};
use sidecar::{Error, RetryPolicy};
use std::collections::HashSet;
use std::net::TcpListener;
use std::sync::Arc;
use std::time::Duration;

fn fast_allocator() -> PortAllocator {
    PortAllocator::new(RetryPolicy::fixed(3, Duration::from_millis(10)))
}

/// Reserve `n` distinct ports the OS considers free, then release them.
fn free_ports(n: usize) -> Vec<u16> {
    let listeners: Vec<TcpListener> = (0..n)
        .map(|_| TcpListener::bind("127.0.0.1:0").expect("bind ephemeral port"))
        .collect();
    listeners
        .iter()
        .map(|l| l.local_addr().expect("local addr").port())
        .collect()
}

#[tokio::test]
async fn test_disjoint_concurrent_acquires_never_collide() {
    let ports = free_ports(8);
    let (p1, p2) = ports.split_at(4);
    let allocator = Arc::new(fast_allocator());

    let a = {
        let allocator = allocator.clone();
        let p1 = p1.to_vec();
        tokio::spawn(async move { allocator.acquire(&p1).await })
    };
    let b = {
        let allocator = allocator.clone();
        let p2 = p2.to_vec();
        tokio::spawn(async move { allocator.acquire(&p2).await })
    };

    let a = a.await.unwrap().unwrap();
    let b = b.await.unwrap().unwrap();
    assert_ne!(a, b);
}

#[tokio::test]
async fn test_separate_allocators_with_disjoint_lists_never_collide() {
    let ports = free_ports(6);
    let (p1, p2) = ports.split_at(3);

    let first = fast_allocator();
    let second = fast_allocator();
    let (a, b) = tokio::join!(first.acquire(p1), second.acquire(p2));
    assert_ne!(a.unwrap(), b.unwrap());
}

#[tokio::test]
async fn test_never_returns_port_it_saw_in_use() {
    let busy: Vec<TcpListener> = (0..3)
        .map(|_| TcpListener::bind("127.0.0.1:0").unwrap())
        .collect();
    let busy_ports: Vec<u16> = busy
        .iter()
        .map(|l| l.local_addr().unwrap().port())
        .collect();

    for &port in &busy_ports {
        assert_eq!(PortAllocator::probe(port), PortProbeResult::InUse);
    }

    let allocator = fast_allocator();
    let port = allocator.acquire(&busy_ports).await.unwrap();
    assert!(!busy_ports.contains(&port));

    drop(busy);
}

#[tokio::test]
async fn test_prefers_order_of_candidates() {
    let ports = free_ports(3);
    let allocator = fast_allocator();

    let first = allocator.acquire(&ports).await.unwrap();
    assert_eq!(first, ports[0]);

    // The first is now claimed by this allocator, so the next call moves on
    let second = allocator.acquire(&ports).await.unwrap();
    assert_eq!(second, ports[1]);
}

#[tokio::test]
async fn test_returned_port_is_bindable() {
    let allocator = fast_allocator();
    let port = allocator.acquire_dynamic().await.unwrap();

    let listener = TcpListener::bind(("127.0.0.1", port));
    assert!(listener.is_ok(), "dynamic port {} should be free", port);
}

#[tokio::test]
async fn test_dynamic_allocation_respects_exclusions() {
    let allocator = fast_allocator();
    let mut excluded = HashSet::new();
    for _ in 0..5 {
        let port = allocator.acquire_excluding(&[], &excluded).await.unwrap();
        assert!(!excluded.contains(&port));
        excluded.insert(port);
        allocator.release(port);
    }
}

#[test]
fn test_exhaustion_guidance_lists_candidates() {
    let err = Error::PortExhausted {
        tried: vec![4000, 4001],
    };
    let text = err.with_suggestion();
    assert!(text.contains("4000, 4001"));
    assert!(text.contains("Hint:"));
}
