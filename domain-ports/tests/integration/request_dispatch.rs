//! Synchronous and asynchronous requests.

use std::sync::Arc;
use std::time::Duration;

use domain_ports::{DomainManager, PortsError, Request, SyncPolicy};

use crate::support;

struct Client;

struct Echo;

impl Echo {
    fn tagged(&self, value: u32) -> (u32, String) {
        (value, support::thread_name())
    }
}

#[test]
fn request_call_bypasses_domain_routing() {
    let domain = support::parallel("request-sync-call", SyncPolicy::ComponentSync, 1);
    let request = Request::<u32, (u32, String)>::owned_by::<Client>("echo");
    let echo = Arc::new(Echo);
    DomainManager::global().bind_instance(&echo, domain.clone());
    request.connect(&echo, Echo::tagged);

    assert_eq!(request.call(5), Ok((5, support::thread_name())));

    DomainManager::global().unbind_instance(&echo);
    domain.release();
}

#[test]
fn request_call_async_runs_on_domain_pool() {
    let domain = support::parallel("request-pool", SyncPolicy::ComponentSync, 2);
    let request = Request::<u32, (u32, String)>::owned_by::<Client>("echo");
    let echo = Arc::new(Echo);
    DomainManager::global().bind_instance(&echo, domain.clone());
    request.connect(&echo, Echo::tagged);

    let mut future = request.call_async(9);
    let (value, thread) = future.get_timeout(Duration::from_secs(5)).unwrap();
    assert_eq!(value, 9);
    assert!(thread.starts_with("ports-worker-request-pool"));

    DomainManager::global().unbind_instance(&echo);
    domain.release();
}

#[test]
fn request_call_async_captures_panics_on_pool() {
    let domain = support::parallel("request-panic", SyncPolicy::Asynchronous, 1);
    let request = Request::<u32, u32>::new("checked");
    let echo = Arc::new(Echo);
    DomainManager::global().bind_instance(&echo, domain.clone());
    request.connect(&echo, |_, value| {
        if value == 0 {
            panic!("zero rejected by pooled target");
        }
        value
    });

    assert_eq!(
        request.call_async(0).get(),
        Err(PortsError::ExecutionFailure(
            "zero rejected by pooled target".into()
        ))
    );
    // The pool survives the failure.
    assert_eq!(request.call_async(4).get(), Ok(4));

    DomainManager::global().unbind_instance(&echo);
    domain.release();
}

#[test]
fn request_unconnected_fails() {
    let request = Request::<u32, u32>::owned_by::<Client>("orphan");

    let err = request.call(1).unwrap_err();
    assert!(matches!(err, PortsError::PortNotConnected { ref port, .. } if port == "orphan"));
    assert!(err.to_string().contains("orphan"));

    let echo = Arc::new(Echo);
    request.connect(&echo, |_, v| v);
    drop(echo);
    assert!(matches!(
        request.call_async(1).get(),
        Err(PortsError::PortNotConnected { .. })
    ));
}

#[test]
fn request_to_released_domain_fails() {
    let domain = support::parallel("request-released", SyncPolicy::ComponentSync, 1);
    let request = Request::<u32, u32>::new("late");
    let echo = Arc::new(Echo);
    DomainManager::global().bind_instance(&echo, domain.clone());
    request.connect(&echo, |_, v| v);

    assert_eq!(request.call_async(1).get(), Ok(1));
    domain.release();
    assert!(matches!(
        request.call_async(2).get(),
        Err(PortsError::IllegalState(_))
    ));

    DomainManager::global().unbind_instance(&echo);
}
