//! Fan-out requests joined with a fork.

use std::sync::mpsc;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use domain_ports::{DomainManager, Outcome, PortsError, Request, SyncPolicy};

use crate::support;

struct Validator;

impl Validator {
    fn check(&self, value: usize) -> usize {
        if value == 3 {
            panic!("value 3 is invalid");
        }
        value * 10
    }
}

#[test]
fn fork_reports_partial_failures_in_order() {
    let domain = support::parallel("fork-partial", SyncPolicy::Asynchronous, 3);
    let request = Request::<usize, usize>::new("check");
    let validator = Arc::new(Validator);
    DomainManager::global().bind_instance(&validator, domain.clone());
    request.connect(&validator, Validator::check);

    let results = request.fork(0..6).get_either_all();

    assert_eq!(results.len(), 6);
    for (i, result) in results.into_iter().enumerate() {
        if i == 3 {
            assert_eq!(
                result,
                Err(PortsError::ExecutionFailure("value 3 is invalid".into()))
            );
        } else {
            assert_eq!(result, Ok(i * 10));
        }
    }

    let err = request.fork(0..6).get_all().unwrap_err();
    assert_eq!(err, PortsError::ExecutionFailure("value 3 is invalid".into()));
    assert_eq!(request.fork([1, 2]).get_all(), Ok(vec![10, 20]));

    DomainManager::global().unbind_instance(&validator);
    domain.release();
}

/// A target blocking until it is released by the test.
struct Gate {
    receiver: Mutex<mpsc::Receiver<()>>,
}

#[test]
fn fork_timeouts() {
    let domain = support::parallel("fork-timeouts", SyncPolicy::ComponentSync, 2);
    let request = Request::<usize, usize>::new("gated");
    let (sender, receiver) = mpsc::channel();
    let gate = Arc::new(Gate {
        receiver: Mutex::new(receiver),
    });
    DomainManager::global().bind_instance(&gate, domain.clone());
    request.connect(&gate, |gate, value| {
        gate.receiver.lock().unwrap().recv().unwrap();
        value
    });

    assert_eq!(
        request.fork([1, 2]).get_all_timeout(Duration::from_millis(50)),
        Err(PortsError::TimeoutExceeded)
    );

    let fork = request.fork([3]);
    assert_eq!(fork.get_now_either_all(), vec![Outcome::NotYetAvailable]);
    assert!(!fork.is_done());
    assert!(!fork.cancel());

    // Timed-out calls keep running: release them all.
    for _ in 0..3 {
        sender.send(()).unwrap();
    }
    assert_eq!(
        fork.get_either_all_timeout(Duration::from_secs(5)),
        vec![Ok(3)]
    );

    domain
        .await_quiescence_timeout(Duration::from_secs(5))
        .unwrap();
    DomainManager::global().unbind_instance(&gate);
    domain.release();
}
