//! Delivery of events according to the receivers' domains.

use std::sync::{Arc, Barrier, Mutex};
use std::thread;
use std::time::Duration;

use domain_ports::{DomainManager, Event, SyncPolicy};

use crate::support::{self, ConcurrencyProbe};

struct Emitter;

#[derive(Default)]
struct Listener {
    log: Mutex<Vec<(usize, String)>>,
    probe: ConcurrencyProbe,
}

impl Listener {
    fn record(&self, tag: usize) {
        self.log.lock().unwrap().push((tag, support::thread_name()));
    }

    fn tags(&self) -> Vec<usize> {
        self.log.lock().unwrap().iter().map(|(tag, _)| *tag).collect()
    }
}

#[test]
fn event_same_thread_runs_inline() {
    let event = Event::<usize>::owned_by::<Emitter>("inline");
    let listener = Arc::new(Listener::default());
    event.connect(&listener, |listener, tag| listener.record(*tag));

    event.trigger(1);

    // Delivered before `trigger` returned, on the sender's thread.
    let log = listener.log.lock().unwrap();
    assert_eq!(log.len(), 1);
    assert_eq!(log[0].1, support::thread_name());
}

#[test]
fn event_parallel_runs_on_domain_pool() {
    let domain = support::parallel("event-pool", SyncPolicy::ComponentSync, 2);
    let event = Event::<usize>::owned_by::<Emitter>("pooled");
    let listener = Arc::new(Listener::default());
    DomainManager::global().bind_instance(&listener, domain.clone());
    event.connect(&listener, |listener, tag| listener.record(*tag));

    event.trigger(7);
    domain
        .await_quiescence_timeout(Duration::from_secs(5))
        .unwrap();

    {
        let log = listener.log.lock().unwrap();
        assert_eq!(log.len(), 1);
        assert!(log[0].1.starts_with("ports-worker-event-pool"));
    }

    DomainManager::global().unbind_instance(&listener);
    domain.release();
}

#[test]
fn event_parallel_preserves_reverse_order_on_single_worker() {
    let domain = support::parallel("event-reverse", SyncPolicy::Asynchronous, 1);
    let event = Event::<usize>::new("reverse");
    let listener = Arc::new(Listener::default());
    DomainManager::global().bind_instance(&listener, domain.clone());

    for tag in 0..5 {
        event.connect(&listener, move |listener, _| listener.record(tag));
    }
    event.trigger(0);
    domain
        .await_quiescence_timeout(Duration::from_secs(5))
        .unwrap();

    assert_eq!(listener.tags(), vec![4, 3, 2, 1, 0]);

    DomainManager::global().unbind_instance(&listener);
    domain.release();
}

#[test]
fn event_component_sync_serializes_a_receiver() {
    let domain = support::parallel("event-component-sync", SyncPolicy::ComponentSync, 4);
    let event = Event::<usize>::new("serialized");
    let listener = Arc::new(Listener::default());
    DomainManager::global().bind_instance(&listener, domain.clone());
    event.connect(&listener, |listener, tag| {
        listener.probe.section(|| {
            thread::sleep(Duration::from_millis(1));
            listener.record(*tag);
        })
    });

    for tag in 0..20 {
        event.trigger(tag);
    }
    domain
        .await_quiescence_timeout(Duration::from_secs(10))
        .unwrap();

    assert_eq!(listener.tags().len(), 20);
    assert_eq!(listener.probe.peak(), 1);

    DomainManager::global().unbind_instance(&listener);
    domain.release();
}

#[test]
fn event_domain_sync_serializes_the_whole_domain() {
    let domain = support::parallel("event-domain-sync", SyncPolicy::DomainSync, 4);
    let event = Event::<usize>::new("domain-serialized");
    let probe = Arc::new(ConcurrencyProbe::default());
    let listeners: Vec<_> = (0..3).map(|_| Arc::new(Listener::default())).collect();

    for listener in &listeners {
        DomainManager::global().bind_instance(listener, domain.clone());
        let probe = probe.clone();
        event.connect(listener, move |listener, tag| {
            probe.section(|| {
                thread::sleep(Duration::from_millis(1));
                listener.record(*tag);
            })
        });
    }

    for tag in 0..10 {
        event.trigger(tag);
    }
    domain
        .await_quiescence_timeout(Duration::from_secs(10))
        .unwrap();

    for listener in &listeners {
        assert_eq!(listener.tags().len(), 10);
        DomainManager::global().unbind_instance(listener);
    }
    assert_eq!(probe.peak(), 1);

    domain.release();
}

#[test]
fn event_asynchronous_receivers_run_concurrently() {
    let domain = support::parallel("event-asynchronous", SyncPolicy::Asynchronous, 2);
    let event = Event::<Arc<Barrier>>::new("rendezvous");
    let listener = Arc::new(Listener::default());
    DomainManager::global().bind_instance(&listener, domain.clone());

    // Both deliveries must be in flight at once for the barrier to open.
    event.connect(&listener, |listener, barrier| {
        barrier.wait();
        listener.record(0);
    });
    let barrier = Arc::new(Barrier::new(2));
    event.trigger(barrier.clone());
    event.trigger(barrier);

    domain
        .await_quiescence_timeout(Duration::from_secs(5))
        .unwrap();
    assert_eq!(listener.tags(), vec![0, 0]);

    DomainManager::global().unbind_instance(&listener);
    domain.release();
}

#[test]
fn event_without_receiver_warns_once() {
    support::install_recorder();
    let event = Event::<usize>::owned_by::<Emitter>("unheard-integration-event");

    event.trigger(0);

    assert_eq!(
        support::warnings_containing(
            "event unheard-integration-event was fired by component"
        ),
        1
    );
    assert_eq!(
        support::warnings_containing("Emitter but there is no receiver"),
        1
    );
}

#[test]
fn event_rebinding_switches_dispatch() {
    let domain = support::parallel("event-rebinding", SyncPolicy::ComponentSync, 1);
    let event = Event::<usize>::new("rebinding");
    let listener = Arc::new(Listener::default());
    event.connect(&listener, |listener, tag| listener.record(*tag));

    event.trigger(0);
    DomainManager::global().bind_instance(&listener, domain.clone());
    event.trigger(1);
    domain
        .await_quiescence_timeout(Duration::from_secs(5))
        .unwrap();
    DomainManager::global().unbind_instance(&listener);
    event.trigger(2);

    let log = listener.log.lock().unwrap();
    let here = support::thread_name();
    assert_eq!(log[0], (0, here.clone()));
    assert_eq!(log[1].0, 1);
    assert!(log[1].1.starts_with("ports-worker-event-rebinding"));
    assert_eq!(log[2], (2, here));
    drop(log);

    domain.release();
}

#[test]
fn event_trigger_inline_ignores_dispatch_policy() {
    let domain = support::parallel("event-forced-inline", SyncPolicy::ComponentSync, 1);
    let event = Event::<usize>::new("forced");
    let listener = Arc::new(Listener::default());
    DomainManager::global().bind_instance(&listener, domain.clone());
    event.connect(&listener, |listener, tag| listener.record(*tag));

    event.trigger_inline(3);

    assert_eq!(
        *listener.log.lock().unwrap(),
        vec![(3, support::thread_name())]
    );
    assert!(domain.executor().map_or(true, |e| e.threads_created() == 0));

    DomainManager::global().unbind_instance(&listener);
    domain.release();
}
