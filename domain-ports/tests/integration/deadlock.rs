//! Resolution of request chains that would exhaust a saturated pool.

use std::sync::mpsc;
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::Duration;

use domain_ports::{
    ComponentRef, DispatchPolicy, Domain, DomainManager, LockManager, LockSubject, Request,
    SyncPolicy,
};

use crate::support;

/// A component forwarding requests to the next stage and waiting for the
/// reply.
struct Stage {
    next: Request<u32, u32>,
}

impl Stage {
    fn new(name: &str) -> Self {
        Self {
            next: Request::owned_by::<Self>(name.to_owned()),
        }
    }

    fn forward(&self, value: u32) -> u32 {
        self.next.call_async(value + 1).get().unwrap()
    }
}

struct Sink;

#[test]
fn deadlock_nested_requests_within_one_pool() {
    let domain = support::parallel("deadlock-nested", SyncPolicy::ComponentSync, 2);
    let manager = DomainManager::global();

    let x = Arc::new(Stage::new("x-to-y"));
    let y = Arc::new(Stage::new("y-to-z"));
    let z = Arc::new(Sink);
    for stage in [&x, &y] {
        manager.bind_instance(stage, domain.clone());
    }
    manager.bind_instance(&z, domain.clone());

    let entry = Request::<u32, u32>::new("entry");
    entry.connect(&x, Stage::forward);
    x.next.connect(&y, Stage::forward);
    y.next.connect(&z, |_, value| value + 40);

    let mut future = entry.call_async(0);
    assert_eq!(future.get_timeout(Duration::from_secs(10)), Ok(42));

    let executor = domain.executor().unwrap();
    assert_eq!(executor.resolvers_spawned(), 1);

    for stage in [&x, &y] {
        manager.unbind_instance(stage);
    }
    manager.unbind_instance(&z);
    domain.release();
}

#[test]
fn deadlock_chain_across_two_pools() {
    let a = support::parallel("deadlock-pool-a", SyncPolicy::ComponentSync, 1);
    let b = support::parallel("deadlock-pool-b", SyncPolicy::ComponentSync, 1);
    let manager = DomainManager::global();

    // a -> b -> a: the last request finds pool `a` saturated by its own
    // caller's caller.
    let first = Arc::new(Stage::new("first-to-second"));
    let second = Arc::new(Stage::new("second-to-third"));
    let third = Arc::new(Sink);
    manager.bind_instance(&first, a.clone());
    manager.bind_instance(&second, b.clone());
    manager.bind_instance(&third, a.clone());

    let entry = Request::<u32, u32>::new("entry");
    entry.connect(&first, Stage::forward);
    first.next.connect(&second, Stage::forward);
    second.next.connect(&third, |_, value| value * 10);

    let mut future = entry.call_async(1);
    assert_eq!(future.get_timeout(Duration::from_secs(10)), Ok(30));
    assert_eq!(a.executor().unwrap().resolvers_spawned(), 1);
    assert_eq!(b.executor().unwrap().resolvers_spawned(), 0);

    manager.unbind_instance(&first);
    manager.unbind_instance(&second);
    manager.unbind_instance(&third);
    a.release();
    b.release();
}

/// A component blocking until the test lets it go.
struct Gate {
    receiver: Mutex<mpsc::Receiver<()>>,
}

struct Account {
    balance: Mutex<i64>,
}

#[test]
fn deadlock_lock_held_by_caller_spawns_resolver() {
    let domain = support::parallel("deadlock-held-lock", SyncPolicy::ComponentSync, 1);
    let manager = DomainManager::global();

    let (sender, receiver) = mpsc::channel();
    let gate = Arc::new(Gate {
        receiver: Mutex::new(receiver),
    });
    let account = Arc::new(Account {
        balance: Mutex::new(0),
    });
    manager.bind_instance(&gate, domain.clone());
    manager.bind_instance(&account, domain.clone());

    let wait = Request::<(), ()>::new("wait");
    wait.connect(&gate, |gate, ()| gate.receiver.lock().unwrap().recv().unwrap());
    let deposit = Request::<i64, i64>::new("deposit");
    deposit.connect(&account, |account, amount| {
        let mut balance = account.balance.lock().unwrap();
        *balance += amount;
        *balance
    });

    // Saturate the single worker.
    let blocked = wait.call_async(());
    let executor = domain.executor().unwrap();
    assert!(support::wait_until(Duration::from_secs(5), || {
        executor.busy_count() == 1
    }));

    // The calling thread holds the lock the deposit needs.
    let subject = LockSubject::Component(ComponentRef::new(&account));
    let guard = LockManager::global().lock(&subject);
    let mut deposited = deposit.call_async(5);
    assert_eq!(executor.resolvers_spawned(), 1);
    assert!(deposited.get_timeout(Duration::from_millis(20)).is_err());
    drop(guard);

    assert_eq!(deposited.get_timeout(Duration::from_secs(5)), Ok(5));
    sender.send(()).unwrap();
    assert_eq!(blocked.get(), Ok(()));

    manager.unbind_instance(&gate);
    manager.unbind_instance(&account);
    domain.release();
}

#[test]
fn deadlock_pool_keeps_a_worker_after_resolver_retires() {
    let domain = Domain::builder("deadlock-resolver-retires")
        .dispatch(DispatchPolicy::Parallel)
        .sync(SyncPolicy::ComponentSync)
        .max_pool_size(1)
        .idle_lifetime(Duration::from_millis(50))
        .build()
        .unwrap();
    let manager = DomainManager::global();

    let (sender, receiver) = mpsc::channel();
    let gate = Arc::new(Gate {
        receiver: Mutex::new(receiver),
    });
    let account = Arc::new(Account {
        balance: Mutex::new(0),
    });
    manager.bind_instance(&gate, domain.clone());
    manager.bind_instance(&account, domain.clone());

    let wait = Request::<(), ()>::new("wait");
    wait.connect(&gate, |gate, ()| gate.receiver.lock().unwrap().recv().unwrap());
    let deposit = Request::<i64, i64>::new("deposit");
    deposit.connect(&account, |account, amount| {
        let mut balance = account.balance.lock().unwrap();
        *balance += amount;
        *balance
    });

    let blocked = wait.call_async(());
    let executor = domain.executor().unwrap();
    assert!(support::wait_until(Duration::from_secs(5), || {
        executor.busy_count() == 1
    }));

    let subject = LockSubject::Component(ComponentRef::new(&account));
    let guard = LockManager::global().lock(&subject);
    let mut deposited = deposit.call_async(3);
    assert_eq!(executor.resolvers_spawned(), 1);
    assert_eq!(executor.pool_size(), 2);

    // The permanent worker goes idle while the resolver is still blocked.
    sender.send(()).unwrap();
    assert_eq!(blocked.get(), Ok(()));
    thread::sleep(Duration::from_millis(200));
    assert_eq!(executor.pool_size(), 2);

    drop(guard);
    assert_eq!(deposited.get_timeout(Duration::from_secs(5)), Ok(3));

    // The resolver retires and the permanent worker stays.
    assert!(support::wait_until(Duration::from_secs(5), || {
        executor.pool_size() == 1
    }));
    thread::sleep(Duration::from_millis(200));
    assert_eq!(executor.pool_size(), 1);
    assert_eq!(executor.threads_created(), 2);

    manager.unbind_instance(&gate);
    manager.unbind_instance(&account);
    domain.release();
}
