use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::{self, ThreadId};

use crate::diagnostics;
use crate::error::panic_message;
use crate::lock_manager::SubjectLock;
use crate::macros::scoped_thread_local::scoped_thread_local;

use super::pool::{Claim, Pool};
use super::task::TaskHeader;

static NEXT_WORKER_ID: AtomicUsize = AtomicUsize::new(0);

scoped_thread_local!(pub(crate) static LOCAL_WORKER: Arc<WorkerState>);

/// State of a worker thread shared with the lock manager.
#[derive(Debug)]
pub(crate) struct WorkerState {
    id: usize,
    executor_id: usize,
    is_resolver: bool,
    busy: AtomicBool,
    held_locks: Mutex<Vec<SubjectLock>>,
    current_task: Mutex<Option<Arc<TaskHeader>>>,
}

impl WorkerState {
    pub(crate) fn new(executor_id: usize, is_resolver: bool) -> Self {
        Self {
            id: NEXT_WORKER_ID.fetch_add(1, Ordering::Relaxed),
            executor_id,
            is_resolver,
            busy: AtomicBool::new(false),
            held_locks: Mutex::new(Vec::new()),
            current_task: Mutex::new(None),
        }
    }

    pub(crate) fn id(&self) -> usize {
        self.id
    }

    pub(crate) fn executor_id(&self) -> usize {
        self.executor_id
    }

    pub(crate) fn is_resolver(&self) -> bool {
        self.is_resolver
    }

    pub(crate) fn holds(&self, lock: &SubjectLock) -> bool {
        self.held_locks.lock().unwrap().contains(lock)
    }

    pub(crate) fn add_lock(&self, lock: SubjectLock) {
        self.held_locks.lock().unwrap().push(lock);
    }

    pub(crate) fn remove_lock(&self, lock: &SubjectLock) {
        if let Ok(mut locks) = self.held_locks.lock() {
            if let Some(pos) = locks.iter().rposition(|l| l == lock) {
                locks.swap_remove(pos);
            }
        }
    }

    pub(crate) fn current_task(&self) -> Option<Arc<TaskHeader>> {
        self.current_task.lock().unwrap().clone()
    }

    pub(crate) fn set_current_task(&self, task: Option<Arc<TaskHeader>>) {
        *self.current_task.lock().unwrap() = task;
    }
}

/// Identity of a thread as seen by deadlock detection.
#[derive(Clone, Debug)]
pub(crate) enum ThreadRef {
    /// A pool worker.
    Worker(Arc<WorkerState>),
    /// Any thread that is not a pool worker.
    Plain(ThreadId),
}

impl ThreadRef {
    /// Identity of the calling thread.
    pub(crate) fn current() -> Self {
        LOCAL_WORKER
            .map(|worker| Self::Worker(worker.clone()))
            .unwrap_or_else(|| Self::Plain(thread::current().id()))
    }

    /// Identifier of the executor the thread belongs to, if any.
    pub(crate) fn group(&self) -> Option<usize> {
        match self {
            Self::Worker(worker) => Some(worker.executor_id()),
            Self::Plain(_) => None,
        }
    }
}

/// Runs the worker loop until the worker retires or the executor is
/// released.
///
/// A panic escaping the loop is reported and the pool bookkeeping is
/// corrected, so that the remaining workers keep serving the queue.
pub(super) fn run_worker(pool: Arc<Pool>, worker: Arc<WorkerState>, key: usize) {
    let result = panic::catch_unwind(AssertUnwindSafe(|| {
        LOCAL_WORKER.set(&worker, || worker_loop(&pool, &worker, key))
    }));

    if let Err(payload) = result {
        pool.retire_after_panic(key, worker.busy.load(Ordering::Relaxed));

        diagnostics::error(format_args!(
            "Thread [{}] died because of uncaught panic: {}",
            thread::current().name().unwrap_or("<unnamed>"),
            panic_message(&*payload)
        ));
    }
}

fn worker_loop(pool: &Pool, worker: &WorkerState, key: usize) {
    tracing::trace!(
        target: "ports",
        executor = %pool.name(),
        worker = worker.id(),
        resolver = worker.is_resolver(),
        "worker started"
    );

    loop {
        if !pool.wait_for_task() {
            // Idle timeout: retire unless this is the last worker or tasks
            // are still waiting to be claimed.
            if pool.try_retire_idle(key) {
                tracing::trace!(target: "ports", executor = %pool.name(), worker = worker.id(), "idle worker retired");
                return;
            }
            continue;
        }

        let task = match pool.claim_task(key) {
            Claim::Task(task) => task,
            Claim::Empty => continue,
            Claim::Released => return,
        };

        worker.busy.store(true, Ordering::Relaxed);
        worker.set_current_task(Some(task.header().clone()));
        task.run(worker.id());
        worker.set_current_task(None);
        worker.busy.store(false, Ordering::Relaxed);

        if pool.complete_task(key, worker.is_resolver()) {
            return;
        }
    }
}
