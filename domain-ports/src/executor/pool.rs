use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::thread;
use std::time::Duration;

use slab::Slab;

use crate::diagnostics;
use crate::error::PortsError;
use crate::lock_manager::LockManager;
use crate::util::semaphore::Semaphore;

use super::queue::TaskQueue;
use super::task::{Task, TaskKind, TaskState};
use super::worker::{run_worker, WorkerState};

/// Bookkeeping of the worker threads, protected by the pool lock.
#[derive(Debug, Default)]
pub(crate) struct PoolState {
    /// Live workers, keyed by their slot in the pool.
    pub(crate) workers: Slab<Arc<WorkerState>>,
    /// Number of workers currently running a task.
    pub(crate) busy: usize,
    /// Number of tasks submitted and not finished yet, queued or running.
    pub(crate) outstanding: usize,
    pub(crate) shall_die: bool,
    pub(crate) threads_created: usize,
    pub(crate) resolvers_spawned: usize,
}

impl PoolState {
    pub(crate) fn size(&self) -> usize {
        self.workers.len()
    }

    pub(crate) fn idle(&self) -> usize {
        self.size() - self.busy
    }

    /// Number of live workers that are not single-use resolvers.
    pub(crate) fn permanent(&self) -> usize {
        self.workers.iter().filter(|(_, w)| !w.is_resolver()).count()
    }
}

/// Outcome of a worker's attempt to claim a task.
pub(super) enum Claim {
    Task(Task),
    /// The permit was not backed by a task, e.g. after the queue was drained.
    Empty,
    /// The executor was released; the worker has been removed from the pool.
    Released,
}

/// Resources shared by an executor handle and its workers.
#[derive(Debug)]
pub(crate) struct Pool {
    pub(crate) executor_id: usize,
    name: String,
    max_pool_size: usize,
    idle_lifetime: Duration,
    queue: TaskQueue,
    state: Mutex<PoolState>,
    permits: Semaphore,
}

impl Pool {
    pub(crate) fn new(
        executor_id: usize,
        name: String,
        max_pool_size: usize,
        idle_lifetime: Duration,
    ) -> Self {
        Self {
            executor_id,
            name,
            max_pool_size,
            idle_lifetime,
            queue: TaskQueue::new(),
            state: Mutex::new(PoolState::default()),
            permits: Semaphore::new(),
        }
    }

    pub(crate) fn name(&self) -> &str {
        &self.name
    }

    pub(crate) fn max_pool_size(&self) -> usize {
        self.max_pool_size
    }

    pub(crate) fn idle_lifetime(&self) -> Duration {
        self.idle_lifetime
    }

    pub(crate) fn state(&self) -> MutexGuard<'_, PoolState> {
        self.state.lock().unwrap()
    }

    /// Queues a task and grows the pool if the queue outgrows the idle
    /// workers.
    ///
    /// Event tasks grow the pool by at most one worker. Request tasks may be
    /// awaited by a worker of this very pool, so the pool keeps growing as
    /// long as queued tasks outnumber idle workers; once the maximum size is
    /// reached, a single-use resolver worker is added whenever the lock
    /// manager reports that the creator chain of the task is deadlocked.
    pub(crate) fn submit(self: &Arc<Self>, task: Task) -> Result<(), PortsError> {
        let mut state = self.state();
        if state.shall_die {
            return Err(PortsError::IllegalState(format!(
                "executor {} has been released",
                self.name
            )));
        }

        let header = task.header().clone();
        header.set_state(TaskState::Queued);
        let queued = self.queue.push(task);
        state.outstanding += 1;

        match header.kind() {
            TaskKind::Event => {
                if queued > state.idle() && state.size() < self.max_pool_size {
                    self.spawn_worker(&mut state, false);
                }
            }
            TaskKind::Request => {
                while queued > state.idle() {
                    if state.size() < self.max_pool_size {
                        if !self.spawn_worker(&mut state, false) {
                            break;
                        }
                    } else if LockManager::global().is_deadlocked(
                        &header,
                        self.executor_id,
                        header.lock(),
                    ) {
                        if !self.spawn_worker(&mut state, true) {
                            break;
                        }
                    } else {
                        break;
                    }
                }
            }
        }
        drop(state);

        self.permits.release(1);

        Ok(())
    }

    /// Starts a worker thread and registers it in the pool.
    ///
    /// Returns `false` if the thread could not be spawned.
    fn spawn_worker(self: &Arc<Self>, state: &mut PoolState, is_resolver: bool) -> bool {
        let worker = Arc::new(WorkerState::new(self.executor_id, is_resolver));
        let entry = state.workers.vacant_entry();
        let key = entry.key();

        let thread_name = format!("{}-{}", self.name, state.threads_created);
        let spawned = thread::Builder::new().name(thread_name).spawn({
            let pool = self.clone();
            let worker = worker.clone();
            move || run_worker(pool, worker, key)
        });

        match spawned {
            Ok(_) => {
                entry.insert(worker);
                state.threads_created += 1;
                if is_resolver {
                    state.resolvers_spawned += 1;
                    tracing::debug!(target: "ports", executor = %self.name, "deadlock resolver spawned");
                } else {
                    tracing::debug!(target: "ports", executor = %self.name, size = state.size(), "worker spawned");
                }

                true
            }
            Err(err) => {
                diagnostics::error(format_args!(
                    "executor {} could not spawn a worker thread: {err}",
                    self.name
                ));

                false
            }
        }
    }

    /// Waits for a permit up to the idle lifetime.
    pub(super) fn wait_for_task(&self) -> bool {
        self.permits.acquire_timeout(self.idle_lifetime)
    }

    /// Removes an idle worker from the pool unless it is the last permanent
    /// worker or some tasks have not been claimed yet.
    ///
    /// Resolvers do not count towards the permanent workers: they retire as
    /// soon as they have run a task.
    pub(super) fn try_retire_idle(&self, key: usize) -> bool {
        let mut state = self.state();
        let is_resolver = state.workers.get(key).map_or(false, |w| w.is_resolver());
        if state.shall_die || (self.queue.is_empty() && (is_resolver || state.permanent() > 1)) {
            state.workers.try_remove(key);
            return true;
        }

        false
    }

    pub(super) fn claim_task(&self, key: usize) -> Claim {
        let mut state = self.state();
        if state.shall_die {
            state.workers.try_remove(key);
            return Claim::Released;
        }
        match self.queue.pop() {
            Some(task) => {
                state.busy += 1;
                Claim::Task(task)
            }
            None => Claim::Empty,
        }
    }

    /// Books the completion of a task and returns `true` if the worker must
    /// now retire.
    pub(super) fn complete_task(&self, key: usize, is_resolver: bool) -> bool {
        let mut state = self.state();
        state.busy -= 1;
        state.outstanding -= 1;
        if is_resolver || state.shall_die {
            state.workers.try_remove(key);
            return true;
        }

        false
    }

    pub(super) fn retire_after_panic(&self, key: usize, was_busy: bool) {
        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        if was_busy {
            state.busy = state.busy.saturating_sub(1);
            state.outstanding = state.outstanding.saturating_sub(1);
        }
        state.workers.try_remove(key);
    }

    pub(crate) fn is_released(&self) -> bool {
        self.state().shall_die
    }

    /// Marks the pool for shutdown, wakes every worker and returns the tasks
    /// that were never claimed.
    pub(crate) fn release(&self) -> Vec<Task> {
        let mut state = self.state();
        if state.shall_die {
            return Vec::new();
        }
        state.shall_die = true;

        let abandoned = self.queue.drain();
        state.outstanding -= abandoned.len();
        let size = state.size();
        drop(state);

        self.permits.release(size.max(1));
        for task in &abandoned {
            task.header().set_state(TaskState::Failed);
        }

        abandoned
    }
}
