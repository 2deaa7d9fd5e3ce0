//! Adaptive thread pool executing port tasks.
//!
//! An executor owns one FIFO queue of tasks and a pool of worker threads
//! whose size adapts to the load, between one worker (once started) and a
//! configurable maximum. Workers that stay idle longer than the idle lifetime
//! retire, except for the last one.
//!
//! Request tasks are special in that the thread that created them usually
//! blocks until they complete. When such a thread is itself a worker of the
//! pool and the pool is saturated, the task could wait forever for a free
//! worker. The executor therefore asks the [`LockManager`] whether the chain
//! of task creators loops back into the pool and, if so, spawns a temporary
//! resolver worker that runs a single task and retires.
//!
//! [`LockManager`]: crate::lock_manager::LockManager

use std::fmt;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

mod pool;
mod queue;
mod task;
mod worker;


use crate::diagnostics;
use crate::error::{panic_message, PortsError};
use crate::future::{promise, PortsFuture};

use self::pool::Pool;
pub(crate) use self::task::{Task, TaskHeader, TaskKind};
pub(crate) use self::worker::ThreadRef;
#[cfg(test)]
pub(crate) use self::worker::WorkerState;

/// Unique identifier for executor instances.
static NEXT_EXECUTOR_ID: AtomicUsize = AtomicUsize::new(0);

/// Back-off of the quiescence poll after `polls` unsuccessful polls.
fn quiescence_backoff(polls: u32) -> Duration {
    match polls {
        0..=9 => Duration::from_millis(10),
        10..=49 => Duration::from_millis(100),
        _ => Duration::from_millis(333),
    }
}

/// An adaptive pool of worker threads fed by a FIFO queue.
///
/// Dropping the executor releases it.
pub struct Executor {
    pool: Arc<Pool>,
}

impl Executor {
    /// Creates an executor with no worker; workers are started on demand.
    ///
    /// # Panics
    ///
    /// This will panic if the maximum pool size is zero.
    pub fn new(name: impl Into<String>, max_pool_size: usize, idle_lifetime: Duration) -> Self {
        assert!(
            max_pool_size >= 1,
            "the executor pool size should be at least one"
        );

        let executor_id = NEXT_EXECUTOR_ID.fetch_add(1, Ordering::Relaxed);

        Self {
            pool: Arc::new(Pool::new(
                executor_id,
                name.into(),
                max_pool_size,
                idle_lifetime,
            )),
        }
    }

    /// Unique identifier of the executor.
    pub fn id(&self) -> usize {
        self.pool.executor_id
    }

    /// Name of the executor, also used as prefix of its thread names.
    pub fn name(&self) -> &str {
        self.pool.name()
    }

    /// Maximum number of permanent workers.
    pub fn max_pool_size(&self) -> usize {
        self.pool.max_pool_size()
    }

    /// Time after which an idle worker retires.
    pub fn idle_lifetime(&self) -> Duration {
        self.pool.idle_lifetime()
    }

    /// Queues a task.
    pub(crate) fn submit(&self, task: Task) -> Result<(), PortsError> {
        self.pool.submit(task)
    }

    /// Runs a closure on the pool and returns a future of its result.
    ///
    /// The closure runs as a request task: a panic is captured as an
    /// [`PortsError::ExecutionFailure`] in the future and the caller may block
    /// on the result from within another task of the same executor.
    pub fn spawn<F, R>(&self, f: F) -> Result<PortsFuture<R>, PortsError>
    where
        F: FnOnce() -> R + Send + 'static,
        R: Send + 'static,
    {
        let (completer, future) = promise();
        let job = Box::new(move || match panic::catch_unwind(AssertUnwindSafe(f)) {
            Ok(value) => {
                completer.ready(value);
                Ok(())
            }
            Err(payload) => {
                let err = PortsError::ExecutionFailure(panic_message(&*payload));
                completer.failed(err.clone());
                Err(err)
            }
        });

        self.submit(Task::new(TaskKind::Request, None, job))?;

        Ok(future)
    }

    /// Runs a closure on the pool without waiting for it.
    ///
    /// A panic in the closure is reported to the diagnostics sink.
    pub fn spawn_and_forget<F>(&self, f: F) -> Result<(), PortsError>
    where
        F: FnOnce() + Send + 'static,
    {
        let job = Box::new(move || {
            f();
            Ok::<(), PortsError>(())
        });

        self.submit(Task::new(TaskKind::Event, None, job))
    }

    /// Blocks until no task is queued or running.
    ///
    /// The executor is polled with a widening back-off. If the executor is
    /// released during the wait, the wait is aborted with a warning.
    pub fn await_quiescence(&self) {
        let mut polls = 0u32;
        loop {
            {
                let state = self.pool.state();
                if state.outstanding == 0 {
                    return;
                }
                if state.shall_die {
                    diagnostics::warning(format_args!(
                        "await_quiescence has been interrupted: executor {} was released",
                        self.name()
                    ));
                    return;
                }
            }

            spin_sleep::sleep(quiescence_backoff(polls));
            polls = polls.saturating_add(1);
        }
    }

    /// Blocks until no task is queued or running, or until the timeout
    /// elapses.
    pub fn await_quiescence_timeout(&self, timeout: Duration) -> Result<(), PortsError> {
        let deadline = Instant::now() + timeout;
        let mut polls = 0u32;
        loop {
            {
                let state = self.pool.state();
                if state.outstanding == 0 {
                    return Ok(());
                }
                if state.shall_die {
                    diagnostics::warning(format_args!(
                        "await_quiescence has been interrupted: executor {} was released",
                        self.name()
                    ));
                    return Ok(());
                }
            }

            let now = Instant::now();
            if now >= deadline {
                return Err(PortsError::TimeoutExceeded);
            }
            spin_sleep::sleep(quiescence_backoff(polls).min(deadline - now));
            polls = polls.saturating_add(1);
        }
    }

    /// Returns `true` if no task is queued or running.
    pub fn is_quiescent(&self) -> bool {
        self.pool.state().outstanding == 0
    }

    /// Shuts the pool down.
    ///
    /// Workers retire once their current task completes. Tasks that were
    /// still queued are dropped and their futures fail with
    /// [`PortsError::IllegalState`]; later submissions fail likewise.
    pub fn release(&self) {
        let abandoned = self.pool.release();
        if !abandoned.is_empty() {
            tracing::debug!(
                target: "ports",
                executor = %self.name(),
                abandoned = abandoned.len(),
                "queued tasks dropped on release"
            );
        }
        // Dropping the jobs completes their futures, which may run callbacks:
        // this must happen outside of the pool lock.
        drop(abandoned);
    }

    /// Returns `true` if the executor was released.
    pub fn is_released(&self) -> bool {
        self.pool.is_released()
    }

    /// Number of live workers, including resolvers.
    pub fn pool_size(&self) -> usize {
        self.pool.state().size()
    }

    /// Number of workers currently running a task.
    pub fn busy_count(&self) -> usize {
        self.pool.state().busy
    }

    /// Number of worker threads started since the executor was created.
    pub fn threads_created(&self) -> usize {
        self.pool.state().threads_created
    }

    /// Number of deadlock resolvers started since the executor was created.
    pub fn resolvers_spawned(&self) -> usize {
        self.pool.state().resolvers_spawned
    }
}

impl Drop for Executor {
    fn drop(&mut self) {
        self.release();
    }
}

impl fmt::Debug for Executor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.pool.state();
        f.debug_struct("Executor")
            .field("name", &self.pool.name())
            .field("pool_size", &state.size())
            .field("busy", &state.busy)
            .field("outstanding", &state.outstanding)
            .finish_non_exhaustive()
    }
}
