use std::fmt;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, AtomicU8, Ordering};
use std::sync::{Arc, OnceLock};

use crate::diagnostics;
use crate::error::{panic_message, PortsError};
use crate::lock_manager::SubjectLock;

use super::worker::ThreadRef;

static NEXT_TASK_ID: AtomicU64 = AtomicU64::new(0);

/// Unit of work executed by a task.
pub(crate) type Job = Box<dyn FnOnce() -> Result<(), PortsError> + Send>;

/// Kind of message carried by a task.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub(crate) enum TaskKind {
    /// Fire-and-forget delivery; nobody waits on the outcome.
    Event,
    /// Call whose result is awaited through a `PortsFuture`.
    Request,
}

/// Lifecycle stage of a task.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
#[repr(u8)]
pub(crate) enum TaskState {
    Created = 0,
    Queued = 1,
    Running = 2,
    Completed = 3,
    Failed = 4,
}

impl TaskState {
    fn from_u8(value: u8) -> Self {
        match value {
            0 => Self::Created,
            1 => Self::Queued,
            2 => Self::Running,
            3 => Self::Completed,
            _ => Self::Failed,
        }
    }
}

/// Metadata of a task, shared with the worker that runs it.
pub(crate) struct TaskHeader {
    id: u64,
    kind: TaskKind,
    created_by: ThreadRef,
    lock: Option<SubjectLock>,
    state: AtomicU8,
    processed_by: OnceLock<usize>,
}

impl TaskHeader {
    pub(crate) fn new(kind: TaskKind, created_by: ThreadRef, lock: Option<SubjectLock>) -> Self {
        Self {
            id: NEXT_TASK_ID.fetch_add(1, Ordering::Relaxed),
            kind,
            created_by,
            lock,
            state: AtomicU8::new(TaskState::Created as u8),
            processed_by: OnceLock::new(),
        }
    }

    pub(crate) fn id(&self) -> u64 {
        self.id
    }

    pub(crate) fn kind(&self) -> TaskKind {
        self.kind
    }

    pub(crate) fn created_by(&self) -> &ThreadRef {
        &self.created_by
    }

    /// Lock the task acquires when it runs, if any.
    pub(crate) fn lock(&self) -> Option<&SubjectLock> {
        self.lock.as_ref()
    }

    pub(crate) fn state(&self) -> TaskState {
        TaskState::from_u8(self.state.load(Ordering::Acquire))
    }

    pub(crate) fn set_state(&self, state: TaskState) {
        self.state.store(state as u8, Ordering::Release);
    }

    /// Worker that claimed the task, if it was claimed.
    pub(crate) fn processed_by(&self) -> Option<usize> {
        self.processed_by.get().copied()
    }
}

impl fmt::Debug for TaskHeader {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        // The creator is not printed: it may refer back to this very task.
        f.debug_struct("TaskHeader")
            .field("id", &self.id)
            .field("kind", &self.kind)
            .field("state", &self.state())
            .field("processed_by", &self.processed_by())
            .finish_non_exhaustive()
    }
}

/// A deferred port invocation.
///
/// A task is consumed when it runs; a task that is dropped without running
/// drops its job, which fails any future waiting on it.
pub(crate) struct Task {
    header: Arc<TaskHeader>,
    job: Job,
}

impl Task {
    /// Creates a task on behalf of the calling thread.
    pub(crate) fn new(kind: TaskKind, lock: Option<SubjectLock>, job: Job) -> Self {
        Self {
            header: Arc::new(TaskHeader::new(kind, ThreadRef::current(), lock)),
            job,
        }
    }

    pub(crate) fn header(&self) -> &Arc<TaskHeader> {
        &self.header
    }

    /// Runs the job, catching any panic.
    ///
    /// A failed event task is reported to the diagnostics sink since nobody
    /// else will see the failure. Request jobs hand their failure to their
    /// future and are only traced.
    pub(crate) fn run(self, worker_id: usize) {
        let header = self.header;
        let _ = header.processed_by.set(worker_id);
        header.set_state(TaskState::Running);

        let outcome = panic::catch_unwind(AssertUnwindSafe(self.job)).unwrap_or_else(|payload| {
            Err(PortsError::ExecutionFailure(panic_message(&*payload)))
        });

        match outcome {
            Ok(()) => header.set_state(TaskState::Completed),
            Err(err) => {
                header.set_state(TaskState::Failed);
                match header.kind() {
                    TaskKind::Event => {
                        diagnostics::error(format_args!("event task {} failed: {err}", header.id()))
                    }
                    TaskKind::Request => {
                        tracing::debug!(target: "ports", task = header.id(), error = %err, "request task failed")
                    }
                }
            }
        }
    }
}

impl fmt::Debug for Task {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Task")
            .field("header", &self.header)
            .finish_non_exhaustive()
    }
}
