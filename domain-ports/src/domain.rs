//! Scheduling domains.
//!
//! A domain decides how messages sent to the components bound to it are
//! delivered. Its [`DispatchPolicy`] selects between inline delivery on the
//! sender's thread and delivery on the domain's own thread pool, while its
//! [`SyncPolicy`] selects the scope of mutual exclusion of the receivers.
//!
//! Domains are bound to component instances, component types or namespaces
//! through the [`DomainManager`].

use std::fmt;
use std::hash::{Hash, Hasher};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, OnceLock};
use std::time::Duration;

mod manager;

pub use manager::DomainManager;

use crate::error::PortsError;
use crate::executor::{Executor, Task};

/// Upper bound of the pool size of a domain.
pub const MAX_POOL_SIZE: usize = 256;

/// Default time after which an idle worker retires.
pub const DEFAULT_IDLE_LIFETIME: Duration = Duration::from_secs(20);

static NEXT_DOMAIN_ID: AtomicU64 = AtomicU64::new(0);

/// Thread on which a receiver runs.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug)]
pub enum DispatchPolicy {
    /// The receiver runs inline, on the sender's thread.
    SameThread,
    /// The receiver runs on a worker of the domain's thread pool.
    Parallel,
}

/// Scope of mutual exclusion of receivers.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug)]
pub enum SyncPolicy {
    /// Receivers are not synchronized.
    Asynchronous,
    /// A component never handles two messages concurrently.
    ComponentSync,
    /// No two components of the domain handle messages concurrently.
    DomainSync,
}

struct DomainInner {
    id: u64,
    name: String,
    dispatch: DispatchPolicy,
    sync: SyncPolicy,
    max_pool_size: usize,
    idle_lifetime: Duration,
    executor: OnceLock<Executor>,
}

/// A scheduling domain.
///
/// A `Domain` is a cheap handle: clones refer to the same domain, and hence
/// to the same thread pool and the same domain lock.
///
/// ```
/// use domain_ports::{DispatchPolicy, Domain, SyncPolicy};
///
/// let domain = Domain::builder("billing")
///     .dispatch(DispatchPolicy::Parallel)
///     .sync(SyncPolicy::DomainSync)
///     .max_pool_size(2)
///     .build()?;
///
/// assert_eq!(domain.name(), "billing");
/// assert_eq!(domain.max_pool_size(), 2);
/// # Ok::<(), domain_ports::PortsError>(())
/// ```
#[derive(Clone)]
pub struct Domain {
    inner: Arc<DomainInner>,
}

impl Domain {
    /// Returns a builder of a domain with the given name.
    pub fn builder(name: impl Into<String>) -> DomainBuilder {
        DomainBuilder::new(name.into())
    }

    /// Creates a domain with default pool settings.
    pub fn new(
        name: impl Into<String>,
        dispatch: DispatchPolicy,
        sync: SyncPolicy,
    ) -> Result<Self, PortsError> {
        Self::builder(name).dispatch(dispatch).sync(sync).build()
    }

    /// Unique identifier of the domain.
    pub fn id(&self) -> u64 {
        self.inner.id
    }

    /// Name of the domain.
    pub fn name(&self) -> &str {
        &self.inner.name
    }

    /// Dispatch policy of the domain.
    pub fn dispatch_policy(&self) -> DispatchPolicy {
        self.inner.dispatch
    }

    /// Sync policy of the domain.
    pub fn sync_policy(&self) -> SyncPolicy {
        self.inner.sync
    }

    /// Maximum number of permanent workers of the domain's pool.
    pub fn max_pool_size(&self) -> usize {
        self.inner.max_pool_size
    }

    /// Time after which an idle worker of the domain's pool retires.
    pub fn idle_lifetime(&self) -> Duration {
        self.inner.idle_lifetime
    }

    /// Returns the thread pool of a parallel domain, creating it on first
    /// use, or `None` for a same-thread domain.
    pub fn executor(&self) -> Option<&Executor> {
        match self.inner.dispatch {
            DispatchPolicy::SameThread => None,
            DispatchPolicy::Parallel => Some(self.inner.executor.get_or_init(|| {
                Executor::new(
                    format!("ports-worker-{}", self.inner.name),
                    self.inner.max_pool_size,
                    self.inner.idle_lifetime,
                )
            })),
        }
    }

    /// Queues a task on the domain's pool.
    pub(crate) fn submit(&self, task: Task) -> Result<(), PortsError> {
        match self.executor() {
            Some(executor) => executor.submit(task),
            None => Err(PortsError::IllegalState(format!(
                "domain {} has no thread pool",
                self.inner.name
            ))),
        }
    }

    /// Blocks until the domain's pool has no queued or running task.
    ///
    /// Returns immediately if the pool was never started.
    pub fn await_quiescence(&self) {
        if let Some(executor) = self.inner.executor.get() {
            executor.await_quiescence();
        }
    }

    /// Blocks until the domain's pool has no queued or running task, or until
    /// the timeout elapses.
    pub fn await_quiescence_timeout(&self, timeout: Duration) -> Result<(), PortsError> {
        match self.inner.executor.get() {
            Some(executor) => executor.await_quiescence_timeout(timeout),
            None => Ok(()),
        }
    }

    /// Returns `true` if the domain's pool has no queued or running task.
    pub fn is_quiescent(&self) -> bool {
        self.inner
            .executor
            .get()
            .map_or(true, Executor::is_quiescent)
    }

    /// Releases the domain's pool.
    ///
    /// A released domain can no longer deliver messages to its pool. This
    /// holds even if the pool was never started: its executor is then created
    /// in the released state, without any worker.
    pub fn release(&self) {
        if let Some(executor) = self.executor() {
            executor.release();
        }
    }
}

impl PartialEq for Domain {
    fn eq(&self, other: &Self) -> bool {
        self.inner.id == other.inner.id
    }
}

impl Eq for Domain {}

impl Hash for Domain {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.inner.id.hash(state);
    }
}

impl fmt::Debug for Domain {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Domain")
            .field("name", &self.inner.name)
            .field("dispatch", &self.inner.dispatch)
            .field("sync", &self.inner.sync)
            .field("max_pool_size", &self.inner.max_pool_size)
            .finish_non_exhaustive()
    }
}

/// Builder of a [`Domain`].
#[derive(Debug)]
pub struct DomainBuilder {
    name: String,
    dispatch: DispatchPolicy,
    sync: SyncPolicy,
    max_pool_size: usize,
    idle_lifetime: Duration,
}

impl DomainBuilder {
    fn new(name: String) -> Self {
        Self {
            name,
            dispatch: DispatchPolicy::SameThread,
            sync: SyncPolicy::ComponentSync,
            max_pool_size: num_cpus::get(),
            idle_lifetime: DEFAULT_IDLE_LIFETIME,
        }
    }

    /// Sets the dispatch policy; defaults to [`DispatchPolicy::SameThread`].
    pub fn dispatch(mut self, dispatch: DispatchPolicy) -> Self {
        self.dispatch = dispatch;
        self
    }

    /// Sets the sync policy; defaults to [`SyncPolicy::ComponentSync`].
    pub fn sync(mut self, sync: SyncPolicy) -> Self {
        self.sync = sync;
        self
    }

    /// Sets the maximum number of permanent workers; defaults to the number
    /// of logical CPUs.
    ///
    /// Sizes above [`MAX_POOL_SIZE`] are capped.
    pub fn max_pool_size(mut self, max_pool_size: usize) -> Self {
        self.max_pool_size = max_pool_size;
        self
    }

    /// Sets the time after which an idle worker retires; defaults to
    /// 20 seconds.
    pub fn idle_lifetime(mut self, idle_lifetime: Duration) -> Self {
        self.idle_lifetime = idle_lifetime;
        self
    }

    /// Builds the domain.
    ///
    /// Fails with [`PortsError::ArgumentInvalid`] if the name is empty or the
    /// pool size is zero.
    pub fn build(self) -> Result<Domain, PortsError> {
        if self.name.is_empty() {
            return Err(PortsError::ArgumentInvalid(
                "the domain name should not be empty".into(),
            ));
        }
        if self.max_pool_size == 0 {
            return Err(PortsError::ArgumentInvalid(format!(
                "the pool size of domain {} should be at least one",
                self.name
            )));
        }

        Ok(self.into_domain())
    }

    /// Builds the domain without validating the settings.
    pub(crate) fn into_domain(self) -> Domain {
        Domain {
            inner: Arc::new(DomainInner {
                id: NEXT_DOMAIN_ID.fetch_add(1, Ordering::Relaxed),
                name: self.name,
                dispatch: self.dispatch,
                sync: self.sync,
                max_pool_size: self.max_pool_size.clamp(1, MAX_POOL_SIZE),
                idle_lifetime: self.idle_lifetime,
                executor: OnceLock::new(),
            }),
        }
    }
}
