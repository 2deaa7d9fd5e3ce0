//! Per-subject locks and deadlock detection.
//!
//! Every synchronization subject, i.e. a component instance or a domain, is
//! associated with exactly one reentrant lock, created on first use. The
//! manager also tracks which thread holds which lock: pool workers record
//! their locks on their own worker state while other threads are tracked in a
//! per-thread table. This information is used by the executor to find out
//! whether a request chain is about to deadlock on a saturated pool.

use std::collections::HashMap;
use std::fmt;
use std::marker::PhantomData;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Condvar, Mutex, OnceLock};
use std::thread::{self, ThreadId};

use crate::component::ComponentRef;
use crate::domain::Domain;
use crate::executor::{TaskHeader, ThreadRef};

static NEXT_LOCK_ID: AtomicU64 = AtomicU64::new(0);

/// Subject of mutual exclusion.
#[derive(Clone, Debug)]
pub enum LockSubject {
    /// A single component instance.
    Component(ComponentRef),
    /// A whole domain, shared by every component bound to it.
    Domain(Domain),
}

impl LockSubject {
    fn key(&self) -> SubjectKey {
        match self {
            Self::Component(component) => SubjectKey::Component(component.addr()),
            Self::Domain(domain) => SubjectKey::Domain(domain.id()),
        }
    }
}

#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug)]
enum SubjectKey {
    Component(usize),
    Domain(u64),
}

struct LockState {
    owner: Option<ThreadId>,
    depth: usize,
}

struct LockInner {
    id: u64,
    state: Mutex<LockState>,
    cond: Condvar,
}

/// A reentrant, non-fair lock associated to a subject.
///
/// Cloning the handle yields the same lock.
#[derive(Clone)]
pub struct SubjectLock {
    inner: Arc<LockInner>,
}

impl SubjectLock {
    fn new() -> Self {
        Self {
            inner: Arc::new(LockInner {
                id: NEXT_LOCK_ID.fetch_add(1, Ordering::Relaxed),
                state: Mutex::new(LockState {
                    owner: None,
                    depth: 0,
                }),
                cond: Condvar::new(),
            }),
        }
    }

    /// Unique identifier of the lock.
    pub fn id(&self) -> u64 {
        self.inner.id
    }

    /// Returns `true` if some thread holds the lock.
    pub fn is_locked(&self) -> bool {
        self.inner.state.lock().unwrap().owner.is_some()
    }

    /// Returns `true` if the current thread holds the lock.
    pub fn is_held_by_current_thread(&self) -> bool {
        self.inner.state.lock().unwrap().owner == Some(thread::current().id())
    }

    fn raw_lock(&self) {
        let me = thread::current().id();
        let mut state = self.inner.state.lock().unwrap();
        loop {
            match state.owner {
                None => {
                    state.owner = Some(me);
                    state.depth = 1;
                    return;
                }
                Some(owner) if owner == me => {
                    state.depth += 1;
                    return;
                }
                Some(_) => state = self.inner.cond.wait(state).unwrap(),
            }
        }
    }

    fn raw_try_lock(&self) -> bool {
        let me = thread::current().id();
        let mut state = self.inner.state.lock().unwrap();
        match state.owner {
            None => {
                state.owner = Some(me);
                state.depth = 1;
                true
            }
            Some(owner) if owner == me => {
                state.depth += 1;
                true
            }
            Some(_) => false,
        }
    }

    fn raw_unlock(&self) {
        // Unlocking runs from a guard destructor, possibly while unwinding, so
        // a poisoned state is recovered rather than unwrapped.
        let mut state = match self.inner.state.lock() {
            Ok(state) => state,
            Err(poisoned) => poisoned.into_inner(),
        };
        debug_assert_eq!(state.owner, Some(thread::current().id()));
        state.depth -= 1;
        if state.depth == 0 {
            state.owner = None;
            self.inner.cond.notify_one();
        }
    }
}

impl PartialEq for SubjectLock {
    fn eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }
}

impl Eq for SubjectLock {}

impl fmt::Debug for SubjectLock {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SubjectLock")
            .field("id", &self.inner.id)
            .finish_non_exhaustive()
    }
}

/// RAII guard of a held subject lock.
///
/// The holding is unrecorded and the lock released when the guard is dropped.
/// A guard cannot be sent to another thread.
#[must_use = "the lock is released as soon as the guard is dropped"]
pub struct SubjectGuard<'a> {
    manager: &'a LockManager,
    lock: SubjectLock,
    _not_send: PhantomData<*const ()>,
}

impl SubjectGuard<'_> {
    /// The lock held by this guard.
    pub fn lock(&self) -> &SubjectLock {
        &self.lock
    }
}

impl Drop for SubjectGuard<'_> {
    fn drop(&mut self) {
        self.manager.unrecord(&self.lock);
        self.lock.raw_unlock();
    }
}

impl fmt::Debug for SubjectGuard<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SubjectGuard")
            .field("lock", &self.lock)
            .finish_non_exhaustive()
    }
}

struct SubjectEntry {
    // Liveness probe of component subjects; `None` for domains.
    probe: Option<ComponentRef>,
    lock: SubjectLock,
}

impl SubjectEntry {
    fn is_stale(&self) -> bool {
        self.probe.as_ref().is_some_and(|probe| !probe.is_alive())
    }
}

/// Registry of subject locks and of their holders.
pub struct LockManager {
    subjects: Mutex<HashMap<SubjectKey, SubjectEntry>>,
    plain_threads: Mutex<HashMap<ThreadId, Vec<SubjectLock>>>,
    // Serializes deadlock detection against the recording of holdings.
    acquisition: Mutex<()>,
}

impl LockManager {
    /// Creates an empty manager.
    pub fn new() -> Self {
        Self {
            subjects: Mutex::new(HashMap::new()),
            plain_threads: Mutex::new(HashMap::new()),
            acquisition: Mutex::new(()),
        }
    }

    /// The process-wide manager used by port dispatch.
    pub fn global() -> &'static LockManager {
        static GLOBAL: OnceLock<LockManager> = OnceLock::new();

        GLOBAL.get_or_init(LockManager::new)
    }

    /// Returns the lock of a subject, creating it if necessary.
    ///
    /// Entries of components that were dropped are evicted whenever a new
    /// entry is inserted.
    pub fn get_or_create_lock(&self, subject: &LockSubject) -> SubjectLock {
        let key = subject.key();
        let mut subjects = self.subjects.lock().unwrap();

        if let Some(entry) = subjects.get(&key) {
            if !entry.is_stale() {
                return entry.lock.clone();
            }
        }

        subjects.retain(|_, entry| !entry.is_stale());

        let lock = SubjectLock::new();
        let probe = match subject {
            LockSubject::Component(component) => Some(component.clone()),
            LockSubject::Domain(_) => None,
        };
        subjects.insert(
            key,
            SubjectEntry {
                probe,
                lock: lock.clone(),
            },
        );

        lock
    }

    /// Acquires the lock of a subject, blocking until it is available.
    pub fn lock(&self, subject: &LockSubject) -> SubjectGuard<'_> {
        let lock = self.get_or_create_lock(subject);

        self.acquire(&lock)
    }

    /// Acquires the lock of a subject if it is immediately available.
    pub fn try_acquire(&self, subject: &LockSubject) -> Option<SubjectGuard<'_>> {
        let lock = self.get_or_create_lock(subject);
        if !lock.raw_try_lock() {
            return None;
        }
        self.record(&lock);

        Some(SubjectGuard {
            manager: self,
            lock,
            _not_send: PhantomData,
        })
    }

    /// Acquires an already resolved lock, blocking until it is available.
    pub(crate) fn acquire(&self, lock: &SubjectLock) -> SubjectGuard<'_> {
        lock.raw_lock();
        self.record(lock);

        SubjectGuard {
            manager: self,
            lock: lock.clone(),
            _not_send: PhantomData,
        }
    }

    /// Checks whether the thread that created a task waits, possibly
    /// transitively, on a worker of the target pool or holds the lock the
    /// task needs.
    ///
    /// The walk follows the chain of creators: as long as the current thread
    /// is a pool worker, it is deadlocked if it holds `wanted`; otherwise the
    /// walk steps to the creator of the task the worker is running, and a
    /// creator that belongs to the target pool closes a cycle. A worker that
    /// runs no task has finished in the meantime and breaks the chain. When
    /// the walk reaches a thread outside any pool, the chain is deadlocked iff
    /// that thread holds `wanted`.
    pub(crate) fn is_deadlocked(
        &self,
        task: &TaskHeader,
        target_group: usize,
        wanted: Option<&SubjectLock>,
    ) -> bool {
        let _acquisition = self.acquisition.lock().unwrap();

        let mut thread = task.created_by().clone();
        let mut visited = Vec::new();

        while let ThreadRef::Worker(worker) = thread {
            if wanted.is_some_and(|lock| worker.holds(lock)) {
                return true;
            }

            // A worker seen twice runs a task it created itself, so it cannot
            // be blocked on it.
            if visited.contains(&worker.id()) {
                return false;
            }
            visited.push(worker.id());

            let current = match worker.current_task() {
                Some(current) => current,
                None => return false,
            };

            thread = current.created_by().clone();
            if thread.group() == Some(target_group) {
                return true;
            }
        }

        let ThreadRef::Plain(thread_id) = thread else {
            return false;
        };
        match wanted {
            Some(lock) => self
                .plain_threads
                .lock()
                .unwrap()
                .get(&thread_id)
                .is_some_and(|locks| locks.contains(lock)),
            None => false,
        }
    }

    /// Drops every lock entry and every recorded holding.
    ///
    /// Locks that are currently held remain valid for their holders but are
    /// no longer associated to their subject.
    pub fn reset(&self) {
        let _acquisition = self.acquisition.lock().unwrap();
        self.subjects.lock().unwrap().clear();
        self.plain_threads.lock().unwrap().clear();
    }

    /// Number of subjects with a lock entry.
    pub fn subject_count(&self) -> usize {
        self.subjects.lock().unwrap().len()
    }

    fn record(&self, lock: &SubjectLock) {
        let _acquisition = self.acquisition.lock().unwrap();
        match ThreadRef::current() {
            ThreadRef::Worker(worker) => worker.add_lock(lock.clone()),
            ThreadRef::Plain(thread_id) => self
                .plain_threads
                .lock()
                .unwrap()
                .entry(thread_id)
                .or_default()
                .push(lock.clone()),
        }
    }

    fn unrecord(&self, lock: &SubjectLock) {
        // Runs from a guard destructor: poisoning is tolerated.
        let _acquisition = self.acquisition.lock();
        match ThreadRef::current() {
            ThreadRef::Worker(worker) => worker.remove_lock(lock),
            ThreadRef::Plain(thread_id) => {
                if let Ok(mut plain_threads) = self.plain_threads.lock() {
                    if let Some(locks) = plain_threads.get_mut(&thread_id) {
                        if let Some(pos) = locks.iter().rposition(|l| l == lock) {
                            locks.swap_remove(pos);
                        }
                        if locks.is_empty() {
                            plain_threads.remove(&thread_id);
                        }
                    }
                }
            }
        }
    }
}

impl Default for LockManager {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for LockManager {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LockManager")
            .field("subjects", &self.subject_count())
            .finish_non_exhaustive()
    }
}
