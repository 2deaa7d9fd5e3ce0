//! Result slots of asynchronous port calls.

use std::fmt;
use std::future::Future;
use std::mem;
use std::pin::Pin;
use std::sync::{Arc, Condvar, Mutex};
use std::task::{Context, Poll, Waker};
use std::time::{Duration, Instant};

use crate::error::PortsError;

type Callback<T> = Box<dyn FnOnce(Result<T, PortsError>) + Send>;

enum Stage<T> {
    Pending,
    Done(T),
    Failed(PortsError),
    Consumed,
}

struct Slot<T> {
    stage: Stage<T>,
    waker: Option<Waker>,
    callback: Option<Callback<T>>,
}

struct Shared<T> {
    slot: Mutex<Slot<T>>,
    cond: Condvar,
}

impl<T> Shared<T> {
    fn new(stage: Stage<T>) -> Arc<Self> {
        Arc::new(Self {
            slot: Mutex::new(Slot {
                stage,
                waker: None,
                callback: None,
            }),
            cond: Condvar::new(),
        })
    }

    fn complete(&self, result: Result<T, PortsError>) {
        let mut slot = self.slot.lock().unwrap();

        if let Some(callback) = slot.callback.take() {
            slot.stage = Stage::Consumed;
            drop(slot);
            callback(result);
            return;
        }

        slot.stage = match result {
            Ok(value) => Stage::Done(value),
            Err(err) => Stage::Failed(err),
        };
        let waker = slot.waker.take();
        drop(slot);

        self.cond.notify_all();
        if let Some(waker) = waker {
            waker.wake();
        }
    }
}

fn take_result<T>(stage: &mut Stage<T>) -> Result<T, PortsError> {
    match mem::replace(stage, Stage::Consumed) {
        Stage::Done(value) => Ok(value),
        Stage::Failed(err) => Err(err),
        Stage::Consumed => Err(PortsError::IllegalState(
            "the result was already taken".into(),
        )),
        Stage::Pending => unreachable!(),
    }
}

/// Creates a pending future and the handle that completes it.
pub(crate) fn promise<T>() -> (Completer<T>, PortsFuture<T>) {
    let shared = Shared::new(Stage::Pending);

    (
        Completer {
            shared: Some(shared.clone()),
        },
        PortsFuture { shared },
    )
}

/// Write end of a [`PortsFuture`].
///
/// A completer dropped before completion fails its future, so that a task
/// abandoned at release never leaves a caller blocked.
pub(crate) struct Completer<T> {
    shared: Option<Arc<Shared<T>>>,
}

impl<T> Completer<T> {
    pub(crate) fn ready(mut self, value: T) {
        self.complete(Ok(value));
    }

    pub(crate) fn failed(mut self, err: PortsError) {
        self.complete(Err(err));
    }

    fn complete(&mut self, result: Result<T, PortsError>) {
        if let Some(shared) = self.shared.take() {
            shared.complete(result);
        }
    }
}

impl<T> Drop for Completer<T> {
    fn drop(&mut self) {
        if self.shared.is_some() {
            self.complete(Err(PortsError::IllegalState(
                "task was dropped before it could run".into(),
            )));
        }
    }
}

/// The eventual result of an asynchronous port call.
///
/// The result can be retrieved exactly once, either by blocking with
/// [`get`](PortsFuture::get) or [`get_timeout`](PortsFuture::get_timeout), by
/// registering a callback with [`on_complete`](PortsFuture::on_complete), or
/// by awaiting the future from `async` code. A timed-out wait does not cancel
/// the underlying task.
///
/// ```
/// use domain_ports::PortsFuture;
///
/// let future = PortsFuture::ready(3);
/// assert!(future.is_done());
/// assert_eq!(future.get(), Ok(3));
/// ```
pub struct PortsFuture<T> {
    shared: Arc<Shared<T>>,
}

impl<T> PortsFuture<T> {
    /// Creates an already completed future.
    pub fn ready(value: T) -> Self {
        Self {
            shared: Shared::new(Stage::Done(value)),
        }
    }

    /// Creates an already failed future.
    pub fn failed(err: PortsError) -> Self {
        Self {
            shared: Shared::new(Stage::Failed(err)),
        }
    }

    /// Blocks until the result is available.
    pub fn get(self) -> Result<T, PortsError> {
        let mut slot = self.shared.slot.lock().unwrap();
        while matches!(slot.stage, Stage::Pending) {
            slot = self.shared.cond.wait(slot).unwrap();
        }

        take_result(&mut slot.stage)
    }

    /// Blocks until the result is available or the timeout elapses.
    ///
    /// On timeout the future remains pending and can be waited on again.
    pub fn get_timeout(&mut self, timeout: Duration) -> Result<T, PortsError> {
        let deadline = Instant::now() + timeout;
        let mut slot = self.shared.slot.lock().unwrap();
        while matches!(slot.stage, Stage::Pending) {
            let now = Instant::now();
            if now >= deadline {
                return Err(PortsError::TimeoutExceeded);
            }
            slot = self.shared.cond.wait_timeout(slot, deadline - now).unwrap().0;
        }

        take_result(&mut slot.stage)
    }

    /// Returns `true` if the result is available, or was already taken.
    pub fn is_done(&self) -> bool {
        !matches!(self.shared.slot.lock().unwrap().stage, Stage::Pending)
    }

    /// Returns a copy of the result if it is available, without consuming it.
    pub fn get_now(&self) -> Option<Result<T, PortsError>>
    where
        T: Clone,
    {
        match &self.shared.slot.lock().unwrap().stage {
            Stage::Pending => None,
            Stage::Done(value) => Some(Ok(value.clone())),
            Stage::Failed(err) => Some(Err(err.clone())),
            Stage::Consumed => Some(Err(PortsError::IllegalState(
                "the result was already taken".into(),
            ))),
        }
    }

    /// Registers a callback invoked with the result.
    ///
    /// The callback runs immediately on the current thread if the result is
    /// already available, or otherwise on the thread that completes the
    /// future.
    pub fn on_complete<F>(self, f: F)
    where
        F: FnOnce(Result<T, PortsError>) + Send + 'static,
    {
        let mut slot = self.shared.slot.lock().unwrap();
        if matches!(slot.stage, Stage::Pending) {
            slot.callback = Some(Box::new(f));
            return;
        }
        let result = take_result(&mut slot.stage);
        drop(slot);

        f(result);
    }
}

impl<T> Future for PortsFuture<T> {
    type Output = Result<T, PortsError>;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let mut slot = self.shared.slot.lock().unwrap();
        if !matches!(slot.stage, Stage::Pending) {
            return Poll::Ready(take_result(&mut slot.stage));
        }

        let stale = slot
            .waker
            .as_ref()
            .map_or(true, |waker| !waker.will_wake(cx.waker()));
        if stale {
            slot.waker = Some(cx.waker().clone());
        }

        Poll::Pending
    }
}

impl<T> fmt::Debug for PortsFuture<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = match self.shared.slot.lock().unwrap().stage {
            Stage::Pending => "pending",
            Stage::Done(_) => "done",
            Stage::Failed(_) => "failed",
            Stage::Consumed => "consumed",
        };
        f.debug_struct("PortsFuture").field("state", &state).finish()
    }
}
