use std::fmt;
use std::panic::{self, AssertUnwindSafe};
use std::sync::{Arc, Mutex, Weak};

use crate::component::ComponentRef;
use crate::domain::DispatchPolicy;
use crate::error::{panic_message, PortsError};
use crate::executor::{Task, TaskKind};
use crate::fork::Fork;
use crate::future::{promise, PortsFuture};

use super::dispatch::{guard_lock, owner_path, run_guarded, CachedDomain, Owner};

type Handler<I, O> = Box<dyn Fn(I) -> Option<O> + Send + Sync>;

struct Target<I, O> {
    receiver: ComponentRef,
    // Returns `None` if the receiver was dropped.
    handler: Handler<I, O>,
    domain: CachedDomain,
}

/// A request port connected to at most one target.
///
/// Connecting a target replaces the previous one. Like event ports, request
/// ports only hold a non-owning reference to their target.
///
/// ```
/// use std::sync::Arc;
/// use domain_ports::Request;
///
/// struct Calculator;
///
/// impl Calculator {
///     fn square(&self, x: u64) -> u64 {
///         x * x
///     }
/// }
///
/// let square = Request::<u64, u64>::new("square");
/// let calculator = Arc::new(Calculator);
/// square.connect(&calculator, Calculator::square);
///
/// assert_eq!(square.call(7)?, 49);
/// assert_eq!(square.call_async(8).get()?, 64);
/// assert_eq!(square.fork([1, 2, 3]).get_all()?, vec![1, 4, 9]);
/// # Ok::<(), domain_ports::PortsError>(())
/// ```
pub struct Request<I, O> {
    name: String,
    owner: Option<Owner>,
    target: Mutex<Option<Arc<Target<I, O>>>>,
}

impl<I: Send + 'static, O: Send + 'static> Request<I, O> {
    /// Creates a request port with no known owner.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            owner: None,
            target: Mutex::new(None),
        }
    }

    /// Creates a request port declared by a component of type `C`.
    pub fn owned_by<C: ?Sized + 'static>(name: impl Into<String>) -> Self {
        Self {
            owner: Some(Owner::of::<C>()),
            ..Self::new(name)
        }
    }

    /// Name of the port.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Connects the target, replacing any previous one.
    pub fn connect<C, F>(&self, receiver: &Arc<C>, handler: F)
    where
        C: Send + Sync + 'static,
        F: Fn(&C, I) -> O + Send + Sync + 'static,
    {
        self.set_target(Arc::downgrade(receiver), handler);
    }

    /// Connects a target designated by a weak reference.
    ///
    /// Fails with [`PortsError::ArgumentInvalid`] if the target was already
    /// dropped.
    pub fn connect_weak<C, F>(&self, receiver: &Weak<C>, handler: F) -> Result<(), PortsError>
    where
        C: Send + Sync + 'static,
        F: Fn(&C, I) -> O + Send + Sync + 'static,
    {
        if receiver.strong_count() == 0 {
            return Err(PortsError::ArgumentInvalid(format!(
                "the target connected to request {} has been dropped",
                self.name
            )));
        }
        self.set_target(receiver.clone(), handler);

        Ok(())
    }

    fn set_target<C, F>(&self, receiver: Weak<C>, handler: F)
    where
        C: Send + Sync + 'static,
        F: Fn(&C, I) -> O + Send + Sync + 'static,
    {
        let component = ComponentRef::from_weak(&receiver);
        let handler: Handler<I, O> = Box::new(move |payload| {
            receiver
                .upgrade()
                .map(|receiver| handler(&receiver, payload))
        });

        *self.target.lock().unwrap() = Some(Arc::new(Target {
            receiver: component,
            handler,
            domain: CachedDomain::default(),
        }));
    }

    /// Removes the target.
    pub fn disconnect(&self) {
        *self.target.lock().unwrap() = None;
    }

    /// Returns `true` if a live target is connected.
    pub fn is_connected(&self) -> bool {
        let mut target = self.target.lock().unwrap();
        if target.as_ref().is_some_and(|t| !t.receiver.is_alive()) {
            *target = None;
        }

        target.is_some()
    }

    fn live_target(&self) -> Result<Arc<Target<I, O>>, PortsError> {
        self.target
            .lock()
            .unwrap()
            .as_ref()
            .filter(|target| target.receiver.is_alive())
            .cloned()
            .ok_or_else(|| self.not_connected())
    }

    fn not_connected(&self) -> PortsError {
        PortsError::PortNotConnected {
            port: self.name.clone(),
            owner: owner_path(self.owner),
        }
    }

    /// Calls the target on the current thread and returns its reply.
    ///
    /// The call bypasses domain routing. A panic of the target propagates to
    /// the caller.
    pub fn call(&self, payload: I) -> Result<O, PortsError> {
        let target = self.live_target()?;

        (target.handler)(payload).ok_or_else(|| self.not_connected())
    }

    /// Calls the target according to its domain and returns a future of the
    /// reply.
    ///
    /// For a same-thread domain the call runs before this method returns and
    /// the future is already complete; for a parallel domain the call is
    /// queued on the domain's pool. The target is guarded as its domain's
    /// sync policy requires. A panic of the target is captured as a
    /// [`PortsError::ExecutionFailure`].
    pub fn call_async(&self, payload: I) -> PortsFuture<O> {
        let target = match self.live_target() {
            Ok(target) => target,
            Err(err) => return PortsFuture::failed(err),
        };
        let domain = target.domain.resolve(&target.receiver);
        let lock = guard_lock(&domain, &target.receiver);
        let not_connected = self.not_connected();

        if domain.dispatch_policy() == DispatchPolicy::SameThread {
            let result = panic::catch_unwind(AssertUnwindSafe(|| {
                run_guarded(lock.as_ref(), || (target.handler)(payload))
            }));

            return match result {
                Ok(Some(reply)) => PortsFuture::ready(reply),
                Ok(None) => PortsFuture::failed(not_connected),
                Err(panic) => {
                    PortsFuture::failed(PortsError::ExecutionFailure(panic_message(&*panic)))
                }
            };
        }

        let (completer, future) = promise();
        let job = Box::new({
            let lock = lock.clone();
            move || {
                let result = panic::catch_unwind(AssertUnwindSafe(|| {
                    run_guarded(lock.as_ref(), || (target.handler)(payload))
                }));
                match result {
                    Ok(Some(reply)) => {
                        completer.ready(reply);
                        Ok(())
                    }
                    Ok(None) => {
                        completer.failed(not_connected.clone());
                        Err(not_connected)
                    }
                    Err(panic) => {
                        let err = PortsError::ExecutionFailure(panic_message(&*panic));
                        completer.failed(err.clone());
                        Err(err)
                    }
                }
            }
        });

        match domain.submit(Task::new(TaskKind::Request, lock, job)) {
            Ok(()) => future,
            Err(err) => PortsFuture::failed(err),
        }
    }

    /// Issues one asynchronous call per payload and joins them.
    pub fn fork(&self, payloads: impl IntoIterator<Item = I>) -> Fork<O> {
        payloads
            .into_iter()
            .map(|payload| self.call_async(payload))
            .collect()
    }
}

impl<I, O> fmt::Debug for Request<I, O> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Request")
            .field("name", &self.name)
            .field("owner", &owner_path(self.owner))
            .finish_non_exhaustive()
    }
}
