use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, Weak};

use crate::component::ComponentRef;
use crate::diagnostics;
use crate::domain::{DispatchPolicy, Domain};
use crate::error::PortsError;
use crate::executor::{Task, TaskKind};
use crate::ports::{LineId, QueuePort, StackPort};

use super::dispatch::{guard_lock, owner_path, run_guarded, CachedDomain, Owner};

type Handler<T> = Box<dyn Fn(&T) -> bool + Send + Sync>;

struct Registration<T> {
    line_id: LineId,
    receiver: ComponentRef,
    wants_async: bool,
    // Returns `false` if the receiver was dropped.
    handler: Handler<T>,
    domain: CachedDomain,
}

/// An event port broadcasting payloads to any number of receivers.
///
/// Receivers are registered with a handler closure and a non-owning reference
/// to the receiving component: a registration never keeps its receiver alive,
/// and the registrations of dropped receivers are skipped and pruned.
///
/// When an event is triggered, each receiver is delivered according to the
/// domain it resolves to, the last connected receiver first.
///
/// ```
/// use std::sync::{Arc, Mutex};
/// use domain_ports::Event;
///
/// struct Thermostat {
///     temperature: Event<f64>,
/// }
///
/// #[derive(Default)]
/// struct Display {
///     shown: Mutex<Vec<f64>>,
/// }
///
/// let thermostat = Thermostat {
///     temperature: Event::owned_by::<Thermostat>("temperature"),
/// };
/// let display = Arc::new(Display::default());
/// thermostat
///     .temperature
///     .connect(&display, |display, t| display.shown.lock().unwrap().push(*t));
///
/// thermostat.temperature.trigger(21.5);
/// assert_eq!(*display.shown.lock().unwrap(), vec![21.5]);
/// ```
pub struct Event<T> {
    name: String,
    owner: Option<Owner>,
    registrations: Mutex<Vec<Arc<Registration<T>>>>,
    next_line_id: AtomicU64,
}

impl<T: Send + Sync + 'static> Event<T> {
    /// Creates an event port with no known owner.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            owner: None,
            registrations: Mutex::new(Vec::new()),
            next_line_id: AtomicU64::new(0),
        }
    }

    /// Creates an event port declared by a component of type `C`.
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

    /// Connects a receiver.
    pub fn connect<C, F>(&self, receiver: &Arc<C>, handler: F) -> LineId
    where
        C: Send + Sync + 'static,
        F: Fn(&C, &T) + Send + Sync + 'static,
    {
        self.register(Arc::downgrade(receiver), handler, false)
    }

    /// Connects a receiver that wants asynchronous handling.
    ///
    /// The flag is informational: delivery is governed by the receiver's
    /// domain.
    pub fn connect_async<C, F>(&self, receiver: &Arc<C>, handler: F) -> LineId
    where
        C: Send + Sync + 'static,
        F: Fn(&C, &T) + Send + Sync + 'static,
    {
        self.register(Arc::downgrade(receiver), handler, true)
    }

    /// Connects a receiver designated by a weak reference.
    ///
    /// Fails with [`PortsError::ArgumentInvalid`] if the receiver was already
    /// dropped.
    pub fn connect_weak<C, F>(&self, receiver: &Weak<C>, handler: F) -> Result<LineId, PortsError>
    where
        C: Send + Sync + 'static,
        F: Fn(&C, &T) + Send + Sync + 'static,
    {
        if receiver.strong_count() == 0 {
            return Err(PortsError::ArgumentInvalid(format!(
                "the receiver connected to event {} has been dropped",
                self.name
            )));
        }

        Ok(self.register(receiver.clone(), handler, false))
    }

    /// Connects a queue that collects a copy of every payload.
    pub fn connect_queue(&self, queue: &Arc<QueuePort<T>>) -> LineId
    where
        T: Clone,
    {
        self.connect(queue, |queue, payload: &T| queue.push(payload.clone()))
    }

    /// Connects a stack that collects a copy of every payload.
    pub fn connect_stack(&self, stack: &Arc<StackPort<T>>) -> LineId
    where
        T: Clone,
    {
        self.connect(stack, |stack, payload: &T| stack.push(payload.clone()))
    }

    fn register<C, F>(&self, receiver: Weak<C>, handler: F, wants_async: bool) -> LineId
    where
        C: Send + Sync + 'static,
        F: Fn(&C, &T) + Send + Sync + 'static,
    {
        let line_id = LineId(self.next_line_id.fetch_add(1, Ordering::Relaxed));
        let component = ComponentRef::from_weak(&receiver);
        let handler: Handler<T> = Box::new(move |payload: &T| match receiver.upgrade() {
            Some(receiver) => {
                handler(&receiver, payload);
                true
            }
            None => false,
        });

        let mut registrations = self.registrations.lock().unwrap();
        registrations.retain(|r| r.receiver.is_alive());
        registrations.push(Arc::new(Registration {
            line_id,
            receiver: component,
            wants_async,
            handler,
            domain: CachedDomain::default(),
        }));

        line_id
    }

    /// Removes the connection specified by the `LineId` parameter.
    ///
    /// Fails with [`PortsError::ArgumentInvalid`] if the line is not
    /// connected to this port.
    pub fn disconnect(&self, line_id: LineId) -> Result<(), PortsError> {
        let mut registrations = self.registrations.lock().unwrap();
        let pos = registrations.iter().position(|r| r.line_id == line_id);
        let removed = pos.map(|pos| registrations.remove(pos));
        registrations.retain(|r| r.receiver.is_alive());

        match removed {
            Some(_) => Ok(()),
            None => Err(PortsError::ArgumentInvalid(format!(
                "{line_id:?} is not connected to event {}",
                self.name
            ))),
        }
    }

    /// Removes all connections of a receiver and returns their count.
    pub fn disconnect_receiver<C: Send + Sync + 'static>(&self, receiver: &Arc<C>) -> usize {
        let mut registrations = self.registrations.lock().unwrap();
        let before = registrations.len();
        registrations.retain(|r| r.receiver.is_alive() && !r.receiver.refers_to(receiver));

        before - registrations.len()
    }

    /// Removes all connections.
    pub fn disconnect_all(&self) {
        self.registrations.lock().unwrap().clear();
    }

    /// Returns `true` if at least one live receiver is connected.
    pub fn is_connected(&self) -> bool {
        self.receiver_count() > 0
    }

    /// Number of live connections.
    pub fn receiver_count(&self) -> usize {
        let mut registrations = self.registrations.lock().unwrap();
        registrations.retain(|r| r.receiver.is_alive());

        registrations.len()
    }

    /// Returns `true` if the receiver on this line asked for asynchronous
    /// handling.
    pub fn wants_async(&self, line_id: LineId) -> Option<bool> {
        self.registrations
            .lock()
            .unwrap()
            .iter()
            .find(|r| r.line_id == line_id)
            .map(|r| r.wants_async)
    }

    /// Delivers a payload to every live receiver.
    ///
    /// Receivers are visited in reverse connection order. Each one is
    /// delivered according to its domain: inline before `trigger` returns for
    /// same-thread domains, or as a task on the domain's pool for parallel
    /// domains. Triggering an event without receiver only emits a warning.
    ///
    /// A panic of an inline receiver propagates to the caller.
    pub fn trigger(&self, payload: T) {
        self.broadcast(payload, false);
    }

    /// Delivers a payload to every live receiver on the current thread,
    /// whatever the dispatch policy of their domains.
    ///
    /// Synchronization policies still apply.
    pub fn trigger_inline(&self, payload: T) {
        self.broadcast(payload, true);
    }

    fn broadcast(&self, payload: T, force_inline: bool) {
        let receivers: Vec<_> = self
            .registrations
            .lock()
            .unwrap()
            .iter()
            .filter(|r| r.receiver.is_alive())
            .cloned()
            .collect();

        if receivers.is_empty() {
            diagnostics::warning(format_args!(
                "event {} was fired by component {} but there is no receiver",
                self.name,
                owner_path(self.owner)
            ));
            return;
        }

        if tracing::enabled!(target: "ports", tracing::Level::TRACE) {
            let sender_domain = self.owner.map(|owner| owner.domain());
            tracing::trace!(
                target: "ports",
                event = %self.name,
                sender_domain = sender_domain.as_ref().map_or("<unknown>", |d| d.name()),
                receivers = receivers.len(),
                "event triggered"
            );
        }

        let payload = Arc::new(payload);
        for registration in receivers.into_iter().rev() {
            let domain = registration.domain.resolve(&registration.receiver);
            self.deliver(&domain, registration, payload.clone(), force_inline);
        }
    }

    fn deliver(
        &self,
        domain: &Domain,
        registration: Arc<Registration<T>>,
        payload: Arc<T>,
        force_inline: bool,
    ) {
        let lock = guard_lock(domain, &registration.receiver);

        if force_inline || domain.dispatch_policy() == DispatchPolicy::SameThread {
            run_guarded(lock.as_ref(), || (registration.handler)(&payload));
            return;
        }

        let receiver_path = registration.receiver.type_path();
        let job = Box::new({
            let lock = lock.clone();
            move || {
                run_guarded(lock.as_ref(), || (registration.handler)(&payload));
                Ok::<(), PortsError>(())
            }
        });
        if let Err(err) = domain.submit(Task::new(TaskKind::Event, lock, job)) {
            diagnostics::warning(format_args!(
                "event {} could not be delivered to component {}: {err}",
                self.name, receiver_path
            ));
        }
    }
}

impl<T: Send + Sync + 'static> Default for Event<T> {
    fn default() -> Self {
        Self::new("event")
    }
}

impl<T> fmt::Debug for Event<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Event")
            .field("name", &self.name)
            .field("owner", &owner_path(self.owner))
            .field(
                "receivers",
                &self.registrations.lock().map_or(0, |r| r.len()),
            )
            .finish_non_exhaustive()
    }
}
