//! An in-process messaging runtime with typed ports and domain-scoped
//! scheduling.
//!
//! Components are plain values shared through an `Arc`. They communicate by
//! exposing OUT ports: an [`Event`] broadcasts a payload to any number of
//! receivers, and a [`Request`] sends a payload to one target and returns its
//! reply. Connecting a receiver never extends its lifetime.
//!
//! The thread a receiver runs on, and the mutual exclusion it is subject to,
//! are not decided by the sender but by the [`Domain`] of the receiver. Each
//! domain combines
//!
//! * a [`DispatchPolicy`]: [`SameThread`](DispatchPolicy::SameThread)
//!   receivers run inline on the sender's thread, while
//!   [`Parallel`](DispatchPolicy::Parallel) receivers run on the domain's own
//!   adaptive thread pool,
//! * a [`SyncPolicy`]: [`Asynchronous`](SyncPolicy::Asynchronous) receivers are
//!   not synchronized, [`ComponentSync`](SyncPolicy::ComponentSync) receivers
//!   never handle two messages concurrently, and
//!   [`DomainSync`](SyncPolicy::DomainSync) receivers share a single lock with
//!   every other component of their domain.
//!
//! Domains are bound to component instances, component types or namespaces
//! with the [`DomainManager`]. A receiver resolves to its instance binding,
//! else to its type binding, else to the binding of the longest namespace
//! prefix of its type path, and finally to the default same-thread,
//! component-synchronized domain.
//!
//! # A practical overview
//!
//! ## Declaring ports
//!
//! Ports are usually public fields of the component that sends through them:
//!
//! ```
//! use domain_ports::{Event, Request};
//!
//! pub struct Controller {
//!     pub setpoint: Event<f64>,
//!     pub measure: Request<(), f64>,
//! }
//!
//! impl Controller {
//!     pub fn new() -> Self {
//!         Self {
//!             setpoint: Event::owned_by::<Self>("setpoint"),
//!             measure: Request::owned_by::<Self>("measure"),
//!         }
//!     }
//! }
//! ```
//!
//! ## Wiring and scheduling
//!
//! Receivers are connected with a closure taking the receiver and the payload.
//! Binding the receiver to a parallel domain moves its handling to the domain's
//! thread pool:
//!
//! ```
//! use std::sync::{Arc, Mutex};
//! use std::time::Duration;
//! use domain_ports::{DispatchPolicy, Domain, Event, Request, SyncPolicy};
//!
//! #[derive(Default)]
//! struct Heater {
//!     power: Mutex<f64>,
//! }
//!
//! struct Probe;
//!
//! let workers = Domain::builder("heater-pool")
//!     .dispatch(DispatchPolicy::Parallel)
//!     .sync(SyncPolicy::ComponentSync)
//!     .max_pool_size(2)
//!     .build()?;
//!
//! let heater = Arc::new(Heater::default());
//! domain_ports::bind_instance(&heater, workers.clone());
//!
//! let setpoint = Event::<f64>::new("setpoint");
//! setpoint.connect(&heater, |heater, p| *heater.power.lock().unwrap() = *p);
//! setpoint.trigger(0.75);
//! workers.await_quiescence_timeout(Duration::from_secs(5))?;
//! assert_eq!(*heater.power.lock().unwrap(), 0.75);
//!
//! // Probes are not bound to any domain and thus run inline.
//! let measure = Request::<(), f64>::new("measure");
//! let probe = Arc::new(Probe);
//! measure.connect(&probe, |_, ()| 21.0);
//! assert_eq!(measure.call_async(()).get()?, 21.0);
//!
//! domain_ports::DomainManager::global().unbind_instance(&heater);
//! workers.release();
//! # Ok::<(), domain_ports::PortsError>(())
//! ```
//!
//! # Deadlock avoidance
//!
//! A request handled on a parallel domain may itself issue requests to the
//! same or to another parallel domain and block on their results. When a pool
//! is saturated with such blocked workers, the executor consults the
//! [`LockManager`], which walks the chain of task creators. If the chain loops
//! back into the saturated pool, or if a thread along the chain holds the lock
//! the new task needs, a temporary resolver worker is spawned to run the task.
//!
//! # Diagnostics
//!
//! Conditions that are not errors of the caller, such as an event fired
//! without receivers or a worker thread dying, are reported through a
//! [`Diagnostics`](diagnostics::Diagnostics) sink that logs with [`tracing`]
//! by default. See the [`diagnostics`] module.
#![warn(missing_docs, missing_debug_implementations, unreachable_pub)]

pub mod component;
pub mod diagnostics;
pub mod domain;
mod error;
pub mod executor;
pub mod fork;
pub mod future;
pub mod lock_manager;
pub(crate) mod macros;
pub mod ports;
pub(crate) mod util;

use std::sync::Arc;

pub use component::ComponentRef;
pub use diagnostics::{set_diagnostics, Diagnostics};
pub use domain::{DispatchPolicy, Domain, DomainBuilder, DomainManager, SyncPolicy};
pub use error::PortsError;
pub use executor::Executor;
pub use fork::{Fork, Outcome};
pub use future::PortsFuture;
pub use lock_manager::{LockManager, LockSubject};
pub use ports::{Event, LineId, QueuePort, Request, StackPort};

/// Binds a component instance to a domain in the global manager.
pub fn bind_instance<C: Send + Sync + 'static>(component: &Arc<C>, domain: Domain) {
    DomainManager::global().bind_instance(component, domain);
}

/// Binds a component type to a domain in the global manager.
pub fn bind_type<C: ?Sized + 'static>(domain: Domain) {
    DomainManager::global().bind_type::<C>(domain);
}

/// Binds a namespace to a domain in the global manager.
pub fn bind_namespace(namespace: &str, domain: Domain) -> Result<(), PortsError> {
    DomainManager::global().bind_namespace(namespace, domain)
}

/// Blocks until the pools of every domain known to the global manager are
/// quiescent.
pub fn await_global_quiescence() {
    DomainManager::global().await_quiescence();
}

/// Releases the pools of every domain known to the global manager, clears all
/// bindings and forgets every lock.
///
/// Released domains can no longer deliver messages to their pool. This is
/// meant for process shutdown and for isolation between test suites.
pub fn release_all() {
    DomainManager::global().release();
    LockManager::global().reset();
}
