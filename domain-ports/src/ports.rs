//! Event and request ports.
//!
//! Components expose their OUT ports as public member variables. An
//! [`Event`] port broadcasts a payload to any number of receivers, while a
//! [`Request`] port sends a payload to a single target and returns its reply.
//!
//! Ports hold their receivers through non-owning references, so connecting a
//! component to a port never extends its lifetime. How a message is delivered
//! is not decided by the port but by the [domain](crate::domain) each receiver
//! resolves to: the receiver either runs inline on the sender's thread, or as
//! a task on the domain's thread pool, guarded by the lock its domain's sync
//! policy requires.
//!
//! #### Example
//!
//! A sensor broadcasts its readings to a logger running on its own pool.
//!
//! ```
//! use std::sync::{Arc, Mutex};
//! use domain_ports::{DispatchPolicy, Domain, DomainManager, Event, SyncPolicy};
//!
//! pub struct Sensor {
//!     pub reading: Event<u32>,
//! }
//!
//! #[derive(Default)]
//! pub struct Logger {
//!     lines: Mutex<Vec<String>>,
//! }
//!
//! let manager = DomainManager::global();
//! let background = Domain::builder("background")
//!     .dispatch(DispatchPolicy::Parallel)
//!     .sync(SyncPolicy::ComponentSync)
//!     .max_pool_size(1)
//!     .build()?;
//!
//! let sensor = Sensor {
//!     reading: Event::owned_by::<Sensor>("reading"),
//! };
//! let logger = Arc::new(Logger::default());
//! manager.bind_instance(&logger, background.clone());
//! sensor.reading.connect(&logger, |logger, r| {
//!     logger.lines.lock().unwrap().push(format!("reading: {r}"))
//! });
//!
//! sensor.reading.trigger(12);
//! background.await_quiescence();
//! assert_eq!(*logger.lines.lock().unwrap(), vec!["reading: 12"]);
//!
//! manager.unbind_instance(&logger);
//! background.release();
//! # Ok::<(), domain_ports::PortsError>(())
//! ```

mod dispatch;
mod event;
mod in_port;
mod request;

pub use event::Event;
pub use in_port::{QueuePort, StackPort};
pub use request::Request;

/// Unique identifier for a connection between an event port and a receiver.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash)]
pub struct LineId(pub(crate) u64);
