//! Warning and error reporting.
//!
//! The runtime never fails a send because nobody listens, and a worker thread
//! never unwinds because of a misbehaving receiver. Such conditions are
//! reported through a [`Diagnostics`] sink instead.
//!
//! The default sink forwards to [`tracing`] with the `ports` target, so that
//! any subscriber installed by the embedding application picks the reports up.
//!
//! A custom sink can be installed with [`set_diagnostics`], which is mostly
//! useful to assert on reports in tests or to route them to an application
//! specific console:
//!
//! ```
//! use domain_ports::diagnostics::{self, Diagnostics};
//!
//! struct Console;
//!
//! impl Diagnostics for Console {
//!     fn warning(&self, message: &str) {
//!         eprintln!("[ports] warning: {message}");
//!     }
//!     fn error(&self, message: &str) {
//!         eprintln!("[ports] error: {message}");
//!     }
//! }
//!
//! diagnostics::set_diagnostics(Console);
//! # diagnostics::reset_diagnostics();
//! ```

use std::fmt;
use std::sync::{Arc, RwLock};

/// A sink for runtime warnings and errors.
pub trait Diagnostics: Send + Sync {
    /// Reports a non-fatal condition, e.g. an event fired with no receiver.
    fn warning(&self, message: &str);

    /// Reports an unexpected failure, e.g. a worker thread that died.
    fn error(&self, message: &str);
}

/// The default sink, which emits `tracing` events with the `ports` target.
#[derive(Clone, Copy, Debug, Default)]
pub struct TracingDiagnostics;

impl Diagnostics for TracingDiagnostics {
    fn warning(&self, message: &str) {
        tracing::warn!(target: "ports", "{message}");
    }

    fn error(&self, message: &str) {
        tracing::error!(target: "ports", "{message}");
    }
}

static SINK: RwLock<Option<Arc<dyn Diagnostics>>> = RwLock::new(None);

/// Replaces the process-wide diagnostics sink.
pub fn set_diagnostics(sink: impl Diagnostics + 'static) {
    *SINK.write().unwrap() = Some(Arc::new(sink));
}

/// Restores the default [`TracingDiagnostics`] sink.
pub fn reset_diagnostics() {
    *SINK.write().unwrap() = None;
}

fn sink() -> Option<Arc<dyn Diagnostics>> {
    // The lock is not held while the sink runs so that a sink may itself
    // replace the sink or send messages.
    SINK.read().map(|sink| sink.clone()).unwrap_or(None)
}

pub(crate) fn warning(args: fmt::Arguments<'_>) {
    let message = args.to_string();
    match sink() {
        Some(sink) => sink.warning(&message),
        None => TracingDiagnostics.warning(&message),
    }
}

pub(crate) fn error(args: fmt::Arguments<'_>) {
    let message = args.to_string();
    match sink() {
        Some(sink) => sink.error(&message),
        None => TracingDiagnostics.error(&message),
    }
}
