use std::any::Any;
use std::error::Error;
use std::fmt;

/// Error returned by port, domain, executor and join operations.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum PortsError {
    /// A request port was called while no live target was connected.
    PortNotConnected {
        /// Name of the request port.
        port: String,
        /// Type path of the component owning the port.
        owner: &'static str,
    },
    /// A receiver invoked from a task panicked.
    ///
    /// The payload is the panic message, if it could be extracted.
    ExecutionFailure(String),
    /// A blocking wait exceeded its allotted time.
    TimeoutExceeded,
    /// An argument passed to a connect, bind or build operation is invalid.
    ArgumentInvalid(String),
    /// The operation is not possible in the current state, e.g. because the
    /// target executor was released.
    IllegalState(String),
}

impl fmt::Display for PortsError {
    fn fmt(&self, fmt: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::PortNotConnected { port, owner } => {
                write!(fmt, "port {port} of component {owner} is not connected")
            }
            Self::ExecutionFailure(msg) => write!(fmt, "the receiver failed: {msg}"),
            Self::TimeoutExceeded => write!(fmt, "the wait timed out"),
            Self::ArgumentInvalid(msg) => write!(fmt, "invalid argument: {msg}"),
            Self::IllegalState(msg) => write!(fmt, "illegal state: {msg}"),
        }
    }
}

impl Error for PortsError {}

/// Extracts a printable message from a panic payload.
pub(crate) fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(msg) = payload.downcast_ref::<&str>() {
        (*msg).to_owned()
    } else if let Some(msg) = payload.downcast_ref::<String>() {
        msg.clone()
    } else {
        "opaque panic payload".to_owned()
    }
}
