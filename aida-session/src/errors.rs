//! Error taxonomy for connections and calls.
//!
//! [`Fault`] is the wire-encodable dispatch failure carried inside result
//! messages; [`CallError`] is what a client-side call resolves to;
//! [`ConnectionError`] is why a driver loop exited. No failure here
//! terminates the process: faults abort one message's dispatch, call errors
//! surface to the caller, connection errors end one connection.

use aida_wire::{OrbId, ProtocolError, TypeHash};

/// A dispatch failure encodable on the wire.
///
/// Carried in `CallResult`/`ConnectResult` bodies as an i64 code plus a
/// message string. All variants signal stub skew or stale state between
/// the endpoints rather than recoverable application conditions, except
/// [`Handler`](Self::Handler) which wraps an application-raised error.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Fault {
    /// No handler registered for the type hash.
    UnknownMethod(TypeHash),
    /// The target orb id resolves to nothing; the object was disposed.
    StaleObject(OrbId),
    /// Arity mismatch, kind mismatch, or misrouted message.
    Protocol(String),
    /// The method implementation failed.
    Handler(String),
}

impl Fault {
    /// The wire code for this fault.
    pub fn code(&self) -> i64 {
        match self {
            Self::UnknownMethod(_) => 1,
            Self::StaleObject(_) => 2,
            Self::Protocol(_) => 3,
            Self::Handler(_) => 4,
        }
    }

    /// The human-readable message carried next to the code.
    pub fn message(&self) -> String {
        match self {
            Self::UnknownMethod(hash) => format!("unknown method {hash}"),
            Self::StaleObject(orbid) => format!("stale object {orbid}"),
            Self::Protocol(msg) | Self::Handler(msg) => msg.clone(),
        }
    }

    /// Rebuild a fault from its wire form.
    ///
    /// Unknown codes map to [`Protocol`](Self::Protocol) so a newer peer
    /// cannot crash an older one.
    pub fn from_wire(code: i64, message: String) -> Self {
        match code {
            1 => Self::UnknownMethod(TypeHash::default()),
            2 => Self::StaleObject(OrbId::new(0)),
            4 => Self::Handler(message),
            _ => Self::Protocol(message),
        }
    }
}

impl From<ProtocolError> for Fault {
    fn from(e: ProtocolError) -> Self {
        Self::Protocol(e.to_string())
    }
}

impl std::fmt::Display for Fault {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::UnknownMethod(hash) => write!(f, "unknown method {hash}"),
            Self::StaleObject(orbid) => write!(f, "stale object {orbid}"),
            Self::Protocol(msg) => write!(f, "protocol violation: {msg}"),
            Self::Handler(msg) => write!(f, "handler fault: {msg}"),
        }
    }
}

impl std::error::Error for Fault {}

/// Error from making an outgoing call.
#[derive(Debug)]
pub enum CallError {
    /// The remote answered with a fault result.
    Fault(Fault),
    /// The result message could not be decoded.
    Protocol(ProtocolError),
    /// The connection closed before the result arrived.
    ConnectionClosed,
    /// The driver task is gone.
    DriverGone,
    /// The caller-side timeout elapsed before the result arrived.
    TimedOut,
}

impl std::fmt::Display for CallError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Fault(fault) => write!(f, "remote fault: {fault}"),
            Self::Protocol(e) => write!(f, "protocol error: {e}"),
            Self::ConnectionClosed => write!(f, "connection closed"),
            Self::DriverGone => write!(f, "driver task stopped"),
            Self::TimedOut => write!(f, "call timed out"),
        }
    }
}

impl std::error::Error for CallError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Fault(fault) => Some(fault),
            Self::Protocol(e) => Some(e),
            _ => None,
        }
    }
}

impl From<Fault> for CallError {
    fn from(fault: Fault) -> Self {
        Self::Fault(fault)
    }
}

impl From<ProtocolError> for CallError {
    fn from(e: ProtocolError) -> Self {
        Self::Protocol(e)
    }
}

/// Error that ended a connection's driver loop.
#[derive(Debug)]
pub enum ConnectionError {
    /// Transport I/O failed.
    Io(std::io::Error),
    /// The peer sent bytes that do not decode as a message.
    Protocol(ProtocolError),
}

impl std::fmt::Display for ConnectionError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Io(e) => write!(f, "IO error: {e}"),
            Self::Protocol(e) => write!(f, "protocol error: {e}"),
        }
    }
}

impl std::error::Error for ConnectionError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Io(e) => Some(e),
            Self::Protocol(e) => Some(e),
        }
    }
}

impl From<std::io::Error> for ConnectionError {
    fn from(e: std::io::Error) -> Self {
        Self::Io(e)
    }
}

impl From<ProtocolError> for ConnectionError {
    fn from(e: ProtocolError) -> Self {
        Self::Protocol(e)
    }
}
