//! Connections, object registry, and dispatch for the Aida remote-object
//! protocol.
//!
//! This crate turns the raw messages of `aida-wire` into remote calls:
//! each connection pairs a cloneable [`ConnectionHandle`] with a spawned
//! [`Driver`] that owns the transport, dispatches incoming calls against a
//! [`MethodRegistry`] and [`ObjectRegistry`], routes signal emissions
//! through a [`SignalRouter`], and correlates results back to suspended
//! callers. Dispatch is strictly one message at a time per connection;
//! concurrency comes from running many connections, not from reordering
//! one.

#![deny(unsafe_code)]

mod connection;
mod dispatch;
mod errors;
mod registry;
mod signals;
mod transport;


pub use connection::{
    establish, ConnectionConfig, ConnectionHandle, Driver, PendingEmit, SerialGenerator,
};
pub use dispatch::{Context, MethodHandler, MethodRegistry};
pub use errors::{CallError, ConnectionError, Fault};
pub use registry::{ObjectRegistry, RemoteHandle, RemoteObject};
pub use signals::{SignalHandler, SignalHandlerId, SignalRouter};
pub use transport::MessageTransport;
