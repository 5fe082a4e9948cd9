//! Message transport abstraction.
//!
//! Connections are transport-agnostic: anything that delivers whole
//! [`FieldBuffer`] messages, in order and reliably, satisfies the
//! contract. `aida-stream` provides length-prefixed byte-stream framing
//! (TCP, Unix sockets) and an in-process pair for tests.

use std::future::Future;
use std::io;

use aida_wire::FieldBuffer;

/// A transport that can send and receive whole protocol messages.
///
/// `recv` returning `Ok(None)` means the peer closed the connection
/// cleanly; the driver then fails outstanding calls and exits without
/// error.
pub trait MessageTransport: Send {
    /// Send one message. Once handed over, the buffer belongs to the
    /// transport; the sender must not mutate it afterwards.
    fn send(&mut self, msg: &FieldBuffer) -> impl Future<Output = io::Result<()>> + Send;

    /// Receive the next message, or `None` on clean close.
    fn recv(&mut self) -> impl Future<Output = io::Result<Option<FieldBuffer>>> + Send;
}
