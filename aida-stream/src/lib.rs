//! Byte-stream transports for the Aida remote-object protocol.
//!
//! This crate runs `aida-session` connections over async byte streams:
//!
//! - 4-byte little-endian length-prefixed framing, one message per frame
//! - [`accept`]/[`connect`] entry points pairing a framed stream with the
//!   session driver
//! - [`memory_pair`] for in-process connections in tests and examples
//!
//! ```ignore
//! use aida_stream::{accept, StreamConfig};
//! use tokio::net::TcpListener;
//!
//! let listener = TcpListener::bind("127.0.0.1:9000").await?;
//! let (stream, _) = listener.accept().await?;
//! let (handle, driver) = accept(stream, StreamConfig::default());
//! tokio::spawn(driver.run());
//! ```

#![deny(unsafe_code)]

mod framing;

use std::io;
use std::sync::Arc;

use tokio::io::{AsyncRead, AsyncWrite, DuplexStream};
use tokio::net::{TcpStream, ToSocketAddrs};

use aida_session::{
    establish, ConnectionConfig, ConnectionHandle, Driver, MethodRegistry, ObjectRegistry,
    RemoteObject,
};

pub use framing::FramedStream;

// Re-export session types so transport users need only this crate.
pub use aida_session::{CallError, ConnectionError, Fault, MessageTransport, RemoteHandle};

/// Everything one endpoint brings to a connection.
///
/// The default is a pure client: no methods, an empty registry, no root
/// object.
pub struct StreamConfig {
    /// Connection and routing ids.
    pub connection: ConnectionConfig,
    /// Method implementations dispatched for incoming calls.
    pub methods: MethodRegistry,
    /// The orb-id table for objects this endpoint exposes.
    pub registry: Arc<ObjectRegistry>,
    /// Object answered to the peer's connect handshake.
    pub root: Option<Arc<dyn RemoteObject>>,
}

impl Default for StreamConfig {
    fn default() -> Self {
        Self {
            connection: ConnectionConfig::default(),
            methods: MethodRegistry::new(),
            registry: Arc::new(ObjectRegistry::new()),
            root: None,
        }
    }
}

impl StreamConfig {
    /// A server-side config exposing `root` to connecting peers.
    pub fn with_root(methods: MethodRegistry, root: Arc<dyn RemoteObject>) -> Self {
        let registry = Arc::new(ObjectRegistry::new());
        registry.register(&root);
        Self {
            connection: ConnectionConfig::default(),
            methods,
            registry,
            root: Some(root),
        }
    }
}

impl std::fmt::Debug for StreamConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StreamConfig")
            .field("connection", &self.connection)
            .field("has_root", &self.root.is_some())
            .finish()
    }
}

/// Set up a connection over an accepted byte stream.
///
/// The driver must be spawned for traffic to flow.
pub fn accept<S>(stream: S, config: StreamConfig) -> (ConnectionHandle, Driver<FramedStream<S>>)
where
    S: AsyncRead + AsyncWrite + Unpin + Send,
{
    establish(
        FramedStream::new(stream),
        config.connection,
        config.methods,
        config.registry,
        config.root,
    )
}

/// Connect to a TCP peer and set up a connection over the stream.
pub async fn connect<A>(
    addr: A,
    config: StreamConfig,
) -> io::Result<(ConnectionHandle, Driver<FramedStream<TcpStream>>)>
where
    A: ToSocketAddrs,
{
    let stream = TcpStream::connect(addr).await?;
    stream.set_nodelay(true)?;
    Ok(accept(stream, config))
}

/// An in-process connected pair of byte streams.
///
/// Feed each end to [`accept`] to wire two endpoints together without a
/// socket.
pub fn memory_pair() -> (DuplexStream, DuplexStream) {
    tokio::io::duplex(64 * 1024)
}
