//! Connections: the client-side handle and the dispatch driver.
//!
//! A connection is the unit of isolation. [`establish`] splits it into a
//! cloneable [`ConnectionHandle`] for issuing calls and a [`Driver`] that
//! must be spawned; the driver owns the transport and processes one
//! message at a time, so per-connection ordering is exactly arrival order.
//!
//! Two-way calls suspend the calling task on a oneshot until the driver
//! matches the correlated result by call serial; the driver keeps pumping
//! other traffic meanwhile, so a call awaited from one task never starves
//! the result it is waiting for.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{mpsc, oneshot};
use tracing::{debug, trace, warn};

use aida_wire::{
    ConnectionId, FieldBuffer, MessageKind, OrbId, ProtocolError, TypeHash, Value,
};

use crate::dispatch::{Context, MethodRegistry};
use crate::errors::{CallError, ConnectionError, Fault};
use crate::registry::{ObjectRegistry, RemoteHandle, RemoteObject};
use crate::signals::{await_emit_result, SignalHandlerId, SignalRouter};
use crate::transport::MessageTransport;

const COMMAND_CHANNEL_SIZE: usize = 64;

/// Generates call serials for a connection.
///
/// Monotonically increasing, starting at 1, unique per connection; the
/// serial travels in the upper bits of the message id and is what the
/// pending-call map keys on.
pub struct SerialGenerator {
    next: AtomicU64,
}

impl SerialGenerator {
    /// Create a generator starting at 1.
    pub fn new() -> Self {
        Self {
            next: AtomicU64::new(1),
        }
    }

    /// Allocate the next serial.
    pub fn next(&self) -> u64 {
        self.next.fetch_add(1, Ordering::Relaxed)
    }
}

impl Default for SerialGenerator {
    fn default() -> Self {
        Self::new()
    }
}

/// Connection parameters.
#[derive(Debug, Clone)]
pub struct ConnectionConfig {
    /// Our id; incoming request-like messages routed to a different
    /// nonzero id are rejected.
    pub conn_id: ConnectionId,
    /// The peer's id, written into the routing slot of outgoing
    /// request-like messages. [`ConnectionId::ANY`] when unknown.
    pub peer_conn_id: ConnectionId,
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self {
            conn_id: ConnectionId::ANY,
            peer_conn_id: ConnectionId::ANY,
        }
    }
}

/// Commands from connection handles to the driver.
enum DriverMessage {
    Call {
        serial: u64,
        hash: TypeHash,
        target: OrbId,
        args: Vec<Value>,
        reply_tx: oneshot::Sender<Result<Option<Value>, CallError>>,
    },
    Oneway {
        hash: TypeHash,
        target: OrbId,
        args: Vec<Value>,
    },
    Connect {
        serial: u64,
        reply_tx: oneshot::Sender<Result<(OrbId, String), CallError>>,
    },
    EmitOneway {
        hash: TypeHash,
        handler: SignalHandlerId,
        args: Vec<Value>,
    },
    EmitTwoway {
        hash: TypeHash,
        handler: SignalHandlerId,
        emit_result_id: u64,
        args: Vec<Value>,
    },
    Disconnect {
        hash: TypeHash,
        handler: SignalHandlerId,
    },
}

/// Set up a connection over `io`.
///
/// Returns the handle for issuing calls and the driver future; the driver
/// must be spawned (or awaited) for any traffic to flow. `root` is the
/// object answered to the peer's `Connect` handshake; pass `None` on
/// pure-client connections.
pub fn establish<T>(
    io: T,
    config: ConnectionConfig,
    methods: MethodRegistry,
    registry: Arc<ObjectRegistry>,
    root: Option<Arc<dyn RemoteObject>>,
) -> (ConnectionHandle, Driver<T>)
where
    T: MessageTransport,
{
    let (command_tx, command_rx) = mpsc::channel(COMMAND_CHANNEL_SIZE);
    let signals = Arc::new(SignalRouter::new());
    let handle = ConnectionHandle {
        conn_id: config.conn_id,
        driver_tx: command_tx.clone(),
        serials: Arc::new(SerialGenerator::new()),
        signals: Arc::clone(&signals),
    };
    let driver = Driver {
        io,
        conn_id: config.conn_id,
        peer_conn_id: config.peer_conn_id,
        methods,
        registry,
        signals,
        root,
        command_rx,
        _command_tx: command_tx,
        pending_calls: HashMap::new(),
        pending_connects: HashMap::new(),
    };
    (handle, driver)
}

// ============================================================================
// ConnectionHandle - the client API
// ============================================================================

/// Cloneable handle for issuing calls and emissions on a connection.
///
/// All operations go through the driver's command channel, so they may be
/// used from any task. Every method resolves with [`CallError::DriverGone`]
/// once the driver has stopped.
#[derive(Clone)]
pub struct ConnectionHandle {
    conn_id: ConnectionId,
    driver_tx: mpsc::Sender<DriverMessage>,
    serials: Arc<SerialGenerator>,
    signals: Arc<SignalRouter>,
}

impl ConnectionHandle {
    /// This connection's id.
    pub fn conn_id(&self) -> ConnectionId {
        self.conn_id
    }

    /// Two-way call: send a `Call` and await the correlated `CallResult`.
    ///
    /// Returns the result value (`None` for void methods) or the fault the
    /// peer answered with.
    pub async fn call(
        &self,
        hash: TypeHash,
        target: OrbId,
        args: Vec<Value>,
    ) -> Result<Option<Value>, CallError> {
        let serial = self.serials.next();
        let (reply_tx, reply_rx) = oneshot::channel();
        self.driver_tx
            .send(DriverMessage::Call {
                serial,
                hash,
                target,
                args,
                reply_tx,
            })
            .await
            .map_err(|_| CallError::DriverGone)?;
        reply_rx.await.map_err(|_| CallError::DriverGone)?
    }

    /// [`call`](Self::call) with a caller-side deadline.
    ///
    /// The legacy protocol has no cancellation; the peer is not notified
    /// and a late result is discarded by the driver.
    pub async fn call_with_timeout(
        &self,
        hash: TypeHash,
        target: OrbId,
        args: Vec<Value>,
        timeout: Duration,
    ) -> Result<Option<Value>, CallError> {
        match tokio::time::timeout(timeout, self.call(hash, target, args)).await {
            Ok(outcome) => outcome,
            Err(_) => Err(CallError::TimedOut),
        }
    }

    /// Fire-and-forget call; returns once the message is queued.
    pub async fn call_oneway(
        &self,
        hash: TypeHash,
        target: OrbId,
        args: Vec<Value>,
    ) -> Result<(), CallError> {
        self.driver_tx
            .send(DriverMessage::Oneway { hash, target, args })
            .await
            .map_err(|_| CallError::DriverGone)
    }

    /// Handshake: obtain a handle to the peer's root object.
    pub async fn connect_root(&self) -> Result<RemoteHandle, CallError> {
        let serial = self.serials.next();
        let (reply_tx, reply_rx) = oneshot::channel();
        self.driver_tx
            .send(DriverMessage::Connect { serial, reply_tx })
            .await
            .map_err(|_| CallError::DriverGone)?;
        let (orbid, type_name) = reply_rx.await.map_err(|_| CallError::DriverGone)??;
        Ok(RemoteHandle::new(
            OrbId::new(0),
            orbid,
            type_name,
            self.clone(),
        ))
    }

    /// Register a local callback for emissions the peer will address to
    /// the returned id.
    pub fn connect_signal<F>(&self, handler: F) -> SignalHandlerId
    where
        F: Fn(&mut aida_wire::FieldReader<'_>) -> Result<Option<Value>, Fault>
            + Send
            + Sync
            + 'static,
    {
        self.signals.connect(handler)
    }

    /// Remove a locally registered signal handler. Idempotent.
    pub fn disconnect_signal(&self, id: SignalHandlerId) -> bool {
        self.signals.disconnect(id)
    }

    /// Emit a signal with no expected outcome.
    pub async fn emit_oneway(
        &self,
        hash: TypeHash,
        handler: SignalHandlerId,
        args: Vec<Value>,
    ) -> Result<(), CallError> {
        self.driver_tx
            .send(DriverMessage::EmitOneway {
                hash,
                handler,
                args,
            })
            .await
            .map_err(|_| CallError::DriverGone)
    }

    /// Emit a signal and await the peer handler's outcome.
    pub async fn emit_twoway(
        &self,
        hash: TypeHash,
        handler: SignalHandlerId,
        args: Vec<Value>,
    ) -> Result<Value, CallError> {
        self.emit_twoway_deferred(hash, handler, args)
            .await?
            .outcome()
            .await
    }

    /// Emit a signal, returning a ticket the outcome can be awaited on
    /// later. The registered waiter fires exactly once.
    pub async fn emit_twoway_deferred(
        &self,
        hash: TypeHash,
        handler: SignalHandlerId,
        args: Vec<Value>,
    ) -> Result<PendingEmit, CallError> {
        let (emit_result_id, rx) = self.signals.expect_result();
        let sent = self
            .driver_tx
            .send(DriverMessage::EmitTwoway {
                hash,
                handler,
                emit_result_id,
                args,
            })
            .await;
        if sent.is_err() {
            self.signals.abandon_result(emit_result_id);
            return Err(CallError::DriverGone);
        }
        Ok(PendingEmit { emit_result_id, rx })
    }

    /// Notify the peer to drop the signal-handler registration `id` in its
    /// table. The peer treats a repeat notification as a no-op.
    pub async fn send_disconnect(
        &self,
        hash: TypeHash,
        handler: SignalHandlerId,
    ) -> Result<(), CallError> {
        self.driver_tx
            .send(DriverMessage::Disconnect { hash, handler })
            .await
            .map_err(|_| CallError::DriverGone)
    }
}

impl std::fmt::Debug for ConnectionHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectionHandle")
            .field("conn_id", &self.conn_id)
            .finish()
    }
}

/// An outstanding two-way emission.
pub struct PendingEmit {
    emit_result_id: u64,
    rx: oneshot::Receiver<Result<Value, Fault>>,
}

impl PendingEmit {
    /// The correlation id the peer will tag its `EmitResult` with.
    pub fn emit_result_id(&self) -> u64 {
        self.emit_result_id
    }

    /// Await the peer handler's outcome.
    pub async fn outcome(self) -> Result<Value, CallError> {
        await_emit_result(self.rx).await
    }
}

// ============================================================================
// Driver - the per-connection dispatch loop
// ============================================================================

/// The connection driver: a future that pumps the transport and the
/// command channel until the peer closes or the transport fails.
///
/// Must be spawned or awaited. One instance per connection; it processes
/// exactly one message at a time, which is the ordering guarantee the
/// protocol promises.
pub struct Driver<T> {
    io: T,
    conn_id: ConnectionId,
    peer_conn_id: ConnectionId,
    methods: MethodRegistry,
    registry: Arc<ObjectRegistry>,
    signals: Arc<SignalRouter>,
    root: Option<Arc<dyn RemoteObject>>,
    command_rx: mpsc::Receiver<DriverMessage>,
    // Keeps the command channel open so `recv` pends instead of closing
    // while handles come and go.
    _command_tx: mpsc::Sender<DriverMessage>,
    pending_calls: HashMap<u64, oneshot::Sender<Result<Option<Value>, CallError>>>,
    pending_connects: HashMap<u64, oneshot::Sender<Result<(OrbId, String), CallError>>>,
}

impl<T> Driver<T>
where
    T: MessageTransport,
{
    /// Run until the peer closes the connection or the transport fails.
    ///
    /// On exit, every outstanding call and emit-result waiter resolves to
    /// [`CallError::ConnectionClosed`]; nothing blocks forever.
    pub async fn run(mut self) -> Result<(), ConnectionError> {
        let outcome = self.run_inner().await;
        self.fail_pending();
        outcome
    }

    async fn run_inner(&mut self) -> Result<(), ConnectionError> {
        loop {
            tokio::select! {
                cmd = self.command_rx.recv() => {
                    if let Some(cmd) = cmd {
                        self.handle_command(cmd).await?;
                    }
                }
                incoming = self.io.recv() => {
                    match incoming? {
                        Some(msg) => self.handle_message(msg).await?,
                        None => {
                            debug!(conn_id = self.conn_id.raw(), "peer closed connection");
                            return Ok(());
                        }
                    }
                }
            }
        }
    }

    async fn handle_command(&mut self, cmd: DriverMessage) -> Result<(), ConnectionError> {
        match cmd {
            DriverMessage::Call {
                serial,
                hash,
                target,
                args,
                reply_tx,
            } => {
                self.pending_calls.insert(serial, reply_tx);
                let mut msg = FieldBuffer::new_message(
                    MessageKind::Call,
                    serial,
                    self.peer_conn_id,
                    hash,
                    args.len() + 1,
                );
                msg.add(Value::Int64(target.raw() as i64));
                for arg in args {
                    msg.add(arg);
                }
                self.io.send(&msg).await?;
            }
            DriverMessage::Oneway { hash, target, args } => {
                let mut msg = FieldBuffer::new_message(
                    MessageKind::OnewayCall,
                    0,
                    self.peer_conn_id,
                    hash,
                    args.len() + 1,
                );
                msg.add(Value::Int64(target.raw() as i64));
                for arg in args {
                    msg.add(arg);
                }
                self.io.send(&msg).await?;
            }
            DriverMessage::Connect { serial, reply_tx } => {
                self.pending_connects.insert(serial, reply_tx);
                let msg = FieldBuffer::new_message(
                    MessageKind::Connect,
                    serial,
                    self.peer_conn_id,
                    TypeHash::default(),
                    0,
                );
                self.io.send(&msg).await?;
            }
            DriverMessage::EmitOneway {
                hash,
                handler,
                args,
            } => {
                let mut msg = FieldBuffer::new_message(
                    MessageKind::EmitOneway,
                    0,
                    self.peer_conn_id,
                    hash,
                    args.len() + 1,
                );
                msg.add(Value::Int64(handler.raw() as i64));
                for arg in args {
                    msg.add(arg);
                }
                self.io.send(&msg).await?;
            }
            DriverMessage::EmitTwoway {
                hash,
                handler,
                emit_result_id,
                args,
            } => {
                let mut msg = FieldBuffer::new_message(
                    MessageKind::EmitTwoway,
                    0,
                    self.peer_conn_id,
                    hash,
                    args.len() + 2,
                );
                msg.add(Value::Int64(handler.raw() as i64));
                msg.add(Value::Int64(emit_result_id as i64));
                for arg in args {
                    msg.add(arg);
                }
                self.io.send(&msg).await?;
            }
            DriverMessage::Disconnect { hash, handler } => {
                let mut msg = FieldBuffer::new_message(
                    MessageKind::Disconnect,
                    0,
                    self.peer_conn_id,
                    hash,
                    1,
                );
                msg.add(Value::Int64(handler.raw() as i64));
                self.io.send(&msg).await?;
            }
        }
        Ok(())
    }

    async fn handle_message(&mut self, msg: FieldBuffer) -> Result<(), ConnectionError> {
        // Header reads only fail on hand-crafted buffers; a bad header
        // aborts this message's dispatch, never the connection.
        let (kind, serial, routing, hash) = match Self::header_of(&msg) {
            Ok(parts) => parts,
            Err(e) => {
                warn!(conn_id = self.conn_id.raw(), error = %e, "dropping message with bad header");
                return Ok(());
            }
        };

        // Results are correlated by serial or emit-result id; only
        // request-like messages check the routing slot.
        let is_result = matches!(
            kind,
            MessageKind::CallResult | MessageKind::ConnectResult | MessageKind::EmitResult
        );
        if !is_result && !routing.is_any() && routing != self.conn_id {
            warn!(
                conn_id = self.conn_id.raw(),
                routed_to = routing.raw(),
                %kind,
                "message routed to a different connection"
            );
            if kind == MessageKind::Call {
                let fault = Fault::Protocol(format!("misrouted message for {routing}"));
                self.send_call_result(msg, serial, hash, Err(fault)).await?;
            }
            return Ok(());
        }

        trace!(conn_id = self.conn_id.raw(), %kind, serial, "dispatching message");

        match kind {
            MessageKind::Call | MessageKind::OnewayCall => {
                self.dispatch_call(kind, serial, hash, msg).await?;
            }
            MessageKind::CallResult => self.handle_call_result(serial, &msg),
            MessageKind::Connect => self.handle_connect(serial, hash, msg).await?,
            MessageKind::ConnectResult => self.handle_connect_result(serial, &msg),
            MessageKind::EmitOneway | MessageKind::EmitTwoway => {
                self.dispatch_emit(kind, hash, msg).await?;
            }
            MessageKind::EmitResult => self.handle_emit_result(&msg),
            MessageKind::Disconnect => self.handle_disconnect(&msg),
        }
        Ok(())
    }

    fn header_of(
        msg: &FieldBuffer,
    ) -> Result<(MessageKind, u64, ConnectionId, TypeHash), ProtocolError> {
        let msg_id = msg.msg_id()?;
        Ok((msg_id.kind()?, msg_id.serial(), msg.routing()?, msg.type_hash()?))
    }

    /// Server-side dispatch of `Call`/`OnewayCall`.
    async fn dispatch_call(
        &mut self,
        kind: MessageKind,
        serial: u64,
        hash: TypeHash,
        msg: FieldBuffer,
    ) -> Result<(), ConnectionError> {
        let outcome = {
            let mut reader = msg.reader();
            let mut invoke = || -> Result<Option<Value>, Fault> {
                reader.skip_header()?;
                let target = OrbId::new(reader.pop_u64()?);
                let obj = self
                    .registry
                    .resolve(target)
                    .ok_or(Fault::StaleObject(target))?;
                let handler = self.methods.lookup(hash).ok_or(Fault::UnknownMethod(hash))?;
                let cx = Context {
                    conn_id: self.conn_id,
                    kind,
                    serial,
                    hash,
                };
                handler(&cx, &obj, &mut reader)
            };
            invoke()
        };

        match kind {
            MessageKind::Call => self.send_call_result(msg, serial, hash, outcome).await,
            _ => {
                if let Err(fault) = outcome {
                    warn!(conn_id = self.conn_id.raw(), %hash, %fault, "one-way call dispatch failed");
                }
                Ok(())
            }
        }
    }

    /// Renew the request buffer into a `CallResult` and send it.
    async fn send_call_result(
        &mut self,
        mut msg: FieldBuffer,
        serial: u64,
        hash: TypeHash,
        outcome: Result<Option<Value>, Fault>,
    ) -> Result<(), ConnectionError> {
        msg.renew_into_result(MessageKind::CallResult, serial, hash)?;
        match outcome {
            Ok(value) => {
                msg.add(Value::Int64(0));
                if let Some(value) = value {
                    msg.add(value);
                }
            }
            Err(fault) => {
                warn!(conn_id = self.conn_id.raw(), %hash, serial, %fault, "call dispatch failed");
                msg.add(Value::Int64(fault.code()));
                msg.add(Value::String(fault.message()));
            }
        }
        self.io.send(&msg).await?;
        Ok(())
    }

    fn handle_call_result(&mut self, serial: u64, msg: &FieldBuffer) {
        let Some(reply_tx) = self.pending_calls.remove(&serial) else {
            // Late result after a timeout, or a serial we never issued.
            warn!(conn_id = self.conn_id.raw(), serial, "call result without pending call");
            return;
        };
        let outcome = Self::parse_result_body(msg);
        if reply_tx.send(outcome).is_err() {
            warn!(conn_id = self.conn_id.raw(), serial, "call waiter dropped before delivery");
        }
    }

    fn parse_result_body(msg: &FieldBuffer) -> Result<Option<Value>, CallError> {
        let mut reader = msg.reader();
        reader.skip_header()?;
        let code = reader.pop_int64()?;
        if code == 0 {
            match reader.remaining() {
                0 => Ok(None),
                1 => Ok(Some(reader.pop()?.clone())),
                found => Err(ProtocolError::ArityMismatch { expected: 1, found }.into()),
            }
        } else {
            let message = reader.pop_string()?;
            Err(CallError::Fault(Fault::from_wire(code, message)))
        }
    }

    /// Answer the `Connect` handshake with our root object.
    async fn handle_connect(
        &mut self,
        serial: u64,
        hash: TypeHash,
        mut msg: FieldBuffer,
    ) -> Result<(), ConnectionError> {
        msg.renew_into_result(MessageKind::ConnectResult, serial, hash)?;
        match &self.root {
            Some(root) => {
                let instance = self.registry.instance_value(root);
                msg.add(Value::Int64(0));
                msg.add(instance);
            }
            None => {
                let fault = Fault::StaleObject(OrbId::new(0));
                warn!(conn_id = self.conn_id.raw(), "connect handshake without a root object");
                msg.add(Value::Int64(fault.code()));
                msg.add(Value::String("no root object bound".into()));
            }
        }
        self.io.send(&msg).await?;
        Ok(())
    }

    fn handle_connect_result(&mut self, serial: u64, msg: &FieldBuffer) {
        let Some(reply_tx) = self.pending_connects.remove(&serial) else {
            warn!(conn_id = self.conn_id.raw(), serial, "connect result without pending connect");
            return;
        };
        let outcome = (|| -> Result<(OrbId, String), CallError> {
            let mut reader = msg.reader();
            reader.skip_header()?;
            let code = reader.pop_int64()?;
            if code != 0 {
                let message = reader.pop_string()?;
                return Err(CallError::Fault(Fault::from_wire(code, message)));
            }
            let (orbid, type_name) = reader.pop_instance()?;
            Ok((orbid, type_name.to_string()))
        })();
        let _ = reply_tx.send(outcome);
    }

    /// Deliver an `EmitOneway`/`EmitTwoway` to the registered handler.
    async fn dispatch_emit(
        &mut self,
        kind: MessageKind,
        hash: TypeHash,
        msg: FieldBuffer,
    ) -> Result<(), ConnectionError> {
        let (emit_result_id, outcome) = {
            let mut reader = msg.reader();
            let mut deliver = || -> Result<(Option<u64>, Option<Value>), Fault> {
                reader.skip_header()?;
                let handler = SignalHandlerId(reader.pop_u64()?);
                let emit_result_id = if kind == MessageKind::EmitTwoway {
                    Some(reader.pop_u64()?)
                } else {
                    None
                };
                let value = match self.signals.invoke(handler, &mut reader) {
                    Some(outcome) => outcome?,
                    None => {
                        // Emission for a handler that was already torn
                        // down; answer Untyped so the emitter never hangs.
                        warn!(conn_id = self.conn_id.raw(), %handler, "emission for unknown handler");
                        None
                    }
                };
                Ok((emit_result_id, value))
            };
            match deliver() {
                Ok((id, value)) => (id, Ok(value)),
                Err(fault) => {
                    warn!(conn_id = self.conn_id.raw(), %hash, %fault, "signal handler failed");
                    // Reconstruct the emit-result id so a two-way emitter
                    // still gets an answer.
                    let mut id = None;
                    if kind == MessageKind::EmitTwoway {
                        let mut reader = msg.reader();
                        if reader.skip_header().is_ok() && reader.skip().is_ok() {
                            id = reader.pop_u64().ok();
                        }
                    }
                    (id, Err(fault))
                }
            }
        };

        if kind == MessageKind::EmitTwoway {
            let Some(emit_result_id) = emit_result_id else {
                return Ok(());
            };
            let mut msg = msg;
            msg.renew_into_result(MessageKind::EmitResult, 0, hash)?;
            msg.add(Value::Int64(emit_result_id as i64));
            match outcome {
                Ok(value) => {
                    msg.add(Value::Int64(0));
                    msg.add(value.unwrap_or(Value::Untyped));
                }
                Err(fault) => {
                    msg.add(Value::Int64(fault.code()));
                    msg.add(Value::String(fault.message()));
                }
            }
            self.io.send(&msg).await?;
        }
        Ok(())
    }

    fn handle_emit_result(&mut self, msg: &FieldBuffer) {
        let parsed = (|| -> Result<(u64, Result<Value, Fault>), ProtocolError> {
            let mut reader = msg.reader();
            reader.skip_header()?;
            let emit_result_id = reader.pop_u64()?;
            let code = reader.pop_int64()?;
            let outcome = if code == 0 {
                if reader.remaining() > 0 {
                    Ok(reader.pop()?.clone())
                } else {
                    Ok(Value::Untyped)
                }
            } else {
                Err(Fault::from_wire(code, reader.pop_string()?))
            };
            Ok((emit_result_id, outcome))
        })();
        match parsed {
            Ok((emit_result_id, outcome)) => {
                if !self.signals.complete_result(emit_result_id, outcome) {
                    trace!(
                        conn_id = self.conn_id.raw(),
                        emit_result_id,
                        "late or duplicate emit result"
                    );
                }
            }
            Err(e) => {
                warn!(conn_id = self.conn_id.raw(), error = %e, "malformed emit result");
            }
        }
    }

    fn handle_disconnect(&mut self, msg: &FieldBuffer) {
        let handler = {
            let mut reader = msg.reader();
            reader.skip_header().and_then(|()| reader.pop_u64())
        };
        match handler {
            Ok(raw) => {
                // Idempotent by design of the router; a repeat disconnect
                // is a no-op, not an error.
                let removed = self.signals.disconnect(SignalHandlerId(raw));
                trace!(conn_id = self.conn_id.raw(), handler = raw, removed, "disconnect");
            }
            Err(e) => {
                warn!(conn_id = self.conn_id.raw(), error = %e, "malformed disconnect");
            }
        }
    }

    /// Resolve every outstanding waiter with a connection-lost error.
    fn fail_pending(&mut self) {
        for (_, reply_tx) in self.pending_calls.drain() {
            let _ = reply_tx.send(Err(CallError::ConnectionClosed));
        }
        for (_, reply_tx) in self.pending_connects.drain() {
            let _ = reply_tx.send(Err(CallError::ConnectionClosed));
        }
        self.signals.fail_pending_results();
    }
}

impl<T> std::fmt::Debug for Driver<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Driver")
            .field("conn_id", &self.conn_id)
            .field("pending_calls", &self.pending_calls.len())
            .finish()
    }
}
