//! Signal routing: the handler table for incoming emissions and the
//! correlation table for emit results travelling back.
//!
//! Handlers live in an owned map keyed by generated ids; removal is by id,
//! and removing an already-removed id is a no-op. The emitter side keeps a
//! oneshot per outstanding two-way emission; each emit-result id completes
//! exactly one waiter.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use aida_wire::{FieldReader, Value};
use tokio::sync::oneshot;

use crate::errors::{CallError, Fault};

/// Id of a signal handler registered with a [`SignalRouter`].
///
/// Generated per registration; ids are unique for the router's lifetime
/// and travel on the wire inside emit and disconnect messages.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(transparent)]
pub struct SignalHandlerId(pub u64);

impl SignalHandlerId {
    /// Get the raw u64 value.
    pub const fn raw(self) -> u64 {
        self.0
    }
}

impl From<u64> for SignalHandlerId {
    fn from(raw: u64) -> Self {
        Self(raw)
    }
}

impl std::fmt::Display for SignalHandlerId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "sig:{}", self.0)
    }
}

/// A signal callback invoked on emission delivery.
///
/// The reader is positioned at the first emission argument. The returned
/// value answers a two-way emission; one-way emissions discard it.
pub type SignalHandler =
    Arc<dyn Fn(&mut FieldReader<'_>) -> Result<Option<Value>, Fault> + Send + Sync>;

struct RouterInner {
    next_handler: u64,
    handlers: HashMap<u64, SignalHandler>,
    next_emit: u64,
    pending_results: HashMap<u64, oneshot::Sender<Result<Value, Fault>>>,
}

/// Per-connection signal state.
///
/// One router serves both roles: the handler table for emissions the peer
/// sends us, and the pending-result table for two-way emissions we sent.
pub struct SignalRouter {
    inner: Mutex<RouterInner>,
}

impl SignalRouter {
    /// Create an empty router.
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(RouterInner {
                next_handler: 1,
                handlers: HashMap::new(),
                next_emit: 1,
                pending_results: HashMap::new(),
            }),
        }
    }

    /// Register a callback; the returned id is what the peer addresses
    /// emissions to.
    pub fn connect<F>(&self, handler: F) -> SignalHandlerId
    where
        F: Fn(&mut FieldReader<'_>) -> Result<Option<Value>, Fault> + Send + Sync + 'static,
    {
        let mut inner = self.inner.lock().expect("signal router mutex poisoned");
        let id = inner.next_handler;
        inner.next_handler += 1;
        inner.handlers.insert(id, Arc::new(handler));
        SignalHandlerId(id)
    }

    /// Remove a handler. Idempotent: removing an unknown or already-removed
    /// id returns `false` and is not an error.
    pub fn disconnect(&self, id: SignalHandlerId) -> bool {
        let mut inner = self.inner.lock().expect("signal router mutex poisoned");
        inner.handlers.remove(&id.raw()).is_some()
    }

    /// Invoke the handler registered under `id` with the emission
    /// arguments. `None` when no such handler exists.
    pub fn invoke(
        &self,
        id: SignalHandlerId,
        reader: &mut FieldReader<'_>,
    ) -> Option<Result<Option<Value>, Fault>> {
        // Clone the handler out and release the lock before calling it, so
        // a handler may connect or disconnect signals on its own connection.
        let handler = {
            let inner = self.inner.lock().expect("signal router mutex poisoned");
            inner.handlers.get(&id.raw()).cloned()
        };
        handler.map(|handler| handler(reader))
    }

    /// Allocate an emit-result id and the waiter it will complete.
    pub fn expect_result(&self) -> (u64, oneshot::Receiver<Result<Value, Fault>>) {
        let mut inner = self.inner.lock().expect("signal router mutex poisoned");
        let id = inner.next_emit;
        inner.next_emit += 1;
        let (tx, rx) = oneshot::channel();
        inner.pending_results.insert(id, tx);
        (id, rx)
    }

    /// Deliver an emit result to its waiter. `false` for an unknown id
    /// (late or duplicate delivery); the waiter is invoked at most once.
    pub fn complete_result(&self, emit_result_id: u64, outcome: Result<Value, Fault>) -> bool {
        let tx = {
            let mut inner = self.inner.lock().expect("signal router mutex poisoned");
            inner.pending_results.remove(&emit_result_id)
        };
        match tx {
            Some(tx) => tx.send(outcome).is_ok(),
            None => false,
        }
    }

    /// Forget an emit-result id whose emission was never sent.
    pub fn abandon_result(&self, emit_result_id: u64) {
        let mut inner = self.inner.lock().expect("signal router mutex poisoned");
        inner.pending_results.remove(&emit_result_id);
    }

    /// Drop every pending emit-result waiter; their receivers resolve to
    /// [`CallError::ConnectionClosed`]. Called on connection teardown.
    pub fn fail_pending_results(&self) {
        let mut inner = self.inner.lock().expect("signal router mutex poisoned");
        inner.pending_results.clear();
    }

    /// Number of registered handlers.
    pub fn handler_count(&self) -> usize {
        self.inner
            .lock()
            .expect("signal router mutex poisoned")
            .handlers
            .len()
    }
}

impl Default for SignalRouter {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for SignalRouter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let inner = self.inner.lock().expect("signal router mutex poisoned");
        f.debug_struct("SignalRouter")
            .field("handlers", &inner.handlers.len())
            .field("pending_results", &inner.pending_results.len())
            .finish()
    }
}

/// Await an emit-result waiter, mapping a dropped sender to
/// [`CallError::ConnectionClosed`] and a remote handler failure to
/// [`CallError::Fault`].
pub(crate) async fn await_emit_result(
    rx: oneshot::Receiver<Result<Value, Fault>>,
) -> Result<Value, CallError> {
    match rx.await {
        Ok(Ok(value)) => Ok(value),
        Ok(Err(fault)) => Err(CallError::Fault(fault)),
        Err(_) => Err(CallError::ConnectionClosed),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use aida_wire::{ConnectionId, FieldBuffer, MessageKind, TypeHash};

    fn emission_with_args(args: Vec<Value>) -> FieldBuffer {
        let mut fb = FieldBuffer::new_message(
            MessageKind::EmitOneway,
            0,
            ConnectionId::ANY,
            TypeHash::new(7, 7),
            args.len(),
        );
        for arg in args {
            fb.add(arg);
        }
        fb
    }

    #[test]
    fn connect_invoke_disconnect() {
        let router = SignalRouter::new();
        let id = router.connect(|reader| {
            let n = reader.pop_int64().map_err(Fault::from)?;
            Ok(Some(Value::Bool(n > 0)))
        });

        let msg = emission_with_args(vec![Value::Int64(5)]);
        let mut reader = msg.reader();
        reader.skip_header().unwrap();
        let outcome = router.invoke(id, &mut reader).expect("handler registered");
        assert_eq!(outcome.unwrap(), Some(Value::Bool(true)));

        assert!(router.disconnect(id));
        assert_eq!(router.handler_count(), 0);
    }

    #[test]
    fn disconnect_is_idempotent() {
        let router = SignalRouter::new();
        let id = router.connect(|_| Ok(None));
        assert!(router.disconnect(id));
        assert!(!router.disconnect(id));
        assert!(!router.disconnect(SignalHandlerId(999)));
    }

    #[test]
    fn handler_may_disconnect_itself_during_invocation() {
        let router = Arc::new(SignalRouter::new());
        let self_id: Arc<Mutex<Option<SignalHandlerId>>> = Arc::new(Mutex::new(None));

        let id = {
            let inner_router = Arc::clone(&router);
            let self_id = Arc::clone(&self_id);
            router.connect(move |_| {
                let id = self_id.lock().unwrap().expect("id recorded before invoke");
                inner_router.disconnect(id);
                Ok(None)
            })
        };
        *self_id.lock().unwrap() = Some(id);

        let msg = emission_with_args(vec![]);
        let mut reader = msg.reader();
        reader.skip_header().unwrap();
        let outcome = router.invoke(id, &mut reader).expect("handler registered");
        assert_eq!(outcome.unwrap(), None);
        assert_eq!(router.handler_count(), 0);
        assert!(router.invoke(id, &mut reader).is_none());
    }

    #[test]
    fn unknown_handler_invocation_is_none() {
        let router = SignalRouter::new();
        let msg = emission_with_args(vec![]);
        let mut reader = msg.reader();
        reader.skip_header().unwrap();
        assert!(router.invoke(SignalHandlerId(1), &mut reader).is_none());
    }

    #[tokio::test]
    async fn emit_result_completes_waiter_exactly_once() {
        let router = SignalRouter::new();
        let (id, rx) = router.expect_result();
        assert!(router.complete_result(id, Ok(Value::Bool(true))));
        assert!(
            !router.complete_result(id, Ok(Value::Bool(false))),
            "duplicate delivery is dropped"
        );
        assert_eq!(await_emit_result(rx).await.unwrap(), Value::Bool(true));
    }

    #[tokio::test]
    async fn faulted_emit_result_resolves_to_call_fault() {
        let router = SignalRouter::new();
        let (id, rx) = router.expect_result();
        assert!(router.complete_result(id, Err(Fault::from_wire(4, "boom".into()))));
        match await_emit_result(rx).await {
            Err(CallError::Fault(fault)) => assert_eq!(fault.message(), "boom"),
            other => panic!("expected fault, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn failed_pending_results_resolve_to_connection_closed() {
        let router = SignalRouter::new();
        let (_id, rx) = router.expect_result();
        router.fail_pending_results();
        assert!(matches!(
            await_emit_result(rx).await,
            Err(CallError::ConnectionClosed)
        ));
    }
}
