//! Method dispatch: the registry generated server stubs populate and the
//! context handlers receive.

use std::collections::HashMap;
use std::sync::Arc;

use aida_wire::{ConnectionId, FieldReader, MessageKind, TypeHash, Value};

use crate::errors::Fault;
use crate::registry::RemoteObject;

/// Per-message context passed to method handlers.
///
/// Identifies the request so implementations can log or correlate; the
/// argument values come separately through the positioned reader.
#[derive(Debug, Clone, Copy)]
pub struct Context {
    /// The connection the message arrived on.
    pub conn_id: ConnectionId,
    /// The message kind ([`Call`](MessageKind::Call) or
    /// [`OnewayCall`](MessageKind::OnewayCall)).
    pub kind: MessageKind,
    /// The call serial (zero for one-way calls).
    pub serial: u64,
    /// The method's type hash.
    pub hash: TypeHash,
}

/// A method implementation invoked by the dispatch loop.
///
/// Receives the resolved target object and a reader positioned at the
/// first argument. Returns the result value (`None` for void), or a
/// [`Fault`] that aborts this message's dispatch only.
///
/// Handlers run synchronously on the connection's dispatch task, one
/// message at a time; that single-threading is what keeps per-connection
/// message ordering observable by applications.
pub type MethodHandler = Box<
    dyn Fn(&Context, &Arc<dyn RemoteObject>, &mut FieldReader<'_>) -> Result<Option<Value>, Fault>
        + Send
        + Sync,
>;

/// Table of method implementations keyed by type hash.
///
/// Generated server stubs register one handler per interface method at
/// connection setup; a lookup miss at dispatch time is stub/version skew
/// and surfaces as [`Fault::UnknownMethod`].
#[derive(Default)]
pub struct MethodRegistry {
    methods: HashMap<TypeHash, MethodHandler>,
}

impl MethodRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register the handler for a method hash, replacing any previous one.
    pub fn register<F>(&mut self, hash: TypeHash, handler: F)
    where
        F: Fn(&Context, &Arc<dyn RemoteObject>, &mut FieldReader<'_>) -> Result<Option<Value>, Fault>
            + Send
            + Sync
            + 'static,
    {
        self.methods.insert(hash, Box::new(handler));
    }

    /// Look up the handler for a hash.
    pub fn lookup(&self, hash: TypeHash) -> Option<&MethodHandler> {
        self.methods.get(&hash)
    }

    /// Number of registered methods.
    pub fn len(&self) -> usize {
        self.methods.len()
    }

    /// Whether no methods are registered.
    pub fn is_empty(&self) -> bool {
        self.methods.is_empty()
    }
}

impl std::fmt::Debug for MethodRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MethodRegistry")
            .field("methods", &self.methods.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use aida_wire::FieldBuffer;

    struct Dummy;

    impl RemoteObject for Dummy {
        fn type_name(&self) -> &str {
            "Test::Dummy"
        }

        fn as_any(&self) -> &dyn std::any::Any {
            self
        }
    }

    fn test_context(hash: TypeHash) -> Context {
        Context {
            conn_id: ConnectionId::ANY,
            kind: MessageKind::Call,
            serial: 1,
            hash,
        }
    }

    #[test]
    fn lookup_miss_for_unregistered_hash() {
        let registry = MethodRegistry::new();
        assert!(registry.lookup(TypeHash::new(1, 2)).is_none());
    }

    #[test]
    fn registered_handler_runs_with_arity_guard() {
        let hash = TypeHash::new(0x1111, 0x2222);
        let mut registry = MethodRegistry::new();
        registry.register(hash, |_cx, _obj, reader| {
            reader.check_arity(1).map_err(Fault::from)?;
            let n = reader.pop_int64().map_err(Fault::from)?;
            Ok(Some(Value::Int64(n * 2)))
        });

        let mut msg = FieldBuffer::new_message(MessageKind::Call, 1, ConnectionId::ANY, hash, 1);
        msg.add(Value::Int64(7));
        let mut reader = msg.reader();
        reader.skip_header().unwrap();

        let obj: Arc<dyn RemoteObject> = Arc::new(Dummy);
        let handler = registry.lookup(hash).unwrap();
        let result = handler(&test_context(hash), &obj, &mut reader).unwrap();
        assert_eq!(result, Some(Value::Int64(14)));
    }

    #[test]
    fn arity_mismatch_surfaces_as_protocol_fault() {
        let hash = TypeHash::new(3, 4);
        let mut registry = MethodRegistry::new();
        registry.register(hash, |_cx, _obj, reader| {
            reader.check_arity(2).map_err(Fault::from)?;
            Ok(None)
        });

        let msg = FieldBuffer::new_message(MessageKind::Call, 1, ConnectionId::ANY, hash, 0);
        let mut reader = msg.reader();
        reader.skip_header().unwrap();

        let obj: Arc<dyn RemoteObject> = Arc::new(Dummy);
        let handler = registry.lookup(hash).unwrap();
        let fault = handler(&test_context(hash), &obj, &mut reader).unwrap_err();
        assert!(matches!(fault, Fault::Protocol(_)));
    }
}
