//! The object registry: the orb-id table mapping local objects to the
//! 64-bit identifiers that stand in for them on the wire.
//!
//! Entries are connection-scoped. An id from one connection's table has no
//! meaning in another's; crossing that boundary goes through
//! [`RemoteHandle::dup`].

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use aida_wire::{OrbId, TypeHash, Value};

use crate::connection::ConnectionHandle;
use crate::errors::CallError;

/// An application object that can be exposed across a connection.
///
/// Implementations are plain objects; the registry assigns their orb ids
/// and method handlers downcast through [`as_any`](Self::as_any).
pub trait RemoteObject: Send + Sync {
    /// Interface type name carried inside `Instance` values.
    fn type_name(&self) -> &str;

    /// Downcast support for method handlers.
    fn as_any(&self) -> &dyn std::any::Any;
}

struct RegistryInner {
    // Ids start at 1 and only count up; 0 is never issued so a zeroed
    // Instance value can't alias a live object.
    next_id: u64,
    by_id: HashMap<OrbId, Arc<dyn RemoteObject>>,
    by_ptr: HashMap<usize, OrbId>,
}

/// Bidirectional object ↔ orb-id table for one connection.
///
/// Registration is idempotent per object identity, ids are never reused
/// while an entry is alive, and resolving a disposed id yields `None`
/// rather than a dangling reference. All mutation goes through one mutex;
/// dispatch is otherwise single-threaded per connection.
pub struct ObjectRegistry {
    inner: Mutex<RegistryInner>,
}

impl ObjectRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(RegistryInner {
                next_id: 1,
                by_id: HashMap::new(),
                by_ptr: HashMap::new(),
            }),
        }
    }

    /// Return the existing id for an already-registered object, or allocate
    /// and register a new one.
    ///
    /// Identity is `Arc` pointer identity; the table holds a strong
    /// reference, so a registered object's address cannot be recycled while
    /// its entry is alive.
    pub fn register(&self, obj: &Arc<dyn RemoteObject>) -> OrbId {
        let key = Arc::as_ptr(obj) as *const () as usize;
        let mut inner = self.inner.lock().expect("registry mutex poisoned");
        if let Some(existing) = inner.by_ptr.get(&key) {
            return *existing;
        }
        let orbid = OrbId::new(inner.next_id);
        inner.next_id += 1;
        inner.by_id.insert(orbid, Arc::clone(obj));
        inner.by_ptr.insert(key, orbid);
        orbid
    }

    /// Resolve an id to its object, or `None` for an unknown or disposed
    /// id. Callers must treat `None` as "object has been disposed" and not
    /// proceed with the call.
    pub fn resolve(&self, orbid: OrbId) -> Option<Arc<dyn RemoteObject>> {
        let inner = self.inner.lock().expect("registry mutex poisoned");
        inner.by_id.get(&orbid).cloned()
    }

    /// Drop an entry. The id is retired permanently; later
    /// [`resolve`](Self::resolve) calls return `None`. Returns whether an
    /// entry was removed.
    pub fn dispose(&self, orbid: OrbId) -> bool {
        let mut inner = self.inner.lock().expect("registry mutex poisoned");
        match inner.by_id.remove(&orbid) {
            Some(obj) => {
                let key = Arc::as_ptr(&obj) as *const () as usize;
                inner.by_ptr.remove(&key);
                true
            }
            None => false,
        }
    }

    /// Build the `Instance` wire value for an object, registering it if
    /// previously unseen.
    pub fn instance_value(&self, obj: &Arc<dyn RemoteObject>) -> Value {
        Value::Instance {
            orbid: self.register(obj),
            type_name: obj.type_name().to_string(),
        }
    }

    /// Number of live entries.
    pub fn len(&self) -> usize {
        self.inner.lock().expect("registry mutex poisoned").by_id.len()
    }

    /// Whether the table is empty.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for ObjectRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for ObjectRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ObjectRegistry")
            .field("entries", &self.len())
            .finish()
    }
}

/// A local proxy addressing an object that lives on the other side of a
/// connection.
///
/// Holds the `(local_orbid, remote_orbid)` pair: `remote` addresses the
/// object in the peer's registry, `local` is the id the peer knows us by
/// when the handle itself travels as an argument (zero for handles that
/// never did).
#[derive(Clone)]
pub struct RemoteHandle {
    local: OrbId,
    remote: OrbId,
    type_name: String,
    conn: ConnectionHandle,
}

impl RemoteHandle {
    pub(crate) fn new(
        local: OrbId,
        remote: OrbId,
        type_name: String,
        conn: ConnectionHandle,
    ) -> Self {
        Self {
            local,
            remote,
            type_name,
            conn,
        }
    }

    /// Construct a handle from an `Instance` value received on `conn`.
    pub fn from_instance(value: &Value, conn: ConnectionHandle) -> Result<Self, CallError> {
        let (orbid, type_name) = value.as_instance().map_err(aida_wire::ProtocolError::from)?;
        Ok(Self::new(OrbId::new(0), orbid, type_name.to_string(), conn))
    }

    /// Duplicate a handle from a peer-supplied id pair onto `conn`,
    /// addressing the same remote object without creating a registry entry.
    pub fn dup(pair: (OrbId, OrbId), type_name: String, conn: ConnectionHandle) -> Self {
        Self::new(pair.0, pair.1, type_name, conn)
    }

    /// The id addressing the object in the peer's registry.
    pub fn orbid(&self) -> OrbId {
        self.remote
    }

    /// The `(local_orbid, remote_orbid)` pair for handle duplication.
    pub fn id_pair(&self) -> (OrbId, OrbId) {
        (self.local, self.remote)
    }

    /// Interface type name reported by the peer.
    pub fn type_name(&self) -> &str {
        &self.type_name
    }

    /// The wire value passing this handle as an argument or result.
    pub fn to_value(&self) -> Value {
        Value::Instance {
            orbid: self.remote,
            type_name: self.type_name.clone(),
        }
    }

    /// Two-way call on the remote object.
    pub async fn call(
        &self,
        hash: TypeHash,
        args: Vec<Value>,
    ) -> Result<Option<Value>, CallError> {
        self.conn.call(hash, self.remote, args).await
    }

    /// Fire-and-forget call on the remote object.
    pub async fn call_oneway(&self, hash: TypeHash, args: Vec<Value>) -> Result<(), CallError> {
        self.conn.call_oneway(hash, self.remote, args).await
    }
}

impl std::fmt::Debug for RemoteHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RemoteHandle")
            .field("remote", &self.remote)
            .field("type_name", &self.type_name)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Dummy;

    impl RemoteObject for Dummy {
        fn type_name(&self) -> &str {
            "Test::Dummy"
        }

        fn as_any(&self) -> &dyn std::any::Any {
            self
        }
    }

    #[test]
    fn register_is_idempotent_per_object() {
        let registry = ObjectRegistry::new();
        let obj: Arc<dyn RemoteObject> = Arc::new(Dummy);
        let first = registry.register(&obj);
        let second = registry.register(&obj);
        assert_eq!(first, second);
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn distinct_objects_get_distinct_ids() {
        let registry = ObjectRegistry::new();
        let a: Arc<dyn RemoteObject> = Arc::new(Dummy);
        let b: Arc<dyn RemoteObject> = Arc::new(Dummy);
        assert_ne!(registry.register(&a), registry.register(&b));
    }

    #[test]
    fn disposed_ids_resolve_to_none_and_are_not_reused() {
        let registry = ObjectRegistry::new();
        let obj: Arc<dyn RemoteObject> = Arc::new(Dummy);
        let orbid = registry.register(&obj);
        assert!(registry.resolve(orbid).is_some());

        assert!(registry.dispose(orbid));
        assert!(registry.resolve(orbid).is_none());
        assert!(!registry.dispose(orbid), "second dispose is a no-op");

        let replacement: Arc<dyn RemoteObject> = Arc::new(Dummy);
        let new_id = registry.register(&replacement);
        assert_ne!(new_id, orbid, "retired ids are never reissued");
    }

    #[test]
    fn re_registering_after_dispose_allocates_fresh_id() {
        let registry = ObjectRegistry::new();
        let obj: Arc<dyn RemoteObject> = Arc::new(Dummy);
        let first = registry.register(&obj);
        registry.dispose(first);
        let second = registry.register(&obj);
        assert_ne!(first, second);
        assert!(registry.resolve(second).is_some());
    }
}
