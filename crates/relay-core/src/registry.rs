//! Identity ↔ connection registry.
//!
//! The registry is the single source of truth for which live connection
//! currently speaks for which identity. It is kept in both directions so that
//! a disconnect, which only knows its handle, can find and remove the identity
//! without scanning, and so that a connection re-registering under a new
//! identity releases the old one in the same step.

use std::collections::HashMap;

use crate::ids::{ConnectionId, UserId};

/// Storage for identity bindings.
///
/// The dispatcher only talks to this trait, so a shared backing store can
/// stand in for [`InMemoryRegistry`] without touching relay logic.
pub trait ConnectionRegistry: Send {
    /// Bind `identity` to `handle`, replacing any earlier binding for either.
    ///
    /// Returns the handle previously bound to `identity`, if it was a
    /// different connection. That connection is not closed.
    fn register(&mut self, identity: UserId, handle: ConnectionId) -> Option<ConnectionId>;

    /// Current handle for `identity`.
    fn lookup(&self, identity: &UserId) -> Option<ConnectionId>;

    /// Remove whichever identity is bound to `handle` and return it.
    fn remove_by_handle(&mut self, handle: &ConnectionId) -> Option<UserId>;

    /// Identity currently bound to `handle`.
    fn identity_of(&self, handle: &ConnectionId) -> Option<UserId>;

    /// Number of bound identities.
    fn len(&self) -> usize;

    /// Whether no identity is bound.
    fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Process-local registry backed by two hash maps.
#[derive(Debug, Default)]
pub struct InMemoryRegistry {
    by_identity: HashMap<UserId, ConnectionId>,
    by_handle: HashMap<ConnectionId, UserId>,
}

impl InMemoryRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }
}

impl ConnectionRegistry for InMemoryRegistry {
    fn register(&mut self, identity: UserId, handle: ConnectionId) -> Option<ConnectionId> {
        // Release whatever this connection was registered as before.
        if let Some(old_identity) = self.by_handle.remove(&handle) {
            if old_identity != identity {
                let _ = self.by_identity.remove(&old_identity);
            }
        }

        let previous = self.by_identity.insert(identity.clone(), handle.clone());
        let _ = self.by_handle.insert(handle.clone(), identity);

        match previous {
            Some(prev) if prev != handle => {
                let _ = self.by_handle.remove(&prev);
                Some(prev)
            }
            _ => None,
        }
    }

    fn lookup(&self, identity: &UserId) -> Option<ConnectionId> {
        self.by_identity.get(identity).cloned()
    }

    fn remove_by_handle(&mut self, handle: &ConnectionId) -> Option<UserId> {
        let identity = self.by_handle.remove(handle)?;
        if self.by_identity.get(&identity) == Some(handle) {
            let _ = self.by_identity.remove(&identity);
        }
        Some(identity)
    }

    fn identity_of(&self, handle: &ConnectionId) -> Option<UserId> {
        self.by_handle.get(handle).cloned()
    }

    fn len(&self) -> usize {
        self.by_identity.len()
    }
}
