//! Connection binding and the live presence roster.
//!
//! Two small tables, each guarded by one shared lock in the engine:
//!
//! - [`IdentityBinding`] — which identity a transport connection speaks
//!   for. Bound exactly once; a client must reconnect to change identity.
//! - [`PresenceRegistry`] — the ordered set of identities currently
//!   online. At most one entry per identity id, re-adds are idempotent.
//!
//! Neither table broadcasts anything itself; the engine reads the results
//! and decides what to announce.

use std::collections::HashMap;

use uuid::Uuid;

use crate::protocol::Identity;

/// Maps live connections to the identity they authenticated as.
#[derive(Debug, Default)]
pub struct IdentityBinding {
    by_conn: HashMap<Uuid, Identity>,
}

impl IdentityBinding {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record the mapping for a connection.
    ///
    /// Returns `false` without touching the table if the connection is
    /// already bound — re-binding is not supported.
    pub fn bind(&mut self, conn: Uuid, identity: Identity) -> bool {
        if self.by_conn.contains_key(&conn) {
            log::warn!(
                "connection {conn} already bound, ignoring re-bind as {}",
                identity.display_name
            );
            return false;
        }
        self.by_conn.insert(conn, identity);
        true
    }

    /// Remove the mapping, returning the identity that was bound.
    pub fn unbind(&mut self, conn: Uuid) -> Option<Identity> {
        self.by_conn.remove(&conn)
    }

    pub fn get(&self, conn: Uuid) -> Option<&Identity> {
        self.by_conn.get(&conn)
    }

    pub fn len(&self) -> usize {
        self.by_conn.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_conn.is_empty()
    }
}

/// The identities currently bound to a live connection, in join order.
#[derive(Debug, Default)]
pub struct PresenceRegistry {
    roster: Vec<Identity>,
}

impl PresenceRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add an identity to the roster.
    ///
    /// Idempotent: returns `false` if the id is already present, in which
    /// case the caller must not announce a duplicate join.
    pub fn add(&mut self, identity: Identity) -> bool {
        if self.contains(identity.id) {
            return false;
        }
        self.roster.push(identity);
        true
    }

    /// Remove by identity id. No-op on an absent id.
    pub fn remove(&mut self, id: Uuid) -> Option<Identity> {
        let pos = self.roster.iter().position(|i| i.id == id)?;
        Some(self.roster.remove(pos))
    }

    pub fn contains(&self, id: Uuid) -> bool {
        self.roster.iter().any(|i| i.id == id)
    }

    /// Current roster for new or updated client views.
    pub fn snapshot(&self) -> Vec<Identity> {
        self.roster.clone()
    }

    pub fn len(&self) -> usize {
        self.roster.len()
    }

    pub fn is_empty(&self) -> bool {
        self.roster.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn alice() -> Identity {
        Identity::new("Alice")
    }

    #[test]
    fn test_bind_once() {
        let mut binding = IdentityBinding::new();
        let conn = Uuid::new_v4();

        assert!(binding.bind(conn, alice()));
        assert!(!binding.bind(conn, Identity::new("Mallory")));

        // First binding survives the rejected re-bind
        assert_eq!(binding.get(conn).unwrap().display_name, "Alice");
        assert_eq!(binding.len(), 1);
    }

    #[test]
    fn test_unbind_returns_identity() {
        let mut binding = IdentityBinding::new();
        let conn = Uuid::new_v4();
        let id = alice();

        binding.bind(conn, id.clone());
        assert_eq!(binding.unbind(conn), Some(id));
        assert_eq!(binding.unbind(conn), None);
        assert!(binding.is_empty());
    }

    #[test]
    fn test_registry_add_is_idempotent() {
        let mut registry = PresenceRegistry::new();
        let id = alice();

        assert!(registry.add(id.clone()));
        assert!(!registry.add(id.clone()));
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn test_registry_never_duplicates_id() {
        let mut registry = PresenceRegistry::new();
        let id = alice();
        registry.add(id.clone());

        // Same id under a different display name is still the same identity
        let renamed = Identity::with_id(id.id, "Alice B.");
        assert!(!registry.add(renamed));

        let snapshot = registry.snapshot();
        assert_eq!(snapshot.len(), 1);
        assert_eq!(snapshot[0].display_name, "Alice");
    }

    #[test]
    fn test_remove_absent_is_noop() {
        let mut registry = PresenceRegistry::new();
        assert!(registry.remove(Uuid::new_v4()).is_none());
        assert!(registry.is_empty());
    }

    #[test]
    fn test_snapshot_preserves_join_order() {
        let mut registry = PresenceRegistry::new();
        let a = Identity::new("Alice");
        let b = Identity::new("Bob");
        let c = Identity::new("Charlie");

        registry.add(a.clone());
        registry.add(b.clone());
        registry.add(c.clone());
        registry.remove(b.id);

        let snapshot = registry.snapshot();
        let names: Vec<&str> = snapshot.iter().map(|i| i.display_name.as_str()).collect();
        assert_eq!(names, vec!["Alice", "Charlie"]);
    }
}
