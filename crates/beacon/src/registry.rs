//! Beacon's two decoupled maps (§4.5, §9 "Registry lifetime vs. transport
//! lifetime"): `pylonRegistry` survives a TCP disconnect, `activeConnections`
//! does not. Deliberately kept as two separate types — merging them is the
//! one thing the design notes forbid.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::RwLock;

use pylon_domain::entities::PylonConnection;
use pylon_domain::error::{Error, Result};
use pylon_domain::id::PylonId;

/// A `PylonConnection` tagged with the registration sequence number it was
/// (re-)registered at, so ties in the graceful-degradation adoption rule
/// resolve to "most recently registered" rather than to id order.
struct Entry {
    connection: PylonConnection,
    sequence: u64,
}

/// `pylonId -> {mcpHost, mcpPort}`. Entries persist across disconnects;
/// removed only by an explicit `unregister` or Beacon shutdown.
#[derive(Default)]
pub struct PylonRegistry {
    entries: RwLock<HashMap<PylonId, Entry>>,
    next_sequence: AtomicU64,
}

impl PylonRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(
        &self,
        pylon_id: PylonId,
        mcp_host: String,
        mcp_port: u16,
        force: bool,
    ) -> Result<()> {
        let mut entries = self.entries.write();
        if entries.contains_key(&pylon_id) && !force {
            return Err(Error::AlreadyRegistered);
        }
        let sequence = self.next_sequence.fetch_add(1, Ordering::Relaxed);
        entries.insert(
            pylon_id,
            Entry {
                connection: PylonConnection { mcp_host, mcp_port },
                sequence,
            },
        );
        Ok(())
    }

    pub fn unregister(&self, pylon_id: PylonId) -> bool {
        self.entries.write().remove(&pylon_id).is_some()
    }

    pub fn get(&self, pylon_id: PylonId) -> Option<PylonConnection> {
        self.entries.read().get(&pylon_id).map(|e| e.connection.clone())
    }

    pub fn contains(&self, pylon_id: PylonId) -> bool {
        self.entries.read().contains_key(&pylon_id)
    }

    /// The most-recently-registered Pylon (ties broken by registration
    /// order) — used only by the graceful-degradation "adopt this socket"
    /// rule when more than one Pylon is registered and the unregistered
    /// socket's owner is ambiguous.
    pub fn any_registered(&self) -> Option<PylonId> {
        self.entries
            .read()
            .iter()
            .max_by_key(|(_, entry)| entry.sequence)
            .map(|(pylon_id, _)| *pylon_id)
    }
}

/// `connectionId -> pylonId`. Cleared the moment the owning socket closes;
/// a fresh connection from the same Pylon re-populates it on the next
/// `register` (or via graceful-degradation adoption on `query`).
#[derive(Default)]
pub struct ActiveConnections {
    entries: RwLock<HashMap<u64, PylonId>>,
}

impl ActiveConnections {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn adopt(&self, connection_id: u64, pylon_id: PylonId) {
        self.entries.write().insert(connection_id, pylon_id);
    }

    pub fn get(&self, connection_id: u64) -> Option<PylonId> {
        self.entries.read().get(&connection_id).copied()
    }

    pub fn remove(&self, connection_id: u64) {
        self.entries.write().remove(&connection_id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pylon_domain::id::{encode_pylon, Env};

    #[test]
    fn register_rejects_duplicate_without_force() {
        let reg = PylonRegistry::new();
        let pylon = encode_pylon(Env::Dev, 1).unwrap();
        reg.register(pylon, "127.0.0.1".into(), 9878, false).unwrap();
        let result = reg.register(pylon, "127.0.0.1".into(), 9879, false);
        assert!(matches!(result, Err(Error::AlreadyRegistered)));
    }

    #[test]
    fn register_with_force_overwrites() {
        let reg = PylonRegistry::new();
        let pylon = encode_pylon(Env::Dev, 1).unwrap();
        reg.register(pylon, "127.0.0.1".into(), 9878, false).unwrap();
        reg.register(pylon, "127.0.0.1".into(), 9999, true).unwrap();
        assert_eq!(reg.get(pylon).unwrap().mcp_port, 9999);
    }

    #[test]
    fn any_registered_returns_most_recently_registered() {
        let reg = PylonRegistry::new();
        let first = encode_pylon(Env::Dev, 1).unwrap();
        let second = encode_pylon(Env::Dev, 2).unwrap();

        reg.register(first, "127.0.0.1".into(), 9001, false).unwrap();
        reg.register(second, "127.0.0.1".into(), 9002, false).unwrap();
        assert_eq!(reg.any_registered(), Some(second));

        // Re-registering the earlier Pylon (force overwrite) makes it
        // the most recent again, even though its id is numerically smaller.
        reg.register(first, "127.0.0.1".into(), 9003, true).unwrap();
        assert_eq!(reg.any_registered(), Some(first));
    }

    #[test]
    fn registry_survives_disconnect_unregister_clears_it() {
        let reg = PylonRegistry::new();
        let conns = ActiveConnections::new();
        let pylon = encode_pylon(Env::Dev, 1).unwrap();
        reg.register(pylon, "127.0.0.1".into(), 9878, false).unwrap();
        conns.adopt(1, pylon);

        conns.remove(1);
        assert!(reg.contains(pylon), "pylonRegistry must survive a socket close");

        assert!(reg.unregister(pylon));
        assert!(!reg.contains(pylon));
    }
}
