//! Connected-client registry (§4.6): `connId -> RelayClient`, grounded on
//! the teacher's `nodes::registry::NodeRegistry`. Generalized from a
//! single node kind to the three `DeviceType`s this hub authenticates,
//! with a shared 16-slot index allocator for the non-pylon (`app`,
//! `viewer`) device types — the wire's 4-bit `deviceIndex` does not
//! distinguish app from viewer, so both draw from one pool.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::RwLock;
use serde_json::Value;
use tokio::sync::mpsc;

use pylon_domain::entities::{DeviceType, RelayClient};
use pylon_domain::id::{ClientId, PylonId};

pub type ConnectionId = u64;

pub struct ConnectedClient {
    pub connection_id: ConnectionId,
    pub client: RelayClient,
    pub pylon_id: Option<PylonId>,
    pub client_id: Option<ClientId>,
    pub sink: mpsc::Sender<Value>,
}

impl ConnectedClient {
    /// The 7-bit encoded id surfaced on the wire (§6.5), regardless of
    /// which half of the id space (`PylonId` vs `ClientId`) it came from.
    pub fn device_id_raw(&self) -> u8 {
        self.pylon_id
            .map(|p| p.raw())
            .or_else(|| self.client_id.map(|c| c.raw()))
            .unwrap_or(0)
    }
}

#[derive(Default)]
pub struct ClientRegistry {
    connections: RwLock<HashMap<ConnectionId, ConnectedClient>>,
    next_connection_id: AtomicU64,
}

impl ClientRegistry {
    pub fn new() -> Self {
        Self {
            connections: RwLock::new(HashMap::new()),
            next_connection_id: AtomicU64::new(1),
        }
    }

    pub fn next_connection_id(&self) -> ConnectionId {
        self.next_connection_id.fetch_add(1, Ordering::Relaxed)
    }

    /// Smallest free index in `0..=15` across every currently connected
    /// app or viewer. `None` means the pool is exhausted.
    pub fn allocate_client_index(&self) -> Option<u8> {
        let connections = self.connections.read();
        let taken: std::collections::HashSet<u8> = connections
            .values()
            .filter(|c| matches!(c.client.device_type, DeviceType::App | DeviceType::Viewer))
            .map(|c| c.client.device_index)
            .collect();
        (0..=15u8).find(|idx| !taken.contains(idx))
    }

    pub fn insert(&self, conn: ConnectedClient) {
        self.connections.write().insert(conn.connection_id, conn);
    }

    pub fn remove(&self, connection_id: ConnectionId) -> Option<ConnectedClient> {
        self.connections.write().remove(&connection_id)
    }

    pub fn get_sink(&self, connection_id: ConnectionId) -> Option<mpsc::Sender<Value>> {
        self.connections.read().get(&connection_id).map(|c| c.sink.clone())
    }

    /// Every sink whose device id matches `device_id` (`to`-addressed
    /// routing, §4.6).
    pub fn sinks_for_device(&self, device_id: u8) -> Vec<mpsc::Sender<Value>> {
        self.connections
            .read()
            .values()
            .filter(|c| c.device_id_raw() == device_id)
            .map(|c| c.sink.clone())
            .collect()
    }

    /// Every sink belonging to an authenticated client of `device_type`.
    pub fn sinks_for_type(&self, device_type: DeviceType) -> Vec<mpsc::Sender<Value>> {
        self.connections
            .read()
            .values()
            .filter(|c| c.client.device_type == device_type)
            .map(|c| c.sink.clone())
            .collect()
    }

    /// Every sink belonging to a pylon, excluding `connection_id` itself.
    pub fn sinks_for_pylons_except(&self, connection_id: ConnectionId) -> Vec<mpsc::Sender<Value>> {
        self.connections
            .read()
            .values()
            .filter(|c| c.connection_id != connection_id && c.client.device_type == DeviceType::Pylon)
            .map(|c| c.sink.clone())
            .collect()
    }

    pub fn all_sinks(&self) -> Vec<mpsc::Sender<Value>> {
        self.connections.read().values().map(|c| c.sink.clone()).collect()
    }

    pub fn device_id_of(&self, connection_id: ConnectionId) -> Option<u8> {
        self.connections.read().get(&connection_id).map(|c| c.device_id_raw())
    }

    pub fn device_type_of(&self, connection_id: ConnectionId) -> Option<DeviceType> {
        self.connections.read().get(&connection_id).map(|c| c.client.device_type)
    }

    pub fn list(&self) -> Vec<(u8, u8, DeviceType)> {
        self.connections
            .read()
            .values()
            .map(|c| (c.device_id_raw(), c.client.device_index, c.client.device_type))
            .collect()
    }

    pub fn len(&self) -> usize {
        self.connections.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.connections.read().is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pylon_domain::id::{encode_client, Env};

    fn client(device_type: DeviceType, idx: u8, sink: mpsc::Sender<Value>) -> ConnectedClient {
        ConnectedClient {
            connection_id: idx as u64,
            client: RelayClient {
                ip: "127.0.0.1".into(),
                device_index: idx,
                device_type,
                authenticated: true,
                share_id: None,
                email: None,
            },
            pylon_id: None,
            client_id: Some(encode_client(Env::Dev, idx).unwrap()),
            sink,
        }
    }

    #[test]
    fn allocates_smallest_free_index_across_app_and_viewer() {
        let registry = ClientRegistry::new();
        let (tx, _rx) = mpsc::channel(1);
        registry.insert(client(DeviceType::App, 0, tx.clone()));
        registry.insert(client(DeviceType::Viewer, 1, tx));
        assert_eq!(registry.allocate_client_index(), Some(2));
    }

    #[test]
    fn removing_a_client_frees_its_index() {
        let registry = ClientRegistry::new();
        let (tx, _rx) = mpsc::channel(1);
        let conn_id = registry.next_connection_id();
        registry.insert(client(DeviceType::App, 0, tx));
        let _ = conn_id;
        registry.remove(0);
        assert_eq!(registry.allocate_client_index(), Some(0));
    }

    #[test]
    fn sinks_for_device_matches_encoded_id() {
        let registry = ClientRegistry::new();
        let (tx, _rx) = mpsc::channel(1);
        let id = encode_client(Env::Dev, 3).unwrap();
        registry.insert(client(DeviceType::App, 3, tx));
        assert_eq!(registry.sinks_for_device(id.raw()).len(), 1);
    }
}
