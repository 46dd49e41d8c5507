//! Client directory: who is connected, and where.
//!
//! The engine never owns client state; it pulls it through
//! [`ClientDirectory`] at the moment a pass runs.

use crate::types::{ClientId, Location, NumericId};
use parking_lot::RwLock;
use std::collections::HashMap;

pub trait ClientDirectory: Send + Sync {
    fn online_clients(&self) -> Vec<ClientId>;

    /// Current location of an online client.
    fn location(&self, client: &ClientId) -> Option<Location>;

    /// Resolve a client by the numeric id of its in-world presence.
    fn resolve_numeric(&self, numeric_id: NumericId) -> Option<ClientId>;

    /// The numeric id of a client's in-world presence.
    fn presence_id(&self, client: &ClientId) -> Option<NumericId>;

    fn is_online(&self, client: &ClientId) -> bool;

    /// Online clients currently in `world`, with their locations.
    fn clients_in_world(&self, world: &str) -> Vec<(ClientId, Location)> {
        self.online_clients()
            .into_iter()
            .filter_map(|c| {
                let loc = self.location(&c)?;
                (loc.world == world).then_some((c, loc))
            })
            .collect()
    }
}

// ---------------------------------------------------------------------------
// In-memory directory
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
struct ClientRecord {
    numeric_id: NumericId,
    location: Location,
}

/// Directory fed by the host adapter (join/move/quit). Also used by tests.
#[derive(Default)]
pub struct InMemoryDirectory {
    clients: RwLock<HashMap<ClientId, ClientRecord>>,
}

impl InMemoryDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn join(&self, client: ClientId, numeric_id: NumericId, location: Location) {
        self.clients.write().insert(
            client,
            ClientRecord {
                numeric_id,
                location,
            },
        );
    }

    /// Returns `false` when the client is not connected.
    pub fn move_to(&self, client: &ClientId, location: Location) -> bool {
        match self.clients.write().get_mut(client) {
            Some(record) => {
                record.location = location;
                true
            }
            None => false,
        }
    }

    pub fn quit(&self, client: &ClientId) -> bool {
        self.clients.write().remove(client).is_some()
    }

    pub fn len(&self) -> usize {
        self.clients.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.clients.read().is_empty()
    }
}

impl ClientDirectory for InMemoryDirectory {
    fn online_clients(&self) -> Vec<ClientId> {
        let mut ids: Vec<_> = self.clients.read().keys().cloned().collect();
        ids.sort();
        ids
    }

    fn location(&self, client: &ClientId) -> Option<Location> {
        self.clients.read().get(client).map(|r| r.location.clone())
    }

    fn resolve_numeric(&self, numeric_id: NumericId) -> Option<ClientId> {
        self.clients
            .read()
            .iter()
            .find(|(_, r)| r.numeric_id == numeric_id)
            .map(|(id, _)| id.clone())
    }

    fn presence_id(&self, client: &ClientId) -> Option<NumericId> {
        self.clients.read().get(client).map(|r| r.numeric_id)
    }

    fn is_online(&self, client: &ClientId) -> bool {
        self.clients.read().contains_key(client)
    }
}
