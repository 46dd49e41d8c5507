//! Passenger manifest cache.
//!
//! The host simulation owns the real "who rides whom" list and never exposes
//! it, so the engine remembers the last `set_passengers` it saw for every
//! host. One cache is shared by every entity of an engine instance.
//!
//! Lists are immutable `Arc<[NumericId]>` values. Updates build a new slice
//! outside of any shared state and swap it in under the lock, so the
//! critical section is a single map write.

use crate::protocol::{Packet, SetPassengers};
use crate::types::NumericId;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;

pub type PassengerList = Arc<[NumericId]>;

/// Returns `list` plus `id` at the end, or `list` itself when `id` is
/// already present.
pub fn with_passenger(list: &PassengerList, id: NumericId) -> PassengerList {
    if list.contains(&id) {
        return list.clone();
    }
    list.iter().copied().chain(std::iter::once(id)).collect()
}

/// Returns `list` without any occurrence of `id`, or `list` itself when `id`
/// is absent. Order of the remaining elements is preserved.
pub fn without_passenger(list: &PassengerList, id: NumericId) -> PassengerList {
    if !list.contains(&id) {
        return list.clone();
    }
    list.iter().copied().filter(|&p| p != id).collect()
}

#[derive(Default)]
pub struct PassengerCache {
    manifests: Mutex<HashMap<NumericId, PassengerList>>,
}

impl PassengerCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Last observed passengers of `host`; empty when never seen.
    pub fn get(&self, host: NumericId) -> PassengerList {
        self.manifests
            .lock()
            .get(&host)
            .cloned()
            .unwrap_or_else(|| Arc::from(Vec::new()))
    }

    /// Overwrite the manifest of `host`.
    pub fn set(&self, host: NumericId, passengers: PassengerList) {
        self.manifests.lock().insert(host, passengers);
    }

    /// Read-modify-write under the cache lock. Returns the stored list.
    pub fn update<F>(&self, host: NumericId, f: F) -> PassengerList
    where
        F: FnOnce(&PassengerList) -> PassengerList,
    {
        let mut manifests = self.manifests.lock();
        let current = manifests
            .entry(host)
            .or_insert_with(|| Arc::from(Vec::new()));
        let next = f(current);
        *current = next.clone();
        next
    }

    pub fn add_passenger(&self, host: NumericId, id: NumericId) -> PassengerList {
        self.update(host, |list| with_passenger(list, id))
    }

    pub fn remove_passenger(&self, host: NumericId, id: NumericId) -> PassengerList {
        self.update(host, |list| without_passenger(list, id))
    }

    /// Feed an outbound packet. Only `set_passengers` is recorded.
    pub fn observe(&self, packet: &Packet) {
        if let Packet::SetPassengers(SetPassengers { host, passengers }) = packet {
            self.set(*host, Arc::from(passengers.as_slice()));
        }
    }

    pub fn len(&self) -> usize {
        self.manifests.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.manifests.lock().is_empty()
    }
}
