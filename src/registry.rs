//! Identifier registry: string ids ↔ wire ids.

use crate::error::validate_id;
use crate::types::NumericId;
use log::error;
use std::collections::HashMap;

// ---------------------------------------------------------------------------
// Registry
// ---------------------------------------------------------------------------

/// Two unique-key maps over the same values.
///
/// A duplicate string id is rejected without touching either map; callers
/// must [`unregister`](IdRegistry::unregister) before reusing an id.
pub struct IdRegistry<T> {
    by_id: HashMap<String, (NumericId, T)>,
    by_numeric: HashMap<NumericId, String>,
}

impl<T: Clone> IdRegistry<T> {
    pub fn new() -> Self {
        Self {
            by_id: HashMap::new(),
            by_numeric: HashMap::new(),
        }
    }

    /// Returns `false` (and logs) when `id` is invalid or already present.
    pub fn register(&mut self, id: &str, numeric_id: NumericId, value: T) -> bool {
        if let Err(e) = validate_id(id) {
            error!("Refusing to register entity: {}", e);
            return false;
        }
        if self.by_id.contains_key(id) {
            error!("Entity id conflict: {} is already registered", id);
            return false;
        }
        if let Some(owner) = self.by_numeric.get(&numeric_id) {
            error!(
                "Numeric id conflict: {} is already used by {} (while registering {})",
                numeric_id, owner, id
            );
            return false;
        }
        self.by_numeric.insert(numeric_id, id.to_string());
        self.by_id.insert(id.to_string(), (numeric_id, value));
        true
    }

    pub fn unregister(&mut self, id: &str) -> Option<T> {
        let (numeric_id, value) = self.by_id.remove(id)?;
        self.by_numeric.remove(&numeric_id);
        Some(value)
    }

    pub fn lookup_by_id(&self, id: &str) -> Option<&T> {
        self.by_id.get(id).map(|(_, v)| v)
    }

    pub fn lookup_by_numeric_id(&self, numeric_id: NumericId) -> Option<&T> {
        self.by_numeric
            .get(&numeric_id)
            .and_then(|id| self.lookup_by_id(id))
    }

    pub fn contains(&self, id: &str) -> bool {
        self.by_id.contains_key(id)
    }

    pub fn ids(&self) -> Vec<String> {
        self.by_id.keys().cloned().collect()
    }

    pub fn values(&self) -> Vec<T> {
        self.by_id.values().map(|(_, v)| v.clone()).collect()
    }

    /// Empty the registry, returning everything that was in it.
    pub fn drain(&mut self) -> Vec<(String, T)> {
        self.by_numeric.clear();
        self.by_id.drain().map(|(id, (_, v))| (id, v)).collect()
    }

    pub fn len(&self) -> usize {
        self.by_id.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_id.is_empty()
    }
}

impl<T: Clone> Default for IdRegistry<T> {
    fn default() -> Self {
        Self::new()
    }
}
