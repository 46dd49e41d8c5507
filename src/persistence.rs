//! Entity descriptors and the stores that keep them across restarts.
//!
//! The engine only calls a store at spawn/remove boundaries and never
//! depends on it succeeding; callers log failures and carry on.

use crate::appearance::{Appearance, DisplayOptions};
use crate::entity::Transform;
use crate::error::{DisplayError, Result};
use crate::types::{Location, RenderMode};
use log::{debug, warn};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

/// Everything needed to rebuild a display entity.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EntityDescriptor {
    pub id: String,
    pub appearance: Appearance,
    pub location: Option<Location>,
    #[serde(default)]
    pub transform: Transform,
    #[serde(default)]
    pub display: DisplayOptions,
    #[serde(default)]
    pub render_mode: RenderMode,
    pub view_distance_squared: f64,
    pub update_period_ticks: u64,
}

pub trait DescriptorStore: Send + Sync {
    fn save(&self, descriptor: &EntityDescriptor) -> Result<()>;

    /// Every stored descriptor, ordered by id.
    fn load_all(&self) -> Result<Vec<EntityDescriptor>>;

    /// Returns `false` when nothing was stored under `id`.
    fn delete(&self, id: &str) -> Result<bool>;

    fn contains(&self, id: &str) -> bool;

    fn ids(&self) -> Vec<String>;
}

// ---------------------------------------------------------------------------
// Memory
// ---------------------------------------------------------------------------

#[derive(Default)]
pub struct MemoryStore {
    entries: RwLock<BTreeMap<String, EntityDescriptor>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, id: &str) -> Option<EntityDescriptor> {
        self.entries.read().get(id).cloned()
    }
}

impl DescriptorStore for MemoryStore {
    fn save(&self, descriptor: &EntityDescriptor) -> Result<()> {
        self.entries
            .write()
            .insert(descriptor.id.clone(), descriptor.clone());
        Ok(())
    }

    fn load_all(&self) -> Result<Vec<EntityDescriptor>> {
        Ok(self.entries.read().values().cloned().collect())
    }

    fn delete(&self, id: &str) -> Result<bool> {
        Ok(self.entries.write().remove(id).is_some())
    }

    fn contains(&self, id: &str) -> bool {
        self.entries.read().contains_key(id)
    }

    fn ids(&self) -> Vec<String> {
        self.entries.read().keys().cloned().collect()
    }
}

// ---------------------------------------------------------------------------
// JSON files
// ---------------------------------------------------------------------------

/// One pretty-printed JSON file per entity. File names are the md5 of the id
/// so that any id is a safe file name.
pub struct JsonFileStore {
    dir: PathBuf,
}

impl JsonFileStore {
    /// Creates `dir` if it does not exist.
    pub fn open(dir: impl Into<PathBuf>) -> Result<Self> {
        let dir = dir.into();
        fs::create_dir_all(&dir)?;
        debug!("Descriptor store at {}", dir.display());
        Ok(Self { dir })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn path_for(&self, id: &str) -> PathBuf {
        self.dir.join(format!("{:x}.json", md5::compute(id.as_bytes())))
    }

    fn read(path: &Path) -> Result<EntityDescriptor> {
        let raw = fs::read(path)?;
        Ok(serde_json::from_slice(&raw)?)
    }
}

impl DescriptorStore for JsonFileStore {
    fn save(&self, descriptor: &EntityDescriptor) -> Result<()> {
        let path = self.path_for(&descriptor.id);
        let json = serde_json::to_vec_pretty(descriptor)?;
        // Write then rename so a crash never leaves a half-written file.
        let tmp = path.with_extension("json.tmp");
        fs::write(&tmp, json)?;
        fs::rename(&tmp, &path)?;
        Ok(())
    }

    fn load_all(&self) -> Result<Vec<EntityDescriptor>> {
        let mut out = Vec::new();
        for entry in fs::read_dir(&self.dir)? {
            let path = entry?.path();
            if path.extension().and_then(|e| e.to_str()) != Some("json") {
                continue;
            }
            match Self::read(&path) {
                Ok(descriptor) => out.push(descriptor),
                Err(e) => warn!("Skipping unreadable descriptor {}: {}", path.display(), e),
            }
        }
        out.sort_by(|a, b| a.id.cmp(&b.id));
        Ok(out)
    }

    fn delete(&self, id: &str) -> Result<bool> {
        match fs::remove_file(self.path_for(id)) {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(false),
            Err(e) => Err(DisplayError::Io(e)),
        }
    }

    fn contains(&self, id: &str) -> bool {
        self.path_for(id).is_file()
    }

    fn ids(&self) -> Vec<String> {
        match self.load_all() {
            Ok(all) => all.into_iter().map(|d| d.id).collect(),
            Err(e) => {
                warn!("Failed to list descriptors in {}: {}", self.dir.display(), e);
                Vec::new()
            }
        }
    }
}
