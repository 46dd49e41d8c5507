//! Core types shared across all modules.

use serde::{Deserialize, Serialize};

/// Wire-level entity id assigned by the host (or by the allocator in
/// `entity` when the host does not supply one).
pub type NumericId = i32;

// ---------------------------------------------------------------------------
// Clients
// ---------------------------------------------------------------------------

/// Stable identifier of a connected client (a player session).
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ClientId(pub String);

impl ClientId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for ClientId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for ClientId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

// ---------------------------------------------------------------------------
// Locations
// ---------------------------------------------------------------------------

/// A position inside a named world.
///
/// Coordinates are `f64` so that view-distance checks near the boundary are
/// not at the mercy of single-precision rounding.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Location {
    pub world: String,
    pub x: f64,
    pub y: f64,
    pub z: f64,
    #[serde(default)]
    pub yaw: f32,
    #[serde(default)]
    pub pitch: f32,
}

impl Location {
    pub fn new(world: impl Into<String>, x: f64, y: f64, z: f64) -> Self {
        Self {
            world: world.into(),
            x,
            y,
            z,
            yaw: 0.0,
            pitch: 0.0,
        }
    }

    pub fn with_rotation(mut self, yaw: f32, pitch: f32) -> Self {
        self.yaw = yaw;
        self.pitch = pitch;
        self
    }

    /// Squared straight-line distance. Ignores the world; callers compare
    /// worlds first.
    pub fn distance_squared(&self, other: &Location) -> f64 {
        let dx = self.x - other.x;
        let dy = self.y - other.y;
        let dz = self.z - other.z;
        dx * dx + dy * dy + dz * dz
    }

    pub fn same_world(&self, other: &Location) -> bool {
        self.world == other.world
    }
}

impl std::fmt::Display for Location {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}({:.2}, {:.2}, {:.2})", self.world, self.x, self.y, self.z)
    }
}

// ---------------------------------------------------------------------------
// Render modes
// ---------------------------------------------------------------------------

/// Policy controlling which clients are eligible as viewers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum RenderMode {
    /// Nobody is added or removed automatically.
    None,
    /// Every client in range in the same world.
    #[default]
    All,
    /// Same as [`RenderMode::All`].
    #[deprecated(note = "use RenderMode::All")]
    Nearby,
    /// Viewers are managed by hand with show/hide.
    ViewerList,
    /// Like `All`, but the client the entity rides never sees it.
    NotAttachedToViewerHost,
}

impl RenderMode {
    /// Modes whose viewers come from the world/distance scan.
    #[allow(deprecated)]
    pub fn scans_world(self) -> bool {
        matches!(
            self,
            RenderMode::All | RenderMode::Nearby | RenderMode::NotAttachedToViewerHost
        )
    }
}

// ---------------------------------------------------------------------------
// Stats & config
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineStats {
    pub registered_entities: usize,
    pub alive_entities: usize,
    pub total_viewers: usize,
    pub cached_manifests: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Default squared view distance for new entities (250 units).
    pub view_distance_squared: f64,
    /// Default period between visibility passes, in ticks.
    pub update_period_ticks: u64,
    /// Delay before an entity's first periodic pass, in ticks.
    pub initial_delay_ticks: u64,
    /// Squared radius a client must be within to trigger an interaction box.
    pub interaction_radius_squared: f64,
    /// Length of one tick in milliseconds.
    pub tick_millis: u64,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            view_distance_squared: 62_500.0,
            update_period_ticks: 20,
            initial_delay_ticks: 20,
            interaction_radius_squared: 36.0,
            tick_millis: 50,
        }
    }
}
