//! Janet Display Engine
//!
//! Client-only virtual display entities: objects that exist only in the
//! protocol stream of the clients chosen to see them, never in the host
//! simulation.
//!
//! ## Architecture
//!
//! ```text
//! EntityManager  (manager.rs)      ← identity, lifecycle, persistence, animation
//!   ├── IdRegistry  (registry.rs)
//!   └── VisibilityEngine  (visibility.rs) ← viewer diffs, render modes, attachment
//!         ├── PassengerCache  (passengers.rs)
//!         ├── ClientDirectory (directory.rs)   ┐
//!         ├── Transport       (transport.rs)   │ injected collaborators
//!         └── Scheduler       (scheduler.rs)   ┘
//! InteractionRouter  (interaction.rs) → EntityManager
//! ```
//!
//! Work runs on two contexts: a serialized sync lane for placement,
//! teleports and interaction callbacks, and a parallel worker context for
//! periodic visibility passes and broadcasts.

// Wire types, appearance payloads and the id registry are always available.
pub mod appearance;
pub mod error;
pub mod protocol;
pub mod registry;
pub mod types;

// The engine itself requires the `server` feature.
#[cfg(feature = "server")]
pub mod directory;
#[cfg(feature = "server")]
pub mod entity;
#[cfg(feature = "server")]
pub mod interaction;
#[cfg(feature = "server")]
pub mod manager;
#[cfg(feature = "server")]
pub mod passengers;
#[cfg(feature = "server")]
pub mod persistence;
#[cfg(feature = "server")]
pub mod scheduler;
#[cfg(feature = "server")]
pub mod transport;
#[cfg(feature = "server")]
pub mod visibility;

// Convenience re-exports (server only)
#[cfg(feature = "server")]
pub use directory::{ClientDirectory, InMemoryDirectory};
#[cfg(feature = "server")]
pub use entity::{EntityKind, Transform, VirtualEntity};
#[cfg(feature = "server")]
pub use interaction::InteractionRouter;
#[cfg(feature = "server")]
pub use manager::{EntityManager, LifecycleHandler, SpawnOptions, TextAnimation};
#[cfg(feature = "server")]
pub use passengers::PassengerCache;
#[cfg(feature = "server")]
pub use persistence::{DescriptorStore, EntityDescriptor, JsonFileStore, MemoryStore};
#[cfg(feature = "server")]
pub use scheduler::{ExecContext, ManualScheduler, Scheduler, TaskHandle, TokioScheduler};
#[cfg(feature = "server")]
pub use transport::{ChannelTransport, RecordingTransport, Transport};
#[cfg(feature = "server")]
pub use visibility::{ViewerDiff, VisibilityEngine};
pub use appearance::Appearance;
pub use error::{DisplayError, Result};
pub use types::{ClientId, EngineConfig, EngineStats, Location, NumericId, RenderMode};
