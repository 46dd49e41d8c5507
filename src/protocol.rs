//! `display.*` wire protocol.
//!
//! This module owns **every message that crosses the transport boundary**
//! between the display engine and a client connection.
//!
//! ## Design rules
//!
//! 1. Every struct is `Serialize + Deserialize` with snake_case JSON.
//! 2. No engine-side types leak out (`glam` quaternions travel as `[f32; 4]`).
//! 3. Viewer-add is `spawn_entity` followed by `entity_metadata`; viewer-remove
//!    is `destroy_entities`.
//! 4. `set_passengers` always carries the *full* passenger list of the host.

use serde::{Deserialize, Serialize};

use crate::types::{ClientId, NumericId};

// ---------------------------------------------------------------------------
// Common envelope
// ---------------------------------------------------------------------------

/// Every outbound frame is wrapped in this envelope.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Envelope<T> {
    pub frame: u64,
    pub client: ClientId,
    pub packet: T,
}

impl<T> Envelope<T> {
    pub fn new(frame: u64, client: ClientId, packet: T) -> Self {
        Self {
            frame,
            client,
            packet,
        }
    }
}

// ---------------------------------------------------------------------------
// Outbound packets
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntityType {
    TextDisplay,
    BlockDisplay,
    ItemDisplay,
    Interaction,
}

/// Creates the client-side object.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SpawnEntity {
    pub entity_id: NumericId,
    pub entity_type: EntityType,
    pub x: f64,
    pub y: f64,
    pub z: f64,
    pub yaw: f32,
    pub pitch: f32,
}

/// Full metadata for an entity.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EntityMetadata {
    pub entity_id: NumericId,
    pub meta: MetaPayload,
}

/// Kind-specific metadata body.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum MetaPayload {
    Display(DisplayMeta),
    Interaction(InteractionMeta),
}

/// Fields shared by every display entity plus its appearance.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DisplayMeta {
    pub interpolation_delay: i32,
    pub transformation_interpolation_duration: i32,
    pub position_rotation_interpolation_duration: i32,
    pub translation: [f32; 3],
    pub scale: [f32; 3],
    pub left_rotation: [f32; 4],
    pub right_rotation: [f32; 4],
    pub billboard: String,
    pub view_range: f32,
    pub invisible: bool,
    pub glowing: bool,
    pub glow_color: i32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub brightness_override: Option<i32>,
    pub appearance: AppearanceMeta,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum AppearanceMeta {
    Text {
        text: serde_json::Value,
        line_width: i32,
        background_color: i32,
        text_opacity: i8,
        shadow: bool,
        see_through: bool,
        alignment: String,
    },
    Block {
        block_state: i32,
        on_fire: bool,
    },
    Item {
        item: String,
        display_type: String,
        on_fire: bool,
    },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InteractionMeta {
    pub width: f32,
    pub height: f32,
    pub responsive: bool,
}

/// Moves an already-spawned entity.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TeleportEntity {
    pub entity_id: NumericId,
    pub x: f64,
    pub y: f64,
    pub z: f64,
    pub yaw: f32,
    pub pitch: f32,
}

/// Replaces the passenger list of `host`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SetPassengers {
    pub host: NumericId,
    pub passengers: Vec<NumericId>,
}

/// Removes entities from the client.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DestroyEntities {
    pub entity_ids: Vec<NumericId>,
}

/// Every packet the engine can send.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum Packet {
    SpawnEntity(SpawnEntity),
    EntityMetadata(EntityMetadata),
    TeleportEntity(TeleportEntity),
    SetPassengers(SetPassengers),
    DestroyEntities(DestroyEntities),
}

impl Packet {
    pub fn subject(&self) -> &'static str {
        match self {
            Packet::SpawnEntity(_) => subjects::SPAWN_ENTITY,
            Packet::EntityMetadata(_) => subjects::ENTITY_METADATA,
            Packet::TeleportEntity(_) => subjects::TELEPORT_ENTITY,
            Packet::SetPassengers(_) => subjects::SET_PASSENGERS,
            Packet::DestroyEntities(_) => subjects::DESTROY_ENTITIES,
        }
    }
}

// ---------------------------------------------------------------------------
// Inbound
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InteractAction {
    Interact,
    Attack,
    InteractAt,
}

/// Client clicked an entity.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InteractEntity {
    pub client: ClientId,
    pub entity_id: NumericId,
    pub action: InteractAction,
}

// ---------------------------------------------------------------------------
// Subject helpers
// ---------------------------------------------------------------------------

/// Bus subjects used by the display protocol, as constants.
pub mod subjects {
    pub const SPAWN_ENTITY: &str = "display.entity.spawn";
    pub const ENTITY_METADATA: &str = "display.entity.metadata";
    pub const TELEPORT_ENTITY: &str = "display.entity.teleport";
    pub const SET_PASSENGERS: &str = "display.entity.passengers";
    pub const DESTROY_ENTITIES: &str = "display.entity.destroy";

    pub const INTERACT_ENTITY: &str = "intent.interact";
}
