//! Virtual entities: client-only display objects and interaction boxes.
//!
//! A [`VirtualEntity`] is shared as `Arc<VirtualEntity>` between the
//! manager, its periodic visibility task and whoever holds a handle. State
//! is split in two:
//!
//! * everything configurable sits behind one `RwLock` and is changed by the
//!   setters below (no packet goes out until the next update);
//! * the viewer set has its own `Mutex` because the worker context rewrites
//!   it on every pass.

use crate::appearance::{glow_color_from_rgb, pack_brightness, Appearance, Billboard, DisplayOptions, TextFormatter};
use crate::error::{validate_id, DisplayError, Result};
use crate::persistence::EntityDescriptor;
use crate::protocol::{
    DestroyEntities, DisplayMeta, EntityMetadata, EntityType, InteractionMeta, MetaPayload, Packet,
    SpawnEntity, TeleportEntity,
};
use crate::scheduler::TaskHandle;
use crate::types::{ClientId, EngineConfig, Location, NumericId, RenderMode};
use glam::{EulerRot, Quat, Vec3};
use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashSet};
use std::sync::atomic::{AtomicBool, AtomicI32, Ordering};
use std::sync::Arc;

/// Ids handed out when the host does not supply one. Starts well above the
/// range hosts use for their own entities.
static NEXT_NUMERIC_ID: AtomicI32 = AtomicI32::new(0x4000_0000);

pub fn allocate_numeric_id() -> NumericId {
    NEXT_NUMERIC_ID.fetch_add(1, Ordering::Relaxed)
}

pub type InteractCallback = Arc<dyn Fn(&ClientId) + Send + Sync>;

// ---------------------------------------------------------------------------
// Transform
// ---------------------------------------------------------------------------

/// Local transform of a display. The net rotation is `left * right`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Transform {
    pub translation: Vec3,
    pub scale: Vec3,
    pub left_rotation: Quat,
    pub right_rotation: Quat,
}

impl Default for Transform {
    fn default() -> Self {
        Self {
            translation: Vec3::ZERO,
            scale: Vec3::ONE,
            left_rotation: Quat::IDENTITY,
            right_rotation: Quat::IDENTITY,
        }
    }
}

impl Transform {
    /// Yaw about Y, then pitch about X, in degrees. Clears the right rotation.
    pub fn set_rotation(&mut self, yaw: f32, pitch: f32) {
        self.left_rotation =
            Quat::from_rotation_y(yaw.to_radians()) * Quat::from_rotation_x(pitch.to_radians());
        self.right_rotation = Quat::IDENTITY;
    }

    /// `(yaw, pitch)` in degrees of the combined rotation.
    pub fn rotation(&self) -> (f32, f32) {
        let (yaw, pitch, _roll) = (self.left_rotation * self.right_rotation).to_euler(EulerRot::YXZ);
        (yaw.to_degrees(), pitch.to_degrees())
    }
}

// ---------------------------------------------------------------------------
// Kind
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct InteractionShape {
    pub width: f32,
    pub height: f32,
    pub responsive: bool,
}

impl Default for InteractionShape {
    fn default() -> Self {
        Self {
            width: 1.0,
            height: 1.0,
            responsive: true,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum EntityKind {
    Display(Appearance),
    Interaction(InteractionShape),
}

impl EntityKind {
    pub fn entity_type(&self) -> EntityType {
        match self {
            EntityKind::Display(a) => a.entity_type(),
            EntityKind::Interaction(_) => EntityType::Interaction,
        }
    }
}

// ---------------------------------------------------------------------------
// Entity
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
struct EntityState {
    kind: EntityKind,
    location: Option<Location>,
    transform: Transform,
    display: DisplayOptions,
    render_mode: RenderMode,
    view_distance_squared: f64,
    update_period_ticks: u64,
    blacklist: HashSet<ClientId>,
    attached_host: Option<NumericId>,
}

/// What a visibility pass needs, read under a single lock.
#[derive(Debug, Clone)]
pub(crate) struct VisibilityInputs {
    pub render_mode: RenderMode,
    pub location: Option<Location>,
    pub view_distance_squared: f64,
    pub blacklist: HashSet<ClientId>,
    pub attached_host: Option<NumericId>,
}

pub struct VirtualEntity {
    id: String,
    numeric_id: NumericId,
    state: RwLock<EntityState>,
    viewers: Mutex<BTreeSet<ClientId>>,
    alive: AtomicBool,
    task: Mutex<Option<TaskHandle>>,
    on_interact: Option<InteractCallback>,
}

impl std::fmt::Debug for VirtualEntity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("VirtualEntity")
            .field("id", &self.id)
            .field("numeric_id", &self.numeric_id)
            .field("alive", &self.is_alive())
            .field("viewers", &self.viewer_count())
            .finish()
    }
}

impl VirtualEntity {
    fn new(id: impl Into<String>, kind: EntityKind, on_interact: Option<InteractCallback>) -> Result<Self> {
        let id = id.into();
        validate_id(&id)?;
        let defaults = EngineConfig::default();
        Ok(Self {
            id,
            numeric_id: allocate_numeric_id(),
            state: RwLock::new(EntityState {
                kind,
                location: None,
                transform: Transform::default(),
                display: DisplayOptions::default(),
                render_mode: RenderMode::All,
                view_distance_squared: defaults.view_distance_squared,
                update_period_ticks: defaults.update_period_ticks,
                blacklist: HashSet::new(),
                attached_host: None,
            }),
            viewers: Mutex::new(BTreeSet::new()),
            alive: AtomicBool::new(false),
            task: Mutex::new(None),
            on_interact,
        })
    }

    /// A display entity. Fails on an id containing whitespace.
    pub fn display(id: impl Into<String>, appearance: Appearance) -> Result<Self> {
        Self::new(id, EntityKind::Display(appearance), None)
    }

    /// An invisible hit-box that reports clicks to `on_interact`.
    pub fn interaction<F>(id: impl Into<String>, on_interact: F) -> Result<Self>
    where
        F: Fn(&ClientId) + Send + Sync + 'static,
    {
        Self::new(
            id,
            EntityKind::Interaction(InteractionShape::default()),
            Some(Arc::new(on_interact)),
        )
    }

    pub fn from_descriptor(descriptor: &EntityDescriptor) -> Result<Self> {
        let entity = Self::display(descriptor.id.clone(), descriptor.appearance.clone())?
            .with_render_mode(descriptor.render_mode)
            .with_transform(descriptor.transform)
            .with_display_options(descriptor.display.clone())
            .with_view_distance_squared(descriptor.view_distance_squared)
            .with_update_period(descriptor.update_period_ticks);
        entity.state.write().location = descriptor.location.clone();
        Ok(entity)
    }

    /// Descriptor for persistence. Interaction boxes carry code and have none.
    pub fn descriptor(&self) -> Option<EntityDescriptor> {
        let s = self.state.read();
        let EntityKind::Display(appearance) = &s.kind else {
            return None;
        };
        Some(EntityDescriptor {
            id: self.id.clone(),
            appearance: appearance.clone(),
            location: s.location.clone(),
            transform: s.transform,
            display: s.display.clone(),
            render_mode: s.render_mode,
            view_distance_squared: s.view_distance_squared,
            update_period_ticks: s.update_period_ticks,
        })
    }

    /// Same configuration under a new id and a fresh numeric id. Viewers,
    /// blacklist, attachment and location are not copied.
    pub fn copy_as(&self, id: impl Into<String>) -> Result<Self> {
        let copy = Self::new(id, self.kind(), self.on_interact.clone())?;
        {
            let src = self.state.read();
            let mut dst = copy.state.write();
            dst.transform = src.transform;
            dst.display = src.display.clone();
            dst.render_mode = src.render_mode;
            dst.view_distance_squared = src.view_distance_squared;
            dst.update_period_ticks = src.update_period_ticks;
        }
        Ok(copy)
    }

    // -----------------------------------------------------------------------
    // Builders
    // -----------------------------------------------------------------------

    /// Use the host-assigned wire id instead of an allocated one.
    pub fn with_numeric_id(mut self, numeric_id: NumericId) -> Self {
        self.numeric_id = numeric_id;
        self
    }

    /// Take view distance and update period from `config`.
    pub fn with_defaults(self, config: &EngineConfig) -> Self {
        {
            let mut s = self.state.write();
            s.view_distance_squared = config.view_distance_squared.max(0.0);
            s.update_period_ticks = config.update_period_ticks.max(1);
        }
        self
    }

    pub fn with_render_mode(self, mode: RenderMode) -> Self {
        self.state.write().render_mode = mode;
        self
    }

    pub fn with_view_distance_squared(self, distance_squared: f64) -> Self {
        self.set_view_distance_squared(distance_squared);
        self
    }

    pub fn with_update_period(self, ticks: u64) -> Self {
        self.state.write().update_period_ticks = ticks.max(1);
        self
    }

    pub fn with_transform(self, transform: Transform) -> Self {
        self.state.write().transform = transform;
        self
    }

    pub fn with_display_options(self, display: DisplayOptions) -> Self {
        self.state.write().display = display;
        self
    }

    pub fn with_size(self, width: f32, height: f32) -> Self {
        self.set_size(width, height);
        self
    }

    // -----------------------------------------------------------------------
    // Accessors
    // -----------------------------------------------------------------------

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn numeric_id(&self) -> NumericId {
        self.numeric_id
    }

    pub fn kind(&self) -> EntityKind {
        self.state.read().kind.clone()
    }

    pub fn is_interaction(&self) -> bool {
        matches!(self.state.read().kind, EntityKind::Interaction(_))
    }

    pub fn appearance(&self) -> Option<Appearance> {
        match &self.state.read().kind {
            EntityKind::Display(a) => Some(a.clone()),
            EntityKind::Interaction(_) => None,
        }
    }

    pub fn location(&self) -> Option<Location> {
        self.state.read().location.clone()
    }

    pub fn transform(&self) -> Transform {
        self.state.read().transform
    }

    pub fn display_options(&self) -> DisplayOptions {
        self.state.read().display.clone()
    }

    pub fn render_mode(&self) -> RenderMode {
        self.state.read().render_mode
    }

    pub fn view_distance_squared(&self) -> f64 {
        self.state.read().view_distance_squared
    }

    pub fn update_period_ticks(&self) -> u64 {
        self.state.read().update_period_ticks
    }

    pub fn attached_host(&self) -> Option<NumericId> {
        self.state.read().attached_host
    }

    pub fn is_alive(&self) -> bool {
        self.alive.load(Ordering::SeqCst)
    }

    pub fn viewers(&self) -> Vec<ClientId> {
        self.viewers.lock().iter().cloned().collect()
    }

    pub fn has_viewer(&self, client: &ClientId) -> bool {
        self.viewers.lock().contains(client)
    }

    pub fn viewer_count(&self) -> usize {
        self.viewers.lock().len()
    }

    pub fn is_blacklisted(&self, client: &ClientId) -> bool {
        self.state.read().blacklist.contains(client)
    }

    pub fn blacklist(&self) -> Vec<ClientId> {
        let mut v: Vec<_> = self.state.read().blacklist.iter().cloned().collect();
        v.sort();
        v
    }

    pub(crate) fn visibility_inputs(&self) -> VisibilityInputs {
        let s = self.state.read();
        VisibilityInputs {
            render_mode: s.render_mode,
            location: s.location.clone(),
            view_distance_squared: s.view_distance_squared,
            blacklist: s.blacklist.clone(),
            attached_host: s.attached_host,
        }
    }

    // -----------------------------------------------------------------------
    // Setters (take effect on the next update)
    // -----------------------------------------------------------------------

    pub fn set_appearance(&self, appearance: Appearance) {
        self.state.write().kind = EntityKind::Display(appearance);
    }

    /// Replace the markup of a text display. Returns `false` for other kinds.
    pub fn set_text(&self, markup: impl Into<String>) -> bool {
        match &mut self.state.write().kind {
            EntityKind::Display(Appearance::Text(t)) => {
                t.text = markup.into();
                true
            }
            _ => false,
        }
    }

    pub fn set_transform(&self, transform: Transform) {
        self.state.write().transform = transform;
    }

    pub fn set_translation(&self, x: f32, y: f32, z: f32) {
        self.state.write().transform.translation = Vec3::new(x, y, z);
    }

    pub fn set_scale(&self, x: f32, y: f32, z: f32) {
        self.state.write().transform.scale = Vec3::new(x, y, z);
    }

    pub fn set_rotation(&self, yaw: f32, pitch: f32) {
        self.state.write().transform.set_rotation(yaw, pitch);
    }

    pub fn set_left_rotation(&self, rotation: Quat) {
        self.state.write().transform.left_rotation = rotation;
    }

    pub fn set_right_rotation(&self, rotation: Quat) {
        self.state.write().transform.right_rotation = rotation;
    }

    pub fn set_billboard(&self, billboard: Billboard) {
        self.state.write().display.billboard = billboard;
    }

    pub fn set_brightness(&self, block: i32, sky: i32) -> Result<()> {
        let packed = pack_brightness(block, sky)?;
        self.state.write().display.brightness = packed;
        Ok(())
    }

    pub fn clear_brightness(&self) {
        self.state.write().display.brightness = -1;
    }

    pub fn set_glowing(&self, glowing: bool) {
        self.state.write().display.glowing = glowing;
    }

    pub fn set_glow_color_rgb(&self, rgb: u32) {
        self.state.write().display.glow_color = glow_color_from_rgb(rgb);
    }

    pub fn set_display_options(&self, display: DisplayOptions) {
        self.state.write().display = display;
    }

    pub fn set_view_distance_squared(&self, distance_squared: f64) {
        self.state.write().view_distance_squared = distance_squared.max(0.0);
    }

    /// Only affects timers started after the call.
    pub fn set_update_period(&self, ticks: u64) {
        self.state.write().update_period_ticks = ticks.max(1);
    }

    /// No effect on display entities.
    pub fn set_size(&self, width: f32, height: f32) {
        if let EntityKind::Interaction(shape) = &mut self.state.write().kind {
            shape.width = width;
            shape.height = height;
        }
    }

    pub fn set_responsive(&self, responsive: bool) {
        if let EntityKind::Interaction(shape) = &mut self.state.write().kind {
            shape.responsive = responsive;
        }
    }

    // -----------------------------------------------------------------------
    // Engine-side state changes
    // -----------------------------------------------------------------------

    pub(crate) fn place(&self, mut location: Location, ignore_pitch_yaw: bool) {
        if ignore_pitch_yaw {
            location.yaw = 0.0;
            location.pitch = 0.0;
        }
        self.state.write().location = Some(location);
        self.alive.store(true, Ordering::SeqCst);
    }

    pub(crate) fn set_location(&self, location: Location) {
        self.state.write().location = Some(location);
    }

    pub(crate) fn set_render_mode(&self, mode: RenderMode) {
        self.state.write().render_mode = mode;
    }

    pub(crate) fn set_attached_host(&self, host: NumericId) {
        self.state.write().attached_host = Some(host);
    }

    pub(crate) fn take_attached_host(&self) -> Option<NumericId> {
        self.state.write().attached_host.take()
    }

    pub(crate) fn blacklist_add(&self, client: ClientId) {
        self.state.write().blacklist.insert(client);
    }

    pub(crate) fn blacklist_remove(&self, client: &ClientId) {
        self.state.write().blacklist.remove(client);
    }

    pub(crate) fn viewer_set(&self) -> parking_lot::MutexGuard<'_, BTreeSet<ClientId>> {
        self.viewers.lock()
    }

    pub(crate) fn set_task(&self, handle: TaskHandle) {
        if let Some(old) = self.task.lock().replace(handle) {
            old.cancel();
        }
    }

    /// Cancel the periodic task and mark the entity dead. Returns `false`
    /// when it was already dead with no task.
    pub(crate) fn shut_down(&self) -> bool {
        let task = self.task.lock().take();
        let had_task = task.is_some();
        if let Some(task) = task {
            task.cancel();
        }
        let was_alive = self.alive.swap(false, Ordering::SeqCst);
        had_task || was_alive
    }

    pub fn task_handle(&self) -> Option<TaskHandle> {
        self.task.lock().clone()
    }

    pub fn trigger_interaction(&self, client: &ClientId) {
        if let Some(callback) = &self.on_interact {
            callback(client);
        }
    }

    // -----------------------------------------------------------------------
    // Packets
    // -----------------------------------------------------------------------

    pub fn spawn_packet(&self) -> Option<Packet> {
        let s = self.state.read();
        let loc = s.location.as_ref()?;
        Some(Packet::SpawnEntity(SpawnEntity {
            entity_id: self.numeric_id,
            entity_type: s.kind.entity_type(),
            x: loc.x,
            y: loc.y,
            z: loc.z,
            yaw: loc.yaw,
            pitch: loc.pitch,
        }))
    }

    pub fn teleport_packet(&self) -> Option<Packet> {
        let s = self.state.read();
        let loc = s.location.as_ref()?;
        Some(Packet::TeleportEntity(TeleportEntity {
            entity_id: self.numeric_id,
            x: loc.x,
            y: loc.y,
            z: loc.z,
            yaw: loc.yaw,
            pitch: loc.pitch,
        }))
    }

    pub fn destroy_packet(&self) -> Packet {
        Packet::DestroyEntities(DestroyEntities {
            entity_ids: vec![self.numeric_id],
        })
    }

    pub fn metadata_packet(&self, formatter: &dyn TextFormatter) -> Packet {
        let s = self.state.read();
        let meta = match &s.kind {
            EntityKind::Display(appearance) => {
                let t = &s.transform;
                let d = &s.display;
                MetaPayload::Display(DisplayMeta {
                    interpolation_delay: -1,
                    transformation_interpolation_duration: d.interpolation_duration,
                    position_rotation_interpolation_duration: d.teleport_duration,
                    translation: t.translation.to_array(),
                    scale: t.scale.to_array(),
                    left_rotation: t.left_rotation.to_array(),
                    right_rotation: t.right_rotation.to_array(),
                    billboard: d.billboard.as_str().to_string(),
                    view_range: d.view_range,
                    invisible: d.invisible,
                    glowing: d.glowing,
                    glow_color: d.glow_color,
                    brightness_override: (d.brightness > -1).then_some(d.brightness),
                    appearance: appearance.meta(formatter),
                })
            }
            EntityKind::Interaction(shape) => MetaPayload::Interaction(InteractionMeta {
                width: shape.width,
                height: shape.height,
                responsive: shape.responsive,
            }),
        };
        Packet::EntityMetadata(EntityMetadata {
            entity_id: self.numeric_id,
            meta,
        })
    }
}

/// Returned by entity operations that need a live location.
pub(crate) fn require_location(entity: &VirtualEntity) -> Result<Location> {
    entity
        .location()
        .ok_or_else(|| DisplayError::NotSpawned(entity.id().to_string()))
}
