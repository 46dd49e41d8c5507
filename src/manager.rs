//! EntityManager – identity and lifecycle of every virtual entity.
//!
//! The manager is the only writer of the id registry. It starts each
//! entity's periodic visibility task, schedules placement on the sync
//! context, talks to the descriptor store and runs text animations.

use crate::appearance::{Appearance, PlainTextFormatter, TextFormatter};
use crate::directory::ClientDirectory;
use crate::entity::{require_location, VirtualEntity};
use crate::error::{DisplayError, Result};
use crate::passengers::PassengerCache;
use crate::persistence::DescriptorStore;
use crate::protocol::Packet;
use crate::registry::IdRegistry;
use crate::scheduler::{ExecContext, Scheduler, TaskHandle};
use crate::transport::Transport;
use crate::types::{ClientId, EngineConfig, EngineStats, Location, NumericId, RenderMode};
use crate::visibility::{ViewerDiff, VisibilityEngine};
use log::{debug, info, warn};
use parking_lot::{Mutex, RwLock};
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Weak};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SpawnOptions {
    /// Save a descriptor so the entity comes back after a restart.
    pub persistent: bool,
    /// Spawn facing yaw 0 / pitch 0 regardless of the location's rotation.
    pub ignore_pitch_yaw: bool,
}

impl SpawnOptions {
    pub fn persistent() -> Self {
        Self {
            persistent: true,
            ..Default::default()
        }
    }
}

/// Hooks for composite widgets that keep their own per-client view state.
pub trait LifecycleHandler: Send + Sync {
    fn on_join(&self, _client: &ClientId) {}
    fn on_quit(&self, _client: &ClientId) {}
}

/// Text frames cycled on a worker timer.
#[derive(Debug, Clone, PartialEq)]
pub struct TextAnimation {
    pub frames: Vec<String>,
    pub interval_ticks: u64,
}

impl TextAnimation {
    pub fn new<I, S>(frames: I, interval_ticks: u64) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            frames: frames.into_iter().map(Into::into).collect(),
            interval_ticks: interval_ticks.max(1),
        }
    }
}

pub struct EntityManager {
    config: EngineConfig,
    engine: VisibilityEngine,
    store: Option<Arc<dyn DescriptorStore>>,
    entities: RwLock<IdRegistry<Arc<VirtualEntity>>>,
    /// Persisted ids and the location last written for each.
    persistent: Mutex<HashMap<String, Option<Location>>>,
    animations: Mutex<HashMap<String, TaskHandle>>,
    handlers: RwLock<Vec<(String, Arc<dyn LifecycleHandler>)>>,
}

impl EntityManager {
    pub fn new(config: EngineConfig, engine: VisibilityEngine) -> Self {
        Self {
            config,
            engine,
            store: None,
            entities: RwLock::new(IdRegistry::new()),
            persistent: Mutex::new(HashMap::new()),
            animations: Mutex::new(HashMap::new()),
            handlers: RwLock::new(Vec::new()),
        }
    }

    /// Wire up an engine with a fresh passenger cache and plain-text
    /// formatting.
    pub fn with_collaborators(
        config: EngineConfig,
        directory: Arc<dyn ClientDirectory>,
        transport: Arc<dyn Transport>,
        scheduler: Arc<dyn Scheduler>,
    ) -> Self {
        let formatter: Arc<dyn TextFormatter> = Arc::new(PlainTextFormatter);
        let engine = VisibilityEngine::new(
            directory,
            transport,
            Arc::new(PassengerCache::new()),
            scheduler,
            formatter,
        );
        Self::new(config, engine)
    }

    pub fn with_store(mut self, store: Arc<dyn DescriptorStore>) -> Self {
        self.store = Some(store);
        self
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn engine(&self) -> &VisibilityEngine {
        &self.engine
    }

    /// A display entity carrying this manager's defaults.
    pub fn new_display(&self, id: impl Into<String>, appearance: Appearance) -> Result<VirtualEntity> {
        Ok(VirtualEntity::display(id, appearance)?.with_defaults(&self.config))
    }

    /// An interaction box carrying this manager's defaults.
    pub fn new_interaction<F>(&self, id: impl Into<String>, on_interact: F) -> Result<VirtualEntity>
    where
        F: Fn(&ClientId) + Send + Sync + 'static,
    {
        Ok(VirtualEntity::interaction(id, on_interact)?.with_defaults(&self.config))
    }

    // -----------------------------------------------------------------------
    // Spawn / remove
    // -----------------------------------------------------------------------

    /// Register `entity`, start its visibility task and place it at
    /// `location` on the sync context.
    ///
    /// A duplicate id is logged and returned as an error; the entity already
    /// registered under that id is not touched.
    pub fn spawn(
        &self,
        entity: VirtualEntity,
        location: Location,
        options: SpawnOptions,
    ) -> Result<Arc<VirtualEntity>> {
        let entity = Arc::new(entity);
        let id = entity.id().to_string();
        if !self
            .entities
            .write()
            .register(&id, entity.numeric_id(), entity.clone())
        {
            return Err(DisplayError::DuplicateId(id));
        }

        let task = self.start_task(&entity);

        let engine = self.engine.clone();
        let placed = entity.clone();
        let guard = task.clone();
        let at = location.clone();
        self.engine.scheduler().run(
            ExecContext::Sync,
            Box::new(move || {
                if guard.is_cancelled() {
                    return;
                }
                engine.place(&placed, at, options.ignore_pitch_yaw);
            }),
        );

        if options.persistent {
            self.persist(&entity, Some(location));
        }
        info!("Spawned {} ({})", id, entity.numeric_id());
        Ok(entity)
    }

    /// Periodic visibility pass. Holds the entity weakly so that a forgotten
    /// handle cannot keep it alive.
    fn start_task(&self, entity: &Arc<VirtualEntity>) -> TaskHandle {
        let weak: Weak<VirtualEntity> = Arc::downgrade(entity);
        let engine = self.engine.clone();
        let handle = self.engine.scheduler().run_timer(
            ExecContext::Worker,
            self.config.initial_delay_ticks,
            entity.update_period_ticks(),
            Arc::new(move || {
                if let Some(entity) = weak.upgrade() {
                    engine.recompute(&entity);
                }
            }),
        );
        entity.set_task(handle.clone());
        handle
    }

    /// Unregister and destroy `id`. With `drop_persistent` its descriptor is
    /// deleted; otherwise a persisted descriptor is refreshed. Returns
    /// `false` for an unknown id.
    pub fn remove(&self, id: &str, drop_persistent: bool) -> bool {
        let Some(entity) = self.entities.write().unregister(id) else {
            return false;
        };
        self.tear_down(&entity, drop_persistent);
        info!("Removed {}", id);
        true
    }

    /// Returns how many entities were removed. With `drop_persistent` the
    /// store is emptied too, including descriptors that never loaded.
    pub fn remove_all(&self, drop_persistent: bool) -> usize {
        let drained = self.entities.write().drain();
        for (_, entity) in &drained {
            self.tear_down(entity, drop_persistent);
        }
        if drop_persistent {
            self.persistent.lock().clear();
            if let Some(store) = &self.store {
                for id in store.ids() {
                    if let Err(e) = store.delete(&id) {
                        warn!("Failed to delete descriptor of {}: {}", id, e);
                    }
                }
            }
        }
        if !drained.is_empty() {
            info!("Removed all {} entities", drained.len());
        }
        drained.len()
    }

    fn tear_down(&self, entity: &Arc<VirtualEntity>, drop_persistent: bool) {
        self.cancel_animation(entity.id());
        self.engine.kill(entity);
        // Dead entities still have to leave the host's manifest.
        self.engine.detach(entity);

        let id = entity.id();
        let was_persistent = self.persistent.lock().contains_key(id);
        if !was_persistent {
            return;
        }
        if drop_persistent {
            self.persistent.lock().remove(id);
            if let Some(store) = &self.store {
                if let Err(e) = store.delete(id) {
                    warn!("Failed to delete descriptor of {}: {}", id, e);
                }
            }
        } else {
            self.persist(entity, None);
        }
    }

    // -----------------------------------------------------------------------
    // Queries
    // -----------------------------------------------------------------------

    pub fn exists(&self, id: &str) -> bool {
        self.entities.read().contains(id)
    }

    pub fn get(&self, id: &str) -> Option<Arc<VirtualEntity>> {
        self.entities.read().lookup_by_id(id).cloned()
    }

    pub fn get_by_numeric_id(&self, numeric_id: NumericId) -> Option<Arc<VirtualEntity>> {
        self.entities.read().lookup_by_numeric_id(numeric_id).cloned()
    }

    /// All registered entities, ordered by id.
    pub fn list(&self) -> Vec<Arc<VirtualEntity>> {
        let mut all = self.entities.read().values();
        all.sort_by(|a, b| a.id().cmp(b.id()));
        all
    }

    pub fn ids(&self) -> Vec<String> {
        let mut ids = self.entities.read().ids();
        ids.sort();
        ids
    }

    pub fn len(&self) -> usize {
        self.entities.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entities.read().is_empty()
    }

    fn require(&self, id: &str) -> Result<Arc<VirtualEntity>> {
        self.get(id)
            .ok_or_else(|| DisplayError::UnknownEntity(id.to_string()))
    }

    pub fn stats(&self) -> EngineStats {
        let all = self.list();
        EngineStats {
            registered_entities: all.len(),
            alive_entities: all.iter().filter(|e| e.is_alive()).count(),
            total_viewers: all.iter().map(|e| e.viewer_count()).sum(),
            cached_manifests: self.engine.passengers().len(),
        }
    }

    // -----------------------------------------------------------------------
    // Per-entity operations by id
    // -----------------------------------------------------------------------

    pub fn update(&self, id: &str) -> Result<ViewerDiff> {
        Ok(self.engine.update(&self.require(id)?))
    }

    /// Run `f` on `id` and push the result to viewers. Returns `false` for an
    /// unknown id.
    pub fn update_if_exists<F>(&self, id: &str, f: F) -> bool
    where
        F: FnOnce(&VirtualEntity),
    {
        let Some(entity) = self.get(id) else {
            return false;
        };
        f(entity.as_ref());
        self.engine.update(&entity);
        true
    }

    pub fn teleport(&self, id: &str, location: Location) -> Result<()> {
        self.engine.teleport(&self.require(id)?, location);
        Ok(())
    }

    pub fn set_render_mode(&self, id: &str, mode: RenderMode) -> Result<()> {
        self.engine.set_render_mode(&self.require(id)?, mode);
        Ok(())
    }

    pub fn show(&self, id: &str, client: &ClientId) -> Result<bool> {
        let entity = self.require(id)?;
        Ok(self.engine.show(&entity, client))
    }

    pub fn hide(&self, id: &str, client: &ClientId) -> Result<bool> {
        let entity = self.require(id)?;
        Ok(self.engine.hide(&entity, client))
    }

    pub fn attach(&self, id: &str, host: NumericId) -> Result<()> {
        self.engine.attach(&self.require(id)?, host);
        Ok(())
    }

    /// Attach `id` to the in-world presence of `client`.
    pub fn attach_to_client(&self, id: &str, client: &ClientId) -> Result<()> {
        let entity = self.require(id)?;
        let host = self
            .engine
            .directory()
            .presence_id(client)
            .ok_or_else(|| DisplayError::UnknownEntity(format!("presence of {}", client)))?;
        self.engine.attach(&entity, host);
        Ok(())
    }

    pub fn detach(&self, id: &str) -> Result<bool> {
        Ok(self.engine.detach(&self.require(id)?))
    }

    /// Spawn a copy of `source_id` under `new_id` at the source's location.
    pub fn copy(&self, source_id: &str, new_id: &str, persistent: bool) -> Result<Arc<VirtualEntity>> {
        let source = self.require(source_id)?;
        let location = require_location(&source)?;
        let copy = source.copy_as(new_id)?;
        self.spawn(
            copy,
            location,
            SpawnOptions {
                persistent,
                ignore_pitch_yaw: false,
            },
        )
    }

    // -----------------------------------------------------------------------
    // Client lifecycle
    // -----------------------------------------------------------------------

    /// Register a handler under `name`, replacing any previous one.
    pub fn register_lifecycle_handler(&self, name: impl Into<String>, handler: Arc<dyn LifecycleHandler>) {
        let name = name.into();
        let mut handlers = self.handlers.write();
        handlers.retain(|(n, _)| *n != name);
        handlers.push((name, handler));
    }

    pub fn remove_lifecycle_handler(&self, name: &str) -> bool {
        let mut handlers = self.handlers.write();
        let before = handlers.len();
        handlers.retain(|(n, _)| n != name);
        handlers.len() != before
    }

    fn handlers(&self) -> Vec<Arc<dyn LifecycleHandler>> {
        self.handlers.read().iter().map(|(_, h)| h.clone()).collect()
    }

    pub fn on_client_join(&self, client: &ClientId) {
        debug!("Client {} joined", client);
        for handler in self.handlers() {
            handler.on_join(client);
        }
    }

    /// Forget `client` in every viewer set, then notify handlers.
    pub fn on_client_quit(&self, client: &ClientId) {
        debug!("Client {} quit", client);
        let all = self.entities.read().values();
        for entity in &all {
            self.engine.forget_client(entity, client);
        }
        for handler in self.handlers() {
            handler.on_quit(client);
        }
    }

    /// Feed an outbound packet the host sent on its own.
    pub fn observe_outbound(&self, packet: &Packet) {
        self.engine.passengers().observe(packet);
    }

    // -----------------------------------------------------------------------
    // Persistence
    // -----------------------------------------------------------------------

    fn persist(&self, entity: &VirtualEntity, location: Option<Location>) -> bool {
        let Some(store) = &self.store else {
            warn!("No descriptor store configured; {} is not persisted", entity.id());
            return false;
        };
        let Some(mut descriptor) = entity.descriptor() else {
            warn!("Interaction box {} cannot be persisted", entity.id());
            return false;
        };
        {
            // An entity whose placement has not run yet has no live location.
            let mut persistent = self.persistent.lock();
            let saved = persistent.get(entity.id()).cloned().flatten();
            descriptor.location = location.or(descriptor.location).or(saved);
            persistent.insert(entity.id().to_string(), descriptor.location.clone());
        }
        match store.save(&descriptor) {
            Ok(()) => true,
            Err(e) => {
                warn!("Failed to persist {}: {}", entity.id(), e);
                false
            }
        }
    }

    pub fn is_persistent(&self, id: &str) -> bool {
        self.persistent.lock().contains_key(id)
    }

    pub fn make_persistent(&self, id: &str) -> Result<()> {
        let entity = self.require(id)?;
        if self.store.is_none() {
            return Err(DisplayError::Persistence("no descriptor store configured".into()));
        }
        if entity.is_interaction() {
            return Err(DisplayError::Persistence(format!(
                "interaction box {} cannot be persisted",
                id
            )));
        }
        if !self.persist(&entity, None) {
            return Err(DisplayError::Persistence(format!("failed to save {}", id)));
        }
        Ok(())
    }

    /// Stop persisting `id` and delete its stored descriptor.
    pub fn remove_persistence(&self, id: &str) -> Result<bool> {
        self.persistent.lock().remove(id);
        match &self.store {
            Some(store) => store.delete(id),
            None => Ok(false),
        }
    }

    /// Refresh every persisted entity's descriptor. Returns how many saved.
    pub fn save_persistent(&self) -> usize {
        let ids: Vec<String> = self.persistent.lock().keys().cloned().collect();
        ids.iter()
            .filter_map(|id| self.get(id))
            .filter(|entity| self.persist(entity, None))
            .count()
    }

    /// Spawn every stored descriptor. Returns how many were spawned.
    pub fn load_persisted(&self) -> Result<usize> {
        let Some(store) = &self.store else {
            return Ok(0);
        };
        let mut spawned = 0;
        for descriptor in store.load_all()? {
            let Some(location) = descriptor.location.clone() else {
                warn!("Stored entity {} has no location; skipped", descriptor.id);
                continue;
            };
            let entity = match VirtualEntity::from_descriptor(&descriptor) {
                Ok(entity) => entity,
                Err(e) => {
                    warn!("Stored entity {} is invalid: {}", descriptor.id, e);
                    continue;
                }
            };
            match self.spawn(entity, location.clone(), SpawnOptions::default()) {
                Ok(_) => {
                    self.persistent
                        .lock()
                        .insert(descriptor.id.clone(), Some(location));
                    spawned += 1;
                }
                Err(e) => warn!("Failed to restore {}: {}", descriptor.id, e),
            }
        }
        info!("Restored {} persisted entities", spawned);
        Ok(spawned)
    }

    // -----------------------------------------------------------------------
    // Text animation
    // -----------------------------------------------------------------------

    /// Cycle `animation`'s frames on the text display `id`, replacing any
    /// running animation. The first frame shows immediately.
    pub fn animate(&self, id: &str, animation: TextAnimation) -> Result<TaskHandle> {
        let entity = self.require(id)?;
        if !matches!(entity.appearance(), Some(Appearance::Text(_))) {
            return Err(DisplayError::NotText(id.to_string()));
        }
        if animation.frames.is_empty() {
            return Err(DisplayError::EmptyAnimation(id.to_string()));
        }

        let weak = Arc::downgrade(&entity);
        let engine = self.engine.clone();
        let frames = Arc::new(animation.frames);
        let next = Arc::new(AtomicUsize::new(0));
        let handle = self.engine.scheduler().run_timer(
            ExecContext::Worker,
            0,
            animation.interval_ticks,
            Arc::new(move || {
                let Some(entity) = weak.upgrade() else {
                    return;
                };
                let i = next.fetch_add(1, Ordering::Relaxed) % frames.len();
                entity.set_text(frames[i].clone());
                engine.push_metadata(&entity);
            }),
        );

        if let Some(old) = self.animations.lock().insert(id.to_string(), handle.clone()) {
            old.cancel();
        }
        Ok(handle)
    }

    pub fn cancel_animation(&self, id: &str) -> bool {
        match self.animations.lock().remove(id) {
            Some(handle) => {
                handle.cancel();
                true
            }
            None => false,
        }
    }

    pub fn is_animating(&self, id: &str) -> bool {
        self.animations
            .lock()
            .get(id)
            .is_some_and(|h| !h.is_cancelled())
    }
}
