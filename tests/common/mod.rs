//! Shared fixtures for the integration tests.
#![allow(dead_code)]

use janet_display::{
    appearance::Appearance,
    directory::InMemoryDirectory,
    entity::VirtualEntity,
    manager::{EntityManager, SpawnOptions},
    persistence::DescriptorStore,
    protocol::Packet,
    scheduler::ManualScheduler,
    transport::RecordingTransport,
    types::{ClientId, EngineConfig, Location, RenderMode},
};
use std::sync::Arc;

pub const WORLD: &str = "overworld";

pub fn loc(x: f64, y: f64, z: f64) -> Location {
    Location::new(WORLD, x, y, z)
}

pub struct Harness {
    pub directory: Arc<InMemoryDirectory>,
    pub transport: Arc<RecordingTransport>,
    pub scheduler: Arc<ManualScheduler>,
    pub manager: Arc<EntityManager>,
}

impl Harness {
    pub fn new() -> Self {
        Self::build(EngineConfig::default(), None)
    }

    pub fn with_store(store: Arc<dyn DescriptorStore>) -> Self {
        Self::build(EngineConfig::default(), Some(store))
    }

    pub fn build(config: EngineConfig, store: Option<Arc<dyn DescriptorStore>>) -> Self {
        let directory = Arc::new(InMemoryDirectory::new());
        let transport = Arc::new(RecordingTransport::new());
        let scheduler = ManualScheduler::new();
        let mut manager = EntityManager::with_collaborators(
            config,
            directory.clone(),
            transport.clone(),
            scheduler.clone(),
        );
        if let Some(store) = store {
            manager = manager.with_store(store);
        }
        Self {
            directory,
            transport,
            scheduler,
            manager: Arc::new(manager),
        }
    }

    /// Connect `name` at `location`; `presence` is its in-world numeric id.
    pub fn join(&self, name: &str, presence: i32, location: Location) -> ClientId {
        let client = ClientId::new(name);
        self.directory.join(client.clone(), presence, location);
        self.manager.on_client_join(&client);
        client
    }

    /// Spawn a text display and run the placement on the sync lane.
    pub fn spawn_text(&self, id: &str, mode: RenderMode, at: Location) -> Arc<VirtualEntity> {
        let entity = self
            .manager
            .new_display(id, Appearance::text(id))
            .expect("valid id")
            .with_render_mode(mode);
        let entity = self
            .manager
            .spawn(entity, at, SpawnOptions::default())
            .expect("spawn");
        self.scheduler.run_pending();
        entity
    }

    /// One full update period.
    pub fn pass(&self) {
        self.scheduler.advance(self.manager.config().update_period_ticks);
    }

    pub fn subjects_to(&self, client: &ClientId) -> Vec<&'static str> {
        self.transport
            .sent_to(client)
            .iter()
            .map(Packet::subject)
            .collect()
    }
}

pub fn sorted(mut ids: Vec<ClientId>) -> Vec<ClientId> {
    ids.sort();
    ids
}

pub fn client(name: &str) -> ClientId {
    ClientId::new(name)
}
