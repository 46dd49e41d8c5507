//! VisibilityEngine – per-entity viewer sets, render modes, attachment sync.
//!
//! One engine instance is shared by every entity a manager owns. It holds
//! no per-entity state of its own: viewers, blacklist and attachment all live
//! on the [`VirtualEntity`]; the only cross-entity state is the injected
//! [`PassengerCache`].

use crate::appearance::TextFormatter;
use crate::directory::ClientDirectory;
use crate::entity::{VirtualEntity, VisibilityInputs};
use crate::passengers::{with_passenger, without_passenger, PassengerCache, PassengerList};
use crate::protocol::{Packet, SetPassengers};
use crate::scheduler::{ExecContext, Scheduler};
use crate::transport::Transport;
use crate::types::{ClientId, Location, NumericId, RenderMode};
use log::{debug, warn};
use std::collections::BTreeSet;
use std::sync::Arc;

// ---------------------------------------------------------------------------
// Pass result
// ---------------------------------------------------------------------------

/// Viewers added and removed by a single [`VisibilityEngine::recompute`].
/// Both lists are sorted.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ViewerDiff {
    pub added: Vec<ClientId>,
    pub removed: Vec<ClientId>,
}

impl ViewerDiff {
    pub fn is_empty(&self) -> bool {
        self.added.is_empty() && self.removed.is_empty()
    }
}

#[derive(Clone)]
pub struct VisibilityEngine {
    directory: Arc<dyn ClientDirectory>,
    transport: Arc<dyn Transport>,
    passengers: Arc<PassengerCache>,
    scheduler: Arc<dyn Scheduler>,
    formatter: Arc<dyn TextFormatter>,
}

impl VisibilityEngine {
    pub fn new(
        directory: Arc<dyn ClientDirectory>,
        transport: Arc<dyn Transport>,
        passengers: Arc<PassengerCache>,
        scheduler: Arc<dyn Scheduler>,
        formatter: Arc<dyn TextFormatter>,
    ) -> Self {
        Self {
            directory,
            transport,
            passengers,
            scheduler,
            formatter,
        }
    }

    pub fn directory(&self) -> &Arc<dyn ClientDirectory> {
        &self.directory
    }

    pub fn passengers(&self) -> &Arc<PassengerCache> {
        &self.passengers
    }

    pub fn scheduler(&self) -> &Arc<dyn Scheduler> {
        &self.scheduler
    }

    // -----------------------------------------------------------------------
    // Periodic pass
    // -----------------------------------------------------------------------

    /// Bring `entity`'s viewer set in line with its render mode.
    ///
    /// A dead entity, an entity without a location and `RenderMode::None`
    /// all leave the viewer set untouched. `ViewerList` never changes it
    /// either; it only keeps an attached entity glued to its host.
    pub fn recompute(&self, entity: &Arc<VirtualEntity>) -> ViewerDiff {
        if !entity.is_alive() {
            return ViewerDiff::default();
        }
        let inputs = entity.visibility_inputs();
        let Some(location) = inputs.location.clone() else {
            warn!("Entity {} has no location; skipping visibility pass", entity.id());
            return ViewerDiff::default();
        };

        match inputs.render_mode {
            RenderMode::None => ViewerDiff::default(),
            RenderMode::ViewerList => {
                self.follow_host(entity, &inputs);
                ViewerDiff::default()
            }
            _ => {
                let candidates = self.candidates(&location, &inputs);
                self.apply(entity, candidates, inputs.attached_host)
            }
        }
    }

    /// Clients eligible to view an entity at `location`.
    fn candidates(&self, location: &Location, inputs: &VisibilityInputs) -> BTreeSet<ClientId> {
        let mut set: BTreeSet<ClientId> = self
            .directory
            .clients_in_world(&location.world)
            .into_iter()
            .filter(|(client, _)| !inputs.blacklist.contains(client))
            .filter(|(_, at)| at.distance_squared(location) <= inputs.view_distance_squared)
            .map(|(client, _)| client)
            .collect();

        if inputs.render_mode == RenderMode::NotAttachedToViewerHost {
            if let Some(host) = inputs.attached_host.and_then(|h| self.directory.resolve_numeric(h)) {
                set.remove(&host);
            }
        }
        set
    }

    fn apply(
        &self,
        entity: &Arc<VirtualEntity>,
        candidates: BTreeSet<ClientId>,
        attached_host: Option<NumericId>,
    ) -> ViewerDiff {
        let diff = {
            let mut viewers = entity.viewer_set();
            let removed: Vec<ClientId> = viewers.difference(&candidates).cloned().collect();
            let added: Vec<ClientId> = candidates.difference(&viewers).cloned().collect();
            *viewers = candidates;
            ViewerDiff { added, removed }
        };

        if !diff.removed.is_empty() {
            self.transport.send_many(&diff.removed, &entity.destroy_packet());
        }
        for client in &diff.added {
            self.send_presence(entity, client, attached_host);
        }
        if !diff.is_empty() {
            debug!(
                "Entity {}: +{} -{} viewers",
                entity.id(),
                diff.added.len(),
                diff.removed.len()
            );
        }
        diff
    }

    /// ViewerList with an attachment: teleport onto the host and refresh the
    /// manifest for the viewers already registered.
    fn follow_host(&self, entity: &Arc<VirtualEntity>, inputs: &VisibilityInputs) {
        let Some(host) = inputs.attached_host else {
            return;
        };
        match self
            .directory
            .resolve_numeric(host)
            .and_then(|client| self.directory.location(&client))
        {
            Some(host_location) => {
                let engine = self.clone();
                let entity = entity.clone();
                self.scheduler.run(
                    ExecContext::Sync,
                    Box::new(move || engine.move_now(&entity, host_location)),
                );
            }
            None => warn!(
                "Entity {}: attachment host {} not resolvable; not following",
                entity.id(),
                host
            ),
        }

        let viewers: Vec<ClientId> = entity
            .viewers()
            .into_iter()
            .filter(|c| self.directory.is_online(c))
            .collect();
        if viewers.is_empty() {
            return;
        }
        let manifest = self
            .passengers
            .update(host, |list| with_passenger(list, entity.numeric_id()));
        self.transport
            .send_many(&viewers, &passenger_packet(host, &manifest));
    }

    // -----------------------------------------------------------------------
    // Explicit viewer management
    // -----------------------------------------------------------------------

    /// Spawn `entity` for `client`. Returns `false` if it was already a
    /// viewer.
    pub fn add_viewer(&self, entity: &VirtualEntity, client: &ClientId) -> bool {
        if !entity.viewer_set().insert(client.clone()) {
            return false;
        }
        self.send_presence(entity, client, entity.attached_host());
        true
    }

    /// Destroy `entity` for `client`. Returns `false` if it was not a viewer.
    pub fn remove_viewer(&self, entity: &VirtualEntity, client: &ClientId) -> bool {
        if !entity.viewer_set().remove(client) {
            return false;
        }
        if let Err(e) = self.transport.send(client, &entity.destroy_packet()) {
            warn!("Failed to destroy {} for {}: {}", entity.id(), client, e);
        }
        true
    }

    /// Lift any blacklisting of `client` and add it as a viewer.
    pub fn show(&self, entity: &VirtualEntity, client: &ClientId) -> bool {
        entity.blacklist_remove(client);
        self.add_viewer(entity, client)
    }

    /// Blacklist `client` and remove it as a viewer.
    pub fn hide(&self, entity: &VirtualEntity, client: &ClientId) -> bool {
        entity.blacklist_add(client.clone());
        self.remove_viewer(entity, client)
    }

    pub fn remove_all_viewers(&self, entity: &VirtualEntity) -> Vec<ClientId> {
        let removed: Vec<ClientId> = std::mem::take(&mut *entity.viewer_set())
            .into_iter()
            .collect();
        if !removed.is_empty() {
            self.transport.send_many(&removed, &entity.destroy_packet());
        }
        removed
    }

    /// Drop a disconnected client from the viewer set. Nothing is sent.
    pub fn forget_client(&self, entity: &VirtualEntity, client: &ClientId) -> bool {
        entity.viewer_set().remove(client)
    }

    fn send_presence(&self, entity: &VirtualEntity, client: &ClientId, attached_host: Option<NumericId>) {
        let Some(spawn) = entity.spawn_packet() else {
            warn!("Entity {} has no location; not spawning for {}", entity.id(), client);
            return;
        };
        let mut packets = vec![spawn, entity.metadata_packet(self.formatter.as_ref())];
        if let Some(host) = attached_host {
            if entity.render_mode() != RenderMode::None {
                let manifest = self
                    .passengers
                    .update(host, |list| with_passenger(list, entity.numeric_id()));
                packets.push(passenger_packet(host, &manifest));
            }
        }
        for packet in &packets {
            if let Err(e) = self.transport.send(client, packet) {
                warn!("Failed to send {} for {} to {}: {}", packet.subject(), entity.id(), client, e);
                return;
            }
        }
    }

    // -----------------------------------------------------------------------
    // State pushes
    // -----------------------------------------------------------------------

    /// Move `entity` on the sync context and tell its viewers. Changing world
    /// drops every viewer; the next pass picks up the new world's clients.
    pub fn teleport(&self, entity: &Arc<VirtualEntity>, location: Location) {
        let engine = self.clone();
        let entity = entity.clone();
        self.scheduler.run(
            ExecContext::Sync,
            Box::new(move || engine.teleport_now(&entity, location)),
        );
    }

    pub(crate) fn teleport_now(&self, entity: &VirtualEntity, location: Location) {
        let changed_world = entity
            .location()
            .is_some_and(|old| !old.same_world(&location));
        if changed_world {
            self.remove_all_viewers(entity);
            entity.set_location(location);
            return;
        }
        self.move_now(entity, location);
    }

    /// Move `entity` and send the teleport to its viewers, whatever world
    /// the new location is in. Viewers are kept.
    fn move_now(&self, entity: &VirtualEntity, location: Location) {
        entity.set_location(location);
        if let Some(packet) = entity.teleport_packet() {
            self.transport.send_many(&entity.viewers(), &packet);
        }
    }

    /// Re-send the metadata of `entity` to every current viewer.
    pub fn push_metadata(&self, entity: &VirtualEntity) {
        let viewers = entity.viewers();
        if viewers.is_empty() {
            return;
        }
        let packet = entity.metadata_packet(self.formatter.as_ref());
        self.transport.send_many(&viewers, &packet);
    }

    /// A visibility pass followed by a metadata push.
    pub fn update(&self, entity: &Arc<VirtualEntity>) -> ViewerDiff {
        let diff = self.recompute(entity);
        self.push_metadata(entity);
        diff
    }

    /// Switch render mode on the sync context, then run a pass. Leaving
    /// `NotAttachedToViewerHost` while attached gives the host its view back.
    pub fn set_render_mode(&self, entity: &Arc<VirtualEntity>, mode: RenderMode) {
        let engine = self.clone();
        let entity = entity.clone();
        self.scheduler.run(
            ExecContext::Sync,
            Box::new(move || {
                let previous = entity.render_mode();
                if previous == mode {
                    return;
                }
                if previous == RenderMode::NotAttachedToViewerHost {
                    if let Some(client) = engine.host_client(&entity) {
                        engine.add_viewer(&entity, &client);
                    }
                }
                entity.set_render_mode(mode);
                engine.recompute(&entity);
            }),
        );
    }

    // -----------------------------------------------------------------------
    // Attachment
    // -----------------------------------------------------------------------

    /// Ride `host`. The rider's manifest entry is written immediately; the
    /// broadcast to viewers runs on the worker context.
    pub fn attach(&self, entity: &Arc<VirtualEntity>, host: NumericId) {
        if let Some(previous) = entity.attached_host() {
            if previous != host {
                self.detach(entity);
            }
        }
        entity.set_attached_host(host);

        if entity.render_mode() == RenderMode::NotAttachedToViewerHost {
            if let Some(client) = self.host_client(entity) {
                self.remove_viewer(entity, &client);
            }
        }

        let manifest = self
            .passengers
            .update(host, |list| with_passenger(list, entity.numeric_id()));
        debug!("Entity {} attached to {} ({:?})", entity.id(), host, manifest);
        self.broadcast_manifest(entity, host, manifest);
    }

    /// Stop riding. Returns `false` when `entity` was not attached.
    ///
    /// A dead entity only leaves the host's manifest; nobody is re-added as
    /// a viewer.
    pub fn detach(&self, entity: &Arc<VirtualEntity>) -> bool {
        let Some(host) = entity.take_attached_host() else {
            return false;
        };

        if entity.is_alive() && entity.render_mode() == RenderMode::NotAttachedToViewerHost {
            if let Some(client) = self.directory.resolve_numeric(host) {
                if self.directory.is_online(&client) && !entity.is_blacklisted(&client) {
                    self.add_viewer(entity, &client);
                }
            }
        }

        let manifest = self
            .passengers
            .update(host, |list| without_passenger(list, entity.numeric_id()));
        debug!("Entity {} detached from {} ({:?})", entity.id(), host, manifest);
        self.broadcast_manifest(entity, host, manifest);
        true
    }

    fn broadcast_manifest(&self, entity: &Arc<VirtualEntity>, host: NumericId, manifest: PassengerList) {
        if entity.render_mode() == RenderMode::None {
            return;
        }
        let transport = self.transport.clone();
        let entity = entity.clone();
        self.scheduler.run(
            ExecContext::Worker,
            Box::new(move || {
                let viewers = entity.viewers();
                if !viewers.is_empty() {
                    transport.send_many(&viewers, &passenger_packet(host, &manifest));
                }
            }),
        );
    }

    /// The online client `entity` rides, if any.
    fn host_client(&self, entity: &VirtualEntity) -> Option<ClientId> {
        let client = self.directory.resolve_numeric(entity.attached_host()?)?;
        self.directory.is_online(&client).then_some(client)
    }

    // -----------------------------------------------------------------------
    // Lifecycle
    // -----------------------------------------------------------------------

    /// Place a constructed entity and make it visible.
    pub(crate) fn place(&self, entity: &Arc<VirtualEntity>, location: Location, ignore_pitch_yaw: bool) {
        entity.place(location, ignore_pitch_yaw);
        self.update(entity);
    }

    /// Cancel the entity's task, destroy it for every viewer and mark it
    /// dead. A second call does nothing.
    pub fn kill(&self, entity: &VirtualEntity) -> bool {
        if !entity.shut_down() {
            return false;
        }
        self.remove_all_viewers(entity);
        true
    }
}

fn passenger_packet(host: NumericId, manifest: &PassengerList) -> Packet {
    Packet::SetPassengers(SetPassengers {
        host,
        passengers: manifest.to_vec(),
    })
}
