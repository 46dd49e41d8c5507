//! Routes inbound "client interacted with entity X" events to interaction
//! boxes.

use crate::error::Result;
use crate::manager::EntityManager;
use crate::protocol::InteractEntity;
use crate::scheduler::ExecContext;
use crate::types::{ClientId, NumericId};
use log::debug;
use std::sync::Arc;

pub struct InteractionRouter {
    manager: Arc<EntityManager>,
}

impl InteractionRouter {
    pub fn new(manager: Arc<EntityManager>) -> Self {
        Self { manager }
    }

    /// Returns `true` when the event was routed to a box. The callback itself
    /// runs later on the sync context, and only if the client is still
    /// online, in the box's world and within reach.
    pub fn handle(&self, client: &ClientId, entity_id: NumericId) -> bool {
        let Some(entity) = self.manager.get_by_numeric_id(entity_id) else {
            debug!("Interaction with foreign entity {} by {}", entity_id, client);
            return false;
        };
        if !entity.is_interaction() {
            debug!("Interaction with non-interactive entity {} by {}", entity.id(), client);
            return false;
        }

        let directory = self.manager.engine().directory().clone();
        let radius_squared = self.manager.config().interaction_radius_squared;
        let client = client.clone();
        self.manager.engine().scheduler().run(
            ExecContext::Sync,
            Box::new(move || {
                let Some(at) = directory.location(&client) else {
                    debug!("Interacting client {} went offline", client);
                    return;
                };
                let Some(box_at) = entity.location() else {
                    return;
                };
                if !at.same_world(&box_at) || at.distance_squared(&box_at) > radius_squared {
                    debug!("Client {} out of reach of {}", client, entity.id());
                    return;
                }
                entity.trigger_interaction(&client);
            }),
        );
        true
    }

    pub fn handle_event(&self, event: &InteractEntity) -> bool {
        self.handle(&event.client, event.entity_id)
    }

    /// Decode a raw JSON `InteractEntity` frame and route it.
    pub fn handle_frame(&self, payload: &[u8]) -> Result<bool> {
        let event: InteractEntity = serde_json::from_slice(payload)?;
        Ok(self.handle_event(&event))
    }
}
