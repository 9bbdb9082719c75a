use crate::entity::Entity;
use crate::replicated::QueuedEvent;
use crate::services::Services;
use realm_common::{BlueprintId, EntityData, EntityId, EntityPatch, EntityType};
use realm_net::NetMessage;
use realm_script::ScriptEvent;
use serde_json::json;
use std::collections::{BTreeMap, BTreeSet};

/// All live entities, keyed by id, with the indexes the frame loop needs.
///
/// # Invariants
///
/// - An id maps to at most one live entity; re-adding replaces the old one.
/// - `hot` only names entities present in `items`.
/// - At most one local player.
#[derive(Default)]
pub struct Entities {
    items: BTreeMap<EntityId, Entity>,
    players: BTreeSet<EntityId>,
    local_player: Option<EntityId>,
    hot: BTreeSet<EntityId>,
    removed: Vec<EntityId>,
}

impl Entities {
    pub fn new() -> Self {
        Self::default()
    }

    /// Construct an entity from `data`. When `local`, the full record is
    /// broadcast once.
    pub fn add(&mut self, services: &mut Services, data: EntityData, local: bool) -> &Entity {
        let id = data.id.clone();
        if let Some(mut old) = self.items.remove(&id) {
            services
                .diagnostics
                .warn(format!("entity {id} added twice, replacing"));
            old.destroy(services, false);
            self.unindex(&id);
        }
        let announce = local.then(|| data.clone());
        let is_player = data.kind == EntityType::Player;
        let owned_here = data.owner.as_ref() == Some(services.network.id());

        let entity = Entity::new(data, services);
        if is_player {
            self.players.insert(id.clone());
            if owned_here {
                self.local_player = Some(id.clone());
                services.events.emit("player", json!({ "id": id }));
            } else if services.network.is_client() {
                services.events.emit("enter", json!({ "player": id }));
            }
        }
        if let Some(full) = announce {
            services.network.send(NetMessage::EntityAdded(full), None);
        }
        tracing::debug!(%id, player = is_player, local, "entity added");
        self.sync_hot(&id, entity.wants_hot());
        self.items.entry(id).or_insert(entity)
    }

    pub fn get(&self, id: &EntityId) -> Option<&Entity> {
        self.items.get(id)
    }

    pub fn get_mut(&mut self, id: &EntityId) -> Option<&mut Entity> {
        self.items.get_mut(id)
    }

    pub fn contains(&self, id: &EntityId) -> bool {
        self.items.contains_key(id)
    }

    /// The player this peer controls.
    pub fn player(&self) -> Option<&Entity> {
        self.local_player.as_ref().and_then(|id| self.items.get(id))
    }

    pub fn player_mut(&mut self) -> Option<&mut Entity> {
        let id = self.local_player.as_ref()?;
        self.items.get_mut(id)
    }

    /// A player entity by id; None for apps.
    pub fn get_player(&self, id: &EntityId) -> Option<&Entity> {
        self.items.get(id).filter(|e| e.is_player())
    }

    pub fn players(&self) -> impl Iterator<Item = &Entity> + '_ {
        self.players.iter().filter_map(|id| self.items.get(id))
    }

    pub fn iter(&self) -> impl Iterator<Item = &Entity> + '_ {
        self.items.values()
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn is_hot(&self, id: &EntityId) -> bool {
        self.hot.contains(id)
    }

    pub fn hot_count(&self) -> usize {
        self.hot.len()
    }

    /// Force an entity in or out of the per-frame set.
    pub fn set_hot(&mut self, id: &EntityId, hot: bool) {
        if self.items.contains_key(id) {
            self.sync_hot(id, hot);
        }
    }

    fn sync_hot(&mut self, id: &EntityId, hot: bool) {
        if hot {
            self.hot.insert(id.clone());
        } else {
            self.hot.remove(id);
        }
    }

    fn refresh(&mut self, id: &EntityId) {
        if let Some(hot) = self.items.get(id).map(Entity::wants_hot) {
            self.sync_hot(id, hot);
        }
    }

    fn unindex(&mut self, id: &EntityId) {
        self.players.remove(id);
        self.hot.remove(id);
        if self.local_player.as_ref() == Some(id) {
            self.local_player = None;
        }
    }

    /// Remove an entity on the network's behalf.
    pub fn remove(&mut self, services: &mut Services, id: &EntityId) {
        self.destroy(services, id, false);
    }

    /// Destroy and forget an entity. Returns false if there was none.
    pub fn destroy(&mut self, services: &mut Services, id: &EntityId, local: bool) -> bool {
        let Some(mut entity) = self.items.remove(id) else {
            services
                .diagnostics
                .warn(format!("remove: no entity {id}"));
            return false;
        };
        let destroyed = entity.destroy(services, local);
        self.unindex(id);
        self.removed.push(id.clone());
        destroyed
    }

    /// Ids removed since the last call. The world drains this every frame.
    pub fn take_removed(&mut self) -> Vec<EntityId> {
        std::mem::take(&mut self.removed)
    }

    /// Run `f` on one entity, then resync its hotness. False if there is
    /// no such entity.
    pub fn apply(
        &mut self,
        services: &mut Services,
        id: &EntityId,
        f: impl FnOnce(&mut Entity, &mut Services),
    ) -> bool {
        let Some(entity) = self.items.get_mut(id) else {
            return false;
        };
        f(entity, services);
        self.refresh(id);
        true
    }

    /// Rebuild every app made from `blueprint`. Returns how many.
    pub fn rebuild_blueprint(&mut self, services: &mut Services, blueprint: &BlueprintId) -> usize {
        let ids: Vec<EntityId> = self
            .items
            .values()
            .filter(|e| e.data().blueprint.as_ref() == Some(blueprint))
            .map(|e| e.id().clone())
            .collect();
        for id in &ids {
            self.apply(services, id, |entity, services| entity.rebuild(services));
        }
        ids.len()
    }

    pub fn modify(&mut self, services: &mut Services, patch: &EntityPatch) {
        let Some(entity) = self.items.get_mut(&patch.id) else {
            services
                .diagnostics
                .warn(format!("modify: no entity {}", patch.id));
            return;
        };
        entity.modify(patch, services);
        self.refresh(&patch.id);
    }

    pub fn on_event(&mut self, services: &mut Services, id: &EntityId, event: QueuedEvent) {
        let Some(entity) = self.items.get_mut(id) else {
            services
                .diagnostics
                .warn(format!("event {}: no entity {id}", event.name));
            return;
        };
        entity.on_event(event, services);
        self.refresh(id);
    }

    /// Deliver a world bus event to every subscriber.
    pub fn on_world_event(&mut self, services: &mut Services, event: &ScriptEvent) {
        for id in services.events.subscribers(&event.name) {
            if let Some(entity) = self.items.get_mut(&id) {
                entity.on_world_event(event.clone(), services);
                self.refresh(&id);
            }
        }
    }

    pub fn fixed_update(&mut self, services: &mut Services, dt: f32) {
        let _span = tracing::info_span!("entities_fixed_update").entered();
        self.each_hot(services, |entity, services| entity.fixed_update(dt, services));
    }

    pub fn update(&mut self, services: &mut Services, dt: f32) {
        let _span = tracing::info_span!("entities_update").entered();
        self.each_hot(services, |entity, services| entity.update(dt, services));
    }

    pub fn late_update(&mut self, services: &mut Services, dt: f32) {
        let _span = tracing::info_span!("entities_late_update").entered();
        self.each_hot(services, |entity, services| entity.late_update(dt, services));
    }

    /// Members are taken from a snapshot of the hot set, so each runs once
    /// even if the set changes during the pass.
    fn each_hot(&mut self, services: &mut Services, mut run: impl FnMut(&mut Entity, &mut Services)) {
        let hot: Vec<EntityId> = self.hot.iter().cloned().collect();
        for id in hot {
            if let Some(entity) = self.items.get_mut(&id) {
                run(entity, services);
                self.refresh(&id);
            }
        }
    }

    /// Advance every entity's pending builds and fetches.
    pub fn poll(&mut self, services: &mut Services) {
        let ids: Vec<EntityId> = self.items.keys().cloned().collect();
        for id in ids {
            if let Some(entity) = self.items.get_mut(&id) {
                entity.poll(services);
                self.refresh(&id);
            }
        }
    }

    pub fn serialize(&self) -> Vec<EntityData> {
        self.items
            .values()
            .filter(|e| !e.is_dead())
            .map(Entity::serialize)
            .collect()
    }

    pub fn deserialize(&mut self, services: &mut Services, entities: Vec<EntityData>) {
        for data in entities {
            self.add(services, data, false);
        }
    }
}
