use crate::app::App;
use crate::player::Player;
use crate::replicated::QueuedEvent;
use crate::services::Services;
use realm_common::{EntityData, EntityId, EntityPatch, EntityType, NodeId};
use realm_net::NetMessage;
use realm_script::ScriptEvent;

pub enum EntityKind {
    App(App),
    Player(Player),
}

/// A replicated entity: its data record plus the behavior for its type.
pub struct Entity {
    data: EntityData,
    dead: bool,
    kind: EntityKind,
}

impl Entity {
    pub fn new(mut data: EntityData, services: &mut Services) -> Self {
        let kind = match data.kind {
            EntityType::App => EntityKind::App(App::new(&mut data, services)),
            EntityType::Player => EntityKind::Player(Player::new(&mut data, services)),
        };
        Self {
            data,
            dead: false,
            kind,
        }
    }

    pub fn id(&self) -> &EntityId {
        &self.data.id
    }

    pub fn data(&self) -> &EntityData {
        &self.data
    }

    pub fn kind(&self) -> &EntityKind {
        &self.kind
    }

    pub fn is_dead(&self) -> bool {
        self.dead
    }

    pub fn is_player(&self) -> bool {
        matches!(self.kind, EntityKind::Player(_))
    }

    pub fn as_app(&self) -> Option<&App> {
        match &self.kind {
            EntityKind::App(app) => Some(app),
            EntityKind::Player(_) => None,
        }
    }

    pub fn as_player(&self) -> Option<&Player> {
        match &self.kind {
            EntityKind::Player(player) => Some(player),
            EntityKind::App(_) => None,
        }
    }

    pub fn as_player_mut(&mut self) -> Option<&mut Player> {
        match &mut self.kind {
            EntityKind::Player(player) => Some(player),
            EntityKind::App(_) => None,
        }
    }

    /// Visual root on the stage, if built.
    pub fn root(&self) -> Option<NodeId> {
        match &self.kind {
            EntityKind::App(app) => app.root(),
            EntityKind::Player(player) => player.root(),
        }
    }

    /// Whether the entity needs the per-frame phases.
    pub fn wants_hot(&self) -> bool {
        match &self.kind {
            EntityKind::App(app) => app.wants_hot(),
            EntityKind::Player(_) => true,
        }
    }

    pub fn modify(&mut self, patch: &EntityPatch, services: &mut Services) {
        if self.dead {
            return;
        }
        let Self { data, kind, .. } = self;
        match kind {
            EntityKind::App(app) => app.modify(patch, data, services),
            EntityKind::Player(player) => player.modify(patch, data, services),
        }
    }

    pub fn on_event(&mut self, event: QueuedEvent, services: &mut Services) {
        if self.dead {
            return;
        }
        let Self { data, kind, .. } = self;
        match kind {
            EntityKind::App(app) => app.on_event(event, data, services),
            EntityKind::Player(player) => player.on_event(event, data, services),
        }
    }

    pub fn on_world_event(&mut self, event: ScriptEvent, services: &mut Services) {
        if self.dead {
            return;
        }
        let Self { data, kind, .. } = self;
        if let EntityKind::App(app) = kind {
            app.on_world_event(event, data, services);
        }
    }

    /// Returns whether a handler stopped propagation.
    pub fn on_pointer(&mut self, name: &str, node: NodeId, services: &mut Services) -> bool {
        if self.dead {
            return false;
        }
        let Self { data, kind, .. } = self;
        match kind {
            EntityKind::App(app) => app.on_pointer(name, node, data, services),
            EntityKind::Player(_) => false,
        }
    }

    pub fn fixed_update(&mut self, dt: f32, services: &mut Services) {
        let Self { data, kind, .. } = self;
        match kind {
            EntityKind::App(app) => app.fixed_update(dt, data, services),
            EntityKind::Player(player) => player.fixed_update(dt, data, services),
        }
    }

    pub fn update(&mut self, dt: f32, services: &mut Services) {
        let Self { data, kind, .. } = self;
        match kind {
            EntityKind::App(app) => app.update(dt, data, services),
            EntityKind::Player(player) => player.update(dt, data, services),
        }
    }

    pub fn late_update(&mut self, dt: f32, services: &mut Services) {
        let Self { data, kind, .. } = self;
        if let EntityKind::App(app) = kind {
            app.late_update(dt, data, services);
        }
    }

    /// Advance in-flight builds and fetches.
    pub fn poll(&mut self, services: &mut Services) {
        if self.dead {
            return;
        }
        let Self { data, kind, .. } = self;
        match kind {
            EntityKind::App(app) => app.poll(data, services),
            EntityKind::Player(player) => player.poll(data, services),
        }
    }

    /// Move an app this peer is dragging. No-op for players.
    pub fn move_to(&mut self, position: glam::Vec3, quaternion: glam::Quat, services: &mut Services) {
        let Self { data, kind, .. } = self;
        if let EntityKind::App(app) = kind {
            app.move_to(position, quaternion, data, services);
        }
    }

    /// The local upload for this app finished.
    pub fn on_uploaded(&mut self, services: &mut Services) {
        let Self { data, kind, .. } = self;
        if let EntityKind::App(app) = kind {
            app.on_uploaded(data, services);
        }
    }

    /// Rebuild from current data, e.g. after its blueprint changed.
    pub fn rebuild(&mut self, services: &mut Services) {
        if self.dead {
            return;
        }
        let Self { data, kind, .. } = self;
        match kind {
            EntityKind::App(app) => app.build(false, data, services),
            EntityKind::Player(player) => player.build(data, services),
        }
    }

    /// Tear the entity down. Only the first call has any effect; when
    /// `local`, that call also tells the network. Returns false if the
    /// entity was already dead.
    pub fn destroy(&mut self, services: &mut Services, local: bool) -> bool {
        if self.dead {
            return false;
        }
        self.dead = true;
        let Self { data, kind, .. } = self;
        match kind {
            EntityKind::App(app) => app.unbuild(data, services),
            EntityKind::Player(player) => player.destroy(data, services),
        }
        services.events.off_all(&data.id);
        if local {
            services.network.send(
                NetMessage::EntityRemoved {
                    id: data.id.clone(),
                },
                None,
            );
        }
        tracing::debug!(id = %data.id, local, "entity destroyed");
        true
    }

    pub fn serialize(&self) -> EntityData {
        self.data.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{networked, services};
    use realm_common::Blueprint;

    #[test]
    fn destroy_is_idempotent_and_broadcasts_once() {
        let (mut services, loader, network) = networked("peer-1");
        loader.insert_model("asset://box.glb", realm_common::Node::group("box"));
        services.blueprints.add(Blueprint::new("bp", "asset://box.glb"));
        let mut entity = Entity::new(EntityData::app("a1", "bp"), &mut services);
        assert!(entity.root().is_some());

        assert!(entity.destroy(&mut services, true));
        assert!(!entity.destroy(&mut services, true));
        assert!(entity.is_dead());
        assert_eq!(network.count("entityRemoved"), 1);
        assert!(services.stage.is_empty());
    }

    #[test]
    fn players_are_always_hot() {
        let (mut services, _) = services("peer-1");
        let entity = Entity::new(EntityData::player("p2", "peer-2"), &mut services);
        assert!(entity.is_player());
        assert!(entity.wants_hot());
        assert!(entity.as_app().is_none());
    }
}
