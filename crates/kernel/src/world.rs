use crate::config::WorldConfig;
use crate::entity::Entity;
use crate::pointer::{PointerEventKind, PointerState};
use crate::registry::Entities;
use crate::replicated::QueuedEvent;
use crate::services::Services;
use glam::{Quat, Vec3};
use realm_assets::Loader;
use realm_common::{
    Blueprint, BlueprintError, BlueprintPatch, Diagnostic, Diagnostics, EntityData, EntityId,
    EntityPatch, NodeId,
};
use realm_input::{Button, ControlState};
use realm_net::{NetMessage, Network};
use realm_physics::Physics;
use realm_script::ScriptEvent;
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::path::Path;

/// Bus flush rounds per frame. Events emitted by listeners during the last
/// round wait for the next frame.
const MAX_BUS_ROUNDS: usize = 8;

/// Errors from world operations.
#[derive(Debug, thiserror::Error)]
pub enum WorldError {
    #[error("entity {0} not found")]
    EntityNotFound(EntityId),
    #[error("entity {0} is not an app")]
    NotAnApp(EntityId),
    #[error(transparent)]
    Blueprint(#[from] BlueprintError),
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Full world state for initial transfer or saving to disk.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct WorldSnapshot {
    pub blueprints: Vec<Blueprint>,
    pub entities: Vec<EntityData>,
}

impl WorldSnapshot {
    pub fn save(&self, path: impl AsRef<Path>) -> Result<(), WorldError> {
        let json = serde_json::to_string_pretty(self)?;
        std::fs::write(path, json)?;
        Ok(())
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self, WorldError> {
        let text = std::fs::read_to_string(path)?;
        Ok(serde_json::from_str(&text)?)
    }
}

/// One peer's view of the shared world.
///
/// Owns the services and the entity registry and drives them one frame at a
/// time. Network messages come in through [`World::handle_message`]; local
/// changes go through the other operations, which broadcast when asked to.
pub struct World {
    services: Services,
    entities: Entities,
    accumulator: f32,
    pointer: PointerState,
    frame: u64,
}

impl World {
    pub fn new(
        config: WorldConfig,
        loader: Box<dyn Loader>,
        physics: Box<dyn Physics>,
        network: Box<dyn Network>,
    ) -> Self {
        tracing::info!(peer = %network.id(), server = network.is_server(), "world created");
        Self {
            services: Services::new(config, loader, physics, network),
            entities: Entities::new(),
            accumulator: 0.0,
            pointer: PointerState::new(),
            frame: 0,
        }
    }

    pub fn services(&self) -> &Services {
        &self.services
    }

    pub fn services_mut(&mut self) -> &mut Services {
        &mut self.services
    }

    pub fn config(&self) -> &WorldConfig {
        &self.services.config
    }

    pub fn entities(&self) -> &Entities {
        &self.entities
    }

    pub fn diagnostics(&self) -> &Diagnostics {
        &self.services.diagnostics
    }

    /// Input for the next frame.
    pub fn controls_mut(&mut self) -> &mut ControlState {
        &mut self.services.controls
    }

    /// Frames run so far.
    pub fn frame_count(&self) -> u64 {
        self.frame
    }

    /// Take the recent diagnostics. Session totals stay in [`Diagnostics::count`].
    pub fn drain_diagnostics(&mut self) -> Vec<Diagnostic> {
        self.services.diagnostics.drain()
    }

    pub fn local_player(&self) -> Option<&Entity> {
        self.entities.player()
    }

    pub fn add_blueprint(&mut self, blueprint: Blueprint, local: bool) {
        if local {
            self.services
                .network
                .send(NetMessage::BlueprintAdded(blueprint.clone()), None);
        }
        self.services.blueprints.add(blueprint);
    }

    /// Apply a blueprint change and rebuild every app made from it.
    pub fn modify_blueprint(&mut self, patch: BlueprintPatch, local: bool) -> Result<(), WorldError> {
        let id = patch.id.clone();
        self.services.blueprints.modify(patch.clone())?;
        if local {
            self.services
                .network
                .send(NetMessage::BlueprintModified(patch), None);
        }
        let rebuilt = self.entities.rebuild_blueprint(&mut self.services, &id);
        tracing::debug!(blueprint = %id, rebuilt, "blueprint applied");
        Ok(())
    }

    /// Add an entity created on this peer and announce it.
    pub fn add_entity(&mut self, data: EntityData) -> EntityId {
        self.entities.add(&mut self.services, data, true).id().clone()
    }

    /// Remove an entity the network reported gone.
    pub fn remove_entity(&mut self, id: &EntityId) {
        self.entities.remove(&mut self.services, id);
    }

    /// Destroy an entity on this peer's behalf and announce it. False if it
    /// was already gone.
    pub fn destroy_entity(&mut self, id: &EntityId) -> bool {
        self.entities.destroy(&mut self.services, id, true)
    }

    pub fn modify_entity(&mut self, patch: EntityPatch, local: bool) {
        if local {
            self.services
                .network
                .send(NetMessage::EntityModified(patch.clone()), None);
        }
        self.entities.modify(&mut self.services, &patch);
    }

    /// This peer finished uploading an app's model.
    pub fn complete_upload(&mut self, id: &EntityId) -> Result<(), WorldError> {
        self.app_op(id, |entity, services| entity.on_uploaded(services))
    }

    /// Place an app this peer is moving.
    pub fn move_app(&mut self, id: &EntityId, position: Vec3, quaternion: Quat) -> Result<(), WorldError> {
        self.app_op(id, |entity, services| {
            entity.move_to(position, quaternion, services)
        })
    }

    fn app_op(
        &mut self,
        id: &EntityId,
        f: impl FnOnce(&mut Entity, &mut Services),
    ) -> Result<(), WorldError> {
        match self.entities.get(id) {
            None => return Err(WorldError::EntityNotFound(id.clone())),
            Some(entity) if entity.as_app().is_none() => {
                return Err(WorldError::NotAnApp(id.clone()));
            }
            Some(_) => {}
        }
        self.entities.apply(&mut self.services, id, f);
        Ok(())
    }

    /// Apply a message from another peer.
    pub fn handle_message(&mut self, message: NetMessage) {
        tracing::trace!(message = message.name(), "message received");
        let services = &mut self.services;
        match message {
            NetMessage::EntityAdded(data) => {
                self.entities.add(services, data, false);
            }
            NetMessage::EntityModified(patch) => self.entities.modify(services, &patch),
            NetMessage::EntityRemoved { id } => self.entities.remove(services, &id),
            NetMessage::EntityEvent {
                entity_id,
                version,
                name,
                data,
                sender,
            } => {
                let event = QueuedEvent {
                    version,
                    name,
                    data,
                    sender,
                };
                self.entities.on_event(services, &entity_id, event);
            }
            NetMessage::BlueprintAdded(blueprint) => services.blueprints.add(blueprint),
            NetMessage::BlueprintModified(patch) => {
                if let Err(err) = self.modify_blueprint(patch, false) {
                    self.services.diagnostics.warn(err.to_string());
                }
            }
            NetMessage::Chat(chat) => {
                services
                    .events
                    .emit("chat", json!({ "from": chat.from, "body": chat.body }));
            }
        }
    }

    /// Point at `target`, or at nothing. Fires enter and leave events on the
    /// interactive nodes along its ancestor chain.
    pub fn set_pointer_target(&mut self, target: Option<NodeId>) {
        let Self {
            services,
            entities,
            pointer,
            ..
        } = self;
        let chain: Vec<NodeId> = target
            .and_then(|node| services.stage.path_to(node))
            .unwrap_or_default()
            .into_iter()
            .filter(|id| {
                services
                    .stage
                    .find(*id)
                    .is_some_and(|(_, node)| node.pointer.any())
            })
            .collect();
        pointer.hover(chain, |node, kind| {
            dispatch_pointer(services, entities, node, kind)
        });
    }

    /// Advance one frame of `dt` seconds.
    pub fn frame(&mut self, dt: f32) {
        self.frame += 1;
        let _span = tracing::debug_span!("frame", n = self.frame).entered();

        self.services.network.update(f64::from(dt));
        if !self.entities.take_removed().is_empty() {
            self.prune_pointer();
        }
        self.flush_bus();
        self.entities.poll(&mut self.services);

        let step = self.services.config.fixed_timestep;
        let max_steps = self.services.config.max_fixed_steps;
        self.accumulator += dt;
        let mut steps = 0;
        while self.accumulator >= step && steps < max_steps {
            self.entities.fixed_update(&mut self.services, step);
            self.services.physics.step(step);
            self.accumulator -= step;
            steps += 1;
        }
        if self.accumulator >= step {
            tracing::debug!(backlog = self.accumulator, "fixed step backlog dropped");
            self.accumulator %= step;
        }

        self.entities.update(&mut self.services, dt);
        self.pointer_buttons();
        self.entities.late_update(&mut self.services, dt);
        self.services.controls.end_frame();
    }

    /// Forget hovered or pressed nodes that left the stage.
    fn prune_pointer(&mut self) {
        let stage = &self.services.stage;
        let gone: Vec<NodeId> = self
            .pointer
            .hovered()
            .iter()
            .chain(self.pointer.pressed())
            .copied()
            .filter(|node| stage.find(*node).is_none())
            .collect();
        for node in gone {
            self.pointer.forget(node);
        }
    }

    fn pointer_buttons(&mut self) {
        let pressed = self.services.controls.was_pressed(Button::PointerPrimary);
        let released = self.services.controls.was_released(Button::PointerPrimary);
        let Self {
            services,
            entities,
            pointer,
            ..
        } = self;
        if pressed {
            pointer.press(|node, kind| dispatch_pointer(services, entities, node, kind));
        }
        if released {
            pointer.release(|node, kind| dispatch_pointer(services, entities, node, kind));
        }
    }

    /// Deliver queued world bus events to their subscribers.
    fn flush_bus(&mut self) {
        for _ in 0..MAX_BUS_ROUNDS {
            let batch: Vec<_> = std::iter::from_fn(|| self.services.events.next()).collect();
            if batch.is_empty() {
                return;
            }
            for event in batch {
                let event = ScriptEvent::new(event.name, event.data);
                self.entities.on_world_event(&mut self.services, &event);
            }
        }
        let pending = self.services.events.pending();
        if pending > 0 {
            tracing::debug!(pending, "world events deferred to next frame");
        }
    }

    pub fn snapshot(&self) -> WorldSnapshot {
        WorldSnapshot {
            blueprints: self.services.blueprints.serialize(),
            entities: self.entities.serialize(),
        }
    }

    /// Load blueprints then entities, as a joining peer does.
    pub fn load_snapshot(&mut self, snapshot: WorldSnapshot) {
        self.services.blueprints.deserialize(snapshot.blueprints);
        self.entities
            .deserialize(&mut self.services, snapshot.entities);
    }
}

fn dispatch_pointer(
    services: &mut Services,
    entities: &mut Entities,
    node: NodeId,
    kind: PointerEventKind,
) -> bool {
    let Some((owner, target)) = services.stage.find(node) else {
        return false;
    };
    let wanted = match kind {
        PointerEventKind::Enter => target.pointer.enter,
        PointerEventKind::Leave => target.pointer.leave,
        PointerEventKind::Down => target.pointer.down,
        PointerEventKind::Up => target.pointer.up,
    };
    if !wanted {
        return false;
    }
    let owner = owner.clone();
    let mut consumed = false;
    entities.apply(services, &owner, |entity, services| {
        consumed = entity.on_pointer(kind.event_name(), node, services);
    });
    consumed
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::app::Mode;
    use crate::testing::{TestScript, world, world_on};
    use realm_common::{Node, PointerHandlers, Severity};
    use realm_net::LoopbackNetwork;
    use realm_script::ScriptFault;

    const DT: f32 = 1.0 / 50.0;
    const BOX: &str = "asset://box.glb";
    const SCRIPT: &str = "script://test";

    fn app<'a>(world: &'a World, id: &EntityId) -> &'a crate::app::App {
        world.entities().get(id).and_then(Entity::as_app).unwrap()
    }

    fn root_name(world: &World, id: &EntityId) -> String {
        let root = app(world, id).root().unwrap();
        world.services().stage.get(root).unwrap().name.clone()
    }

    fn scripted(world: &mut World, loader: &realm_assets::MemoryLoader, script: &TestScript) {
        loader.insert_model(BOX, Node::group("box"));
        loader.insert_script(SCRIPT, script.factory());
        world.add_blueprint(Blueprint::new("bp", BOX).with_script(SCRIPT), false);
    }

    #[test]
    fn destroy_broadcasts_once() {
        let (mut world, loader, network) = world("peer-1");
        loader.insert_model(BOX, Node::group("box"));
        world.add_blueprint(Blueprint::new("bp", BOX), false);
        let id = world.add_entity(EntityData::app("a1", "bp"));

        assert!(world.destroy_entity(&id));
        assert!(!world.destroy_entity(&id));
        assert_eq!(network.count("entityRemoved"), 1);
        assert!(world.services().stage.is_empty());
        assert!(world.entities().is_empty());
    }

    #[test]
    fn locally_added_app_is_announced_once_and_built_when_loaded() {
        let (mut world, loader, network) = world("peer-1");
        loader.insert_model(BOX, Node::group("box"));
        loader.set_latency(BOX, 2);
        world.add_blueprint(Blueprint::new("bp", BOX), false);
        let id = world.add_entity(EntityData::app("a1", "bp"));

        assert_eq!(network.count("entityAdded"), 1);
        assert!(app(&world, &id).is_building());
        assert!(app(&world, &id).root().is_none());
        for _ in 0..3 {
            world.frame(DT);
        }
        assert!(!app(&world, &id).is_building());
        assert_eq!(root_name(&world, &id), "box");
        assert_eq!(app(&world, &id).mode(), Some(Mode::Active));
        assert_eq!(network.count("entityAdded"), 1);
    }

    #[test]
    fn only_the_latest_build_is_applied() {
        let (mut world, loader, _) = world("peer-1");
        loader.insert_model("asset://v1.glb", Node::group("v1"));
        loader.insert_model("asset://v2.glb", Node::group("v2"));
        loader.set_latency("asset://v1.glb", 1);
        loader.set_latency("asset://v2.glb", 4);
        world.add_blueprint(Blueprint::new("bp", "asset://v1.glb"), false);
        let id = world.add_entity(EntityData::app("a1", "bp"));

        let patch = BlueprintPatch {
            id: "bp".into(),
            version: 1,
            model: Some("asset://v2.glb".into()),
            ..BlueprintPatch::default()
        };
        world.modify_blueprint(patch, false).unwrap();
        // The first build resolved during the rebuild's poll and was dropped.
        assert_eq!(app(&world, &id).generation(), 2);
        assert!(app(&world, &id).root().is_none());

        for _ in 0..6 {
            world.frame(DT);
        }
        assert_eq!(root_name(&world, &id), "v2");
        assert_eq!(world.services().stage.len(), 1);
    }

    #[test]
    fn future_event_waits_for_the_matching_blueprint_version() {
        let (mut world, loader, _) = world("peer-1");
        let script = TestScript::new().listen(&["ping"]);
        loader.insert_model(BOX, Node::group("box"));
        loader.insert_script(SCRIPT, script.factory());
        world.add_blueprint(Blueprint::new("bp", BOX).with_script(SCRIPT).with_version(4), false);
        let id = world.add_entity(EntityData::app("a1", "bp"));
        assert_eq!(app(&world, &id).version(), 4);

        let event = |version| NetMessage::EntityEvent {
            entity_id: id.clone(),
            version,
            name: "ping".into(),
            data: json!(version),
            sender: None,
        };
        world.handle_message(event(5));
        assert_eq!(script.count("ping"), 0);
        assert_eq!(app(&world, &id).queued_events(), 1);
        world.handle_message(event(3));
        assert_eq!(script.count("ping"), 1);

        let patch = BlueprintPatch {
            id: "bp".into(),
            version: 5,
            ..BlueprintPatch::default()
        };
        world.modify_blueprint(patch, false).unwrap();
        assert_eq!(app(&world, &id).version(), 5);
        assert_eq!(script.log(), vec!["exec", "ping", "exec", "ping"]);
        assert_eq!(app(&world, &id).queued_events(), 0);
    }

    #[test]
    fn current_event_is_dispatched_immediately() {
        let (mut world, loader, _) = world("peer-1");
        let script = TestScript::new().listen(&["ping"]);
        scripted(&mut world, &loader, &script);
        let id = world.add_entity(EntityData::app("a1", "bp"));
        world.handle_message(NetMessage::EntityEvent {
            entity_id: id.clone(),
            version: 0,
            name: "ping".into(),
            data: json!(null),
            sender: None,
        });
        assert_eq!(script.count("ping"), 1);
    }

    #[test]
    fn position_change_does_not_rebuild() {
        let (mut world, loader, _) = world("peer-1");
        let script = TestScript::new();
        scripted(&mut world, &loader, &script);
        let id = world.add_entity(EntityData::app("a1", "bp"));
        let generation = app(&world, &id).generation();

        let target = Vec3::new(4.0, 0.0, -2.0);
        world.modify_entity(EntityPatch::new("a1").with_position(target), false);

        assert_eq!(app(&world, &id).generation(), generation);
        assert_eq!(script.count("exec"), 1);
        assert_eq!(app(&world, &id).position_target(), target);
        let root = app(&world, &id).root().unwrap();
        assert_eq!(world.services().stage.get(root).unwrap().transform.position, target);
    }

    #[test]
    fn state_change_rebuilds() {
        let (mut world, loader, _) = world("peer-1");
        let script = TestScript::new();
        scripted(&mut world, &loader, &script);
        let id = world.add_entity(EntityData::app("a1", "bp"));
        world.modify_entity(EntityPatch::new("a1").with_state(json!({ "open": true })), false);
        assert_eq!(app(&world, &id).generation(), 2);
        assert_eq!(script.count("exec"), 2);
        assert_eq!(app(&world, &id).state().state, json!({ "open": true }));
    }

    #[test]
    fn script_fault_shows_the_crash_block() {
        let (mut world, loader, _) = world("peer-1");
        let script = TestScript::new().on_exec(|_, _| Err(ScriptFault::new("boom")));
        scripted(&mut world, &loader, &script);
        let id = world.add_entity(EntityData::app("a1", "bp"));

        assert_eq!(app(&world, &id).mode(), Some(Mode::Crashed));
        assert_eq!(root_name(&world, &id), "crash-block");
        assert!(!app(&world, &id).has_script());
        assert_eq!(app(&world, &id).generation(), 2);
        assert_eq!(script.count("exec"), 1);
        assert!(world.diagnostics().count(Severity::Error) >= 1);
    }

    #[test]
    fn fault_during_update_crashes_once() {
        let (mut world, loader, _) = world("peer-1");
        let script = TestScript::new()
            .listen(&["update"])
            .on_event(|event, _, _| match event.name.as_str() {
                "update" => Err(ScriptFault::new("bad frame")),
                _ => Ok(()),
            });
        scripted(&mut world, &loader, &script);
        let id = world.add_entity(EntityData::app("a1", "bp"));
        assert!(world.entities().is_hot(&id));

        world.frame(DT);
        world.frame(DT);
        assert_eq!(script.count("update"), 1);
        assert_eq!(app(&world, &id).mode(), Some(Mode::Crashed));
        assert!(!world.entities().is_hot(&id));
    }

    #[test]
    fn hot_set_follows_frame_listeners() {
        let (mut world, loader, _) = world("peer-1");
        let script = TestScript::new().listen(&["fixedUpdate", "update", "lateUpdate"]);
        scripted(&mut world, &loader, &script);
        loader.insert_model("asset://plain.glb", Node::group("plain"));
        world.add_blueprint(Blueprint::new("plain", "asset://plain.glb"), false);
        let busy = world.add_entity(EntityData::app("a1", "bp"));
        let idle = world.add_entity(EntityData::app("a2", "plain"));

        assert!(world.entities().is_hot(&busy));
        assert!(!world.entities().is_hot(&idle));
        world.frame(DT);
        assert_eq!(script.count("fixedUpdate"), 1);
        assert_eq!(script.count("update"), 1);
        assert_eq!(script.count("lateUpdate"), 1);
    }

    #[test]
    fn fixed_steps_are_capped_per_frame() {
        let (mut world, loader, _) = world("peer-1");
        let script = TestScript::new().listen(&["fixedUpdate"]);
        scripted(&mut world, &loader, &script);
        world.add_entity(EntityData::app("a1", "bp"));
        world.frame(1.0);
        assert_eq!(script.count("fixedUpdate"), 5);
        world.frame(DT);
        assert_eq!(script.count("fixedUpdate"), 6);
    }

    #[test]
    fn fetch_from_a_torn_down_build_is_dropped() {
        let (mut world, loader, _) = world("peer-1");
        let script = TestScript::new()
            .listen(&["fetch"])
            .on_exec(|_, app| {
                let url = app.props()["url"].as_str().unwrap_or_default().to_string();
                app.fetch(&url);
                Ok(())
            })
            .on_event(|event, _, _| {
                assert_eq!(event.data["ok"], json!(true));
                Ok(())
            });
        loader.insert_model(BOX, Node::group("box"));
        loader.insert_script(SCRIPT, script.factory());
        loader.insert_json("asset://one.json", json!({ "n": 1 }));
        loader.insert_json("asset://two.json", json!({ "n": 2 }));
        loader.set_latency("asset://one.json", 3);
        let mut blueprint = Blueprint::new("bp", BOX).with_script(SCRIPT);
        blueprint.props.insert("url".into(), json!("asset://one.json"));
        world.add_blueprint(blueprint, false);
        let id = world.add_entity(EntityData::app("a1", "bp"));

        let mut props = serde_json::Map::new();
        props.insert("url".into(), json!("asset://two.json"));
        let patch = BlueprintPatch {
            id: "bp".into(),
            version: 1,
            props: Some(props),
            ..BlueprintPatch::default()
        };
        world.modify_blueprint(patch, false).unwrap();
        for _ in 0..5 {
            world.frame(DT);
        }
        assert_eq!(script.log(), vec!["exec", "exec", "fetch"]);
        assert_eq!(app(&world, &id).generation(), 2);
    }

    #[test]
    fn pointer_events_reach_the_owning_app() {
        let (mut world, loader, _) = world("peer-1");
        let script = TestScript::new()
            .listen(&["pointerenter", "pointerleave", "pointerdown", "pointerup"]);
        let button = Node::group("button").with_pointer(PointerHandlers {
            enter: true,
            leave: true,
            down: true,
            up: true,
        });
        loader.insert_model(BOX, Node::group("box").with_child(button));
        loader.insert_script(SCRIPT, script.factory());
        world.add_blueprint(Blueprint::new("bp", BOX).with_script(SCRIPT), false);
        let id = world.add_entity(EntityData::app("a1", "bp"));
        let root = app(&world, &id).root().unwrap();
        let button = world
            .services()
            .stage
            .get(root)
            .and_then(|r| r.find("button"))
            .map(|n| n.id)
            .unwrap();

        world.set_pointer_target(Some(button));
        world.controls_mut().press(Button::PointerPrimary);
        world.frame(DT);
        world.controls_mut().release(Button::PointerPrimary);
        world.frame(DT);
        world.set_pointer_target(None);

        assert_eq!(
            script.log(),
            vec!["exec", "pointerenter", "pointerdown", "pointerup", "pointerleave"]
        );
    }

    #[test]
    fn removed_apps_leave_the_pointer_state() {
        let (mut world, loader, _) = world("peer-1");
        let script = TestScript::new().listen(&["pointerenter", "pointerleave"]);
        let button = Node::group("button").with_pointer(PointerHandlers {
            enter: true,
            leave: true,
            ..PointerHandlers::default()
        });
        loader.insert_model(BOX, Node::group("box").with_child(button));
        loader.insert_script(SCRIPT, script.factory());
        world.add_blueprint(Blueprint::new("bp", BOX).with_script(SCRIPT), false);
        let id = world.add_entity(EntityData::app("a1", "bp"));
        let root = app(&world, &id).root().unwrap();
        let button = world
            .services()
            .stage
            .get(root)
            .and_then(|r| r.find("button"))
            .map(|n| n.id)
            .unwrap();
        world.set_pointer_target(Some(button));
        assert_eq!(world.pointer.hovered(), &[button]);

        world.remove_entity(&id);
        world.frame(DT);
        assert!(world.pointer.hovered().is_empty());
        assert!(world.entities.take_removed().is_empty());
        world.set_pointer_target(None);
        assert_eq!(script.log(), vec!["exec", "pointerenter"]);
    }

    #[test]
    fn drained_diagnostics_keep_their_totals() {
        let (mut world, _, _) = world("peer-1");
        world.modify_entity(EntityPatch::new("ghost"), false);
        assert_eq!(world.drain_diagnostics().len(), 1);
        assert!(world.diagnostics().entries().is_empty());
        assert_eq!(world.diagnostics().count(Severity::Warn), 1);
    }

    #[test]
    fn world_events_reach_subscribers_next_frame() {
        let (mut world, loader, _) = world("peer-1");
        let listener = TestScript::new().on_exec(|world, _| {
            world.on("door");
            Ok(())
        });
        let emitter = TestScript::new().on_exec(|_, app| {
            app.emit("door", json!("open"))?;
            Ok(())
        });
        loader.insert_model(BOX, Node::group("box"));
        loader.insert_script("script://listener", listener.factory());
        loader.insert_script("script://emitter", emitter.factory());
        world.add_blueprint(Blueprint::new("l", BOX).with_script("script://listener"), false);
        world.add_blueprint(Blueprint::new("e", BOX).with_script("script://emitter"), false);
        world.add_entity(EntityData::app("a1", "l"));
        world.add_entity(EntityData::app("a2", "e"));

        assert_eq!(listener.count("door"), 0);
        world.frame(DT);
        assert_eq!(listener.count("door"), 1);
        assert_eq!(emitter.count("door"), 0);
    }

    #[test]
    fn deprecated_world_emit_warns_once_per_session() {
        let (mut world, loader, _) = world("peer-1");
        let script = TestScript::new().on_exec(|world, _| {
            world.emit("door", json!(1))?;
            Ok(())
        });
        scripted(&mut world, &loader, &script);
        world.add_entity(EntityData::app("a1", "bp"));
        world.add_entity(EntityData::app("a2", "bp"));

        let warnings = world
            .diagnostics()
            .entries()
            .iter()
            .filter(|d| d.message.contains("deprecated"))
            .count();
        assert_eq!(warnings, 1);
        assert_eq!(world.services().events.emitted("door"), 2);
    }

    #[test]
    fn internal_event_names_crash_the_emitter() {
        let (mut world, loader, _) = world("peer-1");
        let script = TestScript::new().on_exec(|_, app| {
            app.emit("update", json!(null))?;
            Ok(())
        });
        scripted(&mut world, &loader, &script);
        let id = world.add_entity(EntityData::app("a1", "bp"));
        assert_eq!(app(&world, &id).mode(), Some(Mode::Crashed));
        assert_eq!(world.services().events.emitted("update"), 0);
    }

    #[test]
    fn moving_app_sends_pose_at_network_rate() {
        let (mut world, loader, network) = world("peer-1");
        loader.insert_model(BOX, Node::group("box").with_child(Node::new("snap", realm_common::NodeKind::Snap)));
        world.add_blueprint(Blueprint::new("bp", BOX), false);
        let id = world.add_entity(EntityData::app("a1", "bp").with_mover("peer-1"));
        assert_eq!(app(&world, &id).mode(), Some(Mode::Moving));
        assert!(world.entities().is_hot(&id));
        assert_eq!(app(&world, &id).snaps().len(), 1);

        world
            .move_app(&id, Vec3::new(1.0, 0.0, 0.0), Quat::IDENTITY)
            .unwrap();
        world.frame(0.05);
        assert_eq!(network.count("entityModified"), 0);
        world.frame(0.1);
        assert_eq!(network.count("entityModified"), 1);
        world.frame(0.2);
        assert_eq!(network.count("entityModified"), 1);
    }

    #[test]
    fn remote_mover_is_interpolated() {
        let (mut world, loader, _) = world("peer-1");
        loader.insert_model(BOX, Node::group("box"));
        world.add_blueprint(Blueprint::new("bp", BOX), false);
        world.handle_message(NetMessage::EntityAdded(
            EntityData::app("a1", "bp").with_mover("peer-2"),
        ));
        let id = EntityId::from("a1");
        world.handle_message(NetMessage::EntityModified(
            EntityPatch::new("a1").with_position(Vec3::new(2.0, 0.0, 0.0)),
        ));
        world.frame(1.0 / 16.0);
        let x = world.entities().get(&id).unwrap().data().position.x;
        assert!(x > 0.0 && x < 2.0, "x = {x}");
        world.frame(0.5);
        let x = world.entities().get(&id).unwrap().data().position.x;
        assert!((x - 2.0).abs() < 1e-4);
    }

    #[test]
    fn app_operations_check_the_target() {
        let (mut world, _, _) = world("peer-1");
        world.add_entity(EntityData::player("p1", "peer-1"));
        let player = EntityId::from("p1");
        assert!(matches!(
            world.move_app(&player, Vec3::ZERO, Quat::IDENTITY),
            Err(WorldError::NotAnApp(_))
        ));
        assert!(matches!(
            world.complete_upload(&EntityId::from("ghost")),
            Err(WorldError::EntityNotFound(_))
        ));
    }

    #[test]
    fn upload_by_another_peer_shows_a_placeholder_until_done() {
        let (mut world, loader, _) = world("peer-1");
        loader.insert_model(BOX, Node::group("box"));
        world.add_blueprint(Blueprint::new("bp", BOX), false);
        world.handle_message(NetMessage::EntityAdded(
            EntityData::app("a1", "bp").with_uploader("peer-2"),
        ));
        let id = EntityId::from("a1");
        assert_eq!(app(&world, &id).mode(), Some(Mode::Loading));
        assert_eq!(root_name(&world, &id), "placeholder");

        let done = EntityPatch {
            uploader: Some(None),
            ..EntityPatch::new("a1")
        };
        world.handle_message(NetMessage::EntityModified(done));
        assert_eq!(app(&world, &id).mode(), Some(Mode::Active));
        assert_eq!(root_name(&world, &id), "box");
    }

    #[test]
    fn finishing_a_local_upload_tells_everyone() {
        let (mut world, loader, network) = world("peer-1");
        loader.insert_model(BOX, Node::group("box"));
        world.add_blueprint(Blueprint::new("bp", BOX), false);
        let id = world.add_entity(EntityData::app("a1", "bp").with_uploader("peer-1"));
        assert_eq!(root_name(&world, &id), "box");

        world.complete_upload(&id).unwrap();
        assert_eq!(network.count("entityModified"), 1);
        assert!(world.entities().get(&id).unwrap().data().uploader.is_none());
    }

    #[test]
    fn stale_blueprint_patch_is_rejected() {
        let (mut world, loader, network) = world("peer-1");
        loader.insert_model(BOX, Node::group("box"));
        world.add_blueprint(Blueprint::new("bp", BOX).with_version(3), false);
        let patch = BlueprintPatch {
            id: "bp".into(),
            version: 3,
            ..BlueprintPatch::default()
        };
        assert!(matches!(
            world.modify_blueprint(patch, true),
            Err(WorldError::Blueprint(BlueprintError::StaleVersion { .. }))
        ));
        assert_eq!(network.count("blueprintModified"), 0);
    }

    #[test]
    fn local_player_walks_and_reports_its_pose() {
        let (mut world, _, network) = world("peer-1");
        world.add_entity(EntityData::player("p1", "peer-1"));
        assert!(world.local_player().is_some());

        world.controls_mut().press(Button::Forward);
        for _ in 0..100 {
            world.frame(DT);
        }
        let position = world.local_player().unwrap().data().position;
        assert!(position.z < -1.0, "moved to {position:?}");
        assert!(position.y.abs() < 1e-3);
        assert!(network.count("entityModified") > 1);
    }

    #[test]
    fn chat_from_the_network_lands_on_the_bus() {
        let (mut world, _, _) = world_on(LoopbackNetwork::server("server"));
        world.handle_message(NetMessage::Chat(realm_net::ChatMessage {
            from: None,
            body: "hi".into(),
        }));
        assert_eq!(world.services().events.emitted("chat"), 1);
    }

    #[test]
    fn missing_entities_only_warn() {
        let (mut world, _, _) = world("peer-1");
        world.handle_message(NetMessage::EntityRemoved { id: "ghost".into() });
        world.handle_message(NetMessage::EntityModified(EntityPatch::new("ghost")));
        world.frame(DT);
        assert_eq!(world.diagnostics().count(Severity::Warn), 2);
    }

    #[test]
    fn snapshot_survives_a_file_round_trip() {
        let (mut world, loader, _) = world("peer-1");
        loader.insert_model(BOX, Node::group("box"));
        world.add_blueprint(Blueprint::new("bp", BOX), false);
        world.add_entity(EntityData::app("a1", "bp").with_position(Vec3::new(1.0, 2.0, 3.0)));

        let tmp = tempfile::NamedTempFile::new().unwrap();
        world.snapshot().save(tmp.path()).unwrap();
        let snapshot = WorldSnapshot::load(tmp.path()).unwrap();
        assert_eq!(snapshot, world.snapshot());

        let (mut joined, loader, network) = world_on(LoopbackNetwork::client("peer-2"));
        loader.insert_model(BOX, Node::group("box"));
        joined.load_snapshot(snapshot);
        assert_eq!(joined.entities().len(), 1);
        assert_eq!(joined.services().stage.len(), 1);
        assert_eq!(network.count("entityAdded"), 0);
    }
}
