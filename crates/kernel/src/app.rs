//! App entities: a blueprint instance with a model and an optional script.

use crate::build::{BuildOutput, BuildTask};
use crate::replicated::{QueuedEvent, Replicated};
use crate::services::Services;
use glam::{Mat4, Quat, Vec3};
use realm_assets::{AssetKind, LoadError, LoadFuture, poll_now};
use realm_common::{Blueprint, EntityData, EntityPatch, NodeId, PeerId, Transform};
use realm_net::{ChatMessage, NetMessage};
use realm_script::{
    AppProxy, AppState, CancelToken, FetchId, Listeners, Script, ScriptCommand, ScriptEvent,
    ScriptFault, WorldProxy,
};
use serde_json::{Value, json};
use std::collections::BTreeSet;
use std::task::Poll;

/// What a built app is doing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mode {
    /// Built normally; the script (if any) is running.
    Active,
    /// Being moved by a peer. The script does not run.
    Moving,
    /// Another peer is still uploading the model.
    Loading,
    /// A load or the script failed; showing the crash block.
    Crashed,
}

struct PendingFetch {
    id: FetchId,
    url: String,
    future: LoadFuture,
    cancel: CancelToken,
}

pub struct App {
    replicated: Replicated,
    mode: Option<Mode>,
    blueprint: Option<Blueprint>,
    script: Option<Box<dyn Script>>,
    state: AppState,
    listeners: Listeners,
    world_listeners: BTreeSet<String>,
    snaps: Vec<Vec3>,
    fetches: Vec<PendingFetch>,
    send_timer: f32,
    last_sent: (Vec3, Quat),
}

impl App {
    /// Create the app and start its first build.
    pub fn new(data: &mut EntityData, services: &mut Services) -> Self {
        let mut app = Self {
            replicated: Replicated::new(data.position, data.quaternion, services.config.network_rate),
            mode: None,
            blueprint: None,
            script: None,
            state: AppState::default(),
            listeners: Listeners::new(),
            world_listeners: BTreeSet::new(),
            snaps: Vec::new(),
            fetches: Vec::new(),
            send_timer: 0.0,
            last_sent: (data.position, data.quaternion),
        };
        app.build(false, data, services);
        app
    }

    /// `None` until the first build completes.
    pub fn mode(&self) -> Option<Mode> {
        self.mode
    }

    pub fn generation(&self) -> u64 {
        self.replicated.generation()
    }

    pub fn is_building(&self) -> bool {
        self.replicated.is_building()
    }

    pub fn root(&self) -> Option<NodeId> {
        self.replicated.root()
    }

    pub fn world_nodes(&self) -> &[NodeId] {
        self.replicated.world_nodes()
    }

    pub fn has_script(&self) -> bool {
        self.script.is_some()
    }

    /// Blueprint version the current build was made from.
    pub fn version(&self) -> u32 {
        self.blueprint.as_ref().map_or(0, |bp| bp.version)
    }

    pub fn blueprint(&self) -> Option<&Blueprint> {
        self.blueprint.as_ref()
    }

    pub fn state(&self) -> &AppState {
        &self.state
    }

    pub fn listens_to(&self, name: &str) -> bool {
        self.listeners.contains(name)
    }

    /// Snap point positions, collected while the app is being moved.
    pub fn snaps(&self) -> &[Vec3] {
        &self.snaps
    }

    pub fn queued_events(&self) -> usize {
        self.replicated.queued()
    }

    pub fn position_target(&self) -> Vec3 {
        self.replicated.position.target()
    }

    /// Needs per-frame callbacks.
    pub fn wants_hot(&self) -> bool {
        self.mode == Some(Mode::Moving) || self.listeners.is_hot()
    }

    /// Start a new build generation.
    pub fn build(&mut self, crashed: bool, data: &mut EntityData, services: &mut Services) {
        let generation = self.replicated.begin();
        let blueprint = data
            .blueprint
            .as_ref()
            .and_then(|id| services.blueprints.get(id))
            .cloned();
        let crash_url = &services.config.crash_block_url;
        let uploading_elsewhere = data
            .uploader
            .as_ref()
            .is_some_and(|uploader| uploader != services.network.id());

        let task = if uploading_elsewhere {
            BuildTask::placeholder(generation, blueprint)
        } else if crashed {
            BuildTask::fallback(generation, blueprint, crash_url)
        } else {
            match blueprint {
                Some(bp) => {
                    let kind = AssetKind::for_model_url(&bp.model);
                    let (model, script) = (bp.model.clone(), bp.script.clone());
                    BuildTask::model(generation, Some(bp), &model, kind, script, crash_url)
                }
                None => {
                    services
                        .diagnostics
                        .warn(format!("app {} has no blueprint", data.id));
                    BuildTask::fallback(generation, None, crash_url)
                }
            }
        };
        tracing::debug!(id = %data.id, generation, crashed, "build started");
        self.replicated.start(task);
        self.poll(data, services);
    }

    /// Advance builds and fetches.
    pub fn poll(&mut self, data: &mut EntityData, services: &mut Services) {
        while let Some(output) = self.replicated.poll(
            &data.id,
            services.loader.as_mut(),
            &mut services.diagnostics,
        ) {
            self.finish(output, data, services);
        }
        self.poll_fetches(data, services);
    }

    fn finish(&mut self, output: BuildOutput, data: &mut EntityData, services: &mut Services) {
        let generation = output.generation;
        self.unbuild(data, services);

        let local = services.network.id();
        let mode = if data.mover.is_some() {
            Mode::Moving
        } else if data.uploader.as_ref().is_some_and(|u| u != local) {
            Mode::Loading
        } else if output.crashed {
            Mode::Crashed
        } else {
            Mode::Active
        };
        self.mode = Some(mode);
        self.blueprint = output.blueprint;
        self.state = AppState {
            instance_id: data.id.clone(),
            version: self.version(),
            state: data.state.clone(),
            props: self
                .blueprint
                .as_ref()
                .map(|bp| bp.props.clone())
                .unwrap_or_default(),
            is_server: services.network.is_server(),
            ..AppState::default()
        };
        self.replicated.mount(
            &mut services.stage,
            &data.id,
            output.root,
            Transform::from_pose(data.position, data.quaternion),
        );
        tracing::debug!(id = %data.id, generation, ?mode, "build finished");

        if let (Mode::Active, Some(factory)) = (mode, output.script) {
            self.script = Some(factory());
            let result = self.call_script(data, services, |script, world, app| {
                script.exec(world, app)
            });
            if let Err(fault) = result {
                self.crash(fault, data, services);
                return;
            }
            if self.replicated.generation() != generation {
                return;
            }
        }

        if mode == Mode::Moving {
            if let Some(root) = self.replicated.root() {
                self.snaps = services.stage.snap_points(root);
            }
        }
        self.replicated.reset_interpolators(
            data.position,
            data.quaternion,
            services.config.network_rate,
        );
        self.last_sent = (data.position, data.quaternion);

        let version = self.version();
        while let Some(event) = self.replicated.pop_ready(version) {
            self.dispatch(event.into(), data, services);
            if self.replicated.generation() != generation {
                return;
            }
        }
        self.replicated.finish_building();
    }

    /// Tear down the current build. Idempotent.
    pub fn unbuild(&mut self, data: &mut EntityData, services: &mut Services) {
        if self.script.is_some() && self.listeners.contains("destroy") {
            let event = ScriptEvent::new("destroy", Value::Null);
            let result = self.call_script(data, services, |script, world, app| {
                script.on_event(&event, world, app)
            });
            if let Err(fault) = result {
                services
                    .diagnostics
                    .error(format!("app {} failed during destroy: {fault}", data.id));
            }
        }
        self.replicated.teardown(&mut services.stage);
        self.listeners.clear();
        for name in std::mem::take(&mut self.world_listeners) {
            services.events.off(&name, &data.id);
        }
        self.script = None;
        self.snaps.clear();
    }

    fn crash(&mut self, fault: ScriptFault, data: &mut EntityData, services: &mut Services) {
        services
            .diagnostics
            .error(format!("app {} crashed: {fault}", data.id));
        self.build(true, data, services);
    }

    /// Apply a field-level change.
    pub fn modify(&mut self, patch: &EntityPatch, data: &mut EntityData, services: &mut Services) {
        patch.apply_to(data);
        if patch.is_structural() {
            self.build(false, data, services);
            return;
        }
        if patch.position.is_none() && patch.quaternion.is_none() {
            return;
        }
        if let Some(position) = patch.position {
            self.replicated.position.push(position, None);
        }
        if let Some(quaternion) = patch.quaternion {
            self.replicated.quaternion.push(quaternion, None);
        }
        if self.mode != Some(Mode::Moving) {
            self.replicated.position.snap();
            self.replicated.quaternion.snap();
            self.replicated
                .place(&mut services.stage, data.position, data.quaternion);
        }
    }

    /// An entity event from the network or a local sender.
    pub fn on_event(
        &mut self,
        event: QueuedEvent,
        data: &mut EntityData,
        services: &mut Services,
    ) {
        if self.replicated.is_building() || event.version > self.version() {
            tracing::trace!(id = %data.id, name = %event.name, version = event.version, "event queued");
            self.replicated.enqueue(event);
            return;
        }
        self.dispatch(event.into(), data, services);
    }

    /// A world bus event the app subscribed to with `world.on`.
    pub fn on_world_event(
        &mut self,
        event: ScriptEvent,
        data: &mut EntityData,
        services: &mut Services,
    ) {
        if self.world_listeners.contains(&event.name) {
            self.invoke(&event, data, services);
        }
    }

    /// Deliver to the script if it listens for the event.
    fn dispatch(&mut self, event: ScriptEvent, data: &mut EntityData, services: &mut Services) {
        if self.listeners.contains(&event.name) {
            self.invoke(&event, data, services);
        }
    }

    fn invoke(&mut self, event: &ScriptEvent, data: &mut EntityData, services: &mut Services) {
        let result = self.call_script(data, services, |script, world, app| {
            script.on_event(event, world, app)
        });
        if let Err(fault) = result {
            self.crash(fault, data, services);
        }
    }

    /// Pointer event on one of the app's nodes. Returns whether the script
    /// stopped propagation.
    pub fn on_pointer(
        &mut self,
        name: &str,
        node: NodeId,
        data: &mut EntityData,
        services: &mut Services,
    ) -> bool {
        if !self.listeners.contains(name) {
            return false;
        }
        self.state.consumed = false;
        let event = ScriptEvent::new(name, json!({ "node": node.0 }));
        self.invoke(&event, data, services);
        std::mem::take(&mut self.state.consumed)
    }

    pub fn fixed_update(&mut self, dt: f32, data: &mut EntityData, services: &mut Services) {
        self.dispatch(ScriptEvent::new("fixedUpdate", json!(dt)), data, services);
    }

    pub fn update(&mut self, dt: f32, data: &mut EntityData, services: &mut Services) {
        if self.mode == Some(Mode::Moving) {
            if data.mover.as_ref() == Some(services.network.id()) {
                self.send_pose(dt, data, services);
            } else {
                let position = self.replicated.position.update(dt);
                let quaternion = self.replicated.quaternion.update(dt);
                data.position = position;
                data.quaternion = quaternion;
                self.replicated
                    .place(&mut services.stage, position, quaternion);
            }
        }
        self.dispatch(ScriptEvent::new("update", json!(dt)), data, services);
    }

    pub fn late_update(&mut self, dt: f32, data: &mut EntityData, services: &mut Services) {
        self.dispatch(ScriptEvent::new("lateUpdate", json!(dt)), data, services);
    }

    /// Move an app this peer is moving.
    pub fn move_to(
        &mut self,
        position: Vec3,
        quaternion: Quat,
        data: &mut EntityData,
        services: &mut Services,
    ) {
        data.position = position;
        data.quaternion = quaternion;
        self.replicated
            .place(&mut services.stage, position, quaternion);
    }

    fn send_pose(&mut self, dt: f32, data: &EntityData, services: &mut Services) {
        self.send_timer += dt;
        if self.send_timer < services.config.network_rate {
            return;
        }
        self.send_timer = 0.0;
        let pose = (data.position, data.quaternion);
        if pose == self.last_sent {
            return;
        }
        self.last_sent = pose;
        let patch = EntityPatch::new(data.id.clone())
            .with_position(pose.0)
            .with_quaternion(pose.1);
        services.network.send(NetMessage::EntityModified(patch), None);
    }

    /// The local upload finished; show the real model everywhere.
    pub fn on_uploaded(&mut self, data: &mut EntityData, services: &mut Services) {
        let patch = EntityPatch {
            uploader: Some(None),
            ..EntityPatch::new(data.id.clone())
        };
        services
            .network
            .send(NetMessage::EntityModified(patch.clone()), None);
        self.modify(&patch, data, services);
    }

    /// Run one script call and apply what it asked for.
    fn call_script(
        &mut self,
        data: &mut EntityData,
        services: &mut Services,
        call: impl FnOnce(
            &mut dyn Script,
            &mut WorldProxy<'_>,
            &mut AppProxy<'_>,
        ) -> Result<(), ScriptFault>,
    ) -> Result<(), ScriptFault> {
        let Some(script) = self.script.as_mut() else {
            return Ok(());
        };
        let view = services.world_view();
        let mut world_commands = Vec::new();
        let mut app_commands = Vec::new();
        let root = self
            .replicated
            .root()
            .and_then(|id| services.stage.get_mut(id));
        let result = {
            let mut world = WorldProxy::new(&view, &mut world_commands);
            let mut app = AppProxy::new(&mut self.state, root, &mut self.listeners, &mut app_commands);
            call(script.as_mut(), &mut world, &mut app)
        };
        data.state = self.state.state.clone();
        for command in world_commands.into_iter().chain(app_commands) {
            self.apply(command, data, services);
        }
        result
    }

    fn apply(&mut self, command: ScriptCommand, data: &EntityData, services: &mut Services) {
        match command {
            ScriptCommand::AddWorldNode(node) => {
                let id = services.stage.insert(&data.id, node);
                self.replicated.track_world_node(id);
            }
            ScriptCommand::RemoveWorldNode(node) => {
                if self.replicated.forget_world_node(node) {
                    services.stage.remove(node);
                }
            }
            ScriptCommand::AttachWorldNode(node) => self.attach(node, data, services),
            ScriptCommand::WorldOn(name) => {
                services.events.on(&name, &data.id);
                self.world_listeners.insert(name);
            }
            ScriptCommand::WorldOff(name) => {
                services.events.off(&name, &data.id);
                self.world_listeners.remove(&name);
            }
            ScriptCommand::WorldEmit { name, data: payload } => {
                services
                    .diagnostics
                    .warn_once("deprecated-emit", "world.emit is deprecated, use app.emit");
                services.events.emit(&name, payload);
            }
            ScriptCommand::AppEmit { name, data: payload } => {
                services.events.emit(&name, payload);
            }
            ScriptCommand::Chat { message, broadcast } => {
                let from = services.network.id().clone();
                services
                    .events
                    .emit("chat", json!({ "from": from, "body": message }));
                if broadcast {
                    let chat = ChatMessage {
                        from: Some(from),
                        body: message,
                    };
                    services.network.send(NetMessage::Chat(chat), None);
                }
            }
            ScriptCommand::Send { name, data: payload, ignore } => {
                let message = self.entity_event(data, services.network.id(), name, payload);
                services.network.send(message, ignore.as_ref());
            }
            ScriptCommand::SendTo { player, name, data: payload } => {
                let message = self.entity_event(data, services.network.id(), name, payload);
                services.network.send_to(&player, message);
            }
            ScriptCommand::Fetch { id, url } => {
                let future: LoadFuture = match services.loader.get(AssetKind::Json, &url) {
                    Some(asset) => Box::pin(std::future::ready(Ok::<_, LoadError>(asset))),
                    None => services.loader.load(AssetKind::Json, &url),
                };
                self.fetches.push(PendingFetch {
                    id,
                    url,
                    future,
                    cancel: self.replicated.cancel_token(),
                });
            }
        }
    }

    fn entity_event(&self, data: &EntityData, sender: &PeerId, name: String, payload: Value) -> NetMessage {
        NetMessage::EntityEvent {
            entity_id: data.id.clone(),
            version: self.version(),
            name,
            data: payload,
            sender: Some(sender.clone()),
        }
    }

    /// Move a node out of the app's tree into world space, keeping where it is.
    fn attach(&mut self, node: NodeId, data: &EntityData, services: &mut Services) {
        let Some(root) = self
            .replicated
            .root()
            .and_then(|id| services.stage.get_mut(id))
        else {
            return;
        };
        if root.id == node {
            return;
        }
        let Some(world) = root.world_matrix_of(node, Mat4::IDENTITY) else {
            services
                .diagnostics
                .warn(format!("app {} cannot attach unknown node {node:?}", data.id));
            return;
        };
        if let Some(mut detached) = root.remove_descendant(node) {
            detached.transform = Transform::from_matrix(world);
            let id = services.stage.insert(&data.id, detached);
            self.replicated.track_world_node(id);
        }
    }

    fn poll_fetches(&mut self, data: &mut EntityData, services: &mut Services) {
        if self.fetches.is_empty() {
            return;
        }
        let mut done = Vec::new();
        let mut pending = Vec::new();
        for mut fetch in std::mem::take(&mut self.fetches) {
            if fetch.cancel.is_cancelled() {
                tracing::debug!(id = %data.id, url = %fetch.url, "fetch dropped after unbuild");
                continue;
            }
            match poll_now(fetch.future.as_mut()) {
                Poll::Pending => pending.push(fetch),
                Poll::Ready(result) => done.push((fetch.id, result, fetch.cancel)),
            }
        }
        self.fetches = pending;

        for (id, result, cancel) in done {
            // An earlier response in this batch may have crashed the build.
            if cancel.is_cancelled() {
                continue;
            }
            let payload = match result {
                Ok(asset) => json!({
                    "id": id,
                    "ok": true,
                    "body": asset.json().cloned().unwrap_or(Value::Null),
                }),
                Err(err) => json!({ "id": id, "ok": false, "error": err.to_string() }),
            };
            self.dispatch(ScriptEvent::new("fetch", payload), data, services);
        }
    }
}
