//! The two capability objects handed to scripts.

use crate::is_internal_event;
use crate::listeners::Listeners;
use glam::Vec3;
use realm_common::{EntityId, Node, NodeId, NodeKind, PeerId};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Handle for an in-flight `app.fetch`.
pub type FetchId = u64;

/// Errors returned by proxy calls. Scripts may ignore them or bubble them up
/// with `?`, which turns them into a [`crate::ScriptFault`].
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ProxyError {
    #[error("apps cannot emit or send internal events ({0})")]
    InternalEvent(String),
    #[error("only the server may target a single peer")]
    ServerOnly,
    #[error("node {0:?} is not part of this app")]
    UnknownNode(NodeId),
}

/// Side effects a script requested during one call.
#[derive(Debug, Clone, PartialEq)]
pub enum ScriptCommand {
    /// Activate a node directly in world space, owned by the app.
    AddWorldNode(Node),
    RemoveWorldNode(NodeId),
    /// Move a node out of the app's subtree into world space, keeping its
    /// world transform.
    AttachWorldNode(NodeId),
    WorldOn(String),
    WorldOff(String),
    WorldEmit { name: String, data: Value },
    Chat { message: String, broadcast: bool },
    AppEmit { name: String, data: Value },
    Send {
        name: String,
        data: Value,
        ignore: Option<PeerId>,
    },
    SendTo {
        player: PeerId,
        name: String,
        data: Value,
    },
    Fetch { id: FetchId, url: String },
}

/// Public information about a connected player.
#[derive(Debug, Clone, PartialEq)]
pub struct PlayerInfo {
    pub id: EntityId,
    pub owner: PeerId,
    pub name: Option<String>,
    pub position: Vec3,
}

/// Read-only world facts a script may observe.
#[derive(Debug, Clone, PartialEq)]
pub struct WorldView {
    pub network_id: PeerId,
    pub is_server: bool,
    pub is_client: bool,
    pub time: f64,
    pub players: Vec<PlayerInfo>,
}

/// World-facing capability.
pub struct WorldProxy<'a> {
    view: &'a WorldView,
    commands: &'a mut Vec<ScriptCommand>,
}

impl<'a> WorldProxy<'a> {
    pub fn new(view: &'a WorldView, commands: &'a mut Vec<ScriptCommand>) -> Self {
        Self { view, commands }
    }

    pub fn network_id(&self) -> &PeerId {
        &self.view.network_id
    }

    pub fn is_server(&self) -> bool {
        self.view.is_server
    }

    pub fn is_client(&self) -> bool {
        self.view.is_client
    }

    pub fn time(&self) -> f64 {
        self.view.time
    }

    pub fn players(&self) -> &[PlayerInfo] {
        &self.view.players
    }

    pub fn player(&self, id: &EntityId) -> Option<&PlayerInfo> {
        self.view.players.iter().find(|p| &p.id == id)
    }

    /// Add a node in world space. It is torn down with the app.
    pub fn add(&mut self, node: Node) -> NodeId {
        let id = node.id;
        self.commands.push(ScriptCommand::AddWorldNode(node));
        id
    }

    pub fn remove(&mut self, node: NodeId) {
        self.commands.push(ScriptCommand::RemoveWorldNode(node));
    }

    pub fn attach(&mut self, node: NodeId) {
        self.commands.push(ScriptCommand::AttachWorldNode(node));
    }

    pub fn on(&mut self, name: &str) {
        self.commands.push(ScriptCommand::WorldOn(name.to_string()));
    }

    pub fn off(&mut self, name: &str) {
        self.commands.push(ScriptCommand::WorldOff(name.to_string()));
    }

    pub fn emit(&mut self, name: &str, data: Value) -> Result<(), ProxyError> {
        reject_internal(name)?;
        self.commands.push(ScriptCommand::WorldEmit {
            name: name.to_string(),
            data,
        });
        Ok(())
    }

    pub fn chat(&mut self, message: &str, broadcast: bool) {
        if message.is_empty() {
            return;
        }
        self.commands.push(ScriptCommand::Chat {
            message: message.to_string(),
            broadcast,
        });
    }
}

/// Kind of a configurable field an app exposes to editors.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FieldKind {
    Text,
    Number,
    Toggle,
    File,
}

/// A configurable field declaration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Field {
    pub key: String,
    #[serde(default)]
    pub label: String,
    #[serde(rename = "type")]
    pub kind: FieldKind,
    #[serde(default)]
    pub initial: Value,
}

/// The app's own data as the script sees it. `state` is written back to the
/// entity after each call.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct AppState {
    pub instance_id: EntityId,
    pub version: u32,
    pub state: Value,
    pub props: Map<String, Value>,
    pub fields: Vec<Field>,
    pub next_fetch: FetchId,
    pub is_server: bool,
    /// Set by a pointer handler to stop the event reaching ancestors.
    pub consumed: bool,
}

/// Self-facing capability.
pub struct AppProxy<'a> {
    app: &'a mut AppState,
    root: Option<&'a mut Node>,
    listeners: &'a mut Listeners,
    commands: &'a mut Vec<ScriptCommand>,
}

impl<'a> AppProxy<'a> {
    pub fn new(
        app: &'a mut AppState,
        root: Option<&'a mut Node>,
        listeners: &'a mut Listeners,
        commands: &'a mut Vec<ScriptCommand>,
    ) -> Self {
        Self {
            app,
            root,
            listeners,
            commands,
        }
    }

    pub fn instance_id(&self) -> &EntityId {
        &self.app.instance_id
    }

    pub fn version(&self) -> u32 {
        self.app.version
    }

    pub fn props(&self) -> &Map<String, Value> {
        &self.app.props
    }

    pub fn state(&self) -> &Value {
        &self.app.state
    }

    pub fn state_mut(&mut self) -> &mut Value {
        &mut self.app.state
    }

    pub fn on(&mut self, name: &str) {
        self.listeners.on(name);
    }

    pub fn off(&mut self, name: &str) {
        self.listeners.off(name);
    }

    pub fn emit(&mut self, name: &str, data: Value) -> Result<(), ProxyError> {
        reject_internal(name)?;
        self.commands.push(ScriptCommand::AppEmit {
            name: name.to_string(),
            data,
        });
        Ok(())
    }

    /// Send an entity event to every other instance of this app.
    pub fn send(&mut self, name: &str, data: Value, ignore: Option<PeerId>) -> Result<(), ProxyError> {
        reject_internal(name)?;
        self.commands.push(ScriptCommand::Send {
            name: name.to_string(),
            data,
            ignore,
        });
        Ok(())
    }

    /// Send an entity event to one peer. Server only.
    pub fn send_to(&mut self, player: PeerId, name: &str, data: Value) -> Result<(), ProxyError> {
        reject_internal(name)?;
        if !self.app.is_server {
            return Err(ProxyError::ServerOnly);
        }
        self.commands.push(ScriptCommand::SendTo {
            player,
            name: name.to_string(),
            data,
        });
        Ok(())
    }

    /// Look up a node in the app's built hierarchy by name.
    pub fn get(&mut self, name: &str) -> Option<&mut Node> {
        self.root.as_deref_mut().and_then(|root| root.find_mut(name))
    }

    pub fn create(&self, name: &str, kind: NodeKind) -> Node {
        Node::new(name, kind)
    }

    /// Add a node under the app's root.
    pub fn add(&mut self, node: Node) -> Result<NodeId, ProxyError> {
        let id = node.id;
        let root = self.root.as_deref_mut().ok_or(ProxyError::UnknownNode(id))?;
        root.children.push(node);
        Ok(id)
    }

    /// Stop the pointer event being handled from reaching parent nodes.
    pub fn stop_propagation(&mut self) {
        self.app.consumed = true;
    }

    pub fn configure(&mut self, fields: Vec<Field>) {
        self.app.fields = fields;
    }

    /// Start a JSON fetch bound to this build. The result arrives later as a
    /// `fetch` event carrying `{id, ok, body|error}`.
    pub fn fetch(&mut self, url: &str) -> FetchId {
        let id = self.app.next_fetch;
        self.app.next_fetch += 1;
        self.commands.push(ScriptCommand::Fetch {
            id,
            url: url.to_string(),
        });
        id
    }
}

fn reject_internal(name: &str) -> Result<(), ProxyError> {
    if is_internal_event(name) {
        tracing::warn!(event = name, "script tried to use an internal event name");
        return Err(ProxyError::InternalEvent(name.to_string()));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn view() -> WorldView {
        WorldView {
            network_id: "peer-1".into(),
            is_server: false,
            is_client: true,
            time: 12.5,
            players: vec![PlayerInfo {
                id: "p1".into(),
                owner: "peer-1".into(),
                name: Some("ada".into()),
                position: Vec3::ZERO,
            }],
        }
    }

    #[test]
    fn world_proxy_rejects_internal_emit() {
        let view = view();
        let mut commands = Vec::new();
        let mut world = WorldProxy::new(&view, &mut commands);
        assert_eq!(
            world.emit("enter", Value::Null),
            Err(ProxyError::InternalEvent("enter".into()))
        );
        world.emit("door:open", json!(1)).unwrap();
        assert_eq!(commands.len(), 1);
    }

    #[test]
    fn world_proxy_exposes_view() {
        let view = view();
        let mut commands = Vec::new();
        let world = WorldProxy::new(&view, &mut commands);
        assert!(world.is_client());
        assert_eq!(world.time(), 12.5);
        assert_eq!(world.player(&"p1".into()).unwrap().name.as_deref(), Some("ada"));
    }

    #[test]
    fn empty_chat_is_ignored() {
        let view = view();
        let mut commands = Vec::new();
        let mut world = WorldProxy::new(&view, &mut commands);
        world.chat("", true);
        assert!(commands.is_empty());
    }

    #[test]
    fn app_proxy_send_records_command_and_rejects_internal() {
        let mut app = AppState::default();
        let mut listeners = Listeners::new();
        let mut commands = Vec::new();
        let mut proxy = AppProxy::new(&mut app, None, &mut listeners, &mut commands);
        assert!(proxy.send("update", Value::Null, None).is_err());
        proxy.send("ping", json!({"n": 1}), None).unwrap();
        assert!(matches!(&commands[0], ScriptCommand::Send { name, .. } if name == "ping"));
    }

    #[test]
    fn app_proxy_on_tracks_hot_listeners() {
        let mut app = AppState::default();
        let mut listeners = Listeners::new();
        let mut commands = Vec::new();
        let mut proxy = AppProxy::new(&mut app, None, &mut listeners, &mut commands);
        proxy.on("update");
        assert!(listeners.is_hot());
    }

    #[test]
    fn app_proxy_get_and_add_nodes() {
        let mut app = AppState::default();
        let mut root = Node::group("root").with_child(Node::group("door"));
        let mut listeners = Listeners::new();
        let mut commands = Vec::new();
        let mut proxy = AppProxy::new(&mut app, Some(&mut root), &mut listeners, &mut commands);
        proxy.get("door").unwrap().transform.position = Vec3::X;
        let light = proxy.create("light", NodeKind::Group);
        proxy.add(light).unwrap();
        assert!(proxy.get("light").is_some());
        assert_eq!(root.find("door").unwrap().transform.position, Vec3::X);
    }

    #[test]
    fn send_to_requires_server() {
        let mut app = AppState::default();
        let mut listeners = Listeners::new();
        let mut commands = Vec::new();
        let mut proxy = AppProxy::new(&mut app, None, &mut listeners, &mut commands);
        assert_eq!(
            proxy.send_to("peer-2".into(), "hit", Value::Null),
            Err(ProxyError::ServerOnly)
        );
        app.is_server = true;
        let mut proxy = AppProxy::new(&mut app, None, &mut listeners, &mut commands);
        proxy.send_to("peer-2".into(), "hit", Value::Null).unwrap();
        assert_eq!(commands.len(), 1);
    }

    #[test]
    fn fetch_ids_increase() {
        let mut app = AppState::default();
        let mut listeners = Listeners::new();
        let mut commands = Vec::new();
        let mut proxy = AppProxy::new(&mut app, None, &mut listeners, &mut commands);
        let a = proxy.fetch("data://a");
        let b = proxy.fetch("data://b");
        assert_eq!(b, a + 1);
        assert_eq!(commands.len(), 2);
    }

    #[test]
    fn state_is_mutable() {
        let mut app = AppState::default();
        let mut listeners = Listeners::new();
        let mut commands = Vec::new();
        let mut proxy = AppProxy::new(&mut app, None, &mut listeners, &mut commands);
        *proxy.state_mut() = json!({"open": true});
        assert_eq!(app.state, json!({"open": true}));
    }
}
