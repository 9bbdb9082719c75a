//! State shared by every entity that builds visuals from replicated data.

use crate::build::{BuildOutput, BuildTask};
use crate::stage::Stage;
use glam::{Quat, Vec3};
use realm_assets::Loader;
use realm_common::{Diagnostics, EntityId, Node, NodeId, PeerId, Transform};
use realm_net::StateInterpolator;
use realm_script::{CancelToken, ScriptEvent};
use serde_json::Value;
use std::collections::VecDeque;
use std::task::Poll;

/// An entity event held back until the entity can apply it.
#[derive(Debug, Clone, PartialEq)]
pub struct QueuedEvent {
    pub version: u32,
    pub name: String,
    pub data: Value,
    pub sender: Option<PeerId>,
}

impl From<QueuedEvent> for ScriptEvent {
    fn from(event: QueuedEvent) -> Self {
        ScriptEvent {
            name: event.name,
            data: event.data,
            sender: event.sender,
        }
    }
}

/// Build generation, in-flight builds, the event queue and everything the
/// current build placed on the stage.
///
/// Only the build whose generation equals the current one may be applied.
/// Older builds keep running until they resolve and are then dropped.
pub struct Replicated {
    generation: u64,
    building: bool,
    tasks: Vec<BuildTask>,
    queue: VecDeque<QueuedEvent>,
    root: Option<NodeId>,
    world_nodes: Vec<NodeId>,
    cancel: CancelToken,
    pub(crate) position: StateInterpolator<Vec3>,
    pub(crate) quaternion: StateInterpolator<Quat>,
}

impl Replicated {
    pub fn new(position: Vec3, quaternion: Quat, rate: f32) -> Self {
        Self {
            generation: 0,
            building: false,
            tasks: Vec::new(),
            queue: VecDeque::new(),
            root: None,
            world_nodes: Vec::new(),
            cancel: CancelToken::new(),
            position: StateInterpolator::new(position, rate),
            quaternion: StateInterpolator::new(quaternion, rate),
        }
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn is_building(&self) -> bool {
        self.building
    }

    /// Claim a new generation. Every build already in flight becomes stale.
    pub fn begin(&mut self) -> u64 {
        self.generation += 1;
        self.building = true;
        self.generation
    }

    pub fn start(&mut self, task: BuildTask) {
        self.tasks.push(task);
    }

    /// Builds still running, stale ones included.
    pub fn in_flight(&self) -> usize {
        self.tasks.len()
    }

    /// Poll every in-flight build once. Returns the current build's output
    /// if it finished.
    pub fn poll(
        &mut self,
        id: &EntityId,
        loader: &mut dyn Loader,
        diagnostics: &mut Diagnostics,
    ) -> Option<BuildOutput> {
        let mut current = None;
        let mut index = 0;
        while index < self.tasks.len() {
            match self.tasks[index].poll(loader, diagnostics) {
                Poll::Pending => index += 1,
                Poll::Ready(output) => {
                    self.tasks.swap_remove(index);
                    if output.generation == self.generation {
                        current = Some(output);
                    } else {
                        tracing::debug!(
                            %id,
                            stale = output.generation,
                            current = self.generation,
                            "stale build discarded"
                        );
                    }
                }
            }
        }
        current
    }

    pub fn finish_building(&mut self) {
        self.building = false;
    }

    pub fn enqueue(&mut self, event: QueuedEvent) {
        self.queue.push_back(event);
    }

    pub fn queued(&self) -> usize {
        self.queue.len()
    }

    /// Next queued event if it is not from the future. Stops at the first
    /// event newer than `version`, even if later ones would qualify.
    pub fn pop_ready(&mut self, version: u32) -> Option<QueuedEvent> {
        if self.queue.front()?.version <= version {
            self.queue.pop_front()
        } else {
            None
        }
    }

    pub fn root(&self) -> Option<NodeId> {
        self.root
    }

    /// Activate `root` at `transform` as the entity's visual.
    pub fn mount(&mut self, stage: &mut Stage, owner: &EntityId, mut root: Node, transform: Transform) {
        root.transform = transform;
        self.root = Some(stage.insert(owner, root));
    }

    /// Write the root's transform, if there is a root.
    pub fn place(&self, stage: &mut Stage, position: Vec3, quaternion: Quat) {
        if let Some(root) = self.root {
            stage.set_transform(root, Transform::from_pose(position, quaternion));
        }
    }

    pub fn track_world_node(&mut self, node: NodeId) {
        self.world_nodes.push(node);
    }

    /// Stop tracking a world node. False if it was not ours.
    pub fn forget_world_node(&mut self, node: NodeId) -> bool {
        let before = self.world_nodes.len();
        self.world_nodes.retain(|n| *n != node);
        self.world_nodes.len() != before
    }

    pub fn world_nodes(&self) -> &[NodeId] {
        &self.world_nodes
    }

    /// Token for work started by the current build.
    pub fn cancel_token(&self) -> CancelToken {
        self.cancel.clone()
    }

    /// Deactivate everything the current build placed and cancel its work.
    /// Safe to call repeatedly.
    pub fn teardown(&mut self, stage: &mut Stage) {
        if let Some(root) = self.root.take() {
            stage.remove(root);
        }
        for node in self.world_nodes.drain(..) {
            stage.remove(node);
        }
        self.cancel.cancel();
        self.cancel = CancelToken::new();
    }

    /// Restart both interpolators from a pose.
    pub fn reset_interpolators(&mut self, position: Vec3, quaternion: Quat, rate: f32) {
        self.position = StateInterpolator::new(position, rate);
        self.quaternion = StateInterpolator::new(quaternion, rate);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use realm_assets::{AssetKind, CRASH_BLOCK_URL, MemoryLoader};

    fn event(version: u32, name: &str) -> QueuedEvent {
        QueuedEvent {
            version,
            name: name.into(),
            data: Value::Null,
            sender: None,
        }
    }

    #[test]
    fn only_current_generation_is_returned() {
        let mut loader = MemoryLoader::new();
        loader.insert_model("asset://slow.glb", Node::group("slow"));
        loader.insert_model("asset://fast.glb", Node::group("fast"));
        loader.set_latency("asset://slow.glb", 3);
        let mut diagnostics = Diagnostics::new();
        let id = EntityId::from("a1");
        let mut rep = Replicated::new(Vec3::ZERO, Quat::IDENTITY, 0.125);

        let g1 = rep.begin();
        rep.start(BuildTask::model(g1, None, "asset://slow.glb", AssetKind::Model, None, CRASH_BLOCK_URL));
        let g2 = rep.begin();
        rep.start(BuildTask::model(g2, None, "asset://fast.glb", AssetKind::Model, None, CRASH_BLOCK_URL));

        let out = rep.poll(&id, &mut loader, &mut diagnostics).unwrap();
        assert_eq!(out.generation, g2);
        assert_eq!(out.root.name, "fast");
        assert_eq!(rep.in_flight(), 1);
        for _ in 0..5 {
            assert!(rep.poll(&id, &mut loader, &mut diagnostics).is_none());
        }
        assert_eq!(rep.in_flight(), 0);
    }

    #[test]
    fn pop_ready_stops_at_first_future_event() {
        let mut rep = Replicated::new(Vec3::ZERO, Quat::IDENTITY, 0.125);
        rep.enqueue(event(3, "a"));
        rep.enqueue(event(6, "b"));
        rep.enqueue(event(4, "c"));
        assert_eq!(rep.pop_ready(5).unwrap().name, "a");
        assert!(rep.pop_ready(5).is_none());
        assert_eq!(rep.queued(), 2);
        assert_eq!(rep.pop_ready(6).unwrap().name, "b");
        assert_eq!(rep.pop_ready(6).unwrap().name, "c");
    }

    #[test]
    fn teardown_removes_nodes_and_cancels() {
        let mut stage = Stage::new();
        let owner = EntityId::from("a1");
        let mut rep = Replicated::new(Vec3::ZERO, Quat::IDENTITY, 0.125);
        rep.mount(&mut stage, &owner, Node::group("root"), Transform::default());
        let extra = stage.insert(&owner, Node::group("extra"));
        rep.track_world_node(extra);
        let token = rep.cancel_token();

        rep.teardown(&mut stage);
        assert!(stage.is_empty());
        assert!(token.is_cancelled());
        assert!(!rep.cancel_token().is_cancelled());
        assert!(rep.root().is_none());

        rep.teardown(&mut stage);
        assert!(stage.is_empty());
    }
}
