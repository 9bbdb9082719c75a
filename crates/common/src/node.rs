//! Minimal scene-node tree.
//!
//! The renderer's node system is an external collaborator; this is the shape
//! the simulation core needs from it: identity, a local transform, an active
//! flag, pointer handler flags and children. Asset loaders produce these trees
//! and the stage activates them.

use crate::types::{NodeId, Transform};
use glam::{Mat4, Vec3};
use serde::{Deserialize, Serialize};

/// Mesh primitive shapes.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "shape", rename_all = "lowercase")]
pub enum MeshShape {
    Box { width: f32, height: f32, depth: f32 },
    Sphere { radius: f32 },
}

/// What a node represents.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum NodeKind {
    Group,
    Mesh { mesh: MeshShape },
    /// Marker used by builders to align moved apps.
    Snap,
    Collider,
    Avatar,
}

/// Which pointer events a node responds to.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PointerHandlers {
    #[serde(default)]
    pub enter: bool,
    #[serde(default)]
    pub leave: bool,
    #[serde(default)]
    pub down: bool,
    #[serde(default)]
    pub up: bool,
}

impl PointerHandlers {
    pub fn any(&self) -> bool {
        self.enter || self.leave || self.down || self.up
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Node {
    #[serde(skip, default = "NodeId::next")]
    pub id: NodeId,
    #[serde(default)]
    pub name: String,
    #[serde(flatten)]
    pub kind: NodeKind,
    #[serde(default)]
    pub transform: Transform,
    #[serde(skip)]
    pub active: bool,
    #[serde(default)]
    pub pointer: PointerHandlers,
    #[serde(default)]
    pub children: Vec<Node>,
}

impl Node {
    pub fn new(name: impl Into<String>, kind: NodeKind) -> Self {
        Self {
            id: NodeId::next(),
            name: name.into(),
            kind,
            transform: Transform::default(),
            active: false,
            pointer: PointerHandlers::default(),
            children: Vec::new(),
        }
    }

    pub fn group(name: impl Into<String>) -> Self {
        Self::new(name, NodeKind::Group)
    }

    /// The 1x1x1 box shown while another peer uploads an app's model.
    pub fn placeholder_box() -> Self {
        Self::new(
            "placeholder",
            NodeKind::Mesh {
                mesh: MeshShape::Box {
                    width: 1.0,
                    height: 1.0,
                    depth: 1.0,
                },
            },
        )
    }

    pub fn with_child(mut self, child: Node) -> Self {
        self.children.push(child);
        self
    }

    pub fn with_position(mut self, position: Vec3) -> Self {
        self.transform.position = position;
        self
    }

    pub fn with_pointer(mut self, pointer: PointerHandlers) -> Self {
        self.pointer = pointer;
        self
    }

    /// Deep copy with fresh ids, inactive. Used whenever an asset is turned
    /// into a live tree so two instances never share node ids.
    pub fn instantiate(&self) -> Node {
        Node {
            id: NodeId::next(),
            name: self.name.clone(),
            kind: self.kind.clone(),
            transform: self.transform,
            active: false,
            pointer: self.pointer,
            children: self.children.iter().map(Node::instantiate).collect(),
        }
    }

    /// Set the active flag on this node and every descendant.
    pub fn set_active(&mut self, active: bool) {
        self.active = active;
        for child in &mut self.children {
            child.set_active(active);
        }
    }

    /// Number of nodes in this subtree, including self.
    pub fn count(&self) -> usize {
        1 + self.children.iter().map(Node::count).sum::<usize>()
    }

    /// Visit every node depth-first with its world matrix.
    pub fn traverse(&self, parent: Mat4, visit: &mut impl FnMut(&Node, Mat4)) {
        let world = parent * self.transform.matrix();
        visit(self, world);
        for child in &self.children {
            child.traverse(world, visit);
        }
    }

    /// First node named `name` in this subtree.
    pub fn find(&self, name: &str) -> Option<&Node> {
        if self.name == name {
            return Some(self);
        }
        self.children.iter().find_map(|c| c.find(name))
    }

    pub fn find_mut(&mut self, name: &str) -> Option<&mut Node> {
        if self.name == name {
            return Some(self);
        }
        self.children.iter_mut().find_map(|c| c.find_mut(name))
    }

    pub fn find_by_id(&self, id: NodeId) -> Option<&Node> {
        if self.id == id {
            return Some(self);
        }
        self.children.iter().find_map(|c| c.find_by_id(id))
    }

    /// Detach the descendant `id` from this subtree, returning it.
    pub fn remove_descendant(&mut self, id: NodeId) -> Option<Node> {
        if let Some(index) = self.children.iter().position(|c| c.id == id) {
            return Some(self.children.remove(index));
        }
        self.children
            .iter_mut()
            .find_map(|c| c.remove_descendant(id))
    }

    /// World matrix of the descendant `id`, given this node's parent matrix.
    pub fn world_matrix_of(&self, id: NodeId, parent: Mat4) -> Option<Mat4> {
        let world = parent * self.transform.matrix();
        if self.id == id {
            return Some(world);
        }
        self.children
            .iter()
            .find_map(|c| c.world_matrix_of(id, world))
    }

    /// Chain of ids from this node down to `id`, inclusive.
    pub fn path_to(&self, id: NodeId) -> Option<Vec<NodeId>> {
        if self.id == id {
            return Some(vec![self.id]);
        }
        for child in &self.children {
            if let Some(mut path) = child.path_to(id) {
                path.insert(0, self.id);
                return Some(path);
            }
        }
        None
    }
}
