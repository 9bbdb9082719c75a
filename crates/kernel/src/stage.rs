use glam::{Mat4, Vec3};
use realm_common::{EntityId, Node, NodeId, Transform};
use std::collections::BTreeMap;

struct Entry {
    owner: EntityId,
    root: Node,
}

/// The set of active node trees, each owned by an entity.
///
/// Stands in for the scene graph: inserting activates a tree, removing
/// deactivates it and hands it back.
#[derive(Default)]
pub struct Stage {
    roots: BTreeMap<NodeId, Entry>,
}

impl Stage {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, owner: &EntityId, mut root: Node) -> NodeId {
        root.set_active(true);
        let id = root.id;
        self.roots.insert(
            id,
            Entry {
                owner: owner.clone(),
                root,
            },
        );
        id
    }

    pub fn remove(&mut self, id: NodeId) -> Option<Node> {
        self.roots.remove(&id).map(|entry| {
            let mut root = entry.root;
            root.set_active(false);
            root
        })
    }

    pub fn get(&self, id: NodeId) -> Option<&Node> {
        self.roots.get(&id).map(|e| &e.root)
    }

    pub fn get_mut(&mut self, id: NodeId) -> Option<&mut Node> {
        self.roots.get_mut(&id).map(|e| &mut e.root)
    }

    pub fn set_transform(&mut self, id: NodeId, transform: Transform) {
        if let Some(root) = self.get_mut(id) {
            root.transform = transform;
        }
    }

    pub fn contains(&self, id: NodeId) -> bool {
        self.roots.contains_key(&id)
    }

    /// Number of active roots.
    pub fn len(&self) -> usize {
        self.roots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.roots.is_empty()
    }

    /// Total active nodes across all roots.
    pub fn node_count(&self) -> usize {
        self.roots.values().map(|e| e.root.count()).sum()
    }

    pub fn roots_owned_by(&self, owner: &EntityId) -> Vec<NodeId> {
        self.roots
            .iter()
            .filter(|(_, e)| &e.owner == owner)
            .map(|(id, _)| *id)
            .collect()
    }

    /// Find any active node by id, with the entity that owns its tree.
    pub fn find(&self, id: NodeId) -> Option<(&EntityId, &Node)> {
        self.roots
            .values()
            .find_map(|e| e.root.find_by_id(id).map(|node| (&e.owner, node)))
    }

    /// Ancestor chain from a root down to `id`, inclusive.
    pub fn path_to(&self, id: NodeId) -> Option<Vec<NodeId>> {
        self.roots.values().find_map(|e| e.root.path_to(id))
    }

    /// World positions of every snap point in the tree rooted at `id`.
    pub fn snap_points(&self, id: NodeId) -> Vec<Vec3> {
        let mut points = Vec::new();
        if let Some(root) = self.get(id) {
            root.traverse(Mat4::IDENTITY, &mut |node, world| {
                if node.kind == realm_common::NodeKind::Snap {
                    points.push(world.transform_point3(Vec3::ZERO));
                }
            });
        }
        points
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use realm_common::NodeKind;

    #[test]
    fn insert_activates_and_remove_deactivates() {
        let mut stage = Stage::new();
        let owner = EntityId::from("a1");
        let id = stage.insert(&owner, Node::group("root").with_child(Node::group("child")));
        assert!(stage.get(id).unwrap().find("child").unwrap().active);
        assert_eq!(stage.node_count(), 2);
        let node = stage.remove(id).unwrap();
        assert!(!node.active);
        assert!(stage.is_empty());
        assert!(stage.remove(id).is_none());
    }

    #[test]
    fn find_reports_owner() {
        let mut stage = Stage::new();
        let owner = EntityId::from("a1");
        let child = Node::group("child");
        let child_id = child.id;
        stage.insert(&owner, Node::group("root").with_child(child));
        let (found_owner, node) = stage.find(child_id).unwrap();
        assert_eq!(found_owner, &owner);
        assert_eq!(node.name, "child");
        assert_eq!(stage.path_to(child_id).unwrap().len(), 2);
    }

    #[test]
    fn snap_points_are_in_world_space() {
        let mut stage = Stage::new();
        let root = Node::group("root")
            .with_position(Vec3::new(0.0, 0.0, 2.0))
            .with_child(Node::new("snap", NodeKind::Snap).with_position(Vec3::X));
        let id = stage.insert(&EntityId::from("a1"), root);
        assert_eq!(stage.snap_points(id), vec![Vec3::new(1.0, 0.0, 2.0)]);
    }
}
