//! Physics as the simulation core sees it.
//!
//! The [`Physics`] trait is the contract: scene queries, actor creation and
//! the force/velocity primitives the locomotion controller drives.
//! [`SimplePhysics`] implements it over axis-aligned boxes and vertical
//! capsules, which is enough to exercise walking, jumping and platforms
//! headless. It is not a solver.
//!
//! # Invariants
//! - Unknown actor handles are ignored by setters and read as `None`/zero.
//! - Forces are cleared after every `step`.

mod simple;

pub use simple::SimplePhysics;

use glam::Vec3;
use realm_common::Transform;

/// Handle to a physics actor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ActorHandle(pub u32);

/// How an actor participates in the simulation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ActorKind {
    /// Never moves.
    Static,
    /// Moved only by setting its pose.
    Kinematic,
    /// Integrated from forces and velocity.
    Dynamic,
}

/// Collision shapes.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Geometry {
    Sphere { radius: f32 },
    /// Upright capsule whose pose sits at its lowest point.
    Capsule { radius: f32, height: f32 },
    Box { half_extents: Vec3 },
}

/// How contact friction and restitution are combined with the other surface.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum CombineMode {
    #[default]
    Average,
    Min,
    Max,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ForceMode {
    /// Divided by mass.
    Force,
    /// Applied as-is.
    Acceleration,
}

/// Bit set of collision layers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LayerMask(pub u32);

impl LayerMask {
    pub const NONE: Self = Self(0);
    pub const ENVIRONMENT: Self = Self(1);
    pub const PLAYER: Self = Self(1 << 1);
    pub const PROP: Self = Self(1 << 2);
    pub const ALL: Self = Self(u32::MAX);

    pub fn intersects(self, other: Self) -> bool {
        self.0 & other.0 != 0
    }
}

impl std::ops::BitOr for LayerMask {
    type Output = Self;

    fn bitor(self, rhs: Self) -> Self {
        Self(self.0 | rhs.0)
    }
}

/// Result of a scene query.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Hit {
    pub actor: ActorHandle,
    pub point: Vec3,
    pub normal: Vec3,
    pub distance: f32,
}

/// Everything needed to create an actor.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ActorDesc {
    pub kind: ActorKind,
    pub geometry: Geometry,
    pub pose: Transform,
    pub mass: f32,
    pub layer: LayerMask,
}

impl ActorDesc {
    pub fn new(kind: ActorKind, geometry: Geometry) -> Self {
        Self {
            kind,
            geometry,
            pose: Transform::default(),
            mass: 1.0,
            layer: LayerMask::ENVIRONMENT,
        }
    }

    pub fn with_pose(mut self, pose: Transform) -> Self {
        self.pose = pose;
        self
    }

    pub fn with_mass(mut self, mass: f32) -> Self {
        self.mass = mass;
        self
    }

    pub fn with_layer(mut self, layer: LayerMask) -> Self {
        self.layer = layer;
        self
    }
}

/// Physics engine contract.
pub trait Physics {
    fn raycast(&self, origin: Vec3, direction: Vec3, max_distance: f32, mask: LayerMask)
    -> Option<Hit>;

    fn sweep(
        &self,
        geometry: Geometry,
        origin: Vec3,
        direction: Vec3,
        max_distance: f32,
        mask: LayerMask,
    ) -> Option<Hit>;

    fn create_actor(&mut self, desc: ActorDesc) -> ActorHandle;
    fn remove_actor(&mut self, actor: ActorHandle);
    fn actor_kind(&self, actor: ActorHandle) -> Option<ActorKind>;

    fn pose(&self, actor: ActorHandle) -> Option<Transform>;
    /// Teleport: sets the pose without sweeping.
    fn set_pose(&mut self, actor: ActorHandle, pose: Transform);

    fn linear_velocity(&self, actor: ActorHandle) -> Vec3;
    fn set_linear_velocity(&mut self, actor: ActorHandle, velocity: Vec3);
    fn angular_velocity(&self, actor: ActorHandle) -> Vec3;
    fn set_angular_velocity(&mut self, actor: ActorHandle, velocity: Vec3);

    fn add_force(&mut self, actor: ActorHandle, force: Vec3, mode: ForceMode);
    fn add_force_at_pos(&mut self, actor: ActorHandle, force: Vec3, position: Vec3);

    fn set_gravity_enabled(&mut self, actor: ActorHandle, enabled: bool);
    fn set_contact_combine(&mut self, actor: ActorHandle, mode: CombineMode);
    fn mass(&self, actor: ActorHandle) -> f32;

    fn step(&mut self, dt: f32);
}

pub fn crate_info() -> &'static str {
    "realm-physics v0.1.0"
}
