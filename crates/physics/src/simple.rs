use crate::{
    ActorDesc, ActorHandle, ActorKind, CombineMode, ForceMode, Geometry, Hit, LayerMask, Physics,
};
use glam::{Quat, Vec3};
use realm_common::Transform;
use std::collections::BTreeMap;

const DEFAULT_GRAVITY: Vec3 = Vec3::new(0.0, -9.81, 0.0);
const CONTACT_EPSILON: f32 = 1e-5;

#[derive(Debug, Clone)]
struct Actor {
    kind: ActorKind,
    geometry: Geometry,
    pose: Transform,
    mass: f32,
    layer: LayerMask,
    velocity: Vec3,
    angular: Vec3,
    /// Accumulated acceleration for the next step.
    acceleration: Vec3,
    gravity: bool,
    combine: CombineMode,
    /// Normal reported for hits on the top face. Set for ramps.
    surface: Option<Vec3>,
}

impl Actor {
    /// Axis-aligned bounds in world space. Rotation is ignored.
    fn bounds(&self) -> (Vec3, Vec3) {
        let (offset, half) = extents(self.geometry);
        let center = self.pose.position + offset;
        (center - half, center + half)
    }
}

/// Offset from the pose to the shape centre, and the half size.
fn extents(geometry: Geometry) -> (Vec3, Vec3) {
    match geometry {
        Geometry::Sphere { radius } => (Vec3::ZERO, Vec3::splat(radius)),
        Geometry::Box { half_extents } => (Vec3::ZERO, half_extents),
        Geometry::Capsule { radius, height } => (
            Vec3::Y * (height * 0.5),
            Vec3::new(radius, height * 0.5, radius),
        ),
    }
}

/// Slab test. Returns the entry distance and the face normal.
fn ray_aabb(origin: Vec3, direction: Vec3, min: Vec3, max: Vec3) -> Option<(f32, Vec3)> {
    let mut t_enter = f32::NEG_INFINITY;
    let mut t_exit = f32::INFINITY;
    let mut normal = Vec3::ZERO;
    for axis in 0..3 {
        let o = origin[axis];
        let d = direction[axis];
        if d.abs() < 1e-8 {
            if o < min[axis] || o > max[axis] {
                return None;
            }
            continue;
        }
        let mut t0 = (min[axis] - o) / d;
        let mut t1 = (max[axis] - o) / d;
        let mut sign = -1.0;
        if t0 > t1 {
            std::mem::swap(&mut t0, &mut t1);
            sign = 1.0;
        }
        if t0 > t_enter {
            t_enter = t0;
            normal = Vec3::ZERO;
            normal[axis] = sign;
        }
        t_exit = t_exit.min(t1);
        if t_enter > t_exit {
            return None;
        }
    }
    if t_exit < 0.0 {
        return None;
    }
    if t_enter < 0.0 {
        // Starts inside.
        return Some((0.0, -direction));
    }
    Some((t_enter, normal))
}

/// Box-world physics stand-in.
///
/// Every shape collides as its axis-aligned bounds. Dynamic actors are
/// integrated with semi-implicit Euler and pushed out of whatever they
/// overlap along the axis of least penetration.
#[derive(Debug, Clone)]
pub struct SimplePhysics {
    actors: BTreeMap<ActorHandle, Actor>,
    next: u32,
    gravity: Vec3,
}

impl Default for SimplePhysics {
    fn default() -> Self {
        Self::new()
    }
}

impl SimplePhysics {
    pub fn new() -> Self {
        Self {
            actors: BTreeMap::new(),
            next: 1,
            gravity: DEFAULT_GRAVITY,
        }
    }

    pub fn set_gravity(&mut self, gravity: Vec3) {
        self.gravity = gravity;
    }

    /// A static slab whose top face is at `height`.
    pub fn add_ground(&mut self, height: f32) -> ActorHandle {
        let half_extents = Vec3::new(500.0, 0.5, 500.0);
        self.create_actor(
            ActorDesc::new(ActorKind::Static, Geometry::Box { half_extents }).with_pose(
                Transform::from_pose(Vec3::new(0.0, height - 0.5, 0.0), Quat::IDENTITY),
            ),
        )
    }

    /// A static box whose top face reports `normal` instead of straight up.
    /// It still collides as a flat box.
    pub fn add_ramp(&mut self, top: Vec3, half_extents: Vec3, normal: Vec3) -> ActorHandle {
        let handle = self.create_actor(
            ActorDesc::new(ActorKind::Static, Geometry::Box { half_extents }).with_pose(
                Transform::from_pose(top - Vec3::Y * half_extents.y, Quat::IDENTITY),
            ),
        );
        if let Some(actor) = self.actors.get_mut(&handle) {
            actor.surface = Some(normal.normalize_or_zero());
        }
        handle
    }

    pub fn actor_count(&self) -> usize {
        self.actors.len()
    }

    /// Acceleration queued for the next step.
    pub fn pending_acceleration(&self, actor: ActorHandle) -> Vec3 {
        self.actors
            .get(&actor)
            .map(|a| a.acceleration)
            .unwrap_or(Vec3::ZERO)
    }

    pub fn contact_combine(&self, actor: ActorHandle) -> Option<CombineMode> {
        self.actors.get(&actor).map(|a| a.combine)
    }

    pub fn gravity_enabled(&self, actor: ActorHandle) -> Option<bool> {
        self.actors.get(&actor).map(|a| a.gravity)
    }

    fn cast(
        &self,
        origin: Vec3,
        direction: Vec3,
        max_distance: f32,
        mask: LayerMask,
        inflate: Vec3,
    ) -> Option<Hit> {
        let direction = direction.normalize_or_zero();
        if direction == Vec3::ZERO {
            return None;
        }
        let mut best: Option<Hit> = None;
        for (handle, actor) in &self.actors {
            if !mask.intersects(actor.layer) {
                continue;
            }
            let (min, max) = actor.bounds();
            let Some((distance, normal)) = ray_aabb(origin, direction, min - inflate, max + inflate)
            else {
                continue;
            };
            if distance > max_distance {
                continue;
            }
            if best.is_none_or(|b| distance < b.distance) {
                let reported = match actor.surface {
                    Some(surface) if normal == Vec3::Y => surface,
                    _ => normal,
                };
                best = Some(Hit {
                    actor: *handle,
                    point: origin + direction * distance - normal * inflate,
                    normal: reported,
                    distance,
                });
            }
        }
        best
    }

    fn resolve(&mut self, handle: ActorHandle) {
        let Some(actor) = self.actors.get(&handle) else {
            return;
        };
        let mut position = actor.pose.position;
        let mut velocity = actor.velocity;
        let geometry = actor.geometry;
        let (offset, half) = extents(geometry);
        for (other_handle, other) in &self.actors {
            if *other_handle == handle {
                continue;
            }
            let center = position + offset;
            let (a_min, a_max) = (center - half, center + half);
            let (b_min, b_max) = other.bounds();
            let overlap = a_max.min(b_max) - a_min.max(b_min);
            if overlap.min_element() <= CONTACT_EPSILON {
                continue;
            }
            let axis = if overlap.x <= overlap.y && overlap.x <= overlap.z {
                0
            } else if overlap.y <= overlap.z {
                1
            } else {
                2
            };
            let other_center = (b_min + b_max) * 0.5;
            let sign = if center[axis] < other_center[axis] {
                -1.0
            } else {
                1.0
            };
            position[axis] += sign * overlap[axis];
            if velocity[axis] * sign < 0.0 {
                velocity[axis] = 0.0;
            }
        }
        if let Some(actor) = self.actors.get_mut(&handle) {
            actor.pose.position = position;
            actor.velocity = velocity;
        }
    }
}

impl Physics for SimplePhysics {
    fn raycast(
        &self,
        origin: Vec3,
        direction: Vec3,
        max_distance: f32,
        mask: LayerMask,
    ) -> Option<Hit> {
        self.cast(origin, direction, max_distance, mask, Vec3::ZERO)
    }

    fn sweep(
        &self,
        geometry: Geometry,
        origin: Vec3,
        direction: Vec3,
        max_distance: f32,
        mask: LayerMask,
    ) -> Option<Hit> {
        let (offset, half) = extents(geometry);
        self.cast(origin + offset, direction, max_distance, mask, half)
    }

    fn create_actor(&mut self, desc: ActorDesc) -> ActorHandle {
        let handle = ActorHandle(self.next);
        self.next += 1;
        self.actors.insert(
            handle,
            Actor {
                kind: desc.kind,
                geometry: desc.geometry,
                pose: desc.pose,
                mass: desc.mass.max(f32::EPSILON),
                layer: desc.layer,
                velocity: Vec3::ZERO,
                angular: Vec3::ZERO,
                acceleration: Vec3::ZERO,
                gravity: desc.kind == ActorKind::Dynamic,
                combine: CombineMode::Average,
                surface: None,
            },
        );
        tracing::trace!(?handle, kind = ?desc.kind, "actor created");
        handle
    }

    fn remove_actor(&mut self, actor: ActorHandle) {
        self.actors.remove(&actor);
    }

    fn actor_kind(&self, actor: ActorHandle) -> Option<ActorKind> {
        self.actors.get(&actor).map(|a| a.kind)
    }

    fn pose(&self, actor: ActorHandle) -> Option<Transform> {
        self.actors.get(&actor).map(|a| a.pose)
    }

    fn set_pose(&mut self, actor: ActorHandle, pose: Transform) {
        if let Some(a) = self.actors.get_mut(&actor) {
            a.pose = pose;
        }
    }

    fn linear_velocity(&self, actor: ActorHandle) -> Vec3 {
        self.actors
            .get(&actor)
            .map(|a| a.velocity)
            .unwrap_or(Vec3::ZERO)
    }

    fn set_linear_velocity(&mut self, actor: ActorHandle, velocity: Vec3) {
        if let Some(a) = self.actors.get_mut(&actor) {
            a.velocity = velocity;
        }
    }

    fn angular_velocity(&self, actor: ActorHandle) -> Vec3 {
        self.actors
            .get(&actor)
            .map(|a| a.angular)
            .unwrap_or(Vec3::ZERO)
    }

    fn set_angular_velocity(&mut self, actor: ActorHandle, velocity: Vec3) {
        if let Some(a) = self.actors.get_mut(&actor) {
            a.angular = velocity;
        }
    }

    fn add_force(&mut self, actor: ActorHandle, force: Vec3, mode: ForceMode) {
        if let Some(a) = self.actors.get_mut(&actor) {
            a.acceleration += match mode {
                ForceMode::Force => force / a.mass,
                ForceMode::Acceleration => force,
            };
        }
    }

    fn add_force_at_pos(&mut self, actor: ActorHandle, force: Vec3, _position: Vec3) {
        // No torque in a box world.
        self.add_force(actor, force, ForceMode::Force);
    }

    fn set_gravity_enabled(&mut self, actor: ActorHandle, enabled: bool) {
        if let Some(a) = self.actors.get_mut(&actor) {
            a.gravity = enabled;
        }
    }

    fn set_contact_combine(&mut self, actor: ActorHandle, mode: CombineMode) {
        if let Some(a) = self.actors.get_mut(&actor) {
            a.combine = mode;
        }
    }

    fn mass(&self, actor: ActorHandle) -> f32 {
        self.actors.get(&actor).map(|a| a.mass).unwrap_or(0.0)
    }

    fn step(&mut self, dt: f32) {
        let mut moved = Vec::new();
        for (handle, actor) in self.actors.iter_mut() {
            if actor.kind != ActorKind::Dynamic {
                actor.acceleration = Vec3::ZERO;
                continue;
            }
            let mut acceleration = actor.acceleration;
            if actor.gravity {
                acceleration += self.gravity;
            }
            actor.velocity += acceleration * dt;
            actor.pose.position += actor.velocity * dt;
            if actor.angular != Vec3::ZERO {
                actor.pose.rotation =
                    (Quat::from_scaled_axis(actor.angular * dt) * actor.pose.rotation).normalize();
            }
            actor.acceleration = Vec3::ZERO;
            moved.push(*handle);
        }
        for handle in moved {
            self.resolve(handle);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn capsule(physics: &mut SimplePhysics, feet: Vec3) -> ActorHandle {
        physics.create_actor(
            ActorDesc::new(
                ActorKind::Dynamic,
                Geometry::Capsule {
                    radius: 0.3,
                    height: 1.6,
                },
            )
            .with_pose(Transform::from_pose(feet, Quat::IDENTITY))
            .with_layer(LayerMask::PLAYER),
        )
    }

    #[test]
    fn raycast_hits_ground_top() {
        let mut physics = SimplePhysics::new();
        let ground = physics.add_ground(0.0);
        let hit = physics
            .raycast(Vec3::new(0.0, 2.0, 0.0), Vec3::NEG_Y, 5.0, LayerMask::ALL)
            .unwrap();
        assert_eq!(hit.actor, ground);
        assert!((hit.distance - 2.0).abs() < 1e-5);
        assert_eq!(hit.normal, Vec3::Y);
        assert!(
            physics
                .raycast(Vec3::new(0.0, 2.0, 0.0), Vec3::NEG_Y, 1.0, LayerMask::ALL)
                .is_none()
        );
    }

    #[test]
    fn raycast_respects_layer_mask() {
        let mut physics = SimplePhysics::new();
        physics.add_ground(0.0);
        let hit = physics.raycast(Vec3::Y, Vec3::NEG_Y, 5.0, LayerMask::PLAYER);
        assert!(hit.is_none());
    }

    #[test]
    fn sphere_sweep_accounts_for_radius() {
        let mut physics = SimplePhysics::new();
        physics.add_ground(0.0);
        let hit = physics
            .sweep(
                Geometry::Sphere { radius: 0.25 },
                Vec3::new(0.0, 1.0, 0.0),
                Vec3::NEG_Y,
                2.0,
                LayerMask::ENVIRONMENT,
            )
            .unwrap();
        assert!((hit.distance - 0.75).abs() < 1e-5);
        assert!(hit.point.y.abs() < 1e-5);
    }

    #[test]
    fn dynamic_capsule_falls_and_rests_on_ground() {
        let mut physics = SimplePhysics::new();
        physics.add_ground(0.0);
        let body = capsule(&mut physics, Vec3::new(0.0, 1.0, 0.0));
        for _ in 0..200 {
            physics.step(1.0 / 50.0);
        }
        let pose = physics.pose(body).unwrap();
        assert!(pose.position.y.abs() < 1e-3, "feet at {}", pose.position.y);
        assert!(physics.linear_velocity(body).y.abs() < 1e-3);
    }

    #[test]
    fn forces_are_cleared_after_step() {
        let mut physics = SimplePhysics::new();
        let body = capsule(&mut physics, Vec3::new(0.0, 5.0, 0.0));
        physics.set_gravity_enabled(body, false);
        physics.add_force(body, Vec3::X * 2.0, ForceMode::Force);
        assert_eq!(physics.pending_acceleration(body), Vec3::X * 2.0);
        physics.step(0.5);
        assert_eq!(physics.pending_acceleration(body), Vec3::ZERO);
        assert!((physics.linear_velocity(body).x - 1.0).abs() < 1e-5);
    }

    #[test]
    fn static_actors_do_not_move() {
        let mut physics = SimplePhysics::new();
        let ground = physics.add_ground(0.0);
        physics.add_force(ground, Vec3::Y * 100.0, ForceMode::Force);
        physics.step(1.0);
        assert_eq!(physics.pose(ground).unwrap().position.y, -0.5);
    }

    #[test]
    fn ramp_reports_its_normal_on_top_only() {
        let mut physics = SimplePhysics::new();
        let normal = Vec3::new(0.0, 1.0, 1.0).normalize();
        physics.add_ramp(Vec3::ZERO, Vec3::new(2.0, 0.5, 2.0), normal);
        let top = physics
            .raycast(Vec3::Y, Vec3::NEG_Y, 5.0, LayerMask::ALL)
            .unwrap();
        assert!((top.normal - normal).length() < 1e-5);
        assert!((top.distance - 1.0).abs() < 1e-5);
        let side = physics
            .raycast(Vec3::new(5.0, -0.5, 0.0), Vec3::NEG_X, 5.0, LayerMask::ALL)
            .unwrap();
        assert_eq!(side.normal, Vec3::X);
    }

    #[test]
    fn removed_actors_are_gone() {
        let mut physics = SimplePhysics::new();
        let ground = physics.add_ground(0.0);
        physics.remove_actor(ground);
        assert!(physics.pose(ground).is_none());
        assert_eq!(physics.actor_count(), 0);
    }
}
