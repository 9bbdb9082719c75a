//! Physics-driven movement of the local player.
//!
//! The controller owns a dynamic capsule and drives it with forces and
//! velocity shaping in the fixed step. The variable step turns input into an
//! [`Intent`], runs camera look and zoom, picks the animation and decides
//! what to replicate.
//!
//! # Invariants
//! - The capsule never uses engine gravity; gravity is applied manually while
//!   airborne.
//! - A ground jump can not start again before the player lands.
//! - Flying is only possible in build mode.

use crate::config::ControllerConfig;
use glam::{EulerRot, Mat4, Quat, Vec2, Vec3};
use realm_common::{Effect, EntityId, Transform};
use realm_input::{Button, ControlState};
use realm_net::NetworkSnapshot;
use realm_physics::{
    ActorDesc, ActorHandle, ActorKind, CombineMode, ForceMode, Geometry, LayerMask, Physics,
};

/// Downward force per unit of player mass applied to a dynamic platform the
/// player stands on.
pub const PLATFORM_WEIGHT_FACTOR: f32 = -9.81 * 0.2;

const PLATFORM_RAY_LIFT: f32 = 0.2;
const PLATFORM_RAY_LENGTH: f32 = 2.0;
const GROUND_SWEEP_LIFT: f32 = 0.12;
const GROUND_SWEEP_DISTANCE: f32 = 0.22;
const GROUND_SWEEP_SHRINK: f32 = 0.01;
/// Gaps smaller than this are left to the solver.
const GROUND_SNAP_SLOP: f32 = 1e-3;
const PITCH_LIMIT_DEGREES: f32 = 89.0;

const GROUND_MASK: LayerMask = LayerMask(LayerMask::ENVIRONMENT.0 | LayerMask::PROP.0);

/// Movement flags and ground contact.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ControllerState {
    pub grounded: bool,
    pub falling: bool,
    /// In the air after a ground jump.
    pub jumping: bool,
    /// Jumped this tick and has not left the ground yet.
    pub jumped: bool,
    pub air_jumping: bool,
    pub air_jumped: bool,
    pub flying: bool,
    /// Touching ground steeper than the slope limit.
    pub slipping: bool,
    pub just_left_ground: bool,
    pub ground_normal: Vec3,
    /// Degrees.
    pub ground_angle: f32,
    pub fall_timer: f32,
    pub fall_start: f32,
    /// Height lost during the last completed fall.
    pub fall_distance: f32,
}

/// What the player wants to do, sampled in the variable step and consumed
/// by the fixed step.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Intent {
    /// World-space direction, length up to 1.
    pub direction: Vec3,
    pub running: bool,
    pub jump: bool,
    /// A jump press while airborne, consumed by the next fixed step.
    pub air_jump: bool,
    pub ascend: bool,
    pub descend: bool,
}

struct Platform {
    actor: ActorHandle,
    pose: Transform,
}

/// Last replicated presentation.
struct Sent {
    position: Vec3,
    quaternion: Quat,
    emote: String,
    effect: Option<Effect>,
}

pub struct LocomotionController {
    config: ControllerConfig,
    actor: ActorHandle,
    state: ControllerState,
    intent: Intent,
    platform: Option<Platform>,
    anchor: Option<Transform>,
    yaw: f32,
    pitch: f32,
    zoom: f32,
    avatar_rotation: Quat,
    emote: String,
    time: f32,
    last_jump_press: Option<f32>,
    send_timer: f32,
    sent: Sent,
    teleported: bool,
}

impl LocomotionController {
    /// Spawn the capsule with its feet at `position`.
    pub fn new(
        config: ControllerConfig,
        physics: &mut dyn Physics,
        position: Vec3,
        quaternion: Quat,
    ) -> Self {
        let actor = physics.create_actor(
            ActorDesc::new(
                ActorKind::Dynamic,
                Geometry::Capsule {
                    radius: config.capsule_radius,
                    height: config.capsule_height,
                },
            )
            .with_pose(Transform::from_pose(position, Quat::IDENTITY))
            .with_mass(config.mass)
            .with_layer(LayerMask::PLAYER),
        );
        physics.set_gravity_enabled(actor, false);
        let (yaw, _, _) = quaternion.to_euler(EulerRot::YXZ);
        let zoom = config.max_zoom.min(config.min_zoom.max(2.0));
        Self {
            config,
            actor,
            state: ControllerState::default(),
            intent: Intent::default(),
            platform: None,
            anchor: None,
            yaw,
            pitch: 0.0,
            zoom,
            avatar_rotation: quaternion,
            emote: "idle".to_string(),
            time: 0.0,
            last_jump_press: None,
            send_timer: 0.0,
            sent: Sent {
                position,
                quaternion,
                emote: "idle".to_string(),
                effect: None,
            },
            teleported: false,
        }
    }

    pub fn actor(&self) -> ActorHandle {
        self.actor
    }

    pub fn state(&self) -> &ControllerState {
        &self.state
    }

    pub fn intent(&self) -> &Intent {
        &self.intent
    }

    pub fn set_intent(&mut self, intent: Intent) {
        self.intent = intent;
    }

    pub fn emote(&self) -> &str {
        &self.emote
    }

    /// Rotation of the avatar (yaw only).
    pub fn quaternion(&self) -> Quat {
        self.avatar_rotation
    }

    /// Feet position.
    pub fn position(&self, physics: &dyn Physics) -> Vec3 {
        physics
            .pose(self.actor)
            .map_or(self.sent.position, |pose| pose.position)
    }

    /// Camera yaw, pitch (radians) and zoom distance.
    pub fn camera(&self) -> (f32, f32, f32) {
        (self.yaw, self.pitch, self.zoom)
    }

    /// Pin the player to a transform (seats, vehicles). `None` releases.
    pub fn set_anchor(&mut self, anchor: Option<Transform>) {
        self.anchor = anchor;
        if anchor.is_none() {
            self.platform = None;
        }
    }

    /// Move instantly. Remote copies snap instead of blending.
    pub fn teleport(&mut self, physics: &mut dyn Physics, position: Vec3, rotation: Option<Quat>) {
        physics.set_pose(self.actor, Transform::from_pose(position, Quat::IDENTITY));
        physics.set_linear_velocity(self.actor, Vec3::ZERO);
        if let Some(rotation) = rotation {
            self.avatar_rotation = rotation;
            self.yaw = rotation.to_euler(EulerRot::YXZ).0;
        }
        self.platform = None;
        self.state.jumping = false;
        self.state.jumped = false;
        self.state.falling = false;
        self.state.fall_timer = 0.0;
        self.teleported = true;
        tracing::debug!(?position, "teleport");
    }

    pub fn remove(&self, physics: &mut dyn Physics) {
        physics.remove_actor(self.actor);
    }

    /// One physics tick, before `Physics::step`.
    pub fn fixed_update(
        &mut self,
        physics: &mut dyn Physics,
        dt: f32,
        effect: Option<&Effect>,
        build_mode: bool,
    ) {
        if let Some(anchor) = self.anchor {
            let (yaw, _, _) = anchor.rotation.to_euler(EulerRot::YXZ);
            self.avatar_rotation = Quat::from_rotation_y(yaw);
            physics.set_pose(self.actor, anchor);
            physics.set_linear_velocity(self.actor, Vec3::ZERO);
            physics.set_angular_velocity(self.actor, Vec3::ZERO);
            return;
        }
        if self.state.flying {
            self.fly(physics, dt);
            return;
        }
        let Some(pose) = physics.pose(self.actor) else {
            return;
        };
        let snare = effect.map_or(0.0, |e| e.snare.clamp(0.0, 1.0));
        let frozen = effect.is_some_and(|e| e.freeze);
        let mass = physics.mass(self.actor);
        let mut feet = pose.position;

        if self.state.grounded {
            self.track_platform(physics, &mut feet);
        } else {
            self.platform = None;
        }

        let was_grounded = self.state.grounded;
        self.detect_ground(physics, &mut feet);
        self.state.just_left_ground = was_grounded && !self.state.grounded;
        if self.state.jumped && !self.state.grounded {
            self.state.jumped = false;
            self.state.jumping = true;
        }
        if self.state.grounded {
            if !self.state.jumped {
                self.land(feet);
            }
        } else if physics.linear_velocity(self.actor).y < 0.0 {
            self.state.fall_timer += dt;
            if self.state.fall_timer > self.config.fall_debounce && !self.state.falling {
                self.state.falling = true;
                self.state.jumping = false;
                self.state.air_jumping = false;
                self.state.fall_start = feet.y;
            }
        } else {
            self.state.fall_timer = 0.0;
        }

        let moving = self.intent.direction.length_squared() > 0.0 && !frozen;
        physics.set_contact_combine(
            self.actor,
            if self.state.grounded {
                CombineMode::Max
            } else {
                CombineMode::Min
            },
        );

        if self.state.grounded {
            if let Some(platform) = &self.platform {
                if physics.actor_kind(platform.actor) == Some(ActorKind::Dynamic) {
                    physics.add_force_at_pos(
                        platform.actor,
                        Vec3::Y * PLATFORM_WEIGHT_FACTOR * mass,
                        feet,
                    );
                }
            }
        } else {
            physics.add_force(
                self.actor,
                Vec3::NEG_Y * self.config.gravity,
                ForceMode::Acceleration,
            );
        }

        let velocity = self.shape_velocity(physics.linear_velocity(self.actor), dt);
        physics.set_linear_velocity(self.actor, velocity);
        physics.set_angular_velocity(self.actor, Vec3::ZERO);

        if moving {
            let speed = if self.intent.running {
                self.config.run_speed
            } else {
                self.config.walk_speed
            };
            let mut direction = self.intent.direction;
            if self.state.grounded {
                let normal = self.state.ground_normal;
                let length = direction.length();
                direction = (direction - normal * direction.dot(normal)).normalize_or_zero() * length;
            }
            let force = direction * speed * self.config.force_multiplier * mass * (1.0 - snare);
            physics.add_force(self.actor, force, ForceMode::Force);
        }

        let jump_velocity = (2.0 * self.config.gravity * self.config.jump_height).sqrt() / mass.sqrt();
        let can_ground_jump = self.state.grounded
            && !self.state.jumping
            && !self.state.jumped
            && !frozen
            && snare <= 0.0;
        if self.intent.jump && can_ground_jump {
            let mut velocity = physics.linear_velocity(self.actor);
            velocity.y = jump_velocity;
            physics.set_linear_velocity(self.actor, velocity);
            self.state.jumped = true;
            tracing::trace!("jump");
        } else if self.intent.air_jump
            && !self.state.grounded
            && !self.state.air_jumped
            && !build_mode
            && !frozen
        {
            let mut velocity = physics.linear_velocity(self.actor);
            velocity.y = jump_velocity;
            physics.set_linear_velocity(self.actor, velocity);
            self.state.air_jumping = true;
            self.state.air_jumped = true;
            self.state.falling = false;
            self.state.fall_timer = 0.0;
            tracing::trace!("air jump");
        }
        self.intent.air_jump = false;
    }

    fn fly(&mut self, physics: &mut dyn Physics, dt: f32) {
        let mass = physics.mass(self.actor);
        let mut thrust = self.intent.direction;
        if self.intent.running {
            thrust *= 2.0;
        }
        if self.intent.ascend {
            thrust.y += 1.0;
        }
        if self.intent.descend {
            thrust.y -= 1.0;
        }
        physics.add_force(self.actor, thrust * self.config.fly_force * mass, ForceMode::Force);
        let velocity = physics.linear_velocity(self.actor);
        physics.add_force(
            self.actor,
            -velocity * self.config.fly_drag * dt,
            ForceMode::Acceleration,
        );
        physics.set_angular_velocity(self.actor, Vec3::ZERO);
        self.state.grounded = false;
        self.state.falling = false;
        self.state.fall_timer = 0.0;
    }

    /// Carry the player along with whatever they stand on.
    fn track_platform(&mut self, physics: &mut dyn Physics, feet: &mut Vec3) {
        let origin = *feet + Vec3::Y * PLATFORM_RAY_LIFT;
        let Some(hit) = physics.raycast(origin, Vec3::NEG_Y, PLATFORM_RAY_LENGTH, GROUND_MASK) else {
            self.platform = None;
            return;
        };
        let Some(pose) = physics.pose(hit.actor) else {
            self.platform = None;
            return;
        };
        match &mut self.platform {
            Some(platform) if platform.actor == hit.actor => {
                if platform.pose != pose {
                    let delta = pose.matrix() * platform.pose.matrix().inverse();
                    *feet = delta.transform_point3(*feet);
                    physics.set_pose(self.actor, Transform::from_pose(*feet, Quat::IDENTITY));
                    let yaw = yaw_of(delta);
                    if yaw != 0.0 {
                        self.avatar_rotation = Quat::from_rotation_y(yaw) * self.avatar_rotation;
                    }
                    platform.pose = pose;
                }
            }
            _ => {
                self.platform = Some(Platform {
                    actor: hit.actor,
                    pose,
                });
            }
        }
    }

    fn detect_ground(&mut self, physics: &mut dyn Physics, feet: &mut Vec3) {
        let radius = self.config.capsule_radius - GROUND_SWEEP_SHRINK;
        let origin = *feet + Vec3::Y * (self.config.capsule_radius + GROUND_SWEEP_LIFT);
        // Height of the sweep sphere's lowest point above the feet.
        let bottom = GROUND_SWEEP_LIFT + GROUND_SWEEP_SHRINK;
        let hit = physics.sweep(
            Geometry::Sphere { radius },
            origin,
            Vec3::NEG_Y,
            GROUND_SWEEP_DISTANCE,
            GROUND_MASK,
        );
        self.state.slipping = false;
        let Some(hit) = hit else {
            self.state.grounded = false;
            self.state.ground_normal = Vec3::Y;
            self.state.ground_angle = 0.0;
            return;
        };
        let angle = hit.normal.angle_between(Vec3::Y).to_degrees();
        self.state.ground_normal = hit.normal;
        self.state.ground_angle = angle;
        if angle > self.config.slope_limit {
            self.state.grounded = false;
            self.state.slipping = true;
            return;
        }
        self.state.grounded = true;
        let gap = hit.distance - bottom;
        if gap > GROUND_SNAP_SLOP && !self.state.jumped {
            feet.y -= gap;
            physics.set_pose(self.actor, Transform::from_pose(*feet, Quat::IDENTITY));
        }
    }

    fn land(&mut self, feet: Vec3) {
        if self.state.falling {
            self.state.fall_distance = self.state.fall_start - feet.y;
            tracing::trace!(distance = self.state.fall_distance, "landed");
        }
        self.state.jumping = false;
        self.state.falling = false;
        self.state.air_jumping = false;
        self.state.air_jumped = false;
        self.state.fall_timer = 0.0;
    }

    fn shape_velocity(&self, mut velocity: Vec3, dt: f32) -> Vec3 {
        let up = if self.state.grounded {
            self.state.ground_normal
        } else {
            Vec3::Y
        };
        let along_up = up * velocity.dot(up);
        let planar = (velocity - along_up) * (1.0 - self.config.drag * dt).max(0.0);
        velocity = planar + along_up;

        let airborne_by_jump = self.state.jumping || self.state.jumped;
        if self.state.grounded && !airborne_by_jump {
            velocity -= up * velocity.dot(up);
        }
        if self.state.just_left_ground && !airborne_by_jump {
            velocity.y = self.config.edge_snap_velocity;
        }
        if self.state.slipping {
            velocity.y += self.config.slip_bias;
        }
        velocity
    }

    /// Variable-rate step: input, camera, animation and replication.
    #[allow(clippy::too_many_arguments)]
    pub fn update(
        &mut self,
        id: &EntityId,
        physics: &dyn Physics,
        controls: &ControlState,
        effect: &mut Option<Effect>,
        dt: f32,
        build_mode: bool,
        network_rate: f32,
    ) -> Option<NetworkSnapshot> {
        self.time += dt;
        if self.state.flying && !build_mode {
            self.state.flying = false;
            tracing::debug!("flying cancelled outside build mode");
        }
        self.look(controls, dt);

        let mut axes = controls.key_axes();
        if axes == Vec2::ZERO {
            axes = controls.stick;
        }
        if axes == Vec2::ZERO {
            axes = controls.xr_move;
        }
        let axes = axes.clamp_length_max(1.0);
        let direction = Quat::from_rotation_y(self.yaw) * Vec3::new(axes.x, 0.0, -axes.y);
        let running = controls.is_down(Button::Run)
            || controls.stick.length() > self.config.stick_run_threshold;
        let jump = controls.is_down(Button::Jump);
        self.intent.direction = direction;
        self.intent.running = running;
        self.intent.jump = jump;
        self.intent.ascend = jump;
        self.intent.descend = controls.is_down(Button::Descend);
        if controls.was_pressed(Button::Jump) {
            self.jump_pressed(build_mode);
        }

        let moving = direction.length_squared() > 0.0;
        if moving {
            let target = Quat::from_rotation_y((-direction.x).atan2(-direction.z));
            let alpha = 1.0 - (-self.config.turn_speed * dt).exp();
            self.avatar_rotation = self.avatar_rotation.slerp(target, alpha);
        }

        tick_effect(effect, dt, moving);
        self.emote = self.pick_emote(effect.as_ref(), moving, running);
        self.snapshot(id, physics, effect.as_ref(), dt, network_rate)
    }

    fn look(&mut self, controls: &ControlState, dt: f32) {
        let mut delta = controls.pan_delta * self.config.pan_speed;
        if controls.pointer_locked {
            delta += controls.pointer_delta * self.config.look_speed;
        }
        self.yaw -= delta.x + controls.xr_turn * self.config.xr_turn_speed * dt;
        let limit = PITCH_LIMIT_DEGREES.to_radians();
        self.pitch = (self.pitch - delta.y).clamp(-limit, limit);
        self.zoom = (self.zoom + controls.scroll_delta * self.config.zoom_speed)
            .clamp(self.config.min_zoom, self.config.max_zoom);
    }

    fn jump_pressed(&mut self, build_mode: bool) {
        if build_mode {
            match self.last_jump_press {
                Some(last) if self.time - last <= self.config.double_tap_window => {
                    self.state.flying = !self.state.flying;
                    self.last_jump_press = None;
                    self.intent.air_jump = false;
                    tracing::debug!(flying = self.state.flying, "flying toggled");
                    return;
                }
                _ => self.last_jump_press = Some(self.time),
            }
            return;
        }
        if !self.state.grounded && !self.state.flying {
            self.intent.air_jump = true;
        }
    }

    fn pick_emote(&self, effect: Option<&Effect>, moving: bool, running: bool) -> String {
        if let Some(emote) = effect.and_then(|e| e.emote.clone()) {
            return emote;
        }
        let emote = if self.state.flying {
            "fly"
        } else if self.state.air_jumping {
            "flip"
        } else if self.state.jumping {
            "jump"
        } else if self.state.falling {
            "fall"
        } else if moving && running {
            "run"
        } else if moving {
            "walk"
        } else {
            "idle"
        };
        emote.to_string()
    }

    fn snapshot(
        &mut self,
        id: &EntityId,
        physics: &dyn Physics,
        effect: Option<&Effect>,
        dt: f32,
        network_rate: f32,
    ) -> Option<NetworkSnapshot> {
        self.send_timer += dt;
        if self.send_timer < network_rate && !self.teleported {
            return None;
        }
        self.send_timer = 0.0;
        let position = self.position(physics);
        let mut snapshot = NetworkSnapshot::new(id.clone());
        if position.distance_squared(self.sent.position) > 1e-8 {
            snapshot.p = Some(position);
        }
        if self.avatar_rotation.angle_between(self.sent.quaternion) > 1e-4 {
            snapshot.q = Some(self.avatar_rotation);
        }
        if self.emote != self.sent.emote {
            snapshot.e = Some(self.emote.clone());
        }
        if effect != self.sent.effect.as_ref() {
            snapshot.ef = Some(effect.cloned());
        }
        if self.teleported {
            self.teleported = false;
            snapshot.p = Some(position);
            snapshot.q = Some(self.avatar_rotation);
            snapshot.t = Some(true);
        }
        self.sent = Sent {
            position,
            quaternion: self.avatar_rotation,
            emote: self.emote.clone(),
            effect: effect.cloned(),
        };
        (!snapshot.is_empty()).then_some(snapshot)
    }
}

/// Count down the effect and drop it when it expires or movement cancels it.
fn tick_effect(effect: &mut Option<Effect>, dt: f32, moving: bool) {
    let Some(current) = effect.as_mut() else {
        return;
    };
    if let Some(remaining) = current.duration.as_mut() {
        *remaining -= dt;
        if *remaining <= 0.0 {
            *effect = None;
            return;
        }
    }
    if current.cancellable && moving {
        *effect = None;
    }
}

fn yaw_of(matrix: Mat4) -> f32 {
    let (_, rotation, _) = matrix.to_scale_rotation_translation();
    rotation.to_euler(EulerRot::YXZ).0
}
