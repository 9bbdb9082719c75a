//! Player entities: an avatar plus either the local controller or a
//! smoothed remote pose.

use crate::build::{BuildOutput, BuildTask};
use crate::locomotion::LocomotionController;
use crate::replicated::{QueuedEvent, Replicated};
use crate::services::Services;
use realm_assets::AssetKind;
use realm_common::{EntityData, EntityPatch, NodeId, PeerId, Transform};
use realm_net::NetMessage;
use realm_script::PlayerInfo;
use serde_json::json;

pub enum Role {
    /// Driven by this peer's input and physics.
    Local(Box<LocomotionController>),
    /// Driven by replicated snapshots.
    Remote,
}

pub struct Player {
    role: Role,
    replicated: Replicated,
    /// Teleports seen so far. Used as the interpolation snap token.
    teleports: u64,
}

impl Player {
    pub fn new(data: &mut EntityData, services: &mut Services) -> Self {
        let local = data.owner.as_ref() == Some(services.network.id());
        let role = if local {
            Role::Local(Box::new(LocomotionController::new(
                services.config.controller.clone(),
                services.physics.as_mut(),
                data.position,
                data.quaternion,
            )))
        } else {
            Role::Remote
        };
        let mut replicated =
            Replicated::new(data.position, data.quaternion, services.config.network_rate);
        replicated.position.push(data.position, Some(0));
        replicated.quaternion.push(data.quaternion, Some(0));
        let mut player = Self {
            role,
            replicated,
            teleports: 0,
        };
        services.roster.insert(data.id.clone(), player_info(data));
        player.build(data, services);
        player
    }

    pub fn is_local(&self) -> bool {
        matches!(self.role, Role::Local(_))
    }

    pub fn controller(&self) -> Option<&LocomotionController> {
        match &self.role {
            Role::Local(controller) => Some(controller),
            Role::Remote => None,
        }
    }

    pub fn controller_mut(&mut self) -> Option<&mut LocomotionController> {
        match &mut self.role {
            Role::Local(controller) => Some(controller),
            Role::Remote => None,
        }
    }

    pub fn root(&self) -> Option<NodeId> {
        self.replicated.root()
    }

    pub fn generation(&self) -> u64 {
        self.replicated.generation()
    }

    pub fn is_building(&self) -> bool {
        self.replicated.is_building()
    }

    pub fn teleports(&self) -> u64 {
        self.teleports
    }

    /// Load the avatar. Falls back to the default avatar.
    pub fn build(&mut self, data: &mut EntityData, services: &mut Services) {
        let generation = self.replicated.begin();
        let fallback = &services.config.default_avatar_url;
        let url = data.avatar.as_ref().unwrap_or(fallback);
        tracing::debug!(id = %data.id, generation, url, "avatar build started");
        self.replicated.start(BuildTask::model(
            generation,
            None,
            url,
            AssetKind::Avatar,
            None,
            fallback,
        ));
        self.poll(data, services);
    }

    pub fn poll(&mut self, data: &mut EntityData, services: &mut Services) {
        while let Some(output) = self.replicated.poll(
            &data.id,
            services.loader.as_mut(),
            &mut services.diagnostics,
        ) {
            self.finish(output, data, services);
        }
    }

    fn finish(&mut self, output: BuildOutput, data: &mut EntityData, services: &mut Services) {
        self.replicated.teardown(&mut services.stage);
        if output.crashed {
            services
                .diagnostics
                .warn(format!("player {} is using the default avatar", data.id));
        }
        self.replicated.mount(
            &mut services.stage,
            &data.id,
            output.root,
            Transform::from_pose(data.position, data.quaternion),
        );
        while let Some(event) = self.replicated.pop_ready(u32::MAX) {
            emit_player_event(event, data, services);
        }
        self.replicated.finish_building();
    }

    pub fn modify(&mut self, patch: &EntityPatch, data: &mut EntityData, services: &mut Services) {
        let avatar_changed = patch.avatar.is_some() && patch.avatar != data.avatar;
        let teleport = patch.teleport == Some(true);
        if teleport {
            self.teleports += 1;
        }
        patch.apply_to(data);

        match &mut self.role {
            Role::Local(controller) => {
                if teleport || patch.position.is_some() {
                    controller.teleport(services.physics.as_mut(), data.position, patch.quaternion);
                }
            }
            Role::Remote => {
                let token = Some(self.teleports);
                if let Some(position) = patch.position {
                    self.replicated.position.push(position, token);
                }
                if let Some(quaternion) = patch.quaternion {
                    self.replicated.quaternion.push(quaternion, token);
                }
            }
        }
        if let Some(info) = services.roster.get_mut(&data.id) {
            info.name = data.name.clone();
        }
        if avatar_changed {
            self.build(data, services);
        }
    }

    /// Entity events on players are forwarded to the world bus.
    pub fn on_event(&mut self, event: QueuedEvent, data: &EntityData, services: &mut Services) {
        if self.replicated.is_building() {
            self.replicated.enqueue(event);
            return;
        }
        emit_player_event(event, data, services);
    }

    pub fn fixed_update(&mut self, dt: f32, data: &mut EntityData, services: &mut Services) {
        if let Role::Local(controller) = &mut self.role {
            controller.fixed_update(
                services.physics.as_mut(),
                dt,
                data.effect.as_ref(),
                services.config.build_mode,
            );
        }
    }

    pub fn update(&mut self, dt: f32, data: &mut EntityData, services: &mut Services) {
        match &mut self.role {
            Role::Local(controller) => {
                let snapshot = controller.update(
                    &data.id,
                    services.physics.as_ref(),
                    &services.controls,
                    &mut data.effect,
                    dt,
                    services.config.build_mode,
                    services.config.network_rate,
                );
                data.position = controller.position(services.physics.as_ref());
                data.quaternion = controller.quaternion();
                data.emote = Some(controller.emote().to_string());
                if let Some(snapshot) = snapshot {
                    services
                        .network
                        .send(NetMessage::EntityModified(snapshot.into_patch()), None);
                }
            }
            Role::Remote => {
                data.position = self.replicated.position.update(dt);
                data.quaternion = self.replicated.quaternion.update(dt);
            }
        }
        self.replicated
            .place(&mut services.stage, data.position, data.quaternion);
        if let Some(info) = services.roster.get_mut(&data.id) {
            info.position = data.position;
        }
    }

    pub fn destroy(&mut self, data: &EntityData, services: &mut Services) {
        self.replicated.teardown(&mut services.stage);
        match &self.role {
            Role::Local(controller) => controller.remove(services.physics.as_mut()),
            Role::Remote => {
                if services.network.is_client() {
                    services.events.emit("leave", json!({ "player": data.id }));
                }
            }
        }
        services.roster.remove(&data.id);
    }
}

fn emit_player_event(event: QueuedEvent, data: &EntityData, services: &mut Services) {
    services.events.emit(
        &event.name,
        json!({ "player": data.id, "data": event.data }),
    );
}

pub(crate) fn player_info(data: &EntityData) -> PlayerInfo {
    PlayerInfo {
        id: data.id.clone(),
        owner: data
            .owner
            .clone()
            .unwrap_or_else(|| PeerId(String::new())),
        name: data.name.clone(),
        position: data.position,
    }
}
