//! Serialized entity state and field-level patches.
//!
//! `EntityData` is the full form sent in `entityAdded` and used for initial
//! state transfer. `EntityPatch` carries only the fields that changed; a field
//! that is absent means "unchanged". Fields that can be cleared (`uploader`,
//! `mover`, `effect`) use `Option<Option<T>>` so that an explicit `null`
//! survives the round trip.

use crate::types::{BlueprintId, EntityId, PeerId};
use glam::{Quat, Vec3};
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;

/// Concrete kind of a replicated entity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EntityType {
    App,
    Player,
}

/// A temporary modifier applied to a player: emote override, movement
/// reduction, freeze.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Effect {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub emote: Option<String>,
    /// Fraction of movement speed removed, 0..=1.
    #[serde(default)]
    pub snare: f32,
    #[serde(default)]
    pub freeze: bool,
    /// Seconds until the effect ends by itself.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub duration: Option<f32>,
    /// Whether moving ends the effect.
    #[serde(default)]
    pub cancellable: bool,
}

/// Full serialized state of one entity.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EntityData {
    pub id: EntityId,
    #[serde(rename = "type")]
    pub kind: EntityType,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub owner: Option<PeerId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub blueprint: Option<BlueprintId>,
    #[serde(default)]
    pub position: Vec3,
    #[serde(default)]
    pub quaternion: Quat,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mover: Option<PeerId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub uploader: Option<PeerId>,
    #[serde(default)]
    pub pinned: bool,
    #[serde(default)]
    pub state: Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub avatar: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub emote: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub effect: Option<Effect>,
}

impl EntityData {
    /// An app instance of `blueprint`.
    pub fn app(id: impl Into<EntityId>, blueprint: impl Into<BlueprintId>) -> Self {
        Self {
            blueprint: Some(blueprint.into()),
            ..Self::empty(id.into(), EntityType::App)
        }
    }

    /// A player avatar owned by `owner`.
    pub fn player(id: impl Into<EntityId>, owner: impl Into<PeerId>) -> Self {
        Self {
            owner: Some(owner.into()),
            ..Self::empty(id.into(), EntityType::Player)
        }
    }

    fn empty(id: EntityId, kind: EntityType) -> Self {
        Self {
            id,
            kind,
            owner: None,
            blueprint: None,
            position: Vec3::ZERO,
            quaternion: Quat::IDENTITY,
            mover: None,
            uploader: None,
            pinned: false,
            state: Value::Null,
            name: None,
            avatar: None,
            emote: None,
            effect: None,
        }
    }

    pub fn with_position(mut self, position: Vec3) -> Self {
        self.position = position;
        self
    }

    pub fn with_uploader(mut self, uploader: impl Into<PeerId>) -> Self {
        self.uploader = Some(uploader.into());
        self
    }

    pub fn with_mover(mut self, mover: impl Into<PeerId>) -> Self {
        self.mover = Some(mover.into());
        self
    }
}

/// Field-level change to an entity. Short wire names (`p`, `q`, `e`, `ef`,
/// `t`) are accepted for the pose/emote/effect/teleport fields.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EntityPatch {
    pub id: EntityId,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub blueprint: Option<BlueprintId>,
    #[serde(
        default,
        skip_serializing_if = "Option::is_none",
        deserialize_with = "double_option"
    )]
    pub uploader: Option<Option<PeerId>>,
    #[serde(
        default,
        skip_serializing_if = "Option::is_none",
        deserialize_with = "double_option"
    )]
    pub mover: Option<Option<PeerId>>,
    #[serde(default, skip_serializing_if = "Option::is_none", alias = "p")]
    pub position: Option<Vec3>,
    #[serde(default, skip_serializing_if = "Option::is_none", alias = "q")]
    pub quaternion: Option<Quat>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pinned: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub state: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub avatar: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none", alias = "e")]
    pub emote: Option<String>,
    #[serde(
        default,
        skip_serializing_if = "Option::is_none",
        alias = "ef",
        deserialize_with = "double_option"
    )]
    pub effect: Option<Option<Effect>>,
    #[serde(default, skip_serializing_if = "Option::is_none", alias = "t")]
    pub teleport: Option<bool>,
}

impl EntityPatch {
    pub fn new(id: impl Into<EntityId>) -> Self {
        Self {
            id: id.into(),
            ..Default::default()
        }
    }

    pub fn with_position(mut self, position: Vec3) -> Self {
        self.position = Some(position);
        self
    }

    pub fn with_quaternion(mut self, quaternion: Quat) -> Self {
        self.quaternion = Some(quaternion);
        self
    }

    pub fn with_blueprint(mut self, blueprint: impl Into<BlueprintId>) -> Self {
        self.blueprint = Some(blueprint.into());
        self
    }

    pub fn with_state(mut self, state: Value) -> Self {
        self.state = Some(state);
        self
    }

    /// Whether applying this patch requires a full rebuild of an app.
    pub fn is_structural(&self) -> bool {
        self.blueprint.is_some()
            || self.uploader.is_some()
            || self.mover.is_some()
            || self.state.is_some()
    }

    /// Copy every present field into `data`.
    pub fn apply_to(&self, data: &mut EntityData) {
        if let Some(blueprint) = &self.blueprint {
            data.blueprint = Some(blueprint.clone());
        }
        if let Some(uploader) = &self.uploader {
            data.uploader = uploader.clone();
        }
        if let Some(mover) = &self.mover {
            data.mover = mover.clone();
        }
        if let Some(position) = self.position {
            data.position = position;
        }
        if let Some(quaternion) = self.quaternion {
            data.quaternion = quaternion;
        }
        if let Some(pinned) = self.pinned {
            data.pinned = pinned;
        }
        if let Some(state) = &self.state {
            data.state = state.clone();
        }
        if let Some(name) = &self.name {
            data.name = Some(name.clone());
        }
        if let Some(avatar) = &self.avatar {
            data.avatar = Some(avatar.clone());
        }
        if let Some(emote) = &self.emote {
            data.emote = Some(emote.clone());
        }
        if let Some(effect) = &self.effect {
            data.effect = effect.clone();
        }
    }
}

/// Deserialize a present field (even `null`) as `Some(..)`.
pub fn double_option<'de, D, T>(deserializer: D) -> Result<Option<Option<T>>, D::Error>
where
    D: Deserializer<'de>,
    T: Deserialize<'de>,
{
    Option::<T>::deserialize(deserializer).map(Some)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn app_data_round_trips_through_json() {
        let data = EntityData::app("a1", "b1").with_position(Vec3::new(1.0, 2.0, 3.0));
        let text = serde_json::to_string(&data).unwrap();
        assert!(text.contains("\"type\":\"app\""));
        let back: EntityData = serde_json::from_str(&text).unwrap();
        assert_eq!(back, data);
    }

    #[test]
    fn minimal_app_json_uses_defaults() {
        let data: EntityData =
            serde_json::from_value(json!({"id": "a1", "type": "app", "blueprint": "b1"})).unwrap();
        assert_eq!(data.kind, EntityType::App);
        assert_eq!(data.quaternion, Quat::IDENTITY);
        assert!(data.uploader.is_none());
    }

    #[test]
    fn explicit_null_uploader_is_kept() {
        let patch: EntityPatch =
            serde_json::from_value(json!({"id": "a1", "uploader": null})).unwrap();
        assert_eq!(patch.uploader, Some(None));
        assert!(patch.is_structural());

        let absent: EntityPatch = serde_json::from_value(json!({"id": "a1"})).unwrap();
        assert_eq!(absent.uploader, None);
        assert!(!absent.is_structural());
    }

    #[test]
    fn short_wire_names_are_accepted() {
        let patch: EntityPatch = serde_json::from_value(json!({
            "id": "p1",
            "p": [1.0, 0.0, 0.0],
            "q": [0.0, 0.0, 0.0, 1.0],
            "e": "walk",
            "t": true
        }))
        .unwrap();
        assert_eq!(patch.position, Some(Vec3::X));
        assert_eq!(patch.emote.as_deref(), Some("walk"));
        assert_eq!(patch.teleport, Some(true));
    }

    #[test]
    fn pose_patch_is_not_structural() {
        let patch = EntityPatch::new("a1").with_position(Vec3::X);
        assert!(!patch.is_structural());
        let mut data = EntityData::app("a1", "b1");
        patch.apply_to(&mut data);
        assert_eq!(data.position, Vec3::X);
    }

    #[test]
    fn clearing_effect_applies() {
        let mut data = EntityData::player("p1", "peer");
        data.effect = Some(Effect {
            freeze: true,
            ..Effect::default()
        });
        let patch = EntityPatch {
            effect: Some(None),
            ..EntityPatch::new("p1")
        };
        patch.apply_to(&mut data);
        assert!(data.effect.is_none());
    }
}
