use glam::{Quat, Vec3};
use realm_common::{Blueprint, BlueprintPatch, Effect, EntityData, EntityId, EntityPatch, PeerId};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// A chat line.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatMessage {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub from: Option<PeerId>,
    pub body: String,
}

/// Messages exchanged between peers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "data", rename_all = "camelCase")]
pub enum NetMessage {
    EntityAdded(EntityData),
    EntityModified(EntityPatch),
    EntityRemoved {
        id: EntityId,
    },
    #[serde(rename_all = "camelCase")]
    EntityEvent {
        entity_id: EntityId,
        version: u32,
        name: String,
        data: Value,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        sender: Option<PeerId>,
    },
    BlueprintAdded(Blueprint),
    BlueprintModified(BlueprintPatch),
    Chat(ChatMessage),
}

impl NetMessage {
    pub fn name(&self) -> &'static str {
        match self {
            Self::EntityAdded(_) => "entityAdded",
            Self::EntityModified(_) => "entityModified",
            Self::EntityRemoved { .. } => "entityRemoved",
            Self::EntityEvent { .. } => "entityEvent",
            Self::BlueprintAdded(_) => "blueprintAdded",
            Self::BlueprintModified(_) => "blueprintModified",
            Self::Chat(_) => "chat",
        }
    }
}

/// Pose and presentation changes of a player since the last send.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct NetworkSnapshot {
    pub id: EntityId,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub p: Option<Vec3>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub q: Option<Quat>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub e: Option<String>,
    #[serde(
        default,
        skip_serializing_if = "Option::is_none",
        deserialize_with = "realm_common::double_option"
    )]
    pub ef: Option<Option<Effect>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub t: Option<bool>,
}

impl NetworkSnapshot {
    pub fn new(id: EntityId) -> Self {
        Self {
            id,
            ..Default::default()
        }
    }

    /// Nothing changed.
    pub fn is_empty(&self) -> bool {
        self.p.is_none() && self.q.is_none() && self.e.is_none() && self.ef.is_none() && self.t.is_none()
    }

    pub fn into_patch(self) -> EntityPatch {
        EntityPatch {
            position: self.p,
            quaternion: self.q,
            emote: self.e,
            effect: self.ef,
            teleport: self.t,
            ..EntityPatch::new(self.id)
        }
    }
}
