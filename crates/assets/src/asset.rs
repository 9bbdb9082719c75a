use realm_common::Node;
use realm_script::ScriptFactory;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;

/// What a url is being loaded as.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AssetKind {
    Model,
    Avatar,
    Script,
    Json,
}

impl AssetKind {
    /// Kind to use for a blueprint's model url. `.vrm` files are avatars.
    pub fn for_model_url(url: &str) -> Self {
        if url.ends_with(".vrm") {
            Self::Avatar
        } else {
            Self::Model
        }
    }
}

/// A loaded asset.
#[derive(Clone)]
pub enum Asset {
    Model(Node),
    Avatar(Node),
    Script(ScriptFactory),
    Json(Value),
}

impl Asset {
    pub fn kind(&self) -> AssetKind {
        match self {
            Self::Model(_) => AssetKind::Model,
            Self::Avatar(_) => AssetKind::Avatar,
            Self::Script(_) => AssetKind::Script,
            Self::Json(_) => AssetKind::Json,
        }
    }

    /// A fresh, inactive node tree for node assets.
    pub fn to_nodes(&self) -> Option<Node> {
        match self {
            Self::Model(node) | Self::Avatar(node) => Some(node.instantiate()),
            _ => None,
        }
    }

    pub fn script(&self) -> Option<ScriptFactory> {
        match self {
            Self::Script(factory) => Some(factory.clone()),
            _ => None,
        }
    }

    pub fn json(&self) -> Option<&Value> {
        match self {
            Self::Json(value) => Some(value),
            _ => None,
        }
    }

    /// Re-tag a node asset as `kind`. Models and avatars share a
    /// representation, so either satisfies a request for the other.
    pub(crate) fn as_kind(&self, kind: AssetKind) -> Option<Asset> {
        match (self, kind) {
            (Self::Model(node) | Self::Avatar(node), AssetKind::Model) => {
                Some(Self::Model(node.clone()))
            }
            (Self::Model(node) | Self::Avatar(node), AssetKind::Avatar) => {
                Some(Self::Avatar(node.clone()))
            }
            (Self::Script(_), AssetKind::Script) | (Self::Json(_), AssetKind::Json) => {
                Some(self.clone())
            }
            _ => None,
        }
    }
}

impl fmt::Debug for Asset {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Model(node) => f.debug_tuple("Model").field(&node.name).finish(),
            Self::Avatar(node) => f.debug_tuple("Avatar").field(&node.name).finish(),
            Self::Script(_) => f.write_str("Script(..)"),
            Self::Json(value) => f.debug_tuple("Json").field(value).finish(),
        }
    }
}
