use crate::types::BlueprintId;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::BTreeMap;

/// A shared, versioned definition that app instances render and execute.
///
/// Many entities may reference the same blueprint. The version only ever
/// increases; every change to model, script or props bumps it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Blueprint {
    pub id: BlueprintId,
    pub version: u32,
    pub model: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub script: Option<String>,
    #[serde(default)]
    pub props: Map<String, Value>,
}

impl Blueprint {
    pub fn new(id: impl Into<BlueprintId>, model: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            version: 0,
            model: model.into(),
            script: None,
            props: Map::new(),
        }
    }

    pub fn with_script(mut self, script: impl Into<String>) -> Self {
        self.script = Some(script.into());
        self
    }

    pub fn with_version(mut self, version: u32) -> Self {
        self.version = version;
        self
    }
}

/// A partial update to a blueprint. `version` is required and must exceed
/// the stored version.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct BlueprintPatch {
    pub id: BlueprintId,
    pub version: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
    #[serde(
        default,
        skip_serializing_if = "Option::is_none",
        deserialize_with = "crate::data::double_option"
    )]
    pub script: Option<Option<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub props: Option<Map<String, Value>>,
}

/// Errors from blueprint operations.
#[derive(Debug, thiserror::Error)]
pub enum BlueprintError {
    #[error("blueprint {0} not found")]
    NotFound(BlueprintId),
    #[error("blueprint {id} is at version {current}, refusing version {incoming}")]
    StaleVersion {
        id: BlueprintId,
        current: u32,
        incoming: u32,
    },
}

/// All blueprints known to this session, keyed by id.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct BlueprintStore {
    items: BTreeMap<BlueprintId, Blueprint>,
}

impl BlueprintStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or replace a blueprint.
    pub fn add(&mut self, blueprint: Blueprint) {
        tracing::debug!(id = %blueprint.id, version = blueprint.version, "blueprint added");
        self.items.insert(blueprint.id.clone(), blueprint);
    }

    pub fn get(&self, id: &BlueprintId) -> Option<&Blueprint> {
        self.items.get(id)
    }

    /// Apply a patch, bumping the stored version.
    pub fn modify(&mut self, patch: BlueprintPatch) -> Result<&Blueprint, BlueprintError> {
        let blueprint = self
            .items
            .get_mut(&patch.id)
            .ok_or_else(|| BlueprintError::NotFound(patch.id.clone()))?;
        if patch.version <= blueprint.version {
            return Err(BlueprintError::StaleVersion {
                id: patch.id,
                current: blueprint.version,
                incoming: patch.version,
            });
        }
        blueprint.version = patch.version;
        if let Some(model) = patch.model {
            blueprint.model = model;
        }
        if let Some(script) = patch.script {
            blueprint.script = script;
        }
        if let Some(props) = patch.props {
            blueprint.props = props;
        }
        tracing::debug!(id = %blueprint.id, version = blueprint.version, "blueprint modified");
        Ok(blueprint)
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    /// Full list for initial state transfer.
    pub fn serialize(&self) -> Vec<Blueprint> {
        self.items.values().cloned().collect()
    }

    pub fn deserialize(&mut self, blueprints: Vec<Blueprint>) {
        for blueprint in blueprints {
            self.add(blueprint);
        }
    }
}
