use crate::loader::LoadError;
use realm_common::{Blueprint, EntityData, Node};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::path::Path;

/// A world description on disk: asset sources plus the blueprints and
/// entities that use them.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Manifest {
    pub models: BTreeMap<String, Node>,
    pub avatars: BTreeMap<String, Node>,
    pub json: BTreeMap<String, Value>,
    /// Simulated load latency per url, in polls.
    pub latency: BTreeMap<String, u32>,
    pub blueprints: Vec<Blueprint>,
    pub entities: Vec<EntityData>,
}

impl Manifest {
    pub fn from_json_str(text: &str) -> Result<Self, LoadError> {
        Ok(serde_json::from_str(text)?)
    }

    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self, LoadError> {
        let file = std::fs::File::open(path)?;
        let manifest: Self = serde_json::from_reader(file)?;
        Ok(manifest)
    }

    pub fn save(&self, path: impl AsRef<Path>) -> Result<(), LoadError> {
        let file = std::fs::File::create(path)?;
        serde_json::to_writer_pretty(file, self)?;
        Ok(())
    }
}
