//! Shared types for the realm simulation core.
//!
//! # Invariants
//! - Entities never own their blueprint; they reference it by id.
//! - Blueprint versions only move forward.
//! - Diagnostics are owned by a session, never by the module.

pub mod blueprint;
pub mod data;
pub mod diagnostics;
pub mod node;
pub mod types;

pub use blueprint::{Blueprint, BlueprintError, BlueprintPatch, BlueprintStore};
pub use data::{Effect, EntityData, EntityPatch, EntityType, double_option};
pub use diagnostics::{Diagnostic, Diagnostics, Severity};
pub use node::{MeshShape, Node, NodeKind, PointerHandlers};
pub use types::{BlueprintId, EntityId, NodeId, PeerId, Transform};
