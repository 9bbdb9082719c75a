//! Realm kernel: the client-side simulation of a shared world.
//!
//! A [`World`] owns the [`Services`] (loader, physics, network, event bus,
//! stage, blueprints, diagnostics, input) and the [`Entities`] registry, and
//! advances them one frame at a time. Apps build their visuals and scripts
//! asynchronously from blueprints; players are driven either by the local
//! [`LocomotionController`] or by smoothed network snapshots.
//!
//! # Invariants
//! - Only the newest build of an entity may change it; older completions are
//!   dropped.
//! - An entity event is never delivered to a build older than the event's
//!   blueprint version.
//! - Script faults and load failures stay inside the entity that hit them.
//! - Everything runs on one thread; nothing here is `Send`.

pub mod app;
pub mod build;
pub mod bus;
pub mod config;
pub mod entity;
pub mod locomotion;
pub mod player;
pub mod pointer;
pub mod registry;
pub mod replicated;
pub mod services;
pub mod stage;
pub mod world;

#[cfg(test)]
mod testing;

pub use app::{App, Mode};
pub use bus::{BusEvent, EventBus};
pub use config::{ConfigError, ControllerConfig, WorldConfig};
pub use entity::{Entity, EntityKind};
pub use locomotion::{ControllerState, Intent, LocomotionController, PLATFORM_WEIGHT_FACTOR};
pub use player::{Player, Role};
pub use pointer::{PointerEventKind, PointerState};
pub use registry::Entities;
pub use replicated::QueuedEvent;
pub use services::Services;
pub use stage::Stage;
pub use world::{World, WorldError, WorldSnapshot};

pub fn crate_info() -> &'static str {
    "realm-kernel v0.1.0"
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn crate_loads() {
        assert!(crate_info().contains("kernel"));
    }
}
