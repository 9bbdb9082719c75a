//! Script sandbox surface.
//!
//! Scripts never touch the world directly. They see two closed capability
//! objects, a world-facing [`WorldProxy`] and a self-facing [`AppProxy`], and
//! every side effect they request is recorded as a [`ScriptCommand`] that the
//! owning entity applies after the call returns.
//!
//! # Invariants
//! - Internal event names can not be emitted or sent by scripts.
//! - A script call returns `Result<(), ScriptFault>`; faults never unwind.

mod cancel;
mod listeners;
mod proxy;
mod script;

pub use cancel::CancelToken;
pub use listeners::Listeners;
pub use proxy::{
    AppProxy, AppState, Field, FieldKind, FetchId, PlayerInfo, ProxyError, ScriptCommand,
    WorldProxy, WorldView,
};
pub use script::{Script, ScriptEvent, ScriptFactory, ScriptFault};

/// Event names reserved for the engine.
pub const INTERNAL_EVENTS: &[&str] = &[
    "fixedUpdate",
    "update",
    "lateUpdate",
    "destroy",
    "enter",
    "leave",
    "chat",
    "command",
    "health",
];

/// Event names whose listeners make an entity need per-frame callbacks.
pub const HOT_EVENTS: &[&str] = &["fixedUpdate", "update", "lateUpdate"];

pub fn is_internal_event(name: &str) -> bool {
    INTERNAL_EVENTS.contains(&name)
}

pub fn is_hot_event(name: &str) -> bool {
    HOT_EVENTS.contains(&name)
}
