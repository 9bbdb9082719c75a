//! Embodiment-neutral control state.
//!
//! # Invariants
//! - Desktop, touch and XR write into the same [`ControlState`]; consumers
//!   never branch on the device.
//! - Edges (`pressed`/`released`) and deltas last exactly one frame.

mod controls;

pub use controls::{Button, ControlState};

pub fn crate_info() -> &'static str {
    "realm-input v0.1.0"
}
