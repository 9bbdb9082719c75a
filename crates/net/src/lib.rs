//! Replication surface between peers.
//!
//! [`NetMessage`] is what the core sends and receives. [`Network`] is the
//! transport contract; framing, sockets, acknowledgement and retry belong to
//! whatever implements it. [`StateInterpolator`] turns the low-rate pose
//! stream of remote entities into per-frame values.
//!
//! # Invariants
//! - Sends are fire-and-forget.
//! - A snapshot carries only fields that changed since the last one sent.

mod interp;
mod loopback;
mod message;

pub use interp::{Interpolate, StateInterpolator};
pub use loopback::{LoopbackNetwork, Outbound, Target};
pub use message::{ChatMessage, NetMessage, NetworkSnapshot};

use realm_common::PeerId;

/// Transport contract.
pub trait Network {
    /// Local identity.
    fn id(&self) -> &PeerId;
    fn is_server(&self) -> bool;
    fn is_client(&self) -> bool {
        !self.is_server()
    }
    /// Shared network clock, in seconds.
    fn time(&self) -> f64;
    /// Called once per frame before anything is sent.
    fn update(&mut self, dt: f64);
    /// Send to every peer except `exclude`.
    fn send(&mut self, message: NetMessage, exclude: Option<&PeerId>);
    fn send_to(&mut self, peer: &PeerId, message: NetMessage);
}

pub fn crate_info() -> &'static str {
    "realm-net v0.1.0"
}
