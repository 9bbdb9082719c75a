//! Asset loading as the simulation core consumes it.
//!
//! Loaders hand out cached assets synchronously through [`Loader::get`] and
//! start asynchronous loads through [`Loader::load`]. Node assets are turned
//! into fresh trees with [`Asset::to_nodes`].
//!
//! # Invariants
//! - Calling `get` before `load` is always allowed and never starts work.
//! - A completed load is cached; later `get` calls for the same kind and url
//!   return it.
//! - The crash block is always present in a [`MemoryLoader`].

mod asset;
mod loader;
mod manifest;
mod memory;

pub use asset::{Asset, AssetKind};
pub use loader::{LoadError, LoadFuture, Loader, poll_now};
pub use manifest::Manifest;
pub use memory::{CRASH_BLOCK_URL, DEFAULT_AVATAR_URL, MemoryLoader};

pub fn crate_info() -> &'static str {
    "realm-assets v0.1.0"
}
