use crate::asset::{Asset, AssetKind};
use std::future::Future;
use std::pin::Pin;
use std::task::{Context, Poll, Waker};

/// Errors from asset operations.
#[derive(Debug, thiserror::Error)]
pub enum LoadError {
    #[error("asset not found: {0}")]
    NotFound(String),
    #[error("{url} is not a {expected:?} asset")]
    KindMismatch { url: String, expected: AssetKind },
    #[error("loading {url} failed: {reason}")]
    Failed { url: String, reason: String },
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

/// An in-flight load. Polled by the owner of the build or fetch that
/// started it; there is no executor.
pub type LoadFuture = Pin<Box<dyn Future<Output = Result<Asset, LoadError>>>>;

/// Asset loader contract.
pub trait Loader {
    /// Cached asset, if this kind and url already finished loading.
    fn get(&self, kind: AssetKind, url: &str) -> Option<Asset>;

    /// Start loading. The returned future resolves to the asset and caches it.
    fn load(&mut self, kind: AssetKind, url: &str) -> LoadFuture;
}

/// Poll a future once with a no-op waker.
///
/// The simulation loop re-polls pending work every frame, so wake-ups carry
/// no information.
pub fn poll_now<F: Future + ?Sized>(future: Pin<&mut F>) -> Poll<F::Output> {
    let mut cx = Context::from_waker(Waker::noop());
    future.poll(&mut cx)
}
