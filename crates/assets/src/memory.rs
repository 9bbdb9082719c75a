use crate::asset::{Asset, AssetKind};
use crate::loader::{LoadError, LoadFuture, Loader};
use crate::manifest::Manifest;
use realm_common::{MeshShape, Node, NodeKind};
use realm_script::ScriptFactory;
use serde_json::Value;
use std::cell::RefCell;
use std::collections::BTreeMap;
use std::future::Future;
use std::pin::Pin;
use std::rc::Rc;
use std::task::{Context, Poll};

/// Url of the fallback model shown for crashed apps.
pub const CRASH_BLOCK_URL: &str = "asset://crash-block.glb";

/// Url of the avatar used by players that have not chosen one.
pub const DEFAULT_AVATAR_URL: &str = "asset://avatar.vrm";

enum Source {
    Ready(Asset),
    Failing(String),
}

#[derive(Default)]
struct Inner {
    sources: BTreeMap<String, Source>,
    cache: BTreeMap<(AssetKind, String), Asset>,
    latency: BTreeMap<String, u32>,
    default_latency: u32,
    started: usize,
}

/// In-memory loader.
///
/// Sources are registered up front; a load resolves after the url's latency
/// (counted in polls) and caches its result. Clones share the same store, so a
/// test can keep a handle after giving the loader to a world.
#[derive(Clone)]
pub struct MemoryLoader {
    inner: Rc<RefCell<Inner>>,
}

impl Default for MemoryLoader {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryLoader {
    pub fn new() -> Self {
        let loader = Self {
            inner: Rc::new(RefCell::new(Inner::default())),
        };
        let crash_block = Node::new(
            "crash-block",
            NodeKind::Mesh {
                mesh: MeshShape::Box {
                    width: 1.0,
                    height: 1.0,
                    depth: 1.0,
                },
            },
        );
        loader.insert_cached(CRASH_BLOCK_URL, Asset::Model(crash_block));
        let avatar = Node::new("avatar", NodeKind::Avatar);
        loader.insert_cached(DEFAULT_AVATAR_URL, Asset::Avatar(avatar));
        loader
    }

    /// Register a source. It is only cached once something loads it.
    pub fn insert(&self, url: impl Into<String>, asset: Asset) {
        self.inner
            .borrow_mut()
            .sources
            .insert(url.into(), Source::Ready(asset));
    }

    /// Register a source and mark it as already loaded.
    pub fn insert_cached(&self, url: impl Into<String>, asset: Asset) {
        let url = url.into();
        let mut inner = self.inner.borrow_mut();
        inner.cache.insert((asset.kind(), url.clone()), asset.clone());
        inner.sources.insert(url, Source::Ready(asset));
    }

    pub fn insert_model(&self, url: impl Into<String>, root: Node) {
        self.insert(url, Asset::Model(root));
    }

    pub fn insert_script(&self, url: impl Into<String>, factory: ScriptFactory) {
        self.insert(url, Asset::Script(factory));
    }

    pub fn insert_json(&self, url: impl Into<String>, value: Value) {
        self.insert(url, Asset::Json(value));
    }

    /// Make loads of `url` fail with `reason`.
    pub fn fail(&self, url: impl Into<String>, reason: impl Into<String>) {
        self.inner
            .borrow_mut()
            .sources
            .insert(url.into(), Source::Failing(reason.into()));
    }

    /// Number of polls before a load of `url` resolves.
    pub fn set_latency(&self, url: impl Into<String>, polls: u32) {
        self.inner.borrow_mut().latency.insert(url.into(), polls);
    }

    pub fn set_default_latency(&self, polls: u32) {
        self.inner.borrow_mut().default_latency = polls;
    }

    /// Drop a cached entry so the next request goes through `load` again.
    pub fn evict(&self, kind: AssetKind, url: &str) {
        self.inner.borrow_mut().cache.remove(&(kind, url.to_string()));
    }

    /// How many loads have been started.
    pub fn loads_started(&self) -> usize {
        self.inner.borrow().started
    }

    /// Register everything a manifest declares.
    pub fn import(&self, manifest: &Manifest) {
        for (url, root) in &manifest.models {
            self.insert_model(url.clone(), root.clone());
        }
        for (url, root) in &manifest.avatars {
            self.insert(url.clone(), Asset::Avatar(root.clone()));
        }
        for (url, value) in &manifest.json {
            self.insert_json(url.clone(), value.clone());
        }
        for (url, polls) in &manifest.latency {
            self.set_latency(url.clone(), *polls);
        }
        tracing::debug!(
            models = manifest.models.len(),
            avatars = manifest.avatars.len(),
            json = manifest.json.len(),
            "manifest imported"
        );
    }
}

impl Loader for MemoryLoader {
    fn get(&self, kind: AssetKind, url: &str) -> Option<Asset> {
        self.inner
            .borrow()
            .cache
            .get(&(kind, url.to_string()))
            .cloned()
    }

    fn load(&mut self, kind: AssetKind, url: &str) -> LoadFuture {
        let mut inner = self.inner.borrow_mut();
        inner.started += 1;
        let remaining = inner
            .latency
            .get(url)
            .copied()
            .unwrap_or(inner.default_latency);
        tracing::debug!(url, ?kind, remaining, "load started");
        Box::pin(DelayedLoad {
            inner: Rc::clone(&self.inner),
            kind,
            url: url.to_string(),
            remaining,
        })
    }
}

/// Resolves after `remaining` pending polls.
struct DelayedLoad {
    inner: Rc<RefCell<Inner>>,
    kind: AssetKind,
    url: String,
    remaining: u32,
}

impl DelayedLoad {
    fn resolve(&self) -> Result<Asset, LoadError> {
        let mut inner = self.inner.borrow_mut();
        let asset = match inner.sources.get(&self.url) {
            None => return Err(LoadError::NotFound(self.url.clone())),
            Some(Source::Failing(reason)) => {
                return Err(LoadError::Failed {
                    url: self.url.clone(),
                    reason: reason.clone(),
                });
            }
            Some(Source::Ready(asset)) => {
                asset.as_kind(self.kind).ok_or_else(|| LoadError::KindMismatch {
                    url: self.url.clone(),
                    expected: self.kind,
                })?
            }
        };
        inner
            .cache
            .insert((self.kind, self.url.clone()), asset.clone());
        Ok(asset)
    }
}

impl Future for DelayedLoad {
    type Output = Result<Asset, LoadError>;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let this = self.get_mut();
        if this.remaining > 0 {
            this.remaining -= 1;
            cx.waker().wake_by_ref();
            return Poll::Pending;
        }
        Poll::Ready(this.resolve())
    }
}
