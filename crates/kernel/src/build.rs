//! One asynchronous build attempt.
//!
//! A [`BuildTask`] resolves a model (and optionally a script) through the
//! loader, falling back to the crash block on any failure. It is a plain
//! state machine polled by its entity each frame; it never touches entity
//! state itself, so a superseded task can finish harmlessly.

use realm_assets::{Asset, AssetKind, LoadError, LoadFuture, Loader, poll_now};
use realm_common::{Blueprint, Diagnostics, Node};
use realm_script::ScriptFactory;
use std::task::Poll;

/// Result of a finished build.
pub struct BuildOutput {
    pub generation: u64,
    pub root: Node,
    pub script: Option<ScriptFactory>,
    /// The crash path ran: fallback visual, no script.
    pub crashed: bool,
    /// Blueprint as resolved when the build started.
    pub blueprint: Option<Blueprint>,
}

enum Step {
    Model {
        url: String,
        kind: AssetKind,
        script: Option<String>,
        pending: Option<LoadFuture>,
    },
    Script {
        root: Node,
        url: String,
        pending: Option<LoadFuture>,
    },
    Fallback {
        pending: Option<LoadFuture>,
    },
    Ready {
        root: Node,
        script: Option<ScriptFactory>,
        crashed: bool,
    },
    Finished,
}

pub struct BuildTask {
    generation: u64,
    blueprint: Option<Blueprint>,
    crash_url: String,
    step: Step,
}

impl BuildTask {
    /// Load `url` as `kind`, then `script` if given.
    pub fn model(
        generation: u64,
        blueprint: Option<Blueprint>,
        url: &str,
        kind: AssetKind,
        script: Option<String>,
        crash_url: &str,
    ) -> Self {
        Self {
            generation,
            blueprint,
            crash_url: crash_url.to_string(),
            step: Step::Model {
                url: url.to_string(),
                kind,
                script,
                pending: None,
            },
        }
    }

    /// Straight to the crash block.
    pub fn fallback(generation: u64, blueprint: Option<Blueprint>, crash_url: &str) -> Self {
        Self {
            generation,
            blueprint,
            crash_url: crash_url.to_string(),
            step: Step::Fallback { pending: None },
        }
    }

    /// A unit box standing in for a model another peer is still uploading.
    pub fn placeholder(generation: u64, blueprint: Option<Blueprint>) -> Self {
        Self {
            generation,
            blueprint,
            crash_url: String::new(),
            step: Step::Ready {
                root: Node::placeholder_box(),
                script: None,
                crashed: false,
            },
        }
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    /// Advance as far as possible without blocking.
    pub fn poll(
        &mut self,
        loader: &mut dyn Loader,
        diagnostics: &mut Diagnostics,
    ) -> Poll<BuildOutput> {
        loop {
            match std::mem::replace(&mut self.step, Step::Finished) {
                Step::Model {
                    url,
                    kind,
                    script,
                    mut pending,
                } => match fetch(loader, kind, &url, &mut pending) {
                    Poll::Pending => {
                        self.step = Step::Model {
                            url,
                            kind,
                            script,
                            pending,
                        };
                        return Poll::Pending;
                    }
                    Poll::Ready(Ok(asset)) => {
                        self.step = match (asset.to_nodes(), script) {
                            (None, _) => {
                                diagnostics.error(format!("{url} produced no nodes"));
                                Step::Fallback { pending: None }
                            }
                            (Some(root), Some(url)) => Step::Script {
                                root,
                                url,
                                pending: None,
                            },
                            (Some(root), None) => Step::Ready {
                                root,
                                script: None,
                                crashed: false,
                            },
                        };
                    }
                    Poll::Ready(Err(err)) => {
                        diagnostics.error(format!("model load failed: {err}"));
                        self.step = Step::Fallback { pending: None };
                    }
                },
                Step::Script {
                    root,
                    url,
                    mut pending,
                } => match fetch(loader, AssetKind::Script, &url, &mut pending) {
                    Poll::Pending => {
                        self.step = Step::Script { root, url, pending };
                        return Poll::Pending;
                    }
                    Poll::Ready(Ok(asset)) => {
                        self.step = match asset.script() {
                            Some(factory) => Step::Ready {
                                root,
                                script: Some(factory),
                                crashed: false,
                            },
                            None => {
                                diagnostics.error(format!("{url} is not a script"));
                                Step::Fallback { pending: None }
                            }
                        };
                    }
                    Poll::Ready(Err(err)) => {
                        diagnostics.error(format!("script load failed: {err}"));
                        self.step = Step::Fallback { pending: None };
                    }
                },
                Step::Fallback { mut pending } => {
                    let url = self.crash_url.clone();
                    match fetch(loader, AssetKind::Model, &url, &mut pending) {
                        Poll::Pending => {
                            self.step = Step::Fallback { pending };
                            return Poll::Pending;
                        }
                        Poll::Ready(result) => {
                            let root = match result.map(|asset| asset.to_nodes()) {
                                Ok(Some(root)) => root,
                                Ok(None) | Err(_) => {
                                    diagnostics.error(format!("crash block {url} unavailable"));
                                    Node::placeholder_box()
                                }
                            };
                            self.step = Step::Ready {
                                root,
                                script: None,
                                crashed: true,
                            };
                        }
                    }
                }
                Step::Ready {
                    root,
                    script,
                    crashed,
                } => {
                    return Poll::Ready(BuildOutput {
                        generation: self.generation,
                        root,
                        script,
                        crashed,
                        blueprint: self.blueprint.take(),
                    });
                }
                Step::Finished => return Poll::Pending,
            }
        }
    }
}

/// Cached asset if there is one, otherwise start or continue a load.
fn fetch(
    loader: &mut dyn Loader,
    kind: AssetKind,
    url: &str,
    pending: &mut Option<LoadFuture>,
) -> Poll<Result<Asset, LoadError>> {
    if pending.is_none() {
        if let Some(asset) = loader.get(kind, url) {
            return Poll::Ready(Ok(asset));
        }
        *pending = Some(loader.load(kind, url));
    }
    match pending.as_mut() {
        Some(future) => poll_now(future.as_mut()),
        None => Poll::Pending,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::noop;
    use realm_assets::{CRASH_BLOCK_URL, MemoryLoader};

    fn run(task: &mut BuildTask, loader: &mut MemoryLoader) -> (usize, BuildOutput) {
        let mut diagnostics = Diagnostics::new();
        for polls in 1..100 {
            if let Poll::Ready(out) = task.poll(loader, &mut diagnostics) {
                return (polls, out);
            }
        }
        panic!("build never finished");
    }

    #[test]
    fn cached_model_finishes_on_first_poll() {
        let mut loader = MemoryLoader::new();
        loader.insert_cached("asset://box.glb", Asset::Model(Node::group("box")));
        let mut task = BuildTask::model(1, None, "asset://box.glb", AssetKind::Model, None, CRASH_BLOCK_URL);
        let (polls, out) = run(&mut task, &mut loader);
        assert_eq!(polls, 1);
        assert_eq!(out.root.name, "box");
        assert!(!out.crashed);
    }

    #[test]
    fn model_then_script_with_latency() {
        let mut loader = MemoryLoader::new();
        loader.insert_model("asset://box.glb", Node::group("box"));
        loader.insert_script("script://noop", noop());
        loader.set_latency("asset://box.glb", 2);
        loader.set_latency("script://noop", 1);
        let mut task = BuildTask::model(
            3,
            None,
            "asset://box.glb",
            AssetKind::Model,
            Some("script://noop".into()),
            CRASH_BLOCK_URL,
        );
        let (polls, out) = run(&mut task, &mut loader);
        assert_eq!(polls, 4);
        assert_eq!(out.generation, 3);
        assert!(out.script.is_some());
    }

    #[test]
    fn load_failure_falls_back_to_crash_block() {
        let mut loader = MemoryLoader::new();
        loader.fail("asset://bad.glb", "truncated");
        let mut task = BuildTask::model(1, None, "asset://bad.glb", AssetKind::Model, None, CRASH_BLOCK_URL);
        let (_, out) = run(&mut task, &mut loader);
        assert!(out.crashed);
        assert_eq!(out.root.name, "crash-block");
        assert!(out.script.is_none());
    }

    #[test]
    fn missing_script_is_a_crash() {
        let mut loader = MemoryLoader::new();
        loader.insert_cached("asset://box.glb", Asset::Model(Node::group("box")));
        let mut task = BuildTask::model(
            1,
            None,
            "asset://box.glb",
            AssetKind::Model,
            Some("script://missing".into()),
            CRASH_BLOCK_URL,
        );
        let (_, out) = run(&mut task, &mut loader);
        assert!(out.crashed);
    }

    #[test]
    fn placeholder_never_loads() {
        let mut loader = MemoryLoader::new();
        let mut task = BuildTask::placeholder(1, None);
        let (polls, out) = run(&mut task, &mut loader);
        assert_eq!(polls, 1);
        assert_eq!(out.root.name, "placeholder");
        assert_eq!(loader.loads_started(), 0);
    }
}
