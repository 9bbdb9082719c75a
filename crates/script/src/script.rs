use crate::proxy::{AppProxy, ProxyError, WorldProxy};
use realm_common::PeerId;
use serde_json::Value;
use std::rc::Rc;

/// An error raised by script code. Converted by the owning entity into a
/// crash rebuild; never propagated to the frame loop.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
#[error("script fault: {0}")]
pub struct ScriptFault(pub String);

impl ScriptFault {
    pub fn new(message: impl Into<String>) -> Self {
        Self(message.into())
    }
}

impl From<ProxyError> for ScriptFault {
    fn from(err: ProxyError) -> Self {
        Self(err.to_string())
    }
}

/// An event delivered to a script listener.
#[derive(Debug, Clone, PartialEq)]
pub struct ScriptEvent {
    pub name: String,
    pub data: Value,
    pub sender: Option<PeerId>,
}

impl ScriptEvent {
    pub fn new(name: impl Into<String>, data: Value) -> Self {
        Self {
            name: name.into(),
            data,
            sender: None,
        }
    }
}

/// Code attached to a blueprint.
///
/// `exec` runs once per successful build. Per-frame phases arrive through
/// `on_event` as `fixedUpdate`/`update`/`lateUpdate` with the step in seconds
/// as data, but only when the script subscribed to them with `app.on`.
pub trait Script {
    fn exec(&mut self, world: &mut WorldProxy<'_>, app: &mut AppProxy<'_>) -> Result<(), ScriptFault>;

    fn on_event(
        &mut self,
        event: &ScriptEvent,
        world: &mut WorldProxy<'_>,
        app: &mut AppProxy<'_>,
    ) -> Result<(), ScriptFault> {
        let _ = (event, world, app);
        Ok(())
    }
}

/// Script assets are factories; each build gets a fresh instance.
pub type ScriptFactory = Rc<dyn Fn() -> Box<dyn Script>>;
