//! Fixtures shared by the unit tests.

use crate::config::WorldConfig;
use crate::services::Services;
use crate::world::World;
use realm_assets::MemoryLoader;
use realm_net::LoopbackNetwork;
use realm_physics::SimplePhysics;
use realm_script::{AppProxy, Script, ScriptEvent, ScriptFactory, ScriptFault, WorldProxy};
use std::cell::RefCell;
use std::rc::Rc;

pub struct Noop;

impl Script for Noop {
    fn exec(&mut self, _: &mut WorldProxy<'_>, _: &mut AppProxy<'_>) -> Result<(), ScriptFault> {
        Ok(())
    }
}

pub fn noop() -> ScriptFactory {
    Rc::new(|| -> Box<dyn Script> { Box::new(Noop) })
}

type ExecHook = Rc<dyn Fn(&mut WorldProxy<'_>, &mut AppProxy<'_>) -> Result<(), ScriptFault>>;
type EventHook =
    Rc<dyn Fn(&ScriptEvent, &mut WorldProxy<'_>, &mut AppProxy<'_>) -> Result<(), ScriptFault>>;

/// Script that logs `exec` and every event name it receives. Every instance
/// made by [`TestScript::factory`] shares the log.
#[derive(Clone, Default)]
pub struct TestScript {
    log: Rc<RefCell<Vec<String>>>,
    listen: Vec<String>,
    exec: Option<ExecHook>,
    event: Option<EventHook>,
}

impl TestScript {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn listen(mut self, names: &[&str]) -> Self {
        self.listen.extend(names.iter().map(|n| n.to_string()));
        self
    }

    /// Runs after the listeners are registered.
    pub fn on_exec(
        mut self,
        hook: impl Fn(&mut WorldProxy<'_>, &mut AppProxy<'_>) -> Result<(), ScriptFault> + 'static,
    ) -> Self {
        self.exec = Some(Rc::new(hook));
        self
    }

    /// Runs after the event is logged.
    pub fn on_event(
        mut self,
        hook: impl Fn(&ScriptEvent, &mut WorldProxy<'_>, &mut AppProxy<'_>) -> Result<(), ScriptFault>
        + 'static,
    ) -> Self {
        self.event = Some(Rc::new(hook));
        self
    }

    pub fn factory(&self) -> ScriptFactory {
        let template = self.clone();
        Rc::new(move || -> Box<dyn Script> { Box::new(template.clone()) })
    }

    pub fn log(&self) -> Vec<String> {
        self.log.borrow().clone()
    }

    pub fn count(&self, entry: &str) -> usize {
        self.log.borrow().iter().filter(|e| *e == entry).count()
    }

    pub fn record(&self, entry: impl Into<String>) {
        self.log.borrow_mut().push(entry.into());
    }
}

impl Script for TestScript {
    fn exec(&mut self, world: &mut WorldProxy<'_>, app: &mut AppProxy<'_>) -> Result<(), ScriptFault> {
        self.record("exec");
        for name in &self.listen {
            app.on(name);
        }
        match &self.exec {
            Some(hook) => hook(world, app),
            None => Ok(()),
        }
    }

    fn on_event(
        &mut self,
        event: &ScriptEvent,
        world: &mut WorldProxy<'_>,
        app: &mut AppProxy<'_>,
    ) -> Result<(), ScriptFault> {
        self.record(event.name.clone());
        match &self.event {
            Some(hook) => hook(event, world, app),
            None => Ok(()),
        }
    }
}

fn physics() -> Box<SimplePhysics> {
    let mut physics = SimplePhysics::new();
    physics.add_ground(0.0);
    Box::new(physics)
}

/// Client-side services with a shared handle on the loader.
pub fn services(peer: &str) -> (Services, MemoryLoader) {
    let (services, loader, _) = networked(peer);
    (services, loader)
}

pub fn networked(peer: &str) -> (Services, MemoryLoader, LoopbackNetwork) {
    let loader = MemoryLoader::new();
    let network = LoopbackNetwork::client(peer);
    let services = Services::new(
        WorldConfig::default(),
        Box::new(loader.clone()),
        physics(),
        Box::new(network.clone()),
    );
    (services, loader, network)
}

pub fn world(peer: &str) -> (World, MemoryLoader, LoopbackNetwork) {
    world_on(LoopbackNetwork::client(peer))
}

pub fn world_on(network: LoopbackNetwork) -> (World, MemoryLoader, LoopbackNetwork) {
    let loader = MemoryLoader::new();
    let world = World::new(
        WorldConfig::default(),
        Box::new(loader.clone()),
        physics(),
        Box::new(network.clone()),
    );
    (world, loader, network)
}
