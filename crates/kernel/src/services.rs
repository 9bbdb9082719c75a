use crate::bus::EventBus;
use crate::config::WorldConfig;
use crate::stage::Stage;
use realm_assets::Loader;
use realm_common::{BlueprintStore, Diagnostics, EntityId};
use realm_input::ControlState;
use realm_net::Network;
use realm_physics::Physics;
use realm_script::{PlayerInfo, WorldView};
use std::collections::BTreeMap;

/// Everything an entity may reach besides itself.
///
/// Passed by `&mut` into every entity call; entities never hold on to it.
pub struct Services {
    pub config: WorldConfig,
    pub loader: Box<dyn Loader>,
    pub physics: Box<dyn Physics>,
    pub network: Box<dyn Network>,
    pub events: EventBus,
    pub stage: Stage,
    pub blueprints: BlueprintStore,
    pub diagnostics: Diagnostics,
    pub controls: ControlState,
    /// Public player facts, kept current by the registry and players.
    pub roster: BTreeMap<EntityId, PlayerInfo>,
}

impl Services {
    pub fn new(
        config: WorldConfig,
        loader: Box<dyn Loader>,
        physics: Box<dyn Physics>,
        network: Box<dyn Network>,
    ) -> Self {
        Self {
            config,
            loader,
            physics,
            network,
            events: EventBus::new(),
            stage: Stage::new(),
            blueprints: BlueprintStore::new(),
            diagnostics: Diagnostics::new(),
            controls: ControlState::new(),
            roster: BTreeMap::new(),
        }
    }

    /// What scripts may observe about the world right now.
    pub fn world_view(&self) -> WorldView {
        WorldView {
            network_id: self.network.id().clone(),
            is_server: self.network.is_server(),
            is_client: self.network.is_client(),
            time: self.network.time(),
            players: self.roster.values().cloned().collect(),
        }
    }
}
