use anyhow::Context;
use clap::{Parser, Subcommand};
use glam::{Quat, Vec3};
use realm_assets::{Manifest, MemoryLoader};
use realm_common::{Blueprint, EntityData, MeshShape, Node, NodeKind, Severity};
use realm_input::Button;
use realm_kernel::{World, WorldConfig, WorldSnapshot};
use realm_net::LoopbackNetwork;
use realm_physics::SimplePhysics;
use realm_script::{AppProxy, Script, ScriptEvent, ScriptFault, WorldProxy};
use serde_json::Value;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::rc::Rc;
use tracing_subscriber::EnvFilter;

const PEER: &str = "local";
const SPINNER_MODEL: &str = "asset://spinner.glb";
const SPINNER_SCRIPT: &str = "script://spinner";

#[derive(Parser)]
#[command(name = "realm-cli", about = "Headless driver for the realm simulation core")]
struct Cli {
    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Print crate info and the effective configuration
    Info {
        /// JSON file with config overrides
        #[arg(long)]
        config: Option<PathBuf>,
    },
    /// Run a headless session with a walking player and a spinning app
    Simulate {
        /// Number of frames to run, one fixed step each
        #[arg(short, long, default_value = "300")]
        ticks: u32,
        /// JSON file with config overrides
        #[arg(long)]
        config: Option<PathBuf>,
        /// World manifest with extra assets, blueprints and entities
        #[arg(long)]
        manifest: Option<PathBuf>,
    },
    /// Load a manifest and print the resulting entities as JSON
    Inspect {
        #[arg(long)]
        manifest: Option<PathBuf>,
    },
}

/// Turns its `blade` node around the vertical axis.
struct Spinner {
    speed: f32,
}

impl Script for Spinner {
    fn exec(&mut self, _world: &mut WorldProxy<'_>, app: &mut AppProxy<'_>) -> Result<(), ScriptFault> {
        if let Some(speed) = app.props().get("speed").and_then(Value::as_f64) {
            self.speed = speed as f32;
        }
        app.on("update");
        Ok(())
    }

    fn on_event(
        &mut self,
        event: &ScriptEvent,
        _world: &mut WorldProxy<'_>,
        app: &mut AppProxy<'_>,
    ) -> Result<(), ScriptFault> {
        if event.name != "update" {
            return Ok(());
        }
        let dt = event.data.as_f64().unwrap_or_default() as f32;
        let blade = app
            .get("blade")
            .ok_or_else(|| ScriptFault::new("spinner model has no blade"))?;
        blade.transform.rotation *= Quat::from_rotation_y(self.speed * dt);
        Ok(())
    }
}

fn load_config(path: Option<&Path>) -> anyhow::Result<WorldConfig> {
    match path {
        Some(path) => WorldConfig::from_json_file(path)
            .with_context(|| format!("reading config {}", path.display())),
        None => Ok(WorldConfig::default()),
    }
}

fn load_manifest(path: Option<&Path>) -> anyhow::Result<Option<Manifest>> {
    path.map(|path| {
        Manifest::from_json_file(path).with_context(|| format!("reading manifest {}", path.display()))
    })
    .transpose()
}

/// A client world on a loopback network, memory loader and simple physics.
fn session(config: WorldConfig, manifest: Option<&Manifest>) -> (World, MemoryLoader, LoopbackNetwork) {
    let loader = MemoryLoader::new();
    let network = LoopbackNetwork::client(PEER);
    let mut physics = SimplePhysics::new();
    physics.add_ground(0.0);
    let mut world = World::new(
        config,
        Box::new(loader.clone()),
        Box::new(physics),
        Box::new(network.clone()),
    );
    if let Some(manifest) = manifest {
        loader.import(manifest);
        world.load_snapshot(WorldSnapshot {
            blueprints: manifest.blueprints.clone(),
            entities: manifest.entities.clone(),
        });
    }
    (world, loader, network)
}

fn add_spinner(world: &mut World, loader: &MemoryLoader) {
    let blade = Node::new(
        "blade",
        NodeKind::Mesh {
            mesh: MeshShape::Box {
                width: 2.0,
                height: 0.1,
                depth: 0.2,
            },
        },
    );
    loader.insert_model(SPINNER_MODEL, Node::group("spinner").with_child(blade));
    loader.insert_script(
        SPINNER_SCRIPT,
        Rc::new(|| -> Box<dyn Script> { Box::new(Spinner { speed: 1.0 }) }),
    );
    let mut blueprint = Blueprint::new("spinner", SPINNER_MODEL).with_script(SPINNER_SCRIPT);
    blueprint.props.insert("speed".into(), Value::from(2.0));
    world.add_blueprint(blueprint, true);
    world.add_entity(EntityData::app("spinner-1", "spinner").with_position(Vec3::new(0.0, 0.0, -4.0)));
}

fn simulate(world: &mut World, network: &LoopbackNetwork, ticks: u32) {
    let dt = world.config().fixed_timestep;
    world.add_entity(EntityData::player("player-1", PEER));
    world.controls_mut().press(Button::Forward);
    for _ in 0..ticks {
        world.frame(dt);
    }
    world.controls_mut().release(Button::Forward);
    world.frame(dt);

    println!("Simulated {} frames ({:.2}s)", world.frame_count(), world.frame_count() as f32 * dt);
    println!(
        "Entities: {} ({} hot), stage roots: {}, nodes: {}",
        world.entities().len(),
        world.entities().hot_count(),
        world.services().stage.len(),
        world.services().stage.node_count()
    );
    if let Some(player) = world.local_player() {
        let data = player.data();
        println!(
            "Player: position={:?} emote={}",
            data.position,
            data.emote.as_deref().unwrap_or("-")
        );
    }
    println!(
        "Diagnostics: {} warnings, {} errors",
        world.diagnostics().count(Severity::Warn),
        world.diagnostics().count(Severity::Error)
    );
    for diagnostic in world.drain_diagnostics() {
        println!("  {:?}: {}", diagnostic.severity, diagnostic.message);
    }

    let mut outbound: BTreeMap<&str, usize> = BTreeMap::new();
    for sent in network.sent() {
        *outbound.entry(sent.message.name()).or_default() += 1;
    }
    let total: usize = outbound.values().sum();
    println!("Outbound messages: {total}");
    for (name, count) in outbound {
        println!("  {name}: {count}");
    }
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let filter = if cli.verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::new(filter))
        .init();

    match cli.command {
        Commands::Info { config } => {
            let config = load_config(config.as_deref())?;
            println!("realm-cli v{}", env!("CARGO_PKG_VERSION"));
            println!("kernel: {}", realm_kernel::crate_info());
            println!("assets: {}", realm_assets::crate_info());
            println!("physics: {}", realm_physics::crate_info());
            println!("net: {}", realm_net::crate_info());
            println!("input: {}", realm_input::crate_info());
            println!("config: {}", serde_json::to_string_pretty(&config)?);
        }
        Commands::Simulate {
            ticks,
            config,
            manifest,
        } => {
            let config = load_config(config.as_deref())?;
            let manifest = load_manifest(manifest.as_deref())?;
            let (mut world, loader, network) = session(config, manifest.as_ref());
            add_spinner(&mut world, &loader);
            tracing::info!(ticks, "simulation started");
            simulate(&mut world, &network, ticks);
        }
        Commands::Inspect { manifest } => {
            let manifest = load_manifest(manifest.as_deref())?;
            let (mut world, loader, _) = session(WorldConfig::default(), manifest.as_ref());
            if manifest.is_none() {
                add_spinner(&mut world, &loader);
            }
            // Let pending loads settle.
            let dt = world.config().fixed_timestep;
            for _ in 0..10 {
                world.frame(dt);
            }
            let entities = world.snapshot().entities;
            println!("{}", serde_json::to_string_pretty(&entities)?);
        }
    }

    Ok(())
}
