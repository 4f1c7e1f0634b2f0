use embassy_executor::Executor;
use env_logger::Builder;
use log::{LevelFilter, error, info};
use std::path::Path;

use crate::config::AgentConfig;
use crate::simulation::load_scene;

mod address;
mod broker;
mod command;
mod config;
mod error;
mod events;
mod indicator;
mod mesh;
mod node;
mod reconfig;
mod report;
mod router;
mod runtime;
mod simulation;
mod time_driver;
mod topology;

#[cfg(test)]
mod testing;

const DEFAULT_SCENE_PATH: &str = "scenes/demo.json";
const DEFAULT_CONFIG_PATH: &str = "config.toml";

fn main() {
    // Logging setup
    Builder::new()
        .filter_level(LevelFilter::Info)
        .filter(Some("mesh_telemetry_agent"), LevelFilter::Debug)
        .parse_default_env()
        .init();

    let args: Vec<String> = std::env::args().collect();
    let scene_path = args.get(1).map(String::as_str).unwrap_or(DEFAULT_SCENE_PATH);
    let config_path = args.get(2).map(String::as_str).unwrap_or(DEFAULT_CONFIG_PATH);

    let config = match AgentConfig::load_or_default(Path::new(config_path)) {
        Ok(config) => config,
        Err(err) => {
            error!("{:#}", err);
            std::process::exit(1);
        }
    };

    let scene = match load_scene(scene_path) {
        Ok(scene) => scene,
        Err(err) => {
            error!("Failed to load scene {}: {}", scene_path, err);
            std::process::exit(1);
        }
    };

    info!(
        "Starting up: {} nodes, {} script steps, {} ms run at {}% speed",
        scene.nodes.len(),
        scene.script.len(),
        scene.duration_ms,
        scene.speed_percent
    );
    time_driver::set_speed_percent(scene.speed_percent);

    // Leak the executor to satisfy the 'static lifetime required by run()
    let executor: &'static mut Executor = Box::leak(Box::new(Executor::new()));
    executor.run(move |spawner| {
        if let Err(err) = spawner.spawn(simulation::network_task(spawner, scene, config)) {
            error!("Failed to spawn network task: {:?}", err);
        }
    });
}
