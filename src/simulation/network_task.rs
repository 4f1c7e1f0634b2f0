//! Central simulation task: builds the network, boots every node and plays the
//! operator's part until the scene's run time is over.
//!
//! High-level flow:
//! 1) Build the simulated mesh and broker from the scene.
//! 2) Start nodes parents-first, a short stagger apart, as real devices would
//!    power up at slightly different times.
//! 3) `select` on published broker traffic and the next deadline (script step,
//!    periodic view dump, or end of run).

use chrono::{DateTime, TimeDelta, Utc};
use embassy_executor::Spawner;
use embassy_futures::select::{Either, select};
use embassy_time::{Duration, Instant, Timer};

use super::broker::SimBroker;
use super::mesh::{SimMesh, SimMeshStack};
use super::network_view::{Ingested, NetworkView};
use super::scene::Scene;
use crate::broker::BrokerMessage;
use crate::config::AgentConfig;
use crate::indicator::LogIndicator;
use crate::node::{NodeAgent, NodeChannels, start_node};

const BOOT_STAGGER: Duration = Duration::from_millis(50);
const VIEW_PRINT_INTERVAL: Duration = Duration::from_secs(5);

/// Wall-clock date of the run start advanced by elapsed virtual time, so
/// report ages in the [`NetworkView`] follow the scaled simulation clock.
#[derive(Debug, Clone, Copy)]
struct ViewClock {
    wall_start: DateTime<Utc>,
    started: Instant,
}

impl ViewClock {
    fn now(&self) -> DateTime<Utc> {
        timestamp_after(self.wall_start, self.started.elapsed())
    }
}

fn timestamp_after(start: DateTime<Utc>, elapsed: Duration) -> DateTime<Utc> {
    let millis = i64::try_from(elapsed.as_millis()).unwrap_or(i64::MAX);
    TimeDelta::try_milliseconds(millis)
        .and_then(|delta| start.checked_add_signed(delta))
        .unwrap_or(DateTime::<Utc>::MAX_UTC)
}

#[embassy_executor::task]
pub async fn network_task(spawner: Spawner, scene: Scene, config: AgentConfig) {
    let links = match scene.links() {
        Ok(links) => links,
        Err(err) => {
            log::error!("Invalid scene: {}", err);
            return;
        }
    };

    // INTENTIONAL LEAK: node tasks need 'static access to the mesh, the broker and
    // their own agent. All of them live until the process exits.
    let mesh: &'static SimMesh = Box::leak(Box::new(SimMesh::new(&links)));
    let broker: &'static SimBroker = Box::leak(Box::new(SimBroker::new(config.broker_uri.clone(), mesh.len())));

    if let Some(root) = scene.root_index() {
        log::info!("Booting {} nodes, root {}", mesh.len(), mesh.radio(root).logical());
    }

    for &idx in mesh.boot_order() {
        let mut node_config = config.clone();
        if let Some(max_children) = scene.nodes[idx].max_children {
            node_config.max_children = max_children;
        }
        let stack: &'static SimMeshStack<'static> = Box::leak(Box::new(mesh.stack(idx)));
        let client = Box::leak(Box::new(broker.client(idx)));
        let indicator = Box::leak(Box::new(LogIndicator::new(mesh.radio(idx).logical().to_string())));
        let agent: &'static NodeAgent<'static> = Box::leak(Box::new(NodeAgent::new(stack, client, indicator, node_config)));

        let channels = NodeChannels {
            inbox: mesh.inbox(idx).receiver(),
            events: mesh.events(idx).receiver(),
            broker_inbox: broker.inbox(idx).receiver(),
        };
        start_node(spawner, agent, channels);
        Timer::after(BOOT_STAGGER).await;
    }

    run_operator(broker, &scene, &config).await;
    log::info!("Simulation finished after {} ms", scene.duration_ms);
    std::process::exit(0);
}

/// Plays the scene's script against the root and keeps a [`NetworkView`] of
/// the telemetry it publishes. Returns once the run time is over.
async fn run_operator(broker: &SimBroker, scene: &Scene, config: &AgentConfig) {
    let started = Instant::now();
    let clock = ViewClock { wall_start: Utc::now(), started };
    let end = started + Duration::from_millis(scene.duration_ms);
    let mut next_print = started + VIEW_PRINT_INTERVAL;
    let mut script = scene.script.iter().peekable();
    let mut view = NetworkView::new();

    loop {
        let next_step = script.peek().map(|step| started + Duration::from_millis(step.at_ms));
        let deadline = [Some(end), Some(next_print), next_step].into_iter().flatten().min().unwrap_or(end);

        match select(broker.published().receive(), Timer::at(deadline)).await {
            Either::First(message) => ingest(&mut view, &message, config, clock.now()),
            Either::Second(()) => {
                let now = Instant::now();
                while let Some(step) = script.next_if(|step| started + Duration::from_millis(step.at_ms) <= now) {
                    let payload = step.command.to_bytes();
                    let delivered = broker.inject(&config.command_topic, &payload);
                    if delivered == 0 {
                        log::warn!("[operator] no root subscribed to {}, dropped {}", config.command_topic, String::from_utf8_lossy(&payload));
                    } else {
                        log::info!("[operator] sent {}", String::from_utf8_lossy(&payload));
                    }
                }
                if now >= next_print {
                    print_view(&mut view, clock.now());
                    next_print += VIEW_PRINT_INTERVAL;
                }
                if now >= end {
                    print_view(&mut view, clock.now());
                    return;
                }
            }
        }
    }
}

fn ingest(view: &mut NetworkView, message: &BrokerMessage, config: &AgentConfig, now: DateTime<Utc>) {
    if message.topic != config.info_topic {
        log::debug!("[operator] ignoring message on {}", message.topic);
        return;
    }
    match view.ingest(&message.payload, now) {
        Ingested::Report(mac) => {
            let hops = view.node(&mac).and_then(|node| node.hops).unwrap_or_default();
            log::debug!("[operator] report from {} at hop {}", mac, hops);
        }
        Ingested::Pong(mac) => log::info!("[operator] pong from {}", mac),
        Ingested::Incomplete => log::warn!("[operator] incomplete report: {}", String::from_utf8_lossy(&message.payload)),
        Ingested::Invalid => log::warn!("[operator] unparseable message: {}", String::from_utf8_lossy(&message.payload)),
    }
}

fn print_view(view: &mut NetworkView, now: DateTime<Utc>) {
    for mac in view.prune(now) {
        log::info!("[operator] removing inactive node {}", mac);
    }
    if view.is_empty() {
        log::info!("[operator] no reports received yet");
        return;
    }
    log::info!(
        "[operator] {} nodes known, {} pongs so far:\n{}",
        view.len(),
        view.pongs().len(),
        view.render_tree()
    );
}
