//! One mesh node: its shared state and the tasks that run it.
//!
//! Task layout per node:
//! - `event_task`: consumes mesh lifecycle events; on the first parent
//!   connection it spawns `rx_task` and `report_task`
//! - `rx_task`: receive-and-route loop over the mesh inbox
//! - `report_task`: periodic status reports
//! - `reconfig_task`: reconfiguration state machine
//! - `broker_task`: command-topic messages (only ever fed at the root)

use embassy_executor::Spawner;
use embassy_time::Duration;

use crate::address::{NodeAddress, self_address};
use crate::broker::{Broker, BrokerInboxReceiver};
use crate::config::AgentConfig;
use crate::error::fatal;
use crate::events::{EventHandler, EventOutcome, LinkState};
use crate::indicator::Indicator;
use crate::mesh::{MeshConfig, MeshEventReceiver, MeshInboxReceiver, MeshStack, bring_up};
use crate::reconfig::ReconfigController;
use crate::report::Reporter;
use crate::router::CommandRouter;
use crate::runtime::RuntimeConfig;

/// Upper bound on simulated nodes; sizes every per-node task pool.
pub const MAX_NODES: usize = 32;

pub struct NodeAgent<'a> {
    pub stack: &'a dyn MeshStack,
    pub broker: &'a dyn Broker,
    pub indicator: &'a dyn Indicator,
    pub config: AgentConfig,
    pub runtime: RuntimeConfig,
    pub link: LinkState,
}

impl<'a> NodeAgent<'a> {
    pub fn new(stack: &'a dyn MeshStack, broker: &'a dyn Broker, indicator: &'a dyn Indicator, config: AgentConfig) -> Self {
        let runtime = RuntimeConfig::new(config.report_interval_ms, config.max_children);
        Self {
            stack,
            broker,
            indicator,
            config,
            runtime,
            link: LinkState::new(),
        }
    }

    pub fn address(&self) -> NodeAddress {
        self_address(self.stack.radio_address())
    }

    /// Stack configuration with the current fan-out limit.
    pub fn mesh_config(&self) -> MeshConfig {
        MeshConfig::new(&self.config.mesh, self.runtime.current_max_children())
    }

    pub fn router(&self) -> CommandRouter<'_> {
        CommandRouter {
            stack: self.stack,
            broker: self.broker,
            indicator: self.indicator,
            runtime: &self.runtime,
            config: &self.config,
        }
    }

    pub fn reporter(&self) -> Reporter<'_> {
        Reporter {
            stack: self.stack,
            broker: self.broker,
            indicator: self.indicator,
            runtime: &self.runtime,
            link: &self.link,
            info_topic: &self.config.info_topic,
        }
    }

    pub fn event_handler(&self) -> EventHandler<'_> {
        EventHandler {
            stack: self.stack,
            broker: self.broker,
            indicator: self.indicator,
            link: &self.link,
            command_topic: &self.config.command_topic,
        }
    }

    pub fn reconfig_controller(&self) -> ReconfigController<'_> {
        ReconfigController::new(self.stack, self.indicator, &self.runtime, &self.config.mesh, self.config.restart_jitter_max_ms)
    }
}

/// Queues feeding one node.
pub struct NodeChannels {
    pub inbox: MeshInboxReceiver,
    pub events: MeshEventReceiver,
    pub broker_inbox: BrokerInboxReceiver,
}

/// Spawns the node's standing tasks and brings its mesh stack up.
///
/// A failed bring-up is fatal.
pub fn start_node(spawner: Spawner, agent: &'static NodeAgent<'static>, channels: NodeChannels) {
    let me = agent.address();

    if let Err(err) = spawner.spawn(event_task(spawner, agent, channels.events, channels.inbox)) {
        log::error!("[{}] failed to spawn event task: {:?}", me, err);
    }
    if let Err(err) = spawner.spawn(reconfig_task(agent)) {
        log::error!("[{}] failed to spawn reconfiguration task: {:?}", me, err);
    }
    if let Err(err) = spawner.spawn(broker_task(agent, channels.broker_inbox)) {
        log::error!("[{}] failed to spawn broker task: {:?}", me, err);
    }

    if let Err(err) = bring_up(agent.stack, &agent.mesh_config()) {
        fatal(&format!("[{}] mesh bring-up:", me), err);
    }
    log::info!("[{}] mesh started with max_children {}", me, agent.runtime.current_max_children());
}

#[embassy_executor::task(pool_size = MAX_NODES)]
async fn event_task(spawner: Spawner, agent: &'static NodeAgent<'static>, events: MeshEventReceiver, inbox: MeshInboxReceiver) {
    let handler = agent.event_handler();
    let mut inbox = Some(inbox);
    loop {
        let event = events.receive().await;
        if handler.handle(&event) != EventOutcome::StartCommunication {
            continue;
        }
        let Some(inbox) = inbox.take() else { continue };
        log::debug!("[{}] starting communication tasks", agent.address());
        if let Err(err) = spawner.spawn(rx_task(agent, inbox)) {
            log::error!("[{}] failed to spawn receive task: {:?}", agent.address(), err);
        }
        if let Err(err) = spawner.spawn(report_task(agent)) {
            log::error!("[{}] failed to spawn report task: {:?}", agent.address(), err);
        }
    }
}

#[embassy_executor::task(pool_size = MAX_NODES)]
async fn rx_task(agent: &'static NodeAgent<'static>, inbox: MeshInboxReceiver) {
    let router = agent.router();
    loop {
        let packet = inbox.receive().await;
        let outcome = router.handle_mesh_packet(&packet).await;
        log::trace!("[{}] packet from {}: {:?}", agent.address(), packet.from.logical(), outcome);
    }
}

#[embassy_executor::task(pool_size = MAX_NODES)]
async fn report_task(agent: &'static NodeAgent<'static>) {
    agent.reporter().run().await
}

#[embassy_executor::task(pool_size = MAX_NODES)]
async fn reconfig_task(agent: &'static NodeAgent<'static>) {
    let poll = Duration::from_millis(agent.config.reconfig_poll_ms);
    agent.reconfig_controller().run(poll).await
}

#[embassy_executor::task(pool_size = MAX_NODES)]
async fn broker_task(agent: &'static NodeAgent<'static>, inbox: BrokerInboxReceiver) {
    let router = agent.router();
    loop {
        let message = inbox.receive().await;
        let outcome = router.handle_broker_message(&message).await;
        log::trace!("[{}] broker message on {}: {:?}", agent.address(), message.topic, outcome);
    }
}
