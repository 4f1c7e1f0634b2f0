//! Multi-node behaviour over the simulated mesh.
//!
//! Real routers, reporters and reconfiguration controllers run against the
//! in-process mesh and broker; inboxes are pumped synchronously so every
//! delivery can be counted.

use embassy_futures::block_on;

use super::broker::SimBroker;
use super::mesh::SimMesh;
use super::operator::OperatorCommand;
use crate::address::RadioAddress;
use crate::broker::BrokerMessage;
use crate::command::Action;
use crate::config::{AgentConfig, BlinkPattern};
use crate::mesh::bring_up;
use crate::node::NodeAgent;
use crate::reconfig::ReconfigState;
use crate::report::{CycleOutcome, StatusReport};
use crate::router::RouteOutcome;
use crate::runtime::MaxChildrenRequest;
use crate::testing::{IndicatorCall, RecordingIndicator};

const ROOT: usize = 0;
const A: usize = 1;
const B: usize = 2;
const C: usize = 3;
const D: usize = 4;
const E: usize = 5;

fn addr(last: u8) -> RadioAddress {
    RadioAddress([0x24, 0x0a, 0xc4, 0, 0, last])
}

/// root -> a -> b -> c, with side leaves d (under root) and e (under a).
fn chain_links() -> Vec<(RadioAddress, Option<RadioAddress>)> {
    vec![
        (addr(0x10), None),
        (addr(0x20), Some(addr(0x10))),
        (addr(0x30), Some(addr(0x20))),
        (addr(0x40), Some(addr(0x30))),
        (addr(0x50), Some(addr(0x10))),
        (addr(0x60), Some(addr(0x20))),
    ]
}

/// What a node did with one delivered payload.
struct Delivery {
    node: usize,
    payload: Vec<u8>,
    outcome: RouteOutcome,
}

struct Network {
    mesh: &'static SimMesh,
    broker: &'static SimBroker,
    agents: Vec<&'static NodeAgent<'static>>,
    indicators: Vec<&'static RecordingIndicator>,
}

impl Network {
    fn new(links: &[(RadioAddress, Option<RadioAddress>)], max_children: u8) -> Self {
        let mesh: &'static SimMesh = Box::leak(Box::new(SimMesh::new(links)));
        let broker: &'static SimBroker = Box::leak(Box::new(SimBroker::new("mqtt://sim", mesh.len())));
        let config = AgentConfig {
            max_children,
            restart_jitter_max_ms: 0,
            blink: BlinkPattern { on_ms: 1, off_ms: 1, cycles: 1, settle_ms: 0 },
            ..AgentConfig::default()
        };

        let mut agents = Vec::new();
        let mut indicators = Vec::new();
        for idx in 0..mesh.len() {
            let stack = Box::leak(Box::new(mesh.stack(idx)));
            let client = Box::leak(Box::new(broker.client(idx)));
            let indicator: &'static RecordingIndicator = Box::leak(Box::new(RecordingIndicator::default()));
            agents.push(&*Box::leak(Box::new(NodeAgent::new(stack, client, indicator, config.clone()))));
            indicators.push(indicator);
        }

        let network = Self { mesh, broker, agents, indicators };
        for &idx in mesh.boot_order() {
            let agent = network.agents[idx];
            bring_up(agent.stack, &agent.mesh_config()).unwrap();
            network.handle_events();
        }
        network
    }

    fn handle_events(&self) {
        for (idx, agent) in self.agents.iter().enumerate() {
            while let Ok(event) = self.mesh.events(idx).try_receive() {
                agent.event_handler().handle(&event);
            }
        }
    }

    fn logical(&self, idx: usize) -> String {
        self.mesh.radio(idx).logical().to_string()
    }

    /// Operator publishes on the command topic; the root's broker handler runs it.
    fn operator(&self, command: &OperatorCommand) -> Vec<Delivery> {
        let payload = command.to_bytes();
        assert_eq!(self.broker.inject("mesh/cmd", &payload), 1, "exactly one root is subscribed");
        let mut deliveries = Vec::new();
        for (idx, agent) in self.agents.iter().enumerate() {
            while let Ok(message) = self.broker.inbox(idx).try_receive() {
                let outcome = block_on(agent.router().handle_broker_message(&message));
                deliveries.push(Delivery { node: idx, payload: message.payload, outcome });
            }
        }
        deliveries.extend(self.pump());
        deliveries
    }

    /// Routes mesh packets until every inbox is empty.
    fn pump(&self) -> Vec<Delivery> {
        let mut deliveries = Vec::new();
        loop {
            let mut progressed = false;
            for (idx, agent) in self.agents.iter().enumerate() {
                while let Ok(packet) = self.mesh.inbox(idx).try_receive() {
                    let outcome = block_on(agent.router().handle_mesh_packet(&packet));
                    deliveries.push(Delivery { node: idx, payload: packet.payload, outcome });
                    progressed = true;
                }
            }
            if !progressed {
                return deliveries;
            }
        }
    }

    fn published(&self) -> Vec<BrokerMessage> {
        std::iter::from_fn(|| self.broker.published().try_receive().ok()).collect()
    }
}

fn received_by(deliveries: &[Delivery], node: usize, payload: &[u8]) -> usize {
    deliveries.iter().filter(|d| d.node == node && d.payload == payload).count()
}

#[test]
fn whole_tree_attaches_and_root_subscribes() {
    let net = Network::new(&chain_links(), 2);
    assert!((0..6).all(|i| net.mesh.is_attached(i)));
    assert_eq!(net.agents[C].stack.layer(), 4);
    assert!(net.agents[ROOT].link.is_connected());
    assert_eq!(net.broker.inject("mesh/cmd", b"{}"), 1);
}

#[test]
fn ping_at_depth_yields_exactly_one_pong() {
    let net = Network::new(&chain_links(), 2);
    let target = net.logical(C);
    let command = OperatorCommand::Ping { target: target.clone() };
    let ping = command.to_bytes();
    let deliveries = net.operator(&command);

    let pongs: Vec<_> = net
        .published()
        .into_iter()
        .filter(|m| m.topic == "mesh/network/info")
        .filter_map(|m| serde_json::from_slice::<serde_json::Value>(&m.payload).ok())
        .filter(|doc| doc["type"] == "pong")
        .collect();
    assert_eq!(pongs.len(), 1);
    assert_eq!(pongs[0]["mac"], target.as_str());

    // root forwarded from the broker, a and b from the mesh, each once
    let forwarded_at = |node: usize| {
        deliveries
            .iter()
            .filter(|d| d.node == node && d.payload == ping && matches!(d.outcome, RouteOutcome::Forwarded(_)))
            .count()
    };
    assert_eq!(forwarded_at(ROOT), 1);
    assert_eq!(forwarded_at(A), 1);
    assert_eq!(forwarded_at(B), 1);
    assert_eq!(received_by(&deliveries, C, &ping), 1);
    assert!(deliveries.iter().any(|d| d.node == C && d.outcome == RouteOutcome::Executed(Action::Ping)));
}

#[test]
fn blink_runs_only_at_target() {
    let net = Network::new(&chain_links(), 2);
    net.operator(&OperatorCommand::Blink { target: net.logical(E) });

    for (idx, indicator) in net.indicators.iter().enumerate() {
        let blinked = indicator.calls().contains(&IndicatorCall::SetAll(true));
        assert_eq!(blinked, idx == E, "node {} blink state", idx);
    }
}

#[test]
fn interval_update_reaches_every_node_once() {
    let net = Network::new(&chain_links(), 2);
    let command = OperatorCommand::SetInterval { interval_ms: 5000 };
    let payload = command.to_bytes();
    let deliveries = net.operator(&command);

    for node in [A, B, C, D, E] {
        assert_eq!(received_by(&deliveries, node, &payload), 1, "node {}", node);
    }
    assert!(net.agents.iter().all(|agent| agent.runtime.report_interval_ms() == 5000));
}

#[test]
fn paused_reporting_stays_silent_until_resumed() {
    let net = Network::new(&chain_links(), 2);
    net.operator(&OperatorCommand::PauseReporting);
    net.published();

    for _ in 0..3 {
        for agent in &net.agents {
            assert_eq!(agent.reporter().report_once(), CycleOutcome::Blocked);
        }
    }
    assert!(net.pump().is_empty());
    assert!(net.published().is_empty());

    net.operator(&OperatorCommand::SetInterval { interval_ms: 1000 });
    assert_eq!(net.agents[ROOT].reporter().report_once(), CycleOutcome::Published);
    assert_eq!(net.agents[C].reporter().report_once(), CycleOutcome::SentToParent);
}

#[test]
fn deep_report_is_republished_byte_for_byte() {
    let net = Network::new(&chain_links(), 2);
    assert_eq!(net.agents[C].reporter().report_once(), CycleOutcome::SentToParent);
    let deliveries = net.pump();
    assert_eq!(deliveries.len(), 1);
    assert_eq!(deliveries[0].node, ROOT);
    assert_eq!(deliveries[0].outcome, RouteOutcome::Published);

    let published = net.published();
    assert_eq!(published.len(), 1);
    assert_eq!(published[0].payload, deliveries[0].payload);
    let report: StatusReport = serde_json::from_slice(&published[0].payload).unwrap();
    assert_eq!(report.mac, net.logical(C));
    assert_eq!(report.parent.as_deref(), Some(net.logical(B).as_str()));
    assert_eq!(report.hops, 4);
    assert!(report.children.is_empty());
}

#[test]
fn raising_max_children_admits_waiting_child() {
    let links = vec![
        (addr(0x10), None),
        (addr(0x20), Some(addr(0x10))),
        (addr(0x30), Some(addr(0x10))),
        (addr(0x40), Some(addr(0x10))),
    ];
    let net = Network::new(&links, 2);
    assert!(!net.mesh.is_attached(3));

    let deliveries = net.operator(&OperatorCommand::SetMaxChildren { interval_ms: 2000, max_children: 3 });
    assert_eq!(
        deliveries[0].outcome,
        RouteOutcome::ConfigApplied { forwarded: 2, reconfig: Some(MaxChildrenRequest::Accepted) }
    );

    let mut controller = net.agents[ROOT].reconfig_controller();
    assert_eq!(block_on(controller.step()).unwrap(), ReconfigState::Stopped);
    // a repeat of the same update while the cycle is in flight changes nothing
    let repeat = OperatorCommand::SetMaxChildren { interval_ms: 2000, max_children: 3 }.to_bytes();
    let outcome = block_on(net.agents[ROOT].router().route(crate::router::Origin::Broker, &repeat));
    assert_eq!(outcome, RouteOutcome::ConfigApplied { forwarded: 0, reconfig: Some(MaxChildrenRequest::Unchanged) });
    assert_eq!(block_on(controller.step()).unwrap(), ReconfigState::Restarting);
    assert_eq!(block_on(controller.step()).unwrap(), ReconfigState::Stable);
    net.handle_events();

    assert!((0..4).all(|i| net.mesh.is_attached(i)));
    assert!(!net.agents[ROOT].runtime.reconfig_pending());
    assert_eq!(block_on(controller.step()).unwrap(), ReconfigState::Stable);
    assert_eq!(net.agents[ROOT].stack.routing_table(20).unwrap().len(), 4);
}
