//! Command routing.
//!
//! Two entry points feed one decision procedure: packets received from the
//! mesh (every node) and messages on the broker's command topic (root only).
//!
//! Delivery of targeted commands is a blind downward broadcast: a node that is
//! not the target forwards the original bytes to each of its direct children,
//! and every child repeats the rule. A command therefore reaches its target only
//! if every node on the path forwards it; nothing keeps a map of which subtree
//! holds which address. Replies and telemetry only ever travel upward.

use crate::address::{NodeAddress, RadioAddress, self_address};
use crate::broker::{Broker, BrokerMessage};
use crate::command::{Action, Command, pong_payload};
use crate::config::{AgentConfig, ROUTING_TABLE_CAPACITY};
use crate::indicator::{Indicator, blink};
use crate::mesh::{Destination, MeshPacket, MeshStack};
use crate::runtime::{MaxChildrenRequest, RuntimeConfig};
use crate::topology::children;

/// Where a payload entered this node.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Origin {
    Mesh(RadioAddress),
    Broker,
}

/// What the router did with a payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RouteOutcome {
    /// Unparseable payload; logged and discarded.
    Dropped,
    /// Interval applied and the update copied to `forwarded` children.
    ConfigApplied { forwarded: usize, reconfig: Option<MaxChildrenRequest> },
    /// Addressed to this node and executed.
    Executed(Action),
    /// Addressed elsewhere; copied to `0` or more children.
    Forwarded(usize),
    /// Pong relayed one step toward the root (or published at the root).
    PongRelayed,
    /// Telemetry published to the broker at the root.
    Published,
    /// Nothing to do with it here.
    Ignored,
}

pub struct CommandRouter<'a> {
    pub stack: &'a dyn MeshStack,
    pub broker: &'a dyn Broker,
    pub indicator: &'a dyn Indicator,
    pub runtime: &'a RuntimeConfig,
    pub config: &'a AgentConfig,
}

impl CommandRouter<'_> {
    fn me(&self) -> NodeAddress {
        self_address(self.stack.radio_address())
    }

    pub async fn handle_mesh_packet(&self, packet: &MeshPacket) -> RouteOutcome {
        self.route(Origin::Mesh(packet.from), &packet.payload).await
    }

    pub async fn handle_broker_message(&self, message: &BrokerMessage) -> RouteOutcome {
        if message.topic != self.config.command_topic {
            log::debug!("[{}] ignoring broker message on topic {}", self.me(), message.topic);
            return RouteOutcome::Ignored;
        }
        self.route(Origin::Broker, &message.payload).await
    }

    /// Classifies `payload` and executes, forwards or publishes it.
    pub async fn route(&self, origin: Origin, payload: &[u8]) -> RouteOutcome {
        let me = self.me();
        let command = match Command::parse(payload) {
            Ok(command) => command,
            Err(err) => {
                log::warn!("[{}] dropping payload from {:?}: {}", me, origin, err);
                return RouteOutcome::Dropped;
            }
        };

        match command {
            Command::PongResponse { mac } => {
                log::debug!("[{}] relaying pong from {}", me, mac.as_deref().unwrap_or("?"));
                self.send_up(payload);
                RouteOutcome::PongRelayed
            }
            Command::ConfigUpdate { interval_ms, max_children } => {
                self.runtime.apply_interval(interval_ms);
                if interval_ms == 0 {
                    log::info!("[{}] reporting paused", me);
                } else {
                    log::info!("[{}] report interval set to {} ms", me, interval_ms);
                }
                let forwarded = self.forward_to_children(payload);
                let reconfig = max_children.and_then(|requested| self.request_max_children(requested));
                RouteOutcome::ConfigApplied { forwarded, reconfig }
            }
            Command::TargetedAction { target, action } => {
                if me.matches(&target) {
                    self.execute(me, &action).await;
                    RouteOutcome::Executed(action)
                } else {
                    log::debug!("[{}] command for {} is not mine, forwarding to children", me, target);
                    RouteOutcome::Forwarded(self.forward_to_children(payload))
                }
            }
            Command::RawTelemetry { has_target } => {
                if self.stack.is_root() && !has_target {
                    match self.broker.publish(&self.config.info_topic, payload) {
                        Ok(()) => RouteOutcome::Published,
                        Err(err) => {
                            log::warn!("[{}] publishing telemetry failed: {}", me, err);
                            RouteOutcome::Ignored
                        }
                    }
                } else {
                    RouteOutcome::Ignored
                }
            }
        }
    }

    async fn execute(&self, me: NodeAddress, action: &Action) {
        match action {
            Action::Blink => {
                log::info!("[{}] blink requested", me);
                blink(self.indicator, &self.config.blink).await;
            }
            Action::Ping => {
                log::info!("[{}] ping requested, answering with pong", me);
                self.send_up(&pong_payload(me));
            }
            Action::Other(name) => {
                log::warn!("[{}] unknown action '{}' ignored", me, name);
            }
        }
    }

    fn request_max_children(&self, requested: u64) -> Option<MaxChildrenRequest> {
        let me = self.me();
        if requested == 0 || requested > ROUTING_TABLE_CAPACITY as u64 {
            log::warn!("[{}] max_children {} outside 1-{}, ignored", me, requested, ROUTING_TABLE_CAPACITY);
            return None;
        }
        let outcome = self.runtime.request_max_children(requested as u8);
        match outcome {
            MaxChildrenRequest::Accepted => log::info!("[{}] max_children -> {}, reconfiguration scheduled", me, requested),
            MaxChildrenRequest::Unchanged => log::debug!("[{}] max_children already {}", me, requested),
            MaxChildrenRequest::Busy => log::warn!("[{}] reconfiguration already pending, max_children {} ignored", me, requested),
        }
        Some(outcome)
    }

    /// Sends `payload` one step toward the root: published at the root, sent to the parent elsewhere.
    fn send_up(&self, payload: &[u8]) -> bool {
        let result = if self.stack.is_root() {
            self.broker.publish(&self.config.info_topic, payload)
        } else {
            self.stack.send(Destination::Parent, payload)
        };
        if let Err(err) = &result {
            log::warn!("[{}] upward send failed: {}", self.me(), err);
        }
        result.is_ok()
    }

    /// Copies `payload` unmodified to every direct child. Returns how many sends succeeded.
    fn forward_to_children(&self, payload: &[u8]) -> usize {
        let me = self.me();
        let mut delivered = 0;
        for child in children(self.stack) {
            match self.stack.send(Destination::Node(child.radio()), payload) {
                Ok(()) => {
                    log::debug!("[{}] forwarded to {}", me, child);
                    delivered += 1;
                }
                Err(err) => log::warn!("[{}] forwarding to {} failed: {}", me, child, err),
            }
        }
        delivered
    }
}
