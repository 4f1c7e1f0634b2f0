//! Periodic status reporting toward the root.

use embassy_time::{Duration, Timer};
use serde::{Deserialize, Serialize};

use crate::address::{NodeAddress, self_address};
use crate::broker::Broker;
use crate::config::TX_SIZE;
use crate::events::LinkState;
use crate::indicator::{Indicator, LayerColor};
use crate::mesh::{Destination, MeshStack};
use crate::runtime::RuntimeConfig;
use crate::topology::children;

/// One node's view of itself and its direct descendants.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusReport {
    pub mac: String,
    /// `None` (JSON null) iff the reporting node is the root.
    pub parent: Option<String>,
    pub hops: u32,
    pub children: Vec<String>,
}

impl StatusReport {
    pub fn new(mac: NodeAddress, parent: Option<NodeAddress>, hops: u32, children: &[NodeAddress]) -> Self {
        Self {
            mac: mac.to_string(),
            parent: parent.map(|p| p.to_string()),
            hops,
            children: children.iter().map(|c| c.to_string()).collect(),
        }
    }

    /// Serializes into at most `TX_SIZE - 1` bytes.
    ///
    /// Longer documents are cut at the limit, which leaves invalid JSON for the
    /// receiver. Only a routing table far beyond `ROUTING_TABLE_CAPACITY` could
    /// get there.
    pub fn to_bounded_bytes(&self) -> Vec<u8> {
        let mut bytes = match serde_json::to_vec(self) {
            Ok(bytes) => bytes,
            Err(err) => {
                log::warn!("[{}] failed to serialize status report: {}", self.mac, err);
                return Vec::new();
            }
        };
        if bytes.len() > TX_SIZE - 1 {
            log::debug!("[{}] status report truncated from {} to {} bytes", self.mac, bytes.len(), TX_SIZE - 1);
            bytes.truncate(TX_SIZE - 1);
        }
        bytes
    }
}

/// What a reporting cycle did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CycleOutcome {
    /// Reporting blocked by an `interval: 0` command.
    Blocked,
    /// Mesh stack stopped or detached.
    Inactive,
    Published,
    SentToParent,
    /// Send or publish failed; logged.
    Failed,
}

pub struct Reporter<'a> {
    pub stack: &'a dyn MeshStack,
    pub broker: &'a dyn Broker,
    pub indicator: &'a dyn Indicator,
    pub runtime: &'a RuntimeConfig,
    /// Event-driven link status, cross-checked against the stack each cycle.
    pub link: &'a LinkState,
    pub info_topic: &'a str,
}

impl Reporter<'_> {
    /// Builds and sends a single report, honouring the block flag and stack state.
    pub fn report_once(&self) -> CycleOutcome {
        if self.runtime.reporting_blocked() {
            return CycleOutcome::Blocked;
        }
        if !self.stack.is_active() {
            return CycleOutcome::Inactive;
        }

        let me = self_address(self.stack.radio_address());
        let is_root = self.stack.is_root();
        let layer = self.stack.layer();
        if self.link_lags(layer) {
            log::debug!(
                "[{}] link events lag the stack: connected={} layer={} (stack layer {})",
                me,
                self.link.is_connected(),
                self.link.layer(),
                layer
            );
        }
        self.indicator.show_layer(LayerColor::for_layer(layer));

        let parent = if is_root { None } else { self.stack.parent() };
        let report = StatusReport::new(me, parent, layer, &children(self.stack));
        let payload = report.to_bounded_bytes();

        if is_root {
            match self.broker.publish(self.info_topic, &payload) {
                Ok(()) => CycleOutcome::Published,
                Err(err) => {
                    log::warn!("[{}] publishing status report failed: {}", me, err);
                    CycleOutcome::Failed
                }
            }
        } else {
            match self.stack.send(Destination::Parent, &payload) {
                Ok(()) => CycleOutcome::SentToParent,
                Err(err) => {
                    log::warn!("[{}] sending status report to parent failed: {}", me, err);
                    CycleOutcome::Failed
                }
            }
        }
    }

    /// True while the last mesh events disagree with what the stack reports.
    fn link_lags(&self, stack_layer: u32) -> bool {
        !self.link.is_connected() || self.link.layer() != stack_layer
    }

    /// Reports forever. The interval is re-read before every sleep, so a new
    /// period takes effect from the next tick.
    pub async fn run(&self) -> ! {
        loop {
            let interval = self.runtime.report_interval_ms();
            Timer::after(Duration::from_millis(interval as u64)).await;
            let outcome = self.report_once();
            log::trace!(
                "[{}] report cycle: {:?} (connected={}, layer {})",
                self.stack.radio_address().logical(),
                outcome,
                self.link.is_connected(),
                self.link.layer()
            );
        }
    }
}
