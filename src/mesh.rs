//! Boundary to the mesh networking stack.
//!
//! Tree formation, root election and radio delivery belong to the stack. The
//! agent only sees the narrow surface below: fire-and-forget sends, topology
//! queries and the lifecycle calls driven by the reconfiguration controller.
//! Inbound packets and lifecycle events are pushed by the stack into bounded
//! channels owned by the node.

use embassy_sync::blocking_mutex::raw::CriticalSectionRawMutex;

use crate::address::{NodeAddress, RadioAddress};
use crate::config::{MeshSettings, Topology};
use crate::error::{DeliveryError, LifecycleError};

/// Where an outbound packet goes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Destination {
    /// Upstream: the stack carries it hop by hop to the root.
    Parent,
    /// A specific node by radio address.
    Node(RadioAddress),
}

/// Full configuration handed to the stack by `set_config`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MeshConfig {
    pub mesh_id: [u8; 6],
    pub channel: u8,
    pub router_ssid: String,
    pub router_password: String,
    pub ap_password: String,
    pub max_layer: u8,
    pub topology: Topology,
    /// Fan-out limit of this node's soft AP.
    pub max_children: u8,
}

impl MeshConfig {
    pub fn new(settings: &MeshSettings, max_children: u8) -> Self {
        Self {
            mesh_id: settings.mesh_id,
            channel: settings.channel,
            router_ssid: settings.router_ssid.clone(),
            router_password: settings.router_password.clone(),
            ap_password: settings.ap_password.clone(),
            max_layer: settings.max_layer,
            topology: settings.topology,
            max_children,
        }
    }
}

/// The mesh stack as seen by one node.
pub trait MeshStack {
    /// Hardware station address of this node.
    fn radio_address(&self) -> RadioAddress;

    /// Best-effort send. No retry happens on failure.
    fn send(&self, destination: Destination, payload: &[u8]) -> Result<(), DeliveryError>;

    /// Current routing table, at most `capacity` entries. Entry 0 is always this node.
    fn routing_table(&self, capacity: usize) -> Result<Vec<RadioAddress>, DeliveryError>;

    /// Distance from the root in hops (root is layer 1, 0 while detached).
    fn layer(&self) -> u32;

    /// BSSID of the parent, which is already the parent's logical address. `None` at the root or when detached.
    fn parent(&self) -> Option<NodeAddress>;

    fn is_root(&self) -> bool;

    /// Whether the stack is started and this node is part of the tree.
    fn is_active(&self) -> bool;

    fn init(&self) -> Result<(), LifecycleError>;
    fn set_config(&self, config: &MeshConfig) -> Result<(), LifecycleError>;
    fn start(&self) -> Result<(), LifecycleError>;
    fn stop(&self) -> Result<(), LifecycleError>;
    fn deinit(&self) -> Result<(), LifecycleError>;
}

/// Initializes, configures and starts the stack.
pub fn bring_up(stack: &dyn MeshStack, config: &MeshConfig) -> Result<(), LifecycleError> {
    stack.init()?;
    stack.set_config(config)?;
    stack.start()
}

/// Packet received from the mesh.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MeshPacket {
    pub from: RadioAddress,
    pub payload: Vec<u8>,
}

/// Depth of the per-node receive queue.
pub const MESH_INBOX_SIZE: usize = 16;
/// Bounded queue the stack delivers received packets into.
pub type MeshInbox = embassy_sync::channel::Channel<CriticalSectionRawMutex, MeshPacket, MESH_INBOX_SIZE>;
/// Receiver side drained by the receive-and-route task.
pub type MeshInboxReceiver = embassy_sync::channel::Receiver<'static, CriticalSectionRawMutex, MeshPacket, MESH_INBOX_SIZE>;

/// Why the link to the parent was lost.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DisconnectReason {
    StackStopped,
    ParentLost,
}

/// Lifecycle notifications raised by the stack.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MeshEvent {
    Started,
    Stopped,
    ParentConnected { layer: u32, parent: Option<NodeAddress> },
    ParentDisconnected { reason: DisconnectReason },
    LayerChanged { layer: u32 },
    ChildConnected(RadioAddress),
    ChildDisconnected(RadioAddress),
    RoutingTableChanged { added: bool, new_size: usize },
    RootAddress(NodeAddress),
}

/// Depth of the per-node event queue.
pub const MESH_EVENT_QUEUE_SIZE: usize = 32;
pub type MeshEventQueue = embassy_sync::channel::Channel<CriticalSectionRawMutex, MeshEvent, MESH_EVENT_QUEUE_SIZE>;
pub type MeshEventReceiver = embassy_sync::channel::Receiver<'static, CriticalSectionRawMutex, MeshEvent, MESH_EVENT_QUEUE_SIZE>;

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::LifecycleOp;
    use crate::testing::RecordingStack;

    #[test]
    fn mesh_config_carries_settings_and_fan_out() {
        let settings = MeshSettings {
            channel: 11,
            router_ssid: "lab".into(),
            ..MeshSettings::default()
        };
        let config = MeshConfig::new(&settings, 4);
        assert_eq!(config.channel, 11);
        assert_eq!(config.router_ssid, "lab");
        assert_eq!(config.max_children, 4);
        assert_eq!(config.mesh_id, settings.mesh_id);
    }

    #[test]
    fn bring_up_runs_init_config_start_in_order() {
        let stack = RecordingStack::new([0, 0, 0, 0, 0, 1]);
        let config = MeshConfig::new(&MeshSettings::default(), 2);
        bring_up(&stack, &config).unwrap();
        assert_eq!(stack.lifecycle_calls(), vec![LifecycleOp::Init, LifecycleOp::SetConfig, LifecycleOp::Start]);
        assert_eq!(stack.last_config().unwrap().max_children, 2);
    }

    #[test]
    fn bring_up_stops_at_first_failure() {
        let stack = RecordingStack::new([0, 0, 0, 0, 0, 1]);
        stack.fail_on(LifecycleOp::SetConfig);
        let err = bring_up(&stack, &MeshConfig::new(&MeshSettings::default(), 2)).unwrap_err();
        assert_eq!(err.op, LifecycleOp::SetConfig);
        assert_eq!(stack.lifecycle_calls(), vec![LifecycleOp::Init, LifecycleOp::SetConfig]);
    }
}
