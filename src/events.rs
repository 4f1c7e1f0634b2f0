//! Reaction to mesh lifecycle events.

use core::sync::atomic::{AtomicBool, AtomicU32, Ordering};

use crate::address::self_address;
use crate::broker::{Broker, connect_and_subscribe};
use crate::indicator::{Indicator, LayerColor};
use crate::mesh::{MeshEvent, MeshStack};

/// Link status as last reported by the stack.
pub struct LinkState {
    connected: AtomicBool,
    layer: AtomicU32,
    comm_started: AtomicBool,
}

impl LinkState {
    pub const fn new() -> Self {
        Self {
            connected: AtomicBool::new(false),
            layer: AtomicU32::new(0),
            comm_started: AtomicBool::new(false),
        }
    }

    pub fn is_connected(&self) -> bool {
        self.connected.load(Ordering::Acquire)
    }

    pub fn layer(&self) -> u32 {
        self.layer.load(Ordering::Relaxed)
    }

    /// True exactly once: for the caller that should start the communication tasks.
    fn claim_comm_start(&self) -> bool {
        self.comm_started
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }
}

impl Default for LinkState {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventOutcome {
    /// First parent connection: the receive and report tasks should be spawned now.
    StartCommunication,
    Handled,
}

pub struct EventHandler<'a> {
    pub stack: &'a dyn MeshStack,
    pub broker: &'a dyn Broker,
    pub indicator: &'a dyn Indicator,
    pub link: &'a LinkState,
    pub command_topic: &'a str,
}

impl EventHandler<'_> {
    pub fn handle(&self, event: &MeshEvent) -> EventOutcome {
        let me = self_address(self.stack.radio_address());
        match event {
            MeshEvent::Started => log::info!("[{}] mesh started", me),
            MeshEvent::Stopped => log::info!("[{}] mesh stopped", me),
            MeshEvent::ParentConnected { layer, parent } => {
                self.link.layer.store(*layer, Ordering::Relaxed);
                self.link.connected.store(true, Ordering::Release);
                match parent {
                    Some(parent) => log::info!("[{}] parent connected: {}, layer {}", me, parent, layer),
                    None => log::info!("[{}] connected as root, layer {}", me, layer),
                }
                self.indicator.connected(*layer);
                self.indicator.show_layer(LayerColor::for_layer(*layer));

                if self.stack.is_root() {
                    // the broker client is (re)started on every root connection
                    match connect_and_subscribe(self.broker, self.command_topic) {
                        Ok(()) => log::info!("[{}] broker connected, subscribed to {}", me, self.command_topic),
                        Err(err) => log::warn!("[{}] broker start failed: {}", me, err),
                    }
                }

                if self.link.claim_comm_start() {
                    return EventOutcome::StartCommunication;
                }
            }
            MeshEvent::ParentDisconnected { reason } => {
                self.link.connected.store(false, Ordering::Release);
                log::warn!("[{}] parent disconnected ({:?})", me, reason);
                self.indicator.disconnected();
            }
            MeshEvent::LayerChanged { layer } => {
                self.link.layer.store(*layer, Ordering::Relaxed);
                log::info!("[{}] layer changed to {}", me, layer);
                self.indicator.show_layer(LayerColor::for_layer(*layer));
            }
            MeshEvent::ChildConnected(child) => log::info!("[{}] child connected: {}", me, child.logical()),
            MeshEvent::ChildDisconnected(child) => log::info!("[{}] child disconnected: {}", me, child.logical()),
            MeshEvent::RoutingTableChanged { added, new_size } => {
                log::debug!("[{}] routing table {}, size {}", me, if *added { "grew" } else { "shrank" }, new_size)
            }
            MeshEvent::RootAddress(root) => log::debug!("[{}] root is {}", me, root),
        }
        EventOutcome::Handled
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mesh::DisconnectReason;
    use crate::testing::{IndicatorCall, RecordingBroker, RecordingIndicator, RecordingStack};

    fn parts(root: bool) -> (RecordingStack, RecordingBroker, RecordingIndicator, LinkState) {
        let stack = RecordingStack::new([0x11, 0, 0, 0, 0, 1]);
        stack.set_root(root);
        (stack, RecordingBroker::default(), RecordingIndicator::default(), LinkState::new())
    }

    #[test]
    fn communication_starts_only_on_first_connection() {
        let (stack, broker, indicator, link) = parts(false);
        let handler = EventHandler { stack: &stack, broker: &broker, indicator: &indicator, link: &link, command_topic: "mesh/cmd" };
        let connected = MeshEvent::ParentConnected { layer: 2, parent: Some("11:00:00:00:00:05".parse().unwrap()) };

        assert_eq!(handler.handle(&connected), EventOutcome::StartCommunication);
        assert!(link.is_connected());
        assert_eq!(link.layer(), 2);

        handler.handle(&MeshEvent::ParentDisconnected { reason: DisconnectReason::ParentLost });
        assert!(!link.is_connected());
        assert_eq!(handler.handle(&connected), EventOutcome::Handled);
        assert_eq!(broker.starts(), 0);
        assert_eq!(
            indicator.calls(),
            vec![
                IndicatorCall::Connected(2),
                IndicatorCall::ShowLayer(LayerColor::Green),
                IndicatorCall::Disconnected,
                IndicatorCall::Connected(2),
                IndicatorCall::ShowLayer(LayerColor::Green),
            ]
        );
    }

    #[test]
    fn root_restarts_broker_and_subscribes_on_each_connection() {
        let (stack, broker, indicator, link) = parts(true);
        let handler = EventHandler { stack: &stack, broker: &broker, indicator: &indicator, link: &link, command_topic: "mesh/cmd" };
        let connected = MeshEvent::ParentConnected { layer: 1, parent: None };

        handler.handle(&connected);
        handler.handle(&connected);
        assert_eq!(broker.starts(), 2);
        assert_eq!(broker.subscriptions(), vec!["mesh/cmd".to_string(), "mesh/cmd".to_string()]);
        assert!(broker.is_connected());
    }

    #[test]
    fn layer_change_updates_colour() {
        let (stack, broker, indicator, link) = parts(false);
        let handler = EventHandler { stack: &stack, broker: &broker, indicator: &indicator, link: &link, command_topic: "mesh/cmd" };
        assert_eq!(handler.handle(&MeshEvent::LayerChanged { layer: 3 }), EventOutcome::Handled);
        assert_eq!(link.layer(), 3);
        assert_eq!(indicator.calls(), vec![IndicatorCall::ShowLayer(LayerColor::Blue)]);
    }
}
