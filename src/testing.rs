//! In-memory doubles for the platform boundaries, shared by the unit tests.

use std::sync::Mutex;

use crate::address::{NodeAddress, RadioAddress};
use crate::broker::Broker;
use crate::error::{DeliveryError, LifecycleError, LifecycleOp};
use crate::indicator::{Indicator, LayerColor};
use crate::mesh::{Destination, MeshConfig, MeshStack};

struct StackState {
    root: bool,
    layer: u32,
    parent: Option<NodeAddress>,
    active: bool,
    routing_table: Vec<RadioAddress>,
    fail_routing_table: bool,
    fail_sends: bool,
    deferred_stop: bool,
    fail_on: Option<LifecycleOp>,
    sent: Vec<(Destination, Vec<u8>)>,
    lifecycle: Vec<LifecycleOp>,
    last_config: Option<MeshConfig>,
}

/// Mesh stack that records sends and lifecycle calls.
///
/// Starts active at layer 2 with a routing table holding only itself.
pub struct RecordingStack {
    radio: RadioAddress,
    state: Mutex<StackState>,
}

impl RecordingStack {
    pub fn new(radio: [u8; 6]) -> Self {
        Self {
            radio: RadioAddress(radio),
            state: Mutex::new(StackState {
                root: false,
                layer: 2,
                parent: None,
                active: true,
                routing_table: vec![RadioAddress(radio)],
                fail_routing_table: false,
                fail_sends: false,
                deferred_stop: false,
                fail_on: None,
                sent: Vec::new(),
                lifecycle: Vec::new(),
                last_config: None,
            }),
        }
    }

    fn with<R>(&self, f: impl FnOnce(&mut StackState) -> R) -> R {
        f(&mut self.state.lock().unwrap())
    }

    pub fn set_root(&self, root: bool) {
        self.with(|s| s.root = root);
    }

    pub fn set_layer(&self, layer: u32) {
        self.with(|s| s.layer = layer);
    }

    pub fn set_parent(&self, parent: Option<NodeAddress>) {
        self.with(|s| s.parent = parent);
    }

    pub fn set_active(&self, active: bool) {
        self.with(|s| s.active = active);
    }

    pub fn set_routing_table(&self, table: Vec<RadioAddress>) {
        self.with(|s| s.routing_table = table);
    }

    pub fn fail_routing_table(&self, fail: bool) {
        self.with(|s| s.fail_routing_table = fail);
    }

    pub fn fail_sends(&self, fail: bool) {
        self.with(|s| s.fail_sends = fail);
    }

    /// When set, `stop` leaves the stack active until `set_active(false)`.
    pub fn set_deferred_stop(&self, deferred: bool) {
        self.with(|s| s.deferred_stop = deferred);
    }

    /// Makes the given lifecycle call fail (after being recorded).
    pub fn fail_on(&self, op: LifecycleOp) {
        self.with(|s| s.fail_on = Some(op));
    }

    pub fn sent(&self) -> Vec<(Destination, Vec<u8>)> {
        self.with(|s| s.sent.clone())
    }

    pub fn lifecycle_calls(&self) -> Vec<LifecycleOp> {
        self.with(|s| s.lifecycle.clone())
    }

    pub fn last_config(&self) -> Option<MeshConfig> {
        self.with(|s| s.last_config.clone())
    }

    fn lifecycle(&self, op: LifecycleOp, apply: impl FnOnce(&mut StackState)) -> Result<(), LifecycleError> {
        self.with(|s| {
            s.lifecycle.push(op);
            if s.fail_on == Some(op) {
                return Err(LifecycleError::new(op, "injected failure"));
            }
            apply(s);
            Ok(())
        })
    }
}

impl MeshStack for RecordingStack {
    fn radio_address(&self) -> RadioAddress {
        self.radio
    }

    fn send(&self, destination: Destination, payload: &[u8]) -> Result<(), DeliveryError> {
        self.with(|s| {
            if s.fail_sends {
                return Err(DeliveryError::NotConnected);
            }
            s.sent.push((destination, payload.to_vec()));
            Ok(())
        })
    }

    fn routing_table(&self, capacity: usize) -> Result<Vec<RadioAddress>, DeliveryError> {
        self.with(|s| {
            if s.fail_routing_table {
                return Err(DeliveryError::RoutingTable("injected failure".into()));
            }
            Ok(s.routing_table.iter().take(capacity).copied().collect())
        })
    }

    fn layer(&self) -> u32 {
        self.with(|s| s.layer)
    }

    fn parent(&self) -> Option<NodeAddress> {
        self.with(|s| s.parent)
    }

    fn is_root(&self) -> bool {
        self.with(|s| s.root)
    }

    fn is_active(&self) -> bool {
        self.with(|s| s.active)
    }

    fn init(&self) -> Result<(), LifecycleError> {
        self.lifecycle(LifecycleOp::Init, |_| {})
    }

    fn set_config(&self, config: &MeshConfig) -> Result<(), LifecycleError> {
        let config = config.clone();
        self.lifecycle(LifecycleOp::SetConfig, move |s| s.last_config = Some(config))
    }

    fn start(&self) -> Result<(), LifecycleError> {
        self.lifecycle(LifecycleOp::Start, |s| s.active = true)
    }

    fn stop(&self) -> Result<(), LifecycleError> {
        self.lifecycle(LifecycleOp::Stop, |s| {
            if !s.deferred_stop {
                s.active = false;
            }
        })
    }

    fn deinit(&self) -> Result<(), LifecycleError> {
        self.lifecycle(LifecycleOp::Deinit, |_| {})
    }
}

#[derive(Default)]
struct BrokerState {
    connected: bool,
    starts: usize,
    subscriptions: Vec<String>,
    published: Vec<(String, Vec<u8>)>,
}

/// Broker client that records what it was asked to do.
#[derive(Default)]
pub struct RecordingBroker {
    state: Mutex<BrokerState>,
}

impl RecordingBroker {
    pub fn connected() -> Self {
        let broker = Self::default();
        broker.state.lock().unwrap().connected = true;
        broker
    }

    pub fn published(&self) -> Vec<(String, Vec<u8>)> {
        self.state.lock().unwrap().published.clone()
    }

    pub fn subscriptions(&self) -> Vec<String> {
        self.state.lock().unwrap().subscriptions.clone()
    }

    pub fn starts(&self) -> usize {
        self.state.lock().unwrap().starts
    }
}

impl Broker for RecordingBroker {
    fn start(&self) -> Result<(), DeliveryError> {
        let mut state = self.state.lock().unwrap();
        state.starts += 1;
        state.connected = true;
        Ok(())
    }

    fn publish(&self, topic: &str, payload: &[u8]) -> Result<(), DeliveryError> {
        let mut state = self.state.lock().unwrap();
        if !state.connected {
            return Err(DeliveryError::BrokerDisconnected);
        }
        state.published.push((topic.to_string(), payload.to_vec()));
        Ok(())
    }

    fn subscribe(&self, topic: &str) -> Result<(), DeliveryError> {
        let mut state = self.state.lock().unwrap();
        if !state.connected {
            return Err(DeliveryError::BrokerDisconnected);
        }
        state.subscriptions.push(topic.to_string());
        Ok(())
    }

    fn is_connected(&self) -> bool {
        self.state.lock().unwrap().connected
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IndicatorCall {
    SetAll(bool),
    ShowLayer(LayerColor),
    Connected(u32),
    Disconnected,
    Reconfiguring,
}

#[derive(Default)]
pub struct RecordingIndicator {
    calls: Mutex<Vec<IndicatorCall>>,
}

impl RecordingIndicator {
    pub fn calls(&self) -> Vec<IndicatorCall> {
        self.calls.lock().unwrap().clone()
    }
}

impl Indicator for RecordingIndicator {
    fn set_all(&self, on: bool) {
        self.calls.lock().unwrap().push(IndicatorCall::SetAll(on));
    }

    fn show_layer(&self, color: LayerColor) {
        self.calls.lock().unwrap().push(IndicatorCall::ShowLayer(color));
    }

    fn connected(&self, layer: u32) {
        self.calls.lock().unwrap().push(IndicatorCall::Connected(layer));
    }

    fn disconnected(&self) {
        self.calls.lock().unwrap().push(IndicatorCall::Disconnected);
    }

    fn reconfiguring(&self) {
        self.calls.lock().unwrap().push(IndicatorCall::Reconfiguring);
    }
}
