//! In-process tree network standing in for the mesh stack.
//!
//! The tree shape is fixed by the scene. Whether a node is actually attached
//! depends on lifecycle state: a node is attached iff its stack is started and
//! either it is the root, or its parent is attached and it ranks within the
//! parent's first `max_children` started children. Every lifecycle call
//! recomputes attachment for the whole tree and emits connect/disconnect
//! events to each node whose attachment changed.
//!
//! Upstream sends are delivered straight to the root, as the real stack routes
//! them; intermediate nodes never see them.

use std::sync::Mutex;

use crate::address::{NodeAddress, RadioAddress};
use crate::config::RX_SIZE;
use crate::error::{DeliveryError, LifecycleError, LifecycleOp};
use crate::mesh::{
    Destination, DisconnectReason, MeshConfig, MeshEvent, MeshEventQueue, MeshInbox, MeshPacket, MeshStack,
};

struct SimNode {
    radio: RadioAddress,
    parent: Option<usize>,
    is_root: bool,
    /// Direct children in scene order, which is also their admission order.
    children: Vec<usize>,
    inbox: MeshInbox,
    events: MeshEventQueue,
}

#[derive(Default)]
struct StackState {
    initialized: bool,
    config: Option<MeshConfig>,
    started: bool,
    attached: bool,
}

pub struct SimMesh {
    nodes: Vec<SimNode>,
    /// Parents before children.
    order: Vec<usize>,
    states: Mutex<Vec<StackState>>,
}

impl SimMesh {
    /// Builds the network from `(node, parent)` pairs. A node whose parent is
    /// not listed never attaches.
    pub fn new(links: &[(RadioAddress, Option<RadioAddress>)]) -> Self {
        let index_of = |radio: RadioAddress| links.iter().position(|(r, _)| *r == radio);
        let mut nodes: Vec<SimNode> = links
            .iter()
            .map(|(radio, parent)| SimNode {
                radio: *radio,
                parent: parent.and_then(index_of),
                is_root: parent.is_none(),
                children: Vec::new(),
                inbox: MeshInbox::new(),
                events: MeshEventQueue::new(),
            })
            .collect();
        for idx in 0..nodes.len() {
            if let Some(parent) = nodes[idx].parent {
                nodes[parent].children.push(idx);
            }
        }

        let mut order: Vec<usize> = (0..nodes.len()).filter(|&i| nodes[i].is_root).collect();
        let mut next = 0;
        while next < order.len() {
            for child in nodes[order[next]].children.clone() {
                if !order.contains(&child) {
                    order.push(child);
                }
            }
            next += 1;
        }

        let states = (0..nodes.len()).map(|_| StackState::default()).collect();
        Self {
            nodes,
            order,
            states: Mutex::new(states),
        }
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn radio(&self, index: usize) -> RadioAddress {
        self.nodes[index].radio
    }

    pub fn index_of(&self, radio: RadioAddress) -> Option<usize> {
        self.nodes.iter().position(|n| n.radio == radio)
    }

    /// Node indices with every parent ahead of its children.
    pub fn boot_order(&self) -> &[usize] {
        &self.order
    }

    pub fn inbox(&self, index: usize) -> &MeshInbox {
        &self.nodes[index].inbox
    }

    pub fn events(&self, index: usize) -> &MeshEventQueue {
        &self.nodes[index].events
    }

    pub fn stack(&self, index: usize) -> SimMeshStack<'_> {
        SimMeshStack { mesh: self, index }
    }

    pub fn is_attached(&self, index: usize) -> bool {
        self.lock()[index].attached
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Vec<StackState>> {
        // Every critical section leaves the state consistent, so a poisoned lock is still usable
        self.states.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn depth(&self, index: usize) -> u32 {
        let mut depth = 1;
        let mut current = self.nodes[index].parent;
        while let Some(parent) = current {
            depth += 1;
            current = self.nodes[parent].parent;
        }
        depth
    }

    fn attached_children(&self, states: &[StackState], index: usize) -> Vec<usize> {
        self.nodes[index].children.iter().copied().filter(|&c| states[c].attached).collect()
    }

    fn emit(&self, index: usize, event: MeshEvent) {
        if let Err(err) = self.nodes[index].events.try_send(event) {
            log::warn!("[{}] mesh event queue full, dropping {:?}", self.radio(index).logical(), err);
        }
    }

    /// Recomputes attachment and notifies every node whose state changed.
    /// `stopping` is the node whose own stop caused the change, if any.
    fn reattach(&self, states: &mut [StackState], stopping: Option<usize>) {
        let mut changed = Vec::new();
        for &idx in &self.order {
            let node = &self.nodes[idx];
            let attached = states[idx].started
                && (node.is_root
                    || node.parent.is_some_and(|parent| {
                        let limit = states[parent].config.as_ref().map_or(0, |c| c.max_children as usize);
                        let rank = self.nodes[parent].children.iter().filter(|&&c| states[c].started).position(|&c| c == idx);
                        states[parent].attached && rank.is_some_and(|rank| rank < limit)
                    }));
            if attached != states[idx].attached {
                states[idx].attached = attached;
                changed.push(idx);
            }
        }

        for idx in changed {
            let node = &self.nodes[idx];
            let attached = states[idx].attached;
            if attached {
                let parent = node.parent.map(|p| self.radio(p).logical());
                self.emit(idx, MeshEvent::ParentConnected { layer: self.depth(idx), parent });
                if let Some(root) = self.order.first() {
                    self.emit(idx, MeshEvent::RootAddress(self.radio(*root).logical()));
                }
            } else {
                let reason = if stopping == Some(idx) { DisconnectReason::StackStopped } else { DisconnectReason::ParentLost };
                self.emit(idx, MeshEvent::ParentDisconnected { reason });
            }
            if let Some(parent) = node.parent.filter(|&p| states[p].attached) {
                let event = if attached { MeshEvent::ChildConnected(node.radio) } else { MeshEvent::ChildDisconnected(node.radio) };
                self.emit(parent, event);
                let new_size = self.attached_children(states, parent).len() + 1;
                self.emit(parent, MeshEvent::RoutingTableChanged { added: attached, new_size });
            }
        }
    }

    fn lifecycle(&self, index: usize, op: LifecycleOp, config: Option<&MeshConfig>) -> Result<(), LifecycleError> {
        let mut states = self.lock();
        let state = &mut states[index];
        match op {
            LifecycleOp::Init => {
                if state.initialized {
                    return Err(LifecycleError::new(op, "already initialized"));
                }
                state.initialized = true;
            }
            LifecycleOp::SetConfig => {
                if !state.initialized {
                    return Err(LifecycleError::new(op, "not initialized"));
                }
                if state.started {
                    return Err(LifecycleError::new(op, "mesh is running"));
                }
                state.config = config.cloned();
            }
            LifecycleOp::Start => {
                if !state.initialized || state.config.is_none() {
                    return Err(LifecycleError::new(op, "not configured"));
                }
                if state.started {
                    return Err(LifecycleError::new(op, "already started"));
                }
                state.started = true;
                self.emit(index, MeshEvent::Started);
                self.reattach(&mut states, None);
            }
            LifecycleOp::Stop => {
                if !state.started {
                    return Err(LifecycleError::new(op, "not started"));
                }
                state.started = false;
                self.reattach(&mut states, Some(index));
                self.emit(index, MeshEvent::Stopped);
            }
            LifecycleOp::Deinit => {
                if state.started {
                    return Err(LifecycleError::new(op, "mesh is running"));
                }
                if !state.initialized {
                    return Err(LifecycleError::new(op, "not initialized"));
                }
                *state = StackState::default();
            }
        }
        Ok(())
    }

    fn send(&self, from: usize, destination: Destination, payload: &[u8]) -> Result<(), DeliveryError> {
        if payload.len() > RX_SIZE {
            return Err(DeliveryError::PayloadTooLarge { size: payload.len(), limit: RX_SIZE });
        }
        let target = {
            let states = self.lock();
            if !states[from].attached {
                return Err(DeliveryError::NotConnected);
            }
            let target = match destination {
                // upstream traffic is routed all the way to the root
                Destination::Parent if self.nodes[from].is_root => return Err(DeliveryError::Unreachable("parent of root".into())),
                Destination::Parent => self.order.first().copied().ok_or_else(|| DeliveryError::Unreachable("root".into()))?,
                Destination::Node(radio) => self.index_of(radio).ok_or_else(|| DeliveryError::Unreachable(radio.to_string()))?,
            };
            if !states[target].attached {
                return Err(DeliveryError::Unreachable(self.radio(target).logical().to_string()));
            }
            target
        };
        let packet = MeshPacket {
            from: self.radio(from),
            payload: payload.to_vec(),
        };
        self.nodes[target]
            .inbox
            .try_send(packet)
            .map_err(|_| DeliveryError::QueueFull(self.radio(target).logical().to_string()))
    }
}

/// One node's handle on the simulated mesh.
pub struct SimMeshStack<'a> {
    mesh: &'a SimMesh,
    index: usize,
}

impl MeshStack for SimMeshStack<'_> {
    fn radio_address(&self) -> RadioAddress {
        self.mesh.radio(self.index)
    }

    fn send(&self, destination: Destination, payload: &[u8]) -> Result<(), DeliveryError> {
        self.mesh.send(self.index, destination, payload)
    }

    fn routing_table(&self, capacity: usize) -> Result<Vec<RadioAddress>, DeliveryError> {
        let states = self.mesh.lock();
        if !states[self.index].started {
            return Err(DeliveryError::RoutingTable("mesh not started".into()));
        }
        let mut table = vec![self.mesh.radio(self.index)];
        if states[self.index].attached {
            table.extend(self.mesh.attached_children(&states, self.index).into_iter().map(|c| self.mesh.radio(c)));
        }
        table.truncate(capacity);
        Ok(table)
    }

    fn layer(&self) -> u32 {
        if self.mesh.is_attached(self.index) { self.mesh.depth(self.index) } else { 0 }
    }

    fn parent(&self) -> Option<NodeAddress> {
        if !self.mesh.is_attached(self.index) {
            return None;
        }
        self.mesh.nodes[self.index].parent.map(|p| self.mesh.radio(p).logical())
    }

    fn is_root(&self) -> bool {
        self.mesh.nodes[self.index].is_root && self.mesh.is_attached(self.index)
    }

    fn is_active(&self) -> bool {
        self.mesh.is_attached(self.index)
    }

    fn init(&self) -> Result<(), LifecycleError> {
        self.mesh.lifecycle(self.index, LifecycleOp::Init, None)
    }

    fn set_config(&self, config: &MeshConfig) -> Result<(), LifecycleError> {
        self.mesh.lifecycle(self.index, LifecycleOp::SetConfig, Some(config))
    }

    fn start(&self) -> Result<(), LifecycleError> {
        self.mesh.lifecycle(self.index, LifecycleOp::Start, None)
    }

    fn stop(&self) -> Result<(), LifecycleError> {
        self.mesh.lifecycle(self.index, LifecycleOp::Stop, None)
    }

    fn deinit(&self) -> Result<(), LifecycleError> {
        self.mesh.lifecycle(self.index, LifecycleOp::Deinit, None)
    }
}
