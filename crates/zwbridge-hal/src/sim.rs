//! In-process simulated device bus for CI and for running the bridge
//! without a radio controller.
//!
//! [`SimDeviceBus`] keeps a fixed node table, records every write, and lets
//! callers inject [`DeviceBusEvent`]s as if they came from the mesh.
//!
//! # Example
//!
//! ```rust
//! use zwbridge_hal::sim::SimDeviceBus;
//! use zwbridge_hal::DeviceBus;
//! use zwbridge_types::{NodeId, Payload, WriteRequest};
//!
//! let (bus, _events) = SimDeviceBus::builder()
//!     .with_node(9, ["COMMAND_CLASS_SWITCH_BINARY"])
//!     .build();
//!
//! bus.write(WriteRequest {
//!     node: NodeId(9),
//!     label: "Switch".to_string(),
//!     value: Payload::Bool(true),
//! })
//! .expect("sim write must succeed");
//! assert_eq!(bus.writes().len(), 1);
//! ```

use std::collections::HashMap;
use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};

use tokio::sync::mpsc;
use zwbridge_types::{BridgeError, CapabilitySet, NodeId, Payload, ValueReport, WriteRequest};

use crate::device_bus::{DeviceBus, DeviceBusEvent, NodeInfo};

// ────────────────────────────────────────────────────────────────────────────
// SimDeviceBus
// ────────────────────────────────────────────────────────────────────────────

/// A device bus that records writes instead of transmitting them.
pub struct SimDeviceBus {
    nodes: HashMap<NodeId, NodeInfo>,
    writes: Mutex<Vec<WriteRequest>>,
    events: mpsc::UnboundedSender<DeviceBusEvent>,
    stopped: AtomicBool,
}

impl SimDeviceBus {
    pub fn builder() -> SimDeviceBusBuilder {
        SimDeviceBusBuilder::default()
    }

    /// Every write accepted so far, oldest first.
    pub fn writes(&self) -> Vec<WriteRequest> {
        self.writes
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    /// Deliver `event` to the bridge as if the mesh had produced it.
    ///
    /// # Errors
    ///
    /// Returns [`BridgeError::Channel`] once the receiving side is gone.
    pub fn inject(&self, event: DeviceBusEvent) -> Result<(), BridgeError> {
        self.events
            .send(event)
            .map_err(|e| BridgeError::Channel(format!("sim device bus closed: {e}")))
    }

    /// Shorthand for injecting a [`DeviceBusEvent::Value`].
    pub fn report(&self, node: u32, label: &str, payload: Payload) -> Result<(), BridgeError> {
        self.inject(DeviceBusEvent::Value(ValueReport::new(NodeId(node), label, payload)))
    }

    /// Announce every configured node as ready, in node order.
    pub fn announce_all(&self) -> Result<(), BridgeError> {
        let mut nodes: Vec<&NodeInfo> = self.nodes.values().collect();
        nodes.sort_by_key(|n| n.node);
        for info in nodes {
            self.inject(DeviceBusEvent::NodeReady(info.clone()))?;
        }
        Ok(())
    }

    pub fn is_stopped(&self) -> bool {
        self.stopped.load(Ordering::SeqCst)
    }
}

impl DeviceBus for SimDeviceBus {
    fn capabilities(&self, node: NodeId) -> Option<CapabilitySet> {
        self.nodes.get(&node).map(|info| info.capabilities.clone())
    }

    fn write(&self, request: WriteRequest) -> Result<(), BridgeError> {
        if self.is_stopped() {
            return Err(BridgeError::DeviceBus("device bus stopped".to_string()));
        }
        if !self.nodes.contains_key(&request.node) {
            return Err(BridgeError::DeviceBus(format!("no node {} found", request.node)));
        }
        self.writes
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(request);
        Ok(())
    }

    fn stop(&self) {
        self.stopped.store(true, Ordering::SeqCst);
    }
}

// ────────────────────────────────────────────────────────────────────────────
// Builder
// ────────────────────────────────────────────────────────────────────────────

/// Builder for [`SimDeviceBus`].
#[derive(Default)]
pub struct SimDeviceBusBuilder {
    nodes: HashMap<NodeId, NodeInfo>,
}

impl SimDeviceBusBuilder {
    /// Add a node advertising the given command-class names.
    pub fn with_node<'a>(self, node: u32, capabilities: impl IntoIterator<Item = &'a str>) -> Self {
        self.with_node_info(NodeInfo {
            node: NodeId(node),
            product: "Simulated node".to_string(),
            manufacturer: "zwbridge".to_string(),
            capabilities: capabilities.into_iter().collect(),
        })
    }

    pub fn with_node_info(mut self, info: NodeInfo) -> Self {
        self.nodes.insert(info.node, info);
        self
    }

    /// Finish the bus.  The receiver yields every injected event and must be
    /// handed to the bridge.
    pub fn build(self) -> (SimDeviceBus, mpsc::UnboundedReceiver<DeviceBusEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let bus = SimDeviceBus {
            nodes: self.nodes,
            writes: Mutex::new(Vec::new()),
            events: tx,
            stopped: AtomicBool::new(false),
        };
        (bus, rx)
    }
}
