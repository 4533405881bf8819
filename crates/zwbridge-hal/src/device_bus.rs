//! Generic `DeviceBus` trait for the mesh-network collaborator (the radio
//! controller library that owns pairing, routing and its own node database).
//!
//! The bridge never talks to a radio directly.  It consumes
//! [`DeviceBusEvent`]s the collaborator delivers and hands
//! [`WriteRequest`]s back through this trait, so the controller binding can
//! be swapped without touching decode or dispatch logic.

use zwbridge_types::{BridgeError, CapabilitySet, NodeId, ValueReport, WriteRequest};

/// Node metadata reported once the device bus has finished interviewing a
/// node.
#[derive(Debug, Clone, PartialEq)]
pub struct NodeInfo {
    pub node: NodeId,
    pub product: String,
    pub manufacturer: String,
    pub capabilities: CapabilitySet,
}

/// Everything the device bus pushes towards the bridge.
#[derive(Debug, Clone, PartialEq)]
pub enum DeviceBusEvent {
    /// A monitored value changed on a node.
    Value(ValueReport),
    /// A basic-set node event; `value` is the raw level (255 = on).
    NodeEvent { node: NodeId, value: i64 },
    /// The node finished its interview and its capabilities are known.
    NodeReady(NodeInfo),
}

/// The device-bus side of the bridge.
///
/// Implementations must not block: a write is a hand-off to the
/// collaborator's own queue.
pub trait DeviceBus: Send + Sync {
    /// Capability set advertised by `node`, or `None` when the bus does not
    /// know the node.
    fn capabilities(&self, node: NodeId) -> Option<CapabilitySet>;

    /// Queue a value write on a node.
    ///
    /// # Errors
    ///
    /// Returns [`BridgeError::DeviceBus`] if the collaborator refuses the
    /// write (unknown node, unknown label, bus stopped).
    fn write(&self, request: WriteRequest) -> Result<(), BridgeError>;

    /// Stop the bus.  Called once during shutdown; the default does nothing.
    fn stop(&self) {}
}
