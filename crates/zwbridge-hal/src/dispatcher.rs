//! [`CommandDispatcher`] – turns a [`CommandIntent`] into one device-bus
//! write.
//!
//! The write target is chosen from the node's advertised capabilities, in
//! priority order:
//!
//! | Capability | Write |
//! |---|---|
//! | `COMMAND_CLASS_DOOR_LOCK` | `Locked = !on` (on means unlocked) |
//! | `COMMAND_CLASS_SWITCH_BINARY` | `Switch = on` |
//! | anything else | [`BridgeError::Unsupported`], nothing written |

use tracing::{info, warn};
use zwbridge_types::{
    BridgeError, CapabilitySet, CommandClass, CommandIntent, NodeId, Payload, WriteRequest,
};

use crate::device_bus::DeviceBus;
use crate::registry::DeviceMapping;

pub const LOCKED_LABEL: &str = "Locked";
pub const SWITCH_LABEL: &str = "Switch";

/// Stateless command-to-write translator.
pub struct CommandDispatcher;

impl CommandDispatcher {
    /// Resolve and write `intent`, returning the write that was issued so the
    /// caller can re-assert it later.
    ///
    /// # Errors
    ///
    /// * [`BridgeError::NotFound`] – the device is not in `mapping`.
    /// * [`BridgeError::DeviceBus`] – the bus does not know the node or
    ///   refused the write.
    /// * [`BridgeError::Unsupported`] – the node has no writable capability.
    pub fn dispatch(
        mapping: &DeviceMapping,
        bus: &dyn DeviceBus,
        intent: &CommandIntent,
    ) -> Result<WriteRequest, BridgeError> {
        let node = mapping
            .node_for(&intent.device)
            .ok_or_else(|| BridgeError::NotFound(intent.device.clone()))?;
        let capabilities = bus
            .capabilities(node)
            .ok_or_else(|| BridgeError::DeviceBus(format!("no node {node} found")))?;

        let request = Self::plan(node, &capabilities, intent).ok_or_else(|| {
            BridgeError::Unsupported {
                device: intent.device.clone(),
                node,
            }
        })?;

        let _span = mapping.routes().route(node).enter();
        info!(label = %request.label, value = %request.value, "writing");
        bus.write(request.clone())?;
        Ok(request)
    }

    /// Pick the write for a node with `capabilities`, or `None` when none of
    /// the known strategies apply.
    pub fn plan(
        node: NodeId,
        capabilities: &CapabilitySet,
        intent: &CommandIntent,
    ) -> Option<WriteRequest> {
        let on = intent.desired.is_on();
        if capabilities.contains(&CommandClass::DoorLock) {
            Some(WriteRequest {
                node,
                label: LOCKED_LABEL.to_string(),
                value: Payload::Bool(!on),
            })
        } else if capabilities.contains(&CommandClass::SwitchBinary) {
            Some(WriteRequest {
                node,
                label: SWITCH_LABEL.to_string(),
                value: Payload::Bool(on),
            })
        } else {
            warn!(node = node.0, "node not in recognised classes");
            None
        }
    }
}
