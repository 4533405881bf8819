//! [`EventPublisher`] – turns [`NormalizedEvent`]s into outbound messages.
//!
//! Topic layout is `<prefix>/<semantic>/<device>`; the payload is the JSON
//! object form of the event.  Publishing is fire-and-forget: the event goes
//! onto the [`EventBus`] and the MQTT forwarder picks it up from there.

use tracing::debug;
use zwbridge_types::{
    BridgeError, DeviceId, NormalizedEvent, SemanticTopic, StateCommand,
};

use crate::bus::EventBus;

/// A message ready for the message bus.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutboundMessage {
    pub topic: String,
    pub payload: Vec<u8>,
}

#[derive(Debug, Clone)]
pub struct EventPublisher {
    prefix: String,
    bus: EventBus,
}

impl EventPublisher {
    pub fn new(prefix: impl Into<String>, bus: EventBus) -> Self {
        Self {
            prefix: prefix.into(),
            bus,
        }
    }

    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    pub fn bus(&self) -> &EventBus {
        &self.bus
    }

    pub fn topic_for(&self, topic: SemanticTopic, device: &DeviceId) -> String {
        format!("{}/{}/{}", self.prefix, topic, device)
    }

    /// Serialize `event` into its wire form.
    ///
    /// # Errors
    ///
    /// Returns [`BridgeError::Serialization`] if the event cannot be encoded.
    pub fn encode(&self, event: &NormalizedEvent) -> Result<OutboundMessage, BridgeError> {
        let payload =
            serde_json::to_vec(event).map_err(|e| BridgeError::Serialization(e.to_string()))?;
        Ok(OutboundMessage {
            topic: self.topic_for(event.topic, &event.device),
            payload,
        })
    }

    /// Parse a wire payload back into an event.
    pub fn decode(payload: &[u8]) -> Result<NormalizedEvent, BridgeError> {
        serde_json::from_slice(payload).map_err(|e| BridgeError::Serialization(e.to_string()))
    }

    /// Hand `event` to every listener.  Having no listener is not an error.
    pub fn publish(&self, event: NormalizedEvent) {
        debug!(
            topic = %event.topic,
            device = %event.device,
            "publishing event"
        );
        if let Err(e) = self.bus.publish(event) {
            debug!("event dropped: {e}");
        }
    }

    pub fn publish_state(&self, topic: SemanticTopic, device: DeviceId, state: StateCommand) {
        self.publish(NormalizedEvent::state(topic, device, state));
    }
}
