//! The message-bus seam.
//!
//! The bridge never speaks MQTT directly.  Decoded events go onto the
//! internal [`EventBus`][crate::bus::EventBus]; a forwarder task listens to
//! that bus and hands each event, encoded, to a [`MessageBus`].
//!
//! - [`MessageBus`] – the trait every outbound transport implements.
//! - [`MqttAdapter`][crate::mqtt_adapter::MqttAdapter] – rumqttc-backed
//!   broker connection.
//! - [`MemoryMessageBus`] – records messages in memory, for tests and for
//!   running without a broker.

use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use tokio::sync::broadcast::error::RecvError;
use tokio::task::JoinHandle;
use tracing::{debug, error, warn};
use zwbridge_types::BridgeError;

use crate::publisher::{EventPublisher, OutboundMessage};

/// A message received from the outside world.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InboundMessage {
    pub topic: String,
    pub payload: Vec<u8>,
}

impl InboundMessage {
    pub fn new(topic: impl Into<String>, payload: impl Into<Vec<u8>>) -> Self {
        Self {
            topic: topic.into(),
            payload: payload.into(),
        }
    }
}

/// Every outbound transport must implement this trait.
///
/// # Contract
///
/// * `publish` – deliver one message.  Failures are reported, never retried
///   here; the transport owns reconnection.
/// * `disconnect` – close the connection.  Publishing afterwards fails.
#[async_trait]
pub trait MessageBus: Send + Sync {
    async fn publish(&self, message: OutboundMessage) -> Result<(), BridgeError>;

    async fn disconnect(&self) -> Result<(), BridgeError>;
}

/// Forward every event published through `publisher` to `sink`.
///
/// The subscription is taken before the task starts, so nothing published
/// after this call returns is missed.  The task ends when the event bus is
/// closed or when aborted.
pub fn spawn_forwarder(publisher: &EventPublisher, sink: Arc<dyn MessageBus>) -> JoinHandle<()> {
    let mut rx = publisher.bus().subscribe();
    let publisher = publisher.clone();
    tokio::spawn(async move {
        loop {
            match rx.recv().await {
                Ok(event) => {
                    let message = match publisher.encode(&event) {
                        Ok(message) => message,
                        Err(e) => {
                            error!("failed to encode event for {}: {e}", event.device);
                            continue;
                        }
                    };
                    debug!(topic = %message.topic, "forwarding");
                    if let Err(e) = sink.publish(message).await {
                        warn!("publish failed: {e}");
                    }
                }
                Err(RecvError::Lagged(n)) => {
                    warn!(lagged_by = n, "forwarder lagged, events dropped");
                }
                Err(RecvError::Closed) => break,
            }
        }
    })
}

/// An in-memory [`MessageBus`] that records everything published to it.
#[derive(Debug, Default)]
pub struct MemoryMessageBus {
    messages: Mutex<Vec<OutboundMessage>>,
    disconnected: Mutex<bool>,
}

impl MemoryMessageBus {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn messages(&self) -> Vec<OutboundMessage> {
        self.messages
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    /// Topics of every recorded message, oldest first.
    pub fn topics(&self) -> Vec<String> {
        self.messages().into_iter().map(|m| m.topic).collect()
    }

    pub fn is_disconnected(&self) -> bool {
        *self.disconnected.lock().unwrap_or_else(|e| e.into_inner())
    }
}

#[async_trait]
impl MessageBus for MemoryMessageBus {
    async fn publish(&self, message: OutboundMessage) -> Result<(), BridgeError> {
        if self.is_disconnected() {
            return Err(BridgeError::MessageBus("disconnected".to_string()));
        }
        self.messages
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(message);
        Ok(())
    }

    async fn disconnect(&self) -> Result<(), BridgeError> {
        *self.disconnected.lock().unwrap_or_else(|e| e.into_inner()) = true;
        Ok(())
    }
}
