//! `zwbridge-middleware` – the message side of the bridge.
//!
//! Carries normalized events from the engine to the outside world and
//! inbound messages back in, without caring what either of them means.
//!
//! # Modules
//!
//! - [`bus`] – typed publish/subscribe event bus built on a Tokio broadcast
//!   channel.
//! - [`publisher`] – topic layout and JSON encoding of outbound events.
//! - [`adapter`] – the [`MessageBus`] seam and the forwarder task.
//! - [`mqtt_adapter`] – the `rumqttc` broker connection.

pub mod adapter;
pub mod bus;
pub mod mqtt_adapter;
pub mod publisher;

pub use adapter::{InboundMessage, MemoryMessageBus, MessageBus, spawn_forwarder};
pub use bus::EventBus;
pub use mqtt_adapter::{MqttAdapter, MqttSettings};
pub use publisher::{EventPublisher, OutboundMessage};
