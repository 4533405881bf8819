//! `zwbridge-runtime` – the bridge engine.
//!
//! Wires the registry, decoder, dispatcher and timers from the lower crates
//! into one reactor fed by the device bus and the message bus.
//!
//! # Modules
//!
//! - [`bridge`] – [`Bridge`]: event handling, timers, shutdown.
//! - [`inbound`] – YAML/JSON classification of inbound messages.
//! - [`telemetry`] – `tracing` subscriber and OTLP export.

pub mod bridge;
pub mod inbound;
pub mod telemetry;

pub use bridge::{Bridge, BridgeSettings, TimerKey};
pub use inbound::Inbound;
