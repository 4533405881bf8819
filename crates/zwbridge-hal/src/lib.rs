//! `zwbridge-hal` – the device-bus side of the bridge.
//!
//! # Modules
//!
//! - [`device_bus`] – [`DeviceBus`] trait and the [`DeviceBusEvent`]s the
//!   mesh collaborator delivers.
//! - [`registry`] – [`DeviceRegistry`]: the DeviceId ↔ NodeId bijection,
//!   rebuilt wholesale from each configuration document.
//! - [`dispatcher`] – [`CommandDispatcher`]: picks the capability-specific
//!   write for an inbound command.
//! - [`sim`] – [`SimDeviceBus`][sim::SimDeviceBus]: an in-process device bus
//!   that records writes, for tests and radio-less runs.

pub mod device_bus;
pub mod dispatcher;
pub mod registry;
pub mod sim;

pub use device_bus::{DeviceBus, DeviceBusEvent, NodeInfo};
pub use dispatcher::CommandDispatcher;
pub use registry::{DeviceMapping, DeviceRegistry, LogRoutes};
