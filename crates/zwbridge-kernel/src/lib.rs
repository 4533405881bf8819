//! `zwbridge-kernel` – translation rules and timing.
//!
//! The part of the bridge that decides what a report means and when a
//! delayed action runs. It does no I/O.
//!
//! # Modules
//!
//! - [`codes`] – vendor code tables for lock alarms, access control and
//!   burglar notifications.
//! - [`decoder`] – [`ValueDecoder`][decoder::ValueDecoder]: the label-keyed
//!   dispatch table that turns a value report into normalized events.
//! - [`timers`] – [`TimerSet`][timers::TimerSet]: keyed single-slot timers
//!   used for motion auto-off and command re-assertion.

pub mod codes;
pub mod decoder;
pub mod timers;

pub use decoder::{DecodeContext, Decoded, Deferred, ValueDecoder};
pub use timers::{TimerSet, TimerToken};
