//! `sensorbridge-hal` – the seam to the host's sensors.
//!
//! # Modules
//!
//! - [`platform`] – [`SensorPlatform`]: the capability-typed event feed the
//!   host offers (`start_channel` / `stop_channel`).
//! - [`source`] – [`EventSource`]: closed set of source variants
//!   ([`SourceKind`]) that subscribe to platform channels and forward
//!   readings downstream behind a [`SourceGate`].
//! - [`sim`] – [`SimPlatform`][sim::SimPlatform]: synthetic walker for headless
//!   runs.
//! - [`scripted`] – [`ScriptedPlatform`][scripted::ScriptedPlatform]:
//!   caller-driven platform for tests.

pub mod platform;
pub mod scripted;
pub mod sim;
pub mod source;

pub use platform::{ReadingStream, SensorPlatform};
pub use source::{Delivery, EventSource, SourceGate, SourceKind};
