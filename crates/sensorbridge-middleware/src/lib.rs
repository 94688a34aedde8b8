//! `sensorbridge-middleware` – everything between a reading and the wire.
//!
//! # Modules
//!
//! - [`topics`] – fixed topic catalog and ROS type naming.
//! - [`envelope`] – ROS message bodies and their pure encoders.
//! - [`bridge`] – [`BridgeConnection`]: rosbridge WebSocket client with an
//!   observable connection state machine.
//! - [`dispatch`] – [`Dispatcher`]: the single task that folds readings into
//!   envelope state and publishes.

pub mod bridge;
pub mod dispatch;
pub mod envelope;
pub mod topics;

pub use bridge::{BridgeConnection, ConnectionState, DEFAULT_PORT, Publisher};
pub use dispatch::{DispatchStats, Dispatcher, EnvelopeAssembler, EnvelopeState};
pub use envelope::{Envelope, Stamp};
pub use topics::{TopicKind, TypeNaming};
