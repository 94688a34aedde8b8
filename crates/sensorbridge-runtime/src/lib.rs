//! `sensorbridge-runtime` – session lifecycle and process-level plumbing.
//!
//! # Modules
//!
//! - [`session`] – [`SessionOrchestrator`][session::SessionOrchestrator]:
//!   validates the bridge address, connects, advertises, then runs the
//!   dispatcher and event sources until the session is stopped.
//! - [`telemetry`] – [`init_tracing`][telemetry::init_tracing]: installs the
//!   global `tracing` subscriber with an optional OTLP span exporter.  Set
//!   `OTEL_EXPORTER_OTLP_ENDPOINT` to export session spans to any
//!   OTLP-compatible collector.

pub mod session;
pub mod telemetry;

pub use session::{
    SessionConfig, SessionError, SessionOrchestrator, SessionStatus, topics_for, validate_address,
};
pub use telemetry::{TracerProviderGuard, init_tracing};
