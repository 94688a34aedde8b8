//! `sensorbridge-perception` – estimation layer.
//!
//! # Modules
//!
//! - [`odometry`] – [`OdometryIntegrator`][odometry::OdometryIntegrator]:
//!   dead-reckoning position from GPS ground velocity.

pub mod odometry;

pub use odometry::{GpsVelocity, OdometryIntegrator};
