//! Dead-reckoning Odometry Integrator.
//!
//! Integrates GPS-reported ground velocity into a planar position estimate
//! anchored at the origin of the session.  Position is never corrected by
//! the absolute GPS coordinate, so the estimate drifts.
//!
//! Each GPS sample is decomposed into velocity components and integrated
//! with a rectangular (first-order) step over the time since the previous
//! sample:
//! ```text
//! vx = speed * cos(bearing_rad)
//! vy = speed * sin(bearing_rad)
//! position += (vx * dt, vy * dt, 0)
//! ```
//! Bearing is zero along +X.  The first sample only anchors the clock.
//!
//! # Example
//!
//! ```rust
//! use sensorbridge_perception::odometry::{GpsVelocity, OdometryIntegrator};
//!
//! let mut odom = OdometryIntegrator::new();
//! odom.apply(GpsVelocity { speed_mps: 2.0, bearing_deg: 0.0, fix_time_ms: 0 });
//! odom.apply(GpsVelocity { speed_mps: 2.0, bearing_deg: 0.0, fix_time_ms: 1_500 });
//!
//! assert!((odom.position().x - 3.0).abs() < 1e-9);
//! ```

use sensorbridge_types::{GpsFix, Vector3};
use tracing::debug;

// ────────────────────────────────────────────────────────────────────────────
// Input type
// ────────────────────────────────────────────────────────────────────────────

/// Velocity part of a GPS fix, sent from the location source to the
/// integrator.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GpsVelocity {
    /// Ground speed (m/s).
    pub speed_mps: f64,
    /// Direction of travel (degrees, zero along +X).
    pub bearing_deg: f64,
    /// Fix time (milliseconds).
    pub fix_time_ms: i64,
}

impl From<&GpsFix> for GpsVelocity {
    fn from(fix: &GpsFix) -> Self {
        Self {
            speed_mps: fix.speed_mps,
            bearing_deg: fix.bearing_deg,
            fix_time_ms: fix.fix_time_ms,
        }
    }
}

// ────────────────────────────────────────────────────────────────────────────
// OdometryIntegrator
// ────────────────────────────────────────────────────────────────────────────

/// Planar dead-reckoning estimator.  One instance per session.
#[derive(Debug, Clone, Default)]
pub struct OdometryIntegrator {
    position: Vector3,
    speed_mps: f64,
    bearing_deg: f64,
    last_fix_ms: Option<i64>,
}

impl OdometryIntegrator {
    /// Start at the origin with no velocity and an unanchored clock.
    pub fn new() -> Self {
        Self::default()
    }

    /// Integrate one GPS velocity sample.
    ///
    /// Returns the time step `dt` (seconds) that was applied.  It is `0.0`
    /// for the anchoring sample, for a repeated timestamp, and for a sample
    /// older than its predecessor (which re-anchors the clock).
    pub fn apply(&mut self, sample: GpsVelocity) -> f64 {
        self.speed_mps = sample.speed_mps;
        self.bearing_deg = sample.bearing_deg;

        let Some(last) = self.last_fix_ms.replace(sample.fix_time_ms) else {
            return 0.0;
        };

        let elapsed_ms = sample.fix_time_ms - last;
        if elapsed_ms < 0 {
            debug!(elapsed_ms, "out-of-order GPS fix; re-anchoring clock");
            return 0.0;
        }

        let dt = elapsed_ms as f64 / 1000.0;
        let velocity = self.linear_velocity();
        self.position.x += velocity.x * dt;
        self.position.y += velocity.y * dt;
        dt
    }

    /// Integrated position relative to the session origin; `z` is always 0.
    pub fn position(&self) -> Vector3 {
        self.position
    }

    /// Velocity implied by the latest stored speed and bearing.
    pub fn linear_velocity(&self) -> Vector3 {
        let bearing_rad = self.bearing_deg.to_radians();
        Vector3::new(
            self.speed_mps * bearing_rad.cos(),
            self.speed_mps * bearing_rad.sin(),
            0.0,
        )
    }

    pub fn speed_mps(&self) -> f64 {
        self.speed_mps
    }

    pub fn bearing_deg(&self) -> f64 {
        self.bearing_deg
    }

    /// Whether a GPS sample has anchored the clock yet.
    pub fn is_anchored(&self) -> bool {
        self.last_fix_ms.is_some()
    }
}

// ────────────────────────────────────────────────────────────────────────────
// Tests
// ────────────────────────────────────────────────────────────────────────────
