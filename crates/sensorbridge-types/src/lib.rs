use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// A physical measurement channel exposed by the host platform.
///
/// Each [`Reading`] is tagged with the channel that produced it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Channel {
    /// Linear acceleration with gravity removed (m/s²).
    LinearAcceleration,
    /// Gyroscope angular rate (rad/s).
    AngularVelocity,
    /// Fused device attitude quaternion.
    Attitude,
    /// Satellite position fix with ground speed and bearing.
    Location,
    /// Cumulative step count since the platform's last reboot.
    StepCounter,
}

impl std::fmt::Display for Channel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Channel::LinearAcceleration => write!(f, "linear_acceleration"),
            Channel::AngularVelocity => write!(f, "angular_velocity"),
            Channel::Attitude => write!(f, "attitude"),
            Channel::Location => write!(f, "location"),
            Channel::StepCounter => write!(f, "step_counter"),
        }
    }
}

/// Plain 3-vector in the device frame.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Vector3 {
    pub x: f64,
    pub y: f64,
    pub z: f64,
}

impl Vector3 {
    pub const ZERO: Vector3 = Vector3 { x: 0.0, y: 0.0, z: 0.0 };

    pub fn new(x: f64, y: f64, z: f64) -> Self {
        Self { x, y, z }
    }
}

/// Rotation quaternion in `(x, y, z, w)` order, `w` being the scalar part.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Quaternion {
    pub x: f64,
    pub y: f64,
    pub z: f64,
    pub w: f64,
}

impl Quaternion {
    pub const IDENTITY: Quaternion = Quaternion { x: 0.0, y: 0.0, z: 0.0, w: 1.0 };

    pub fn new(x: f64, y: f64, z: f64, w: f64) -> Self {
        Self { x, y, z, w }
    }

    pub fn norm(&self) -> f64 {
        (self.x * self.x + self.y * self.y + self.z * self.z + self.w * self.w).sqrt()
    }

    /// Return the unit quaternion pointing the same way, or `None` when the
    /// input is degenerate (zero length or non-finite components).
    pub fn normalized(&self) -> Option<Quaternion> {
        let n = self.norm();
        if !n.is_finite() || n < 1e-9 {
            return None;
        }
        Some(Quaternion {
            x: self.x / n,
            y: self.y / n,
            z: self.z / n,
            w: self.w / n,
        })
    }
}

impl Default for Quaternion {
    fn default() -> Self {
        Self::IDENTITY
    }
}

/// A single position fix reported by the location channel.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GpsFix {
    /// Degrees, WGS-84.
    pub latitude: f64,
    /// Degrees, WGS-84.
    pub longitude: f64,
    /// Metres above the WGS-84 ellipsoid.
    pub altitude: f64,
    /// Ground speed (m/s).
    pub speed_mps: f64,
    /// Direction of travel in degrees.
    pub bearing_deg: f64,
    /// Milliseconds on the platform's fix clock.
    pub fix_time_ms: i64,
}

/// Payload carried by a [`Reading`].
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub enum ReadingPayload {
    Vector(Vector3),
    Attitude(Quaternion),
    Fix(GpsFix),
    Count(u64),
}

/// Immutable, timestamped sample from one [`Channel`].
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Reading {
    pub channel: Channel,
    pub sampled_at: DateTime<Utc>,
    pub payload: ReadingPayload,
}

impl Reading {
    pub fn linear_acceleration(v: Vector3) -> Self {
        Self::now(Channel::LinearAcceleration, ReadingPayload::Vector(v))
    }

    pub fn angular_velocity(v: Vector3) -> Self {
        Self::now(Channel::AngularVelocity, ReadingPayload::Vector(v))
    }

    pub fn attitude(q: Quaternion) -> Self {
        Self::now(Channel::Attitude, ReadingPayload::Attitude(q))
    }

    pub fn location(fix: GpsFix) -> Self {
        Self::now(Channel::Location, ReadingPayload::Fix(fix))
    }

    pub fn step_count(total: u64) -> Self {
        Self::now(Channel::StepCounter, ReadingPayload::Count(total))
    }

    fn now(channel: Channel, payload: ReadingPayload) -> Self {
        Self {
            channel,
            sampled_at: Utc::now(),
            payload,
        }
    }
}

/// Errors raised by the bridge connection.
///
/// Transport faults are never reported here; they surface as a transition
/// of the connection state to `Disconnected`.
#[derive(Error, Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum BridgeError {
    #[error("Bridge is not connected")]
    NotConnected,

    #[error("Invalid connection state for {operation}: {state}")]
    InvalidState { operation: String, state: String },

    #[error("Invalid bridge URL: {0}")]
    InvalidUrl(String),

    #[error("Envelope Serialization Error: {0}")]
    Serialization(String),

    #[error("No async runtime available for {0}")]
    NoRuntime(String),
}

/// Errors raised by the platform layer.
#[derive(Error, Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum HalError {
    #[error("Channel unavailable on this device: {0}")]
    ChannelUnavailable(Channel),

    #[error("Platform Fault on {channel}: {details}")]
    Platform { channel: Channel, details: String },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn identity_is_default_quaternion() {
        assert_eq!(Quaternion::default(), Quaternion::new(0.0, 0.0, 0.0, 1.0));
    }

    #[test]
    fn normalized_yields_unit_length() {
        let q = Quaternion::new(0.0, 0.0, 2.0, 2.0).normalized().unwrap();
        assert!((q.norm() - 1.0).abs() < 1e-12);
        assert!((q.z - q.w).abs() < 1e-12);
    }

    #[test]
    fn normalized_rejects_degenerate_input() {
        assert!(Quaternion::new(0.0, 0.0, 0.0, 0.0).normalized().is_none());
        assert!(Quaternion::new(f64::NAN, 0.0, 0.0, 1.0).normalized().is_none());
        assert!(Quaternion::new(f64::INFINITY, 0.0, 0.0, 1.0).normalized().is_none());
    }

    #[test]
    fn reading_constructors_tag_channel() {
        assert_eq!(
            Reading::linear_acceleration(Vector3::ZERO).channel,
            Channel::LinearAcceleration
        );
        assert_eq!(Reading::angular_velocity(Vector3::ZERO).channel, Channel::AngularVelocity);
        assert_eq!(Reading::attitude(Quaternion::IDENTITY).channel, Channel::Attitude);
        assert_eq!(Reading::step_count(12).channel, Channel::StepCounter);
    }

    #[test]
    fn reading_serializes_with_channel_name() {
        let reading = Reading::step_count(42);
        let json = serde_json::to_string(&reading).unwrap();
        assert!(json.contains("StepCounter"));
        assert!(json.contains("42"));
    }

    #[test]
    fn error_display() {
        let err = HalError::ChannelUnavailable(Channel::StepCounter);
        assert!(err.to_string().contains("step_counter"));

        let err2 = BridgeError::InvalidState {
            operation: "connect".to_string(),
            state: "Connected".to_string(),
        };
        assert!(err2.to_string().contains("connect"));
        assert!(err2.to_string().contains("Connected"));
    }
}
