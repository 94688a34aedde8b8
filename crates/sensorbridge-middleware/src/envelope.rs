//! ROS message envelopes and the stateless encoders that build them.
//!
//! Every encoder is a pure function of its inputs; the caller provides the
//! header [`Stamp`] so that the same readings always produce the same
//! envelope.
//!
//! Covariance conventions follow ROS:
//!
//! | Message | Covariance | Meaning |
//! |---|---|---|
//! | `sensor_msgs/Imu` | `9 × -1` | not computed |
//! | `sensor_msgs/NavSatFix` | `9 × 0`, type `0` | unknown |
//! | `nav_msgs/Odometry` | `36 × 0` | not modelled |

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sensorbridge_types::{GpsFix, Quaternion, Vector3};

use crate::topics::TopicKind;

const NOT_COMPUTED: f64 = -1.0;
const CHILD_FRAME_ID: &str = "base_footprint";

// ────────────────────────────────────────────────────────────────────────────
// Header
// ────────────────────────────────────────────────────────────────────────────

/// ROS time: whole seconds plus nanosecond remainder.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Stamp {
    pub secs: i64,
    pub nsecs: u32,
}

impl Stamp {
    pub fn now() -> Self {
        Self::from(Utc::now())
    }
}

impl From<DateTime<Utc>> for Stamp {
    fn from(t: DateTime<Utc>) -> Self {
        Self {
            secs: t.timestamp(),
            nsecs: t.timestamp_subsec_nanos(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Header {
    pub stamp: Stamp,
    pub frame_id: String,
}

impl Header {
    fn for_topic(stamp: Stamp, topic: TopicKind) -> Self {
        Self {
            stamp,
            frame_id: topic.frame_id().unwrap_or_default().to_string(),
        }
    }
}

// ────────────────────────────────────────────────────────────────────────────
// Message bodies
// ────────────────────────────────────────────────────────────────────────────

/// `sensor_msgs/Imu`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ImuMsg {
    pub header: Header,
    pub orientation: Quaternion,
    pub orientation_covariance: [f64; 9],
    pub angular_velocity: Vector3,
    pub angular_velocity_covariance: [f64; 9],
    pub linear_acceleration: Vector3,
    pub linear_acceleration_covariance: [f64; 9],
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct NavSatStatus {
    pub status: i8,
    pub service: u16,
}

/// `sensor_msgs/NavSatFix`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NavSatFixMsg {
    pub header: Header,
    pub status: NavSatStatus,
    pub latitude: f64,
    pub longitude: f64,
    pub altitude: f64,
    pub position_covariance: [f64; 9],
    pub position_covariance_type: u8,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Pose {
    pub position: Vector3,
    pub orientation: Quaternion,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PoseWithCovariance {
    pub pose: Pose,
    pub covariance: Vec<f64>,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Twist {
    pub linear: Vector3,
    pub angular: Vector3,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TwistWithCovariance {
    pub twist: Twist,
    pub covariance: Vec<f64>,
}

/// `nav_msgs/Odometry`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OdometryMsg {
    pub header: Header,
    pub child_frame_id: String,
    pub pose: PoseWithCovariance,
    pub twist: TwistWithCovariance,
}

/// `std_msgs/Int32`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Int32Msg {
    pub data: i32,
}

/// Any outbound message, serialized as its bare body.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum Envelope {
    Imu(ImuMsg),
    NavSatFix(NavSatFixMsg),
    Odometry(OdometryMsg),
    StepCount(Int32Msg),
}

impl Envelope {
    pub fn topic(&self) -> TopicKind {
        match self {
            Envelope::Imu(_) => TopicKind::Imu,
            Envelope::NavSatFix(_) => TopicKind::NavSatFix,
            Envelope::Odometry(_) => TopicKind::Odometry,
            Envelope::StepCount(_) => TopicKind::StepCount,
        }
    }
}

// ────────────────────────────────────────────────────────────────────────────
// Encoders
// ────────────────────────────────────────────────────────────────────────────

pub fn encode_imu(
    stamp: Stamp,
    orientation: Quaternion,
    angular_velocity: Vector3,
    linear_acceleration: Vector3,
) -> ImuMsg {
    ImuMsg {
        header: Header::for_topic(stamp, TopicKind::Imu),
        orientation,
        orientation_covariance: [NOT_COMPUTED; 9],
        angular_velocity,
        angular_velocity_covariance: [NOT_COMPUTED; 9],
        linear_acceleration,
        linear_acceleration_covariance: [NOT_COMPUTED; 9],
    }
}

pub fn encode_nav_sat_fix(stamp: Stamp, fix: &GpsFix) -> NavSatFixMsg {
    NavSatFixMsg {
        header: Header::for_topic(stamp, TopicKind::NavSatFix),
        status: NavSatStatus {
            status: 0,
            service: 1,
        },
        latitude: fix.latitude,
        longitude: fix.longitude,
        altitude: fix.altitude,
        position_covariance: [0.0; 9],
        position_covariance_type: 0,
    }
}

/// Build an odometry envelope from the integrated position, latest attitude
/// and the two twist components.
pub fn encode_odometry(
    stamp: Stamp,
    position: Vector3,
    orientation: Quaternion,
    linear_twist: Vector3,
    angular_twist: Vector3,
) -> OdometryMsg {
    OdometryMsg {
        header: Header::for_topic(stamp, TopicKind::Odometry),
        child_frame_id: CHILD_FRAME_ID.to_string(),
        pose: PoseWithCovariance {
            pose: Pose {
                position,
                orientation,
            },
            covariance: vec![0.0; 36],
        },
        twist: TwistWithCovariance {
            twist: Twist {
                linear: linear_twist,
                angular: angular_twist,
            },
            covariance: vec![0.0; 36],
        },
    }
}

/// Step totals beyond `i32::MAX` saturate.
pub fn encode_step_count(total: u64) -> Int32Msg {
    Int32Msg {
        data: i32::try_from(total).unwrap_or(i32::MAX),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::{Value, json};

    fn stamp() -> Stamp {
        Stamp {
            secs: 1_700_000_000,
            nsecs: 250_000_000,
        }
    }

    #[test]
    fn stamp_splits_seconds_and_nanos() {
        let t = DateTime::<Utc>::from_timestamp(12, 345).unwrap();
        assert_eq!(Stamp::from(t), Stamp { secs: 12, nsecs: 345 });
    }

    #[test]
    fn imu_with_defaults_is_schema_complete() {
        let msg = encode_imu(stamp(), Quaternion::IDENTITY, Vector3::ZERO, Vector3::ZERO);
        let v = serde_json::to_value(&msg).unwrap();

        assert_eq!(v["header"]["frame_id"], "imu_link");
        assert_eq!(v["header"]["stamp"], json!({"secs": 1_700_000_000i64, "nsecs": 250_000_000}));
        assert_eq!(v["orientation"], json!({"x": 0.0, "y": 0.0, "z": 0.0, "w": 1.0}));
        for key in [
            "orientation_covariance",
            "angular_velocity_covariance",
            "linear_acceleration_covariance",
        ] {
            let cov = v[key].as_array().unwrap();
            assert_eq!(cov.len(), 9);
            assert!(cov.iter().all(|c| c.as_f64() == Some(-1.0)));
        }
        assert_eq!(v["angular_velocity"], json!({"x": 0.0, "y": 0.0, "z": 0.0}));
    }

    #[test]
    fn nav_sat_fix_layout() {
        let fix = GpsFix {
            latitude: 25.03,
            longitude: 121.56,
            altitude: 12.5,
            speed_mps: 1.0,
            bearing_deg: 90.0,
            fix_time_ms: 0,
        };
        let v = serde_json::to_value(encode_nav_sat_fix(stamp(), &fix)).unwrap();

        assert_eq!(v["header"]["frame_id"], "gps");
        assert_eq!(v["status"], json!({"status": 0, "service": 1}));
        assert_eq!(v["latitude"], 25.03);
        assert_eq!(v["altitude"], 12.5);
        assert_eq!(v["position_covariance"], serde_json::to_value([0.0; 9]).unwrap());
        assert_eq!(v["position_covariance_type"], 0);
        assert!(v.get("speed_mps").is_none());
    }

    #[test]
    fn odometry_layout() {
        let msg = encode_odometry(
            stamp(),
            Vector3::new(1.0, 2.0, 0.0),
            Quaternion::IDENTITY,
            Vector3::new(0.5, 0.0, 0.0),
            Vector3::new(0.0, 0.0, 0.1),
        );
        let v = serde_json::to_value(&msg).unwrap();

        assert_eq!(v["header"]["frame_id"], "odom");
        assert_eq!(v["child_frame_id"], "base_footprint");
        assert_eq!(v["pose"]["pose"]["position"]["y"], 2.0);
        assert_eq!(v["pose"]["pose"]["orientation"]["w"], 1.0);
        assert_eq!(v["twist"]["twist"]["linear"]["x"], 0.5);
        assert_eq!(v["twist"]["twist"]["angular"]["z"], 0.1);
        for cov in [&v["pose"]["covariance"], &v["twist"]["covariance"]] {
            let cov = cov.as_array().unwrap();
            assert_eq!(cov.len(), 36);
            assert!(cov.iter().all(|c| c.as_f64() == Some(0.0)));
        }
    }

    #[test]
    fn step_count_is_bare_int32() {
        let v = serde_json::to_value(encode_step_count(1234)).unwrap();
        assert_eq!(v, json!({"data": 1234}));
        assert_eq!(encode_step_count(u64::MAX).data, i32::MAX);
    }

    #[test]
    fn envelope_serializes_untagged() {
        let envelope = Envelope::StepCount(encode_step_count(3));
        assert_eq!(envelope.topic(), TopicKind::StepCount);
        let v: Value = serde_json::to_value(&envelope).unwrap();
        assert_eq!(v, json!({"data": 3}));
    }
}
