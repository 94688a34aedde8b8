//! Fixed topic catalog shared by the encoders, the dispatcher and the
//! session orchestrator.

use serde::{Deserialize, Serialize};

/// Spelling of ROS message type names in `advertise` frames.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TypeNaming {
    /// `sensor_msgs/Imu`
    #[default]
    Ros1,
    /// `sensor_msgs/msg/Imu`
    Ros2,
}

impl std::fmt::Display for TypeNaming {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TypeNaming::Ros1 => write!(f, "ros1"),
            TypeNaming::Ros2 => write!(f, "ros2"),
        }
    }
}

/// One outbound topic.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TopicKind {
    Imu,
    NavSatFix,
    Odometry,
    StepCount,
}

impl TopicKind {
    pub const ALL: [TopicKind; 4] = [
        TopicKind::Imu,
        TopicKind::NavSatFix,
        TopicKind::Odometry,
        TopicKind::StepCount,
    ];

    pub fn name(self) -> &'static str {
        match self {
            TopicKind::Imu => "/imu/data",
            TopicKind::NavSatFix => "/gps/fix",
            TopicKind::Odometry => "/odom",
            TopicKind::StepCount => "/step_counter",
        }
    }

    /// Message type name advertised for this topic.
    ///
    /// `std_msgs/Int32` keeps its short spelling under both namings.
    pub fn ros_type(self, naming: TypeNaming) -> &'static str {
        match (self, naming) {
            (TopicKind::Imu, TypeNaming::Ros1) => "sensor_msgs/Imu",
            (TopicKind::Imu, TypeNaming::Ros2) => "sensor_msgs/msg/Imu",
            (TopicKind::NavSatFix, TypeNaming::Ros1) => "sensor_msgs/NavSatFix",
            (TopicKind::NavSatFix, TypeNaming::Ros2) => "sensor_msgs/msg/NavSatFix",
            (TopicKind::Odometry, TypeNaming::Ros1) => "nav_msgs/Odometry",
            (TopicKind::Odometry, TypeNaming::Ros2) => "nav_msgs/msg/Odometry",
            (TopicKind::StepCount, _) => "std_msgs/Int32",
        }
    }

    /// Header `frame_id`, or `None` for header-less messages.
    pub fn frame_id(self) -> Option<&'static str> {
        match self {
            TopicKind::Imu => Some("imu_link"),
            TopicKind::NavSatFix => Some("gps"),
            TopicKind::Odometry => Some("odom"),
            TopicKind::StepCount => None,
        }
    }
}

impl std::fmt::Display for TopicKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}
