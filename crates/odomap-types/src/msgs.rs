//! Message shapes handed to the transport layer.
//!
//! These mirror the ROS `std_msgs` / `geometry_msgs` / `nav_msgs` types the
//! odometry node publishes, reduced to the planar case.

use serde::{Deserialize, Serialize};

use crate::Pose2D;

/// Standard metadata for stamped data.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Header {
    /// Seconds.
    pub stamp: f64,
    pub frame_id: String,
}

/// Pose estimate with its uncertainty.
///
/// `covariance` is the ROS 6×6 row-major layout over
/// (x, y, z, roll, pitch, yaw); only the planar entries are populated.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PoseWithCovarianceStamped {
    pub header: Header,
    pub pose: Pose2D,
    pub covariance: Vec<f64>,
}

/// Rigid transform from `header.frame_id` to `child_frame_id`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TransformStamped {
    pub header: Header,
    pub child_frame_id: String,
    /// (x, y, z) metres.
    pub translation: [f64; 3],
    /// Unit quaternion (w, x, y, z).
    pub rotation: [f64; 4],
}

/// Metadata about the map.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MapMetaData {
    /// Metres per cell.
    pub resolution: f64,
    /// Map width (cells).
    pub width: u32,
    /// Map height (cells).
    pub height: u32,
    /// Real-world pose of the corner of cell (0, 0).
    pub origin: Pose2D,
}

/// Row-major 2D grid. Occupancy values are in [0, 100]; unknown is -1.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OccupancyGrid {
    pub header: Header,
    pub info: MapMetaData,
    pub data: Vec<i8>,
}

/// Reply to a map query.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GetMapResponse {
    pub map: OccupancyGrid,
}
