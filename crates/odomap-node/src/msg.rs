//! Core outputs → transport message shapes.

use odomap_core::transform::Quaternion;
use odomap_core::{CellState, MapSnapshot};
use odomap_types::msgs::{
    Header, MapMetaData, OccupancyGrid, PoseWithCovarianceStamped, TransformStamped,
};
use odomap_types::{Pose2D, PoseEstimate};

/// ROS occupancy values.
pub const CELL_UNKNOWN: i8 = -1;
pub const CELL_FREE: i8 = 0;
pub const CELL_OCCUPIED: i8 = 100;

/// Position of (x, y, heading) inside the 6×6 (x, y, z, roll, pitch, yaw) layout.
const PLANAR_AXES: [usize; 3] = [0, 1, 5];

pub fn pose_message(estimate: &PoseEstimate, odom_frame: &str) -> PoseWithCovarianceStamped {
    let mut covariance = vec![0.0; 36];
    for (r, &row) in PLANAR_AXES.iter().enumerate() {
        for (c, &col) in PLANAR_AXES.iter().enumerate() {
            covariance[row * 6 + col] = estimate.covariance[r * 3 + c];
        }
    }
    PoseWithCovarianceStamped {
        header: Header {
            stamp: estimate.stamp,
            frame_id: odom_frame.to_string(),
        },
        pose: estimate.pose,
        covariance,
    }
}

/// The odom → base transform, stamped `tolerance` seconds after the scan so
/// consumers can keep using it until the next one arrives.
pub fn odom_transform(
    estimate: &PoseEstimate,
    odom_frame: &str,
    base_frame: &str,
    tolerance: f64,
) -> TransformStamped {
    let q = Quaternion::from_yaw(estimate.pose.heading);
    TransformStamped {
        header: Header {
            stamp: estimate.stamp + tolerance,
            frame_id: odom_frame.to_string(),
        },
        child_frame_id: base_frame.to_string(),
        translation: [estimate.pose.x, estimate.pose.y, 0.0],
        rotation: [q.w, q.x, q.y, q.z],
    }
}

fn meta(snapshot: &MapSnapshot) -> MapMetaData {
    MapMetaData {
        resolution: snapshot.resolution,
        width: snapshot.width as u32,
        height: snapshot.height as u32,
        origin: Pose2D::new(snapshot.origin.x, snapshot.origin.y, 0.0),
    }
}

/// Tri-state occupancy grid: -1 unknown, 0 free, 100 occupied.
pub fn occupancy_grid(snapshot: &MapSnapshot, frame: &str, stamp: f64) -> OccupancyGrid {
    OccupancyGrid {
        header: Header {
            stamp,
            frame_id: frame.to_string(),
        },
        info: meta(snapshot),
        data: snapshot
            .cells
            .iter()
            .map(|s| match s {
                CellState::Unknown => CELL_UNKNOWN,
                CellState::Free => CELL_FREE,
                CellState::Occupied => CELL_OCCUPIED,
            })
            .collect(),
    }
}

/// Distance view scaled to 0 (on an obstacle) … 100 (at or beyond `max_distance`).
pub fn distance_grid(snapshot: &MapSnapshot, frame: &str, stamp: f64) -> OccupancyGrid {
    let scale = 100.0 / snapshot.max_distance;
    OccupancyGrid {
        header: Header {
            stamp,
            frame_id: frame.to_string(),
        },
        info: meta(snapshot),
        data: snapshot
            .distance
            .iter()
            .map(|&d| (f64::from(d) * scale).round().clamp(0.0, 100.0) as i8)
            .collect(),
    }
}
