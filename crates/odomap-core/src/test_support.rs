//! Synthetic square room shared by the unit tests.

use std::f64::consts::PI;

use odomap_types::{LaserScan, Point2, Pose2D};

use crate::config::OdometryConfig;
use crate::grid::OccupancyMap;
use crate::preprocess::ScanCloud;

/// Walls sit on cell centres for the default 5 cm resolution.
pub const ROOM_HALF: f64 = 2.025;

pub fn room_config() -> OdometryConfig {
    OdometryConfig {
        initial_size: 6.0,
        ..OdometryConfig::default()
    }
}

/// Range from `pose` along world bearing `angle` to the room walls.
fn wall_range(pose: &Pose2D, angle: f64) -> f64 {
    let (s, c) = angle.sin_cos();
    let mut r = f64::INFINITY;
    if c > 1e-12 {
        r = r.min((ROOM_HALF - pose.x) / c);
    } else if c < -1e-12 {
        r = r.min((-ROOM_HALF - pose.x) / c);
    }
    if s > 1e-12 {
        r = r.min((ROOM_HALF - pose.y) / s);
    } else if s < -1e-12 {
        r = r.min((-ROOM_HALF - pose.y) / s);
    }
    r
}

/// Ranges a 360° laser at `pose` would report, `beams` of them from -π.
pub fn room_ranges(pose: &Pose2D, beams: usize) -> Vec<f64> {
    (0..beams)
        .map(|i| {
            let bearing = -PI + i as f64 * 2.0 * PI / beams as f64;
            wall_range(pose, pose.heading + bearing)
        })
        .collect()
}

/// Base-frame wall points seen from `pose`.
pub fn room_points(pose: &Pose2D, beams: usize) -> Vec<Point2> {
    room_ranges(pose, beams)
        .into_iter()
        .enumerate()
        .map(|(i, r)| {
            let bearing = -PI + i as f64 * 2.0 * PI / beams as f64;
            Point2::new(r * bearing.cos(), r * bearing.sin())
        })
        .collect()
}

/// A scan message of the room from `pose`, laser mounted at the base origin.
pub fn room_scan(frame_id: &str, stamp: f64, pose: &Pose2D, beams: usize) -> LaserScan {
    LaserScan {
        frame_id: frame_id.to_string(),
        stamp,
        angle_min: -PI,
        angle_increment: 2.0 * PI / beams as f64,
        range_min: 0.05,
        range_max: 30.0,
        ranges: room_ranges(pose, beams).into_iter().map(|r| r as f32).collect(),
    }
}

/// Map holding one scan of the room taken at the origin.
pub fn seeded_room_map(config: &OdometryConfig) -> OccupancyMap {
    let mut map = OccupancyMap::new(config).expect("room config is valid");
    let cloud = ScanCloud {
        origin: Point2::new(0.0, 0.0),
        points: room_points(&Pose2D::identity(), 720),
    };
    map.integrate(&cloud, &Pose2D::identity())
        .expect("room fits the initial grid");
    map
}
