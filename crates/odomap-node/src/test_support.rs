//! Fixtures shared by the node tests.

use std::f64::consts::PI;
use std::sync::Arc;

use odomap_core::TfBuffer;
use odomap_core::transform::Pose3D;
use odomap_types::LaserScan;

use crate::bus::EventBus;
use crate::config::NodeConfig;
use crate::node::LidarOdometryNode;

const ROOM_HALF: f64 = 2.025;

/// 360-beam scan of a square room taken from `(x, 0)` facing +x.
pub fn room_scan(stamp: f64, x: f64) -> LaserScan {
    let beams = 360;
    let ranges = (0..beams)
        .map(|i| {
            let a = -PI + i as f64 * 2.0 * PI / beams as f64;
            let (s, c) = a.sin_cos();
            let mut r = f64::INFINITY;
            if c.abs() > 1e-12 {
                r = r.min((ROOM_HALF.copysign(c) - x) / c);
            }
            if s.abs() > 1e-12 {
                r = r.min(ROOM_HALF.copysign(s) / s);
            }
            r as f32
        })
        .collect();
    LaserScan {
        frame_id: "front_laser".to_string(),
        stamp,
        angle_min: -PI,
        angle_increment: 2.0 * PI / beams as f64,
        range_min: 0.05,
        range_max: 30.0,
        ranges,
    }
}

/// Node with `front_laser` mounted at the base origin.
pub fn test_node() -> Arc<LidarOdometryNode> {
    let tf = Arc::new(TfBuffer::new());
    tf.set_transform("base_link", "front_laser", Pose3D::identity());
    let mut config = NodeConfig::default();
    config.odometry.initial_size = 6.0;
    config.odometry.transform_timeout_ms = 5;
    Arc::new(LidarOdometryNode::new(config, tf, EventBus::default()).expect("valid test config"))
}
