use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::f64::consts::{PI, TAU};
use thiserror::Error;
use uuid::Uuid;

pub mod msgs;

/// Wrap an angle into the half-open interval (-π, π].
///
/// Non-finite input is returned unchanged.
pub fn normalize_angle(angle: f64) -> f64 {
    if !angle.is_finite() {
        return angle;
    }
    let wrapped = (angle + PI).rem_euclid(TAU) - PI;
    if wrapped <= -PI { wrapped + TAU } else { wrapped }
}

/// A point on the odometry plane (metres).
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Point2 {
    pub x: f64,
    pub y: f64,
}

impl Point2 {
    pub fn new(x: f64, y: f64) -> Self {
        Self { x, y }
    }

    pub fn norm(self) -> f64 {
        self.x.hypot(self.y)
    }

    pub fn is_finite(self) -> bool {
        self.x.is_finite() && self.y.is_finite()
    }
}

/// Planar pose of the platform in the odometry frame.
///
/// `heading` is kept in (-π, π] by every constructor and composition.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Pose2D {
    pub x: f64,
    pub y: f64,
    pub heading: f64,
}

impl Pose2D {
    pub fn new(x: f64, y: f64, heading: f64) -> Self {
        Self {
            x,
            y,
            heading: normalize_angle(heading),
        }
    }

    pub fn identity() -> Self {
        Self::default()
    }

    /// `self` followed by `other`, with `other` expressed in `self`'s frame.
    pub fn compose(&self, other: &Pose2D) -> Pose2D {
        let (s, c) = self.heading.sin_cos();
        Pose2D::new(
            self.x + c * other.x - s * other.y,
            self.y + s * other.x + c * other.y,
            self.heading + other.heading,
        )
    }

    pub fn inverse(&self) -> Pose2D {
        let (s, c) = self.heading.sin_cos();
        Pose2D::new(
            -c * self.x - s * self.y,
            s * self.x - c * self.y,
            -self.heading,
        )
    }

    /// Relative motion that takes `self` to `other`: `self⁻¹ ∘ other`.
    pub fn between(&self, other: &Pose2D) -> Pose2D {
        self.inverse().compose(other)
    }

    /// Map a point expressed in this pose's frame into the parent frame.
    pub fn transform_point(&self, p: Point2) -> Point2 {
        let (s, c) = self.heading.sin_cos();
        Point2::new(self.x + c * p.x - s * p.y, self.y + s * p.x + c * p.y)
    }

    pub fn position(&self) -> Point2 {
        Point2::new(self.x, self.y)
    }

    pub fn translation_norm(&self) -> f64 {
        self.x.hypot(self.y)
    }

    pub fn is_finite(&self) -> bool {
        self.x.is_finite() && self.y.is_finite() && self.heading.is_finite()
    }
}

/// A single planar laser scan as delivered by the sensor driver.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LaserScan {
    /// Name of the sensor frame the ranges were measured in.
    pub frame_id: String,
    /// Acquisition time (seconds).
    pub stamp: f64,
    /// Bearing of the first beam (radians).
    pub angle_min: f64,
    /// Angular distance between consecutive beams (radians).
    pub angle_increment: f64,
    /// Shortest valid range reported by the sensor (metres).
    pub range_min: f64,
    /// Longest valid range reported by the sensor (metres).
    pub range_max: f64,
    /// Non-finite readings travel as `null` in JSON and come back as NaN.
    #[serde(with = "range_values")]
    pub ranges: Vec<f32>,
}

mod range_values {
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(ranges: &[f32], s: S) -> Result<S::Ok, S::Error> {
        s.collect_seq(ranges.iter().map(|r| r.is_finite().then_some(*r)))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Vec<f32>, D::Error> {
        let raw: Vec<Option<f32>> = Vec::deserialize(d)?;
        Ok(raw.into_iter().map(|r| r.unwrap_or(f32::NAN)).collect())
    }
}

/// Committed pose plus the quality information attached to it.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PoseEstimate {
    pub pose: Pose2D,
    /// Row-major 3×3 covariance over (x, y, heading).
    pub covariance: [f64; 9],
    /// Set when the last registration did not converge.
    pub low_confidence: bool,
    /// Stamp of the scan that produced this pose.
    pub stamp: f64,
    /// Number of scans committed so far.
    pub scans: u64,
}

impl Default for PoseEstimate {
    fn default() -> Self {
        Self {
            pose: Pose2D::identity(),
            covariance: [0.0; 9],
            low_confidence: false,
            stamp: 0.0,
            scans: 0,
        }
    }
}

/// Unified event wrapper for the node's event bus.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Event {
    pub id: Uuid,
    pub timestamp: DateTime<Utc>,
    /// e.g., "odomap-node::odometry"
    pub source: String,
    pub payload: EventPayload,
}

impl Event {
    pub fn new(source: &str, payload: EventPayload) -> Self {
        Self {
            id: Uuid::new_v4(),
            timestamp: Utc::now(),
            source: source.to_string(),
            payload,
        }
    }
}

/// Variants of data that can be routed over the event bus.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum EventPayload {
    Pose(msgs::PoseWithCovarianceStamped),
    Transform(msgs::TransformStamped),
    OccupancyMap(msgs::OccupancyGrid),
    DistanceMap(msgs::OccupancyGrid),
    /// A scan was dropped before it could be committed.
    ScanDropped {
        frame_id: String,
        stamp: f64,
        reason: String,
        recoverable: bool,
    },
    /// The map could not grow to cover the latest scan.
    Degraded { reason: String },
}

/// Error taxonomy shared by the core and the node layer.
#[derive(Error, Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum OdomError {
    #[error("Unresolved transform for frame '{frame}' after {waited_ms} ms")]
    UnresolvedTransform { frame: String, waited_ms: u64 },

    #[error("Invalid laser origin for frame '{frame}': {details}")]
    InvalidLaserOrigin { frame: String, details: String },

    #[error("Laser '{0}' is disabled after a fatal error")]
    LaserDisabled(String),

    #[error("Grid resize to {required_cells} cells exceeds the limit of {max_cells}")]
    GridResize { required_cells: usize, max_cells: usize },

    #[error("Scan stamped {stamp} precedes last committed scan {last}")]
    OutOfOrderScan { stamp: f64, last: f64 },

    #[error("Invalid scan: {0}")]
    InvalidScan(String),

    #[error("Scan from '{0}' has no usable beams")]
    EmptyScan(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Channel error: {0}")]
    Channel(String),

    #[error("I/O error: {0}")]
    Io(String),

    #[error("Serialization error: {0}")]
    Serialization(String),
}

impl OdomError {
    /// True when the caller should drop the current scan and keep going.
    ///
    /// False means the laser (or the update) cannot make progress:
    /// stop processing that laser, or surface a degraded-mode signal.
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            OdomError::UnresolvedTransform { .. }
                | OdomError::OutOfOrderScan { .. }
                | OdomError::InvalidScan(_)
                | OdomError::EmptyScan(_)
                | OdomError::Channel(_)
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normalize_angle_wraps_into_half_open_interval() {
        assert!((normalize_angle(3.0 * PI) - PI).abs() < 1e-12);
        assert!((normalize_angle(-PI) - PI).abs() < 1e-12);
        assert!((normalize_angle(PI) - PI).abs() < 1e-12);
        assert!((normalize_angle(-3.0 * PI / 2.0) - PI / 2.0).abs() < 1e-12);
        assert!((normalize_angle(0.25) - 0.25).abs() < 1e-12);
    }

    #[test]
    fn normalize_angle_passes_non_finite_through() {
        assert!(normalize_angle(f64::NAN).is_nan());
    }

    #[test]
    fn pose_compose_with_inverse_is_identity() {
        let p = Pose2D::new(1.0, -2.0, 0.7);
        let id = p.compose(&p.inverse());
        assert!(id.x.abs() < 1e-12);
        assert!(id.y.abs() < 1e-12);
        assert!(id.heading.abs() < 1e-12);
    }

    #[test]
    fn pose_compose_rotates_child_translation() {
        let base = Pose2D::new(1.0, 0.0, PI / 2.0);
        let step = Pose2D::new(1.0, 0.0, 0.0);
        let out = base.compose(&step);
        assert!((out.x - 1.0).abs() < 1e-12);
        assert!((out.y - 1.0).abs() < 1e-12);
    }

    #[test]
    fn pose_between_recovers_relative_motion() {
        let a = Pose2D::new(0.5, 0.5, 0.3);
        let motion = Pose2D::new(0.1, 0.02, -0.05);
        let b = a.compose(&motion);
        let rel = a.between(&b);
        assert!((rel.x - motion.x).abs() < 1e-12);
        assert!((rel.y - motion.y).abs() < 1e-12);
        assert!((rel.heading - motion.heading).abs() < 1e-12);
    }

    #[test]
    fn pose_heading_stays_normalized_after_composition() {
        let mut p = Pose2D::identity();
        let turn = Pose2D::new(0.0, 0.0, 0.9);
        for _ in 0..50 {
            p = p.compose(&turn);
            assert!(p.heading > -PI && p.heading <= PI);
        }
    }

    #[test]
    fn odom_error_display() {
        let err = OdomError::UnresolvedTransform {
            frame: "front_laser".to_string(),
            waited_ms: 200,
        };
        assert!(err.to_string().contains("front_laser"));
        assert!(err.is_recoverable());

        let err = OdomError::GridResize {
            required_cells: 10,
            max_cells: 5,
        };
        assert!(err.to_string().contains("exceeds"));
        assert!(!err.is_recoverable());
    }

    #[test]
    fn laser_scan_roundtrip() {
        let scan = LaserScan {
            frame_id: "front_laser".to_string(),
            stamp: 12.5,
            angle_min: -1.0,
            angle_increment: 0.01,
            range_min: 0.1,
            range_max: 30.0,
            ranges: vec![1.0, 2.0, f32::INFINITY],
        };
        let json = serde_json::to_string(&scan).unwrap();
        let back: LaserScan = serde_json::from_str(&json).unwrap();
        assert_eq!(back.frame_id, scan.frame_id);
        assert_eq!(back.ranges.len(), 3);
        assert_eq!(back.ranges[1], 2.0);
        assert!(back.ranges[2].is_nan());
    }
}
