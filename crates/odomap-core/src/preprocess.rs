//! Scan preprocessing: raw ranges → base-frame points.
//!
//! [`ScanPoints`] walks every `beam_step`-th beam, drops readings that are
//! non-finite or outside `[range_min, min(range_max, max_range)]`, converts
//! the survivors from polar to Cartesian in the laser frame and maps them
//! through the laser's mounting pose onto the base plane.
//!
//! The iterator borrows the scan and carries no state between scans; cloning
//! it restarts the walk from the same beam.

use odomap_types::{LaserScan, OdomError, Point2};

use crate::transform::{Pose3D, Vec3};

/// Points of one scan, ready for registration and map update.
#[derive(Debug, Clone, PartialEq)]
pub struct ScanCloud {
    /// Laser position in the base frame (ray origin for map updates).
    pub origin: Point2,
    /// Beam endpoints in the base frame.
    pub points: Vec<Point2>,
}

impl ScanCloud {
    pub fn len(&self) -> usize {
        self.points.len()
    }

    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }
}

/// Lazy, restartable iterator over the usable beams of a scan.
#[derive(Debug, Clone)]
pub struct ScanPoints<'a> {
    ranges: &'a [f32],
    angle_min: f64,
    angle_increment: f64,
    lower: f64,
    upper: f64,
    step: usize,
    next: usize,
    origin: Pose3D,
}

impl<'a> ScanPoints<'a> {
    pub fn new(scan: &'a LaserScan, origin: Pose3D, max_range: f64, beam_step: usize) -> Self {
        let lower = if scan.range_min.is_finite() {
            scan.range_min.max(0.0)
        } else {
            0.0
        };
        Self {
            ranges: &scan.ranges,
            angle_min: scan.angle_min,
            angle_increment: scan.angle_increment,
            lower,
            upper: scan.range_max.min(max_range),
            step: beam_step.max(1),
            next: 0,
            origin,
        }
    }
}

impl Iterator for ScanPoints<'_> {
    type Item = Point2;

    fn next(&mut self) -> Option<Point2> {
        while self.next < self.ranges.len() {
            let i = self.next;
            self.next += self.step;

            let r = f64::from(self.ranges[i]);
            if !r.is_finite() || r < self.lower || r > self.upper {
                continue;
            }
            let angle = self.angle_min + i as f64 * self.angle_increment;
            let (s, c) = angle.sin_cos();
            let p = self.origin.transform_point(Vec3::new(r * c, r * s, 0.0));
            return Some(Point2::new(p.x, p.y));
        }
        None
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        let remaining = self.ranges.len().saturating_sub(self.next).div_ceil(self.step);
        (0, Some(remaining))
    }
}

/// Collect the usable beams of `scan` into a [`ScanCloud`].
pub fn preprocess(scan: &LaserScan, origin: &Pose3D, max_range: f64, beam_step: usize) -> ScanCloud {
    ScanCloud {
        origin: origin.planar_origin(),
        points: ScanPoints::new(scan, *origin, max_range, beam_step).collect(),
    }
}

/// Reject malformed scans before any state is touched.
pub fn validate_scan(scan: &LaserScan, max_ranges: usize) -> Result<(), OdomError> {
    if scan.ranges.len() > max_ranges {
        return Err(OdomError::InvalidScan(format!(
            "scan from '{}' has {} range readings, exceeding the limit of {}",
            scan.frame_id,
            scan.ranges.len(),
            max_ranges,
        )));
    }
    if scan.frame_id.is_empty() {
        return Err(OdomError::InvalidScan("scan has an empty frame_id".to_string()));
    }
    if !(scan.stamp.is_finite() && scan.angle_min.is_finite() && scan.angle_increment.is_finite()) {
        return Err(OdomError::InvalidScan(format!(
            "scan from '{}' has non-finite stamp or angle metadata",
            scan.frame_id
        )));
    }
    Ok(())
}
