//! Transform Frame (TF) buffer.
//!
//! Maintains a directed graph of named reference frames and the 3-D rigid-body
//! transforms (translation + quaternion rotation) that relate them.  Given any
//! two frame names the buffer composes a chain of transforms via BFS to
//! produce the combined [`Pose3D`].
//!
//! Lookups may block for a bounded time: [`TfBuffer::wait_for_transform`]
//! parks the caller until a path appears or the deadline expires, which is
//! the contract the laser registry relies on through [`TransformSource`].
//!
//! # Example
//!
//! ```rust
//! use odomap_core::transform::{TfBuffer, Pose3D, Vec3, Quaternion};
//!
//! let tf = TfBuffer::new();
//!
//! // front_laser is 0.2 m ahead of base_link, same orientation.
//! tf.set_transform("base_link", "front_laser",
//!     Pose3D::new(Vec3::new(0.2, 0.0, 0.1), Quaternion::identity()));
//!
//! let t = tf.lookup("base_link", "front_laser").unwrap();
//! assert!((t.translation.x - 0.2).abs() < 1e-9);
//! ```

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Condvar, Mutex, PoisonError};
use std::time::{Duration, Instant};

use odomap_types::{OdomError, Point2, Pose2D};

// ────────────────────────────────────────────────────────────────────────────
// Primitive types
// ────────────────────────────────────────────────────────────────────────────

/// A 3-D translation vector.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Vec3 {
    pub x: f64,
    pub y: f64,
    pub z: f64,
}

impl Vec3 {
    pub fn new(x: f64, y: f64, z: f64) -> Self {
        Self { x, y, z }
    }

    pub fn zero() -> Self {
        Self::new(0.0, 0.0, 0.0)
    }

    pub fn add(self, rhs: Self) -> Self {
        Self::new(self.x + rhs.x, self.y + rhs.y, self.z + rhs.z)
    }

    pub fn neg(self) -> Self {
        Self::new(-self.x, -self.y, -self.z)
    }

    fn is_finite(self) -> bool {
        self.x.is_finite() && self.y.is_finite() && self.z.is_finite()
    }
}

/// A unit quaternion representing a 3-D rotation (w, x, y, z convention).
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Quaternion {
    pub w: f64,
    pub x: f64,
    pub y: f64,
    pub z: f64,
}

impl Quaternion {
    /// Create a quaternion.  The caller is responsible for providing a unit
    /// quaternion (|q| = 1).
    pub fn new(w: f64, x: f64, y: f64, z: f64) -> Self {
        Self { w, x, y, z }
    }

    pub fn identity() -> Self {
        Self::new(1.0, 0.0, 0.0, 0.0)
    }

    /// Pure rotation of `yaw` radians about +Z.
    pub fn from_yaw(yaw: f64) -> Self {
        let (s, c) = (yaw * 0.5).sin_cos();
        Self::new(c, 0.0, 0.0, s)
    }

    /// Hamilton product: compose two rotations.
    pub fn mul(self, rhs: Self) -> Self {
        Self::new(
            self.w * rhs.w - self.x * rhs.x - self.y * rhs.y - self.z * rhs.z,
            self.w * rhs.x + self.x * rhs.w + self.y * rhs.z - self.z * rhs.y,
            self.w * rhs.y - self.x * rhs.z + self.y * rhs.w + self.z * rhs.x,
            self.w * rhs.z + self.x * rhs.y - self.y * rhs.x + self.z * rhs.w,
        )
    }

    /// Conjugate (== inverse for a unit quaternion).
    pub fn conjugate(self) -> Self {
        Self::new(self.w, -self.x, -self.y, -self.z)
    }

    /// Rotate a vector by this quaternion: p' = q * p * q*.
    pub fn rotate(self, v: Vec3) -> Vec3 {
        let p = Self::new(0.0, v.x, v.y, v.z);
        let rotated = self.mul(p).mul(self.conjugate());
        Vec3::new(rotated.x, rotated.y, rotated.z)
    }

    /// Rotation about +Z implied by this quaternion (radians).
    pub fn yaw(self) -> f64 {
        (2.0 * (self.w * self.z + self.x * self.y))
            .atan2(1.0 - 2.0 * (self.y * self.y + self.z * self.z))
    }

    pub fn norm(self) -> f64 {
        (self.w * self.w + self.x * self.x + self.y * self.y + self.z * self.z).sqrt()
    }

    fn is_finite(self) -> bool {
        self.w.is_finite() && self.x.is_finite() && self.y.is_finite() && self.z.is_finite()
    }
}

// ────────────────────────────────────────────────────────────────────────────
// Pose3D
// ────────────────────────────────────────────────────────────────────────────

/// A rigid-body 3-D transform: rotation followed by translation.
///
/// Represents the pose of frame B relative to frame A: to convert a point
/// expressed in frame B into frame A, rotate it by `rotation` then add
/// `translation`.  Laser origins are stored as `Pose3D` so tilted or
/// upside-down mounts project correctly onto the base plane.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Pose3D {
    pub translation: Vec3,
    pub rotation: Quaternion,
}

impl Pose3D {
    pub fn new(translation: Vec3, rotation: Quaternion) -> Self {
        Self {
            translation,
            rotation,
        }
    }

    pub fn identity() -> Self {
        Self::new(Vec3::zero(), Quaternion::identity())
    }

    /// Lift a planar pose into 3-D (z = 0, yaw only).
    pub fn from_pose2d(pose: &Pose2D) -> Self {
        Self::new(
            Vec3::new(pose.x, pose.y, 0.0),
            Quaternion::from_yaw(pose.heading),
        )
    }

    /// Compose two transforms.
    ///
    /// If `self` = T_A_B and `other` = T_B_C, the result is T_A_C.
    pub fn compose(self, other: Self) -> Self {
        let translated = self.translation.add(self.rotation.rotate(other.translation));
        let rotated = self.rotation.mul(other.rotation);
        Self::new(translated, rotated)
    }

    pub fn inverse(self) -> Self {
        let inv_rot = self.rotation.conjugate();
        Self::new(inv_rot.rotate(self.translation).neg(), inv_rot)
    }

    pub fn transform_point(self, p: Vec3) -> Vec3 {
        self.translation.add(self.rotation.rotate(p))
    }

    /// Drop z, roll and pitch.
    pub fn to_pose2d(self) -> Pose2D {
        Pose2D::new(self.translation.x, self.translation.y, self.rotation.yaw())
    }

    /// Origin of frame B projected onto A's plane.
    pub fn planar_origin(self) -> Point2 {
        Point2::new(self.translation.x, self.translation.y)
    }

    /// Finite components and a rotation that is (close to) unit length.
    pub fn is_finite(self) -> bool {
        self.translation.is_finite()
            && self.rotation.is_finite()
            && (self.rotation.norm() - 1.0).abs() < 1e-3
    }
}

// ────────────────────────────────────────────────────────────────────────────
// TransformSource
// ────────────────────────────────────────────────────────────────────────────

/// Rigid transform lookup with a bounded wait.
///
/// Returns the pose of `source_frame` expressed in `target_frame` (it maps
/// points from the source frame into the target frame).  Implementations must
/// give up after `timeout` with [`OdomError::UnresolvedTransform`].
pub trait TransformSource: Send + Sync {
    fn lookup_transform(
        &self,
        target_frame: &str,
        source_frame: &str,
        timeout: Duration,
    ) -> Result<Pose3D, OdomError>;
}

// ────────────────────────────────────────────────────────────────────────────
// TfBuffer
// ────────────────────────────────────────────────────────────────────────────

/// A directed graph of named reference frames and the [`Pose3D`]s that
/// relate them.
///
/// [`TfBuffer::set_transform`] stores `"A" → "B"` together with its inverse
/// `"B" → "A"`, so any connected pair of frames can be looked up.
/// Shared between threads; writers wake any caller blocked in
/// [`TfBuffer::wait_for_transform`].
#[derive(Debug, Default)]
pub struct TfBuffer {
    /// `edges[from][to] = Pose3D`
    edges: Mutex<HashMap<String, HashMap<String, Pose3D>>>,
    changed: Condvar,
    lookups: AtomicUsize,
}

impl TfBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register or update the transform from `parent_frame` to `child_frame`.
    pub fn set_transform(&self, parent_frame: &str, child_frame: &str, transform: Pose3D) {
        let mut edges = self.edges.lock().unwrap_or_else(PoisonError::into_inner);
        edges
            .entry(parent_frame.to_string())
            .or_default()
            .insert(child_frame.to_string(), transform);
        edges
            .entry(child_frame.to_string())
            .or_default()
            .insert(parent_frame.to_string(), transform.inverse());
        drop(edges);
        self.changed.notify_all();
    }

    /// Compute the composed [`Pose3D`] of `source_frame` in `target_frame`.
    ///
    /// Returns `None` if no path exists between the two frames.
    pub fn lookup(&self, target_frame: &str, source_frame: &str) -> Option<Pose3D> {
        self.lookups.fetch_add(1, Ordering::Relaxed);
        let edges = self.edges.lock().unwrap_or_else(PoisonError::into_inner);
        Self::search(&edges, target_frame, source_frame)
    }

    /// Block until a path between the frames exists or `timeout` elapses.
    pub fn wait_for_transform(
        &self,
        target_frame: &str,
        source_frame: &str,
        timeout: Duration,
    ) -> Result<Pose3D, OdomError> {
        self.lookups.fetch_add(1, Ordering::Relaxed);
        let deadline = Instant::now() + timeout;
        let mut edges = self.edges.lock().unwrap_or_else(PoisonError::into_inner);
        loop {
            if let Some(t) = Self::search(&edges, target_frame, source_frame) {
                return Ok(t);
            }
            let now = Instant::now();
            if now >= deadline {
                return Err(OdomError::UnresolvedTransform {
                    frame: source_frame.to_string(),
                    waited_ms: timeout.as_millis() as u64,
                });
            }
            edges = self
                .changed
                .wait_timeout(edges, deadline - now)
                .unwrap_or_else(PoisonError::into_inner)
                .0;
        }
    }

    /// Number of lookups served so far.
    pub fn lookup_count(&self) -> usize {
        self.lookups.load(Ordering::Relaxed)
    }

    fn search(
        edges: &HashMap<String, HashMap<String, Pose3D>>,
        target_frame: &str,
        source_frame: &str,
    ) -> Option<Pose3D> {
        if source_frame == target_frame {
            return Some(Pose3D::identity());
        }

        // BFS from the target; each queue item carries the composed
        // transform accumulated from target_frame to the current node.
        let mut queue: VecDeque<(&str, Pose3D)> = VecDeque::new();
        let mut visited: HashSet<&str> = HashSet::new();

        queue.push_back((target_frame, Pose3D::identity()));
        visited.insert(target_frame);

        while let Some((current, accumulated)) = queue.pop_front() {
            if let Some(neighbours) = edges.get(current) {
                for (next, edge_tf) in neighbours {
                    if visited.contains(next.as_str()) {
                        continue;
                    }
                    let composed = accumulated.compose(*edge_tf);
                    if next == source_frame {
                        return Some(composed);
                    }
                    visited.insert(next.as_str());
                    queue.push_back((next.as_str(), composed));
                }
            }
        }

        None
    }
}

impl TransformSource for TfBuffer {
    fn lookup_transform(
        &self,
        target_frame: &str,
        source_frame: &str,
        timeout: Duration,
    ) -> Result<Pose3D, OdomError> {
        self.wait_for_transform(target_frame, source_frame, timeout)
    }
}

// ────────────────────────────────────────────────────────────────────────────
// Tests
// ────────────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use std::f64::consts::{FRAC_1_SQRT_2, PI};
    use std::sync::Arc;
    use std::thread;

    // ── Quaternion ──────────────────────────────────────────────────────────

    #[test]
    fn quaternion_90deg_yaw_rotates_x_to_y() {
        let q = Quaternion::new(FRAC_1_SQRT_2, 0.0, 0.0, FRAC_1_SQRT_2);
        let r = q.rotate(Vec3::new(1.0, 0.0, 0.0));
        assert!(r.x.abs() < 1e-9, "x should be ~0, got {}", r.x);
        assert!((r.y - 1.0).abs() < 1e-9, "y should be ~1, got {}", r.y);
        assert!(r.z.abs() < 1e-9);
    }

    #[test]
    fn quaternion_yaw_roundtrips_from_yaw() {
        for yaw in [-3.0, -1.2, 0.0, 0.4, 2.9] {
            let q = Quaternion::from_yaw(yaw);
            assert!((q.yaw() - yaw).abs() < 1e-9, "yaw {yaw} came back as {}", q.yaw());
        }
    }

    #[test]
    fn upside_down_mount_mirrors_y() {
        // 180° roll about +X: laser y axis points along base -y.
        let roll = Quaternion::new(0.0, 1.0, 0.0, 0.0);
        let mount = Pose3D::new(Vec3::new(0.1, 0.0, 0.3), roll);
        let p = mount.transform_point(Vec3::new(1.0, 1.0, 0.0));
        assert!((p.x - 1.1).abs() < 1e-9);
        assert!((p.y + 1.0).abs() < 1e-9);
    }

    // ── Pose3D ──────────────────────────────────────────────────────────────

    #[test]
    fn pose_compose_with_inverse_is_identity() {
        let t = Pose3D::new(Vec3::new(1.0, -2.0, 0.5), Quaternion::from_yaw(0.8));
        let id = t.compose(t.inverse());
        assert!(id.translation.x.abs() < 1e-9);
        assert!(id.translation.y.abs() < 1e-9);
        assert!(id.translation.z.abs() < 1e-9);
        assert!((id.rotation.w.abs() - 1.0).abs() < 1e-9);
    }

    #[test]
    fn to_pose2d_projects_translation_and_yaw() {
        let t = Pose3D::new(Vec3::new(0.3, 0.1, 0.25), Quaternion::from_yaw(PI / 2.0));
        let p = t.to_pose2d();
        assert!((p.x - 0.3).abs() < 1e-9);
        assert!((p.y - 0.1).abs() < 1e-9);
        assert!((p.heading - PI / 2.0).abs() < 1e-9);
    }

    #[test]
    fn non_unit_rotation_is_not_finite() {
        let t = Pose3D::new(Vec3::zero(), Quaternion::new(2.0, 0.0, 0.0, 0.0));
        assert!(!t.is_finite());
        let t = Pose3D::new(Vec3::new(f64::NAN, 0.0, 0.0), Quaternion::identity());
        assert!(!t.is_finite());
    }

    // ── TfBuffer ────────────────────────────────────────────────────────────

    #[test]
    fn lookup_same_frame_returns_identity() {
        let tf = TfBuffer::new();
        assert_eq!(tf.lookup("odom", "odom"), Some(Pose3D::identity()));
    }

    #[test]
    fn lookup_composed_chain() {
        let tf = TfBuffer::new();
        tf.set_transform(
            "base_link",
            "laser_mount",
            Pose3D::new(Vec3::new(1.0, 0.0, 0.0), Quaternion::identity()),
        );
        tf.set_transform(
            "laser_mount",
            "front_laser",
            Pose3D::new(Vec3::new(0.5, 0.0, 0.0), Quaternion::identity()),
        );

        let t = tf.lookup("base_link", "front_laser").unwrap();
        assert!((t.translation.x - 1.5).abs() < 1e-9);
    }

    #[test]
    fn lookup_inverse_direction() {
        let tf = TfBuffer::new();
        tf.set_transform(
            "base_link",
            "front_laser",
            Pose3D::new(Vec3::new(0.5, 0.0, 0.0), Quaternion::identity()),
        );
        let t = tf.lookup("front_laser", "base_link").unwrap();
        assert!((t.translation.x + 0.5).abs() < 1e-9);
    }

    #[test]
    fn lookup_respects_rotation_in_chain() {
        let tf = TfBuffer::new();
        tf.set_transform(
            "odom",
            "base_link",
            Pose3D::new(Vec3::zero(), Quaternion::from_yaw(PI / 2.0)),
        );
        tf.set_transform(
            "base_link",
            "front_laser",
            Pose3D::new(Vec3::new(1.0, 0.0, 0.0), Quaternion::identity()),
        );

        let t = tf.lookup("odom", "front_laser").unwrap();
        assert!(t.translation.x.abs() < 1e-9, "x={}", t.translation.x);
        assert!((t.translation.y - 1.0).abs() < 1e-9, "y={}", t.translation.y);
    }

    #[test]
    fn lookup_unknown_frame_returns_none() {
        let tf = TfBuffer::new();
        tf.set_transform("base_link", "front_laser", Pose3D::identity());
        assert!(tf.lookup("base_link", "ghost_frame").is_none());
    }

    #[test]
    fn wait_times_out_on_missing_frame() {
        let tf = TfBuffer::new();
        let start = Instant::now();
        let err = tf
            .wait_for_transform("base_link", "rear_laser", Duration::from_millis(30))
            .unwrap_err();
        assert!(start.elapsed() >= Duration::from_millis(30));
        assert!(matches!(err, OdomError::UnresolvedTransform { ref frame, .. } if frame == "rear_laser"));
    }

    #[test]
    fn wait_wakes_when_transform_arrives() {
        let tf = Arc::new(TfBuffer::new());
        let writer = Arc::clone(&tf);
        let handle = thread::spawn(move || {
            thread::sleep(Duration::from_millis(20));
            writer.set_transform(
                "base_link",
                "rear_laser",
                Pose3D::new(Vec3::new(-0.3, 0.0, 0.0), Quaternion::from_yaw(PI)),
            );
        });

        let t = tf
            .wait_for_transform("base_link", "rear_laser", Duration::from_secs(5))
            .unwrap();
        handle.join().unwrap();
        assert!((t.translation.x + 0.3).abs() < 1e-9);
    }
}
