//! [`LaserRegistry`] – known lasers and their mounting poses.
//!
//! Every scan names the frame it was measured in.  The first time a frame is
//! seen the registry asks the [`TransformSource`] for the static transform
//! from that frame to the base frame, stores it under a new dense index and
//! hands the index back.  Later scans from the same frame hit the cache and
//! never query the transform source again.
//!
//! Entries are never removed; the registry only grows while the process
//! runs.  All lasers are treated alike (range + bearing), so the index is
//! all the estimator needs to find a scan's origin.

use std::collections::HashMap;
use std::time::Duration;

use odomap_types::OdomError;
use tracing::{info, warn};

use crate::transform::{Pose3D, TransformSource};

/// Immutable record of a registered laser.
#[derive(Debug, Clone, PartialEq)]
pub struct LaserOrigin {
    pub frame_id: String,
    /// Pose of the laser frame in the base frame.
    pub origin: Pose3D,
}

/// Frame-id → index → [`LaserOrigin`] cache.
#[derive(Debug)]
pub struct LaserRegistry {
    base_frame: String,
    timeout: Duration,
    index: HashMap<String, usize>,
    origins: Vec<LaserOrigin>,
}

impl LaserRegistry {
    /// Create an empty registry resolving origins against `base_frame`.
    ///
    /// `timeout` bounds every transform lookup.
    pub fn new(base_frame: &str, timeout: Duration) -> Self {
        Self {
            base_frame: base_frame.to_string(),
            timeout,
            index: HashMap::new(),
            origins: Vec::new(),
        }
    }

    /// Return the index of `frame_id`, resolving and caching its origin on
    /// first sight.
    ///
    /// # Errors
    ///
    /// * [`OdomError::UnresolvedTransform`] – the lookup timed out.  Nothing
    ///   is cached, so the next scan from this frame tries again.
    /// * [`OdomError::InvalidLaserOrigin`] – the transform resolved but is
    ///   unusable (non-finite or non-unit rotation).
    pub fn register(
        &mut self,
        frame_id: &str,
        transforms: &dyn TransformSource,
    ) -> Result<usize, OdomError> {
        if let Some(&idx) = self.index.get(frame_id) {
            return Ok(idx);
        }

        let origin = transforms
            .lookup_transform(&self.base_frame, frame_id, self.timeout)
            .inspect_err(|e| warn!(frame = frame_id, error = %e, "laser transform lookup failed"))?;

        if !origin.is_finite() {
            return Err(OdomError::InvalidLaserOrigin {
                frame: frame_id.to_string(),
                details: format!("{origin:?}"),
            });
        }

        let idx = self.origins.len();
        self.origins.push(LaserOrigin {
            frame_id: frame_id.to_string(),
            origin,
        });
        self.index.insert(frame_id.to_string(), idx);
        info!(
            frame = frame_id,
            index = idx,
            x = origin.translation.x,
            y = origin.translation.y,
            z = origin.translation.z,
            yaw = origin.rotation.yaw(),
            "registered laser"
        );
        Ok(idx)
    }

    pub fn origin(&self, index: usize) -> Option<&LaserOrigin> {
        self.origins.get(index)
    }

    pub fn index_of(&self, frame_id: &str) -> Option<usize> {
        self.index.get(frame_id).copied()
    }

    pub fn len(&self) -> usize {
        self.origins.len()
    }

    pub fn is_empty(&self) -> bool {
        self.origins.is_empty()
    }

    /// Registered lasers in index order.
    pub fn iter(&self) -> impl Iterator<Item = &LaserOrigin> {
        self.origins.iter()
    }

    pub fn base_frame(&self) -> &str {
        &self.base_frame
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transform::{Quaternion, TfBuffer, Vec3};
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Test double that counts lookups and optionally fails.
    struct CountingSource {
        calls: AtomicUsize,
        result: Result<Pose3D, OdomError>,
    }

    impl CountingSource {
        fn ok(origin: Pose3D) -> Self {
            Self {
                calls: AtomicUsize::new(0),
                result: Ok(origin),
            }
        }
    }

    impl TransformSource for CountingSource {
        fn lookup_transform(
            &self,
            _target_frame: &str,
            _source_frame: &str,
            _timeout: Duration,
        ) -> Result<Pose3D, OdomError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.result.clone()
        }
    }

    fn registry() -> LaserRegistry {
        LaserRegistry::new("base_link", Duration::from_millis(10))
    }

    #[test]
    fn first_registration_assigns_index_zero() {
        let source = CountingSource::ok(Pose3D::identity());
        let mut reg = registry();
        assert_eq!(reg.register("front_laser", &source).unwrap(), 0);
        assert_eq!(reg.len(), 1);
        assert_eq!(reg.origin(0).unwrap().frame_id, "front_laser");
    }

    #[test]
    fn repeated_scans_hit_the_cache() {
        let source = CountingSource::ok(Pose3D::new(
            Vec3::new(0.2, 0.0, 0.1),
            Quaternion::identity(),
        ));
        let mut reg = registry();
        let idx = reg.register("front_laser", &source).unwrap();
        assert_eq!(source.calls.load(Ordering::SeqCst), 1);

        for _ in 0..100 {
            assert_eq!(reg.register("front_laser", &source).unwrap(), idx);
        }
        assert_eq!(source.calls.load(Ordering::SeqCst), 1, "cache hits must not query transforms");
    }

    #[test]
    fn distinct_frames_get_distinct_indices() {
        let tf = TfBuffer::new();
        tf.set_transform("base_link", "front_laser", Pose3D::identity());
        tf.set_transform(
            "base_link",
            "rear_laser",
            Pose3D::new(Vec3::new(-0.4, 0.0, 0.0), Quaternion::from_yaw(std::f64::consts::PI)),
        );
        let mut reg = registry();
        let front = reg.register("front_laser", &tf).unwrap();
        let rear = reg.register("rear_laser", &tf).unwrap();
        assert_ne!(front, rear);
        assert_eq!(reg.index_of("rear_laser"), Some(rear));
        assert!((reg.origin(rear).unwrap().origin.translation.x + 0.4).abs() < 1e-9);
    }

    #[test]
    fn timeout_is_surfaced_and_nothing_cached() {
        let tf = TfBuffer::new();
        let mut reg = registry();
        let err = reg.register("front_laser", &tf).unwrap_err();
        assert!(matches!(err, OdomError::UnresolvedTransform { .. }));
        assert!(err.is_recoverable());
        assert!(reg.is_empty());

        // The transform shows up later; the next attempt succeeds.
        tf.set_transform("base_link", "front_laser", Pose3D::identity());
        assert_eq!(reg.register("front_laser", &tf).unwrap(), 0);
    }

    #[test]
    fn non_finite_origin_is_fatal() {
        let source = CountingSource::ok(Pose3D::new(
            Vec3::new(f64::NAN, 0.0, 0.0),
            Quaternion::identity(),
        ));
        let mut reg = registry();
        let err = reg.register("front_laser", &source).unwrap_err();
        assert!(matches!(err, OdomError::InvalidLaserOrigin { .. }));
        assert!(!err.is_recoverable());
        assert!(reg.is_empty());
    }
}
