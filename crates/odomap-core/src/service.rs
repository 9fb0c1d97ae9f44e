//! [`OdometryService`] – thread-safe owner of the registry, estimator, map
//! and committed pose.
//!
//! # Locking
//!
//! | State | Guard | Held by |
//! |---|---|---|
//! | registry, estimator, last stamp, disabled lasers | `Mutex<ScanPipeline>` | the whole of [`OdometryService::on_scan`] |
//! | occupancy grid | `RwLock<OccupancyMap>` | read: registration and snapshots; write: the update |
//! | committed pose | `RwLock<PoseEstimate>` | briefly, on commit and on read |
//!
//! The pipeline mutex serializes scan processing, so the map and pose have a
//! single writer.  Snapshots only take the map read guard, which the writer
//! holds for the update itself and nothing else.
//!
//! A scan either commits fully (map updated, pose advanced) or leaves every
//! piece of state as it was.

use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError, RwLock};

use odomap_types::{LaserScan, OdomError, PoseEstimate};
use tracing::{debug, error, info, warn};

use crate::config::OdometryConfig;
use crate::estimator::{OdometryState, PoseEstimator, RegistrationQuality};
use crate::grid::{IntegrateStats, MapSnapshot, OccupancyMap};
use crate::preprocess::{preprocess, validate_scan};
use crate::registry::{LaserOrigin, LaserRegistry};
use crate::transform::TransformSource;

/// Result of one accepted scan.
#[derive(Debug, Clone, PartialEq)]
pub struct ScanOutcome {
    /// Registry index of the laser that produced the scan.
    pub laser: usize,
    pub estimate: PoseEstimate,
    pub quality: RegistrationQuality,
    /// Beams that survived preprocessing.
    pub points: usize,
    pub update: IntegrateStats,
}

#[derive(Debug)]
struct ScanPipeline {
    registry: LaserRegistry,
    estimator: PoseEstimator,
    last_stamp: Option<f64>,
    disabled: HashSet<String>,
}

pub struct OdometryService {
    config: OdometryConfig,
    transforms: Arc<dyn TransformSource>,
    pipeline: Mutex<ScanPipeline>,
    map: RwLock<OccupancyMap>,
    pose: RwLock<PoseEstimate>,
    degraded: AtomicBool,
}

impl std::fmt::Debug for OdometryService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OdometryService")
            .field("config", &self.config)
            .field("degraded", &self.degraded)
            .finish_non_exhaustive()
    }
}

impl OdometryService {
    /// Build a service resolving laser origins against `base_frame`.
    pub fn new(
        config: OdometryConfig,
        base_frame: &str,
        transforms: Arc<dyn TransformSource>,
    ) -> Result<Self, OdomError> {
        let map = OccupancyMap::new(&config)?;
        info!(
            base_frame,
            resolution = config.resolution,
            width = map.width(),
            height = map.height(),
            "odometry service ready"
        );
        Ok(Self {
            pipeline: Mutex::new(ScanPipeline {
                registry: LaserRegistry::new(base_frame, config.transform_timeout()),
                estimator: PoseEstimator::new(config.matcher.clone()),
                last_stamp: None,
                disabled: HashSet::new(),
            }),
            map: RwLock::new(map),
            pose: RwLock::new(PoseEstimate::default()),
            degraded: AtomicBool::new(false),
            transforms,
            config,
        })
    }

    pub fn config(&self) -> &OdometryConfig {
        &self.config
    }

    /// Process one scan end to end.
    ///
    /// # Errors
    ///
    /// Recoverable errors ([`OdomError::is_recoverable`]) mean "this scan was
    /// dropped"; the others mean the laser is disabled or the map could not
    /// grow.  In every error case no state has changed, apart from a laser
    /// being disabled.
    pub fn on_scan(&self, scan: &LaserScan) -> Result<ScanOutcome, OdomError> {
        validate_scan(scan, self.config.max_scan_ranges)?;

        let mut pipeline = self.pipeline.lock().unwrap_or_else(PoisonError::into_inner);

        if pipeline.disabled.contains(&scan.frame_id) {
            return Err(OdomError::LaserDisabled(scan.frame_id.clone()));
        }
        if let Some(last) = pipeline.last_stamp
            && scan.stamp < last
        {
            return Err(OdomError::OutOfOrderScan {
                stamp: scan.stamp,
                last,
            });
        }

        let laser = match pipeline.registry.register(&scan.frame_id, self.transforms.as_ref()) {
            Ok(idx) => idx,
            Err(e) if e.is_recoverable() => return Err(e),
            Err(e) => {
                error!(frame = %scan.frame_id, error = %e, "disabling laser");
                pipeline.disabled.insert(scan.frame_id.clone());
                return Err(e);
            }
        };
        let origin = pipeline
            .registry
            .origin(laser)
            .map(|o| o.origin)
            .ok_or_else(|| OdomError::LaserDisabled(scan.frame_id.clone()))?;

        let cloud = preprocess(scan, &origin, self.config.max_range, self.config.beam_step);
        if cloud.is_empty() {
            return Err(OdomError::EmptyScan(scan.frame_id.clone()));
        }

        let proposal = {
            let map = self.map.read().unwrap_or_else(PoisonError::into_inner);
            pipeline.estimator.propose(&cloud, scan.stamp, &map)
        };

        let update = {
            let mut map = self.map.write().unwrap_or_else(PoisonError::into_inner);
            map.integrate(&cloud, &proposal.pose)
        };
        let update = match update {
            Ok(stats) => stats,
            Err(e) => {
                if matches!(e, OdomError::GridResize { .. }) && !self.degraded.swap(true, Ordering::SeqCst) {
                    warn!(frame = %scan.frame_id, error = %e, "map growth refused, entering degraded mode");
                }
                return Err(e);
            }
        };

        let estimate = pipeline.estimator.commit(&proposal);
        pipeline.last_stamp = Some(scan.stamp);
        *self.pose.write().unwrap_or_else(PoisonError::into_inner) = estimate;
        if self.degraded.swap(false, Ordering::SeqCst) {
            info!("map update succeeded, leaving degraded mode");
        }

        debug!(
            frame = %scan.frame_id,
            stamp = scan.stamp,
            points = cloud.len(),
            x = estimate.pose.x,
            y = estimate.pose.y,
            heading = estimate.pose.heading,
            quality = ?proposal.quality,
            "scan committed"
        );

        Ok(ScanOutcome {
            laser,
            estimate,
            quality: proposal.quality,
            points: cloud.len(),
            update,
        })
    }

    /// Latest committed pose; identity with zero scans before the first one.
    pub fn current_pose(&self) -> PoseEstimate {
        *self.pose.read().unwrap_or_else(PoisonError::into_inner)
    }

    /// Consistent copy of the map.
    pub fn snapshot(&self) -> MapSnapshot {
        self.map.read().unwrap_or_else(PoisonError::into_inner).snapshot()
    }

    /// Registered lasers in index order.
    pub fn lasers(&self) -> Vec<LaserOrigin> {
        let pipeline = self.pipeline.lock().unwrap_or_else(PoisonError::into_inner);
        pipeline.registry.iter().cloned().collect()
    }

    pub fn is_initialized(&self) -> bool {
        let pipeline = self.pipeline.lock().unwrap_or_else(PoisonError::into_inner);
        !matches!(pipeline.estimator.state(), OdometryState::Uninitialized)
    }

    /// True after a map update was refused for lack of room, until the next
    /// successful update.
    pub fn is_degraded(&self) -> bool {
        self.degraded.load(Ordering::SeqCst)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{room_config, room_scan};
    use crate::transform::{Pose3D, Quaternion, TfBuffer, Vec3};
    use odomap_types::Pose2D;
    use std::thread;

    fn tf_with_front_laser() -> Arc<TfBuffer> {
        let tf = Arc::new(TfBuffer::new());
        tf.set_transform("base_link", "front_laser", Pose3D::identity());
        tf
    }

    fn service(cfg: OdometryConfig, tf: Arc<TfBuffer>) -> OdometryService {
        OdometryService::new(cfg, "base_link", tf).unwrap()
    }

    #[test]
    fn tracks_a_moving_laser() {
        let svc = service(room_config(), tf_with_front_laser());
        assert!(!svc.is_initialized());

        let first = svc.on_scan(&room_scan("front_laser", 0.0, &Pose2D::identity(), 720)).unwrap();
        assert_eq!(first.quality, RegistrationQuality::Seeded);
        assert_eq!(first.laser, 0);

        let truth = Pose2D::new(0.1, 0.0, 0.02);
        let second = svc.on_scan(&room_scan("front_laser", 0.1, &truth, 720)).unwrap();
        assert!(matches!(second.quality, RegistrationQuality::Converged { .. }));
        assert!(second.estimate.pose.between(&truth).translation_norm() < 1e-3);

        let pose = svc.current_pose();
        assert_eq!(pose, second.estimate);
        assert_eq!(pose.scans, 2);
        assert_eq!(svc.snapshot().updates, 2);
    }

    #[test]
    fn laser_mounting_pose_is_applied() {
        // Laser 0.2 m ahead of the base, facing backwards.
        let tf = Arc::new(TfBuffer::new());
        let mount = Pose2D::new(0.2, 0.0, std::f64::consts::PI);
        tf.set_transform("base_link", "rear_laser", Pose3D::from_pose2d(&mount));
        let svc = service(room_config(), tf);

        svc.on_scan(&room_scan("rear_laser", 0.0, &mount, 720)).unwrap();
        let base = Pose2D::new(0.05, 0.0, 0.0);
        let out = svc.on_scan(&room_scan("rear_laser", 0.1, &base.compose(&mount), 720)).unwrap();
        assert!(out.estimate.pose.between(&base).translation_norm() < 1e-3);
        assert_eq!(svc.lasers()[0].frame_id, "rear_laser");
    }

    #[test]
    fn stale_scan_is_rejected_without_side_effects() {
        let svc = service(room_config(), tf_with_front_laser());
        svc.on_scan(&room_scan("front_laser", 1.0, &Pose2D::identity(), 360)).unwrap();
        let before = svc.current_pose();

        let err = svc.on_scan(&room_scan("front_laser", 0.5, &Pose2D::identity(), 360)).unwrap_err();
        assert!(matches!(err, OdomError::OutOfOrderScan { .. }));
        assert!(err.is_recoverable());
        assert_eq!(svc.current_pose(), before);
        assert_eq!(svc.snapshot().updates, 1);
    }

    #[test]
    fn missing_transform_drops_scan_and_retries_later() {
        let tf = Arc::new(TfBuffer::new());
        let mut cfg = room_config();
        cfg.transform_timeout_ms = 5;
        let svc = service(cfg, tf.clone());

        let scan = room_scan("front_laser", 0.0, &Pose2D::identity(), 360);
        let err = svc.on_scan(&scan).unwrap_err();
        assert!(matches!(err, OdomError::UnresolvedTransform { .. }));
        assert!(!svc.is_initialized());

        tf.set_transform("base_link", "front_laser", Pose3D::identity());
        assert!(svc.on_scan(&scan).is_ok());
    }

    #[test]
    fn invalid_origin_disables_the_laser() {
        let tf = Arc::new(TfBuffer::new());
        tf.set_transform(
            "base_link",
            "broken_laser",
            Pose3D::new(Vec3::new(f64::INFINITY, 0.0, 0.0), Quaternion::identity()),
        );
        tf.set_transform("base_link", "front_laser", Pose3D::identity());
        let svc = service(room_config(), tf);

        let err = svc.on_scan(&room_scan("broken_laser", 0.0, &Pose2D::identity(), 360)).unwrap_err();
        assert!(matches!(err, OdomError::InvalidLaserOrigin { .. }));
        let err = svc.on_scan(&room_scan("broken_laser", 0.1, &Pose2D::identity(), 360)).unwrap_err();
        assert_eq!(err, OdomError::LaserDisabled("broken_laser".to_string()));

        // Other lasers keep working.
        assert!(svc.on_scan(&room_scan("front_laser", 0.2, &Pose2D::identity(), 360)).is_ok());
    }

    #[test]
    fn all_invalid_ranges_is_an_empty_scan() {
        let svc = service(room_config(), tf_with_front_laser());
        let mut scan = room_scan("front_laser", 0.0, &Pose2D::identity(), 90);
        scan.ranges.iter_mut().for_each(|r| *r = f32::NAN);
        let err = svc.on_scan(&scan).unwrap_err();
        assert_eq!(err, OdomError::EmptyScan("front_laser".to_string()));
        assert!(!svc.is_initialized());
    }

    #[test]
    fn refused_growth_leaves_state_and_sets_degraded() {
        let mut cfg = room_config();
        cfg.max_cells = 120 * 120 + 100;
        let svc = service(cfg, tf_with_front_laser());
        svc.on_scan(&room_scan("front_laser", 0.0, &Pose2D::identity(), 360)).unwrap();
        let pose_before = svc.current_pose();
        let map_before = svc.snapshot();

        // A far wall beyond the grid.
        let mut far = room_scan("front_laser", 0.1, &Pose2D::identity(), 360);
        far.ranges[10] = 25.0;
        let err = svc.on_scan(&far).unwrap_err();
        assert!(matches!(err, OdomError::GridResize { .. }));
        assert!(svc.is_degraded());
        assert_eq!(svc.current_pose(), pose_before);
        assert_eq!(svc.snapshot(), map_before);

        // The next scan that fits clears the flag.
        svc.on_scan(&room_scan("front_laser", 0.2, &Pose2D::identity(), 360)).unwrap();
        assert!(!svc.is_degraded());
        assert_eq!(svc.current_pose().scans, 2);
    }

    #[test]
    fn snapshots_taken_during_updates_are_consistent() {
        let svc = Arc::new(service(room_config(), tf_with_front_laser()));
        svc.on_scan(&room_scan("front_laser", 0.0, &Pose2D::identity(), 360)).unwrap();

        let writer = {
            let svc = Arc::clone(&svc);
            thread::spawn(move || {
                for i in 1..15 {
                    let pose = Pose2D::new(0.01 * f64::from(i), 0.0, 0.0);
                    svc.on_scan(&room_scan("front_laser", f64::from(i), &pose, 360)).unwrap();
                }
            })
        };

        let mut last_updates = 0;
        while !writer.is_finished() {
            let snap = svc.snapshot();
            assert_eq!(snap.cells.len(), snap.width * snap.height);
            assert_eq!(snap.distance.len(), snap.cells.len());
            assert!(snap.updates >= last_updates);
            last_updates = snap.updates;
        }
        writer.join().unwrap();
        assert_eq!(svc.snapshot().updates, 15);
    }
}
