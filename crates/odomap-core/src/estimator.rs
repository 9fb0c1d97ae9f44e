//! Odometry state machine.
//!
//! ```text
//!   Uninitialized ──first scan──▶ Tracking { pose, last_motion, .. } ──▶ Tracking …
//! ```
//!
//! The first scan defines the odometry origin and seeds the map; every later
//! scan is registered against the map, starting from a constant-velocity
//! guess.  Work is split into [`PoseEstimator::propose`], which reads the map
//! and changes nothing, and [`PoseEstimator::commit`], which is only called
//! once the map update for the same scan has succeeded.

use odomap_types::{Pose2D, PoseEstimate};
use tracing::warn;

use crate::config::MatcherConfig;
use crate::grid::OccupancyMap;
use crate::matcher::ScanMatcher;
use crate::preprocess::ScanCloud;

#[derive(Debug, Clone, PartialEq)]
pub enum OdometryState {
    Uninitialized,
    Tracking {
        pose: Pose2D,
        /// Motion between the last two committed poses; `None` after the first scan.
        last_motion: Option<Pose2D>,
        stamp: f64,
        scans: u64,
    },
}

/// How a proposed pose was obtained.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RegistrationQuality {
    /// First scan; nothing to register against.
    Seeded,
    Converged { iterations: usize },
    Diverged { iterations: usize },
}

impl RegistrationQuality {
    pub fn is_low_confidence(&self) -> bool {
        matches!(self, RegistrationQuality::Diverged { .. })
    }
}

/// A pose ready to be committed once the map accepted the scan.
#[derive(Debug, Clone, PartialEq)]
pub struct Proposal {
    pub pose: Pose2D,
    pub covariance: [f64; 9],
    pub quality: RegistrationQuality,
    pub stamp: f64,
    /// Mean match likelihood; 1.0 for a seeded scan.
    pub score: f64,
}

#[derive(Debug)]
pub struct PoseEstimator {
    state: OdometryState,
    matcher: ScanMatcher,
}

impl PoseEstimator {
    pub fn new(config: MatcherConfig) -> Self {
        Self {
            state: OdometryState::Uninitialized,
            matcher: ScanMatcher::new(config),
        }
    }

    pub fn state(&self) -> &OdometryState {
        &self.state
    }

    /// Last committed pose, if any.
    pub fn pose(&self) -> Option<Pose2D> {
        match &self.state {
            OdometryState::Uninitialized => None,
            OdometryState::Tracking { pose, .. } => Some(*pose),
        }
    }

    /// Constant-velocity prediction for the next scan.
    pub fn initial_guess(&self) -> Option<Pose2D> {
        match &self.state {
            OdometryState::Uninitialized => None,
            OdometryState::Tracking { pose, last_motion, .. } => {
                Some(pose.compose(&last_motion.unwrap_or_else(Pose2D::identity)))
            }
        }
    }

    /// Estimate the pose of `cloud` without touching any state.
    pub fn propose(&self, cloud: &ScanCloud, stamp: f64, map: &OccupancyMap) -> Proposal {
        let Some(guess) = self.initial_guess() else {
            return Proposal {
                pose: Pose2D::identity(),
                covariance: [0.0; 9],
                quality: RegistrationQuality::Seeded,
                stamp,
                score: 1.0,
            };
        };

        let result = self.matcher.match_scan(&cloud.points, &guess, map);
        let quality = if result.converged {
            RegistrationQuality::Converged {
                iterations: result.iterations,
            }
        } else {
            warn!(
                stamp,
                iterations = result.iterations,
                matched = result.matched,
                score = result.score,
                "registration did not converge, keeping best pose"
            );
            RegistrationQuality::Diverged {
                iterations: result.iterations,
            }
        };

        Proposal {
            pose: result.pose,
            covariance: result.covariance,
            quality,
            stamp,
            score: result.score,
        }
    }

    /// Make `proposal` the running pose.
    pub fn commit(&mut self, proposal: &Proposal) -> PoseEstimate {
        let pose = Pose2D::new(proposal.pose.x, proposal.pose.y, proposal.pose.heading);
        let (last_motion, scans) = match &self.state {
            OdometryState::Uninitialized => (None, 1),
            OdometryState::Tracking { pose: prev, scans, .. } => (Some(prev.between(&pose)), scans + 1),
        };
        self.state = OdometryState::Tracking {
            pose,
            last_motion,
            stamp: proposal.stamp,
            scans,
        };
        PoseEstimate {
            pose,
            covariance: proposal.covariance,
            low_confidence: proposal.quality.is_low_confidence(),
            stamp: proposal.stamp,
            scans,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{room_config, room_points, seeded_room_map};
    use odomap_types::Point2;

    fn cloud_at(pose: &Pose2D) -> ScanCloud {
        ScanCloud {
            origin: Point2::new(0.0, 0.0),
            points: room_points(pose, 720),
        }
    }

    #[test]
    fn first_scan_seeds_at_identity() {
        let cfg = room_config();
        let map = OccupancyMap::new(&cfg).unwrap();
        let mut est = PoseEstimator::new(cfg.matcher.clone());
        assert_eq!(est.state(), &OdometryState::Uninitialized);
        assert_eq!(est.initial_guess(), None);

        let proposal = est.propose(&cloud_at(&Pose2D::identity()), 0.0, &map);
        assert_eq!(proposal.quality, RegistrationQuality::Seeded);
        // Proposing is free of side effects.
        assert_eq!(est.state(), &OdometryState::Uninitialized);

        let estimate = est.commit(&proposal);
        assert_eq!(estimate.pose, Pose2D::identity());
        assert_eq!(estimate.scans, 1);
        assert!(!estimate.low_confidence);
        assert!(matches!(est.state(), OdometryState::Tracking { last_motion: None, .. }));
    }

    #[test]
    fn tracks_motion_and_extrapolates() {
        let cfg = room_config();
        let map = seeded_room_map(&cfg);
        let mut est = PoseEstimator::new(cfg.matcher.clone());
        est.commit(&est.propose(&cloud_at(&Pose2D::identity()), 0.0, &map));

        let step = Pose2D::new(0.05, 0.0, 0.01);
        let p1 = step;
        let estimate = est.commit(&est.propose(&cloud_at(&p1), 0.1, &map));
        assert!(estimate.pose.between(&p1).translation_norm() < 1e-3);
        assert_eq!(estimate.scans, 2);

        // Next guess continues the last motion.
        let guess = est.initial_guess().unwrap();
        let expected = p1.compose(&step);
        assert!(guess.between(&expected).translation_norm() < 2e-3);
        assert!((guess.heading - expected.heading).abs() < 2e-3);
    }

    #[test]
    fn committed_heading_stays_normalized() {
        let cfg = room_config();
        let map = OccupancyMap::new(&cfg).unwrap();
        let mut est = PoseEstimator::new(cfg.matcher.clone());
        let proposal = Proposal {
            pose: Pose2D {
                x: 0.0,
                y: 0.0,
                heading: 7.0,
            },
            covariance: [0.0; 9],
            quality: RegistrationQuality::Seeded,
            stamp: 0.0,
            score: 1.0,
        };
        let estimate = est.commit(&proposal);
        assert!(estimate.pose.heading > -std::f64::consts::PI);
        assert!(estimate.pose.heading <= std::f64::consts::PI);

        // Keep turning by 1.7 rad per scan; the committed heading must wrap.
        for i in 1..20 {
            let mut p = est.propose(&cloud_at(&Pose2D::identity()), f64::from(i), &map);
            p.pose.heading += 1.7;
            let estimate = est.commit(&p);
            assert!(estimate.pose.heading > -std::f64::consts::PI);
            assert!(estimate.pose.heading <= std::f64::consts::PI);
        }
    }

    #[test]
    fn diverged_registration_is_low_confidence() {
        let cfg = room_config();
        let empty = OccupancyMap::new(&cfg).unwrap();
        let mut est = PoseEstimator::new(cfg.matcher.clone());
        est.commit(&est.propose(&cloud_at(&Pose2D::identity()), 0.0, &empty));

        let proposal = est.propose(&cloud_at(&Pose2D::identity()), 1.0, &empty);
        assert!(matches!(proposal.quality, RegistrationQuality::Diverged { .. }));
        let estimate = est.commit(&proposal);
        assert!(estimate.low_confidence);
        assert!(estimate.covariance[0] > 1.0);
    }
}
