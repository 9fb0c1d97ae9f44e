//! `odomap-core` – online 2-D lidar odometry and occupancy mapping.
//!
//! Registers every incoming laser scan against an incrementally built
//! occupancy grid, keeps the running platform pose, and hands out consistent
//! map snapshots while scans keep arriving.
//!
//! # Modules
//!
//! - [`transform`] – 3-D rigid transforms and [`TfBuffer`][transform::TfBuffer],
//!   the bounded-wait frame graph behind the
//!   [`TransformSource`][transform::TransformSource] seam.
//! - [`registry`] – [`LaserRegistry`][registry::LaserRegistry]: frame id →
//!   cached laser mounting pose.
//! - [`preprocess`] – range filtering, beam subsampling and projection into
//!   the base frame.
//! - [`grid`] – [`OccupancyMap`][grid::OccupancyMap]: log-odds arena grid with
//!   auto-resize and a truncated distance field; [`MapSnapshot`][grid::MapSnapshot].
//! - [`raycast`] / [`distance`] – Bresenham traversal and the exact distance
//!   transform used by the grid.
//! - [`matcher`] – correlative search + damped Gauss–Newton registration.
//! - [`estimator`] – the odometry state machine (propose / commit).
//! - [`service`] – [`OdometryService`][service::OdometryService]: the
//!   thread-safe facade the node layer talks to.
//! - [`config`] – tunables with serde defaults.

pub mod config;
pub mod distance;
pub mod estimator;
pub mod grid;
pub mod matcher;
pub mod preprocess;
pub mod raycast;
pub mod registry;
pub mod service;
pub mod transform;

#[cfg(test)]
pub(crate) mod test_support;

pub use config::{LogOddsConfig, MatcherConfig, OdometryConfig};
pub use estimator::RegistrationQuality;
pub use grid::{CellState, MapSnapshot};
pub use service::{OdometryService, ScanOutcome};
pub use transform::{Pose3D, TfBuffer, TransformSource};
