//! Tunables for the odometry core.
//!
//! Every field has a serde default so a partial TOML table (or none at all)
//! yields a working configuration.  The node layer flattens
//! [`OdometryConfig`] into its own file format.

use std::time::Duration;

use odomap_types::OdomError;
use serde::{Deserialize, Serialize};

/// Log-odds increments and thresholds for the occupancy grid.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LogOddsConfig {
    /// Added to a cell at a ray endpoint.
    pub l_hit: f32,
    /// Added to a cell a ray passes through.
    pub l_miss: f32,
    pub l_min: f32,
    pub l_max: f32,
    pub occupied_threshold: f32,
    pub free_threshold: f32,
}

impl Default for LogOddsConfig {
    fn default() -> Self {
        Self {
            l_hit: 0.85,
            l_miss: -0.4,
            l_min: -2.0,
            l_max: 3.5,
            occupied_threshold: 0.5,
            free_threshold: -0.3,
        }
    }
}

/// Search window and convergence settings for scan-to-map registration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MatcherConfig {
    /// Half-width of the translational search window (metres).
    pub search_linear: f64,
    /// Half-width of the rotational search window (radians).
    pub search_angular: f64,
    pub linear_step: f64,
    pub angular_step: f64,
    /// Width of the Gaussian used to score candidates (metres).
    pub sigma: f64,
    /// Refinement budget.
    pub max_iterations: usize,
    /// Convergence threshold on the translational correction (metres).
    pub translation_epsilon: f64,
    /// Convergence threshold on the rotational correction (radians).
    pub rotation_epsilon: f64,
    /// Fewer points near an obstacle than this means the match is unreliable.
    pub min_matched_points: usize,
    /// Covariance multiplier applied when registration does not converge.
    pub divergence_covariance_scale: f64,
}

impl Default for MatcherConfig {
    fn default() -> Self {
        Self {
            search_linear: 0.1,
            search_angular: 0.05,
            linear_step: 0.025,
            angular_step: 0.01,
            sigma: 0.05,
            max_iterations: 20,
            translation_epsilon: 1e-3,
            rotation_epsilon: 1e-3,
            min_matched_points: 10,
            divergence_covariance_scale: 100.0,
        }
    }
}

/// Configuration of the whole odometry pipeline.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct OdometryConfig {
    /// Ranges beyond this are discarded even if the sensor reports them valid.
    pub max_range: f64,
    /// Use every `beam_step`-th beam.
    pub beam_step: usize,
    /// Metres per grid cell.
    pub resolution: f64,
    /// Side of the square pre-allocated around the origin (metres).
    pub initial_size: f64,
    /// Padding added around the required extent when the grid grows (metres).
    pub growth_margin: f64,
    /// Upper bound on the number of grid cells.
    pub max_cells: usize,
    /// Distance field truncation (metres).
    pub max_distance: f64,
    /// Bounded wait for a new laser's mounting transform.
    pub transform_timeout_ms: u64,
    /// Scans with more samples than this are rejected.
    pub max_scan_ranges: usize,
    pub log_odds: LogOddsConfig,
    pub matcher: MatcherConfig,
}

impl Default for OdometryConfig {
    fn default() -> Self {
        Self {
            max_range: 30.0,
            beam_step: 1,
            resolution: 0.05,
            initial_size: 20.0,
            growth_margin: 5.0,
            max_cells: 16_000_000,
            max_distance: 0.5,
            transform_timeout_ms: 200,
            max_scan_ranges: 8192,
            log_odds: LogOddsConfig::default(),
            matcher: MatcherConfig::default(),
        }
    }
}

impl OdometryConfig {
    pub fn transform_timeout(&self) -> Duration {
        Duration::from_millis(self.transform_timeout_ms)
    }

    /// Reject settings the core cannot run with.
    pub fn validate(&self) -> Result<(), OdomError> {
        let positive = [
            ("max_range", self.max_range),
            ("resolution", self.resolution),
            ("initial_size", self.initial_size),
            ("max_distance", self.max_distance),
            ("matcher.linear_step", self.matcher.linear_step),
            ("matcher.angular_step", self.matcher.angular_step),
            ("matcher.sigma", self.matcher.sigma),
            ("matcher.translation_epsilon", self.matcher.translation_epsilon),
            ("matcher.rotation_epsilon", self.matcher.rotation_epsilon),
        ];
        for (name, value) in positive {
            if !(value.is_finite() && value > 0.0) {
                return Err(OdomError::Config(format!("{name} must be positive, got {value}")));
            }
        }
        if !(self.growth_margin.is_finite() && self.growth_margin >= 0.0) {
            return Err(OdomError::Config("growth_margin must be >= 0".to_string()));
        }
        if self.matcher.search_linear < 0.0 || self.matcher.search_angular < 0.0 {
            return Err(OdomError::Config("matcher search windows must be >= 0".to_string()));
        }
        if self.beam_step == 0 {
            return Err(OdomError::Config("beam_step must be at least 1".to_string()));
        }
        if self.max_cells == 0 {
            return Err(OdomError::Config("max_cells must be at least 1".to_string()));
        }
        let lo = &self.log_odds;
        if !(lo.l_hit > 0.0 && lo.l_miss < 0.0) {
            return Err(OdomError::Config("l_hit must be > 0 and l_miss < 0".to_string()));
        }
        if !(lo.l_min < lo.free_threshold
            && lo.free_threshold < lo.occupied_threshold
            && lo.occupied_threshold < lo.l_max)
        {
            return Err(OdomError::Config(
                "expected l_min < free_threshold < occupied_threshold < l_max".to_string(),
            ));
        }
        Ok(())
    }
}
