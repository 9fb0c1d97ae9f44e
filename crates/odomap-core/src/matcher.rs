//! Scan-to-map registration.
//!
//! Two stages:
//!
//! 1. **Correlative search** – every pose on a small lattice around the
//!    initial guess is scored by the mean Gaussian likelihood
//!    `exp(-d² / 2σ²)` of its transformed points, where `d` is the map's
//!    interpolated distance to the nearest obstacle.  Equal scores resolve
//!    towards the guess.
//! 2. **Refinement** – Levenberg–Marquardt damped Gauss–Newton on
//!    `Σ min(d, max_distance)²`, starting from the best lattice pose.
//!
//! Failing to converge is not an error.  The best pose found is returned
//! with `converged = false` and an inflated covariance so the caller can
//! flag the estimate.

use odomap_types::{Point2, Pose2D};
use tracing::trace;

use crate::config::MatcherConfig;
use crate::grid::OccupancyMap;

/// Covariance used when the normal equations give nothing usable.
const FALLBACK_COVARIANCE: [f64; 9] = [1.0, 0.0, 0.0, 0.0, 1.0, 0.0, 0.0, 0.0, 0.25];

/// Lower bound on the residual variance.
const MIN_VARIANCE: f64 = 1e-6;

/// Scores closer than this count as a tie.
const SCORE_TIE: f64 = 1e-9;

/// Outcome of one registration.
#[derive(Debug, Clone, PartialEq)]
pub struct MatchResult {
    pub pose: Pose2D,
    pub converged: bool,
    /// Refinement iterations spent.
    pub iterations: usize,
    /// Mean Gaussian likelihood at `pose`, in `[0, 1]`.
    pub score: f64,
    /// Points closer than `max_distance` to an obstacle at `pose`.
    pub matched: usize,
    /// Row-major covariance over (x, y, heading).
    pub covariance: [f64; 9],
}

#[derive(Debug, Clone)]
pub struct ScanMatcher {
    config: MatcherConfig,
}

impl ScanMatcher {
    pub fn new(config: MatcherConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &MatcherConfig {
        &self.config
    }

    /// Register base-frame `points` against `map`, starting at `guess`.
    pub fn match_scan(&self, points: &[Point2], guess: &Pose2D, map: &OccupancyMap) -> MatchResult {
        let (start, search_score) = self.correlative_search(points, guess, map);
        trace!(
            x = start.x,
            y = start.y,
            heading = start.heading,
            score = search_score,
            "correlative search"
        );
        self.refine(points, start, map)
    }

    /// Mean Gaussian likelihood of `points` placed at `pose`.
    pub fn score(&self, points: &[Point2], pose: &Pose2D, map: &OccupancyMap) -> f64 {
        if points.is_empty() {
            return 0.0;
        }
        let k = 1.0 / (2.0 * self.config.sigma * self.config.sigma);
        let total: f64 = points
            .iter()
            .map(|p| {
                let (d, _, _) = map.interpolated_distance(pose.transform_point(*p));
                (-d * d * k).exp()
            })
            .sum();
        total / points.len() as f64
    }

    fn correlative_search(&self, points: &[Point2], guess: &Pose2D, map: &OccupancyMap) -> (Pose2D, f64) {
        let cfg = &self.config;
        let n_lin = (cfg.search_linear / cfg.linear_step).round() as i32;
        let n_ang = (cfg.search_angular / cfg.angular_step).round() as i32;

        let mut best = *guess;
        let mut best_score = self.score(points, guess, map);
        let mut best_offset = 0.0;

        for a in -n_ang..=n_ang {
            let dtheta = f64::from(a) * cfg.angular_step;
            let heading = guess.heading + dtheta;
            let (s, c) = heading.sin_cos();
            let rotated: Vec<Point2> = points
                .iter()
                .map(|p| Point2::new(c * p.x - s * p.y, s * p.x + c * p.y))
                .collect();

            for i in -n_lin..=n_lin {
                for j in -n_lin..=n_lin {
                    let dx = f64::from(i) * cfg.linear_step;
                    let dy = f64::from(j) * cfg.linear_step;
                    let candidate = Pose2D::new(guess.x + dx, guess.y + dy, heading);
                    let offset = dx.hypot(dy) + dtheta.abs();

                    let translated = Pose2D::new(candidate.x, candidate.y, 0.0);
                    let score = self.score(&rotated, &translated, map);
                    let better = score > best_score + SCORE_TIE
                        || (score > best_score - SCORE_TIE && offset < best_offset);
                    if better {
                        best = candidate;
                        best_score = score;
                        best_offset = offset;
                    }
                }
            }
        }
        (best, best_score)
    }

    fn refine(&self, points: &[Point2], start: Pose2D, map: &OccupancyMap) -> MatchResult {
        let cfg = &self.config;
        let mut pose = start;
        let mut system = NormalEquations::build(points, &pose, map);
        let mut lambda = 1e-3;
        let mut iterations = 0;
        let mut converged = false;

        while iterations < cfg.max_iterations {
            iterations += 1;
            if system.matched < cfg.min_matched_points {
                break;
            }

            let mut damped = system.h;
            for i in 0..3 {
                damped[i * 4] += lambda * system.h[i * 4].max(1e-9);
            }
            let Some(step) = solve3(&damped, &system.b.map(|v| -v)) else {
                break;
            };

            let small = step[0].hypot(step[1]) < cfg.translation_epsilon
                && step[2].abs() < cfg.rotation_epsilon;

            let candidate = Pose2D::new(pose.x + step[0], pose.y + step[1], pose.heading + step[2]);
            let next = NormalEquations::build(points, &candidate, map);
            if next.cost < system.cost {
                pose = candidate;
                system = next;
                lambda = (lambda * 0.1).max(1e-9);
            } else {
                lambda *= 10.0;
            }

            if small {
                converged = true;
                break;
            }
        }

        if system.matched < cfg.min_matched_points {
            converged = false;
        }

        let covariance = match (system.matched > 3, invert3(&system.h)) {
            (true, Some(inv)) => {
                let variance = (system.cost / (system.matched - 3) as f64).max(MIN_VARIANCE);
                inv.map(|v| v * variance)
            }
            _ => {
                converged = false;
                FALLBACK_COVARIANCE
            }
        };
        let covariance = if converged {
            covariance
        } else {
            covariance.map(|v| v * cfg.divergence_covariance_scale)
        };

        MatchResult {
            pose,
            converged,
            iterations,
            score: self.score(points, &pose, map),
            matched: system.matched,
            covariance,
        }
    }
}

// ────────────────────────────────────────────────────────────────────────────
// Gauss–Newton helpers
// ────────────────────────────────────────────────────────────────────────────

/// `JᵀJ`, `Jᵀr` and the cost of the residuals at one pose.
struct NormalEquations {
    h: [f64; 9],
    b: [f64; 3],
    cost: f64,
    matched: usize,
}

impl NormalEquations {
    fn build(points: &[Point2], pose: &Pose2D, map: &OccupancyMap) -> Self {
        let max_d = map.max_distance();
        let (s, c) = pose.heading.sin_cos();
        let mut h = [0.0; 9];
        let mut b = [0.0; 3];
        let mut cost = 0.0;
        let mut matched = 0;

        for p in points {
            let world = pose.transform_point(*p);
            let (d, gx, gy) = map.interpolated_distance(world);
            if d >= max_d {
                cost += max_d * max_d;
                continue;
            }
            matched += 1;
            cost += d * d;

            // ∂world/∂heading
            let wx = -s * p.x - c * p.y;
            let wy = c * p.x - s * p.y;
            let j = [gx, gy, gx * wx + gy * wy];
            for r in 0..3 {
                b[r] += j[r] * d;
                for col in 0..3 {
                    h[r * 3 + col] += j[r] * j[col];
                }
            }
        }
        Self { h, b, cost, matched }
    }
}

fn det3(m: &[f64; 9]) -> f64 {
    m[0] * (m[4] * m[8] - m[5] * m[7]) - m[1] * (m[3] * m[8] - m[5] * m[6])
        + m[2] * (m[3] * m[7] - m[4] * m[6])
}

fn invert3(m: &[f64; 9]) -> Option<[f64; 9]> {
    let det = det3(m);
    let scale = m.iter().fold(0.0_f64, |acc, v| acc.max(v.abs()));
    if !det.is_finite() || scale == 0.0 || det.abs() <= 1e-12 * scale * scale * scale {
        return None;
    }
    let inv_det = 1.0 / det;
    Some([
        (m[4] * m[8] - m[5] * m[7]) * inv_det,
        (m[2] * m[7] - m[1] * m[8]) * inv_det,
        (m[1] * m[5] - m[2] * m[4]) * inv_det,
        (m[5] * m[6] - m[3] * m[8]) * inv_det,
        (m[0] * m[8] - m[2] * m[6]) * inv_det,
        (m[2] * m[3] - m[0] * m[5]) * inv_det,
        (m[3] * m[7] - m[4] * m[6]) * inv_det,
        (m[1] * m[6] - m[0] * m[7]) * inv_det,
        (m[0] * m[4] - m[1] * m[3]) * inv_det,
    ])
}

fn solve3(m: &[f64; 9], v: &[f64; 3]) -> Option<[f64; 3]> {
    let inv = invert3(m)?;
    Some([
        inv[0] * v[0] + inv[1] * v[1] + inv[2] * v[2],
        inv[3] * v[0] + inv[4] * v[1] + inv[5] * v[2],
        inv[6] * v[0] + inv[7] * v[1] + inv[8] * v[2],
    ])
}
