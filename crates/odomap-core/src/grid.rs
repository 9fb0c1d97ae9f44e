//! Log-odds occupancy grid with an attached distance field.
//!
//! # Layout
//!
//! Cells are addressed by a global [`CellIndex`]: world point `p` lives in
//! cell `(floor(p.x / res), floor(p.y / res))`, so cell `(0, 0)` has its
//! lower-left corner on the odometry origin.  Storage is a dense row-major
//! arena covering the inclusive rectangle `min ..= min + (width, height) - 1`.
//!
//! ```text
//!   global y
//!      ▲    ┌───────────────┐ ← min + (width-1, height-1)
//!      │    │               │
//!      │    │   (0,0)■      │
//!      │    │               │
//!      │    └───────────────┘
//!      │    ↑ min
//!      └──────────────────────▶ global x
//! ```
//!
//! Growing the grid allocates a larger arena and copies every row to its
//! translated position.  Global indices never change, so every cell keeps
//! its world coordinates across resizes.
//!
//! # Update rule
//!
//! [`OccupancyMap::integrate`] casts one Bresenham ray per beam.  Cells the
//! ray passes through get one `l_miss` per scan, endpoint cells one `l_hit`
//! per scan, and an endpoint is never also treated as free in the same scan.
//! Values are clamped to `[l_min, l_max]`.
//!
//! # Distance field
//!
//! Every cell stores the Euclidean distance (metres) to the nearest occupied
//! cell, truncated at `max_distance`.  After each update only the window
//! around cells whose occupancy flipped is recomputed.

use std::collections::HashSet;

use odomap_types::{OdomError, Point2, Pose2D};
use tracing::{debug, info};

use crate::config::{LogOddsConfig, OdometryConfig};
use crate::distance::squared_edt;
use crate::preprocess::ScanCloud;
use crate::raycast::traversed_cells;

// ────────────────────────────────────────────────────────────────────────────
// Cell addressing
// ────────────────────────────────────────────────────────────────────────────

/// Global integer cell coordinate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct CellIndex {
    pub x: i32,
    pub y: i32,
}

impl CellIndex {
    pub fn new(x: i32, y: i32) -> Self {
        Self { x, y }
    }

    fn min_each(self, other: Self) -> Self {
        Self::new(self.x.min(other.x), self.y.min(other.y))
    }

    fn max_each(self, other: Self) -> Self {
        Self::new(self.x.max(other.x), self.y.max(other.y))
    }
}

/// Inclusive cell rectangle currently backed by storage.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GridBounds {
    pub min: CellIndex,
    pub max: CellIndex,
}

impl GridBounds {
    pub fn contains(&self, c: CellIndex) -> bool {
        c.x >= self.min.x && c.x <= self.max.x && c.y >= self.min.y && c.y <= self.max.y
    }
}

/// Externally visible occupancy of a cell.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CellState {
    Unknown,
    Free,
    Occupied,
}

/// What one call to [`OccupancyMap::integrate`] did.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct IntegrateStats {
    /// Distinct endpoint cells updated.
    pub hits: usize,
    /// Distinct traversed cells updated.
    pub misses: usize,
    /// The arena grew to fit the scan.
    pub resized: bool,
}

// ────────────────────────────────────────────────────────────────────────────
// OccupancyMap
// ────────────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone)]
pub struct OccupancyMap {
    resolution: f64,
    log_odds_cfg: LogOddsConfig,
    max_distance: f64,
    /// Truncation radius in cells.
    truncation: i32,
    growth: i32,
    max_cells: usize,
    min: CellIndex,
    width: usize,
    height: usize,
    log_odds: Vec<f32>,
    observed: Vec<bool>,
    distance: Vec<f32>,
    updates: u64,
}

impl OccupancyMap {
    /// Allocate a square grid of `initial_size` metres centred on the origin.
    pub fn new(config: &OdometryConfig) -> Result<Self, OdomError> {
        config.validate()?;
        let res = config.resolution;
        let half = ((config.initial_size / 2.0) / res).ceil().max(1.0) as i32;
        let side = 2 * half as usize;
        let required = side * side;
        if required > config.max_cells {
            return Err(OdomError::GridResize {
                required_cells: required,
                max_cells: config.max_cells,
            });
        }

        Ok(Self {
            resolution: res,
            log_odds_cfg: config.log_odds.clone(),
            max_distance: config.max_distance,
            truncation: (config.max_distance / res).ceil() as i32,
            growth: (config.growth_margin / res).ceil() as i32,
            max_cells: config.max_cells,
            min: CellIndex::new(-half, -half),
            width: side,
            height: side,
            log_odds: vec![0.0; required],
            observed: vec![false; required],
            distance: vec![config.max_distance as f32; required],
            updates: 0,
        })
    }

    pub fn resolution(&self) -> f64 {
        self.resolution
    }

    pub fn width(&self) -> usize {
        self.width
    }

    pub fn height(&self) -> usize {
        self.height
    }

    pub fn cell_count(&self) -> usize {
        self.width * self.height
    }

    pub fn max_distance(&self) -> f64 {
        self.max_distance
    }

    /// Number of scans integrated so far.
    pub fn updates(&self) -> u64 {
        self.updates
    }

    pub fn bounds(&self) -> GridBounds {
        GridBounds {
            min: self.min,
            max: CellIndex::new(
                self.min.x + self.width as i32 - 1,
                self.min.y + self.height as i32 - 1,
            ),
        }
    }

    pub fn cell_of(&self, p: Point2) -> CellIndex {
        CellIndex::new(
            (p.x / self.resolution).floor() as i32,
            (p.y / self.resolution).floor() as i32,
        )
    }

    pub fn cell_center(&self, c: CellIndex) -> Point2 {
        Point2::new(
            (f64::from(c.x) + 0.5) * self.resolution,
            (f64::from(c.y) + 0.5) * self.resolution,
        )
    }

    fn index(&self, c: CellIndex) -> Option<usize> {
        let lx = i64::from(c.x) - i64::from(self.min.x);
        let ly = i64::from(c.y) - i64::from(self.min.y);
        if lx < 0 || ly < 0 || lx >= self.width as i64 || ly >= self.height as i64 {
            return None;
        }
        Some(ly as usize * self.width + lx as usize)
    }

    /// Log-odds of a cell, `None` outside the grid.
    pub fn log_odds(&self, c: CellIndex) -> Option<f32> {
        self.index(c).map(|i| self.log_odds[i])
    }

    pub fn state(&self, c: CellIndex) -> CellState {
        self.index(c)
            .map_or(CellState::Unknown, |i| self.state_of(i))
    }

    fn state_of(&self, i: usize) -> CellState {
        if !self.observed[i] {
            return CellState::Unknown;
        }
        let l = self.log_odds[i];
        if l >= self.log_odds_cfg.occupied_threshold {
            CellState::Occupied
        } else if l <= self.log_odds_cfg.free_threshold {
            CellState::Free
        } else {
            CellState::Unknown
        }
    }

    fn is_occupied(&self, i: usize) -> bool {
        self.observed[i] && self.log_odds[i] >= self.log_odds_cfg.occupied_threshold
    }

    /// Distance (metres) from a cell to the nearest occupied cell.
    ///
    /// Cells outside the grid report `max_distance`.
    pub fn distance_at(&self, c: CellIndex) -> f64 {
        self.index(c)
            .map_or(self.max_distance, |i| f64::from(self.distance[i]))
    }

    /// Bilinearly interpolated distance at `p` and its gradient `(∂d/∂x, ∂d/∂y)`.
    ///
    /// Samples sit at cell centres.
    pub fn interpolated_distance(&self, p: Point2) -> (f64, f64, f64) {
        let u = p.x / self.resolution - 0.5;
        let v = p.y / self.resolution - 0.5;
        let x0 = u.floor();
        let y0 = v.floor();
        let tx = u - x0;
        let ty = v - y0;
        let (x0, y0) = (x0 as i32, y0 as i32);

        let d00 = self.distance_at(CellIndex::new(x0, y0));
        let d10 = self.distance_at(CellIndex::new(x0 + 1, y0));
        let d01 = self.distance_at(CellIndex::new(x0, y0 + 1));
        let d11 = self.distance_at(CellIndex::new(x0 + 1, y0 + 1));

        let d = (1.0 - tx) * (1.0 - ty) * d00
            + tx * (1.0 - ty) * d10
            + (1.0 - tx) * ty * d01
            + tx * ty * d11;
        let du = (1.0 - ty) * (d10 - d00) + ty * (d11 - d01);
        let dv = (1.0 - tx) * (d01 - d00) + tx * (d11 - d10);
        (d, du / self.resolution, dv / self.resolution)
    }

    // ── update ──────────────────────────────────────────────────────────────

    /// Fold one scan, taken at `pose`, into the grid.
    ///
    /// # Errors
    ///
    /// [`OdomError::GridResize`] when covering the scan would need more than
    /// `max_cells` cells.  The grid is left exactly as it was.
    pub fn integrate(&mut self, cloud: &ScanCloud, pose: &Pose2D) -> Result<IntegrateStats, OdomError> {
        let start = self.cell_of(pose.transform_point(cloud.origin));
        let ends: Vec<CellIndex> = cloud
            .points
            .iter()
            .map(|p| self.cell_of(pose.transform_point(*p)))
            .collect();

        let (lo, hi) = ends
            .iter()
            .fold((start, start), |(lo, hi), &c| (lo.min_each(c), hi.max_each(c)));
        let resized = self.ensure_extent(lo, hi)?;

        let hits: HashSet<CellIndex> = ends.iter().copied().collect();
        let mut free: HashSet<CellIndex> = HashSet::new();
        for &end in &ends {
            free.extend(traversed_cells(start, end).filter(|c| !hits.contains(c)));
        }

        let l_miss = self.log_odds_cfg.l_miss;
        let l_hit = self.log_odds_cfg.l_hit;
        let mut flipped: Option<(CellIndex, CellIndex)> = None;
        for (cells, delta) in [(&free, l_miss), (&hits, l_hit)] {
            for &c in cells {
                if self.apply(c, delta) {
                    flipped = Some(match flipped {
                        Some((a, b)) => (a.min_each(c), b.max_each(c)),
                        None => (c, c),
                    });
                }
            }
        }

        self.updates += 1;
        if resized {
            self.refresh_distance_full();
        } else if let Some((a, b)) = flipped {
            self.refresh_distance(a, b);
        }

        let stats = IntegrateStats {
            hits: hits.len(),
            misses: free.len(),
            resized,
        };
        debug!(
            hits = stats.hits,
            misses = stats.misses,
            resized,
            updates = self.updates,
            "integrated scan"
        );
        Ok(stats)
    }

    /// Add `delta` to a cell; returns true when its occupied flag flipped.
    fn apply(&mut self, c: CellIndex, delta: f32) -> bool {
        let Some(i) = self.index(c) else {
            return false;
        };
        let before = self.is_occupied(i);
        self.log_odds[i] =
            (self.log_odds[i] + delta).clamp(self.log_odds_cfg.l_min, self.log_odds_cfg.l_max);
        self.observed[i] = true;
        before != self.is_occupied(i)
    }

    /// Grow the arena so it covers `lo ..= hi`. Returns whether it grew.
    fn ensure_extent(&mut self, lo: CellIndex, hi: CellIndex) -> Result<bool, OdomError> {
        let bounds = self.bounds();
        if bounds.contains(lo) && bounds.contains(hi) {
            return Ok(false);
        }

        let g = i64::from(self.growth);
        let new_min_x = i64::from(bounds.min.x).min(i64::from(lo.x) - g);
        let new_min_y = i64::from(bounds.min.y).min(i64::from(lo.y) - g);
        let new_max_x = i64::from(bounds.max.x).max(i64::from(hi.x) + g);
        let new_max_y = i64::from(bounds.max.y).max(i64::from(hi.y) + g);
        let w = new_max_x - new_min_x + 1;
        let h = new_max_y - new_min_y + 1;
        let required = w.saturating_mul(h);
        if required > self.max_cells as i64
            || new_min_x < i64::from(i32::MIN)
            || new_max_x > i64::from(i32::MAX)
            || new_min_y < i64::from(i32::MIN)
            || new_max_y > i64::from(i32::MAX)
        {
            return Err(OdomError::GridResize {
                required_cells: usize::try_from(required).unwrap_or(usize::MAX),
                max_cells: self.max_cells,
            });
        }

        let (w, h) = (w as usize, h as usize);
        let ox = (i64::from(bounds.min.x) - new_min_x) as usize;
        let oy = (i64::from(bounds.min.y) - new_min_y) as usize;

        let mut log_odds = vec![0.0; w * h];
        let mut observed = vec![false; w * h];
        let mut distance = vec![self.max_distance as f32; w * h];
        for y in 0..self.height {
            let src = y * self.width..(y + 1) * self.width;
            let dst = (y + oy) * w + ox;
            log_odds[dst..dst + self.width].copy_from_slice(&self.log_odds[src.clone()]);
            observed[dst..dst + self.width].copy_from_slice(&self.observed[src.clone()]);
            distance[dst..dst + self.width].copy_from_slice(&self.distance[src]);
        }

        info!(
            old_width = self.width,
            old_height = self.height,
            width = w,
            height = h,
            min_x = new_min_x,
            min_y = new_min_y,
            "occupancy grid resized"
        );

        self.min = CellIndex::new(new_min_x as i32, new_min_y as i32);
        self.width = w;
        self.height = h;
        self.log_odds = log_odds;
        self.observed = observed;
        self.distance = distance;
        Ok(true)
    }

    fn refresh_distance_full(&mut self) {
        let seeds: Vec<bool> = (0..self.cell_count()).map(|i| self.is_occupied(i)).collect();
        let sq = squared_edt(&seeds, self.width, self.height);
        let res = self.resolution;
        let max = self.max_distance;
        for (d, s) in self.distance.iter_mut().zip(sq) {
            *d = (s.sqrt() * res).min(max) as f32;
        }
    }

    /// Recompute distances around the changed rectangle `lo ..= hi`.
    ///
    /// Cells within `truncation` of the change are rewritten; their nearest
    /// obstacle, if inside the truncation radius, lies within twice that.
    fn refresh_distance(&mut self, lo: CellIndex, hi: CellIndex) {
        let k = self.truncation;
        let clip = |v: i32, min: i32, len: usize| (v - min).clamp(0, len as i32 - 1) as usize;

        let rx0 = clip(lo.x - 2 * k, self.min.x, self.width);
        let rx1 = clip(hi.x + 2 * k, self.min.x, self.width);
        let ry0 = clip(lo.y - 2 * k, self.min.y, self.height);
        let ry1 = clip(hi.y + 2 * k, self.min.y, self.height);
        let rw = rx1 - rx0 + 1;
        let rh = ry1 - ry0 + 1;

        let mut seeds = vec![false; rw * rh];
        for y in 0..rh {
            for x in 0..rw {
                seeds[y * rw + x] = self.is_occupied((y + ry0) * self.width + x + rx0);
            }
        }
        let sq = squared_edt(&seeds, rw, rh);

        let wx0 = clip(lo.x - k, self.min.x, self.width);
        let wx1 = clip(hi.x + k, self.min.x, self.width);
        let wy0 = clip(lo.y - k, self.min.y, self.height);
        let wy1 = clip(hi.y + k, self.min.y, self.height);
        for y in wy0..=wy1 {
            for x in wx0..=wx1 {
                let s = sq[(y - ry0) * rw + (x - rx0)];
                self.distance[y * self.width + x] =
                    (s.sqrt() * self.resolution).min(self.max_distance) as f32;
            }
        }
    }

    // ── read-out ────────────────────────────────────────────────────────────

    /// Copy the current grid out.
    pub fn snapshot(&self) -> MapSnapshot {
        MapSnapshot {
            resolution: self.resolution,
            origin: Point2::new(
                f64::from(self.min.x) * self.resolution,
                f64::from(self.min.y) * self.resolution,
            ),
            min: self.min,
            width: self.width,
            height: self.height,
            cells: (0..self.cell_count()).map(|i| self.state_of(i)).collect(),
            distance: self.distance.clone(),
            max_distance: self.max_distance,
            updates: self.updates,
        }
    }
}

// ────────────────────────────────────────────────────────────────────────────
// MapSnapshot
// ────────────────────────────────────────────────────────────────────────────

/// Immutable, caller-owned copy of the grid.
///
/// Row-major; element `y * width + x` is global cell `min + (x, y)`.
#[derive(Debug, Clone, PartialEq)]
pub struct MapSnapshot {
    pub resolution: f64,
    /// World position of the lower-left corner of the first cell.
    pub origin: Point2,
    pub min: CellIndex,
    pub width: usize,
    pub height: usize,
    pub cells: Vec<CellState>,
    /// Metres to the nearest occupied cell, truncated at `max_distance`.
    pub distance: Vec<f32>,
    pub max_distance: f64,
    /// Number of scans the grid had integrated when copied.
    pub updates: u64,
}

impl MapSnapshot {
    fn local(&self, p: Point2) -> Option<usize> {
        let x = ((p.x - self.origin.x) / self.resolution).floor();
        let y = ((p.y - self.origin.y) / self.resolution).floor();
        if x < 0.0 || y < 0.0 || x >= self.width as f64 || y >= self.height as f64 {
            return None;
        }
        Some(y as usize * self.width + x as usize)
    }

    /// Occupancy at local cell `(x, y)`.
    pub fn state_at(&self, x: usize, y: usize) -> Option<CellState> {
        (x < self.width && y < self.height).then(|| self.cells[y * self.width + x])
    }

    /// State of the cell containing world point `p`.
    pub fn state_at_point(&self, p: Point2) -> CellState {
        self.local(p).map_or(CellState::Unknown, |i| self.cells[i])
    }

    /// Cost view: truncated distance to the nearest occupied cell at `p`.
    ///
    /// Non-decreasing in the true distance; points outside the grid cost
    /// `max_distance`.
    pub fn cost_at(&self, p: Point2) -> f64 {
        self.local(p)
            .map_or(self.max_distance, |i| f64::from(self.distance[i]))
    }

    pub fn count(&self, state: CellState) -> usize {
        self.cells.iter().filter(|&&s| s == state).count()
    }
}
