//! Bresenham ray traversal over grid cells.
//!
//! ```text
//! From (0,0) to (7,3):
//!
//!     3 │        ●
//!     2 │     ●●
//!     1 │  ●●
//!     0 ●●
//!       └──────────
//!        0 1 2 3 4 5 6 7
//! ```
//!
//! Integer-only, gap-free and deterministic: the same pair of cells always
//! yields the same traversal, which keeps map updates reproducible.

use crate::grid::CellIndex;

/// Iterator over every cell on the segment `start → end`, both inclusive.
#[derive(Debug, Clone)]
pub struct BresenhamLine {
    x: i32,
    y: i32,
    dx: i32,
    dy: i32,
    x_inc: i32,
    y_inc: i32,
    error: i32,
    steep: bool,
    end_x: i32,
    end_y: i32,
    done: bool,
}

impl BresenhamLine {
    pub fn new(start: CellIndex, end: CellIndex) -> Self {
        let dx = (end.x - start.x).abs();
        let dy = (end.y - start.y).abs();
        let steep = dy > dx;

        let (x, y, end_x, end_y, dx, dy) = if steep {
            (start.y, start.x, end.y, end.x, dy, dx)
        } else {
            (start.x, start.y, end.x, end.y, dx, dy)
        };

        Self {
            x,
            y,
            dx,
            dy,
            x_inc: if end_x > x { 1 } else { -1 },
            y_inc: if end_y > y { 1 } else { -1 },
            error: dx / 2,
            steep,
            end_x,
            end_y,
            done: false,
        }
    }
}

impl Iterator for BresenhamLine {
    type Item = CellIndex;

    fn next(&mut self) -> Option<CellIndex> {
        if self.done {
            return None;
        }

        let cell = if self.steep {
            CellIndex::new(self.y, self.x)
        } else {
            CellIndex::new(self.x, self.y)
        };

        if self.x == self.end_x && self.y == self.end_y {
            self.done = true;
            return Some(cell);
        }

        self.error -= self.dy;
        if self.error < 0 {
            self.y += self.y_inc;
            self.error += self.dx;
        }
        self.x += self.x_inc;

        Some(cell)
    }
}

/// Cells a beam passes through before reaching its endpoint.
pub fn traversed_cells(start: CellIndex, end: CellIndex) -> impl Iterator<Item = CellIndex> {
    BresenhamLine::new(start, end).filter(move |c| *c != end)
}
