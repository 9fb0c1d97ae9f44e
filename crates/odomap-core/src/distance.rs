//! Exact Euclidean distance transform (Felzenszwalb & Huttenlocher).
//!
//! Two separable passes of the 1-D lower-envelope transform give the squared
//! distance, in cells, from every cell to the nearest seed.  Linear in the
//! number of cells.

/// Stand-in for "no seed reachable".
pub const INF: f64 = 1e20;

/// Squared distance transform of a row-major `width × height` seed mask.
///
/// Seeds get 0; with no seeds at all every cell stays at [`INF`].
pub fn squared_edt(seeds: &[bool], width: usize, height: usize) -> Vec<f64> {
    debug_assert_eq!(seeds.len(), width * height);
    let mut grid: Vec<f64> = seeds.iter().map(|&s| if s { 0.0 } else { INF }).collect();
    if width == 0 || height == 0 {
        return grid;
    }

    let n = width.max(height);
    let mut f = vec![0.0; n];
    let mut d = vec![0.0; n];
    let mut v = vec![0usize; n];
    let mut z = vec![0.0; n + 1];

    // Columns.
    for x in 0..width {
        for y in 0..height {
            f[y] = grid[y * width + x];
        }
        edt_1d(&f[..height], &mut d[..height], &mut v, &mut z);
        for y in 0..height {
            grid[y * width + x] = d[y];
        }
    }

    // Rows.
    for y in 0..height {
        let row = &mut grid[y * width..(y + 1) * width];
        f[..width].copy_from_slice(row);
        edt_1d(&f[..width], &mut d[..width], &mut v, &mut z);
        row.copy_from_slice(&d[..width]);
    }

    grid
}

/// Lower envelope of the parabolas rooted at `(q, f[q])`.
fn edt_1d(f: &[f64], d: &mut [f64], v: &mut [usize], z: &mut [f64]) {
    let n = f.len();
    let mut k = 0usize;
    v[0] = 0;
    z[0] = -INF;
    z[1] = INF;

    for q in 1..n {
        let qf = q as f64;
        loop {
            let p = v[k];
            let pf = p as f64;
            let s = ((f[q] + qf * qf) - (f[p] + pf * pf)) / (2.0 * qf - 2.0 * pf);
            if s <= z[k] && k > 0 {
                k -= 1;
                continue;
            }
            if s <= z[k] {
                // k == 0: the new parabola dominates from -inf.
                v[0] = q;
                z[0] = -INF;
                z[1] = INF;
                break;
            }
            k += 1;
            v[k] = q;
            z[k] = s;
            z[k + 1] = INF;
            break;
        }
    }

    k = 0;
    for (q, out) in d.iter_mut().enumerate() {
        let qf = q as f64;
        while z[k + 1] < qf {
            k += 1;
        }
        let p = v[k] as f64;
        *out = (qf - p) * (qf - p) + f[v[k]];
    }
}
