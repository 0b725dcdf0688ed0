use crate::error::{Error, Result};

/// Symmetric banded matrix stored by lower diagonals.
///
/// `bands[d][i]` holds `A[i][i - d]` for `d <= half_bandwidth`; entries with
/// `i < d` are ignored.
#[derive(Debug, Clone)]
pub struct SymmetricBanded {
    pub bands: Vec<Vec<f64>>,
}

impl SymmetricBanded {
    /// Zero matrix of size `n` with `half_bandwidth` sub-diagonals.
    pub fn zeros(n: usize, half_bandwidth: usize) -> Self {
        Self {
            bands: vec![vec![0.0; n]; half_bandwidth + 1],
        }
    }

    pub fn len(&self) -> usize {
        self.bands.first().map_or(0, Vec::len)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn half_bandwidth(&self) -> usize {
        self.bands.len().saturating_sub(1)
    }

    /// Add `value` to `A[i][j]` (and its mirror).
    pub fn add(&mut self, i: usize, j: usize, value: f64) {
        let (r, c) = if i >= j { (i, j) } else { (j, i) };
        self.bands[r - c][r] += value;
    }

    fn get(&self, i: usize, j: usize) -> f64 {
        let (r, c) = if i >= j { (i, j) } else { (j, i) };
        let d = r - c;
        if d > self.half_bandwidth() {
            0.0
        } else {
            self.bands[d][r]
        }
    }

    /// Second-difference penalty `DᵀD` scaled by `lambda`.
    pub fn second_difference_penalty(n: usize, lambda: f64) -> Self {
        let mut m = Self::zeros(n, 2);
        if n < 3 {
            return m;
        }
        let stencil = [1.0, -2.0, 1.0];
        for r in 0..n - 2 {
            for a in 0..3 {
                for b in 0..=a {
                    m.add(r + a, r + b, lambda * stencil[a] * stencil[b]);
                }
            }
        }
        m
    }
}

/// Solve `A z = rhs` for a symmetric positive-definite banded `A`
/// by banded Cholesky factorisation.
pub fn solve_spd(a: &SymmetricBanded, rhs: &[f64]) -> Result<Vec<f64>> {
    let n = a.len();
    if rhs.len() != n {
        return Err(Error::LengthMismatch { x: n, y: rhs.len() });
    }
    let k = a.half_bandwidth();
    // l[i][d] = L[i][i - d]
    let mut l = vec![vec![0.0; k + 1]; n];
    for i in 0..n {
        let j0 = i.saturating_sub(k);
        for j in j0..=i {
            let m0 = i.saturating_sub(k).max(j.saturating_sub(k));
            let mut sum = a.get(i, j);
            for m in m0..j {
                sum -= l[i][i - m] * l[j][j - m];
            }
            if i == j {
                if sum <= 0.0 {
                    return Err(Error::Convergence(format!(
                        "banded system is not positive definite at row {i}"
                    )));
                }
                l[i][0] = sum.sqrt();
            } else {
                l[i][i - j] = sum / l[j][0];
            }
        }
    }

    let mut z = vec![0.0; n];
    for i in 0..n {
        let mut s = rhs[i];
        for m in i.saturating_sub(k)..i {
            s -= l[i][i - m] * z[m];
        }
        z[i] = s / l[i][0];
    }
    for i in (0..n).rev() {
        let mut s = z[i];
        for m in (i + 1)..n.min(i + k + 1) {
            s -= l[m][m - i] * z[m];
        }
        z[i] = s / l[i][0];
    }
    Ok(z)
}
