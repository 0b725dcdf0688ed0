use crate::error::{check_lengths, config_error, Error, Result};

// ---------------------------------------------------------------------------
// Polynomial
// ---------------------------------------------------------------------------

/// A polynomial stored in a centred, scaled variable `t = (x - shift) / scale`.
///
/// Fitting in `t` keeps the Vandermonde matrix well conditioned for
/// coordinates such as retention times around 10-20 min or wavenumbers
/// around 3000.
#[derive(Debug, Clone, PartialEq)]
pub struct Polynomial {
    /// Coefficients in ascending powers of `t`.
    coeffs: Vec<f64>,
    shift: f64,
    scale: f64,
}

impl Polynomial {
    /// Polynomial in plain `x` from ascending coefficients.
    pub fn from_coefficients(coeffs: Vec<f64>) -> Self {
        Self {
            coeffs,
            shift: 0.0,
            scale: 1.0,
        }
    }

    /// Degree (number of coefficients minus one).
    pub fn degree(&self) -> usize {
        self.coeffs.len().saturating_sub(1)
    }

    /// Evaluate at `x`.
    pub fn eval(&self, x: f64) -> f64 {
        let t = (x - self.shift) / self.scale;
        self.coeffs.iter().rev().fold(0.0, |acc, c| acc * t + c)
    }

    /// Evaluate over a slice of coordinates.
    pub fn eval_many(&self, x: &[f64]) -> Vec<f64> {
        x.iter().map(|&v| self.eval(v)).collect()
    }

    /// Value of the `order`-th derivative with respect to `x` at `x`.
    pub fn derivative_at(&self, x: f64, order: usize) -> f64 {
        if order == 0 {
            return self.eval(x);
        }
        if order > self.degree() {
            return 0.0;
        }
        let t = (x - self.shift) / self.scale;
        let mut acc = 0.0;
        for (j, &c) in self.coeffs.iter().enumerate().skip(order).rev() {
            let falling: f64 = ((j - order + 1)..=j).map(|k| k as f64).product();
            acc = acc * t + c * falling;
        }
        acc / self.scale.powi(order as i32)
    }
}

// ---------------------------------------------------------------------------
// Least-squares fit
// ---------------------------------------------------------------------------

/// Weighted least-squares polynomial fit of `y` against `x`.
///
/// `weights` multiply the unsquared residual of each point (a weight of 0
/// removes the point). Solved with Householder QR.
pub fn polyfit(x: &[f64], y: &[f64], degree: usize, weights: Option<&[f64]>) -> Result<Polynomial> {
    check_lengths(x, y)?;
    if let Some(w) = weights {
        check_lengths(x, w)?;
    }
    let ncols = degree + 1;
    if x.len() < ncols {
        return Err(config_error(format!(
            "degree {degree} fit needs at least {ncols} points, got {}",
            x.len()
        )));
    }

    let shift = x.iter().sum::<f64>() / x.len() as f64;
    let spread = x.iter().map(|v| (v - shift).abs()).fold(0.0, f64::max);
    let scale = if spread > 0.0 { spread } else { 1.0 };

    let mut a: Vec<Vec<f64>> = Vec::with_capacity(x.len());
    let mut b: Vec<f64> = Vec::with_capacity(x.len());
    for (i, (&xi, &yi)) in x.iter().zip(y).enumerate() {
        let w = weights.map_or(1.0, |w| w[i]);
        let t = (xi - shift) / scale;
        let mut row = Vec::with_capacity(ncols);
        let mut p = 1.0;
        for _ in 0..ncols {
            row.push(w * p);
            p *= t;
        }
        a.push(row);
        b.push(w * yi);
    }

    let coeffs = solve_least_squares(&mut a, &mut b, ncols)?;
    Ok(Polynomial {
        coeffs,
        shift,
        scale,
    })
}

/// In-place Householder QR followed by back substitution.
fn solve_least_squares(a: &mut [Vec<f64>], b: &mut [f64], ncols: usize) -> Result<Vec<f64>> {
    let m = a.len();
    for k in 0..ncols {
        let norm = (k..m).map(|i| a[i][k] * a[i][k]).sum::<f64>().sqrt();
        if norm == 0.0 {
            continue;
        }
        let alpha = if a[k][k] > 0.0 { -norm } else { norm };
        let mut v: Vec<f64> = (k..m).map(|i| a[i][k]).collect();
        v[0] -= alpha;
        let vnorm2: f64 = v.iter().map(|e| e * e).sum();
        if vnorm2 == 0.0 {
            continue;
        }
        for j in k..ncols {
            let s: f64 = v.iter().enumerate().map(|(i, vi)| vi * a[k + i][j]).sum();
            let f = 2.0 * s / vnorm2;
            for (i, vi) in v.iter().enumerate() {
                a[k + i][j] -= f * vi;
            }
        }
        let s: f64 = v.iter().enumerate().map(|(i, vi)| vi * b[k + i]).sum();
        let f = 2.0 * s / vnorm2;
        for (i, vi) in v.iter().enumerate() {
            b[k + i] -= f * vi;
        }
    }

    let rmax = (0..ncols).map(|k| a[k][k].abs()).fold(0.0, f64::max);
    let mut coeffs = vec![0.0; ncols];
    for k in (0..ncols).rev() {
        let diag = a[k][k];
        if diag.abs() <= rmax * 1e-12 || diag == 0.0 {
            return Err(Error::Convergence(
                "rank-deficient polynomial fit (too few distinct weighted points)".into(),
            ));
        }
        let tail: f64 = ((k + 1)..ncols).map(|j| a[k][j] * coeffs[j]).sum();
        coeffs[k] = (b[k] - tail) / diag;
    }
    Ok(coeffs)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn recovers_exact_quadratic() {
        let x: Vec<f64> = (0..20).map(|i| 100.0 + i as f64 * 0.5).collect();
        let y: Vec<f64> = x.iter().map(|v| 2.0 - 0.5 * v + 0.01 * v * v).collect();
        let p = polyfit(&x, &y, 2, None).unwrap();
        for (&xi, &yi) in x.iter().zip(&y) {
            assert!((p.eval(xi) - yi).abs() < 1e-8);
        }
        // d/dx = -0.5 + 0.02 x ; d2/dx2 = 0.02
        assert!((p.derivative_at(105.0, 1) - 1.6).abs() < 1e-8);
        assert!((p.derivative_at(105.0, 2) - 0.02).abs() < 1e-10);
        assert_eq!(p.derivative_at(105.0, 3), 0.0);
    }

    #[test]
    fn zero_weight_drops_outlier() {
        let x = vec![0.0, 1.0, 2.0, 3.0, 4.0];
        let mut y: Vec<f64> = x.iter().map(|v| 1.0 + v).collect();
        y[2] = 100.0;
        let w = vec![1.0, 1.0, 0.0, 1.0, 1.0];
        let p = polyfit(&x, &y, 1, Some(&w)).unwrap();
        assert!((p.eval(2.0) - 3.0).abs() < 1e-10);
    }

    #[test]
    fn two_point_line_is_secant() {
        let p = polyfit(&[1.0, 3.0], &[2.0, 8.0], 1, None).unwrap();
        assert!((p.derivative_at(1.0, 1) - 3.0).abs() < 1e-12);
    }

    #[test]
    fn too_few_points_is_config_error() {
        assert!(matches!(
            polyfit(&[1.0, 2.0], &[1.0, 2.0], 2, None),
            Err(Error::InvalidConfig(_))
        ));
    }

    #[test]
    fn singular_design_is_reported() {
        let x = vec![1.0, 1.0, 1.0];
        let y = vec![1.0, 2.0, 3.0];
        assert!(matches!(polyfit(&x, &y, 1, None), Err(Error::Convergence(_))));
    }
}
