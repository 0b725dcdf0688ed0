use std::borrow::Cow;

use crate::error::{check_lengths, Error, Result};
use crate::math::{argmax, crossing_interp, oriented, polyfit, trapz};

// ---------------------------------------------------------------------------
// Distribution – a peak slice seen as an unnormalized density
// ---------------------------------------------------------------------------

/// Central moments of a distribution.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct Moments {
    pub mean: f64,
    pub std: f64,
    pub skew: f64,
    /// Excess (Fisher) kurtosis.
    pub kurtosis: f64,
}

/// An `(x, y)` slice treated as an unnormalized probability density.
///
/// The orientation flip happens once, here; every moment and width below
/// works on the same low-to-high arrays so sign-sensitive results (skew,
/// asymmetry) cannot mix orientations.
#[derive(Debug, Clone)]
pub struct Distribution<'a> {
    x: Cow<'a, [f64]>,
    y: Cow<'a, [f64]>,
    area: f64,
}

impl<'a> Distribution<'a> {
    pub fn new(x: &'a [f64], y: &'a [f64]) -> Result<Self> {
        check_lengths(x, y)?;
        if x.is_empty() {
            return Err(Error::EmptyInput("distribution needs at least one point".into()));
        }
        let (x, y) = oriented(x, y);
        let area = trapz(&x, &y);
        Ok(Self { x, y, area })
    }

    /// Coordinates, low to high.
    pub fn x(&self) -> &[f64] {
        &self.x
    }

    /// Intensities matching [`Distribution::x`].
    pub fn y(&self) -> &[f64] {
        &self.y
    }

    /// Unnormalized trapezoidal area.
    pub fn area(&self) -> f64 {
        self.area
    }

    /// `y / area`, or `None` when the area is zero or not finite.
    pub fn normalized(&self) -> Option<Vec<f64>> {
        if self.area == 0.0 || !self.area.is_finite() {
            return None;
        }
        Some(self.y.iter().map(|v| v / self.area).collect())
    }

    /// Mean, standard deviation, skew and excess kurtosis.
    ///
    /// Returns `None` for a zero-area slice.
    pub fn moments(&self) -> Option<Moments> {
        let y_norm = self.normalized()?;
        let x = &self.x;
        let weighted = |f: &dyn Fn(f64) -> f64| -> f64 {
            let integrand: Vec<f64> = x.iter().zip(&y_norm).map(|(&xi, &yn)| f(xi) * yn).collect();
            trapz(x, &integrand)
        };

        let mean = weighted(&|xi| xi);
        let variance = weighted(&|xi| (xi - mean).powi(2));
        let std = variance.max(0.0).sqrt();
        if std == 0.0 {
            log::warn!("distribution has zero spread; skew and kurtosis reported as 0");
            return Some(Moments {
                mean,
                ..Moments::default()
            });
        }
        let skew = weighted(&|xi| (xi - mean).powi(3)) / std.powi(3);
        let kurtosis = weighted(&|xi| (xi - mean).powi(4)) / std.powi(4) - 3.0;
        Some(Moments {
            mean,
            std,
            skew,
            kurtosis,
        })
    }

    /// Coordinate of the maximum intensity.
    pub fn max_location(&self) -> Option<f64> {
        argmax(&self.y).map(|i| self.x[i])
    }

    /// Coordinates where the intensity crosses `height * max(y)` on each
    /// side of the maximum.
    ///
    /// A side with no crossing inside the slice (the peak touches a bound) is
    /// extrapolated from a line fitted to the nearest ~10 % of its points.
    /// `None` when the maximum sits on the first or last sample.
    pub fn width_at(&self, height: f64) -> Option<(f64, f64)> {
        let (x, y) = (&*self.x, &*self.y);
        let imax = argmax(y)?;
        if imax == 0 || imax + 1 == y.len() {
            log::info!("width at {height} undefined: peak maximum sits on a bound");
            return None;
        }
        let level = y[imax] * height;

        let low = (0..imax)
            .rev()
            .find(|&i| y[i] <= level)
            .map(|i| crossing_interp(x[i], y[i], x[i + 1], y[i + 1], level))
            .unwrap_or_else(|| {
                log::info!("width at {height}: extrapolating the lower side with a linear fit");
                let n = (imax / 10).max(3).min(imax + 1);
                extrapolate_side(&x[..n], &y[..n], level)
            });

        let high = ((imax + 1)..y.len())
            .find(|&i| y[i] <= level)
            .map(|i| crossing_interp(x[i - 1], y[i - 1], x[i], y[i], level))
            .unwrap_or_else(|| {
                log::info!("width at {height}: extrapolating the upper side with a linear fit");
                let side = y.len() - imax;
                let n = (side / 10).max(3).min(side);
                let start = y.len() - n;
                extrapolate_side(&x[start..], &y[start..], level)
            });

        Some((low, high))
    }

    /// `|x_high - x_low|` at `height`; 0 when undefined.
    pub fn full_width_at_height(&self, height: f64) -> f64 {
        self.width_at(height).map_or(0.0, |(lo, hi)| (hi - lo).abs())
    }

    /// `(x_high - x_max) / (x_max - x_low)` at `height`; 0 when undefined.
    pub fn asymmetry_factor(&self, height: f64) -> f64 {
        let (Some((lo, hi)), Some(mid)) = (self.width_at(height), self.max_location()) else {
            return 0.0;
        };
        let front = mid - lo;
        if front == 0.0 {
            log::warn!("asymmetry factor undefined: zero front width at height {height}");
            return 0.0;
        }
        (hi - mid) / front
    }
}

/// Fit `x` as a line in `y` and read it off at `level`.
fn extrapolate_side(x: &[f64], y: &[f64], level: f64) -> f64 {
    match polyfit(y, x, 1, None) {
        Ok(line) => line.eval(level),
        Err(e) => {
            log::warn!("side extrapolation failed ({e}); using the edge coordinate");
            x.first().copied().unwrap_or(0.0)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::math::linspace;

    fn gaussian(x: &[f64], mu: f64, sigma: f64, amp: f64) -> Vec<f64> {
        x.iter()
            .map(|v| amp * (-(v - mu).powi(2) / (2.0 * sigma * sigma)).exp())
            .collect()
    }

    #[test]
    fn gaussian_moments() {
        let x = linspace(0.0, 10.0, 1000);
        let y = gaussian(&x, 5.0, 0.5, 10.0);
        let d = Distribution::new(&x, &y).unwrap();
        let m = d.moments().unwrap();
        assert!((m.mean - 5.0).abs() < 1e-6);
        assert!((m.std - 0.5).abs() < 1e-4);
        assert!(m.skew.abs() < 1e-6);
        assert!(m.kurtosis.abs() < 1e-3);
        assert!((d.full_width_at_height(0.5) - 2.3548 * 0.5).abs() < 1e-3);
        assert!((d.asymmetry_factor(0.1) - 1.0).abs() < 1e-3);
        assert!((d.area() - 10.0 * 0.5 * (2.0 * std::f64::consts::PI).sqrt()).abs() < 1e-6);
    }

    #[test]
    fn flipped_input_gives_same_sign_of_skew() {
        // Right-tailed shape: exponential decay after a short rise.
        let x = linspace(0.0, 10.0, 500);
        let y: Vec<f64> = x
            .iter()
            .map(|&v| if v < 1.0 { v } else { (-(v - 1.0) / 1.5).exp() })
            .collect();
        let fwd = Distribution::new(&x, &y).unwrap().moments().unwrap();

        let xr: Vec<f64> = x.iter().rev().copied().collect();
        let yr: Vec<f64> = y.iter().rev().copied().collect();
        let rev = Distribution::new(&xr, &yr).unwrap();
        let m = rev.moments().unwrap();
        assert!(fwd.skew > 0.5);
        assert!((m.skew - fwd.skew).abs() < 1e-12);
        assert!(rev.asymmetry_factor(0.1) > 1.0);
    }

    #[test]
    fn max_on_edge_reports_zero_width() {
        let x = linspace(0.0, 1.0, 11);
        let y: Vec<f64> = x.iter().map(|v| 1.0 - v).collect();
        let d = Distribution::new(&x, &y).unwrap();
        assert_eq!(d.full_width_at_height(0.5), 0.0);
        assert_eq!(d.asymmetry_factor(0.1), 0.0);
    }

    #[test]
    fn truncated_side_is_extrapolated() {
        // Peak cut on the left before reaching half height.
        let x = linspace(4.5, 8.0, 351);
        let y = gaussian(&x, 5.0, 0.5, 1.0);
        let d = Distribution::new(&x, &y).unwrap();
        let (lo, hi) = d.width_at(0.5).unwrap();
        assert!(lo < 4.5);
        assert!((hi - (5.0 + 1.1774 * 0.5)).abs() < 1e-3);
    }

    #[test]
    fn zero_area_has_no_moments() {
        let x = vec![0.0, 1.0, 2.0];
        let y = vec![0.0, 0.0, 0.0];
        assert!(Distribution::new(&x, &y).unwrap().moments().is_none());
    }
}
