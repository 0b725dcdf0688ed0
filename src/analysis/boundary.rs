use std::sync::Arc;

use crate::analysis::peak::{Peak, PeakId, PeakParent};
use crate::error::{check_lengths, config_error, Error, Result};
use crate::math::polyfit;

/// Rolling-ball boundary detection.
///
/// From a candidate index `p` the detector walks outward on each side until
/// one of these holds, checked in order at every step:
///
/// 1. `n_points_with_pos_slope` consecutive steps climb back up (local
///    derivative beyond `max_derivative`, sign mirrored on the lower side);
///    the bound is placed just past the run.
/// 2. The intensity drops below `min_height * y[p]`.
/// 3. The walk reaches the edge of the trace.
///
/// The local derivative comes from a degree-`poly_degree` fit over an
/// `n + 1` point window ending (lower side: starting) at the current index.
/// `n = 1`, `poly_degree = 1` reduces to the point-to-point slope.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RollingBall {
    n: usize,
    poly_degree: usize,
    deriv_degree: usize,
    max_derivative: f64,
    n_points_with_pos_slope: usize,
    min_height: f64,
}

impl Default for RollingBall {
    fn default() -> Self {
        Self {
            n: 2,
            poly_degree: 1,
            deriv_degree: 1,
            max_derivative: 0.0,
            n_points_with_pos_slope: 1,
            min_height: 0.01,
        }
    }
}

impl RollingBall {
    pub fn new(
        n: usize,
        poly_degree: usize,
        deriv_degree: usize,
        max_derivative: f64,
        n_points_with_pos_slope: usize,
        min_height: f64,
    ) -> Result<Self> {
        if n == 0 {
            return Err(config_error("rolling ball window n must be at least 1"));
        }
        if poly_degree == 0 {
            return Err(config_error("poly_degree must be at least 1"));
        }
        if deriv_degree == 0 || deriv_degree > poly_degree {
            return Err(config_error(format!(
                "deriv_degree must be in 1..={poly_degree}, got {deriv_degree}"
            )));
        }
        if n < poly_degree {
            return Err(config_error(format!(
                "window of {} points cannot fit degree {poly_degree}",
                n + 1
            )));
        }
        if n_points_with_pos_slope == 0 {
            return Err(config_error("n_points_with_pos_slope must be at least 1"));
        }
        if !max_derivative.is_finite() {
            return Err(config_error("max_derivative must be finite"));
        }
        if !(0.0..1.0).contains(&min_height) {
            return Err(config_error(format!("min_height must be in [0, 1), got {min_height}")));
        }
        Ok(Self {
            n,
            poly_degree,
            deriv_degree,
            max_derivative,
            n_points_with_pos_slope,
            min_height,
        })
    }

    /// Point-to-point slope variant.
    pub fn single_point(max_slope: f64, n_points_with_pos_slope: usize, min_height: f64) -> Result<Self> {
        Self::new(1, 1, 1, max_slope, n_points_with_pos_slope, min_height)
    }

    pub fn n(&self) -> usize {
        self.n
    }

    pub fn min_height(&self) -> f64 {
        self.min_height
    }

    /// `(low, high)` around `peak_index`, `high` exclusive.
    pub fn bounds(&self, peak_index: usize, x: &[f64], y: &[f64]) -> Result<(usize, usize)> {
        check_lengths(x, y)?;
        if peak_index >= y.len() {
            return Err(Error::InvalidBounds {
                low: peak_index,
                high: peak_index + 1,
                len: y.len(),
            });
        }
        let threshold = self.min_height * y[peak_index];
        let low = self.lower_bound(peak_index, x, y, threshold)?;
        let high = self.upper_bound(peak_index, x, y, threshold)?;
        log::trace!("rolling ball: peak {peak_index} bounded to {low}..{high}");
        Ok((low, high))
    }

    /// Bound every candidate and build peaks on `parent`.
    ///
    /// Peak ids are the candidates' positions in `candidates`.
    pub fn detect<P: PeakParent + 'static>(
        &self,
        parent: &Arc<P>,
        candidates: &[usize],
        signal_id: Option<usize>,
    ) -> Result<Vec<Peak>> {
        if candidates.is_empty() {
            log::warn!("boundary detection: no peak candidates supplied");
            return Ok(Vec::new());
        }
        let (x, y) = (parent.x(), parent.y());
        let mut peaks = Vec::with_capacity(candidates.len());
        for (peak_id, &p) in candidates.iter().enumerate() {
            let (low, high) = self.bounds(p, x, y)?;
            if high - low < 2 {
                log::warn!("boundary detection: candidate {p} has zero width, skipped");
                continue;
            }
            peaks.push(Peak::new(parent, low, high, PeakId { signal_id, peak_id })?);
        }
        log::debug!("boundary detection: {} peak(s) from {} candidate(s)", peaks.len(), candidates.len());
        Ok(peaks)
    }

    fn lower_bound(&self, p: usize, x: &[f64], y: &[f64], threshold: f64) -> Result<usize> {
        if p <= self.n {
            return Ok(0);
        }
        let mut run = 0;
        for i in (1..=p - self.n).rev() {
            let climb = -self.derivative(x, y, i, i + self.n, i)?;
            if climb > self.max_derivative {
                run += 1;
                if run >= self.n_points_with_pos_slope {
                    return Ok(i + run);
                }
            } else {
                run = 0;
            }
            if y[i] < threshold {
                return Ok(i);
            }
        }
        Ok(0)
    }

    fn upper_bound(&self, p: usize, x: &[f64], y: &[f64], threshold: f64) -> Result<usize> {
        let len = y.len();
        let mut run = 0;
        for i in (p + self.n)..len {
            let climb = self.derivative(x, y, i - self.n, i, i)?;
            if climb > self.max_derivative {
                run += 1;
                if run >= self.n_points_with_pos_slope {
                    return Ok(i - run + 1);
                }
            } else {
                run = 0;
            }
            if y[i] < threshold {
                return Ok(i + 1);
            }
        }
        Ok(len)
    }

    /// Derivative at `x[at]` of the fit over `first..=last`, signed along
    /// increasing index so a high-to-low axis walks the same way.
    fn derivative(&self, x: &[f64], y: &[f64], first: usize, last: usize, at: usize) -> Result<f64> {
        let orientation = if x[last] < x[first] && self.deriv_degree % 2 == 1 {
            -1.0
        } else {
            1.0
        };
        if self.n == 1 && self.poly_degree == 1 {
            return Ok(orientation * (y[last] - y[first]) / (x[last] - x[first]));
        }
        let fit = polyfit(&x[first..=last], &y[first..=last], self.poly_degree, None)?;
        Ok(orientation * fit.derivative_at(x[at], self.deriv_degree))
    }
}
