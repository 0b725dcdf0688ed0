/// Numeric helpers shared by the processing and analysis layers.
///
/// ```text
///   oriented / trapz / slice_by_value / median      (this file)
///   polyfit      weighted least-squares polynomials
///   banded       banded SPD solver for penalized smoothing
///   moments      density moments and widths of a peak slice
///   optimize     seeded scalar minimization
/// ```

pub mod banded;
pub mod moments;
pub mod optimize;
pub mod polyfit;

use std::borrow::Cow;
use std::ops::Range;

use serde::{Deserialize, Serialize};

use crate::error::{config_error, Result};

pub use polyfit::{polyfit, Polynomial};

// ---------------------------------------------------------------------------
// Orientation
// ---------------------------------------------------------------------------

/// Return `(x, y)` ordered low-to-high in `x`.
///
/// Both arrays are flipped together when the coordinate runs high-to-low;
/// otherwise they are borrowed untouched.
pub fn oriented<'a>(x: &'a [f64], y: &'a [f64]) -> (Cow<'a, [f64]>, Cow<'a, [f64]>) {
    if is_descending(x) {
        let xf: Vec<f64> = x.iter().rev().copied().collect();
        let yf: Vec<f64> = y.iter().rev().copied().collect();
        (Cow::Owned(xf), Cow::Owned(yf))
    } else {
        (Cow::Borrowed(x), Cow::Borrowed(y))
    }
}

/// Direction a coordinate axis runs in, checked once when data comes in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AxisDirection {
    Increasing,
    Decreasing,
}

impl AxisDirection {
    /// Direction of `x`, which must be finite and strictly monotonic.
    ///
    /// Fewer than two points count as increasing.
    pub fn of(x: &[f64]) -> Result<Self> {
        if let Some(bad) = x.iter().position(|v| !v.is_finite()) {
            return Err(config_error(format!("coordinate {bad} is not finite")));
        }
        if x.len() < 2 {
            return Ok(AxisDirection::Increasing);
        }
        if x.windows(2).all(|w| w[1] > w[0]) {
            Ok(AxisDirection::Increasing)
        } else if x.windows(2).all(|w| w[1] < w[0]) {
            Ok(AxisDirection::Decreasing)
        } else {
            Err(config_error("coordinates must be strictly increasing or strictly decreasing"))
        }
    }

    pub fn is_increasing(self) -> bool {
        self == AxisDirection::Increasing
    }
}

/// Whether the first coordinate is larger than the last one.
pub fn is_descending(x: &[f64]) -> bool {
    match (x.first(), x.last()) {
        (Some(first), Some(last)) => first > last,
        _ => false,
    }
}

// ---------------------------------------------------------------------------
// Integration
// ---------------------------------------------------------------------------

/// Trapezoidal integral of `y` over `x` (sign follows the direction of `x`).
pub fn trapz(x: &[f64], y: &[f64]) -> f64 {
    x.windows(2)
        .zip(y.windows(2))
        .map(|(xw, yw)| (xw[1] - xw[0]) * (yw[0] + yw[1]) * 0.5)
        .sum()
}

// ---------------------------------------------------------------------------
// Lookup helpers
// ---------------------------------------------------------------------------

/// Index of the sample whose coordinate is closest to `value`.
pub fn nearest_index(x: &[f64], value: f64) -> usize {
    x.iter()
        .enumerate()
        .min_by(|(_, a), (_, b)| (*a - value).abs().total_cmp(&(*b - value).abs()))
        .map(|(i, _)| i)
        .unwrap_or(0)
}

/// Index range covering `[start, end]` by nearest coordinate.
///
/// Missing ends default to the array edges. The returned range is always
/// ascending in index, whatever the orientation of `x`.
pub fn slice_by_value(x: &[f64], start: Option<f64>, end: Option<f64>) -> Range<usize> {
    if x.is_empty() {
        return 0..0;
    }
    let a = start.map_or(0, |v| nearest_index(x, v));
    let b = end.map_or(x.len() - 1, |v| nearest_index(x, v));
    a.min(b)..a.max(b) + 1
}

/// Index of the largest value (first one on ties).
pub fn argmax(values: &[f64]) -> Option<usize> {
    let mut best: Option<(usize, f64)> = None;
    for (i, &v) in values.iter().enumerate() {
        match best {
            Some((_, b)) if v <= b => {}
            _ => best = Some((i, v)),
        }
    }
    best.map(|(i, _)| i)
}

/// Median of a slice; 0 for an empty slice.
pub fn median(values: &[f64]) -> f64 {
    if values.is_empty() {
        return 0.0;
    }
    let mut sorted = values.to_vec();
    sorted.sort_by(|a, b| a.total_cmp(b));
    let n = sorted.len();
    if n % 2 == 1 {
        sorted[n / 2]
    } else {
        (sorted[n / 2 - 1] + sorted[n / 2]) * 0.5
    }
}

/// `n` evenly spaced samples from `start` to `end` inclusive.
pub fn linspace(start: f64, end: f64, n: usize) -> Vec<f64> {
    match n {
        0 => Vec::new(),
        1 => vec![start],
        _ => {
            let step = (end - start) / (n - 1) as f64;
            (0..n).map(|i| start + step * i as f64).collect()
        }
    }
}

/// Coordinate where the straight line through `(x0, y0)` and `(x1, y1)`
/// reaches `height`.
pub fn crossing_interp(x0: f64, y0: f64, x1: f64, y1: f64, height: f64) -> f64 {
    if y1 == y0 {
        return x0;
    }
    x0 + (height - y0) * (x1 - x0) / (y1 - y0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn axis_direction_is_validated() {
        assert_eq!(AxisDirection::of(&[3.0, 2.0, 1.0]).unwrap(), AxisDirection::Decreasing);
        assert_eq!(AxisDirection::of(&[1.0]).unwrap(), AxisDirection::Increasing);
        assert!(AxisDirection::of(&[1.0, 1.0, 2.0]).is_err());
        assert!(AxisDirection::of(&[1.0, f64::NAN]).is_err());
    }

    #[test]
    fn trapz_of_line() {
        let x = linspace(0.0, 2.0, 21);
        let y: Vec<f64> = x.iter().map(|v| 3.0 * v).collect();
        assert!((trapz(&x, &y) - 6.0).abs() < 1e-12);
    }

    #[test]
    fn trapz_sign_follows_direction() {
        let x = vec![2.0, 1.0, 0.0];
        let y = vec![1.0, 1.0, 1.0];
        assert!((trapz(&x, &y) + 2.0).abs() < 1e-12);
        let (xo, yo) = oriented(&x, &y);
        assert!((trapz(&xo, &yo) - 2.0).abs() < 1e-12);
    }

    #[test]
    fn oriented_borrows_ascending_data() {
        let x = [0.0, 1.0];
        let y = [5.0, 6.0];
        let (xo, _) = oriented(&x, &y);
        assert!(matches!(xo, Cow::Borrowed(_)));
    }

    #[test]
    fn slice_by_value_handles_descending_axis() {
        let x = vec![10.0, 8.0, 6.0, 4.0, 2.0];
        assert_eq!(slice_by_value(&x, Some(4.1), Some(8.2)), 1..4);
        assert_eq!(slice_by_value(&x, None, None), 0..5);
    }

    #[test]
    fn median_even_and_odd() {
        assert_eq!(median(&[3.0, 1.0, 2.0]), 2.0);
        assert_eq!(median(&[4.0, 1.0, 2.0, 3.0]), 2.5);
        assert_eq!(median(&[]), 0.0);
    }

    #[test]
    fn argmax_first_on_ties() {
        assert_eq!(argmax(&[1.0, 3.0, 3.0, 2.0]), Some(1));
        assert_eq!(argmax(&[]), None);
    }
}
