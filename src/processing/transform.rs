use serde::{Deserialize, Serialize};

use crate::error::{check_lengths, config_error, Error, Result};
use crate::math::{nearest_index, slice_by_value};
use crate::processing::weights::DataWeight;
use crate::processing::Stage;

// ---------------------------------------------------------------------------
// Resampling
// ---------------------------------------------------------------------------

/// Keep every `n`-th point, starting with the first.
#[derive(Debug, Clone, Copy)]
pub struct EveryN {
    n: usize,
}

impl EveryN {
    pub fn new(n: usize) -> Result<Self> {
        if n == 0 {
            return Err(config_error("EveryN step must be at least 1"));
        }
        Ok(Self { n })
    }
}

impl Stage for EveryN {
    fn name(&self) -> &str {
        "every_n"
    }

    fn run(&mut self, x: Vec<f64>, y: Vec<f64>) -> Result<(Vec<f64>, Vec<f64>)> {
        let xs = x.into_iter().step_by(self.n).collect();
        let ys = y.into_iter().step_by(self.n).collect();
        Ok((xs, ys))
    }
}

// ---------------------------------------------------------------------------
// Window crop
// ---------------------------------------------------------------------------

/// Crop to the samples nearest a `[low, high]` coordinate window.
///
/// Either end may be open. Works the same on increasing and decreasing axes.
#[derive(Debug, Clone, Copy)]
pub struct ValueWindow {
    low: Option<f64>,
    high: Option<f64>,
}

impl ValueWindow {
    pub fn new(low: Option<f64>, high: Option<f64>) -> Result<Self> {
        if low.is_some_and(|v| !v.is_finite()) || high.is_some_and(|v| !v.is_finite()) {
            return Err(config_error("window ends must be finite"));
        }
        Ok(Self { low, high })
    }
}

impl Stage for ValueWindow {
    fn name(&self) -> &str {
        "value_window"
    }

    fn run(&mut self, x: Vec<f64>, y: Vec<f64>) -> Result<(Vec<f64>, Vec<f64>)> {
        let range = slice_by_value(&x, self.low, self.high);
        Ok((x[range.clone()].to_vec(), y[range].to_vec()))
    }
}

// ---------------------------------------------------------------------------
// Subtraction
// ---------------------------------------------------------------------------

/// Subtract a fixed reference trace (a blank run, a solvent peak).
#[derive(Debug, Clone)]
pub struct Subtract {
    reference: Vec<f64>,
}

impl Subtract {
    pub fn new(reference: Vec<f64>) -> Self {
        Self { reference }
    }
}

impl Stage for Subtract {
    fn name(&self) -> &str {
        "subtract"
    }

    fn run(&mut self, x: Vec<f64>, y: Vec<f64>) -> Result<(Vec<f64>, Vec<f64>)> {
        check_lengths(&y, &self.reference)?;
        let ys = y.iter().zip(&self.reference).map(|(a, b)| a - b).collect();
        Ok((x, ys))
    }
}

// ---------------------------------------------------------------------------
// Masking
// ---------------------------------------------------------------------------

/// Drop the points a weight rejects.
///
/// The mask of the last run is kept for inspection.
#[derive(Debug)]
pub struct WeightMask {
    weights: DataWeight,
    mask: Option<Vec<bool>>,
}

impl WeightMask {
    pub fn new(weights: DataWeight) -> Self {
        Self { weights, mask: None }
    }

    pub fn mask(&self) -> Option<&[bool]> {
        self.mask.as_deref()
    }
}

impl Stage for WeightMask {
    fn name(&self) -> &str {
        "weight_mask"
    }

    fn run(&mut self, x: Vec<f64>, y: Vec<f64>) -> Result<(Vec<f64>, Vec<f64>)> {
        let mask = self.weights.get_mask(&x, &y)?;
        let kept = mask.iter().filter(|&&k| k).count();
        if kept == 0 {
            log::warn!("{}: mask removed every point", self.weights.name());
        }
        let (xs, ys) = select(&x, &y, &mask);
        self.mask = Some(mask);
        Ok((xs, ys))
    }

    /// One mask for the whole family, computed on the column-wise mean row,
    /// so every row keeps the same coordinates.
    fn run_array(
        &mut self,
        x: Vec<f64>,
        y: Vec<f64>,
        z: Vec<Vec<f64>>,
    ) -> Result<(Vec<f64>, Vec<f64>, Vec<Vec<f64>>)> {
        let mut mean = vec![0.0; x.len()];
        for row in &z {
            check_lengths(&x, row)?;
            for (m, v) in mean.iter_mut().zip(row) {
                *m += v / z.len() as f64;
            }
        }
        let mask = self.weights.get_mask(&x, &mean)?;
        let (xs, _) = select(&x, &mean, &mask);
        let rows = z.iter().map(|row| select(&x, row, &mask).1).collect();
        self.mask = Some(mask);
        Ok((xs, y, rows))
    }
}

fn select(x: &[f64], y: &[f64], mask: &[bool]) -> (Vec<f64>, Vec<f64>) {
    x.iter()
        .zip(y)
        .zip(mask)
        .filter(|(_, &keep)| keep)
        .map(|((&xi, &yi), _)| (xi, yi))
        .unzip()
}

// ---------------------------------------------------------------------------
// Row removal
// ---------------------------------------------------------------------------

/// Which rows of a family [`RemoveRows`] drops.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "rule", rename_all = "snake_case")]
pub enum RowFilter {
    /// Drop rows `start`, `start + n`, `start + 2n`, ...
    EveryN {
        n: usize,
        #[serde(default)]
        start: usize,
    },
    /// Keep rows whose value at the sample nearest `at` is below `value`.
    BelowAt {
        at: f64,
        value: f64,
        #[serde(default)]
        invert: bool,
    },
    /// Keep rows with any value above `value` inside `[low, high]`.
    AboveIn {
        low: f64,
        high: f64,
        value: f64,
        #[serde(default)]
        invert: bool,
    },
}

impl RowFilter {
    fn validate(&self) -> Result<()> {
        match *self {
            Self::EveryN { n, .. } if n == 0 => Err(config_error("row step must be at least 1")),
            Self::BelowAt { at, value, .. } if !at.is_finite() || !value.is_finite() => {
                Err(config_error("row cut-off must be finite"))
            }
            Self::AboveIn { low, high, value, .. }
                if !low.is_finite() || !high.is_finite() || !value.is_finite() =>
            {
                Err(config_error("row cut-off must be finite"))
            }
            _ => Ok(()),
        }
    }

    fn keep(&self, x: &[f64], z: &[Vec<f64>]) -> Vec<bool> {
        match *self {
            Self::EveryN { n, start } => (0..z.len()).map(|i| i < start || (i - start) % n != 0).collect(),
            Self::BelowAt { at, value, invert } => {
                let i = nearest_index(x, at);
                z.iter().map(|row| row.get(i).is_some_and(|&v| v < value) != invert).collect()
            }
            Self::AboveIn { low, high, value, invert } => {
                let range = slice_by_value(x, Some(low), Some(high));
                z.iter()
                    .map(|row| row[range.clone()].iter().any(|&v| v > value) != invert)
                    .collect()
            }
        }
    }
}

/// Drop whole rows of a family; the shared `x` axis is left untouched.
///
/// Only meaningful on a family: [`Stage::run`] on a single trace is an error.
#[derive(Debug, Clone)]
pub struct RemoveRows {
    filter: RowFilter,
    kept: Option<Vec<bool>>,
}

impl RemoveRows {
    pub fn new(filter: RowFilter) -> Result<Self> {
        filter.validate()?;
        Ok(Self { filter, kept: None })
    }

    /// Row selection of the last run, `true` for rows that survived.
    pub fn kept(&self) -> Option<&[bool]> {
        self.kept.as_deref()
    }
}

impl Stage for RemoveRows {
    fn name(&self) -> &str {
        "remove_rows"
    }

    fn run(&mut self, _x: Vec<f64>, _y: Vec<f64>) -> Result<(Vec<f64>, Vec<f64>)> {
        Err(Error::Stage {
            stage: self.name().to_string(),
            message: "a single trace has no rows to remove".to_string(),
        })
    }

    fn run_array(
        &mut self,
        x: Vec<f64>,
        y: Vec<f64>,
        z: Vec<Vec<f64>>,
    ) -> Result<(Vec<f64>, Vec<f64>, Vec<Vec<f64>>)> {
        if y.len() != z.len() {
            return Err(Error::LengthMismatch { x: y.len(), y: z.len() });
        }
        for row in &z {
            check_lengths(&x, row)?;
        }
        let keep = self.filter.keep(&x, &z);
        let (ys, rows): (Vec<f64>, Vec<Vec<f64>>) = y
            .into_iter()
            .zip(z)
            .zip(&keep)
            .filter(|(_, &k)| k)
            .map(|(pair, _)| pair)
            .unzip();
        log::debug!("{}: kept {} of {} rows", self.name(), rows.len(), keep.len());
        if rows.is_empty() && !keep.is_empty() {
            log::warn!("{}: every row removed", self.name());
        }
        self.kept = Some(keep);
        Ok((x, ys, rows))
    }
}
