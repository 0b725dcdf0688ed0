use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::{check_lengths, config_error, Result};
use crate::math::banded::{solve_spd, SymmetricBanded};
use crate::math::polyfit;
use crate::processing::weights::DataWeight;
use crate::processing::Stage;

// ---------------------------------------------------------------------------
// Baseline models
// ---------------------------------------------------------------------------

/// A baseline estimator.
///
/// `mask` selects the points the fit may use; the returned baseline covers
/// every point of `x`, so excluded regions are extrapolated.
pub trait Baseline: fmt::Debug + Send + Sync {
    fn name(&self) -> &'static str;

    fn fit(&self, x: &[f64], y: &[f64], mask: &[bool], sample_weights: Option<&[f64]>) -> Result<Vec<f64>>;
}

/// Least-squares polynomial through the masked points.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PolynomialBaseline {
    pub degree: usize,
}

impl PolynomialBaseline {
    pub fn new(degree: usize) -> Self {
        Self { degree }
    }
}

impl Default for PolynomialBaseline {
    fn default() -> Self {
        Self { degree: 1 }
    }
}

impl Baseline for PolynomialBaseline {
    fn name(&self) -> &'static str {
        "polynomial_baseline"
    }

    fn fit(&self, x: &[f64], y: &[f64], mask: &[bool], sample_weights: Option<&[f64]>) -> Result<Vec<f64>> {
        let mut xm = Vec::new();
        let mut ym = Vec::new();
        let mut wm = Vec::new();
        for (i, &keep) in mask.iter().enumerate() {
            if keep {
                xm.push(x[i]);
                ym.push(y[i]);
                wm.push(sample_weights.map_or(1.0, |w| w[i]));
            }
        }
        let poly = polyfit(&xm, &ym, self.degree, Some(&wm))?;
        Ok(poly.eval_many(x))
    }
}

/// Asymmetric least squares (Eilers): a smooth curve under the signal.
///
/// Minimizes `Σ wᵢ (yᵢ - zᵢ)² + λ Σ (Δ²z)²`, re-weighting points above the
/// curve with `p` and below it with `1 - p` until the weights settle.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct AsymmetricLeastSquares {
    pub lambda: f64,
    pub p: f64,
    pub max_iter: usize,
}

impl AsymmetricLeastSquares {
    pub fn new(lambda: f64, p: f64, max_iter: usize) -> Result<Self> {
        if !(lambda.is_finite() && lambda > 0.0) {
            return Err(config_error(format!("lambda must be > 0, got {lambda}")));
        }
        if !(p > 0.0 && p < 1.0) {
            return Err(config_error(format!("p must be in (0, 1), got {p}")));
        }
        if max_iter == 0 {
            return Err(config_error("max_iter must be at least 1"));
        }
        Ok(Self { lambda, p, max_iter })
    }
}

impl Baseline for AsymmetricLeastSquares {
    fn name(&self) -> &'static str {
        "als_baseline"
    }

    fn fit(&self, _x: &[f64], y: &[f64], mask: &[bool], sample_weights: Option<&[f64]>) -> Result<Vec<f64>> {
        let n = y.len();
        if n < 3 {
            log::warn!("ALS baseline needs 3 points, got {n}; returning the signal itself");
            return Ok(y.to_vec());
        }
        let base: Vec<f64> = mask
            .iter()
            .enumerate()
            .map(|(i, &keep)| if keep { sample_weights.map_or(1.0, |w| w[i]) } else { 0.0 })
            .collect();
        if base.iter().filter(|&&w| w > 0.0).count() < 2 {
            return Err(config_error("ALS baseline needs at least 2 weighted points"));
        }

        let penalty = SymmetricBanded::second_difference_penalty(n, self.lambda);
        let mut w = base.clone();
        let mut z = y.to_vec();
        for iteration in 0..self.max_iter {
            let mut system = penalty.clone();
            for (i, &wi) in w.iter().enumerate() {
                system.add(i, i, wi);
            }
            let rhs: Vec<f64> = w.iter().zip(y).map(|(wi, yi)| wi * yi).collect();
            z = solve_spd(&system, &rhs)?;

            let next: Vec<f64> = base
                .iter()
                .zip(y.iter().zip(&z))
                .map(|(b, (yi, zi))| b * if yi > zi { self.p } else { 1.0 - self.p })
                .collect();
            if next == w {
                log::trace!("ALS baseline settled after {} iteration(s)", iteration + 1);
                break;
            }
            w = next;
        }
        Ok(z)
    }
}

// ---------------------------------------------------------------------------
// Sample weights
// ---------------------------------------------------------------------------

/// Per-point weights applied inside the fit (not the inclusion mask).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SampleWeights {
    /// One weight per column, shared by every row.
    PerColumn(Vec<f64>),
    /// One weight array per row of a signal family.
    PerRow(Vec<Vec<f64>>),
}

// ---------------------------------------------------------------------------
// BaselineCorrection – the pipeline stage
// ---------------------------------------------------------------------------

/// Subtracts a fitted baseline; keeps the last baseline for inspection.
#[derive(Debug)]
pub struct BaselineCorrection<B: Baseline> {
    model: B,
    weights: Option<DataWeight>,
    sample_weights: Option<SampleWeights>,
    baseline_x: Option<Vec<f64>>,
    baseline: Option<Vec<f64>>,
    baseline_rows: Option<Vec<Vec<f64>>>,
}

impl<B: Baseline> BaselineCorrection<B> {
    pub fn new(model: B) -> Self {
        Self {
            model,
            weights: None,
            sample_weights: None,
            baseline_x: None,
            baseline: None,
            baseline_rows: None,
        }
    }

    /// Restrict the fit to points passing this weight's mask.
    pub fn with_weights(mut self, weights: DataWeight) -> Self {
        self.weights = Some(weights);
        self
    }

    pub fn with_sample_weights(mut self, sample_weights: SampleWeights) -> Self {
        self.sample_weights = Some(sample_weights);
        self
    }

    pub fn model(&self) -> &B {
        &self.model
    }

    /// Baseline subtracted during the last single-signal run.
    pub fn baseline(&self) -> Option<&[f64]> {
        self.baseline.as_deref()
    }

    /// Baselines subtracted during the last family run, one per row.
    pub fn baseline_rows(&self) -> Option<&[Vec<f64>]> {
        self.baseline_rows.as_deref()
    }

    /// Coordinates the last baseline was evaluated on.
    pub fn baseline_x(&self) -> Option<&[f64]> {
        self.baseline_x.as_deref()
    }

    /// Baseline estimate for one signal, same length as `y`.
    pub fn get_baseline(&self, x: &[f64], y: &[f64]) -> Result<Vec<f64>> {
        let sample = match &self.sample_weights {
            None => None,
            Some(SampleWeights::PerColumn(w)) => Some(w.as_slice()),
            Some(SampleWeights::PerRow(rows)) if rows.len() == 1 => Some(rows[0].as_slice()),
            Some(SampleWeights::PerRow(rows)) => {
                return Err(config_error(format!(
                    "{} per-row sample weights given for a single signal",
                    rows.len()
                )))
            }
        };
        self.fit_row(x, y, sample)
    }

    /// Baselines for a family of rows sharing `x`.
    ///
    /// Per-row sample weights are used when their shape matches `z` exactly;
    /// a per-column array (or a single row) is broadcast to every row.
    pub fn get_baseline_array(&self, x: &[f64], z: &[Vec<f64>]) -> Result<Vec<Vec<f64>>> {
        let cols = x.len();
        z.iter()
            .enumerate()
            .map(|(r, row)| {
                let sample = match &self.sample_weights {
                    None => None,
                    Some(SampleWeights::PerRow(w)) if w.len() == z.len() && w[r].len() == cols => {
                        Some(w[r].as_slice())
                    }
                    Some(SampleWeights::PerRow(w)) if w.len() == 1 && w[0].len() == cols => {
                        Some(w[0].as_slice())
                    }
                    Some(SampleWeights::PerColumn(w)) if w.len() == cols => Some(w.as_slice()),
                    Some(other) => {
                        return Err(config_error(format!(
                            "sample weights have the wrong shape for {} x {cols} data: {}",
                            z.len(),
                            describe_shape(other)
                        )))
                    }
                };
                self.fit_row(x, row, sample)
            })
            .collect()
    }

    fn fit_row(&self, x: &[f64], y: &[f64], sample: Option<&[f64]>) -> Result<Vec<f64>> {
        check_lengths(x, y)?;
        if let Some(w) = sample {
            check_lengths(x, w)?;
        }
        let mask = match &self.weights {
            Some(weights) => weights.get_mask(x, y)?,
            None => vec![true; y.len()],
        };
        self.model.fit(x, y, &mask, sample)
    }
}

fn describe_shape(weights: &SampleWeights) -> String {
    match weights {
        SampleWeights::PerColumn(w) => format!("{} columns", w.len()),
        SampleWeights::PerRow(rows) => format!(
            "{} rows x {} columns",
            rows.len(),
            rows.first().map_or(0, Vec::len)
        ),
    }
}

impl<B: Baseline + 'static> Stage for BaselineCorrection<B> {
    fn name(&self) -> &str {
        self.model.name()
    }

    fn run(&mut self, x: Vec<f64>, y: Vec<f64>) -> Result<(Vec<f64>, Vec<f64>)> {
        let baseline = self.get_baseline(&x, &y)?;
        let corrected = y.iter().zip(&baseline).map(|(v, b)| v - b).collect();
        self.baseline = Some(baseline);
        self.baseline_x = Some(x.clone());
        Ok((x, corrected))
    }

    fn run_array(
        &mut self,
        x: Vec<f64>,
        y: Vec<f64>,
        z: Vec<Vec<f64>>,
    ) -> Result<(Vec<f64>, Vec<f64>, Vec<Vec<f64>>)> {
        let baselines = self.get_baseline_array(&x, &z)?;
        let corrected = z
            .iter()
            .zip(&baselines)
            .map(|(row, base)| row.iter().zip(base).map(|(v, b)| v - b).collect())
            .collect();
        self.baseline_rows = Some(baselines);
        self.baseline_x = Some(x.clone());
        Ok((x, y, corrected))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::math::linspace;
    use crate::processing::weights::{Span, Spans};

    fn peak_on_slope(x: &[f64]) -> Vec<f64> {
        x.iter()
            .map(|&v| 2.0 + 0.3 * v + 8.0 * (-(v - 5.0).powi(2) / 0.1).exp())
            .collect()
    }

    fn peak_window() -> DataWeight {
        DataWeight::new(Spans::new(vec![Span::Value { low: 3.0, high: 7.0 }], false).unwrap())
    }

    #[test]
    fn polynomial_baseline_ignores_masked_peak() {
        let x = linspace(0.0, 10.0, 201);
        let y = peak_on_slope(&x);
        let mut stage = BaselineCorrection::new(PolynomialBaseline::new(1)).with_weights(peak_window());
        let (_, corrected) = stage.run(x.clone(), y).unwrap();
        assert!(corrected[0].abs() < 1e-6);
        assert!(corrected[200].abs() < 1e-6);
        assert!((corrected[100] - 8.0).abs() < 1e-6);
        let baseline = stage.baseline().unwrap();
        assert!((baseline[100] - 3.5).abs() < 1e-6);
    }

    #[test]
    fn als_recovers_flat_offset() {
        let x = linspace(0.0, 10.0, 300);
        let y: Vec<f64> = x
            .iter()
            .map(|&v| 1.5 + 6.0 * (-(v - 4.0).powi(2) / 0.2).exp())
            .collect();
        let als = AsymmetricLeastSquares::new(1e5, 0.01, 20).unwrap();
        let stage = BaselineCorrection::new(als);
        let baseline = stage.get_baseline(&x, &y).unwrap();
        assert!((baseline[0] - 1.5).abs() < 0.2);
        assert!((baseline[299] - 1.5).abs() < 0.2);
        assert!(baseline[120] < 3.0);
    }

    #[test]
    fn batch_broadcasts_column_weights() {
        let x = linspace(0.0, 10.0, 101);
        let rows = vec![peak_on_slope(&x), peak_on_slope(&x).iter().map(|v| v + 1.0).collect()];
        let mut stage = BaselineCorrection::new(PolynomialBaseline::new(1))
            .with_weights(peak_window())
            .with_sample_weights(SampleWeights::PerColumn(vec![1.0; 101]));
        let (_, t, z) = stage.run_array(x, vec![0.0, 1.0], rows).unwrap();
        assert_eq!(t, vec![0.0, 1.0]);
        assert!(z[0][0].abs() < 1e-6);
        assert!(z[1][0].abs() < 1e-6);
        assert_eq!(stage.baseline_rows().unwrap().len(), 2);
    }

    #[test]
    fn batch_rejects_mismatched_weights() {
        let x = linspace(0.0, 1.0, 5);
        let stage = BaselineCorrection::new(PolynomialBaseline::new(1))
            .with_sample_weights(SampleWeights::PerColumn(vec![1.0; 4]));
        assert!(stage.get_baseline_array(&x, &[vec![0.0; 5]]).is_err());
    }

    #[test]
    fn als_validates_parameters() {
        assert!(AsymmetricLeastSquares::new(0.0, 0.1, 10).is_err());
        assert!(AsymmetricLeastSquares::new(1e4, 1.0, 10).is_err());
    }
}
