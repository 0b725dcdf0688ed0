use std::fmt;
use std::sync::Arc;

use crate::error::{config_error, Error, Result};
use crate::math::optimize::minimize_scalar;
use crate::math::AxisDirection;

/// Seed for the first output-bound search.
const DEFAULT_SEED: f64 = 0.1;
const SEARCH_STEP: f64 = 0.1;
const SEARCH_TOL: f64 = 1e-12;
/// Relative miss accepted when mapping an output bound back to the input.
const ROUND_TRIP_TOL: f64 = 1e-6;

type CalibrationFn = Arc<dyn Fn(f64) -> f64 + Send + Sync>;

// ---------------------------------------------------------------------------
// Calibration
// ---------------------------------------------------------------------------

/// A function from one physical axis to another (elution time to molar mass,
/// channel to wavelength) plus an optional validity window.
///
/// The window always lives in the input domain. Bounds given in the output
/// domain are mapped back at construction by minimizing `|f(x) - target|`.
#[derive(Clone)]
pub struct Calibration {
    name: String,
    function: CalibrationFn,
    seed: f64,
    input_bounds: Option<(f64, f64)>,
    output_bounds: Option<(f64, f64)>,
}

impl fmt::Debug for Calibration {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Calibration")
            .field("name", &self.name)
            .field("input_bounds", &self.input_bounds)
            .field("output_bounds", &self.output_bounds)
            .finish()
    }
}

impl fmt::Display for Calibration {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name)?;
        if let Some((lo, hi)) = self.output_bounds {
            write!(f, " ({lo}:{hi})")?;
        }
        Ok(())
    }
}

impl Calibration {
    pub fn new(name: impl Into<String>, function: impl Fn(f64) -> f64 + Send + Sync + 'static) -> Self {
        Self {
            name: name.into(),
            function: Arc::new(function),
            seed: DEFAULT_SEED,
            input_bounds: None,
            output_bounds: None,
        }
    }

    /// Starting point for the output-bound search. Set before
    /// [`Calibration::with_output_bounds`].
    pub fn with_seed(mut self, seed: f64) -> Result<Self> {
        if !seed.is_finite() {
            return Err(config_error(format!("calibration seed must be finite, got {seed}")));
        }
        self.seed = seed;
        Ok(self)
    }

    /// Validity window in the input domain.
    pub fn with_input_bounds(mut self, a: f64, b: f64) -> Result<Self> {
        let (lo, hi) = ordered_bounds(a, b)?;
        self.input_bounds = Some((lo, hi));
        self.output_bounds = Some(min_max((self.function)(lo), (self.function)(hi)));
        Ok(self)
    }

    /// Validity window in the output domain.
    ///
    /// The upper target is searched from the seed, the lower one from the
    /// upper solution. A target the function never reaches is an
    /// [`Error::Convergence`].
    pub fn with_output_bounds(mut self, a: f64, b: f64) -> Result<Self> {
        let (lo, hi) = ordered_bounds(a, b)?;
        let x_hi = self.solve_for(hi, self.seed)?;
        let x_lo = self.solve_for(lo, x_hi)?;
        log::debug!(
            "calibration '{}': output bounds ({lo}, {hi}) map to inputs ({x_lo}, {x_hi})",
            self.name
        );
        self.input_bounds = Some(min_max(x_lo, x_hi));
        self.output_bounds = Some((lo, hi));
        Ok(self)
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// `(low, high)` input-domain window, if any.
    pub fn input_bounds(&self) -> Option<(f64, f64)> {
        self.input_bounds
    }

    /// `(low, high)` output-domain window, if any.
    pub fn output_bounds(&self) -> Option<(f64, f64)> {
        self.output_bounds
    }

    /// `f(x)`, or 0 outside the validity window (bounds inclusive).
    pub fn get_y(&self, x: f64) -> f64 {
        match self.input_bounds {
            Some((lo, hi)) if x < lo || x > hi => 0.0,
            _ => (self.function)(x),
        }
    }

    pub fn get_y_unbounded(&self, x: f64) -> f64 {
        (self.function)(x)
    }

    pub fn get_y_many(&self, x: &[f64]) -> Vec<f64> {
        x.iter().map(|&v| self.get_y(v)).collect()
    }

    /// Whether the output grows or shrinks as the input grows.
    ///
    /// Judged over the validity window when there is one, else one search
    /// step around the seed.
    pub fn output_direction(&self) -> AxisDirection {
        let (a, b) = self.input_bounds.unwrap_or((self.seed, self.seed + SEARCH_STEP));
        if (self.function)(b) < (self.function)(a) {
            AxisDirection::Decreasing
        } else {
            AxisDirection::Increasing
        }
    }

    fn solve_for(&self, target: f64, seed: f64) -> Result<f64> {
        let f = &self.function;
        let min = minimize_scalar(|x| (f(x) - target).abs(), seed, SEARCH_STEP, SEARCH_TOL)?;
        if min.value > ROUND_TRIP_TOL * target.abs().max(1.0) {
            return Err(Error::Convergence(format!(
                "calibration '{}' never reaches {target} (closest {} at x = {})",
                self.name,
                f(min.x),
                min.x
            )));
        }
        Ok(min.x)
    }
}

fn ordered_bounds(a: f64, b: f64) -> Result<(f64, f64)> {
    if !a.is_finite() || !b.is_finite() {
        return Err(config_error(format!("calibration bounds must be finite, got ({a}, {b})")));
    }
    if a == b {
        return Err(config_error(format!("calibration bounds must differ, got ({a}, {b})")));
    }
    Ok(min_max(a, b))
}

fn min_max(a: f64, b: f64) -> (f64, f64) {
    if a <= b {
        (a, b)
    } else {
        (b, a)
    }
}
