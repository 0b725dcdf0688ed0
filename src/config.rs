use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::analysis::{Calibration, DomainLimit, LimitDomain, PeakPicking, PeakReport, RollingBall};
use crate::error::{config_error, Result};
use crate::processing::baseline::{AsymmetricLeastSquares, BaselineCorrection, PolynomialBaseline, SampleWeights};
use crate::processing::transform::{EveryN, RemoveRows, RowFilter, Subtract, ValueWindow, WeightMask};
use crate::processing::weights::{
    AdaptiveDistanceMedian, DataWeight, DistanceMedian, MultiPoint, Penalty, Span, Spans, WeightChain,
    WeightFunction,
};
use crate::processing::{Pipeline, Stage};
use crate::signal::Signal;

// ---------------------------------------------------------------------------
// Weights
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum WeightFunctionConfig {
    Spans {
        spans: Vec<Span>,
        #[serde(default)]
        invert: bool,
    },
    MultiPoint {
        indices: Vec<usize>,
    },
    DistanceMedian {
        #[serde(default)]
        penalty: Penalty,
    },
    AdaptiveDistanceMedian {
        #[serde(default)]
        penalty: Penalty,
        amount: f64,
        #[serde(default = "default_speed")]
        speed: f64,
        #[serde(default = "default_max_iter")]
        max_iter: usize,
    },
    Chain {
        links: Vec<WeightFunctionConfig>,
    },
}

fn default_speed() -> f64 {
    1.0
}

fn default_max_iter() -> usize {
    10
}

impl WeightFunctionConfig {
    fn build(&self) -> Result<Arc<dyn WeightFunction>> {
        Ok(match self {
            Self::Spans { spans, invert } => Arc::new(Spans::new(spans.clone(), *invert)?),
            Self::MultiPoint { indices } => Arc::new(MultiPoint::new(indices.clone())?),
            Self::DistanceMedian { penalty } => Arc::new(DistanceMedian::new(*penalty)?),
            Self::AdaptiveDistanceMedian {
                penalty,
                amount,
                speed,
                max_iter,
            } => Arc::new(AdaptiveDistanceMedian::new(*penalty, *amount, *speed, *max_iter)?),
            Self::Chain { links } => {
                let links = links.iter().map(Self::build).collect::<Result<Vec<_>>>()?;
                Arc::new(WeightChain::new(links)?)
            }
        })
    }
}

/// A weight function plus its mask policy.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WeightConfig {
    #[serde(flatten)]
    pub function: WeightFunctionConfig,
    #[serde(default)]
    pub threshold: Option<f64>,
    #[serde(default)]
    pub normalized: Option<bool>,
}

impl WeightConfig {
    pub fn build(&self) -> Result<DataWeight> {
        let mut weight = DataWeight::from_shared(self.function.build()?);
        if let Some(threshold) = self.threshold {
            weight = weight.with_threshold(threshold)?;
        }
        if let Some(normalized) = self.normalized {
            weight = weight.with_normalized(normalized);
        }
        Ok(weight)
    }
}

// ---------------------------------------------------------------------------
// Stages
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum BaselineModel {
    Polynomial {
        degree: usize,
    },
    Als {
        lambda: f64,
        p: f64,
        #[serde(default = "default_max_iter")]
        max_iter: usize,
    },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum StageConfig {
    Baseline {
        model: BaselineModel,
        #[serde(default)]
        weights: Option<WeightConfig>,
        #[serde(default)]
        sample_weights: Option<SampleWeights>,
    },
    EveryN {
        n: usize,
    },
    ValueWindow {
        #[serde(default)]
        low: Option<f64>,
        #[serde(default)]
        high: Option<f64>,
    },
    Subtract {
        reference: Vec<f64>,
    },
    Mask {
        weights: WeightConfig,
    },
    /// Family-only; fails when run on a single trace.
    RemoveRows {
        filter: RowFilter,
    },
}

impl StageConfig {
    pub fn build(&self) -> Result<Box<dyn Stage>> {
        Ok(match self {
            Self::Baseline {
                model,
                weights,
                sample_weights,
            } => match model {
                BaselineModel::Polynomial { degree } => {
                    boxed_baseline(BaselineCorrection::new(PolynomialBaseline::new(*degree)), weights, sample_weights)?
                }
                BaselineModel::Als { lambda, p, max_iter } => boxed_baseline(
                    BaselineCorrection::new(AsymmetricLeastSquares::new(*lambda, *p, *max_iter)?),
                    weights,
                    sample_weights,
                )?,
            },
            Self::EveryN { n } => Box::new(EveryN::new(*n)?),
            Self::ValueWindow { low, high } => Box::new(ValueWindow::new(*low, *high)?),
            Self::Subtract { reference } => Box::new(Subtract::new(reference.clone())),
            Self::Mask { weights } => Box::new(WeightMask::new(weights.build()?)),
            Self::RemoveRows { filter } => Box::new(RemoveRows::new(filter.clone())?),
        })
    }
}

fn boxed_baseline<B>(
    mut stage: BaselineCorrection<B>,
    weights: &Option<WeightConfig>,
    sample_weights: &Option<SampleWeights>,
) -> Result<Box<dyn Stage>>
where
    B: crate::processing::baseline::Baseline + 'static,
{
    if let Some(w) = weights {
        stage = stage.with_weights(w.build()?);
    }
    if let Some(sw) = sample_weights {
        stage = stage.with_sample_weights(sw.clone());
    }
    Ok(Box::new(stage))
}

// ---------------------------------------------------------------------------
// Peak picking & boundaries
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PickingMode {
    /// Every local maximum passing the filters.
    #[default]
    All,
    /// Only the global maximum.
    Max,
}

/// Candidate window; `calibrated` compares in the calibration's output
/// domain instead of raw coordinates.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct LimitConfig {
    pub low: f64,
    pub high: f64,
    #[serde(default)]
    pub calibrated: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PickingConfig {
    pub mode: PickingMode,
    pub min_height: Option<f64>,
    pub min_prominence: Option<f64>,
    pub min_width: Option<f64>,
    pub max_width: Option<f64>,
    pub distance: usize,
    pub weights: Option<WeightConfig>,
    pub limits: Option<LimitConfig>,
}

impl Default for PickingConfig {
    fn default() -> Self {
        Self {
            mode: PickingMode::All,
            min_height: None,
            min_prominence: None,
            min_width: None,
            max_width: None,
            distance: 1,
            weights: None,
            limits: None,
        }
    }
}

impl PickingConfig {
    pub fn build(&self, calibration: Option<&Calibration>) -> Result<PeakPicking> {
        let weights = self.weights.as_ref().map(WeightConfig::build).transpose()?;
        let limits = match self.limits {
            None => None,
            Some(LimitConfig { low, high, calibrated: false }) => {
                Some(DomainLimit::new(low, high, LimitDomain::Coordinate)?)
            }
            Some(LimitConfig { low, high, calibrated: true }) => {
                let cal = calibration.ok_or_else(|| config_error("calibrated limits need a calibration"))?;
                Some(DomainLimit::new(low, high, LimitDomain::Calibrated(cal.clone()))?)
            }
        };
        Ok(PeakPicking {
            min_height: self.min_height,
            min_prominence: self.min_prominence,
            min_width: self.min_width,
            max_width: self.max_width,
            distance: self.distance.max(1),
            weights,
            limits,
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BoundaryConfig {
    pub n: usize,
    pub poly_degree: usize,
    /// Defaults to `poly_degree`.
    pub deriv_degree: Option<usize>,
    pub max_derivative: f64,
    pub n_points_with_pos_slope: usize,
    pub min_height: f64,
}

impl Default for BoundaryConfig {
    fn default() -> Self {
        Self {
            n: 2,
            poly_degree: 1,
            deriv_degree: None,
            max_derivative: 0.0,
            n_points_with_pos_slope: 1,
            min_height: 0.01,
        }
    }
}

impl BoundaryConfig {
    pub fn build(&self) -> Result<RollingBall> {
        RollingBall::new(
            self.n,
            self.poly_degree,
            self.deriv_degree.unwrap_or(self.poly_degree),
            self.max_derivative,
            self.n_points_with_pos_slope,
            self.min_height,
        )
    }
}

// ---------------------------------------------------------------------------
// Calibration
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum CalibrationFunction {
    /// `10^(intercept + slope * x)`, the usual SEC conventional calibration.
    LogLinear { slope: f64, intercept: f64 },
    /// `Σ cᵢ xⁱ` (ascending), or `10^Σ cᵢ xⁱ` with `log10`.
    Polynomial {
        coefficients: Vec<f64>,
        #[serde(default)]
        log10: bool,
    },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CalibrationConfig {
    #[serde(default = "default_calibration_name")]
    pub name: String,
    #[serde(flatten)]
    pub function: CalibrationFunction,
    #[serde(default)]
    pub seed: Option<f64>,
    #[serde(default)]
    pub input_bounds: Option<[f64; 2]>,
    #[serde(default)]
    pub output_bounds: Option<[f64; 2]>,
}

fn default_calibration_name() -> String {
    "calibration".into()
}

impl CalibrationConfig {
    pub fn build(&self) -> Result<Calibration> {
        let mut cal = match &self.function {
            CalibrationFunction::LogLinear { slope, intercept } => {
                let (slope, intercept) = (*slope, *intercept);
                Calibration::new(&self.name, move |x| 10f64.powf(intercept + slope * x))
            }
            CalibrationFunction::Polynomial { coefficients, log10 } => {
                if coefficients.is_empty() {
                    return Err(config_error("calibration polynomial needs coefficients"));
                }
                let (coefficients, log10) = (coefficients.clone(), *log10);
                Calibration::new(&self.name, move |x| {
                    let v = coefficients.iter().rev().fold(0.0, |acc, c| acc * x + c);
                    if log10 {
                        10f64.powf(v)
                    } else {
                        v
                    }
                })
            }
        };
        if let Some(seed) = self.seed {
            cal = cal.with_seed(seed)?;
        }
        match (self.input_bounds, self.output_bounds) {
            (Some(_), Some(_)) => {
                return Err(config_error("give calibration bounds in one domain only"));
            }
            (Some([a, b]), None) => cal = cal.with_input_bounds(a, b)?,
            (None, Some([a, b])) => cal = cal.with_output_bounds(a, b)?,
            (None, None) => {}
        }
        Ok(cal)
    }
}

// ---------------------------------------------------------------------------
// AnalysisConfig
// ---------------------------------------------------------------------------

/// JSON-loadable analysis settings.
///
/// ```json
/// {
///   "stages": [
///     { "type": "baseline", "model": { "kind": "polynomial", "degree": 1 },
///       "weights": { "kind": "spans", "spans": [{ "by": "value", "low": 3, "high": 7 }] } },
///     { "type": "every_n", "n": 2 }
///   ],
///   "picking": { "min_height": 1.0 },
///   "boundary": { "n": 2, "min_height": 0.01 },
///   "calibration": { "kind": "log_linear", "slope": -0.6, "intercept": 10.644,
///                    "output_bounds": [160, 1090000] }
/// }
/// ```
///
/// Every section is optional; omitted sections take their defaults.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AnalysisConfig {
    pub stages: Vec<StageConfig>,
    pub picking: PickingConfig,
    pub boundary: BoundaryConfig,
    pub calibration: Option<CalibrationConfig>,
}

impl AnalysisConfig {
    pub fn from_json_str(text: &str) -> Result<Self> {
        serde_json::from_str(text).map_err(|e| config_error(format!("analysis config: {e}")))
    }

    pub fn build_pipeline(&self) -> Result<Pipeline> {
        let mut pipeline = Pipeline::new();
        for stage in &self.stages {
            pipeline.add_boxed(stage.build()?);
        }
        Ok(pipeline)
    }

    /// Validate everything once and keep the reusable parts.
    pub fn build(&self) -> Result<Analyzer> {
        let calibration = self.calibration.as_ref().map(CalibrationConfig::build).transpose()?;
        let picking = self.picking.build(calibration.as_ref())?;
        let detector = self.boundary.build()?;
        // Fail early on bad stage settings rather than on the first record.
        self.build_pipeline()?;
        Ok(Analyzer {
            config: self.clone(),
            calibration,
            picking,
            detector,
        })
    }
}

/// A built configuration, applied record by record.
///
/// Pipelines hold per-run state, so each signal gets its own.
#[derive(Debug)]
pub struct Analyzer {
    config: AnalysisConfig,
    calibration: Option<Calibration>,
    picking: PeakPicking,
    detector: RollingBall,
}

impl Analyzer {
    pub fn config(&self) -> &AnalysisConfig {
        &self.config
    }

    pub fn calibration(&self) -> Option<&Calibration> {
        self.calibration.as_ref()
    }

    /// A signal carrying this configuration's pipeline and calibration.
    pub fn signal(&self, id: usize, x: Vec<f64>, y: Vec<f64>) -> Result<Signal> {
        let signal = Signal::new(id, x, y)?.with_pipeline(self.config.build_pipeline()?);
        Ok(match &self.calibration {
            Some(cal) => signal.with_calibration(cal.clone()),
            None => signal,
        })
    }

    /// Process, pick and bound one signal; return its peak reports.
    pub fn analyze(&self, signal: &mut Signal) -> Result<Vec<PeakReport>> {
        let picking = self.picking.fresh();
        match self.config.picking.mode {
            PickingMode::All => signal.find_peaks(&picking, &self.detector)?,
            PickingMode::Max => signal.find_max_peak(&picking, &self.detector)?,
        };
        signal.stats()
    }
}
