/// Peak quantification for 1-D analytical traces.
///
/// ```text
///   raw (x, y) ── Pipeline (baseline, resample, mask) ── Trace
///                                                          │
///                         PeakPicking → RollingBall → Vec<Peak> → PeakStats
/// ```

pub mod analysis;
pub mod config;
pub mod data;
pub mod error;
pub mod math;
pub mod processing;
pub mod signal;
pub mod signal_array;

pub use analysis::{Calibration, Peak, PeakId, PeakPicking, PeakReport, PeakStats, RollingBall};
pub use config::{AnalysisConfig, Analyzer};
pub use error::{Error, Result};
pub use math::AxisDirection;
pub use processing::{Pipeline, PipelineState, Stage};
pub use signal::{Signal, Trace};
pub use signal_array::{RowAnalysis, SignalArray};
