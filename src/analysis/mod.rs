/// Analysis layer: from a processed trace to quantified peaks.
///
/// ```text
///   processed (x, y)
///        │
///        ▼
///   peak_picking   ── PeakCandidate { index, height, prominence }
///        │
///        ▼
///   boundary       ── RollingBall::detect → Vec<Peak>
///        │
///        ▼
///   peak           ── PeakStats on demand (moments, widths, Mn/Mw)
///
///   calibration    ── axis mapping used by limits and molar-mass stats
/// ```

pub mod boundary;
pub mod calibration;
pub mod peak;
pub mod peak_picking;

pub use boundary::RollingBall;
pub use calibration::Calibration;
pub use peak::{MolecularWeightStats, Peak, PeakId, PeakParent, PeakReport, PeakStats, PeakView};
pub use peak_picking::{DomainLimit, LimitDomain, PeakCandidate, PeakPicking};
