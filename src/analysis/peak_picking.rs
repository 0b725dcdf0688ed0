use std::cmp::Ordering;

use serde::Serialize;

use crate::analysis::calibration::Calibration;
use crate::error::{check_lengths, config_error, Result};
use crate::math::argmax;
use crate::processing::weights::DataWeight;

/// Local maximum found on a trace, not bounded yet.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PeakCandidate {
    /// Index into the full trace.
    pub index: usize,
    pub height: f64,
    pub prominence: f64,
    /// Width at half prominence, in samples of the searched array.
    pub width: f64,
}

// ---------------------------------------------------------------------------
// Domain limits
// ---------------------------------------------------------------------------

/// Which axis a [`DomainLimit`] is expressed on.
#[derive(Debug, Clone)]
pub enum LimitDomain {
    /// The trace's own coordinates.
    Coordinate,
    /// Coordinates mapped through a calibration (e.g. molar mass).
    Calibrated(Calibration),
}

/// Keep candidates whose coordinate lies in `[low, high]` of some domain.
///
/// The window is ordered on construction and compared in its own domain, so
/// a calibration that runs high-to-low needs no special handling.
#[derive(Debug, Clone)]
pub struct DomainLimit {
    low: f64,
    high: f64,
    domain: LimitDomain,
}

impl DomainLimit {
    pub fn new(a: f64, b: f64, domain: LimitDomain) -> Result<Self> {
        if !a.is_finite() || !b.is_finite() || a == b {
            return Err(config_error(format!("domain limit needs two distinct finite ends, got ({a}, {b})")));
        }
        Ok(Self {
            low: a.min(b),
            high: a.max(b),
            domain,
        })
    }

    pub fn bounds(&self) -> (f64, f64) {
        (self.low, self.high)
    }

    pub fn domain(&self) -> &LimitDomain {
        &self.domain
    }

    pub fn contains(&self, coordinate: f64) -> bool {
        let value = match &self.domain {
            LimitDomain::Coordinate => coordinate,
            LimitDomain::Calibrated(cal) => cal.get_y_unbounded(coordinate),
        };
        (self.low..=self.high).contains(&value)
    }
}

// ---------------------------------------------------------------------------
// PeakPicking
// ---------------------------------------------------------------------------

/// Peak search configuration. Thresholds left at `None` are not applied.
///
/// Candidate search on a processed trace runs in three steps:
///
/// 1. Local maxima (`y[i] > y[i-1]` and `y[i] > y[i+1]`), flat tops reduced
///    to their midpoint.
/// 2. Height, prominence (height above the higher surrounding valley) and
///    width at half prominence, in index units.
/// 3. Threshold filters, then a minimum index distance keeping the highest.
///
/// With a weight attached the search runs on the masked sub-array and indices
/// are mapped back to the full trace.
#[derive(Debug)]
pub struct PeakPicking {
    pub min_height: Option<f64>,
    pub min_prominence: Option<f64>,
    pub min_width: Option<f64>,
    pub max_width: Option<f64>,
    /// Minimum index distance between kept peaks. 1 disables the filter.
    pub distance: usize,
    pub weights: Option<DataWeight>,
    pub limits: Option<DomainLimit>,
}

impl Default for PeakPicking {
    fn default() -> Self {
        Self {
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

impl PeakPicking {
    pub fn with_weights(mut self, weights: DataWeight) -> Self {
        self.weights = Some(weights);
        self
    }

    pub fn with_limits(mut self, limits: DomainLimit) -> Self {
        self.limits = Some(limits);
        self
    }

    /// Same settings with an empty weight cache, for use on another trace.
    pub fn fresh(&self) -> Self {
        Self {
            min_height: self.min_height,
            min_prominence: self.min_prominence,
            min_width: self.min_width,
            max_width: self.max_width,
            distance: self.distance,
            weights: self.weights.as_ref().map(DataWeight::fresh),
            limits: self.limits.clone(),
        }
    }

    /// All local maxima passing the configured filters, sorted by index.
    pub fn find_peaks(&self, x: &[f64], y: &[f64]) -> Result<Vec<PeakCandidate>> {
        let (positions, data) = self.searched(x, y)?;

        let mut candidates: Vec<PeakCandidate> = local_maxima(&data)
            .into_iter()
            .filter(|&i| self.min_height.map_or(true, |h| data[i] >= h))
            .map(|i| properties(&data, i))
            .filter(|c| self.min_prominence.map_or(true, |p| c.prominence >= p))
            .filter(|c| self.min_width.map_or(true, |w| c.width >= w))
            .filter(|c| self.max_width.map_or(true, |w| c.width <= w))
            .collect();

        if self.distance > 1 {
            candidates = filter_by_distance(candidates, self.distance);
        }

        let candidates = self.map_back(candidates, &positions, x);
        if candidates.is_empty() {
            log::info!("peak picking: no candidates in {} points", y.len());
        } else {
            log::debug!("peak picking: {} candidate(s)", candidates.len());
        }
        Ok(candidates)
    }

    /// The single highest point (after masking and limits); `None` when
    /// nothing is left to search.
    pub fn find_max(&self, x: &[f64], y: &[f64]) -> Result<Option<PeakCandidate>> {
        let (positions, data) = self.searched(x, y)?;
        let allowed: Vec<usize> = (0..data.len())
            .filter(|&i| self.limits.as_ref().map_or(true, |l| l.contains(x[positions[i]])))
            .collect();
        let values: Vec<f64> = allowed.iter().map(|&i| data[i]).collect();
        let Some(best) = argmax(&values) else {
            log::info!("peak picking: nothing to search for a maximum");
            return Ok(None);
        };
        let mut candidate = properties(&data, allowed[best]);
        candidate.index = positions[candidate.index];
        Ok(Some(candidate))
    }

    /// Indices into the full trace and the values the search runs on.
    fn searched(&self, x: &[f64], y: &[f64]) -> Result<(Vec<usize>, Vec<f64>)> {
        check_lengths(x, y)?;
        match &self.weights {
            Some(weights) => {
                let mask = weights.get_mask(x, y)?;
                let positions: Vec<usize> = mask
                    .iter()
                    .enumerate()
                    .filter(|(_, &keep)| keep)
                    .map(|(i, _)| i)
                    .collect();
                let data = positions.iter().map(|&i| y[i]).collect();
                Ok((positions, data))
            }
            None => Ok(((0..y.len()).collect(), y.to_vec())),
        }
    }

    fn map_back(&self, candidates: Vec<PeakCandidate>, positions: &[usize], x: &[f64]) -> Vec<PeakCandidate> {
        candidates
            .into_iter()
            .map(|mut c| {
                c.index = positions[c.index];
                c
            })
            .filter(|c| {
                let keep = self.limits.as_ref().map_or(true, |l| l.contains(x[c.index]));
                if !keep {
                    log::debug!("peak picking: candidate at {} outside domain limits", x[c.index]);
                }
                keep
            })
            .collect()
    }
}

/// Strict local maxima plus the midpoints of flat tops.
fn local_maxima(data: &[f64]) -> Vec<usize> {
    let n = data.len();
    if n < 3 {
        return Vec::new();
    }
    let mut found = Vec::new();
    let mut i = 1;
    while i < n - 1 {
        if data[i] > data[i - 1] {
            let start = i;
            while i + 1 < n && data[i + 1] == data[i] {
                i += 1;
            }
            if i + 1 < n && data[i + 1] < data[i] {
                found.push((start + i) / 2);
            }
        }
        i += 1;
    }
    found
}

fn properties(data: &[f64], index: usize) -> PeakCandidate {
    let height = data[index];

    let mut left_min = height;
    for &v in data[..index].iter().rev() {
        if v > height {
            break;
        }
        left_min = left_min.min(v);
    }
    let mut right_min = height;
    for &v in &data[index + 1..] {
        if v > height {
            break;
        }
        right_min = right_min.min(v);
    }
    let prominence = height - left_min.max(right_min);

    let half = height - prominence / 2.0;
    let left = (1..=index)
        .rev()
        .find(|&i| data[i - 1] <= half && data[i] > half)
        .map_or(0.0, |i| (i - 1) as f64 + (half - data[i - 1]) / (data[i] - data[i - 1]));
    let right = (index..data.len().saturating_sub(1))
        .find(|&i| data[i] > half && data[i + 1] <= half)
        .map_or((data.len() - 1) as f64, |i| i as f64 + (data[i] - half) / (data[i] - data[i + 1]));

    PeakCandidate {
        index,
        height,
        prominence,
        width: right - left,
    }
}

/// Keep the highest peak within every `distance` window.
fn filter_by_distance(mut candidates: Vec<PeakCandidate>, distance: usize) -> Vec<PeakCandidate> {
    candidates.sort_by(|a, b| b.height.partial_cmp(&a.height).unwrap_or(Ordering::Equal));
    let mut kept: Vec<PeakCandidate> = Vec::with_capacity(candidates.len());
    for c in candidates {
        if kept.iter().all(|k| k.index.abs_diff(c.index) >= distance) {
            kept.push(c);
        }
    }
    kept.sort_by_key(|c| c.index);
    kept
}
