use std::fmt;
use std::ops::Range;
use std::sync::{Arc, OnceLock, Weak};

use serde::Serialize;

use crate::analysis::calibration::Calibration;
use crate::error::{Error, Result};
use crate::math::argmax;
use crate::math::moments::{Distribution, Moments};

/// Height fraction for the full width.
const FWHM_HEIGHT: f64 = 0.5;
/// Height fraction for the asymmetry factor.
const ASYMMETRY_HEIGHT: f64 = 0.1;

// ---------------------------------------------------------------------------
// PeakParent – what a peak may ask of the trace it sits on
// ---------------------------------------------------------------------------

/// Read-only access a [`Peak`] needs from its parent trace.
pub trait PeakParent: fmt::Debug + Send + Sync {
    fn x(&self) -> &[f64];

    fn y(&self) -> &[f64];

    fn len(&self) -> usize {
        self.x().len()
    }

    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Coordinate at `index`.
    fn location(&self, index: usize) -> Option<f64> {
        self.x().get(index).copied()
    }

    /// Intensity at `index`.
    fn value(&self, index: usize) -> Option<f64> {
        self.y().get(index).copied()
    }

    /// Axis calibration, when the trace has one.
    fn calibration(&self) -> Option<&Calibration> {
        None
    }
}

// ---------------------------------------------------------------------------
// Identity
// ---------------------------------------------------------------------------

/// Peak identity, optionally qualified by the owning signal's id.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct PeakId {
    pub signal_id: Option<usize>,
    pub peak_id: usize,
}

impl fmt::Display for PeakId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.signal_id {
            Some(signal) => write!(f, "{signal}.{}", self.peak_id),
            None => write!(f, "{}", self.peak_id),
        }
    }
}

// ---------------------------------------------------------------------------
// Peak
// ---------------------------------------------------------------------------

/// A bounded slice of a parent trace.
///
/// `high` is an exclusive stop: the peak covers `low..high`. The parent is
/// held weakly; once the trace is replaced or dropped, accessors return
/// [`Error::ParentDropped`].
#[derive(Debug)]
pub struct Peak {
    id: PeakId,
    low: usize,
    high: usize,
    max_index: usize,
    parent: Weak<dyn PeakParent>,
    stats: OnceLock<PeakStats>,
}

impl Peak {
    pub fn new<P: PeakParent + 'static>(parent: &Arc<P>, low: usize, high: usize, id: PeakId) -> Result<Self> {
        let len = parent.len();
        if low >= high || high > len {
            return Err(Error::InvalidBounds { low, high, len });
        }
        let max_index = low + argmax(&parent.y()[low..high]).unwrap_or(0);
        let parent: Weak<dyn PeakParent> = Arc::downgrade(parent) as Weak<dyn PeakParent>;
        Ok(Self {
            id,
            low,
            high,
            max_index,
            parent,
            stats: OnceLock::new(),
        })
    }

    pub fn id(&self) -> PeakId {
        self.id
    }

    pub(crate) fn set_id(&mut self, id: PeakId) {
        self.id = id;
    }

    pub fn low_bound_index(&self) -> usize {
        self.low
    }

    /// Exclusive stop of the peak.
    pub fn high_bound_index(&self) -> usize {
        self.high
    }

    pub fn max_index(&self) -> usize {
        self.max_index
    }

    pub fn range(&self) -> Range<usize> {
        self.low..self.high
    }

    pub fn len(&self) -> usize {
        self.high - self.low
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Whether the parent trace is still alive.
    pub fn is_attached(&self) -> bool {
        self.parent.strong_count() > 0
    }

    pub fn parent(&self) -> Result<Arc<dyn PeakParent>> {
        self.parent
            .upgrade()
            .ok_or_else(|| Error::ParentDropped(self.id.to_string()))
    }

    /// `(x, y)` slices of the peak, keeping the parent alive while held.
    pub fn view(&self) -> Result<PeakView> {
        Ok(PeakView {
            parent: self.parent()?,
            range: self.range(),
        })
    }

    pub fn low_bound_location(&self) -> Result<f64> {
        self.location(self.low)
    }

    /// Coordinate of the last sample inside the peak.
    pub fn high_bound_location(&self) -> Result<f64> {
        self.location(self.high - 1)
    }

    pub fn max_location(&self) -> Result<f64> {
        self.location(self.max_index)
    }

    pub fn max_value(&self) -> Result<f64> {
        let parent = self.parent()?;
        parent
            .value(self.max_index)
            .ok_or(Error::InvalidBounds {
                low: self.low,
                high: self.high,
                len: parent.len(),
            })
    }

    fn location(&self, index: usize) -> Result<f64> {
        let parent = self.parent()?;
        parent.location(index).ok_or(Error::InvalidBounds {
            low: self.low,
            high: self.high,
            len: parent.len(),
        })
    }

    /// Statistics, computed on first call and memoized.
    pub fn stats(&self) -> Result<&PeakStats> {
        if let Some(stats) = self.stats.get() {
            return Ok(stats);
        }
        let computed = self.compute_stats()?;
        Ok(self.stats.get_or_init(|| computed))
    }

    /// Drop memoized statistics so the next [`Peak::stats`] recomputes.
    pub fn invalidate_stats(&mut self) {
        self.stats.take();
    }

    pub fn report(&self) -> Result<PeakReport> {
        Ok(PeakReport {
            id: self.id,
            low_bound_index: self.low,
            high_bound_index: self.high,
            max_index: self.max_index,
            stats: self.stats()?.clone(),
        })
    }

    fn compute_stats(&self) -> Result<PeakStats> {
        let view = self.view()?;
        let dist = Distribution::new(view.x(), view.y())?;
        let moments = dist.moments().unwrap_or_else(|| {
            log::warn!("peak {}: zero area, moments reported as 0", self.id);
            Moments::default()
        });
        let molecular_weight = view
            .parent
            .calibration()
            .and_then(|cal| MolecularWeightStats::compute(cal, view.x(), view.y(), self.max_location().ok()?));

        Ok(PeakStats {
            low_bound_location: self.low_bound_location()?,
            high_bound_location: self.high_bound_location()?,
            max_location: self.max_location()?,
            max_value: self.max_value()?,
            area: dist.area(),
            mean: moments.mean,
            std: moments.std,
            skew: moments.skew,
            kurtosis: moments.kurtosis,
            fwhm: dist.full_width_at_height(FWHM_HEIGHT),
            asymmetry_factor: dist.asymmetry_factor(ASYMMETRY_HEIGHT),
            molecular_weight,
        })
    }
}

/// Borrowed-looking slices of a peak, backed by a strong handle on the
/// parent.
#[derive(Debug, Clone)]
pub struct PeakView {
    parent: Arc<dyn PeakParent>,
    range: Range<usize>,
}

impl PeakView {
    pub fn x(&self) -> &[f64] {
        &self.parent.x()[self.range.clone()]
    }

    pub fn y(&self) -> &[f64] {
        &self.parent.y()[self.range.clone()]
    }
}

// ---------------------------------------------------------------------------
// Statistics
// ---------------------------------------------------------------------------

/// Shape statistics of one peak.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PeakStats {
    pub low_bound_location: f64,
    pub high_bound_location: f64,
    pub max_location: f64,
    pub max_value: f64,
    pub area: f64,
    pub mean: f64,
    pub std: f64,
    pub skew: f64,
    pub kurtosis: f64,
    pub fwhm: f64,
    pub asymmetry_factor: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub molecular_weight: Option<MolecularWeightStats>,
}

impl PeakStats {
    /// Flat, ordered key/value list for tables.
    pub fn entries(&self) -> Vec<(&'static str, f64)> {
        let mut entries = vec![
            ("low_bound", self.low_bound_location),
            ("max", self.max_location),
            ("high_bound", self.high_bound_location),
            ("max_value", self.max_value),
            ("area", self.area),
            ("mean", self.mean),
            ("std", self.std),
            ("skew", self.skew),
            ("kurtosis", self.kurtosis),
            ("fwhm", self.fwhm),
            ("asymmetry_factor", self.asymmetry_factor),
        ];
        if let Some(mw) = &self.molecular_weight {
            entries.extend([("mn", mw.mn), ("mw", mw.mw), ("d", mw.d), ("m_max", mw.m_at_max)]);
        }
        entries
    }
}

/// Molar-mass averages of a calibrated peak.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct MolecularWeightStats {
    /// Number average, `Σw / Σ(w / M)`.
    pub mn: f64,
    /// Weight average, `Σ(w M) / Σw`.
    pub mw: f64,
    /// Dispersity, `Mw / Mn`.
    pub d: f64,
    /// Mass at the peak maximum.
    pub m_at_max: f64,
}

impl MolecularWeightStats {
    /// Intensities are used as weight fractions. Points the calibration maps
    /// to 0 (outside its window) add nothing to `Σ(w / M)`.
    pub fn compute(cal: &Calibration, x: &[f64], y: &[f64], max_location: f64) -> Option<Self> {
        let masses = cal.get_y_many(x);
        let total: f64 = y.iter().sum();
        let inverse: f64 = y
            .iter()
            .zip(&masses)
            .filter(|(_, &m)| m != 0.0)
            .map(|(w, m)| w / m)
            .sum();
        let first: f64 = y.iter().zip(&masses).map(|(w, m)| w * m).sum();
        if total == 0.0 || inverse == 0.0 {
            log::warn!("molar-mass averages undefined: no intensity inside the calibration window");
            return None;
        }
        let mn = total / inverse;
        let mw = first / total;
        Some(Self {
            mn,
            mw,
            d: mw / mn,
            m_at_max: cal.get_y(max_location),
        })
    }
}

/// Serializable summary of one peak.
#[derive(Debug, Clone, Serialize)]
pub struct PeakReport {
    pub id: PeakId,
    pub low_bound_index: usize,
    pub high_bound_index: usize,
    pub max_index: usize,
    #[serde(flatten)]
    pub stats: PeakStats,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::math::linspace;

    #[derive(Debug)]
    struct Arrays {
        x: Vec<f64>,
        y: Vec<f64>,
        cal: Option<Calibration>,
    }

    impl PeakParent for Arrays {
        fn x(&self) -> &[f64] {
            &self.x
        }

        fn y(&self) -> &[f64] {
            &self.y
        }

        fn calibration(&self) -> Option<&Calibration> {
            self.cal.as_ref()
        }
    }

    fn gaussian_parent() -> Arc<Arrays> {
        let x = linspace(0.0, 10.0, 1000);
        let y = x.iter().map(|v| 10.0 * (-(v - 5.0).powi(2) / 0.5).exp()).collect();
        Arc::new(Arrays { x, y, cal: None })
    }

    #[test]
    fn bounds_are_validated() {
        let parent = gaussian_parent();
        let id = PeakId { signal_id: None, peak_id: 0 };
        assert!(Peak::new(&parent, 10, 10, id).is_err());
        assert!(Peak::new(&parent, 10, 1001, id).is_err());
        let peak = Peak::new(&parent, 0, 1000, id).unwrap();
        assert!((499..=500).contains(&peak.max_index()));
        assert!((peak.high_bound_location().unwrap() - 10.0).abs() < 1e-9);
    }

    #[test]
    fn stats_are_memoized_until_invalidated() {
        let parent = gaussian_parent();
        let mut peak = Peak::new(&parent, 100, 900, PeakId { signal_id: Some(2), peak_id: 1 }).unwrap();
        let first = peak.stats().unwrap() as *const PeakStats;
        let second = peak.stats().unwrap() as *const PeakStats;
        assert_eq!(first, second);
        assert!((peak.stats().unwrap().area - 10.0 * 0.5 * (2.0 * std::f64::consts::PI).sqrt()).abs() < 1e-3);
        peak.invalidate_stats();
        assert!(peak.stats.get().is_none());
        assert_eq!(peak.id().to_string(), "2.1");
        let entries = peak.stats().unwrap().entries();
        assert_eq!(entries[0].0, "low_bound");
        assert_eq!(entries.len(), 11);
    }

    #[test]
    fn dropped_parent_is_reported() {
        let parent = gaussian_parent();
        let peak = Peak::new(&parent, 100, 900, PeakId { signal_id: None, peak_id: 0 }).unwrap();
        drop(parent);
        assert!(!peak.is_attached());
        assert!(matches!(peak.stats(), Err(Error::ParentDropped(_))));
    }

    #[test]
    fn zero_area_peak_reports_sentinels() {
        let parent = Arc::new(Arrays {
            x: linspace(0.0, 1.0, 5),
            y: vec![0.0; 5],
            cal: None,
        });
        let peak = Peak::new(&parent, 0, 5, PeakId { signal_id: None, peak_id: 0 }).unwrap();
        let stats = peak.stats().unwrap();
        assert_eq!(stats.area, 0.0);
        assert_eq!(stats.std, 0.0);
        assert_eq!(stats.fwhm, 0.0);
    }

    #[test]
    fn calibrated_peak_has_molar_mass_averages() {
        let x = linspace(10.0, 14.0, 201);
        let y = x.iter().map(|t| (-(t - 12.0).powi(2) / 0.2).exp()).collect();
        let cal = Calibration::new("mass", |t| 10f64.powf(10.0 - 0.5 * t));
        let parent = Arc::new(Arrays { x, y, cal: Some(cal) });
        let peak = Peak::new(&parent, 0, 201, PeakId { signal_id: None, peak_id: 0 }).unwrap();
        let mw = peak.stats().unwrap().molecular_weight.unwrap();
        assert!(mw.mw >= mw.mn);
        assert!(mw.d >= 1.0 && mw.d < 2.0);
        assert!((mw.m_at_max - 1e4).abs() / 1e4 < 1e-9);
        assert_eq!(peak.stats().unwrap().entries().len(), 15);
    }
}
