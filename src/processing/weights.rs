use std::borrow::Cow;
use std::collections::hash_map::DefaultHasher;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::sync::{Arc, OnceLock};

use serde::{Deserialize, Serialize};

use crate::error::{check_lengths, config_error, Result};
use crate::math::median;

// ---------------------------------------------------------------------------
// WeightFunction – one way of scoring points
// ---------------------------------------------------------------------------

/// Produces a raw, non-negative weight per point of an `(x, y)` pair.
pub trait WeightFunction: fmt::Debug + Send + Sync {
    fn name(&self) -> &'static str;

    /// Weights with the same length as `y`.
    fn compute(&self, x: &[f64], y: &[f64]) -> Vec<f64>;
}

// ---------------------------------------------------------------------------
// Spans
// ---------------------------------------------------------------------------

/// One excluded range, inclusive at both ends.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "by", rename_all = "snake_case")]
pub enum Span {
    Index { start: usize, end: usize },
    Value { low: f64, high: f64 },
}

impl Span {
    fn normalized(self) -> Result<Self> {
        match self {
            Span::Index { start, end } => Ok(Span::Index {
                start: start.min(end),
                end: start.max(end),
            }),
            Span::Value { low, high } => {
                if !low.is_finite() || !high.is_finite() {
                    return Err(config_error(format!("span ends must be finite, got ({low}, {high})")));
                }
                Ok(Span::Value {
                    low: low.min(high),
                    high: low.max(high),
                })
            }
        }
    }

    fn contains(&self, index: usize, x: f64) -> bool {
        match *self {
            Span::Index { start, end } => (start..=end).contains(&index),
            Span::Value { low, high } => (low..=high).contains(&x),
        }
    }
}

/// Zero weight inside the listed spans, one elsewhere (or the reverse with
/// `invert`).
#[derive(Debug, Clone)]
pub struct Spans {
    spans: Vec<Span>,
    invert: bool,
}

impl Spans {
    pub fn new(spans: Vec<Span>, invert: bool) -> Result<Self> {
        if spans.is_empty() {
            return Err(config_error("Spans needs at least one span"));
        }
        let spans = spans.into_iter().map(Span::normalized).collect::<Result<Vec<_>>>()?;
        Ok(Self { spans, invert })
    }
}

impl WeightFunction for Spans {
    fn name(&self) -> &'static str {
        "spans"
    }

    fn compute(&self, x: &[f64], y: &[f64]) -> Vec<f64> {
        (0..y.len())
            .map(|i| {
                let xi = x.get(i).copied().unwrap_or(f64::NAN);
                let inside = self.spans.iter().any(|s| s.contains(i, xi));
                if inside != self.invert {
                    0.0
                } else {
                    1.0
                }
            })
            .collect()
    }
}

// ---------------------------------------------------------------------------
// MultiPoint
// ---------------------------------------------------------------------------

/// Weight one at the listed indices only.
#[derive(Debug, Clone)]
pub struct MultiPoint {
    indices: Vec<usize>,
}

impl MultiPoint {
    pub fn new(indices: Vec<usize>) -> Result<Self> {
        if indices.is_empty() {
            return Err(config_error("MultiPoint needs at least one index"));
        }
        Ok(Self { indices })
    }
}

impl WeightFunction for MultiPoint {
    fn name(&self) -> &'static str {
        "multi_point"
    }

    fn compute(&self, _x: &[f64], y: &[f64]) -> Vec<f64> {
        let mut w = vec![0.0; y.len()];
        for &i in &self.indices {
            match w.get_mut(i) {
                Some(slot) => *slot = 1.0,
                None => log::warn!("MultiPoint index {i} outside data of length {}", y.len()),
            }
        }
        w
    }
}

// ---------------------------------------------------------------------------
// Distance from median
// ---------------------------------------------------------------------------

/// Decreasing penalty applied to `|y - median|`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Penalty {
    /// `1 - d / max(d)`.
    Linear,
    /// `exp(-d / (scale * MAD))`.
    Exponential { scale: f64 },
}

impl Default for Penalty {
    fn default() -> Self {
        Penalty::Linear
    }
}

impl Penalty {
    fn validate(self) -> Result<Self> {
        if let Penalty::Exponential { scale } = self {
            if !(scale.is_finite() && scale > 0.0) {
                return Err(config_error(format!("penalty scale must be > 0, got {scale}")));
            }
        }
        Ok(self)
    }

    fn apply(&self, distances: &[f64]) -> Vec<f64> {
        match *self {
            Penalty::Linear => {
                let dmax = distances.iter().copied().fold(0.0, f64::max);
                if dmax == 0.0 {
                    return vec![1.0; distances.len()];
                }
                distances.iter().map(|d| 1.0 - d / dmax).collect()
            }
            Penalty::Exponential { scale } => {
                let mut spread = median(distances);
                if spread == 0.0 && !distances.is_empty() {
                    spread = distances.iter().sum::<f64>() / distances.len() as f64;
                }
                if spread == 0.0 {
                    return vec![1.0; distances.len()];
                }
                distances.iter().map(|d| (-d / (scale * spread)).exp()).collect()
            }
        }
    }
}

/// Weight decreasing with distance from the median intensity.
#[derive(Debug, Clone)]
pub struct DistanceMedian {
    penalty: Penalty,
}

impl DistanceMedian {
    pub fn new(penalty: Penalty) -> Result<Self> {
        Ok(Self {
            penalty: penalty.validate()?,
        })
    }
}

impl WeightFunction for DistanceMedian {
    fn name(&self) -> &'static str {
        "distance_median"
    }

    fn compute(&self, _x: &[f64], y: &[f64]) -> Vec<f64> {
        let med = median(y);
        let distances: Vec<f64> = y.iter().map(|v| (v - med).abs()).collect();
        self.penalty.apply(&distances)
    }
}

/// Distance-from-median weights over an iteratively tightened inclusion set.
#[derive(Debug, Clone)]
pub struct AdaptiveDistanceMedian {
    penalty: Penalty,
    amount: f64,
    speed: f64,
    max_iter: usize,
}

impl AdaptiveDistanceMedian {
    /// * `amount` – fraction of points to keep at minimum, in (0, 1].
    /// * `speed` – how fast the cutoff shrinks; larger is gentler.
    pub fn new(penalty: Penalty, amount: f64, speed: f64, max_iter: usize) -> Result<Self> {
        if !(amount > 0.0 && amount <= 1.0) {
            return Err(config_error(format!("amount must be in (0, 1], got {amount}")));
        }
        if !(speed.is_finite() && speed > 0.0) {
            return Err(config_error(format!("speed must be > 0, got {speed}")));
        }
        if max_iter == 0 {
            return Err(config_error("max_iter must be at least 1"));
        }
        Ok(Self {
            penalty: penalty.validate()?,
            amount,
            speed,
            max_iter,
        })
    }
}

impl WeightFunction for AdaptiveDistanceMedian {
    fn name(&self) -> &'static str {
        "adaptive_distance_median"
    }

    fn compute(&self, _x: &[f64], y: &[f64]) -> Vec<f64> {
        let kept = distance_remove(y, self.amount, self.speed, self.max_iter);
        let retained: Vec<f64> = y.iter().zip(&kept).filter(|(_, &k)| k).map(|(v, _)| *v).collect();
        let med = median(&retained);
        let distances: Vec<f64> = y.iter().map(|v| (v - med).abs()).collect();
        self.penalty
            .apply(&distances)
            .into_iter()
            .zip(&kept)
            .map(|(w, &k)| if k { w } else { 0.0 })
            .collect()
    }
}

/// Iteratively drop the points furthest from the median.
///
/// Stops once fewer than `amount * len` points remain, when an iteration
/// excludes nothing new, or when the cut would remove every point.
pub fn distance_remove(y: &[f64], amount: f64, speed: f64, max_iter: usize) -> Vec<bool> {
    let stop_len = y.len() as f64 * amount;
    let mut kept = vec![true; y.len()];
    for i in 0..max_iter {
        let retained: Vec<f64> = y.iter().zip(&kept).filter(|(_, &k)| k).map(|(v, _)| *v).collect();
        let med = median(&retained);
        let dist: Vec<f64> = y.iter().map(|v| (v - med).abs()).collect();
        let kept_dist: Vec<f64> = dist.iter().zip(&kept).filter(|(_, &k)| k).map(|(d, _)| *d).collect();

        let mut deviation = median(&kept_dist);
        if deviation == 0.0 && !kept_dist.is_empty() {
            deviation = kept_dist.iter().sum::<f64>() / kept_dist.len() as f64;
        }
        if deviation == 0.0 {
            break;
        }
        let max_scaled = kept_dist.iter().map(|d| d / deviation).fold(0.0, f64::max);
        let cutoff = max_scaled * (1.0 - 0.5 * (-(i as f64) / speed).exp());

        let next: Vec<bool> = dist
            .iter()
            .zip(&kept)
            .map(|(d, &k)| k && d / deviation < cutoff)
            .collect();
        let count = next.iter().filter(|&&k| k).count();
        if count == 0 || next == kept {
            break;
        }
        kept = next;
        if (count as f64) < stop_len {
            break;
        }
    }
    kept
}

// ---------------------------------------------------------------------------
// WeightChain
// ---------------------------------------------------------------------------

/// Elementwise product of several weight functions.
#[derive(Debug, Clone)]
pub struct WeightChain {
    links: Vec<Arc<dyn WeightFunction>>,
}

impl WeightChain {
    pub fn new(links: Vec<Arc<dyn WeightFunction>>) -> Result<Self> {
        if links.is_empty() {
            return Err(config_error("WeightChain needs at least one weight"));
        }
        Ok(Self { links })
    }
}

impl WeightFunction for WeightChain {
    fn name(&self) -> &'static str {
        "chain"
    }

    fn compute(&self, x: &[f64], y: &[f64]) -> Vec<f64> {
        let mut out = vec![1.0; y.len()];
        for link in &self.links {
            for (o, w) in out.iter_mut().zip(link.compute(x, y)) {
                *o *= w;
            }
        }
        out
    }
}

// ---------------------------------------------------------------------------
// DataWeight – cached weights plus mask policy
// ---------------------------------------------------------------------------

#[derive(Debug)]
struct CachedWeights {
    fingerprint: u64,
    weights: Vec<f64>,
    /// Indices the mask keeps, and the fingerprint of that subset.
    kept: Vec<usize>,
    kept_fingerprint: u64,
}

/// A weight function with its mask threshold and a per-instance cache.
///
/// The first array computed is cached against a fingerprint of its input.
/// The masked output of that input is recognized too and answered from the
/// cached weights restricted to the kept points, so masking is idempotent.
/// Calls with other data compute fresh weights without touching the cache;
/// [`DataWeight::fresh`] gives an empty-cache copy for reuse on new data.
#[derive(Debug)]
pub struct DataWeight {
    function: Arc<dyn WeightFunction>,
    threshold: f64,
    normalized: bool,
    cache: OnceLock<CachedWeights>,
}

impl DataWeight {
    /// Wrap a weight function with threshold 0.5 on normalized weights.
    pub fn new(function: impl WeightFunction + 'static) -> Self {
        Self::from_shared(Arc::new(function))
    }

    pub fn from_shared(function: Arc<dyn WeightFunction>) -> Self {
        Self {
            function,
            threshold: 0.5,
            normalized: true,
            cache: OnceLock::new(),
        }
    }

    pub fn with_threshold(mut self, threshold: f64) -> Result<Self> {
        if !(threshold.is_finite() && threshold >= 0.0) {
            return Err(config_error(format!("threshold must be finite and >= 0, got {threshold}")));
        }
        self.threshold = threshold;
        Ok(self)
    }

    pub fn with_normalized(mut self, normalized: bool) -> Self {
        self.normalized = normalized;
        self
    }

    /// Same function and policy, empty cache.
    pub fn fresh(&self) -> Self {
        Self {
            function: Arc::clone(&self.function),
            threshold: self.threshold,
            normalized: self.normalized,
            cache: OnceLock::new(),
        }
    }

    pub fn name(&self) -> &'static str {
        self.function.name()
    }

    pub fn threshold(&self) -> f64 {
        self.threshold
    }

    /// Cached weights, if any have been computed.
    pub fn weights(&self) -> Option<&[f64]> {
        self.cache.get().map(|c| c.weights.as_slice())
    }

    /// Raw weights for `(x, y)`.
    pub fn get_weights<'a>(&'a self, x: &[f64], y: &[f64]) -> Result<Cow<'a, [f64]>> {
        check_lengths(x, y)?;
        let fp = fingerprint(x, y);
        if self.cache.get().is_none() {
            let weights = self.compute(x, y);
            let kept: Vec<usize> = self
                .mask_of(&weights)
                .iter()
                .enumerate()
                .filter_map(|(i, &keep)| keep.then_some(i))
                .collect();
            let (kx, ky): (Vec<f64>, Vec<f64>) = kept.iter().map(|&i| (x[i], y[i])).unzip();
            let _ = self.cache.set(CachedWeights {
                fingerprint: fp,
                kept_fingerprint: fingerprint(&kx, &ky),
                weights,
                kept,
            });
        }
        match self.cache.get() {
            Some(cached) if cached.fingerprint == fp => Ok(Cow::Borrowed(&cached.weights)),
            Some(cached) if cached.kept.len() == x.len() && cached.kept_fingerprint == fp => {
                Ok(Cow::Owned(cached.kept.iter().map(|&i| cached.weights[i]).collect()))
            }
            _ => {
                log::debug!("{}: data differs from cached input, computing uncached", self.name());
                Ok(Cow::Owned(self.compute(x, y)))
            }
        }
    }

    /// Weights divided by their maximum; all zeros stay zero.
    pub fn get_normalized_weights(&self, x: &[f64], y: &[f64]) -> Result<Vec<f64>> {
        Ok(normalize(&self.get_weights(x, y)?))
    }

    /// `1 / weight`, with exact zeros replaced first.
    ///
    /// `replace_zero` defaults to `0.9 * min(nonzero weights)`.
    pub fn get_inverted_weights(&self, x: &[f64], y: &[f64], replace_zero: Option<f64>) -> Result<Vec<f64>> {
        let weights = self.get_weights(x, y)?;
        let min_nonzero = weights.iter().copied().filter(|&w| w > 0.0).fold(f64::INFINITY, f64::min);
        let replacement = match replace_zero {
            Some(r) => r,
            None if min_nonzero.is_finite() => 0.9 * min_nonzero,
            None => {
                log::warn!("{}: no nonzero weights to invert, returning uniform weights", self.name());
                return Ok(vec![1.0; weights.len()]);
            }
        };
        Ok(weights
            .iter()
            .map(|&w| if w == 0.0 { 1.0 / replacement } else { 1.0 / w })
            .collect())
    }

    /// `true` where the (normalized) weight is at or above the threshold.
    pub fn get_mask(&self, x: &[f64], y: &[f64]) -> Result<Vec<bool>> {
        Ok(self.mask_of(&self.get_weights(x, y)?))
    }

    /// Keep only the points passing [`DataWeight::get_mask`].
    pub fn apply_as_mask(&self, x: &[f64], y: &[f64]) -> Result<(Vec<f64>, Vec<f64>)> {
        let mask = self.get_mask(x, y)?;
        let (xm, ym) = x
            .iter()
            .zip(y)
            .zip(&mask)
            .filter(|(_, &keep)| keep)
            .map(|((&xi, &yi), _)| (xi, yi))
            .unzip();
        Ok((xm, ym))
    }

    fn mask_of(&self, weights: &[f64]) -> Vec<bool> {
        let scaled = if self.normalized {
            Cow::Owned(normalize(weights))
        } else {
            Cow::Borrowed(weights)
        };
        scaled.iter().map(|&w| w >= self.threshold).collect()
    }

    fn compute(&self, x: &[f64], y: &[f64]) -> Vec<f64> {
        let weights = self.function.compute(x, y);
        if !weights.is_empty() && weights.iter().all(|&w| w == 0.0) {
            log::warn!("all weights are zero after applying {}", self.name());
        }
        weights
    }
}

fn normalize(weights: &[f64]) -> Vec<f64> {
    let max = weights.iter().copied().fold(0.0, f64::max);
    if max <= 0.0 {
        return vec![0.0; weights.len()];
    }
    weights.iter().map(|w| w / max).collect()
}

fn fingerprint(x: &[f64], y: &[f64]) -> u64 {
    let mut hasher = DefaultHasher::new();
    x.len().hash(&mut hasher);
    for v in x.iter().chain(y) {
        v.to_bits().hash(&mut hasher);
    }
    hasher.finish()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::math::linspace;

    #[test]
    fn spans_exclude_inclusive_ranges() {
        let x = linspace(0.0, 9.0, 10);
        let y = vec![1.0; 10];
        let spans = Spans::new(
            vec![Span::Index { start: 3, end: 1 }, Span::Value { low: 7.0, high: 8.0 }],
            false,
        )
        .unwrap();
        let w = DataWeight::new(spans);
        let weights = w.get_weights(&x, &y).unwrap();
        assert_eq!(&*weights, &[1.0, 0.0, 0.0, 0.0, 1.0, 1.0, 1.0, 0.0, 0.0, 1.0]);
    }

    #[test]
    fn inverted_spans_keep_only_ranges() {
        let x = linspace(0.0, 9.0, 10);
        let y = vec![1.0; 10];
        let w = DataWeight::new(Spans::new(vec![Span::Value { low: 2.0, high: 4.0 }], true).unwrap());
        let (xm, _) = w.apply_as_mask(&x, &y).unwrap();
        assert_eq!(xm, vec![2.0, 3.0, 4.0]);
    }

    #[test]
    fn multipoint_marks_indices() {
        let w = DataWeight::new(MultiPoint::new(vec![0, 4, 99]).unwrap());
        let mask = w.get_mask(&[0.0; 5], &[0.0; 5]).unwrap();
        assert_eq!(mask, vec![true, false, false, false, true]);
    }

    #[test]
    fn inverted_weights_floor_zeros() {
        let w = DataWeight::new(MultiPoint::new(vec![1]).unwrap());
        let inv = w.get_inverted_weights(&[0.0; 3], &[0.0; 3], None).unwrap();
        assert!((inv[0] - 1.0 / 0.9).abs() < 1e-12);
        assert_eq!(inv[1], 1.0);
    }

    #[test]
    fn mask_is_idempotent_on_its_own_output() {
        let x = linspace(0.0, 10.0, 101);
        let y: Vec<f64> = x.iter().map(|v| v.sin()).collect();
        let w = DataWeight::new(Spans::new(vec![Span::Value { low: 2.0, high: 4.0 }], false).unwrap());
        let (xm, ym) = w.apply_as_mask(&x, &y).unwrap();
        let (xm2, ym2) = w.apply_as_mask(&xm, &ym).unwrap();
        assert_eq!(xm, xm2);
        assert_eq!(ym, ym2);
        // cache still holds the weights of the first input
        assert_eq!(w.weights().map(<[f64]>::len), Some(101));
    }

    #[test]
    fn index_mask_is_idempotent() {
        let x = linspace(0.0, 9.0, 10);
        let y: Vec<f64> = x.iter().map(|v| v * v).collect();
        let w = DataWeight::new(Spans::new(vec![Span::Index { start: 1, end: 3 }], false).unwrap());
        let (xm, ym) = w.apply_as_mask(&x, &y).unwrap();
        assert_eq!(xm, vec![0.0, 4.0, 5.0, 6.0, 7.0, 8.0, 9.0]);
        let (xm2, ym2) = w.apply_as_mask(&xm, &ym).unwrap();
        assert_eq!(xm2, xm);
        assert_eq!(ym2, ym);
        assert_eq!(w.get_weights(&xm, &ym).unwrap().as_ref(), &[1.0; 7]);
    }

    #[test]
    fn multipoint_mask_is_idempotent() {
        let x = linspace(0.0, 9.0, 10);
        let y = vec![1.0; 10];
        let w = DataWeight::new(MultiPoint::new(vec![2, 5, 8]).unwrap());
        let (xm, ym) = w.apply_as_mask(&x, &y).unwrap();
        assert_eq!(xm, vec![2.0, 5.0, 8.0]);
        let (xm2, _) = w.apply_as_mask(&xm, &ym).unwrap();
        assert_eq!(xm2, xm);
    }

    #[test]
    fn distance_median_mask_is_idempotent() {
        let x = linspace(0.0, 19.0, 20);
        let y = x.clone();
        let w = DataWeight::new(DistanceMedian::new(Penalty::Linear).unwrap());
        let (xm, ym) = w.apply_as_mask(&x, &y).unwrap();
        assert!(xm.len() < x.len());
        let (xm2, ym2) = w.apply_as_mask(&xm, &ym).unwrap();
        assert_eq!(xm2, xm);
        assert_eq!(ym2, ym);
        // unrelated data of the same length is still computed fresh
        let other: Vec<f64> = ym.iter().map(|v| v + 100.0).collect();
        assert_eq!(w.get_weights(&xm, &other).unwrap().len(), xm.len());
        assert_eq!(w.weights().map(<[f64]>::len), Some(20));
    }

    #[test]
    fn distance_median_penalizes_outliers() {
        let mut y = vec![1.0; 20];
        y[5] = 50.0;
        let w = DataWeight::new(DistanceMedian::new(Penalty::Linear).unwrap());
        let mask = w.get_mask(&vec![0.0; 20], &y).unwrap();
        assert!(!mask[5]);
        assert_eq!(mask.iter().filter(|&&m| m).count(), 19);
    }

    #[test]
    fn adaptive_removal_keeps_baseline_points() {
        let x = linspace(0.0, 10.0, 200);
        let y: Vec<f64> = x
            .iter()
            .map(|&v| 0.01 * v + 5.0 * (-(v - 5.0).powi(2) / 0.1).exp())
            .collect();
        let kept = distance_remove(&y, 0.5, 10.0, 1000);
        let peak_index = 100;
        assert!(!kept[peak_index]);
        assert!(kept.iter().zip(&y).all(|(&k, &v)| !k || v < 0.2));
        assert!(kept.iter().filter(|&&k| k).count() >= 20);
    }

    #[test]
    fn chain_multiplies() {
        let a: Arc<dyn WeightFunction> = Arc::new(MultiPoint::new(vec![0, 1]).unwrap());
        let b: Arc<dyn WeightFunction> = Arc::new(MultiPoint::new(vec![1, 2]).unwrap());
        let chain = WeightChain::new(vec![a, b]).unwrap();
        assert_eq!(chain.compute(&[0.0; 3], &[0.0; 3]), vec![0.0, 1.0, 0.0]);
    }

    #[test]
    fn invalid_configuration_fails_construction() {
        assert!(AdaptiveDistanceMedian::new(Penalty::Linear, 0.0, 1.0, 10).is_err());
        assert!(Spans::new(vec![Span::Value { low: f64::NAN, high: 1.0 }], false).is_err());
        assert!(DataWeight::new(MultiPoint::new(vec![0]).unwrap()).with_threshold(-1.0).is_err());
    }

    #[test]
    fn all_zero_weights_are_not_fatal() {
        let w = DataWeight::new(Spans::new(vec![Span::Index { start: 0, end: 10 }], false).unwrap());
        let mask = w.get_mask(&[0.0; 3], &[0.0; 3]).unwrap();
        assert_eq!(mask, vec![false; 3]);
    }
}
