use std::sync::Arc;

use crate::analysis::{Calibration, Peak, PeakId, PeakParent, PeakPicking, PeakReport, RollingBall};
use crate::error::{check_lengths, config_error, Result};
use crate::math::{trapz, AxisDirection};
use crate::processing::{Pipeline, Stage};

// ---------------------------------------------------------------------------
// Trace – an immutable processed pair
// ---------------------------------------------------------------------------

/// Processed `(x, y)` pair shared between a signal and its peaks.
#[derive(Debug, Clone)]
pub struct Trace {
    x: Vec<f64>,
    y: Vec<f64>,
    calibration: Option<Calibration>,
}

impl Trace {
    pub fn new(x: Vec<f64>, y: Vec<f64>) -> Result<Self> {
        check_lengths(&x, &y)?;
        Ok(Self { x, y, calibration: None })
    }

    pub fn with_calibration(mut self, calibration: Option<Calibration>) -> Self {
        self.calibration = calibration;
        self
    }
}

impl PeakParent for Trace {
    fn x(&self) -> &[f64] {
        &self.x
    }

    fn y(&self) -> &[f64] {
        &self.y
    }

    fn calibration(&self) -> Option<&Calibration> {
        self.calibration.as_ref()
    }
}

// ---------------------------------------------------------------------------
// Signal
// ---------------------------------------------------------------------------

/// One coordinate/intensity pair with its processing pipeline and peaks.
///
/// The processed trace is computed on first access to [`Signal::result`]
/// and reused while the pipeline stays clean. Reprocessing replaces the
/// trace and drops the peaks found on the old one.
#[derive(Debug)]
pub struct Signal {
    id: usize,
    name: String,
    x_label: String,
    y_label: String,
    x_raw: Vec<f64>,
    y_raw: Vec<f64>,
    direction: AxisDirection,
    pipeline: Pipeline,
    calibration: Option<Calibration>,
    trace: Option<Arc<Trace>>,
    /// Pipeline run that produced `trace`.
    trace_run: usize,
    peaks: Vec<Peak>,
}

impl Signal {
    /// `id` is assigned by whoever builds the signal (a dataset or family
    /// index).
    pub fn new(id: usize, x: Vec<f64>, y: Vec<f64>) -> Result<Self> {
        check_lengths(&x, &y)?;
        let direction = AxisDirection::of(&x)?;
        Ok(Self {
            id,
            name: format!("signal_{id}"),
            x_label: "x_axis".into(),
            y_label: "y_axis".into(),
            x_raw: x,
            y_raw: y,
            direction,
            pipeline: Pipeline::new(),
            calibration: None,
            trace: None,
            trace_run: 0,
            peaks: Vec::new(),
        })
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    pub fn with_labels(mut self, x_label: impl Into<String>, y_label: impl Into<String>) -> Self {
        self.x_label = x_label.into();
        self.y_label = y_label.into();
        self
    }

    pub fn with_calibration(mut self, calibration: Calibration) -> Self {
        self.calibration = Some(calibration);
        self.trace = None;
        self
    }

    /// Replace the pipeline; the next [`Signal::result`] reprocesses.
    pub fn with_pipeline(mut self, pipeline: Pipeline) -> Self {
        self.pipeline = pipeline;
        self.trace = None;
        self.peaks.clear();
        self
    }

    pub fn id(&self) -> usize {
        self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn x_label(&self) -> &str {
        &self.x_label
    }

    pub fn y_label(&self) -> &str {
        &self.y_label
    }

    pub fn x_raw(&self) -> &[f64] {
        &self.x_raw
    }

    pub fn y_raw(&self) -> &[f64] {
        &self.y_raw
    }

    pub fn direction(&self) -> AxisDirection {
        self.direction
    }

    pub fn calibration(&self) -> Option<&Calibration> {
        self.calibration.as_ref()
    }

    pub fn pipeline(&self) -> &Pipeline {
        &self.pipeline
    }

    /// Edit the pipeline; any change marks it dirty.
    pub fn pipeline_mut(&mut self) -> &mut Pipeline {
        &mut self.pipeline
    }

    pub fn add_stage(&mut self, stage: impl Stage + 'static) {
        self.pipeline.add(stage);
    }

    /// Last processed trace, possibly stale.
    pub fn cached(&self) -> Option<&Arc<Trace>> {
        self.trace.as_ref()
    }

    /// The processed trace, recomputed when the pipeline is dirty or has
    /// been run elsewhere since the trace was built.
    ///
    /// On a stage failure the previous trace and peaks are kept.
    pub fn result(&mut self) -> Result<Arc<Trace>> {
        if let Some(trace) = &self.trace {
            if self.pipeline.is_processed() && self.pipeline.run_count() == self.trace_run {
                return Ok(Arc::clone(trace));
            }
        }
        let (x, y) = self.pipeline.run(&self.x_raw, &self.y_raw)?;
        let trace = Arc::new(Trace::new(x, y)?.with_calibration(self.calibration.clone()));
        if !self.peaks.is_empty() {
            log::info!(
                "{}: reprocessed, dropping {} peak(s) found on the previous trace",
                self.name,
                self.peaks.len()
            );
            self.peaks.clear();
        }
        self.trace = Some(Arc::clone(&trace));
        self.trace_run = self.pipeline.run_count();
        Ok(trace)
    }

    pub fn len(&mut self) -> Result<usize> {
        Ok(self.result()?.len())
    }

    /// Processed intensities divided by their maximum.
    pub fn y_normalized_by_max(&mut self) -> Result<Vec<f64>> {
        let trace = self.result()?;
        let max = trace.y().iter().copied().fold(f64::NEG_INFINITY, f64::max);
        if max == 0.0 || !max.is_finite() {
            log::warn!("{}: cannot normalize by max {max}", self.name);
            return Ok(trace.y().to_vec());
        }
        Ok(trace.y().iter().map(|v| v / max).collect())
    }

    /// Processed intensities scaled to unit area.
    pub fn y_normalized_by_area(&mut self) -> Result<Vec<f64>> {
        let trace = self.result()?;
        let area = trapz(trace.x(), trace.y()).abs();
        if area == 0.0 || !area.is_finite() {
            log::warn!("{}: cannot normalize by area {area}", self.name);
            return Ok(trace.y().to_vec());
        }
        Ok(trace.y().iter().map(|v| v / area).collect())
    }

    // -----------------------------------------------------------------------
    // Peaks
    // -----------------------------------------------------------------------

    pub fn peaks(&self) -> &[Peak] {
        &self.peaks
    }

    pub fn peaks_mut(&mut self) -> &mut [Peak] {
        &mut self.peaks
    }

    pub fn tallest_peak(&self) -> Option<&Peak> {
        self.peaks
            .iter()
            .filter_map(|p| p.max_value().ok().map(|v| (p, v)))
            .max_by(|a, b| a.1.total_cmp(&b.1))
            .map(|(p, _)| p)
    }

    /// Pick candidates on the processed trace and bound them. Replaces any
    /// peaks found before.
    pub fn find_peaks(&mut self, picking: &PeakPicking, detector: &RollingBall) -> Result<&[Peak]> {
        let trace = self.result()?;
        let candidates: Vec<usize> = picking
            .find_peaks(trace.x(), trace.y())?
            .into_iter()
            .map(|c| c.index)
            .collect();
        self.peaks = detector.detect(&trace, &candidates, Some(self.id))?;
        log::info!("{}: {} peak(s)", self.name, self.peaks.len());
        Ok(&self.peaks)
    }

    /// Bound only the global maximum (after masking and limits).
    pub fn find_max_peak(&mut self, picking: &PeakPicking, detector: &RollingBall) -> Result<&[Peak]> {
        let trace = self.result()?;
        let candidates: Vec<usize> = picking
            .find_max(trace.x(), trace.y())?
            .map(|c| c.index)
            .into_iter()
            .collect();
        self.peaks = detector.detect(&trace, &candidates, Some(self.id))?;
        Ok(&self.peaks)
    }

    /// Add a peak by hand on the current trace.
    pub fn add_peak(&mut self, low: usize, high: usize) -> Result<&Peak> {
        let trace = self.result()?;
        let id = PeakId {
            signal_id: Some(self.id),
            peak_id: self.peaks.len(),
        };
        self.peaks.push(Peak::new(&trace, low, high, id)?);
        Ok(&self.peaks[self.peaks.len() - 1])
    }

    /// Remove a peak by position; the remaining ones are renumbered.
    pub fn delete_peak(&mut self, index: usize) -> Result<Peak> {
        if index >= self.peaks.len() {
            return Err(config_error(format!(
                "no peak {index} on {} ({} peaks)",
                self.name,
                self.peaks.len()
            )));
        }
        let removed = self.peaks.remove(index);
        for (i, peak) in self.peaks.iter_mut().enumerate() {
            peak.set_id(PeakId {
                signal_id: Some(self.id),
                peak_id: i,
            });
        }
        Ok(removed)
    }

    /// Reports for every peak, in peak order.
    pub fn stats(&self) -> Result<Vec<PeakReport>> {
        self.peaks.iter().map(Peak::report).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Error;
    use crate::math::linspace;

    #[derive(Debug)]
    struct Shift(f64);

    impl Stage for Shift {
        fn name(&self) -> &str {
            "shift"
        }

        fn run(&mut self, x: Vec<f64>, y: Vec<f64>) -> Result<(Vec<f64>, Vec<f64>)> {
            Ok((x, y.into_iter().map(|v| v - self.0).collect()))
        }
    }

    #[derive(Debug)]
    struct Broken;

    impl Stage for Broken {
        fn name(&self) -> &str {
            "broken"
        }

        fn run(&mut self, _x: Vec<f64>, _y: Vec<f64>) -> Result<(Vec<f64>, Vec<f64>)> {
            Err(config_error("nope"))
        }
    }

    fn gaussian_signal() -> Signal {
        let x = linspace(0.0, 10.0, 1000);
        let y = x.iter().map(|v| 10.0 * (-(v - 5.0).powi(2) / 0.5).exp() + 1.0).collect();
        Signal::new(7, x, y).unwrap()
    }

    #[test]
    fn rejects_non_monotonic_axis() {
        assert!(Signal::new(0, vec![0.0, 2.0, 1.0], vec![0.0; 3]).is_err());
        assert!(matches!(
            Signal::new(0, vec![0.0, 1.0], vec![0.0]),
            Err(Error::LengthMismatch { .. })
        ));
        let s = Signal::new(0, vec![2.0, 1.0], vec![0.0; 2]).unwrap();
        assert_eq!(s.direction(), AxisDirection::Decreasing);
        assert_eq!(s.name(), "signal_0");
    }

    #[test]
    fn result_is_cached_until_pipeline_changes() {
        let mut s = gaussian_signal();
        let first = s.result().unwrap();
        let again = s.result().unwrap();
        assert!(Arc::ptr_eq(&first, &again));

        s.add_stage(Shift(1.0));
        let shifted = s.result().unwrap();
        assert!(!Arc::ptr_eq(&first, &shifted));
        assert!(shifted.y()[0].abs() < 1e-9);
    }

    #[test]
    fn pipeline_run_from_outside_refreshes_trace() {
        let mut s = Signal::new(0, linspace(0.0, 4.0, 5), vec![1.0; 5]).unwrap();
        s.result().unwrap();
        s.add_stage(Shift(-1.0));
        let (x, y) = (s.x_raw().to_vec(), s.y_raw().to_vec());
        s.pipeline_mut().run(&x, &y).unwrap();
        assert!(s.pipeline().is_processed());
        assert!(s.result().unwrap().y().iter().all(|&v| (v - 2.0).abs() < 1e-12));
    }

    #[test]
    fn replacing_pipeline_discards_trace() {
        let mut s = Signal::new(0, linspace(0.0, 4.0, 5), vec![1.0; 5]).unwrap();
        s.result().unwrap();
        let mut ran = Pipeline::new();
        ran.add(Shift(-1.0));
        ran.run(&[0.0, 1.0], &[0.0, 0.0]).unwrap();
        let mut s = s.with_pipeline(ran);
        assert!(s.cached().is_none());
        assert!(s.result().unwrap().y().iter().all(|&v| (v - 2.0).abs() < 1e-12));
    }

    #[test]
    fn reprocessing_drops_peaks() {
        let mut s = gaussian_signal();
        s.find_peaks(&PeakPicking::default(), &RollingBall::default()).unwrap();
        assert_eq!(s.peaks().len(), 1);
        assert_eq!(s.peaks()[0].id().signal_id, Some(7));
        s.add_stage(Shift(1.0));
        s.result().unwrap();
        assert!(s.peaks().is_empty());
    }

    #[test]
    fn failed_stage_keeps_previous_trace() {
        let mut s = gaussian_signal();
        let before = s.result().unwrap();
        s.add_peak(400, 600).unwrap();
        s.add_stage(Broken);
        assert!(matches!(s.result(), Err(Error::Stage { .. })));
        assert!(Arc::ptr_eq(s.cached().unwrap(), &before));
        assert_eq!(s.peaks().len(), 1);
        assert!(s.peaks()[0].stats().is_ok());
    }

    #[test]
    fn manual_peaks_are_renumbered() {
        let mut s = gaussian_signal();
        s.add_peak(100, 200).unwrap();
        s.add_peak(400, 600).unwrap();
        s.add_peak(700, 800).unwrap();
        s.delete_peak(0).unwrap();
        let ids: Vec<usize> = s.peaks().iter().map(|p| p.id().peak_id).collect();
        assert_eq!(ids, vec![0, 1]);
        assert_eq!(s.tallest_peak().unwrap().low_bound_index(), 400);
        assert!(s.delete_peak(5).is_err());
    }

    #[test]
    fn normalization() {
        let mut s = gaussian_signal();
        let by_max = s.y_normalized_by_max().unwrap();
        assert!(by_max.iter().all(|&v| v <= 1.0));
        assert!(by_max.iter().any(|&v| (v - 1.0).abs() < 1e-12));
        let by_area = s.y_normalized_by_area().unwrap();
        let trace = s.result().unwrap();
        assert!((trapz(trace.x(), &by_area) - 1.0).abs() < 1e-9);
    }
}
