use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use chromapeak::analysis::{DomainLimit, LimitDomain};
use chromapeak::math::linspace;
use chromapeak::processing::baseline::{BaselineCorrection, PolynomialBaseline};
use chromapeak::processing::weights::{DataWeight, Span, Spans};
use chromapeak::{Calibration, PeakPicking, RollingBall, Signal, SignalArray, Stage, Trace};

fn gaussian(x: &[f64], center: f64, sigma: f64, amplitude: f64) -> Vec<f64> {
    x.iter()
        .map(|v| amplitude * (-(v - center).powi(2) / (2.0 * sigma * sigma)).exp())
        .collect()
}

fn picking_above(height: f64) -> PeakPicking {
    PeakPicking {
        min_height: Some(height),
        ..PeakPicking::default()
    }
}

#[derive(Debug)]
struct Counting(Arc<AtomicUsize>);

impl Stage for Counting {
    fn name(&self) -> &str {
        "counting"
    }

    fn run(&mut self, x: Vec<f64>, y: Vec<f64>) -> chromapeak::Result<(Vec<f64>, Vec<f64>)> {
        self.0.fetch_add(1, Ordering::SeqCst);
        Ok((x, y))
    }
}

#[test]
fn single_gaussian_scenario() {
    let x = linspace(0.0, 10.0, 1000);
    let y = gaussian(&x, 5.0, 0.5, 10.0);

    let candidates = picking_above(1.0).find_peaks(&x, &y).unwrap();
    assert_eq!(candidates.len(), 1);
    assert!((499..=500).contains(&candidates[0].index));

    let mut signal = Signal::new(0, x, y).unwrap();
    let peaks = signal.find_peaks(&picking_above(1.0), &RollingBall::default()).unwrap();
    assert_eq!(peaks.len(), 1);
    let stats = peaks[0].stats().unwrap();
    assert!((stats.low_bound_location - 3.5).abs() < 0.05, "low {}", stats.low_bound_location);
    assert!((stats.high_bound_location - 6.5).abs() < 0.05, "high {}", stats.high_bound_location);
    assert!((stats.area - 12.53).abs() < 0.1, "area {}", stats.area);
    assert!((stats.max_location - 5.0).abs() < 0.01);
}

#[test]
fn gaussian_moments_over_the_full_trace() {
    let x = linspace(0.0, 10.0, 2001);
    let y = gaussian(&x, 5.0, 0.5, 10.0);
    let mut signal = Signal::new(3, x, y).unwrap();
    let stats = signal.add_peak(0, 2001).unwrap().stats().unwrap().clone();
    assert!((stats.mean - 5.0).abs() < 1e-6);
    assert!((stats.std - 0.5).abs() < 1e-3);
    assert!(stats.skew.abs() < 1e-6);
    assert!(stats.kurtosis.abs() < 1e-2);
    assert!((stats.fwhm - 2.3548 * 0.5).abs() < 5e-3);
}

#[test]
fn all_zero_trace_has_no_peaks() {
    let x = linspace(0.0, 10.0, 1000);
    let y = vec![0.0; 1000];
    let candidates = PeakPicking::default().find_peaks(&x, &y).unwrap();
    assert!(candidates.is_empty());

    let trace = Arc::new(Trace::new(x, y).unwrap());
    let peaks = RollingBall::default().detect(&trace, &[], None).unwrap();
    assert!(peaks.is_empty());
}

#[test]
fn bounds_meet_at_the_valley_between_peaks() {
    let x = linspace(0.0, 10.0, 1001);
    let y: Vec<f64> = gaussian(&x, 4.0, 0.5, 2.0)
        .iter()
        .zip(gaussian(&x, 6.0, 0.5, 2.0))
        .map(|(a, b)| a + b)
        .collect();
    let valley = (400..=600)
        .min_by(|&a, &b| y[a].total_cmp(&y[b]))
        .unwrap();

    let mut signal = Signal::new(0, x, y).unwrap();
    let ball = RollingBall::single_point(0.0, 1, 0.01).unwrap();
    let peaks = signal.find_peaks(&PeakPicking::default(), &ball).unwrap();
    assert_eq!(peaks.len(), 2);
    assert_eq!(peaks[0].high_bound_index() - 1, valley);
    assert_eq!(peaks[1].low_bound_index(), valley);
}

#[test]
fn window_sizes_agree_on_piecewise_linear_peak() {
    // Rises 0 → 100 over 50..=100, falls back to 0 over 100..=125.
    let y: Vec<f64> = (0..200)
        .map(|i| match i {
            50..=100 => (i - 50) as f64 * 2.0,
            101..=125 => 100.0 - (i - 100) as f64 * 4.0,
            _ => 0.0,
        })
        .collect();
    let x: Vec<f64> = (0..200).map(|i| i as f64 * 0.1).collect();

    let single = RollingBall::single_point(0.0, 1, 0.1).unwrap();
    let expected = single.bounds(100, &x, &y).unwrap();
    assert_eq!(expected, (54, 124));
    for n in 2..=4 {
        let windowed = RollingBall::new(n, 1, 1, 0.0, 1, 0.1).unwrap();
        assert_eq!(windowed.bounds(100, &x, &y).unwrap(), expected, "n = {n}");
    }
}

#[test]
fn mask_is_idempotent() {
    let x = linspace(0.0, 10.0, 101);
    let y = gaussian(&x, 5.0, 1.0, 3.0);
    let weight = DataWeight::new(Spans::new(vec![Span::Value { low: 4.0, high: 6.0 }], false).unwrap());

    let (xm, ym) = weight.apply_as_mask(&x, &y).unwrap();
    assert!(xm.len() < x.len());
    assert!(xm.iter().all(|&v| !(4.0..=6.0).contains(&v)));
    let cached = weight.get_weights(&x, &y).unwrap().into_owned();

    let (xmm, ymm) = weight.apply_as_mask(&xm, &ym).unwrap();
    assert_eq!(xmm, xm);
    assert_eq!(ymm, ym);
    assert_eq!(weight.get_weights(&x, &y).unwrap().as_ref(), cached.as_slice());
}

#[test]
fn pipeline_recomputes_once_per_change() {
    let count = Arc::new(AtomicUsize::new(0));
    let x = linspace(0.0, 1.0, 11);
    let mut signal = Signal::new(0, x.clone(), x).unwrap();
    signal.add_stage(Counting(Arc::clone(&count)));
    assert!(!signal.pipeline().is_processed());

    signal.result().unwrap();
    assert!(signal.pipeline().is_processed());
    signal.result().unwrap();
    signal.len().unwrap();
    assert_eq!(count.load(Ordering::SeqCst), 1);

    signal.add_stage(Counting(Arc::clone(&count)));
    assert!(!signal.pipeline().is_processed());
    signal.result().unwrap();
    assert_eq!(count.load(Ordering::SeqCst), 3);

    signal.pipeline_mut().remove(1).unwrap();
    assert!(!signal.pipeline().is_processed());
    signal.result().unwrap();
    signal.result().unwrap();
    assert_eq!(count.load(Ordering::SeqCst), 4);
}

#[test]
fn calibrated_limit_on_decreasing_mass_axis() {
    let cal = Calibration::new("conventional", |t| 10f64.powf(-0.6 * t + 10.644))
        .with_output_bounds(160.0, 1_090_000.0)
        .unwrap();
    let (lo, hi) = cal.input_bounds().unwrap();
    assert!((cal.get_y(lo) - 1_090_000.0).abs() / 1_090_000.0 < 1e-5);
    assert!((cal.get_y(hi) - 160.0).abs() / 160.0 < 1e-5);

    // Peaks at t = 12 (M ≈ 2780) and t = 16 (M ≈ 11).
    let x = linspace(8.0, 20.0, 1201);
    let y: Vec<f64> = gaussian(&x, 12.0, 0.3, 1.0)
        .iter()
        .zip(gaussian(&x, 16.0, 0.3, 1.0))
        .map(|(a, b)| a + b)
        .collect();

    // Ends given high-to-low on purpose.
    let limits = DomainLimit::new(1e5, 1e3, LimitDomain::Calibrated(cal.clone())).unwrap();
    let candidates = picking_above(0.5).with_limits(limits).find_peaks(&x, &y).unwrap();
    assert_eq!(candidates.len(), 1);
    assert!((x[candidates[0].index] - 12.0).abs() < 0.02);

    let mut signal = Signal::new(0, x, y).unwrap().with_calibration(cal);
    let picking = picking_above(0.5);
    let peaks = signal.find_peaks(&picking, &RollingBall::default()).unwrap();
    let mw = peaks[0].stats().unwrap().molecular_weight.unwrap();
    assert!(mw.mw >= mw.mn);
    assert!(mw.d >= 1.0);
    assert!((mw.m_at_max.log10() - (10.644 - 0.6 * 12.0)).abs() < 0.02);
}

#[test]
fn batch_analysis_keeps_row_order_after_baseline_removal() {
    let x = linspace(0.0, 10.0, 501);
    let centers = [3.0, 7.0, 4.5, 6.0, 5.0];
    let z: Vec<Vec<f64>> = centers
        .iter()
        .enumerate()
        .map(|(i, &c)| {
            gaussian(&x, c, 0.2, 1.0)
                .iter()
                .zip(&x)
                .map(|(g, xv)| g + 0.1 * i as f64 + 0.02 * xv)
                .collect()
        })
        .collect();
    let temperatures: Vec<f64> = (0..centers.len()).map(|i| 20.0 + 5.0 * i as f64).collect();

    let exclude = Spans::new(vec![Span::Value { low: 2.0, high: 8.0 }], false).unwrap();
    let mut array = SignalArray::new(x, temperatures, z).unwrap().with_name("ramp");
    array
        .pipeline_mut()
        .add(BaselineCorrection::new(PolynomialBaseline::new(1)).with_weights(DataWeight::new(exclude)));

    let rows = array.analyze(&picking_above(0.5), &RollingBall::default()).unwrap();
    assert_eq!(rows.len(), centers.len());
    for (i, (row, center)) in rows.iter().zip(centers).enumerate() {
        assert_eq!(row.row, i);
        assert_eq!(row.secondary, 20.0 + 5.0 * i as f64);
        assert_eq!(row.signal.name(), format!("ramp_{i}"));
        let reports = row.reports().unwrap();
        assert_eq!(reports.len(), 1, "row {i}");
        assert!((reports[0].stats.max_location - center).abs() < 0.03);
        assert!((reports[0].stats.max_value - 1.0).abs() < 1e-3);
    }
}
