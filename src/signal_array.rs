use rayon::prelude::*;

use crate::analysis::{Calibration, PeakPicking, PeakReport, RollingBall};
use crate::error::{check_lengths, Error, Result};
use crate::math::AxisDirection;
use crate::processing::Pipeline;
use crate::signal::Signal;

/// A family of signals sharing one coordinate axis `x`, each taken at a
/// value of a secondary axis `y` (reaction time, temperature). Row `i` of
/// `z` is the intensity trace at `y[i]`.
#[derive(Debug)]
pub struct SignalArray {
    name: String,
    x_raw: Vec<f64>,
    y_raw: Vec<f64>,
    z_raw: Vec<Vec<f64>>,
    direction: AxisDirection,
    pipeline: Pipeline,
    calibration: Option<Calibration>,
    result: Option<Processed>,
}

#[derive(Debug, Clone)]
struct Processed {
    x: Vec<f64>,
    y: Vec<f64>,
    z: Vec<Vec<f64>>,
    /// Pipeline run that produced this result.
    run: usize,
}

/// Peaks of one row, tagged with its place in the family.
#[derive(Debug)]
pub struct RowAnalysis {
    pub row: usize,
    /// Secondary-axis value of the row.
    pub secondary: f64,
    pub signal: Signal,
}

impl RowAnalysis {
    pub fn reports(&self) -> Result<Vec<PeakReport>> {
        self.signal.stats()
    }
}

impl SignalArray {
    pub fn new(x: Vec<f64>, y: Vec<f64>, z: Vec<Vec<f64>>) -> Result<Self> {
        if y.len() != z.len() {
            return Err(Error::LengthMismatch { x: y.len(), y: z.len() });
        }
        for row in &z {
            check_lengths(&x, row)?;
        }
        let direction = AxisDirection::of(&x)?;
        Ok(Self {
            name: "signal_array".into(),
            x_raw: x,
            y_raw: y,
            z_raw: z,
            direction,
            pipeline: Pipeline::new(),
            calibration: None,
            result: None,
        })
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    pub fn with_calibration(mut self, calibration: Calibration) -> Self {
        self.calibration = Some(calibration);
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn direction(&self) -> AxisDirection {
        self.direction
    }

    pub fn number_of_signals(&self) -> usize {
        self.z_raw.len()
    }

    pub fn pipeline_mut(&mut self) -> &mut Pipeline {
        &mut self.pipeline
    }

    /// Processed `(x, y, z)`, recomputed when the pipeline is dirty or has
    /// been run elsewhere since.
    pub fn result(&mut self) -> Result<(&[f64], &[f64], &[Vec<f64>])> {
        let fresh = self.pipeline.is_processed()
            && matches!(&self.result, Some(p) if p.run == self.pipeline.run_count());
        if !fresh {
            let (x, y, z) = self.pipeline.run_array(&self.x_raw, &self.y_raw, &self.z_raw)?;
            let run = self.pipeline.run_count();
            self.result = Some(Processed { x, y, z, run });
        }
        match &self.result {
            Some(p) => Ok((&p.x, &p.y, &p.z)),
            None => Err(Error::EmptyInput(format!("{} has no processed data", self.name))),
        }
    }

    /// One [`Signal`] per processed row, ids equal to row indices.
    pub fn signals(&mut self) -> Result<Vec<Signal>> {
        let name = self.name.clone();
        let calibration = self.calibration.clone();
        let (x, _, z) = self.result()?;
        z.iter()
            .enumerate()
            .map(|(i, row)| row_signal(&name, i, x.to_vec(), row.clone(), calibration.clone()))
            .collect()
    }

    /// Pick and bound peaks on every processed row in parallel.
    ///
    /// Each row gets its own copy of the picking weights; the output keeps
    /// row order.
    pub fn analyze(&mut self, picking: &PeakPicking, detector: &RollingBall) -> Result<Vec<RowAnalysis>> {
        let name = self.name.clone();
        let calibration = self.calibration.clone();
        let (x, y, z) = self.result()?;
        log::info!("{name}: analyzing {} row(s)", z.len());
        z.par_iter()
            .enumerate()
            .map(|(i, row)| {
                let mut signal = row_signal(&name, i, x.to_vec(), row.clone(), calibration.clone())?;
                signal.find_peaks(&picking.fresh(), detector)?;
                Ok(RowAnalysis {
                    row: i,
                    secondary: y[i],
                    signal,
                })
            })
            .collect()
    }
}

fn row_signal(name: &str, i: usize, x: Vec<f64>, z: Vec<f64>, calibration: Option<Calibration>) -> Result<Signal> {
    let signal = Signal::new(i, x, z)?.with_name(format!("{name}_{i}"));
    Ok(match calibration {
        Some(cal) => signal.with_calibration(cal),
        None => signal,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::math::linspace;
    use crate::processing::transform::EveryN;

    fn family() -> SignalArray {
        let x = linspace(0.0, 10.0, 501);
        let centers = [2.0, 4.0, 6.0, 8.0, 3.0, 7.0];
        let z = centers
            .iter()
            .map(|&c| x.iter().map(|v| (-(v - c).powi(2) / 0.1).exp()).collect())
            .collect();
        let y = (0..centers.len()).map(|i| i as f64 * 0.5).collect();
        SignalArray::new(x, y, z).unwrap()
    }

    #[test]
    fn shape_is_checked() {
        assert!(SignalArray::new(vec![0.0, 1.0], vec![0.0], vec![vec![0.0]]).is_err());
        assert!(SignalArray::new(vec![0.0, 1.0], vec![0.0, 1.0], vec![vec![0.0, 1.0]]).is_err());
    }

    #[test]
    fn analysis_preserves_row_order() {
        let mut array = family();
        let rows = array
            .analyze(&PeakPicking::default(), &RollingBall::default())
            .unwrap();
        assert_eq!(rows.len(), 6);
        let expected = [2.0, 4.0, 6.0, 8.0, 3.0, 7.0];
        for (i, (row, center)) in rows.iter().zip(expected).enumerate() {
            assert_eq!(row.row, i);
            assert_eq!(row.secondary, i as f64 * 0.5);
            assert_eq!(row.signal.id(), i);
            let peaks = row.signal.peaks();
            assert_eq!(peaks.len(), 1);
            assert!((peaks[0].max_location().unwrap() - center).abs() < 0.03);
        }
    }

    #[test]
    fn pipeline_run_from_outside_refreshes_result() {
        let mut array = family();
        assert_eq!(array.result().unwrap().0.len(), 501);
        array.pipeline_mut().add(EveryN::new(2).unwrap());
        let (x, y, z) = (array.x_raw.clone(), array.y_raw.clone(), array.z_raw.clone());
        array.pipeline_mut().run_array(&x, &y, &z).unwrap();
        let (x, _, z) = array.result().unwrap();
        assert_eq!(x.len(), 251);
        assert_eq!(z[0].len(), 251);
    }

    #[test]
    fn signals_share_processed_axis() {
        let mut array = family();
        let signals = array.signals().unwrap();
        assert_eq!(signals.len(), array.number_of_signals());
        assert_eq!(signals[3].name(), "signal_array_3");
    }
}
