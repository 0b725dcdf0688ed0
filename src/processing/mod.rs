/// Processing layer: ordered stages turning raw arrays into processed ones.
///
/// Architecture:
/// ```text
///   x_raw, y_raw
///        │
///        ▼
///   ┌──────────┐   add / insert / remove  ──►  Dirty
///   │ Pipeline  │   run (all stages ok)    ──►  Clean
///   └──────────┘
///        │  stage 0 → stage 1 → … (each sees the full previous output)
///        ▼
///     x', y'
/// ```

pub mod baseline;
pub mod transform;
pub mod weights;

use std::fmt;

use crate::error::{check_lengths, config_error, Error, Result};

// ---------------------------------------------------------------------------
// Stage – one pure transform
// ---------------------------------------------------------------------------

/// A processing step `(x, y) -> (x', y')`.
///
/// Stages may keep what they computed during their last run (a fitted
/// baseline, a mask) for inspection afterwards.
pub trait Stage: fmt::Debug + Send + Sync {
    /// Short identifier, used for removal by name and in diagnostics.
    fn name(&self) -> &str;

    fn run(&mut self, x: Vec<f64>, y: Vec<f64>) -> Result<(Vec<f64>, Vec<f64>)>;

    /// Family variant: `x` shared by every row of `z`, `y` indexes the rows.
    ///
    /// The default applies [`Stage::run`] to each row and requires every row
    /// to come back with the same coordinates.
    fn run_array(
        &mut self,
        x: Vec<f64>,
        y: Vec<f64>,
        z: Vec<Vec<f64>>,
    ) -> Result<(Vec<f64>, Vec<f64>, Vec<Vec<f64>>)> {
        let mut x_out: Option<Vec<f64>> = None;
        let mut rows = Vec::with_capacity(z.len());
        for row in z {
            let (xr, zr) = self.run(x.clone(), row)?;
            match &x_out {
                Some(prev) if *prev != xr => {
                    return Err(Error::Stage {
                        stage: self.name().to_string(),
                        message: "rows produced different coordinates".into(),
                    })
                }
                Some(_) => {}
                None => x_out = Some(xr),
            }
            rows.push(zr);
        }
        Ok((x_out.unwrap_or(x), y, rows))
    }
}

// ---------------------------------------------------------------------------
// Pipeline
// ---------------------------------------------------------------------------

/// Whether the last run reflects the current list of stages.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PipelineState {
    Clean,
    Dirty,
}

/// Ordered, mutable list of stages with a clean/dirty flag.
#[derive(Debug)]
pub struct Pipeline {
    stages: Vec<Box<dyn Stage>>,
    state: PipelineState,
    runs: usize,
}

impl Default for Pipeline {
    fn default() -> Self {
        Self {
            stages: Vec::new(),
            state: PipelineState::Dirty,
            runs: 0,
        }
    }
}

impl Pipeline {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.stages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.stages.is_empty()
    }

    pub fn state(&self) -> PipelineState {
        self.state
    }

    /// `true` once a full run succeeded and nothing changed since.
    pub fn is_processed(&self) -> bool {
        self.state == PipelineState::Clean
    }

    /// Number of successful full runs so far.
    pub fn run_count(&self) -> usize {
        self.runs
    }

    pub fn stages(&self) -> &[Box<dyn Stage>] {
        &self.stages
    }

    /// Stage at `index`, for reading its inspection state.
    pub fn stage(&self, index: usize) -> Option<&dyn Stage> {
        self.stages.get(index).map(|s| s.as_ref())
    }

    /// First stage with the given name.
    pub fn find(&self, name: &str) -> Option<&dyn Stage> {
        self.stages.iter().find(|s| s.name() == name).map(|s| s.as_ref())
    }

    pub fn add(&mut self, stage: impl Stage + 'static) {
        self.add_boxed(Box::new(stage));
    }

    pub fn add_boxed(&mut self, stage: Box<dyn Stage>) {
        log::debug!("pipeline: add stage '{}'", stage.name());
        self.stages.push(stage);
        self.state = PipelineState::Dirty;
    }

    pub fn insert(&mut self, index: usize, stage: impl Stage + 'static) -> Result<()> {
        if index > self.stages.len() {
            return Err(config_error(format!(
                "insert index {index} out of range for {} stages",
                self.stages.len()
            )));
        }
        log::debug!("pipeline: insert stage '{}' at {index}", stage.name());
        self.stages.insert(index, Box::new(stage));
        self.state = PipelineState::Dirty;
        Ok(())
    }

    pub fn remove(&mut self, index: usize) -> Result<Box<dyn Stage>> {
        if index >= self.stages.len() {
            return Err(config_error(format!(
                "remove index {index} out of range for {} stages",
                self.stages.len()
            )));
        }
        let stage = self.stages.remove(index);
        log::debug!("pipeline: removed stage '{}'", stage.name());
        self.state = PipelineState::Dirty;
        Ok(stage)
    }

    /// Remove the first stage called `name`.
    pub fn remove_named(&mut self, name: &str) -> Result<Box<dyn Stage>> {
        let index = self
            .stages
            .iter()
            .position(|s| s.name() == name)
            .ok_or_else(|| config_error(format!("no stage named '{name}'")))?;
        self.remove(index)
    }

    /// Apply every stage in order.
    ///
    /// On failure the state stays `Dirty`; callers keep their previous result.
    pub fn run(&mut self, x: &[f64], y: &[f64]) -> Result<(Vec<f64>, Vec<f64>)> {
        check_lengths(x, y)?;
        let (mut xs, mut ys) = (x.to_vec(), y.to_vec());
        for stage in &mut self.stages {
            log::trace!("pipeline: running '{}' on {} points", stage.name(), xs.len());
            let (xn, yn) = stage.run(xs, ys).map_err(|e| stage_error(stage.name(), e))?;
            check_lengths(&xn, &yn).map_err(|e| stage_error(stage.name(), e))?;
            xs = xn;
            ys = yn;
        }
        self.finish();
        Ok((xs, ys))
    }

    /// Apply every stage to a family of rows sharing `x`.
    pub fn run_array(
        &mut self,
        x: &[f64],
        y: &[f64],
        z: &[Vec<f64>],
    ) -> Result<(Vec<f64>, Vec<f64>, Vec<Vec<f64>>)> {
        if y.len() != z.len() {
            return Err(Error::LengthMismatch { x: y.len(), y: z.len() });
        }
        for row in z {
            check_lengths(x, row)?;
        }
        let (mut xs, mut ys, mut zs) = (x.to_vec(), y.to_vec(), z.to_vec());
        for stage in &mut self.stages {
            let (xn, yn, zn) = stage
                .run_array(xs, ys, zs)
                .map_err(|e| stage_error(stage.name(), e))?;
            xs = xn;
            ys = yn;
            zs = zn;
        }
        self.finish();
        Ok((xs, ys, zs))
    }

    fn finish(&mut self) {
        self.state = PipelineState::Clean;
        self.runs += 1;
        log::debug!("pipeline: {} stage(s) applied (run #{})", self.stages.len(), self.runs);
    }
}

fn stage_error(stage: &str, err: Error) -> Error {
    match err {
        Error::Stage { .. } => err,
        other => Error::Stage {
            stage: stage.to_string(),
            message: other.to_string(),
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug)]
    struct Scale(f64);

    impl Stage for Scale {
        fn name(&self) -> &str {
            "scale"
        }

        fn run(&mut self, x: Vec<f64>, y: Vec<f64>) -> Result<(Vec<f64>, Vec<f64>)> {
            Ok((x, y.into_iter().map(|v| v * self.0).collect()))
        }
    }

    #[derive(Debug)]
    struct Offset(f64);

    impl Stage for Offset {
        fn name(&self) -> &str {
            "offset"
        }

        fn run(&mut self, x: Vec<f64>, y: Vec<f64>) -> Result<(Vec<f64>, Vec<f64>)> {
            Ok((x, y.into_iter().map(|v| v + self.0).collect()))
        }
    }

    #[derive(Debug)]
    struct Fails;

    impl Stage for Fails {
        fn name(&self) -> &str {
            "fails"
        }

        fn run(&mut self, _x: Vec<f64>, _y: Vec<f64>) -> Result<(Vec<f64>, Vec<f64>)> {
            Err(Error::Convergence("always".into()))
        }
    }

    #[test]
    fn stages_apply_in_order() {
        let mut p = Pipeline::new();
        p.add(Scale(2.0));
        p.add(Offset(1.0));
        let (_, y) = p.run(&[0.0, 1.0], &[1.0, 2.0]).unwrap();
        assert_eq!(y, vec![3.0, 5.0]);

        p.insert(0, Offset(1.0)).unwrap();
        let (_, y) = p.run(&[0.0, 1.0], &[1.0, 2.0]).unwrap();
        assert_eq!(y, vec![5.0, 7.0]);
    }

    #[test]
    fn mutation_marks_dirty() {
        let mut p = Pipeline::new();
        assert_eq!(p.state(), PipelineState::Dirty);
        p.run(&[0.0], &[1.0]).unwrap();
        assert!(p.is_processed());
        p.add(Scale(3.0));
        assert!(!p.is_processed());
        p.run(&[0.0], &[1.0]).unwrap();
        p.remove_named("scale").unwrap();
        assert!(!p.is_processed());
        assert_eq!(p.run_count(), 2);
    }

    #[test]
    fn failure_leaves_pipeline_dirty() {
        let mut p = Pipeline::new();
        p.add(Scale(2.0));
        p.add(Fails);
        let err = p.run(&[0.0], &[1.0]).unwrap_err();
        assert!(matches!(err, Error::Stage { ref stage, .. } if stage == "fails"));
        assert!(!p.is_processed());
        assert_eq!(p.run_count(), 0);
    }

    #[test]
    fn out_of_range_edits_are_rejected() {
        let mut p = Pipeline::new();
        assert!(p.insert(1, Scale(1.0)).is_err());
        assert!(p.remove(0).is_err());
        assert!(p.remove_named("missing").is_err());
    }

    #[test]
    fn array_run_applies_per_row() {
        let mut p = Pipeline::new();
        p.add(Scale(10.0));
        let z = vec![vec![1.0, 2.0], vec![3.0, 4.0]];
        let (_, t, z) = p.run_array(&[0.0, 1.0], &[0.5, 1.5], &z).unwrap();
        assert_eq!(t, vec![0.5, 1.5]);
        assert_eq!(z, vec![vec![10.0, 20.0], vec![30.0, 40.0]]);
    }
}
