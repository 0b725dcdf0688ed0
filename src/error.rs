use thiserror::Error;

// ---------------------------------------------------------------------------
// Library error type
// ---------------------------------------------------------------------------

/// Errors raised by the processing and analysis layers.
///
/// Empty results (no candidates, all-zero weights, zero-width bounds) are
/// not errors; they are logged and surface as empty collections or sentinel
/// values instead.
#[derive(Debug, Error)]
pub enum Error {
    /// Invalid parameter combination caught while building a component.
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    /// Coordinate and intensity arrays disagree in length.
    #[error("length mismatch: x has {x} values but y has {y}")]
    LengthMismatch { x: usize, y: usize },

    /// Peak bounds that do not fit the parent trace.
    #[error("invalid peak bounds {low}..{high} for a trace of {len} points")]
    InvalidBounds { low: usize, high: usize, len: usize },

    /// The trace a peak points to has been replaced or dropped.
    #[error("parent trace of peak {0} is no longer available")]
    ParentDropped(String),

    /// A processing stage failed; the pipeline result was left untouched.
    #[error("stage '{stage}' failed: {message}")]
    Stage { stage: String, message: String },

    /// Numeric search did not reach a solution.
    #[error("no convergence: {0}")]
    Convergence(String),

    /// An operation needs at least one data point.
    #[error("empty input: {0}")]
    EmptyInput(String),
}

/// Result alias used throughout the library.
pub type Result<T> = std::result::Result<T, Error>;

/// Shorthand for building [`Error::InvalidConfig`].
pub(crate) fn config_error(msg: impl Into<String>) -> Error {
    Error::InvalidConfig(msg.into())
}

/// Check that a coordinate/intensity pair has matching lengths.
pub(crate) fn check_lengths(x: &[f64], y: &[f64]) -> Result<()> {
    if x.len() != y.len() {
        return Err(Error::LengthMismatch {
            x: x.len(),
            y: y.len(),
        });
    }
    Ok(())
}
