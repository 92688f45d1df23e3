use crate::config::ConfigError;
use crate::linalg::faer_ndarray::FaerLinalgError;
use crate::pixpix::interpolation::SplineError;
use thiserror::Error;

/// A failure confined to one pixel of the work list.
#[derive(Error, Debug)]
pub enum PixelError {
    #[error("covariance inversion failed: {0}")]
    Inversion(#[from] FaerLinalgError),

    #[error("disc holds no unmasked pixels, so the covariance normalization is zero")]
    EmptyDisc,

    #[error("disc holds more than {capacity} pixels")]
    DiscOverflow { capacity: usize },

    #[error("constraint system is degenerate: {0}")]
    DegenerateConstraints(String),

    #[error("solved weights contain non-finite values")]
    NonFiniteWeights,
}

impl PixelError {
    /// Whether the zero-row policy may absorb this failure. A disc overflow is
    /// a broken precondition of the call, not a property of the data.
    pub fn is_recoverable(&self) -> bool {
        !matches!(self, PixelError::DiscOverflow { .. })
    }
}

/// Every way a call can fail. No partial output survives an error.
#[derive(Error, Debug)]
pub enum IlcError {
    #[error("at least one frequency channel is required")]
    NoChannels,

    #[error("{name} has length {actual}, expected {expected}")]
    LengthMismatch {
        name: &'static str,
        expected: usize,
        actual: usize,
    },

    #[error("{name} has shape {actual:?}, expected {expected:?}")]
    ShapeMismatch {
        name: &'static str,
        expected: (usize, usize),
        actual: (usize, usize),
    },

    #[error("pixel index {index} at work-list position {position} is outside a map of {npix} pixels")]
    PixelOutOfRange {
        position: usize,
        index: usize,
        npix: usize,
    },

    #[error("{name} holds a non-finite value at flat index {index}")]
    NonFinite { name: &'static str, index: usize },

    #[error("{name} must be positive and finite, got {value}")]
    InvalidScalar { name: &'static str, value: f64 },

    #[error("pixel-pair maps are inconsistent: {0}")]
    InvalidPairMaps(String),

    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error("failed to build the worker pool: {0}")]
    ThreadPool(#[from] rayon::ThreadPoolBuildError),

    #[error("correlation interpolant: {0}")]
    Spline(#[from] SplineError),

    #[error("pixel {ipix} (work-list position {position}): {source}")]
    PixelFailed {
        position: usize,
        ipix: usize,
        #[source]
        source: PixelError,
    },

    #[error("global covariance solve failed: {0}")]
    GlobalSolve(#[source] PixelError),

    #[error("cannot allocate the {what} of shape {shape:?}")]
    Allocation {
        what: &'static str,
        shape: Vec<usize>,
    },

    #[error("internal shape error: {0}")]
    Shape(#[from] ndarray::ShapeError),
}
