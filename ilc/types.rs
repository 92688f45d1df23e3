use ndarray::{Array2, ArrayView1};

/// Weights returned by the per-pixel entry points.
#[derive(Debug, Clone, PartialEq)]
pub struct PixelWeights {
    /// Shape `[Npixels, Nfreqs]`; row `p` belongs to the `p`-th work-list entry.
    pub weights: Array2<f64>,
    /// Work-list positions whose rows were zeroed under
    /// [`crate::config::PixelFailurePolicy::ZeroRow`], in ascending order.
    pub failed_pixels: Vec<usize>,
    /// Estimated channel covariances in packed upper-triangle form, shape
    /// `[Npixels, Nfreqs (Nfreqs + 1) / 2]`. Only the disc estimator returns
    /// them; rows whose estimate failed are zero.
    pub covariance: Option<Array2<f64>>,
}

impl PixelWeights {
    pub fn is_complete(&self) -> bool {
        self.failed_pixels.is_empty()
    }
}

/// Per-pixel modified-blackbody parameters, indexed by map pixel.
#[derive(Debug, Clone, Copy)]
pub struct DustMaps<'a> {
    pub beta: ArrayView1<'a, f64>,
    pub temperature: ArrayView1<'a, f64>,
}
