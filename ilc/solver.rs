//! Minimum-variance weights under linear spectral constraints.
//!
//! With `P = C^-1 A` and `M = A^T C^-1 A`, the weights with unit response to
//! column 0 of `A` and zero response to the other columns are
//! `w = P M^-1 e0`. One and two constraints have closed forms; three or more
//! go through an explicit inversion of the `k x k` system.

use crate::config::InversionPolicy;
use crate::error::PixelError;
use crate::linalg::SymmetricInverter;
use ndarray::linalg::{general_mat_mul, general_mat_vec_mul};
use ndarray::{Array2, ArrayView1, ArrayView2, ArrayViewMut1};

/// Single-constraint ILC, `w = C^-1 a / (a^T C^-1 a)`.
pub fn ilc_weights(
    cinv: ArrayView2<'_, f64>,
    target: ArrayView1<'_, f64>,
    mut out: ArrayViewMut1<'_, f64>,
) -> Result<(), PixelError> {
    general_mat_vec_mul(1.0, &cinv, &target, 0.0, &mut out);
    let norm = target.dot(&out);
    if !(norm.is_finite() && norm > 0.0) {
        return Err(PixelError::DegenerateConstraints(format!(
            "target response a^T C^-1 a = {norm} is not positive"
        )));
    }
    out.mapv_inplace(|v| v / norm);
    Ok(())
}

/// Per-worker solver with buffers sized for one constraint count.
#[derive(Debug, Clone)]
pub struct WeightSolver {
    gram_inverter: SymmetricInverter,
    min_pivot_ratio: f64,
    projected: Array2<f64>,
    gram: Array2<f64>,
    gram_inv: Array2<f64>,
}

impl WeightSolver {
    /// `min_pivot_ratio` bounds how close to collinear the constraints may be
    /// (in the `C^-1` metric). The constraint system is never regularized,
    /// since a ridge would break the exact nulling of the contaminants.
    pub fn new(nfreqs: usize, ncomponents: usize, min_pivot_ratio: f64) -> Self {
        Self {
            gram_inverter: SymmetricInverter::new(InversionPolicy::FailFast, min_pivot_ratio),
            min_pivot_ratio,
            projected: Array2::zeros((nfreqs, ncomponents)),
            gram: Array2::zeros((ncomponents, ncomponents)),
            gram_inv: Array2::zeros((ncomponents, ncomponents)),
        }
    }

    /// Solves for the weights given the inverse covariance and the
    /// `[Nfreqs, k]` constraint matrix.
    pub fn solve(
        &mut self,
        cinv: ArrayView2<'_, f64>,
        constraints: ArrayView2<'_, f64>,
        mut out: ArrayViewMut1<'_, f64>,
    ) -> Result<(), PixelError> {
        debug_assert_eq!(constraints.dim(), self.projected.dim());
        if constraints.iter().any(|v| !v.is_finite()) {
            return Err(PixelError::DegenerateConstraints(
                "constraint matrix holds non-finite entries".to_string(),
            ));
        }

        match constraints.ncols() {
            1 => ilc_weights(cinv, constraints.column(0), out.view_mut())?,
            2 => self.two_constraint(cinv, constraints, out.view_mut())?,
            _ => self.deprojected(cinv, constraints, out.view_mut())?,
        }

        if out.iter().any(|v| !v.is_finite()) {
            return Err(PixelError::NonFiniteWeights);
        }
        Ok(())
    }

    /// Closed form for `w^T a = 1`, `w^T b = 0`:
    /// `w = (B C^-1 a - D C^-1 b) / (A B - D^2)` with `A = a^T C^-1 a`,
    /// `B = b^T C^-1 b` and `D = a^T C^-1 b`.
    fn two_constraint(
        &mut self,
        cinv: ArrayView2<'_, f64>,
        constraints: ArrayView2<'_, f64>,
        mut out: ArrayViewMut1<'_, f64>,
    ) -> Result<(), PixelError> {
        general_mat_mul(1.0, &cinv, &constraints, 0.0, &mut self.projected);
        let (a, b) = (constraints.column(0), constraints.column(1));
        let (cinv_a, cinv_b) = (self.projected.column(0), self.projected.column(1));
        let aa = a.dot(&cinv_a);
        let bb = b.dot(&cinv_b);
        let ab = a.dot(&cinv_b);
        let det = aa * bb - ab * ab;
        // det / (aa bb) is the squared second pivot of the equilibrated system.
        if !(aa > 0.0 && bb > 0.0 && det > self.min_pivot_ratio * aa * bb) {
            return Err(PixelError::DegenerateConstraints(format!(
                "target and contaminant are collinear (AB - D^2 = {det:e})"
            )));
        }
        for ((w, &pa), &pb) in out.iter_mut().zip(cinv_a.iter()).zip(cinv_b.iter()) {
            *w = (bb * pa - ab * pb) / det;
        }
        Ok(())
    }

    /// General `k`-constraint solve, `w = P row0(M^-1)`.
    fn deprojected(
        &mut self,
        cinv: ArrayView2<'_, f64>,
        constraints: ArrayView2<'_, f64>,
        mut out: ArrayViewMut1<'_, f64>,
    ) -> Result<(), PixelError> {
        general_mat_mul(1.0, &cinv, &constraints, 0.0, &mut self.projected);
        general_mat_mul(1.0, &constraints.t(), &self.projected, 0.0, &mut self.gram);
        self.gram_inverter
            .invert_into(self.gram.view(), self.gram_inv.view_mut())
            .map_err(|e| PixelError::DegenerateConstraints(format!("A^T C^-1 A: {e}")))?;
        general_mat_vec_mul(1.0, &self.projected, &self.gram_inv.row(0), 0.0, &mut out);
        Ok(())
    }
}
