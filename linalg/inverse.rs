//! Inversion of symmetric positive-definite matrices.
//!
//! Every covariance matrix in the crate goes through [`SymmetricInverter`]: the
//! per-pixel `Nfreqs x Nfreqs` channel covariances, the small `k x k`
//! constraint systems of the deprojected solvers, and the single global
//! `(Npixels*Nfreqs)^2` matrix of the pixel-pixel variant.
//!
//! The factorization is a Cholesky decomposition. A matrix is declared
//! singular when the factorization fails outright or when the squared ratio
//! of its smallest to largest pivot falls below `min_pivot_ratio`, which
//! catches matrices that factor but would produce a meaningless inverse.
//! The matrix is equilibrated by its diagonal first so the ratio measures
//! conditioning rather than the relative units of the channels. What happens
//! next is decided by the [`InversionPolicy`].

use crate::config::InversionPolicy;
use crate::linalg::faer_ndarray::{FaerCholesky, FaerCholeskyFactor, FaerLinalgError};
use faer::Side;
use ndarray::{Array1, Array2, ArrayBase, ArrayView2, ArrayViewMut2, Data, Ix2};

#[derive(Debug, Clone, Copy)]
pub struct SymmetricInverter {
    policy: InversionPolicy,
    min_pivot_ratio: f64,
}

impl SymmetricInverter {
    pub fn new(policy: InversionPolicy, min_pivot_ratio: f64) -> Self {
        Self {
            policy,
            min_pivot_ratio,
        }
    }

    /// Inverts `matrix`, allocating the result.
    pub fn invert(&self, matrix: ArrayView2<'_, f64>) -> Result<Array2<f64>, FaerLinalgError> {
        let mut out = Array2::zeros(matrix.raw_dim());
        self.invert_into(matrix, out.view_mut())?;
        Ok(out)
    }

    /// Inverts `matrix` into the caller-owned `out`, which must have the same shape.
    pub fn invert_into(
        &self,
        matrix: ArrayView2<'_, f64>,
        mut out: ArrayViewMut2<'_, f64>,
    ) -> Result<(), FaerLinalgError> {
        let (rows, cols) = matrix.dim();
        if rows != cols {
            return Err(FaerLinalgError::NotSquare { rows, cols });
        }
        if let Some(((row, col), _)) = matrix.indexed_iter().find(|(_, v)| !v.is_finite()) {
            return Err(FaerLinalgError::NonFiniteInput { row, col });
        }

        let (factor, scale) = match self.factorize_equilibrated(matrix) {
            Ok(found) => found,
            Err(first_failure) => match self.policy {
                InversionPolicy::FailFast => return Err(first_failure),
                InversionPolicy::Regularize { relative_ridge } => {
                    let ridged = add_ridge(matrix, relative_ridge);
                    log::trace!(
                        "Retrying {rows}x{rows} inversion with Tikhonov ridge after: {first_failure}"
                    );
                    self.factorize_equilibrated(ridged.view())?
                }
            },
        };

        factor.inverse_into(out.view_mut());
        // (S M S)^-1 = S^-1 M^-1 S^-1, so M^-1 = S (S M S)^-1 S.
        for ((i, j), v) in out.indexed_iter_mut() {
            *v *= scale[i] * scale[j];
        }
        if out.iter().any(|v| !v.is_finite()) {
            return Err(FaerLinalgError::NonFiniteInverse);
        }
        Ok(())
    }

    /// Factors `S M S` with `S = diag(M)^(-1/2)`, so the pivot test does not
    /// depend on the units of the rows. Non-positive diagonal entries keep a
    /// unit scale and let the factorization itself reject the matrix.
    fn factorize_equilibrated(
        &self,
        matrix: ArrayView2<'_, f64>,
    ) -> Result<(FaerCholeskyFactor, Array1<f64>), FaerLinalgError> {
        let scale = matrix
            .diag()
            .mapv(|d| if d > 0.0 { d.sqrt().recip() } else { 1.0 });
        let scaled = Array2::from_shape_fn(matrix.raw_dim(), |(i, j)| {
            matrix[(i, j)] * scale[i] * scale[j]
        });
        let factor = self.factorize(&scaled)?;
        Ok((factor, scale))
    }

    fn factorize<S: Data<Elem = f64>>(
        &self,
        matrix: &ArrayBase<S, Ix2>,
    ) -> Result<FaerCholeskyFactor, FaerLinalgError> {
        let factor = matrix.cholesky(Side::Lower)?;
        let pivots = factor.diag();
        let (min_pivot, max_pivot) = pivots
            .iter()
            .fold((f64::INFINITY, 0.0_f64), |(lo, hi), &p| (lo.min(p), hi.max(p)));
        let pivot_ratio = if max_pivot > 0.0 {
            (min_pivot / max_pivot).powi(2)
        } else {
            0.0
        };
        if !pivots.is_empty() && pivot_ratio < self.min_pivot_ratio {
            return Err(FaerLinalgError::IllConditioned {
                pivot_ratio,
                threshold: self.min_pivot_ratio,
            });
        }
        Ok(factor)
    }
}

/// Returns `matrix + lambda * I` with `lambda = relative_ridge * mean(diag)`.
fn add_ridge(matrix: ArrayView2<'_, f64>, relative_ridge: f64) -> Array2<f64> {
    let n = matrix.nrows();
    let mean_diag = if n > 0 {
        matrix.diag().iter().map(|v| v.abs()).sum::<f64>() / n as f64
    } else {
        0.0
    };
    let lambda = if mean_diag > 0.0 {
        relative_ridge * mean_diag
    } else {
        relative_ridge
    };
    let mut ridged = matrix.to_owned();
    ridged.diag_mut().mapv_inplace(|d| d + lambda);
    ridged
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;
    use ndarray::array;
    use rand::rngs::StdRng;
    use rand::{Rng, SeedableRng};

    fn random_spd(n: usize, rng: &mut StdRng) -> Array2<f64> {
        let mut mat = Array2::zeros((n + 3, n));
        for v in mat.iter_mut() {
            *v = rng.gen_range(-1.0..1.0);
        }
        let mut spd = mat.t().dot(&mat);
        spd.diag_mut().mapv_inplace(|d| d + 0.1);
        spd
    }

    #[test]
    fn inverse_round_trip_on_random_spd_matrices() {
        let mut rng = StdRng::seed_from_u64(7);
        let inverter = SymmetricInverter::new(InversionPolicy::FailFast, 1e-14);
        for n in [1_usize, 2, 5, 9, 24] {
            let c = random_spd(n, &mut rng);
            let inv = inverter.invert(c.view()).unwrap();
            let product = c.dot(&inv);
            let identity = Array2::<f64>::eye(n);
            let err = (&product - &identity)
                .iter()
                .map(|v| v * v)
                .sum::<f64>()
                .sqrt();
            assert!(err < 1e-9, "n={n}: ||C C^-1 - I|| = {err:e}");
        }
    }

    #[test]
    fn fail_fast_reports_singular_matrix() {
        let singular = array![[1.0, 1.0], [1.0, 1.0]];
        let inverter = SymmetricInverter::new(InversionPolicy::FailFast, 1e-12);
        let err = inverter.invert(singular.view()).unwrap_err();
        assert!(matches!(
            err,
            FaerLinalgError::Cholesky(_) | FaerLinalgError::IllConditioned { .. }
        ));
    }

    #[test]
    fn regularize_recovers_rank_deficient_matrix() {
        let singular = array![[1.0, 1.0], [1.0, 1.0]];
        let inverter = SymmetricInverter::new(
            InversionPolicy::Regularize {
                relative_ridge: 1e-3,
            },
            1e-12,
        );
        let inv = inverter.invert(singular.view()).unwrap();
        assert!(inv.iter().all(|v| v.is_finite()));
        assert_abs_diff_eq!(inv[(0, 1)], inv[(1, 0)], epsilon = 1e-9);
    }

    #[test]
    fn rejects_nan_input() {
        let bad = array![[1.0, f64::NAN], [f64::NAN, 1.0]];
        let inverter = SymmetricInverter::new(InversionPolicy::FailFast, 1e-12);
        assert!(matches!(
            inverter.invert(bad.view()),
            Err(FaerLinalgError::NonFiniteInput { row: 0, col: 1 })
        ));
    }

    #[test]
    fn badly_scaled_rows_are_not_mistaken_for_singularity() {
        // Well conditioned once the 1e8 unit difference is divided out.
        let scaled = array![[1.0, 0.5e8], [0.5e8, 1.0e16]];
        let inverter = SymmetricInverter::new(InversionPolicy::FailFast, 1e-12);
        let inv = inverter.invert(scaled.view()).unwrap();
        let product = scaled.dot(&inv);
        assert_abs_diff_eq!(product[(0, 0)], 1.0, epsilon = 1e-9);
        assert_abs_diff_eq!(product[(1, 1)], 1.0, epsilon = 1e-9);
        assert_abs_diff_eq!(product[(0, 1)], 0.0, epsilon = 1e-9);
    }

    #[test]
    fn near_singular_matrix_trips_pivot_threshold() {
        let eps = 1e-10;
        let nearly = array![[1.0, 1.0], [1.0, 1.0 + eps]];
        let inverter = SymmetricInverter::new(InversionPolicy::FailFast, 1e-8);
        assert!(matches!(
            inverter.invert(nearly.view()),
            Err(FaerLinalgError::IllConditioned { .. })
        ));
    }
}
