use faer::diag::DiagRef;
use faer::linalg::solvers::{self, Solve};
use faer::{Mat, MatRef, Side};
use ndarray::{Array1, ArrayBase, ArrayViewMut2, Data, Ix2};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum FaerLinalgError {
    #[error("Cholesky factorization failed: {0:?}")]
    Cholesky(solvers::LltError),
    #[error(
        "matrix is numerically singular: Cholesky pivot ratio {pivot_ratio:.3e} is below {threshold:.3e}"
    )]
    IllConditioned { pivot_ratio: f64, threshold: f64 },
    #[error("matrix contains a non-finite entry at ({row}, {col})")]
    NonFiniteInput { row: usize, col: usize },
    #[error("inverse contains non-finite entries")]
    NonFiniteInverse,
    #[error("expected a square matrix, got {rows}x{cols}")]
    NotSquare { rows: usize, cols: usize },
}

fn diag_to_array(diag: DiagRef<'_, f64>) -> Array1<f64> {
    let mat = diag.column_vector().as_mat();
    Array1::from_shape_fn(mat.nrows(), |i| mat[(i, 0)])
}

enum FaerStorage<'a> {
    Borrowed(MatRef<'a, f64>),
    Owned(Mat<f64>),
}

impl<'a> FaerStorage<'a> {
    #[inline]
    fn as_ref(&self) -> MatRef<'_, f64> {
        match self {
            FaerStorage::Borrowed(view) => *view,
            FaerStorage::Owned(mat) => mat.as_ref(),
        }
    }
}

/// Zero-copy faer view over an ndarray matrix when the memory layout allows it,
/// falling back to an owned copy for strided views.
pub struct FaerArrayView<'a> {
    storage: FaerStorage<'a>,
}

impl<'a> FaerArrayView<'a> {
    pub fn new<S: Data<Elem = f64>>(array: &'a ArrayBase<S, Ix2>) -> Self {
        let storage = if let Some(slice) = array.as_slice_memory_order() {
            if array.is_standard_layout() {
                FaerStorage::Borrowed(MatRef::from_row_major_slice(
                    slice,
                    array.nrows(),
                    array.ncols(),
                ))
            } else if array.t().is_standard_layout() {
                FaerStorage::Borrowed(MatRef::from_column_major_slice(
                    slice,
                    array.nrows(),
                    array.ncols(),
                ))
            } else {
                let (rows, cols) = array.dim();
                let owned = Mat::from_fn(rows, cols, |i, j| array[(i, j)]);
                FaerStorage::Owned(owned)
            }
        } else {
            let (rows, cols) = array.dim();
            let owned = Mat::from_fn(rows, cols, |i, j| array[(i, j)]);
            FaerStorage::Owned(owned)
        };
        Self { storage }
    }

    #[inline]
    pub fn as_ref(&self) -> MatRef<'_, f64> {
        self.storage.as_ref()
    }
}

pub struct FaerCholeskyFactor {
    factor: solvers::Llt<f64>,
}

impl FaerCholeskyFactor {
    /// Diagonal of the lower factor `L`.
    pub fn diag(&self) -> Array1<f64> {
        diag_to_array(self.factor.L().diagonal())
    }

    pub fn dim(&self) -> usize {
        self.factor.L().nrows()
    }

    /// Writes `A⁻¹` into `out` by solving against the identity.
    pub fn inverse_into(&self, mut out: ArrayViewMut2<'_, f64>) {
        let n = self.dim();
        let identity = Mat::<f64>::identity(n, n);
        let sol = self.factor.solve(identity.as_ref());
        for i in 0..n {
            for j in 0..n {
                out[(i, j)] = sol[(i, j)];
            }
        }
    }
}

pub trait FaerCholesky {
    fn cholesky(&self, side: Side) -> Result<FaerCholeskyFactor, FaerLinalgError>;
}

impl<S: Data<Elem = f64>> FaerCholesky for ArrayBase<S, Ix2> {
    fn cholesky(&self, side: Side) -> Result<FaerCholeskyFactor, FaerLinalgError> {
        let faer_view = FaerArrayView::new(self);
        let factor = faer_view
            .as_ref()
            .llt(side)
            .map_err(FaerLinalgError::Cholesky)?;
        Ok(FaerCholeskyFactor { factor })
    }
}
