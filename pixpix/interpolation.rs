//! Natural cubic spline of covariance against `cos(beta)`.
//!
//! The spline is built once per channel pair and is immutable afterwards:
//! evaluation locates the interval by bisection instead of caching the last
//! interval, so one spline can be read from every worker at once.

use ndarray::{Array1, ArrayView1};
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum SplineError {
    #[error("a cubic spline needs at least 3 samples, got {0}")]
    TooFewSamples(usize),

    #[error("grid has {grid} samples but the table row has {values}")]
    LengthMismatch { grid: usize, values: usize },

    #[error("grid is not strictly increasing at sample {0}")]
    NotIncreasing(usize),

    #[error("sample {0} is not finite")]
    NonFinite(usize),

    #[error("query {x} lies outside the sampled range [{lo}, {hi}]")]
    OutOfRange { x: f64, lo: f64, hi: f64 },
}

#[derive(Debug, Clone)]
pub struct CubicSpline {
    xs: Array1<f64>,
    ys: Array1<f64>,
    /// Second derivatives at the knots; zero at both ends.
    curvature: Array1<f64>,
}

impl CubicSpline {
    pub fn new(xs: ArrayView1<'_, f64>, ys: ArrayView1<'_, f64>) -> Result<Self, SplineError> {
        let n = xs.len();
        if ys.len() != n {
            return Err(SplineError::LengthMismatch {
                grid: n,
                values: ys.len(),
            });
        }
        if n < 3 {
            return Err(SplineError::TooFewSamples(n));
        }
        if let Some(index) = xs
            .iter()
            .zip(ys.iter())
            .position(|(x, y)| !(x.is_finite() && y.is_finite()))
        {
            return Err(SplineError::NonFinite(index));
        }
        if let Some(index) = (1..n).find(|&i| xs[i] <= xs[i - 1]) {
            return Err(SplineError::NotIncreasing(index));
        }

        Ok(Self {
            curvature: natural_curvature(xs, ys),
            xs: xs.to_owned(),
            ys: ys.to_owned(),
        })
    }

    pub fn range(&self) -> (f64, f64) {
        (self.xs[0], self.xs[self.xs.len() - 1])
    }

    pub fn eval(&self, x: f64) -> Result<f64, SplineError> {
        let (lo, hi) = self.range();
        if !(lo..=hi).contains(&x) {
            return Err(SplineError::OutOfRange { x, lo, hi });
        }

        let mut left = 0;
        let mut right = self.xs.len() - 1;
        while right - left > 1 {
            let mid = (left + right) / 2;
            if self.xs[mid] <= x {
                left = mid;
            } else {
                right = mid;
            }
        }

        let h = self.xs[right] - self.xs[left];
        let a = (self.xs[right] - x) / h;
        let b = (x - self.xs[left]) / h;
        Ok(a * self.ys[left]
            + b * self.ys[right]
            + (a * (a * a - 1.0) * self.curvature[left] + b * (b * b - 1.0) * self.curvature[right])
                * h
                * h
                / 6.0)
    }
}

/// Solves the tridiagonal system for the interior second derivatives with the
/// Thomas algorithm.
fn natural_curvature(xs: ArrayView1<'_, f64>, ys: ArrayView1<'_, f64>) -> Array1<f64> {
    let n = xs.len();
    let m = n - 2;
    let h: Vec<f64> = (0..n - 1).map(|i| xs[i + 1] - xs[i]).collect();

    let mut sub = vec![0.0; m];
    let mut diag = vec![0.0; m];
    let mut sup = vec![0.0; m];
    let mut rhs = vec![0.0; m];
    for i in 0..m {
        let k = i + 1;
        if i > 0 {
            sub[i] = h[k - 1];
        }
        diag[i] = 2.0 * (h[k - 1] + h[k]);
        if i + 1 < m {
            sup[i] = h[k];
        }
        rhs[i] = 6.0 * ((ys[k + 1] - ys[k]) / h[k] - (ys[k] - ys[k - 1]) / h[k - 1]);
    }

    for i in 1..m {
        let factor = sub[i] / diag[i - 1];
        diag[i] -= factor * sup[i - 1];
        rhs[i] -= factor * rhs[i - 1];
    }

    let mut curvature = Array1::zeros(n);
    curvature[m] = rhs[m - 1] / diag[m - 1];
    for i in (0..m - 1).rev() {
        curvature[i + 1] = (rhs[i] - sup[i] * curvature[i + 2]) / diag[i];
    }
    curvature
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;
    use ndarray::array;

    #[test]
    fn reproduces_knots_and_straight_lines() {
        let xs = Array1::linspace(-1.0_f64, 1.0, 11);
        let ys = xs.mapv(|x| 3.0 * x - 0.5);
        let spline = CubicSpline::new(xs.view(), ys.view()).unwrap();
        for (&x, &y) in xs.iter().zip(ys.iter()) {
            assert_abs_diff_eq!(spline.eval(x).unwrap(), y, epsilon = 1e-12);
        }
        assert_abs_diff_eq!(spline.eval(0.123).unwrap(), 3.0 * 0.123 - 0.5, epsilon = 1e-12);
    }

    #[test]
    fn smooth_function_on_a_dense_grid() {
        let xs = Array1::linspace(-1.0_f64, 1.0, 1000);
        let ys = xs.mapv(|x: f64| (2.0 * x).cos() * (-x * x).exp());
        let spline = CubicSpline::new(xs.view(), ys.view()).unwrap();
        for &x in &[-0.95_f64, -0.3331, 0.0, 0.41, 0.77777] {
            let expected = (2.0 * x).cos() * (-x * x).exp();
            assert_abs_diff_eq!(spline.eval(x).unwrap(), expected, epsilon = 1e-8);
        }
    }

    #[test]
    fn natural_ends_have_zero_curvature() {
        let xs = array![0.0, 1.0, 2.0, 3.0];
        let ys = array![0.0, 1.0, 0.0, 1.0];
        let spline = CubicSpline::new(xs.view(), ys.view()).unwrap();
        assert_eq!(spline.curvature[0], 0.0);
        assert_eq!(spline.curvature[3], 0.0);
        // Symmetric data about x = 1.5 gives opposite interior curvatures.
        assert_abs_diff_eq!(spline.curvature[1], -spline.curvature[2], epsilon = 1e-12);
        // Solves 4 m1 + m2 = -12 with m1 + 4 m2 = 12.
        assert_abs_diff_eq!(spline.curvature[1], -4.0, epsilon = 1e-12);
    }

    #[test]
    fn rejects_bad_grids() {
        assert_eq!(
            CubicSpline::new(array![0.0, 1.0].view(), array![0.0, 1.0].view()).unwrap_err(),
            SplineError::TooFewSamples(2)
        );
        assert_eq!(
            CubicSpline::new(array![0.0, 1.0, 1.0].view(), array![0.0, 1.0, 2.0].view())
                .unwrap_err(),
            SplineError::NotIncreasing(2)
        );
        assert!(matches!(
            CubicSpline::new(array![0.0, 1.0, 2.0].view(), array![0.0, f64::NAN, 2.0].view()),
            Err(SplineError::NonFinite(1))
        ));
    }

    #[test]
    fn queries_outside_the_grid_fail() {
        let xs = array![-0.5, 0.0, 0.5];
        let spline = CubicSpline::new(xs.view(), array![1.0, 2.0, 3.0].view()).unwrap();
        assert!(matches!(
            spline.eval(0.75),
            Err(SplineError::OutOfRange { .. })
        ));
        assert_abs_diff_eq!(spline.eval(0.5).unwrap(), 3.0, epsilon = 1e-12);
    }
}
