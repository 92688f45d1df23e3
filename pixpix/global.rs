//! Single-constraint ILC over one covariance spanning every (pixel, channel).
//!
//! Row and column `i * Nfreqs + n` of the global matrix belong to channel `n`
//! of the `i`-th work-list pixel. Diagonal blocks come from the per-pixel
//! packed covariances; off-diagonal blocks are read from a per-channel-pair
//! spline of covariance against the cosine of the pixels' angular separation.

use crate::dispatch::{PixelDispatcher, zeroed_buffer};
use crate::error::{IlcError, PixelError};
use crate::packed::{channel_pairs, packed_len, pair_index};
use crate::pixpix::interpolation::{CubicSpline, SplineError};
use crate::solver::ilc_weights;
use crate::validate::Validator;
use ndarray::{Array1, Array2, ArrayView1, ArrayView2};
use rayon::prelude::*;
use std::time::Instant;

/// Every unordered pixel pair `(i, j)`, `i <= j`, of a work list of
/// `npixels` entries, split into the two index maps.
pub fn pixel_pair_maps(npixels: usize) -> (Vec<usize>, Vec<usize>) {
    channel_pairs(npixels).unzip()
}

/// Enumeration of the unordered pairs of work-list positions.
#[derive(Debug, Clone, Copy)]
pub struct PairMaps<'a> {
    pub first: &'a [usize],
    pub second: &'a [usize],
}

impl PairMaps<'_> {
    pub fn len(&self) -> usize {
        self.first.len()
    }

    pub fn is_empty(&self) -> bool {
        self.first.is_empty()
    }

    /// Both maps must have `n(n+1)/2` entries and name each unordered pair
    /// of positions below `npixels` exactly once.
    fn validate(&self, npixels: usize) -> Result<(), IlcError> {
        let expected = packed_len(npixels);
        if self.first.len() != expected || self.second.len() != expected {
            return Err(IlcError::InvalidPairMaps(format!(
                "expected {expected} pairs for {npixels} pixels, got {} and {}",
                self.first.len(),
                self.second.len()
            )));
        }
        let mut seen = vec![false; expected];
        for (p, (&i, &j)) in self.first.iter().zip(self.second).enumerate() {
            if i >= npixels || j >= npixels {
                return Err(IlcError::InvalidPairMaps(format!(
                    "pair {p} = ({i}, {j}) addresses a position beyond {npixels} pixels"
                )));
            }
            let slot = pair_index(i, j, npixels);
            if seen[slot] {
                return Err(IlcError::InvalidPairMaps(format!(
                    "pair {p} = ({i}, {j}) is listed twice"
                )));
            }
            seen[slot] = true;
        }
        Ok(())
    }
}

/// Inputs of the pixel-pixel correlated solve.
#[derive(Debug, Clone, Copy)]
pub struct PixPixInputs<'a> {
    /// Packed per-pixel covariances, `[npix, Nfreqs (Nfreqs + 1) / 2]`.
    pub covariance: ArrayView2<'a, f64>,
    pub nfreqs: usize,
    /// Target response of the concatenated vector, length `Npixels * Nfreqs`.
    pub target: ArrayView1<'a, f64>,
    pub pixels: &'a [usize],
    /// Increasing samples of `cos(beta)`.
    pub cos_beta: ArrayView1<'a, f64>,
    /// Covariance at each `cos_beta` sample, one row per channel pair in
    /// packed order.
    pub correlation: ArrayView2<'a, f64>,
    /// Unit vectors of every map pixel, `[3, npix]`.
    pub unit_vectors: ArrayView2<'a, f64>,
    pub pairs: PairMaps<'a>,
}

impl PixPixInputs<'_> {
    fn validate(&self, npix: usize) -> Result<(), IlcError> {
        let nfreqs = self.nfreqs;
        Validator::channel_count(nfreqs)?;
        Validator::shape("packed covariance", &self.covariance, (npix, packed_len(nfreqs)))?;
        Validator::shape("unit vectors", &self.unit_vectors, (3, npix))?;
        Validator::pixel_list(self.pixels, npix)?;
        Validator::length("target SED", &self.target, self.pixels.len() * nfreqs)?;
        Validator::finite("target SED", &self.target)?;
        Validator::shape(
            "correlation table",
            &self.correlation,
            (packed_len(nfreqs), self.cos_beta.len()),
        )?;
        self.pairs.validate(self.pixels.len())
    }

    fn cos_separation(&self, i: usize, j: usize) -> f64 {
        let (p, q) = (self.pixels[i], self.pixels[j]);
        let v = &self.unit_vectors;
        let dot = v[(0, p)] * v[(0, q)] + v[(1, p)] * v[(1, q)] + v[(2, p)] * v[(2, q)];
        dot.clamp(-1.0, 1.0)
    }
}

/// Assembles the `(Npixels * Nfreqs)^2` covariance.
///
/// Channel pairs are processed one after another; within a pair the entries
/// of every pixel pair are evaluated in parallel against a shared read-only
/// spline and then scattered into the matrix.
pub fn global_covariance(
    inputs: &PixPixInputs<'_>,
    npix: usize,
    dispatcher: &PixelDispatcher,
) -> Result<Array2<f64>, IlcError> {
    inputs.validate(npix)?;
    let nfreqs = inputs.nfreqs;
    let dim = inputs.pixels.len() * nfreqs;
    let mut cov = square_matrix("global covariance", dim)?;
    if dim == 0 {
        return Ok(cov);
    }

    let npairs = inputs.pairs.len();
    let chunk = npairs.div_ceil(dispatcher.workers());
    let mut values = zeroed_buffer("pair covariances", &[npairs])?;
    for (c, (n, nn)) in channel_pairs(nfreqs).enumerate() {
        let spline = CubicSpline::new(inputs.cos_beta, inputs.correlation.row(c))?;
        dispatcher.install(|| {
            values
                .par_chunks_mut(chunk)
                .zip(inputs.pairs.first.par_chunks(chunk))
                .zip(inputs.pairs.second.par_chunks(chunk))
                .try_for_each(|((out, first), second)| -> Result<(), SplineError> {
                    for ((v, &i), &j) in out.iter_mut().zip(first).zip(second) {
                        *v = if i == j {
                            inputs.covariance[(inputs.pixels[i], c)]
                        } else {
                            spline.eval(inputs.cos_separation(i, j))?
                        };
                    }
                    Ok(())
                })
        })?;

        for ((&v, &i), &j) in values
            .iter()
            .zip(inputs.pairs.first)
            .zip(inputs.pairs.second)
        {
            let (i_n, i_nn) = (i * nfreqs + n, i * nfreqs + nn);
            let (j_n, j_nn) = (j * nfreqs + n, j * nfreqs + nn);
            cov[(i_n, j_nn)] = v;
            cov[(j_nn, i_n)] = v;
            cov[(j_n, i_nn)] = v;
            cov[(i_nn, j_n)] = v;
        }
    }
    Ok(cov)
}

/// Zeroed `dim x dim` matrix; a size the allocator refuses is an error.
fn square_matrix(what: &'static str, dim: usize) -> Result<Array2<f64>, IlcError> {
    Ok(Array2::from_shape_vec((dim, dim), zeroed_buffer(what, &[dim, dim])?)?)
}

/// Inverts the global covariance once and returns the `Npixels * Nfreqs`
/// weights `C^-1 a / (a^T C^-1 a)`.
pub fn pixpix_weights(
    inputs: &PixPixInputs<'_>,
    npix: usize,
    dispatcher: &PixelDispatcher,
) -> Result<Array1<f64>, IlcError> {
    let start = Instant::now();
    let cov = global_covariance(inputs, npix, dispatcher)?;
    let dim = cov.nrows();
    if dim == 0 {
        return Ok(Array1::zeros(0));
    }
    log::debug!(
        "Assembled {dim}x{dim} pixel-pixel covariance for {} pixels in {:.2?}",
        inputs.pixels.len(),
        start.elapsed()
    );

    let mut cinv = square_matrix("inverse global covariance", dim)?;
    dispatcher
        .inverter()
        .invert_into(cov.view(), cinv.view_mut())
        .map_err(|e| IlcError::GlobalSolve(PixelError::Inversion(e)))?;
    drop(cov);

    let mut weights = Array1::zeros(dim);
    ilc_weights(cinv.view(), inputs.target, weights.view_mut()).map_err(IlcError::GlobalSolve)?;
    if weights.iter().any(|w: &f64| !w.is_finite()) {
        return Err(IlcError::GlobalSolve(PixelError::NonFiniteWeights));
    }
    log::info!(
        "Solved the {dim}-dimensional pixel-pixel system in {:.2?}",
        start.elapsed()
    );
    Ok(weights)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pair_maps_enumerate_every_pair_once() {
        let (first, second) = pixel_pair_maps(4);
        assert_eq!(first.len(), 10);
        let maps = PairMaps {
            first: &first,
            second: &second,
        };
        assert!(maps.validate(4).is_ok());
        assert!(first.iter().zip(&second).all(|(i, j)| i <= j));
    }

    #[test]
    fn duplicated_pair_is_rejected() {
        // (0, 1) appears twice, once reversed; (1, 1) is missing.
        let first = [0, 0, 1];
        let second = [0, 1, 0];
        let maps = PairMaps {
            first: &first,
            second: &second,
        };
        assert!(matches!(maps.validate(2), Err(IlcError::InvalidPairMaps(_))));
    }

    #[test]
    fn out_of_range_pair_is_rejected() {
        let first = [0, 0, 2];
        let second = [0, 1, 1];
        let maps = PairMaps {
            first: &first,
            second: &second,
        };
        assert!(matches!(maps.validate(2), Err(IlcError::InvalidPairMaps(_))));
    }

    #[test]
    fn oversized_global_matrix_is_an_error() {
        assert_eq!(square_matrix("global covariance", 3).unwrap().dim(), (3, 3));
        let err = square_matrix("global covariance", usize::MAX / 2).unwrap_err();
        assert!(matches!(
            err,
            IlcError::Allocation {
                what: "global covariance",
                ..
            }
        ));
    }
}
