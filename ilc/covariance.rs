//! Per-pixel frequency covariance estimators.
//!
//! A [`CovarianceSource`] fills the symmetric `Nfreqs x Nfreqs` channel
//! covariance of one map pixel. Sources are shared read-only between workers;
//! anything a source mutates while filling lives in its `Scratch`, which each
//! worker owns privately.

use crate::error::{IlcError, PixelError};
use crate::packed::{packed_len, unpack_into};
use crate::pixelization::{DiscBuffer, SpherePixelization};
use crate::validate::Validator;
use ndarray::{ArrayView1, ArrayView2, ArrayViewMut2};

pub trait CovarianceSource: Sync {
    type Scratch: Send;

    fn nfreqs(&self) -> usize;

    /// Number of map pixels the source can address.
    fn npix(&self) -> usize;

    fn new_scratch(&self) -> Self::Scratch;

    /// Writes the full symmetric covariance of `ipix` into `out`.
    fn fill_covariance(
        &self,
        ipix: usize,
        scratch: &mut Self::Scratch,
        out: ArrayViewMut2<'_, f64>,
    ) -> Result<(), PixelError>;
}

/// Covariances already smoothed in harmonic space, one packed upper triangle
/// per map pixel.
#[derive(Debug, Clone, Copy)]
pub struct PackedCovariance<'a> {
    data: ArrayView2<'a, f64>,
    nfreqs: usize,
}

impl<'a> PackedCovariance<'a> {
    /// `data` has shape `[npix, Nfreqs (Nfreqs + 1) / 2]`.
    pub fn new(data: ArrayView2<'a, f64>, nfreqs: usize) -> Result<Self, IlcError> {
        Validator::channel_count(nfreqs)?;
        Validator::shape("packed covariance", &data, (data.nrows(), packed_len(nfreqs)))?;
        Ok(Self { data, nfreqs })
    }
}

impl CovarianceSource for PackedCovariance<'_> {
    type Scratch = ();

    fn nfreqs(&self) -> usize {
        self.nfreqs
    }

    fn npix(&self) -> usize {
        self.data.nrows()
    }

    fn new_scratch(&self) -> Self::Scratch {}

    fn fill_covariance(
        &self,
        ipix: usize,
        _: &mut (),
        out: ArrayViewMut2<'_, f64>,
    ) -> Result<(), PixelError> {
        unpack_into(self.data.row(ipix), out);
        Ok(())
    }
}

/// Mask-weighted covariance of the filtered maps over a disc around each
/// pixel: `C[n, nn] = sum_q m_q x_n(q) x_nn(q) / sum_q m_q`.
pub struct DiscCovariance<'a, P> {
    maps: ArrayView2<'a, f64>,
    mask: ArrayView1<'a, f64>,
    pixelization: P,
    radius: f64,
    capacity: usize,
}

impl<'a, P: SpherePixelization> DiscCovariance<'a, P> {
    /// `maps` has shape `[Nfreqs, npix]` and `mask` length `npix`; `radius`
    /// is in radians.
    pub fn new(
        maps: ArrayView2<'a, f64>,
        mask: ArrayView1<'a, f64>,
        pixelization: P,
        radius: f64,
        capacity: usize,
    ) -> Result<Self, IlcError> {
        let npix = pixelization.npix();
        Validator::channel_count(maps.nrows())?;
        Validator::shape("filtered maps", &maps, (maps.nrows(), npix))?;
        Validator::length("mask", &mask, npix)?;
        Validator::mask(&mask)?;
        Validator::positive_scalar("disc radius", radius)?;
        Ok(Self {
            maps,
            mask,
            pixelization,
            radius,
            capacity,
        })
    }
}

impl<P: SpherePixelization> CovarianceSource for DiscCovariance<'_, P> {
    type Scratch = DiscBuffer;

    fn nfreqs(&self) -> usize {
        self.maps.nrows()
    }

    fn npix(&self) -> usize {
        self.pixelization.npix()
    }

    fn new_scratch(&self) -> DiscBuffer {
        DiscBuffer::new(self.capacity)
    }

    fn fill_covariance(
        &self,
        ipix: usize,
        disc: &mut DiscBuffer,
        mut out: ArrayViewMut2<'_, f64>,
    ) -> Result<(), PixelError> {
        self.pixelization.query_disc(ipix, self.radius, disc)?;

        let nfreqs = self.maps.nrows();
        out.fill(0.0);
        let mut norm = 0.0;
        for &q in disc.as_slice() {
            let weight = self.mask[q];
            if weight == 0.0 {
                continue;
            }
            norm += weight;
            for n in 0..nfreqs {
                let weighted = weight * self.maps[(n, q)];
                for nn in n..nfreqs {
                    out[(n, nn)] += weighted * self.maps[(nn, q)];
                }
            }
        }
        if norm <= 0.0 {
            return Err(PixelError::EmptyDisc);
        }

        for n in 0..nfreqs {
            for nn in n..nfreqs {
                let v = out[(n, nn)] / norm;
                out[(n, nn)] = v;
                out[(nn, n)] = v;
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::packed::pack;
    use crate::pixelization::HealpixRing;
    use approx::assert_abs_diff_eq;
    use ndarray::{Array1, Array2, array};

    #[test]
    fn constant_maps_give_outer_product() {
        let grid = HealpixRing::new(4).unwrap();
        let npix = grid.npix();
        let level = array![1.5, -0.5, 2.0];
        let maps = Array2::from_shape_fn((3, npix), |(n, _)| level[n]);
        let mask = Array1::ones(npix);
        let source = DiscCovariance::new(maps.view(), mask.view(), grid, 0.4, npix).unwrap();

        let mut disc = source.new_scratch();
        let mut cov = Array2::zeros((3, 3));
        for ipix in [0, 17, 95, npix - 1] {
            source.fill_covariance(ipix, &mut disc, cov.view_mut()).unwrap();
            for n in 0..3 {
                for nn in 0..3 {
                    assert_abs_diff_eq!(cov[(n, nn)], level[n] * level[nn], epsilon = 1e-12);
                }
            }
        }
    }

    #[test]
    fn mask_weights_the_average() {
        let grid = HealpixRing::new(2).unwrap();
        let npix = grid.npix();
        // Whole sphere in the disc: channel 0 is 1 on even pixels and 3 on odd ones.
        let maps = Array2::from_shape_fn((1, npix), |(_, q)| if q % 2 == 0 { 1.0 } else { 3.0 });
        let mask = Array1::from_shape_fn(npix, |q| if q % 2 == 0 { 1.0 } else { 0.0 });
        let source = DiscCovariance::new(maps.view(), mask.view(), grid, 4.0, npix).unwrap();
        let mut disc = source.new_scratch();
        let mut cov = Array2::zeros((1, 1));
        source.fill_covariance(5, &mut disc, cov.view_mut()).unwrap();
        assert_abs_diff_eq!(cov[(0, 0)], 1.0, epsilon = 1e-12);
    }

    #[test]
    fn fully_masked_disc_is_reported() {
        let grid = HealpixRing::new(2).unwrap();
        let npix = grid.npix();
        let maps = Array2::ones((2, npix));
        let mask = Array1::zeros(npix);
        let source = DiscCovariance::new(maps.view(), mask.view(), grid, 0.3, npix).unwrap();
        let mut disc = source.new_scratch();
        let mut cov = Array2::zeros((2, 2));
        let err = source.fill_covariance(0, &mut disc, cov.view_mut()).unwrap_err();
        assert!(matches!(err, PixelError::EmptyDisc));
    }

    #[test]
    fn small_capacity_overflows() {
        let grid = HealpixRing::new(4).unwrap();
        let npix = grid.npix();
        let maps = Array2::ones((2, npix));
        let mask = Array1::ones(npix);
        let source = DiscCovariance::new(maps.view(), mask.view(), grid, 1.0, 4).unwrap();
        let mut disc = source.new_scratch();
        let mut cov = Array2::zeros((2, 2));
        assert!(matches!(
            source.fill_covariance(0, &mut disc, cov.view_mut()),
            Err(PixelError::DiscOverflow { capacity: 4 })
        ));
    }

    #[test]
    fn mismatched_mask_length_rejected() {
        let grid = HealpixRing::new(2).unwrap();
        let maps = Array2::<f64>::ones((2, grid.npix()));
        let mask = Array1::<f64>::ones(grid.npix() - 1);
        assert!(matches!(
            DiscCovariance::new(maps.view(), mask.view(), grid, 0.2, 100),
            Err(IlcError::LengthMismatch { name: "mask", .. })
        ));
    }

    #[test]
    fn packed_rows_unpack_per_pixel() {
        let sym = array![[4.0, 1.0, 0.5], [1.0, 9.0, 2.0], [0.5, 2.0, 16.0]];
        let row = pack(sym.view());
        let mut data = Array2::zeros((3, row.len()));
        data.row_mut(2).assign(&row);
        let source = PackedCovariance::new(data.view(), 3).unwrap();
        let mut cov = Array2::zeros((3, 3));
        source.fill_covariance(2, &mut (), cov.view_mut()).unwrap();
        assert_eq!(cov, sym);
    }

    #[test]
    fn packed_width_must_match_channel_count() {
        let data = Array2::<f64>::zeros((10, 5));
        assert!(matches!(
            PackedCovariance::new(data.view(), 3),
            Err(IlcError::ShapeMismatch { .. })
        ));
    }
}
