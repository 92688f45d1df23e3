use approx::assert_abs_diff_eq;
use ndarray::{Array1, Array2, array, s};
use pixel_ilc::packed::{pack, packed_len};
use pixel_ilc::{
    HealpixRing, IlcConfig, IlcError, PairMaps, PixPixInputs, SpherePixelization,
    pixel_pair_maps, pixpix_correlated_ilc, smoothed_covariance_ilc,
};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::num::NonZeroUsize;

const NSIDE: usize = 2;
const NFREQS: usize = 3;
const SAMPLES: usize = 1000;

fn config(workers: usize) -> IlcConfig {
    IlcConfig::new(NonZeroUsize::new(workers).unwrap())
}

struct Sky {
    packed: Array2<f64>,
    unit_vectors: Array2<f64>,
    cos_beta: Array1<f64>,
}

impl Sky {
    fn new(seed: u64) -> Self {
        let grid = HealpixRing::new(NSIDE).unwrap();
        let mut rng = StdRng::seed_from_u64(seed);
        let mut packed = Array2::zeros((grid.npix(), packed_len(NFREQS)));
        for mut row in packed.rows_mut() {
            let factor =
                Array2::from_shape_fn((NFREQS + 2, NFREQS), |_| rng.gen_range(-1.0..1.0));
            let mut cov = factor.t().dot(&factor);
            cov.diag_mut().mapv_inplace(|d| d + 1.0);
            row.assign(&pack(cov.view()));
        }
        Self {
            packed,
            unit_vectors: grid.unit_vectors(),
            cos_beta: Array1::linspace(-1.0, 1.0, SAMPLES),
        }
    }

    fn solve(
        &self,
        pixels: &[usize],
        target: &Array1<f64>,
        correlation: &Array2<f64>,
        workers: usize,
    ) -> Result<Array1<f64>, IlcError> {
        let (first, second) = pixel_pair_maps(pixels.len());
        let inputs = PixPixInputs {
            covariance: self.packed.view(),
            nfreqs: NFREQS,
            target: target.view(),
            pixels,
            cos_beta: self.cos_beta.view(),
            correlation: correlation.view(),
            unit_vectors: self.unit_vectors.view(),
            pairs: PairMaps {
                first: &first,
                second: &second,
            },
        };
        pixpix_correlated_ilc(&inputs, NSIDE, &config(workers))
    }
}

fn tiled(sed: &Array1<f64>, npixels: usize) -> Array1<f64> {
    Array1::from_shape_fn(npixels * sed.len(), |i| sed[i % sed.len()])
}

fn decaying_correlation(amplitude: f64) -> Array2<f64> {
    let cos_beta = Array1::linspace(-1.0_f64, 1.0, SAMPLES);
    Array2::from_shape_fn((packed_len(NFREQS), SAMPLES), |(c, s)| {
        amplitude * (1.0 + 0.1 * c as f64) * (-(1.0 - cos_beta[s]) * 20.0).exp()
    })
}

#[test]
fn uncorrelated_pixels_reduce_to_independent_ilc() {
    let sky = Sky::new(7);
    let pixels = [3, 10, 22, 40, 47];
    let sed = array![1.0, 0.8, 1.3];
    let correlation = Array2::zeros((packed_len(NFREQS), SAMPLES));

    let global = sky
        .solve(&pixels, &tiled(&sed, pixels.len()), &correlation, 3)
        .unwrap();
    let independent =
        smoothed_covariance_ilc(sky.packed.view(), NFREQS, sed.view(), &pixels, &config(2))
            .unwrap();

    // The global solution shares one normalization; rescaling each block to
    // unit response recovers the per-pixel weights.
    for (i, expected) in independent.weights.rows().into_iter().enumerate() {
        let block = global.slice(s![i * NFREQS..(i + 1) * NFREQS]);
        let response = block.dot(&sed);
        assert!(response > 0.0);
        for (w, e) in block.iter().zip(expected.iter()) {
            assert_abs_diff_eq!(w / response, *e, epsilon = 1e-10);
        }
    }
}

#[test]
fn single_pixel_matches_plain_ilc_exactly() {
    let sky = Sky::new(13);
    let sed = array![1.0, 1.0, 1.0];
    let correlation = decaying_correlation(0.05);

    let global = sky.solve(&[17], &sed, &correlation, 1).unwrap();
    let plain =
        smoothed_covariance_ilc(sky.packed.view(), NFREQS, sed.view(), &[17], &config(1)).unwrap();

    for (w, e) in global.iter().zip(plain.weights.row(0).iter()) {
        assert_abs_diff_eq!(*w, *e, epsilon = 1e-12);
    }
}

#[test]
fn correlated_solution_has_unit_total_response() {
    let sky = Sky::new(29);
    let pixels: Vec<usize> = (0..6).map(|i| i * 7).collect();
    let target = tiled(&array![1.0, 1.0, 1.0], pixels.len());
    let correlation = decaying_correlation(0.05);

    let weights = sky.solve(&pixels, &target, &correlation, 4).unwrap();
    assert_eq!(weights.len(), pixels.len() * NFREQS);
    assert_abs_diff_eq!(weights.dot(&target), 1.0, epsilon = 1e-10);
}

#[test]
fn worker_count_does_not_change_the_solution() {
    let sky = Sky::new(41);
    let pixels = [0, 1, 2, 12, 25, 33, 46];
    let target = tiled(&array![1.0, 0.9, 1.2], pixels.len());
    let correlation = decaying_correlation(0.04);

    let serial = sky.solve(&pixels, &target, &correlation, 1).unwrap();
    let parallel = sky.solve(&pixels, &target, &correlation, 5).unwrap();
    assert_eq!(serial, parallel);
}

#[test]
fn empty_work_list_yields_no_weights() {
    let sky = Sky::new(3);
    let correlation = Array2::zeros((packed_len(NFREQS), SAMPLES));
    let weights = sky.solve(&[], &Array1::zeros(0), &correlation, 2).unwrap();
    assert!(weights.is_empty());
}

#[test]
fn correlation_table_must_cover_every_channel_pair() {
    let sky = Sky::new(5);
    let correlation = Array2::zeros((packed_len(NFREQS) - 1, SAMPLES));
    let target = tiled(&Array1::ones(NFREQS), 2);
    let err = sky.solve(&[0, 1], &target, &correlation, 1).unwrap_err();
    assert!(matches!(err, IlcError::ShapeMismatch { .. }));
}

#[test]
fn truncated_pair_maps_are_rejected() {
    let sky = Sky::new(9);
    let pixels = [4, 8, 15];
    let target = tiled(&Array1::ones(NFREQS), pixels.len());
    let correlation = Array2::zeros((packed_len(NFREQS), SAMPLES));
    let (first, second) = pixel_pair_maps(pixels.len());
    let inputs = PixPixInputs {
        covariance: sky.packed.view(),
        nfreqs: NFREQS,
        target: target.view(),
        pixels: &pixels,
        cos_beta: sky.cos_beta.view(),
        correlation: correlation.view(),
        unit_vectors: sky.unit_vectors.view(),
        pairs: PairMaps {
            first: &first[1..],
            second: &second[1..],
        },
    };
    let err = pixpix_correlated_ilc(&inputs, NSIDE, &config(2)).unwrap_err();
    assert!(matches!(err, IlcError::InvalidPairMaps(_)));
}

#[test]
fn target_spans_every_pixel_and_channel() {
    let sky = Sky::new(2);
    let correlation = Array2::zeros((packed_len(NFREQS), SAMPLES));
    let err = sky
        .solve(&[0, 1], &Array1::ones(NFREQS), &correlation, 1)
        .unwrap_err();
    assert!(matches!(
        err,
        IlcError::LengthMismatch {
            expected: 6,
            actual: 3,
            ..
        }
    ));
}
