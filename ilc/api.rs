//! Entry points. Each call validates its inputs, builds a worker pool of
//! exactly `config.workers` threads, and returns freshly allocated weights.

use crate::config::IlcConfig;
use crate::constraints::{DustConstraints, DustSynchrotronConstraints, FixedConstraints};
use crate::covariance::{DiscCovariance, PackedCovariance};
use crate::dispatch::PixelDispatcher;
use crate::error::IlcError;
use crate::pixelization::{HealpixRing, SpherePixelization};
use crate::pixpix::{PixPixInputs, pixpix_weights};
use crate::sed::ChannelSet;
use crate::types::{DustMaps, PixelWeights};
use crate::validate::Validator;
use ndarray::{Array1, ArrayView1, ArrayView2};

fn healpix(nside: usize) -> Result<HealpixRing, IlcError> {
    HealpixRing::new(nside).ok_or(IlcError::InvalidScalar {
        name: "nside",
        value: nside as f64,
    })
}

fn target_sed(target: ArrayView1<'_, f64>, nfreqs: usize) -> Result<(), IlcError> {
    Validator::length("target SED", &target, nfreqs)?;
    Validator::finite("target SED", &target)
}

/// ILC with covariances estimated over a disc of radius `fwhm` (radians)
/// around each pixel of the `[Nfreqs, 12 nside^2]` filtered maps.
///
/// The estimated covariances are returned alongside the weights, packed
/// one row per work-list entry, so they can be smoothed and fed back
/// through [`smoothed_covariance_ilc`].
pub fn disc_covariance_ilc(
    maps: ArrayView2<'_, f64>,
    mask: ArrayView1<'_, f64>,
    nside: usize,
    target: ArrayView1<'_, f64>,
    fwhm: f64,
    pixels: &[usize],
    config: &IlcConfig,
) -> Result<PixelWeights, IlcError> {
    let grid = healpix(nside)?;
    let nfreqs = maps.nrows();
    let source = DiscCovariance::new(
        maps.reborrow(),
        mask.reborrow(),
        grid,
        fwhm,
        config.disc_capacity,
    )?;
    target_sed(target, nfreqs)?;
    let constraints = FixedConstraints::target(target)?;
    PixelDispatcher::new(config)?.run_keeping_covariance(&source, &constraints, pixels)
}

/// ILC with precomputed, harmonically smoothed covariances in packed form.
pub fn smoothed_covariance_ilc(
    covariance: ArrayView2<'_, f64>,
    nfreqs: usize,
    target: ArrayView1<'_, f64>,
    pixels: &[usize],
    config: &IlcConfig,
) -> Result<PixelWeights, IlcError> {
    let source = PackedCovariance::new(covariance, nfreqs)?;
    target_sed(target, nfreqs)?;
    let constraints = FixedConstraints::target(target)?;
    PixelDispatcher::new(config)?.run(&source, &constraints, pixels)
}

/// ILC that keeps unit response to `target` and nulls `contaminant`.
pub fn deprojected_ilc(
    covariance: ArrayView2<'_, f64>,
    nfreqs: usize,
    target: ArrayView1<'_, f64>,
    contaminant: ArrayView1<'_, f64>,
    pixels: &[usize],
    config: &IlcConfig,
) -> Result<PixelWeights, IlcError> {
    let source = PackedCovariance::new(covariance, nfreqs)?;
    target_sed(target, nfreqs)?;
    let constraints = FixedConstraints::target_and_contaminant(target, contaminant)?;
    PixelDispatcher::new(config)?.run(&source, &constraints, pixels)
}

/// ILC under an arbitrary `[Nfreqs, k]` constraint matrix whose column 0 is
/// the target and whose other columns are nulled.
pub fn constrained_ilc(
    covariance: ArrayView2<'_, f64>,
    nfreqs: usize,
    constraints: ArrayView2<'_, f64>,
    pixels: &[usize],
    config: &IlcConfig,
) -> Result<PixelWeights, IlcError> {
    let source = PackedCovariance::new(covariance, nfreqs)?;
    Validator::shape("constraint matrix", &constraints, (nfreqs, constraints.ncols()))?;
    let constraints = FixedConstraints::from_matrix(constraints)?;
    PixelDispatcher::new(config)?.run(&source, &constraints, pixels)
}

/// ILC that nulls a modified-blackbody dust SED evaluated per pixel from
/// spectral-index and temperature maps. The channel count is the length of
/// `freqs_ghz`.
pub fn dust_deprojected_ilc(
    covariance: ArrayView2<'_, f64>,
    target: ArrayView1<'_, f64>,
    dust: DustMaps<'_>,
    freqs_ghz: ArrayView1<'_, f64>,
    pixels: &[usize],
    config: &IlcConfig,
) -> Result<PixelWeights, IlcError> {
    let channels = ChannelSet::new(freqs_ghz)?;
    let source = PackedCovariance::new(covariance, channels.len())?;
    Validator::length("dust index map", &dust.beta, covariance.nrows())?;
    let constraints = DustConstraints::new(target, channels, dust)?;
    PixelDispatcher::new(config)?.run(&source, &constraints, pixels)
}

/// As [`dust_deprojected_ilc`], additionally nulling a synchrotron power law
/// with per-pixel index `beta_sync`.
pub fn dust_synchrotron_deprojected_ilc<'a>(
    covariance: ArrayView2<'_, f64>,
    target: ArrayView1<'_, f64>,
    dust: DustMaps<'a>,
    beta_sync: ArrayView1<'a, f64>,
    freqs_ghz: ArrayView1<'_, f64>,
    pixels: &[usize],
    config: &IlcConfig,
) -> Result<PixelWeights, IlcError> {
    let channels = ChannelSet::new(freqs_ghz)?;
    let source = PackedCovariance::new(covariance, channels.len())?;
    Validator::length("dust index map", &dust.beta, covariance.nrows())?;
    let constraints = DustSynchrotronConstraints::new(
        DustConstraints::new(target, channels, dust)?,
        beta_sync,
    )?;
    PixelDispatcher::new(config)?.run(&source, &constraints, pixels)
}

/// ILC over a single covariance spanning every (pixel, channel) of the work
/// list. Returns `Npixels * Nfreqs` weights, pixel-major.
pub fn pixpix_correlated_ilc(
    inputs: &PixPixInputs<'_>,
    nside: usize,
    config: &IlcConfig,
) -> Result<Array1<f64>, IlcError> {
    let npix = healpix(nside)?.npix();
    let dispatcher = PixelDispatcher::new(config)?;
    pixpix_weights(inputs, npix, &dispatcher)
}
