//! Parallel per-pixel weight computation.
//!
//! The work list is cut into one contiguous chunk per worker. Each chunk owns
//! a disjoint slice of the output buffer and a private [`WorkerScratch`]
//! allocated when the chunk starts, so workers never share mutable state.

use crate::config::{IlcConfig, PixelFailurePolicy};
use crate::constraints::ConstraintProvider;
use crate::covariance::CovarianceSource;
use crate::error::{IlcError, PixelError};
use crate::linalg::SymmetricInverter;
use crate::packed::{channel_pairs, packed_len};
use crate::solver::WeightSolver;
use crate::types::PixelWeights;
use crate::validate::Validator;
use ndarray::{Array2, ArrayViewMut1};
use rayon::prelude::*;
use rayon::{ThreadPool, ThreadPoolBuilder};
use std::time::Instant;

/// Runs one call's pixels on a pool sized exactly by the configuration.
pub struct PixelDispatcher {
    pool: ThreadPool,
    workers: usize,
    inverter: SymmetricInverter,
    min_pivot_ratio: f64,
    failure_policy: PixelFailurePolicy,
}

impl PixelDispatcher {
    pub fn new(config: &IlcConfig) -> Result<Self, IlcError> {
        config.validate()?;
        let workers = config.workers.get();
        let pool = ThreadPoolBuilder::new()
            .num_threads(workers)
            .thread_name(|index| format!("ilc-worker-{index}"))
            .build()?;
        Ok(Self {
            pool,
            workers,
            inverter: config.inverter(),
            min_pivot_ratio: config.min_pivot_ratio,
            failure_policy: config.on_pixel_failure,
        })
    }

    pub fn workers(&self) -> usize {
        self.workers
    }

    pub fn inverter(&self) -> SymmetricInverter {
        self.inverter
    }

    /// Runs `op` inside this dispatcher's pool.
    pub fn install<OP, R>(&self, op: OP) -> R
    where
        OP: FnOnce() -> R + Send,
        R: Send,
    {
        self.pool.install(op)
    }

    /// Computes the weights of every pixel in `pixels`.
    ///
    /// Fails before any pixel is processed when the sources disagree on the
    /// channel count or a pixel index is out of range. Under
    /// [`PixelFailurePolicy::Abort`] the reported failure is the one at the
    /// lowest work-list position, whatever the worker count.
    pub fn run<S, K>(
        &self,
        source: &S,
        constraints: &K,
        pixels: &[usize],
    ) -> Result<PixelWeights, IlcError>
    where
        S: CovarianceSource,
        K: ConstraintProvider,
    {
        self.dispatch(source, constraints, pixels, false)
    }

    /// As [`run`](Self::run), also returning each pixel's estimated
    /// covariance in packed form.
    pub fn run_keeping_covariance<S, K>(
        &self,
        source: &S,
        constraints: &K,
        pixels: &[usize],
    ) -> Result<PixelWeights, IlcError>
    where
        S: CovarianceSource,
        K: ConstraintProvider,
    {
        self.dispatch(source, constraints, pixels, true)
    }

    fn dispatch<S, K>(
        &self,
        source: &S,
        constraints: &K,
        pixels: &[usize],
        keep_covariance: bool,
    ) -> Result<PixelWeights, IlcError>
    where
        S: CovarianceSource,
        K: ConstraintProvider,
    {
        let nfreqs = source.nfreqs();
        if constraints.nfreqs() != nfreqs {
            return Err(IlcError::LengthMismatch {
                name: "constraint channels",
                expected: nfreqs,
                actual: constraints.nfreqs(),
            });
        }
        Validator::pixel_list(pixels, source.npix())?;

        let npixels = pixels.len();
        let npacked = if keep_covariance { packed_len(nfreqs) } else { 0 };
        if npixels == 0 {
            return Ok(PixelWeights {
                weights: Array2::zeros((0, nfreqs)),
                failed_pixels: Vec::new(),
                covariance: keep_covariance.then(|| Array2::zeros((0, npacked))),
            });
        }

        let start = Instant::now();
        let chunk_rows = npixels.div_ceil(self.workers);
        let ncomponents = constraints.ncomponents();
        log::debug!(
            "Dispatching {npixels} pixels x {nfreqs} channels ({ncomponents} constraints) to {} workers, {chunk_rows} pixels each",
            self.workers
        );

        let mut weights = zeroed_buffer("weight matrix", &[npixels, nfreqs])?;
        let chunks: Vec<Result<ChunkOutcome, IlcError>> = self.pool.install(|| {
            weights
                .par_chunks_mut(chunk_rows * nfreqs)
                .zip(pixels.par_chunks(chunk_rows))
                .enumerate()
                .map(|(chunk, (rows, chunk_pixels))| -> Result<ChunkOutcome, IlcError> {
                    let mut scratch = WorkerScratch::new(
                        source,
                        ncomponents,
                        self.inverter,
                        self.min_pivot_ratio,
                    );
                    let mut failed = Vec::new();
                    let mut covariance =
                        zeroed_buffer("packed covariances", &[chunk_pixels.len(), npacked])?;
                    for (offset, (row, &ipix)) in
                        rows.chunks_mut(nfreqs).zip(chunk_pixels).enumerate()
                    {
                        let position = chunk * chunk_rows + offset;
                        let packed = if keep_covariance {
                            Some(&mut covariance[offset * npacked..(offset + 1) * npacked])
                        } else {
                            None
                        };
                        match scratch.solve_pixel(source, constraints, ipix, row, packed) {
                            Ok(()) => {}
                            Err(err)
                                if self.failure_policy == PixelFailurePolicy::ZeroRow
                                    && err.is_recoverable() =>
                            {
                                row.fill(0.0);
                                failed.push(position);
                            }
                            Err(err) => {
                                return Err(IlcError::PixelFailed {
                                    position,
                                    ipix,
                                    source: err,
                                });
                            }
                        }
                    }
                    Ok(ChunkOutcome { failed, covariance })
                })
                .collect()
        });

        // Chunks cover ascending positions, so the first error in chunk
        // order is the lowest failing position.
        let chunks = chunks.into_iter().collect::<Result<Vec<_>, IlcError>>()?;

        let covariance = if keep_covariance {
            let mut packed = zeroed_buffer("packed covariances", &[npixels, npacked])?;
            for (out, chunk) in packed.chunks_mut(chunk_rows * npacked).zip(&chunks) {
                out.copy_from_slice(&chunk.covariance);
            }
            Some(Array2::from_shape_vec((npixels, npacked), packed)?)
        } else {
            None
        };
        let failed_pixels: Vec<usize> = chunks.into_iter().flat_map(|c| c.failed).collect();
        if !failed_pixels.is_empty() {
            log::warn!(
                "Zeroed the weights of {} of {npixels} pixels after per-pixel failures",
                failed_pixels.len()
            );
        }
        log::info!(
            "Computed weights for {npixels} pixels in {:.2?}",
            start.elapsed()
        );

        Ok(PixelWeights {
            weights: Array2::from_shape_vec((npixels, nfreqs), weights)?,
            failed_pixels,
            covariance,
        })
    }
}

/// Zero-filled buffer holding `shape.iter().product()` values. A request the
/// allocator cannot satisfy is an [`IlcError::Allocation`].
pub(crate) fn zeroed_buffer(what: &'static str, shape: &[usize]) -> Result<Vec<f64>, IlcError> {
    let failure = || IlcError::Allocation {
        what,
        shape: shape.to_vec(),
    };
    let len = shape
        .iter()
        .try_fold(1_usize, |acc, &dim| acc.checked_mul(dim))
        .ok_or_else(failure)?;
    let mut buffer = Vec::new();
    buffer.try_reserve_exact(len).map_err(|_| failure())?;
    buffer.resize(len, 0.0);
    Ok(buffer)
}

/// What one chunk hands back besides its slice of the weight matrix.
struct ChunkOutcome {
    failed: Vec<usize>,
    covariance: Vec<f64>,
}

/// Buffers private to one worker for the lifetime of its chunk.
struct WorkerScratch<T> {
    source: T,
    covariance: Array2<f64>,
    cinv: Array2<f64>,
    constraints: Array2<f64>,
    solver: WeightSolver,
    inverter: SymmetricInverter,
}

impl<T> WorkerScratch<T> {
    fn new<S: CovarianceSource<Scratch = T>>(
        source: &S,
        ncomponents: usize,
        inverter: SymmetricInverter,
        min_pivot_ratio: f64,
    ) -> Self {
        let nfreqs = source.nfreqs();
        Self {
            source: source.new_scratch(),
            covariance: Array2::zeros((nfreqs, nfreqs)),
            cinv: Array2::zeros((nfreqs, nfreqs)),
            constraints: Array2::zeros((nfreqs, ncomponents)),
            solver: WeightSolver::new(nfreqs, ncomponents, min_pivot_ratio),
            inverter,
        }
    }

    fn solve_pixel<S, K>(
        &mut self,
        source: &S,
        constraints: &K,
        ipix: usize,
        row: &mut [f64],
        packed: Option<&mut [f64]>,
    ) -> Result<(), PixelError>
    where
        S: CovarianceSource<Scratch = T>,
        K: ConstraintProvider,
    {
        source.fill_covariance(ipix, &mut self.source, self.covariance.view_mut())?;
        if let Some(packed) = packed {
            for (slot, pair) in packed.iter_mut().zip(channel_pairs(self.covariance.nrows())) {
                *slot = self.covariance[pair];
            }
        }
        self.inverter
            .invert_into(self.covariance.view(), self.cinv.view_mut())?;
        constraints.fill_constraints(ipix, self.constraints.view_mut());
        self.solver.solve(
            self.cinv.view(),
            self.constraints.view(),
            ArrayViewMut1::from(row),
        )
    }
}
