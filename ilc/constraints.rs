//! Spectral constraints of the weight solve.
//!
//! Column 0 of every constraint matrix is the target response; the remaining
//! columns are contaminants the weights must null. Fixed constraints are the
//! same at every pixel, while the dust and synchrotron models evaluate their
//! SEDs from per-pixel parameter maps.

use crate::error::IlcError;
use crate::sed::ChannelSet;
use crate::types::DustMaps;
use crate::validate::Validator;
use ndarray::{Array1, Array2, ArrayView1, ArrayView2, ArrayViewMut2, Axis, stack};

pub trait ConstraintProvider: Sync {
    fn nfreqs(&self) -> usize;

    /// Number of constraint columns `k`, at least 1.
    fn ncomponents(&self) -> usize;

    /// Writes the `[Nfreqs, k]` constraint matrix of map pixel `ipix`.
    fn fill_constraints(&self, ipix: usize, out: ArrayViewMut2<'_, f64>);
}

/// Constraint matrix shared by every pixel.
#[derive(Debug, Clone)]
pub struct FixedConstraints {
    matrix: Array2<f64>,
}

impl FixedConstraints {
    /// Plain ILC: unit response to `target`.
    pub fn target(target: ArrayView1<'_, f64>) -> Result<Self, IlcError> {
        Self::from_matrix(target.insert_axis(Axis(1)))
    }

    /// Unit response to `target`, zero response to `contaminant`.
    pub fn target_and_contaminant(
        target: ArrayView1<'_, f64>,
        contaminant: ArrayView1<'_, f64>,
    ) -> Result<Self, IlcError> {
        Validator::length("contaminant SED", &contaminant, target.len())?;
        Self::from_matrix(stack(Axis(1), &[target.reborrow(), contaminant.reborrow()])?.view())
    }

    /// Any `[Nfreqs, k]` matrix whose first column is the target.
    pub fn from_matrix(matrix: ArrayView2<'_, f64>) -> Result<Self, IlcError> {
        Validator::channel_count(matrix.nrows())?;
        if matrix.ncols() == 0 {
            return Err(IlcError::ShapeMismatch {
                name: "constraint matrix",
                expected: (matrix.nrows(), 1),
                actual: matrix.dim(),
            });
        }
        Validator::finite("constraint matrix", &matrix)?;
        Ok(Self {
            matrix: matrix.to_owned(),
        })
    }
}

impl ConstraintProvider for FixedConstraints {
    fn nfreqs(&self) -> usize {
        self.matrix.nrows()
    }

    fn ncomponents(&self) -> usize {
        self.matrix.ncols()
    }

    fn fill_constraints(&self, _: usize, mut out: ArrayViewMut2<'_, f64>) {
        out.assign(&self.matrix);
    }
}

/// Target plus a modified-blackbody dust SED per pixel.
#[derive(Debug, Clone)]
pub struct DustConstraints<'a> {
    target: Array1<f64>,
    channels: ChannelSet,
    dust: DustMaps<'a>,
}

impl<'a> DustConstraints<'a> {
    pub fn new(
        target: ArrayView1<'_, f64>,
        channels: ChannelSet,
        dust: DustMaps<'a>,
    ) -> Result<Self, IlcError> {
        Validator::length("target SED", &target, channels.len())?;
        Validator::finite("target SED", &target)?;
        Validator::length("dust temperature map", &dust.temperature, dust.beta.len())?;
        Validator::finite("dust index map", &dust.beta)?;
        Validator::finite("dust temperature map", &dust.temperature)?;
        dust.temperature
            .iter()
            .try_for_each(|&t| Validator::positive_scalar("dust temperature", t))?;
        Ok(Self {
            target: target.to_owned(),
            channels,
            dust,
        })
    }

    /// Number of map pixels the parameter maps cover.
    pub fn npix(&self) -> usize {
        self.dust.beta.len()
    }
}

impl ConstraintProvider for DustConstraints<'_> {
    fn nfreqs(&self) -> usize {
        self.channels.len()
    }

    fn ncomponents(&self) -> usize {
        2
    }

    fn fill_constraints(&self, ipix: usize, mut out: ArrayViewMut2<'_, f64>) {
        out.column_mut(0).assign(&self.target);
        self.channels.modified_blackbody(
            self.dust.beta[ipix],
            self.dust.temperature[ipix],
            out.column_mut(1),
        );
    }
}

/// Target, modified-blackbody dust and a synchrotron power law per pixel.
#[derive(Debug, Clone)]
pub struct DustSynchrotronConstraints<'a> {
    dust: DustConstraints<'a>,
    beta_sync: ArrayView1<'a, f64>,
}

impl<'a> DustSynchrotronConstraints<'a> {
    pub fn new(dust: DustConstraints<'a>, beta_sync: ArrayView1<'a, f64>) -> Result<Self, IlcError> {
        Validator::length("synchrotron index map", &beta_sync, dust.npix())?;
        Validator::finite("synchrotron index map", &beta_sync)?;
        Ok(Self { dust, beta_sync })
    }
}

impl ConstraintProvider for DustSynchrotronConstraints<'_> {
    fn nfreqs(&self) -> usize {
        self.dust.nfreqs()
    }

    fn ncomponents(&self) -> usize {
        3
    }

    fn fill_constraints(&self, ipix: usize, mut out: ArrayViewMut2<'_, f64>) {
        self.dust
            .fill_constraints(ipix, out.slice_mut(ndarray::s![.., ..2]));
        self.dust
            .channels
            .power_law(self.beta_sync[ipix], out.column_mut(2));
    }
}
