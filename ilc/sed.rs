//! Spectral energy distributions of the deprojected foregrounds.
//!
//! Foreground SEDs are modelled in brightness (Rayleigh-Jeans) temperature
//! and brought to thermodynamic CMB units by dividing with
//! `g(nu) = x^2 e^x / (e^x - 1)^2`, `x = h nu / (k T_cmb)`. The factor
//! depends only on the channel set, so [`ChannelSet`] computes it once.

use crate::error::IlcError;
use crate::validate::Validator;
use ndarray::{Array1, ArrayView1, ArrayViewMut1};

pub const H_PLANCK: f64 = 6.6260755e-34;
pub const K_BOLTZ: f64 = 1.380658e-23;
pub const T_CMB: f64 = 2.72548;

const GHZ: f64 = 1.0e9;

/// Thermodynamic-to-brightness temperature conversion at `freq_ghz`.
pub fn thermo_to_rj(freq_ghz: f64) -> f64 {
    let x = H_PLANCK * freq_ghz * GHZ / (K_BOLTZ * T_CMB);
    let ex = x.exp();
    x * x * ex / ((ex - 1.0) * (ex - 1.0))
}

/// Effective frequencies of the channels with their precomputed unit conversion.
#[derive(Debug, Clone)]
pub struct ChannelSet {
    freqs_ghz: Array1<f64>,
    thermo_to_rj: Array1<f64>,
}

impl ChannelSet {
    pub fn new(freqs_ghz: ArrayView1<'_, f64>) -> Result<Self, IlcError> {
        if freqs_ghz.is_empty() {
            return Err(IlcError::NoChannels);
        }
        for &freq in freqs_ghz {
            Validator::positive_scalar("channel frequency", freq)?;
        }
        Ok(Self {
            freqs_ghz: freqs_ghz.to_owned(),
            thermo_to_rj: freqs_ghz.mapv(thermo_to_rj),
        })
    }

    pub fn len(&self) -> usize {
        self.freqs_ghz.len()
    }

    pub fn is_empty(&self) -> bool {
        self.freqs_ghz.is_empty()
    }

    pub fn freqs_ghz(&self) -> ArrayView1<'_, f64> {
        self.freqs_ghz.view()
    }

    pub fn thermo_to_rj(&self) -> ArrayView1<'_, f64> {
        self.thermo_to_rj.view()
    }

    /// Modified blackbody `nu^(beta+1) / (exp(h nu / k T_d) - 1)`, in thermodynamic units.
    pub fn modified_blackbody(&self, beta: f64, t_dust: f64, mut out: ArrayViewMut1<'_, f64>) {
        for ((o, &nu), &g) in out
            .iter_mut()
            .zip(self.freqs_ghz.iter())
            .zip(self.thermo_to_rj.iter())
        {
            let x = H_PLANCK * nu * GHZ / (K_BOLTZ * t_dust);
            *o = nu.powf(beta + 1.0) / x.exp_m1() / g;
        }
    }

    /// Synchrotron power law `nu^beta`, in thermodynamic units.
    pub fn power_law(&self, beta: f64, mut out: ArrayViewMut1<'_, f64>) {
        for ((o, &nu), &g) in out
            .iter_mut()
            .zip(self.freqs_ghz.iter())
            .zip(self.thermo_to_rj.iter())
        {
            *o = nu.powf(beta) / g;
        }
    }
}
