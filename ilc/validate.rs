//! Precondition checks run before any pixel is touched.
//!
//! Every entry point validates its inputs up front so a malformed call fails
//! as a whole, with no partial output. Checks stop at the first violation.

use crate::error::IlcError;
use ndarray::{ArrayBase, Data, Dimension, Ix1, Ix2};

/// Static validation helpers shared by the entry points.
pub struct Validator;

impl Validator {
    pub fn channel_count(nfreqs: usize) -> Result<(), IlcError> {
        if nfreqs == 0 {
            return Err(IlcError::NoChannels);
        }
        Ok(())
    }

    pub fn length<S: Data<Elem = f64>>(
        name: &'static str,
        values: &ArrayBase<S, Ix1>,
        expected: usize,
    ) -> Result<(), IlcError> {
        if values.len() != expected {
            return Err(IlcError::LengthMismatch {
                name,
                expected,
                actual: values.len(),
            });
        }
        Ok(())
    }

    pub fn shape<S: Data<Elem = f64>>(
        name: &'static str,
        values: &ArrayBase<S, Ix2>,
        expected: (usize, usize),
    ) -> Result<(), IlcError> {
        if values.dim() != expected {
            return Err(IlcError::ShapeMismatch {
                name,
                expected,
                actual: values.dim(),
            });
        }
        Ok(())
    }

    /// Rejects NaN and infinities, reporting the first offending flat index.
    pub fn finite<S: Data<Elem = f64>, D: Dimension>(
        name: &'static str,
        values: &ArrayBase<S, D>,
    ) -> Result<(), IlcError> {
        match values.iter().position(|v| !v.is_finite()) {
            Some(index) => Err(IlcError::NonFinite { name, index }),
            None => Ok(()),
        }
    }

    /// Mask weights must be finite and non-negative.
    pub fn mask<S: Data<Elem = f64>>(values: &ArrayBase<S, Ix1>) -> Result<(), IlcError> {
        Self::finite("mask", values)?;
        if let Some(index) = values.iter().position(|&v| v < 0.0) {
            return Err(IlcError::InvalidScalar {
                name: "mask",
                value: values[index],
            });
        }
        Ok(())
    }

    pub fn positive_scalar(name: &'static str, value: f64) -> Result<(), IlcError> {
        if !(value.is_finite() && value > 0.0) {
            return Err(IlcError::InvalidScalar { name, value });
        }
        Ok(())
    }

    /// Every work-list entry must address a pixel of the map.
    pub fn pixel_list(pixels: &[usize], npix: usize) -> Result<(), IlcError> {
        match pixels.iter().position(|&ipix| ipix >= npix) {
            Some(position) => Err(IlcError::PixelOutOfRange {
                position,
                index: pixels[position],
                npix,
            }),
            None => Ok(()),
        }
    }
}
