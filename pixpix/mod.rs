//! Pixel-pixel correlated ILC: one covariance over every (pixel, channel).

pub mod global;
pub mod interpolation;

pub use global::{PairMaps, PixPixInputs, global_covariance, pixel_pair_maps, pixpix_weights};
pub use interpolation::{CubicSpline, SplineError};
