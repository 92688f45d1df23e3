#![deny(unused_variables)]
#![deny(dead_code)]
#![deny(unused_imports)]
#![deny(clippy::no_effect_underscore_binding)]
pub mod api;
pub mod config;
pub mod constraints;
pub mod covariance;
pub mod dispatch;
pub mod error;
pub mod packed;
pub mod pixelization;
pub mod sed;
pub mod solver;
pub mod types;
pub mod validate;

#[path = "../linalg/mod.rs"]
pub mod linalg;

#[path = "../pixpix/mod.rs"]
pub mod pixpix;

pub use api::{
    constrained_ilc, deprojected_ilc, disc_covariance_ilc, dust_deprojected_ilc,
    dust_synchrotron_deprojected_ilc, pixpix_correlated_ilc, smoothed_covariance_ilc,
};
pub use config::{IlcConfig, InversionPolicy, PixelFailurePolicy};
pub use error::{IlcError, PixelError};
pub use pixelization::{HealpixRing, SpherePixelization};
pub use pixpix::{PairMaps, PixPixInputs, pixel_pair_maps};
pub use types::{DustMaps, PixelWeights};
