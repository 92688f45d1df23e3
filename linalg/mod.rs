pub mod faer_ndarray;
pub mod inverse;

pub use inverse::SymmetricInverter;
