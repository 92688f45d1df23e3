use crate::linalg::SymmetricInverter;
use serde::{Deserialize, Serialize};
use std::fs;
use std::io::{BufWriter, Write};
use std::num::NonZeroUsize;
use std::path::Path;
use thiserror::Error;

/// Scratch capacity of the disc query, in pixels. Large enough for a
/// several-degree disc at nside 2048.
pub const DEFAULT_DISC_CAPACITY: usize = 60_000;

pub const DEFAULT_MIN_PIVOT_RATIO: f64 = 1e-12;

/// What the inverter does with a covariance matrix it cannot factor.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize, Default)]
#[serde(tag = "mode", rename_all = "snake_case")]
pub enum InversionPolicy {
    /// Report the matrix as singular.
    #[default]
    FailFast,
    /// Add `relative_ridge * mean(diag)` to the diagonal and try once more.
    Regularize { relative_ridge: f64 },
}

/// How a recoverable per-pixel failure (singular covariance, empty disc,
/// degenerate constraints) is handled.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum PixelFailurePolicy {
    /// The whole call fails with the failing pixel at the lowest work-list
    /// position.
    #[default]
    Abort,
    /// The pixel's weight row is zeroed and its position is reported in
    /// [`crate::types::PixelWeights::failed_pixels`].
    ZeroRow,
}

/// Runtime configuration shared by every entry point.
///
/// The worker count has no default: every call states how many threads it
/// runs on.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IlcConfig {
    pub workers: NonZeroUsize,
    #[serde(default = "default_min_pivot_ratio")]
    pub min_pivot_ratio: f64,
    #[serde(default)]
    pub on_pixel_failure: PixelFailurePolicy,
    #[serde(default = "default_disc_capacity")]
    pub disc_capacity: usize,
    #[serde(default)]
    pub inversion: InversionPolicy,
}

fn default_min_pivot_ratio() -> f64 {
    DEFAULT_MIN_PIVOT_RATIO
}

fn default_disc_capacity() -> usize {
    DEFAULT_DISC_CAPACITY
}

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read or write config file: {0}")]
    IoError(#[from] std::io::Error),
    #[error("Failed to parse TOML config: {0}")]
    TomlParseError(#[from] toml::de::Error),
    #[error("Failed to serialize config to TOML: {0}")]
    TomlSerializeError(#[from] toml::ser::Error),
    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

impl IlcConfig {
    pub fn new(workers: NonZeroUsize) -> Self {
        Self {
            workers,
            min_pivot_ratio: DEFAULT_MIN_PIVOT_RATIO,
            on_pixel_failure: PixelFailurePolicy::default(),
            disc_capacity: DEFAULT_DISC_CAPACITY,
            inversion: InversionPolicy::default(),
        }
    }

    pub fn with_inversion(mut self, inversion: InversionPolicy) -> Self {
        self.inversion = inversion;
        self
    }

    pub fn with_pixel_failure(mut self, policy: PixelFailurePolicy) -> Self {
        self.on_pixel_failure = policy;
        self
    }

    pub fn with_disc_capacity(mut self, capacity: usize) -> Self {
        self.disc_capacity = capacity;
        self
    }

    pub fn with_min_pivot_ratio(mut self, ratio: f64) -> Self {
        self.min_pivot_ratio = ratio;
        self
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if !(0.0..1.0).contains(&self.min_pivot_ratio) {
            return Err(ConfigError::Invalid(format!(
                "min_pivot_ratio must lie in [0, 1), got {}",
                self.min_pivot_ratio
            )));
        }
        if let InversionPolicy::Regularize { relative_ridge } = self.inversion {
            if !(relative_ridge.is_finite() && relative_ridge > 0.0) {
                return Err(ConfigError::Invalid(format!(
                    "relative_ridge must be positive and finite, got {relative_ridge}"
                )));
            }
        }
        if self.disc_capacity == 0 {
            return Err(ConfigError::Invalid(
                "disc_capacity must be at least 1".to_string(),
            ));
        }
        Ok(())
    }

    pub fn inverter(&self) -> SymmetricInverter {
        SymmetricInverter::new(self.inversion, self.min_pivot_ratio)
    }

    pub fn from_toml_str(text: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(text)?;
        config.validate()?;
        Ok(config)
    }

    /// Saves the configuration in a human-readable TOML format.
    pub fn save(&self, path: impl AsRef<Path>) -> Result<(), ConfigError> {
        let toml_string = toml::to_string_pretty(self)?;
        let mut file = BufWriter::new(fs::File::create(path)?);
        file.write_all(toml_string.as_bytes())?;
        Ok(())
    }

    /// Loads and validates a configuration from a TOML file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let toml_string = fs::read_to_string(path)?;
        Self::from_toml_str(&toml_string)
    }
}
