// hypergrad/config.rs

//! Solver settings, stored as TOML.
//!
//! ```toml
//! tol = 1e-5
//!
//! [implicit_forward]
//! tol_jac = 1e-3
//! n_iter_jac = 100
//!
//! [implicit]
//! tol_cg = 1e-6
//! max_iter_cg = 100
//!
//! [search]
//! max_iterations = 50
//! tolerance = 1e-5
//! log_alpha_span = 10.0
//! n_grid = 10
//! ```
//!
//! Missing keys and sections fall back to the defaults above.

use serde::{Deserialize, Serialize};
use std::fs;
use std::io::{BufWriter, Write};
use std::path::Path;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read or write config file: {0}")]
    IoError(#[from] std::io::Error),
    #[error("Failed to parse TOML config: {0}")]
    TomlParseError(#[from] toml::de::Error),
    #[error("Failed to serialize config to TOML format: {0}")]
    TomlSerializeError(#[from] toml::ser::Error),
    #[error("Invalid setting '{key}': {reason}")]
    InvalidSetting { key: &'static str, reason: String },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SolverConfig {
    /// Tolerance of the primal solve.
    pub tol: f64,
    pub implicit_forward: ImplicitForwardConfig,
    pub implicit: ImplicitConfig,
    pub search: SearchConfig,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ImplicitForwardConfig {
    pub tol_jac: f64,
    pub n_iter_jac: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ImplicitConfig {
    pub tol_cg: f64,
    pub max_iter_cg: usize,
}

/// Settings of the outer hyperparameter search.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SearchConfig {
    /// BFGS iteration cap.
    pub max_iterations: usize,
    /// BFGS gradient-norm tolerance.
    pub tolerance: f64,
    /// Width of the box `[log alpha_max - span, log alpha_max]` iterates are
    /// clamped to.
    pub log_alpha_span: f64,
    /// Number of points of the default grid.
    pub n_grid: usize,
}

impl Default for SolverConfig {
    fn default() -> Self {
        Self {
            tol: 1e-5,
            implicit_forward: ImplicitForwardConfig::default(),
            implicit: ImplicitConfig::default(),
            search: SearchConfig::default(),
        }
    }
}

impl Default for ImplicitForwardConfig {
    fn default() -> Self {
        Self {
            tol_jac: 1e-3,
            n_iter_jac: 100,
        }
    }
}

impl Default for ImplicitConfig {
    fn default() -> Self {
        Self {
            tol_cg: 1e-6,
            max_iter_cg: 100,
        }
    }
}

impl Default for SearchConfig {
    fn default() -> Self {
        Self {
            max_iterations: 50,
            tolerance: 1e-5,
            log_alpha_span: 10.0,
            n_grid: 10,
        }
    }
}

fn positive(key: &'static str, value: f64) -> Result<(), ConfigError> {
    if value.is_finite() && value > 0.0 {
        Ok(())
    } else {
        Err(ConfigError::InvalidSetting {
            key,
            reason: format!("must be positive and finite, got {value}"),
        })
    }
}

fn at_least_one(key: &'static str, value: usize) -> Result<(), ConfigError> {
    if value >= 1 {
        Ok(())
    } else {
        Err(ConfigError::InvalidSetting {
            key,
            reason: "must be at least 1".to_string(),
        })
    }
}

impl SolverConfig {
    pub fn from_toml_str(s: &str) -> Result<Self, ConfigError> {
        let config: SolverConfig = toml::from_str(s)?;
        config.validate()?;
        Ok(config)
    }

    pub fn to_toml_string(&self) -> Result<String, ConfigError> {
        Ok(toml::to_string_pretty(self)?)
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let toml_string = fs::read_to_string(path)?;
        Self::from_toml_str(&toml_string)
    }

    pub fn save(&self, path: impl AsRef<Path>) -> Result<(), ConfigError> {
        let toml_string = self.to_toml_string()?;
        let mut file = BufWriter::new(fs::File::create(path)?);
        file.write_all(toml_string.as_bytes())?;
        file.flush()?;
        Ok(())
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        positive("tol", self.tol)?;
        positive("implicit_forward.tol_jac", self.implicit_forward.tol_jac)?;
        at_least_one("implicit_forward.n_iter_jac", self.implicit_forward.n_iter_jac)?;
        positive("implicit.tol_cg", self.implicit.tol_cg)?;
        at_least_one("implicit.max_iter_cg", self.implicit.max_iter_cg)?;
        at_least_one("search.max_iterations", self.search.max_iterations)?;
        positive("search.tolerance", self.search.tolerance)?;
        positive("search.log_alpha_span", self.search.log_alpha_span)?;
        at_least_one("search.n_grid", self.search.n_grid)?;
        Ok(())
    }
}
