// hypergrad/datasets.rs

//! Seeded synthetic regression problems with a sparse ground truth.

use ndarray::{Array1, Array2};
use rand::rngs::StdRng;
use rand::seq::index;
use rand::{Rng, SeedableRng};
use rand_distr::StandardNormal;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum DatasetError {
    #[error("Cannot draw {n_active} active features out of {n_features}.")]
    TooManyActive { n_active: usize, n_features: usize },

    #[error("A dataset needs at least one sample and one feature.")]
    EmptyShape,

    #[error("Correlation must lie in [0, 1), got {0}.")]
    InvalidCorrelation(f64),

    #[error("Signal-to-noise ratio must be positive and finite, got {0}.")]
    InvalidSnr(f64),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Dictionary {
    /// Rows with `corr(X_i, X_j) = rho^|i - j|`.
    Toeplitz,
    /// Independent standard normal entries.
    Gaussian,
}

#[derive(Debug, Clone)]
pub struct SyntheticConfig {
    pub dictionary: Dictionary,
    pub n_samples: usize,
    pub n_features: usize,
    pub n_active: usize,
    pub rho: f64,
    pub snr: f64,
    pub seed: u64,
}

impl Default for SyntheticConfig {
    fn default() -> Self {
        Self {
            dictionary: Dictionary::Toeplitz,
            n_samples: 100,
            n_features: 100,
            n_active: 5,
            rho: 0.1,
            snr: 3.0,
            seed: 0,
        }
    }
}

#[derive(Debug, Clone)]
pub struct SyntheticData {
    pub x: Array2<f64>,
    pub y: Array1<f64>,
    pub beta_star: Array1<f64>,
    /// Noise actually added to `X beta_star`.
    pub noise: Array1<f64>,
    /// Standard deviation of the added noise.
    pub sigma_star: f64,
}

/// Draws `y = X beta* + noise` with `||X beta*|| / ||noise|| = snr`.
pub fn get_synt_data(config: &SyntheticConfig) -> Result<SyntheticData, DatasetError> {
    let SyntheticConfig {
        dictionary,
        n_samples,
        n_features,
        n_active,
        rho,
        snr,
        seed,
    } = *config;
    if n_samples == 0 || n_features == 0 {
        return Err(DatasetError::EmptyShape);
    }
    if n_active > n_features {
        return Err(DatasetError::TooManyActive {
            n_active,
            n_features,
        });
    }
    if !(0.0..1.0).contains(&rho) {
        return Err(DatasetError::InvalidCorrelation(rho));
    }
    if !(snr.is_finite() && snr > 0.0) {
        return Err(DatasetError::InvalidSnr(snr));
    }

    let mut rng = StdRng::seed_from_u64(seed);
    let mut x = Array2::from_shape_fn((n_samples, n_features), |_| {
        rng.sample::<f64, _>(StandardNormal)
    });
    if dictionary == Dictionary::Toeplitz {
        // AR(1) recursion along each row keeps unit variance.
        let innovation = (1.0 - rho * rho).sqrt();
        for mut row in x.rows_mut() {
            for j in 1..n_features {
                row[j] = rho * row[j - 1] + innovation * row[j];
            }
        }
    }

    let mut beta_star = Array1::<f64>::zeros(n_features);
    for j in index::sample(&mut rng, n_features, n_active) {
        beta_star[j] = rng.sample(StandardNormal);
    }

    let signal = x.dot(&beta_star);
    let raw_noise: Array1<f64> =
        Array1::from_iter((0..n_samples).map(|_| rng.sample(StandardNormal)));
    let noise_norm = raw_noise.dot(&raw_noise).sqrt();
    let sigma_star = if noise_norm > 0.0 {
        signal.dot(&signal).sqrt() / (noise_norm * snr)
    } else {
        0.0
    };
    let noise = raw_noise * sigma_star;
    let y = &signal + &noise;

    log::debug!(
        "Synthetic {:?} data: {} x {}, {} active, sigma* = {:.4}",
        dictionary,
        n_samples,
        n_features,
        n_active,
        sigma_star
    );

    Ok(SyntheticData {
        x,
        y,
        beta_star,
        noise,
        sigma_star,
    })
}
