// src/mechanisms/sparse_vector.rs

use ndarray::Array1;
use rand::RngCore;
use tracing::{debug, info};

use crate::error::{DpError, DpResult};
use crate::exact::sample_laplace_exact;
use crate::exhaustion::ExhaustionGuard;
use crate::privacy_accounting::{self, PrivacyAccountant};

const PRECISION: u32 = 35;

fn noisy_threshold(threshold: f64, epsilon: f64, sensitivity: f64, rng: &mut dyn RngCore) -> f64 {
    let scale = 2.0 * sensitivity / epsilon;
    threshold + sample_laplace_exact(scale, PRECISION, rng)
}

/// Returns the index of the first query in `data` whose noisy value clears
/// a noisy threshold.
///
/// The batch interface evaluates the whole query vector in one release: it
/// draws `threshold + Lap(2*sensitivity/epsilon)` once, then for each query
/// draws an independent `Lap(4*sensitivity/epsilon)` (the sparse-vector
/// family's per-query noise uses `cutoff = 1` for a single above-threshold
/// event) and returns the first index whose noisy value is at or above the
/// noisy threshold.
pub struct AboveThreshold {
    epsilon: f64,
    sensitivity: f64,
    threshold: f64,
    guard: ExhaustionGuard,
}

impl AboveThreshold {
    pub fn new(epsilon: f64, sensitivity: f64, threshold: f64) -> DpResult<Self> {
        if epsilon <= 0.0 {
            return Err(DpError::value("epsilon must be positive"));
        }
        if sensitivity <= 0.0 {
            return Err(DpError::value("sensitivity must be positive"));
        }
        Ok(Self {
            epsilon,
            sensitivity,
            threshold,
            guard: ExhaustionGuard::new(),
        })
    }

    pub fn release(&self, data: Array1<f64>) -> DpResult<usize> {
        self.release_with_rng(data, &mut rand::thread_rng())
    }

    pub fn release_with_rng(&self, data: Array1<f64>, rng: &mut dyn RngCore) -> DpResult<usize> {
        self.guard.consume()?;
        if data.is_empty() {
            return Err(DpError::value("data must be non-empty"));
        }
        let t_hat = noisy_threshold(self.threshold, self.epsilon, self.sensitivity, rng);
        let query_scale = 4.0 * self.sensitivity / self.epsilon;
        debug!(epsilon = self.epsilon, t_hat, "above-threshold release");
        for (i, &q) in data.iter().enumerate() {
            let rho = q + sample_laplace_exact(query_scale, PRECISION, rng);
            if rho >= t_hat {
                info!(index = i, "above-threshold release complete");
                return Ok(i);
            }
        }
        Err(DpError::value(
            "no query in the stream crossed the noisy threshold",
        ))
    }

    /// Releases and, on success, reports `epsilon` into `accountant` under
    /// basic composition. Pass `None` for standalone use.
    pub fn release_with(
        &self,
        data: Array1<f64>,
        accountant: Option<&mut PrivacyAccountant>,
    ) -> DpResult<usize> {
        let result = self.release(data)?;
        privacy_accounting::record(accountant, self.epsilon);
        Ok(result)
    }
}

/// Returns the indices of the first `cutoff` queries in `data` whose noisy
/// values clear a noisy threshold.
pub struct SparseIndicator {
    epsilon: f64,
    sensitivity: f64,
    threshold: f64,
    cutoff: usize,
    guard: ExhaustionGuard,
}

impl SparseIndicator {
    pub fn new(epsilon: f64, sensitivity: f64, threshold: f64, cutoff: usize) -> DpResult<Self> {
        if epsilon <= 0.0 {
            return Err(DpError::value("epsilon must be positive"));
        }
        if sensitivity <= 0.0 {
            return Err(DpError::value("sensitivity must be positive"));
        }
        if cutoff == 0 {
            return Err(DpError::value("cutoff must be positive"));
        }
        Ok(Self {
            epsilon,
            sensitivity,
            threshold,
            cutoff,
            guard: ExhaustionGuard::new(),
        })
    }

    pub fn release(&self, data: Array1<f64>) -> DpResult<Vec<usize>> {
        self.release_with_rng(data, &mut rand::thread_rng())
    }

    pub fn release_with_rng(
        &self,
        data: Array1<f64>,
        rng: &mut dyn RngCore,
    ) -> DpResult<Vec<usize>> {
        self.guard.consume()?;
        let t_hat = noisy_threshold(self.threshold, self.epsilon, self.sensitivity, rng);
        let query_scale = 4.0 * self.cutoff as f64 * self.sensitivity / self.epsilon;
        debug!(epsilon = self.epsilon, cutoff = self.cutoff, t_hat, "sparse-indicator release");

        let mut indices = Vec::with_capacity(self.cutoff);
        for (i, &q) in data.iter().enumerate() {
            let rho = q + sample_laplace_exact(query_scale, PRECISION, rng);
            if rho >= t_hat {
                indices.push(i);
                if indices.len() == self.cutoff {
                    info!(found = indices.len(), "sparse-indicator release complete");
                    return Ok(indices);
                }
            }
        }
        Err(DpError::value(format!(
            "stream contained only {} above-threshold events, fewer than cutoff {}",
            indices.len(),
            self.cutoff
        )))
    }

    /// Releases and, on success, reports `epsilon` into `accountant` under
    /// basic composition. Pass `None` for standalone use.
    pub fn release_with(
        &self,
        data: Array1<f64>,
        accountant: Option<&mut PrivacyAccountant>,
    ) -> DpResult<Vec<usize>> {
        let result = self.release(data)?;
        privacy_accounting::record(accountant, self.epsilon);
        Ok(result)
    }
}

/// Like [`SparseIndicator`], but additionally releases a noisy value for
/// each of the `cutoff` selected indices.
pub struct SparseNumeric {
    epsilon: f64,
    sensitivity: f64,
    threshold: f64,
    cutoff: usize,
    guard: ExhaustionGuard,
}

impl SparseNumeric {
    pub fn new(epsilon: f64, sensitivity: f64, threshold: f64, cutoff: usize) -> DpResult<Self> {
        if epsilon <= 0.0 {
            return Err(DpError::value("epsilon must be positive"));
        }
        if sensitivity <= 0.0 {
            return Err(DpError::value("sensitivity must be positive"));
        }
        if cutoff == 0 {
            return Err(DpError::value("cutoff must be positive"));
        }
        Ok(Self {
            epsilon,
            sensitivity,
            threshold,
            cutoff,
            guard: ExhaustionGuard::new(),
        })
    }

    pub fn release(&self, data: Array1<f64>) -> DpResult<(Vec<usize>, Vec<f64>)> {
        self.release_with_rng(data, &mut rand::thread_rng())
    }

    pub fn release_with_rng(
        &self,
        data: Array1<f64>,
        rng: &mut dyn RngCore,
    ) -> DpResult<(Vec<usize>, Vec<f64>)> {
        self.guard.consume()?;
        let t_hat = noisy_threshold(self.threshold, self.epsilon, self.sensitivity, rng);
        let query_scale = 4.0 * self.cutoff as f64 * self.sensitivity / self.epsilon;
        let value_scale = 2.0 * self.cutoff as f64 * self.sensitivity / self.epsilon;
        debug!(epsilon = self.epsilon, cutoff = self.cutoff, t_hat, "sparse-numeric release");

        let mut indices = Vec::with_capacity(self.cutoff);
        let mut values = Vec::with_capacity(self.cutoff);
        for (i, &q) in data.iter().enumerate() {
            let rho = q + sample_laplace_exact(query_scale, PRECISION, rng);
            if rho >= t_hat {
                indices.push(i);
                values.push(q + sample_laplace_exact(value_scale, PRECISION, rng));
                if indices.len() == self.cutoff {
                    info!(found = indices.len(), "sparse-numeric release complete");
                    return Ok((indices, values));
                }
            }
        }
        Err(DpError::value(format!(
            "stream contained only {} above-threshold events, fewer than cutoff {}",
            indices.len(),
            self.cutoff
        )))
    }

    /// Releases and, on success, reports `epsilon` into `accountant` under
    /// basic composition. Pass `None` for standalone use.
    pub fn release_with(
        &self,
        data: Array1<f64>,
        accountant: Option<&mut PrivacyAccountant>,
    ) -> DpResult<(Vec<usize>, Vec<f64>)> {
        let result = self.release(data)?;
        privacy_accounting::record(accountant, self.epsilon);
        Ok(result)
    }
}
