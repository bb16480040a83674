// src/mechanisms/report_noisy_max.rs

use ndarray::Array1;
use rand::RngCore;
use tracing::{debug, info};

use crate::error::{DpError, DpResult};
use crate::exact::sample_laplace_exact;
use crate::exhaustion::ExhaustionGuard;
use crate::privacy_accounting::{self, PrivacyAccountant};

/// Reports the index of the noisy maximum of a numeric vector.
///
/// Adds independent `Laplace(sensitivity / epsilon)` noise (drawn with the
/// exact sampler at `precision` bits) to every entry and returns the argmax
/// index. Equivalent in distribution to the exponential mechanism with
/// utility `u(D, i) = D[i]` and the Gumbel-trick sampling method, but
/// computed directly.
pub struct ReportNoisyMax {
    epsilon: f64,
    precision: u32,
    guard: ExhaustionGuard,
}

impl ReportNoisyMax {
    pub fn new(epsilon: f64, precision: u32) -> DpResult<Self> {
        if epsilon <= 0.0 {
            return Err(DpError::value("epsilon must be positive"));
        }
        if precision == 0 {
            return Err(DpError::value("precision must be positive"));
        }
        Ok(Self {
            epsilon,
            precision,
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
        let scale = 1.0 / self.epsilon;
        debug!(epsilon = self.epsilon, len = data.len(), "report-noisy-max release");
        let index = data
            .iter()
            .map(|&x| x + sample_laplace_exact(scale, self.precision, rng))
            .enumerate()
            .max_by(|a, b| a.1.partial_cmp(&b.1).expect("noisy scores are never NaN"))
            .map(|(i, _)| i)
            .expect("data is non-empty");
        info!(index, "report-noisy-max release complete");
        Ok(index)
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
