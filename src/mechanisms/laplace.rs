// src/mechanisms/laplace.rs

use ndarray::Array1;
use rand::RngCore;
use tracing::{debug, info};

use crate::error::{DpError, DpResult};
use crate::exact::sample_laplace_exact;
use crate::exhaustion::ExhaustionGuard;
use crate::privacy_accounting::{self, PrivacyAccountant};

/// Default precision, in bits after the binary point, for exact Laplace
/// sampling.
pub const DEFAULT_PRECISION: u32 = 35;

/// Adds exact-arithmetic Laplace noise to every element of a dataset.
///
/// Calibrated to `sensitivity / epsilon`, the noise is drawn at
/// `2^-precision` resolution using [`crate::exact::sample_laplace_exact`]
/// rather than `-scale * uniform().ln()`, so it does not leak bits of the
/// true value through `f64`'s mantissa.
///
/// # Examples
///
/// ```rust
/// use dp_mechanisms::mechanisms::LaplaceMechanism;
/// use ndarray::arr1;
///
/// let mechanism = LaplaceMechanism::new(0.5, 1.0, 35).unwrap();
/// let noisy = mechanism.release(arr1(&[100.0])).unwrap();
/// assert_eq!(noisy.len(), 1);
/// ```
pub struct LaplaceMechanism {
    epsilon: f64,
    sensitivity: f64,
    precision: u32,
    guard: ExhaustionGuard,
}

impl LaplaceMechanism {
    pub fn new(epsilon: f64, sensitivity: f64, precision: u32) -> DpResult<Self> {
        if epsilon <= 0.0 {
            return Err(DpError::value("epsilon must be positive"));
        }
        if sensitivity <= 0.0 {
            return Err(DpError::value("sensitivity must be positive"));
        }
        if precision == 0 {
            return Err(DpError::value("precision must be positive"));
        }
        Ok(Self {
            epsilon,
            sensitivity,
            precision,
            guard: ExhaustionGuard::new(),
        })
    }

    /// Releases using the thread-local cryptographic RNG. Calling this a
    /// second time on the same instance fails with [`DpError::Exhausted`].
    pub fn release(&self, data: Array1<f64>) -> DpResult<Array1<f64>> {
        self.release_with_rng(data, &mut rand::thread_rng())
    }

    /// Releases using a caller-supplied RNG, for reproducible testing.
    pub fn release_with_rng(
        &self,
        data: Array1<f64>,
        rng: &mut dyn RngCore,
    ) -> DpResult<Array1<f64>> {
        self.guard.consume()?;
        let scale = self.sensitivity / self.epsilon;
        debug!(epsilon = self.epsilon, scale, len = data.len(), "laplace release");
        let noisy = data.mapv(|x| x + sample_laplace_exact(scale, self.precision, rng));
        info!(len = noisy.len(), "laplace release complete");
        Ok(noisy)
    }

    /// Releases and, on success, reports `epsilon` into `accountant` under
    /// basic composition. Pass `None` for standalone use.
    pub fn release_with(
        &self,
        data: Array1<f64>,
        accountant: Option<&mut PrivacyAccountant>,
    ) -> DpResult<Array1<f64>> {
        let result = self.release(data)?;
        privacy_accounting::record(accountant, self.epsilon);
        Ok(result)
    }
}
