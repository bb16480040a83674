// src/mechanisms/snapping.rs

use ndarray::Array1;
use rand::RngCore;
use tracing::{debug, info};

use crate::error::{DpError, DpResult};
use crate::exact::sample_laplace_exact;
use crate::exhaustion::ExhaustionGuard;
use crate::privacy_accounting::{self, PrivacyAccountant};

/// Resolution, in bits after the binary point, used for the exact Laplace
/// draw that feeds the snapping mechanism's noise step.
const SNAPPING_PRECISION: u32 = 35;

/// Mironov's snapping mechanism (2012).
///
/// For every element: clamps to `[-bound, bound]`, adds Laplace noise at a
/// clamping-corrected `epsilon'`, snaps the result onto a power-of-two
/// lattice coarse enough to defeat floating-point reconstruction, then
/// re-clamps. The lattice granularity is the smallest power of two not
/// smaller than `bound`, scaled down by the machine epsilon of `f64`, so
/// the snap always lands on a representable grid point covering the whole
/// output range.
pub struct SnappingMechanism {
    epsilon: f64,
    bound: f64,
    guard: ExhaustionGuard,
}

impl SnappingMechanism {
    pub fn new(epsilon: f64, bound: f64) -> DpResult<Self> {
        if epsilon <= 0.0 {
            return Err(DpError::value("epsilon must be positive"));
        }
        if bound <= 0.0 {
            return Err(DpError::value("bound must be positive"));
        }
        Ok(Self {
            epsilon,
            bound,
            guard: ExhaustionGuard::new(),
        })
    }

    pub fn release(&self, data: Array1<f64>) -> DpResult<Array1<f64>> {
        self.release_with_rng(data, &mut rand::thread_rng())
    }

    pub fn release_with_rng(
        &self,
        data: Array1<f64>,
        rng: &mut dyn RngCore,
    ) -> DpResult<Array1<f64>> {
        self.guard.consume()?;

        // The clamping and snapping steps each cost a bounded sliver of the
        // privacy budget; correct epsilon downward so the overall release
        // stays epsilon-DP (Mironov 2012, Theorem 1).
        let lambda = self.lattice_granularity();
        let corrected_epsilon = self.epsilon / (1.0 + 2.0 * lambda * self.bound);
        let scale = 1.0 / corrected_epsilon;

        debug!(
            epsilon = self.epsilon,
            corrected_epsilon,
            bound = self.bound,
            len = data.len(),
            "snapping release"
        );

        let result = data.mapv(|value| {
            let clamped = value.clamp(-self.bound, self.bound);
            let noisy = clamped + sample_laplace_exact(scale, SNAPPING_PRECISION, rng);
            self.snap(noisy, lambda).clamp(-self.bound, self.bound)
        });

        info!(len = result.len(), "snapping release complete");
        Ok(result)
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

    /// Smallest power of two not smaller than `bound`, used as the lattice
    /// spacing's reference scale.
    fn lattice_granularity(&self) -> f64 {
        2f64.powi(self.bound.max(1.0).log2().ceil() as i32) * f64::EPSILON
    }

    fn snap(&self, x: f64, lambda: f64) -> f64 {
        if lambda <= 0.0 {
            return x;
        }
        (x / lambda).round() * lambda
    }
}
