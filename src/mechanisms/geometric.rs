// src/mechanisms/geometric.rs

use ndarray::Array1;
use rand::RngCore;
use tracing::{debug, info};

use crate::error::{DpError, DpResult};
use crate::exact::sample_two_sided_geometric;
use crate::exhaustion::ExhaustionGuard;
use crate::privacy_accounting::{self, PrivacyAccountant};

/// Integer analog of the Laplace mechanism for integer-valued datasets.
///
/// Each element receives an independent two-sided geometric variate
/// `Z = X - Y` with `X, Y ~ Geom(1 - e^-epsilon)`, support `{1, 2, ...}`.
/// All arithmetic is exact integer arithmetic; no floating point is
/// involved anywhere in the noise draw.
pub struct GeometricMechanism {
    epsilon: f64,
    sensitivity: f64,
    guard: ExhaustionGuard,
}

impl GeometricMechanism {
    pub fn new(epsilon: f64, sensitivity: f64) -> DpResult<Self> {
        if epsilon <= 0.0 {
            return Err(DpError::value("epsilon must be positive"));
        }
        if sensitivity <= 0.0 {
            return Err(DpError::value("sensitivity must be positive"));
        }
        Ok(Self {
            epsilon,
            sensitivity,
            guard: ExhaustionGuard::new(),
        })
    }

    pub fn release(&self, data: Array1<i64>) -> DpResult<Array1<i64>> {
        self.release_with_rng(data, &mut rand::thread_rng())
    }

    pub fn release_with_rng(
        &self,
        data: Array1<i64>,
        rng: &mut dyn RngCore,
    ) -> DpResult<Array1<i64>> {
        self.guard.consume()?;
        // Sensitivity only ever scales the effective epsilon for the
        // geometric mechanism, since the distribution's support is already
        // integer; a sensitivity > 1 is folded into the per-step budget.
        let effective_epsilon = self.epsilon / self.sensitivity;
        debug!(epsilon = self.epsilon, len = data.len(), "geometric release");
        let noisy = data.mapv(|x| x + sample_two_sided_geometric(effective_epsilon, rng));
        info!(len = noisy.len(), "geometric release complete");
        Ok(noisy)
    }

    /// Releases and, on success, reports `epsilon` into `accountant` under
    /// basic composition. Pass `None` for standalone use.
    pub fn release_with(
        &self,
        data: Array1<i64>,
        accountant: Option<&mut PrivacyAccountant>,
    ) -> DpResult<Array1<i64>> {
        let result = self.release(data)?;
        privacy_accounting::record(accountant, self.epsilon);
        Ok(result)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::arr1;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    #[test]
    fn rejects_non_positive_epsilon() {
        assert!(GeometricMechanism::new(0.0, 1.0).is_err());
    }

    #[test]
    fn release_preserves_length_and_integer_type() {
        let mechanism = GeometricMechanism::new(1.0, 1.0).unwrap();
        let mut rng = StdRng::seed_from_u64(3);
        let out = mechanism
            .release_with_rng(arr1(&[0, 0, 0]), &mut rng)
            .unwrap();
        assert_eq!(out.len(), 3);
    }

    #[test]
    fn second_release_is_exhausted() {
        let mechanism = GeometricMechanism::new(1.0, 1.0).unwrap();
        let mut rng = StdRng::seed_from_u64(3);
        mechanism
            .release_with_rng(arr1(&[0, 0, 0]), &mut rng)
            .unwrap();
        assert_eq!(
            mechanism.release_with_rng(arr1(&[0, 0, 0]), &mut rng),
            Err(DpError::Exhausted)
        );
    }

    #[test]
    fn release_with_reports_epsilon_into_the_accountant() {
        let mechanism = GeometricMechanism::new(0.5, 1.0).unwrap();
        let mut accountant = PrivacyAccountant::new();
        mechanism
            .release_with(arr1(&[0, 0, 0]), Some(&mut accountant))
            .unwrap();
        assert_eq!(accountant.total(), (0.5, 0.0));
    }
}
