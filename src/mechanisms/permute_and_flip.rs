// src/mechanisms/permute_and_flip.rs

use ndarray::Array1;
use rand::seq::SliceRandom;
use rand::{Rng, RngCore};
use tracing::{debug, info};

use crate::error::{DpError, DpResult};
use crate::exhaustion::ExhaustionGuard;
use crate::mechanisms::exponential::Utility;
use crate::privacy_accounting::{self, PrivacyAccountant};

/// Permute-and-Flip selection (McKenna & Sheldon, NeurIPS 2020).
///
/// Strictly dominates the exponential mechanism's error guarantee while
/// sampling from the same distribution: shuffle the candidates, walk the
/// permutation, and accept the first one whose Bernoulli flip succeeds.
pub struct PermuteAndFlipMechanism {
    epsilon: f64,
    sensitivity: f64,
    utility: Box<dyn Utility>,
    output_range: Array1<f64>,
    guard: ExhaustionGuard,
}

impl PermuteAndFlipMechanism {
    pub fn new(
        epsilon: f64,
        utility: Box<dyn Utility>,
        sensitivity: f64,
        output_range: Array1<f64>,
    ) -> DpResult<Self> {
        if epsilon <= 0.0 {
            return Err(DpError::value("epsilon must be positive"));
        }
        if sensitivity <= 0.0 {
            return Err(DpError::value("sensitivity must be positive"));
        }
        if output_range.is_empty() {
            return Err(DpError::value("output_range must be non-empty"));
        }
        Ok(Self {
            epsilon,
            sensitivity,
            utility,
            output_range,
            guard: ExhaustionGuard::new(),
        })
    }

    pub fn release(&self, data: Array1<f64>) -> DpResult<f64> {
        self.release_with_rng(data, &mut rand::thread_rng())
    }

    pub fn release_with_rng(&self, data: Array1<f64>, rng: &mut dyn RngCore) -> DpResult<f64> {
        self.guard.consume()?;
        let scores = self.utility.score(&data);
        let max = scores.iter().cloned().fold(f64::NEG_INFINITY, f64::max);

        let mut order: Vec<usize> = (0..scores.len()).collect();
        order.shuffle(rng);

        debug!(epsilon = self.epsilon, k = scores.len(), "permute-and-flip release");

        for &index in &order {
            let accept_prob = (self.epsilon * (scores[index] - max) / (2.0 * self.sensitivity))
                .exp()
                .clamp(0.0, 1.0);
            if rng.gen::<f64>() < accept_prob {
                let result = self.output_range[index];
                info!(index, result, "permute-and-flip release complete");
                return Ok(result);
            }
        }

        // Terminates with probability 1 in theory (the top-scoring element
        // always accepts); this is a defensive fallback against `f64`
        // underflow on the acceptance probability, never exact-arithmetic
        // floor division.
        let fallback = *order.last().expect("output_range is non-empty");
        let result = self.output_range[fallback];
        info!(index = fallback, result, "permute-and-flip release fell back to last candidate");
        Ok(result)
    }

    /// Releases and, on success, reports `epsilon` into `accountant` under
    /// basic composition. Pass `None` for standalone use.
    pub fn release_with(
        &self,
        data: Array1<f64>,
        accountant: Option<&mut PrivacyAccountant>,
    ) -> DpResult<f64> {
        let result = self.release(data)?;
        privacy_accounting::record(accountant, self.epsilon);
        Ok(result)
    }
}
