// src/mechanisms/exponential.rs

use ndarray::Array1;
use rand::distributions::{Distribution, WeightedIndex};
use rand::{Rng, RngCore};
use rand_distr::Gumbel;
use tracing::{debug, info};

use crate::error::{DpError, DpResult};
use crate::exhaustion::ExhaustionGuard;
use crate::privacy_accounting::{self, PrivacyAccountant};

/// A capability that scores every candidate output for a given dataset.
///
/// The mechanism never inspects a `Utility`'s internals, mirroring the
/// source system's free-form callable: only `score` is invoked, once per
/// release, and the caller is responsible for declaring the correct
/// sensitivity bound at the mechanism's construction.
pub trait Utility {
    /// Returns one score per candidate in the mechanism's output range,
    /// aligned by index.
    fn score(&self, dataset: &Array1<f64>) -> Array1<f64>;
}

impl<F> Utility for F
where
    F: Fn(&Array1<f64>) -> Array1<f64>,
{
    fn score(&self, dataset: &Array1<f64>) -> Array1<f64> {
        self(dataset)
    }
}

/// The three interchangeable sampling strategies for the exponential
/// mechanism. Modeled as a closed tagged variant rather than a string
/// switch since the set of strategies is fixed and the dispatch is static.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExponentialMethod {
    /// Compute normalized weights directly and sample from them.
    /// O(k) time, O(k) memory.
    WeightedIndex,
    /// Add Gumbel(0,1) noise to each score and take the argmax.
    /// O(k) time, O(1) memory.
    GumbelTrick,
    /// Propose uniformly and accept/reject; no floating-point summation
    /// over the whole output range, at the cost of unbounded worst-case
    /// time. Used where summation-free auditability matters.
    SampleAndFlip,
}

/// Samples an output `ω` from a finite range with probability proportional
/// to `exp(epsilon * u(D, ω) / (2 * sensitivity))` (McSherry & Talwar 2007).
pub struct ExponentialMechanism {
    epsilon: f64,
    sensitivity: f64,
    utility: Box<dyn Utility>,
    output_range: Array1<f64>,
    method: ExponentialMethod,
    guard: ExhaustionGuard,
}

impl ExponentialMechanism {
    pub fn new(
        epsilon: f64,
        utility: Box<dyn Utility>,
        sensitivity: f64,
        output_range: Array1<f64>,
        method: ExponentialMethod,
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
            method,
            guard: ExhaustionGuard::new(),
        })
    }

    pub fn release(&self, data: Array1<f64>) -> DpResult<f64> {
        self.release_with_rng(data, &mut rand::thread_rng())
    }

    pub fn release_with_rng(&self, data: Array1<f64>, rng: &mut dyn RngCore) -> DpResult<f64> {
        self.guard.consume()?;
        let scores = self.utility.score(&data);
        debug!(epsilon = self.epsilon, k = self.output_range.len(), method = ?self.method, "exponential release");
        let index = match self.method {
            ExponentialMethod::WeightedIndex => self.sample_weighted_index(&scores, rng),
            ExponentialMethod::GumbelTrick => self.sample_gumbel_trick(&scores, rng),
            ExponentialMethod::SampleAndFlip => self.sample_and_flip(&scores, rng),
        };
        let result = self.output_range[index];
        info!(index, result, "exponential release complete");
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

    fn scaled_scores(&self, scores: &Array1<f64>) -> Array1<f64> {
        scores.mapv(|u| self.epsilon * u / (2.0 * self.sensitivity))
    }

    fn sample_weighted_index(&self, scores: &Array1<f64>, rng: &mut dyn RngCore) -> usize {
        let scaled = self.scaled_scores(scores);
        let max = scaled.iter().cloned().fold(f64::NEG_INFINITY, f64::max);
        let weights: Vec<f64> = scaled.iter().map(|&s| (s - max).exp()).collect();
        let dist = WeightedIndex::new(&weights).expect("at least one positive weight");
        dist.sample(rng)
    }

    fn sample_gumbel_trick(&self, scores: &Array1<f64>, rng: &mut dyn RngCore) -> usize {
        let scaled = self.scaled_scores(scores);
        let gumbel = Gumbel::new(0.0, 1.0).expect("gumbel(0,1) parameters are valid");
        scaled
            .iter()
            .map(|&s| s + gumbel.sample(rng))
            .enumerate()
            .max_by(|a, b| a.1.partial_cmp(&b.1).expect("scores are never NaN"))
            .map(|(i, _)| i)
            .expect("output_range is non-empty")
    }

    fn sample_and_flip(&self, scores: &Array1<f64>, rng: &mut dyn RngCore) -> usize {
        let scaled = self.scaled_scores(scores);
        let max = scaled.iter().cloned().fold(f64::NEG_INFINITY, f64::max);
        let k = scaled.len();
        loop {
            let candidate = rng.gen_range(0..k);
            let accept_prob = (scaled[candidate] - max).exp();
            if rng.gen::<f64>() < accept_prob {
                return candidate;
            }
        }
    }
}
