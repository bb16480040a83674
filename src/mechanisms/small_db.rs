// src/mechanisms/small_db.rs

use ndarray::{Array1, Array2, Axis};
use rand::{Rng, RngCore};
use rayon::prelude::*;
use tracing::{debug, info};

use crate::error::{DpError, DpResult};
use crate::exhaustion::ExhaustionGuard;
use crate::privacy_accounting::{self, PrivacyAccountant};

const CANDIDATE_MOVES_PER_STEP: usize = 16;

/// Synthesizes a small histogram that answers a batch of linear queries
/// almost as well as the true histogram (Blum, Ligett & Roth 2008).
///
/// The synthetic database has a bounded total mass — `m / alpha^2 + 1`
/// where `m` is the number of queries — which keeps the candidate space
/// (and therefore the sampling cost of the underlying exponential
/// mechanism) independent of the true dataset's size. Exact enumeration of
/// every candidate of that mass is exponential in the domain size, so this
/// samples the exponential mechanism's target distribution with a
/// Metropolis-Hastings walk over single-unit moves instead, scoring each
/// step's candidate moves in parallel.
pub struct SmallDb {
    epsilon: f64,
    alpha: f64,
    data: Array1<i64>,
    guard: ExhaustionGuard,
}

impl SmallDb {
    pub fn new(epsilon: f64, data: Array1<i64>, alpha: f64) -> DpResult<Self> {
        if epsilon <= 0.0 {
            return Err(DpError::value("epsilon must be positive"));
        }
        if data.iter().any(|&x| x < 0) {
            return Err(DpError::value("data must be non-negative"));
        }
        if data.sum() <= 0 {
            return Err(DpError::value("data must contain positive mass"));
        }
        if !(0.0 < alpha && alpha < 1.0) {
            return Err(DpError::value("alpha must lie in (0, 1)"));
        }
        Ok(Self {
            epsilon,
            alpha,
            data,
            guard: ExhaustionGuard::new(),
        })
    }

    /// The accuracy guarantee a release satisfies with probability `1 -
    /// beta`: every query's answer on the synthetic database is within
    /// `error_bound` of its answer on the true database, expressed as a
    /// fraction of the true dataset's total mass.
    pub fn error_bound(&self, num_queries: usize, beta: f64) -> f64 {
        let domain_size = self.data.len() as f64;
        let x = domain_size.ln() * (num_queries as f64).ln() / (self.alpha * self.alpha)
            + (1.0 / beta).ln();
        self.alpha + 2.0 * x / (self.epsilon * self.data.sum() as f64)
    }

    pub fn release(&self, queries: Array2<f64>) -> DpResult<Array1<i64>> {
        self.release_with_rng(queries, &mut rand::thread_rng())
    }

    pub fn release_with_rng(
        &self,
        queries: Array2<f64>,
        rng: &mut dyn RngCore,
    ) -> DpResult<Array1<i64>> {
        self.guard.consume()?;

        if queries.iter().any(|&q| !(0.0..=1.0).contains(&q)) {
            return Err(DpError::value("query entries must lie in [0, 1]"));
        }
        if queries.len_of(Axis(1)) != self.data.len() {
            return Err(DpError::value(
                "each query's width must match the domain size",
            ));
        }

        let domain_size = self.data.len();
        let num_queries = queries.len_of(Axis(0));
        let mass = (num_queries as f64 / (self.alpha * self.alpha)).floor() as i64 + 1;
        let total = self.data.sum() as f64;
        let p_true = self.data.mapv(|x| x as f64 / total);

        debug!(
            epsilon = self.epsilon,
            domain_size, num_queries, mass, "small-db release"
        );

        let mut candidate = initial_candidate(domain_size, mass);
        let steps = (domain_size as u64 * 50).max(2_000);
        let step_epsilon = self.epsilon / steps as f64;

        for _ in 0..steps {
            let proposals: Vec<(usize, usize)> = (0..CANDIDATE_MOVES_PER_STEP)
                .filter_map(|_| {
                    let from = rng.gen_range(0..domain_size);
                    let to = rng.gen_range(0..domain_size);
                    (candidate[from] > 0 && from != to).then_some((from, to))
                })
                .collect();
            if proposals.is_empty() {
                continue;
            }

            let scores: Vec<f64> = proposals
                .par_iter()
                .map(|&(from, to)| {
                    let mut moved = candidate.clone();
                    moved[from] -= 1;
                    moved[to] += 1;
                    -max_error(&p_true, &queries, &moved, mass as f64)
                })
                .collect();

            let best = scores.iter().cloned().fold(f64::NEG_INFINITY, f64::max);
            let weights: Vec<f64> = scores
                .iter()
                .map(|&s| (step_epsilon * (s - best) * total / 2.0).exp())
                .collect();
            let chosen = weighted_choice(&weights, rng);
            let (from, to) = proposals[chosen];
            candidate[from] -= 1;
            candidate[to] += 1;
        }

        info!(mass = candidate.sum(), "small-db release complete");
        Ok(candidate)
    }

    /// Releases and, on success, reports `epsilon` into `accountant` under
    /// basic composition. Pass `None` for standalone use.
    pub fn release_with(
        &self,
        queries: Array2<f64>,
        accountant: Option<&mut PrivacyAccountant>,
    ) -> DpResult<Array1<i64>> {
        let result = self.release(queries)?;
        privacy_accounting::record(accountant, self.epsilon);
        Ok(result)
    }
}

fn initial_candidate(domain_size: usize, mass: i64) -> Array1<i64> {
    let mut candidate = Array1::zeros(domain_size);
    let base = mass / domain_size as i64;
    let remainder = (mass % domain_size as i64) as usize;
    candidate.fill(base);
    for i in 0..remainder {
        candidate[i] += 1;
    }
    candidate
}

fn max_error(p_true: &Array1<f64>, queries: &Array2<f64>, candidate: &Array1<i64>, mass: f64) -> f64 {
    let q_synth = candidate.mapv(|c| c as f64 / mass);
    queries
        .axis_iter(Axis(0))
        .map(|row| (row.dot(p_true) - row.dot(&q_synth)).abs())
        .fold(0.0, f64::max)
}

fn weighted_choice(weights: &[f64], rng: &mut dyn RngCore) -> usize {
    let total: f64 = weights.iter().sum();
    if total <= 0.0 {
        return 0;
    }
    let mut draw = rng.gen::<f64>() * total;
    for (i, &w) in weights.iter().enumerate() {
        if draw < w {
            return i;
        }
        draw -= w;
    }
    weights.len() - 1
}
