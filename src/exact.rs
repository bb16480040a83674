// src/exact.rs

//! Exact-arithmetic noise primitives.
//!
//! A naive Laplace draw of the form `-(scale) * uniform().ln()` leaks bits of
//! the private value through the limited precision of `f64`'s mantissa
//! (Mironov, "On Significance of the Least Significant Bits for Differential
//! Privacy", CCS 2012). Every sampler in this module instead works over
//! [`BigRational`] until the single, unavoidable conversion to `f64` at the
//! very end, and never calls `ln`/`exp` on a float.
//!
//! The construction follows the exact-sampling literature for discrete
//! Laplace/geometric noise (Canonne, Kamath & Steinke, "The Discrete
//! Gaussian for Differential Privacy", NeurIPS 2020, Algorithms 1-2): an
//! exact Bernoulli(exp(-γ)) primitive built from von Neumann's trick, a
//! geometric sampler built from it whose expected number of Bernoulli draws
//! does not grow with the scale, and a continuous Laplace obtained by
//! dithering a discrete Laplace on a `2^-precision` grid with a uniform
//! sub-grid offset.

use num_bigint::{BigInt, BigUint, RandBigInt};
use num_rational::BigRational;
use num_traits::{One, ToPrimitive, Zero};
use rand::RngCore;

fn uniform_below(bound: &BigUint, rng: &mut dyn RngCore) -> BigUint {
    rng.gen_biguint_below(bound)
}

/// Exact Bernoulli(`p`) for a rational `p` in `[0, 1]`.
fn sample_bernoulli(p: &BigRational, rng: &mut dyn RngCore) -> bool {
    if p.is_zero() {
        return false;
    }
    if *p >= BigRational::one() {
        return true;
    }
    let den = p.denom().to_biguint().expect("rational has positive denominator");
    let num = p.numer().to_biguint().expect("bernoulli probability is non-negative");
    uniform_below(&den, rng) < num
}

/// Exact Bernoulli(exp(-γ)) for a rational `γ` in `[0, 1]`, via von Neumann's
/// algorithm: draw `A_k ~ Bernoulli(γ / k)` for `k = 1, 2, ...` until one
/// fails; the result is true iff the failing index is odd.
fn sample_bernoulli_exp_le1(gamma: &BigRational, rng: &mut dyn RngCore) -> bool {
    let mut k = BigUint::one();
    loop {
        let trial = gamma / BigRational::from_integer(BigInt::from(k.clone()));
        if !sample_bernoulli(&trial, rng) {
            return (&k % BigUint::from(2u8)) == BigUint::one();
        }
        k += BigUint::one();
    }
}

/// Exact Bernoulli(exp(-γ)) for any non-negative rational `γ`, by splitting
/// off unit-sized chunks (each an independent Bernoulli(exp(-1)) trial) and
/// finishing with the fractional remainder.
fn sample_bernoulli_exp(gamma: &BigRational, rng: &mut dyn RngCore) -> bool {
    let one = BigRational::one();
    let mut remaining = gamma.clone();
    while remaining > one {
        if !sample_bernoulli_exp_le1(&one, rng) {
            return false;
        }
        remaining -= &one;
    }
    sample_bernoulli_exp_le1(&remaining, rng)
}

/// Exact sample from the one-sided geometric-like distribution with
/// `Pr[Y = y] = (1 - exp(-1/t)) * exp(-y/t)` for `y = 0, 1, 2, ...`, where
/// `t = t_num / t_den` is a positive rational "scale in ticks". Expected
/// number of Bernoulli draws is O(1) and does not grow with `t`.
fn sample_geometric(t: &BigRational, rng: &mut dyn RngCore) -> BigUint {
    let t_num = t.numer().to_biguint().expect("scale is positive");
    let t_den = t.denom().to_biguint().expect("scale has positive denominator");
    assert!(!t_num.is_zero(), "geometric scale must be positive");
    loop {
        let u = uniform_below(&t_num, rng);
        let frac = BigRational::new(BigInt::from(u.clone()), BigInt::from(t_num.clone()));
        if !sample_bernoulli_exp(&frac, rng) {
            continue;
        }
        let mut v = BigUint::zero();
        while sample_bernoulli_exp(&BigRational::one(), rng) {
            v += BigUint::one();
        }
        let val = &v * &t_num + &u;
        let remainder = &val % &t_den;
        if remainder.is_zero() {
            return val / &t_den;
        }
        // Reject and restart; this keeps the distribution exact.
    }
}

/// One sample from `Geom(1 - e^-epsilon)`, support `{1, 2, ...}`, as used by
/// the two-sided geometric mechanism.
fn sample_shifted_geometric(epsilon: f64, rng: &mut dyn RngCore) -> BigUint {
    let t = BigRational::from_float(1.0 / epsilon).expect("epsilon is finite and positive");
    sample_geometric(&t, rng) + BigUint::one()
}

/// Draws `Z = X - Y` with `X, Y ~ Geom(1 - e^-epsilon)` independently,
/// support `{1, 2, ...}` each, entirely in exact integer arithmetic.
pub(crate) fn sample_two_sided_geometric(epsilon: f64, rng: &mut dyn RngCore) -> i64 {
    let x = sample_shifted_geometric(epsilon, rng);
    let y = sample_shifted_geometric(epsilon, rng);
    let z = BigInt::from(x) - BigInt::from(y);
    z.to_i64()
        .expect("two-sided geometric draw fits in i64 for realistic epsilon")
}

/// Draws one Laplace(0, `scale`) variate, exact up to a `2^-precision` grid:
/// a discrete two-sided Laplace on the grid is sampled exactly via
/// [`sample_geometric`], then dithered with a uniform offset within the grid
/// cell. The only floating-point operation is the final conversion.
pub(crate) fn sample_laplace_exact(scale: f64, precision: u32, rng: &mut dyn RngCore) -> f64 {
    assert!(scale > 0.0, "laplace scale must be positive");
    let grid_cells = BigUint::from(2u8).pow(precision);
    let delta = BigRational::new(BigInt::one(), BigInt::from(grid_cells.clone()));
    let scale_r = BigRational::from_float(scale).expect("scale is finite");
    let ticks = &scale_r / &delta;

    // Two-sided discrete Laplace: draw a magnitude and an independent sign
    // bit, rejecting the (magnitude = 0, negative sign) combination so zero
    // is not double-counted.
    let (sign_is_positive, magnitude) = loop {
        let m = sample_geometric(&ticks, rng);
        let positive = rng.next_u32() & 1 == 1;
        if m.is_zero() && !positive {
            continue;
        }
        break (positive, m);
    };

    let jitter_num = uniform_below(&grid_cells, rng);
    let jitter = BigRational::new(BigInt::from(jitter_num), BigInt::from(grid_cells));

    let signed_magnitude = if sign_is_positive {
        BigRational::from_integer(BigInt::from(magnitude)) + &jitter
    } else {
        -(BigRational::from_integer(BigInt::from(magnitude)) + &jitter)
    };

    let value = signed_magnitude * &delta;
    value.to_f64().unwrap_or(0.0)
}
