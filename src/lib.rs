// src/lib.rs

//! Exact-arithmetic differential privacy release mechanisms.
//!
//! Each mechanism in [`mechanisms`] samples from its noise distribution
//! using the rational/big-integer primitives in [`exact`] rather than
//! floating-point inverse-CDF sampling, so releases are not vulnerable to
//! the floating-point reconstruction attacks described by Mironov (2012).
//! Every mechanism releases at most once per instance; see
//! [`exhaustion::ExhaustionGuard`].

pub mod error;
pub mod exact;
pub mod exhaustion;
pub mod mechanisms;
pub mod privacy_accounting;

pub use error::{DpError, DpResult};
