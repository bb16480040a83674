// src/mechanisms/mod.rs

//! Differential privacy release mechanisms.
//!
//! Every mechanism here follows the same shape: a constructor that validates
//! its parameters once, a `release` that draws from the system RNG, and a
//! `release_with_rng` that takes an injectable `&mut dyn RngCore` for
//! deterministic testing. Each mechanism releases at most once; a second
//! call returns [`crate::error::DpError::Exhausted`].

pub mod exponential;
pub mod geometric;
pub mod laplace;
pub mod permute_and_flip;
pub mod pmw;
pub mod report_noisy_max;
pub mod small_db;
pub mod snapping;
pub mod sparse_vector;

pub use exponential::{ExponentialMechanism, ExponentialMethod, Utility};
pub use geometric::GeometricMechanism;
pub use laplace::LaplaceMechanism;
pub use permute_and_flip::PermuteAndFlipMechanism;
pub use pmw::PrivateMultiplicativeWeights;
pub use report_noisy_max::ReportNoisyMax;
pub use small_db::SmallDb;
pub use snapping::SnappingMechanism;
pub use sparse_vector::{AboveThreshold, SparseIndicator, SparseNumeric};
