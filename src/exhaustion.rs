// src/exhaustion.rs

use std::sync::atomic::{AtomicBool, Ordering};

use crate::error::DpError;

/// Enforces the one-release-per-mechanism invariant.
///
/// Every mechanism embeds one of these and calls [`ExhaustionGuard::consume`]
/// as the *first* thing it does in `release`, before any argument
/// validation. That ordering is deliberate: a failed release must still burn
/// the budget, otherwise a caller could probe validation errors for free
/// samples (see the crate's error handling design notes).
#[derive(Debug, Default)]
pub(crate) struct ExhaustionGuard(AtomicBool);

impl ExhaustionGuard {
    pub(crate) fn new() -> Self {
        Self(AtomicBool::new(false))
    }

    /// Atomically marks the mechanism exhausted. Returns `Err` if it already
    /// was, `Ok` on the first call.
    pub(crate) fn consume(&self) -> Result<(), DpError> {
        if self.0.swap(true, Ordering::SeqCst) {
            Err(DpError::Exhausted)
        } else {
            Ok(())
        }
    }

    #[allow(dead_code)]
    pub(crate) fn is_exhausted(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}
