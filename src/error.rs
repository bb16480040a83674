// src/error.rs

use thiserror::Error;

/// Errors raised by mechanism constructors and releases.
///
/// The three variants mirror the three error kinds a caller can trigger: a
/// wrong element type at the (dynamically typed) construction boundary, an
/// out-of-range value, or a second release on an already-exhausted
/// mechanism. None of these are caught internally; they are raised at the
/// point of offense and propagated with `?`.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum DpError {
    /// The caller supplied a value of the wrong element type. Only reachable
    /// through the `*_from_dyn` constructors; the statically typed
    /// constructors make most type mistakes unrepresentable.
    #[error("type error: {0}")]
    Type(String),

    /// A parameter is out of its valid range (e.g. `alpha` outside `(0, 1)`,
    /// a negative histogram entry, a non-positive `num_queries`).
    #[error("value error: {0}")]
    Value(String),

    /// The mechanism already released once and is exhausted.
    #[error("runtime error: mechanism is exhausted and cannot release again")]
    Exhausted,
}

/// Convenience alias used throughout the crate.
pub type DpResult<T> = Result<T, DpError>;

impl DpError {
    pub(crate) fn value(msg: impl Into<String>) -> Self {
        Self::Value(msg.into())
    }

    pub(crate) fn type_error(msg: impl Into<String>) -> Self {
        Self::Type(msg.into())
    }
}
