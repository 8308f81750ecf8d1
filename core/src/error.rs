//! Error type shared by all fallible filter operations.
//!
//! Errors are returned by value from the filter step and never used for normal control flow: a low
//! effective sample size, for example, is a resampling trigger and not an error. Every error leaves
//! the belief exactly as it was before the failed call.
use thiserror::Error;

/// Convenience alias for results produced by the filter.
pub type FilterResult<T> = Result<T, FilterError>;

/// Filter errors
#[derive(Error, Debug, Clone, PartialEq)]
pub enum FilterError {
    /// Every particle has a zero or non-finite likelihood (total likelihood collapse). The caller
    /// may re-seed the belief or skip the observation; the filter never retries on its own.
    #[error("Degenerate weights: every particle has zero or non-finite likelihood")]
    DegenerateWeights,

    /// The action record encodes an invalid (e.g. non-finite) transform.
    #[error("Invalid action: {0}")]
    InvalidAction(String),

    /// The observation record is malformed or yields an undefined likelihood.
    #[error("Invalid observation: {0}")]
    InvalidObservation(String),

    /// The filter configuration is inconsistent; no session is created.
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// An operation needing at least one particle was called on an empty belief.
    #[error("Belief contains no particles")]
    EmptyBelief,
}
