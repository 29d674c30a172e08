use thiserror::Error;

/// Failures surfaced by training and querying.
///
/// Every variant carries enough context (offending index, the dimensions
/// involved) to diagnose the call without re-running it.
#[derive(Error, Debug)]
pub enum Error {
    /// An index was out of range, matrix shapes disagreed, or the training
    /// matrix was empty or otherwise malformed.
    #[error("dimension error: {0}")]
    Dimension(String),

    /// A per-row normal-equation system was singular or indefinite.
    /// Numerical failures are structural, not transient; nothing retries.
    #[error("numerical error: {0}")]
    Numerical(String),

    /// A hyperparameter was outside its valid range.
    #[error("configuration error: {0}")]
    Config(String),

    /// A query arrived before any successful `fit`.
    #[error("model has not been fitted")]
    NotFitted,

    /// Saving or loading a model failed: I/O, malformed payload, or a
    /// payload whose declared shapes are inconsistent.
    #[error("persistence error: {0}")]
    Persist(String),
}

pub type Result<T> = std::result::Result<T, Error>;
