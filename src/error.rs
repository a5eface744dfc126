//! Error types for drp-eval
//!
//! Configuration and data-shape problems abort a run before any fold is
//! touched. Fold-level failures are wrapped in [`Error::FoldExecution`] and
//! recorded by the experiment driver instead of being propagated.

use thiserror::Error;

/// Result type alias
pub type Result<T> = std::result::Result<T, Error>;

/// drp-eval error types
#[derive(Error, Debug)]
pub enum Error {
    /// Invalid run configuration (fatal, raised before any work starts)
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// Invalid argument to a splitting or randomization call
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    /// Parallel arrays feeding a dataset or splitter differ in length
    #[error("Length mismatch: {context} (expected {expected}, got {actual})")]
    LengthMismatch {
        /// What was being checked
        context: String,
        /// Expected length
        expected: usize,
        /// Observed length
        actual: usize,
    },

    /// An entity or view is absent from a feature dataset
    #[error("Missing feature: view '{view}' for entity '{entity}'")]
    MissingFeature {
        /// Cell line or drug identifier
        entity: String,
        /// Feature view name
        view: String,
    },

    /// A single fold failed to train or predict (recoverable)
    #[error("Fold execution failed for {run_key}: {source}")]
    FoldExecution {
        /// Composite run key of the failed fold
        run_key: String,
        /// Underlying adapter error
        source: anyhow::Error,
    },

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// CSV read/write error
    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    /// JSON (config) error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Generic error
    #[error("{0}")]
    Other(String),
}

impl Error {
    /// Shorthand for a length check failure.
    pub fn length_mismatch(context: impl Into<String>, expected: usize, actual: usize) -> Self {
        Self::LengthMismatch {
            context: context.into(),
            expected,
            actual,
        }
    }

    /// Whether this error is isolated to one fold rather than fatal to the run.
    #[must_use]
    pub const fn is_recoverable(&self) -> bool {
        matches!(self, Self::FoldExecution { .. })
    }
}
