//! Error types for the histogramming core.

use thiserror::Error;

/// Errors raised while reading event sources, compiling expressions or
/// filling histograms.
#[derive(Error, Debug)]
pub enum Error {
    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON (de)serialization error.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// YAML (de)serialization error.
    #[error("YAML error: {0}")]
    Yaml(String),

    /// Malformed configuration (sample row, era, channel, estimator name).
    #[error("configuration error: {0}")]
    Config(String),

    /// An input file could not be opened.
    #[error("file unavailable: {path}: {reason}")]
    FileUnavailable {
        /// Resolved path or URL.
        path: String,
        /// Underlying reason.
        reason: String,
    },

    /// An expression references a column that the source does not provide.
    #[error("branch '{branch}' not found in '{source_name}'")]
    BranchMissing {
        /// Missing column name.
        branch: String,
        /// Source (file or sample) that was searched.
        source_name: String,
    },

    /// Expression failed to parse or evaluate.
    #[error("expression error: {0}")]
    Expression(String),

    /// Invalid normalization (non-positive sum of weights or effective count).
    #[error("normalization error: {0}")]
    Normalization(String),

    /// A cut string could not be rewritten (missing isolation token).
    #[error("cannot parse cut: {0}")]
    CutParse(String),

    /// Invalid range or binning.
    #[error("invalid range: {0}")]
    Range(String),

    /// Histogram arithmetic error (binning mismatch, empty input).
    #[error("histogram error: {0}")]
    Histogram(String),

    /// Execution engine failure (thread pool, poisoned state).
    #[error("engine error: {0}")]
    Engine(String),

    /// Parquet/Arrow decoding error.
    #[error("Parquet error: {0}")]
    Parquet(String),
}

impl Error {
    /// `true` for errors that surface while the event loop runs.
    pub fn is_fill_time(&self) -> bool {
        matches!(
            self,
            Error::BranchMissing { .. }
                | Error::Expression(_)
                | Error::Normalization(_)
                | Error::Histogram(_)
                | Error::Engine(_)
                | Error::Parquet(_)
        )
    }
}

/// Result type alias for tau-core operations.
pub type Result<T> = std::result::Result<T, Error>;
