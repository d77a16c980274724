//! Error types for the scoring client

use crate::session::RunState;
use crate::types::prediction::Prediction;
use std::path::PathBuf;
use thiserror::Error;

/// Record Source errors
#[derive(Error, Debug)]
pub enum SourceError {
    #[error("IO error reading {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    #[error("target column {0:?} not found in dataset")]
    MissingTargetColumn(String),

    #[error("dataset has no rows")]
    EmptyTable,

    #[error("sample size {0} out of range (1..={max})", max = crate::source::MAX_SAMPLE_SIZE)]
    InvalidSampleSize(usize),
}

/// Failure to load the local scoring artifact
#[derive(Error, Debug)]
pub enum ModelLoadError {
    #[error("scoring artifact not found at {0}")]
    NotFound(PathBuf),

    #[error("scoring artifact at {path} could not be loaded: {reason}")]
    Invalid { path: PathBuf, reason: String },

    #[error("ONNX Runtime initialization failed: {0}")]
    Runtime(String),
}

/// Local scoring failures. All-or-nothing: no partial predictions.
#[derive(Error, Debug)]
pub enum ScoringError {
    #[error("column mismatch: model expects {expected:?}, table has {found:?}")]
    SchemaMismatch {
        expected: Vec<String>,
        found: Vec<String>,
    },

    #[error("non-numeric value in row {row}, column {column:?}")]
    NonNumeric { row: usize, column: String },

    #[error("scoring artifact failed: {0}")]
    Runtime(String),

    #[error("scoring artifact returned {found} predictions for {expected} rows")]
    OutputShape { expected: usize, found: usize },
}

/// Remote prediction API failures
#[derive(Error, Debug)]
pub enum RemoteError {
    #[error("network error: {0}")]
    Network(#[source] reqwest::Error),

    #[error("credential rejected ({status}): {body}")]
    Auth { status: u16, body: String },

    #[error("malformed prediction response: {0}")]
    MalformedResponse(String),

    #[error("server cannot score row features ({status}): {message}")]
    Schema { status: u16, message: String },

    #[error("unexpected HTTP status {status}: {body}")]
    HttpStatus { status: u16, body: String },

    #[error("failed to serialize record: {0}")]
    Serialize(#[from] serde_json::Error),
}

/// Error raised by whichever backend served the run
#[derive(Error, Debug)]
pub enum BackendError {
    #[error(transparent)]
    Local(#[from] ScoringError),

    #[error(transparent)]
    Remote(#[from] RemoteError),
}

/// Why a scoring run ended without a result
#[derive(Error, Debug)]
pub enum FailureCause {
    #[error(transparent)]
    Backend(#[from] BackendError),

    #[error("scoring run cancelled")]
    Cancelled,

    #[error("cannot score an empty table")]
    EmptyTable,

    #[error("session already used (state {0:?}); start a new session")]
    SessionReused(RunState),
}

/// A failed scoring run, with the predictions completed before the failure
#[derive(Error, Debug)]
#[error("scoring stopped after {completed} of {total} records: {cause}")]
pub struct ScoringFailure {
    #[source]
    pub cause: FailureCause,
    pub completed: usize,
    pub total: usize,
    pub predictions: Vec<Prediction>,
}

impl ScoringFailure {
    pub fn new(
        cause: impl Into<FailureCause>,
        total: usize,
        predictions: Vec<Prediction>,
    ) -> Self {
        Self {
            cause: cause.into(),
            completed: predictions.len(),
            total,
            predictions,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_failure_counts_completed_rows() {
        let predictions = vec![Prediction::new(0, 0.1), Prediction::new(1, 0.2)];
        let failure = ScoringFailure::new(
            BackendError::Remote(RemoteError::MalformedResponse("no data".to_string())),
            10,
            predictions,
        );

        assert_eq!(failure.completed, 2);
        assert_eq!(failure.total, 10);
        assert!(failure.to_string().contains("2 of 10"));
    }

    #[test]
    fn test_cancelled_message() {
        let failure = ScoringFailure::new(FailureCause::Cancelled, 3, Vec::new());
        assert!(failure.to_string().ends_with("scoring run cancelled"));
    }
}
