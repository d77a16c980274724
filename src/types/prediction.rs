//! Prediction and scoring result structures

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// Which backend scored a run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BackendKind {
    /// Local scoring artifact, whole table in one call
    Local,
    /// Remote prediction API, one record per call
    Remote,
}

impl fmt::Display for BackendKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BackendKind::Local => write!(f, "batch"),
            BackendKind::Remote => write!(f, "realtime"),
        }
    }
}

/// Predicted probability for one table row
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Prediction {
    /// Index of the scored row
    pub index: usize,
    /// Predicted value
    pub value: f64,
}

impl Prediction {
    pub fn new(index: usize, value: f64) -> Self {
        Self { index, value }
    }
}

/// Progress of a sequential scoring run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Progress {
    pub completed: usize,
    pub total: usize,
}

impl Progress {
    pub fn fraction(&self) -> f64 {
        if self.total == 0 {
            return 0.0;
        }
        self.completed as f64 / self.total as f64
    }
}

impl fmt::Display for Progress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Scored {} records out of {}", self.completed, self.total)
    }
}

/// Outcome of a successful scoring run
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScoredResult {
    /// Run identifier
    pub run_id: Uuid,
    /// Backend used
    pub backend: BackendKind,
    /// One prediction per row, in row order
    pub predictions: Vec<Prediction>,
    /// Wall-clock seconds spent scoring
    pub elapsed_seconds: f64,
    /// `elapsed_seconds / predictions.len()`
    pub average_seconds_per_record: f64,
    /// Run start timestamp
    pub started_at: DateTime<Utc>,
}

impl ScoredResult {
    pub fn values(&self) -> Vec<f64> {
        self.predictions.iter().map(|p| p.value).collect()
    }
}
