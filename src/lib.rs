//! Inference Tester Library
//!
//! Generates sample records from a reference dataset and scores them through
//! either a locally loaded ONNX scoring artifact (batch) or a remote
//! prediction API (realtime, one record per request), with timing and
//! incremental progress reporting.

pub mod config;
pub mod error;
pub mod metrics;
pub mod models;
pub mod orchestrator;
pub mod session;
pub mod source;
pub mod types;

pub use config::AppConfig;
pub use error::{FailureCause, ScoringFailure};
pub use models::{BatchScorer, LocalScorer, RecordPrediction, RecordScorer, RemoteScorer};
pub use orchestrator::{Backend, CancelFlag, ScoringOrchestrator, ScoringUpdate};
pub use session::{RunState, ScoringSession};
pub use source::RecordSource;
pub use types::{Prediction, Progress, RecordTable, ScoredResult};
