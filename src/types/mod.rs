//! Type definitions for the scoring client

pub mod prediction;
pub mod table;

pub use prediction::{BackendKind, Prediction, Progress, ScoredResult};
pub use table::{RecordTable, Row, RowView, Value};
