//! Scoring backends

pub mod loader;
pub mod local;
pub mod remote;

pub use loader::ModelLoader;
pub use local::{BatchScorer, LocalScorer};
pub use remote::{RecordPrediction, RecordScorer, RemoteScorer};
