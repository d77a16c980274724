//! Scoring session: the ephemeral state of one scoring run.
//!
//! A session is created when a run starts and replaced by the next one. It is
//! owned by the caller and lent to the orchestrator, never stored globally.
//!
//! ```text
//! Idle -> Scoring(0) -> Scoring(1) -> ... -> Scoring(N) -> Done
//!              \______________\___________________\_____-> Failed | Cancelled
//! ```

use crate::types::prediction::{BackendKind, Prediction, Progress, ScoredResult};
use crate::types::table::RecordTable;
use chrono::{DateTime, Utc};
use std::sync::Arc;
use std::time::{Duration, Instant};
use uuid::Uuid;

/// Lifecycle of a scoring run
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunState {
    Idle,
    /// Scoring with this many rows completed
    Scoring(usize),
    Done,
    Failed,
    Cancelled,
}

impl RunState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, RunState::Done | RunState::Failed | RunState::Cancelled)
    }
}

/// State of one scoring run over one table
#[derive(Debug)]
pub struct ScoringSession {
    id: Uuid,
    table: Arc<RecordTable>,
    backend: BackendKind,
    state: RunState,
    predictions: Vec<Prediction>,
    started_at: Option<DateTime<Utc>>,
    started: Option<Instant>,
    last_completed: Option<Instant>,
}

impl ScoringSession {
    pub fn new(table: Arc<RecordTable>, backend: BackendKind) -> Self {
        Self {
            id: Uuid::new_v4(),
            table,
            backend,
            state: RunState::Idle,
            predictions: Vec::new(),
            started_at: None,
            started: None,
            last_completed: None,
        }
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn table(&self) -> &Arc<RecordTable> {
        &self.table
    }

    pub fn backend(&self) -> BackendKind {
        self.backend
    }

    pub fn state(&self) -> RunState {
        self.state
    }

    /// Predictions accumulated so far, in row order
    pub fn predictions(&self) -> &[Prediction] {
        &self.predictions
    }

    pub fn progress(&self) -> Progress {
        Progress {
            completed: self.predictions.len(),
            total: self.table.len(),
        }
    }

    /// Time from the start of scoring to the last completed row
    pub fn elapsed(&self) -> Duration {
        match (self.started, self.last_completed) {
            (Some(start), Some(end)) => end.saturating_duration_since(start),
            (Some(start), None) if !self.state.is_terminal() => start.elapsed(),
            _ => Duration::ZERO,
        }
    }

    /// `Idle -> Scoring(0)`; starts the clock
    pub(crate) fn begin(&mut self) {
        debug_assert_eq!(self.state, RunState::Idle);
        self.state = RunState::Scoring(0);
        self.started_at = Some(Utc::now());
        self.started = Some(Instant::now());
    }

    /// Append the prediction for the next row: `Scoring(i) -> Scoring(i + 1)`
    pub(crate) fn record(&mut self, value: f64) -> Progress {
        let index = self.predictions.len();
        self.predictions.push(Prediction::new(index, value));
        self.last_completed = Some(Instant::now());
        self.state = RunState::Scoring(self.predictions.len());
        self.progress()
    }

    /// Store a whole batch of predictions: `Scoring(0) -> Scoring(N)`
    pub(crate) fn record_batch(&mut self, predictions: Vec<Prediction>) {
        self.predictions = predictions;
        self.last_completed = Some(Instant::now());
        self.state = RunState::Scoring(self.predictions.len());
    }

    /// `Scoring(N) -> Done`
    pub(crate) fn complete(&mut self) {
        self.state = RunState::Done;
    }

    pub(crate) fn fail(&mut self) {
        self.last_completed.get_or_insert_with(Instant::now);
        self.state = RunState::Failed;
    }

    pub(crate) fn cancel(&mut self) {
        self.last_completed.get_or_insert_with(Instant::now);
        self.state = RunState::Cancelled;
    }

    /// Whether every row has a prediction
    pub fn all_scored(&self) -> bool {
        self.predictions.len() == self.table.len()
    }

    /// Result of a finished run; `None` unless the run is `Done`
    pub fn result(&self) -> Option<ScoredResult> {
        if self.state != RunState::Done || self.predictions.is_empty() {
            return None;
        }

        let elapsed_seconds = self.elapsed().as_secs_f64();
        Some(ScoredResult {
            run_id: self.id,
            backend: self.backend,
            predictions: self.predictions.clone(),
            elapsed_seconds,
            average_seconds_per_record: elapsed_seconds / self.predictions.len() as f64,
            started_at: self.started_at.unwrap_or_else(Utc::now),
        })
    }
}
