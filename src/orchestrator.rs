//! Scoring orchestrator: runs a record table through either backend.
//!
//! The local backend scores the whole table in one indivisible call. The
//! remote backend scores rows strictly in index order, one request at a time,
//! and reports progress after every row. Any failure stops the run at once;
//! nothing is retried or skipped.

use crate::error::{BackendError, FailureCause, ScoringError, ScoringFailure};
use crate::metrics::ScoringMetrics;
use crate::models::local::BatchScorer;
use crate::models::remote::RecordScorer;
use crate::session::{RunState, ScoringSession};
use crate::types::prediction::{BackendKind, Prediction, Progress, ScoredResult};
use crate::types::table::RecordTable;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, error, info, warn};

/// The backend a run is scored through
#[derive(Clone, Copy)]
pub enum Backend<'a> {
    /// Whole table in one call
    Local(&'a dyn BatchScorer),
    /// One row per call, in order
    Remote(&'a dyn RecordScorer),
}

impl Backend<'_> {
    pub fn kind(&self) -> BackendKind {
        match self {
            Backend::Local(_) => BackendKind::Local,
            Backend::Remote(_) => BackendKind::Remote,
        }
    }
}

/// Progress notification emitted after each remote row
#[derive(Debug, Clone, Copy)]
pub struct ScoringUpdate<'a> {
    pub progress: Progress,
    /// Predictions for rows `0..progress.completed`
    pub partial: &'a [Prediction],
}

/// Cooperative cancellation, checked between remote rows
#[derive(Debug, Clone, Default)]
pub struct CancelFlag(Arc<AtomicBool>);

impl CancelFlag {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// Drives scoring runs and records their timing
#[derive(Default)]
pub struct ScoringOrchestrator {
    metrics: Option<Arc<ScoringMetrics>>,
}

impl ScoringOrchestrator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_metrics(metrics: Arc<ScoringMetrics>) -> Self {
        Self {
            metrics: Some(metrics),
        }
    }

    /// Score `table` through `backend`
    pub async fn score(
        &self,
        table: Arc<RecordTable>,
        backend: Backend<'_>,
    ) -> Result<ScoredResult, ScoringFailure> {
        self.score_with_progress(table, backend, &CancelFlag::new(), |_| {})
            .await
    }

    /// Score `table`, calling `on_update` after every completed remote row
    pub async fn score_with_progress<F>(
        &self,
        table: Arc<RecordTable>,
        backend: Backend<'_>,
        cancel: &CancelFlag,
        on_update: F,
    ) -> Result<ScoredResult, ScoringFailure>
    where
        F: FnMut(ScoringUpdate<'_>),
    {
        let mut session = ScoringSession::new(table, backend.kind());
        self.score_session(&mut session, backend, cancel, on_update)
            .await
    }

    /// Run a fresh session to completion. The session keeps the accumulated
    /// predictions and final state for the caller. A session that has already
    /// started is rejected with `SessionReused` and left untouched.
    pub async fn score_session<F>(
        &self,
        session: &mut ScoringSession,
        backend: Backend<'_>,
        cancel: &CancelFlag,
        mut on_update: F,
    ) -> Result<ScoredResult, ScoringFailure>
    where
        F: FnMut(ScoringUpdate<'_>),
    {
        match backend {
            Backend::Local(scorer) => self.score_local(session, scorer),
            Backend::Remote(scorer) => {
                let mut run = self.start_remote(session, scorer, cancel.clone());
                while let Some(update) = run.next().await {
                    on_update(update);
                }
                run.finish()
            }
        }
    }

    /// Score the whole table in one call: `Idle -> Scoring -> Done | Failed`
    pub fn score_local(
        &self,
        session: &mut ScoringSession,
        scorer: &dyn BatchScorer,
    ) -> Result<ScoredResult, ScoringFailure> {
        if session.state() != RunState::Idle {
            return Err(reused(session));
        }

        let table = Arc::clone(session.table());
        let total = table.len();
        if total == 0 {
            session.fail();
            return Err(self.failed(FailureCause::EmptyTable, total, Vec::new()));
        }

        session.begin();
        info!(session = %session.id(), records = total, "Batch scoring started");

        let started = Instant::now();
        let predictions = match scorer.predict(&table) {
            Ok(predictions) if predictions.len() == total => predictions,
            Ok(predictions) => {
                session.fail();
                let err = ScoringError::OutputShape {
                    expected: total,
                    found: predictions.len(),
                };
                return Err(self.failed(BackendError::Local(err).into(), total, Vec::new()));
            }
            Err(err) => {
                error!(session = %session.id(), error = %err, "Batch scoring failed");
                session.fail();
                return Err(self.failed(BackendError::Local(err).into(), total, Vec::new()));
            }
        };
        let latency = started.elapsed();

        if let Some(metrics) = &self.metrics {
            let values: Vec<f64> = predictions.iter().map(|p| p.value).collect();
            metrics.record_batch(latency, &values);
        }

        session.record_batch(predictions);
        session.complete();
        self.succeeded(session)
    }

    /// Start a sequential remote run over `session`
    pub fn start_remote<'a>(
        &'a self,
        session: &'a mut ScoringSession,
        scorer: &'a dyn RecordScorer,
        cancel: CancelFlag,
    ) -> RemoteRun<'a> {
        let reused = (session.state() != RunState::Idle).then(|| session.state());
        RemoteRun {
            orchestrator: self,
            session,
            scorer,
            cancel,
            cause: None,
            reused,
        }
    }

    fn succeeded(&self, session: &ScoringSession) -> Result<ScoredResult, ScoringFailure> {
        if let Some(metrics) = &self.metrics {
            metrics.record_run(true);
        }
        let result = session.result().ok_or_else(|| {
            // Only reachable for an empty table, which is rejected earlier
            self.failed(FailureCause::EmptyTable, 0, Vec::new())
        })?;

        info!(
            session = %session.id(),
            backend = %result.backend,
            records = result.predictions.len(),
            elapsed_seconds = result.elapsed_seconds,
            average_seconds_per_record = result.average_seconds_per_record,
            "Scoring complete"
        );
        Ok(result)
    }

    fn failed(
        &self,
        cause: FailureCause,
        total: usize,
        predictions: Vec<Prediction>,
    ) -> ScoringFailure {
        if let Some(metrics) = &self.metrics {
            metrics.record_run(false);
        }
        ScoringFailure::new(cause, total, predictions)
    }
}

/// Rejection for a session that is not `Idle`. Not counted as a run.
fn reused(session: &ScoringSession) -> ScoringFailure {
    warn!(
        session = %session.id(),
        state = ?session.state(),
        "Session already used, not scoring it again"
    );
    ScoringFailure::new(
        FailureCause::SessionReused(session.state()),
        session.table().len(),
        Vec::new(),
    )
}

/// A remote scoring run in progress.
///
/// A finite, non-restartable lazy sequence: each `next()` scores one more row
/// and yields the updated progress, until every row is scored or the run
/// fails or is cancelled. `finish()` then reports the outcome.
pub struct RemoteRun<'a> {
    orchestrator: &'a ScoringOrchestrator,
    session: &'a mut ScoringSession,
    scorer: &'a dyn RecordScorer,
    cancel: CancelFlag,
    cause: Option<FailureCause>,
    /// Set when the session had already started; the run does nothing
    reused: Option<RunState>,
}

impl<'a> RemoteRun<'a> {
    pub fn state(&self) -> RunState {
        self.session.state()
    }

    pub fn progress(&self) -> Progress {
        self.session.progress()
    }

    /// Score the next row. `None` once the run has ended.
    pub async fn next(&mut self) -> Option<ScoringUpdate<'_>> {
        if self.reused.is_some() {
            return None;
        }

        match self.session.state() {
            RunState::Idle => {
                if self.session.table().is_empty() {
                    self.session.fail();
                    self.cause = Some(FailureCause::EmptyTable);
                    return None;
                }
                self.session.begin();
                info!(
                    session = %self.session.id(),
                    records = self.session.table().len(),
                    "Realtime scoring started"
                );
            }
            RunState::Scoring(_) if self.session.all_scored() => {
                self.session.complete();
                return None;
            }
            RunState::Scoring(_) => {}
            RunState::Done | RunState::Failed | RunState::Cancelled => return None,
        }

        if self.cancel.is_cancelled() {
            warn!(
                session = %self.session.id(),
                completed = self.session.predictions().len(),
                "Realtime scoring cancelled"
            );
            self.session.cancel();
            self.cause = Some(FailureCause::Cancelled);
            return None;
        }

        let table = Arc::clone(self.session.table());
        let index = self.session.predictions().len();
        let row = table.row(index)?;

        let started = Instant::now();
        match self.scorer.predict_one(row).await {
            Ok(prediction) => {
                if let Some(metrics) = &self.orchestrator.metrics {
                    if prediction.cached {
                        metrics.record_cached(prediction.value);
                    } else {
                        metrics.record_call(started.elapsed(), prediction.value);
                    }
                }
                let progress = self.session.record(prediction.value);
                debug!(
                    row = index,
                    value = prediction.value,
                    cached = prediction.cached,
                    "{}",
                    progress
                );
                Some(ScoringUpdate {
                    progress,
                    partial: self.session.predictions(),
                })
            }
            Err(err) => {
                error!(
                    session = %self.session.id(),
                    row = index,
                    error = %err,
                    "Realtime scoring failed"
                );
                self.session.fail();
                self.cause = Some(BackendError::Remote(err).into());
                None
            }
        }
    }

    /// End the run. Stopping early counts as cancellation.
    pub fn finish(mut self) -> Result<ScoredResult, ScoringFailure> {
        if self.reused.is_some() {
            return Err(reused(self.session));
        }

        match self.session.state() {
            RunState::Scoring(_) if self.session.all_scored() => self.session.complete(),
            RunState::Idle | RunState::Scoring(_) => {
                self.session.cancel();
                self.cause.get_or_insert(FailureCause::Cancelled);
            }
            _ => {}
        }

        if self.session.state() == RunState::Done {
            return self.orchestrator.succeeded(self.session);
        }

        let cause = self.cause.take().unwrap_or(FailureCause::Cancelled);
        Err(self.orchestrator.failed(
            cause,
            self.session.table().len(),
            self.session.predictions().to_vec(),
        ))
    }
}
