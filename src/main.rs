//! Inference Tester - Main Entry Point
//!
//! Samples records from the reference dataset and scores them in batch mode
//! (local ONNX artifact) or realtime mode (remote prediction API).
//!
//! Usage: `inference-tester [records] [batch|realtime] [config_path]`

use anyhow::{bail, Context, Result};
use inference_tester::{
    config::{AppConfig, LoggingConfig, DEFAULT_CONFIG_PATH},
    metrics::ScoringMetrics,
    models::{LocalScorer, RemoteScorer},
    orchestrator::{Backend, CancelFlag, ScoringOrchestrator, ScoringUpdate},
    session::ScoringSession,
    source::RecordSource,
    types::{BackendKind, RecordTable, ScoredResult},
};
use std::sync::Arc;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

/// Rows shown in table and prediction previews
const PAGE_SIZE: usize = 20;

/// Log realtime progress every this many records
const PROGRESS_EVERY: usize = 100;

#[tokio::main]
async fn main() -> Result<()> {
    let args: Vec<String> = std::env::args().collect();
    let records: Option<usize> = match args.get(1) {
        Some(arg) => Some(arg.parse().context("records must be a positive integer")?),
        None => None,
    };
    let backend = parse_mode(args.get(2).map(|s| s.as_str()).unwrap_or("batch"))?;
    let config_path = args.get(3).map(|s| s.as_str()).unwrap_or(DEFAULT_CONFIG_PATH);

    let config = AppConfig::load_from_path(config_path)
        .with_context(|| format!("Failed to load configuration from {}", config_path))?;
    init_logging(&config.logging)?;

    info!("Starting Inference Tester");
    let records = records.unwrap_or(config.data.default_records);
    info!(records = records, mode = %backend, seed = config.data.seed, "Configuration loaded");

    // Generate data
    let source = RecordSource::new(&config.data);
    let base = source.load_base().context("Failed to load reference dataset")?;
    let table = source
        .sample(&base, records, config.data.seed)
        .context("Failed to sample records")?;
    print_table(&table);

    // Ctrl-C stops a realtime run between records
    let cancel = CancelFlag::new();
    let signal_flag = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Interrupt received, stopping after the current record");
            signal_flag.cancel();
        }
    });

    let metrics = Arc::new(ScoringMetrics::new());
    let orchestrator = ScoringOrchestrator::with_metrics(metrics.clone());
    let mut session = ScoringSession::new(Arc::clone(&table), backend);

    let outcome = match backend {
        BackendKind::Local => {
            let scorer =
                LocalScorer::new(&config.local).context("Failed to load scoring artifact")?;
            orchestrator
                .score_session(&mut session, Backend::Local(&scorer), &cancel, |_| {})
                .await
        }
        BackendKind::Remote => {
            let scorer =
                RemoteScorer::new(&config.remote).context("Failed to set up remote scorer")?;
            orchestrator
                .score_session(&mut session, Backend::Remote(&scorer), &cancel, report_progress)
                .await
        }
    };

    match outcome {
        Ok(result) => {
            print_predictions(&result);
            info!(
                "Scored {} records in {:.3}s ({:.6}s per record)",
                result.predictions.len(),
                result.elapsed_seconds,
                result.average_seconds_per_record
            );
            metrics.print_summary();
            Ok(())
        }
        Err(failure) => {
            error!(
                completed = failure.completed,
                total = failure.total,
                error = %failure.cause,
                "Scoring run stopped"
            );
            metrics.print_summary();
            Err(failure.into())
        }
    }
}

fn parse_mode(mode: &str) -> Result<BackendKind> {
    match mode.to_ascii_lowercase().as_str() {
        "batch" | "local" => Ok(BackendKind::Local),
        "realtime" | "remote" | "api" => Ok(BackendKind::Remote),
        other => bail!("unknown scoring mode {:?} (expected batch or realtime)", other),
    }
}

fn init_logging(logging: &LoggingConfig) -> Result<()> {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(format!("inference_tester={}", logging.level)))?;

    if logging.format == "json" {
        tracing_subscriber::fmt().json().with_env_filter(filter).init();
    } else {
        tracing_subscriber::fmt().with_env_filter(filter).init();
    }
    Ok(())
}

fn report_progress(update: ScoringUpdate<'_>) {
    let progress = update.progress;
    if progress.completed % PROGRESS_EVERY == 0 || progress.completed == progress.total {
        let latest = update.partial.last().map(|p| p.value).unwrap_or_default();
        info!(latest = latest, "{}", progress);
    }
}

fn print_table(table: &RecordTable) {
    println!("{}", table.columns().join("\t"));
    for row in table.rows().iter().take(PAGE_SIZE) {
        let cells: Vec<String> = row.values.iter().map(|v| v.to_string()).collect();
        println!("{}", cells.join("\t"));
    }
    if table.len() > PAGE_SIZE {
        println!("... {} more rows", table.len() - PAGE_SIZE);
    }
}

fn print_predictions(result: &ScoredResult) {
    println!("index\tPrediction");
    for prediction in result.predictions.iter().take(PAGE_SIZE) {
        println!("{}\t{:.6}", prediction.index, prediction.value);
    }
    if result.predictions.len() > PAGE_SIZE {
        println!("... {} more predictions", result.predictions.len() - PAGE_SIZE);
    }
}
