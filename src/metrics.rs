//! Latency and score-distribution tracking for scoring runs.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::RwLock;
use std::time::{Duration, Instant};
use tracing::info;

/// Keep at most this many latency samples
const MAX_SAMPLES: usize = 10_000;

/// Metrics collector for scoring runs
pub struct ScoringMetrics {
    /// Total records scored, across backends
    pub records_scored: AtomicU64,
    /// Remote predictions served from the memo
    pub cached_records: AtomicU64,
    /// Runs that ended `Done`
    pub runs_completed: AtomicU64,
    /// Runs that ended `Failed` or `Cancelled`
    pub runs_failed: AtomicU64,
    /// Remote call latencies (in microseconds)
    call_times: RwLock<Vec<u64>>,
    /// Local batch latencies (in microseconds)
    batch_times: RwLock<Vec<u64>>,
    /// Prediction value distribution buckets
    score_buckets: RwLock<[u64; 10]>,
    /// Start time for rate calculation
    start_time: Instant,
}

impl ScoringMetrics {
    pub fn new() -> Self {
        Self {
            records_scored: AtomicU64::new(0),
            cached_records: AtomicU64::new(0),
            runs_completed: AtomicU64::new(0),
            runs_failed: AtomicU64::new(0),
            call_times: RwLock::new(Vec::with_capacity(1000)),
            batch_times: RwLock::new(Vec::new()),
            score_buckets: RwLock::new([0; 10]),
            start_time: Instant::now(),
        }
    }

    /// Record one remote call and its prediction
    pub fn record_call(&self, latency: Duration, value: f64) {
        push_sample(&self.call_times, latency);
        self.record_scores(&[value]);
    }

    /// Record a prediction reused without a remote call. No latency sample.
    pub fn record_cached(&self, value: f64) {
        self.cached_records.fetch_add(1, Ordering::Relaxed);
        self.record_scores(&[value]);
    }

    /// Record one local batch and its predictions
    pub fn record_batch(&self, latency: Duration, values: &[f64]) {
        push_sample(&self.batch_times, latency);
        self.record_scores(values);
    }

    /// Record how a run ended
    pub fn record_run(&self, succeeded: bool) {
        if succeeded {
            self.runs_completed.fetch_add(1, Ordering::Relaxed);
        } else {
            self.runs_failed.fetch_add(1, Ordering::Relaxed);
        }
    }

    fn record_scores(&self, values: &[f64]) {
        self.records_scored
            .fetch_add(values.len() as u64, Ordering::Relaxed);
        if let Ok(mut buckets) = self.score_buckets.write() {
            for &value in values {
                buckets[score_bucket(value)] += 1;
            }
        }
    }

    /// Remote call latency statistics
    pub fn get_call_stats(&self) -> ProcessingStats {
        self.call_times
            .read()
            .map(|times| ProcessingStats::from_samples(&times))
            .unwrap_or_default()
    }

    /// Local batch latency statistics
    pub fn get_batch_stats(&self) -> ProcessingStats {
        self.batch_times
            .read()
            .map(|times| ProcessingStats::from_samples(&times))
            .unwrap_or_default()
    }

    /// Records scored per second since the collector was created
    pub fn get_throughput(&self) -> f64 {
        let elapsed = self.start_time.elapsed().as_secs_f64();
        if elapsed > 0.0 {
            self.records_scored.load(Ordering::Relaxed) as f64 / elapsed
        } else {
            0.0
        }
    }

    pub fn get_score_distribution(&self) -> [u64; 10] {
        self.score_buckets
            .read()
            .map(|buckets| *buckets)
            .unwrap_or_default()
    }

    /// Print summary statistics
    pub fn print_summary(&self) {
        let records = self.records_scored.load(Ordering::Relaxed);
        let completed = self.runs_completed.load(Ordering::Relaxed);
        let failed = self.runs_failed.load(Ordering::Relaxed);
        let cached = self.cached_records.load(Ordering::Relaxed);
        let calls = self.get_call_stats();
        let batches = self.get_batch_stats();
        let score_dist = self.get_score_distribution();

        info!("╔══════════════════════════════════════════════════════════════╗");
        info!("║                 INFERENCE TESTER - METRICS SUMMARY           ║");
        info!("╠══════════════════════════════════════════════════════════════╣");
        info!(
            "║ Records Scored: {:>8}  │  Throughput: {:>8.1} rec/s        ║",
            records,
            self.get_throughput()
        );
        info!(
            "║ Runs Completed: {:>8}  │  Runs Failed: {:>8}             ║",
            completed, failed
        );
        info!("╠══════════════════════════════════════════════════════════════╣");
        if calls.count > 0 {
            info!(
                "║ Realtime Call (μs): mean={:>6} p50={:>6} p95={:>6} p99={:>6} ║",
                calls.mean_us, calls.p50_us, calls.p95_us, calls.p99_us
            );
        }
        if cached > 0 {
            info!("║ Reused Predictions: {:>8} (not timed)                     ║", cached);
        }
        if batches.count > 0 {
            info!(
                "║ Batch Call (μs): count={:>4} mean={:>8} max={:>8}          ║",
                batches.count, batches.mean_us, batches.max_us
            );
        }
        info!("╠══════════════════════════════════════════════════════════════╣");
        info!("║ Prediction Distribution:                                     ║");
        let total: u64 = score_dist.iter().sum();
        for (i, &count) in score_dist.iter().enumerate() {
            let pct = if total > 0 { (count as f64 / total as f64) * 100.0 } else { 0.0 };
            let bar: String = "█".repeat(((pct / 2.0) as usize).min(20));
            info!(
                "║   {:.1}-{:.1}: {:>8} ({:>5.1}%) {}",
                i as f64 / 10.0,
                (i + 1) as f64 / 10.0,
                count,
                pct,
                bar
            );
        }
        info!("╚══════════════════════════════════════════════════════════════╝");
    }
}

impl Default for ScoringMetrics {
    fn default() -> Self {
        Self::new()
    }
}

fn push_sample(samples: &RwLock<Vec<u64>>, latency: Duration) {
    if let Ok(mut times) = samples.write() {
        times.push(latency.as_micros() as u64);
        if times.len() > MAX_SAMPLES {
            times.drain(0..MAX_SAMPLES / 2);
        }
    }
}

fn score_bucket(value: f64) -> usize {
    if value.is_nan() {
        return 0;
    }
    (value.clamp(0.0, 1.0) * 10.0).min(9.0) as usize
}

/// Latency statistics
#[derive(Debug, Default)]
pub struct ProcessingStats {
    pub count: u64,
    pub mean_us: u64,
    pub p50_us: u64,
    pub p95_us: u64,
    pub p99_us: u64,
    pub max_us: u64,
}

impl ProcessingStats {
    fn from_samples(samples: &[u64]) -> Self {
        if samples.is_empty() {
            return Self::default();
        }

        let mut sorted = samples.to_vec();
        sorted.sort_unstable();

        let count = sorted.len();
        let sum: u64 = sorted.iter().sum();

        Self {
            count: count as u64,
            mean_us: sum / count as u64,
            p50_us: sorted[count / 2],
            p95_us: sorted[(count as f64 * 0.95) as usize],
            p99_us: sorted[(count as f64 * 0.99) as usize],
            max_us: sorted[count - 1],
        }
    }
}
