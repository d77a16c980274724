//! Record source: reference dataset loading and seeded resampling.
//!
//! The reference table is loaded once per source. Samples are memoized by
//! `(table identity, n, seed)`; since tables are immutable the cache never
//! needs invalidation.

use crate::config::DataConfig;
use crate::error::SourceError;
use crate::types::table::RecordTable;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::collections::HashMap;
use std::fs::File;
use std::io::BufReader;
use std::path::PathBuf;
use std::sync::{Arc, OnceLock, RwLock};
use tracing::{debug, info};
use uuid::Uuid;

/// Largest sample a caller may request
pub const MAX_SAMPLE_SIZE: usize = 1_000_000;

/// Draw exactly `n` rows with replacement from `table`.
///
/// Deterministic for identical `(table content, n, seed)`. The result is a new
/// table re-indexed `0..n-1`.
pub fn sample_with_replacement(
    table: &RecordTable,
    n: usize,
    seed: u64,
) -> Result<RecordTable, SourceError> {
    if n == 0 || n > MAX_SAMPLE_SIZE {
        return Err(SourceError::InvalidSampleSize(n));
    }
    if table.is_empty() {
        return Err(SourceError::EmptyTable);
    }

    let mut rng = StdRng::seed_from_u64(seed);
    let rows = table.rows();
    let sampled = (0..n)
        .map(|_| rows[rng.gen_range(0..rows.len())].values.clone())
        .collect();

    Ok(RecordTable::with_columns(table.shared_columns(), sampled))
}

/// Cache key for a sampled table
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
struct SampleKey {
    table: Uuid,
    n: usize,
    seed: u64,
}

/// Memo of sampled tables keyed by their sampling parameters
#[derive(Default)]
pub struct TableCache {
    entries: RwLock<HashMap<SampleKey, Arc<RecordTable>>>,
}

impl TableCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Return the cached sample, computing it on first use
    pub fn sample(
        &self,
        table: &RecordTable,
        n: usize,
        seed: u64,
    ) -> Result<Arc<RecordTable>, SourceError> {
        let key = SampleKey {
            table: table.id(),
            n,
            seed,
        };

        if let Ok(entries) = self.entries.read() {
            if let Some(hit) = entries.get(&key) {
                debug!(records = n, seed = seed, "Sample cache hit");
                return Ok(Arc::clone(hit));
            }
        }

        let sampled = Arc::new(sample_with_replacement(table, n, seed)?);
        if let Ok(mut entries) = self.entries.write() {
            entries.entry(key).or_insert_with(|| Arc::clone(&sampled));
        }
        Ok(sampled)
    }

    pub fn len(&self) -> usize {
        self.entries.read().map(|e| e.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Produces record tables from the reference dataset
pub struct RecordSource {
    dataset_path: PathBuf,
    target_column: String,
    base: OnceLock<Arc<RecordTable>>,
    cache: TableCache,
}

impl RecordSource {
    pub fn new(config: &DataConfig) -> Self {
        Self {
            dataset_path: PathBuf::from(&config.dataset_path),
            target_column: config.target_column.clone(),
            base: OnceLock::new(),
            cache: TableCache::new(),
        }
    }

    /// Source over an already loaded reference table
    pub fn from_table(table: RecordTable) -> Self {
        let base = OnceLock::new();
        let _ = base.set(Arc::new(table));
        Self {
            dataset_path: PathBuf::new(),
            target_column: String::new(),
            base,
            cache: TableCache::new(),
        }
    }

    /// Load the reference dataset, once
    pub fn load_base(&self) -> Result<Arc<RecordTable>, SourceError> {
        if let Some(table) = self.base.get() {
            return Ok(Arc::clone(table));
        }

        let file = File::open(&self.dataset_path).map_err(|source| SourceError::Io {
            path: self.dataset_path.clone(),
            source,
        })?;
        let table = RecordTable::from_csv_reader(BufReader::new(file), Some(&self.target_column))?;
        if table.is_empty() {
            return Err(SourceError::EmptyTable);
        }

        info!(
            path = %self.dataset_path.display(),
            rows = table.len(),
            columns = table.columns().len(),
            "Reference dataset loaded"
        );

        Ok(Arc::clone(self.base.get_or_init(|| Arc::new(table))))
    }

    /// Draw `n` rows with replacement from `table`, memoized
    pub fn sample(
        &self,
        table: &RecordTable,
        n: usize,
        seed: u64,
    ) -> Result<Arc<RecordTable>, SourceError> {
        let sampled = self.cache.sample(table, n, seed)?;
        info!(records = n, seed = seed, "Sampled records");
        Ok(sampled)
    }

    pub fn cache(&self) -> &TableCache {
        &self.cache
    }
}
