//! Local scorer: scores a whole record table through the ONNX artifact in one call

use crate::config::LocalConfig;
use crate::error::{ModelLoadError, ScoringError};
use crate::models::loader::{LoadedModel, ModelLoader};
use crate::types::prediction::Prediction;
use crate::types::table::{RecordTable, Value};
use ort::memory::Allocator;
use ort::value::{DowncastableTarget, DynMapValueType, DynSequenceValueType, DynValue, Tensor};
use std::sync::Mutex;
use tracing::{debug, info, warn};

/// Scores a whole table in one call. All-or-nothing.
pub trait BatchScorer: Send + Sync {
    fn predict(&self, table: &RecordTable) -> Result<Vec<Prediction>, ScoringError>;
}

/// Scorer backed by a locally loaded ONNX artifact
pub struct LocalScorer {
    /// Loaded artifact; calls are serialized through the lock
    model: Mutex<LoadedModel>,
    /// Expected columns in model input order; empty accepts any table
    feature_columns: Vec<String>,
}

impl LocalScorer {
    /// Load the artifact named in the configuration
    pub fn new(config: &LocalConfig) -> Result<Self, ModelLoadError> {
        let model = ModelLoader::with_threads(config.onnx_threads).load(&config.model_path)?;
        info!(
            path = %config.model_path,
            expected_columns = config.feature_columns.len(),
            "Local scorer ready"
        );
        Ok(Self {
            model: Mutex::new(model),
            feature_columns: config.feature_columns.clone(),
        })
    }

    /// Run the artifact over a row-major `[rows, columns]` feature matrix
    fn run(
        &self,
        features: Vec<f32>,
        rows: usize,
        columns: usize,
    ) -> Result<Vec<f64>, ScoringError> {
        let shape = vec![rows as i64, columns as i64];
        let input_tensor = Tensor::from_array((shape, features))
            .map_err(|e| ScoringError::Runtime(format!("failed to create input tensor: {}", e)))?;

        let mut guard = self
            .model
            .lock()
            .map_err(|e| ScoringError::Runtime(format!("lock error: {}", e)))?;
        let model: &mut LoadedModel = &mut guard;

        let outputs = model
            .session
            .run(ort::inputs![&model.input_name => input_tensor])
            .map_err(|e| ScoringError::Runtime(e.to_string()))?;

        if let Some(output) = outputs.get(&model.output_name) {
            if let Some(probabilities) = extract_probabilities(output)? {
                return Ok(probabilities);
            }
        }

        // Fall back to any non-label output
        for (name, output) in outputs.iter() {
            if name.contains("label") {
                continue;
            }
            if let Some(probabilities) = extract_probabilities(&output)? {
                debug!(output = %name, "Extracted probabilities from fallback output");
                return Ok(probabilities);
            }
        }

        Err(ScoringError::Runtime(
            "no probability output found in model results".to_string(),
        ))
    }
}

impl BatchScorer for LocalScorer {
    fn predict(&self, table: &RecordTable) -> Result<Vec<Prediction>, ScoringError> {
        check_schema(&self.feature_columns, table)?;
        let features = feature_matrix(table)?;
        let probabilities = self.run(features, table.len(), table.columns().len())?;

        if probabilities.len() != table.len() {
            return Err(ScoringError::OutputShape {
                expected: table.len(),
                found: probabilities.len(),
            });
        }

        debug!(records = table.len(), "Batch inference complete");

        Ok(probabilities
            .into_iter()
            .enumerate()
            .map(|(index, value)| Prediction::new(index, value))
            .collect())
    }
}

/// Reject tables whose columns differ from the artifact's expected features
pub fn check_schema(expected: &[String], table: &RecordTable) -> Result<(), ScoringError> {
    if expected.is_empty() || expected == table.columns() {
        return Ok(());
    }
    Err(ScoringError::SchemaMismatch {
        expected: expected.to_vec(),
        found: table.columns().to_vec(),
    })
}

/// Flatten the table into a row-major f32 matrix. Missing cells become NaN.
pub fn feature_matrix(table: &RecordTable) -> Result<Vec<f32>, ScoringError> {
    let mut features = Vec::with_capacity(table.len() * table.columns().len());
    for row in table.rows() {
        for (column, value) in table.columns().iter().zip(&row.values) {
            let feature = match value {
                Value::Integer(n) => *n as f32,
                Value::Number(n) => *n as f32,
                Value::Missing => f32::NAN,
                Value::Text(_) => {
                    return Err(ScoringError::NonNumeric {
                        row: row.index,
                        column: column.clone(),
                    })
                }
            };
            features.push(feature);
        }
    }
    Ok(features)
}

/// Extract per-row positive-class probabilities from one output value.
///
/// Handles tensor outputs and seq(map(int64, float)) outputs. `Ok(None)` means
/// the value has neither shape.
fn extract_probabilities(output: &DynValue) -> Result<Option<Vec<f64>>, ScoringError> {
    if let Ok((shape, data)) = output.try_extract_tensor::<f32>() {
        let dims: Vec<i64> = shape.iter().copied().collect();
        return probabilities_from_tensor(&dims, data).map(Some);
    }

    let dtype = output.dtype();
    if DynSequenceValueType::can_downcast(&dtype) {
        return probabilities_from_sequence_map(output).map(Some);
    }

    Ok(None)
}

/// Per-row probabilities from a `[rows, classes]`, `[rows, 1]` or `[rows]` tensor
pub fn probabilities_from_tensor(dims: &[i64], data: &[f32]) -> Result<Vec<f64>, ScoringError> {
    let declared: i64 = dims.iter().product();
    if dims.iter().any(|&d| d < 0) || declared as usize > data.len() {
        return Err(ScoringError::Runtime(format!(
            "tensor shape {:?} does not match {} values",
            dims,
            data.len()
        )));
    }

    match dims {
        [rows, classes] if *classes >= 2 => {
            let classes = *classes as usize;
            Ok((0..*rows as usize)
                .map(|r| data[r * classes + 1] as f64)
                .collect())
        }
        [rows, 1] => Ok(data[..*rows as usize].iter().map(|&v| v as f64).collect()),
        [rows] => Ok(data[..*rows as usize].iter().map(|&v| v as f64).collect()),
        _ => Err(ScoringError::Runtime(format!(
            "unsupported probability tensor shape {:?}",
            dims
        ))),
    }
}

/// Per-row class-1 probabilities from seq(map(int64, float)) output
fn probabilities_from_sequence_map(output: &DynValue) -> Result<Vec<f64>, ScoringError> {
    let allocator = Allocator::default();

    let sequence = output
        .downcast_ref::<DynSequenceValueType>()
        .map_err(|e| ScoringError::Runtime(format!("failed to downcast to sequence: {}", e)))?;

    let maps = sequence
        .try_extract_sequence::<DynMapValueType>(&allocator)
        .map_err(|e| ScoringError::Runtime(e.to_string()))?;

    let mut probabilities = Vec::with_capacity(maps.len());
    for map_value in &maps {
        let kv_pairs = map_value
            .try_extract_key_values::<i64, f32>()
            .map_err(|e| ScoringError::Runtime(e.to_string()))?;
        probabilities.push(positive_class_probability(&kv_pairs)?);
    }
    Ok(probabilities)
}

/// Class 1 probability, or the complement of class 0 when class 1 is absent
pub fn positive_class_probability(kv_pairs: &[(i64, f32)]) -> Result<f64, ScoringError> {
    if let Some((_, prob)) = kv_pairs.iter().find(|(class_id, _)| *class_id == 1) {
        return Ok(*prob as f64);
    }
    if let Some((_, prob)) = kv_pairs.iter().find(|(class_id, _)| *class_id == 0) {
        warn!("Class 1 missing from probability map, using 1 - p(class 0)");
        return Ok(1.0 - *prob as f64);
    }
    Err(ScoringError::Runtime("no probability found in map".to_string()))
}
