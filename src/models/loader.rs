//! ONNX scoring artifact loader

use crate::error::ModelLoadError;
use ort::session::{builder::GraphOptimizationLevel, Session};
use std::fmt;
use std::path::Path;
use tracing::info;

/// Loaded ONNX scoring artifact with metadata
pub struct LoadedModel {
    /// ONNX Runtime session
    pub session: Session,
    /// Input name for the feature tensor
    pub input_name: String,
    /// Output name for probabilities
    pub output_name: String,
}

/// Loader for the ONNX scoring artifact
pub struct ModelLoader {
    /// Number of threads for ONNX inference
    onnx_threads: usize,
}

impl ModelLoader {
    /// Create a new model loader with the specified number of threads
    pub fn with_threads(onnx_threads: usize) -> Self {
        Self {
            onnx_threads: onnx_threads.max(1),
        }
    }

    /// Load the artifact at `path`
    pub fn load<P: AsRef<Path>>(&self, path: P) -> Result<LoadedModel, ModelLoadError> {
        let path = path.as_ref();
        if !path.is_file() {
            return Err(ModelLoadError::NotFound(path.to_path_buf()));
        }

        ort::init()
            .commit()
            .map_err(|e| ModelLoadError::Runtime(e.to_string()))?;

        info!(path = %path.display(), threads = self.onnx_threads, "Loading scoring artifact");

        let session = Session::builder()
            .map_err(|e| invalid(path, e))?
            .with_optimization_level(GraphOptimizationLevel::Level3)
            .map_err(|e| invalid(path, e))?
            .with_intra_threads(self.onnx_threads)
            .map_err(|e| invalid(path, e))?
            .commit_from_file(path)
            .map_err(|e| invalid(path, e))?;

        let input_name = session
            .inputs
            .first()
            .map(|i| i.name.clone())
            .ok_or_else(|| invalid(path, "model declares no inputs"))?;

        let output_name = session
            .outputs
            .iter()
            .find(|o| o.name.contains("prob") || o.name.contains("output"))
            .or_else(|| session.outputs.last())
            .map(|o| o.name.clone())
            .ok_or_else(|| invalid(path, "model declares no outputs"))?;

        info!(
            input = %input_name,
            output = %output_name,
            "Scoring artifact loaded"
        );

        Ok(LoadedModel {
            session,
            input_name,
            output_name,
        })
    }
}

fn invalid(path: &Path, reason: impl fmt::Display) -> ModelLoadError {
    ModelLoadError::Invalid {
        path: path.to_path_buf(),
        reason: reason.to_string(),
    }
}

impl Default for ModelLoader {
    fn default() -> Self {
        Self { onnx_threads: 1 }
    }
}
