//! Model management for ONNX Runtime
//!
//! Locates the detector, OCR models and character dictionary in a models
//! directory, and wraps an `ort` session as an [`InferenceEngine`].

use anyhow::{Context, Result};
use ndarray::{ArrayD, IxDyn};
use ort::session::{builder::GraphOptimizationLevel, Session, SessionInputValue};
use ort::value::Value;
use std::borrow::Cow;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

use super::engine::{InferenceEngine, NamedTensors, Tensor};
use super::error::VisionError;

/// Model files used by the pipeline
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ModelType {
    /// YOLO-style object detector
    ObjectDetector,
    /// Text detection model (DBNet)
    TextDetector,
    /// Text direction classifier (optional)
    OrientationClassifier,
    /// Text recognition model (CRNN)
    TextRecognizer,
    /// Character dictionary for recognition
    Dictionary,
}

impl ModelType {
    pub const ALL: [ModelType; 5] = [
        ModelType::ObjectDetector,
        ModelType::TextDetector,
        ModelType::OrientationClassifier,
        ModelType::TextRecognizer,
        ModelType::Dictionary,
    ];

    /// Default filename for this model type
    pub fn filename(&self) -> &'static str {
        match self {
            ModelType::ObjectDetector => "detector.onnx",
            ModelType::TextDetector => "det.onnx",
            ModelType::OrientationClassifier => "cls.onnx",
            ModelType::TextRecognizer => "rec.onnx",
            ModelType::Dictionary => "dict.txt",
        }
    }

    /// Display name for status reporting
    pub fn display_name(&self) -> &'static str {
        match self {
            ModelType::ObjectDetector => "Object Detection",
            ModelType::TextDetector => "Text Detection",
            ModelType::OrientationClassifier => "Text Classifier",
            ModelType::TextRecognizer => "Text Recognition",
            ModelType::Dictionary => "Character Dictionary",
        }
    }

    /// Whether the pipeline can run without this file
    ///
    /// The classifier is skipped when missing and the dictionary falls back
    /// to the built-in ASCII table.
    pub fn is_required(&self) -> bool {
        !matches!(
            self,
            ModelType::OrientationClassifier | ModelType::Dictionary
        )
    }
}

/// Availability of one model file
#[derive(Debug, Clone)]
pub struct ModelStatus {
    pub model_type: ModelType,
    pub path: PathBuf,
    pub available: bool,
    pub size_bytes: Option<u64>,
}

/// Locates model files on disk
pub struct ModelManager {
    models_dir: PathBuf,
    overrides: Vec<(ModelType, String)>,
}

impl ModelManager {
    /// Model manager over `<data dir>/models`
    pub fn new() -> Result<Self> {
        let data_dir = crate::storage::get_data_dir()?;
        Self::with_dir(data_dir.join("models"))
    }

    /// Create model manager with custom directory
    pub fn with_dir(models_dir: PathBuf) -> Result<Self> {
        std::fs::create_dir_all(&models_dir)
            .with_context(|| format!("Failed to create models directory {:?}", models_dir))?;
        Ok(Self {
            models_dir,
            overrides: Vec::new(),
        })
    }

    /// Use a different filename for a model type
    pub fn with_filename(mut self, model_type: ModelType, filename: impl Into<String>) -> Self {
        let filename = filename.into();
        match self.overrides.iter_mut().find(|(t, _)| *t == model_type) {
            Some(entry) => entry.1 = filename,
            None => self.overrides.push((model_type, filename)),
        }
        self
    }

    /// Get the models directory path
    pub fn models_dir(&self) -> &Path {
        &self.models_dir
    }

    /// Get the path to a specific model file
    pub fn model_path(&self, model_type: ModelType) -> PathBuf {
        let filename = self
            .overrides
            .iter()
            .find(|(t, _)| *t == model_type)
            .map(|(_, name)| name.as_str())
            .unwrap_or_else(|| model_type.filename());
        self.models_dir.join(filename)
    }

    /// Check if a model file is present and non-empty
    pub fn is_model_available(&self, model_type: ModelType) -> bool {
        std::fs::metadata(self.model_path(model_type))
            .map(|m| m.is_file() && m.len() > 0)
            .unwrap_or(false)
    }

    /// Check if all required models are available
    pub fn are_models_ready(&self, with_ocr: bool) -> bool {
        ModelType::ALL
            .iter()
            .filter(|t| t.is_required())
            .filter(|t| with_ocr || **t == ModelType::ObjectDetector)
            .all(|&t| self.is_model_available(t))
    }

    /// Get status of all models
    pub fn get_model_status(&self) -> Vec<ModelStatus> {
        ModelType::ALL
            .iter()
            .map(|&model_type| {
                let path = self.model_path(model_type);
                let size_bytes = std::fs::metadata(&path).ok().map(|m| m.len());
                ModelStatus {
                    model_type,
                    available: self.is_model_available(model_type),
                    path,
                    size_bytes,
                }
            })
            .collect()
    }

    /// Path of a model that must exist
    pub fn require_model(&self, model_type: ModelType) -> Result<PathBuf> {
        let path = self.model_path(model_type);
        if !self.is_model_available(model_type) {
            anyhow::bail!(
                "{} model not found at {:?}",
                model_type.display_name(),
                path
            );
        }
        Ok(path)
    }

    /// Path of an optional model, `None` (with a warning) when missing
    pub fn optional_model(&self, model_type: ModelType) -> Option<PathBuf> {
        if self.is_model_available(model_type) {
            Some(self.model_path(model_type))
        } else {
            warn!(
                "{} not found at {:?}, continuing without it",
                model_type.display_name(),
                self.model_path(model_type)
            );
            None
        }
    }
}

/// Options used when building an ONNX Runtime session
#[derive(Debug, Clone, Copy)]
pub struct SessionOptions {
    pub intra_threads: usize,
    pub use_gpu: bool,
}

impl Default for SessionOptions {
    fn default() -> Self {
        Self {
            intra_threads: 4,
            use_gpu: false,
        }
    }
}

/// ONNX Runtime session wrapper
pub struct OnnxSession {
    session: Session,
    model: &'static str,
    input_names: Vec<String>,
    output_names: Vec<String>,
}

impl OnnxSession {
    /// Create a new ONNX session from a model file
    pub fn new(model: &'static str, model_path: &Path) -> Result<Self, VisionError> {
        Self::with_options(model, model_path, SessionOptions::default())
    }

    /// Create a session, with GPU acceleration if requested and available
    pub fn with_options(
        model: &'static str,
        model_path: &Path,
        options: SessionOptions,
    ) -> Result<Self, VisionError> {
        info!("Loading {} model from {:?}", model, model_path);

        let load_error = |reason: String| VisionError::ModelLoad {
            model,
            path: model_path.to_path_buf(),
            reason,
        };

        let session_builder = Session::builder()?
            .with_optimization_level(GraphOptimizationLevel::Level3)?
            .with_intra_threads(options.intra_threads)?;

        // Try to add DirectML execution provider (Windows GPU)
        #[cfg(target_os = "windows")]
        let session_builder = if options.use_gpu {
            use ort::execution_providers::DirectMLExecutionProvider;
            match session_builder
                .with_execution_providers([DirectMLExecutionProvider::default().build()])
            {
                Ok(builder) => {
                    info!("DirectML GPU acceleration enabled");
                    builder
                }
                Err(e) => {
                    warn!("DirectML not available, using CPU: {}", e);
                    Session::builder()?
                        .with_optimization_level(GraphOptimizationLevel::Level3)?
                        .with_intra_threads(options.intra_threads)?
                }
            }
        } else {
            session_builder
        };

        #[cfg(not(target_os = "windows"))]
        if options.use_gpu {
            warn!("GPU execution provider is only wired up on Windows, using CPU");
        }

        let session = session_builder
            .commit_from_file(model_path)
            .map_err(|e| load_error(e.to_string()))?;

        let input_names: Vec<String> = session
            .inputs
            .iter()
            .map(|input| input.name.clone())
            .collect();

        let output_names: Vec<String> = session
            .outputs
            .iter()
            .map(|output| output.name.clone())
            .collect();

        if input_names.is_empty() || output_names.is_empty() {
            return Err(load_error("model has no inputs or no outputs".to_string()));
        }

        info!(
            "Model loaded. Inputs: {:?}, Outputs: {:?}",
            input_names, output_names
        );

        Ok(Self {
            session,
            model,
            input_names,
            output_names,
        })
    }

    /// Get input names
    pub fn input_names(&self) -> &[String] {
        &self.input_names
    }

    /// Get output names
    pub fn output_names(&self) -> &[String] {
        &self.output_names
    }

    /// Map a caller-side input name onto the session's own
    ///
    /// Callers pass conventional names (`images`, `x`); a single-input
    /// model takes its only input whatever it is called.
    fn resolve_input_name<'a>(&'a self, requested: &'a str) -> &'a str {
        if self.input_names.iter().any(|n| n == requested) {
            return requested;
        }
        match self.input_names.as_slice() {
            [only] => only.as_str(),
            _ => requested,
        }
    }
}

impl InferenceEngine for OnnxSession {
    fn run(&mut self, inputs: NamedTensors) -> Result<NamedTensors, VisionError> {
        let mut session_inputs: Vec<(Cow<'_, str>, SessionInputValue<'_>)> =
            Vec::with_capacity(inputs.len());
        for (name, tensor) in inputs {
            let name = self.resolve_input_name(&name).to_string();
            let (shape, data) = tensor.into_parts();
            let array = ArrayD::from_shape_vec(IxDyn(&shape), data)
                .map_err(|e| VisionError::inference(self.model, e.to_string()))?;
            let value = Value::from_array(array)?;
            session_inputs.push((Cow::Owned(name), SessionInputValue::from(value)));
        }

        let model = self.model;
        let output_names = self.output_names.clone();
        let outputs = self.session.run(session_inputs)?;

        // Copy out before the session outputs are released
        let mut results = Vec::with_capacity(output_names.len());
        for name in output_names {
            let array = outputs[name.as_str()]
                .try_extract_array::<f32>()
                .map_err(|e| VisionError::inference(model, e.to_string()))?;
            let tensor = Tensor::new(array.shape().to_vec(), array.iter().copied().collect())?;
            results.push((name, tensor));
        }

        debug!("{}: {} outputs", model, results.len());
        Ok(results)
    }

    fn custom_metadata(&self) -> Vec<(String, String)> {
        let metadata = match self.session.metadata() {
            Ok(metadata) => metadata,
            Err(e) => {
                debug!("No metadata for {} model: {}", self.model, e);
                return Vec::new();
            }
        };

        let keys = metadata.custom_keys().unwrap_or_default();
        keys.into_iter()
            .filter_map(|key| match metadata.custom(&key) {
                Ok(Some(value)) => Some((key, value)),
                _ => None,
            })
            .collect()
    }
}
