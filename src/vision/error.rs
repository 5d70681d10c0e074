//! Error type for the vision stages

use std::path::PathBuf;

/// Errors raised by the inference stages
///
/// Model-load errors are fatal to pipeline construction. Everything else is
/// scoped to one unit of work (a frame, a crop or a text region) and is
/// recovered by the caller.
#[derive(Debug, thiserror::Error)]
pub enum VisionError {
    #[error("failed to load {model} model from {}: {reason}", path.display())]
    ModelLoad {
        model: &'static str,
        path: PathBuf,
        reason: String,
    },

    #[error("{stage} inference failed: {message}")]
    Inference { stage: &'static str, message: String },

    #[error("{stage} produced a tensor of shape {actual:?}, expected {expected}")]
    TensorShape {
        stage: &'static str,
        expected: &'static str,
        actual: Vec<usize>,
    },

    #[error("invalid image: {0}")]
    InvalidImage(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Ort(#[from] ort::Error),
}

impl VisionError {
    pub fn inference(stage: &'static str, message: impl Into<String>) -> Self {
        Self::Inference {
            stage,
            message: message.into(),
        }
    }

    pub fn shape(stage: &'static str, expected: &'static str, actual: &[usize]) -> Self {
        Self::TensorShape {
            stage,
            expected,
            actual: actual.to_vec(),
        }
    }
}
