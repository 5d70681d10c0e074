//! Vision Layer
//!
//! Model-facing stages of the pipeline. Each stage owns an
//! [`InferenceEngine`], builds its input tensor from an image and
//! post-processes the output:
//! - object detection (YOLO-style, direct resize, NMS)
//! - text detection (DB probability map, connected components)
//! - orientation classification (upright / 180 degrees)
//! - text recognition (greedy CTC)
//!
//! [`OcrEngine`] chains the three text stages over one crop.

pub mod detection;
pub mod dictionary;
pub mod engine;
pub mod error;
pub mod geometry;
pub mod labels;
pub mod models;
pub mod ocr;
pub mod orientation;
pub mod preprocess;
pub mod recognition;
pub mod text_detection;

pub use detection::{DetectionResult, DetectorConfig, ObjectDetectionStage};
pub use dictionary::Dictionary;
pub use engine::{ClosureEngine, InferenceEngine, NamedTensors, Tensor};
pub use error::VisionError;
pub use geometry::{Point, Rect};
pub use models::{ModelManager, ModelStatus, ModelType, OnnxSession, SessionOptions};
pub use ocr::{OcrEngine, OcrResult};
pub use orientation::{OrientationConfig, OrientationStage};
pub use preprocess::{LetterboxTransform, Normalization};
pub use recognition::{CtcCollapse, RecognitionConfig, TextRecognitionStage};
pub use text_detection::{CandidateTextRegion, TextDetection, TextDetectionConfig, TextDetectionStage};
