//! PlateLens - object detection with per-object text recognition
//!
//! Turns a camera frame into labeled detections, each annotated with the
//! text read inside it. Models run behind the [`vision::InferenceEngine`]
//! trait; [`vision::OnnxSession`] runs them through ONNX Runtime.

pub mod analyzer;
pub mod capture;
pub mod config;
pub mod overlay;
pub mod pipeline;
pub mod storage;
pub mod vision;

pub use analyzer::{AnalyzerHandle, AnalyzerStats, DetectionCallback, FrameAnalyzer};
pub use capture::{Frame, FrameThrottle};
pub use config::AppConfig;
pub use pipeline::{FrameReport, FrameTiming, PipelineOrchestrator};
pub use vision::{DetectionResult, VisionError};
