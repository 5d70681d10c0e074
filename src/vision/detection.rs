//! Object detection stage
//!
//! Decodes the dense output of a YOLO-style detector (`[1, 4 + C, A]`:
//! center-x, center-y, width, height followed by C class scores, for A
//! anchors) into scored boxes and deduplicates them with greedy NMS.
//!
//! The frame is fed to the model with a direct (non-aspect-preserving)
//! resize, so boxes are mapped back with independent x/y scale factors.
//! The text detector letterboxes instead; the two paths are not unified.

use image::RgbImage;
use serde::{Deserialize, Serialize};
use std::time::Instant;
use tracing::debug;

use super::engine::{run_single, InferenceEngine, Tensor};
use super::error::VisionError;
use super::geometry::Rect;
use super::labels;
use super::preprocess::{resize_direct, to_nchw, Normalization};

const STAGE: &str = "object detection";

/// Configuration for the object detector
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DetectorConfig {
    /// Square model input size in pixels
    pub input_size: u32,
    /// Minimum class score for a candidate (exclusive)
    pub confidence_threshold: f32,
    /// Candidates overlapping a kept box with IoU >= this are dropped
    pub nms_threshold: f32,
    /// Upper bound on detections per frame
    pub max_detections: usize,
    /// Model input tensor name
    pub input_name: String,
    /// Input normalization
    pub normalization: Normalization,
}

impl Default for DetectorConfig {
    fn default() -> Self {
        Self {
            input_size: 640,
            confidence_threshold: 0.5,
            nms_threshold: 0.45,
            max_detections: 100,
            input_name: "images".to_string(),
            normalization: Normalization::UNIT,
        }
    }
}

/// One detected object
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DetectionResult {
    /// Box in original-image pixel coordinates, clipped to the image
    pub bounding_box: Rect,
    /// Class score in [0, 1]
    pub confidence: f32,
    pub class_id: usize,
    pub class_name: String,
    /// Text found inside the box, attached by the OCR stage
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub recognized_text: Option<String>,
}

/// Runs the detector model and post-processes its output
pub struct ObjectDetectionStage {
    engine: Box<dyn InferenceEngine>,
    labels: Vec<String>,
    config: DetectorConfig,
}

impl ObjectDetectionStage {
    /// Create the stage, reading class labels from the model metadata
    pub fn new(engine: Box<dyn InferenceEngine>, config: DetectorConfig) -> Self {
        let labels = labels::labels_from_metadata(&engine.custom_metadata());
        Self::with_labels(engine, labels, config)
    }

    /// Create the stage with an explicit label set
    pub fn with_labels(
        engine: Box<dyn InferenceEngine>,
        labels: Vec<String>,
        config: DetectorConfig,
    ) -> Self {
        Self {
            engine,
            labels,
            config,
        }
    }

    pub fn labels(&self) -> &[String] {
        &self.labels
    }

    pub fn config(&self) -> &DetectorConfig {
        &self.config
    }

    /// Detect objects in a frame
    pub fn detect(&mut self, image: &RgbImage) -> Result<Vec<DetectionResult>, VisionError> {
        let start = Instant::now();
        let (width, height) = image.dimensions();
        if width == 0 || height == 0 {
            return Err(VisionError::InvalidImage(format!(
                "frame has zero size {}x{}",
                width, height
            )));
        }

        let size = self.config.input_size;
        let input = {
            let resized = resize_direct(image, size, size);
            Tensor::from_array4(to_nchw(&resized, &self.config.normalization))
        };

        let output = run_single(self.engine.as_mut(), STAGE, &self.config.input_name, input)?;
        let detections = decode_detections(&output, &self.labels, width, height, &self.config)?;

        debug!(
            "Object detection: {} detections in {:?}",
            detections.len(),
            start.elapsed()
        );
        Ok(detections)
    }
}

/// Turn a `[1, 4 + C, A]` detector tensor into NMS-filtered detections
///
/// An anchor whose best class channel is at or beyond `labels.len()` is
/// dropped.
pub fn decode_detections(
    output: &Tensor,
    labels: &[String],
    image_width: u32,
    image_height: u32,
    config: &DetectorConfig,
) -> Result<Vec<DetectionResult>, VisionError> {
    let shape = output.shape();
    if shape.len() != 3 || shape[0] != 1 || shape[1] < 5 {
        return Err(VisionError::shape(STAGE, "[1, 4 + classes, anchors]", shape));
    }

    let channels = shape[1];
    let anchors = shape[2];
    let data = output.data();
    let at = |channel: usize, anchor: usize| data[channel * anchors + anchor];

    let num_classes = channels - 4;
    let scale_x = image_width as f32 / config.input_size as f32;
    let scale_y = image_height as f32 / config.input_size as f32;

    let mut candidates = Vec::new();
    for anchor in 0..anchors {
        let mut max_score = 0.0f32;
        let mut class_id = None;
        for class in 0..num_classes {
            let score = at(4 + class, anchor);
            if score > max_score {
                max_score = score;
                class_id = Some(class);
            }
        }

        let Some(class_id) = class_id else {
            continue;
        };
        if class_id >= labels.len() || max_score <= config.confidence_threshold {
            continue;
        }

        let bounding_box = Rect::from_center(
            at(0, anchor),
            at(1, anchor),
            at(2, anchor),
            at(3, anchor),
        )
        .scale(scale_x, scale_y)
        .clip_to(image_width as f32, image_height as f32);

        candidates.push(DetectionResult {
            bounding_box,
            confidence: max_score.clamp(0.0, 1.0),
            class_id,
            class_name: labels[class_id].clone(),
            recognized_text: None,
        });
    }

    let mut detections = non_max_suppression(candidates, config.nms_threshold);
    detections.truncate(config.max_detections);
    Ok(detections)
}

/// Greedy NMS, output ordered by non-increasing confidence
pub fn non_max_suppression(
    mut detections: Vec<DetectionResult>,
    iou_threshold: f32,
) -> Vec<DetectionResult> {
    detections.sort_by(|a, b| b.confidence.total_cmp(&a.confidence));

    let mut selected: Vec<DetectionResult> = Vec::new();
    for candidate in detections {
        let suppressed = selected
            .iter()
            .any(|kept| kept.bounding_box.iou(&candidate.bounding_box) >= iou_threshold);
        if !suppressed {
            selected.push(candidate);
        }
    }

    selected
}
