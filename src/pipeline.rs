//! Per-frame pipeline
//!
//! Object detection on the full frame, then the OCR sub-pipeline on every
//! detection's crop. Failures are contained to the unit that failed: a
//! frame whose detector fails yields no detections, a crop whose OCR fails
//! keeps its detection without text.

use anyhow::{Context, Result};
use image::RgbImage;
use serde::Serialize;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

use crate::capture::Frame;
use crate::config::{AppConfig, OverlaySettings, PipelineConfig};
use crate::overlay::OverlayRenderer;
use crate::vision::preprocess::{crop_region, pixel_bounds};
use crate::vision::{
    DetectionResult, Dictionary, ModelManager, ModelType, ObjectDetectionStage, OcrEngine,
    OcrResult, OnnxSession, OrientationStage, SessionOptions, TextDetectionStage,
    TextRecognitionStage,
};

/// Timing of one pipeline run, in milliseconds
#[derive(Debug, Clone, Copy, Default, Serialize)]
pub struct FrameTiming {
    pub detection_ms: u64,
    pub ocr_ms: u64,
    pub total_ms: u64,
}

/// Result of running the pipeline on one frame
#[derive(Debug, Clone, Serialize)]
pub struct FrameReport {
    pub width: u32,
    pub height: u32,
    /// Annotated detections, in NMS order
    pub detections: Vec<DetectionResult>,
    pub timing: FrameTiming,
    /// Frame copy with the detections drawn in, when overlay is enabled
    #[serde(skip)]
    pub overlay: Option<RgbImage>,
}

/// Composes the object detector and the OCR engine
pub struct PipelineOrchestrator {
    detector: ObjectDetectionStage,
    ocr: Option<OcrEngine>,
    config: PipelineConfig,
    overlay: Option<OverlayRenderer>,
}

impl PipelineOrchestrator {
    /// Create an orchestrator; `ocr` may be absent for detection-only runs
    pub fn new(
        detector: ObjectDetectionStage,
        ocr: Option<OcrEngine>,
        config: PipelineConfig,
    ) -> Self {
        Self {
            detector,
            ocr,
            config,
            overlay: None,
        }
    }

    /// Render an annotated frame copy when `overlay.enabled` is set
    pub fn with_overlay(mut self, overlay: OverlaySettings) -> Self {
        self.overlay = overlay.enabled.then(|| OverlayRenderer::new(overlay));
        self
    }

    /// Load every model named by the configuration through ONNX Runtime
    pub fn from_config(config: &AppConfig) -> Result<Self> {
        let manager = config.models.manager()?;
        Self::from_models(&manager, config)
    }

    /// Load models from an explicit model manager
    pub fn from_models(manager: &ModelManager, config: &AppConfig) -> Result<Self> {
        let options = config.performance.session_options();

        let detector_path = manager.require_model(ModelType::ObjectDetector)?;
        let detector_session = OnnxSession::with_options("object detector", &detector_path, options)
            .context("Failed to load object detector")?;
        let detector = ObjectDetectionStage::new(Box::new(detector_session), config.detector.clone());
        info!("Object detector ready with {} labels", detector.labels().len());

        let ocr = if config.pipeline.recognize_text {
            Some(load_ocr(manager, config, options)?)
        } else {
            info!("Text recognition disabled");
            None
        };

        Ok(Self::new(detector, ocr, config.pipeline.clone()).with_overlay(config.overlay.clone()))
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    /// Whether crops go through OCR
    pub fn recognizes_text(&self) -> bool {
        self.config.recognize_text && self.ocr.is_some()
    }

    /// Run the full pipeline on one frame
    pub fn process_frame(&mut self, frame: &Frame) -> FrameReport {
        let start = Instant::now();
        let image = &frame.image;
        let (width, height) = image.dimensions();

        let detections = match self.detector.detect(image) {
            Ok(detections) => detections,
            Err(e) => {
                warn!("Object detection failed: {}", e);
                Vec::new()
            }
        };
        let detection_time = start.elapsed();

        let ocr_start = Instant::now();
        let mut annotated = Vec::with_capacity(detections.len());
        for (index, mut detection) in detections.into_iter().enumerate() {
            if pixel_bounds(width, height, &detection.bounding_box).is_none() {
                debug!("Detection {} has a degenerate crop, skipped", index);
                continue;
            }

            if self.config.recognize_text {
                if let Some(ocr) = self.ocr.as_mut() {
                    detection.recognized_text =
                        recognize_detection(ocr, image, &detection, &self.config.text_separator, index);
                }
            }
            annotated.push(detection);
        }
        let ocr_time = ocr_start.elapsed();

        let overlay = self
            .overlay
            .as_ref()
            .map(|renderer| renderer.render(image, &annotated));

        let timing = FrameTiming {
            detection_ms: millis(detection_time),
            ocr_ms: millis(ocr_time),
            total_ms: millis(start.elapsed()),
        };
        debug!(
            "Frame {}x{}: {} detections, {:?}",
            width,
            height,
            annotated.len(),
            timing
        );

        FrameReport {
            width,
            height,
            detections: annotated,
            timing,
            overlay,
        }
    }
}

/// OCR one detection's crop; `None` when nothing was read or OCR failed
fn recognize_detection(
    ocr: &mut OcrEngine,
    image: &RgbImage,
    detection: &DetectionResult,
    separator: &str,
    index: usize,
) -> Option<String> {
    let crop = crop_region(image, &detection.bounding_box)?;
    match ocr.recognize(&crop) {
        Ok(results) => join_text(&results, separator),
        Err(e) => {
            warn!("OCR failed for detection {} ({}): {}", index, detection.class_name, e);
            None
        }
    }
}

/// Join non-empty recognized strings, `None` if there are none
pub fn join_text(results: &[OcrResult], separator: &str) -> Option<String> {
    let parts: Vec<&str> = results
        .iter()
        .map(|r| r.text.as_str())
        .filter(|text| !text.is_empty())
        .collect();
    if parts.is_empty() {
        None
    } else {
        Some(parts.join(separator))
    }
}

fn load_ocr(manager: &ModelManager, config: &AppConfig, options: SessionOptions) -> Result<OcrEngine> {
    let det_path = manager.require_model(ModelType::TextDetector)?;
    let rec_path = manager.require_model(ModelType::TextRecognizer)?;

    let det_session = OnnxSession::with_options("text detector", &det_path, options)
        .context("Failed to load text detector")?;
    let rec_session = OnnxSession::with_options("text recognizer", &rec_path, options)
        .context("Failed to load text recognizer")?;

    let classifier = if config.orientation.enabled {
        match manager.optional_model(ModelType::OrientationClassifier) {
            Some(path) => {
                let session = OnnxSession::with_options("orientation classifier", &path, options)
                    .context("Failed to load orientation classifier")?;
                Some(OrientationStage::new(Box::new(session), config.orientation.clone()))
            }
            None => None,
        }
    } else {
        None
    };

    let dictionary = Arc::new(Dictionary::load_or_default(
        &manager.model_path(ModelType::Dictionary),
    ));

    let entries = dictionary.len();
    let engine = OcrEngine::new(
        TextDetectionStage::new(Box::new(det_session), config.text_detection.clone()),
        classifier,
        TextRecognitionStage::new(Box::new(rec_session), dictionary, config.recognition.clone()),
    );
    info!(
        "OCR ready: {} dictionary entries, orientation classifier {}",
        entries,
        if engine.has_classifier() { "on" } else { "off" }
    );
    Ok(engine)
}

fn millis(duration: Duration) -> u64 {
    duration.as_millis() as u64
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::vision::{
        ClosureEngine, DetectorConfig, Point, RecognitionConfig, Tensor, TextDetectionConfig,
        VisionError,
    };
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Detector engine emitting fixed `(cx, cy, w, h, class, score)` anchors
    /// in 640x640 input space, over two classes
    fn detector(anchors: Vec<(f32, f32, f32, f32, usize, f32)>) -> ObjectDetectionStage {
        let engine = ClosureEngine::new(move |_: &Tensor| {
            let n = anchors.len().max(1);
            let mut data = vec![0.0f32; 6 * n];
            for (a, &(cx, cy, w, h, class, score)) in anchors.iter().enumerate() {
                data[a] = cx;
                data[n + a] = cy;
                data[2 * n + a] = w;
                data[3 * n + a] = h;
                data[(4 + class) * n + a] = score;
            }
            Tensor::new(vec![1, 6, n], data)
        });
        ObjectDetectionStage::with_labels(
            Box::new(engine),
            vec!["car".to_string(), "plate".to_string()],
            DetectorConfig::default(),
        )
    }

    /// Text detector over a 32x64 map with one text blob
    fn text_detector() -> TextDetectionStage {
        let engine = ClosureEngine::new(|_: &Tensor| {
            let mut map = vec![0.0f32; 32 * 64];
            for y in 10..20 {
                for x in 10..50 {
                    map[y * 64 + x] = 0.9;
                }
            }
            Tensor::new(vec![1, 1, 32, 64], map)
        });
        TextDetectionStage::new(
            Box::new(engine),
            TextDetectionConfig {
                input_height: 32,
                input_width: 64,
                ..Default::default()
            },
        )
    }

    /// Recognizer reading "AB" from a two-entry dictionary
    fn recognizer() -> TextRecognitionStage {
        let engine = ClosureEngine::new(|_: &Tensor| {
            #[rustfmt::skip]
            let logits = vec![
                0.1, 0.8, 0.1,
                0.1, 0.8, 0.1,
                0.8, 0.1, 0.1,
                0.1, 0.1, 0.8,
            ];
            Tensor::new(vec![1, 4, 3], logits)
        });
        TextRecognitionStage::new(
            Box::new(engine),
            Arc::new(Dictionary::parse("A\nB\n")),
            RecognitionConfig::default(),
        )
    }

    fn frame() -> Frame {
        Frame::new(RgbImage::new(320, 240))
    }

    #[test]
    fn test_frame_end_to_end() {
        let ocr = OcrEngine::new(text_detector(), None, recognizer());
        let mut pipeline = PipelineOrchestrator::new(
            detector(vec![(320.0, 320.0, 200.0, 100.0, 1, 0.9)]),
            Some(ocr),
            PipelineConfig::default(),
        );

        let report = pipeline.process_frame(&frame());

        assert_eq!((report.width, report.height), (320, 240));
        assert_eq!(report.detections.len(), 1);
        let detection = &report.detections[0];
        assert_eq!(detection.class_id, 1);
        assert_eq!(detection.class_name, "plate");
        // 640x640 input -> 320x240 frame: x scale 0.5, y scale 0.375
        assert!((detection.bounding_box.left - 110.0).abs() < 1e-3);
        assert!((detection.bounding_box.top - 101.25).abs() < 1e-3);
        assert_eq!(detection.recognized_text.as_deref(), Some("AB"));
        assert!(report.overlay.is_none());
    }

    #[test]
    fn test_ocr_disabled_leaves_text_empty() {
        let ocr = OcrEngine::new(text_detector(), None, recognizer());
        let config = PipelineConfig {
            recognize_text: false,
            ..Default::default()
        };
        let mut pipeline = PipelineOrchestrator::new(
            detector(vec![(320.0, 320.0, 200.0, 100.0, 0, 0.9)]),
            Some(ocr),
            config,
        );

        assert!(!pipeline.recognizes_text());
        let report = pipeline.process_frame(&frame());
        assert_eq!(report.detections.len(), 1);
        assert!(report.detections[0].recognized_text.is_none());
    }

    #[test]
    fn test_degenerate_crop_skipped() {
        // Second box is 0.4 px wide in input space: 50.4..50.6 on the frame,
        // which truncates to zero width
        let mut pipeline = PipelineOrchestrator::new(
            detector(vec![
                (320.0, 320.0, 200.0, 100.0, 0, 0.9),
                (101.0, 100.0, 0.4, 40.0, 1, 0.8),
            ]),
            Some(OcrEngine::new(text_detector(), None, recognizer())),
            PipelineConfig::default(),
        );

        let report = pipeline.process_frame(&frame());
        assert_eq!(report.detections.len(), 1);
        assert_eq!(report.detections[0].class_name, "car");
    }

    #[test]
    fn test_detector_failure_gives_empty_report() {
        let engine = ClosureEngine::new(|_: &Tensor| {
            Err(VisionError::inference("object detection", "engine down"))
        });
        let detector = ObjectDetectionStage::with_labels(
            Box::new(engine),
            vec!["car".to_string()],
            DetectorConfig::default(),
        );
        let mut pipeline = PipelineOrchestrator::new(detector, None, PipelineConfig::default());

        let report = pipeline.process_frame(&frame());
        assert!(report.detections.is_empty());
    }

    #[test]
    fn test_ocr_failure_keeps_detection_and_continues() {
        let calls = Arc::new(AtomicUsize::new(0));
        let calls_in_engine = Arc::clone(&calls);
        // First crop's text detection fails, second succeeds
        let det_engine = ClosureEngine::new(move |_: &Tensor| {
            if calls_in_engine.fetch_add(1, Ordering::SeqCst) == 0 {
                return Err(VisionError::inference("text detection", "boom"));
            }
            let mut map = vec![0.0f32; 32 * 64];
            for y in 10..20 {
                for x in 10..50 {
                    map[y * 64 + x] = 0.9;
                }
            }
            Tensor::new(vec![1, 1, 32, 64], map)
        });
        let text_detector = TextDetectionStage::new(
            Box::new(det_engine),
            TextDetectionConfig {
                input_height: 32,
                input_width: 64,
                ..Default::default()
            },
        );

        let mut pipeline = PipelineOrchestrator::new(
            detector(vec![
                (160.0, 160.0, 200.0, 100.0, 0, 0.95),
                (480.0, 480.0, 200.0, 100.0, 1, 0.9),
            ]),
            Some(OcrEngine::new(text_detector, None, recognizer())),
            PipelineConfig::default(),
        );

        let report = pipeline.process_frame(&frame());
        assert_eq!(calls.load(Ordering::SeqCst), 2);
        assert_eq!(report.detections.len(), 2);
        assert!(report.detections[0].recognized_text.is_none());
        assert_eq!(report.detections[1].recognized_text.as_deref(), Some("AB"));
    }

    #[test]
    fn test_overlay_rendered_when_enabled() {
        let mut pipeline = PipelineOrchestrator::new(
            detector(vec![(320.0, 320.0, 200.0, 100.0, 0, 0.9)]),
            None,
            PipelineConfig::default(),
        )
        .with_overlay(OverlaySettings {
            enabled: true,
            ..Default::default()
        });

        let report = pipeline.process_frame(&frame());
        let overlay = report.overlay.unwrap();
        assert_eq!(overlay.dimensions(), (320, 240));
        assert_eq!(overlay.get_pixel(110, 102), &image::Rgb([0, 255, 0]));
    }

    #[test]
    fn test_join_text_skips_empty() {
        let result = |text: &str| OcrResult {
            text: text.to_string(),
            polygon: [Point::new(0.0, 0.0); 4],
            confidence: 0.9,
            rotated: false,
        };

        assert_eq!(
            join_text(&[result("AB"), result(""), result("12")], ", ").as_deref(),
            Some("AB, 12")
        );
        assert_eq!(join_text(&[result("")], ", "), None);
        assert_eq!(join_text(&[], ", "), None);
    }

    #[test]
    fn test_report_serializes_without_overlay() {
        let mut pipeline = PipelineOrchestrator::new(
            detector(vec![(320.0, 320.0, 200.0, 100.0, 0, 0.9)]),
            None,
            PipelineConfig::default(),
        )
        .with_overlay(OverlaySettings {
            enabled: true,
            ..Default::default()
        });

        let report = pipeline.process_frame(&frame());
        let json = serde_json::to_value(&report).unwrap();
        assert!(json.get("overlay").is_none());
        assert_eq!(json["detections"][0]["class_name"], "car");
        assert!(json["detections"][0].get("recognized_text").is_none());
    }
}
