//! OCR (Optical Character Recognition) module
//!
//! Runs the text sub-pipeline on one crop: text detection, then for every
//! candidate region orientation classification and recognition. Uses
//! PaddleOCR-style models through [`InferenceEngine`].

use image::RgbImage;
use std::time::Instant;
use tracing::{debug, warn};

use super::error::VisionError;
use super::geometry::{Point, Rect};
use super::orientation::OrientationStage;
use super::preprocess::{crop_region, rotate_180};
use super::recognition::TextRecognitionStage;
use super::text_detection::{CandidateTextRegion, TextDetection, TextDetectionStage};

/// OCR engine composed of the three text stages
pub struct OcrEngine {
    detector: TextDetectionStage,
    /// Optional; regions are treated as upright without it
    classifier: Option<OrientationStage>,
    recognizer: TextRecognitionStage,
}

impl OcrEngine {
    pub fn new(
        detector: TextDetectionStage,
        classifier: Option<OrientationStage>,
        recognizer: TextRecognitionStage,
    ) -> Self {
        Self {
            detector,
            classifier,
            recognizer,
        }
    }

    pub fn has_classifier(&self) -> bool {
        self.classifier.is_some()
    }

    /// Run OCR on a crop
    ///
    /// Text detection failure fails the whole call. A failure while
    /// classifying or recognizing one region is logged and that region is
    /// skipped; the remaining regions are still processed.
    pub fn recognize(&mut self, crop: &RgbImage) -> Result<Vec<OcrResult>, VisionError> {
        let start = Instant::now();
        let detection = self.detector.detect(crop)?;

        let mut results = Vec::with_capacity(detection.regions.len());
        for (index, region) in detection.regions.iter().enumerate() {
            match self.recognize_region(crop, &detection, region) {
                Ok(Some(result)) => results.push(result),
                Ok(None) => debug!("Text region {} is empty after mapping, skipped", index),
                Err(e) => warn!("OCR failed for text region {}: {}", index, e),
            }
        }

        debug!(
            "OCR: {} of {} regions recognized in {:?}",
            results.len(),
            detection.regions.len(),
            start.elapsed()
        );
        Ok(results)
    }

    fn recognize_region(
        &mut self,
        crop: &RgbImage,
        detection: &TextDetection,
        region: &CandidateTextRegion,
    ) -> Result<Option<OcrResult>, VisionError> {
        let (width, height) = crop.dimensions();
        let bounds = detection
            .region_in_source(region)
            .clip_to(width as f32, height as f32);

        let Some(sub_crop) = crop_region(crop, &bounds) else {
            return Ok(None);
        };

        let rotated = match self.classifier.as_mut() {
            Some(classifier) => classifier.is_rotated_180(&sub_crop)?,
            None => false,
        };

        let text = if rotated {
            let upright = rotate_180(&sub_crop);
            self.recognizer.recognize(&upright)?
        } else {
            self.recognizer.recognize(&sub_crop)?
        };

        Ok(Some(OcrResult {
            text,
            polygon: bounds.corners(),
            confidence: region.score,
            rotated,
        }))
    }
}

/// Single OCR detection result
#[derive(Debug, Clone)]
pub struct OcrResult {
    /// Recognized text
    pub text: String,
    /// Region corners in crop coordinates, clockwise from top-left
    pub polygon: [Point; 4],
    /// Text detection score of the region
    pub confidence: f32,
    /// Whether the region was flipped before recognition
    pub rotated: bool,
}

impl OcrResult {
    pub fn bounds(&self) -> Rect {
        Rect::bounding(&self.polygon)
    }
}
