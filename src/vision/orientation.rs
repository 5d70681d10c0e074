//! Text orientation classifier
//!
//! Two-class model: index 0 is upright, index 1 is rotated by 180 degrees.

use image::RgbImage;
use serde::{Deserialize, Serialize};

use super::engine::{run_single, InferenceEngine, Tensor};
use super::error::VisionError;
use super::preprocess::{letterbox_tensor, Normalization};

const STAGE: &str = "orientation";

/// Configuration for the orientation classifier
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct OrientationConfig {
    /// Use the classifier at all; when off every region is treated as upright
    pub enabled: bool,
    pub input_height: u32,
    pub input_width: u32,
    /// A region is rotated if P(rotated) is above this
    pub rotation_threshold: f32,
    pub input_name: String,
    pub normalization: Normalization,
}

impl Default for OrientationConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            input_height: 48,
            input_width: 192,
            rotation_threshold: 0.5,
            input_name: "x".to_string(),
            normalization: Normalization::IMAGENET,
        }
    }
}

pub struct OrientationStage {
    engine: Box<dyn InferenceEngine>,
    config: OrientationConfig,
}

impl OrientationStage {
    pub fn new(engine: Box<dyn InferenceEngine>, config: OrientationConfig) -> Self {
        Self { engine, config }
    }

    /// Whether the crop is upside down
    pub fn is_rotated_180(&mut self, crop: &RgbImage) -> Result<bool, VisionError> {
        let (input, _) = letterbox_tensor(
            crop,
            self.config.input_height,
            self.config.input_width,
            &self.config.normalization,
        );
        let output = run_single(self.engine.as_mut(), STAGE, &self.config.input_name, input)?;
        classify_rotation(&output, self.config.rotation_threshold)
    }
}

/// Read a `[1, 2]` probability vector
pub fn classify_rotation(output: &Tensor, threshold: f32) -> Result<bool, VisionError> {
    let data = output.data();
    if data.len() < 2 {
        return Err(VisionError::shape(STAGE, "[1, 2]", output.shape()));
    }
    Ok(data[1] > threshold)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::vision::engine::ClosureEngine;

    fn probs(upright: f32, rotated: f32) -> Tensor {
        Tensor::new(vec![1, 2], vec![upright, rotated]).unwrap()
    }

    #[test]
    fn test_classify_rotation() {
        assert!(classify_rotation(&probs(0.1, 0.9), 0.5).unwrap());
        assert!(!classify_rotation(&probs(0.9, 0.1), 0.5).unwrap());
        // Strictly greater than the threshold
        assert!(!classify_rotation(&probs(0.5, 0.5), 0.5).unwrap());
    }

    #[test]
    fn test_short_output_is_error() {
        let output = Tensor::new(vec![1, 1], vec![0.7]).unwrap();
        assert!(classify_rotation(&output, 0.5).is_err());
    }

    #[test]
    fn test_stage_uses_fixed_input_size() {
        let engine = ClosureEngine::new(|input: &Tensor| {
            assert_eq!(input.shape(), &[1, 3, 48, 192]);
            Tensor::new(vec![1, 2], vec![0.2, 0.8])
        });
        let mut stage = OrientationStage::new(Box::new(engine), OrientationConfig::default());

        assert!(stage.is_rotated_180(&RgbImage::new(90, 20)).unwrap());
        // Deterministic
        assert!(stage.is_rotated_180(&RgbImage::new(90, 20)).unwrap());
    }
}
