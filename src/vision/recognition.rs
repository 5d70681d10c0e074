//! Text recognition stage
//!
//! CRNN-style recognizer producing per-timestep class scores `[1, T, C]`,
//! decoded with greedy CTC.

use image::RgbImage;
use ndarray::ArrayView2;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

use super::dictionary::Dictionary;
use super::engine::{run_single, InferenceEngine, Tensor};
use super::error::VisionError;
use super::preprocess::{letterbox_tensor, Normalization};

const STAGE: &str = "text recognition";

/// How repeated class indices collapse during CTC decoding
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CtcCollapse {
    /// A repeat of the last emitted character is dropped, even across blanks
    #[default]
    PreviousKept,
    /// Only a repeat of the immediately preceding timestep is dropped, so a
    /// blank between two equal indices keeps both
    PreviousStep,
}

/// Configuration for the text recognizer
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RecognitionConfig {
    pub input_height: u32,
    pub input_width: u32,
    pub collapse: CtcCollapse,
    pub input_name: String,
    pub normalization: Normalization,
}

impl Default for RecognitionConfig {
    fn default() -> Self {
        Self {
            input_height: 48,
            input_width: 320,
            collapse: CtcCollapse::PreviousKept,
            input_name: "x".to_string(),
            normalization: Normalization::IMAGENET,
        }
    }
}

pub struct TextRecognitionStage {
    engine: Box<dyn InferenceEngine>,
    dictionary: Arc<Dictionary>,
    config: RecognitionConfig,
}

impl TextRecognitionStage {
    pub fn new(
        engine: Box<dyn InferenceEngine>,
        dictionary: Arc<Dictionary>,
        config: RecognitionConfig,
    ) -> Self {
        Self {
            engine,
            dictionary,
            config,
        }
    }

    pub fn dictionary(&self) -> &Arc<Dictionary> {
        &self.dictionary
    }

    /// Read the text in a (upright) crop
    pub fn recognize(&mut self, crop: &RgbImage) -> Result<String, VisionError> {
        let (input, _) = letterbox_tensor(
            crop,
            self.config.input_height,
            self.config.input_width,
            &self.config.normalization,
        );
        let output = run_single(self.engine.as_mut(), STAGE, &self.config.input_name, input)?;
        decode_logits(&output, &self.dictionary, self.config.collapse)
    }
}

/// Decode a `[1, T, C]` (or `[T, C]`) logits tensor into text
pub fn decode_logits(
    output: &Tensor,
    dictionary: &Dictionary,
    collapse: CtcCollapse,
) -> Result<String, VisionError> {
    let shape = output.shape();
    let (timesteps, classes) = match shape {
        [1, t, c] | [t, c] => (*t, *c),
        _ => return Err(VisionError::shape(STAGE, "[1, T, C]", shape)),
    };

    let logits = ArrayView2::from_shape((timesteps, classes), output.data())
        .map_err(|e| VisionError::inference(STAGE, e.to_string()))?;

    let indices = ctc_greedy_decode(logits, collapse);
    Ok(dictionary.decode(&indices))
}

/// Greedy CTC: per-timestep argmax, drop blanks (index 0), collapse repeats
///
/// The result never has more entries than there are timesteps.
pub fn ctc_greedy_decode(logits: ArrayView2<'_, f32>, collapse: CtcCollapse) -> Vec<usize> {
    let mut indices = Vec::new();
    let mut previous: Option<usize> = None;

    for step in logits.rows() {
        let mut best = 0;
        for (i, &score) in step.iter().enumerate() {
            if score > step[best] {
                best = i;
            }
        }

        if best != 0 && previous != Some(best) {
            indices.push(best);
        }

        match collapse {
            CtcCollapse::PreviousKept => {
                if best != 0 {
                    previous = Some(best);
                }
            }
            CtcCollapse::PreviousStep => previous = Some(best),
        }
    }

    indices
}
