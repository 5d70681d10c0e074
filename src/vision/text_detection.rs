//! Text detection stage
//!
//! Runs a DB-style text detector on a letterboxed crop and grows candidate
//! regions out of the resulting probability map:
//!
//! 1. binarize at `pixel_threshold`
//! 2. 4-connected components (iterative flood fill over a visited grid)
//! 3. drop small components and components whose mean probability is
//!    below `box_threshold`
//! 4. pad the axis-aligned bound to undo the shrinking the model is trained
//!    with, then clip to the map
//!
//! Regions come out in discovery order (row-major scan of the map), not in
//! reading order.

use image::RgbImage;
use ndarray::ArrayView2;
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::time::Instant;
use tracing::debug;

use super::engine::{run_single, InferenceEngine};
use super::error::VisionError;
use super::geometry::{Point, Rect};
use super::preprocess::{letterbox_tensor, LetterboxTransform, Normalization};

const STAGE: &str = "text detection";

/// Configuration for the text detector
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TextDetectionConfig {
    /// Model input height
    pub input_height: u32,
    /// Model input width
    pub input_width: u32,
    /// A pixel is text if its probability is above this
    pub pixel_threshold: f32,
    /// Minimum mean probability for a region
    pub box_threshold: f32,
    /// Components with fewer pixels are discarded
    pub min_component_pixels: usize,
    /// Padding per side, as a fraction of the component height
    pub pad_ratio: f32,
    /// Constant padding per side, in map pixels
    pub pad_constant: u32,
    /// Model input tensor name
    pub input_name: String,
    /// Input normalization
    pub normalization: Normalization,
}

impl Default for TextDetectionConfig {
    fn default() -> Self {
        Self {
            input_height: 736,
            input_width: 1280,
            pixel_threshold: 0.3,
            box_threshold: 0.5,
            min_component_pixels: 10,
            pad_ratio: 0.5,
            pad_constant: 3,
            input_name: "x".to_string(),
            normalization: Normalization::IMAGENET,
        }
    }
}

/// A candidate text region in model-input coordinates
#[derive(Debug, Clone, PartialEq)]
pub struct CandidateTextRegion {
    /// Corners, clockwise from top-left
    pub points: [Point; 4],
    /// Mean probability over the component's pixels
    pub score: f32,
}

impl CandidateTextRegion {
    /// Axis-aligned bound of the corners
    pub fn bound(&self) -> Rect {
        Rect::bounding(&self.points)
    }
}

/// Output of one text detection pass
#[derive(Debug, Clone)]
pub struct TextDetection {
    pub regions: Vec<CandidateTextRegion>,
    /// The letterbox used to build the model input
    pub transform: LetterboxTransform,
}

impl TextDetection {
    /// Region bound mapped back into the coordinates of the detected crop
    pub fn region_in_source(&self, region: &CandidateTextRegion) -> Rect {
        self.transform.invert_rect(&region.bound())
    }
}

/// Runs the text detector model and extracts candidate regions
pub struct TextDetectionStage {
    engine: Box<dyn InferenceEngine>,
    config: TextDetectionConfig,
}

impl TextDetectionStage {
    pub fn new(engine: Box<dyn InferenceEngine>, config: TextDetectionConfig) -> Self {
        Self { engine, config }
    }

    pub fn config(&self) -> &TextDetectionConfig {
        &self.config
    }

    /// Find text regions in a crop
    pub fn detect(&mut self, crop: &RgbImage) -> Result<TextDetection, VisionError> {
        let start = Instant::now();
        let (input, transform) = letterbox_tensor(
            crop,
            self.config.input_height,
            self.config.input_width,
            &self.config.normalization,
        );

        let output = run_single(self.engine.as_mut(), STAGE, &self.config.input_name, input)?;

        let shape = output.shape();
        if shape.len() < 2 || shape[..shape.len() - 2].iter().any(|&d| d != 1) {
            return Err(VisionError::shape(STAGE, "[1, 1, H, W]", shape));
        }
        let map_height = shape[shape.len() - 2];
        let map_width = shape[shape.len() - 1];
        let prob = ArrayView2::from_shape((map_height, map_width), output.data())
            .map_err(|e| VisionError::inference(STAGE, e.to_string()))?;

        let mut regions = extract_regions(prob, &self.config);

        // Maps that come back at a different resolution than the input are
        // rescaled into input space before the letterbox is inverted
        if map_width != self.config.input_width as usize
            || map_height != self.config.input_height as usize
        {
            let sx = self.config.input_width as f32 / map_width.max(1) as f32;
            let sy = self.config.input_height as f32 / map_height.max(1) as f32;
            for region in &mut regions {
                for point in &mut region.points {
                    point.x *= sx;
                    point.y *= sy;
                }
            }
        }

        debug!(
            "Text detection: {} regions on {}x{} map in {:?}",
            regions.len(),
            map_width,
            map_height,
            start.elapsed()
        );

        Ok(TextDetection { regions, transform })
    }
}

/// Extract padded candidate regions from a probability map
pub fn extract_regions(
    prob: ArrayView2<'_, f32>,
    config: &TextDetectionConfig,
) -> Vec<CandidateTextRegion> {
    let (height, width) = prob.dim();
    let binary: Vec<bool> = prob.iter().map(|&p| p > config.pixel_threshold).collect();

    let mut regions = Vec::new();
    for component in connected_components(&binary, width, height) {
        if component.len() < config.min_component_pixels {
            continue;
        }

        let score = component
            .iter()
            .map(|&(y, x)| prob[[y, x]])
            .sum::<f32>()
            / component.len() as f32;
        if score < config.box_threshold {
            continue;
        }

        let mut min_x = usize::MAX;
        let mut min_y = usize::MAX;
        let mut max_x = 0;
        let mut max_y = 0;
        for &(y, x) in &component {
            min_x = min_x.min(x);
            max_x = max_x.max(x);
            min_y = min_y.min(y);
            max_y = max_y.max(y);
        }

        let box_height = (max_y - min_y) as f32;
        let padding = (box_height * config.pad_ratio) as usize + config.pad_constant as usize;

        let left = min_x.saturating_sub(padding);
        let top = min_y.saturating_sub(padding);
        let right = (max_x + padding).min(width);
        let bottom = (max_y + padding).min(height);

        let rect = Rect::new(left as f32, top as f32, right as f32, bottom as f32);
        regions.push(CandidateTextRegion {
            points: rect.corners(),
            score,
        });
    }

    regions
}

/// 4-connected components of a row-major binary grid
///
/// Iterative BFS over an explicit visited grid, so stack depth does not grow
/// with component size. Components are returned in row-major discovery
/// order as lists of `(y, x)`.
pub fn connected_components(
    binary: &[bool],
    width: usize,
    height: usize,
) -> Vec<Vec<(usize, usize)>> {
    debug_assert_eq!(binary.len(), width * height);

    let mut visited = vec![false; width * height];
    let mut queue = VecDeque::new();
    let mut components = Vec::new();

    for start_y in 0..height {
        for start_x in 0..width {
            let start = start_y * width + start_x;
            if !binary[start] || visited[start] {
                continue;
            }

            let mut component = Vec::new();
            visited[start] = true;
            queue.push_back((start_y, start_x));

            while let Some((y, x)) = queue.pop_front() {
                component.push((y, x));

                let neighbors = [
                    (y, x + 1),
                    (y, x.wrapping_sub(1)),
                    (y + 1, x),
                    (y.wrapping_sub(1), x),
                ];
                for (ny, nx) in neighbors {
                    if ny >= height || nx >= width {
                        continue;
                    }
                    let idx = ny * width + nx;
                    if binary[idx] && !visited[idx] {
                        visited[idx] = true;
                        queue.push_back((ny, nx));
                    }
                }
            }

            components.push(component);
        }
    }

    components
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::vision::engine::{ClosureEngine, Tensor};
    use ndarray::Array2;

    fn fill(map: &mut Array2<f32>, rows: std::ops::Range<usize>, cols: std::ops::Range<usize>, v: f32) {
        for y in rows {
            for x in cols.clone() {
                map[[y, x]] = v;
            }
        }
    }

    #[test]
    fn test_two_blobs_two_regions() {
        let mut map = Array2::<f32>::zeros((60, 120));
        fill(&mut map, 10..20, 10..40, 0.8);
        fill(&mut map, 35..45, 60..110, 0.8);

        let regions = extract_regions(map.view(), &TextDetectionConfig::default());

        assert_eq!(regions.len(), 2);
        for region in &regions {
            assert!((region.score - 0.8).abs() < 1e-4);
        }
        // Row-major discovery order
        assert!(regions[0].bound().top < regions[1].bound().top);
    }

    #[test]
    fn test_padding_and_clipping() {
        let mut map = Array2::<f32>::zeros((50, 100));
        // Component rows 2..=6, cols 40..=59: height 4 -> padding 2 + 3
        fill(&mut map, 2..7, 40..60, 0.9);

        let regions = extract_regions(map.view(), &TextDetectionConfig::default());
        assert_eq!(regions.len(), 1);
        let bound = regions[0].bound();
        assert_eq!(bound, Rect::new(35.0, 0.0, 64.0, 11.0));

        // Corners are clockwise from top-left
        let p = regions[0].points;
        assert_eq!(p[0], Point::new(35.0, 0.0));
        assert_eq!(p[1], Point::new(64.0, 0.0));
        assert_eq!(p[2], Point::new(64.0, 11.0));
        assert_eq!(p[3], Point::new(35.0, 11.0));
    }

    #[test]
    fn test_pad_clipped_to_map_edge() {
        let mut map = Array2::<f32>::zeros((20, 30));
        fill(&mut map, 10..20, 20..30, 0.9);

        let regions = extract_regions(map.view(), &TextDetectionConfig::default());
        let bound = regions[0].bound();
        assert_eq!(bound.right, 30.0);
        assert_eq!(bound.bottom, 20.0);
    }

    #[test]
    fn test_small_and_weak_components_dropped() {
        let mut map = Array2::<f32>::zeros((40, 40));
        // 9 pixels, below the minimum of 10
        fill(&mut map, 2..5, 2..5, 0.9);
        // Above pixel threshold but mean below box threshold
        fill(&mut map, 20..30, 20..30, 0.4);

        let regions = extract_regions(map.view(), &TextDetectionConfig::default());
        assert!(regions.is_empty());

        let config = TextDetectionConfig {
            min_component_pixels: 50,
            box_threshold: 0.3,
            ..Default::default()
        };
        let regions = extract_regions(map.view(), &config);
        assert_eq!(regions.len(), 1);
    }

    #[test]
    fn test_diagonal_pixels_are_separate_components() {
        #[rustfmt::skip]
        let binary = vec![
            true,  false, false,
            false, true,  false,
            false, false, true,
        ];
        let components = connected_components(&binary, 3, 3);
        assert_eq!(components.len(), 3);
    }

    #[test]
    fn test_large_component_does_not_recurse() {
        let (width, height) = (1280, 736);
        let binary = vec![true; width * height];
        let components = connected_components(&binary, width, height);
        assert_eq!(components.len(), 1);
        assert_eq!(components[0].len(), width * height);
    }

    #[test]
    fn test_stage_inverts_letterbox() {
        let config = TextDetectionConfig {
            input_height: 64,
            input_width: 128,
            ..Default::default()
        };
        let engine = ClosureEngine::new(|input: &Tensor| {
            assert_eq!(input.shape(), &[1, 3, 64, 128]);
            let mut map = vec![0.0f32; 64 * 128];
            for y in 20..30 {
                for x in 40..80 {
                    map[y * 128 + x] = 0.9;
                }
            }
            Tensor::new(vec![1, 1, 64, 128], map)
        });

        let mut stage = TextDetectionStage::new(Box::new(engine), config);
        // 200x200 crop -> scale 0.32, 64x64 content, pad_x 32
        let crop = RgbImage::new(200, 200);
        let detection = stage.detect(&crop).unwrap();

        assert_eq!(detection.transform.pad_x, 32);
        assert_eq!(detection.transform.pad_y, 0);
        assert_eq!(detection.regions.len(), 1);

        let source = detection.region_in_source(&detection.regions[0]);
        let bound = detection.regions[0].bound();
        assert!((source.left - (bound.left - 32.0) / 0.32).abs() < 0.01);
        assert!((source.top - bound.top / 0.32).abs() < 0.01);
    }

    #[test]
    fn test_stage_rejects_bad_shape() {
        let engine = ClosureEngine::new(|_: &Tensor| Tensor::new(vec![2, 4, 4], vec![0.0; 32]));
        let mut stage = TextDetectionStage::new(
            Box::new(engine),
            TextDetectionConfig {
                input_height: 32,
                input_width: 32,
                ..Default::default()
            },
        );
        let result = stage.detect(&RgbImage::new(10, 10));
        assert!(matches!(result, Err(VisionError::TensorShape { .. })));
    }
}
