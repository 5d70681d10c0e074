//! Image preprocessing for the detector, classifier and recognizer models
//!
//! Handles resizing (direct and letterboxed), normalization and NCHW tensor
//! packing, plus the crop/rotate helpers used between stages.

use image::imageops::{self, FilterType};
use image::RgbImage;
use ndarray::Array4;
use serde::{Deserialize, Serialize};

use super::engine::Tensor;
use super::geometry::Rect;

/// Per-channel normalization: `(value / 255 - mean) / std`, RGB order
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Normalization {
    /// Mean values for normalization [R, G, B]
    pub mean: [f32; 3],
    /// Std values for normalization [R, G, B]
    pub std: [f32; 3],
}

impl Normalization {
    /// ImageNet statistics, used by the text models
    pub const IMAGENET: Self = Self {
        mean: [0.485, 0.456, 0.406],
        std: [0.229, 0.224, 0.225],
    };

    /// Plain `value / 255`, used by the object detector
    pub const UNIT: Self = Self {
        mean: [0.0, 0.0, 0.0],
        std: [1.0, 1.0, 1.0],
    };
}

impl Default for Normalization {
    fn default() -> Self {
        Self::IMAGENET
    }
}

/// How a crop was resized-with-padding into a fixed model input
///
/// Model coordinates map back with `source = (model - pad) / scale`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LetterboxTransform {
    /// Resize factor, always > 0
    pub scale: f32,
    /// Horizontal padding on the left edge
    pub pad_x: u32,
    /// Vertical padding on the top edge
    pub pad_y: u32,
}

impl LetterboxTransform {
    /// Map a model-space point back into source-image space
    pub fn to_source(&self, x: f32, y: f32) -> (f32, f32) {
        (
            (x - self.pad_x as f32) / self.scale,
            (y - self.pad_y as f32) / self.scale,
        )
    }

    /// Map a source-image point into model space
    pub fn to_model(&self, x: f32, y: f32) -> (f32, f32) {
        (
            x * self.scale + self.pad_x as f32,
            y * self.scale + self.pad_y as f32,
        )
    }

    /// Map a model-space rectangle back into source-image space
    pub fn invert_rect(&self, rect: &Rect) -> Rect {
        let (left, top) = self.to_source(rect.left, rect.top);
        let (right, bottom) = self.to_source(rect.right, rect.bottom);
        Rect::new(left, top, right, bottom)
    }
}

/// Resize to an exact size, ignoring aspect ratio
pub fn resize_direct(image: &RgbImage, width: u32, height: u32) -> RgbImage {
    if image.dimensions() == (width, height) {
        return image.clone();
    }
    imageops::resize(image, width, height, FilterType::Triangle)
}

/// Aspect-preserving resize into `target_width x target_height`, centered on
/// a black canvas
pub fn letterbox(
    image: &RgbImage,
    target_height: u32,
    target_width: u32,
) -> (RgbImage, LetterboxTransform) {
    let (width, height) = image.dimensions();
    let scale = (target_width as f32 / width.max(1) as f32)
        .min(target_height as f32 / height.max(1) as f32);

    let scaled_width = ((width as f32 * scale) as u32).clamp(1, target_width);
    let scaled_height = ((height as f32 * scale) as u32).clamp(1, target_height);

    let pad_x = (target_width - scaled_width) / 2;
    let pad_y = (target_height - scaled_height) / 2;

    let resized = imageops::resize(image, scaled_width, scaled_height, FilterType::Triangle);
    let mut canvas = RgbImage::new(target_width, target_height);
    imageops::overlay(&mut canvas, &resized, pad_x as i64, pad_y as i64);

    (
        canvas,
        LetterboxTransform {
            scale,
            pad_x,
            pad_y,
        },
    )
}

/// Normalize an RGB image into a `[1, 3, H, W]` array
pub fn to_nchw(image: &RgbImage, norm: &Normalization) -> Array4<f32> {
    let (width, height) = image.dimensions();
    let mut tensor = Array4::<f32>::zeros((1, 3, height as usize, width as usize));

    for (x, y, pixel) in image.enumerate_pixels() {
        for c in 0..3 {
            let value = pixel[c] as f32 / 255.0;
            tensor[[0, c, y as usize, x as usize]] = (value - norm.mean[c]) / norm.std[c];
        }
    }

    tensor
}

/// Letterbox and normalize in one go
pub fn letterbox_tensor(
    image: &RgbImage,
    target_height: u32,
    target_width: u32,
    norm: &Normalization,
) -> (Tensor, LetterboxTransform) {
    let (boxed, transform) = letterbox(image, target_height, target_width);
    (Tensor::from_array4(to_nchw(&boxed, norm)), transform)
}

/// Whole-pixel `(x, y, width, height)` of `rect` inside a `width x height`
/// image
///
/// Edges are truncated and clipped to the image. Returns `None` when
/// nothing of positive width and height remains.
pub fn pixel_bounds(img_width: u32, img_height: u32, rect: &Rect) -> Option<(u32, u32, u32, u32)> {
    let left = (rect.left as i64).clamp(0, img_width as i64);
    let top = (rect.top as i64).clamp(0, img_height as i64);
    let right = (rect.right as i64).clamp(0, img_width as i64);
    let bottom = (rect.bottom as i64).clamp(0, img_height as i64);

    let width = right - left;
    let height = bottom - top;
    if width <= 0 || height <= 0 {
        return None;
    }
    Some((left as u32, top as u32, width as u32, height as u32))
}

/// Cut `rect` out of `image`, see [`pixel_bounds`]
pub fn crop_region(image: &RgbImage, rect: &Rect) -> Option<RgbImage> {
    let (x, y, width, height) = pixel_bounds(image.width(), image.height(), rect)?;
    Some(imageops::crop_imm(image, x, y, width, height).to_image())
}

/// Rotate by 180 degrees
pub fn rotate_180(image: &RgbImage) -> RgbImage {
    imageops::rotate180(image)
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::Rgb;

    #[test]
    fn test_to_nchw_normalizes() {
        let mut image = RgbImage::new(2, 2);
        image.put_pixel(0, 0, Rgb([255, 0, 0]));
        image.put_pixel(1, 0, Rgb([0, 255, 0]));

        let tensor = to_nchw(&image, &Normalization::UNIT);
        assert_eq!(tensor.dim(), (1, 3, 2, 2));
        assert!((tensor[[0, 0, 0, 0]] - 1.0).abs() < 0.01);
        assert!(tensor[[0, 1, 0, 0]].abs() < 0.01);
        assert!((tensor[[0, 1, 0, 1]] - 1.0).abs() < 0.01);

        let imagenet = to_nchw(&image, &Normalization::IMAGENET);
        assert!((imagenet[[0, 0, 0, 0]] - (1.0 - 0.485) / 0.229).abs() < 0.01);
        assert!((imagenet[[0, 2, 1, 1]] - (0.0 - 0.406) / 0.225).abs() < 0.01);
    }

    #[test]
    fn test_letterbox_wide_image() {
        let image = RgbImage::from_pixel(200, 50, Rgb([255, 255, 255]));
        let (boxed, transform) = letterbox(&image, 48, 192);

        assert_eq!(boxed.dimensions(), (192, 48));
        assert!((transform.scale - 0.96).abs() < 0.001);
        assert_eq!(transform.pad_x, 0);
        // 50 * 0.96 = 48
        assert_eq!(transform.pad_y, 0);
    }

    #[test]
    fn test_letterbox_tall_image_is_centered() {
        let image = RgbImage::from_pixel(100, 200, Rgb([255, 255, 255]));
        let (boxed, transform) = letterbox(&image, 100, 200);

        assert!((transform.scale - 0.5).abs() < 0.001);
        assert_eq!(transform.pad_x, 75);
        assert_eq!(transform.pad_y, 0);
        assert_eq!(boxed.get_pixel(10, 50), &Rgb([0, 0, 0]));
        assert_eq!(boxed.get_pixel(100, 50), &Rgb([255, 255, 255]));
    }

    #[test]
    fn test_letterbox_round_trip_within_one_pixel() {
        let image = RgbImage::new(300, 170);
        let (_, transform) = letterbox(&image, 736, 1280);

        for &(x, y) in &[(0.0, 0.0), (17.0, 33.0), (150.0, 85.0), (299.0, 169.0)] {
            let (mx, my) = transform.to_model(x, y);
            // Integer-aligned box corner in letterboxed space
            let (sx, sy) = transform.to_source(mx.round(), my.round());
            assert!((sx - x).abs() <= 1.0, "x {} -> {}", x, sx);
            assert!((sy - y).abs() <= 1.0, "y {} -> {}", y, sy);
        }
    }

    #[test]
    fn test_crop_region_clips_and_rejects_empty() {
        let image = RgbImage::new(100, 50);

        let crop = crop_region(&image, &Rect::new(90.5, 40.0, 150.0, 80.0)).unwrap();
        assert_eq!(crop.dimensions(), (10, 10));

        assert!(crop_region(&image, &Rect::new(10.0, 10.0, 10.0, 40.0)).is_none());
        assert!(crop_region(&image, &Rect::new(120.0, 10.0, 150.0, 40.0)).is_none());
    }

    #[test]
    fn test_rotate_180() {
        let mut image = RgbImage::new(3, 2);
        image.put_pixel(0, 0, Rgb([9, 9, 9]));
        let rotated = rotate_180(&image);
        assert_eq!(rotated.get_pixel(2, 1), &Rgb([9, 9, 9]));
    }
}
