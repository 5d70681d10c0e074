//! Frame data structures for captured camera content

use anyhow::{Context, Result};
use image::{RgbImage, RgbaImage};
use std::path::Path;
use std::time::Instant;

/// A captured frame, owned RGB pixels plus capture time
#[derive(Debug, Clone)]
pub struct Frame {
    pub image: RgbImage,
    /// Timestamp when frame was captured
    pub timestamp: Instant,
}

impl Frame {
    /// Create a new frame stamped now
    pub fn new(image: RgbImage) -> Self {
        Self::at(image, Instant::now())
    }

    pub fn at(image: RgbImage, timestamp: Instant) -> Self {
        Self { image, timestamp }
    }

    /// Create a frame from raw RGBA pixel data, dropping alpha
    ///
    /// Returns `None` when `data` does not hold `width * height` pixels.
    pub fn from_rgba(data: Vec<u8>, width: u32, height: u32) -> Option<Self> {
        let rgba = RgbaImage::from_raw(width, height, data)?;
        let rgb = image::DynamicImage::ImageRgba8(rgba).to_rgb8();
        Some(Self::new(rgb))
    }

    /// Decode an image file into a frame
    pub fn open(path: &Path) -> Result<Self> {
        let image = image::open(path)
            .with_context(|| format!("Failed to decode image {:?}", path))?
            .to_rgb8();
        Ok(Self::new(image))
    }

    /// Get frame dimensions as (width, height)
    pub fn dimensions(&self) -> (u32, u32) {
        self.image.dimensions()
    }

    pub fn width(&self) -> u32 {
        self.image.width()
    }

    pub fn height(&self) -> u32 {
        self.image.height()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::Rgb;
    use tempfile::TempDir;

    #[test]
    fn test_from_rgba_drops_alpha() {
        let data = vec![10, 20, 30, 255, 40, 50, 60, 0];
        let frame = Frame::from_rgba(data, 2, 1).unwrap();
        assert_eq!(frame.dimensions(), (2, 1));
        assert_eq!(frame.image.get_pixel(1, 0), &Rgb([40, 50, 60]));
    }

    #[test]
    fn test_from_rgba_wrong_size() {
        assert!(Frame::from_rgba(vec![0; 7], 2, 1).is_none());
    }

    #[test]
    fn test_open_png() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("frame.png");
        RgbImage::from_pixel(8, 4, Rgb([1, 2, 3])).save(&path).unwrap();

        let frame = Frame::open(&path).unwrap();
        assert_eq!(frame.dimensions(), (8, 4));
        assert_eq!(frame.image.get_pixel(7, 3), &Rgb([1, 2, 3]));
    }

    #[test]
    fn test_open_missing_file() {
        assert!(Frame::open(Path::new("/nonexistent/frame.png")).is_err());
    }
}
