//! Overlay Rendering
//!
//! Draws detection rectangles onto a copy of the frame, each with a label
//! bar above it. Label text (class name and recognized text) is drawn when a
//! font is configured; without one only the bar is drawn.

use ab_glyph::FontVec;
use image::{Rgb, RgbImage};
use imageproc::drawing::{draw_filled_rect_mut, draw_hollow_rect_mut, draw_text_mut};
use imageproc::rect::Rect as PixelRect;
use std::path::Path;
use tracing::{info, warn};

use crate::config::OverlaySettings;
use crate::vision::{DetectionResult, Rect};

const TEXT_COLOR: Rgb<u8> = Rgb([0, 0, 0]);

/// Draws detections using the configured style and optional font
pub struct OverlayRenderer {
    settings: OverlaySettings,
    font: Option<FontVec>,
}

impl OverlayRenderer {
    /// Build a renderer, loading the font named in `settings` if any
    ///
    /// A font that cannot be read or parsed is logged and labels are drawn
    /// without text.
    pub fn new(settings: OverlaySettings) -> Self {
        let font = settings.font_path.as_deref().and_then(|path| match load_font(path) {
            Ok(font) => {
                info!("Loaded overlay font {:?}", path);
                Some(font)
            }
            Err(e) => {
                warn!("Overlay labels without text: {}", e);
                None
            }
        });
        Self { settings, font }
    }

    pub fn has_font(&self) -> bool {
        self.font.is_some()
    }

    /// Render every detection on a copy of `image`
    pub fn render(&self, image: &RgbImage, detections: &[DetectionResult]) -> RgbImage {
        let mut canvas = image.clone();
        let color = Rgb(self.settings.color);
        for detection in detections {
            draw_box(
                &mut canvas,
                &detection.bounding_box,
                self.settings.stroke_width,
                color,
            );
            self.draw_label(&mut canvas, detection, color);
        }
        canvas
    }

    /// Filled bar above the box, or inside its top edge when there is no
    /// room above
    fn draw_label(&self, canvas: &mut RgbImage, detection: &DetectionResult, color: Rgb<u8>) {
        let bar_height = self.settings.font_scale.ceil().max(1.0) as i32 + 2;
        let rect = &detection.bounding_box;
        let left = rect.left.floor() as i32;
        let top = rect.top.floor() as i32;
        let width = rect.width().round() as i32;
        if width <= 0 {
            return;
        }

        let bar_top = if top >= bar_height { top - bar_height } else { top };
        draw_filled_rect_mut(
            canvas,
            PixelRect::at(left, bar_top).of_size(width as u32, bar_height as u32),
            color,
        );

        if let Some(font) = &self.font {
            draw_text_mut(
                canvas,
                TEXT_COLOR,
                left + 1,
                bar_top + 1,
                self.settings.font_scale,
                font,
                &label_text(detection),
            );
        }
    }
}

/// `class` or `class: text` when text was recognized
pub fn label_text(detection: &DetectionResult) -> String {
    match &detection.recognized_text {
        Some(text) => format!("{}: {}", detection.class_name, text),
        None => detection.class_name.clone(),
    }
}

fn load_font(path: &Path) -> Result<FontVec, String> {
    let data = std::fs::read(path).map_err(|e| format!("cannot read {:?}: {}", path, e))?;
    FontVec::try_from_vec(data).map_err(|_| format!("cannot parse font {:?}", path))
}

/// Draw a rectangle `stroke` pixels thick, growing inward
fn draw_box(canvas: &mut RgbImage, rect: &Rect, stroke: u32, color: Rgb<u8>) {
    let left = rect.left.floor() as i32;
    let top = rect.top.floor() as i32;
    let width = rect.width().round() as i32;
    let height = rect.height().round() as i32;

    for inset in 0..stroke.max(1) as i32 {
        let w = width - 2 * inset;
        let h = height - 2 * inset;
        if w <= 0 || h <= 0 {
            break;
        }
        let outline = PixelRect::at(left + inset, top + inset).of_size(w as u32, h as u32);
        draw_hollow_rect_mut(canvas, outline, color);
    }
}
