//! Image preparation and annotation for the preview pane.

use crate::types::BoundingBox;
use image::imageops::FilterType;
use image::{DynamicImage, GrayImage, Rgb, RgbImage};
use imageproc::drawing::draw_hollow_rect_mut;
use imageproc::rect::Rect;

/// Outline color for detected faces.
pub const BOX_COLOR: Rgb<u8> = Rgb([0, 255, 0]);
/// Outline thickness in pixels.
pub const BOX_THICKNESS: u32 = 2;

/// Split a decoded image into its display buffer and grayscale working copy.
pub fn split_channels(image: DynamicImage) -> (RgbImage, GrayImage) {
    let gray = image.to_luma8();
    (image.into_rgb8(), gray)
}

/// Draw a face outline onto `image`, clipped to its bounds.
pub fn draw_face_box(image: &mut RgbImage, bbox: &BoundingBox) {
    for inset in 0..BOX_THICKNESS {
        let width = bbox.width.saturating_sub(2 * inset);
        let height = bbox.height.saturating_sub(2 * inset);
        if width == 0 || height == 0 {
            break;
        }
        let rect = Rect::at((bbox.x + inset) as i32, (bbox.y + inset) as i32).of_size(width, height);
        draw_hollow_rect_mut(image, rect, BOX_COLOR);
    }
}

/// Scale factor that fits `width` x `height` inside the preview box.
///
/// Never enlarges: images already inside the box keep a factor of 1.
pub fn fit_scale(width: u32, height: u32, max_width: u32, max_height: u32) -> f32 {
    if width == 0 || height == 0 {
        return 1.0;
    }
    let scale_w = max_width as f32 / width as f32;
    let scale_h = max_height as f32 / height as f32;
    scale_w.min(scale_h).min(1.0)
}

/// Downscale `image` to fit the preview box, preserving aspect ratio.
pub fn preview(image: &RgbImage, max_width: u32, max_height: u32) -> RgbImage {
    let (width, height) = image.dimensions();
    let scale = fit_scale(width, height, max_width, max_height);
    if scale >= 1.0 {
        return image.clone();
    }

    let new_w = ((width as f32 * scale) as u32).max(1);
    let new_h = ((height as f32 * scale) as u32).max(1);
    image::imageops::resize(image, new_w, new_h, FilterType::Triangle)
}
