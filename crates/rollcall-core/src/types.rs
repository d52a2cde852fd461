use image::GrayImage;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Axis-aligned face region in image pixel coordinates.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct BoundingBox {
    pub x: u32,
    pub y: u32,
    pub width: u32,
    pub height: u32,
}

impl BoundingBox {
    /// Clip a raw detector rectangle to the image bounds.
    ///
    /// Detectors may report boxes that start at negative coordinates or run
    /// past the right/bottom edge. Returns `None` when nothing of the box
    /// remains inside the image.
    pub fn from_raw(
        x: i32,
        y: i32,
        width: u32,
        height: u32,
        image_width: u32,
        image_height: u32,
    ) -> Option<Self> {
        let x0 = i64::from(x).clamp(0, i64::from(image_width));
        let y0 = i64::from(y).clamp(0, i64::from(image_height));
        let x1 = (i64::from(x) + i64::from(width)).clamp(0, i64::from(image_width));
        let y1 = (i64::from(y) + i64::from(height)).clamp(0, i64::from(image_height));

        if x1 <= x0 || y1 <= y0 {
            return None;
        }

        Some(Self {
            x: x0 as u32,
            y: y0 as u32,
            width: (x1 - x0) as u32,
            height: (y1 - y0) as u32,
        })
    }
}

/// Raw grayscale pixel patch of one enrolled face sample.
///
/// No normalization or embedding: the cropped region is stored as-is.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FaceTemplate {
    pub width: u32,
    pub height: u32,
    /// Row-major luma bytes (width * height).
    pub pixels: Vec<u8>,
}

impl FaceTemplate {
    /// Copy the region under `bbox` out of a grayscale frame.
    pub fn crop(gray: &GrayImage, bbox: &BoundingBox) -> Self {
        let region = image::imageops::crop_imm(gray, bbox.x, bbox.y, bbox.width, bbox.height)
            .to_image();
        Self {
            width: region.width(),
            height: region.height(),
            pixels: region.into_raw(),
        }
    }

    /// View the template as an image buffer.
    ///
    /// Returns `None` if the pixel buffer does not match the stored dimensions.
    pub fn as_image(&self) -> Option<GrayImage> {
        GrayImage::from_raw(self.width, self.height, self.pixels.clone())
    }
}

/// One enrolled face: a template and the name it belongs to.
///
/// Labels need not be unique; several records with the same label are
/// several samples of one identity.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FaceRecord {
    pub template: FaceTemplate,
    pub label: String,
}

/// Closest gallery entry for a probe region.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Prediction {
    /// Index of the matched record in the gallery the matcher was trained on.
    pub index: usize,
    /// Dissimilarity to that record. 0 is a perfect match.
    pub distance: f64,
}

/// Outcome of recognizing one detected face.
#[derive(Debug, Clone, PartialEq)]
pub enum Recognition {
    Recognized { label: String, distance: f64 },
    Unknown,
    /// The matcher failed on this region; other regions are unaffected.
    Error(String),
    /// The gallery is empty, so the matcher was never consulted.
    NoKnownFaces,
}

impl Recognition {
    /// Confidence-style score (100 - distance) for an accepted match.
    pub fn confidence(&self) -> Option<f64> {
        match self {
            Recognition::Recognized { distance, .. } => Some(100.0 - distance),
            _ => None,
        }
    }
}

impl fmt::Display for Recognition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Recognition::Recognized { label, distance } => {
                write!(f, "Found {label} (Confidence: {:.2}%)", 100.0 - distance)
            }
            Recognition::Unknown => f.write_str("Unknown face detected"),
            Recognition::Error(_) => f.write_str("Error recognizing face"),
            Recognition::NoKnownFaces => f.write_str("No known faces in database"),
        }
    }
}

/// A detected face together with its recognition outcome.
#[derive(Debug, Clone, PartialEq)]
pub struct FaceResult {
    pub bbox: BoundingBox,
    pub recognition: Recognition,
}
