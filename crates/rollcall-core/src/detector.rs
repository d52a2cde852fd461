//! Face detection via the SeetaFace cascade shipped in `rustface`.
//!
//! Detection sensitivity is fixed at build time; callers only get boxes.

use crate::types::BoundingBox;
use image::GrayImage;
use rustface::ImageData;
use std::path::Path;
use thiserror::Error;

// --- Named constants (fixed sensitivity, not user-configurable) ---
const SEETA_MIN_FACE_SIZE: u32 = 20;
const SEETA_SCORE_THRESHOLD: f64 = 2.0;
const SEETA_PYRAMID_SCALE_FACTOR: f32 = 0.8;
const SEETA_SLIDE_WINDOW_STEP: u32 = 4;

#[derive(Error, Debug)]
pub enum DetectorError {
    #[error("model file not found: {0}; download seeta_fd_frontal_v1.0.bin and place it in models/")]
    ModelNotFound(String),
    #[error("failed to load detection model {path}: {reason}")]
    ModelLoad { path: String, reason: String },
}

/// Anything that can find face regions in a grayscale image.
///
/// No ordering is guaranteed for the returned boxes.
pub trait FaceDetector {
    fn detect(&mut self, gray: &GrayImage) -> Result<Vec<BoundingBox>, DetectorError>;
}

/// SeetaFace frontal-face cascade detector.
pub struct SeetaDetector {
    inner: Box<dyn rustface::Detector>,
}

impl SeetaDetector {
    /// Load the SeetaFace model from the given path.
    pub fn load(model_path: &Path) -> Result<Self, DetectorError> {
        let path = model_path.to_string_lossy().into_owned();
        if !model_path.exists() {
            return Err(DetectorError::ModelNotFound(path));
        }

        let mut inner = rustface::create_detector(&path).map_err(|e| DetectorError::ModelLoad {
            path: path.clone(),
            reason: e.to_string(),
        })?;
        inner.set_min_face_size(SEETA_MIN_FACE_SIZE);
        inner.set_score_thresh(SEETA_SCORE_THRESHOLD);
        inner.set_pyramid_scale_factor(SEETA_PYRAMID_SCALE_FACTOR);
        inner.set_slide_window_step(SEETA_SLIDE_WINDOW_STEP, SEETA_SLIDE_WINDOW_STEP);

        tracing::info!(path = %path, "loaded SeetaFace detector");

        Ok(Self { inner })
    }
}

impl FaceDetector for SeetaDetector {
    fn detect(&mut self, gray: &GrayImage) -> Result<Vec<BoundingBox>, DetectorError> {
        let (width, height) = gray.dimensions();
        // rustface panics on degenerate images
        if width == 0 || height == 0 {
            return Ok(Vec::new());
        }

        let mut image = ImageData::new(gray.as_raw(), width, height);
        let faces = self.inner.detect(&mut image);

        let boxes: Vec<BoundingBox> = faces
            .iter()
            .filter_map(|face| {
                let bbox = face.bbox();
                BoundingBox::from_raw(bbox.x(), bbox.y(), bbox.width(), bbox.height(), width, height)
            })
            .collect();

        tracing::debug!(count = boxes.len(), width, height, "detected faces");
        Ok(boxes)
    }
}
