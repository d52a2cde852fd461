//! Face matching via OpenCV's LBPH (local binary pattern histogram)
//! recognizer.
//!
//! The model is always rebuilt from the full gallery, so every enrollment
//! costs O(gallery). That is only acceptable for small galleries.

use crate::types::{FaceRecord, Prediction};
use image::GrayImage;
use opencv::core::{Mat, Ptr, Vector};
use opencv::face::LBPHFaceRecognizer;
use opencv::prelude::*;
use thiserror::Error;

// --- Named constants (OpenCV LBPH defaults) ---
const LBPH_RADIUS: i32 = 1;
const LBPH_NEIGHBORS: i32 = 8;
const LBPH_GRID_X: i32 = 8;
const LBPH_GRID_Y: i32 = 8;
/// The recognizer never rejects on its own; thresholding is the caller's job.
const LBPH_THRESHOLD: f64 = f64::MAX;
/// Smallest side whose LBP image still gives every grid cell a pixel.
const MIN_TEMPLATE_SIDE: u32 = (2 * LBPH_RADIUS + LBPH_GRID_X) as u32;

#[derive(Error, Debug)]
pub enum RecognizerError {
    #[error(
        "face region {width}x{height} is too small (need at least {min}x{min})",
        min = MIN_TEMPLATE_SIDE
    )]
    TemplateTooSmall { width: u32, height: u32 },
    #[error("stored template {index} is malformed: pixel buffer does not match {width}x{height}")]
    MalformedTemplate { index: usize, width: u32, height: u32 },
    #[error("recognizer has not been trained")]
    NotTrained,
    #[error("recognizer returned no label")]
    NoLabel,
    #[error("opencv: {0}")]
    OpenCv(#[from] opencv::Error),
}

/// Strategy for matching a probe face region against an enrolled gallery.
pub trait FaceMatcher {
    /// Rebuild the model from scratch over `gallery`.
    fn train(&mut self, gallery: &[FaceRecord]) -> Result<(), RecognizerError>;

    /// Find the closest trained gallery entry. Smaller distance is better.
    fn predict(&self, probe: &GrayImage) -> Result<Prediction, RecognizerError>;
}

/// OpenCV LBPH recognizer. Labels are gallery indices.
pub struct LbphRecognizer {
    model: Ptr<LBPHFaceRecognizer>,
    trained: usize,
}

impl LbphRecognizer {
    pub fn new() -> Result<Self, RecognizerError> {
        Ok(Self { model: create_model()?, trained: 0 })
    }

    /// Number of templates in the trained model.
    pub fn len(&self) -> usize {
        self.trained
    }

    pub fn is_empty(&self) -> bool {
        self.trained == 0
    }
}

impl FaceMatcher for LbphRecognizer {
    fn train(&mut self, gallery: &[FaceRecord]) -> Result<(), RecognizerError> {
        // OpenCV refuses to train on nothing; an empty gallery is a fresh model.
        if gallery.is_empty() {
            self.model = create_model()?;
            self.trained = 0;
            return Ok(());
        }

        let mut images = Vector::<Mat>::new();
        let mut labels = Vector::<i32>::new();
        for (index, record) in gallery.iter().enumerate() {
            let template = &record.template;
            let image = template.as_image().ok_or(RecognizerError::MalformedTemplate {
                index,
                width: template.width,
                height: template.height,
            })?;
            images.push(to_mat(&image)?);
            labels.push(index as i32);
        }

        self.model.train(&images, &labels)?;
        self.trained = gallery.len();
        tracing::debug!(templates = self.trained, "LBPH model retrained");
        Ok(())
    }

    fn predict(&self, probe: &GrayImage) -> Result<Prediction, RecognizerError> {
        if self.trained == 0 {
            return Err(RecognizerError::NotTrained);
        }

        let mat = to_mat(probe)?;
        let mut label = -1;
        let mut distance = 0.0;
        self.model.predict(&mat, &mut label, &mut distance)?;

        let index = usize::try_from(label).map_err(|_| RecognizerError::NoLabel)?;
        Ok(Prediction { index, distance })
    }
}

fn create_model() -> Result<Ptr<LBPHFaceRecognizer>, RecognizerError> {
    Ok(LBPHFaceRecognizer::create(
        LBPH_RADIUS,
        LBPH_NEIGHBORS,
        LBPH_GRID_X,
        LBPH_GRID_Y,
        LBPH_THRESHOLD,
    )?)
}

/// Copy a grayscale image into a single-channel 8-bit `Mat`.
fn to_mat(image: &GrayImage) -> Result<Mat, RecognizerError> {
    let (width, height) = image.dimensions();
    if width < MIN_TEMPLATE_SIDE || height < MIN_TEMPLATE_SIDE {
        return Err(RecognizerError::TemplateTooSmall { width, height });
    }

    let borrowed = Mat::new_rows_cols_with_data(height as i32, width as i32, image.as_raw().as_slice())?;
    Ok(borrowed.try_clone()?)
}
