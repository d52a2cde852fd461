//! Interactive session: the current image, the gallery, and the actions a
//! user can take on them.
//!
//! Every action runs synchronously to completion. User errors leave both the
//! store and the session image untouched.

use crate::config::Config;
use crate::detector::{DetectorError, FaceDetector};
use crate::recognizer::{FaceMatcher, RecognizerError};
use crate::render;
use crate::store::{FaceStore, StoreError};
use crate::types::{BoundingBox, FaceRecord, FaceResult, FaceTemplate, Recognition};
use image::{GrayImage, RgbImage};
use std::path::Path;
use thiserror::Error;

/// File extensions accepted by [`Session::upload`].
pub const SUPPORTED_EXTENSIONS: [&str; 3] = ["jpg", "jpeg", "png"];

#[derive(Error, Debug)]
pub enum SessionError {
    #[error("Please upload an image first")]
    NoImage,
    #[error("Please enter a name for the face")]
    EmptyLabel,
    #[error("No face detected in the image")]
    NoFaceDetected,
    #[error("The detected face ({width}x{height}) is too small to enroll")]
    FaceTooSmall { width: u32, height: u32 },
    #[error("unsupported image type: {0} (expected .jpg, .jpeg or .png)")]
    UnsupportedFormat(String),
    #[error("failed to open image: {0}")]
    Image(#[from] image::ImageError),
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error("detector error: {0}")]
    Detector(#[from] DetectorError),
    #[error("recognizer error: {0}")]
    Recognizer(#[from] RecognizerError),
}

impl SessionError {
    /// Errors caused by user input rather than a failing component.
    pub fn is_user_error(&self) -> bool {
        matches!(
            self,
            SessionError::NoImage
                | SessionError::EmptyLabel
                | SessionError::NoFaceDetected
                | SessionError::FaceTooSmall { .. }
                | SessionError::UnsupportedFormat(_)
        )
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    NoImage,
    ImageLoaded,
    ResultsAnnotated,
}

/// Currently loaded working image.
struct SessionImage {
    /// Display buffer; recognition draws face boxes onto it.
    display: RgbImage,
    /// Grayscale copy taken at upload, used for detection and cropping.
    gray: GrayImage,
}

/// One user's session over a face store.
pub struct Session<D, M> {
    config: Config,
    store: FaceStore,
    detector: D,
    matcher: M,
    image: Option<SessionImage>,
    state: SessionState,
    results: Vec<FaceResult>,
}

impl<D: FaceDetector, M: FaceMatcher> Session<D, M> {
    /// Start a session, training the matcher on whatever the store holds.
    pub fn new(config: Config, store: FaceStore, detector: D, mut matcher: M) -> Result<Self, SessionError> {
        if !store.is_empty() {
            matcher.train(store.records())?;
        }
        tracing::info!(known_faces = store.len(), "session started");

        Ok(Self {
            config,
            store,
            detector,
            matcher,
            image: None,
            state: SessionState::NoImage,
            results: Vec::new(),
        })
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn store(&self) -> &FaceStore {
        &self.store
    }

    /// Labels of all enrolled faces, in store order.
    pub fn known_labels(&self) -> Vec<String> {
        self.store.labels().map(str::to_owned).collect()
    }

    /// Results of the most recent recognition, cleared on upload.
    pub fn results(&self) -> &[FaceResult] {
        &self.results
    }

    /// Full-size display image, with any drawn annotations.
    pub fn image(&self) -> Option<&RgbImage> {
        self.image.as_ref().map(|img| &img.display)
    }

    /// Display image scaled down to the configured preview box.
    pub fn preview(&self) -> Option<RgbImage> {
        self.image
            .as_ref()
            .map(|img| render::preview(&img.display, self.config.preview_width, self.config.preview_height))
    }

    /// Load a new working image from disk, replacing the current one.
    pub fn upload(&mut self, path: &Path) -> Result<(), SessionError> {
        let extension = path
            .extension()
            .and_then(|e| e.to_str())
            .map(str::to_ascii_lowercase)
            .unwrap_or_default();
        if !SUPPORTED_EXTENSIONS.contains(&extension.as_str()) {
            return Err(SessionError::UnsupportedFormat(path.display().to_string()));
        }

        let decoded = image::open(path)?;
        self.set_image(decoded);
        tracing::info!(path = %path.display(), "image uploaded");
        Ok(())
    }

    /// Replace the working image with an already decoded one.
    pub fn set_image(&mut self, image: image::DynamicImage) {
        let (rgb, gray) = render::split_channels(image);
        tracing::debug!(width = gray.width(), height = gray.height(), "session image replaced");
        self.image = Some(SessionImage { display: rgb, gray });
        self.results.clear();
        self.state = SessionState::ImageLoaded;
    }

    /// Enroll the first face found in the current image under `label`.
    ///
    /// Retrains the matcher over the whole gallery and persists the store.
    pub fn enroll(&mut self, label: &str) -> Result<(), SessionError> {
        let image = self.image.as_ref().ok_or(SessionError::NoImage)?;
        let label = label.trim();
        if label.is_empty() {
            return Err(SessionError::EmptyLabel);
        }

        let faces = self.detector.detect(&image.gray)?;
        let face = faces.first().ok_or(SessionError::NoFaceDetected)?;

        let record = FaceRecord {
            template: FaceTemplate::crop(&image.gray, face),
            label: label.to_string(),
        };

        // Train on the prospective gallery first so a bad template never
        // reaches the store.
        let mut gallery = self.store.records().to_vec();
        gallery.push(record.clone());
        self.matcher.train(&gallery).map_err(|err| match err {
            RecognizerError::TemplateTooSmall { width, height }
                if (width, height) == (face.width, face.height) =>
            {
                SessionError::FaceTooSmall { width, height }
            }
            other => SessionError::Recognizer(other),
        })?;

        self.store.push(record);
        if let Err(err) = self.store.save() {
            self.store.pop();
            if let Err(retrain) = self.matcher.train(self.store.records()) {
                tracing::warn!(error = %retrain, "failed to restore matcher after save error");
            }
            return Err(err.into());
        }

        tracing::info!(label, known_faces = self.store.len(), "face enrolled");
        Ok(())
    }

    /// Recognize every face in the current image and outline each one.
    ///
    /// A matcher failure on one face is reported for that face only.
    pub fn recognize(&mut self) -> Result<&[FaceResult], SessionError> {
        let image = self.image.as_mut().ok_or(SessionError::NoImage)?;

        let faces = self.detector.detect(&image.gray)?;
        if faces.is_empty() {
            return Err(SessionError::NoFaceDetected);
        }

        let mut results = Vec::with_capacity(faces.len());
        for bbox in faces {
            let recognition = classify(
                &self.matcher,
                &self.store,
                &image.gray,
                &bbox,
                self.config.match_threshold,
            );
            render::draw_face_box(&mut image.display, &bbox);
            results.push(FaceResult { bbox, recognition });
        }

        tracing::info!(faces = results.len(), "recognition complete");
        self.results = results;
        self.state = SessionState::ResultsAnnotated;
        Ok(&self.results)
    }
}

fn classify<M: FaceMatcher>(
    matcher: &M,
    store: &FaceStore,
    gray: &GrayImage,
    bbox: &BoundingBox,
    threshold: f64,
) -> Recognition {
    if store.is_empty() {
        return Recognition::NoKnownFaces;
    }

    let probe = image::imageops::crop_imm(gray, bbox.x, bbox.y, bbox.width, bbox.height).to_image();
    match matcher.predict(&probe) {
        Ok(prediction) if prediction.distance < threshold => match store.records().get(prediction.index) {
            Some(record) => Recognition::Recognized {
                label: record.label.clone(),
                distance: prediction.distance,
            },
            None => Recognition::Error(format!("matcher returned unknown index {}", prediction.index)),
        },
        Ok(prediction) => {
            tracing::debug!(distance = prediction.distance, threshold, "match rejected");
            Recognition::Unknown
        }
        Err(err) => {
            tracing::warn!(error = %err, ?bbox, "failed to recognize face");
            Recognition::Error(err.to_string())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::recognizer::LbphRecognizer;
    use crate::types::Prediction;
    use image::{DynamicImage, Luma, Rgb};
    use std::cell::Cell;
    use std::rc::Rc;

    struct FixedDetector(Vec<BoundingBox>);

    impl FaceDetector for FixedDetector {
        fn detect(&mut self, _gray: &GrayImage) -> Result<Vec<BoundingBox>, DetectorError> {
            Ok(self.0.clone())
        }
    }

    /// Returns scripted predictions in order and counts calls.
    #[derive(Clone, Default)]
    struct ScriptedMatcher {
        script: Rc<Vec<Result<Prediction, ()>>>,
        predicts: Rc<Cell<usize>>,
        trains: Rc<Cell<usize>>,
        trained_len: Rc<Cell<usize>>,
    }

    impl ScriptedMatcher {
        fn with(script: Vec<Result<Prediction, ()>>) -> Self {
            Self { script: Rc::new(script), ..Default::default() }
        }
    }

    impl FaceMatcher for ScriptedMatcher {
        fn train(&mut self, gallery: &[FaceRecord]) -> Result<(), RecognizerError> {
            self.trains.set(self.trains.get() + 1);
            self.trained_len.set(gallery.len());
            Ok(())
        }

        fn predict(&self, probe: &GrayImage) -> Result<Prediction, RecognizerError> {
            let call = self.predicts.get();
            self.predicts.set(call + 1);
            match self.script.get(call) {
                Some(Ok(prediction)) => Ok(*prediction),
                _ => Err(RecognizerError::TemplateTooSmall { width: probe.width(), height: probe.height() }),
            }
        }
    }

    fn face(x: u32) -> BoundingBox {
        BoundingBox { x, y: 10, width: 20, height: 20 }
    }

    fn test_image() -> DynamicImage {
        DynamicImage::ImageRgb8(RgbImage::from_fn(100, 60, |x, y| Rgb([(x * 2) as u8, (y * 3) as u8, 90])))
    }

    fn alice_store(dir: &tempfile::TempDir) -> FaceStore {
        let mut store = FaceStore::new(dir.path().join("known_faces.bin"));
        store.push(FaceRecord {
            template: FaceTemplate { width: 20, height: 20, pixels: vec![7; 400] },
            label: "Alice".into(),
        });
        store
    }

    fn session(
        store: FaceStore,
        faces: Vec<BoundingBox>,
        matcher: ScriptedMatcher,
    ) -> Session<FixedDetector, ScriptedMatcher> {
        Session::new(Config::default(), store, FixedDetector(faces), matcher).unwrap()
    }

    #[test]
    fn test_new_trains_on_nonempty_store() {
        let dir = tempfile::tempdir().unwrap();
        let matcher = ScriptedMatcher::default();
        let _ = session(alice_store(&dir), vec![], matcher.clone());
        assert_eq!(matcher.trains.get(), 1);

        let matcher = ScriptedMatcher::default();
        let _ = session(FaceStore::new(dir.path().join("empty.bin")), vec![], matcher.clone());
        assert_eq!(matcher.trains.get(), 0);
    }

    #[test]
    fn test_actions_require_image() {
        let dir = tempfile::tempdir().unwrap();
        let mut s = session(alice_store(&dir), vec![face(10)], ScriptedMatcher::default());
        assert_eq!(s.state(), SessionState::NoImage);
        assert!(matches!(s.enroll("Bob"), Err(SessionError::NoImage)));
        assert!(matches!(s.recognize(), Err(SessionError::NoImage)));
        assert!(s.preview().is_none());
        assert_eq!(s.store().len(), 1);
    }

    #[test]
    fn test_upload_rejects_unsupported_extension() {
        let dir = tempfile::tempdir().unwrap();
        let mut s = session(alice_store(&dir), vec![], ScriptedMatcher::default());
        let err = s.upload(Path::new("photo.gif")).unwrap_err();
        assert!(matches!(err, SessionError::UnsupportedFormat(_)));
        assert!(err.is_user_error());
        assert_eq!(s.state(), SessionState::NoImage);
    }

    #[test]
    fn test_upload_reads_png() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("group.png");
        test_image().save_with_format(&path, image::ImageFormat::Png).unwrap();

        let mut s = session(alice_store(&dir), vec![], ScriptedMatcher::default());
        s.upload(&path).unwrap();
        assert_eq!(s.state(), SessionState::ImageLoaded);
        assert_eq!(s.image().unwrap().dimensions(), (100, 60));
    }

    #[test]
    fn test_enroll_appends_and_persists() {
        let dir = tempfile::tempdir().unwrap();
        let matcher = ScriptedMatcher::default();
        let mut s = session(alice_store(&dir), vec![face(30), face(5)], matcher.clone());
        s.set_image(test_image());

        s.enroll("  Bob ").unwrap();
        assert_eq!(s.known_labels(), vec!["Alice", "Bob"]);
        // full retrain over the new gallery
        assert_eq!(matcher.trained_len.get(), 2);

        let bob = &s.store().records()[1];
        assert_eq!((bob.template.width, bob.template.height), (20, 20));
        // first detected face is used
        let gray = test_image().to_luma8();
        assert_eq!(bob.template.pixels[0], gray.get_pixel(30, 10)[0]);

        let reloaded = FaceStore::load(dir.path().join("known_faces.bin")).unwrap();
        assert_eq!(reloaded.labels().collect::<Vec<_>>(), vec!["Alice", "Bob"]);
    }

    #[test]
    fn test_enroll_empty_label() {
        let dir = tempfile::tempdir().unwrap();
        let mut s = session(alice_store(&dir), vec![face(10)], ScriptedMatcher::default());
        s.set_image(test_image());
        assert!(matches!(s.enroll("   "), Err(SessionError::EmptyLabel)));
        assert_eq!(s.store().len(), 1);
    }

    #[test]
    fn test_no_faces_leaves_state_unchanged() {
        let dir = tempfile::tempdir().unwrap();
        let matcher = ScriptedMatcher::default();
        let mut s = session(alice_store(&dir), vec![], matcher.clone());
        s.set_image(test_image());
        let before = s.image().unwrap().clone();

        assert!(matches!(s.enroll("Bob"), Err(SessionError::NoFaceDetected)));
        assert!(matches!(s.recognize(), Err(SessionError::NoFaceDetected)));

        assert_eq!(s.store().len(), 1);
        assert!(!dir.path().join("known_faces.bin").exists());
        assert_eq!(s.image().unwrap(), &before);
        assert_eq!(s.state(), SessionState::ImageLoaded);
        assert_eq!(matcher.predicts.get(), 0);
    }

    #[test]
    fn test_recognize_empty_store_skips_matcher() {
        let dir = tempfile::tempdir().unwrap();
        let matcher = ScriptedMatcher::default();
        let store = FaceStore::new(dir.path().join("known_faces.bin"));
        let mut s = session(store, vec![face(10)], matcher.clone());
        s.set_image(test_image());

        let results = s.recognize().unwrap();
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].recognition, Recognition::NoKnownFaces);
        assert_eq!(matcher.predicts.get(), 0);
    }

    #[test]
    fn test_recognize_known_face() {
        let dir = tempfile::tempdir().unwrap();
        let matcher = ScriptedMatcher::with(vec![Ok(Prediction { index: 0, distance: 40.0 })]);
        let mut s = session(alice_store(&dir), vec![face(10)], matcher);
        s.set_image(test_image());

        let results = s.recognize().unwrap();
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].recognition.to_string(), "Found Alice (Confidence: 60.00%)");
        assert_eq!(results[0].recognition.confidence(), Some(60.0));
        assert_eq!(s.state(), SessionState::ResultsAnnotated);
    }

    #[test]
    fn test_recognize_above_threshold_is_unknown() {
        let dir = tempfile::tempdir().unwrap();
        let matcher = ScriptedMatcher::with(vec![
            Ok(Prediction { index: 0, distance: 150.0 }),
            Ok(Prediction { index: 0, distance: 100.0 }),
        ]);
        let mut s = session(alice_store(&dir), vec![face(10), face(50)], matcher);
        s.set_image(test_image());

        let results = s.recognize().unwrap();
        assert_eq!(results[0].recognition, Recognition::Unknown);
        assert_eq!(results[0].recognition.to_string(), "Unknown face detected");
        // threshold is exclusive
        assert_eq!(results[1].recognition, Recognition::Unknown);
    }

    #[test]
    fn test_recognize_error_does_not_abort_batch() {
        let dir = tempfile::tempdir().unwrap();
        let matcher = ScriptedMatcher::with(vec![Err(()), Ok(Prediction { index: 0, distance: 10.0 })]);
        let mut s = session(alice_store(&dir), vec![face(10), face(50)], matcher.clone());
        s.set_image(test_image());

        let results = s.recognize().unwrap();
        assert_eq!(results.len(), 2);
        assert!(matches!(results[0].recognition, Recognition::Error(_)));
        assert_eq!(results[0].recognition.to_string(), "Error recognizing face");
        assert_eq!(
            results[1].recognition,
            Recognition::Recognized { label: "Alice".into(), distance: 10.0 }
        );
        assert_eq!(matcher.predicts.get(), 2);
    }

    #[test]
    fn test_recognize_draws_boxes_and_upload_resets() {
        let dir = tempfile::tempdir().unwrap();
        let matcher = ScriptedMatcher::with(vec![Ok(Prediction { index: 0, distance: 10.0 })]);
        let mut s = session(alice_store(&dir), vec![face(10)], matcher);
        s.set_image(test_image());

        s.recognize().unwrap();
        assert_eq!(*s.image().unwrap().get_pixel(10, 10), render::BOX_COLOR);
        assert_eq!(s.results().len(), 1);

        s.set_image(test_image());
        assert_ne!(*s.image().unwrap().get_pixel(10, 10), render::BOX_COLOR);
        assert!(s.results().is_empty());
        assert_eq!(s.state(), SessionState::ImageLoaded);
    }

    #[test]
    fn test_enroll_uses_unannotated_pixels() {
        let dir = tempfile::tempdir().unwrap();
        let matcher = ScriptedMatcher::with(vec![Ok(Prediction { index: 0, distance: 10.0 })]);
        let mut s = session(alice_store(&dir), vec![face(10)], matcher);
        s.set_image(DynamicImage::ImageLuma8(GrayImage::from_pixel(100, 60, Luma([50]))));

        s.recognize().unwrap();
        s.enroll("Bob").unwrap();
        let bob = &s.store().records()[1];
        assert!(bob.template.pixels.iter().all(|&p| p == 50));
    }

    fn ramp() -> DynamicImage {
        DynamicImage::ImageLuma8(GrayImage::from_fn(100, 60, |x, _| Luma([(x * 2) as u8])))
    }

    fn noise() -> DynamicImage {
        let mut state = 0x2545_f491_u32;
        DynamicImage::ImageLuma8(GrayImage::from_fn(100, 60, |_, _| {
            state ^= state << 13;
            state ^= state >> 17;
            state ^= state << 5;
            Luma([(state >> 24) as u8])
        }))
    }

    fn lbph_session(dir: &tempfile::TempDir, faces: Vec<BoundingBox>) -> Session<FixedDetector, LbphRecognizer> {
        let store = FaceStore::new(dir.path().join("known_faces.bin"));
        Session::new(Config::default(), store, FixedDetector(faces), LbphRecognizer::new().unwrap()).unwrap()
    }

    #[test]
    fn test_lbph_enroll_then_recognize_same_face() {
        let dir = tempfile::tempdir().unwrap();
        let mut s = lbph_session(&dir, vec![BoundingBox { x: 10, y: 10, width: 40, height: 40 }]);
        s.set_image(ramp());
        s.enroll("Alice").unwrap();

        let results = s.recognize().unwrap();
        match &results[0].recognition {
            Recognition::Recognized { label, distance } => {
                assert_eq!(label, "Alice");
                assert!(*distance < 100.0, "distance {distance}");
            }
            other => panic!("expected Alice, got {other:?}"),
        }
    }

    #[test]
    fn test_lbph_different_face_is_unknown() {
        let dir = tempfile::tempdir().unwrap();
        let mut s = lbph_session(&dir, vec![BoundingBox { x: 10, y: 10, width: 40, height: 40 }]);
        s.set_image(ramp());
        s.enroll("Alice").unwrap();

        s.set_image(noise());
        let results = s.recognize().unwrap();
        assert_eq!(results[0].recognition, Recognition::Unknown);
    }

    #[test]
    fn test_lbph_enroll_clipped_sliver_is_user_error() {
        let dir = tempfile::tempdir().unwrap();
        // a detection clipped at the right edge of a 100px image
        let mut s = lbph_session(&dir, vec![BoundingBox { x: 94, y: 10, width: 6, height: 30 }]);
        s.set_image(ramp());

        let err = s.enroll("Alice").unwrap_err();
        assert!(matches!(err, SessionError::FaceTooSmall { width: 6, height: 30 }));
        assert!(err.is_user_error());
        assert!(s.store().is_empty());
        assert!(!dir.path().join("known_faces.bin").exists());
    }
}
