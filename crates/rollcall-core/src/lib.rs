//! rollcall-core: face store, detection and matching.
//!
//! Detects faces with the SeetaFace cascade (via `rustface`), matches them
//! against a small gallery of raw enrolled templates with an LBPH matcher,
//! and persists the gallery as a single blob on disk.

pub mod config;
pub mod detector;
pub mod recognizer;
pub mod render;
pub mod session;
pub mod store;
pub mod types;

pub use config::Config;
pub use detector::{FaceDetector, SeetaDetector};
pub use recognizer::{FaceMatcher, LbphRecognizer};
pub use session::{Session, SessionError, SessionState};
pub use store::FaceStore;
pub use types::{BoundingBox, FaceRecord, FaceResult, FaceTemplate, Prediction, Recognition};
