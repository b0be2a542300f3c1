//! facematch-onnx — ONNX Runtime face locator and encoder.
//!
//! Provides SCRFD detection and ArcFace embedding as `facematch-core`
//! collaborators, both running on CPU via ONNX Runtime.
//!
//! ArcFace embeddings are L2-normalized, so Euclidean distances between them
//! fall in [0, 2]. Use [`ARCFACE_DISTANCE_THRESHOLD`] rather than the core
//! default, which is scaled for 128-d dlib-style encodings.

pub mod alignment;
pub mod encoder;
pub mod locator;
pub mod session;

pub use encoder::ArcFaceEncoder;
pub use locator::{ScrfdLocator, DEFAULT_CONFIDENCE_THRESHOLD};
pub use session::OnnxError;

use std::path::Path;

/// File name of the SCRFD detection model inside a model directory.
pub const SCRFD_MODEL_FILE: &str = "det_10g.onnx";
/// File name of the ArcFace recognition model inside a model directory.
pub const ARCFACE_MODEL_FILE: &str = "w600k_r50.onnx";

/// Matcher threshold for ArcFace embeddings.
///
/// On unit vectors `|a - b| = sqrt(2 - 2 cos)`, so this accepts pairs with a
/// cosine similarity of about 0.40 or more.
pub const ARCFACE_DISTANCE_THRESHOLD: f32 = 1.1;

/// Load both models from `model_dir`.
pub fn load_models(model_dir: &Path) -> Result<(ScrfdLocator, ArcFaceEncoder), OnnxError> {
    let locator = ScrfdLocator::load(&model_dir.join(SCRFD_MODEL_FILE))?;
    let encoder = ArcFaceEncoder::load(&model_dir.join(ARCFACE_MODEL_FILE))?;
    Ok((locator, encoder))
}
