//! ArcFace face encoder.
//!
//! Aligns each detected face to the canonical 112×112 layout using its five
//! landmarks and extracts an L2-normalized 512-dimensional embedding with the
//! w600k_r50 model. Faces without landmarks fall back to a square crop.

use crate::alignment::align_face;
use crate::session::{load_session, OnnxError};
use facematch_core::{BoundingBox, Embedding, FaceEncoder, PipelineError};
use image::imageops::{self, FilterType};
use image::RgbImage;
use ndarray::Array4;
use ort::session::Session;
use ort::value::TensorRef;
use std::path::Path;

const ARCFACE_INPUT_SIZE: u32 = 112;
const ARCFACE_MEAN: f32 = 127.5;
const ARCFACE_STD: f32 = 127.5;
const ARCFACE_EMBEDDING_DIM: usize = 512;
/// Crop side relative to the longer edge of the detected box.
const CROP_MARGIN: f32 = 1.25;

pub struct ArcFaceEncoder {
    session: Session,
}

impl ArcFaceEncoder {
    pub fn load(model_path: &Path) -> Result<Self, OnnxError> {
        Ok(Self {
            session: load_session(model_path, "arcface")?,
        })
    }

    /// Embedding of one face.
    pub fn embed(&mut self, image: &RgbImage, face: &BoundingBox) -> Result<Embedding, OnnxError> {
        let crop = match &face.landmarks {
            Some(landmarks) => align_face(image, landmarks),
            None => face_crop(image, face).ok_or(OnnxError::FaceOutOfBounds)?,
        };
        let input = to_tensor(&crop);

        let outputs = self.session.run(ort::inputs![TensorRef::from_array_view(input.view())?])?;
        let (_, raw) = outputs[0]
            .try_extract_tensor::<f32>()
            .map_err(|e| OnnxError::InferenceFailed(format!("embedding extraction: {e}")))?;

        if raw.len() != ARCFACE_EMBEDDING_DIM {
            return Err(OnnxError::InferenceFailed(format!(
                "expected {ARCFACE_EMBEDDING_DIM}-dim embedding, got {}",
                raw.len()
            )));
        }

        Ok(Embedding::new(l2_normalize(raw.to_vec())))
    }
}

impl FaceEncoder for ArcFaceEncoder {
    fn encode(
        &mut self,
        image: &RgbImage,
        faces: &[BoundingBox],
    ) -> Result<Vec<Embedding>, PipelineError> {
        faces
            .iter()
            .map(|face| self.embed(image, face))
            .collect::<Result<Vec<_>, _>>()
            .map_err(|e| PipelineError::Encoding(e.to_string()))
    }
}

/// Square crop centred on the face, clamped to the image, resized to the model input.
fn face_crop(image: &RgbImage, face: &BoundingBox) -> Option<RgbImage> {
    let side = face.width.max(face.height) * CROP_MARGIN;
    let square = BoundingBox {
        x: face.x + face.width / 2.0 - side / 2.0,
        y: face.y + face.height / 2.0 - side / 2.0,
        width: side,
        height: side,
        confidence: face.confidence,
        landmarks: None,
    };
    let (left, top, width, height) = square.pixel_rect(image.width(), image.height())?;

    let region = imageops::crop_imm(image, left, top, width, height).to_image();
    Some(imageops::resize(
        &region,
        ARCFACE_INPUT_SIZE,
        ARCFACE_INPUT_SIZE,
        FilterType::Triangle,
    ))
}

/// RGB crop to a normalized NCHW tensor.
fn to_tensor(crop: &RgbImage) -> Array4<f32> {
    let size = ARCFACE_INPUT_SIZE as usize;
    let mut tensor = Array4::<f32>::zeros((1, 3, size, size));

    for (x, y, pixel) in crop.enumerate_pixels() {
        for c in 0..3 {
            tensor[[0, c, y as usize, x as usize]] = (pixel[c] as f32 - ARCFACE_MEAN) / ARCFACE_STD;
        }
    }
    tensor
}

fn l2_normalize(raw: Vec<f32>) -> Vec<f32> {
    let norm = raw.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm > 0.0 {
        raw.iter().map(|x| x / norm).collect()
    } else {
        raw
    }
}
