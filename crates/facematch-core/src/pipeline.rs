//! Collaborator contracts for decoding, detection, encoding and rendering,
//! plus the pipeline that chains them for reference and query images.

use crate::types::{BoundingBox, Embedding, QueryFace};
use image::RgbImage;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum PipelineError {
    #[error("failed to decode image {path}: {reason}")]
    Decode { path: PathBuf, reason: String },
    #[error("face detection failed: {0}")]
    Detection(String),
    #[error("face encoding failed: {0}")]
    Encoding(String),
    #[error("no face detected")]
    NoFaceDetected,
    #[error("encoder returned {embeddings} embeddings for {faces} faces")]
    EmbeddingCountMismatch { faces: usize, embeddings: usize },
    #[error("render failed: {0}")]
    Render(String),
}

/// Turns an image file into an RGB raster.
pub trait ImageDecoder {
    fn decode(&self, path: &Path) -> Result<RgbImage, PipelineError>;
}

/// Finds faces in a raster. May return an empty list.
pub trait FaceLocator {
    fn locate(&mut self, image: &RgbImage) -> Result<Vec<BoundingBox>, PipelineError>;
}

/// Produces one embedding per bounding box, in the same order.
pub trait FaceEncoder {
    fn encode(
        &mut self,
        image: &RgbImage,
        faces: &[BoundingBox],
    ) -> Result<Vec<Embedding>, PipelineError>;
}

/// Visualizes identification results. Nothing in the core reads its output.
pub trait Renderer {
    fn render(
        &mut self,
        image: &RgbImage,
        faces: &[(BoundingBox, QueryFace)],
    ) -> Result<(), PipelineError>;
}

/// Source of single-face reference embeddings, as consumed by the gallery.
pub trait ReferenceEncoder: Send {
    fn encode_reference(&mut self, path: &Path) -> Result<Embedding, PipelineError>;
}

impl<T: ReferenceEncoder> ReferenceEncoder for Arc<Mutex<T>> {
    fn encode_reference(&mut self, path: &Path) -> Result<Embedding, PipelineError> {
        self.lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .encode_reference(path)
    }
}

/// Decoder backed by the `image` crate; accepts every format it can sniff.
#[derive(Debug, Default, Clone, Copy)]
pub struct ImageFileDecoder;

impl ImageDecoder for ImageFileDecoder {
    fn decode(&self, path: &Path) -> Result<RgbImage, PipelineError> {
        let image = image::open(path).map_err(|e| PipelineError::Decode {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })?;
        Ok(image.to_rgb8())
    }
}

/// Faces found in one decoded image.
pub struct DetectedFaces {
    pub image: RgbImage,
    /// Bounding boxes paired with their embeddings, in detector order.
    pub faces: Vec<(BoundingBox, Embedding)>,
}

/// Decoder, locator and encoder chained together.
pub struct FacePipeline {
    decoder: Box<dyn ImageDecoder + Send>,
    locator: Box<dyn FaceLocator + Send>,
    encoder: Box<dyn FaceEncoder + Send>,
}

/// A pipeline shared between the gallery and the query path.
pub type SharedPipeline = Arc<Mutex<FacePipeline>>;

impl FacePipeline {
    pub fn new(
        decoder: impl ImageDecoder + Send + 'static,
        locator: impl FaceLocator + Send + 'static,
        encoder: impl FaceEncoder + Send + 'static,
    ) -> Self {
        Self {
            decoder: Box::new(decoder),
            locator: Box::new(locator),
            encoder: Box::new(encoder),
        }
    }

    pub fn shared(self) -> SharedPipeline {
        Arc::new(Mutex::new(self))
    }

    /// Decode, locate and encode every face in the image at `path`.
    pub fn detect(&mut self, path: &Path) -> Result<DetectedFaces, PipelineError> {
        let image = self.decoder.decode(path)?;
        let boxes = self.locator.locate(&image)?;
        tracing::debug!(path = %path.display(), faces = boxes.len(), "located faces");

        if boxes.is_empty() {
            return Ok(DetectedFaces { image, faces: Vec::new() });
        }

        let embeddings = self.encoder.encode(&image, &boxes)?;
        if embeddings.len() != boxes.len() {
            return Err(PipelineError::EmbeddingCountMismatch {
                faces: boxes.len(),
                embeddings: embeddings.len(),
            });
        }

        Ok(DetectedFaces {
            image,
            faces: boxes.into_iter().zip(embeddings).collect(),
        })
    }
}

impl ReferenceEncoder for FacePipeline {
    /// Embedding of the first detected face; reference images are assumed to
    /// hold exactly one person.
    fn encode_reference(&mut self, path: &Path) -> Result<Embedding, PipelineError> {
        let image = self.decoder.decode(path)?;
        let boxes = self.locator.locate(&image)?;
        if boxes.len() > 1 {
            tracing::warn!(
                path = %path.display(),
                faces = boxes.len(),
                "reference image has several faces; using the first"
            );
        }

        self.encoder
            .encode(&image, &boxes)?
            .into_iter()
            .next()
            .ok_or(PipelineError::NoFaceDetected)
    }
}
