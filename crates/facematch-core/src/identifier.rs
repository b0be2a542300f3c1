//! End-to-end identification of the people in an image file.

use crate::config::{GalleryConfig, MatcherConfig};
use crate::gallery::{Gallery, GalleryError};
use crate::matcher::{MatchError, Matcher};
use crate::pipeline::{FacePipeline, PipelineError, Renderer, SharedPipeline};
use crate::types::{BoundingBox, Embedding, QueryFace};
use image::RgbImage;
use std::path::Path;
use std::sync::Arc;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum IdentifyError {
    #[error(transparent)]
    Pipeline(#[from] PipelineError),
    #[error(transparent)]
    Gallery(#[from] GalleryError),
    #[error(transparent)]
    Match(#[from] MatchError),
}

/// Faces found in one query image and who they were matched to.
pub struct Identification {
    pub image: RgbImage,
    /// One entry per detected face, in detector order.
    pub faces: Vec<(BoundingBox, QueryFace)>,
}

impl Identification {
    pub fn names(&self) -> Vec<&str> {
        self.faces.iter().map(|(_, face)| face.name()).collect()
    }

    pub fn render(&self, renderer: &mut dyn Renderer) -> Result<(), PipelineError> {
        renderer.render(&self.image, &self.faces)
    }
}

/// Gallery, matcher settings and collaborator pipeline bundled together.
///
/// The pipeline is shared: it encodes the gallery's reference images as well
/// as the faces of every query image.
pub struct FaceIdentifier {
    gallery: Gallery,
    pipeline: SharedPipeline,
    config: MatcherConfig,
}

impl FaceIdentifier {
    pub fn new(gallery: GalleryConfig, config: MatcherConfig, pipeline: FacePipeline) -> Self {
        let pipeline = pipeline.shared();
        Self {
            gallery: Gallery::new(gallery, Arc::clone(&pipeline)),
            pipeline,
            config,
        }
    }

    pub fn gallery(&self) -> &Gallery {
        &self.gallery
    }

    pub fn config(&self) -> &MatcherConfig {
        &self.config
    }

    /// Rescan the reference directory. Returns the number of identities.
    pub fn reload_gallery(&self) -> Result<usize, GalleryError> {
        self.gallery.load()
    }

    /// Detect every face in the image at `path` and match it against the gallery.
    pub fn identify_image(&self, path: &Path) -> Result<Identification, IdentifyError> {
        // Load references before taking the pipeline for the query image.
        self.gallery.ensure_loaded(false)?;

        let detected = self
            .pipeline
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .detect(path)?;

        let (boxes, embeddings): (Vec<BoundingBox>, Vec<Embedding>) =
            detected.faces.into_iter().unzip();
        let faces = Matcher::new(&self.gallery, self.config.clone()).identify(&embeddings)?;

        tracing::info!(
            path = %path.display(),
            faces = faces.len(),
            known = faces.iter().filter(|f| f.is_known()).count(),
            "identified image"
        );

        Ok(Identification {
            image: detected.image,
            faces: boxes.into_iter().zip(faces).collect(),
        })
    }
}
