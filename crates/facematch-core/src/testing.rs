//! Fake collaborators shared by the unit tests.

use crate::config::GalleryConfig;
use crate::gallery::Gallery;
use crate::pipeline::{FaceEncoder, FaceLocator, ImageDecoder, PipelineError, ReferenceEncoder};
use crate::types::{BoundingBox, Embedding};
use image::RgbImage;
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tempfile::TempDir;

/// Reference encoder that reads the embedding from the file itself, stored as
/// comma-separated floats. An empty file has no face.
#[derive(Clone, Default)]
pub(crate) struct StemEncoder {
    pub(crate) calls: Arc<AtomicUsize>,
}

impl ReferenceEncoder for StemEncoder {
    fn encode_reference(&mut self, path: &Path) -> Result<Embedding, PipelineError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let text = std::fs::read_to_string(path).map_err(|e| PipelineError::Decode {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })?;
        if text.trim().is_empty() {
            return Err(PipelineError::NoFaceDetected);
        }
        text.trim()
            .split(',')
            .map(|v| v.parse::<f32>().map_err(|e| PipelineError::Encoding(e.to_string())))
            .collect::<Result<Vec<_>, _>>()
            .map(Embedding::new)
    }
}

/// Write a reference "image" at `dir/relative`, creating parent directories.
pub(crate) fn write_reference(dir: &Path, relative: &str, values: &[f32]) {
    let path = dir.join(relative);
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent).unwrap();
    }
    let text = values.iter().map(f32::to_string).collect::<Vec<_>>().join(",");
    std::fs::write(path, text).unwrap();
}

/// Loaded gallery with one identity per `(name, embedding)`, in the given order.
pub(crate) fn gallery_of(entries: &[(&str, Vec<f32>)]) -> (TempDir, Gallery) {
    let dir = tempfile::tempdir().unwrap();
    for (i, (name, values)) in entries.iter().enumerate() {
        write_reference(dir.path(), &format!("{i:03}/{name}.jpg"), values);
    }
    let gallery = Gallery::new(GalleryConfig::new(dir.path()), StemEncoder::default());
    gallery.load().unwrap();
    (dir, gallery)
}

/// Returns a blank 4x4 raster for every path.
pub(crate) struct FixedDecoder;

impl ImageDecoder for FixedDecoder {
    fn decode(&self, _path: &Path) -> Result<RgbImage, PipelineError> {
        Ok(RgbImage::new(4, 4))
    }
}

/// Always reports the same boxes.
pub(crate) struct FixedLocator(pub(crate) Vec<BoundingBox>);

impl FaceLocator for FixedLocator {
    fn locate(&mut self, _image: &RgbImage) -> Result<Vec<BoundingBox>, PipelineError> {
        Ok(self.0.clone())
    }
}

/// Encodes each box as a one-dimensional embedding holding its `x` coordinate.
pub(crate) struct FixedEncoder;

impl FaceEncoder for FixedEncoder {
    fn encode(
        &mut self,
        _image: &RgbImage,
        faces: &[BoundingBox],
    ) -> Result<Vec<Embedding>, PipelineError> {
        Ok(faces.iter().map(|f| Embedding::new(vec![f.x])).collect())
    }
}
