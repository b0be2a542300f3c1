//! facematch-core — Face identity matching engine.
//!
//! Builds a cached gallery of reference embeddings from a directory of labeled
//! images and matches query embeddings against it by Euclidean distance.
//! Decoding, detection and encoding are pluggable collaborators.

pub mod config;
pub mod gallery;
pub mod identifier;
pub mod matcher;
pub mod pipeline;
pub mod types;

#[cfg(test)]
mod testing;

pub use config::{GalleryConfig, MatcherConfig, DEFAULT_DISTANCE_THRESHOLD};
pub use gallery::{Gallery, GalleryError};
pub use identifier::{FaceIdentifier, Identification, IdentifyError};
pub use matcher::{MatchError, Matcher};
pub use pipeline::{
    FaceEncoder, FaceLocator, FacePipeline, ImageDecoder, ImageFileDecoder, PipelineError,
    ReferenceEncoder, Renderer,
};
pub use types::{BoundingBox, Embedding, Identity, MatchedIdentity, QueryFace, UNKNOWN_FACE_LABEL};
