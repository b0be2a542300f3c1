use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Default maximum Euclidean distance for two embeddings of the same person.
pub const DEFAULT_DISTANCE_THRESHOLD: f32 = 0.6;

/// Reference image extensions scanned by default. Matching is case-sensitive.
pub const DEFAULT_IMAGE_EXTENSIONS: [&str; 2] = [".jpg", ".png"];

/// Matcher settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MatcherConfig {
    /// Maximum Euclidean distance still accepted as a match (inclusive).
    pub threshold: f32,
    /// Overwrite a matched identity's stored embedding with the query embedding,
    /// so the gallery follows the most recent appearance of each person.
    pub adaptive_reencode: bool,
}

impl Default for MatcherConfig {
    fn default() -> Self {
        Self {
            threshold: DEFAULT_DISTANCE_THRESHOLD,
            adaptive_reencode: false,
        }
    }
}

/// Where and what the gallery scans.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GalleryConfig {
    /// Root of the reference image tree.
    pub source_path: PathBuf,
    /// Accepted file extensions, including the leading dot.
    #[serde(default = "default_extensions")]
    pub extensions: Vec<String>,
}

impl GalleryConfig {
    pub fn new(source_path: impl Into<PathBuf>) -> Self {
        Self {
            source_path: source_path.into(),
            extensions: default_extensions(),
        }
    }
}

pub fn default_extensions() -> Vec<String> {
    DEFAULT_IMAGE_EXTENSIONS.iter().map(|e| e.to_string()).collect()
}
