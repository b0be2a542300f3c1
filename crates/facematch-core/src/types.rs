use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Label reported for a query face that matches no gallery identity.
pub const UNKNOWN_FACE_LABEL: &str = "Unknown";

/// Bounding box for a detected face, in pixel coordinates of the source raster.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BoundingBox {
    pub x: f32,
    pub y: f32,
    pub width: f32,
    pub height: f32,
    pub confidence: f32,
    /// Five-point landmarks: left eye, right eye, nose, left and right mouth corner.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub landmarks: Option<[(f32, f32); 5]>,
}

impl BoundingBox {
    /// Integer pixel rectangle `(left, top, width, height)` clamped to an image of
    /// `image_width` × `image_height`. Returns `None` if nothing of the box is inside.
    pub fn pixel_rect(&self, image_width: u32, image_height: u32) -> Option<(u32, u32, u32, u32)> {
        let max_x = image_width as f32;
        let max_y = image_height as f32;
        let left = self.x.floor().clamp(0.0, max_x);
        let top = self.y.floor().clamp(0.0, max_y);
        let right = (self.x + self.width).ceil().clamp(0.0, max_x);
        let bottom = (self.y + self.height).ceil().clamp(0.0, max_y);

        if right <= left || bottom <= top {
            return None;
        }
        Some((
            left as u32,
            top as u32,
            (right - left) as u32,
            (bottom - top) as u32,
        ))
    }
}

/// Two embeddings of different lengths were compared.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
#[error("embedding dimension mismatch: expected {expected}, got {actual}")]
pub struct DimensionMismatch {
    pub expected: usize,
    pub actual: usize,
}

/// Face embedding vector produced by an external encoder
/// (128-dimensional for dlib-style models, 512 for ArcFace).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Embedding {
    pub values: Vec<f32>,
}

impl Embedding {
    pub fn new(values: Vec<f32>) -> Self {
        Self { values }
    }

    /// Number of components.
    pub fn dim(&self) -> usize {
        self.values.len()
    }

    /// Euclidean distance between two embeddings of equal length.
    pub fn euclidean_distance(&self, other: &Embedding) -> Result<f32, DimensionMismatch> {
        if self.dim() != other.dim() {
            return Err(DimensionMismatch {
                expected: self.dim(),
                actual: other.dim(),
            });
        }

        Ok(self
            .values
            .iter()
            .zip(other.values.iter())
            .map(|(a, b)| (a - b).powi(2))
            .sum::<f32>()
            .sqrt())
    }
}

impl From<Vec<f32>> for Embedding {
    fn from(values: Vec<f32>) -> Self {
        Self::new(values)
    }
}

/// A known person in the gallery.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Identity {
    /// Display name, derived from the reference image's file name.
    pub name: String,
    pub embedding: Embedding,
}

/// Outcome of matching one query embedding against the gallery.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum MatchedIdentity {
    /// Nearest gallery identity within the distance threshold.
    Known {
        /// Position of the identity in gallery insertion order.
        index: usize,
        name: String,
    },
    Unknown,
}

/// A face found in a query image, together with its match result.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct QueryFace {
    pub embedding: Embedding,
    pub matched: MatchedIdentity,
    /// Distance to the nearest gallery identity; `None` when the gallery is empty.
    pub distance: Option<f32>,
}

impl QueryFace {
    /// Identity name, or [`UNKNOWN_FACE_LABEL`].
    pub fn name(&self) -> &str {
        match &self.matched {
            MatchedIdentity::Known { name, .. } => name,
            MatchedIdentity::Unknown => UNKNOWN_FACE_LABEL,
        }
    }

    pub fn is_known(&self) -> bool {
        matches!(self.matched, MatchedIdentity::Known { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_euclidean_distance_identical() {
        let a = Embedding::new(vec![0.5, -0.25, 1.0]);
        assert_eq!(a.euclidean_distance(&a.clone()).unwrap(), 0.0);
    }

    #[test]
    fn test_euclidean_distance_known_value() {
        let a = Embedding::new(vec![0.0, 0.0]);
        let b = Embedding::new(vec![3.0, 4.0]);
        assert!((a.euclidean_distance(&b).unwrap() - 5.0).abs() < 1e-6);
        assert!((b.euclidean_distance(&a).unwrap() - 5.0).abs() < 1e-6);
    }

    #[test]
    fn test_euclidean_distance_dimension_mismatch() {
        let a = Embedding::new(vec![1.0, 2.0, 3.0]);
        let b = Embedding::new(vec![1.0, 2.0]);
        let err = a.euclidean_distance(&b).unwrap_err();
        assert_eq!(err, DimensionMismatch { expected: 3, actual: 2 });
    }

    #[test]
    fn test_query_face_names() {
        let known = QueryFace {
            embedding: Embedding::new(vec![0.0]),
            matched: MatchedIdentity::Known { index: 0, name: "Alice".into() },
            distance: Some(0.1),
        };
        let unknown = QueryFace {
            embedding: Embedding::new(vec![0.0]),
            matched: MatchedIdentity::Unknown,
            distance: None,
        };
        assert_eq!(known.name(), "Alice");
        assert!(known.is_known());
        assert_eq!(unknown.name(), UNKNOWN_FACE_LABEL);
        assert!(!unknown.is_known());
    }

    #[test]
    fn test_pixel_rect_clamps_to_image() {
        let bbox = BoundingBox {
            x: -10.0,
            y: 5.5,
            width: 50.0,
            height: 200.0,
            confidence: 0.9,
            landmarks: None,
        };
        assert_eq!(bbox.pixel_rect(100, 100), Some((0, 5, 40, 95)));
    }

    #[test]
    fn test_pixel_rect_outside_image() {
        let bbox = BoundingBox {
            x: 120.0,
            y: 0.0,
            width: 10.0,
            height: 10.0,
            confidence: 0.9,
            landmarks: None,
        };
        assert_eq!(bbox.pixel_rect(100, 100), None);
    }

    #[test]
    fn test_bounding_box_landmarks_are_optional() {
        let bbox: BoundingBox = serde_json::from_str(
            r#"{"x": 1.0, "y": 2.0, "width": 3.0, "height": 4.0, "confidence": 0.5}"#,
        )
        .unwrap();
        assert!(bbox.landmarks.is_none());
        assert!(!serde_json::to_string(&bbox).unwrap().contains("landmarks"));
    }
}
