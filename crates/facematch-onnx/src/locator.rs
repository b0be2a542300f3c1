//! SCRFD face locator.
//!
//! Runs the insightface SCRFD detector on an RGB raster: the image is scaled
//! into the top-left corner of a 640×640 canvas, the three stride levels are
//! decoded as anchor-free distance boxes (plus five landmarks when the model
//! exports them) and overlapping boxes are merged by NMS.

use crate::session::{load_session, OnnxError};
use facematch_core::{BoundingBox, FaceLocator, PipelineError};
use image::imageops::{self, FilterType};
use image::RgbImage;
use ndarray::Array4;
use ort::session::Session;
use ort::value::TensorRef;
use std::path::Path;

const SCRFD_INPUT_SIZE: u32 = 640;
const SCRFD_MEAN: f32 = 127.5;
const SCRFD_STD: f32 = 128.0;
const SCRFD_STRIDES: [usize; 3] = [8, 16, 32];
const SCRFD_ANCHORS_PER_CELL: usize = 2;
/// Minimum SCRFD score for a detection to be kept.
pub const DEFAULT_CONFIDENCE_THRESHOLD: f32 = 0.5;
const NMS_IOU_THRESHOLD: f32 = 0.4;

/// Output tensor indices `(scores, boxes, keypoints)` for one stride level.
type LevelOutputs = (usize, usize, Option<usize>);

pub struct ScrfdLocator {
    session: Session,
    levels: [LevelOutputs; 3],
    confidence_threshold: f32,
}

impl ScrfdLocator {
    pub fn load(model_path: &Path) -> Result<Self, OnnxError> {
        let session = load_session(model_path, "scrfd")?;

        let names: Vec<String> = session.outputs().iter().map(|o| o.name().to_string()).collect();
        if names.len() < 6 {
            return Err(OnnxError::InferenceFailed(format!(
                "SCRFD model needs score and box outputs for 3 strides, got {} outputs",
                names.len()
            )));
        }
        let levels = output_layout(&names);
        tracing::debug!(?levels, "SCRFD output layout");
        if levels.iter().any(|(_, _, kps)| kps.is_none()) {
            tracing::warn!("SCRFD model has no landmark outputs, faces will not be aligned");
        }

        Ok(Self {
            session,
            levels,
            confidence_threshold: DEFAULT_CONFIDENCE_THRESHOLD,
        })
    }

    /// Minimum detection score for a box to be kept.
    pub fn with_confidence_threshold(mut self, threshold: f32) -> Self {
        self.confidence_threshold = threshold;
        self
    }

    /// Detect faces, highest confidence first, in source image coordinates.
    pub fn detect(&mut self, image: &RgbImage) -> Result<Vec<BoundingBox>, OnnxError> {
        if image.width() == 0 || image.height() == 0 {
            return Ok(Vec::new());
        }

        let (input, scale) = letterbox(image);
        let outputs = self.session.run(ort::inputs![TensorRef::from_array_view(input.view())?])?;

        let mut candidates = Vec::new();
        for (&stride, &(score_idx, box_idx, kps_idx)) in SCRFD_STRIDES.iter().zip(&self.levels) {
            let (_, scores) = outputs[score_idx]
                .try_extract_tensor::<f32>()
                .map_err(|e| OnnxError::InferenceFailed(format!("scores stride {stride}: {e}")))?;
            let (_, boxes) = outputs[box_idx]
                .try_extract_tensor::<f32>()
                .map_err(|e| OnnxError::InferenceFailed(format!("boxes stride {stride}: {e}")))?;
            let kps = match kps_idx {
                Some(idx) => Some(outputs[idx].try_extract_tensor::<f32>().map_err(|e| {
                    OnnxError::InferenceFailed(format!("landmarks stride {stride}: {e}"))
                })?),
                None => None,
            };

            let level = LevelTensors {
                scores,
                boxes,
                kps: kps.map(|(_, kps)| kps),
            };
            candidates.extend(decode_level(&level, stride, scale, self.confidence_threshold));
        }

        Ok(suppress_overlaps(candidates, NMS_IOU_THRESHOLD))
    }
}

impl FaceLocator for ScrfdLocator {
    fn locate(&mut self, image: &RgbImage) -> Result<Vec<BoundingBox>, PipelineError> {
        self.detect(image)
            .map_err(|e| PipelineError::Detection(e.to_string()))
    }
}

/// Map output names to stride levels.
///
/// Named exports use `score_8`, `bbox_8`, `kps_8`, ...; anything else falls back
/// to the insightface positional order `[scores 8/16/32, boxes 8/16/32, kps 8/16/32]`.
fn output_layout(names: &[String]) -> [LevelOutputs; 3] {
    let find = |prefix: &str, stride: usize| {
        let target = format!("{prefix}_{stride}");
        names.iter().position(|n| *n == target)
    };

    let named: Option<Vec<LevelOutputs>> = SCRFD_STRIDES
        .iter()
        .map(|&stride| {
            Some((find("score", stride)?, find("bbox", stride)?, find("kps", stride)))
        })
        .collect();

    match named {
        Some(levels) => [levels[0], levels[1], levels[2]],
        None => {
            let kps = |idx: usize| (names.len() > idx).then_some(idx);
            [(0, 3, kps(6)), (1, 4, kps(7)), (2, 5, kps(8))]
        }
    }
}

/// Scale the image into the top-left of the square model input and normalize.
///
/// Returns the NCHW tensor and the factor that maps source pixels to input pixels.
fn letterbox(image: &RgbImage) -> (Array4<f32>, f32) {
    let size = SCRFD_INPUT_SIZE;
    let scale = (size as f32 / image.width() as f32).min(size as f32 / image.height() as f32);
    let new_w = ((image.width() as f32 * scale).round() as u32).clamp(1, size);
    let new_h = ((image.height() as f32 * scale).round() as u32).clamp(1, size);

    let resized = imageops::resize(image, new_w, new_h, FilterType::Triangle);
    let side = size as usize;
    // Padding stays at raw value 0, as in the reference preprocessing.
    let mut tensor = Array4::<f32>::from_elem((1, 3, side, side), (0.0 - SCRFD_MEAN) / SCRFD_STD);

    for (x, y, pixel) in resized.enumerate_pixels() {
        for c in 0..3 {
            tensor[[0, c, y as usize, x as usize]] = (pixel[c] as f32 - SCRFD_MEAN) / SCRFD_STD;
        }
    }

    (tensor, scale)
}

/// Raw output tensors of one stride level.
struct LevelTensors<'a> {
    scores: &'a [f32],
    boxes: &'a [f32],
    kps: Option<&'a [f32]>,
}

/// Decode one stride level. Box outputs are distances from the anchor centre
/// to the four edges and landmark outputs are offsets from the anchor centre,
/// both in units of the stride.
fn decode_level(
    level: &LevelTensors<'_>,
    stride: usize,
    scale: f32,
    threshold: f32,
) -> Vec<BoundingBox> {
    let grid_w = SCRFD_INPUT_SIZE as usize / stride;
    let step = stride as f32;

    level
        .scores
        .iter()
        .enumerate()
        .filter(|(_, &score)| score >= threshold)
        .filter_map(|(idx, &score)| {
            let d = level.boxes.get(idx * 4..idx * 4 + 4)?;
            let cell = idx / SCRFD_ANCHORS_PER_CELL;
            let cx = (cell % grid_w) as f32 * step;
            let cy = (cell / grid_w) as f32 * step;

            let x1 = (cx - d[0] * step) / scale;
            let y1 = (cy - d[1] * step) / scale;
            let x2 = (cx + d[2] * step) / scale;
            let y2 = (cy + d[3] * step) / scale;

            let landmarks = level
                .kps
                .and_then(|kps| kps.get(idx * 10..idx * 10 + 10))
                .map(|k| {
                    std::array::from_fn(|i| {
                        ((cx + k[i * 2] * step) / scale, (cy + k[i * 2 + 1] * step) / scale)
                    })
                });

            Some(BoundingBox {
                x: x1,
                y: y1,
                width: x2 - x1,
                height: y2 - y1,
                confidence: score,
                landmarks,
            })
        })
        .collect()
}

/// Greedy NMS: keep the most confident box of every overlapping cluster.
fn suppress_overlaps(mut candidates: Vec<BoundingBox>, iou_threshold: f32) -> Vec<BoundingBox> {
    candidates.sort_by(|a, b| b.confidence.total_cmp(&a.confidence));

    let mut kept: Vec<BoundingBox> = Vec::new();
    for candidate in candidates {
        if kept.iter().all(|k| iou(k, &candidate) <= iou_threshold) {
            kept.push(candidate);
        }
    }
    kept
}

fn iou(a: &BoundingBox, b: &BoundingBox) -> f32 {
    let inter_w = ((a.x + a.width).min(b.x + b.width) - a.x.max(b.x)).max(0.0);
    let inter_h = ((a.y + a.height).min(b.y + b.height) - a.y.max(b.y)).max(0.0);
    let inter = inter_w * inter_h;
    let union = a.width * a.height + b.width * b.height - inter;

    if union > 0.0 { inter / union } else { 0.0 }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn bbox(x: f32, y: f32, w: f32, h: f32, confidence: f32) -> BoundingBox {
        BoundingBox { x, y, width: w, height: h, confidence, landmarks: None }
    }

    #[test]
    fn test_iou_identical() {
        let a = bbox(0.0, 0.0, 10.0, 10.0, 0.9);
        assert!((iou(&a, &a) - 1.0).abs() < 1e-6);
    }

    #[test]
    fn test_iou_disjoint() {
        let a = bbox(0.0, 0.0, 10.0, 10.0, 0.9);
        let b = bbox(20.0, 20.0, 10.0, 10.0, 0.9);
        assert_eq!(iou(&a, &b), 0.0);
    }

    #[test]
    fn test_iou_half_overlap() {
        let a = bbox(0.0, 0.0, 10.0, 10.0, 0.9);
        let b = bbox(5.0, 0.0, 10.0, 10.0, 0.9);
        // 50 / (100 + 100 - 50)
        assert!((iou(&a, &b) - 1.0 / 3.0).abs() < 1e-6);
    }

    #[test]
    fn test_suppress_overlaps_keeps_most_confident() {
        let kept = suppress_overlaps(
            vec![
                bbox(1.0, 1.0, 10.0, 10.0, 0.7),
                bbox(0.0, 0.0, 10.0, 10.0, 0.9),
                bbox(100.0, 100.0, 10.0, 10.0, 0.8),
            ],
            NMS_IOU_THRESHOLD,
        );
        let confidences: Vec<f32> = kept.iter().map(|b| b.confidence).collect();
        assert_eq!(confidences, vec![0.9, 0.8]);
    }

    #[test]
    fn test_suppress_overlaps_empty() {
        assert!(suppress_overlaps(Vec::new(), NMS_IOU_THRESHOLD).is_empty());
    }

    #[test]
    fn test_letterbox_scales_into_top_left() {
        let image = RgbImage::from_pixel(320, 160, image::Rgb([255, 255, 255]));
        let (tensor, scale) = letterbox(&image);

        assert_eq!(tensor.shape(), &[1, 3, 640, 640]);
        assert_eq!(scale, 2.0);
        let white = (255.0 - SCRFD_MEAN) / SCRFD_STD;
        let pad = (0.0 - SCRFD_MEAN) / SCRFD_STD;
        assert!((tensor[[0, 0, 0, 0]] - white).abs() < 1e-6);
        assert!((tensor[[0, 2, 319, 639]] - white).abs() < 1e-6);
        assert!((tensor[[0, 1, 320, 0]] - pad).abs() < 1e-6);
    }

    #[test]
    fn test_decode_level_maps_to_source_coordinates() {
        let stride = 32;
        let cells = (640 / stride) * (640 / stride) * SCRFD_ANCHORS_PER_CELL;
        let mut scores = vec![0.0; cells];
        let mut boxes = vec![0.0; cells * 4];

        // Second anchor of cell (x=2, y=1).
        let idx = (640 / stride + 2) * SCRFD_ANCHORS_PER_CELL + 1;
        scores[idx] = 0.95;
        boxes[idx * 4..idx * 4 + 4].copy_from_slice(&[1.0, 1.0, 1.0, 2.0]);

        let level = LevelTensors { scores: &scores, boxes: &boxes, kps: None };
        let dets = decode_level(&level, stride, 2.0, 0.5);
        assert_eq!(dets.len(), 1);
        let d = &dets[0];
        // Anchor centre (64, 32) in input space, halved back to source space.
        assert!((d.x - 16.0).abs() < 1e-4);
        assert!((d.y - 0.0).abs() < 1e-4);
        assert!((d.width - 32.0).abs() < 1e-4);
        assert!((d.height - 48.0).abs() < 1e-4);
        assert_eq!(d.confidence, 0.95);
        assert!(d.landmarks.is_none());
    }

    #[test]
    fn test_decode_level_landmarks() {
        let stride = 16;
        let cells = (640 / stride) * (640 / stride) * SCRFD_ANCHORS_PER_CELL;
        let mut scores = vec![0.0; cells];
        let boxes = vec![1.0; cells * 4];
        let mut kps = vec![0.0; cells * 10];

        // First anchor of cell (x=3, y=2): centre (48, 32) in input space.
        let idx = (2 * (640 / stride) + 3) * SCRFD_ANCHORS_PER_CELL;
        scores[idx] = 0.8;
        kps[idx * 10..idx * 10 + 10]
            .copy_from_slice(&[-1.0, -1.0, 1.0, -1.0, 0.0, 0.0, -0.5, 1.0, 0.5, 1.0]);

        let level = LevelTensors { scores: &scores, boxes: &boxes, kps: Some(&kps) };
        let dets = decode_level(&level, stride, 0.5, 0.5);
        assert_eq!(dets.len(), 1);
        let landmarks = dets[0].landmarks.unwrap();
        let expected: [(f32, f32); 5] =
            [(64.0, 32.0), (128.0, 32.0), (96.0, 64.0), (80.0, 96.0), (112.0, 96.0)];
        for ((x, y), (ex, ey)) in landmarks.iter().zip(expected) {
            assert!((x - ex).abs() < 1e-4 && (y - ey).abs() < 1e-4, "({x}, {y}) != ({ex}, {ey})");
        }
    }

    #[test]
    fn test_decode_level_short_landmark_tensor() {
        let level = LevelTensors { scores: &[0.9], boxes: &[1.0; 4], kps: Some(&[0.0; 4]) };
        let dets = decode_level(&level, 8, 1.0, 0.5);
        assert_eq!(dets.len(), 1);
        assert!(dets[0].landmarks.is_none());
    }

    #[test]
    fn test_decode_level_below_threshold() {
        let level = LevelTensors { scores: &[0.2, 0.49], boxes: &[0.0; 8], kps: None };
        assert!(decode_level(&level, 8, 1.0, 0.5).is_empty());
    }

    #[test]
    fn test_output_layout_named() {
        let names: Vec<String> = [
            "bbox_8", "score_8", "kps_8", "bbox_16", "score_16", "kps_16", "score_32", "bbox_32",
            "kps_32",
        ]
        .iter()
        .map(|s| s.to_string())
        .collect();
        assert_eq!(
            output_layout(&names),
            [(1, 0, Some(2)), (4, 3, Some(5)), (6, 7, Some(8))]
        );
    }

    #[test]
    fn test_output_layout_positional_fallback() {
        let names: Vec<String> = (440..449).map(|i| i.to_string()).collect();
        assert_eq!(
            output_layout(&names),
            [(0, 3, Some(6)), (1, 4, Some(7)), (2, 5, Some(8))]
        );
    }

    #[test]
    fn test_output_layout_without_landmarks() {
        let names: Vec<String> = (0..6).map(|i| i.to_string()).collect();
        assert_eq!(output_layout(&names), [(0, 3, None), (1, 4, None), (2, 5, None)]);
    }
}
