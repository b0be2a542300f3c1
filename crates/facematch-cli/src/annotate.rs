//! Writes a copy of the query image with every detected face boxed and labeled.

use ab_glyph::{FontVec, PxScale};
use anyhow::{Context, Result};
use facematch_core::{BoundingBox, PipelineError, QueryFace, Renderer};
use image::{Rgb, RgbImage};
use imageproc::drawing::{draw_filled_rect_mut, draw_hollow_rect_mut, draw_text_mut};
use imageproc::rect::Rect;
use std::path::{Path, PathBuf};

const KNOWN_COLOR: Rgb<u8> = Rgb([0, 0, 255]);
const UNKNOWN_COLOR: Rgb<u8> = Rgb([255, 0, 0]);
const LABEL_TEXT_COLOR: Rgb<u8> = Rgb([255, 255, 255]);
const LINE_WIDTH: u32 = 2;
/// Extra space drawn around each detected box, in pixels.
const BOX_MARGIN: f32 = 20.0;
/// Height of the name bar along the bottom edge of the frame.
const LABEL_HEIGHT: u32 = 35;
const LABEL_FONT_SIZE: f32 = 24.0;
const LABEL_PADDING: i32 = 6;

/// Load a TrueType/OpenType font for the name labels.
pub fn load_font(path: &Path) -> Result<FontVec> {
    let bytes = std::fs::read(path).with_context(|| format!("reading font {}", path.display()))?;
    FontVec::try_from_vec(bytes).with_context(|| format!("parsing font {}", path.display()))
}

pub struct AnnotatedImageWriter {
    output: PathBuf,
    font: Option<FontVec>,
}

impl AnnotatedImageWriter {
    pub fn new(output: impl Into<PathBuf>) -> Self {
        Self { output: output.into(), font: None }
    }

    /// Font used to print names into the label bars. Without one the bars are
    /// drawn empty.
    pub fn with_font(mut self, font: FontVec) -> Self {
        self.font = Some(font);
        self
    }
}

impl Renderer for AnnotatedImageWriter {
    fn render(
        &mut self,
        image: &RgbImage,
        faces: &[(BoundingBox, QueryFace)],
    ) -> Result<(), PipelineError> {
        let mut canvas = image.clone();
        for (bbox, face) in faces {
            let Some(frame) = face_frame(&canvas, bbox) else {
                continue;
            };
            let color = if face.is_known() { KNOWN_COLOR } else { UNKNOWN_COLOR };
            draw_outline(&mut canvas, frame, color);
            draw_label(&mut canvas, frame, color, face.name(), self.font.as_ref());
        }

        canvas
            .save(&self.output)
            .map_err(|e| PipelineError::Render(format!("{}: {e}", self.output.display())))?;
        tracing::info!(path = %self.output.display(), faces = faces.len(), "wrote annotated image");
        Ok(())
    }
}

/// Detected box grown by the margin and clamped to the canvas.
fn face_frame(canvas: &RgbImage, bbox: &BoundingBox) -> Option<Rect> {
    let padded = BoundingBox {
        x: bbox.x - BOX_MARGIN,
        y: bbox.y - BOX_MARGIN,
        width: bbox.width + 2.0 * BOX_MARGIN,
        height: bbox.height + 2.0 * BOX_MARGIN,
        confidence: bbox.confidence,
        landmarks: None,
    };
    let (left, top, width, height) = padded.pixel_rect(canvas.width(), canvas.height())?;
    Some(Rect::at(left as i32, top as i32).of_size(width, height))
}

fn draw_outline(canvas: &mut RgbImage, frame: Rect, color: Rgb<u8>) {
    let max_inset = (frame.width() + 1) / 2;
    for t in 0..LINE_WIDTH.min(max_inset).min((frame.height() + 1) / 2) {
        let inset = Rect::at(frame.left() + t as i32, frame.top() + t as i32)
            .of_size(frame.width() - 2 * t, frame.height() - 2 * t);
        draw_hollow_rect_mut(canvas, inset, color);
    }
}

/// Filled bar along the bottom of the frame with the face's name in it.
fn draw_label(
    canvas: &mut RgbImage,
    frame: Rect,
    color: Rgb<u8>,
    name: &str,
    font: Option<&FontVec>,
) {
    let bar_height = LABEL_HEIGHT.min(frame.height());
    let bar = Rect::at(frame.left(), frame.bottom() + 1 - bar_height as i32)
        .of_size(frame.width(), bar_height);
    draw_filled_rect_mut(canvas, bar, color);

    if let Some(font) = font {
        draw_text_mut(
            canvas,
            LABEL_TEXT_COLOR,
            bar.left() + LABEL_PADDING,
            bar.top() + LABEL_PADDING,
            PxScale::from(LABEL_FONT_SIZE),
            font,
            name,
        );
    }
}
