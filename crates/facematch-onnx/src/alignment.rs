//! Five-point face alignment.
//!
//! Warps a face onto the canonical ArcFace 112×112 layout with a similarity
//! transform (scale, rotation, translation) fitted to the detector landmarks
//! by least squares.

use image::{Rgb, RgbImage};

/// Landmark positions the ArcFace models were trained on, for a 112×112 crop.
pub(crate) const REFERENCE_LANDMARKS_112: [(f32, f32); 5] = [
    (38.2946, 51.6963),
    (73.5318, 51.5014),
    (56.0252, 71.7366),
    (41.5493, 92.3655),
    (70.7299, 92.2041),
];

pub(crate) const ALIGNED_SIZE: u32 = 112;

/// Similarity transform `[a, -b, tx, b, a, ty]` mapping `src` points onto `dst`.
fn estimate_similarity(src: &[(f32, f32); 5], dst: &[(f32, f32); 5]) -> [f32; 6] {
    // Normal equations for [a, b, tx, ty]; each point pair contributes the rows
    // [sx, -sy, 1, 0] -> dx and [sy, sx, 0, 1] -> dy.
    let mut ata = [[0.0f32; 4]; 4];
    let mut atb = [0.0f32; 4];

    for (&(sx, sy), &(dx, dy)) in src.iter().zip(dst.iter()) {
        let rows = [([sx, -sy, 1.0, 0.0], dx), ([sy, sx, 0.0, 1.0], dy)];
        for (row, target) in rows {
            for j in 0..4 {
                for k in 0..4 {
                    ata[j][k] += row[j] * row[k];
                }
                atb[j] += row[j] * target;
            }
        }
    }

    let [a, b, tx, ty] = solve(ata, atb).unwrap_or([1.0, 0.0, 0.0, 0.0]);
    [a, -b, tx, b, a, ty]
}

/// Gaussian elimination with partial pivoting. `None` for a singular system.
#[allow(clippy::needless_range_loop)]
fn solve(mut m: [[f32; 4]; 4], mut rhs: [f32; 4]) -> Option<[f32; 4]> {
    for col in 0..4 {
        let pivot_row = (col..4).max_by(|&i, &j| m[i][col].abs().total_cmp(&m[j][col].abs()))?;
        m.swap(col, pivot_row);
        rhs.swap(col, pivot_row);

        let pivot = m[col][col];
        if pivot.abs() < 1e-12 {
            return None;
        }
        for row in col + 1..4 {
            let factor = m[row][col] / pivot;
            for k in col..4 {
                m[row][k] -= factor * m[col][k];
            }
            rhs[row] -= factor * rhs[col];
        }
    }

    let mut x = [0.0f32; 4];
    for i in (0..4).rev() {
        let tail: f32 = (i + 1..4).map(|j| m[i][j] * x[j]).sum();
        x[i] = (rhs[i] - tail) / m[i][i];
    }
    Some(x)
}

/// Inverse-map every output pixel through `matrix` and sample the source
/// bilinearly. Pixels that fall outside the source are black.
fn warp(image: &RgbImage, matrix: &[f32; 6], size: u32) -> RgbImage {
    let (a, b, tx, ty) = (matrix[0], matrix[3], matrix[2], matrix[5]);
    let det = a * a + b * b;
    if det < 1e-12 {
        return RgbImage::new(size, size);
    }
    let (ia, ib) = (a / det, b / det);
    let (w, h) = (image.width() as i64, image.height() as i64);

    let texel = |x: i64, y: i64, c: usize| -> f32 {
        if x >= 0 && x < w && y >= 0 && y < h {
            image.get_pixel(x as u32, y as u32)[c] as f32
        } else {
            0.0
        }
    };

    RgbImage::from_fn(size, size, |ox, oy| {
        let dx = ox as f32 - tx;
        let dy = oy as f32 - ty;
        let sx = ia * dx + ib * dy;
        let sy = -ib * dx + ia * dy;

        let x0 = sx.floor() as i64;
        let y0 = sy.floor() as i64;
        let fx = sx - x0 as f32;
        let fy = sy - y0 as f32;

        let mut out = [0u8; 3];
        for (c, value) in out.iter_mut().enumerate() {
            let v = texel(x0, y0, c) * (1.0 - fx) * (1.0 - fy)
                + texel(x0 + 1, y0, c) * fx * (1.0 - fy)
                + texel(x0, y0 + 1, c) * (1.0 - fx) * fy
                + texel(x0 + 1, y0 + 1, c) * fx * fy;
            *value = v.round().clamp(0.0, 255.0) as u8;
        }
        Rgb(out)
    })
}

/// Aligned 112×112 RGB face crop for the given detector landmarks.
pub fn align_face(image: &RgbImage, landmarks: &[(f32, f32); 5]) -> RgbImage {
    let matrix = estimate_similarity(landmarks, &REFERENCE_LANDMARKS_112);
    warp(image, &matrix, ALIGNED_SIZE)
}
