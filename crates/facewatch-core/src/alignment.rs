//! Landmark-based face alignment for ArcFace.
//!
//! Fits a 4-DOF similarity transform (scale, rotation, translation) from the
//! detected landmarks onto the InsightFace 112×112 template and resamples
//! the grayscale frame through it.

use crate::types::Frame;

/// Side length of the aligned crop.
pub const ALIGNED_SIZE: usize = 112;

/// InsightFace template: left eye, right eye, nose, left mouth, right mouth.
const TEMPLATE_112: [(f32, f32); 5] = [
    (38.2946, 51.6963),
    (73.5318, 51.5014),
    (56.0252, 71.7366),
    (41.5493, 92.3655),
    (70.7299, 92.2041),
];

/// `x' = a·x − b·y + tx`, `y' = b·x + a·y + ty`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Similarity {
    pub a: f32,
    pub b: f32,
    pub tx: f32,
    pub ty: f32,
}

impl Similarity {
    /// Least-squares fit mapping `src` onto `dst`.
    ///
    /// Degenerate input (all source points coincident) yields the identity.
    pub fn estimate(src: &[(f32, f32)], dst: &[(f32, f32)]) -> Self {
        let n = src.len().min(dst.len()) as f32;
        if n == 0.0 {
            return Self::IDENTITY;
        }
        let mean = |pts: &[(f32, f32)]| {
            let (sx, sy) = pts.iter().fold((0.0, 0.0), |(ax, ay), &(x, y)| (ax + x, ay + y));
            (sx / n, sy / n)
        };
        let (msx, msy) = mean(src);
        let (mdx, mdy) = mean(dst);

        let (mut dot, mut cross, mut norm) = (0.0f32, 0.0f32, 0.0f32);
        for (&(sx, sy), &(dx, dy)) in src.iter().zip(dst) {
            let (sx, sy) = (sx - msx, sy - msy);
            let (dx, dy) = (dx - mdx, dy - mdy);
            dot += sx * dx + sy * dy;
            cross += sx * dy - sy * dx;
            norm += sx * sx + sy * sy;
        }
        if norm <= f32::EPSILON {
            return Self::IDENTITY;
        }

        let a = dot / norm;
        let b = cross / norm;
        Self {
            a,
            b,
            tx: mdx - (a * msx - b * msy),
            ty: mdy - (b * msx + a * msy),
        }
    }

    pub const IDENTITY: Self = Self { a: 1.0, b: 0.0, tx: 0.0, ty: 0.0 };

    pub fn apply(&self, (x, y): (f32, f32)) -> (f32, f32) {
        (self.a * x - self.b * y + self.tx, self.b * x + self.a * y + self.ty)
    }

    /// Inverse transform, or `None` when the scale is zero.
    pub fn inverse(&self) -> Option<Self> {
        let det = self.a * self.a + self.b * self.b;
        if det <= f32::EPSILON {
            return None;
        }
        let (a, b) = (self.a / det, -self.b / det);
        Some(Self {
            a,
            b,
            tx: -(a * self.tx - b * self.ty),
            ty: -(b * self.tx + a * self.ty),
        })
    }
}

/// Warp the face described by `landmarks` into a 112×112 grayscale crop.
///
/// Samples outside the frame read as black.
pub fn align_face(frame: &Frame, landmarks: &[(f32, f32); 5]) -> Vec<u8> {
    let to_template = Similarity::estimate(landmarks, &TEMPLATE_112);
    let Some(to_frame) = to_template.inverse() else {
        return vec![0; ALIGNED_SIZE * ALIGNED_SIZE];
    };

    let mut out = Vec::with_capacity(ALIGNED_SIZE * ALIGNED_SIZE);
    for y in 0..ALIGNED_SIZE {
        for x in 0..ALIGNED_SIZE {
            let (sx, sy) = to_frame.apply((x as f32, y as f32));
            out.push(sample_bilinear(frame, sx, sy));
        }
    }
    out
}

fn sample_bilinear(frame: &Frame, x: f32, y: f32) -> u8 {
    let (w, h) = (frame.width as i64, frame.height as i64);
    let pixel = |px: i64, py: i64| -> f32 {
        if px < 0 || py < 0 || px >= w || py >= h {
            return 0.0;
        }
        frame.data.get((py * w + px) as usize).copied().unwrap_or(0) as f32
    };

    let (x0, y0) = (x.floor(), y.floor());
    let (fx, fy) = (x - x0, y - y0);
    let (ix, iy) = (x0 as i64, y0 as i64);

    let top = pixel(ix, iy) * (1.0 - fx) + pixel(ix + 1, iy) * fx;
    let bottom = pixel(ix, iy + 1) * (1.0 - fx) + pixel(ix + 1, iy + 1) * fx;
    (top * (1.0 - fy) + bottom * fy).round().clamp(0.0, 255.0) as u8
}
