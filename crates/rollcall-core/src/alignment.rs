//! Face alignment onto the ArcFace 112×112 template.

use image::{GrayImage, Luma};

/// ArcFace reference landmarks for a 112×112 crop.
const TEMPLATE: [(f32, f32); 5] = [
    (38.2946, 51.6963), // left eye
    (73.5318, 51.5014), // right eye
    (56.0252, 71.7366), // nose
    (41.5493, 92.3655), // left mouth
    (70.7299, 92.2041), // right mouth
];

pub const ALIGNED_SIZE: u32 = 112;

/// Similarity transform `dst = [[a, -b], [b, a]] * src + t`.
#[derive(Debug, Clone, Copy, PartialEq)]
struct Similarity {
    a: f32,
    b: f32,
    tx: f32,
    ty: f32,
}

impl Similarity {
    /// Closed-form least-squares fit mapping `src` points onto `dst`.
    fn fit(src: &[(f32, f32); 5], dst: &[(f32, f32); 5]) -> Self {
        let n = src.len() as f32;
        let mean = |pts: &[(f32, f32); 5]| {
            let (sx, sy) = pts.iter().fold((0.0, 0.0), |(ax, ay), &(x, y)| (ax + x, ay + y));
            (sx / n, sy / n)
        };
        let (smx, smy) = mean(src);
        let (dmx, dmy) = mean(dst);

        let (mut dot, mut cross, mut norm) = (0.0f32, 0.0f32, 0.0f32);
        for (&(sx, sy), &(dx, dy)) in src.iter().zip(dst.iter()) {
            let (sx, sy) = (sx - smx, sy - smy);
            let (dx, dy) = (dx - dmx, dy - dmy);
            dot += sx * dx + sy * dy;
            cross += sx * dy - sy * dx;
            norm += sx * sx + sy * sy;
        }

        if norm < 1e-12 {
            return Self { a: 1.0, b: 0.0, tx: dmx - smx, ty: dmy - smy };
        }

        let a = dot / norm;
        let b = cross / norm;
        Self {
            a,
            b,
            tx: dmx - (a * smx - b * smy),
            ty: dmy - (b * smx + a * smy),
        }
    }

    /// Map an output-space point back into the source image.
    fn invert_point(&self, x: f32, y: f32) -> Option<(f32, f32)> {
        let det = self.a * self.a + self.b * self.b;
        if det < 1e-12 {
            return None;
        }
        let (dx, dy) = (x - self.tx, y - self.ty);
        Some((
            (self.a * dx + self.b * dy) / det,
            (-self.b * dx + self.a * dy) / det,
        ))
    }
}

fn sample_bilinear(image: &GrayImage, x: f32, y: f32) -> f32 {
    let (w, h) = (image.width() as i64, image.height() as i64);
    let px = |xi: i64, yi: i64| -> f32 {
        if xi < 0 || yi < 0 || xi >= w || yi >= h {
            0.0
        } else {
            image.get_pixel(xi as u32, yi as u32)[0] as f32
        }
    };
    let (x0, y0) = (x.floor() as i64, y.floor() as i64);
    let (fx, fy) = (x - x.floor(), y - y.floor());
    let top = px(x0, y0) * (1.0 - fx) + px(x0 + 1, y0) * fx;
    let bottom = px(x0, y0 + 1) * (1.0 - fx) + px(x0 + 1, y0 + 1) * fx;
    top * (1.0 - fy) + bottom * fy
}

/// Warp the face described by `landmarks` into a canonical 112×112 crop.
///
/// Pixels that fall outside the source frame are black.
pub fn align_face(image: &GrayImage, landmarks: &[(f32, f32); 5]) -> GrayImage {
    let transform = Similarity::fit(landmarks, &TEMPLATE);
    GrayImage::from_fn(ALIGNED_SIZE, ALIGNED_SIZE, |ox, oy| {
        let value = transform
            .invert_point(ox as f32, oy as f32)
            .map(|(sx, sy)| sample_bilinear(image, sx, sy))
            .unwrap_or(0.0);
        Luma([value.round().clamp(0.0, 255.0) as u8])
    })
}
