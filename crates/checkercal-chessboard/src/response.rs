//! Dense ChESS corner response and peak extraction.
//!
//! The response is computed on a 16-sample ring of radius 5 around every
//! pixel:
//!
//! ```text
//! SR = Σ_{n<4} |(I_n + I_{n+8}) - (I_{n+4} + I_{n+12})|
//! DR = Σ_{n<8} |I_n - I_{n+8}|
//! MR = |mean(ring) - mean(centre cross)|
//! R  = SR - DR - 16 MR
//! ```
//!
//! X-junctions score strongly positive; edges and L-corners score at or
//! below zero.

use crate::params::ChessResponseParams;
use checkercal_core::GrayImageView;
use nalgebra::Point2;
use rayon::prelude::*;

/// Ring offsets ordered counter-clockwise (in image coordinates) from +x.
const RING: [(i32, i32); 16] = [
    (5, 0),
    (5, 2),
    (4, 4),
    (2, 5),
    (0, 5),
    (-2, 5),
    (-4, 4),
    (-5, 2),
    (-5, 0),
    (-5, -2),
    (-4, -4),
    (-2, -5),
    (0, -5),
    (2, -5),
    (4, -4),
    (5, -2),
];

const RING_RADIUS: usize = 5;
// Ring plus the one-pixel centre cross.
const BORDER: usize = RING_RADIUS + 1;

/// A raw corner candidate.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct ChessCorner {
    pub position: Point2<f32>,
    /// Direction of the bright diagonal, modulo π.
    pub orientation: f32,
    pub strength: f32,
}

/// Dense response map in row-major layout.
#[derive(Clone, Debug)]
pub struct ResponseMap {
    pub w: usize,
    pub h: usize,
    pub data: Vec<f32>,
}

impl ResponseMap {
    #[inline]
    pub fn at(&self, x: usize, y: usize) -> f32 {
        self.data[y * self.w + x]
    }

    pub fn max(&self) -> f32 {
        self.data.iter().copied().fold(0.0f32, f32::max)
    }
}

#[inline]
fn ring_samples(img: &GrayImageView<'_>, x: usize, y: usize) -> [f32; 16] {
    let mut s = [0.0f32; 16];
    for (k, (dx, dy)) in RING.iter().enumerate() {
        let px = (x as i32 + dx) as usize;
        let py = (y as i32 + dy) as usize;
        s[k] = img.at(px, py) as f32;
    }
    s
}

#[inline]
fn response_at(img: &GrayImageView<'_>, x: usize, y: usize) -> f32 {
    let s = ring_samples(img, x, y);

    let mut sr = 0.0f32;
    for n in 0..4 {
        sr += ((s[n] + s[n + 8]) - (s[n + 4] + s[n + 12])).abs();
    }
    let mut dr = 0.0f32;
    for n in 0..8 {
        dr += (s[n] - s[n + 8]).abs();
    }

    let ring_mean = s.iter().sum::<f32>() / 16.0;
    let centre_mean = (img.at(x, y) as f32
        + img.at(x - 1, y) as f32
        + img.at(x + 1, y) as f32
        + img.at(x, y - 1) as f32
        + img.at(x, y + 1) as f32)
        / 5.0;
    let mr = (ring_mean - centre_mean).abs();

    sr - dr - 16.0 * mr
}

/// Compute the ChESS response for every pixel; a `BORDER`-wide frame is zero.
#[cfg_attr(
    feature = "tracing",
    tracing::instrument(level = "debug", skip(img), fields(width = img.width, height = img.height))
)]
pub fn chess_response(img: &GrayImageView<'_>) -> ResponseMap {
    let (w, h) = (img.width, img.height);
    let mut data = vec![0.0f32; w * h];
    if w <= 2 * BORDER || h <= 2 * BORDER {
        return ResponseMap { w, h, data };
    }

    data.par_chunks_mut(w)
        .enumerate()
        .filter(|(y, _)| *y >= BORDER && *y < h - BORDER)
        .for_each(|(y, row)| {
            for (x, out) in row.iter_mut().enumerate().take(w - BORDER).skip(BORDER) {
                *out = response_at(img, x, y);
            }
        });

    ResponseMap { w, h, data }
}

/// Bright-diagonal direction from the second ring harmonic, in `(-π/2, π/2]`.
fn ring_orientation(img: &GrayImageView<'_>, x: usize, y: usize) -> f32 {
    let s = ring_samples(img, x, y);
    let mut c = 0.0f32;
    let mut sn = 0.0f32;
    for (k, (dx, dy)) in RING.iter().enumerate() {
        let phi = (*dy as f32).atan2(*dx as f32);
        c += s[k] * (2.0 * phi).cos();
        sn += s[k] * (2.0 * phi).sin();
    }
    0.5 * sn.atan2(c)
}

/// Threshold, non-maximum suppression and centre-of-mass sub-pixel peaks.
pub fn detect_corners(img: &GrayImageView<'_>, params: &ChessResponseParams) -> Vec<ChessCorner> {
    let resp = chess_response(img);
    let max = resp.max();
    if max <= 0.0 {
        return Vec::new();
    }
    let thr = params.threshold_abs.unwrap_or(params.threshold_rel * max).max(0.0);
    let r = params.nms_radius.max(1) as usize;
    let margin = BORDER.max(r);
    if resp.w <= 2 * margin || resp.h <= 2 * margin {
        return Vec::new();
    }

    let mut corners = Vec::new();
    for y in margin..resp.h - margin {
        for x in margin..resp.w - margin {
            let v = resp.at(x, y);
            if v <= thr {
                continue;
            }

            let mut is_max = true;
            let mut cluster = 0u32;
            'window: for yy in y - r..=y + r {
                for xx in x - r..=x + r {
                    let n = resp.at(xx, yy);
                    if n > thr {
                        cluster += 1;
                    }
                    // Ties resolve to the first pixel in raster order.
                    let earlier = (yy, xx) < (y, x);
                    if n > v || (n == v && earlier) {
                        is_max = false;
                        break 'window;
                    }
                }
            }
            if !is_max || cluster < params.min_cluster_size {
                continue;
            }

            corners.push(ChessCorner {
                position: centre_of_mass(&resp, x, y),
                orientation: ring_orientation(img, x, y),
                strength: v,
            });
        }
    }

    log::debug!("ChESS: {} candidates above {:.1}", corners.len(), thr);
    corners
}

fn centre_of_mass(resp: &ResponseMap, x: usize, y: usize) -> Point2<f32> {
    let mut sx = 0.0f32;
    let mut sy = 0.0f32;
    let mut sw = 0.0f32;
    for yy in y.saturating_sub(2)..=(y + 2).min(resp.h - 1) {
        for xx in x.saturating_sub(2)..=(x + 2).min(resp.w - 1) {
            let w = resp.at(xx, yy).max(0.0);
            sx += w * xx as f32;
            sy += w * yy as f32;
            sw += w;
        }
    }
    if sw > 0.0 {
        Point2::new(sx / sw, sy / sw)
    } else {
        Point2::new(x as f32, y as f32)
    }
}
