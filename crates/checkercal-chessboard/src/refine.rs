//! Sub-pixel corner refinement from gradient orthogonality.
//!
//! For a true corner `c`, the image gradient at any point `q` near it is
//! orthogonal to `q - c`. Summing `g gᵀ (q - c) = 0` over a window gives the
//! 2x2 system `G c = b` with `G = Σ w g gᵀ` and `b = Σ w g gᵀ q`, which is
//! re-solved around each new estimate until the step drops below epsilon.

use crate::params::RefineParams;
use checkercal_core::GrayImageView;
use nalgebra::{Matrix2, Point2, Vector2};
use rayon::prelude::*;
use serde::Serialize;

#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum RefineError {
    #[error("refinement window half-size must be positive")]
    EmptyWindow,
    #[error("dead zone half-size {dead_zone} must be smaller than the window half-size {half_window}")]
    DeadZoneTooLarge { dead_zone: u32, half_window: u32 },
    #[error("termination criteria need max_iters > 0 or epsilon > 0")]
    NoTermination,
}

/// One refined corner with its convergence status.
#[derive(Clone, Copy, Debug, PartialEq, Serialize)]
pub struct RefinedCorner {
    pub position: Point2<f64>,
    /// The last step was below epsilon. `false` means the position is a best
    /// effort: the iteration limit was hit, the system was singular, or the
    /// estimate ran out of the window and was reset to the input.
    pub converged: bool,
    pub iterations: u32,
    pub last_shift: f64,
}

/// Gradient-based sub-pixel corner refiner with a precomputed weight mask.
#[derive(Clone, Debug)]
pub struct CornerRefiner {
    params: RefineParams,
    mask: Vec<f64>,
}

impl CornerRefiner {
    pub fn new(params: RefineParams) -> Result<Self, RefineError> {
        let win = params.half_window;
        if win == 0 {
            return Err(RefineError::EmptyWindow);
        }
        if let Some(dz) = params.dead_zone {
            if dz >= win {
                return Err(RefineError::DeadZoneTooLarge {
                    dead_zone: dz,
                    half_window: win,
                });
            }
        }
        if params.criteria.max_iters == 0 && params.criteria.epsilon <= 0.0 {
            return Err(RefineError::NoTermination);
        }

        let w = win as i32;
        let coeff = 1.0 / (w * w) as f64;
        let mut mask = Vec::with_capacity(((2 * w + 1) * (2 * w + 1)) as usize);
        for dy in -w..=w {
            for dx in -w..=w {
                let inside_dead_zone = params
                    .dead_zone
                    .is_some_and(|dz| dx.abs() <= dz as i32 && dy.abs() <= dz as i32);
                let weight = if inside_dead_zone {
                    0.0
                } else {
                    (-((dx * dx) as f64) * coeff).exp() * (-((dy * dy) as f64) * coeff).exp()
                };
                mask.push(weight);
            }
        }

        Ok(Self { params, mask })
    }

    pub fn params(&self) -> &RefineParams {
        &self.params
    }

    /// Refine every corner independently; output order and length match
    /// the input.
    #[cfg_attr(
        feature = "tracing",
        tracing::instrument(level = "debug", skip_all, fields(corners = corners.len()))
    )]
    pub fn refine(&self, image: &GrayImageView<'_>, corners: &[Point2<f64>]) -> Vec<RefinedCorner> {
        corners
            .par_iter()
            .map(|&c| self.refine_one(image, c))
            .collect()
    }

    pub fn refine_one(&self, image: &GrayImageView<'_>, initial: Point2<f64>) -> RefinedCorner {
        let win = self.params.half_window as i32;
        let side = (2 * win + 1) as usize;
        let max_iters = if self.params.criteria.max_iters == 0 {
            100
        } else {
            self.params.criteria.max_iters
        };
        let eps2 = self.params.criteria.epsilon.max(0.0).powi(2);

        let mut current = initial;
        let mut iterations = 0;
        let mut last_shift = f64::INFINITY;
        let mut converged = false;

        // Sampled window with a one-pixel apron for central differences.
        let apron = side + 2;
        let mut patch = vec![0.0f64; apron * apron];

        while iterations < max_iters {
            iterations += 1;
            let x0 = current.x - (win + 1) as f64;
            let y0 = current.y - (win + 1) as f64;
            for (r, row) in patch.chunks_mut(apron).enumerate() {
                for (k, v) in row.iter_mut().enumerate() {
                    *v = sample_replicate(image, x0 + k as f64, y0 + r as f64);
                }
            }

            let mut g = Matrix2::<f64>::zeros();
            let mut b = Vector2::<f64>::zeros();
            for i in 0..side {
                let py = i as f64 - win as f64;
                for j in 0..side {
                    let m = self.mask[i * side + j];
                    if m == 0.0 {
                        continue;
                    }
                    let px = j as f64 - win as f64;
                    let at = |r: usize, c: usize| patch[r * apron + c];
                    let gx = at(i + 1, j + 2) - at(i + 1, j);
                    let gy = at(i + 2, j + 1) - at(i, j + 1);
                    let gxx = gx * gx * m;
                    let gxy = gx * gy * m;
                    let gyy = gy * gy * m;
                    g[(0, 0)] += gxx;
                    g[(0, 1)] += gxy;
                    g[(1, 1)] += gyy;
                    b.x += gxx * px + gxy * py;
                    b.y += gxy * px + gyy * py;
                }
            }
            g[(1, 0)] = g[(0, 1)];

            let det = g.determinant();
            if det.abs() <= f64::EPSILON * g.norm_squared().max(1.0) {
                break;
            }
            let Some(g_inv) = g.try_inverse() else {
                break;
            };
            // Offset of the solution from the current centre.
            let delta = g_inv * b;
            let next = Point2::new(current.x + delta.x, current.y + delta.y);
            let step2 = (next - current).norm_squared();
            current = next;
            last_shift = step2.sqrt();
            if step2 <= eps2 {
                converged = true;
                break;
            }
        }

        if (current.x - initial.x).abs() > win as f64 || (current.y - initial.y).abs() > win as f64 {
            return RefinedCorner {
                position: initial,
                converged: false,
                iterations,
                last_shift,
            };
        }

        RefinedCorner {
            position: current,
            converged,
            iterations,
            last_shift,
        }
    }
}

/// Bilinear sample with border replication.
#[inline]
fn sample_replicate(img: &GrayImageView<'_>, x: f64, y: f64) -> f64 {
    let x0 = x.floor();
    let y0 = y.floor();
    let fx = x - x0;
    let fy = y - y0;
    let (xi, yi) = (x0 as i64, y0 as i64);

    let p00 = img.at_clamped(xi, yi) as f64;
    let p10 = img.at_clamped(xi + 1, yi) as f64;
    let p01 = img.at_clamped(xi, yi + 1) as f64;
    let p11 = img.at_clamped(xi + 1, yi + 1) as f64;

    let a = p00 + fx * (p10 - p00);
    let b = p01 + fx * (p11 - p01);
    a + fy * (b - a)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::params::TermCriteria;
    use checkercal_core::GrayImage;

    /// Anti-aliased X-junction at sub-pixel `(cx, cy)`.
    fn x_junction(size: usize, cx: f64, cy: f64) -> GrayImage {
        GrayImage::from_fn(size, size, |x, y| {
            let mut acc: f64 = 0.0;
            for sy in 0..8 {
                for sx in 0..8 {
                    let u = x as f64 - 0.5 + (sx as f64 + 0.5) / 8.0;
                    let v = y as f64 - 0.5 + (sy as f64 + 0.5) / 8.0;
                    let dark = (u < cx) == (v < cy);
                    acc += if dark { 30.0 } else { 220.0 };
                }
            }
            (acc / 64.0).round() as u8
        })
    }

    #[test]
    fn converges_to_subpixel_junction() {
        let img = x_junction(40, 20.3, 19.6);
        let refiner = CornerRefiner::new(RefineParams::default()).unwrap();
        let out = refiner.refine(&img.view(), &[Point2::new(21.0, 19.0)]);
        assert_eq!(out.len(), 1);
        let r = out[0];
        assert!(r.converged, "{r:?}");
        assert!((r.position.x - 20.3).abs() < 0.05, "{r:?}");
        assert!((r.position.y - 19.6).abs() < 0.05, "{r:?}");
    }

    #[test]
    fn preserves_length_and_order_on_blank_image() {
        let img = GrayImage::new(32, 32);
        let refiner = CornerRefiner::new(RefineParams::default()).unwrap();
        let input = vec![
            Point2::new(3.0, 4.0),
            Point2::new(16.5, 16.5),
            Point2::new(-2.0, 40.0),
        ];
        let out = refiner.refine(&img.view(), &input);
        assert_eq!(out.len(), input.len());
        for (r, p) in out.iter().zip(&input) {
            assert_eq!(r.position, *p);
            assert!(!r.converged);
        }
    }

    #[test]
    fn iteration_limit_reports_best_effort() {
        let img = x_junction(40, 20.3, 19.6);
        let params = RefineParams {
            criteria: TermCriteria {
                max_iters: 1,
                epsilon: 1e-9,
            },
            ..RefineParams::default()
        };
        let refiner = CornerRefiner::new(params).unwrap();
        let r = refiner.refine_one(&img.view(), Point2::new(22.0, 18.0));
        assert_eq!(r.iterations, 1);
        assert!(!r.converged);
        assert!((r.position.x - 22.0).abs() <= 5.0);
    }

    #[test]
    fn dead_zone_is_validated() {
        let params = RefineParams {
            half_window: 3,
            dead_zone: Some(3),
            ..RefineParams::default()
        };
        assert_eq!(
            CornerRefiner::new(params).unwrap_err(),
            RefineError::DeadZoneTooLarge {
                dead_zone: 3,
                half_window: 3
            }
        );
        let params = RefineParams {
            half_window: 5,
            dead_zone: Some(1),
            ..RefineParams::default()
        };
        assert!(CornerRefiner::new(params).is_ok());
        assert_eq!(
            CornerRefiner::new(RefineParams {
                half_window: 0,
                ..RefineParams::default()
            })
            .unwrap_err(),
            RefineError::EmptyWindow
        );
    }
}
