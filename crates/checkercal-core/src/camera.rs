//! Pinhole intrinsics, Brown-Conrady distortion and point projection.

use nalgebra::{Isometry3, Matrix3, Point2, Point3};
use serde::{Deserialize, Serialize};

/// Pinhole intrinsics with zero skew.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct Intrinsics {
    pub fx: f64,
    pub fy: f64,
    pub cx: f64,
    pub cy: f64,
}

impl Intrinsics {
    /// The 3x3 camera matrix `K`.
    pub fn matrix(&self) -> Matrix3<f64> {
        Matrix3::new(
            self.fx, 0.0, self.cx, //
            0.0, self.fy, self.cy, //
            0.0, 0.0, 1.0,
        )
    }

    /// Read intrinsics back from a camera matrix, ignoring any skew term.
    pub fn from_matrix(k: &Matrix3<f64>) -> Self {
        Self {
            fx: k[(0, 0)],
            fy: k[(1, 1)],
            cx: k[(0, 2)],
            cy: k[(1, 2)],
        }
    }

    #[inline]
    pub fn to_pixel(&self, n: Point2<f64>) -> Point2<f64> {
        Point2::new(self.fx * n.x + self.cx, self.fy * n.y + self.cy)
    }

    #[inline]
    pub fn to_normalized(&self, px: Point2<f64>) -> Point2<f64> {
        Point2::new((px.x - self.cx) / self.fx, (px.y - self.cy) / self.fy)
    }

    pub fn is_valid(&self) -> bool {
        [self.fx, self.fy, self.cx, self.cy]
            .iter()
            .all(|v| v.is_finite())
            && self.fx > 0.0
            && self.fy > 0.0
    }
}

/// Five-coefficient Brown-Conrady distortion `(k1, k2, p1, p2, k3)`.
#[derive(Clone, Copy, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct Distortion {
    pub k1: f64,
    pub k2: f64,
    pub p1: f64,
    pub p2: f64,
    pub k3: f64,
}

impl Distortion {
    pub const fn none() -> Self {
        Self {
            k1: 0.0,
            k2: 0.0,
            p1: 0.0,
            p2: 0.0,
            k3: 0.0,
        }
    }

    /// Coefficients in `(k1, k2, p1, p2, k3)` order.
    pub fn to_array(&self) -> [f64; 5] {
        [self.k1, self.k2, self.p1, self.p2, self.k3]
    }

    pub fn from_array(c: [f64; 5]) -> Self {
        Self {
            k1: c[0],
            k2: c[1],
            p1: c[2],
            p2: c[3],
            k3: c[4],
        }
    }

    /// Apply distortion to an ideal normalized point.
    #[inline]
    pub fn distort(&self, n: Point2<f64>) -> Point2<f64> {
        let (x, y) = (n.x, n.y);
        let r2 = x * x + y * y;
        let radial = 1.0 + r2 * (self.k1 + r2 * (self.k2 + r2 * self.k3));
        let x_tan = 2.0 * self.p1 * x * y + self.p2 * (r2 + 2.0 * x * x);
        let y_tan = self.p1 * (r2 + 2.0 * y * y) + 2.0 * self.p2 * x * y;
        Point2::new(x * radial + x_tan, y * radial + y_tan)
    }

    /// Invert [`Distortion::distort`] by fixed-point iteration.
    pub fn undistort(&self, d: Point2<f64>, iterations: usize) -> Point2<f64> {
        let (mut x, mut y) = (d.x, d.y);
        for _ in 0..iterations {
            let r2 = x * x + y * y;
            let radial = 1.0 + r2 * (self.k1 + r2 * (self.k2 + r2 * self.k3));
            if radial.abs() < 1e-12 {
                break;
            }
            let dx = 2.0 * self.p1 * x * y + self.p2 * (r2 + 2.0 * x * x);
            let dy = self.p1 * (r2 + 2.0 * y * y) + 2.0 * self.p2 * x * y;
            let nx = (d.x - dx) / radial;
            let ny = (d.y - dy) / radial;
            let converged = (nx - x).abs() < 1e-14 && (ny - y).abs() < 1e-14;
            x = nx;
            y = ny;
            if converged {
                break;
            }
        }
        Point2::new(x, y)
    }
}

/// Default iteration count for undistorting points.
pub const UNDISTORT_ITERATIONS: usize = 20;

/// Project a board-frame point through `pose`, the lens and `K`.
#[inline]
pub fn project_point(
    intrinsics: &Intrinsics,
    distortion: &Distortion,
    pose: &Isometry3<f64>,
    p: &Point3<f64>,
) -> Point2<f64> {
    let pc = pose * p;
    let n = Point2::new(pc.x / pc.z, pc.y / pc.z);
    intrinsics.to_pixel(distortion.distort(n))
}

/// Map a distorted pixel to its ideal normalized coordinate.
#[inline]
pub fn undistort_pixel(
    intrinsics: &Intrinsics,
    distortion: &Distortion,
    px: Point2<f64>,
) -> Point2<f64> {
    distortion.undistort(intrinsics.to_normalized(px), UNDISTORT_ITERATIONS)
}
