//! Synthetic checkerboard views for tests and benchmarks.
//!
//! Renders a board seen by a pinhole camera with Brown-Conrady distortion
//! by inverse-mapping every output pixel back onto the board plane.

use crate::{project_point, undistort_pixel, BoardModel, Distortion, GrayImage, Intrinsics};
use nalgebra::{Isometry3, Matrix3, Point2, Translation3, UnitQuaternion, Vector3};

const DARK: f64 = 30.0;
const LIGHT: f64 = 220.0;

/// Camera used to render and project synthetic views.
#[derive(Clone, Copy, Debug)]
pub struct SyntheticCamera {
    pub intrinsics: Intrinsics,
    pub distortion: Distortion,
    pub width: usize,
    pub height: usize,
}

impl SyntheticCamera {
    /// Ground-truth pixel positions of the board's inner corners.
    pub fn project_board(&self, board: &BoardModel, pose: &Isometry3<f64>) -> Vec<Point2<f64>> {
        board
            .points()
            .iter()
            .map(|p| project_point(&self.intrinsics, &self.distortion, pose, &p.to_point3()))
            .collect()
    }

    /// Render the board under `pose`.
    ///
    /// Squares alternate dark/light with the square left of and above corner
    /// `(0, 0)` dark. Everything off the board reads as light, so the outer
    /// squares stay framed by a light margin. Edges are anti-aliased from
    /// the pixel's distance to the nearest grid lines, measured through the
    /// local pixel-to-board Jacobian, which keeps each X-junction point
    /// symmetric about the true corner.
    pub fn render(&self, board: &BoardModel, pose: &Isometry3<f64>) -> GrayImage {
        let rot = pose.rotation.to_rotation_matrix();
        let r = rot.matrix();
        let t = pose.translation.vector;
        let plane = Matrix3::from_columns(&[r.column(0).into_owned(), r.column(1).into_owned(), t]);
        let Some(plane_inv) = plane.try_inverse() else {
            return GrayImage::from_fn(self.width, self.height, |_, _| LIGHT as u8);
        };

        let s = board.square_size();
        let cols = board.geometry().columns() as i64;
        let rows = board.geometry().rows() as i64;

        // Pixel to board coordinates in units of squares.
        let to_board = |u: f64, v: f64| -> Option<(f64, f64)> {
            let n = undistort_pixel(&self.intrinsics, &self.distortion, Point2::new(u, v));
            let b = plane_inv * Vector3::new(n.x, n.y, 1.0);
            (b.z > 0.0).then(|| (b.x / b.z / s, b.y / b.z / s))
        };

        GrayImage::from_fn(self.width, self.height, |x, y| {
            let (u, v) = (x as f64, y as f64);
            let (Some(p), Some(pu), Some(pv)) =
                (to_board(u, v), to_board(u + 1.0, v), to_board(u, v + 1.0))
            else {
                return LIGHT as u8;
            };
            let ix = p.0.floor() as i64 + 1;
            let iy = p.1.floor() as i64 + 1;
            if ix < 0 || iy < 0 || ix > cols || iy > rows {
                return LIGHT as u8;
            }

            // Board units per pixel along each board axis.
            let gx = (pu.0 - p.0).hypot(pv.0 - p.0).max(1e-12);
            let gy = (pu.1 - p.1).hypot(pv.1 - p.1).max(1e-12);
            let fx = p.0 - p.0.floor();
            let fy = p.1 - p.1.floor();
            // Share of a one-pixel box on this cell's side of the nearest lines.
            let cx = 0.5 + (fx.min(1.0 - fx) / gx).min(0.5);
            let cy = 0.5 + (fy.min(1.0 - fy) / gy).min(0.5);
            let own_share = cx * cy + (1.0 - cx) * (1.0 - cy);

            let (own, other) = if (ix + iy) % 2 == 0 {
                (DARK, LIGHT)
            } else {
                (LIGHT, DARK)
            };
            (own_share * own + (1.0 - own_share) * other).round() as u8
        })
    }
}

/// Pose of a board centred in front of the camera at `distance`, tilted by
/// `(roll, pitch, yaw)` around its own centre.
pub fn board_pose(
    board: &BoardModel,
    distance: f64,
    roll: f64,
    pitch: f64,
    yaw: f64,
) -> Isometry3<f64> {
    let g = board.geometry();
    let s = board.square_size();
    let centre = Vector3::new(
        (g.columns() - 1) as f64 * s / 2.0,
        (g.rows() - 1) as f64 * s / 2.0,
        0.0,
    );
    let rotation = UnitQuaternion::from_euler_angles(roll, pitch, yaw);
    // X_cam = R (X - centre) + (0, 0, distance)
    let translation = Vector3::new(0.0, 0.0, distance) - rotation * centre;
    Isometry3::from_parts(Translation3::from(translation), rotation)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::GridGeometry;

    fn camera() -> SyntheticCamera {
        SyntheticCamera {
            intrinsics: Intrinsics {
                fx: 500.0,
                fy: 500.0,
                cx: 160.0,
                cy: 120.0,
            },
            distortion: Distortion::none(),
            width: 320,
            height: 240,
        }
    }

    #[test]
    fn fronto_parallel_board_is_centred() {
        let board = BoardModel::new(GridGeometry::new(5, 3).unwrap(), 0.03).unwrap();
        let pose = board_pose(&board, 0.5, 0.0, 0.0, 0.0);
        let cam = camera();
        let pts = cam.project_board(&board, &pose);

        let middle = pts[board.geometry().index(2, 1)];
        assert!((middle.x - 160.0).abs() < 1e-9);
        assert!((middle.y - 120.0).abs() < 1e-9);
        // 0.03 m at 0.5 m with f = 500 px -> 30 px squares
        assert!((pts[1].x - pts[0].x - 30.0).abs() < 1e-9);
    }

    #[test]
    fn render_alternates_squares_around_a_corner() {
        let board = BoardModel::new(GridGeometry::new(5, 3).unwrap(), 0.03).unwrap();
        let pose = board_pose(&board, 0.5, 0.0, 0.0, 0.0);
        let cam = camera();
        let img = cam.render(&board, &pose);
        let c = cam.project_board(&board, &pose)[0];
        let at = |dx: f64, dy: f64| img.view().at((c.x + dx) as usize, (c.y + dy) as usize);

        assert!(at(-8.0, -8.0) < 60);
        assert!(at(8.0, 8.0) < 60);
        assert!(at(8.0, -8.0) > 190);
        assert!(at(-8.0, 8.0) > 190);
        assert!(img.view().at(2, 2) > 190);
    }
}
