//! Closed-form initial guesses: per-view homographies, intrinsics and poses.

use checkercal_core::{estimate_homography, Intrinsics};
use nalgebra::{
    DMatrix, DVector, Isometry3, Matrix3, Point2, Rotation3, SVector, Translation3,
    UnitQuaternion, Vector3,
};
use serde::{Deserialize, Serialize};

use crate::correspondence::CorrespondenceSet;

/// Which closed-form estimate seeded the optimization.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InitMethod {
    /// Zhang's method on the image of the absolute conic.
    Zhang,
    /// Principal point at the image centre, focal lengths from orthogonality.
    CentredPrincipalPoint,
}

/// Plane-to-image homography of every view, in set order.
pub(crate) fn view_homographies(set: &CorrespondenceSet) -> Option<Vec<Matrix3<f64>>> {
    set.views()
        .iter()
        .map(|v| {
            let model: Vec<Point2<f64>> = v.model_points().iter().map(|p| p.to_point2()).collect();
            estimate_homography(&model, v.image_points()).map(|h| h.h)
        })
        .collect()
}

fn v_ij(h: &Matrix3<f64>, i: usize, j: usize) -> SVector<f64, 6> {
    let hi = h.column(i);
    let hj = h.column(j);
    SVector::<f64, 6>::from_row_slice(&[
        hi[0] * hj[0],
        hi[0] * hj[1] + hi[1] * hj[0],
        hi[1] * hj[1],
        hi[2] * hj[0] + hi[0] * hj[2],
        hi[2] * hj[1] + hi[1] * hj[2],
        hi[2] * hj[2],
    ])
}

/// Zhang's closed-form intrinsics from at least three homographies.
///
/// The skew term of the solution is dropped. `None` when the conic is
/// degenerate or the recovered parameters are not physical.
pub(crate) fn zhang_intrinsics(homographies: &[Matrix3<f64>]) -> Option<Intrinsics> {
    if homographies.len() < 3 {
        return None;
    }
    let m = homographies.len();
    let mut v = DMatrix::<f64>::zeros(2 * m, 6);
    for (k, h) in homographies.iter().enumerate() {
        let v11 = v_ij(h, 0, 0);
        let v22 = v_ij(h, 1, 1);
        let v12 = v_ij(h, 0, 1);
        v.row_mut(2 * k).copy_from(&v12.transpose());
        v.row_mut(2 * k + 1).copy_from(&(v11 - v22).transpose());
    }

    // Null vector of V: smallest singular value.
    let svd = v.svd(false, true);
    let v_t = svd.v_t?;
    let (min_idx, _) = svd
        .singular_values
        .iter()
        .enumerate()
        .min_by(|a, b| a.1.total_cmp(b.1))?;
    let b = v_t.row(min_idx);
    let (b11, b12, b22, b13, b23, b33) = (b[0], b[1], b[2], b[3], b[4], b[5]);

    let denom = b11 * b22 - b12 * b12;
    let denom_norm = b11 * b11 + b22 * b22;
    if denom_norm <= 0.0 || denom.abs() / denom_norm <= 1e-6 {
        return None;
    }

    let v0 = (b12 * b13 - b11 * b23) / denom;
    let lambda = b33 - (b13 * b13 + v0 * (b12 * b13 - b11 * b23)) / b11;
    if lambda.signum() != b11.signum() {
        return None;
    }
    let alpha = (lambda / b11).sqrt();
    let beta = (lambda * b11 / denom).sqrt();
    let gamma = -b12 * alpha * alpha * beta / lambda;
    let u0 = gamma * v0 / beta - b13 * alpha * alpha / lambda;

    let k = Intrinsics {
        fx: alpha,
        fy: beta,
        cx: u0,
        cy: v0,
    };
    k.is_valid().then_some(k)
}

/// Focal lengths with the principal point fixed at the image centre.
///
/// Each view contributes two linear constraints on `(1/fx², 1/fy²)`: the
/// first two columns of `K⁻¹H` are orthogonal, and so are their sum and
/// difference. Works with a single view.
pub(crate) fn centred_intrinsics(
    homographies: &[Matrix3<f64>],
    image_size: (u32, u32),
) -> Option<Intrinsics> {
    let cx = (image_size.0 as f64 - 1.0) * 0.5;
    let cy = (image_size.1 as f64 - 1.0) * 0.5;

    let m = homographies.len();
    let mut a = DMatrix::<f64>::zeros(2 * m, 2);
    let mut rhs = DVector::<f64>::zeros(2 * m);
    for (k, h) in homographies.iter().enumerate() {
        // Move the principal point to the origin.
        let mut hs = *h;
        for c in 0..3 {
            hs[(0, c)] -= h[(2, c)] * cx;
            hs[(1, c)] -= h[(2, c)] * cy;
        }
        let col0 = hs.column(0).normalize();
        let col1 = hs.column(1).normalize();
        let d1 = ((hs.column(0) + hs.column(1)) * 0.5).normalize();
        let d2 = ((hs.column(0) - hs.column(1)) * 0.5).normalize();

        a[(2 * k, 0)] = col0[0] * col1[0];
        a[(2 * k, 1)] = col0[1] * col1[1];
        rhs[2 * k] = -col0[2] * col1[2];
        a[(2 * k + 1, 0)] = d1[0] * d2[0];
        a[(2 * k + 1, 1)] = d1[1] * d2[1];
        rhs[2 * k + 1] = -d1[2] * d2[2];
    }

    let f = a.svd(true, true).solve(&rhs, 1e-12).ok()?;
    let k = Intrinsics {
        fx: (1.0 / f[0].abs()).sqrt(),
        fy: (1.0 / f[1].abs()).sqrt(),
        cx,
        cy,
    };
    k.is_valid().then_some(k)
}

/// Zhang's estimate is accepted only when it lands in a plausible range for
/// the sensor; otherwise the centred estimate is used.
pub(crate) fn initial_intrinsics(
    homographies: &[Matrix3<f64>],
    image_size: (u32, u32),
) -> Option<(Intrinsics, InitMethod)> {
    let (w, h) = (image_size.0 as f64, image_size.1 as f64);
    let plausible = |k: &Intrinsics| {
        k.cx > 0.0
            && k.cx < w
            && k.cy > 0.0
            && k.cy < h
            && (k.fx / k.fy).max(k.fy / k.fx) < 1.5
            && k.fx < 20.0 * w.max(h)
    };
    if let Some(k) = zhang_intrinsics(homographies).filter(plausible) {
        return Some((k, InitMethod::Zhang));
    }
    log::debug!("falling back to a centred principal point for initialization");
    centred_intrinsics(homographies, image_size).map(|k| (k, InitMethod::CentredPrincipalPoint))
}

/// Board pose in the camera frame from `K⁻¹ H`.
///
/// The rotation is projected back onto SO(3) and the board is put in front
/// of the camera.
pub(crate) fn pose_from_homography(k: &Intrinsics, h: &Matrix3<f64>) -> Option<Isometry3<f64>> {
    let k_inv = k.matrix().try_inverse()?;
    let h1 = k_inv * h.column(0);
    let h2 = k_inv * h.column(1);
    let h3 = k_inv * h.column(2);

    let (n1, n2) = (h1.norm(), h2.norm());
    if n1 <= 1e-12 || n2 <= 1e-12 {
        return None;
    }
    let mut lambda = 2.0 / (n1 + n2);
    if h3.z < 0.0 {
        lambda = -lambda;
    }

    let r1 = h1 * lambda;
    let r2 = h2 * lambda;
    let t: Vector3<f64> = h3 * lambda;
    let r3 = r1.cross(&r2);
    if r3.norm() <= 1e-12 {
        return None;
    }

    let r = Matrix3::from_columns(&[r1, r2, r3]);
    let svd = r.svd(true, true);
    let (u, v_t) = (svd.u?, svd.v_t?);
    let mut r_orth = u * v_t;
    if r_orth.determinant() < 0.0 {
        let mut u_flipped = u;
        u_flipped.column_mut(2).neg_mut();
        r_orth = u_flipped * v_t;
    }

    let rotation = UnitQuaternion::from_rotation_matrix(&Rotation3::from_matrix_unchecked(r_orth));
    Some(Isometry3::from_parts(Translation3::from(t), rotation))
}
