use std::f32::consts::{FRAC_PI_2, PI};

/// Compute the absolute difference between two angles (radians),
/// normalized into `[0, π]`.
pub fn angle_diff_abs(a: f32, b: f32) -> f32 {
    let two_pi = 2.0 * PI;
    // Normalize angle difference to [-π, π).
    let mut diff = (b - a).rem_euclid(two_pi);
    if diff >= PI {
        diff -= two_pi;
    }
    diff.abs()
}

/// Angle between an undirected axis `axis_angle` (defined modulo π)
/// and a directed vector angle `vec_angle`, in `[0, π/2]`.
pub fn axis_vec_diff(axis_angle: f32, vec_angle: f32) -> f32 {
    let diff_abs = angle_diff_abs(axis_angle, vec_angle);
    diff_abs.min(PI - diff_abs)
}

/// Whether two undirected axes (angles modulo π) are orthogonal within `tolerance`.
pub fn is_orthogonal(reference_angle: f32, other_angle: f32, tolerance: f32) -> bool {
    let diff = axis_vec_diff(reference_angle, other_angle);
    (FRAC_PI_2 - diff).abs() <= tolerance.abs()
}

/// Dominant grid axis from corner diagonal orientations.
///
/// Diagonals sit 45° off the grid lines and alternate between the two
/// diagonals, so they agree modulo π/2 only after the 45° shift. Averaging
/// `4θ` folds both diagonals onto one direction; negating the mean removes
/// the shift. Returns an angle in `(-π/4, π/4]`, or `None` when the
/// orientations carry no dominant direction.
pub fn grid_axis_from_orientations(orientations: impl IntoIterator<Item = (f32, f32)>) -> Option<f32> {
    let mut sx = 0.0f32;
    let mut sy = 0.0f32;
    let mut wsum = 0.0f32;
    for (theta, weight) in orientations {
        let w = weight.max(0.0);
        sx += w * (4.0 * theta).cos();
        sy += w * (4.0 * theta).sin();
        wsum += w;
    }
    if wsum <= 0.0 {
        return None;
    }
    let (mx, my) = (sx / wsum, sy / wsum);
    if mx * mx + my * my < 1e-4 {
        return None;
    }
    let mut axis = (-my).atan2(-mx) / 4.0;
    if axis <= -PI / 4.0 {
        axis += FRAC_PI_2;
    }
    Some(axis)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::f32::consts::FRAC_PI_4;

    #[test]
    fn orthogonal_cases() {
        let tol = 1e-3;
        assert!(is_orthogonal(0.0, FRAC_PI_2, tol));
        assert!(is_orthogonal(FRAC_PI_4, -FRAC_PI_4, tol));
        assert!(!is_orthogonal(0.0, 0.25, 0.05));
    }

    #[test]
    fn axis_difference_ignores_direction() {
        assert!((axis_vec_diff(0.0, PI) - 0.0).abs() < 1e-6);
        assert!((axis_vec_diff(FRAC_PI_4, PI) - FRAC_PI_4).abs() < 1e-6);
    }

    #[test]
    fn grid_axis_is_recovered_from_diagonals() {
        let rot = 0.2f32;
        let diag = [
            (rot + FRAC_PI_4, 1.0),
            (rot + 3.0 * FRAC_PI_4, 1.0),
            (rot + FRAC_PI_4 - PI, 2.0),
        ];
        let axis = grid_axis_from_orientations(diag).expect("axis");
        assert!((axis - rot).abs() < 1e-5, "axis {axis}");

        let tilted = [(-1.0 + FRAC_PI_4, 1.0), (-1.0 + 3.0 * FRAC_PI_4, 1.0)];
        let axis = grid_axis_from_orientations(tilted).expect("axis");
        // -1.0 rad is outside (-π/4, π/4]; the other grid axis is reported.
        assert!((axis - (-1.0 + FRAC_PI_2)).abs() < 1e-5, "axis {axis}");
    }

    #[test]
    fn no_axis_without_weight() {
        assert!(grid_axis_from_orientations([(0.3, 0.0)]).is_none());
    }
}
