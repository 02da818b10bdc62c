use checkercal_core::{project_point, Distortion, Intrinsics};
use levenberg_marquardt::{LeastSquaresProblem, LevenbergMarquardt, TerminationReason};
use log::{debug, info, warn};
use nalgebra::{storage::Owned, DMatrix, DVector, Dyn, Isometry3, Point2, Point3, Vector3};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicBool, Ordering};

#[cfg(feature = "tracing")]
use tracing::instrument;

use crate::correspondence::CorrespondenceSet;
use crate::init::{initial_intrinsics, pose_from_homography, view_homographies};
use crate::model::{
    CalibrationConfidence, CameraModel, LowConfidenceReason, SolveStats, Termination, ViewResult,
};

#[derive(thiserror::Error, Debug, Clone, PartialEq)]
pub enum SolveError {
    #[error("no correspondences to calibrate from")]
    EmptyCorrespondences,
    #[error("invalid image size {width}x{height}")]
    InvalidImageSize { width: u32, height: u32 },
    #[error("invalid solver options: {0}")]
    InvalidOptions(&'static str),
    #[error("calibration was cancelled")]
    Cancelled,
    #[error("degenerate calibration: {0}")]
    Degenerate(String),
}

/// Termination and quality settings of the calibration solve.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SolverOptions {
    /// Optimizer patience: at most `max_iters * (parameters + 1)` residual
    /// evaluations.
    pub max_iters: usize,
    /// Relative cost decrease below which the solve stops.
    pub ftol: f64,
    /// Cosine between residuals and any Jacobian column below which the
    /// solve stops.
    pub gtol: f64,
    /// Relative step size below which the solve stops.
    pub xtol: f64,
    /// RMS in pixels above which the result is flagged low confidence.
    pub rms_warning_threshold: f64,
    /// Views needed for a confident result.
    pub min_views: usize,
}

impl Default for SolverOptions {
    fn default() -> Self {
        Self {
            max_iters: 200,
            ftol: 1e-10,
            gtol: 1e-10,
            xtol: 1e-10,
            rms_warning_threshold: 1.0,
            min_views: 3,
        }
    }
}

impl SolverOptions {
    pub fn validate(&self) -> Result<(), SolveError> {
        let tolerances = [
            (self.ftol, "ftol must be finite and non-negative"),
            (self.xtol, "xtol must be finite and non-negative"),
            (self.gtol, "gtol must be finite and non-negative"),
        ];
        for (value, message) in tolerances {
            if !(value.is_finite() && value >= 0.0) {
                return Err(SolveError::InvalidOptions(message));
            }
        }
        Ok(())
    }
}

/// Intrinsic block: `fx, fy, cx, cy, k1, k2, p1, p2, k3`.
const N_INTR: usize = 9;
/// Per-view block: axis-angle rotation, translation.
const N_POSE: usize = 6;

/// Joint refinement of intrinsics, distortion and all board poses.
#[derive(Clone, Debug, Default)]
pub struct CalibrationSolver {
    options: SolverOptions,
}

impl CalibrationSolver {
    pub fn new(options: SolverOptions) -> Self {
        Self { options }
    }

    pub fn options(&self) -> &SolverOptions {
        &self.options
    }

    /// Calibrate from `set`, with `image_size` as `(width, height)` of the
    /// calibration images.
    pub fn solve(
        &self,
        set: &CorrespondenceSet,
        image_size: (u32, u32),
    ) -> Result<CameraModel, SolveError> {
        self.solve_with_cancel(set, image_size, None)
    }

    /// As [`CalibrationSolver::solve`], checking `cancel` before every
    /// residual and Jacobian evaluation.
    #[cfg_attr(
        feature = "tracing",
        instrument(level = "info", skip_all, fields(views = set.len()))
    )]
    pub fn solve_with_cancel(
        &self,
        set: &CorrespondenceSet,
        image_size: (u32, u32),
        cancel: Option<&AtomicBool>,
    ) -> Result<CameraModel, SolveError> {
        if set.is_empty() {
            return Err(SolveError::EmptyCorrespondences);
        }
        self.options.validate()?;
        let (width, height) = image_size;
        if width == 0 || height == 0 {
            return Err(SolveError::InvalidImageSize { width, height });
        }

        let homographies = view_homographies(set)
            .ok_or_else(|| SolveError::Degenerate("view homography estimation failed".into()))?;
        let (k0, init) = initial_intrinsics(&homographies, image_size)
            .ok_or_else(|| SolveError::Degenerate("no valid initial intrinsics".into()))?;
        debug!(
            "initial intrinsics ({init:?}): fx={:.2} fy={:.2} cx={:.2} cy={:.2}",
            k0.fx, k0.fy, k0.cx, k0.cy
        );

        let mut problem = CalibrationProblem::new(set, cancel);
        let mut x0 = DVector::<f64>::zeros(problem.num_params());
        x0.fixed_rows_mut::<4>(0)
            .copy_from_slice(&[k0.fx, k0.fy, k0.cx, k0.cy]);
        for (v, h) in homographies.iter().enumerate() {
            let pose = pose_from_homography(&k0, h).ok_or_else(|| {
                SolveError::Degenerate(format!("no initial pose for view {v}"))
            })?;
            let base = N_INTR + N_POSE * v;
            x0.fixed_rows_mut::<3>(base)
                .copy_from(&pose.rotation.scaled_axis());
            x0.fixed_rows_mut::<3>(base + 3)
                .copy_from(&pose.translation.vector);
        }

        let n_points = set.total_points() as f64;
        let initial_sq = problem.residuals_at(&x0).norm_squared();
        if !initial_sq.is_finite() {
            return Err(SolveError::Degenerate(
                "initial reprojection is not finite".into(),
            ));
        }
        let initial_rms = (initial_sq / n_points).sqrt();
        problem.set_params(&x0);

        let lm = LevenbergMarquardt::new()
            .with_ftol(self.options.ftol)
            .with_xtol(self.options.xtol)
            .with_gtol(self.options.gtol)
            .with_patience(self.options.max_iters.max(1));
        let (problem, report) = lm.minimize(problem);
        let termination = termination_of(report.termination)?;
        let x = problem.params();

        let (intrinsics, distortion) = unpack_intrinsics(&x);
        if !intrinsics.is_valid() {
            return Err(SolveError::Degenerate(
                "optimized intrinsics are not physical".into(),
            ));
        }

        let residuals = problem.residuals_at(&x);
        let rms = (residuals.norm_squared() / n_points).sqrt();
        let mut offset = 0;
        let views: Vec<ViewResult> = set
            .views()
            .iter()
            .enumerate()
            .map(|(v, view)| {
                let len = 2 * view.len();
                let sq = residuals.rows(offset, len).norm_squared();
                offset += len;
                ViewResult {
                    image_index: view.image_index(),
                    label: view.label().to_string(),
                    pose: unpack_pose(&x, v),
                    rms: (sq / view.len() as f64).sqrt(),
                }
            })
            .collect();

        let confidence = self.assess(set.len(), rms);
        let stats = SolveStats {
            init,
            evaluations: report.number_of_evaluations,
            initial_rms,
            termination,
            converged: termination.converged(),
        };

        info!(
            "calibrated from {} views: rms {:.4} px ({} evaluations, {:?})",
            set.len(),
            rms,
            stats.evaluations,
            stats.termination
        );
        if let CalibrationConfidence::Low { reasons } = &confidence {
            for reason in reasons {
                warn!("low confidence calibration: {reason}");
            }
        }
        if !stats.converged {
            warn!("optimizer stopped without converging ({:?})", stats.termination);
        }

        Ok(CameraModel::new(
            intrinsics,
            distortion,
            image_size,
            rms,
            views,
            confidence,
            stats,
        ))
    }

    fn assess(&self, views: usize, rms: f64) -> CalibrationConfidence {
        let mut reasons = Vec::new();
        if views < self.options.min_views {
            reasons.push(LowConfidenceReason::FewViews {
                views,
                minimum: self.options.min_views,
            });
        }
        if rms.is_nan() || rms > self.options.rms_warning_threshold {
            reasons.push(LowConfidenceReason::HighRms {
                rms,
                threshold: self.options.rms_warning_threshold,
            });
        }
        if reasons.is_empty() {
            CalibrationConfidence::High
        } else {
            CalibrationConfidence::Low { reasons }
        }
    }
}

/// Map the optimizer's stop reason onto a [`Termination`], or onto an error
/// when no usable result exists.
fn termination_of(reason: TerminationReason) -> Result<Termination, SolveError> {
    match reason {
        TerminationReason::Converged { ftol: true, .. } => Ok(Termination::CostConverged),
        TerminationReason::Converged { .. } => Ok(Termination::StepConverged),
        TerminationReason::Orthogonal => Ok(Termination::GradientConverged),
        TerminationReason::ResidualsZero => Ok(Termination::ResidualsZero),
        TerminationReason::NoImprovementPossible(_) => Ok(Termination::PrecisionLimit),
        TerminationReason::LostPatience => Ok(Termination::MaxEvaluations),
        // Residuals and Jacobian only come back empty once `cancel` is set.
        TerminationReason::User(_) => Err(SolveError::Cancelled),
        TerminationReason::Numerical(what) => Err(SolveError::Degenerate(format!(
            "numerical failure in the optimizer ({what})"
        ))),
        other => Err(SolveError::Degenerate(format!(
            "optimizer rejected the problem: {other:?}"
        ))),
    }
}

fn unpack_intrinsics(x: &DVector<f64>) -> (Intrinsics, Distortion) {
    (
        Intrinsics {
            fx: x[0],
            fy: x[1],
            cx: x[2],
            cy: x[3],
        },
        Distortion::from_array([x[4], x[5], x[6], x[7], x[8]]),
    )
}

fn unpack_pose(x: &DVector<f64>, view: usize) -> Isometry3<f64> {
    let base = N_INTR + N_POSE * view;
    Isometry3::new(
        Vector3::new(x[base + 3], x[base + 4], x[base + 5]),
        Vector3::new(x[base], x[base + 1], x[base + 2]),
    )
}

struct ViewData<'a> {
    model: Vec<Point3<f64>>,
    observed: &'a [Point2<f64>],
    /// First residual row of this view.
    row: usize,
}

/// Reprojection residuals `projected - observed` over all views, with the
/// current parameter vector the optimizer works on.
struct CalibrationProblem<'a> {
    views: Vec<ViewData<'a>>,
    num_residuals: usize,
    params: DVector<f64>,
    cancel: Option<&'a AtomicBool>,
}

impl<'a> CalibrationProblem<'a> {
    fn new(set: &'a CorrespondenceSet, cancel: Option<&'a AtomicBool>) -> Self {
        let mut row = 0;
        let views = set
            .views()
            .iter()
            .map(|v| {
                let data = ViewData {
                    model: v.model_points().iter().map(|p| p.to_point3()).collect(),
                    observed: v.image_points(),
                    row,
                };
                row += 2 * v.len();
                data
            })
            .collect();
        Self {
            params: DVector::zeros(N_INTR + N_POSE * set.len()),
            views,
            num_residuals: row,
            cancel,
        }
    }

    fn num_params(&self) -> usize {
        N_INTR + N_POSE * self.views.len()
    }

    fn cancelled(&self) -> bool {
        self.cancel.is_some_and(|c| c.load(Ordering::Relaxed))
    }

    /// Residuals of one view for an intrinsic block and a pose block.
    fn view_residuals(view: &ViewData<'_>, intr: &[f64], pose: &[f64], out: &mut [f64]) {
        let k = Intrinsics {
            fx: intr[0],
            fy: intr[1],
            cx: intr[2],
            cy: intr[3],
        };
        let d = Distortion::from_array([intr[4], intr[5], intr[6], intr[7], intr[8]]);
        let iso = Isometry3::new(
            Vector3::new(pose[3], pose[4], pose[5]),
            Vector3::new(pose[0], pose[1], pose[2]),
        );
        for ((p, obs), r) in view
            .model
            .iter()
            .zip(view.observed)
            .zip(out.chunks_exact_mut(2))
        {
            let proj = project_point(&k, &d, &iso, p);
            r[0] = proj.x - obs.x;
            r[1] = proj.y - obs.y;
        }
    }

    fn residuals_at(&self, x: &DVector<f64>) -> DVector<f64> {
        let mut r = DVector::<f64>::zeros(self.num_residuals);
        let intr = &x.as_slice()[..N_INTR];
        for (v, view) in self.views.iter().enumerate() {
            let base = N_INTR + N_POSE * v;
            let pose = &x.as_slice()[base..base + N_POSE];
            let len = 2 * view.model.len();
            Self::view_residuals(view, intr, pose, &mut r.as_mut_slice()[view.row..view.row + len]);
        }
        r
    }

    /// Central differences, one view block at a time: each view only
    /// depends on the shared intrinsics and its own pose.
    fn jacobian_at(&self, x: &DVector<f64>) -> DMatrix<f64> {
        let xs = x.as_slice();
        let blocks: Vec<DMatrix<f64>> = self
            .views
            .par_iter()
            .enumerate()
            .map(|(v, view)| {
                let base = N_INTR + N_POSE * v;
                let mut local = [0.0; N_INTR + N_POSE];
                local[..N_INTR].copy_from_slice(&xs[..N_INTR]);
                local[N_INTR..].copy_from_slice(&xs[base..base + N_POSE]);

                let rows = 2 * view.model.len();
                let mut block = DMatrix::<f64>::zeros(rows, N_INTR + N_POSE);
                let mut plus = vec![0.0; rows];
                let mut minus = vec![0.0; rows];
                for p in 0..N_INTR + N_POSE {
                    let h = 1e-6 * local[p].abs().max(1.0);
                    let orig = local[p];
                    local[p] = orig + h;
                    Self::view_residuals(view, &local[..N_INTR], &local[N_INTR..], &mut plus);
                    local[p] = orig - h;
                    Self::view_residuals(view, &local[..N_INTR], &local[N_INTR..], &mut minus);
                    local[p] = orig;
                    for (i, (a, b)) in plus.iter().zip(&minus).enumerate() {
                        block[(i, p)] = (a - b) / (2.0 * h);
                    }
                }
                block
            })
            .collect();

        let mut j = DMatrix::<f64>::zeros(self.num_residuals, self.num_params());
        for (v, (view, block)) in self.views.iter().zip(&blocks).enumerate() {
            let rows = block.nrows();
            j.view_mut((view.row, 0), (rows, N_INTR))
                .copy_from(&block.columns(0, N_INTR));
            j.view_mut((view.row, N_INTR + N_POSE * v), (rows, N_POSE))
                .copy_from(&block.columns(N_INTR, N_POSE));
        }
        j
    }
}

impl LeastSquaresProblem<f64, Dyn, Dyn> for CalibrationProblem<'_> {
    type ResidualStorage = Owned<f64, Dyn>;
    type JacobianStorage = Owned<f64, Dyn, Dyn>;
    type ParameterStorage = Owned<f64, Dyn>;

    fn set_params(&mut self, x: &DVector<f64>) {
        self.params.copy_from(x);
    }

    fn params(&self) -> DVector<f64> {
        self.params.clone()
    }

    fn residuals(&self) -> Option<DVector<f64>> {
        if self.cancelled() {
            return None;
        }
        Some(self.residuals_at(&self.params))
    }

    fn jacobian(&self) -> Option<DMatrix<f64>> {
        if self.cancelled() {
            return None;
        }
        Some(self.jacobian_at(&self.params))
    }
}
