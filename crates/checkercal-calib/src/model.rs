//! Solved camera model and its quality indicators.

use checkercal_core::{Distortion, Intrinsics};
use nalgebra::{Isometry3, Matrix3};
use serde::Serialize;

use crate::init::InitMethod;

/// Why the optimizer stopped.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Termination {
    /// Relative cost reduction fell below `ftol`.
    CostConverged,
    /// Relative step fell below `xtol`.
    StepConverged,
    /// Residuals became orthogonal to the Jacobian columns within `gtol`.
    GradientConverged,
    ResidualsZero,
    /// A tolerance is below machine precision; no further progress is
    /// possible at the current point.
    PrecisionLimit,
    /// The evaluation budget ran out.
    MaxEvaluations,
}

impl Termination {
    pub fn converged(self) -> bool {
        !matches!(self, Termination::MaxEvaluations)
    }
}

/// Why a calibration is flagged as low confidence.
#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum LowConfidenceReason {
    /// Fewer views than needed to constrain all intrinsics well.
    FewViews { views: usize, minimum: usize },
    /// Reprojection RMS above the warning threshold.
    HighRms { rms: f64, threshold: f64 },
}

impl std::fmt::Display for LowConfidenceReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            LowConfidenceReason::FewViews { views, minimum } => {
                write!(f, "only {views} views (at least {minimum} recommended)")
            }
            LowConfidenceReason::HighRms { rms, threshold } => {
                write!(f, "RMS {rms:.3} px exceeds {threshold:.3} px")
            }
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(tag = "level", rename_all = "snake_case")]
pub enum CalibrationConfidence {
    High,
    Low { reasons: Vec<LowConfidenceReason> },
}

impl CalibrationConfidence {
    pub fn is_low(&self) -> bool {
        matches!(self, CalibrationConfidence::Low { .. })
    }
}

/// Per-view outcome of the solve.
#[derive(Clone, Debug, Serialize)]
pub struct ViewResult {
    pub image_index: usize,
    pub label: String,
    /// Board pose in the camera frame.
    pub pose: Isometry3<f64>,
    pub rms: f64,
}

/// Optimizer statistics.
#[derive(Clone, Copy, Debug, Serialize)]
pub struct SolveStats {
    pub init: InitMethod,
    /// Residual evaluations spent by the optimizer.
    pub evaluations: usize,
    pub initial_rms: f64,
    pub termination: Termination,
    pub converged: bool,
}

/// Intrinsics, distortion and quality of one calibration run.
///
/// Read-only: solving again produces a new model.
#[derive(Clone, Debug, Serialize)]
pub struct CameraModel {
    intrinsics: Intrinsics,
    distortion: Distortion,
    image_size: (u32, u32),
    rms: f64,
    views: Vec<ViewResult>,
    confidence: CalibrationConfidence,
    stats: SolveStats,
}

impl CameraModel {
    pub(crate) fn new(
        intrinsics: Intrinsics,
        distortion: Distortion,
        image_size: (u32, u32),
        rms: f64,
        views: Vec<ViewResult>,
        confidence: CalibrationConfidence,
        stats: SolveStats,
    ) -> Self {
        Self {
            intrinsics,
            distortion,
            image_size,
            rms,
            views,
            confidence,
            stats,
        }
    }

    pub fn intrinsics(&self) -> &Intrinsics {
        &self.intrinsics
    }

    /// The 3x3 camera matrix `K`.
    pub fn camera_matrix(&self) -> Matrix3<f64> {
        self.intrinsics.matrix()
    }

    pub fn distortion(&self) -> &Distortion {
        &self.distortion
    }

    /// `(k1, k2, p1, p2, k3)`.
    pub fn distortion_coefficients(&self) -> [f64; 5] {
        self.distortion.to_array()
    }

    /// `(width, height)` of the calibration images.
    pub fn image_size(&self) -> (u32, u32) {
        self.image_size
    }

    /// Root mean square reprojection error in pixels over all points.
    pub fn rms(&self) -> f64 {
        self.rms
    }

    pub fn views(&self) -> &[ViewResult] {
        &self.views
    }

    pub fn confidence(&self) -> &CalibrationConfidence {
        &self.confidence
    }

    pub fn stats(&self) -> &SolveStats {
        &self.stats
    }
}
