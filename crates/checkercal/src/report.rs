//! JSON report of a calibration run.

use crate::calib::{CalibrationConfidence, CameraModel, PixelRect, SolveStats};
use crate::core::{Distortion, GridGeometry, Intrinsics};
use serde::Serialize;
use std::{fs, path::Path};

#[derive(thiserror::Error, Debug)]
pub enum ReportError {
    #[error(transparent)]
    Io(#[from] std::io::Error),
    #[error(transparent)]
    Json(#[from] serde_json::Error),
}

/// What happened to one input image.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum ImageStatus {
    /// Board found and used for calibration.
    Detected {
        corners: usize,
        unconverged_corners: usize,
    },
    /// No complete board of the configured geometry.
    PatternNotFound,
    /// Readable, but at a size other than the calibration size. Neither
    /// used in the solve nor undistorted.
    SizeMismatch { width: u32, height: u32 },
    /// The file could not be read or decoded.
    DecodeFailed { error: String },
}

impl ImageStatus {
    pub fn is_detected(&self) -> bool {
        matches!(self, ImageStatus::Detected { .. })
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct ImageReport {
    pub path: String,
    #[serde(flatten)]
    pub status: ImageStatus,
    /// Reprojection RMS of this view after the solve.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub view_rms: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub overlay_path: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub undistorted_path: Option<String>,
}

/// The solved camera in plain arrays, plus the undistortion camera.
#[derive(Debug, Clone, Serialize)]
pub struct CameraSummary {
    pub image_size: (u32, u32),
    pub intrinsics: Intrinsics,
    pub camera_matrix: [[f64; 3]; 3],
    pub distortion: Distortion,
    /// `(k1, k2, p1, p2, k3)`.
    pub distortion_coefficients: [f64; 5],
    pub rms: f64,
    pub confidence: CalibrationConfidence,
    pub stats: SolveStats,
    pub alpha: f64,
    /// Camera matrix of the undistorted images.
    pub new_camera_matrix: [[f64; 3]; 3],
    pub valid_roi: PixelRect,
}

impl CameraSummary {
    pub fn new(model: &CameraModel, alpha: f64, new_intrinsics: &Intrinsics, valid_roi: PixelRect) -> Self {
        Self {
            image_size: model.image_size(),
            intrinsics: *model.intrinsics(),
            camera_matrix: matrix_rows(model.intrinsics()),
            distortion: *model.distortion(),
            distortion_coefficients: model.distortion_coefficients(),
            rms: model.rms(),
            confidence: model.confidence().clone(),
            stats: *model.stats(),
            alpha,
            new_camera_matrix: matrix_rows(new_intrinsics),
            valid_roi,
        }
    }
}

fn matrix_rows(k: &Intrinsics) -> [[f64; 3]; 3] {
    let m = k.matrix();
    [
        [m[(0, 0)], m[(0, 1)], m[(0, 2)]],
        [m[(1, 0)], m[(1, 1)], m[(1, 2)]],
        [m[(2, 0)], m[(2, 1)], m[(2, 2)]],
    ]
}

#[derive(Debug, Clone, Serialize)]
pub struct CalibrationReport {
    pub geometry: GridGeometry,
    pub square_size: f64,
    pub images: Vec<ImageReport>,
    pub patterns_found: usize,
    pub unconverged_corners: usize,
    pub camera: CameraSummary,
}

impl CalibrationReport {
    /// Write this report to disk as pretty JSON.
    pub fn write_json(&self, path: impl AsRef<Path>) -> Result<(), ReportError> {
        let json = serde_json::to_string_pretty(self)?;
        fs::write(path, json)?;
        Ok(())
    }

    /// Images that contributed no correspondences.
    pub fn skipped(&self) -> impl Iterator<Item = &ImageReport> {
        self.images.iter().filter(|img| !img.status.is_detected())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn image_status_is_flattened_into_the_entry() {
        let entry = ImageReport {
            path: "a.png".to_string(),
            status: ImageStatus::Detected {
                corners: 45,
                unconverged_corners: 2,
            },
            view_rms: Some(0.25),
            overlay_path: None,
            undistorted_path: Some("a_undistort.png".to_string()),
        };
        let v = serde_json::to_value(&entry).unwrap();
        assert_eq!(v["status"], "detected");
        assert_eq!(v["corners"], 45);
        assert_eq!(v["unconverged_corners"], 2);
        assert!(v.get("overlay_path").is_none());

        let missing = ImageReport {
            path: "b.png".to_string(),
            status: ImageStatus::PatternNotFound,
            view_rms: None,
            overlay_path: None,
            undistorted_path: None,
        };
        let v = serde_json::to_value(&missing).unwrap();
        assert_eq!(v["status"], "pattern_not_found");
    }

    #[test]
    fn camera_matrix_rows_follow_k() {
        let k = Intrinsics {
            fx: 800.0,
            fy: 790.0,
            cx: 320.0,
            cy: 240.0,
        };
        assert_eq!(
            matrix_rows(&k),
            [[800.0, 0.0, 320.0], [0.0, 790.0, 240.0], [0.0, 0.0, 1.0]]
        );
    }
}
