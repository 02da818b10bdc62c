//! Planar camera calibration from checkerboard correspondences.
//!
//! - [`CorrespondenceAccumulator`] collects ordered model/image point pairs
//!   per view and yields an immutable [`CorrespondenceSet`].
//! - [`CalibrationSolver`] seeds intrinsics from plane homographies and
//!   refines intrinsics, distortion and all board poses jointly with
//!   Levenberg-Marquardt, producing a [`CameraModel`].
//! - [`Undistorter`] removes lens distortion from images and points using a
//!   solved model.
//!
//! ```no_run
//! use checkercal_calib::{CalibrationSolver, CorrespondenceAccumulator, Undistorter};
//! # fn demo(
//! #     board: &checkercal_core::BoardModel,
//! #     detections: Vec<checkercal_core::DetectedCorners>,
//! #     img: &image::DynamicImage,
//! # ) -> Result<(), Box<dyn std::error::Error>> {
//! let mut acc = CorrespondenceAccumulator::new(board.geometry());
//! for (idx, corners) in detections.into_iter().enumerate() {
//!     acc.push(idx, format!("view {idx}"), board, corners)?;
//! }
//! let model = CalibrationSolver::default().solve(&acc.finish(), (640, 480))?;
//! let undistorted = Undistorter::new(&model).undistort(img, 1.0)?;
//! # Ok(())
//! # }
//! ```

mod correspondence;
mod init;
mod model;
mod solver;
mod undistort;

pub use correspondence::{
    CorrespondenceAccumulator, CorrespondenceError, CorrespondenceSet, ViewCorrespondence,
};
pub use init::InitMethod;
pub use model::{
    CalibrationConfidence, CameraModel, LowConfidenceReason, SolveStats, Termination, ViewResult,
};
pub use solver::{CalibrationSolver, SolveError, SolverOptions};
pub use undistort::{OptimalCamera, PixelRect, UndistortError, Undistorter, UndistortionResult};
