//! High-level facade crate for the `checkercal-*` workspace.
//!
//! This crate provides:
//! - re-exports of the underlying crates
//! - `image`-crate adapters for the detector and refiner
//! - the end-to-end calibration run used by the `checkercal` binary, with
//!   its JSON configuration and report
//!
//! ## Quickstart
//!
//! ```no_run
//! use checkercal::config::CalibrationConfig;
//! use checkercal::pipeline;
//! use std::path::PathBuf;
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let config = CalibrationConfig::default();
//! let paths = pipeline::collect_image_paths(&[PathBuf::from("shots")])?;
//! let run = pipeline::run(&paths, &config)?;
//! println!("rms: {:.3} px", run.model.rms());
//! # Ok(())
//! # }
//! ```
//!
//! ## API map
//! - `checkercal::core`: board geometry, camera math, image views, homography.
//! - `checkercal::chessboard`: pattern detector and sub-pixel corner refiner.
//! - `checkercal::calib`: correspondences, calibration solver, undistorter.
//! - `checkercal::detect`: detection helpers on `image::GrayImage`.
//! - `checkercal::pipeline`: load, detect, calibrate and undistort a batch.

pub use checkercal_calib as calib;
pub use checkercal_chessboard as chessboard;
pub use checkercal_core as core;

pub use checkercal_calib::{CalibrationSolver, CameraModel, Undistorter};
pub use checkercal_core::{BoardModel, DetectedCorners, GridGeometry};

pub mod config;
pub mod detect;
pub mod overlay;
pub mod pipeline;
pub mod report;
