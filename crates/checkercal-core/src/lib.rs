//! Core types and utilities for checkerboard camera calibration.
//!
//! This crate holds the value types shared by the detector, the solver and
//! the undistorter: board geometry and model points, pinhole intrinsics with
//! Brown-Conrady distortion, a borrowed grayscale image view, and the
//! normalized DLT homography. It does not depend on any image codec.

mod board;
mod camera;
mod homography;
mod image;
mod logger;
pub mod synthetic;

pub use board::{BoardModel, DetectedCorners, GeometryError, GridGeometry, ModelPoint};
pub use camera::{
    project_point, undistort_pixel, Distortion, Intrinsics, UNDISTORT_ITERATIONS,
};
pub use homography::{estimate_homography, Homography};
pub use image::{sample_bilinear, sample_bilinear_u8, GrayImage, GrayImageView, ImageBufferError};

#[cfg(feature = "tracing")]
pub use logger::init_tracing;

pub use logger::{init_with_level, init_with_verbosity, level_from_verbosity};
