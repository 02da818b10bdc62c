//! JSON configuration of a calibration run.

use crate::calib::{SolveError, SolverOptions};
use crate::chessboard::{
    CornerRefiner, PatternDetector, PatternDetectorParams, RefineError, RefineParams,
};
use crate::core::{BoardModel, GeometryError, GridGeometry};
use serde::{Deserialize, Serialize};
use std::{
    fs,
    path::{Path, PathBuf},
};

#[derive(thiserror::Error, Debug)]
pub enum ConfigError {
    #[error(transparent)]
    Io(#[from] std::io::Error),
    #[error(transparent)]
    Json(#[from] serde_json::Error),
    #[error(transparent)]
    Geometry(#[from] GeometryError),
    #[error(transparent)]
    Refine(#[from] RefineError),
    #[error(transparent)]
    Solver(#[from] SolveError),
    #[error("alpha must be within [0, 1] (got {0})")]
    InvalidAlpha(f64),
}

/// Everything a calibration run needs besides the image list.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CalibrationConfig {
    /// Inner corners per row.
    pub columns: u32,
    /// Inner corners per column.
    pub rows: u32,
    /// Side of one board square, in the unit the poses are reported in.
    pub square_size: f64,
    /// Undistortion free-scaling: 0 keeps only valid pixels, 1 keeps all
    /// source pixels.
    pub alpha: f64,
    pub detector: PatternDetectorParams,
    pub refine: RefineParams,
    pub solver: SolverOptions,
    /// Save `<stem>_pattern.<ext>` for every image with a detected board.
    pub write_overlays: bool,
    /// Save `<stem>_undistort.<ext>` for every input image.
    pub write_undistorted: bool,
    /// Where artifacts go; next to each input image when unset.
    pub output_dir: Option<PathBuf>,
}

impl Default for CalibrationConfig {
    fn default() -> Self {
        Self {
            columns: 9,
            rows: 5,
            square_size: 1.0,
            alpha: 1.0,
            detector: PatternDetectorParams::default(),
            refine: RefineParams::default(),
            solver: SolverOptions::default(),
            write_overlays: true,
            write_undistorted: true,
            output_dir: None,
        }
    }
}

impl CalibrationConfig {
    /// Load a JSON config from disk. Missing fields take their defaults.
    pub fn load_json(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let raw = fs::read_to_string(path)?;
        Ok(serde_json::from_str(&raw)?)
    }

    /// Write this config to disk as pretty JSON.
    pub fn write_json(&self, path: impl AsRef<Path>) -> Result<(), ConfigError> {
        let json = serde_json::to_string_pretty(self)?;
        fs::write(path, json)?;
        Ok(())
    }

    pub fn geometry(&self) -> Result<GridGeometry, ConfigError> {
        Ok(GridGeometry::new(self.columns, self.rows)?)
    }

    /// Build the board model the correspondences are generated from.
    pub fn build_board(&self) -> Result<BoardModel, ConfigError> {
        Ok(BoardModel::new(self.geometry()?, self.square_size)?)
    }

    pub fn build_detector(&self) -> PatternDetector {
        PatternDetector::new(self.detector.clone())
    }

    pub fn build_refiner(&self) -> Result<CornerRefiner, ConfigError> {
        Ok(CornerRefiner::new(self.refine)?)
    }

    /// Check every setting that can be wrong before any image is read.
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.build_board()?;
        self.build_refiner()?;
        self.solver.validate()?;
        if !(0.0..=1.0).contains(&self.alpha) {
            return Err(ConfigError::InvalidAlpha(self.alpha));
        }
        Ok(())
    }
}
