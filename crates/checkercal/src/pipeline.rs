//! End-to-end calibration run over a batch of image files.
//!
//! Every image is loaded, converted to gray, searched for the board and
//! refined in parallel. Results are gathered in input order and fed to the
//! correspondence accumulator from one thread. After the solve, every
//! readable input image at the calibration size is undistorted with the
//! solved model.

use crate::calib::{
    CalibrationSolver, CameraModel, CorrespondenceAccumulator, CorrespondenceError, SolveError,
    UndistortError, Undistorter,
};
use crate::chessboard::{CornerRefiner, PatternDetector};
use crate::config::{CalibrationConfig, ConfigError};
use crate::core::GridGeometry;
use crate::detect::{detect_and_refine, RefinedDetection};
use crate::overlay::draw_corners;
use crate::report::{CalibrationReport, CameraSummary, ImageReport, ImageStatus, ReportError};
use image::{DynamicImage, ImageReader};
use log::{debug, info, warn};
use rayon::prelude::*;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::AtomicBool;

#[cfg(feature = "tracing")]
use tracing::instrument;

const PATTERN_SUFFIX: &str = "pattern";
const UNDISTORT_SUFFIX: &str = "undistort";

#[derive(thiserror::Error, Debug)]
pub enum RunError {
    #[error("no input images found")]
    FilesNotFound,
    #[error("pattern not found on any of {images} images for geometry {columns}x{rows}")]
    PatternNotFound {
        images: usize,
        columns: u32,
        rows: u32,
    },
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error(transparent)]
    Correspondence(#[from] CorrespondenceError),
    #[error(transparent)]
    Solve(#[from] SolveError),
    #[error(transparent)]
    Undistort(#[from] UndistortError),
    #[error("failed to read {}: {source}", path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: image::ImageError,
    },
    #[error("failed to write {}: {source}", path.display())]
    Write {
        path: PathBuf,
        #[source]
        source: image::ImageError,
    },
    #[error(transparent)]
    Report(#[from] ReportError),
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl RunError {
    /// Process exit code for this failure.
    pub fn exit_code(&self) -> i32 {
        match self {
            RunError::FilesNotFound => 2,
            RunError::PatternNotFound { .. } => 3,
            _ => 1,
        }
    }
}

/// Solved model plus the per-image record of the run.
#[derive(Debug, Clone)]
pub struct CalibrationRun {
    pub model: CameraModel,
    pub report: CalibrationReport,
}

/// Expand files and directories into the list of images to process.
///
/// Directories contribute every file whose extension `image` recognizes, in
/// name order, except artifacts written by an earlier run. Missing paths are
/// logged and skipped.
pub fn collect_image_paths(inputs: &[PathBuf]) -> Result<Vec<PathBuf>, RunError> {
    let mut paths = Vec::new();
    for input in inputs {
        if input.is_dir() {
            let mut entries: Vec<PathBuf> = fs::read_dir(input)?
                .filter_map(|entry| entry.ok().map(|e| e.path()))
                .filter(|p| p.is_file() && is_image_path(p) && !is_artifact(p))
                .collect();
            entries.sort();
            paths.extend(entries);
        } else if input.is_file() {
            paths.push(input.clone());
        } else {
            warn!("input {} does not exist, skipping", input.display());
        }
    }
    if paths.is_empty() {
        return Err(RunError::FilesNotFound);
    }
    Ok(paths)
}

fn is_image_path(path: &Path) -> bool {
    image::ImageFormat::from_path(path).is_ok()
}

fn is_artifact(path: &Path) -> bool {
    path.file_stem()
        .and_then(|s| s.to_str())
        .is_some_and(|s| {
            [PATTERN_SUFFIX, UNDISTORT_SUFFIX]
                .iter()
                .any(|suffix| s.strip_suffix(suffix).is_some_and(|rest| rest.ends_with('_')))
        })
}

/// `<dir>/<stem>_<suffix>.<ext>`, next to the input unless `output_dir` is set.
pub fn artifact_path(input: &Path, suffix: &str, output_dir: Option<&Path>) -> PathBuf {
    let stem = input
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_else(|| "image".to_string());
    let ext = input
        .extension()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_else(|| "png".to_string());
    let dir = output_dir
        .map(Path::to_path_buf)
        .or_else(|| input.parent().map(Path::to_path_buf))
        .unwrap_or_default();
    dir.join(format!("{stem}_{suffix}.{ext}"))
}

fn load_image(path: &Path) -> image::ImageResult<DynamicImage> {
    ImageReader::open(path)?.with_guessed_format()?.decode()
}

/// Reduce any decoded layout to one the undistorter remaps.
fn to_remappable(img: DynamicImage) -> DynamicImage {
    match img {
        DynamicImage::ImageLuma8(_)
        | DynamicImage::ImageLumaA8(_)
        | DynamicImage::ImageRgb8(_)
        | DynamicImage::ImageRgba8(_) => img,
        other => {
            let color = other.color();
            match (color.has_color(), color.has_alpha()) {
                (true, true) => DynamicImage::ImageRgba8(other.to_rgba8()),
                (true, false) => DynamicImage::ImageRgb8(other.to_rgb8()),
                (false, true) => DynamicImage::ImageLumaA8(other.to_luma_alpha8()),
                (false, false) => DynamicImage::ImageLuma8(other.to_luma8()),
            }
        }
    }
}

fn save(img: &DynamicImage, path: &Path) -> Result<(), RunError> {
    img.save(path).map_err(|source| RunError::Write {
        path: path.to_path_buf(),
        source,
    })
}

struct ImageDetection {
    status: ImageStatus,
    size: (u32, u32),
    found: Option<RefinedDetection>,
    overlay_path: Option<PathBuf>,
}

fn detect_image(
    path: &Path,
    config: &CalibrationConfig,
    detector: &PatternDetector,
    refiner: &CornerRefiner,
    geometry: GridGeometry,
) -> Result<ImageDetection, RunError> {
    let img = match load_image(path) {
        Ok(img) => img,
        Err(err) => {
            warn!("{}: cannot read image: {err}", path.display());
            return Ok(ImageDetection {
                status: ImageStatus::DecodeFailed {
                    error: err.to_string(),
                },
                size: (0, 0),
                found: None,
                overlay_path: None,
            });
        }
    };
    let size = (img.width(), img.height());
    let gray = img.to_luma8();

    let Some(found) = detect_and_refine(&gray, detector, refiner, geometry) else {
        warn!(
            "{}: pattern {}x{} not found",
            path.display(),
            geometry.columns(),
            geometry.rows()
        );
        return Ok(ImageDetection {
            status: ImageStatus::PatternNotFound,
            size,
            found: None,
            overlay_path: None,
        });
    };

    info!(
        "{}: pattern found ({} corners, {} not converged)",
        path.display(),
        found.corners.len(),
        found.unconverged
    );

    let overlay_path = if config.write_overlays {
        let out = artifact_path(path, PATTERN_SUFFIX, config.output_dir.as_deref());
        save(&DynamicImage::ImageRgb8(draw_corners(&img, &found.corners)), &out)?;
        debug!("saved pattern overlay {}", out.display());
        Some(out)
    } else {
        None
    };

    Ok(ImageDetection {
        status: ImageStatus::Detected {
            corners: found.corners.len(),
            unconverged_corners: found.unconverged,
        },
        size,
        found: Some(found),
        overlay_path,
    })
}

fn undistort_image(
    path: &Path,
    undistorter: &Undistorter,
    config: &CalibrationConfig,
) -> Result<PathBuf, RunError> {
    let img = load_image(path).map_err(|source| RunError::Read {
        path: path.to_path_buf(),
        source,
    })?;
    let result = undistorter.undistort(&to_remappable(img), config.alpha)?;
    let out = artifact_path(path, UNDISTORT_SUFFIX, config.output_dir.as_deref());
    save(&result.image, &out)?;
    debug!("saved undistorted image {}", out.display());
    Ok(out)
}

/// Run detection, calibration and undistortion over `paths`.
pub fn run(paths: &[PathBuf], config: &CalibrationConfig) -> Result<CalibrationRun, RunError> {
    run_with_cancel(paths, config, None)
}

/// Same as [`run`]; the solve stops with [`SolveError::Cancelled`] once
/// `cancel` is set.
#[cfg_attr(
    feature = "tracing",
    instrument(level = "info", skip_all, fields(images = paths.len()))
)]
pub fn run_with_cancel(
    paths: &[PathBuf],
    config: &CalibrationConfig,
    cancel: Option<&AtomicBool>,
) -> Result<CalibrationRun, RunError> {
    config.validate()?;
    if paths.is_empty() {
        return Err(RunError::FilesNotFound);
    }
    if let Some(dir) = &config.output_dir {
        fs::create_dir_all(dir)?;
    }
    let board = config.build_board()?;
    let geometry = board.geometry();
    let detector = config.build_detector();
    let refiner = config.build_refiner()?;

    info!(
        "searching {} images for a {}x{} pattern",
        paths.len(),
        geometry.columns(),
        geometry.rows()
    );
    let detections: Vec<ImageDetection> = paths
        .par_iter()
        .map(|path| detect_image(path, config, &detector, &refiner, geometry))
        .collect::<Result<_, _>>()?;

    let mut statuses: Vec<ImageStatus> = Vec::with_capacity(paths.len());
    let mut sizes: Vec<(u32, u32)> = Vec::with_capacity(paths.len());
    let mut overlays: Vec<Option<PathBuf>> = Vec::with_capacity(paths.len());
    let mut acc = CorrespondenceAccumulator::new(geometry);
    let mut image_size = None;
    let mut unconverged_corners = 0;
    for (idx, (path, det)) in paths.iter().zip(detections).enumerate() {
        let mut status = det.status;
        if let Some(found) = det.found {
            let size = *image_size.get_or_insert(det.size);
            if size == det.size {
                unconverged_corners += found.unconverged;
                acc.push(idx, path.display().to_string(), &board, found.corners)?;
            } else {
                warn!(
                    "{}: size {}x{} differs from {}x{}, skipping",
                    path.display(),
                    det.size.0,
                    det.size.1,
                    size.0,
                    size.1
                );
                status = ImageStatus::SizeMismatch {
                    width: det.size.0,
                    height: det.size.1,
                };
            }
        }
        statuses.push(status);
        sizes.push(det.size);
        overlays.push(det.overlay_path);
    }

    let Some(image_size) = image_size else {
        return Err(RunError::PatternNotFound {
            images: paths.len(),
            columns: geometry.columns(),
            rows: geometry.rows(),
        });
    };
    // Boardless frames at another resolution do not fit the model either.
    for ((path, status), &size) in paths.iter().zip(statuses.iter_mut()).zip(&sizes) {
        if matches!(status, ImageStatus::PatternNotFound) && size != image_size {
            warn!(
                "{}: size {}x{} differs from {}x{}, skipping",
                path.display(),
                size.0,
                size.1,
                image_size.0,
                image_size.1
            );
            *status = ImageStatus::SizeMismatch {
                width: size.0,
                height: size.1,
            };
        }
    }
    let set = acc.finish();
    info!("pattern found on {} of {} images", set.len(), paths.len());

    let solver = CalibrationSolver::new(config.solver.clone());
    let model = solver.solve_with_cancel(&set, image_size, cancel)?;
    log_summary(&model);

    let undistorter = Undistorter::new(&model);
    let optimal = undistorter.optimal_new_camera_matrix(image_size, config.alpha)?;

    let undistorted: Vec<Option<PathBuf>> = if config.write_undistorted {
        paths
            .par_iter()
            .zip(statuses.par_iter())
            .map(|(path, status)| match status {
                ImageStatus::Detected { .. } | ImageStatus::PatternNotFound => {
                    undistort_image(path, &undistorter, config).map(Some)
                }
                ImageStatus::SizeMismatch { .. } | ImageStatus::DecodeFailed { .. } => Ok(None),
            })
            .collect::<Result<_, RunError>>()?
    } else {
        vec![None; paths.len()]
    };

    let images = paths
        .iter()
        .zip(statuses)
        .zip(overlays)
        .zip(undistorted)
        .enumerate()
        .map(|(idx, (((path, status), overlay), undist))| ImageReport {
            path: path.display().to_string(),
            status,
            view_rms: model
                .views()
                .iter()
                .find(|v| v.image_index == idx)
                .map(|v| v.rms),
            overlay_path: overlay.map(|p| p.display().to_string()),
            undistorted_path: undist.map(|p| p.display().to_string()),
        })
        .collect();

    let report = CalibrationReport {
        geometry,
        square_size: board.square_size(),
        images,
        patterns_found: set.len(),
        unconverged_corners,
        camera: CameraSummary::new(&model, config.alpha, &optimal.intrinsics, optimal.valid_roi),
    };
    Ok(CalibrationRun { model, report })
}

fn log_summary(model: &CameraModel) {
    let k = model.intrinsics();
    let d = model.distortion_coefficients();
    info!("rms reprojection error: {:.4} px", model.rms());
    info!(
        "camera matrix: fx={:.3} fy={:.3} cx={:.3} cy={:.3}",
        k.fx, k.fy, k.cx, k.cy
    );
    info!(
        "distortion (k1, k2, p1, p2, k3): ({:.6}, {:.6}, {:.6}, {:.6}, {:.6})",
        d[0], d[1], d[2], d[3], d[4]
    );
    let stats = model.stats();
    info!(
        "solver: {:?} init, {} evaluations, {:?}",
        stats.init, stats.evaluations, stats.termination
    );
    if let crate::calib::CalibrationConfidence::Low { reasons } = model.confidence() {
        for reason in reasons {
            warn!("low confidence calibration: {reason}");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn artifact_names_keep_stem_and_extension() {
        let input = Path::new("/data/shots/left01.jpg");
        assert_eq!(
            artifact_path(input, PATTERN_SUFFIX, None),
            PathBuf::from("/data/shots/left01_pattern.jpg")
        );
        assert_eq!(
            artifact_path(input, UNDISTORT_SUFFIX, Some(Path::new("/out"))),
            PathBuf::from("/out/left01_undistort.jpg")
        );
    }

    #[test]
    fn earlier_artifacts_are_not_inputs() {
        assert!(is_artifact(Path::new("a/left01_pattern.png")));
        assert!(is_artifact(Path::new("a/left01_undistort.jpg")));
        assert!(!is_artifact(Path::new("a/left01.png")));
        assert!(is_image_path(Path::new("a/left01.PNG")));
        assert!(!is_image_path(Path::new("a/notes.txt")));
    }

    #[test]
    fn exit_codes_separate_the_run_level_failures() {
        assert_eq!(RunError::FilesNotFound.exit_code(), 2);
        let not_found = RunError::PatternNotFound {
            images: 12,
            columns: 9,
            rows: 5,
        };
        assert_eq!(not_found.exit_code(), 3);
        assert_eq!(
            not_found.to_string(),
            "pattern not found on any of 12 images for geometry 9x5"
        );
        assert_eq!(RunError::Solve(SolveError::Cancelled).exit_code(), 1);
    }

    #[test]
    fn wide_layouts_are_reduced_to_eight_bits() {
        let img = DynamicImage::ImageLuma16(image::ImageBuffer::new(4, 3));
        assert_eq!(to_remappable(img).color(), image::ColorType::L8);
        let img = DynamicImage::ImageRgba16(image::ImageBuffer::new(4, 3));
        assert_eq!(to_remappable(img).color(), image::ColorType::Rgba8);
    }
}
