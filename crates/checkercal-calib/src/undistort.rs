//! Image and point undistortion with a cached remap per output size.

use checkercal_core::{Distortion, Intrinsics, UNDISTORT_ITERATIONS};
use image::{DynamicImage, ImageBuffer, Pixel};
use log::debug;
use nalgebra::Point2;
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};

#[cfg(feature = "tracing")]
use tracing::instrument;

use crate::model::CameraModel;

#[derive(thiserror::Error, Debug, Clone, PartialEq)]
pub enum UndistortError {
    #[error("alpha must be within [0, 1] (got {0})")]
    InvalidAlpha(f64),
    #[error("image has no pixels ({width}x{height})")]
    EmptyImage { width: u32, height: u32 },
    #[error("unsupported pixel layout {0:?}: expected 8-bit gray, gray+alpha, RGB or RGBA")]
    UnsupportedColor(image::ColorType),
    #[error("undistortion produced no valid region for alpha {0}")]
    NoValidRegion(f64),
    #[error(
        "image is {}x{} but the camera was calibrated at {}x{}",
        got.0, got.1, expected.0, expected.1
    )]
    SizeMismatch {
        expected: (u32, u32),
        got: (u32, u32),
    },
}

/// Axis-aligned pixel rectangle.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PixelRect {
    pub x: u32,
    pub y: u32,
    pub width: u32,
    pub height: u32,
}

impl PixelRect {
    pub fn area(&self) -> u64 {
        self.width as u64 * self.height as u64
    }

    pub fn is_empty(&self) -> bool {
        self.width == 0 || self.height == 0
    }

    pub fn contains(&self, x: u32, y: u32) -> bool {
        x >= self.x && y >= self.y && x - self.x < self.width && y - self.y < self.height
    }
}

/// Intrinsics of the undistorted output and the region it fills with
/// valid pixels.
#[derive(Clone, Copy, Debug, PartialEq, Serialize)]
pub struct OptimalCamera {
    pub intrinsics: Intrinsics,
    pub valid_roi: PixelRect,
}

/// Undistorted image with the camera it was rendered for.
#[derive(Clone, Debug)]
pub struct UndistortionResult {
    /// Same size and channel layout as the input.
    pub image: DynamicImage,
    pub intrinsics: Intrinsics,
    pub valid_roi: PixelRect,
}

/// Source sampling position for every output pixel, row-major.
struct RemapTable {
    camera: OptimalCamera,
    width: u32,
    height: u32,
    map: Vec<[f32; 2]>,
}

type CacheKey = (u32, u32, u64);

const EDGE_TOL: f64 = 1e-6;

/// Removes lens distortion from images and points of one camera.
///
/// An undistorter built from a [`CameraModel`] only accepts images at the
/// calibration resolution. Remap tables are built once per `(width, height, alpha)` and reused, so
/// a sequence of same-sized images pays for the table only once. The cache
/// is shared safely between threads.
pub struct Undistorter {
    intrinsics: Intrinsics,
    distortion: Distortion,
    image_size: Option<(u32, u32)>,
    cache: Mutex<HashMap<CacheKey, Arc<RemapTable>>>,
}

impl std::fmt::Debug for Undistorter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Undistorter")
            .field("intrinsics", &self.intrinsics)
            .field("distortion", &self.distortion)
            .field("image_size", &self.image_size)
            .field("cached_tables", &self.cached_tables())
            .finish()
    }
}

impl Undistorter {
    pub fn new(model: &CameraModel) -> Self {
        Self {
            image_size: Some(model.image_size()),
            ..Self::from_parts(*model.intrinsics(), *model.distortion())
        }
    }

    /// Undistorter for a known camera, e.g. loaded from a report. Images of
    /// any size are accepted.
    pub fn from_parts(intrinsics: Intrinsics, distortion: Distortion) -> Self {
        Self {
            intrinsics,
            distortion,
            image_size: None,
            cache: Mutex::new(HashMap::new()),
        }
    }

    /// Calibration resolution images must match, if known.
    pub fn image_size(&self) -> Option<(u32, u32)> {
        self.image_size
    }

    fn check_size(&self, size: (u32, u32)) -> Result<(), UndistortError> {
        match self.image_size {
            Some(expected) if expected != size => Err(UndistortError::SizeMismatch {
                expected,
                got: size,
            }),
            _ => Ok(()),
        }
    }

    pub fn intrinsics(&self) -> &Intrinsics {
        &self.intrinsics
    }

    pub fn distortion(&self) -> &Distortion {
        &self.distortion
    }

    /// Number of remap tables currently cached.
    pub fn cached_tables(&self) -> usize {
        self.cache.lock().unwrap_or_else(|e| e.into_inner()).len()
    }

    /// Camera matrix for an undistorted image of `size`.
    ///
    /// `alpha = 0` zooms in until every output pixel is valid; `alpha = 1`
    /// zooms out until every source pixel is kept. Values in between blend
    /// the two linearly.
    ///
    /// Rectangles are fitted to `(width - 1) x (height - 1)`, the span
    /// between the first and last pixel centres, as OpenCV's
    /// `getOptimalNewCameraMatrix` does. A distortion-free camera therefore
    /// keeps its matrix.
    pub fn optimal_new_camera_matrix(
        &self,
        size: (u32, u32),
        alpha: f64,
    ) -> Result<OptimalCamera, UndistortError> {
        if !(0.0..=1.0).contains(&alpha) {
            return Err(UndistortError::InvalidAlpha(alpha));
        }
        let (width, height) = size;
        if width == 0 || height == 0 {
            return Err(UndistortError::EmptyImage { width, height });
        }
        self.check_size(size)?;
        let (w, h) = ((width - 1).max(1) as f64, (height - 1).max(1) as f64);

        let (inner, outer) = self.undistorted_bounds(size, None);
        if inner.is_empty() || outer.is_empty() {
            return Err(UndistortError::NoValidRegion(alpha));
        }
        let fit = |r: &Bounds| {
            let fx = w / r.width();
            let fy = h / r.height();
            (fx, fy, -fx * r.x0, -fy * r.y0)
        };
        let (fx0, fy0, cx0, cy0) = fit(&inner);
        let (fx1, fy1, cx1, cy1) = fit(&outer);
        let lerp = |a: f64, b: f64| a * (1.0 - alpha) + b * alpha;
        let intrinsics = Intrinsics {
            fx: lerp(fx0, fx1),
            fy: lerp(fy0, fy1),
            cx: lerp(cx0, cx1),
            cy: lerp(cy0, cy1),
        };

        let (valid, _) = self.undistorted_bounds(size, Some(&intrinsics));
        // Pixels within EDGE_TOL of the bound still count as inside.
        let x0 = (valid.x0 - EDGE_TOL).ceil().max(0.0);
        let y0 = (valid.y0 - EDGE_TOL).ceil().max(0.0);
        let x1 = ((valid.x1 + EDGE_TOL).floor() + 1.0).min(width as f64);
        let y1 = ((valid.y1 + EDGE_TOL).floor() + 1.0).min(height as f64);
        let valid_roi = PixelRect {
            x: x0 as u32,
            y: y0 as u32,
            width: (x1 - x0).max(0.0) as u32,
            height: (y1 - y0).max(0.0) as u32,
        };
        if valid_roi.is_empty() {
            return Err(UndistortError::NoValidRegion(alpha));
        }
        Ok(OptimalCamera {
            intrinsics,
            valid_roi,
        })
    }

    /// Inner (all valid) and outer (all covering) bounds of the undistorted
    /// image border, sampled on a 9x9 grid. Normalized coordinates when
    /// `target` is `None`, pixels of `target` otherwise.
    fn undistorted_bounds(&self, size: (u32, u32), target: Option<&Intrinsics>) -> (Bounds, Bounds) {
        const N: u32 = 9;
        let (w, h) = ((size.0 - 1) as f64, (size.1 - 1) as f64);
        let mut inner = Bounds {
            x0: f64::NEG_INFINITY,
            y0: f64::NEG_INFINITY,
            x1: f64::INFINITY,
            y1: f64::INFINITY,
        };
        let mut outer = Bounds {
            x0: f64::INFINITY,
            y0: f64::INFINITY,
            x1: f64::NEG_INFINITY,
            y1: f64::NEG_INFINITY,
        };
        for j in 0..N {
            for i in 0..N {
                let px = Point2::new(i as f64 * w / (N - 1) as f64, j as f64 * h / (N - 1) as f64);
                let n = self
                    .distortion
                    .undistort(self.intrinsics.to_normalized(px), UNDISTORT_ITERATIONS);
                let p = target.map_or(n, |k| k.to_pixel(n));

                outer.x0 = outer.x0.min(p.x);
                outer.y0 = outer.y0.min(p.y);
                outer.x1 = outer.x1.max(p.x);
                outer.y1 = outer.y1.max(p.y);
                if i == 0 {
                    inner.x0 = inner.x0.max(p.x);
                }
                if i == N - 1 {
                    inner.x1 = inner.x1.min(p.x);
                }
                if j == 0 {
                    inner.y0 = inner.y0.max(p.y);
                }
                if j == N - 1 {
                    inner.y1 = inner.y1.min(p.y);
                }
            }
        }
        (inner, outer)
    }

    fn table(&self, size: (u32, u32), alpha: f64) -> Result<Arc<RemapTable>, UndistortError> {
        let key = (size.0, size.1, alpha.to_bits());
        if let Some(t) = self.cache.lock().unwrap_or_else(|e| e.into_inner()).get(&key) {
            return Ok(Arc::clone(t));
        }

        // Built outside the lock; a concurrent duplicate build is harmless.
        let camera = self.optimal_new_camera_matrix(size, alpha)?;
        let table = Arc::new(self.build_table(size, camera));
        debug!(
            "built {}x{} remap table for alpha {alpha} (roi {:?})",
            size.0, size.1, camera.valid_roi
        );
        let mut cache = self.cache.lock().unwrap_or_else(|e| e.into_inner());
        Ok(Arc::clone(cache.entry(key).or_insert(table)))
    }

    fn build_table(&self, size: (u32, u32), camera: OptimalCamera) -> RemapTable {
        let (width, height) = size;
        let mut map = vec![[0.0f32; 2]; width as usize * height as usize];
        let k_new = camera.intrinsics;
        map.par_chunks_mut(width as usize)
            .enumerate()
            .for_each(|(y, row)| {
                for (x, slot) in row.iter_mut().enumerate() {
                    let n = k_new.to_normalized(Point2::new(x as f64, y as f64));
                    let src = self.intrinsics.to_pixel(self.distortion.distort(n));
                    *slot = [src.x as f32, src.y as f32];
                }
            });
        RemapTable {
            camera,
            width,
            height,
            map,
        }
    }

    /// Undistort `image`, keeping its size and channel layout.
    #[cfg_attr(
        feature = "tracing",
        instrument(level = "debug", skip(self, image), fields(w = image.width(), h = image.height()))
    )]
    pub fn undistort(
        &self,
        image: &DynamicImage,
        alpha: f64,
    ) -> Result<UndistortionResult, UndistortError> {
        let color = image.color();
        if !matches!(
            color,
            image::ColorType::L8 | image::ColorType::La8 | image::ColorType::Rgb8 | image::ColorType::Rgba8
        ) {
            return Err(UndistortError::UnsupportedColor(color));
        }
        let table = self.table((image.width(), image.height()), alpha)?;
        let out = match image {
            DynamicImage::ImageLuma8(buf) => DynamicImage::ImageLuma8(remap(buf, &table)),
            DynamicImage::ImageLumaA8(buf) => DynamicImage::ImageLumaA8(remap(buf, &table)),
            DynamicImage::ImageRgb8(buf) => DynamicImage::ImageRgb8(remap(buf, &table)),
            DynamicImage::ImageRgba8(buf) => DynamicImage::ImageRgba8(remap(buf, &table)),
            _ => return Err(UndistortError::UnsupportedColor(color)),
        };
        Ok(UndistortionResult {
            image: out,
            intrinsics: table.camera.intrinsics,
            valid_roi: table.camera.valid_roi,
        })
    }

    /// Undistort pixel positions. Results are pixels of an ideal camera
    /// with the original intrinsics and no distortion.
    pub fn undistort_points(&self, points: &[Point2<f64>]) -> Vec<Point2<f64>> {
        points
            .iter()
            .map(|&p| {
                let n = self
                    .distortion
                    .undistort(self.intrinsics.to_normalized(p), UNDISTORT_ITERATIONS);
                self.intrinsics.to_pixel(n)
            })
            .collect()
    }
}

#[derive(Clone, Copy, Debug)]
struct Bounds {
    x0: f64,
    y0: f64,
    x1: f64,
    y1: f64,
}

impl Bounds {
    fn width(&self) -> f64 {
        self.x1 - self.x0
    }

    fn height(&self) -> f64 {
        self.y1 - self.y0
    }

    fn is_empty(&self) -> bool {
        !(self.width() > 0.0 && self.height() > 0.0)
    }
}

/// Bilinear remap with a constant black border.
fn remap<P>(src: &ImageBuffer<P, Vec<u8>>, table: &RemapTable) -> ImageBuffer<P, Vec<u8>>
where
    P: Pixel<Subpixel = u8> + Send + Sync,
{
    let ch = P::CHANNEL_COUNT as usize;
    let (sw, sh) = (src.width() as i64, src.height() as i64);
    let raw = src.as_raw();
    let fetch = |x: i64, y: i64, c: usize| -> f32 {
        if x < 0 || y < 0 || x >= sw || y >= sh {
            0.0
        } else {
            raw[(y as usize * sw as usize + x as usize) * ch + c] as f32
        }
    };

    let row_len = table.width as usize * ch;
    let mut out = vec![0u8; row_len * table.height as usize];
    out.par_chunks_mut(row_len)
        .zip(table.map.par_chunks(table.width as usize))
        .for_each(|(row, coords)| {
            for (px, &[sx, sy]) in row.chunks_exact_mut(ch).zip(coords) {
                if !(sx > -1.0 && sy > -1.0 && sx < sw as f32 && sy < sh as f32) {
                    continue;
                }
                let x0 = sx.floor();
                let y0 = sy.floor();
                let (fx, fy) = (sx - x0, sy - y0);
                let (xi, yi) = (x0 as i64, y0 as i64);
                for (c, v) in px.iter_mut().enumerate() {
                    let a = fetch(xi, yi, c) + fx * (fetch(xi + 1, yi, c) - fetch(xi, yi, c));
                    let b = fetch(xi, yi + 1, c)
                        + fx * (fetch(xi + 1, yi + 1, c) - fetch(xi, yi + 1, c));
                    *v = (a + fy * (b - a)).round().clamp(0.0, 255.0) as u8;
                }
            }
        });

    // The buffer length matches the table by construction.
    ImageBuffer::from_raw(table.width, table.height, out)
        .unwrap_or_else(|| ImageBuffer::new(table.width, table.height))
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{GrayImage, Luma, Rgb, RgbImage};

    fn barrel() -> Undistorter {
        Undistorter::from_parts(
            Intrinsics {
                fx: 400.0,
                fy: 400.0,
                cx: 159.5,
                cy: 119.5,
            },
            Distortion {
                k1: -0.3,
                ..Distortion::none()
            },
        )
    }

    #[test]
    fn zero_distortion_keeps_the_camera() {
        let k = Intrinsics {
            fx: 500.0,
            fy: 480.0,
            cx: 319.5,
            cy: 239.5,
        };
        let und = Undistorter::from_parts(k, Distortion::none());
        for alpha in [0.0, 0.5, 1.0] {
            let cam = und.optimal_new_camera_matrix((640, 480), alpha).unwrap();
            assert!((cam.intrinsics.fx - k.fx).abs() < 1e-6);
            assert!((cam.intrinsics.fy - k.fy).abs() < 1e-6);
            assert!((cam.intrinsics.cx - k.cx).abs() < 1e-6);
            assert!((cam.intrinsics.cy - k.cy).abs() < 1e-6);
            assert_eq!(
                cam.valid_roi,
                PixelRect {
                    x: 0,
                    y: 0,
                    width: 640,
                    height: 480
                }
            );
        }
    }

    #[test]
    fn alpha_trades_valid_area_for_field_of_view() {
        let und = barrel();
        let crop = und.optimal_new_camera_matrix((320, 240), 0.0).unwrap();
        let keep = und.optimal_new_camera_matrix((320, 240), 1.0).unwrap();

        // Keeping every source pixel needs a wider view.
        assert!(keep.intrinsics.fx < crop.intrinsics.fx);
        assert!(keep.valid_roi.area() < crop.valid_roi.area());
        assert!(crop.valid_roi.width >= 318 && crop.valid_roi.height >= 238);

        assert_eq!(
            und.optimal_new_camera_matrix((320, 240), 1.5).unwrap_err(),
            UndistortError::InvalidAlpha(1.5)
        );
    }

    #[test]
    fn cropped_output_is_fully_valid_and_wide_output_has_border() {
        let und = barrel();
        let white = DynamicImage::ImageLuma8(GrayImage::from_pixel(320, 240, Luma([255])));

        let crop = und.undistort(&white, 0.0).unwrap();
        let img = crop.image.to_luma8();
        let roi = crop.valid_roi;
        let dark_inside = (roi.y + 1..roi.y + roi.height - 1)
            .flat_map(|y| (roi.x + 1..roi.x + roi.width - 1).map(move |x| (x, y)))
            .filter(|&(x, y)| img.get_pixel(x, y)[0] < 200)
            .count();
        assert_eq!(dark_inside, 0);

        let wide = und.undistort(&white, 1.0).unwrap().image.to_luma8();
        // Edge midpoints fall outside the source under barrel distortion.
        assert_eq!(wide.get_pixel(0, 120)[0], 0);
        assert_eq!(wide.get_pixel(160, 120)[0], 255);
    }

    #[test]
    fn keeps_channel_layout_and_reuses_tables() {
        let und = barrel();
        let rgb = DynamicImage::ImageRgb8(RgbImage::from_pixel(320, 240, Rgb([10, 120, 250])));
        let out = und.undistort(&rgb, 0.5).unwrap();
        assert_eq!(out.image.color(), image::ColorType::Rgb8);
        assert_eq!(out.image.to_rgb8().get_pixel(160, 120), &Rgb([10, 120, 250]));

        let gray = DynamicImage::ImageLuma8(GrayImage::new(320, 240));
        und.undistort(&gray, 0.5).unwrap();
        und.undistort(&rgb, 0.5).unwrap();
        assert_eq!(und.cached_tables(), 1);
        und.undistort(&gray, 1.0).unwrap();
        assert_eq!(und.cached_tables(), 2);
    }

    #[test]
    fn calibrated_undistorter_rejects_other_resolutions() {
        let k = Intrinsics {
            fx: 400.0,
            fy: 400.0,
            cx: 159.5,
            cy: 119.5,
        };
        let d = Distortion {
            k1: -0.3,
            ..Distortion::none()
        };
        let model = CameraModel::new(
            k,
            d,
            (320, 240),
            0.1,
            Vec::new(),
            crate::model::CalibrationConfidence::High,
            crate::model::SolveStats {
                init: crate::init::InitMethod::Zhang,
                evaluations: 1,
                initial_rms: 1.0,
                termination: crate::model::Termination::CostConverged,
                converged: true,
            },
        );
        let und = Undistorter::new(&model);
        assert_eq!(und.image_size(), Some((320, 240)));

        for size in [(640, 480), (160, 120), (1920, 1080)] {
            let img = DynamicImage::ImageLuma8(GrayImage::new(size.0, size.1));
            assert_eq!(
                und.undistort(&img, 1.0).unwrap_err(),
                UndistortError::SizeMismatch {
                    expected: (320, 240),
                    got: size
                }
            );
            assert!(matches!(
                und.optimal_new_camera_matrix(size, 0.0),
                Err(UndistortError::SizeMismatch { .. })
            ));
        }
        assert_eq!(und.cached_tables(), 0);

        let same = DynamicImage::ImageLuma8(GrayImage::new(320, 240));
        und.undistort(&same, 1.0).unwrap();
        assert_eq!(barrel().image_size(), None);
    }

    #[test]
    fn rejects_unsupported_layouts() {
        let und = barrel();
        let img = DynamicImage::ImageLuma16(image::ImageBuffer::new(8, 8));
        assert!(matches!(
            und.undistort(&img, 0.0),
            Err(UndistortError::UnsupportedColor(_))
        ));
    }

    #[test]
    fn undistort_points_inverts_projection() {
        let und = barrel();
        let ideal = Point2::new(260.0, 40.0);
        let n = und.intrinsics().to_normalized(ideal);
        let distorted = und.intrinsics().to_pixel(und.distortion().distort(n));
        let back = und.undistort_points(&[distorted]);
        assert!((back[0] - ideal).norm() < 1e-6);
    }
}
