use crate::{chessboard, core};
use nalgebra::Point2;

#[cfg(feature = "tracing")]
use tracing::instrument;

/// Corners of one image after detection and sub-pixel refinement.
#[derive(Clone, Debug)]
pub struct RefinedDetection {
    pub corners: core::DetectedCorners,
    /// Corners whose refinement hit the iteration limit or was reset.
    pub unconverged: usize,
}

/// Convert an `image::GrayImage` into the lightweight `checkercal-core` view type.
pub fn gray_view(img: &::image::GrayImage) -> core::GrayImageView<'_> {
    core::GrayImageView {
        width: img.width() as usize,
        height: img.height() as usize,
        data: img.as_raw(),
    }
}

/// Find the ordered inner corners of a `columns x rows` board.
pub fn detect_pattern(
    img: &::image::GrayImage,
    detector: &chessboard::PatternDetector,
    geometry: core::GridGeometry,
) -> Option<core::DetectedCorners> {
    detector.detect(&gray_view(img), geometry)
}

/// Detect the board and refine every corner to sub-pixel accuracy.
///
/// Corners that do not converge keep their best estimate; they are counted
/// in [`RefinedDetection::unconverged`].
#[cfg_attr(
    feature = "tracing",
    instrument(
        level = "info",
        skip(img, detector, refiner),
        fields(width = img.width(), height = img.height())
    )
)]
pub fn detect_and_refine(
    img: &::image::GrayImage,
    detector: &chessboard::PatternDetector,
    refiner: &chessboard::CornerRefiner,
    geometry: core::GridGeometry,
) -> Option<RefinedDetection> {
    let view = gray_view(img);
    let coarse = detector.detect(&view, geometry)?;
    let refined = refiner.refine(&view, coarse.points());
    let unconverged = refined.iter().filter(|c| !c.converged).count();
    let points: Vec<Point2<f64>> = refined.iter().map(|c| c.position).collect();
    // Refinement keeps the count, so the geometry check cannot fail here.
    let corners = core::DetectedCorners::new(geometry, points).ok()?;
    Some(RefinedDetection {
        corners,
        unconverged,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::synthetic::{board_pose, SyntheticCamera};
    use crate::core::{BoardModel, Distortion, GridGeometry, Intrinsics};

    fn render(geometry: GridGeometry) -> ::image::GrayImage {
        let board = BoardModel::new(geometry, 0.04).unwrap();
        let cam = SyntheticCamera {
            intrinsics: Intrinsics {
                fx: 400.0,
                fy: 400.0,
                cx: 160.0,
                cy: 120.0,
            },
            distortion: Distortion {
                k1: -0.12,
                k2: 0.03,
                p1: 0.0005,
                p2: -0.0004,
                k3: 0.0,
            },
            width: 320,
            height: 240,
        };
        let img = cam.render(&board, &board_pose(&board, 0.8, 0.25, -0.2, 0.1));
        ::image::GrayImage::from_raw(img.width as u32, img.height as u32, img.data).unwrap()
    }

    #[test]
    fn gray_view_shares_the_buffer() {
        let img = ::image::GrayImage::from_fn(7, 3, |x, y| ::image::Luma([(x + 10 * y) as u8]));
        let view = gray_view(&img);
        assert_eq!((view.width, view.height), (7, 3));
        assert_eq!(view.at(4, 2), 24);
    }

    #[test]
    fn detects_and_refines_rendered_board() {
        let geometry = GridGeometry::new(9, 5).unwrap();
        let img = render(geometry);
        let detector = chessboard::PatternDetector::default();
        let refiner = chessboard::CornerRefiner::new(Default::default()).unwrap();

        let found = detect_and_refine(&img, &detector, &refiner, geometry).unwrap();
        assert_eq!(found.corners.len(), 45);
        assert_eq!(found.unconverged, 0);

        let other = GridGeometry::new(7, 6).unwrap();
        assert!(detect_pattern(&img, &detector, other).is_none());
    }
}
