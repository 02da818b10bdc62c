//! Model-to-image correspondences collected across views.

use checkercal_core::{BoardModel, DetectedCorners, GridGeometry, ModelPoint};
use serde::Serialize;
use std::sync::Arc;

#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum CorrespondenceError {
    #[error("view geometry {got} does not match the accumulator geometry {expected}")]
    GeometryMismatch {
        expected: GridGeometry,
        got: GridGeometry,
    },
    #[error("{model} model points vs {detected} detected corners (expected {expected})")]
    LengthMismatch {
        expected: usize,
        model: usize,
        detected: usize,
    },
    #[error("image index {0} was already added")]
    DuplicateImage(usize),
}

/// One image's ordered model points and their detected pixel positions.
#[derive(Clone, Debug, Serialize)]
pub struct ViewCorrespondence {
    image_index: usize,
    label: String,
    #[serde(skip)]
    model: Arc<[ModelPoint]>,
    image_points: DetectedCorners,
}

impl ViewCorrespondence {
    /// Position of the image in the caller's input list.
    pub fn image_index(&self) -> usize {
        self.image_index
    }

    /// Free-form label, typically the image path.
    pub fn label(&self) -> &str {
        &self.label
    }

    pub fn model_points(&self) -> &[ModelPoint] {
        &self.model
    }

    pub fn image_points(&self) -> &[nalgebra::Point2<f64>] {
        self.image_points.points()
    }

    pub fn len(&self) -> usize {
        self.model.len()
    }

    pub fn is_empty(&self) -> bool {
        self.model.is_empty()
    }
}

/// Collects one entry per image with a detected pattern.
///
/// Entries are kept sorted by image index, so views finishing out of order
/// (e.g. from a parallel detector) still produce the same set.
#[derive(Clone, Debug)]
pub struct CorrespondenceAccumulator {
    geometry: GridGeometry,
    views: Vec<ViewCorrespondence>,
}

impl CorrespondenceAccumulator {
    pub fn new(geometry: GridGeometry) -> Self {
        Self {
            geometry,
            views: Vec::new(),
        }
    }

    pub fn geometry(&self) -> GridGeometry {
        self.geometry
    }

    pub fn len(&self) -> usize {
        self.views.len()
    }

    pub fn is_empty(&self) -> bool {
        self.views.is_empty()
    }

    /// Append the correspondences of image `image_index`.
    pub fn push(
        &mut self,
        image_index: usize,
        label: impl Into<String>,
        board: &BoardModel,
        corners: DetectedCorners,
    ) -> Result<(), CorrespondenceError> {
        for got in [board.geometry(), corners.geometry()] {
            if got != self.geometry {
                return Err(CorrespondenceError::GeometryMismatch {
                    expected: self.geometry,
                    got,
                });
            }
        }
        let expected = self.geometry.corner_count();
        if board.points().len() != expected || corners.len() != expected {
            return Err(CorrespondenceError::LengthMismatch {
                expected,
                model: board.points().len(),
                detected: corners.len(),
            });
        }

        let slot = match self
            .views
            .binary_search_by_key(&image_index, |v| v.image_index)
        {
            Ok(_) => return Err(CorrespondenceError::DuplicateImage(image_index)),
            Err(slot) => slot,
        };
        self.views.insert(
            slot,
            ViewCorrespondence {
                image_index,
                label: label.into(),
                model: board.shared_points(),
                image_points: corners,
            },
        );
        Ok(())
    }

    pub fn finish(self) -> CorrespondenceSet {
        CorrespondenceSet {
            geometry: self.geometry,
            views: self.views,
        }
    }
}

/// Immutable, image-index ordered correspondences ready for calibration.
#[derive(Clone, Debug, Serialize)]
pub struct CorrespondenceSet {
    geometry: GridGeometry,
    views: Vec<ViewCorrespondence>,
}

impl CorrespondenceSet {
    pub fn geometry(&self) -> GridGeometry {
        self.geometry
    }

    pub fn views(&self) -> &[ViewCorrespondence] {
        &self.views
    }

    pub fn len(&self) -> usize {
        self.views.len()
    }

    pub fn is_empty(&self) -> bool {
        self.views.is_empty()
    }

    /// Total number of point correspondences over all views.
    pub fn total_points(&self) -> usize {
        self.views.iter().map(ViewCorrespondence::len).sum()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use nalgebra::Point2;

    fn board(cols: u32, rows: u32) -> BoardModel {
        BoardModel::new(GridGeometry::new(cols, rows).unwrap(), 1.0).unwrap()
    }

    fn corners(board: &BoardModel, shift: f64) -> DetectedCorners {
        let pts = board
            .points()
            .iter()
            .map(|p| Point2::new(10.0 * p.x + shift, 10.0 * p.y))
            .collect();
        DetectedCorners::new(board.geometry(), pts).unwrap()
    }

    #[test]
    fn keeps_entries_sorted_by_image_index() {
        let b = board(4, 3);
        let mut acc = CorrespondenceAccumulator::new(b.geometry());
        for idx in [5, 1, 3, 0] {
            acc.push(idx, format!("img{idx}"), &b, corners(&b, idx as f64))
                .unwrap();
        }
        let set = acc.finish();
        let order: Vec<usize> = set.views().iter().map(|v| v.image_index()).collect();
        assert_eq!(order, vec![0, 1, 3, 5]);
        assert_eq!(set.views()[2].label(), "img3");
        assert_eq!(set.total_points(), 4 * 12);
        // every view shares the board's point buffer
        assert!(std::ptr::eq(
            set.views()[0].model_points().as_ptr(),
            b.points().as_ptr()
        ));
    }

    #[test]
    fn rejects_duplicates_and_foreign_geometry() {
        let b = board(4, 3);
        let mut acc = CorrespondenceAccumulator::new(b.geometry());
        acc.push(2, "a", &b, corners(&b, 0.0)).unwrap();
        assert_eq!(
            acc.push(2, "b", &b, corners(&b, 1.0)),
            Err(CorrespondenceError::DuplicateImage(2))
        );

        let other = board(3, 4);
        assert!(matches!(
            acc.push(3, "c", &other, corners(&other, 0.0)),
            Err(CorrespondenceError::GeometryMismatch { .. })
        ));
        assert!(matches!(
            acc.push(4, "d", &b, corners(&other, 0.0)),
            Err(CorrespondenceError::GeometryMismatch { .. })
        ));
        assert_eq!(acc.len(), 1);
    }

    #[test]
    fn empty_accumulator_gives_empty_set() {
        let set = CorrespondenceAccumulator::new(GridGeometry::new(9, 5).unwrap()).finish();
        assert!(set.is_empty());
        assert_eq!(set.total_points(), 0);
    }
}
