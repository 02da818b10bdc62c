//! Board description: grid geometry, model points and detected corners.

use nalgebra::{Point2, Point3};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

#[derive(thiserror::Error, Debug, Clone, PartialEq)]
pub enum GeometryError {
    #[error("grid geometry needs at least 2x2 inner corners (got {columns}x{rows})")]
    TooSmall { columns: u32, rows: u32 },

    #[error("square size must be finite and positive (got {0})")]
    InvalidSquareSize(f64),

    #[error("expected {expected} corners for a {columns}x{rows} grid, got {got}")]
    CornerCount {
        columns: u32,
        rows: u32,
        expected: usize,
        got: usize,
    },
}

/// Count of inner corner intersections of a checkerboard.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "RawGeometry", into = "RawGeometry")]
pub struct GridGeometry {
    columns: u32,
    rows: u32,
}

#[derive(Serialize, Deserialize)]
struct RawGeometry {
    columns: u32,
    rows: u32,
}

impl TryFrom<RawGeometry> for GridGeometry {
    type Error = GeometryError;

    fn try_from(raw: RawGeometry) -> Result<Self, Self::Error> {
        GridGeometry::new(raw.columns, raw.rows)
    }
}

impl From<GridGeometry> for RawGeometry {
    fn from(g: GridGeometry) -> Self {
        RawGeometry {
            columns: g.columns,
            rows: g.rows,
        }
    }
}

impl GridGeometry {
    pub fn new(columns: u32, rows: u32) -> Result<Self, GeometryError> {
        if columns < 2 || rows < 2 {
            return Err(GeometryError::TooSmall { columns, rows });
        }
        Ok(Self { columns, rows })
    }

    #[inline]
    pub fn columns(&self) -> u32 {
        self.columns
    }

    #[inline]
    pub fn rows(&self) -> u32 {
        self.rows
    }

    /// Number of inner corners, `columns * rows`.
    #[inline]
    pub fn corner_count(&self) -> usize {
        self.columns as usize * self.rows as usize
    }

    /// Raster index of the corner at `(col, row)`.
    #[inline]
    pub fn index(&self, col: u32, row: u32) -> usize {
        row as usize * self.columns as usize + col as usize
    }
}

impl std::fmt::Display for GridGeometry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}x{}", self.columns, self.rows)
    }
}

/// A point on the calibration plane. `z` is always zero.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct ModelPoint {
    pub x: f64,
    pub y: f64,
}

impl ModelPoint {
    #[inline]
    pub fn to_point2(self) -> Point2<f64> {
        Point2::new(self.x, self.y)
    }

    #[inline]
    pub fn to_point3(self) -> Point3<f64> {
        Point3::new(self.x, self.y, 0.0)
    }
}

/// Grid geometry plus the physical model points, generated once.
///
/// Points are in raster order: row-major with the column index running
/// fastest, `x = col * square_size`, `y = row * square_size`. The point
/// buffer is reference counted so every view of the same board shares it.
#[derive(Clone, Debug)]
pub struct BoardModel {
    geometry: GridGeometry,
    square_size: f64,
    points: Arc<[ModelPoint]>,
}

impl BoardModel {
    pub fn new(geometry: GridGeometry, square_size: f64) -> Result<Self, GeometryError> {
        if !(square_size.is_finite() && square_size > 0.0) {
            return Err(GeometryError::InvalidSquareSize(square_size));
        }
        let points: Arc<[ModelPoint]> = (0..geometry.rows())
            .flat_map(|row| {
                (0..geometry.columns()).map(move |col| ModelPoint {
                    x: col as f64 * square_size,
                    y: row as f64 * square_size,
                })
            })
            .collect();
        Ok(Self {
            geometry,
            square_size,
            points,
        })
    }

    #[inline]
    pub fn geometry(&self) -> GridGeometry {
        self.geometry
    }

    #[inline]
    pub fn square_size(&self) -> f64 {
        self.square_size
    }

    #[inline]
    pub fn points(&self) -> &[ModelPoint] {
        &self.points
    }

    /// Shared handle to the point buffer.
    pub fn shared_points(&self) -> Arc<[ModelPoint]> {
        Arc::clone(&self.points)
    }
}

/// Ordered pixel positions of a board's inner corners, in the same raster
/// order as [`BoardModel::points`].
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct DetectedCorners {
    geometry: GridGeometry,
    points: Vec<Point2<f64>>,
}

impl DetectedCorners {
    pub fn new(geometry: GridGeometry, points: Vec<Point2<f64>>) -> Result<Self, GeometryError> {
        let expected = geometry.corner_count();
        if points.len() != expected {
            return Err(GeometryError::CornerCount {
                columns: geometry.columns(),
                rows: geometry.rows(),
                expected,
                got: points.len(),
            });
        }
        Ok(Self { geometry, points })
    }

    #[inline]
    pub fn geometry(&self) -> GridGeometry {
        self.geometry
    }

    #[inline]
    pub fn points(&self) -> &[Point2<f64>] {
        &self.points
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.points.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }

    pub fn into_points(self) -> Vec<Point2<f64>> {
        self.points
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn geometry_rejects_degenerate_sizes() {
        assert!(GridGeometry::new(9, 5).is_ok());
        assert_eq!(
            GridGeometry::new(1, 5).unwrap_err(),
            GeometryError::TooSmall {
                columns: 1,
                rows: 5
            }
        );
        assert!(GridGeometry::new(3, 0).is_err());
    }

    #[test]
    fn geometry_deserialization_is_validated() {
        let ok: GridGeometry = serde_json::from_str(r#"{"columns":7,"rows":6}"#).unwrap();
        assert_eq!(ok.corner_count(), 42);
        assert!(serde_json::from_str::<GridGeometry>(r#"{"columns":1,"rows":6}"#).is_err());
    }

    #[test]
    fn model_points_follow_raster_order() {
        let g = GridGeometry::new(3, 2).unwrap();
        let board = BoardModel::new(g, 2.5).unwrap();
        let pts: Vec<(f64, f64)> = board.points().iter().map(|p| (p.x, p.y)).collect();
        assert_eq!(
            pts,
            vec![
                (0.0, 0.0),
                (2.5, 0.0),
                (5.0, 0.0),
                (0.0, 2.5),
                (2.5, 2.5),
                (5.0, 2.5)
            ]
        );
        assert_eq!(board.points()[g.index(2, 1)].x, 5.0);
        assert_eq!(board.points()[0].to_point3().z, 0.0);
    }

    #[test]
    fn model_points_are_shared() {
        let board = BoardModel::new(GridGeometry::new(4, 4).unwrap(), 1.0).unwrap();
        let a = board.shared_points();
        let b = board.clone().shared_points();
        assert!(Arc::ptr_eq(&a, &b));
    }

    #[test]
    fn detected_corners_enforce_length() {
        let g = GridGeometry::new(2, 2).unwrap();
        assert!(DetectedCorners::new(g, vec![Point2::origin(); 4]).is_ok());
        assert!(matches!(
            DetectedCorners::new(g, vec![Point2::origin(); 3]),
            Err(GeometryError::CornerCount {
                expected: 4,
                got: 3,
                ..
            })
        ));
        assert!(BoardModel::new(g, 0.0).is_err());
    }
}
