use crate::geom::grid_axis_from_orientations;
use crate::gridgraph::GridGraph;
use crate::params::PatternDetectorParams;
use crate::response::{detect_corners, ChessCorner};
use checkercal_core::{DetectedCorners, GrayImageView, GridGeometry};
use log::{debug, info};
use nalgebra::Point2;

#[cfg(feature = "tracing")]
use tracing::instrument;

/// Finds the full inner-corner lattice of a checkerboard of known size.
///
/// Detection is all-or-nothing: the result holds exactly
/// `columns * rows` corners in raster order, or nothing at all. A board seen
/// rotated by 90° (its long side vertical) is reordered so the raster order
/// still runs along the board's own columns.
#[derive(Clone, Debug, Default)]
pub struct PatternDetector {
    pub params: PatternDetectorParams,
}

struct Candidate {
    corners: Vec<Point2<f64>>,
    strength: f32,
}

impl PatternDetector {
    pub fn new(params: PatternDetectorParams) -> Self {
        Self { params }
    }

    /// Raw ChESS corner candidates, before any grid fitting.
    pub fn find_corners(&self, image: &GrayImageView<'_>) -> Vec<ChessCorner> {
        detect_corners(image, &self.params.response)
    }

    /// Locate the `geometry` inner corners. `None` when the board is absent,
    /// partially visible or of a different size.
    #[cfg_attr(
        feature = "tracing",
        instrument(
            level = "info",
            skip(self, image),
            fields(width = image.width, height = image.height, grid = %geometry)
        )
    )]
    pub fn detect(&self, image: &GrayImageView<'_>, geometry: GridGeometry) -> Option<DetectedCorners> {
        let corners = self.find_corners(image);
        debug!("found {} raw ChESS corners", corners.len());
        self.detect_from_corners(&corners, geometry)
    }

    /// Grid fitting on precomputed corner candidates.
    pub fn detect_from_corners(
        &self,
        corners: &[ChessCorner],
        geometry: GridGeometry,
    ) -> Option<DetectedCorners> {
        if corners.len() < geometry.corner_count() {
            debug!(
                "{} candidates cannot cover a {} grid",
                corners.len(),
                geometry
            );
            return None;
        }

        let Some(grid_axis) =
            grid_axis_from_orientations(corners.iter().map(|c| (c.orientation, c.strength)))
        else {
            info!("failed to estimate grid axes from orientations");
            return None;
        };

        let graph = GridGraph::new(corners, &self.params.graph, grid_axis);

        let mut best: Option<Candidate> = None;
        for component in graph.components() {
            if component.len() != geometry.corner_count() {
                continue;
            }
            let Some(coords) = graph.lattice_coordinates(&component) else {
                debug!("discarding component with inconsistent grid coordinates");
                continue;
            };
            let Some(ordered) = order_raster(&coords, corners, geometry) else {
                continue;
            };
            let strength: f32 = component.iter().map(|&i| corners[i].strength).sum();
            if best.as_ref().is_none_or(|b| strength > b.strength) {
                best = Some(Candidate {
                    corners: ordered,
                    strength,
                });
            }
        }

        let Some(best) = best else {
            debug!("no component matches a {} grid", geometry);
            return None;
        };
        DetectedCorners::new(geometry, best.corners).ok()
    }
}

/// Turn `(node, i, j)` lattice coordinates into raster-ordered positions.
///
/// The lattice must fill a `columns x rows` rectangle exactly, either as
/// found or turned by 90°. The 90° case maps `(i, j)` to
/// `(col, row) = (j, -i)`, a rotation, so the board keeps its handedness.
fn order_raster(
    coords: &[(usize, i32, i32)],
    corners: &[ChessCorner],
    geometry: GridGeometry,
) -> Option<Vec<Point2<f64>>> {
    let min_i = coords.iter().map(|c| c.1).min()?;
    let max_i = coords.iter().map(|c| c.1).max()?;
    let min_j = coords.iter().map(|c| c.2).min()?;
    let max_j = coords.iter().map(|c| c.2).max()?;
    let width = (max_i - min_i + 1) as u32;
    let height = (max_j - min_j + 1) as u32;

    let (cols, rows) = (geometry.columns(), geometry.rows());
    let rotated = if (width, height) == (cols, rows) {
        false
    } else if (width, height) == (rows, cols) {
        true
    } else {
        debug!(
            "component spans {}x{}, expected {}",
            width, height, geometry
        );
        return None;
    };

    let mut slots: Vec<Option<Point2<f64>>> = vec![None; geometry.corner_count()];
    for &(node, i, j) in coords {
        let (col, row) = if rotated {
            (j - min_j, max_i - i)
        } else {
            (i - min_i, j - min_j)
        };
        let p = corners[node].position;
        slots[geometry.index(col as u32, row as u32)] = Some(Point2::new(p.x as f64, p.y as f64));
    }
    slots.into_iter().collect()
}
