//! Checkerboard inner-corner detection and sub-pixel refinement.
//!
//! Detection pipeline:
//! 1. Dense ChESS response, thresholding and NMS give corner candidates with
//!    a bright-diagonal orientation each.
//! 2. The dominant grid axis is estimated from all orientations.
//! 3. For each candidate, up to 4 neighbours (right/left/up/down along the
//!    grid axes) are selected by spacing and orientation; only mutual links
//!    are kept.
//! 4. BFS over each connected component assigns integer coordinates.
//! 5. A component is accepted only if it fills the requested
//!    `columns x rows` rectangle exactly; its corners are returned in
//!    raster order.
//!
//! [`CornerRefiner`] then moves every corner to sub-pixel accuracy.

mod detector;
mod geom;
mod gridgraph;
mod params;
mod refine;
mod response;

pub use detector::PatternDetector;
pub use gridgraph::{GridGraph, NeighborDirection, NodeNeighbor};
pub use params::{
    ChessResponseParams, GridGraphParams, PatternDetectorParams, RefineParams, TermCriteria,
};
pub use refine::{CornerRefiner, RefineError, RefinedCorner};
pub use response::{chess_response, detect_corners, ChessCorner, ResponseMap};
