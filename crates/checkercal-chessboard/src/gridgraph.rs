//! 4-connected lattice graph over corner candidates.

use crate::geom::{angle_diff_abs, axis_vec_diff, is_orthogonal};
use crate::params::GridGraphParams;
use crate::response::ChessCorner;
use kiddo::{KdTree, SquaredEuclidean};
use nalgebra::Vector2;
use std::collections::{HashMap, VecDeque};
use std::f32::consts::{FRAC_PI_2, FRAC_PI_4};

/// Direction of a lattice step in image terms: `Right` is `+u`, `Down` is
/// `+v` for the grid axes `u = (cos a, sin a)` and `v = (-sin a, cos a)`.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum NeighborDirection {
    Right,
    Down,
    Left,
    Up,
}

impl NeighborDirection {
    pub const ALL: [NeighborDirection; 4] = [
        NeighborDirection::Right,
        NeighborDirection::Down,
        NeighborDirection::Left,
        NeighborDirection::Up,
    ];

    fn slot(self) -> usize {
        self as usize
    }

    pub fn opposite(self) -> Self {
        Self::ALL[(self.slot() + 2) % 4]
    }

    /// Lattice step `(di, dj)`.
    pub fn step(self) -> (i32, i32) {
        match self {
            NeighborDirection::Right => (1, 0),
            NeighborDirection::Down => (0, 1),
            NeighborDirection::Left => (-1, 0),
            NeighborDirection::Up => (0, -1),
        }
    }

    fn of_edge(edge: &Vector2<f32>, grid_axis: f32) -> Self {
        let (s, c) = grid_axis.sin_cos();
        let pu = edge.x * c + edge.y * s;
        let pv = -edge.x * s + edge.y * c;
        match (pu.abs() > pv.abs(), pu >= 0.0, pv >= 0.0) {
            (true, true, _) => NeighborDirection::Right,
            (true, false, _) => NeighborDirection::Left,
            (false, _, true) => NeighborDirection::Down,
            (false, _, false) => NeighborDirection::Up,
        }
    }
}

/// Accepted link from one candidate to another.
#[derive(Clone, Debug)]
pub struct NodeNeighbor {
    pub direction: NeighborDirection,
    pub index: usize,
    pub distance: f32,
    /// Sum of angular misfits; lower is better.
    pub score: f32,
}

/// Test whether `other` can be the next lattice corner after `corner`.
///
/// Adjacent checkerboard corners have swapped bright diagonals, and the edge
/// between them runs along a grid line: 45° from both diagonals and close to
/// one of the global axes.
fn link(
    corner: &ChessCorner,
    other: &ChessCorner,
    index: usize,
    params: &GridGraphParams,
    grid_axis: f32,
) -> Option<NodeNeighbor> {
    let tol = params.orientation_tolerance_deg.to_radians();
    if !is_orthogonal(corner.orientation, other.orientation, tol) {
        return None;
    }

    let edge = other.position - corner.position;
    let distance = edge.norm();
    if !(params.min_spacing_pix..=params.max_spacing_pix).contains(&distance) {
        return None;
    }

    let edge_angle = edge.y.atan2(edge.x);
    let misfit_a = (axis_vec_diff(corner.orientation, edge_angle) - FRAC_PI_4).abs();
    let misfit_b = (axis_vec_diff(other.orientation, edge_angle) - FRAC_PI_4).abs();
    let off_axis = axis_vec_diff(grid_axis, edge_angle);
    let off_axis = off_axis.min(FRAC_PI_2 - off_axis);
    if misfit_a > tol || misfit_b > tol || off_axis > tol {
        return None;
    }

    let swap_misfit = (FRAC_PI_2 - angle_diff_abs(corner.orientation, other.orientation)).abs();
    Some(NodeNeighbor {
        direction: NeighborDirection::of_edge(&edge, grid_axis),
        index,
        distance,
        score: misfit_a + misfit_b + swap_misfit,
    })
}

/// Whether `candidate` should take a direction slot held by `current`.
///
/// A corner three squares away along a line passes the angular tests too,
/// so the nearest link wins and the score only breaks ties.
fn beats(candidate: &NodeNeighbor, current: Option<&NodeNeighbor>) -> bool {
    match current {
        None => true,
        Some(cur) => {
            candidate.distance < cur.distance
                || (candidate.distance == cur.distance && candidate.score < cur.score)
        }
    }
}

type Links = [Option<NodeNeighbor>; 4];

/// Lattice graph: at most one mutual link per node and direction.
#[derive(Clone, Debug, Default)]
pub struct GridGraph {
    links: Vec<Links>,
}

impl GridGraph {
    pub fn new(corners: &[ChessCorner], params: &GridGraphParams, grid_axis: f32) -> Self {
        if corners.is_empty() {
            return Self::default();
        }
        let points: Vec<[f32; 2]> = corners
            .iter()
            .map(|c| [c.position.x, c.position.y])
            .collect();
        let tree: KdTree<f32, 2> = (&points).into();
        let qty = params.k_neighbors.max(2);

        let proposed: Vec<Links> = corners
            .iter()
            .enumerate()
            .map(|(i, corner)| {
                let mut best = Links::default();
                let query = [corner.position.x, corner.position.y];
                for nn in tree.nearest_n::<SquaredEuclidean>(&query, qty) {
                    let j = nn.item as usize;
                    if j == i {
                        continue;
                    }
                    if let Some(cand) = link(corner, &corners[j], j, params, grid_axis) {
                        let slot = &mut best[cand.direction.slot()];
                        if beats(&cand, slot.as_ref()) {
                            *slot = Some(cand);
                        }
                    }
                }
                best
            })
            .collect();

        // j is i's right neighbour only if i is j's left one.
        let links = proposed
            .iter()
            .enumerate()
            .map(|(i, node)| {
                let mut kept = Links::default();
                for n in node.iter().flatten() {
                    let back = &proposed[n.index][n.direction.opposite().slot()];
                    if back.as_ref().is_some_and(|b| b.index == i) {
                        kept[n.direction.slot()] = Some(n.clone());
                    }
                }
                kept
            })
            .collect();

        Self { links }
    }

    pub fn len(&self) -> usize {
        self.links.len()
    }

    pub fn is_empty(&self) -> bool {
        self.links.is_empty()
    }

    /// All links of `node`.
    pub fn neighbors(&self, node: usize) -> impl Iterator<Item = &NodeNeighbor> {
        self.links[node].iter().flatten()
    }

    pub fn neighbor(&self, node: usize, direction: NeighborDirection) -> Option<&NodeNeighbor> {
        self.links[node][direction.slot()].as_ref()
    }

    /// Connected components, each listed in BFS order from its lowest node.
    pub fn components(&self) -> Vec<Vec<usize>> {
        let mut seen = vec![false; self.len()];
        let mut out = Vec::new();
        for start in 0..self.len() {
            if seen[start] {
                continue;
            }
            seen[start] = true;
            let mut members = vec![start];
            let mut head = 0;
            while head < members.len() {
                let node = members[head];
                head += 1;
                for n in self.neighbors(node) {
                    if !seen[n.index] {
                        seen[n.index] = true;
                        members.push(n.index);
                    }
                }
            }
            out.push(members);
        }
        out
    }

    /// Integer lattice coordinates `(node, i, j)` for a component, with its
    /// first node at `(0, 0)`.
    ///
    /// Returns `None` when two nodes claim the same cell or one node is reached
    /// at two different cells: the component is not a clean lattice.
    pub fn lattice_coordinates(&self, component: &[usize]) -> Option<Vec<(usize, i32, i32)>> {
        let start = *component.first()?;
        let mut cell_of: HashMap<usize, (i32, i32)> = HashMap::with_capacity(component.len());
        let mut owner: HashMap<(i32, i32), usize> = HashMap::with_capacity(component.len());
        let mut order = Vec::with_capacity(component.len());
        let mut queue = VecDeque::from([(start, (0, 0))]);

        while let Some((node, cell)) = queue.pop_front() {
            match cell_of.get(&node) {
                Some(&known) if known == cell => continue,
                Some(_) => return None,
                None => {}
            }
            if owner.insert(cell, node).is_some() {
                return None;
            }
            cell_of.insert(node, cell);
            order.push((node, cell.0, cell.1));
            for n in self.neighbors(node) {
                let (di, dj) = n.direction.step();
                queue.push_back((n.index, (cell.0 + di, cell.1 + dj)));
            }
        }
        Some(order)
    }
}
