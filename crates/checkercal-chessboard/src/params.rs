use serde::{Deserialize, Serialize};

/// Parameters of the dense ChESS response and peak extraction.
#[derive(Clone, Debug, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct ChessResponseParams {
    /// Relative threshold as a fraction of the max response.
    pub threshold_rel: f32,
    /// Absolute threshold override; used instead of `threshold_rel` when set.
    pub threshold_abs: Option<f32>,
    /// Non-maximum suppression radius in pixels.
    pub nms_radius: u32,
    /// Minimum count of above-threshold pixels in the NMS window
    /// (rejects isolated noise).
    pub min_cluster_size: u32,
}

impl Default for ChessResponseParams {
    fn default() -> Self {
        Self {
            threshold_rel: 0.1,
            threshold_abs: None,
            nms_radius: 3,
            min_cluster_size: 2,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct GridGraphParams {
    pub min_spacing_pix: f32,
    pub max_spacing_pix: f32,
    /// Nearest neighbours queried per corner, the corner itself included.
    pub k_neighbors: usize,
    pub orientation_tolerance_deg: f32,
}

impl Default for GridGraphParams {
    fn default() -> Self {
        Self {
            min_spacing_pix: 5.0,
            max_spacing_pix: 400.0,
            k_neighbors: 9,
            orientation_tolerance_deg: 22.5,
        }
    }
}

/// Parameters of the checkerboard pattern detector.
#[derive(Clone, Debug, Default, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct PatternDetectorParams {
    pub response: ChessResponseParams,
    pub graph: GridGraphParams,
}

/// Stop refinement after `max_iters` iterations or once a step moves the
/// corner by less than `epsilon` pixels, whichever comes first.
#[derive(Clone, Copy, Debug, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct TermCriteria {
    pub max_iters: u32,
    pub epsilon: f64,
}

impl Default for TermCriteria {
    fn default() -> Self {
        Self {
            max_iters: 50,
            epsilon: 0.001,
        }
    }
}

/// Parameters of the gradient-based sub-pixel refiner.
#[derive(Clone, Copy, Debug, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct RefineParams {
    /// Search window half-size; the window spans `2 * half_window + 1` pixels.
    pub half_window: u32,
    /// Half-size of the central zone excluded from the window, if any.
    pub dead_zone: Option<u32>,
    pub criteria: TermCriteria,
}

impl Default for RefineParams {
    fn default() -> Self {
        Self {
            half_window: 5,
            dead_zone: None,
            criteria: TermCriteria::default(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn partial_json_keeps_remaining_defaults() {
        let json = r#"{ "graph": { "k_neighbors": 12 }, "response": { "threshold_abs": 4.5 } }"#;
        let params: PatternDetectorParams = serde_json::from_str(json).unwrap();
        assert_eq!(params.graph.k_neighbors, 12);
        assert_eq!(params.graph.max_spacing_pix, 400.0);
        assert_eq!(params.response.threshold_abs, Some(4.5));
        assert_eq!(params.response.nms_radius, 3);

        let refine: RefineParams =
            serde_json::from_str(r#"{ "criteria": { "epsilon": 0.01 } }"#).unwrap();
        assert_eq!(refine.criteria.max_iters, 50);
        assert_eq!(refine.half_window, 5);
        assert_eq!(refine.dead_zone, None);
    }

    #[test]
    fn detector_params_survive_json() {
        let mut params = PatternDetectorParams::default();
        params.response.min_cluster_size = 4;
        params.graph.orientation_tolerance_deg = 15.0;
        let json = serde_json::to_string(&params).unwrap();
        let back: PatternDetectorParams = serde_json::from_str(&json).unwrap();
        assert_eq!(back, params);
    }
}
