//! Isolation forest over fixed-width feature vectors.
//!
//! Random axis-aligned splits isolate anomalous points in fewer steps than
//! normal ones; the anomaly score follows the standard
//! `s(x) = 2^(-E[h(x)] / c(n))` formulation, reported negated so that lower
//! means more anomalous. The decision offset is the contamination quantile
//! of the training scores.

use crate::utils::error::{CogniError, CogniResult};
use rand::seq::index::sample;
use rand::Rng;
use serde::{Deserialize, Serialize};

const N_TREES: usize = 100;
const MAX_SUBSAMPLE: usize = 256;
const EULER_GAMMA: f64 = 0.577_215_664_901_532_9;

#[derive(Debug, Clone, Serialize, Deserialize)]
enum IsoNode {
    Leaf {
        size: usize,
    },
    Split {
        feature: usize,
        threshold: f64,
        left: Box<IsoNode>,
        right: Box<IsoNode>,
    },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IsolationForest {
    trees: Vec<IsoNode>,
    n_features: usize,
    subsample: usize,
    offset: f64,
}

impl IsolationForest {
    /// Fit on row-major data; `contamination` sets the decision quantile.
    pub fn fit(data: &[Vec<f64>], contamination: f64, rng: &mut impl Rng) -> CogniResult<Self> {
        let n = data.len();
        let n_features = data.first().map(|r| r.len()).unwrap_or(0);
        if n < 2 || n_features == 0 {
            return Err(CogniError::InsufficientData {
                reason: format!("isolation forest needs at least 2 samples, got {n}"),
            });
        }
        if data.iter().any(|r| r.len() != n_features) {
            return Err(CogniError::invalid("data", "inconsistent feature width"));
        }

        let subsample = n.min(MAX_SUBSAMPLE);
        let height_limit = (subsample as f64).log2().ceil().max(1.0) as usize;

        let mut trees = Vec::with_capacity(N_TREES);
        for _ in 0..N_TREES {
            let indices: Vec<usize> = sample(rng, n, subsample).into_iter().collect();
            trees.push(build_tree(data, &indices, 0, height_limit, rng));
        }

        let mut forest = Self {
            trees,
            n_features,
            subsample,
            offset: 0.0,
        };

        let mut scores: Vec<f64> = data.iter().map(|row| forest.score_sample(row)).collect();
        scores.sort_by(|a, b| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal));
        let idx = ((contamination * n as f64).floor() as usize).min(n - 1);
        forest.offset = scores[idx];

        Ok(forest)
    }

    /// Negated anomaly score; lower is more anomalous (matches the usual
    /// `score_samples` convention).
    pub fn score_sample(&self, row: &[f64]) -> f64 {
        if self.trees.is_empty() || row.len() != self.n_features {
            return 0.0;
        }
        let avg_path: f64 = self
            .trees
            .iter()
            .map(|tree| path_length(tree, row, 0))
            .sum::<f64>()
            / self.trees.len() as f64;
        let denom = average_path_length(self.subsample);
        if denom <= 0.0 {
            return 0.0;
        }
        -(2.0_f64.powf(-avg_path / denom))
    }

    /// +1 for normal, -1 for anomalous (below the training offset).
    pub fn predict(&self, row: &[f64]) -> i32 {
        if self.score_sample(row) < self.offset {
            -1
        } else {
            1
        }
    }

    pub fn decision_offset(&self) -> f64 {
        self.offset
    }
}

fn build_tree(
    data: &[Vec<f64>],
    indices: &[usize],
    depth: usize,
    height_limit: usize,
    rng: &mut impl Rng,
) -> IsoNode {
    if indices.len() <= 1 || depth >= height_limit {
        return IsoNode::Leaf {
            size: indices.len(),
        };
    }

    // Only features that still spread across this partition are splittable.
    let n_features = data[indices[0]].len();
    let splittable: Vec<(usize, f64, f64)> = (0..n_features)
        .filter_map(|f| {
            let mut lo = f64::INFINITY;
            let mut hi = f64::NEG_INFINITY;
            for &i in indices {
                lo = lo.min(data[i][f]);
                hi = hi.max(data[i][f]);
            }
            (hi > lo).then_some((f, lo, hi))
        })
        .collect();

    let Some(&(feature, lo, hi)) = splittable
        .get(rng.gen_range(0..splittable.len().max(1)))
        .filter(|_| !splittable.is_empty())
    else {
        return IsoNode::Leaf {
            size: indices.len(),
        };
    };

    let threshold = rng.gen_range(lo..hi);
    let (left, right): (Vec<usize>, Vec<usize>) = indices
        .iter()
        .copied()
        .partition(|&i| data[i][feature] < threshold);
    if left.is_empty() || right.is_empty() {
        return IsoNode::Leaf {
            size: indices.len(),
        };
    }

    IsoNode::Split {
        feature,
        threshold,
        left: Box::new(build_tree(data, &left, depth + 1, height_limit, rng)),
        right: Box::new(build_tree(data, &right, depth + 1, height_limit, rng)),
    }
}

fn path_length(node: &IsoNode, row: &[f64], depth: usize) -> f64 {
    match node {
        IsoNode::Leaf { size } => depth as f64 + average_path_length(*size),
        IsoNode::Split {
            feature,
            threshold,
            left,
            right,
        } => {
            if row[*feature] < *threshold {
                path_length(left, row, depth + 1)
            } else {
                path_length(right, row, depth + 1)
            }
        }
    }
}

/// Expected path length of an unsuccessful BST search over `n` points.
fn average_path_length(n: usize) -> f64 {
    match n {
        0 | 1 => 0.0,
        2 => 1.0,
        _ => {
            let nf = n as f64;
            2.0 * ((nf - 1.0).ln() + EULER_GAMMA) - 2.0 * (nf - 1.0) / nf
        }
    }
}
