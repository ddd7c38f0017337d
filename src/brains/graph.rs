//! Graph engine: room topology, spectral signal propagation and the learned
//! behavioural transition matrix.

use crate::infrastructure::model_store::{ModelStore, GRAPH_BEHAVIOR_FILE};
use crate::utils::error::{CogniError, CogniResult};
use nalgebra::DMatrix;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use tracing::debug;

const SIGNAL_FLOOR: f64 = 0.05;

/// Persisted behaviour matrix, keyed to the room order it was learned on.
#[derive(Debug, Clone, Serialize, Deserialize)]
struct BehaviorSnapshot {
    rooms: Vec<String>,
    matrix: DMatrix<f64>,
}

#[derive(Debug, Default)]
pub struct GraphEngine {
    rooms: Vec<String>,
    index: HashMap<String, usize>,
    adjacency: Option<DMatrix<f64>>,
    filter: Option<DMatrix<f64>>,
    behavior: Option<DMatrix<f64>>,
    ready: bool,
}

impl GraphEngine {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_ready(&self) -> bool {
        self.ready
    }

    pub fn rooms(&self) -> &[String] {
        &self.rooms
    }

    pub fn adjacency(&self) -> Option<&DMatrix<f64>> {
        self.adjacency.as_ref()
    }

    pub fn behavior(&self) -> Option<&DMatrix<f64>> {
        self.behavior.as_ref()
    }

    /// Install a topology: diagonal forced to 1, normalised filter
    /// D^(-1/2) · A · D^(-1/2) with the convention 0^(-1/2) = 0.
    ///
    /// A malformed matrix leaves the engine state unchanged.
    pub fn set_topology(&mut self, rooms: &[String], matrix: &[Vec<f64>]) -> CogniResult<()> {
        let n = rooms.len();
        if n == 0 {
            return Err(CogniError::invalid("rooms", "empty room list"));
        }
        if matrix.len() != n || matrix.iter().any(|row| row.len() != n) {
            return Err(CogniError::invalid(
                "matrix",
                format!("expected {n}x{n} adjacency"),
            ));
        }
        if matrix.iter().flatten().any(|v| !v.is_finite() || *v < 0.0) {
            return Err(CogniError::invalid("matrix", "non-finite or negative entry"));
        }

        let mut adjacency = DMatrix::from_fn(n, n, |r, c| matrix[r][c]);
        adjacency.fill_diagonal(1.0);

        let inv_sqrt_degree: Vec<f64> = (0..n)
            .map(|i| {
                let degree = adjacency.row(i).sum();
                if degree > 0.0 {
                    1.0 / degree.sqrt()
                } else {
                    0.0
                }
            })
            .collect();
        let filter = DMatrix::from_fn(n, n, |r, c| {
            inv_sqrt_degree[r] * adjacency[(r, c)] * inv_sqrt_degree[c]
        });

        // A changed room set invalidates the learned transitions.
        if self
            .behavior
            .as_ref()
            .is_some_and(|b| b.nrows() != n || self.rooms != rooms)
        {
            self.behavior = None;
        }

        self.rooms = rooms.to_vec();
        self.index = rooms
            .iter()
            .enumerate()
            .map(|(i, r)| (r.clone(), i))
            .collect();
        self.adjacency = Some(adjacency);
        self.filter = Some(filter);
        self.ready = true;
        Ok(())
    }

    /// Propagate a unit signal from `start` over the room graph.
    ///
    /// Uses the learned behaviour matrix when present and dimensionally
    /// compatible, otherwise the spectral filter. Every other room scoring
    /// above the floor is returned, strongest first.
    pub fn propagate(&self, start: &str) -> Vec<(String, f64)> {
        let (Some(filter), Some(&idx)) = (self.filter.as_ref(), self.index.get(start)) else {
            return Vec::new();
        };
        let n = self.rooms.len();

        let scores: Vec<f64> = match self.behavior.as_ref().filter(|b| b.nrows() == n) {
            Some(behavior) => (0..n).map(|j| behavior[(idx, j)]).collect(),
            None => (0..n).map(|j| filter[(j, idx)]).collect(),
        };

        let mut hits: Vec<(String, f64)> = scores
            .iter()
            .enumerate()
            .filter(|(j, &score)| *j != idx && score > SIGNAL_FLOOR)
            .map(|(j, &score)| (self.rooms[j].clone(), (score * 1000.0).round() / 1000.0))
            .collect();
        hits.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(std::cmp::Ordering::Equal));
        hits
    }

    /// Learn the behavioural transition matrix from movement sequences:
    /// count consecutive in-graph transitions, row-normalise, mask to the
    /// adjacency support, row-normalise again.
    pub fn train_behavior(&mut self, sequences: &[Vec<String>]) -> CogniResult<usize> {
        let adjacency = self
            .adjacency
            .as_ref()
            .ok_or_else(|| CogniError::not_ready("graph"))?;
        let n = self.rooms.len();

        let mut counts = DMatrix::<f64>::zeros(n, n);
        let mut transitions = 0usize;
        for sequence in sequences {
            for pair in sequence.windows(2) {
                if let (Some(&a), Some(&b)) = (self.index.get(&pair[0]), self.index.get(&pair[1])) {
                    counts[(a, b)] += 1.0;
                    transitions += 1;
                }
            }
        }
        if transitions == 0 {
            return Err(CogniError::InsufficientData {
                reason: "no in-graph transitions in batch".to_string(),
            });
        }

        row_normalise(&mut counts);
        for r in 0..n {
            for c in 0..n {
                if adjacency[(r, c)] == 0.0 {
                    counts[(r, c)] = 0.0;
                }
            }
        }
        row_normalise(&mut counts);

        self.behavior = Some(counts);
        Ok(transitions)
    }

    pub fn save(&self, store: &ModelStore) -> CogniResult<()> {
        let Some(behavior) = self.behavior.as_ref() else {
            return Ok(());
        };
        store.save_bin(
            GRAPH_BEHAVIOR_FILE,
            &BehaviorSnapshot {
                rooms: self.rooms.clone(),
                matrix: behavior.clone(),
            },
        )
    }

    /// Re-attach a persisted behaviour matrix if it matches the installed
    /// room order.
    pub fn restore(&mut self, store: &ModelStore) -> CogniResult<()> {
        let Some(snapshot) = store.load_bin::<BehaviorSnapshot>(GRAPH_BEHAVIOR_FILE)? else {
            return Ok(());
        };
        if snapshot.rooms == self.rooms && snapshot.matrix.nrows() == self.rooms.len() {
            self.behavior = Some(snapshot.matrix);
        } else {
            debug!("stored behaviour matrix does not match current topology, ignoring");
        }
        Ok(())
    }
}

fn row_normalise(matrix: &mut DMatrix<f64>) {
    for r in 0..matrix.nrows() {
        let sum: f64 = matrix.row(r).sum();
        if sum > 0.0 {
            for c in 0..matrix.ncols() {
                matrix[(r, c)] /= sum;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn line_topology() -> GraphEngine {
        let mut graph = GraphEngine::new();
        let rooms = vec!["a".to_string(), "b".to_string(), "c".to_string()];
        let matrix = vec![
            vec![0.0, 1.0, 0.0],
            vec![1.0, 0.0, 1.0],
            vec![0.0, 1.0, 0.0],
        ];
        graph.set_topology(&rooms, &matrix).unwrap();
        graph
    }

    #[test]
    fn filter_is_reproducible_and_nonnegative() {
        let graph = line_topology();
        let filter = graph.filter.as_ref().unwrap();
        assert!(filter.iter().all(|&v| v >= 0.0));

        // Degrees with the forced self-loop: a=2, b=3, c=2.
        assert!((filter[(0, 1)] - 1.0 / (2.0_f64 * 3.0).sqrt()).abs() < 1e-12);
        assert!((filter[(0, 0)] - 0.5).abs() < 1e-12);
    }

    #[test]
    fn propagation_from_middle_reaches_both_ends_equally() {
        let graph = line_topology();
        let hits = graph.propagate("b");
        assert_eq!(hits.len(), 2);
        assert!(hits.iter().all(|(room, _)| room != "b"));
        assert!((hits[0].1 - hits[1].1).abs() < 1e-9);
        assert!(hits[0].1 > 0.0);
        // Descending order.
        assert!(hits[0].1 >= hits[1].1);
    }

    #[test]
    fn unknown_start_room_yields_empty() {
        let graph = line_topology();
        assert!(graph.propagate("garage").is_empty());
        assert!(GraphEngine::new().propagate("a").is_empty());
    }

    #[test]
    fn malformed_matrix_leaves_state_unchanged() {
        let mut graph = line_topology();
        let rooms = vec!["a".to_string(), "b".to_string()];
        let bad = vec![vec![0.0, 1.0]];
        assert!(graph.set_topology(&rooms, &bad).is_err());
        assert_eq!(graph.rooms().len(), 3);
        assert!(graph.is_ready());
    }

    #[test]
    fn behavior_training_masks_to_adjacency() {
        let mut graph = line_topology();
        // Transitions a->c are not adjacent; they must be masked out.
        let sequences = vec![
            vec!["a".to_string(), "b".to_string()],
            vec!["a".to_string(), "c".to_string()],
            vec!["a".to_string(), "b".to_string()],
        ];
        graph.train_behavior(&sequences).unwrap();
        let behavior = graph.behavior().unwrap();
        assert_eq!(behavior[(0, 2)], 0.0);
        assert!((behavior[(0, 1)] - 1.0).abs() < 1e-12);
    }

    #[test]
    fn behavior_matrix_drives_propagation_when_present() {
        let mut graph = line_topology();
        let sequences = vec![vec!["b".to_string(), "c".to_string()]; 4];
        graph.train_behavior(&sequences).unwrap();
        let hits = graph.propagate("b");
        assert_eq!(hits.first().map(|(room, _)| room.as_str()), Some("c"));
    }

    #[test]
    fn behavior_snapshot_round_trips_through_store() {
        let dir = tempfile::tempdir().unwrap();
        let store = ModelStore::at(dir.path());

        let mut graph = line_topology();
        graph
            .train_behavior(&[vec!["a".to_string(), "b".to_string()]])
            .unwrap();
        graph.save(&store).unwrap();

        let mut restored = line_topology();
        restored.restore(&store).unwrap();
        assert_eq!(graph.behavior(), restored.behavior());
    }
}
