//! Tracker brain: a particle filter localising people across the room graph
//! from sparse positive and negative motion observations.

use crate::infrastructure::model_store::{ModelStore, TRACKER_STATE_FILE};
use crate::utils::error::CogniResult;
use nalgebra::DMatrix;
use rand::Rng;
use serde::{Deserialize, Serialize};
use std::time::Instant;
use tracing::{debug, warn};

const MOVE_PROBABILITY: f64 = 0.2;
const SILENT_ROOM_DECAY: f64 = 0.95;
const POSITIVE_BOOST: f64 = 50.0;
const NEGATIVE_DAMP: f64 = 0.02;
const OCCUPANCY_FLOOR: f64 = 0.01;

#[derive(Debug, Clone, Serialize, Deserialize)]
struct TrackerSnapshot {
    rooms: Vec<String>,
    matrix: DMatrix<f64>,
    particles: Vec<usize>,
    weights: Vec<f64>,
    monitored_mask: Vec<bool>,
}

#[derive(Debug)]
pub struct TrackerBrain {
    num_particles: usize,
    persist_interval_secs: u64,
    rooms: Vec<String>,
    adjacency: Option<DMatrix<f64>>,
    particles: Vec<usize>,
    weights: Vec<f64>,
    monitored: Vec<bool>,
    ready: bool,
    last_persist: Option<Instant>,
}

impl TrackerBrain {
    pub fn new(num_particles: usize, persist_interval_secs: u64) -> Self {
        Self {
            num_particles: num_particles.max(1),
            persist_interval_secs,
            rooms: Vec::new(),
            adjacency: None,
            particles: Vec::new(),
            weights: Vec::new(),
            monitored: Vec::new(),
            ready: false,
            last_persist: None,
        }
    }

    pub fn is_ready(&self) -> bool {
        self.ready
    }

    pub fn num_particles(&self) -> usize {
        self.num_particles
    }

    pub fn particles(&self) -> &[usize] {
        &self.particles
    }

    pub fn weights(&self) -> &[f64] {
        &self.weights
    }

    /// Install a topology. The particle cloud is re-initialised when the
    /// room count changes or no cloud exists yet.
    pub fn set_topology(&mut self, rooms: &[String], matrix: &DMatrix<f64>, monitored: &[String]) {
        let room_count_changed = self.rooms.len() != rooms.len();
        self.rooms = rooms.to_vec();
        self.adjacency = Some(matrix.clone());
        self.monitored = rooms
            .iter()
            .map(|room| monitored.iter().any(|m| m == room))
            .collect();

        if self.particles.is_empty() || room_count_changed {
            self.initialise_particles();
        }
        self.ready = true;
    }

    fn initialise_particles(&mut self) {
        let n = self.rooms.len();
        if n == 0 {
            return;
        }
        let mut rng = rand::thread_rng();
        self.particles = (0..self.num_particles).map(|_| rng.gen_range(0..n)).collect();
        self.weights = vec![1.0 / self.num_particles as f64; self.num_particles];
    }

    /// One full update cycle: diffuse, penalise silence, reward the firing
    /// room, normalise, resample on degeneracy, estimate occupancy.
    pub fn update(&mut self, event_room: Option<&str>, delta_t: f64) -> Vec<(String, f64)> {
        if !self.ready || self.adjacency.is_none() {
            return Vec::new();
        }
        let event_idx = event_room.and_then(|room| self.rooms.iter().position(|r| r == room));
        let mut rng = rand::thread_rng();

        if delta_t > 0.0 {
            self.diffuse(delta_t, &mut rng);
            self.penalise_silent_rooms(event_idx);
        }

        if let Some(target) = event_idx {
            for (particle, weight) in self.particles.iter().zip(self.weights.iter_mut()) {
                *weight *= if *particle == target {
                    POSITIVE_BOOST
                } else {
                    NEGATIVE_DAMP
                };
            }
        }

        self.normalise_weights();

        let n_eff = 1.0 / self.weights.iter().map(|w| w * w).sum::<f64>();
        if n_eff < self.num_particles as f64 / 2.0 {
            self.resample(&mut rng);
        }

        self.estimate()
    }

    /// Diffusion: one micro-step per two seconds of elapsed time; in each
    /// step every particle moves to a uniform adjacent room with
    /// probability 0.2.
    fn diffuse(&mut self, delta_t: f64, rng: &mut impl Rng) {
        let Some(adjacency) = self.adjacency.as_ref() else {
            return;
        };
        let n = self.rooms.len();
        let neighbours: Vec<Vec<usize>> = (0..n)
            .map(|i| (0..n).filter(|&j| adjacency[(i, j)] > 0.0).collect())
            .collect();

        let steps = ((delta_t / 2.0).floor() as usize).max(1);
        for _ in 0..steps {
            for particle in &mut self.particles {
                if rng.gen::<f64>() >= MOVE_PROBABILITY {
                    continue;
                }
                let options = &neighbours[*particle];
                if !options.is_empty() {
                    *particle = options[rng.gen_range(0..options.len())];
                }
            }
        }
    }

    /// Negative information: monitored rooms that stayed silent leak a
    /// little probability. The decay is deliberately close to 1 so the
    /// estimate never collapses on a single missed detection.
    fn penalise_silent_rooms(&mut self, event_idx: Option<usize>) {
        if self.monitored.len() != self.rooms.len() {
            return;
        }
        let mut silent = self.monitored.clone();
        if let Some(active) = event_idx {
            silent[active] = false;
        }
        for (particle, weight) in self.particles.iter().zip(self.weights.iter_mut()) {
            if silent[*particle] {
                *weight *= SILENT_ROOM_DECAY;
            }
        }
    }

    fn normalise_weights(&mut self) {
        let sum: f64 = self.weights.iter().sum();
        if sum > 0.0 && sum.is_finite() {
            for weight in &mut self.weights {
                *weight /= sum;
            }
        } else {
            let uniform = 1.0 / self.num_particles as f64;
            self.weights.iter_mut().for_each(|w| *w = uniform);
        }
    }

    /// Systematic resampling: a single uniform offset walks the cumulative
    /// weight sum producing stratified indices in O(N).
    fn resample(&mut self, rng: &mut impl Rng) {
        let n = self.num_particles;
        let offset = rng.gen::<f64>() / n as f64;
        let mut resampled = Vec::with_capacity(n);

        let mut cumulative = self.weights[0];
        let mut j = 0usize;
        for i in 0..n {
            let position = offset + i as f64 / n as f64;
            while position > cumulative && j < n - 1 {
                j += 1;
                cumulative += self.weights[j];
            }
            resampled.push(self.particles[j]);
        }

        self.particles = resampled;
        let uniform = 1.0 / n as f64;
        self.weights.iter_mut().for_each(|w| *w = uniform);
    }

    /// Per-room occupancy from particle counts, strongest first.
    fn estimate(&self) -> Vec<(String, f64)> {
        let n = self.rooms.len();
        let mut counts = vec![0usize; n];
        for &particle in &self.particles {
            if particle < n {
                counts[particle] += 1;
            }
        }
        let mut occupancy: Vec<(String, f64)> = counts
            .iter()
            .enumerate()
            .filter_map(|(i, &count)| {
                let p = count as f64 / self.num_particles as f64;
                (p > OCCUPANCY_FLOOR)
                    .then(|| (self.rooms[i].clone(), (p * 1000.0).round() / 1000.0))
            })
            .collect();
        occupancy.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(std::cmp::Ordering::Equal));
        occupancy
    }

    /// Persist at most once per cadence window; called after each update.
    pub fn maybe_persist(&mut self, store: &ModelStore) {
        let due = self
            .last_persist
            .map_or(true, |t| t.elapsed().as_secs() >= self.persist_interval_secs);
        if !due || !self.ready {
            return;
        }
        if let Err(e) = self.save(store) {
            warn!("tracker persistence failed: {e}");
        } else {
            self.last_persist = Some(Instant::now());
        }
    }

    pub fn save(&self, store: &ModelStore) -> CogniResult<()> {
        let Some(adjacency) = self.adjacency.as_ref() else {
            return Ok(());
        };
        store.save_bin(
            TRACKER_STATE_FILE,
            &TrackerSnapshot {
                rooms: self.rooms.clone(),
                matrix: adjacency.clone(),
                particles: self.particles.clone(),
                weights: self.weights.clone(),
                monitored_mask: self.monitored.clone(),
            },
        )
    }

    /// Best-effort restore. A particle-count mismatch re-initialises the
    /// cloud; rooms and adjacency are taken as stored.
    pub fn restore(&mut self, store: &ModelStore) -> CogniResult<()> {
        let Some(snapshot) = store.load_bin::<TrackerSnapshot>(TRACKER_STATE_FILE)? else {
            return Ok(());
        };
        if snapshot.rooms.is_empty() || snapshot.matrix.nrows() != snapshot.rooms.len() {
            debug!("tracker snapshot inconsistent, starting fresh");
            return Ok(());
        }

        self.rooms = snapshot.rooms;
        self.adjacency = Some(snapshot.matrix);
        self.monitored = snapshot.monitored_mask;
        if self.monitored.len() != self.rooms.len() {
            self.monitored = vec![false; self.rooms.len()];
        }

        let n = self.rooms.len();
        let valid = snapshot.particles.len() == self.num_particles
            && snapshot.weights.len() == self.num_particles
            && snapshot.particles.iter().all(|&p| p < n);
        if valid {
            self.particles = snapshot.particles;
            self.weights = snapshot.weights;
        } else {
            self.initialise_particles();
        }
        self.ready = true;
        Ok(())
    }

    /// Rooms and adjacency as persisted, for rebuilding the graph engine on
    /// restart.
    pub fn topology(&self) -> Option<(&[String], &DMatrix<f64>)> {
        self.adjacency.as_ref().map(|m| (self.rooms.as_slice(), m))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn three_room_matrix() -> DMatrix<f64> {
        // Identity plus edges A-B and B-C.
        DMatrix::from_row_slice(
            3,
            3,
            &[1.0, 1.0, 0.0, 1.0, 1.0, 1.0, 0.0, 1.0, 1.0],
        )
    }

    fn rooms() -> Vec<String> {
        vec!["A".to_string(), "B".to_string(), "C".to_string()]
    }

    fn monitored() -> Vec<String> {
        rooms()
    }

    #[test]
    fn particles_and_weights_stay_consistent() {
        let mut tracker = TrackerBrain::new(500, 60);
        tracker.set_topology(&rooms(), &three_room_matrix(), &monitored());

        for _ in 0..5 {
            tracker.update(Some("B"), 3.0);
            assert_eq!(tracker.particles().len(), 500);
            assert_eq!(tracker.weights().len(), 500);
            assert!(tracker.particles().iter().all(|&p| p < 3));

            let sum: f64 = tracker.weights().iter().sum();
            let uniform = tracker.weights().iter().all(|&w| (w - 1.0 / 500.0).abs() < 1e-12);
            assert!((sum - 1.0).abs() < 1e-9 || uniform);
        }
    }

    #[test]
    fn repeated_positive_events_converge_on_room() {
        let mut tracker = TrackerBrain::new(1000, 60);
        tracker.set_topology(&rooms(), &three_room_matrix(), &monitored());

        tracker.update(Some("A"), 0.0);
        tracker.update(Some("B"), 3.0);
        let estimate = tracker.update(Some("B"), 3.0);

        let p = |room: &str| {
            estimate
                .iter()
                .find(|(r, _)| r == room)
                .map(|(_, p)| *p)
                .unwrap_or(0.0)
        };
        assert!(p("B") > 0.8, "P(B) = {}", p("B"));
        assert!(p("A") + p("C") < 0.2);
    }

    #[test]
    fn unknown_room_only_diffuses() {
        let mut tracker = TrackerBrain::new(200, 60);
        tracker.set_topology(&rooms(), &three_room_matrix(), &monitored());

        let estimate = tracker.update(Some("garage"), 4.0);
        // No positive update: the cloud stays spread out.
        assert!(estimate.len() > 1);
    }

    #[test]
    fn missing_topology_yields_empty_estimate() {
        let mut tracker = TrackerBrain::new(100, 60);
        assert!(tracker.update(Some("A"), 1.0).is_empty());
    }

    #[test]
    fn degenerate_weights_reset_to_uniform() {
        let mut tracker = TrackerBrain::new(100, 60);
        tracker.set_topology(&rooms(), &three_room_matrix(), &monitored());
        tracker.weights.iter_mut().for_each(|w| *w = 0.0);
        tracker.normalise_weights();
        assert!(tracker.weights().iter().all(|&w| (w - 0.01).abs() < 1e-12));
    }

    #[test]
    fn snapshot_round_trips_and_mismatched_count_reinitialises() {
        let dir = tempfile::tempdir().unwrap();
        let store = ModelStore::at(dir.path());

        let mut tracker = TrackerBrain::new(300, 60);
        tracker.set_topology(&rooms(), &three_room_matrix(), &monitored());
        tracker.update(Some("B"), 2.0);
        tracker.save(&store).unwrap();

        let mut same = TrackerBrain::new(300, 60);
        same.restore(&store).unwrap();
        assert!(same.is_ready());
        assert_eq!(same.particles(), tracker.particles());
        assert_eq!(same.weights(), tracker.weights());

        let mut different = TrackerBrain::new(50, 60);
        different.restore(&store).unwrap();
        assert!(different.is_ready());
        assert_eq!(different.particles().len(), 50);
        let uniform = 1.0 / 50.0;
        assert!(different.weights().iter().all(|&w| (w - uniform).abs() < 1e-12));
    }
}
