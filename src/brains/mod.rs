/// Comfort pattern miner
pub mod comfort;
/// Energy brain: thermodynamic identification and coasting advice
pub mod energy;
/// Graph engine: topology, spectral propagation, behaviour matrix
pub mod graph;
/// Health brain: activity anomalies, trends, heatmaps
pub mod health;
/// Physics-informed thermal-rate regressor
pub mod pinn;
/// Security brain: sequence autoencoder with learning-mode overlay
pub mod security;
/// Tracker brain: room-level particle filter
pub mod tracker;

pub use comfort::ComfortBrain;
pub use energy::EnergyBrain;
pub use graph::GraphEngine;
pub use health::HealthBrain;
pub use pinn::PinnBrain;
pub use security::SecurityBrain;
pub use tracker::TrackerBrain;
