/// Isolation forest for daily-profile anomaly detection
pub mod isolation_forest;
/// Dense feed-forward network core (PINN, sequence autoencoder)
pub mod network;
/// Min-max and z-score feature scalers
pub mod scaler;

pub use isolation_forest::IsolationForest;
pub use network::{Activation, FeedForwardNetwork, TrainOptions};
pub use scaler::{MinMaxScaler, ZScoreScaler};
