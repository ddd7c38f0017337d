//! Physics-informed thermal-rate regressor.
//!
//! A compact feed-forward net mapping `(t_in, t_out, valve, solar)` to a
//! temperature change rate in °C/h. Inputs are z-score normalised with a
//! standard-deviation floor so constant training columns cannot explode the
//! scale.

use crate::infrastructure::model_store::{ModelStore, PINN_MODEL_FILE, PINN_SCALER_FILE};
use crate::neural::network::{Activation, FeedForwardNetwork, TrainOptions};
use crate::neural::scaler::ZScoreScaler;
use crate::utils::error::{CogniError, CogniResult};
use nalgebra::{DMatrix, DVector};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

const LAYERS: [usize; 4] = [4, 16, 16, 1];
const STD_FLOOR: f64 = 1.0;
const TARGET_CAP: f64 = 10.0;
const MIN_SAMPLES: usize = 10;
const OUTPUT_CLAMP: f64 = 5.0;

/// One training observation: conditions and the measured rate.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ThermalSample {
    pub t_in: f64,
    pub t_out: f64,
    pub valve: f64,
    pub solar: bool,
    /// Measured temperature change, °C/h.
    pub rate: f64,
}

impl ThermalSample {
    fn features(&self) -> Vec<f64> {
        vec![
            self.t_in,
            self.t_out,
            self.valve,
            if self.solar { 1.0 } else { 0.0 },
        ]
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PinnTraining {
    pub samples: usize,
    pub loss: f64,
}

#[derive(Debug, Default)]
pub struct PinnBrain {
    network: Option<FeedForwardNetwork>,
    scaler: Option<ZScoreScaler>,
}

impl PinnBrain {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build from explicit parts (restore, tooling).
    pub fn from_parts(network: FeedForwardNetwork, scaler: ZScoreScaler) -> Self {
        Self {
            network: Some(network),
            scaler: Some(scaler),
        }
    }

    pub fn is_ready(&self) -> bool {
        self.network.is_some() && self.scaler.is_some()
    }

    /// Fit on measured thermal samples. Rates outside the plausibility cap
    /// are discarded before training.
    pub fn train(&mut self, samples: &[ThermalSample]) -> CogniResult<PinnTraining> {
        let usable: Vec<&ThermalSample> = samples
            .iter()
            .filter(|s| s.rate.abs() <= TARGET_CAP && s.rate.is_finite())
            .collect();
        if usable.len() < MIN_SAMPLES {
            return Err(CogniError::InsufficientData {
                reason: format!(
                    "PINN needs at least {MIN_SAMPLES} plausible samples, got {}",
                    usable.len()
                ),
            });
        }

        let rows: Vec<Vec<f64>> = usable.iter().map(|s| s.features()).collect();
        let scaler = ZScoreScaler::fit(&rows, STD_FLOOR)?;

        let columns: Vec<DVector<f64>> =
            rows.iter().map(|row| scaler.transform(row)).collect();
        let inputs = DMatrix::from_columns(&columns);
        let targets = DMatrix::from_iterator(1, usable.len(), usable.iter().map(|s| s.rate));

        let mut network =
            FeedForwardNetwork::new(&LAYERS, Activation::Tanh, Activation::Linear)?;
        let loss = network.fit(&inputs, &targets, &TrainOptions::default())?;

        info!("PINN trained on {} samples, loss {loss:.6}", usable.len());
        self.network = Some(network);
        self.scaler = Some(scaler);
        Ok(PinnTraining {
            samples: usable.len(),
            loss,
        })
    }

    /// Raw regressor output, unclamped. Consumers that gate on a
    /// plausibility band (the warm-up hybrid) read this one.
    pub fn predict_raw(&self, t_in: f64, t_out: f64, valve: f64, solar: bool) -> Option<f64> {
        let (network, scaler) = (self.network.as_ref()?, self.scaler.as_ref()?);
        let input = scaler.transform(&[t_in, t_out, valve, if solar { 1.0 } else { 0.0 }]);
        let output = network.forward(&input).ok()?;
        let rate = output.get(0).copied()?;
        rate.is_finite().then_some(rate)
    }

    /// Public inference: clamped to the physically sane band, 0.0 when the
    /// model is not ready or arithmetic fails.
    pub fn predict(&self, t_in: f64, t_out: f64, valve: f64, solar: bool) -> f64 {
        self.predict_raw(t_in, t_out, valve, solar)
            .map_or(0.0, |rate| rate.clamp(-OUTPUT_CLAMP, OUTPUT_CLAMP))
    }

    pub fn save(&self, store: &ModelStore) -> CogniResult<()> {
        if let (Some(network), Some(scaler)) = (self.network.as_ref(), self.scaler.as_ref()) {
            store.save_bin(PINN_MODEL_FILE, network)?;
            store.save_bin(PINN_SCALER_FILE, scaler)?;
        }
        Ok(())
    }

    pub fn restore(&mut self, store: &ModelStore) -> CogniResult<()> {
        let network = store.load_bin::<FeedForwardNetwork>(PINN_MODEL_FILE)?;
        let scaler = store.load_bin::<ZScoreScaler>(PINN_SCALER_FILE)?;
        if let (Some(network), Some(scaler)) = (network, scaler) {
            if network.input_dim() == scaler.n_features() {
                self.network = Some(network);
                self.scaler = Some(scaler);
                debug!("PINN restored");
            }
        }
        Ok(())
    }
}

/// A rigged regressor that always answers with a fixed raw rate; used by
/// tests and calibration tooling.
pub fn constant_rate_pinn(rate: f64) -> CogniResult<PinnBrain> {
    let weights = vec![
        DMatrix::zeros(16, 4),
        DMatrix::zeros(16, 16),
        DMatrix::zeros(1, 16),
    ];
    let biases = vec![
        DVector::zeros(16),
        DVector::zeros(16),
        DVector::from_vec(vec![rate]),
    ];
    let network = FeedForwardNetwork::from_parts(
        weights,
        biases,
        vec![Activation::Tanh, Activation::Tanh, Activation::Linear],
    )?;
    let scaler = ZScoreScaler {
        mean: vec![0.0; 4],
        std: vec![1.0; 4],
    };
    Ok(PinnBrain::from_parts(network, scaler))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn synthetic_samples() -> Vec<ThermalSample> {
        // Heating roughly proportional to valve opening, cooling against the
        // indoor/outdoor delta.
        let mut samples = Vec::new();
        for i in 0..30 {
            let valve = (i % 5) as f64 * 25.0;
            let t_in = 18.0 + (i % 4) as f64;
            let t_out = 5.0 + (i % 6) as f64;
            let rate = valve / 100.0 * 3.0 - (t_in - t_out) * 0.05;
            samples.push(ThermalSample {
                t_in,
                t_out,
                valve,
                solar: i % 7 == 0,
                rate,
            });
        }
        samples
    }

    #[test]
    fn rejects_thin_or_implausible_batches() {
        let mut pinn = PinnBrain::new();
        assert!(pinn.train(&[]).is_err());

        // All samples outside the plausibility cap.
        let wild: Vec<ThermalSample> = (0..20)
            .map(|i| ThermalSample {
                t_in: 20.0,
                t_out: 10.0,
                valve: 50.0,
                solar: false,
                rate: 40.0 + i as f64,
            })
            .collect();
        assert!(pinn.train(&wild).is_err());
        assert!(!pinn.is_ready());
    }

    #[test]
    fn untrained_predict_is_zero() {
        let pinn = PinnBrain::new();
        assert_eq!(pinn.predict(20.0, 5.0, 100.0, false), 0.0);
        assert!(pinn.predict_raw(20.0, 5.0, 100.0, false).is_none());
    }

    #[test]
    fn trained_predict_stays_in_clamp_band() {
        let mut pinn = PinnBrain::new();
        pinn.train(&synthetic_samples()).unwrap();
        assert!(pinn.is_ready());

        for (t_in, t_out, valve) in [(5.0, -20.0, 0.0), (30.0, 40.0, 100.0), (20.0, 10.0, 50.0)] {
            let rate = pinn.predict(t_in, t_out, valve, true);
            assert!((-5.0..=5.0).contains(&rate), "rate {rate} outside clamp");
        }
    }

    #[test]
    fn constant_rig_emits_fixed_rate() {
        let pinn = constant_rate_pinn(4.0).unwrap();
        assert_eq!(pinn.predict_raw(19.0, 10.0, 100.0, false), Some(4.0));
        assert_eq!(pinn.predict(19.0, 10.0, 100.0, false), 4.0);

        // Above the clamp the public prediction saturates, the raw one not.
        let wild = constant_rate_pinn(15.0).unwrap();
        assert_eq!(wild.predict_raw(19.0, 10.0, 100.0, false), Some(15.0));
        assert_eq!(wild.predict(19.0, 10.0, 100.0, false), 5.0);
    }

    #[test]
    fn snapshot_round_trip_preserves_predictions() {
        let dir = tempfile::tempdir().unwrap();
        let store = ModelStore::at(dir.path());

        let mut pinn = PinnBrain::new();
        pinn.train(&synthetic_samples()).unwrap();
        pinn.save(&store).unwrap();

        let mut restored = PinnBrain::new();
        restored.restore(&store).unwrap();
        assert!(restored.is_ready());
        assert_eq!(
            pinn.predict(20.0, 5.0, 100.0, false),
            restored.predict(20.0, 5.0, 100.0, false)
        );
    }
}
