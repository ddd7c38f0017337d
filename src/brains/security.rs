//! Security brain: sequence-autoencoder anomaly scoring of movement
//! sequences with a short-lived whitelist overlay ("learning mode").

use crate::infrastructure::model_store::{
    ModelStore, SECURITY_CONFIG_FILE, SECURITY_MODEL_FILE, SECURITY_SCALER_FILE,
    SECURITY_VOCAB_FILE,
};
use crate::neural::network::{Activation, FeedForwardNetwork, TrainOptions};
use crate::neural::scaler::MinMaxScaler;
use crate::utils::config::SecurityConfig;
use crate::utils::error::{CogniError, CogniResult};
use crate::utils::math::{mean, std_dev};
use nalgebra::{DMatrix, DVector};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, VecDeque};
use tracing::{debug, info};

const MIN_SEQ_LEN: usize = 10;
const MAX_SEQ_LEN: usize = 50;
const BOTTLENECK: [usize; 3] = [64, 32, 64];
const THRESHOLD_FLOOR: f64 = 0.01;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MovementStep {
    #[serde(default)]
    pub t_delta: f64,
    pub loc: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MovementSequence {
    #[serde(default)]
    pub steps: Vec<MovementStep>,
}

impl MovementSequence {
    pub fn locations(&self) -> Vec<String> {
        self.steps.iter().map(|s| s.loc.clone()).collect()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SecurityVerdict {
    pub score: f64,
    pub is_anomaly: bool,
    pub explanation: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub culprit_index: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub culprit_loc: Option<String>,
}

impl SecurityVerdict {
    fn neutral(explanation: &str) -> Self {
        Self {
            score: 0.0,
            is_anomaly: false,
            explanation: explanation.to_string(),
            culprit_index: None,
            culprit_loc: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrainingSummary {
    pub samples: usize,
    pub threshold: f64,
    pub loss: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct PersistedConfig {
    max_seq_len: usize,
    threshold: f64,
}

/// Bounded whitelist of coarse pattern signatures, live only while learning
/// mode is. Signatures are the last location and the last transition
/// (`"A->B"`).
#[derive(Debug)]
pub struct LearningOverlay {
    capacity: usize,
    active: bool,
    label: String,
    expires_at: f64,
    whitelist: VecDeque<String>,
}

impl LearningOverlay {
    fn new(capacity: usize) -> Self {
        Self {
            capacity,
            active: false,
            label: "none".to_string(),
            expires_at: 0.0,
            whitelist: VecDeque::new(),
        }
    }

    pub fn is_active(&self) -> bool {
        self.active
    }

    pub fn label(&self) -> &str {
        &self.label
    }

    pub fn whitelist_len(&self) -> usize {
        self.whitelist.len()
    }

    /// Disabling clears the whitelist unconditionally.
    fn set_mode(&mut self, active: bool, duration_minutes: f64, label: &str, now: f64) {
        if active {
            self.active = true;
            self.expires_at = now + duration_minutes * 60.0;
            self.label = label.to_string();
        } else {
            self.active = false;
            self.expires_at = 0.0;
            self.whitelist.clear();
        }
    }

    /// Elapsed TTL drops back to strict mode and clears the whitelist.
    fn tick(&mut self, now: f64) {
        if self.active && now > self.expires_at {
            debug!("learning mode expired, back to strict scoring");
            self.set_mode(false, 0.0, "none", now);
        }
    }

    fn signatures(locations: &[String]) -> Vec<String> {
        let mut signatures = Vec::new();
        if let Some(last) = locations.last() {
            signatures.push(last.clone());
        }
        if locations.len() >= 2 {
            signatures.push(format!(
                "{}->{}",
                locations[locations.len() - 2],
                locations[locations.len() - 1]
            ));
        }
        signatures
    }

    fn matches(&self, locations: &[String]) -> bool {
        Self::signatures(locations)
            .iter()
            .any(|s| self.whitelist.contains(s))
    }

    fn learn(&mut self, locations: &[String]) {
        for signature in Self::signatures(locations) {
            if !self.whitelist.contains(&signature) {
                self.whitelist.push_back(signature);
                while self.whitelist.len() > self.capacity {
                    self.whitelist.pop_front();
                }
            }
        }
    }
}

#[derive(Debug)]
pub struct SecurityBrain {
    vocab: Vec<String>,
    vocab_index: HashMap<String, usize>,
    scaler: MinMaxScaler,
    max_seq_len: usize,
    threshold: f64,
    autoencoder: Option<FeedForwardNetwork>,
    ready: bool,
    overlay: LearningOverlay,
}

impl SecurityBrain {
    pub fn new(config: &SecurityConfig) -> Self {
        Self {
            vocab: Vec::new(),
            vocab_index: HashMap::new(),
            scaler: MinMaxScaler::default(),
            max_seq_len: 20,
            threshold: config.default_threshold,
            autoencoder: None,
            ready: false,
            overlay: LearningOverlay::new(config.whitelist_capacity),
        }
    }

    pub fn is_ready(&self) -> bool {
        self.ready
    }

    pub fn threshold(&self) -> f64 {
        self.threshold
    }

    pub fn overlay(&self) -> &LearningOverlay {
        &self.overlay
    }

    /// Fit vocabulary, time scaler, autoencoder and the dynamic threshold
    /// from a batch of normal movement sequences.
    pub fn train(&mut self, sequences: &[MovementSequence]) -> CogniResult<TrainingSummary> {
        let usable: Vec<&MovementSequence> =
            sequences.iter().filter(|s| !s.steps.is_empty()).collect();
        if usable.is_empty() {
            return Err(CogniError::InsufficientData {
                reason: "no non-empty sequences in batch".to_string(),
            });
        }

        let mut vocab = Vec::new();
        let mut vocab_index = HashMap::new();
        for sequence in &usable {
            for step in &sequence.steps {
                if !vocab_index.contains_key(&step.loc) {
                    vocab_index.insert(step.loc.clone(), vocab.len());
                    vocab.push(step.loc.clone());
                }
            }
        }

        let longest = usable.iter().map(|s| s.steps.len()).max().unwrap_or(0);
        let max_seq_len = longest.clamp(MIN_SEQ_LEN, MAX_SEQ_LEN);

        let deltas: Vec<f64> = usable
            .iter()
            .flat_map(|s| s.steps.iter().map(|step| step.t_delta))
            .collect();
        let scaler = MinMaxScaler::fit(&deltas)?;

        self.vocab = vocab;
        self.vocab_index = vocab_index;
        self.scaler = scaler;
        self.max_seq_len = max_seq_len;

        let dim = self.encoded_dim();
        let columns: Vec<DVector<f64>> =
            usable.iter().map(|s| self.encode(&s.steps)).collect();
        let inputs = DMatrix::from_columns(&columns);

        let mut autoencoder = FeedForwardNetwork::new(
            &[dim, BOTTLENECK[0], BOTTLENECK[1], BOTTLENECK[2], dim],
            Activation::Tanh,
            Activation::Linear,
        )?;
        let loss = autoencoder.fit(
            &inputs,
            &inputs,
            &TrainOptions {
                learning_rate: 0.01,
                epochs: 200,
                gradient_clip: 5.0,
            },
        )?;

        let errors: Vec<f64> = usable
            .iter()
            .map(|s| {
                let encoded = self.encode(&s.steps);
                reconstruction_mse(&autoencoder, &encoded).unwrap_or(f64::INFINITY)
            })
            .collect();
        let threshold = (mean(&errors) + 3.0 * std_dev(&errors)).max(THRESHOLD_FLOOR);

        self.autoencoder = Some(autoencoder);
        self.threshold = threshold;
        self.ready = true;
        info!(
            "security training: {} sequences, |vocab|={}, threshold {:.4}",
            usable.len(),
            self.vocab.len(),
            threshold
        );

        Ok(TrainingSummary {
            samples: usable.len(),
            threshold,
            loss,
        })
    }

    /// Score one sequence; the learning-mode overlay can veto or absorb an
    /// anomaly verdict.
    pub fn analyze(&mut self, sequence: &MovementSequence, now: f64) -> SecurityVerdict {
        self.overlay.tick(now);

        let Some(autoencoder) = self.autoencoder.as_ref() else {
            return SecurityVerdict::neutral("Model not ready");
        };
        if sequence.steps.is_empty() {
            return SecurityVerdict::neutral("Empty sequence");
        }

        let encoded = self.encode(&sequence.steps);
        let Ok(reconstructed) = autoencoder.forward(&encoded) else {
            return SecurityVerdict::neutral("Reconstruction failed");
        };

        let step_dim = 1 + self.vocab.len();
        let per_step: Vec<f64> = (0..self.max_seq_len)
            .map(|i| {
                let lo = i * step_dim;
                (lo..lo + step_dim)
                    .map(|j| (encoded[j] - reconstructed[j]).powi(2))
                    .sum::<f64>()
                    / step_dim as f64
            })
            .collect();
        let total_mse = mean(&per_step);

        let observed = sequence.steps.len().min(self.max_seq_len);
        let culprit_index = per_step[..observed]
            .iter()
            .enumerate()
            .max_by(|a, b| a.1.partial_cmp(b.1).unwrap_or(std::cmp::Ordering::Equal))
            .map(|(i, _)| i);
        let culprit_loc = culprit_index.map(|i| sequence.steps[i].loc.clone());

        let mut verdict = SecurityVerdict {
            score: total_mse,
            is_anomaly: total_mse > self.threshold,
            explanation: "Normal behavior".to_string(),
            culprit_index,
            culprit_loc: culprit_loc.clone(),
        };
        if verdict.is_anomaly {
            verdict.explanation = match &culprit_loc {
                Some(loc) => format!("High reconstruction error ({total_mse:.4}) at {loc}"),
                None => format!("High reconstruction error ({total_mse:.4})"),
            };
        }

        if verdict.is_anomaly && self.overlay.is_active() {
            let locations = sequence.locations();
            if self.overlay.matches(&locations) {
                verdict.is_anomaly = false;
                verdict.score = self.threshold * 0.9;
                verdict.explanation = format!("whitelisted by {}", self.overlay.label());
            } else {
                self.overlay.learn(&locations);
                verdict.is_anomaly = false;
                verdict.score = 0.0;
                verdict.explanation =
                    format!("learned new pattern ({})", self.overlay.label());
            }
        }

        verdict
    }

    pub fn set_learning_mode(
        &mut self,
        active: bool,
        duration_minutes: f64,
        label: &str,
        now: f64,
    ) {
        self.overlay.set_mode(active, duration_minutes, label, now);
        if active {
            info!("learning mode started: {label} for {duration_minutes} min");
        } else {
            info!("learning mode stopped, whitelist cleared");
        }
    }

    fn encoded_dim(&self) -> usize {
        self.max_seq_len * (1 + self.vocab.len())
    }

    /// `[scaled t_delta] ⊕ one_hot(loc)` per step, zero-padded to the fixed
    /// length. Unknown locations get the zero one-hot row.
    fn encode(&self, steps: &[MovementStep]) -> DVector<f64> {
        let step_dim = 1 + self.vocab.len();
        let mut encoded = DVector::zeros(self.max_seq_len * step_dim);
        for (i, step) in steps.iter().take(self.max_seq_len).enumerate() {
            let base = i * step_dim;
            encoded[base] = self.scaler.transform(step.t_delta);
            if let Some(&idx) = self.vocab_index.get(&step.loc) {
                encoded[base + 1 + idx] = 1.0;
            }
        }
        encoded
    }

    pub fn save(&self, store: &ModelStore) -> CogniResult<()> {
        if let Some(autoencoder) = self.autoencoder.as_ref() {
            store.save_bin(SECURITY_MODEL_FILE, autoencoder)?;
            store.save_bin(SECURITY_SCALER_FILE, &self.scaler)?;
            store.save_bin(SECURITY_VOCAB_FILE, &self.vocab)?;
            store.save_json(
                SECURITY_CONFIG_FILE,
                &PersistedConfig {
                    max_seq_len: self.max_seq_len,
                    threshold: self.threshold,
                },
            )?;
        }
        Ok(())
    }

    pub fn restore(&mut self, store: &ModelStore) -> CogniResult<()> {
        let model = store.load_bin::<FeedForwardNetwork>(SECURITY_MODEL_FILE)?;
        let scaler = store.load_bin::<MinMaxScaler>(SECURITY_SCALER_FILE)?;
        let vocab = store.load_bin::<Vec<String>>(SECURITY_VOCAB_FILE)?;
        let (Some(model), Some(scaler), Some(vocab)) = (model, scaler, vocab) else {
            return Ok(());
        };

        if let Some(persisted) = store.load_json::<PersistedConfig>(SECURITY_CONFIG_FILE)? {
            self.max_seq_len = persisted.max_seq_len;
            self.threshold = persisted.threshold;
        }
        if model.input_dim() != self.max_seq_len * (1 + vocab.len()) {
            debug!("security snapshot dimensions inconsistent, staying not-ready");
            return Ok(());
        }

        self.vocab_index = vocab
            .iter()
            .enumerate()
            .map(|(i, loc)| (loc.clone(), i))
            .collect();
        self.vocab = vocab;
        self.scaler = scaler;
        self.autoencoder = Some(model);
        self.ready = true;
        debug!("security model restored, |vocab|={}", self.vocab.len());
        Ok(())
    }
}

fn reconstruction_mse(network: &FeedForwardNetwork, encoded: &DVector<f64>) -> Option<f64> {
    let output = network.forward(encoded).ok()?;
    let diff = encoded - output;
    Some(diff.norm_squared() / encoded.len() as f64)
}
