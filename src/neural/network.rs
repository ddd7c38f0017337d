//! Dense feed-forward network core.
//!
//! Backs both learned regressors in the daemon: the thermal-rate PINN and
//! the security sequence autoencoder. Weights live in nalgebra matrices,
//! training is full-batch backpropagation with an Adam optimiser and a
//! global gradient-norm clip.

use crate::utils::error::{CogniError, CogniResult};
use nalgebra::{DMatrix, DVector};
use rand::Rng;
use serde::{Deserialize, Serialize};
use std::ops::AddAssign;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Activation {
    Tanh,
    Sigmoid,
    Linear,
}

impl Activation {
    fn apply_matrix(self, m: &mut DMatrix<f64>) {
        match self {
            Activation::Tanh => m.apply(|x| *x = x.tanh()),
            Activation::Sigmoid => m.apply(|x| *x = 1.0 / (1.0 + (-*x).exp())),
            Activation::Linear => {}
        }
    }

    fn apply_vector(self, v: &mut DVector<f64>) {
        match self {
            Activation::Tanh => v.apply(|x| *x = x.tanh()),
            Activation::Sigmoid => v.apply(|x| *x = 1.0 / (1.0 + (-*x).exp())),
            Activation::Linear => {}
        }
    }

    /// Derivative expressed through the activated output.
    fn derivative(self, activated: &DMatrix<f64>) -> DMatrix<f64> {
        match self {
            Activation::Tanh => activated.map(|a| 1.0 - a * a),
            Activation::Sigmoid => activated.map(|a| a * (1.0 - a)),
            Activation::Linear => DMatrix::from_element(activated.nrows(), activated.ncols(), 1.0),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrainOptions {
    pub learning_rate: f64,
    pub epochs: usize,
    /// Global gradient-norm clip; 0 disables clipping.
    pub gradient_clip: f64,
}

impl Default for TrainOptions {
    fn default() -> Self {
        Self {
            learning_rate: 0.005,
            epochs: 200,
            gradient_clip: 1.0,
        }
    }
}

/// Adam moment buffers; rebuilt from scratch for every `fit` call and not
/// persisted with the weights.
#[derive(Debug, Clone)]
struct AdamState {
    m_w: Vec<DMatrix<f64>>,
    v_w: Vec<DMatrix<f64>>,
    m_b: Vec<DVector<f64>>,
    v_b: Vec<DVector<f64>>,
    step: u64,
}

const ADAM_BETA1: f64 = 0.9;
const ADAM_BETA2: f64 = 0.999;
const ADAM_EPS: f64 = 1e-8;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FeedForwardNetwork {
    layers: Vec<usize>,
    weights: Vec<DMatrix<f64>>,
    biases: Vec<DVector<f64>>,
    activations: Vec<Activation>,
}

impl FeedForwardNetwork {
    /// Xavier-initialised network; `hidden` activates every hidden layer,
    /// `output` the last one.
    pub fn new(layers: &[usize], hidden: Activation, output: Activation) -> CogniResult<Self> {
        if layers.len() < 2 {
            return Err(CogniError::invalid(
                "layers",
                "network needs at least input and output layers",
            ));
        }
        if layers.iter().any(|&l| l == 0) {
            return Err(CogniError::invalid("layers", "zero-width layer"));
        }

        let mut rng = rand::thread_rng();
        let mut weights = Vec::with_capacity(layers.len() - 1);
        let mut biases = Vec::with_capacity(layers.len() - 1);
        let mut activations = Vec::with_capacity(layers.len() - 1);

        for i in 0..layers.len() - 1 {
            let (fan_in, fan_out) = (layers[i], layers[i + 1]);
            let scale = (2.0 / (fan_in + fan_out) as f64).sqrt();
            weights.push(DMatrix::from_fn(fan_out, fan_in, |_, _| {
                rng.gen_range(-scale..scale)
            }));
            biases.push(DVector::zeros(fan_out));
            activations.push(if i == layers.len() - 2 { output } else { hidden });
        }

        Ok(Self {
            layers: layers.to_vec(),
            weights,
            biases,
            activations,
        })
    }

    /// Rebuild a network from explicit parameters (snapshot restore).
    pub fn from_parts(
        weights: Vec<DMatrix<f64>>,
        biases: Vec<DVector<f64>>,
        activations: Vec<Activation>,
    ) -> CogniResult<Self> {
        if weights.is_empty() || weights.len() != biases.len() || weights.len() != activations.len()
        {
            return Err(CogniError::invalid("weights", "layer count mismatch"));
        }
        let mut layers = vec![weights[0].ncols()];
        for (w, b) in weights.iter().zip(biases.iter()) {
            if w.nrows() != b.len() {
                return Err(CogniError::invalid("biases", "bias/weight shape mismatch"));
            }
            if w.ncols() != *layers.last().unwrap_or(&0) {
                return Err(CogniError::invalid("weights", "chained shape mismatch"));
            }
            layers.push(w.nrows());
        }
        Ok(Self {
            layers,
            weights,
            biases,
            activations,
        })
    }

    pub fn input_dim(&self) -> usize {
        self.layers[0]
    }

    pub fn output_dim(&self) -> usize {
        *self.layers.last().unwrap_or(&0)
    }

    pub fn parameter_count(&self) -> usize {
        self.weights.iter().map(|w| w.nrows() * w.ncols()).sum::<usize>()
            + self.biases.iter().map(|b| b.len()).sum::<usize>()
    }

    /// Single-sample forward pass.
    pub fn forward(&self, input: &DVector<f64>) -> CogniResult<DVector<f64>> {
        if input.len() != self.input_dim() {
            return Err(CogniError::invalid(
                "input",
                format!("expected {} features, got {}", self.input_dim(), input.len()),
            ));
        }
        let mut current = input.clone();
        for (i, weight) in self.weights.iter().enumerate() {
            let mut z = weight * &current + &self.biases[i];
            self.activations[i].apply_vector(&mut z);
            current = z;
        }
        Ok(current)
    }

    /// Batch forward pass; samples are columns.
    pub fn forward_batch(&self, inputs: &DMatrix<f64>) -> CogniResult<DMatrix<f64>> {
        Ok(self.forward_cached(inputs)?.pop().unwrap_or_else(|| inputs.clone()))
    }

    /// Full-batch training with Adam; returns the final mean squared error.
    pub fn fit(
        &mut self,
        inputs: &DMatrix<f64>,
        targets: &DMatrix<f64>,
        options: &TrainOptions,
    ) -> CogniResult<f64> {
        let n = inputs.ncols();
        if n == 0 {
            return Err(CogniError::InsufficientData {
                reason: "empty training batch".to_string(),
            });
        }
        if inputs.nrows() != self.input_dim() || targets.nrows() != self.output_dim() {
            return Err(CogniError::invalid("batch", "feature dimension mismatch"));
        }
        if targets.ncols() != n {
            return Err(CogniError::invalid("batch", "input/target sample count mismatch"));
        }

        let mut adam = AdamState::zeros_like(&self.weights, &self.biases);
        let mut loss = f64::INFINITY;

        for _ in 0..options.epochs {
            let acts = self.forward_cached(inputs)?;
            let prediction = &acts[acts.len() - 1];
            let error = prediction - targets;
            loss = error.norm_squared() / (error.nrows() * error.ncols()) as f64;
            if !loss.is_finite() {
                return Err(CogniError::numeric("network training", "loss diverged"));
            }

            let (grad_w, grad_b) = self.backward(&acts, &error);
            let (grad_w, grad_b) = clip_gradients(grad_w, grad_b, options.gradient_clip);
            adam.update(
                &mut self.weights,
                &mut self.biases,
                &grad_w,
                &grad_b,
                options.learning_rate,
            );
        }

        Ok(loss)
    }

    /// Forward pass keeping every layer's activation (index 0 is the input).
    fn forward_cached(&self, inputs: &DMatrix<f64>) -> CogniResult<Vec<DMatrix<f64>>> {
        if inputs.nrows() != self.input_dim() {
            return Err(CogniError::invalid(
                "inputs",
                format!("expected {} features, got {}", self.input_dim(), inputs.nrows()),
            ));
        }
        let mut acts = Vec::with_capacity(self.weights.len() + 1);
        acts.push(inputs.clone());
        for (i, weight) in self.weights.iter().enumerate() {
            let mut z = weight * &acts[i];
            for mut col in z.column_iter_mut() {
                col.add_assign(&self.biases[i]);
            }
            self.activations[i].apply_matrix(&mut z);
            acts.push(z);
        }
        Ok(acts)
    }

    /// Backpropagate the output error through every layer.
    fn backward(
        &self,
        acts: &[DMatrix<f64>],
        error: &DMatrix<f64>,
    ) -> (Vec<DMatrix<f64>>, Vec<DVector<f64>>) {
        let depth = self.weights.len();
        let n = error.ncols() as f64;
        let scale = 2.0 / (n * error.nrows() as f64);

        let mut grad_w = vec![DMatrix::zeros(0, 0); depth];
        let mut grad_b = vec![DVector::zeros(0); depth];

        let mut delta = error
            .component_mul(&self.activations[depth - 1].derivative(&acts[depth]))
            * scale;

        for i in (0..depth).rev() {
            grad_w[i] = &delta * acts[i].transpose();
            grad_b[i] = delta.column_sum();
            if i > 0 {
                delta = (self.weights[i].transpose() * &delta)
                    .component_mul(&self.activations[i - 1].derivative(&acts[i]));
            }
        }

        (grad_w, grad_b)
    }
}

fn clip_gradients(
    mut grad_w: Vec<DMatrix<f64>>,
    mut grad_b: Vec<DVector<f64>>,
    clip: f64,
) -> (Vec<DMatrix<f64>>, Vec<DVector<f64>>) {
    if clip <= 0.0 {
        return (grad_w, grad_b);
    }
    let total: f64 = grad_w.iter().map(|g| g.norm_squared()).sum::<f64>()
        + grad_b.iter().map(|g| g.norm_squared()).sum::<f64>();
    let norm = total.sqrt();
    if norm > clip {
        let scale = clip / norm;
        for g in &mut grad_w {
            *g *= scale;
        }
        for g in &mut grad_b {
            *g *= scale;
        }
    }
    (grad_w, grad_b)
}

impl AdamState {
    fn zeros_like(weights: &[DMatrix<f64>], biases: &[DVector<f64>]) -> Self {
        Self {
            m_w: weights.iter().map(|w| DMatrix::zeros(w.nrows(), w.ncols())).collect(),
            v_w: weights.iter().map(|w| DMatrix::zeros(w.nrows(), w.ncols())).collect(),
            m_b: biases.iter().map(|b| DVector::zeros(b.len())).collect(),
            v_b: biases.iter().map(|b| DVector::zeros(b.len())).collect(),
            step: 0,
        }
    }

    fn update(
        &mut self,
        weights: &mut [DMatrix<f64>],
        biases: &mut [DVector<f64>],
        grad_w: &[DMatrix<f64>],
        grad_b: &[DVector<f64>],
        learning_rate: f64,
    ) {
        self.step += 1;
        let t = self.step as i32;
        let bias1 = 1.0 - ADAM_BETA1.powi(t);
        let bias2 = 1.0 - ADAM_BETA2.powi(t);

        for i in 0..weights.len() {
            let m_w = &self.m_w[i] * ADAM_BETA1 + &grad_w[i] * (1.0 - ADAM_BETA1);
            let v_w = &self.v_w[i] * ADAM_BETA2
                + grad_w[i].component_mul(&grad_w[i]) * (1.0 - ADAM_BETA2);
            let m_hat = &m_w / bias1;
            let v_hat = &v_w / bias2;
            weights[i] -= m_hat.component_div(&v_hat.map(|v| v.sqrt() + ADAM_EPS)) * learning_rate;
            self.m_w[i] = m_w;
            self.v_w[i] = v_w;

            let m_b = &self.m_b[i] * ADAM_BETA1 + &grad_b[i] * (1.0 - ADAM_BETA1);
            let v_b = &self.v_b[i] * ADAM_BETA2
                + grad_b[i].component_mul(&grad_b[i]) * (1.0 - ADAM_BETA2);
            let m_hat = &m_b / bias1;
            let v_hat = &v_b / bias2;
            biases[i] -= m_hat.component_div(&v_hat.map(|v| v.sqrt() + ADAM_EPS)) * learning_rate;
            self.m_b[i] = m_b;
            self.v_b[i] = v_b;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_degenerate_layouts() {
        assert!(FeedForwardNetwork::new(&[4], Activation::Tanh, Activation::Linear).is_err());
        assert!(FeedForwardNetwork::new(&[4, 0, 1], Activation::Tanh, Activation::Linear).is_err());
    }

    #[test]
    fn forward_checks_input_width() {
        let net = FeedForwardNetwork::new(&[3, 2, 1], Activation::Tanh, Activation::Linear)
            .unwrap();
        assert!(net.forward(&DVector::from_vec(vec![1.0, 2.0])).is_err());
        let out = net.forward(&DVector::from_vec(vec![1.0, 0.5, -0.5])).unwrap();
        assert_eq!(out.len(), 1);
        assert!(out[0].is_finite());
    }

    #[test]
    fn fit_reduces_loss_on_linear_target() {
        // y = x0 + x1, easily representable.
        let inputs = DMatrix::from_columns(&[
            DVector::from_vec(vec![0.0, 0.0]),
            DVector::from_vec(vec![0.5, 0.0]),
            DVector::from_vec(vec![0.0, 0.5]),
            DVector::from_vec(vec![0.5, 0.5]),
            DVector::from_vec(vec![0.25, 0.25]),
        ]);
        let targets = DMatrix::from_row_slice(1, 5, &[0.0, 0.5, 0.5, 1.0, 0.5]);

        let mut net =
            FeedForwardNetwork::new(&[2, 8, 1], Activation::Tanh, Activation::Linear).unwrap();
        let initial = {
            let pred = net.forward_batch(&inputs).unwrap();
            (&pred - &targets).norm_squared() / 5.0
        };
        let final_loss = net
            .fit(
                &inputs,
                &targets,
                &TrainOptions {
                    learning_rate: 0.02,
                    epochs: 400,
                    gradient_clip: 1.0,
                },
            )
            .unwrap();
        assert!(final_loss < initial || final_loss < 0.01);
        assert!(final_loss.is_finite());
    }

    #[test]
    fn from_parts_with_zero_weights_outputs_bias() {
        let weights = vec![
            DMatrix::zeros(2, 4),
            DMatrix::zeros(1, 2),
        ];
        let biases = vec![DVector::zeros(2), DVector::from_vec(vec![4.0])];
        let net = FeedForwardNetwork::from_parts(
            weights,
            biases,
            vec![Activation::Tanh, Activation::Linear],
        )
        .unwrap();
        let out = net
            .forward(&DVector::from_vec(vec![19.0, 10.0, 100.0, 0.0]))
            .unwrap();
        assert!((out[0] - 4.0).abs() < 1e-12);
    }

    #[test]
    fn snapshot_round_trip_preserves_outputs() {
        let net = FeedForwardNetwork::new(&[4, 16, 16, 1], Activation::Tanh, Activation::Linear)
            .unwrap();
        let bytes = bincode::serialize(&net).unwrap();
        let restored: FeedForwardNetwork = bincode::deserialize(&bytes).unwrap();
        let x = DVector::from_vec(vec![0.1, -0.2, 0.3, 0.0]);
        assert_eq!(net.forward(&x).unwrap(), restored.forward(&x).unwrap());
    }
}
