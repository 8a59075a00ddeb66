//! Single-hidden-layer feed-forward network for the binary outcome.
//!
//! The network is `sigmoid(act(X W1 + b1) · w2 + b2)`, trained with mini-batch
//! Adam on binary cross-entropy. Dropout is applied to the hidden activations
//! during training only (inverted dropout, so inference needs no rescaling).

use crate::glm::inverse_logit;
use crate::types::DesignMatrix;
use ndarray::{Array, Array1, Array2, ArrayView2, Axis, Dimension, Zip};
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Hidden-layer activation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Activation {
    Relu,
    Tanh,
    Linear,
}

impl Activation {
    fn apply(self, v: f64) -> f64 {
        match self {
            Activation::Relu => v.max(0.0),
            Activation::Tanh => v.tanh(),
            Activation::Linear => v,
        }
    }

    /// Derivative with respect to the pre-activation value.
    fn derivative(self, pre: f64) -> f64 {
        match self {
            Activation::Relu => {
                if pre > 0.0 {
                    1.0
                } else {
                    0.0
                }
            }
            Activation::Tanh => 1.0 - pre.tanh().powi(2),
            Activation::Linear => 1.0,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MlpParams {
    pub hidden_units: usize,
    pub epochs: usize,
    /// Probability of zeroing a hidden unit during training.
    pub dropout: f64,
    /// L2 penalty on the weights (not the biases).
    pub penalty: f64,
    pub learn_rate: f64,
    pub batch_size: usize,
    pub activation: Activation,
}

impl Default for MlpParams {
    fn default() -> Self {
        MlpParams {
            hidden_units: 5,
            epochs: 100,
            dropout: 0.1,
            penalty: 0.0,
            learn_rate: 0.001,
            batch_size: 32,
            activation: Activation::Relu,
        }
    }
}

impl MlpParams {
    fn validate(&self) -> Result<(), MlpError> {
        if self.hidden_units == 0 {
            return Err(MlpError::InvalidParameter("hidden_units must be at least 1".into()));
        }
        if self.epochs == 0 {
            return Err(MlpError::InvalidParameter("epochs must be at least 1".into()));
        }
        if !(0.0..1.0).contains(&self.dropout) {
            return Err(MlpError::InvalidParameter(format!(
                "dropout must lie in [0, 1), got {}",
                self.dropout
            )));
        }
        if self.batch_size == 0 {
            return Err(MlpError::InvalidParameter("batch_size must be at least 1".into()));
        }
        if !(self.learn_rate > 0.0) || !(self.penalty >= 0.0) {
            return Err(MlpError::InvalidParameter(format!(
                "learn_rate must be positive and penalty non-negative, got {} and {}",
                self.learn_rate, self.penalty
            )));
        }
        Ok(())
    }
}

#[derive(Error, Debug, PartialEq)]
pub enum MlpError {
    #[error("Invalid network parameter: {0}")]
    InvalidParameter(String),
    #[error("Cannot train a network on an empty design matrix.")]
    EmptyDesign,
    #[error("Training diverged at epoch {0}: the loss is no longer finite.")]
    Diverged(usize),
}

/// Trained network weights.
#[derive(Debug, Clone)]
pub struct MlpFit {
    pub feature_names: Vec<String>,
    w1: Array2<f64>,
    b1: Array1<f64>,
    w2: Array1<f64>,
    b2: Array1<f64>,
    activation: Activation,
    /// Mean training loss per epoch.
    pub loss_history: Vec<f64>,
}

impl MlpFit {
    pub fn predict_proba(&self, x: ArrayView2<f64>) -> Array1<f64> {
        let hidden = (x.dot(&self.w1) + &self.b1).mapv(|v| self.activation.apply(v));
        let logits = hidden.dot(&self.w2) + self.b2[0];
        inverse_logit(&logits)
    }
}

/// Per-parameter Adam moments.
struct AdamState<D: Dimension> {
    m: Array<f64, D>,
    v: Array<f64, D>,
}

impl<D: Dimension> AdamState<D> {
    fn like(param: &Array<f64, D>) -> Self {
        AdamState {
            m: Array::zeros(param.raw_dim()),
            v: Array::zeros(param.raw_dim()),
        }
    }

    fn step(&mut self, param: &mut Array<f64, D>, grad: &Array<f64, D>, learn_rate: f64, t: i32) {
        const BETA1: f64 = 0.9;
        const BETA2: f64 = 0.999;
        const EPSILON: f64 = 1e-7;
        let lr_t = learn_rate * (1.0 - BETA2.powi(t)).sqrt() / (1.0 - BETA1.powi(t));
        Zip::from(param)
            .and(grad)
            .and(&mut self.m)
            .and(&mut self.v)
            .for_each(|p, &g, m, v| {
                *m = BETA1 * *m + (1.0 - BETA1) * g;
                *v = BETA2 * *v + (1.0 - BETA2) * g * g;
                *p -= lr_t * *m / (v.sqrt() + EPSILON);
            });
    }
}

fn glorot_uniform(rng: &mut StdRng, fan_in: usize, fan_out: usize) -> Array2<f64> {
    let limit = (6.0 / (fan_in + fan_out) as f64).sqrt();
    Array2::from_shape_simple_fn((fan_in, fan_out), || rng.gen_range(-limit..limit))
}

/// Trains the network on `design` with a seeded initialization, shuffling and
/// dropout draw.
pub fn fit_mlp(design: &DesignMatrix, params: &MlpParams, seed: u64) -> Result<MlpFit, MlpError> {
    params.validate()?;
    let n = design.n_rows();
    let d = design.n_features();
    if n == 0 || d == 0 {
        return Err(MlpError::EmptyDesign);
    }

    let h = params.hidden_units;
    let keep = 1.0 - params.dropout;
    let mut rng = StdRng::seed_from_u64(seed);

    let mut w1 = glorot_uniform(&mut rng, d, h);
    let mut b1 = Array1::<f64>::zeros(h);
    let mut w2 = glorot_uniform(&mut rng, h, 1).index_axis_move(Axis(1), 0);
    let mut b2 = Array1::<f64>::zeros(1);

    let mut adam_w1 = AdamState::like(&w1);
    let mut adam_b1 = AdamState::like(&b1);
    let mut adam_w2 = AdamState::like(&w2);
    let mut adam_b2 = AdamState::like(&b2);

    let mut order: Vec<usize> = (0..n).collect();
    let mut loss_history = Vec::with_capacity(params.epochs);
    let mut t = 0i32;

    for epoch in 1..=params.epochs {
        order.shuffle(&mut rng);
        let mut epoch_loss = 0.0;

        for batch in order.chunks(params.batch_size) {
            t += 1;
            let xb = design.x.select(Axis(0), batch);
            let yb = design.y.select(Axis(0), batch);
            let bsz = batch.len() as f64;

            let pre = xb.dot(&w1) + &b1;
            let act = pre.mapv(|v| params.activation.apply(v));
            let mask = if params.dropout > 0.0 {
                Array2::from_shape_simple_fn(act.raw_dim(), || {
                    if rng.gen_bool(keep) { 1.0 / keep } else { 0.0 }
                })
            } else {
                Array2::ones(act.raw_dim())
            };
            let dropped = &act * &mask;
            let logits = dropped.dot(&w2) + b2[0];
            let probs = inverse_logit(&logits);

            const EPS: f64 = 1e-7;
            let batch_loss = Zip::from(&probs).and(&yb).fold(0.0, |acc, &p, &y| {
                let p = p.clamp(EPS, 1.0 - EPS);
                acc - (y * p.ln() + (1.0 - y) * (1.0 - p).ln())
            });
            epoch_loss += batch_loss;

            // Gradients of the mean batch loss.
            let dlogits = (&probs - &yb) / bsz;
            let mut grad_w2 = dropped.t().dot(&dlogits);
            let grad_b2 = Array1::from_elem(1, dlogits.sum());
            let dhidden = dlogits
                .view()
                .insert_axis(Axis(1))
                .dot(&w2.view().insert_axis(Axis(0)));
            let dpre = Zip::from(&dhidden)
                .and(&mask)
                .and(&pre)
                .map_collect(|&g, &m, &z| g * m * params.activation.derivative(z));
            let mut grad_w1 = xb.t().dot(&dpre);
            let grad_b1 = dpre.sum_axis(Axis(0));

            if params.penalty > 0.0 {
                grad_w1.scaled_add(2.0 * params.penalty, &w1);
                grad_w2.scaled_add(2.0 * params.penalty, &w2);
            }

            adam_w1.step(&mut w1, &grad_w1, params.learn_rate, t);
            adam_b1.step(&mut b1, &grad_b1, params.learn_rate, t);
            adam_w2.step(&mut w2, &grad_w2, params.learn_rate, t);
            adam_b2.step(&mut b2, &grad_b2, params.learn_rate, t);
        }

        let mean_loss = epoch_loss / n as f64;
        if !mean_loss.is_finite() {
            log::warn!("MLP training diverged at epoch {epoch}");
            return Err(MlpError::Diverged(epoch));
        }
        if epoch == 1 || epoch % 10 == 0 || epoch == params.epochs {
            log::debug!("[MLP Epoch #{epoch}] mean training loss {mean_loss:.6}");
        }
        loss_history.push(mean_loss);
    }

    Ok(MlpFit {
        feature_names: design.names.clone(),
        w1,
        b1,
        w2,
        b2,
        activation: params.activation,
        loss_history,
    })
}
