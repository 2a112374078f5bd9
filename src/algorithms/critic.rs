use ndarray::{s, Array1, Array2, ArrayView1, ArrayView2, Axis};
use rand::Rng;
use serde::{Deserialize, Serialize};

use crate::activations::Activation;
use crate::error::{FlowQlError, Result};
use crate::layers::{DenseLayer, LayerGradients};
use crate::network::{concat_columns, NeuralNetwork, NetworkGradients};

/// Sharpness of the soft minimum over value heads.
pub const SOFTMIN_TEMPERATURE: f32 = 10.0;

/// Default number of value heads.
pub const DEFAULT_NUM_CRITICS: usize = 3;

/// Soft minimum across the columns of `q_values` (one row per sample).
///
/// Returns the aggregate and the softmax weights `softmax(-temperature * q)`.
/// The aggregate is a convex combination of the row, skewed to its smallest
/// entries.
pub fn softmin_aggregate(q_values: ArrayView2<f32>, temperature: f32) -> (Array1<f32>, Array2<f32>) {
    let mut weights = q_values.mapv(|q| -temperature * q);
    for mut row in weights.rows_mut() {
        let max = row.fold(f32::NEG_INFINITY, |acc, &v| acc.max(v));
        row.mapv_inplace(|v| (v - max).exp());
        let total = row.sum();
        row.mapv_inplace(|v| v / total);
    }
    let aggregate = (&weights * &q_values).sum_axis(Axis(1));
    (aggregate, weights)
}

#[derive(Clone, Debug)]
struct SoftminCache {
    q_values: Array2<f32>,
    weights: Array2<f32>,
    aggregate: Array1<f32>,
}

/// Gradients of one backward pass through the critic.
#[derive(Clone, Debug)]
pub struct CriticGradients {
    pub heads: Vec<NetworkGradients>,
    pub states: Array2<f32>,
    pub actions: Array2<f32>,
}

impl CriticGradients {
    /// Parameter gradients of every head, flattened in `Critic::layers_mut` order.
    pub fn layer_gradients(&self) -> impl Iterator<Item = &LayerGradients> {
        self.heads.iter().flat_map(|head| head.layers.iter())
    }
}

/// Grouped Q-value estimator.
///
/// Each head is an independent MLP over `[state, action]` with a single
/// linear output. The heads are combined with `softmin_aggregate` to curb
/// overestimation of action values.
#[derive(Serialize, Deserialize, Clone, Debug)]
pub struct Critic {
    pub heads: Vec<NeuralNetwork>,
    pub state_dim: usize,
    pub action_dim: usize,
    pub softmin_temperature: f32,
    #[serde(skip)]
    cache: Option<SoftminCache>,
}

impl Critic {
    pub fn new<R: Rng + ?Sized>(
        state_dim: usize,
        action_dim: usize,
        hidden_dim: usize,
        depth: usize,
        num_heads: usize,
        hidden_activation: Activation,
        rng: &mut R,
    ) -> Result<Self> {
        if num_heads == 0 {
            return Err(FlowQlError::invalid_parameter("num_critics", "must be at least 1"));
        }
        let heads = (0..num_heads)
            .map(|_| {
                NeuralNetwork::mlp(
                    state_dim + action_dim,
                    hidden_dim,
                    depth,
                    1,
                    hidden_activation,
                    Activation::Linear,
                    rng,
                )
            })
            .collect::<Result<Vec<_>>>()?;

        Ok(Critic {
            heads,
            state_dim,
            action_dim,
            softmin_temperature: SOFTMIN_TEMPERATURE,
            cache: None,
        })
    }

    pub fn num_heads(&self) -> usize {
        self.heads.len()
    }

    fn state_actions(&self, states: ArrayView2<f32>, actions: ArrayView2<f32>) -> Result<Array2<f32>> {
        if states.ncols() != self.state_dim || actions.ncols() != self.action_dim {
            return Err(FlowQlError::dimension_mismatch(
                format!("{} state and {} action columns", self.state_dim, self.action_dim),
                format!("{} and {}", states.ncols(), actions.ncols()),
            ));
        }
        concat_columns(&[states.view(), actions.view()])
    }

    fn stack_heads(outputs: Vec<Array2<f32>>, batch: usize) -> Array2<f32> {
        let mut q_values = Array2::zeros((batch, outputs.len()));
        for (g, output) in outputs.iter().enumerate() {
            q_values.column_mut(g).assign(&output.column(0));
        }
        q_values
    }

    /// Per-head estimates, one column per head.
    pub fn head_values(&self, states: ArrayView2<f32>, actions: ArrayView2<f32>) -> Result<Array2<f32>> {
        let inputs = self.state_actions(states, actions)?;
        let outputs = self
            .heads
            .iter()
            .map(|head| head.predict_batch(inputs.view()))
            .collect::<Result<Vec<_>>>()?;
        Ok(Self::stack_heads(outputs, inputs.nrows()))
    }

    /// Aggregated Q-values without gradient tracking.
    pub fn predict(&self, states: ArrayView2<f32>, actions: ArrayView2<f32>) -> Result<Array1<f32>> {
        let q_values = self.head_values(states, actions)?;
        Ok(softmin_aggregate(q_values.view(), self.softmin_temperature).0)
    }

    /// Aggregated Q-values, caching everything `backward` needs.
    pub fn forward(&mut self, states: ArrayView2<f32>, actions: ArrayView2<f32>) -> Result<Array1<f32>> {
        let inputs = self.state_actions(states, actions)?;
        let outputs = self
            .heads
            .iter_mut()
            .map(|head| head.forward_batch(inputs.view()))
            .collect::<Result<Vec<_>>>()?;
        let q_values = Self::stack_heads(outputs, inputs.nrows());
        let (aggregate, weights) = softmin_aggregate(q_values.view(), self.softmin_temperature);

        self.cache = Some(SoftminCache {
            q_values,
            weights,
            aggregate: aggregate.clone(),
        });
        Ok(aggregate)
    }

    /// Backpropagate `dL/dq` for the last `forward` call.
    ///
    /// Through the soft minimum, `dq/dq_g = w_g (1 - temperature (q_g - q))`.
    pub fn backward(&self, output_errors: ArrayView1<f32>) -> Result<CriticGradients> {
        let cache = self.cache.as_ref().ok_or_else(|| {
            FlowQlError::TrainingError("critic backward called before forward".to_string())
        })?;
        if output_errors.len() != cache.aggregate.len() {
            return Err(FlowQlError::dimension_mismatch(
                format!("{} output errors", cache.aggregate.len()),
                format!("{}", output_errors.len()),
            ));
        }

        let spread = &cache.q_values - &cache.aggregate.view().insert_axis(Axis(1));
        let local = &cache.weights * &spread.mapv(|d| 1.0 - self.softmin_temperature * d);
        let head_errors = &local * &output_errors.insert_axis(Axis(1));

        let batch = output_errors.len();
        let mut input_errors = Array2::<f32>::zeros((batch, self.state_dim + self.action_dim));
        let mut heads = Vec::with_capacity(self.heads.len());
        for (g, head) in self.heads.iter().enumerate() {
            let errors = head_errors.slice(s![.., g..g + 1]);
            let gradients = head.backward_batch(errors)?;
            input_errors += &gradients.inputs;
            heads.push(gradients);
        }

        Ok(CriticGradients {
            heads,
            states: input_errors.slice(s![.., ..self.state_dim]).to_owned(),
            actions: input_errors.slice(s![.., self.state_dim..]).to_owned(),
        })
    }

    /// Every head's layers, in head order.
    pub fn layers(&self) -> impl Iterator<Item = &DenseLayer> {
        self.heads.iter().flat_map(|head| head.layers.iter())
    }

    pub fn layers_mut(&mut self) -> impl Iterator<Item = &mut DenseLayer> {
        self.heads.iter_mut().flat_map(|head| head.layers.iter_mut())
    }

    pub fn num_parameters(&self) -> usize {
        self.heads.iter().map(NeuralNetwork::num_parameters).sum()
    }
}
