use ndarray::{Array1, Array2, Dimension, Zip};
use serde::{Serialize, Deserialize};

use crate::error::{FlowQlError, Result};
use crate::layers::{DenseLayer, LayerGradients};

/// Parameter update rule applied to a set of layers and their gradients.
///
/// Layers and gradients are paired by position. Optimizers with per-layer
/// state (Adam) rely on every call listing the same layers in the same order.
pub trait Optimizer {
    fn step<'a, 'b, I>(&mut self, params: I) -> Result<()>
    where
        I: IntoIterator<Item = (&'a mut DenseLayer, &'b LayerGradients)>;

    fn learning_rate(&self) -> f32;
}

#[derive(Serialize, Deserialize, Clone, Debug)]
pub enum OptimizerWrapper {
    SGD(SGD),
    Adam(Adam),
}

impl Optimizer for OptimizerWrapper {
    fn step<'a, 'b, I>(&mut self, params: I) -> Result<()>
    where
        I: IntoIterator<Item = (&'a mut DenseLayer, &'b LayerGradients)>,
    {
        match self {
            OptimizerWrapper::SGD(optimizer) => optimizer.step(params),
            OptimizerWrapper::Adam(optimizer) => optimizer.step(params),
        }
    }

    fn learning_rate(&self) -> f32 {
        match self {
            OptimizerWrapper::SGD(optimizer) => optimizer.learning_rate(),
            OptimizerWrapper::Adam(optimizer) => optimizer.learning_rate(),
        }
    }
}

fn check_shapes<D: Dimension>(what: &str, expected: D, actual: D) -> Result<()> {
    if expected != actual {
        return Err(FlowQlError::dimension_mismatch(
            format!("{} gradient of shape {:?}", what, expected.slice()),
            format!("{:?}", actual.slice()),
        ));
    }
    Ok(())
}

/// Plain gradient descent with optional L2 weight decay.
#[derive(Serialize, Deserialize, Clone, Debug)]
pub struct SGD {
    pub learning_rate: f32,
    pub weight_decay: f32,
}

impl SGD {
    pub fn new(learning_rate: f32) -> SGD {
        SGD {
            learning_rate,
            weight_decay: 0.0,
        }
    }

    pub fn with_weight_decay(mut self, weight_decay: f32) -> Self {
        self.weight_decay = weight_decay;
        self
    }
}

impl Default for SGD {
    fn default() -> Self {
        Self::new(0.01)
    }
}

impl Optimizer for SGD {
    fn step<'a, 'b, I>(&mut self, params: I) -> Result<()>
    where
        I: IntoIterator<Item = (&'a mut DenseLayer, &'b LayerGradients)>,
    {
        let (lr, wd) = (self.learning_rate, self.weight_decay);
        for (layer, gradients) in params {
            check_shapes("weight", layer.weights.raw_dim(), gradients.weights.raw_dim())?;
            check_shapes("bias", layer.biases.raw_dim(), gradients.biases.raw_dim())?;
            layer.weights.zip_mut_with(&gradients.weights, |w, &g| *w -= lr * (g + wd * *w));
            layer.biases.zip_mut_with(&gradients.biases, |b, &g| *b -= lr * (g + wd * *b));
        }
        Ok(())
    }

    fn learning_rate(&self) -> f32 {
        self.learning_rate
    }
}

#[derive(Serialize, Deserialize, Clone, Debug)]
struct AdamState {
    m_weights: Array2<f32>,
    v_weights: Array2<f32>,
    m_biases: Array1<f32>,
    v_biases: Array1<f32>,
}

impl AdamState {
    fn zeros_like(layer: &DenseLayer) -> Self {
        AdamState {
            m_weights: Array2::zeros(layer.weights.dim()),
            v_weights: Array2::zeros(layer.weights.dim()),
            m_biases: Array1::zeros(layer.biases.dim()),
            v_biases: Array1::zeros(layer.biases.dim()),
        }
    }
}

/// Adam with L2 weight decay folded into the gradient.
///
/// Moment estimates are created lazily on the first step, one set per layer
/// position. `t` counts completed steps and drives bias correction.
#[derive(Serialize, Deserialize, Clone, Debug)]
pub struct Adam {
    pub learning_rate: f32,
    pub beta1: f32,
    pub beta2: f32,
    pub epsilon: f32,
    pub weight_decay: f32,
    states: Vec<AdamState>,
    pub t: usize,
}

impl Adam {
    pub fn new(learning_rate: f32, beta1: f32, beta2: f32, epsilon: f32) -> Self {
        Adam {
            learning_rate,
            beta1,
            beta2,
            epsilon,
            weight_decay: 0.0,
            states: Vec::new(),
            t: 0,
        }
    }

    pub fn with_weight_decay(mut self, weight_decay: f32) -> Self {
        self.weight_decay = weight_decay;
        self
    }

    /// Number of layers with allocated moment estimates.
    pub fn tracked_layers(&self) -> usize {
        self.states.len()
    }
}

impl Default for Adam {
    fn default() -> Self {
        Self::new(1e-3, 0.9, 0.999, 1e-8)
    }
}

impl Optimizer for Adam {
    fn step<'a, 'b, I>(&mut self, params: I) -> Result<()>
    where
        I: IntoIterator<Item = (&'a mut DenseLayer, &'b LayerGradients)>,
    {
        self.t += 1;
        let (beta1, beta2, eps, wd) = (self.beta1, self.beta2, self.epsilon, self.weight_decay);
        let bias_correction1 = 1.0 - beta1.powi(self.t as i32);
        let bias_correction2 = 1.0 - beta2.powi(self.t as i32);
        let step_size = self.learning_rate / bias_correction1;

        let update = |p: &mut f32, m: &mut f32, v: &mut f32, g: f32| {
            let g = g + wd * *p;
            *m = beta1 * *m + (1.0 - beta1) * g;
            *v = beta2 * *v + (1.0 - beta2) * g * g;
            *p -= step_size * *m / ((*v / bias_correction2).sqrt() + eps);
        };

        for (index, (layer, gradients)) in params.into_iter().enumerate() {
            check_shapes("weight", layer.weights.raw_dim(), gradients.weights.raw_dim())?;
            check_shapes("bias", layer.biases.raw_dim(), gradients.biases.raw_dim())?;

            if index == self.states.len() {
                self.states.push(AdamState::zeros_like(layer));
            }
            let state = &mut self.states[index];
            check_shapes("moment", state.m_weights.raw_dim(), layer.weights.raw_dim())?;

            Zip::from(&mut layer.weights)
                .and(&mut state.m_weights)
                .and(&mut state.v_weights)
                .and(&gradients.weights)
                .for_each(|p, m, v, &g| update(p, m, v, g));
            Zip::from(&mut layer.biases)
                .and(&mut state.m_biases)
                .and(&mut state.v_biases)
                .and(&gradients.biases)
                .for_each(|p, m, v, &g| update(p, m, v, g));
        }
        Ok(())
    }

    fn learning_rate(&self) -> f32 {
        self.learning_rate
    }
}
