use ndarray::{Array1, Array2, ArrayView1, ArrayView2, Axis};
use rand::Rng;
use serde::{Serialize, Deserialize};
use std::fs;
use std::path::Path;

use crate::activations::Activation;
use crate::error::{FlowQlError, Result};
use crate::layers::{DenseLayer, LayerGradients};

/// Gradients produced by one backward pass through a network.
#[derive(Clone, Debug)]
pub struct NetworkGradients {
    /// Parameter gradients, one entry per layer in forward order
    pub layers: Vec<LayerGradients>,
    /// Gradient with respect to the network inputs
    pub inputs: Array2<f32>,
}

impl NetworkGradients {
    pub fn global_norm(&self) -> f32 {
        self.layers.iter().map(LayerGradients::squared_norm).sum::<f32>().sqrt()
    }

    /// Scale every parameter gradient in place.
    pub fn scale(&mut self, factor: f32) {
        for layer in &mut self.layers {
            layer.weights.mapv_inplace(|g| g * factor);
            layer.biases.mapv_inplace(|g| g * factor);
        }
        self.inputs.mapv_inplace(|g| g * factor);
    }
}

/// A feedforward network made of dense layers.
///
/// The network does not own an optimizer; whoever trains it pairs the
/// gradients from `backward_batch` with an `OptimizerWrapper`.
#[derive(Serialize, Deserialize, Clone, Debug)]
pub struct NeuralNetwork {
    pub layers: Vec<DenseLayer>,
}

impl NeuralNetwork {
    /// Create a new neural network with the given layer sizes and activations.
    pub fn new<R: Rng + ?Sized>(layer_sizes: &[usize], activations: &[Activation], rng: &mut R) -> Result<Self> {
        if layer_sizes.len() < 2 || layer_sizes.len() - 1 != activations.len() {
            return Err(FlowQlError::invalid_parameter(
                "activations".to_string(),
                format!(
                    "{} layer sizes need {} activations, got {}",
                    layer_sizes.len(),
                    layer_sizes.len().saturating_sub(1),
                    activations.len()
                ),
            ));
        }
        if layer_sizes.iter().any(|&size| size == 0) {
            return Err(FlowQlError::invalid_parameter("layer_sizes", "sizes must be positive"));
        }

        let layers = layer_sizes
            .windows(2)
            .zip(activations.iter())
            .map(|(window, &activation)| DenseLayer::new(window[0], window[1], activation, rng))
            .collect();

        Ok(NeuralNetwork { layers })
    }

    /// Multilayer perceptron with `depth` hidden layers of width `hidden_dim`.
    pub fn mlp<R: Rng + ?Sized>(
        dim_in: usize,
        hidden_dim: usize,
        depth: usize,
        dim_out: usize,
        hidden_activation: Activation,
        output_activation: Activation,
        rng: &mut R,
    ) -> Result<Self> {
        let mut sizes = vec![dim_in];
        sizes.extend(std::iter::repeat(hidden_dim).take(depth));
        sizes.push(dim_out);

        let activations = std::iter::repeat(hidden_activation)
            .take(depth)
            .chain(std::iter::once(output_activation))
            .collect::<Vec<_>>();

        Self::new(&sizes, &activations, rng)
    }

    pub fn with_layers(mut self, layers: Vec<DenseLayer>) -> Self {
        self.layers = layers;
        self
    }

    pub fn input_size(&self) -> usize {
        self.layers.first().map_or(0, DenseLayer::input_size)
    }

    pub fn output_size(&self) -> usize {
        self.layers.last().map_or(0, DenseLayer::output_size)
    }

    pub fn num_parameters(&self) -> usize {
        self.layers.iter().map(DenseLayer::num_parameters).sum()
    }

    fn check_inputs(&self, inputs: ArrayView2<f32>) -> Result<()> {
        if inputs.ncols() != self.input_size() {
            return Err(FlowQlError::dimension_mismatch(
                format!("{} input columns", self.input_size()),
                format!("{} input columns", inputs.ncols()),
            ));
        }
        Ok(())
    }

    /// Forward pass for a single input vector (no cache).
    pub fn forward(&self, input: ArrayView1<f32>) -> Result<Array1<f32>> {
        let output = self.predict_batch(input.insert_axis(Axis(0)))?;
        Ok(output.index_axis_move(Axis(0), 0))
    }

    /// Forward pass for a batch, caching activations for `backward_batch`.
    pub fn forward_batch(&mut self, inputs: ArrayView2<f32>) -> Result<Array2<f32>> {
        self.check_inputs(inputs)?;
        let mut current_output = inputs.to_owned();
        for layer in &mut self.layers {
            current_output = layer.forward_batch(current_output.view());
        }
        Ok(current_output)
    }

    /// Forward pass for a batch without recording anything for backprop.
    pub fn predict_batch(&self, inputs: ArrayView2<f32>) -> Result<Array2<f32>> {
        self.check_inputs(inputs)?;
        let mut current_output = inputs.to_owned();
        for layer in &self.layers {
            current_output = layer.predict_batch(current_output.view());
        }
        Ok(current_output)
    }

    /// Forward pass with forward-mode differentiation along `tangents`.
    ///
    /// Returns `(outputs, jvp)` where `jvp` is the Jacobian of the outputs
    /// applied to `tangents`, row by row.
    pub fn forward_tangent_batch(
        &mut self,
        inputs: ArrayView2<f32>,
        tangents: ArrayView2<f32>,
    ) -> Result<(Array2<f32>, Array2<f32>)> {
        self.check_inputs(inputs)?;
        if tangents.dim() != inputs.dim() {
            return Err(FlowQlError::dimension_mismatch(
                format!("{:?}", inputs.dim()),
                format!("{:?}", tangents.dim()),
            ));
        }
        let mut current_output = inputs.to_owned();
        let mut current_tangent = tangents.to_owned();
        for layer in &mut self.layers {
            let (output, tangent) = layer.forward_tangent_batch(current_output.view(), current_tangent.view());
            current_output = output;
            current_tangent = tangent;
        }
        Ok((current_output, current_tangent))
    }

    /// Backpropagate `output_errors` (dL/doutput) through the cached forward pass.
    pub fn backward_batch(&self, output_errors: ArrayView2<f32>) -> Result<NetworkGradients> {
        let mut gradients = Vec::with_capacity(self.layers.len());
        let mut current_error = output_errors.to_owned();

        for layer in self.layers.iter().rev() {
            let (input_error, layer_gradients) = layer.backward_batch(current_error.view())?;
            gradients.push(layer_gradients);
            current_error = input_error;
        }

        gradients.reverse();
        Ok(NetworkGradients {
            layers: gradients,
            inputs: current_error,
        })
    }

    pub fn clear_cache(&mut self) {
        for layer in &mut self.layers {
            layer.clear_cache();
        }
    }

    /// Save the network's parameters to a file.
    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let serialized = bincode::serialize(self)?;
        fs::write(path, serialized)?;
        Ok(())
    }

    /// Load a network from a file written by `save`.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let data = fs::read(path)?;
        let network = bincode::deserialize(&data)?;
        Ok(network)
    }
}

/// Concatenate 2D blocks along the column axis.
pub(crate) fn concat_columns(blocks: &[ArrayView2<f32>]) -> Result<Array2<f32>> {
    ndarray::concatenate(Axis(1), blocks).map_err(|e| FlowQlError::dimension_mismatch(
        "blocks with equal row counts".to_string(),
        e.to_string(),
    ))
}
