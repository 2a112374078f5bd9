use ndarray::{Array1, Array2, ArrayView1, ArrayView2, Axis};
use rand::Rng;
use serde::{Deserialize, Serialize};

use crate::activations::Activation;
use crate::error::{FlowQlError, Result};
use crate::network::{concat_columns, NeuralNetwork, NetworkGradients};

/// Average-velocity network of the mean-flow policy.
///
/// Input rows are `[noised_action, state, time, integral_start_time]`;
/// output rows are `tanh(mlp(input)) * output_scale`, one value per action
/// dimension.
#[derive(Serialize, Deserialize, Clone, Debug)]
pub struct Actor {
    pub network: NeuralNetwork,
    pub state_dim: usize,
    pub action_dim: usize,
    pub output_scale: f32,
}

impl Actor {
    pub fn new<R: Rng + ?Sized>(
        state_dim: usize,
        action_dim: usize,
        hidden_dim: usize,
        depth: usize,
        hidden_activation: Activation,
        rng: &mut R,
    ) -> Result<Self> {
        let network = NeuralNetwork::mlp(
            action_dim + state_dim + 2,
            hidden_dim,
            depth,
            action_dim,
            hidden_activation,
            Activation::Tanh,
            rng,
        )?;

        Ok(Actor {
            network,
            state_dim,
            action_dim,
            output_scale: 5.0,
        })
    }

    fn assemble_input(
        &self,
        noised: ArrayView2<f32>,
        times: ArrayView1<f32>,
        integral_start_times: ArrayView1<f32>,
        states: ArrayView2<f32>,
    ) -> Result<Array2<f32>> {
        let batch = noised.nrows();
        if noised.ncols() != self.action_dim {
            return Err(FlowQlError::dimension_mismatch(
                format!("{} action columns", self.action_dim),
                format!("{} action columns", noised.ncols()),
            ));
        }
        if states.ncols() != self.state_dim {
            return Err(FlowQlError::dimension_mismatch(
                format!("{} state columns", self.state_dim),
                format!("{} state columns", states.ncols()),
            ));
        }
        if states.nrows() != batch || times.len() != batch || integral_start_times.len() != batch {
            return Err(FlowQlError::dimension_mismatch(
                format!("batch of {}", batch),
                format!(
                    "states {}, times {}, start times {}",
                    states.nrows(),
                    times.len(),
                    integral_start_times.len()
                ),
            ));
        }

        concat_columns(&[
            noised.view(),
            states.view(),
            times.view().insert_axis(Axis(1)),
            integral_start_times.view().insert_axis(Axis(1)),
        ])
    }

    /// Gradient-tracking forward pass.
    pub fn forward(
        &mut self,
        noised: ArrayView2<f32>,
        times: ArrayView1<f32>,
        integral_start_times: ArrayView1<f32>,
        states: ArrayView2<f32>,
    ) -> Result<Array2<f32>> {
        let input = self.assemble_input(noised, times, integral_start_times, states)?;
        Ok(self.network.forward_batch(input.view())? * self.output_scale)
    }

    /// Forward pass without gradient tracking.
    pub fn predict(
        &self,
        noised: ArrayView2<f32>,
        times: ArrayView1<f32>,
        integral_start_times: ArrayView1<f32>,
        states: ArrayView2<f32>,
    ) -> Result<Array2<f32>> {
        let input = self.assemble_input(noised, times, integral_start_times, states)?;
        Ok(self.network.predict_batch(input.view())? * self.output_scale)
    }

    /// Gradient-tracking forward pass that also returns the total derivative
    /// of the output along `(noised_tangent, time_tangent, start_tangent)`.
    /// States are held fixed.
    #[allow(clippy::too_many_arguments)]
    pub fn forward_with_tangent(
        &mut self,
        noised: ArrayView2<f32>,
        times: ArrayView1<f32>,
        integral_start_times: ArrayView1<f32>,
        states: ArrayView2<f32>,
        noised_tangent: ArrayView2<f32>,
        time_tangent: ArrayView1<f32>,
        start_tangent: ArrayView1<f32>,
    ) -> Result<(Array2<f32>, Array2<f32>)> {
        let input = self.assemble_input(noised, times, integral_start_times, states)?;
        let state_tangent = Array2::zeros(states.raw_dim());
        let tangent = self.assemble_input(noised_tangent, time_tangent, start_tangent, state_tangent.view())?;

        let (output, output_tangent) = self.network.forward_tangent_batch(input.view(), tangent.view())?;
        Ok((output * self.output_scale, output_tangent * self.output_scale))
    }

    /// Backpropagate `dL/doutput` through the last gradient-tracking pass.
    pub fn backward(&self, output_errors: ArrayView2<f32>) -> Result<NetworkGradients> {
        let scaled = &output_errors * self.output_scale;
        self.network.backward_batch(scaled.view())
    }

    /// Constant column used for the time inputs.
    pub fn filled(batch: usize, value: f32) -> Array1<f32> {
        Array1::from_elem(batch, value)
    }
}
