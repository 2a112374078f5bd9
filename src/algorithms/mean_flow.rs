//! Mean-flow policy head.
//!
//! The actor predicts the *average* velocity `u(z, t, r)` over `[r, t]`, so
//! that `z_r = z_t - (t - r) · u(z_t, t, r)`. Data sits at `t = 0` and noise
//! at `t = 1`, so one evaluation with `t = 1, r = 0` maps noise straight to
//! an action. Training uses the identity
//! `u(z_t, t, r) = v - (t - r) · du/dt`, where `v = noise - action` and the
//! total time derivative is taken along the flow with a forward-mode pass.

use ndarray::{Array1, Array2, ArrayView1, ArrayView2, Axis};
use ndarray_rand::rand_distr::{StandardNormal, Uniform};
use ndarray_rand::RandomExt;
use rand::Rng;
use serde::{Deserialize, Serialize};

use crate::error::{FlowQlError, Result};
use crate::loss::{Loss, MSE};
use crate::network::NetworkGradients;
use super::actor::Actor;

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct MeanFlowConfig {
    /// Standard deviation of the source noise
    pub noise_std_dev: f32,
    /// Fraction of training samples with `r = t`, i.e. plain flow matching
    pub prob_default_flow_obj: f32,
    /// Integration steps used by `sample`
    pub sample_steps: usize,
}

impl Default for MeanFlowConfig {
    fn default() -> Self {
        MeanFlowConfig {
            noise_std_dev: 2.0,
            prob_default_flow_obj: 0.5,
            sample_steps: 1,
        }
    }
}

/// Result of one mean-flow training evaluation.
#[derive(Clone, Debug)]
pub struct FlowLoss {
    pub loss: f32,
    pub gradients: NetworkGradients,
}

#[derive(Serialize, Deserialize, Clone, Debug)]
pub struct MeanFlow {
    pub actor: Actor,
    pub config: MeanFlowConfig,
}

impl MeanFlow {
    pub fn new(actor: Actor, config: MeanFlowConfig) -> Result<Self> {
        if !(config.noise_std_dev > 0.0) {
            return Err(FlowQlError::invalid_parameter("noise_std_dev", "must be positive"));
        }
        if !(0.0..=1.0).contains(&config.prob_default_flow_obj) {
            return Err(FlowQlError::invalid_parameter("prob_default_flow_obj", "must lie in [0, 1]"));
        }
        if config.sample_steps == 0 {
            return Err(FlowQlError::invalid_parameter("sample_steps", "must be at least 1"));
        }
        Ok(MeanFlow { actor, config })
    }

    pub fn action_dim(&self) -> usize {
        self.actor.action_dim
    }

    pub fn noise_std_dev(&self) -> f32 {
        self.config.noise_std_dev
    }

    /// Source noise for `batch` actions.
    pub fn sample_noise<R: Rng + ?Sized>(&self, batch: usize, rng: &mut R) -> Array2<f32> {
        Array2::<f32>::random_using((batch, self.action_dim()), StandardNormal, rng) * self.config.noise_std_dev
    }

    /// Draw `(times, integral_start_times)` with `0 <= r <= t <= 1`.
    pub fn sample_times<R: Rng + ?Sized>(&self, batch: usize, rng: &mut R) -> (Array1<f32>, Array1<f32>) {
        let times = Array1::random_using(batch, Uniform::new(0.0f32, 1.0), rng);
        let mut starts = &times * &Array1::random_using(batch, Uniform::new(0.0f32, 1.0), rng);
        for (start, &time) in starts.iter_mut().zip(times.iter()) {
            if rng.gen::<f32>() < self.config.prob_default_flow_obj {
                *start = time;
            }
        }
        (times, starts)
    }

    /// Mean-flow loss for reproducing `actions` from `noise` given `states`.
    pub fn loss<R: Rng + ?Sized>(
        &mut self,
        actions: ArrayView2<f32>,
        states: ArrayView2<f32>,
        noise: ArrayView2<f32>,
        rng: &mut R,
    ) -> Result<FlowLoss> {
        let (times, starts) = self.sample_times(actions.nrows(), rng);
        self.loss_at(actions, states, noise, times.view(), starts.view())
    }

    /// `loss` with explicit times.
    pub fn loss_at(
        &mut self,
        actions: ArrayView2<f32>,
        states: ArrayView2<f32>,
        noise: ArrayView2<f32>,
        times: ArrayView1<f32>,
        integral_start_times: ArrayView1<f32>,
    ) -> Result<FlowLoss> {
        if noise.dim() != actions.dim() {
            return Err(FlowQlError::dimension_mismatch(
                format!("noise of shape {:?}", actions.dim()),
                format!("{:?}", noise.dim()),
            ));
        }
        let batch = actions.nrows();
        let time_col = times.insert_axis(Axis(1));
        let noised = &actions * &time_col.mapv(|t| 1.0 - t) + &noise * &time_col;
        let flow = &noise - &actions;

        let (pred, rate_avg_vel_change) = self.actor.forward_with_tangent(
            noised.view(),
            times,
            integral_start_times,
            states,
            flow.view(),
            Actor::filled(batch, 1.0).view(),
            Actor::filled(batch, 0.0).view(),
        )?;

        let interval = (&times - &integral_start_times).insert_axis(Axis(1));
        let target = &flow - &(&rate_avg_vel_change * &interval);

        let loss = MSE.compute_batch(pred.view(), target.view());
        let errors = MSE.gradient_batch(pred.view(), target.view());
        let gradients = self.actor.backward(errors.view())?;

        Ok(FlowLoss { loss, gradients })
    }

    /// Sample actions without gradient tracking.
    ///
    /// Uses `noise` when given, otherwise draws fresh noise. Integrates from
    /// `t = 1` down to `t = 0` in `sample_steps` equal jumps. The result is
    /// not clamped.
    pub fn sample<R: Rng + ?Sized>(
        &self,
        states: ArrayView2<f32>,
        noise: Option<ArrayView2<f32>>,
        rng: &mut R,
    ) -> Result<Array2<f32>> {
        let batch = states.nrows();
        let mut current = match noise {
            Some(noise) => noise.to_owned(),
            None => self.sample_noise(batch, rng),
        };

        let steps = self.config.sample_steps;
        for step in 0..steps {
            let time = 1.0 - step as f32 / steps as f32;
            let next = 1.0 - (step + 1) as f32 / steps as f32;
            let velocity = self.actor.predict(
                current.view(),
                Actor::filled(batch, time).view(),
                Actor::filled(batch, next).view(),
                states,
            )?;
            current = current - velocity * (time - next);
        }
        Ok(current)
    }

    /// One-step sample that keeps the forward cache for `backward_sample`.
    pub fn sample_with_grad(&mut self, states: ArrayView2<f32>, noise: ArrayView2<f32>) -> Result<Array2<f32>> {
        let batch = states.nrows();
        let velocity = self.actor.forward(
            noise,
            Actor::filled(batch, 1.0).view(),
            Actor::filled(batch, 0.0).view(),
            states,
        )?;
        Ok(&noise - &velocity)
    }

    /// Parameter gradients given `dL/daction` for the last `sample_with_grad`.
    pub fn backward_sample(&self, action_errors: ArrayView2<f32>) -> Result<NetworkGradients> {
        let velocity_errors = -&action_errors;
        self.actor.backward(velocity_errors.view())
    }
}
