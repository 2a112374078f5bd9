use serde::{Deserialize, Serialize};

use crate::error::{FlowQlError, Result};
use crate::layers::DenseLayer;
use crate::network::NeuralNetwork;
use super::critic::Critic;

/// Models whose parameters can be moved toward another model of the same shape.
pub trait SoftUpdate {
    /// `self ← (1 - tau) · self + tau · source`, parameter by parameter.
    fn soft_update_from(&mut self, source: &Self, tau: f32);
}

fn soft_update_layers<'a, 'b>(
    targets: impl Iterator<Item = &'a mut DenseLayer>,
    sources: impl Iterator<Item = &'b DenseLayer>,
    tau: f32,
) {
    for (target, source) in targets.zip(sources) {
        target.weights.zip_mut_with(&source.weights, |t, &s| *t += tau * (s - *t));
        target.biases.zip_mut_with(&source.biases, |t, &s| *t += tau * (s - *t));
    }
}

impl SoftUpdate for NeuralNetwork {
    fn soft_update_from(&mut self, source: &Self, tau: f32) {
        soft_update_layers(self.layers.iter_mut(), source.layers.iter(), tau);
    }
}

impl SoftUpdate for Critic {
    fn soft_update_from(&mut self, source: &Self, tau: f32) {
        soft_update_layers(self.layers_mut(), source.layers(), tau);
    }
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct EmaConfig {
    /// Weight kept on the shadow parameters at each update
    pub decay: f32,
    /// Updates during which the shadow copies the online model outright
    pub update_after_step: usize,
    /// Only every `update_every`-th call blends parameters
    pub update_every: usize,
}

impl Default for EmaConfig {
    fn default() -> Self {
        EmaConfig {
            decay: 0.95,
            update_after_step: 0,
            update_every: 1,
        }
    }
}

impl EmaConfig {
    pub fn validate(&self) -> Result<()> {
        if !(0.0..1.0).contains(&self.decay) {
            return Err(FlowQlError::invalid_parameter("ema_decay", "must lie in [0, 1)"));
        }
        if self.update_every == 0 {
            return Err(FlowQlError::invalid_parameter("update_every", "must be at least 1"));
        }
        Ok(())
    }
}

/// Exponential moving average of a model's parameters.
///
/// The shadow is never trained directly. Call `update` right after each
/// optimizer step on the online model.
#[derive(Serialize, Deserialize, Clone, Debug)]
pub struct Ema<M> {
    shadow: M,
    pub config: EmaConfig,
    step: usize,
}

impl<M: SoftUpdate + Clone> Ema<M> {
    /// Start from a copy of `online`.
    pub fn new(online: &M, config: EmaConfig) -> Result<Self> {
        config.validate()?;
        Ok(Ema {
            shadow: online.clone(),
            config,
            step: 0,
        })
    }

    /// Move the shadow toward `online`.
    pub fn update(&mut self, online: &M) {
        self.step += 1;

        if self.step <= self.config.update_after_step {
            self.shadow = online.clone();
            return;
        }
        if self.step % self.config.update_every != 0 {
            return;
        }
        self.shadow.soft_update_from(online, 1.0 - self.config.decay);
    }

    /// Number of `update` calls so far.
    pub fn step(&self) -> usize {
        self.step
    }

    pub fn model(&self) -> &M {
        &self.shadow
    }

    /// Mutable access for gradient-tracking forward passes; parameters must
    /// only change through `update`.
    pub fn model_mut(&mut self) -> &mut M {
        &mut self.shadow
    }
}
