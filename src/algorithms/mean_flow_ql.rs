use log::debug;
use ndarray::{Array1, Array2, ArrayView1, ArrayView2, Axis};
use rand::rngs::StdRng;
use rand::SeedableRng;
use serde::{Deserialize, Serialize};
use std::path::Path;

use crate::activations::Activation;
use crate::error::{FlowQlError, Result};
use crate::loss::{Loss, MSE};
use crate::optimizer::{Adam, Optimizer, OptimizerWrapper};
use crate::replay_buffer::{ReplayBuffer, TransitionBatch};
use super::actor::Actor;
use super::critic::{Critic, DEFAULT_NUM_CRITICS};
use super::ema::{Ema, EmaConfig};
use super::mean_flow::{FlowLoss, MeanFlow, MeanFlowConfig};

/// Lower and upper bound of every action component.
pub const ACTION_LOW: f32 = -1.0;
pub const ACTION_HIGH: f32 = 1.0;

/// Clamp every action component into the valid range.
pub fn clamp_actions(mut actions: Array2<f32>) -> Array2<f32> {
    actions.mapv_inplace(|a| a.clamp(ACTION_LOW, ACTION_HIGH));
    actions
}

fn entropy_rng() -> StdRng {
    StdRng::from_entropy()
}

/// Hyperparameters of the mean-flow Q-learning agent.
///
/// `Default` leaves the state and action dimensions at zero; they are
/// normally filled in from the environment.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
#[serde(default)]
pub struct AgentConfig {
    pub state_dim: usize,
    pub action_dim: usize,
    pub actor_hidden_dim: usize,
    pub actor_depth: usize,
    pub critic_hidden_dim: usize,
    pub critic_depth: usize,
    pub num_critics: usize,
    pub hidden_activation: Activation,
    /// Passes over the drained buffer per learning phase
    pub epochs: usize,
    pub batch_size: usize,
    pub lr: f32,
    pub weight_decay: f32,
    pub betas: (f32, f32),
    pub discount_factor: f32,
    pub flow_loss_weight: f32,
    pub ema: EmaConfig,
    pub flow: MeanFlowConfig,
    pub seed: Option<u64>,
}

impl AgentConfig {
    pub fn new(state_dim: usize, action_dim: usize) -> Self {
        AgentConfig {
            state_dim,
            action_dim,
            actor_hidden_dim: 64,
            actor_depth: 3,
            critic_hidden_dim: 256,
            critic_depth: 3,
            num_critics: DEFAULT_NUM_CRITICS,
            hidden_activation: Activation::Gelu,
            epochs: 5,
            batch_size: 64,
            lr: 0.002,
            weight_decay: 1e-3,
            betas: (0.9, 0.99),
            discount_factor: 0.99,
            flow_loss_weight: 1.0,
            ema: EmaConfig::default(),
            flow: MeanFlowConfig::default(),
            seed: None,
        }
    }

    pub fn dims(mut self, state_dim: usize, action_dim: usize) -> Self {
        self.state_dim = state_dim;
        self.action_dim = action_dim;
        self
    }

    pub fn hidden_dims(mut self, actor_hidden_dim: usize, critic_hidden_dim: usize) -> Self {
        self.actor_hidden_dim = actor_hidden_dim;
        self.critic_hidden_dim = critic_hidden_dim;
        self
    }

    pub fn depth(mut self, actor_depth: usize, critic_depth: usize) -> Self {
        self.actor_depth = actor_depth;
        self.critic_depth = critic_depth;
        self
    }

    pub fn epochs(mut self, epochs: usize) -> Self {
        self.epochs = epochs;
        self
    }

    pub fn batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size;
        self
    }

    pub fn learning_rate(mut self, lr: f32) -> Self {
        self.lr = lr;
        self
    }

    pub fn discount_factor(mut self, discount_factor: f32) -> Self {
        self.discount_factor = discount_factor;
        self
    }

    pub fn ema_decay(mut self, decay: f32) -> Self {
        self.ema.decay = decay;
        self
    }

    pub fn seed(mut self, seed: u64) -> Self {
        self.seed = Some(seed);
        self
    }

    pub fn validate(&self) -> Result<()> {
        let positive = [
            ("state_dim", self.state_dim),
            ("action_dim", self.action_dim),
            ("actor_hidden_dim", self.actor_hidden_dim),
            ("critic_hidden_dim", self.critic_hidden_dim),
            ("num_critics", self.num_critics),
            ("epochs", self.epochs),
            ("batch_size", self.batch_size),
        ];
        for (name, value) in positive {
            if value == 0 {
                return Err(FlowQlError::invalid_parameter(name, "must be greater than 0"));
            }
        }
        if !(self.lr > 0.0) {
            return Err(FlowQlError::invalid_parameter("lr", "must be positive"));
        }
        if !(0.0..=1.0).contains(&self.discount_factor) {
            return Err(FlowQlError::invalid_parameter("discount_factor", "must lie in [0, 1]"));
        }
        let (beta1, beta2) = self.betas;
        if !(0.0..1.0).contains(&beta1) || !(0.0..1.0).contains(&beta2) {
            return Err(FlowQlError::invalid_parameter("betas", "must lie in [0, 1)"));
        }
        if !(self.weight_decay >= 0.0) || !(self.flow_loss_weight >= 0.0) {
            return Err(FlowQlError::invalid_parameter(
                "weight_decay/flow_loss_weight",
                "must be non-negative",
            ));
        }
        self.ema.validate()
    }
}

impl Default for AgentConfig {
    fn default() -> Self {
        AgentConfig::new(0, 0)
    }
}

/// Mean losses of one learning phase.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct LearnStats {
    pub critic_loss: f32,
    pub flow_loss: f32,
    pub q_value: f32,
    pub minibatches: usize,
}

/// Actor-critic agent whose policy is a mean-flow generative model.
///
/// Each mini-batch runs three updates in order: the critic regresses onto
/// bootstrapped targets from the EMA critic, the actor fits the executed
/// actions with the mean-flow objective, then the actor ascends the EMA
/// critic's value of its own one-step samples.
#[derive(Serialize, Deserialize, Clone, Debug)]
pub struct MeanFlowQLAgent {
    pub config: AgentConfig,
    pub mean_flow: MeanFlow,
    pub critic: Critic,
    pub ema_critic: Ema<Critic>,
    opt_actor: OptimizerWrapper,
    opt_critic: OptimizerWrapper,
    num_updates: usize,
    #[serde(skip, default = "entropy_rng")]
    rng: StdRng,
}

impl MeanFlowQLAgent {
    pub fn new(config: AgentConfig) -> Result<Self> {
        config.validate()?;
        let mut rng = match config.seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        };

        let actor = Actor::new(
            config.state_dim,
            config.action_dim,
            config.actor_hidden_dim,
            config.actor_depth,
            config.hidden_activation,
            &mut rng,
        )?;
        let mean_flow = MeanFlow::new(actor, config.flow.clone())?;

        let critic = Critic::new(
            config.state_dim,
            config.action_dim,
            config.critic_hidden_dim,
            config.critic_depth,
            config.num_critics,
            config.hidden_activation,
            &mut rng,
        )?;
        let ema_critic = Ema::new(&critic, config.ema.clone())?;

        let adam = Adam::new(config.lr, config.betas.0, config.betas.1, 1e-8)
            .with_weight_decay(config.weight_decay);

        Ok(MeanFlowQLAgent {
            mean_flow,
            critic,
            ema_critic,
            opt_actor: OptimizerWrapper::Adam(adam.clone()),
            opt_critic: OptimizerWrapper::Adam(adam),
            num_updates: 0,
            rng,
            config,
        })
    }

    /// Replace both optimizers, discarding their state.
    pub fn with_optimizers(mut self, actor: OptimizerWrapper, critic: OptimizerWrapper) -> Self {
        self.opt_actor = actor;
        self.opt_critic = critic;
        self
    }

    /// Mini-batch updates performed so far.
    pub fn num_updates(&self) -> usize {
        self.num_updates
    }

    /// Policy action for one state, clamped to the valid range.
    pub fn act(&mut self, state: ArrayView1<f32>) -> Result<Array1<f32>> {
        let actions = self.sample_actions(state.insert_axis(Axis(0)))?;
        Ok(actions.index_axis_move(Axis(0), 0))
    }

    /// Policy actions for a batch of states, clamped to the valid range.
    pub fn sample_actions(&mut self, states: ArrayView2<f32>) -> Result<Array2<f32>> {
        let actions = self.mean_flow.sample(states, None, &mut self.rng)?;
        Ok(clamp_actions(actions))
    }

    /// Train on everything in `memories` and leave the buffer empty.
    pub fn learn(&mut self, memories: &mut ReplayBuffer) -> Result<LearnStats> {
        if memories.is_empty() {
            return Ok(LearnStats::default());
        }
        let data = memories.drain()?;
        self.learn_batch(&data)
    }

    /// `epochs` shuffled passes over `data`.
    pub fn learn_batch(&mut self, data: &TransitionBatch) -> Result<LearnStats> {
        let mut stats = LearnStats::default();

        for epoch in 0..self.config.epochs {
            let minibatches = data.minibatches(self.config.batch_size, &mut self.rng)?;
            for batch in &minibatches {
                stats.critic_loss += self.update_critic(batch)?;

                let noise = self.mean_flow.sample_noise(batch.len(), &mut self.rng);
                stats.flow_loss += self.update_actor_flow(batch, noise.view())?;
                stats.q_value += self.improve_actor(batch, noise.view())?;

                stats.minibatches += 1;
                self.num_updates += 1;
            }
            debug!(
                "epoch {}/{}: {} minibatches, critic loss so far {:.4}",
                epoch + 1,
                self.config.epochs,
                minibatches.len(),
                stats.critic_loss / stats.minibatches.max(1) as f32
            );
        }

        if stats.minibatches > 0 {
            let n = stats.minibatches as f32;
            stats.critic_loss /= n;
            stats.flow_loss /= n;
            stats.q_value /= n;
        }
        Ok(stats)
    }

    /// `reward + (1 - done) * discount * Q_ema(next_state, clamp(policy(next_state)))`.
    pub fn bootstrap_targets(&mut self, batch: &TransitionBatch) -> Result<Array1<f32>> {
        let next_actions = clamp_actions(self.mean_flow.sample(batch.next_states.view(), None, &mut self.rng)?);
        let next_q = self
            .ema_critic
            .model()
            .predict(batch.next_states.view(), next_actions.view())?;
        Ok(&batch.rewards + &(batch.continuation_mask() * &next_q * self.config.discount_factor))
    }

    /// Critic MSE against fixed targets, without touching any parameters.
    pub fn critic_loss(&self, batch: &TransitionBatch, targets: ArrayView1<f32>) -> Result<f32> {
        let pred_q = self.critic.predict(batch.states.view(), batch.actions.view())?;
        Ok(MSE.compute(pred_q.view(), targets))
    }

    /// One critic optimizer step toward `targets`, followed by the EMA update.
    ///
    /// Returns the loss before the step.
    pub fn critic_gradient_step(&mut self, batch: &TransitionBatch, targets: ArrayView1<f32>) -> Result<f32> {
        let pred_q = self.critic.forward(batch.states.view(), batch.actions.view())?;
        let loss = FlowQlError::ensure_finite("critic", MSE.compute(pred_q.view(), targets))?;

        let errors = MSE.gradient(pred_q.view(), targets);
        let gradients = self.critic.backward(errors.view())?;
        self.opt_critic.step(self.critic.layers_mut().zip(gradients.layer_gradients()))?;

        self.ema_critic.update(&self.critic);
        Ok(loss)
    }

    /// Critic update on one mini-batch.
    pub fn update_critic(&mut self, batch: &TransitionBatch) -> Result<f32> {
        let targets = self.bootstrap_targets(batch)?;
        self.critic_gradient_step(batch, targets.view())
    }

    /// Fit the executed actions with the mean-flow objective.
    pub fn update_actor_flow(&mut self, batch: &TransitionBatch, noise: ArrayView2<f32>) -> Result<f32> {
        let FlowLoss { loss, mut gradients } =
            self.mean_flow
                .loss(batch.actions.view(), batch.states.view(), noise, &mut self.rng)?;
        let loss = FlowQlError::ensure_finite("actor flow", loss)?;

        gradients.scale(self.config.flow_loss_weight);
        self.opt_actor.step(
            self.mean_flow
                .actor
                .network
                .layers
                .iter_mut()
                .zip(gradients.layers.iter()),
        )?;
        Ok(loss)
    }

    /// Maximize the EMA critic's value of one-step policy samples.
    ///
    /// Returns the mean Q-value before the step. Samples are not clamped here
    /// so the gradient reaches every action component.
    pub fn improve_actor(&mut self, batch: &TransitionBatch, noise: ArrayView2<f32>) -> Result<f32> {
        let sampled_actions = self.mean_flow.sample_with_grad(batch.states.view(), noise)?;

        let critic = self.ema_critic.model_mut();
        let q_values = critic.forward(batch.states.view(), sampled_actions.view())?;
        let q_value = FlowQlError::ensure_finite("actor q value", q_values.mean().unwrap_or(0.0))?;

        // actor loss is -mean(q)
        let output_errors = Array1::from_elem(q_values.len(), -1.0 / q_values.len() as f32);
        let critic_gradients = critic.backward(output_errors.view())?;
        let gradients = self.mean_flow.backward_sample(critic_gradients.actions.view())?;

        self.opt_actor.step(
            self.mean_flow
                .actor
                .network
                .layers
                .iter_mut()
                .zip(gradients.layers.iter()),
        )?;
        Ok(q_value)
    }

    /// Write the agent (networks, EMA shadow, optimizer state) to `path`.
    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let serialized = bincode::serialize(self)?;
        std::fs::write(path, serialized)?;
        Ok(())
    }

    /// Load an agent written by `save`. The RNG is reseeded from `config.seed`
    /// when present, otherwise from entropy.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let data = std::fs::read(path)?;
        let mut agent: Self = bincode::deserialize(&data)?;
        if let Some(seed) = agent.config.seed {
            agent.rng = StdRng::seed_from_u64(seed);
        }
        Ok(agent)
    }
}
