//! # FlowQL - Mean-Flow Q-Learning for Continuous Control
//!
//! FlowQL trains an off-policy actor-critic agent whose policy is a
//! generative flow model. Actions are produced by mapping Gaussian noise to
//! the action space in a single network evaluation, and the policy is trained
//! both to reproduce executed actions (mean-flow objective) and to maximize a
//! pessimistic, exponentially averaged critic.
//!
//! ## Key Features
//!
//! - **Mean-flow policy**: one-step sampling with a forward-mode (JVP) training target
//! - **Grouped critic**: several value heads combined by a soft minimum
//! - **EMA target critic**: updated right after every critic step
//! - **Manual backprop**: dense networks with gradients w.r.t. parameters and inputs
//! - **Environments**: Pendulum and continuous Mountain Car, with JSON-lines episode recording
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use flowql::environment::make;
//! use flowql::training::{EpisodeLoop, TrainingConfig};
//!
//! # fn main() -> flowql::error::Result<()> {
//! let config = TrainingConfig {
//!     num_episodes: 100,
//!     update_timesteps: 2000,
//!     seed: Some(7),
//!     ..TrainingConfig::default()
//! };
//! let env = make(&config.env_name, config.seed)?;
//! let mut training = EpisodeLoop::new(env, config)?;
//! let summary = training.run()?;
//! println!("{} policy updates", summary.num_policy_updates);
//! # Ok(())
//! # }
//! ```
//!
//! ## Module Organization
//!
//! - [`activations`] - Activation functions with batch derivatives
//! - [`algorithms`] - Actor, mean flow, critic, EMA and the agent
//! - [`environment`] - Environment trait, built-in environments, recorder
//! - [`error`] - Error types and result handling
//! - [`layers`] - Dense layers and weight initialization
//! - [`loss`] - Loss functions for training
//! - [`metrics`] - Training metrics and tracking
//! - [`network`] - Multi-layer perceptron with backward and tangent passes
//! - [`optimizer`] - SGD and Adam
//! - [`replay_buffer`] - Transition storage drained at every policy update
//! - [`training`] - Episode loop and training configuration

pub mod activations;
pub mod algorithms;
pub mod environment;
pub mod error;
pub mod layers;
pub mod loss;
pub mod metrics;
pub mod network;
pub mod optimizer;
pub mod replay_buffer;
pub mod training;

#[cfg(test)]
mod tests;
