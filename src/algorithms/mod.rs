//! # Mean-Flow Q-Learning
//!
//! Off-policy actor-critic learning for continuous control where the policy
//! is a generative model rather than a Gaussian.
//!
//! ## Components
//!
//! - **Actor**: MLP predicting the average velocity `u(z, t, r)` of a
//!   noise-to-action flow, conditioned on the state.
//! - **MeanFlow**: training objective and one-step sampler built on the actor.
//! - **Critic**: group of value heads combined with a soft minimum.
//! - **Ema**: exponentially averaged copy of the critic used for bootstrap
//!   targets and policy improvement.
//! - **MeanFlowQLAgent**: ties the pieces together and runs the learning phase.
//!
//! ## Example Usage
//!
//! ```rust,no_run
//! use flowql::algorithms::{AgentConfig, MeanFlowQLAgent};
//! use flowql::replay_buffer::ReplayBuffer;
//!
//! # fn main() -> flowql::error::Result<()> {
//! let config = AgentConfig::new(3, 1).batch_size(64).seed(0);
//! let mut agent = MeanFlowQLAgent::new(config)?;
//! let mut memories = ReplayBuffer::new(10_000);
//!
//! // ... fill `memories` from environment interaction ...
//! let stats = agent.learn(&mut memories)?;
//! println!("critic loss {:.3}", stats.critic_loss);
//! # Ok(())
//! # }
//! ```

pub mod actor;
pub mod critic;
pub mod ema;
pub mod mean_flow;
pub mod mean_flow_ql;

pub use actor::Actor;
pub use critic::{softmin_aggregate, Critic, CriticGradients, DEFAULT_NUM_CRITICS, SOFTMIN_TEMPERATURE};
pub use ema::{Ema, EmaConfig, SoftUpdate};
pub use mean_flow::{FlowLoss, MeanFlow, MeanFlowConfig};
pub use mean_flow_ql::{clamp_actions, AgentConfig, LearnStats, MeanFlowQLAgent, ACTION_HIGH, ACTION_LOW};
