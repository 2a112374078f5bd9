//! Environment interaction loop.
//!
//! The loop collects one transition per step into the replay buffer and
//! hands the whole buffer to the agent every `update_timesteps` global steps.
//! An update always ends the current episode, even mid-episode.

use log::{debug, info, warn};
use ndarray::{Array1, ArrayView1, Axis};
use rand_distr::Uniform;
use ndarray_rand::RandomExt;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};
use std::path::Path;

use crate::algorithms::{clamp_actions, AgentConfig, LearnStats, MeanFlowQLAgent, ACTION_HIGH, ACTION_LOW};
use crate::environment::{self, Environment, EpisodeRecorder, RecordingConfig};
use crate::error::{FlowQlError, Result};
use crate::metrics::MetricsTracker;
use crate::replay_buffer::{ReplayBuffer, Transition};

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
#[serde(default)]
pub struct TrainingConfig {
    pub env_name: String,
    pub num_episodes: usize,
    pub max_timesteps: usize,
    /// Rewards are divided by this before they are stored
    pub max_reward: f32,
    /// Probability of a uniform random action instead of a policy sample
    pub prob_rand_action: f32,
    /// Global steps between policy updates
    pub update_timesteps: usize,
    pub log_every_eps: usize,
    pub seed: Option<u64>,
    pub agent: AgentConfig,
    pub recording: RecordingConfig,
}

impl Default for TrainingConfig {
    fn default() -> Self {
        TrainingConfig {
            env_name: environment::pendulum::NAME.to_string(),
            num_episodes: 50000,
            max_timesteps: 500,
            max_reward: 100.0,
            prob_rand_action: 0.1,
            update_timesteps: 10000,
            log_every_eps: 100,
            seed: None,
            agent: AgentConfig::default(),
            recording: RecordingConfig::default(),
        }
    }
}

impl TrainingConfig {
    pub fn from_json_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let data = std::fs::read_to_string(path)?;
        Ok(serde_json::from_str(&data)?)
    }

    pub fn save_json<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        std::fs::write(path, serde_json::to_string_pretty(self)?)?;
        Ok(())
    }

    pub fn validate(&self) -> Result<()> {
        if self.max_timesteps == 0 {
            return Err(FlowQlError::invalid_parameter("max_timesteps", "must be greater than 0"));
        }
        if self.update_timesteps == 0 {
            return Err(FlowQlError::invalid_parameter("update_timesteps", "must be greater than 0"));
        }
        if self.agent.batch_size == 0 {
            return Err(FlowQlError::invalid_parameter("batch_size", "must be greater than 0"));
        }
        if !(0.0..=1.0).contains(&self.prob_rand_action) {
            return Err(FlowQlError::invalid_parameter("prob_rand_action", "must lie in [0, 1]"));
        }
        if !self.max_reward.is_finite() || self.max_reward == 0.0 {
            return Err(FlowQlError::invalid_parameter("max_reward", "must be finite and non-zero"));
        }
        if self.log_every_eps == 0 {
            return Err(FlowQlError::invalid_parameter("log_every_eps", "must be at least 1"));
        }
        if self.recording.enabled && self.recording.record_every_eps == 0 {
            return Err(FlowQlError::invalid_parameter("record_every_eps", "must be at least 1"));
        }

        if self.update_timesteps < self.agent.batch_size {
            warn!(
                "update_timesteps ({}) is smaller than batch_size ({}); every update sees a single short batch",
                self.update_timesteps, self.agent.batch_size
            );
        }
        if !self.agent.hidden_activation.is_smooth() {
            warn!(
                "{:?} has a discontinuous derivative; the mean-flow time derivative will be noisy",
                self.agent.hidden_activation
            );
        }
        if self.max_reward < 0.0 {
            warn!("negative max_reward {} flips the sign of every reward", self.max_reward);
        }
        Ok(())
    }

    /// Agent configuration for an environment with the given dimensions.
    pub fn agent_config(&self, state_dim: usize, action_dim: usize) -> AgentConfig {
        let mut config = self.agent.clone().dims(state_dim, action_dim);
        if config.seed.is_none() {
            config.seed = self.seed;
        }
        config
    }
}

/// Build the configured environment, wrapped in a recorder when recording is on.
pub fn build_environment(config: &TrainingConfig) -> Result<Box<dyn Environment>> {
    let env = environment::make(&config.env_name, config.seed)?;
    if config.recording.enabled {
        info!(
            "recording every {} episodes to {}",
            config.recording.record_every_eps,
            config.recording.folder.display()
        );
        return Ok(Box::new(EpisodeRecorder::new(env, &config.recording)?));
    }
    Ok(env)
}

/// Why an episode stopped.
#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq)]
pub enum EpisodeEnd {
    Terminated,
    Truncated,
    /// A policy update was triggered on the last step
    PolicyUpdate,
    MaxTimesteps,
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct EpisodeOutcome {
    pub episode: usize,
    pub steps: usize,
    /// Sum of raw environment rewards
    pub total_reward: f32,
    pub end: EpisodeEnd,
}

#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq)]
pub struct TrainingSummary {
    pub episodes: usize,
    pub total_timesteps: usize,
    pub num_policy_updates: usize,
    pub mean_episode_reward: f32,
    pub best_episode_reward: Option<f32>,
    pub last_learn: Option<LearnStats>,
}

pub struct EpisodeLoop<E: Environment> {
    env: E,
    agent: MeanFlowQLAgent,
    memories: ReplayBuffer,
    config: TrainingConfig,
    metrics: MetricsTracker,
    rng: StdRng,
    time: usize,
    num_policy_updates: usize,
    episode: usize,
    last_learn: Option<LearnStats>,
}

impl<E: Environment> EpisodeLoop<E> {
    /// Create the loop and an agent sized for `env`.
    pub fn new(env: E, config: TrainingConfig) -> Result<Self> {
        let agent_config = config.agent_config(env.observation_dim(), env.action_dim());
        let agent = MeanFlowQLAgent::new(agent_config)?;
        Self::with_agent(env, agent, config)
    }

    /// Create the loop around an existing agent.
    pub fn with_agent(env: E, agent: MeanFlowQLAgent, config: TrainingConfig) -> Result<Self> {
        config.validate()?;
        if agent.config.state_dim != env.observation_dim() || agent.config.action_dim != env.action_dim() {
            return Err(FlowQlError::dimension_mismatch(
                format!("agent for {} states and {} actions", env.observation_dim(), env.action_dim()),
                format!("{} states and {} actions", agent.config.state_dim, agent.config.action_dim),
            ));
        }

        let rng = match config.seed {
            Some(seed) => StdRng::seed_from_u64(seed.wrapping_add(1)),
            None => StdRng::from_entropy(),
        };

        Ok(EpisodeLoop {
            env,
            agent,
            memories: ReplayBuffer::new(config.update_timesteps),
            config,
            metrics: MetricsTracker::default(),
            rng,
            time: 0,
            num_policy_updates: 0,
            episode: 0,
            last_learn: None,
        })
    }

    /// Global step counter across episodes.
    pub fn time(&self) -> usize {
        self.time
    }

    pub fn num_policy_updates(&self) -> usize {
        self.num_policy_updates
    }

    pub fn agent(&self) -> &MeanFlowQLAgent {
        &self.agent
    }

    pub fn agent_mut(&mut self) -> &mut MeanFlowQLAgent {
        &mut self.agent
    }

    pub fn into_agent(self) -> MeanFlowQLAgent {
        self.agent
    }

    pub fn memories(&self) -> &ReplayBuffer {
        &self.memories
    }

    pub fn metrics(&self) -> &MetricsTracker {
        &self.metrics
    }

    pub fn env(&self) -> &E {
        &self.env
    }

    pub fn config(&self) -> &TrainingConfig {
        &self.config
    }

    /// Random action with probability `prob_rand_action`, otherwise a policy
    /// sample. Always within `[ACTION_LOW, ACTION_HIGH]`.
    pub fn select_action(&mut self, state: ArrayView1<f32>) -> Result<Array1<f32>> {
        let action = if self.rng.gen::<f32>() < self.config.prob_rand_action {
            Array1::random_using(
                self.env.action_dim(),
                Uniform::new_inclusive(ACTION_LOW, ACTION_HIGH),
                &mut self.rng,
            )
        } else {
            self.agent.act(state)?
        };
        let clamped = clamp_actions(action.insert_axis(Axis(0)));
        Ok(clamped.index_axis_move(Axis(0), 0))
    }

    pub fn run_episode(&mut self) -> Result<EpisodeOutcome> {
        let mut state = self.env.reset()?;
        self.metrics.start_episode();

        let mut steps = 0;
        let mut total_reward = 0.0;
        let mut end = EpisodeEnd::MaxTimesteps;

        for _ in 0..self.config.max_timesteps {
            self.time += 1;

            let action = self.select_action(state.view())?;
            let result = self.env.step(action.view())?;
            let (terminated, truncated) = (result.terminated, result.truncated);

            steps += 1;
            total_reward += result.reward;
            self.metrics.step(result.reward);

            self.memories.append(Transition {
                state,
                action,
                reward: result.reward / self.config.max_reward,
                next_state: result.next_state.clone(),
                done: terminated,
            });
            state = result.next_state;

            let updating_agent = self.time % self.config.update_timesteps == 0;
            if updating_agent {
                self.update_policy()?;
            }

            if terminated {
                end = EpisodeEnd::Terminated;
                break;
            }
            if truncated {
                end = EpisodeEnd::Truncated;
                break;
            }
            if updating_agent {
                end = EpisodeEnd::PolicyUpdate;
                break;
            }
        }

        self.metrics.end_episode();
        let outcome = EpisodeOutcome {
            episode: self.episode,
            steps,
            total_reward,
            end,
        };
        self.episode += 1;

        debug!(
            "episode {}: {} steps, reward {:.3}, end {:?}",
            outcome.episode, outcome.steps, outcome.total_reward, outcome.end
        );
        Ok(outcome)
    }

    fn update_policy(&mut self) -> Result<()> {
        let transitions = self.memories.len();
        let stats = self.agent.learn(&mut self.memories)?;
        self.num_policy_updates += 1;
        self.metrics.record_learn(&stats);

        info!(
            "policy update {} at step {} on {} transitions | critic: {:.4} | actor flow: {:.4} | actor q value: {:.4}",
            self.num_policy_updates, self.time, transitions, stats.critic_loss, stats.flow_loss, stats.q_value
        );
        self.last_learn = Some(stats);
        Ok(())
    }

    /// Run `num_episodes` episodes.
    pub fn run(&mut self) -> Result<TrainingSummary> {
        info!(
            "training on {} for {} episodes ({} actor / {} critic parameters)",
            self.env.name(),
            self.config.num_episodes,
            self.agent.mean_flow.actor.network.num_parameters(),
            self.agent.critic.num_parameters()
        );

        let mut reward_sum = 0.0;
        let mut best: Option<f32> = None;
        let mut episodes = 0;

        for _ in 0..self.config.num_episodes {
            let outcome = self.run_episode()?;
            episodes += 1;
            reward_sum += outcome.total_reward;
            best = Some(best.map_or(outcome.total_reward, |b| b.max(outcome.total_reward)));

            if episodes % self.config.log_every_eps == 0 {
                info!(
                    "episode {}/{} | step {} | updates {} | avg reward (last {}) {:.3}",
                    episodes,
                    self.config.num_episodes,
                    self.time,
                    self.num_policy_updates,
                    self.config.log_every_eps,
                    self.metrics.avg_episode_reward(self.config.log_every_eps).unwrap_or(0.0)
                );
            }
        }

        Ok(TrainingSummary {
            episodes,
            total_timesteps: self.time,
            num_policy_updates: self.num_policy_updates,
            mean_episode_reward: if episodes > 0 { reward_sum / episodes as f32 } else { 0.0 },
            best_episode_reward: best,
            last_learn: self.last_learn.clone(),
        })
    }
}
