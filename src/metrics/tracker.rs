use std::collections::VecDeque;
use std::path::Path;
use serde::{Serialize, Deserialize};

use crate::algorithms::LearnStats;

/// Stores training metrics over time
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TrainingMetrics {
    /// Mean critic loss of each learning phase
    pub critic_losses: VecDeque<f32>,

    /// Mean mean-flow loss of each learning phase
    pub flow_losses: VecDeque<f32>,

    /// Mean EMA-critic value of policy samples for each learning phase
    pub q_values: VecDeque<f32>,

    /// Undiscounted, unscaled return per episode
    pub episode_rewards: VecDeque<f32>,

    /// Episode lengths
    pub episode_lengths: VecDeque<usize>,
}

impl TrainingMetrics {
    pub fn new(history_size: usize) -> Self {
        TrainingMetrics {
            critic_losses: VecDeque::with_capacity(history_size),
            flow_losses: VecDeque::with_capacity(history_size),
            q_values: VecDeque::with_capacity(history_size),
            episode_rewards: VecDeque::with_capacity(history_size),
            episode_lengths: VecDeque::with_capacity(history_size),
        }
    }
}

fn push_bounded<T>(values: &mut VecDeque<T>, value: T, history_size: usize) {
    if values.len() >= history_size {
        values.pop_front();
    }
    values.push_back(value);
}

fn recent_mean<'a, I>(values: I, len: usize, window: usize) -> Option<f32>
where
    I: DoubleEndedIterator<Item = &'a f32>,
{
    if len == 0 || window == 0 {
        return None;
    }
    let n = window.min(len);
    let sum: f32 = values.rev().take(n).sum();
    Some(sum / n as f32)
}

/// Tracks metrics during training, keeping the last `history_size` values
/// of every series.
#[derive(Debug, Clone)]
pub struct MetricsTracker {
    metrics: TrainingMetrics,
    history_size: usize,

    // Episode tracking
    current_episode_reward: f32,
    current_episode_length: usize,
    episode_count: usize,

    // Step tracking
    total_steps: usize,
    learn_count: usize,
}

impl MetricsTracker {
    pub fn new(history_size: usize) -> Self {
        let history_size = history_size.max(1);
        MetricsTracker {
            metrics: TrainingMetrics::new(history_size),
            history_size,
            current_episode_reward: 0.0,
            current_episode_length: 0,
            episode_count: 0,
            total_steps: 0,
            learn_count: 0,
        }
    }

    /// Record the outcome of one learning phase
    pub fn record_learn(&mut self, stats: &LearnStats) {
        push_bounded(&mut self.metrics.critic_losses, stats.critic_loss, self.history_size);
        push_bounded(&mut self.metrics.flow_losses, stats.flow_loss, self.history_size);
        push_bounded(&mut self.metrics.q_values, stats.q_value, self.history_size);
        self.learn_count += 1;
    }

    /// Start a new episode
    pub fn start_episode(&mut self) {
        self.current_episode_reward = 0.0;
        self.current_episode_length = 0;
    }

    /// Record a step within an episode
    pub fn step(&mut self, reward: f32) {
        self.current_episode_reward += reward;
        self.current_episode_length += 1;
        self.total_steps += 1;
    }

    /// End the current episode
    pub fn end_episode(&mut self) {
        push_bounded(&mut self.metrics.episode_rewards, self.current_episode_reward, self.history_size);
        push_bounded(&mut self.metrics.episode_lengths, self.current_episode_length, self.history_size);
        self.episode_count += 1;
    }

    pub fn metrics(&self) -> &TrainingMetrics {
        &self.metrics
    }

    pub fn episode_count(&self) -> usize {
        self.episode_count
    }

    pub fn total_steps(&self) -> usize {
        self.total_steps
    }

    pub fn learn_count(&self) -> usize {
        self.learn_count
    }

    /// Get recent average critic loss
    pub fn avg_critic_loss(&self, window: usize) -> Option<f32> {
        recent_mean(self.metrics.critic_losses.iter(), self.metrics.critic_losses.len(), window)
    }

    /// Get recent average episode reward
    pub fn avg_episode_reward(&self, window: usize) -> Option<f32> {
        recent_mean(self.metrics.episode_rewards.iter(), self.metrics.episode_rewards.len(), window)
    }

    /// Clear all metrics
    pub fn clear(&mut self) {
        self.metrics = TrainingMetrics::new(self.history_size);
        self.current_episode_reward = 0.0;
        self.current_episode_length = 0;
        self.episode_count = 0;
        self.total_steps = 0;
        self.learn_count = 0;
    }

    /// Save metrics to file as pretty JSON
    pub fn save<P: AsRef<Path>>(&self, path: P) -> crate::error::Result<()> {
        let serialized = serde_json::to_string_pretty(&self.metrics)?;
        std::fs::write(path, serialized)?;
        Ok(())
    }

    /// Load metrics from file
    pub fn load<P: AsRef<Path>>(&mut self, path: P) -> crate::error::Result<()> {
        let data = std::fs::read_to_string(path)?;
        self.metrics = serde_json::from_str(&data)?;
        Ok(())
    }
}

impl Default for MetricsTracker {
    fn default() -> Self {
        Self::new(1000)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_history_is_bounded() {
        let mut tracker = MetricsTracker::new(2);
        for reward in [1.0, 2.0, 3.0] {
            tracker.start_episode();
            tracker.step(reward);
            tracker.end_episode();
        }
        assert_eq!(tracker.episode_count(), 3);
        assert_eq!(tracker.metrics().episode_rewards, VecDeque::from(vec![2.0, 3.0]));
        assert_eq!(tracker.avg_episode_reward(10), Some(2.5));
        assert_eq!(tracker.avg_episode_reward(1), Some(3.0));
    }

    #[test]
    fn test_record_learn() {
        let mut tracker = MetricsTracker::default();
        assert_eq!(tracker.avg_critic_loss(5), None);
        tracker.record_learn(&LearnStats {
            critic_loss: 0.5,
            flow_loss: 1.0,
            q_value: -2.0,
            minibatches: 4,
        });
        assert_eq!(tracker.learn_count(), 1);
        assert_eq!(tracker.avg_critic_loss(5), Some(0.5));
        assert_eq!(tracker.metrics().q_values.back(), Some(&-2.0));
    }
}
