//! Continuous-control environments.
//!
//! Every environment takes actions normalized to `[-1, 1]` per component and
//! reports termination and truncation separately, so the caller can bootstrap
//! through time-limit cutoffs.

pub mod mountain_car;
pub mod pendulum;
pub mod recorder;

use ndarray::{Array1, ArrayView1};

use crate::error::{FlowQlError, Result};

pub use mountain_car::MountainCarContinuous;
pub use pendulum::Pendulum;
pub use recorder::{EpisodeRecorder, RecordedStep, RecordingConfig};

/// Outcome of one environment step.
#[derive(Debug, Clone, PartialEq)]
pub struct StepResult {
    pub next_state: Array1<f32>,
    pub reward: f32,
    /// Episode ended in a terminal state (goal or failure)
    pub terminated: bool,
    /// Episode was cut off by a time limit
    pub truncated: bool,
}

impl StepResult {
    pub fn new(next_state: Array1<f32>, reward: f32, terminated: bool, truncated: bool) -> Self {
        Self {
            next_state,
            reward,
            terminated,
            truncated,
        }
    }

    /// Terminated or truncated.
    pub fn is_done(&self) -> bool {
        self.terminated || self.truncated
    }
}

pub trait Environment {
    fn name(&self) -> &str;

    fn observation_dim(&self) -> usize;

    fn action_dim(&self) -> usize;

    /// Start a new episode and return its first observation.
    fn reset(&mut self) -> Result<Array1<f32>>;

    /// Advance one step. `action` must have `action_dim` finite components
    /// within `[-1, 1]`.
    fn step(&mut self, action: ArrayView1<f32>) -> Result<StepResult>;
}

impl<E: Environment + ?Sized> Environment for Box<E> {
    fn name(&self) -> &str {
        (**self).name()
    }

    fn observation_dim(&self) -> usize {
        (**self).observation_dim()
    }

    fn action_dim(&self) -> usize {
        (**self).action_dim()
    }

    fn reset(&mut self) -> Result<Array1<f32>> {
        (**self).reset()
    }

    fn step(&mut self, action: ArrayView1<f32>) -> Result<StepResult> {
        (**self).step(action)
    }
}

/// Reject actions of the wrong width or outside `[-1, 1]`.
pub fn validate_action(action: ArrayView1<f32>, action_dim: usize) -> Result<()> {
    if action.len() != action_dim {
        return Err(FlowQlError::dimension_mismatch(
            format!("action of length {}", action_dim),
            format!("length {}", action.len()),
        ));
    }
    for &value in action.iter() {
        if !value.is_finite() || !(-1.0..=1.0).contains(&value) {
            return Err(FlowQlError::ActionOutOfRange {
                value,
                low: -1.0,
                high: 1.0,
            });
        }
    }
    Ok(())
}

/// Names accepted by `make`.
pub const ENVIRONMENT_NAMES: [&str; 2] = [pendulum::NAME, mountain_car::NAME];

/// Build an environment by its registered name.
pub fn make(name: &str, seed: Option<u64>) -> Result<Box<dyn Environment>> {
    match name {
        pendulum::NAME => Ok(Box::new(Pendulum::new(seed))),
        mountain_car::NAME => Ok(Box::new(MountainCarContinuous::new(seed))),
        other => Err(FlowQlError::UnknownEnvironment(other.to_string())),
    }
}
