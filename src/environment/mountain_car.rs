use ndarray::{array, Array1, ArrayView1};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use crate::error::Result;
use super::{validate_action, Environment, StepResult};

pub const NAME: &str = "MountainCarContinuous-v0";

const POWER: f32 = 0.0015;
const GRAVITY: f32 = 0.0025;
const MIN_POSITION: f32 = -1.2;
const MAX_POSITION: f32 = 0.6;
const MAX_SPEED: f32 = 0.07;
const GOAL_POSITION: f32 = 0.45;
const GOAL_VELOCITY: f32 = 0.0;
const GOAL_REWARD: f32 = 100.0;
const MAX_STEPS: usize = 999;

/// Underpowered car in a valley with a continuous throttle.
///
/// Observation is `[position, velocity]`. Reaching the flag pays 100 and
/// terminates; every step costs `0.1 * a²`.
#[derive(Debug, Clone)]
pub struct MountainCarContinuous {
    position: f32,
    velocity: f32,
    steps: usize,
    max_steps: usize,
    rng: StdRng,
}

impl MountainCarContinuous {
    pub fn new(seed: Option<u64>) -> Self {
        let rng = match seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        };
        MountainCarContinuous {
            position: -0.5,
            velocity: 0.0,
            steps: 0,
            max_steps: MAX_STEPS,
            rng,
        }
    }

    pub fn with_max_steps(mut self, max_steps: usize) -> Self {
        self.max_steps = max_steps;
        self
    }

    fn observation(&self) -> Array1<f32> {
        array![self.position, self.velocity]
    }
}

impl Environment for MountainCarContinuous {
    fn name(&self) -> &str {
        NAME
    }

    fn observation_dim(&self) -> usize {
        2
    }

    fn action_dim(&self) -> usize {
        1
    }

    fn reset(&mut self) -> Result<Array1<f32>> {
        self.position = self.rng.gen_range(-0.6..-0.4);
        self.velocity = 0.0;
        self.steps = 0;
        Ok(self.observation())
    }

    fn step(&mut self, action: ArrayView1<f32>) -> Result<StepResult> {
        validate_action(action, 1)?;
        let force = action[0];

        self.velocity += force * POWER - GRAVITY * (3.0 * self.position).cos();
        self.velocity = self.velocity.clamp(-MAX_SPEED, MAX_SPEED);
        self.position = (self.position + self.velocity).clamp(MIN_POSITION, MAX_POSITION);
        if self.position == MIN_POSITION && self.velocity < 0.0 {
            self.velocity = 0.0;
        }
        self.steps += 1;

        let terminated = self.position >= GOAL_POSITION && self.velocity >= GOAL_VELOCITY;
        let mut reward = -0.1 * force.powi(2);
        if terminated {
            reward += GOAL_REWARD;
        }

        Ok(StepResult::new(
            self.observation(),
            reward,
            terminated,
            !terminated && self.steps >= self.max_steps,
        ))
    }
}
