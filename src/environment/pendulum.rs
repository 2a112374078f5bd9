use ndarray::{array, Array1, ArrayView1};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::f32::consts::PI;

use crate::error::Result;
use super::{validate_action, Environment, StepResult};

pub const NAME: &str = "Pendulum-v1";

const MAX_SPEED: f32 = 8.0;
const MAX_TORQUE: f32 = 2.0;
const DT: f32 = 0.05;
const GRAVITY: f32 = 10.0;
const MASS: f32 = 1.0;
const LENGTH: f32 = 1.0;
const MAX_STEPS: usize = 200;

/// Swing-up pendulum with limited torque.
///
/// Observation is `[cos θ, sin θ, θ̇]`; the single action is scaled to
/// `[-MAX_TORQUE, MAX_TORQUE]`. The episode never terminates and is truncated
/// after 200 steps.
#[derive(Debug, Clone)]
pub struct Pendulum {
    theta: f32,
    theta_dot: f32,
    steps: usize,
    max_steps: usize,
    rng: StdRng,
}

impl Pendulum {
    pub fn new(seed: Option<u64>) -> Self {
        let rng = match seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        };
        Pendulum {
            theta: 0.0,
            theta_dot: 0.0,
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
        array![self.theta.cos(), self.theta.sin(), self.theta_dot]
    }
}

/// Wrap an angle into `[-π, π)`.
pub fn angle_normalize(angle: f32) -> f32 {
    (angle + PI).rem_euclid(2.0 * PI) - PI
}

impl Environment for Pendulum {
    fn name(&self) -> &str {
        NAME
    }

    fn observation_dim(&self) -> usize {
        3
    }

    fn action_dim(&self) -> usize {
        1
    }

    fn reset(&mut self) -> Result<Array1<f32>> {
        self.theta = self.rng.gen_range(-PI..PI);
        self.theta_dot = self.rng.gen_range(-1.0..1.0);
        self.steps = 0;
        Ok(self.observation())
    }

    fn step(&mut self, action: ArrayView1<f32>) -> Result<StepResult> {
        validate_action(action, 1)?;
        let torque = action[0] * MAX_TORQUE;

        let costs = angle_normalize(self.theta).powi(2)
            + 0.1 * self.theta_dot.powi(2)
            + 0.001 * torque.powi(2);

        let theta_dot = self.theta_dot
            + (3.0 * GRAVITY / (2.0 * LENGTH) * self.theta.sin() + 3.0 / (MASS * LENGTH.powi(2)) * torque) * DT;
        self.theta_dot = theta_dot.clamp(-MAX_SPEED, MAX_SPEED);
        self.theta += self.theta_dot * DT;
        self.steps += 1;

        Ok(StepResult::new(
            self.observation(),
            -costs,
            false,
            self.steps >= self.max_steps,
        ))
    }
}
