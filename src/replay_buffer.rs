use ndarray::{Array1, Array2, ArrayView1, Axis};
use rand::seq::SliceRandom;
use rand::Rng;
use serde::{Serialize, Deserialize};

use crate::error::{FlowQlError, Result};

/// One environment step, recorded after the action was executed.
///
/// `done` is the environment's termination flag. Truncation by a time limit
/// is not a terminal state and is not recorded here.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Transition {
    pub state: Array1<f32>,
    pub action: Array1<f32>,
    pub reward: f32,
    pub next_state: Array1<f32>,
    pub done: bool,
}

/// Transitions laid out field by field: row `i` of every array is transition `i`.
#[derive(Clone, Debug, PartialEq)]
pub struct TransitionBatch {
    pub states: Array2<f32>,
    pub actions: Array2<f32>,
    pub rewards: Array1<f32>,
    pub next_states: Array2<f32>,
    pub dones: Array1<bool>,
}

fn stack_rows<'a, I>(rows: I, len: usize, width: usize, field: &str) -> Result<Array2<f32>>
where
    I: Iterator<Item = ArrayView1<'a, f32>>,
{
    let mut result = Array2::zeros((len, width));
    for (i, row) in rows.enumerate() {
        if row.len() != width {
            return Err(FlowQlError::dimension_mismatch(
                format!("{} of width {}", field, width),
                format!("width {} at transition {}", row.len(), i),
            ));
        }
        result.row_mut(i).assign(&row);
    }
    Ok(result)
}

impl TransitionBatch {
    /// Stack transitions into field-parallel arrays.
    pub fn from_transitions(transitions: &[Transition]) -> Result<Self> {
        let first = transitions.first().ok_or(FlowQlError::BufferUnderflow {
            requested: 1,
            available: 0,
        })?;
        let len = transitions.len();
        let state_dim = first.state.len();
        let action_dim = first.action.len();

        Ok(TransitionBatch {
            states: stack_rows(transitions.iter().map(|t| t.state.view()), len, state_dim, "state")?,
            actions: stack_rows(transitions.iter().map(|t| t.action.view()), len, action_dim, "action")?,
            rewards: transitions.iter().map(|t| t.reward).collect(),
            next_states: stack_rows(transitions.iter().map(|t| t.next_state.view()), len, state_dim, "next_state")?,
            dones: transitions.iter().map(|t| t.done).collect(),
        })
    }

    pub fn len(&self) -> usize {
        self.rewards.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rewards.is_empty()
    }

    /// `1 - done` as floats, the bootstrap mask.
    pub fn continuation_mask(&self) -> Array1<f32> {
        self.dones.mapv(|done| if done { 0.0 } else { 1.0 })
    }

    /// Rows at `indices`, in that order.
    pub fn select(&self, indices: &[usize]) -> Self {
        TransitionBatch {
            states: self.states.select(Axis(0), indices),
            actions: self.actions.select(Axis(0), indices),
            rewards: self.rewards.select(Axis(0), indices),
            next_states: self.next_states.select(Axis(0), indices),
            dones: self.dones.select(Axis(0), indices),
        }
    }

    /// One shuffled pass over the batch in chunks of `batch_size`.
    ///
    /// The final chunk is kept even when it is shorter than `batch_size`.
    pub fn minibatches<R: Rng + ?Sized>(&self, batch_size: usize, rng: &mut R) -> Result<Vec<Self>> {
        if batch_size == 0 {
            return Err(FlowQlError::invalid_parameter("batch_size", "must be greater than 0"));
        }
        let mut indices = (0..self.len()).collect::<Vec<usize>>();
        indices.shuffle(rng);
        Ok(indices.chunks(batch_size).map(|chunk| self.select(chunk)).collect())
    }
}

/// Transitions collected since the last policy update.
///
/// The episode loop appends one transition per environment step and the
/// agent drains everything at each update, so the buffer never holds more
/// than one update interval of data. `capacity` only sizes the allocation.
#[derive(Clone, Debug, Default)]
pub struct ReplayBuffer {
    transitions: Vec<Transition>,
    capacity: usize,
}

impl ReplayBuffer {
    pub fn new(capacity: usize) -> Self {
        ReplayBuffer {
            transitions: Vec::with_capacity(capacity),
            capacity,
        }
    }

    pub fn append(&mut self, transition: Transition) {
        self.transitions.push(transition);
    }

    /// Remove every transition and return them as a field-parallel batch.
    pub fn drain(&mut self) -> Result<TransitionBatch> {
        let batch = TransitionBatch::from_transitions(&self.transitions);
        self.transitions.clear();
        batch
    }

    /// Drop all transitions without materializing them.
    pub fn clear(&mut self) {
        self.transitions.clear();
    }

    pub fn len(&self) -> usize {
        self.transitions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.transitions.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn iter(&self) -> impl Iterator<Item = &Transition> {
        self.transitions.iter()
    }
}
