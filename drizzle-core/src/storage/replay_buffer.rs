use crate::error::DrizzleError;
use crate::utils::sample::sample_indices;
use anyhow::Result;
use candle_core::Tensor;

#[derive(Debug, Clone)]
pub struct Transition {
    pub state: Tensor,
    pub action: Tensor,
    pub reward: f32,
    pub next_state: Tensor,
    pub done: bool,
}

/// Stacked transitions, `rewards` and `dones` have shape `[B]`.
#[derive(Debug)]
pub struct ReplayBatch {
    pub states: Tensor,
    pub actions: Tensor,
    pub rewards: Tensor,
    pub next_states: Tensor,
    pub dones: Tensor,
}

/// Ring buffer overwriting the oldest transition once full.
#[derive(Debug)]
pub struct ReplayBuffer {
    capacity: usize,
    transitions: Vec<Transition>,
    next: usize,
}

impl ReplayBuffer {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            capacity,
            transitions: Vec::with_capacity(capacity.min(1 << 16)),
            next: 0,
        }
    }

    pub fn len(&self) -> usize {
        self.transitions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.transitions.is_empty()
    }

    pub fn push(&mut self, transition: Transition) {
        if self.transitions.len() < self.capacity {
            self.transitions.push(transition);
        } else {
            self.transitions[self.next] = transition;
        }
        self.next = (self.next + 1) % self.capacity;
    }

    /// Uniformly samples `batch_size` distinct transitions.
    pub fn sample(&self, batch_size: usize) -> Result<ReplayBatch> {
        if batch_size == 0 {
            return Err(DrizzleError::contract("empty replay batch").into());
        }
        let indices = sample_indices(self.transitions.len(), batch_size)?;
        let picked: Vec<&Transition> = indices.iter().map(|idx| &self.transitions[*idx]).collect();
        let states: Vec<&Tensor> = picked.iter().map(|t| &t.state).collect();
        let actions: Vec<&Tensor> = picked.iter().map(|t| &t.action).collect();
        let next_states: Vec<&Tensor> = picked.iter().map(|t| &t.next_state).collect();
        let rewards: Vec<f32> = picked.iter().map(|t| t.reward).collect();
        let dones: Vec<f32> = picked.iter().map(|t| f32::from(u8::from(t.done))).collect();
        let device = self.transitions[indices[0]].state.device().clone();
        Ok(ReplayBatch {
            states: Tensor::stack(&states, 0)?,
            actions: Tensor::stack(&actions, 0)?,
            rewards: Tensor::from_vec(rewards, batch_size, &device)?,
            next_states: Tensor::stack(&next_states, 0)?,
            dones: Tensor::from_vec(dones, batch_size, &device)?,
        })
    }
}
