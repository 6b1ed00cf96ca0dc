use super::RolloutStorage;
use crate::distributions::indices_tensor;
use crate::error::DrizzleError;
use crate::rng::RNG;
use crate::tensors::{Advantages, Logp, Returns, ValuesPred};
use anyhow::Result;
use candle_core::{Device, Tensor};
use rand::seq::SliceRandom;

/// A random subset of the transitions of a rollout.
#[derive(Debug, Clone)]
pub struct Minibatch {
    /// Flat `t * nworkers + w` indices of the selected transitions.
    pub indices: Vec<usize>,
    pub states: Tensor,
    pub actions: Tensor,
    pub old_log_probs: Logp,
    pub old_values: ValuesPred,
    pub returns: Returns,
    pub advantages: Advantages,
}

/// One epoch over a ready [`RolloutStorage`]: a fresh permutation of all transitions split into
/// blocks of `minibatch_size`, the last one possibly smaller.
pub struct FeedForwardSampler {
    states: Tensor,
    actions: Tensor,
    log_probs: Tensor,
    values: Tensor,
    returns: Tensor,
    advantages: Tensor,
    permutation: Vec<usize>,
    minibatch_size: usize,
    current: usize,
    device: Device,
}

impl FeedForwardSampler {
    pub fn new(
        storage: &RolloutStorage,
        minibatch_size: usize,
        adv_normalize_eps: Option<f32>,
    ) -> Result<Self> {
        let mut advantages = storage.advantages()?.to_vec();
        let total = advantages.len();
        if minibatch_size == 0 || minibatch_size > total {
            return Err(DrizzleError::contract(format!(
                "minibatch size {minibatch_size} for {total} transitions"
            ))
            .into());
        }
        if let Some(eps) = adv_normalize_eps {
            normalize(&mut advantages, eps);
        }
        let mut permutation: Vec<usize> = (0..total).collect();
        RNG.with_borrow_mut(|rng| permutation.shuffle(rng));
        let device = storage.device().clone();
        Ok(Self {
            states: storage.batch_states()?,
            actions: storage.batch_actions()?,
            log_probs: storage.batch_log_probs()?,
            values: storage.batch_values()?,
            returns: storage.batch_returns()?,
            advantages: Tensor::from_vec(advantages, total, &device)?,
            permutation,
            minibatch_size,
            current: 0,
            device,
        })
    }

    pub fn num_batches(&self) -> usize {
        self.permutation.len().div_ceil(self.minibatch_size)
    }

    fn minibatch(&self, indices: Vec<usize>) -> Result<Minibatch> {
        let ids = indices_tensor(&indices, &self.device)?;
        Ok(Minibatch {
            states: self.states.index_select(&ids, 0)?,
            actions: self.actions.index_select(&ids, 0)?,
            old_log_probs: Logp(self.log_probs.index_select(&ids, 0)?),
            old_values: ValuesPred(self.values.index_select(&ids, 0)?),
            returns: Returns(self.returns.index_select(&ids, 0)?),
            advantages: Advantages(self.advantages.index_select(&ids, 0)?),
            indices,
        })
    }
}

impl Iterator for FeedForwardSampler {
    type Item = Result<Minibatch>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.current >= self.permutation.len() {
            return None;
        }
        let end = (self.current + self.minibatch_size).min(self.permutation.len());
        let indices = self.permutation[self.current..end].to_vec();
        self.current = end;
        Some(self.minibatch(indices))
    }
}

// (a - mean) / (std + eps) with the unbiased std
fn normalize(advantages: &mut [f32], eps: f32) {
    let n = advantages.len() as f32;
    let mean = advantages.iter().sum::<f32>() / n;
    let variance = if advantages.len() > 1 {
        advantages.iter().map(|a| (a - mean).powi(2)).sum::<f32>() / (n - 1.)
    } else {
        0.
    };
    let std = variance.sqrt() + eps;
    for a in advantages.iter_mut() {
        *a = (*a - mean) / std;
    }
}
