use super::{Distribution, DistributionKind};
use crate::rng::RNG;
use anyhow::{Result, anyhow};
use candle_core::{D, DType, Tensor};
use candle_nn::ops::{log_softmax, softmax};
use rand::distr::Distribution as RandDistribution;
use rand::distr::weighted::WeightedIndex;

/// Categorical distribution over `logits` of shape `[N, A]`. Actions are `u32` indices of shape
/// `[N]`.
#[derive(Debug, Clone)]
pub struct Categorical {
    logits: Tensor,
}

impl Categorical {
    pub fn new(logits: Tensor) -> Self {
        Self { logits }
    }

    pub fn logits(&self) -> &Tensor {
        &self.logits
    }

    fn log_probs(&self) -> Result<Tensor> {
        Ok(log_softmax(&self.logits, D::Minus1)?)
    }
}

impl Distribution for Categorical {
    fn sample(&self) -> Result<Tensor> {
        let probs: Vec<Vec<f32>> = softmax(&self.logits, D::Minus1)?.to_vec2()?;
        let actions = RNG.with_borrow_mut(|rng| {
            probs
                .iter()
                .map(|row| {
                    let dist = WeightedIndex::new(row)
                        .map_err(|err| anyhow!("invalid action probabilities: {err}"))?;
                    Ok(dist.sample(rng) as u32)
                })
                .collect::<Result<Vec<u32>>>()
        })?;
        let len = actions.len();
        Ok(Tensor::from_vec(actions, len, self.logits.device())?)
    }

    fn log_prob(&self, actions: &Tensor) -> Result<Tensor> {
        let actions = actions.flatten_all()?.to_dtype(DType::U32)?.unsqueeze(1)?;
        Ok(self.log_probs()?.gather(&actions, 1)?.squeeze(1)?)
    }

    fn entropy(&self) -> Result<Tensor> {
        let log_probs = self.log_probs()?;
        let probs = log_probs.exp()?;
        Ok((probs * log_probs)?.sum(D::Minus1)?.neg()?)
    }

    fn best_action(&self) -> Result<Tensor> {
        Ok(self.logits.argmax(D::Minus1)?)
    }

    fn index_select(&self, indices: &Tensor) -> Result<DistributionKind> {
        Ok(Categorical::new(self.logits.index_select(indices, 0)?).into())
    }

    fn batch_size(&self) -> Result<usize> {
        Ok(self.logits.dim(0)?)
    }
}
