pub mod bernoulli;
pub mod categorical;
pub mod gaussian;
pub mod heads;

use crate::error::DrizzleError;
use anyhow::Result;
use bernoulli::Bernoulli;
use candle_core::{Device, Tensor};
use categorical::Categorical;
use enum_dispatch::enum_dispatch;
use gaussian::{Gaussian, TanhGaussian};

/// A batch of action distributions, one per row.
#[enum_dispatch]
pub trait Distribution {
    /// Draws one action per row. The result is detached from the graph.
    fn sample(&self) -> Result<Tensor>;

    /// Log-probability of `actions`, one scalar per row.
    fn log_prob(&self, actions: &Tensor) -> Result<Tensor>;

    /// Entropy, one scalar per row.
    fn entropy(&self) -> Result<Tensor>;

    /// The most likely action of every row.
    fn best_action(&self) -> Result<Tensor>;

    /// Keeps the rows listed in `indices` (a `u32` tensor).
    fn index_select(&self, indices: &Tensor) -> Result<DistributionKind>;

    fn batch_size(&self) -> Result<usize>;
}

#[enum_dispatch(Distribution)]
#[derive(Debug, Clone)]
pub enum DistributionKind {
    Bernoulli(Bernoulli),
    Categorical(Categorical),
    Gaussian(Gaussian),
    TanhGaussian(TanhGaussian),
}

/// A distribution together with the action drawn from it. Produced by a network forward pass and
/// dropped after the caller queried the action, its log-probability and entropy.
#[derive(Debug, Clone)]
pub struct Policy {
    dist: DistributionKind,
    action: Option<Tensor>,
}

impl Policy {
    pub fn new(dist: impl Into<DistributionKind>) -> Self {
        Self {
            dist: dist.into(),
            action: None,
        }
    }

    /// The cached action, sampled on first use.
    pub fn action(&mut self) -> Result<Tensor> {
        match &self.action {
            Some(action) => Ok(action.clone()),
            None => {
                let action = self.dist.sample()?;
                self.action = Some(action.clone());
                Ok(action)
            }
        }
    }

    /// Replaces the cached action, used to evaluate stored actions under a new policy.
    pub fn set_action(&mut self, action: Tensor) {
        self.action = Some(action);
    }

    pub fn log_prob(&mut self) -> Result<Tensor> {
        let action = self.action()?;
        self.dist.log_prob(&action)
    }

    pub fn entropy(&self) -> Result<Tensor> {
        self.dist.entropy()
    }

    pub fn best_action(&self) -> Result<Tensor> {
        self.dist.best_action()
    }

    /// A policy over the selected rows. The cached action is not carried over.
    pub fn index_select(&self, indices: &Tensor) -> Result<Policy> {
        Ok(Policy::new(self.dist.index_select(indices)?))
    }

    /// Reparameterized sample and its log-probability, both attached to the graph. Only defined for
    /// the gaussian families.
    pub fn rsample_with_log_prob(&self) -> Result<(Tensor, Tensor)> {
        match &self.dist {
            DistributionKind::Gaussian(gaussian) => {
                let action = gaussian.rsample()?;
                let log_prob = gaussian.log_prob(&action)?;
                Ok((action, log_prob))
            }
            DistributionKind::TanhGaussian(tanh_gaussian) => tanh_gaussian.rsample_with_log_prob(),
            _ => Err(DrizzleError::contract(
                "reparameterized sampling needs a gaussian policy",
            )
            .into()),
        }
    }

    pub fn distribution(&self) -> &DistributionKind {
        &self.dist
    }
}

/// `u32` index tensor used by `index_select` and `gather`.
pub fn indices_tensor(indices: &[usize], device: &Device) -> Result<Tensor> {
    let indices: Vec<u32> = indices.iter().map(|idx| *idx as u32).collect();
    let len = indices.len();
    Ok(Tensor::from_vec(indices, len, device)?)
}

// log(1 + exp(x)) without overflowing for large x
pub(crate) fn softplus(x: &Tensor) -> Result<Tensor> {
    let tail = ((x.abs()?.neg()?.exp()? + 1.)?).log()?;
    Ok((x.relu()? + tail)?)
}

pub(crate) fn log_sigmoid(x: &Tensor) -> Result<Tensor> {
    Ok(softplus(&x.neg()?)?.neg()?)
}

pub(crate) fn sigmoid(x: &Tensor) -> Result<Tensor> {
    Ok(log_sigmoid(x)?.exp()?)
}
