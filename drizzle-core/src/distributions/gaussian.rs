use super::{Distribution, DistributionKind};
use crate::rng::RNG;
use anyhow::Result;
use candle_core::{D, Tensor};
use rand_distr::{Distribution as RandDistribution, StandardNormal};
use std::f64::consts::PI;

const TANH_EPS: f64 = 1e-6;

fn log_sqrt_2pi() -> f64 {
    (2. * PI).sqrt().ln()
}

/// Diagonal gaussian with `mean` and `std` of shape `[N, D]`.
#[derive(Debug, Clone)]
pub struct Gaussian {
    mean: Tensor,
    std: Tensor,
}

impl Gaussian {
    pub fn new(mean: Tensor, std: Tensor) -> Result<Self> {
        let std = std.broadcast_as(mean.shape())?.contiguous()?;
        Ok(Self { mean, std })
    }

    pub fn mean(&self) -> &Tensor {
        &self.mean
    }

    pub fn std(&self) -> &Tensor {
        &self.std
    }

    /// `mean + std * noise`, differentiable with respect to both parameters.
    pub fn rsample(&self) -> Result<Tensor> {
        let len = self.mean.elem_count();
        let noise: Vec<f32> = RNG.with_borrow_mut(|rng| {
            StandardNormal.sample_iter(rng).take(len).collect()
        });
        let noise = Tensor::from_vec(noise, self.mean.shape(), self.mean.device())?;
        Ok((&self.mean + (&self.std * noise)?)?)
    }
}

impl Distribution for Gaussian {
    fn sample(&self) -> Result<Tensor> {
        Ok(self.rsample()?.detach())
    }

    fn log_prob(&self, actions: &Tensor) -> Result<Tensor> {
        let var = self.std.sqr()?;
        let log_probs = ((actions.broadcast_sub(&self.mean)?.sqr()? / var.affine(2., 0.)?)?
            .neg()?
            - self.std.log()?)?
            .affine(1., -log_sqrt_2pi())?;
        Ok(log_probs.sum(D::Minus1)?)
    }

    fn entropy(&self) -> Result<Tensor> {
        let entropy = self.std.log()?.affine(1., 0.5 + log_sqrt_2pi())?;
        Ok(entropy.sum(D::Minus1)?)
    }

    fn best_action(&self) -> Result<Tensor> {
        Ok(self.mean.detach())
    }

    fn index_select(&self, indices: &Tensor) -> Result<DistributionKind> {
        Ok(Gaussian::new(
            self.mean.index_select(indices, 0)?,
            self.std.index_select(indices, 0)?,
        )?
        .into())
    }

    fn batch_size(&self) -> Result<usize> {
        Ok(self.mean.dim(0)?)
    }
}

/// Gaussian squashed through `tanh`, actions live in `(-1, 1)`.
#[derive(Debug, Clone)]
pub struct TanhGaussian {
    base: Gaussian,
}

impl TanhGaussian {
    pub fn new(mean: Tensor, std: Tensor) -> Result<Self> {
        Ok(Self {
            base: Gaussian::new(mean, std)?,
        })
    }

    // log|d tanh(u) / du| summed over the action dimension
    fn squash_correction(squashed: &Tensor) -> Result<Tensor> {
        Ok(squashed
            .sqr()?
            .affine(-1., 1. + TANH_EPS)?
            .log()?
            .sum(D::Minus1)?)
    }

    /// Reparameterized squashed sample and its log-probability.
    pub fn rsample_with_log_prob(&self) -> Result<(Tensor, Tensor)> {
        let pre_tanh = self.base.rsample()?;
        let action = pre_tanh.tanh()?;
        let log_prob = (self.base.log_prob(&pre_tanh)? - Self::squash_correction(&action)?)?;
        Ok((action, log_prob))
    }
}

impl Distribution for TanhGaussian {
    fn sample(&self) -> Result<Tensor> {
        Ok(self.base.sample()?.tanh()?)
    }

    fn log_prob(&self, actions: &Tensor) -> Result<Tensor> {
        let actions = actions.clamp(-1. + TANH_EPS, 1. - TANH_EPS)?;
        // atanh(a) = 0.5 * ln((1 + a) / (1 - a))
        let pre_tanh = (actions.affine(1., 1.)? / actions.affine(-1., 1.)?)?
            .log()?
            .affine(0.5, 0.)?;
        Ok((self.base.log_prob(&pre_tanh)? - Self::squash_correction(&actions)?)?)
    }

    // no closed form, the entropy of the underlying gaussian is reported
    fn entropy(&self) -> Result<Tensor> {
        self.base.entropy()
    }

    fn best_action(&self) -> Result<Tensor> {
        Ok(self.base.best_action()?.tanh()?)
    }

    fn index_select(&self, indices: &Tensor) -> Result<DistributionKind> {
        Ok(TanhGaussian {
            base: Gaussian::new(
                self.base.mean.index_select(indices, 0)?,
                self.base.std.index_select(indices, 0)?,
            )?,
        }
        .into())
    }

    fn batch_size(&self) -> Result<usize> {
        self.base.batch_size()
    }
}
