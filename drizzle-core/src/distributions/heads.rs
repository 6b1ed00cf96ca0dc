use super::bernoulli::Bernoulli;
use super::categorical::Categorical;
use super::gaussian::{Gaussian, TanhGaussian};
use super::{Policy, softplus};
use crate::env::Space;
use anyhow::Result;
use candle_core::{D, Tensor};
use candle_nn::{Init, VarBuilder};
use enum_dispatch::enum_dispatch;

/// Turns the raw output of a network into a [`Policy`].
#[enum_dispatch]
pub trait PolicyHead {
    /// Width of the feature vector the head consumes.
    fn input_dim(&self) -> usize;

    fn policy(&self, features: &Tensor) -> Result<Policy>;
}

#[enum_dispatch(PolicyHead)]
#[derive(Debug, Clone)]
pub enum PolicyHeadKind {
    Categorical(CategoricalHead),
    Bernoulli(BernoulliHead),
    Gaussian(GaussianHead),
    SeparateStdGaussian(SeparateStdGaussianHead),
    TanhGaussian(TanhGaussianHead),
}

impl PolicyHeadKind {
    /// The default head for an action space: categorical for discrete, bernoulli for multi binary
    /// and a gaussian with a state independent std for continuous actions.
    pub fn for_action_space(action_space: &Space, vb: VarBuilder) -> Result<Self> {
        let head = match action_space {
            Space::Discrete(n) => CategoricalHead::new(*n).into(),
            Space::MultiBinary(n) => BernoulliHead::new(*n).into(),
            Space::Continuous { size, .. } => SeparateStdGaussianHead::build(*size, vb)?.into(),
        };
        Ok(head)
    }
}

#[derive(Debug, Clone)]
pub struct CategoricalHead {
    action_dim: usize,
}

impl CategoricalHead {
    pub fn new(action_dim: usize) -> Self {
        Self { action_dim }
    }
}

impl PolicyHead for CategoricalHead {
    fn input_dim(&self) -> usize {
        self.action_dim
    }

    fn policy(&self, features: &Tensor) -> Result<Policy> {
        Ok(Policy::new(Categorical::new(features.clone())))
    }
}

#[derive(Debug, Clone)]
pub struct BernoulliHead {
    action_dim: usize,
}

impl BernoulliHead {
    pub fn new(action_dim: usize) -> Self {
        Self { action_dim }
    }
}

impl PolicyHead for BernoulliHead {
    fn input_dim(&self) -> usize {
        self.action_dim
    }

    fn policy(&self, features: &Tensor) -> Result<Policy> {
        Ok(Policy::new(Bernoulli::new(features.clone())))
    }
}

/// Mean and std both come from the network: the first half of the features is the mean, the
/// second half goes through softplus.
#[derive(Debug, Clone)]
pub struct GaussianHead {
    action_dim: usize,
}

impl GaussianHead {
    pub fn new(action_dim: usize) -> Self {
        Self { action_dim }
    }
}

impl PolicyHead for GaussianHead {
    fn input_dim(&self) -> usize {
        self.action_dim * 2
    }

    fn policy(&self, features: &Tensor) -> Result<Policy> {
        let mean = features.narrow(D::Minus1, 0, self.action_dim)?;
        let std = softplus(&features.narrow(D::Minus1, self.action_dim, self.action_dim)?)?;
        Ok(Policy::new(Gaussian::new(mean, std)?))
    }
}

/// Gaussian whose std is a learned parameter shared by all states.
#[derive(Debug, Clone)]
pub struct SeparateStdGaussianHead {
    action_dim: usize,
    log_std: Tensor,
}

impl SeparateStdGaussianHead {
    pub fn build(action_dim: usize, vb: VarBuilder) -> Result<Self> {
        let log_std = vb.get_with_hints(action_dim, "log_std", Init::Const(0.))?;
        Ok(Self {
            action_dim,
            log_std,
        })
    }
}

impl PolicyHead for SeparateStdGaussianHead {
    fn input_dim(&self) -> usize {
        self.action_dim
    }

    fn policy(&self, features: &Tensor) -> Result<Policy> {
        let std = self.log_std.exp()?.unsqueeze(0)?;
        Ok(Policy::new(Gaussian::new(features.clone(), std)?))
    }
}

const LOG_STD_MIN: f64 = -20.;
const LOG_STD_MAX: f64 = 2.;

#[derive(Debug, Clone)]
pub struct TanhGaussianHead {
    action_dim: usize,
}

impl TanhGaussianHead {
    pub fn new(action_dim: usize) -> Self {
        Self { action_dim }
    }
}

impl PolicyHead for TanhGaussianHead {
    fn input_dim(&self) -> usize {
        self.action_dim * 2
    }

    fn policy(&self, features: &Tensor) -> Result<Policy> {
        let mean = features.narrow(D::Minus1, 0, self.action_dim)?;
        let log_std = features
            .narrow(D::Minus1, self.action_dim, self.action_dim)?
            .clamp(LOG_STD_MIN, LOG_STD_MAX)?;
        Ok(Policy::new(TanhGaussian::new(mean, log_std.exp()?)?))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use candle_core::{DType, Device};
    use candle_nn::VarMap;

    #[test]
    fn heads_match_action_spaces() -> Result<()> {
        let varmap = VarMap::new();
        let vb = VarBuilder::from_varmap(&varmap, DType::F32, &Device::Cpu);
        let continuous = Space::continuous_from_dims(&[3]);
        let head = PolicyHeadKind::for_action_space(&continuous, vb.pp("head"))?;
        assert!(matches!(head, PolicyHeadKind::SeparateStdGaussian(_)));
        assert_eq!(head.input_dim(), 3);
        assert_eq!(varmap.all_vars().len(), 1);

        let features = Tensor::zeros((5, 3), DType::F32, &Device::Cpu)?;
        let mut policy = head.policy(&features)?;
        assert_eq!(policy.action()?.dims(), &[5, 3]);
        assert_eq!(policy.log_prob()?.dims(), &[5]);

        let discrete = PolicyHeadKind::for_action_space(&Space::Discrete(4), vb.pp("d"))?;
        assert!(matches!(discrete, PolicyHeadKind::Categorical(_)));
        Ok(())
    }
}
