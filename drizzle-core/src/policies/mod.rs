pub mod actor_critic;
pub mod option_critic;
pub mod sac;

use crate::distributions::Policy;
use anyhow::Result;
use candle_core::{Tensor, Var};
use candle_nn::{Linear, Module, VarBuilder, linear};

pub use actor_critic::SharedBodyActorCritic;
pub use option_critic::SharedBodyOptionCritic;
pub use sac::SeparatedSacNet;

/// A network producing a policy and a state value for a batch of states.
pub trait ActorCriticNet {
    /// Returns the policy and the values of shape `[N]`.
    fn forward(&self, states: &Tensor) -> Result<(Policy, Tensor)>;

    fn value(&self, states: &Tensor) -> Result<Tensor> {
        Ok(self.forward(states)?.1)
    }

    /// The trainable variables, handed to the optimizer.
    fn vars(&self) -> Vec<Var>;
}

pub struct OptionCriticOutput {
    /// One row per worker and option, row `w * num_options + o`.
    pub policy: Policy,
    /// Option values `[N, O]`.
    pub q: Tensor,
    /// Termination probabilities `[N, O]`.
    pub beta: Tensor,
}

pub trait OptionCriticNet {
    fn forward(&self, states: &Tensor) -> Result<OptionCriticOutput>;

    fn num_options(&self) -> usize;

    fn vars(&self) -> Vec<Var>;
}

/// Fully connected layers with a relu after every layer.
#[derive(Debug, Clone)]
pub struct FcBody {
    layers: Vec<Linear>,
    output_dim: usize,
}

impl FcBody {
    pub fn build(input_dim: usize, hidden: &[usize], vb: VarBuilder) -> Result<Self> {
        let mut last_dim = input_dim;
        let mut layers = Vec::with_capacity(hidden.len());
        for (layer_idx, layer_size) in hidden.iter().enumerate() {
            layers.push(linear(last_dim, *layer_size, vb.pp(format!("fc{layer_idx}")))?);
            last_dim = *layer_size;
        }
        Ok(Self {
            layers,
            output_dim: last_dim,
        })
    }

    pub fn output_dim(&self) -> usize {
        self.output_dim
    }
}

impl Module for FcBody {
    fn forward(&self, xs: &Tensor) -> candle_core::Result<Tensor> {
        self.layers
            .iter()
            .try_fold(xs.clone(), |xs, layer| layer.forward(&xs)?.relu())
    }
}

impl<N: ActorCriticNet + ?Sized> ActorCriticNet for Box<N> {
    fn forward(&self, states: &Tensor) -> Result<(Policy, Tensor)> {
        (**self).forward(states)
    }

    fn value(&self, states: &Tensor) -> Result<Tensor> {
        (**self).value(states)
    }

    fn vars(&self) -> Vec<Var> {
        (**self).vars()
    }
}

impl<N: OptionCriticNet + ?Sized> OptionCriticNet for Box<N> {
    fn forward(&self, states: &Tensor) -> Result<OptionCriticOutput> {
        (**self).forward(states)
    }

    fn num_options(&self) -> usize {
        (**self).num_options()
    }

    fn vars(&self) -> Vec<Var> {
        (**self).vars()
    }
}
