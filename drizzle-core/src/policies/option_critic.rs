use super::{FcBody, OptionCriticNet, OptionCriticOutput};
use crate::distributions::heads::{PolicyHead, PolicyHeadKind};
use crate::distributions::sigmoid;
use crate::env::EnvironmentDescription;
use anyhow::Result;
use candle_core::{DType, Device, Tensor, Var};
use candle_nn::{Linear, Module, VarBuilder, VarMap, linear};

/// Option-critic network: per option policies, option values and termination probabilities share
/// one fully connected body.
pub struct SharedBodyOptionCritic {
    body: FcBody,
    actor: Linear,
    q: Linear,
    beta: Linear,
    head: PolicyHeadKind,
    num_options: usize,
    varmap: VarMap,
}

impl SharedBodyOptionCritic {
    pub fn build(
        env_description: &EnvironmentDescription,
        hidden: &[usize],
        num_options: usize,
        device: &Device,
    ) -> Result<Self> {
        let varmap = VarMap::new();
        let vb = VarBuilder::from_varmap(&varmap, DType::F32, device);
        let body = FcBody::build(env_description.observation_size(), hidden, vb.pp("body"))?;
        let head = PolicyHeadKind::for_action_space(&env_description.action_space, vb.pp("head"))?;
        let features = body.output_dim();
        let actor = linear(features, head.input_dim() * num_options, vb.pp("actor"))?;
        let q = linear(features, num_options, vb.pp("q"))?;
        let beta = linear(features, num_options, vb.pp("beta"))?;
        Ok(Self {
            body,
            actor,
            q,
            beta,
            head,
            num_options,
            varmap,
        })
    }
}

impl OptionCriticNet for SharedBodyOptionCritic {
    fn forward(&self, states: &Tensor) -> Result<OptionCriticOutput> {
        let features = self.body.forward(states)?;
        let batch = features.dim(0)?;
        let logits = self
            .actor
            .forward(&features)?
            .reshape((batch * self.num_options, self.head.input_dim()))?;
        Ok(OptionCriticOutput {
            policy: self.head.policy(&logits)?,
            q: self.q.forward(&features)?,
            beta: sigmoid(&self.beta.forward(&features)?)?,
        })
    }

    fn num_options(&self) -> usize {
        self.num_options
    }

    fn vars(&self) -> Vec<Var> {
        self.varmap.all_vars()
    }
}
