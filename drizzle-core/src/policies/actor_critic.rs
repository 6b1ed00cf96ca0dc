use super::{ActorCriticNet, FcBody};
use crate::distributions::Policy;
use crate::distributions::heads::{PolicyHead, PolicyHeadKind};
use crate::env::EnvironmentDescription;
use anyhow::Result;
use candle_core::{DType, Device, Tensor, Var};
use candle_nn::{Linear, Module, VarBuilder, VarMap, linear};

/// Actor and critic heads on top of one fully connected body.
pub struct SharedBodyActorCritic {
    body: FcBody,
    actor: Linear,
    critic: Linear,
    head: PolicyHeadKind,
    varmap: VarMap,
}

impl SharedBodyActorCritic {
    pub fn build(
        env_description: &EnvironmentDescription,
        hidden: &[usize],
        device: &Device,
    ) -> Result<Self> {
        let varmap = VarMap::new();
        let vb = VarBuilder::from_varmap(&varmap, DType::F32, device);
        let body = FcBody::build(env_description.observation_size(), hidden, vb.pp("body"))?;
        let head = PolicyHeadKind::for_action_space(&env_description.action_space, vb.pp("head"))?;
        let actor = linear(body.output_dim(), head.input_dim(), vb.pp("actor"))?;
        let critic = linear(body.output_dim(), 1, vb.pp("critic"))?;
        Ok(Self {
            body,
            actor,
            critic,
            head,
            varmap,
        })
    }
}

impl ActorCriticNet for SharedBodyActorCritic {
    fn forward(&self, states: &Tensor) -> Result<(Policy, Tensor)> {
        let features = self.body.forward(states)?;
        let policy = self.head.policy(&self.actor.forward(&features)?)?;
        let values = self.critic.forward(&features)?.squeeze(1)?;
        Ok((policy, values))
    }

    fn value(&self, states: &Tensor) -> Result<Tensor> {
        let features = self.body.forward(states)?;
        Ok(self.critic.forward(&features)?.squeeze(1)?)
    }

    fn vars(&self) -> Vec<Var> {
        self.varmap.all_vars()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::env::Space;

    #[test]
    fn forward_shapes() -> Result<()> {
        let description =
            EnvironmentDescription::new(Space::continuous_from_dims(&[4]), Space::Discrete(3));
        let net = SharedBodyActorCritic::build(&description, &[16, 16], &Device::Cpu)?;
        let states = Tensor::zeros((5, 4), DType::F32, &Device::Cpu)?;
        let (mut policy, values) = net.forward(&states)?;
        assert_eq!(values.dims(), &[5]);
        assert_eq!(policy.action()?.dims(), &[5]);
        assert_eq!(policy.entropy()?.dims(), &[5]);
        // two body layers, actor and critic, each with weight and bias
        assert_eq!(net.vars().len(), 8);
        Ok(())
    }
}
