use super::FcBody;
use crate::distributions::Policy;
use crate::distributions::heads::{PolicyHead, TanhGaussianHead};
use crate::env::EnvironmentDescription;
use anyhow::{Result, anyhow};
use candle_core::{DType, Device, Tensor, Var};
use candle_nn::{Linear, Module, VarBuilder, VarMap, linear};

#[derive(Debug, Clone)]
struct QNet {
    body: FcBody,
    out: Linear,
}

impl QNet {
    fn build(input_dim: usize, hidden: &[usize], vb: VarBuilder) -> Result<Self> {
        let body = FcBody::build(input_dim, hidden, vb.clone())?;
        let out = linear(body.output_dim(), 1, vb.pp("out"))?;
        Ok(Self { body, out })
    }

    fn q(&self, state_actions: &Tensor) -> Result<Tensor> {
        Ok(self
            .out
            .forward(&self.body.forward(state_actions)?)?
            .squeeze(1)?)
    }
}

/// Tanh-gaussian actor and twin Q critics with separate parameter sets, so that the actor and the
/// critics get their own optimizers.
pub struct SeparatedSacNet {
    actor_body: FcBody,
    actor_out: Linear,
    head: TanhGaussianHead,
    q1: QNet,
    q2: QNet,
    actor_varmap: VarMap,
    critic_varmap: VarMap,
    action_dim: usize,
}

impl SeparatedSacNet {
    pub fn build(
        env_description: &EnvironmentDescription,
        hidden: &[usize],
        device: &Device,
    ) -> Result<Self> {
        let obs_dim = env_description.observation_size();
        let action_dim = env_description.action_size();
        let actor_varmap = VarMap::new();
        let critic_varmap = VarMap::new();
        let actor_vb = VarBuilder::from_varmap(&actor_varmap, DType::F32, device);
        let critic_vb = VarBuilder::from_varmap(&critic_varmap, DType::F32, device);
        let head = TanhGaussianHead::new(action_dim);
        let actor_body = FcBody::build(obs_dim, hidden, actor_vb.pp("actor"))?;
        let actor_out = linear(
            actor_body.output_dim(),
            head.input_dim(),
            actor_vb.pp("actor_out"),
        )?;
        let q1 = QNet::build(obs_dim + action_dim, hidden, critic_vb.pp("q1"))?;
        let q2 = QNet::build(obs_dim + action_dim, hidden, critic_vb.pp("q2"))?;
        Ok(Self {
            actor_body,
            actor_out,
            head,
            q1,
            q2,
            actor_varmap,
            critic_varmap,
            action_dim,
        })
    }

    pub fn action_dim(&self) -> usize {
        self.action_dim
    }

    pub fn policy(&self, states: &Tensor) -> Result<Policy> {
        let features = self.actor_out.forward(&self.actor_body.forward(states)?)?;
        self.head.policy(&features)
    }

    /// Values of both critics, each of shape `[N]`.
    pub fn q_values(&self, states: &Tensor, actions: &Tensor) -> Result<(Tensor, Tensor)> {
        let state_actions = Tensor::cat(&[states, actions], 1)?;
        Ok((self.q1.q(&state_actions)?, self.q2.q(&state_actions)?))
    }

    pub fn actor_vars(&self) -> Vec<Var> {
        self.actor_varmap.all_vars()
    }

    pub fn critic_vars(&self) -> Vec<Var> {
        self.critic_varmap.all_vars()
    }

    /// Polyak averaging of the critic parameters:
    /// `self = coef * source + (1 - coef) * self`. `coef = 1` copies the source.
    pub fn soft_update_critics(&self, source: &SeparatedSacNet, coef: f32) -> Result<()> {
        let target = self
            .critic_varmap
            .data()
            .lock()
            .map_err(|_| anyhow!("target critic parameters are poisoned"))?;
        let source = source
            .critic_varmap
            .data()
            .lock()
            .map_err(|_| anyhow!("source critic parameters are poisoned"))?;
        let coef = f64::from(coef);
        for (name, target_var) in target.iter() {
            let source_var = source
                .get(name)
                .ok_or_else(|| anyhow!("critic parameter {name} missing in the source"))?;
            let updated = (source_var.as_tensor().affine(coef, 0.)?
                + target_var.as_tensor().affine(1. - coef, 0.)?)?;
            target_var.set(&updated)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::env::Space;

    #[test]
    fn hard_update_copies_the_critics() -> Result<()> {
        let description = EnvironmentDescription::new(
            Space::continuous_from_dims(&[3]),
            Space::continuous_from_dims(&[2]),
        );
        let net = SeparatedSacNet::build(&description, &[8], &Device::Cpu)?;
        let target = SeparatedSacNet::build(&description, &[8], &Device::Cpu)?;
        let states = Tensor::ones((4, 3), DType::F32, &Device::Cpu)?;
        let actions = Tensor::zeros((4, 2), DType::F32, &Device::Cpu)?;
        target.soft_update_critics(&net, 1.)?;
        let (q1, q2) = net.q_values(&states, &actions)?;
        let (t1, t2) = target.q_values(&states, &actions)?;
        for (a, b) in [(q1, t1), (q2, t2)] {
            let diff = (a - b)?.abs()?.max_all()?.to_scalar::<f32>()?;
            assert!(diff < 1e-6);
        }
        let (action, log_prob) = net.policy(&states)?.rsample_with_log_prob()?;
        assert_eq!(action.dims(), &[4, 2]);
        assert_eq!(log_prob.dims(), &[4]);
        Ok(())
    }
}
