use crate::{actor_critic_act, actor_critic_eval, total_loss};
use anyhow::Result;
use candle_core::Tensor;
use drizzle_core::{
    agents::{LossReport, NStepLearner, StepOutput, to_scalar, to_vec1},
    optimizer::OptimizerWithMaxGrad,
    policies::ActorCriticNet,
    storage::RolloutStorage,
    tensors::{EntropyLoss, PolicyLoss, ValueLoss},
    utils::cooler::Cooler,
};
use tracing::debug;

pub struct A2CParams {
    pub value_loss_weight: f32,
    pub entropy_weight: f32,
}

/// Advantage actor-critic: one full batch gradient step per rollout.
pub struct A2C<N: ActorCriticNet> {
    pub net: N,
    pub optimizer: OptimizerWithMaxGrad,
    pub params: A2CParams,
    lr_cooler: Cooler,
}

impl<N: ActorCriticNet> A2C<N> {
    pub fn new(
        net: N,
        optimizer: OptimizerWithMaxGrad,
        params: A2CParams,
        lr_cooler: Cooler,
    ) -> Self {
        Self {
            net,
            optimizer,
            params,
            lr_cooler,
        }
    }
}

impl<N: ActorCriticNet> NStepLearner for A2C<N> {
    fn act(&mut self, states: &Tensor) -> Result<StepOutput> {
        actor_critic_act(&self.net, states)
    }

    fn bootstrap_value(&mut self, states: &Tensor) -> Result<Vec<f32>> {
        to_vec1(&self.net.value(states)?)
    }

    fn learn(&mut self, storage: &RolloutStorage) -> Result<LossReport> {
        let states = storage.batch_states()?;
        let returns = storage.batch_returns()?;
        let (mut policy, values) = self.net.forward(&states)?;
        policy.set_action(storage.batch_actions()?);
        let advantages = (returns - values)?;
        let policy_loss = PolicyLoss(
            (policy.log_prob()? * advantages.detach())?
                .mean_all()?
                .neg()?,
        );
        let value_loss = ValueLoss(advantages.sqr()?.mean_all()?);
        let entropy_loss = EntropyLoss(policy.entropy()?.mean_all()?);
        let loss = total_loss(
            &policy_loss,
            &value_loss,
            &entropy_loss,
            self.params.value_loss_weight,
            self.params.entropy_weight,
        )?;
        let grad_norm = self.optimizer.backward_step(&loss)?;
        let learning_rate = self.lr_cooler.cool();
        self.optimizer.set_learning_rate(f64::from(learning_rate));
        debug!(learning_rate, grad_norm, "a2c update");
        Ok(LossReport {
            policy_loss: to_scalar(&policy_loss)?,
            value_loss: to_scalar(&value_loss)?,
            entropy_loss: to_scalar(&entropy_loss)?,
            termination_loss: None,
            grad_norm,
        })
    }

    fn eval_action(&mut self, states: &Tensor) -> Result<Tensor> {
        actor_critic_eval(&self.net, states)
    }
}
