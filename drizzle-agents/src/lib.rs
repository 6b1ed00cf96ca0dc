pub mod a2c;
pub mod aoc;
pub mod ppo;
pub mod sac;

use anyhow::Result;
use candle_core::Tensor;
use drizzle_core::{
    agents::{StepOutput, to_vec1},
    policies::ActorCriticNet,
    tensors::{EntropyLoss, PolicyLoss, ValueLoss},
};

/// Samples actions from an actor-critic network, the shared acting step of A2C and PPO.
pub(crate) fn actor_critic_act<N: ActorCriticNet>(net: &N, states: &Tensor) -> Result<StepOutput> {
    let (mut policy, values) = net.forward(states)?;
    let actions = policy.action()?;
    let log_probs = to_vec1(&policy.log_prob()?)?;
    Ok(StepOutput {
        actions,
        log_probs,
        values: to_vec1(&values)?,
        rnn_state: None,
    })
}

pub(crate) fn actor_critic_eval<N: ActorCriticNet>(net: &N, states: &Tensor) -> Result<Tensor> {
    let (policy, _) = net.forward(states)?;
    Ok(policy.best_action()?.detach())
}

/// `policy + value_loss_weight * value - entropy_weight * entropy`
pub(crate) fn total_loss(
    policy_loss: &PolicyLoss,
    value_loss: &ValueLoss,
    entropy_loss: &EntropyLoss,
    value_loss_weight: f32,
    entropy_weight: f32,
) -> Result<Tensor> {
    let value = value_loss.affine(f64::from(value_loss_weight), 0.)?;
    let entropy = entropy_loss.affine(f64::from(entropy_weight), 0.)?;
    Ok(((policy_loss.0.clone() + value)? - entropy)?)
}
