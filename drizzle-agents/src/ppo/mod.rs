pub mod hooks;

use crate::{actor_critic_act, actor_critic_eval, total_loss};
use anyhow::Result;
use candle_core::Tensor;
use drizzle_core::{
    agents::{LossReport, NStepLearner, StepOutput, to_scalar, to_vec1},
    optimizer::OptimizerWithMaxGrad,
    policies::ActorCriticNet,
    storage::{FeedForwardSampler, RolloutStorage},
    tensors::{
        Advantages, EntropyLoss, Logp, LogpDiff, PolicyLoss, Returns, ValueLoss, ValuesPred,
    },
    utils::cooler::Cooler,
};
use hooks::{HookResult, PPOHooks};
use std::ops::Deref;
use tracing::debug;

/// Statistics of one minibatch step, handed to the [`PPOHooks`].
#[derive(Debug, Clone, Copy)]
pub struct PPOBatchData {
    pub epoch: usize,
    pub policy_loss: f32,
    pub value_loss: f32,
    pub entropy: f32,
    pub approx_kl: f32,
    pub clip_fraction: f32,
}

#[derive(Debug, Clone)]
pub struct PPOParams {
    pub epochs: usize,
    pub minibatch_size: usize,
    pub value_clip: bool,
    pub value_loss_weight: f32,
    pub entropy_weight: f32,
    pub adv_normalize_eps: Option<f32>,
}

/// `-mean(min(ratio * A, clip(ratio, 1 - clip, 1 + clip) * A))` with `ratio = exp(logp - old_logp)`.
pub fn clipped_surrogate_loss(
    logp: &Logp,
    old_logp: &Logp,
    advantages: &Advantages,
    clip: f32,
) -> Result<(PolicyLoss, LogpDiff)> {
    let logp_diff = LogpDiff((logp.deref() - old_logp.deref())?);
    let ratio = logp_diff.exp()?;
    let clip = f64::from(clip);
    let clipped = (ratio.clamp(1. - clip, 1. + clip)? * advantages.deref())?;
    let unclipped = (&ratio * advantages.deref())?;
    let policy_loss = PolicyLoss(unclipped.minimum(&clipped)?.mean_all()?.neg()?);
    Ok((policy_loss, logp_diff))
}

/// Squared error against the returns. With `clip`, the prediction may not move further than `clip`
/// away from the old value without being penalized: `mean(max((v - R)², (v_clipped - R)²))`.
pub fn ppo_value_loss(
    values: &ValuesPred,
    old_values: &ValuesPred,
    returns: &Returns,
    clip: Option<f32>,
) -> Result<ValueLoss> {
    let unclipped = (values.deref() - returns.deref())?.sqr()?;
    let loss = match clip {
        Some(clip) => {
            let clip = f64::from(clip);
            let delta = (values.deref() - old_values.deref())?.clamp(-clip, clip)?;
            let clipped = ((old_values.deref() + delta)? - returns.deref())?.sqr()?;
            unclipped.maximum(&clipped)?.mean_all()?
        }
        None => unclipped.mean_all()?,
    };
    Ok(ValueLoss(loss))
}

/// Proximal policy optimization: several epochs of minibatch updates on the clipped surrogate
/// objective, with annealed learning rate and clip range.
pub struct PPO<N: ActorCriticNet> {
    pub net: N,
    pub optimizer: OptimizerWithMaxGrad,
    pub hooks: Box<dyn PPOHooks>,
    pub params: PPOParams,
    lr_cooler: Cooler,
    clip_cooler: Cooler,
}

impl<N: ActorCriticNet> PPO<N> {
    pub fn new(
        net: N,
        optimizer: OptimizerWithMaxGrad,
        hooks: Box<dyn PPOHooks>,
        params: PPOParams,
        lr_cooler: Cooler,
        clip_cooler: Cooler,
    ) -> Self {
        Self {
            net,
            optimizer,
            hooks,
            params,
            lr_cooler,
            clip_cooler,
        }
    }

    pub fn clip_range(&self) -> f32 {
        self.clip_cooler.current()
    }

    pub fn learning_rate(&self) -> f64 {
        self.optimizer.learning_rate()
    }

    // sums of policy loss, value loss, entropy and grad norm over all minibatches
    fn epochs(&mut self, storage: &RolloutStorage, sums: &mut [f32; 4]) -> Result<()> {
        let clip = self.clip_cooler.current();
        for epoch in 0..self.params.epochs {
            let sampler = FeedForwardSampler::new(
                storage,
                self.params.minibatch_size,
                self.params.adv_normalize_eps,
            )?;
            for batch in sampler {
                let batch = batch?;
                let (mut policy, values) = self.net.forward(&batch.states)?;
                policy.set_action(batch.actions.clone());
                let logp = Logp(policy.log_prob()?);
                let (policy_loss, logp_diff) =
                    clipped_surrogate_loss(&logp, &batch.old_log_probs, &batch.advantages, clip)?;
                let value_clip = self.params.value_clip.then_some(clip);
                let value_loss = ppo_value_loss(
                    &ValuesPred(values),
                    &batch.old_values,
                    &batch.returns,
                    value_clip,
                )?;
                let entropy_loss = EntropyLoss(policy.entropy()?.mean_all()?);
                let loss = total_loss(
                    &policy_loss,
                    &value_loss,
                    &entropy_loss,
                    self.params.value_loss_weight,
                    self.params.entropy_weight,
                )?;
                let grad_norm = self.optimizer.backward_step(&loss)?;
                let data = PPOBatchData {
                    epoch,
                    policy_loss: to_scalar(&policy_loss)?,
                    value_loss: to_scalar(&value_loss)?,
                    entropy: to_scalar(&entropy_loss)?,
                    approx_kl: to_scalar(&logp_diff.neg()?.mean_all()?)?,
                    clip_fraction: clip_fraction(&logp_diff, clip)?,
                };
                sums[0] += data.policy_loss;
                sums[1] += data.value_loss;
                sums[2] += data.entropy;
                sums[3] += grad_norm;
                if let HookResult::Break = self.hooks.batch_hook(&data)? {
                    debug!(epoch, approx_kl = data.approx_kl, "ppo update stopped by a hook");
                    return Ok(());
                }
            }
        }
        Ok(())
    }
}

fn clip_fraction(logp_diff: &LogpDiff, clip: f32) -> Result<f32> {
    let ratios = to_vec1(&logp_diff.exp()?)?;
    let clipped = ratios
        .iter()
        .filter(|ratio| (*ratio - 1.).abs() > clip)
        .count();
    Ok(clipped as f32 / ratios.len().max(1) as f32)
}

impl<N: ActorCriticNet> NStepLearner for PPO<N> {
    fn act(&mut self, states: &Tensor) -> Result<StepOutput> {
        actor_critic_act(&self.net, states)
    }

    fn bootstrap_value(&mut self, states: &Tensor) -> Result<Vec<f32>> {
        to_vec1(&self.net.value(states)?)
    }

    fn learn(&mut self, storage: &RolloutStorage) -> Result<LossReport> {
        let mut sums = [0f32; 4];
        self.epochs(storage, &mut sums)?;
        // every minibatch counts the same, including a smaller last one
        let transitions = storage.nsteps() * storage.nworkers();
        let num_updates =
            (self.params.epochs * transitions.div_ceil(self.params.minibatch_size)) as f32;
        let learning_rate = self.lr_cooler.cool();
        self.optimizer.set_learning_rate(f64::from(learning_rate));
        let clip_range = self.clip_cooler.cool();
        debug!(learning_rate, clip_range, "ppo schedules advanced");
        Ok(LossReport {
            policy_loss: sums[0] / num_updates,
            value_loss: sums[1] / num_updates,
            entropy_loss: sums[2] / num_updates,
            termination_loss: None,
            grad_norm: sums[3] / num_updates,
        })
    }

    fn eval_action(&mut self, states: &Tensor) -> Result<Tensor> {
        actor_critic_eval(&self.net, states)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use candle_core::Device;

    fn tensor(values: &[f32]) -> Result<Tensor> {
        Ok(Tensor::new(values, &Device::Cpu)?)
    }

    #[test]
    fn clipped_objective_at_ratio_one_is_the_surrogate() -> Result<()> {
        let logp = Logp(tensor(&[-0.5, -1.2, -2.0, -0.1])?);
        for advantages in [[1f32, 2., 0.5, 3.], [-1., -2., -0.5, -3.], [1., -2., 0.5, -3.]] {
            let expected = -advantages.iter().sum::<f32>() / 4.;
            let advantages = Advantages(tensor(&advantages)?);
            let (loss, diff) = clipped_surrogate_loss(&logp, &logp.clone(), &advantages, 0.2)?;
            assert!((to_scalar(&loss)? - expected).abs() < 1e-6);
            assert!(to_vec1(&diff)?.iter().all(|d| *d == 0.));
        }
        Ok(())
    }

    #[test]
    fn large_ratios_are_clipped_for_positive_advantages() -> Result<()> {
        let logp = Logp(tensor(&[2f32.ln()])?);
        let old_logp = Logp(tensor(&[0.])?);
        let advantages = Advantages(tensor(&[1.])?);
        let (loss, _) = clipped_surrogate_loss(&logp, &old_logp, &advantages, 0.2)?;
        assert!((to_scalar(&loss)? + 1.2).abs() < 1e-5);
        // a negative advantage keeps the unclipped, more pessimistic term
        let advantages = Advantages(tensor(&[-1.])?);
        let (loss, _) = clipped_surrogate_loss(&logp, &old_logp, &advantages, 0.2)?;
        assert!((to_scalar(&loss)? - 2.).abs() < 1e-5);
        Ok(())
    }

    #[test]
    fn value_clipping_takes_the_larger_error() -> Result<()> {
        let values = ValuesPred(tensor(&[1.0, 0.0])?);
        let old_values = ValuesPred(tensor(&[0.0, 0.0])?);
        let returns = Returns(tensor(&[1.0, 1.0])?);
        let clipped = ppo_value_loss(&values, &old_values, &returns, Some(0.2))?;
        // first: max(0, 0.8²), second: max(1, 1)
        assert!((to_scalar(&clipped)? - (0.64 + 1.) / 2.).abs() < 1e-5);
        let mse = ppo_value_loss(&values, &old_values, &returns, None)?;
        assert!((to_scalar(&mse)? - 0.5).abs() < 1e-6);
        Ok(())
    }
}
