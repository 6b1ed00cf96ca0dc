use crate::ppo::PPOBatchData;
use anyhow::Result;

pub enum HookResult {
    Continue,
    Break,
}

/// Called after every PPO minibatch step. `Break` ends the current update early.
pub trait PPOHooks {
    fn batch_hook(&mut self, data: &PPOBatchData) -> Result<HookResult>;
}

pub struct EmptyPPOHooks;

impl PPOHooks for EmptyPPOHooks {
    fn batch_hook(&mut self, _data: &PPOBatchData) -> Result<HookResult> {
        Ok(HookResult::Continue)
    }
}

/// Stops the update once the approximate KL divergence between the old and the new policy exceeds
/// `target_kl`.
pub struct TargetKlHooks {
    pub target_kl: f32,
}

impl PPOHooks for TargetKlHooks {
    fn batch_hook(&mut self, data: &PPOBatchData) -> Result<HookResult> {
        if data.approx_kl > self.target_kl {
            Ok(HookResult::Break)
        } else {
            Ok(HookResult::Continue)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn target_kl_breaks_once_exceeded() -> Result<()> {
        let mut hooks = TargetKlHooks { target_kl: 0.02 };
        let mut data = PPOBatchData {
            epoch: 0,
            policy_loss: 0.,
            value_loss: 0.,
            entropy: 0.,
            approx_kl: 0.01,
            clip_fraction: 0.,
        };
        assert!(matches!(hooks.batch_hook(&data)?, HookResult::Continue));
        data.approx_kl = 0.05;
        assert!(matches!(hooks.batch_hook(&data)?, HookResult::Break));
        assert!(matches!(
            EmptyPPOHooks.batch_hook(&data)?,
            HookResult::Continue
        ));
        Ok(())
    }
}
