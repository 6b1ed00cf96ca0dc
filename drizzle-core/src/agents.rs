use crate::error::ensure_finite;
use crate::storage::RolloutStorage;
use anyhow::Result;
use candle_core::Tensor;

/// What a learner decided for one batch of states. Everything is detached from the graph.
#[derive(Debug, Clone)]
pub struct StepOutput {
    /// One action per worker, batched along the first dimension.
    pub actions: Tensor,
    pub log_probs: Vec<f32>,
    pub values: Vec<f32>,
    pub rnn_state: Option<Tensor>,
}

/// Mean losses of one update.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct LossReport {
    pub policy_loss: f32,
    pub value_loss: f32,
    pub entropy_loss: f32,
    /// Only reported by option-critic learners.
    pub termination_loss: Option<f32>,
    pub grad_norm: f32,
}

impl LossReport {
    /// Fails with `DrizzleError::NonFinite` when any loss is NaN or infinite.
    pub fn ensure_finite(self) -> Result<Self> {
        ensure_finite("policy loss", self.policy_loss)?;
        ensure_finite("value loss", self.value_loss)?;
        ensure_finite("entropy loss", self.entropy_loss)?;
        if let Some(termination_loss) = self.termination_loss {
            ensure_finite("termination loss", termination_loss)?;
        }
        Ok(self)
    }
}

/// The learner side of an on-policy agent, driven by
/// [`RolloutDriver`](crate::on_policy_algorithm::RolloutDriver).
pub trait NStepLearner {
    /// Picks actions for `states` of shape `[nworkers, ..obs]`.
    fn act(&mut self, states: &Tensor) -> Result<StepOutput>;

    /// Called whenever the envs are reset and a rollout starts from fresh states. Learners that
    /// keep per-worker state across steps drop it here.
    fn reset(&mut self) -> Result<()> {
        Ok(())
    }

    /// Done flags of the env step that followed the last `act`.
    fn observe(&mut self, _dones: &[bool]) -> Result<()> {
        Ok(())
    }

    /// Values of the states following the last step, used to bootstrap the returns.
    fn bootstrap_value(&mut self, states: &Tensor) -> Result<Vec<f32>>;

    /// Updates the networks from a storage whose returns are computed.
    fn learn(&mut self, storage: &RolloutStorage) -> Result<LossReport>;

    /// Greedy actions used for evaluation.
    fn eval_action(&mut self, states: &Tensor) -> Result<Tensor>;
}

/// Converts a `[N]` float tensor to a vector, dropping it from the graph.
pub fn to_vec1(tensor: &Tensor) -> Result<Vec<f32>> {
    Ok(tensor.detach().to_vec1()?)
}

pub fn to_scalar(tensor: &Tensor) -> Result<f32> {
    Ok(tensor.detach().to_scalar()?)
}
