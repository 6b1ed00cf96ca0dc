mod replay_buffer;
mod rollout_storage;
mod sampler;

pub use replay_buffer::{ReplayBatch, ReplayBuffer, Transition};
pub use rollout_storage::{ReturnEstimator, RolloutStorage, StepRecord, StorageState};
pub use sampler::{FeedForwardSampler, Minibatch};
