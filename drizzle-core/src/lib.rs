pub mod agents;
pub mod config;
pub mod distributions;
pub mod env;
pub mod error;
pub mod on_policy_algorithm;
pub mod optimizer;
pub mod policies;
pub mod rng;
pub mod storage;
pub mod tensors;
pub mod utils;

use anyhow::Result;

/// A learning algorithm. Both the on-policy agents and the soft actor-critic agent implement this
/// trait, training until their step budget is exhausted or a hook asks them to stop.
pub trait Algorithm {
    fn train(&mut self) -> Result<()>;
}
