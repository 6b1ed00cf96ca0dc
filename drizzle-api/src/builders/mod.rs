pub mod a2c;
pub mod aoc;
pub mod env_pool;
pub mod networks;
pub mod ppo;
pub mod sac;

use anyhow::Result;
use candle_core::{Device, Var};
use drizzle_core::{
    agents::NStepLearner,
    config::Config,
    env::ParallelEnv,
    error::DrizzleError,
    on_policy_algorithm::{DefaultTrainingHooks, OnPolicyAgent, RolloutDriver},
    optimizer::{OptimizerFn, OptimizerWithMaxGrad},
    rng::seed_rng,
    utils::cooler::Cooler,
};
use tracing::debug;

// validates the config and seeds the library rng
pub(crate) fn prepare(config: &Config) -> Result<()> {
    config.validate()?;
    if let Some(seed) = config.seed {
        seed_rng(seed);
    }
    debug!(
        nsteps = config.nsteps,
        nworkers = config.nworkers,
        max_steps = config.max_steps,
        seed = ?config.seed,
        "building agent"
    );
    Ok(())
}

pub(crate) fn require<T>(factory: Option<T>, name: &'static str) -> Result<T> {
    factory.ok_or_else(|| DrizzleError::MissingFactory(name).into())
}

pub(crate) fn build_optimizer(
    optimizer_fn: &OptimizerFn,
    vars: Vec<Var>,
    config: &Config,
) -> Result<OptimizerWithMaxGrad> {
    let optimizer = optimizer_fn(vars.clone())?;
    Ok(OptimizerWithMaxGrad::new(optimizer, config.grad_clip, vars))
}

pub(crate) fn lr_cooler(optimizer: &OptimizerWithMaxGrad, config: &Config) -> Cooler {
    Cooler::new(
        config.lr_decay,
        optimizer.learning_rate() as f32,
        config.lr_min,
        config.update_horizon(),
    )
}

pub(crate) fn on_policy_agent<E: ParallelEnv, L: NStepLearner>(
    env: E,
    learner: L,
    config: &Config,
    device: &Device,
) -> Result<OnPolicyAgent<E, L>> {
    let driver = RolloutDriver::new(env, config, device.clone())?;
    let hooks = DefaultTrainingHooks::new(config.network_log_freq);
    Ok(OnPolicyAgent::new(driver, learner, hooks, config.max_steps))
}
