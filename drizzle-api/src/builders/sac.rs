use super::{build_optimizer, networks::SacNetFn, prepare, require};
use anyhow::Result;
use candle_core::{DType, Device, Var};
use drizzle_agents::sac::{SAC, SACParams, Temperature};
use drizzle_core::{
    config::Config,
    env::ParallelEnv,
    error::DrizzleError,
    on_policy_algorithm::DefaultTrainingHooks,
    optimizer::{OptimizerFn, OptimizerWithMaxGrad},
    storage::ReplayBuffer,
};

pub struct SACBuilder {
    pub config: Config,
    pub net_fn: Option<SacNetFn>,
    /// Used for the actor, the critics and the temperature alike.
    pub optimizer_fn: Option<OptimizerFn>,
    pub device: Device,
}

impl SACBuilder {
    pub fn new(config: Config) -> Self {
        Self {
            config,
            net_fn: None,
            optimizer_fn: None,
            device: Device::Cpu,
        }
    }

    pub fn net_fn(mut self, net_fn: SacNetFn) -> Self {
        self.net_fn = Some(net_fn);
        self
    }

    pub fn optimizer_fn(mut self, optimizer_fn: OptimizerFn) -> Self {
        self.optimizer_fn = Some(optimizer_fn);
        self
    }

    pub fn build<E: ParallelEnv>(self, env: E) -> Result<SAC<E>> {
        let config = &self.config;
        prepare(config)?;
        if env.num_envs() != config.nworkers {
            return Err(DrizzleError::config(format!(
                "the env pool has {} workers, nworkers is {}",
                env.num_envs(),
                config.nworkers
            ))
            .into());
        }
        let net_fn = require(self.net_fn, "net_fn")?;
        let optimizer_fn = require(self.optimizer_fn, "optimizer_fn")?;
        let env_description = env.env_description();
        let net = net_fn(&env_description, &self.device)?;
        let target = net_fn(&env_description, &self.device)?;
        let actor_optimizer = build_optimizer(&optimizer_fn, net.actor_vars(), config)?;
        let critic_optimizer = build_optimizer(&optimizer_fn, net.critic_vars(), config)?;
        let temperature = match config.fixed_alpha {
            Some(alpha) => Temperature::Fixed(alpha),
            None => {
                let log_alpha = Var::zeros(1, DType::F32, &self.device)?;
                let optimizer = optimizer_fn(vec![log_alpha.clone()])?;
                Temperature::Tuned {
                    optimizer: OptimizerWithMaxGrad::new(optimizer, None, vec![log_alpha.clone()]),
                    log_alpha,
                    target_entropy: config
                        .target_entropy
                        .unwrap_or(-(env_description.action_size() as f32)),
                }
            }
        };
        let params = SACParams {
            discount_factor: config.discount_factor,
            soft_update_coef: config.soft_update_coef,
            replay_batch_size: config.replay_batch_size,
            train_start: config.train_start,
            max_steps: config.max_steps,
            seed: config.seed,
        };
        SAC::new(
            net,
            target,
            actor_optimizer,
            critic_optimizer,
            temperature,
            ReplayBuffer::new(config.replay_size),
            env,
            DefaultTrainingHooks::new(config.network_log_freq),
            params,
            self.device.clone(),
        )
    }
}
