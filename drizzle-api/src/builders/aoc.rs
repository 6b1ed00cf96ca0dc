use super::{
    build_optimizer, lr_cooler, networks::OptionCriticNetFn, on_policy_agent, prepare, require,
};
use anyhow::Result;
use candle_core::Device;
use drizzle_agents::aoc::{AOC, AOCParams};
use drizzle_core::{
    config::Config, env::ParallelEnv, on_policy_algorithm::OnPolicyAgent,
    optimizer::OptimizerFn, policies::OptionCriticNet,
};

pub type AOCAgent<E> = OnPolicyAgent<E, AOC<Box<dyn OptionCriticNet>>>;

pub struct AOCBuilder {
    pub config: Config,
    pub net_fn: Option<OptionCriticNetFn>,
    pub optimizer_fn: Option<OptimizerFn>,
    pub device: Device,
}

impl AOCBuilder {
    pub fn new(config: Config) -> Self {
        Self {
            config,
            net_fn: None,
            optimizer_fn: None,
            device: Device::Cpu,
        }
    }

    pub fn net_fn(mut self, net_fn: OptionCriticNetFn) -> Self {
        self.net_fn = Some(net_fn);
        self
    }

    pub fn optimizer_fn(mut self, optimizer_fn: OptimizerFn) -> Self {
        self.optimizer_fn = Some(optimizer_fn);
        self
    }

    pub fn build<E: ParallelEnv>(self, env: E) -> Result<AOCAgent<E>> {
        let config = &self.config;
        prepare(config)?;
        let net_fn = require(self.net_fn, "net_fn")?;
        let optimizer_fn = require(self.optimizer_fn, "optimizer_fn")?;
        let net = net_fn(&env.env_description(), config.opt_num_options, &self.device)?;
        let optimizer = build_optimizer(&optimizer_fn, net.vars(), config)?;
        let lr_cooler = lr_cooler(&optimizer, config);
        let params = AOCParams {
            value_loss_weight: config.value_loss_weight,
            entropy_weight: config.entropy_weight,
            beta_loss_weight: config.opt_beta_loss_weight,
            delib_cost: config.opt_delib_cost,
            opt_epsilon: config.opt_epsilon,
        };
        let aoc = AOC::new(
            net,
            optimizer,
            params,
            lr_cooler,
            config.nworkers,
            self.device.clone(),
        );
        on_policy_agent(env, aoc, config, &self.device)
    }
}
