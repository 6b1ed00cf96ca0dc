use super::{
    build_optimizer, lr_cooler, networks::ActorCriticNetFn, on_policy_agent, prepare, require,
};
use anyhow::Result;
use candle_core::Device;
use drizzle_agents::a2c::{A2C, A2CParams};
use drizzle_core::{
    config::Config, env::ParallelEnv, on_policy_algorithm::OnPolicyAgent,
    optimizer::OptimizerFn, policies::ActorCriticNet,
};

pub type A2CAgent<E> = OnPolicyAgent<E, A2C<Box<dyn ActorCriticNet>>>;

pub struct A2CBuilder {
    pub config: Config,
    pub net_fn: Option<ActorCriticNetFn>,
    pub optimizer_fn: Option<OptimizerFn>,
    pub device: Device,
}

impl A2CBuilder {
    pub fn new(config: Config) -> Self {
        Self {
            config,
            net_fn: None,
            optimizer_fn: None,
            device: Device::Cpu,
        }
    }

    pub fn net_fn(mut self, net_fn: ActorCriticNetFn) -> Self {
        self.net_fn = Some(net_fn);
        self
    }

    pub fn optimizer_fn(mut self, optimizer_fn: OptimizerFn) -> Self {
        self.optimizer_fn = Some(optimizer_fn);
        self
    }

    pub fn build<E: ParallelEnv>(self, env: E) -> Result<A2CAgent<E>> {
        prepare(&self.config)?;
        let net_fn = require(self.net_fn, "net_fn")?;
        let optimizer_fn = require(self.optimizer_fn, "optimizer_fn")?;
        let net = net_fn(&env.env_description(), &self.device)?;
        let optimizer = build_optimizer(&optimizer_fn, net.vars(), &self.config)?;
        let lr_cooler = lr_cooler(&optimizer, &self.config);
        let params = A2CParams {
            value_loss_weight: self.config.value_loss_weight,
            entropy_weight: self.config.entropy_weight,
        };
        let a2c = A2C::new(net, optimizer, params, lr_cooler);
        on_policy_agent(env, a2c, &self.config, &self.device)
    }
}
