use super::{
    build_optimizer, lr_cooler, networks::ActorCriticNetFn, on_policy_agent, prepare, require,
};
use anyhow::Result;
use candle_core::Device;
use drizzle_agents::ppo::{
    PPO, PPOParams,
    hooks::{EmptyPPOHooks, PPOHooks},
};
use drizzle_core::{
    config::Config,
    env::ParallelEnv,
    on_policy_algorithm::OnPolicyAgent,
    optimizer::OptimizerFn,
    policies::ActorCriticNet,
    utils::cooler::Cooler,
};

pub type PPOAgent<E> = OnPolicyAgent<E, PPO<Box<dyn ActorCriticNet>>>;

pub struct PPOBuilder {
    pub config: Config,
    pub net_fn: Option<ActorCriticNetFn>,
    pub optimizer_fn: Option<OptimizerFn>,
    pub hooks: Option<Box<dyn PPOHooks>>,
    pub device: Device,
}

impl PPOBuilder {
    pub fn new(config: Config) -> Self {
        Self {
            config,
            net_fn: None,
            optimizer_fn: None,
            hooks: None,
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

    pub fn hooks(mut self, hooks: Box<dyn PPOHooks>) -> Self {
        self.hooks = Some(hooks);
        self
    }

    pub fn device(mut self, device: Device) -> Self {
        self.device = device;
        self
    }

    pub fn build<E: ParallelEnv>(self, env: E) -> Result<PPOAgent<E>> {
        let Self {
            config,
            net_fn,
            optimizer_fn,
            hooks,
            device,
        } = self;
        prepare(&config)?;
        config.validate_minibatch()?;
        let net_fn = require(net_fn, "net_fn")?;
        let optimizer_fn = require(optimizer_fn, "optimizer_fn")?;
        let net = net_fn(&env.env_description(), &device)?;
        let optimizer = build_optimizer(&optimizer_fn, net.vars(), &config)?;
        let lr_cooler = lr_cooler(&optimizer, &config);
        let clip_cooler = Cooler::new(
            config.clip_decay,
            config.ppo_clip,
            config.clip_min,
            config.update_horizon(),
        );
        let params = PPOParams {
            epochs: config.ppo_epochs,
            minibatch_size: config.ppo_minibatch_size,
            value_clip: config.ppo_value_clip,
            value_loss_weight: config.value_loss_weight,
            entropy_weight: config.entropy_weight,
            adv_normalize_eps: config.adv_normalize_eps,
        };
        let hooks = hooks.unwrap_or_else(|| Box::new(EmptyPPOHooks));
        let ppo = PPO::new(net, optimizer, hooks, params, lr_cooler, clip_cooler);
        on_policy_agent(env, ppo, &config, &device)
    }
}
