use anyhow::Result;
use candle_core::Device;
use drizzle_core::{
    env::EnvironmentDescription,
    optimizer::{OptimizerFn, OptimizerKind},
    policies::{
        ActorCriticNet, OptionCriticNet, SeparatedSacNet, SharedBodyActorCritic,
        SharedBodyOptionCritic,
    },
};

pub type ActorCriticNetFn =
    Box<dyn Fn(&EnvironmentDescription, &Device) -> Result<Box<dyn ActorCriticNet>>>;

/// Gets the number of options as its second argument.
pub type OptionCriticNetFn =
    Box<dyn Fn(&EnvironmentDescription, usize, &Device) -> Result<Box<dyn OptionCriticNet>>>;

pub type SacNetFn = Box<dyn Fn(&EnvironmentDescription, &Device) -> Result<SeparatedSacNet>>;

/// Fully connected actor-critic with a shared body.
pub fn fc_shared(hidden: Vec<usize>) -> ActorCriticNetFn {
    Box::new(move |env_description, device| {
        let net = SharedBodyActorCritic::build(env_description, &hidden, device)?;
        Ok(Box::new(net) as Box<dyn ActorCriticNet>)
    })
}

pub fn fc_option_critic(hidden: Vec<usize>) -> OptionCriticNetFn {
    Box::new(move |env_description, num_options, device| {
        let net = SharedBodyOptionCritic::build(env_description, &hidden, num_options, device)?;
        Ok(Box::new(net) as Box<dyn OptionCriticNet>)
    })
}

pub fn fc_sac(hidden: Vec<usize>) -> SacNetFn {
    Box::new(move |env_description, device| {
        SeparatedSacNet::build(env_description, &hidden, device)
    })
}

pub fn adam(learning_rate: f64) -> OptimizerFn {
    Box::new(move |vars| OptimizerKind::adam_w(vars, learning_rate))
}

pub fn sgd(learning_rate: f64) -> OptimizerFn {
    Box::new(move |vars| OptimizerKind::sgd(vars, learning_rate))
}
