use anyhow::Result;
use candle_core::Device;
use drizzle_api::{
    builders::{
        a2c::A2CBuilder,
        env_pool::{EnvPoolBuilder, EnvPoolType},
        networks::{adam, fc_shared},
    },
    test_utils::DummyEnvDeterministic,
};
use drizzle_core::{Algorithm, config::Config, env::Space};

fn config() -> Config {
    Config {
        nsteps: 4,
        nworkers: 6,
        max_steps: 240,
        seed: Some(3),
        ..Config::default()
    }
}

fn a2c_on(action_space: Space) -> Result<()> {
    let device = Device::Cpu;
    let env_builder = |device: &Device| -> Result<DummyEnvDeterministic> {
        Ok(DummyEnvDeterministic::new(action_space.clone(), device))
    };
    let env = EnvPoolBuilder::new(EnvPoolType::Vec, 6).build(&env_builder, &device)?;
    let mut agent = A2CBuilder::new(config())
        .net_fn(fc_shared(vec![16, 16]))
        .optimizer_fn(adam(1e-3))
        .build(env)?;
    let report = agent.nstep()?;
    assert!(agent.driver.storage().is_empty());
    assert!(report.policy_loss.is_finite());
    assert!(report.value_loss.is_finite());
    assert!(report.entropy_loss.is_finite());
    assert_eq!(report.termination_loss, None);
    agent.train()?;
    assert_eq!(agent.update_steps(), 10);
    assert_eq!(agent.total_steps(), 240);
    agent.close()
}

#[test]
fn a2c_discrete_dummy_env() -> Result<()> {
    let _ = tracing_subscriber::fmt().with_test_writer().try_init();
    a2c_on(Space::Discrete(3))
}

#[test]
fn a2c_multi_binary_dummy_env() -> Result<()> {
    a2c_on(Space::MultiBinary(2))
}

#[test]
fn a2c_continuous_dummy_env() -> Result<()> {
    a2c_on(Space::continuous_from_dims(&[2]))
}
