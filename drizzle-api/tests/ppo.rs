use anyhow::Result;
use candle_core::Device;
use drizzle_agents::ppo::hooks::TargetKlHooks;
use drizzle_api::{
    builders::{
        env_pool::{EnvPoolBuilder, EnvPoolType},
        networks::{adam, fc_shared},
        ppo::PPOBuilder,
    },
    test_utils::DummyEnvDeterministic,
};
use drizzle_core::{Algorithm, config::Config};

fn config() -> Config {
    Config {
        nsteps: 4,
        nworkers: 6,
        ppo_epochs: 3,
        ppo_minibatch_size: 12,
        max_steps: 240,
        seed: Some(11),
        ..Config::default()
    }
}

fn dummy_env(device: &Device) -> Result<DummyEnvDeterministic> {
    Ok(DummyEnvDeterministic::discrete(device))
}

#[test]
fn ppo_nstep_empties_the_storage() -> Result<()> {
    let _ = tracing_subscriber::fmt().with_test_writer().try_init();
    let device = Device::Cpu;
    for pool_type in [EnvPoolType::Vec, EnvPoolType::Thread] {
        let env = EnvPoolBuilder::new(pool_type, 6).build(&dummy_env, &device)?;
        let mut agent = PPOBuilder::new(config())
            .net_fn(fc_shared(vec![32, 32]))
            .optimizer_fn(adam(1e-3))
            .build(env)?;
        let report = agent.nstep()?;
        assert!(agent.driver.storage().is_empty());
        assert!(report.policy_loss.is_finite());
        assert!(report.value_loss.is_finite());
        assert!(report.entropy_loss.is_finite());
        assert_eq!(agent.update_steps(), 1);
        agent.close()?;
    }
    Ok(())
}

#[test]
fn ppo_schedules_decay_towards_the_floor() -> Result<()> {
    let device = Device::Cpu;
    let env = EnvPoolBuilder::new(EnvPoolType::Vec, 6).build(&dummy_env, &device)?;
    let mut agent = PPOBuilder::new(config())
        .net_fn(fc_shared(vec![16]))
        .optimizer_fn(adam(1e-3))
        .build(env)?;
    assert!((agent.learner.clip_range() - 0.2).abs() < 1e-6);
    agent.nstep()?;
    // ten updates in total, one done
    assert!((agent.learner.clip_range() - 0.18).abs() < 1e-5);
    assert!((agent.learner.learning_rate() - 9e-4).abs() < 1e-6);
    agent.train()?;
    assert_eq!(agent.update_steps(), 10);
    assert!(agent.learner.clip_range().abs() < 1e-6);
    assert!(agent.learner.learning_rate().abs() < 1e-9);
    agent.close()
}

#[test]
fn ppo_with_target_kl_hooks_trains() -> Result<()> {
    let device = Device::Cpu;
    let env = EnvPoolBuilder::new(EnvPoolType::Vec, 6).build(&dummy_env, &device)?;
    let mut agent = PPOBuilder::new(config())
        .net_fn(fc_shared(vec![16]))
        .optimizer_fn(adam(1e-3))
        .hooks(Box::new(TargetKlHooks { target_kl: 0. }))
        .build(env)?;
    let report = agent.nstep()?;
    assert!(report.policy_loss.is_finite());
    agent.close()
}
