use anyhow::Result;
use candle_core::Device;
use drizzle_api::{
    builders::{
        aoc::AOCBuilder,
        env_pool::{EnvPoolBuilder, EnvPoolType},
        networks::{fc_option_critic, sgd},
    },
    test_utils::{DummyEnvDeterministic, EPISODE_LENGTH},
};
use drizzle_core::{Algorithm, config::Config};

fn dummy_env(device: &Device) -> Result<DummyEnvDeterministic> {
    Ok(DummyEnvDeterministic::discrete(device))
}

#[test]
fn aoc_trains_on_dummy_env() -> Result<()> {
    let config = Config {
        nsteps: 4,
        nworkers: 6,
        opt_num_options: 3,
        max_steps: 120,
        seed: Some(5),
        ..Config::default()
    };
    let device = Device::Cpu;
    let pools = EnvPoolBuilder::new(EnvPoolType::Vec, 6);
    let mut agent = AOCBuilder::new(config)
        .net_fn(fc_option_critic(vec![16]))
        .optimizer_fn(sgd(1e-3))
        .build(pools.build(&dummy_env, &device)?)?
        .with_eval_env(EnvPoolBuilder::new(EnvPoolType::Vec, 2).build(&dummy_env, &device)?);
    assert_eq!(agent.learner.current_options().len(), 6);
    assert!(agent.learner.current_options().iter().all(|o| *o < 3));

    let report = agent.nstep()?;
    assert!(agent.driver.storage().is_empty());
    assert!(report.policy_loss.is_finite());
    assert!(report.value_loss.is_finite());
    assert!(report.termination_loss.is_some_and(f32::is_finite));

    agent.train()?;
    assert_eq!(agent.update_steps(), 5);
    let results = agent.eval_parallel(3)?;
    assert_eq!(results.len(), 3);
    assert!(results.iter().all(|r| r.length == EPISODE_LENGTH));
    agent.close()
}
