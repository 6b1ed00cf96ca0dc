use anyhow::Result;
use candle_core::Device;
use drizzle_api::{
    builders::{
        env_pool::{EnvPoolBuilder, EnvPoolType},
        networks::{adam, fc_sac},
        sac::SACBuilder,
    },
    test_utils::ContinuousDummyEnv,
};
use drizzle_core::{Algorithm, config::Config, error::DrizzleError};

const HORIZON: usize = 5;

fn continuous_env(device: &Device) -> Result<ContinuousDummyEnv> {
    Ok(ContinuousDummyEnv::new(HORIZON, device))
}

fn config() -> Config {
    Config {
        nworkers: 2,
        replay_size: 1000,
        replay_batch_size: 16,
        train_start: 20,
        max_steps: 100,
        seed: Some(2),
        ..Config::default()
    }
}

#[test]
fn sac_trains_and_evaluates() -> Result<()> {
    let _ = tracing_subscriber::fmt().with_test_writer().try_init();
    let device = Device::Cpu;
    let env = EnvPoolBuilder::new(EnvPoolType::Vec, 2).build(&continuous_env, &device)?;
    let eval_env = EnvPoolBuilder::new(EnvPoolType::Vec, 2).build(&continuous_env, &device)?;
    let mut agent = SACBuilder::new(config())
        .net_fn(fc_sac(vec![32, 32]))
        .optimizer_fn(adam(3e-4))
        .build(env)?
        .with_eval_env(eval_env);
    assert!((agent.alpha()? - 1.).abs() < 1e-6);

    agent.train()?;
    assert_eq!(agent.total_steps(), 100);
    // one update per env step from train_start on
    assert_eq!(agent.update_steps(), 41);
    assert_eq!(agent.replay_len(), 100);
    assert!(agent.alpha()?.is_finite());

    let results = agent.eval_parallel(3)?;
    assert_eq!(results.len(), 3);
    for result in results {
        assert_eq!(result.length, HORIZON);
        assert!(result.reward <= 0.);
    }
    agent.close()
}

#[test]
fn sac_with_fixed_temperature() -> Result<()> {
    let device = Device::Cpu;
    let env = EnvPoolBuilder::new(EnvPoolType::Thread, 2).build(&continuous_env, &device)?;
    let config = Config {
        fixed_alpha: Some(0.2),
        max_steps: 40,
        ..config()
    };
    let mut agent = SACBuilder::new(config)
        .net_fn(fc_sac(vec![16]))
        .optimizer_fn(adam(3e-4))
        .build(env)?;
    agent.train()?;
    assert_eq!(agent.update_steps(), 11);
    assert!((agent.alpha()? - 0.2).abs() < 1e-6);
    let err = agent.eval_parallel(1).unwrap_err();
    assert_eq!(
        err.downcast_ref::<DrizzleError>(),
        Some(&DrizzleError::MissingFactory("eval_env"))
    );
    agent.close()
}

#[test]
fn sac_rejects_a_worker_count_mismatch() -> Result<()> {
    let device = Device::Cpu;
    let env = EnvPoolBuilder::new(EnvPoolType::Vec, 3).build(&continuous_env, &device)?;
    let result = SACBuilder::new(config())
        .net_fn(fc_sac(vec![16]))
        .optimizer_fn(adam(3e-4))
        .build(env);
    let Err(err) = result else {
        panic!("a pool of 3 workers was accepted for nworkers = 2");
    };
    assert!(matches!(
        err.downcast_ref::<DrizzleError>(),
        Some(DrizzleError::Config(_))
    ));
    Ok(())
}
